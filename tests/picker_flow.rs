//! Picker behavior against fake accessory, radio, connection and printer
//! collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use tokio::runtime::Handle;

use zebra_tester::{
    AccessoryRecord, Connection, ConnectionFactory, ControlLanguage, PickerConfig, PickerParts,
    PrintResult, PrinterFactory, PrinterPicker, RadioHub, RadioManager, RadioState,
    StaticAccessories, TesterError, ZebraPrinter,
};

const SETUP: &[u8] = b"^XA^PW408^LT16^XZ";
const TEST_LABEL: &[u8] = b"^XA^FO50,50^ADN,36,20^FDTEST^FS^XZ";

#[derive(Default)]
struct Wire {
    attempts: Mutex<Vec<String>>,
    writes: Mutex<Vec<Vec<u8>>>,
}

#[derive(Clone, Copy, Default)]
struct Faults {
    construct: bool,
    open: bool,
    first_write: bool,
}

struct FakeConnections {
    wire: Arc<Wire>,
    faults: Faults,
}

impl ConnectionFactory for FakeConnections {
    fn connect(&self, serial_number: &str) -> PrintResult<Box<dyn Connection>> {
        self.wire
            .attempts
            .lock()
            .unwrap()
            .push(serial_number.to_string());
        if self.faults.construct {
            return Err(TesterError::ConnectionConstruction("no session".into()));
        }
        Ok(Box::new(FakeConnection {
            wire: self.wire.clone(),
            faults: self.faults,
            open: false,
            writes: 0,
        }))
    }
}

/// Blocks in `connect` until the test releases it.
struct GatedConnections {
    wire: Arc<Wire>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl ConnectionFactory for GatedConnections {
    fn connect(&self, serial_number: &str) -> PrintResult<Box<dyn Connection>> {
        self.release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| TesterError::ConnectionConstruction("never released".into()))?;
        self.wire
            .attempts
            .lock()
            .unwrap()
            .push(serial_number.to_string());
        Ok(Box::new(FakeConnection {
            wire: self.wire.clone(),
            faults: Faults::default(),
            open: false,
            writes: 0,
        }))
    }
}

struct FakeConnection {
    wire: Arc<Wire>,
    faults: Faults,
    open: bool,
    writes: usize,
}

impl Connection for FakeConnection {
    fn open(&mut self) -> PrintResult<()> {
        if self.faults.open {
            return Err(TesterError::ConnectionOpen("refused".into()));
        }
        self.open = true;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> PrintResult<usize> {
        self.writes += 1;
        if self.faults.first_write && self.writes == 1 {
            return Err(TesterError::Write("link dropped".into()));
        }
        self.wire.writes.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
    }
}

struct Language(ControlLanguage);

impl ZebraPrinter for Language {
    fn control_language(&self) -> ControlLanguage {
        self.0
    }
}

struct CountingPrinters {
    calls: AtomicUsize,
    language: Option<ControlLanguage>,
}

impl CountingPrinters {
    fn new(language: Option<ControlLanguage>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            language,
        }
    }
}

impl PrinterFactory for CountingPrinters {
    fn printer_instance(
        &self,
        _connection: &mut dyn Connection,
    ) -> PrintResult<Box<dyn ZebraPrinter>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.language {
            Some(language) => Ok(Box::new(Language(language))),
            None => Err(TesterError::PrinterFactory("unknown printer".into())),
        }
    }
}

struct Harness {
    picker: Arc<PrinterPicker>,
    accessories: Arc<StaticAccessories>,
    radio: Arc<RadioHub>,
    wire: Arc<Wire>,
    printers: Arc<CountingPrinters>,
}

fn harness(
    accessories: Vec<AccessoryRecord>,
    radio: RadioState,
    faults: Faults,
    language: Option<ControlLanguage>,
) -> Harness {
    let accessories = Arc::new(StaticAccessories::new(accessories));
    let radio = Arc::new(RadioHub::new(radio));
    let wire = Arc::new(Wire::default());
    let printers = Arc::new(CountingPrinters::new(language));
    let parts = PickerParts {
        accessories: accessories.clone(),
        radio: radio.clone(),
        connections: Arc::new(FakeConnections {
            wire: wire.clone(),
            faults,
        }),
        printers: printers.clone(),
    };
    let picker = PrinterPicker::new(parts, PickerConfig::default(), Handle::current());
    Harness {
        picker,
        accessories,
        radio,
        wire,
        printers,
    }
}

fn zebra() -> AccessoryRecord {
    AccessoryRecord::new("Zebra", "ZQ630-AUBOCA", "S123")
}

#[tokio::test]
async fn powered_on_at_creation_loads_snapshot() {
    let h = harness(vec![zebra()], RadioState::PoweredOn, Faults::default(), None);
    assert_eq!(h.picker.snapshot().to_vec(), vec![zebra()]);
}

#[tokio::test]
async fn non_powered_on_states_leave_snapshot_alone() {
    let h = harness(vec![zebra()], RadioState::PoweredOn, Faults::default(), None);
    h.accessories.replace(vec![
        AccessoryRecord::new("Other", "LP2844", "X1"),
        zebra(),
    ]);

    for state in [
        RadioState::PoweredOff,
        RadioState::Resetting,
        RadioState::Unauthorized,
        RadioState::Unsupported,
        RadioState::Unknown,
    ] {
        h.radio.publish(state);
        assert_eq!(h.picker.snapshot().to_vec(), vec![zebra()], "{state}");
    }
}

#[tokio::test]
async fn powered_on_notification_takes_current_list() {
    let h = harness(Vec::new(), RadioState::PoweredOff, Faults::default(), None);
    assert_eq!(h.picker.row_count(), 0);

    h.accessories.replace(vec![zebra()]);
    h.radio.publish(RadioState::PoweredOn);

    assert_eq!(h.picker.snapshot().to_vec(), vec![zebra()]);
    assert_eq!(h.picker.radio_state(), RadioState::PoweredOn);
}

#[tokio::test]
async fn refresh_tracks_provider_including_empty() {
    let h = harness(vec![zebra()], RadioState::PoweredOff, Faults::default(), None);
    assert_eq!(h.picker.row_count(), 0);

    assert_eq!(h.picker.on_refresh_requested(), vec!["Zebra ZQ630-AUBOCA S123"]);

    h.accessories.replace(Vec::new());
    assert!(h.picker.on_refresh_requested().is_empty());
    assert!(h.picker.snapshot().is_empty());
}

#[tokio::test]
async fn zpl_printer_gets_setup_then_test_label() {
    let h = harness(
        vec![zebra()],
        RadioState::PoweredOn,
        Faults::default(),
        Some(ControlLanguage::Zpl),
    );

    let report = h.picker.on_accessory_selected(0).unwrap().await.unwrap().unwrap();

    assert!(report.is_complete());
    assert_eq!(*h.wire.attempts.lock().unwrap(), vec!["S123".to_string()]);
    assert_eq!(
        *h.wire.writes.lock().unwrap(),
        vec![SETUP.to_vec(), TEST_LABEL.to_vec()]
    );
}

#[tokio::test]
async fn other_models_never_connect() {
    let h = harness(
        vec![AccessoryRecord::new("Zebra", "LP2844", "S123")],
        RadioState::PoweredOn,
        Faults::default(),
        Some(ControlLanguage::Zpl),
    );

    let result = h.picker.on_accessory_selected(0).unwrap().await.unwrap();

    assert!(matches!(result, Err(TesterError::ModelMismatch { .. })));
    assert!(h.wire.attempts.lock().unwrap().is_empty());
    assert_eq!(h.printers.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn non_zpl_printer_gets_no_writes() {
    let h = harness(
        vec![zebra()],
        RadioState::PoweredOn,
        Faults::default(),
        Some(ControlLanguage::Cpcl),
    );

    let result = h.picker.on_accessory_selected(0).unwrap().await.unwrap();

    assert!(matches!(
        result,
        Err(TesterError::UnsupportedLanguage(ControlLanguage::Cpcl))
    ));
    assert!(h.wire.writes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn open_failure_skips_factory_and_writes() {
    let h = harness(
        vec![zebra()],
        RadioState::PoweredOn,
        Faults {
            open: true,
            ..Default::default()
        },
        Some(ControlLanguage::Zpl),
    );

    let result = h.picker.on_accessory_selected(0).unwrap().await.unwrap();

    assert!(matches!(result, Err(TesterError::ConnectionOpen(_))));
    assert_eq!(h.printers.calls.load(Ordering::SeqCst), 0);
    assert!(h.wire.writes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn construction_failure_aborts() {
    let h = harness(
        vec![zebra()],
        RadioState::PoweredOn,
        Faults {
            construct: true,
            ..Default::default()
        },
        Some(ControlLanguage::Zpl),
    );

    let result = h.picker.on_accessory_selected(0).unwrap().await.unwrap();

    assert!(matches!(result, Err(TesterError::ConnectionConstruction(_))));
    assert_eq!(h.wire.attempts.lock().unwrap().len(), 1);
    assert_eq!(h.printers.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn factory_failure_aborts_before_writes() {
    let h = harness(vec![zebra()], RadioState::PoweredOn, Faults::default(), None);

    let result = h.picker.on_accessory_selected(0).unwrap().await.unwrap();

    assert!(matches!(result, Err(TesterError::PrinterFactory(_))));
    assert_eq!(h.printers.calls.load(Ordering::SeqCst), 1);
    assert!(h.wire.writes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_write_is_not_retried_and_second_still_sent() {
    let h = harness(
        vec![zebra()],
        RadioState::PoweredOn,
        Faults {
            first_write: true,
            ..Default::default()
        },
        Some(ControlLanguage::Zpl),
    );

    let report = h.picker.on_accessory_selected(0).unwrap().await.unwrap().unwrap();

    assert_eq!(report.payloads, 2);
    assert_eq!(report.delivered, 1);
    assert_eq!(*h.wire.writes.lock().unwrap(), vec![TEST_LABEL.to_vec()]);
}

#[tokio::test]
async fn out_of_range_selection_dispatches_nothing() {
    let h = harness(vec![zebra()], RadioState::PoweredOn, Faults::default(), None);
    assert!(h.picker.on_accessory_selected(1).is_none());
    assert!(h.wire.attempts.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repeated_selections_run_independently() {
    let h = harness(
        vec![zebra()],
        RadioState::PoweredOn,
        Faults::default(),
        Some(ControlLanguage::Zpl),
    );

    let first = h.picker.on_accessory_selected(0).unwrap();
    let second = h.picker.on_accessory_selected(0).unwrap();
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert_eq!(h.wire.attempts.lock().unwrap().len(), 2);
    let writes = h.wire.writes.lock().unwrap();
    assert_eq!(writes.len(), 4);
    assert_eq!(writes.iter().filter(|w| w.as_slice() == SETUP).count(), 2);
    assert_eq!(writes.iter().filter(|w| w.as_slice() == TEST_LABEL).count(), 2);
}

#[tokio::test]
async fn dropping_picker_unregisters_radio_handler() {
    let h = harness(Vec::new(), RadioState::PoweredOff, Faults::default(), None);
    assert_eq!(h.radio.subscriber_count(), 1);
    drop(h.picker);
    assert_eq!(h.radio.subscriber_count(), 0);
    // Publishing with nobody listening is fine.
    h.radio.publish(RadioState::PoweredOn);
    assert_eq!(h.radio.state(), RadioState::PoweredOn);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn selection_returns_before_connection_completes() {
    let (release, gate) = mpsc::channel();
    let wire = Arc::new(Wire::default());
    let parts = PickerParts {
        accessories: Arc::new(StaticAccessories::new(vec![zebra()])),
        radio: Arc::new(RadioHub::new(RadioState::PoweredOn)),
        connections: Arc::new(GatedConnections {
            wire: wire.clone(),
            release: Mutex::new(gate),
        }),
        printers: Arc::new(CountingPrinters::new(Some(ControlLanguage::Zpl))),
    };
    let picker = PrinterPicker::new(parts, PickerConfig::default(), Handle::current());

    let started = Instant::now();
    let task = picker.on_accessory_selected(0).unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!task.is_finished());
    assert!(wire.writes.lock().unwrap().is_empty());

    release.send(()).unwrap();
    let report = task.await.unwrap().unwrap();

    assert!(report.is_complete());
    assert_eq!(
        *wire.writes.lock().unwrap(),
        vec![SETUP.to_vec(), TEST_LABEL.to_vec()]
    );
}
