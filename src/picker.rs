//! Printer picker: accessory list, radio reaction and the connect-and-print
//! pipeline.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::accessory::{AccessoryProvider, AccessoryRecord};
use crate::config::PickerConfig;
use crate::error::{PrintResult, TesterError};
use crate::printer::{send_str, Connection, ConnectionFactory, PrinterFactory};
use crate::protocol::ControlLanguage;
use crate::radio::{RadioManager, RadioState, Subscription};

/// Collaborators the picker is built from.
#[derive(Clone)]
pub struct PickerParts {
    pub accessories: Arc<dyn AccessoryProvider>,
    pub radio: Arc<dyn RadioManager>,
    pub connections: Arc<dyn ConnectionFactory>,
    pub printers: Arc<dyn PrinterFactory>,
}

/// What a finished connect-and-print run delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrintReport {
    pub payloads: usize,
    pub delivered: usize,
}

impl PrintReport {
    pub fn is_complete(&self) -> bool {
        self.payloads == self.delivered
    }
}

/// Lists connected accessories and prints a test label on selection.
///
/// The accessory snapshot is replaced wholesale on every refresh, never
/// edited in place. Each selection runs on its own blocking task on
/// `runtime`; nothing is deduplicated or cancelled.
pub struct PrinterPicker {
    accessories: Arc<dyn AccessoryProvider>,
    radio: Arc<dyn RadioManager>,
    connections: Arc<dyn ConnectionFactory>,
    printers: Arc<dyn PrinterFactory>,
    config: Arc<PickerConfig>,
    runtime: Handle,
    snapshot: RwLock<Arc<[AccessoryRecord]>>,
    _subscription: Subscription,
}

impl PrinterPicker {
    /// Builds the picker and registers for radio state changes.
    ///
    /// The current radio state is handled right away, so a radio that is
    /// already powered on yields an initial snapshot.
    pub fn new(parts: PickerParts, config: PickerConfig, runtime: Handle) -> Arc<Self> {
        let picker = Arc::new_cyclic(|weak| {
            let weak: std::sync::Weak<Self> = weak.clone();
            let subscription = parts.radio.subscribe(Arc::new(move |state| {
                if let Some(picker) = weak.upgrade() {
                    picker.on_radio_state_changed(state);
                }
            }));
            Self {
                accessories: parts.accessories,
                radio: parts.radio,
                connections: parts.connections,
                printers: parts.printers,
                config: Arc::new(config),
                runtime,
                snapshot: RwLock::new(Arc::from(Vec::new())),
                _subscription: subscription,
            }
        });
        info!("picker created, waiting for radio state");
        picker.on_radio_state_changed(picker.radio.state());
        picker
    }

    pub fn config(&self) -> &PickerConfig {
        &self.config
    }

    pub fn radio_state(&self) -> RadioState {
        self.radio.state()
    }

    /// Refreshes the snapshot when the radio powers on; logs otherwise.
    pub fn on_radio_state_changed(&self, state: RadioState) {
        match state {
            RadioState::PoweredOn => {
                info!("Bluetooth is powered on");
                self.update_connected_accessories();
            }
            RadioState::PoweredOff => info!("Bluetooth is powered off, ask the user to enable it"),
            RadioState::Resetting => info!("Bluetooth is resetting"),
            RadioState::Unauthorized => warn!("app is not authorized to use Bluetooth"),
            RadioState::Unsupported => warn!("device does not support Bluetooth"),
            RadioState::Unknown => info!("Bluetooth state unknown"),
        }
    }

    /// Re-fetches the accessory list and returns the rendered rows.
    pub fn on_refresh_requested(&self) -> Vec<String> {
        info!("refresh requested");
        self.update_connected_accessories();
        self.rows()
    }

    /// Dispatches [`connect_and_print`] for row `index` and returns at once.
    ///
    /// Returns `None` when `index` is past the current snapshot.
    pub fn on_accessory_selected(&self, index: usize) -> Option<JoinHandle<PrintResult<PrintReport>>> {
        info!(index, "printer selected");
        let Some(accessory) = self.snapshot().get(index).cloned() else {
            warn!(index, rows = self.row_count(), "selected row is out of range");
            return None;
        };

        let connections = self.connections.clone();
        let printers = self.printers.clone();
        let config = self.config.clone();
        Some(self.runtime.spawn_blocking(move || {
            let result = connect_and_print(&accessory, connections.as_ref(), printers.as_ref(), &config);
            debug!(ok = result.is_ok(), "connect-and-print finished");
            result
        }))
    }

    /// Current snapshot; cheap to clone, never mutated after publication.
    pub fn snapshot(&self) -> Arc<[AccessoryRecord]> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn row_count(&self) -> usize {
        self.snapshot().len()
    }

    /// One `name model serial` label per accessory.
    pub fn rows(&self) -> Vec<String> {
        self.snapshot().iter().map(ToString::to_string).collect()
    }

    fn update_connected_accessories(&self) {
        let accessories = self.accessories.connected_accessories();
        if accessories.is_empty() {
            info!("no connected printers found");
        } else {
            for accessory in &accessories {
                info!(
                    name = %accessory.name,
                    model = %accessory.model_number,
                    serial = %accessory.serial_number,
                    "accessory found"
                );
            }
        }
        let fresh: Arc<[AccessoryRecord]> = accessories.into();
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = fresh;
    }
}

/// Opens a connection to `accessory` and sends the label setup and the
/// test label when it speaks ZPL.
///
/// Blocking. Every failure is logged here and returned; write failures
/// are logged and counted but do not stop the second write.
#[instrument(
    skip(accessory, connections, printers, config),
    fields(name = %accessory.name, model = %accessory.model_number, serial = %accessory.serial_number)
)]
pub fn connect_and_print(
    accessory: &AccessoryRecord,
    connections: &dyn ConnectionFactory,
    printers: &dyn PrinterFactory,
    config: &PickerConfig,
) -> PrintResult<PrintReport> {
    info!("attempting to connect to printer");

    if !config.accepts_model(&accessory.model_number) {
        info!(prefix = %config.model_prefix, "selected accessory is not a supported printer");
        return Err(TesterError::ModelMismatch {
            model: accessory.model_number.clone(),
            prefix: config.model_prefix.clone(),
        });
    }

    let mut connection = connections
        .connect(&accessory.serial_number)
        .inspect_err(|e| warn!(error = %e, "failed to create printer connection"))?;

    connection
        .open()
        .inspect_err(|e| warn!(error = %e, "failed to open printer connection"))?;
    info!("connected to printer");

    let result = print_test_label(connection.as_mut(), printers, config);
    connection.close();
    result
}

fn print_test_label(
    connection: &mut dyn Connection,
    printers: &dyn PrinterFactory,
    config: &PickerConfig,
) -> PrintResult<PrintReport> {
    let printer = printers
        .printer_instance(connection)
        .inspect_err(|e| warn!(error = %e, "failed to get printer instance"))?;

    let language = printer.control_language();
    info!(%language, "printer control language");
    if language != ControlLanguage::Zpl {
        warn!(%language, "connected, but the printer does not use ZPL");
        return Err(TesterError::UnsupportedLanguage(language));
    }

    let payloads = [
        config.geometry.to_zpl(),
        config
            .test_label
            .to_zpl()
            .inspect_err(|e| warn!(error = %e, "test label is not valid ZPL"))?,
    ];
    info!("ZPL printer, sending label setup and test label");
    let delivered = payloads
        .iter()
        .filter(|payload| send_str(connection, payload))
        .count();

    Ok(PrintReport {
        payloads: payloads.len(),
        delivered,
    })
}
