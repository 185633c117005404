//! BLE backend over `btleplug`.
//!
//! Stands in for the platform accessory and radio frameworks:
//! - adapter state changes are published into a [`RadioHub`]
//! - connected peripherals are described through the Device Information
//!   service and cached as [`AccessoryRecord`]s
//! - connections write to the Zebra parser data characteristic
//!
//! [`BleConnection`] blocks on the tokio runtime, so only use it from a
//! blocking task (the picker's background tasks are).

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accessory::{AccessoryProvider, AccessoryRecord};
use crate::config::PickerConfig;
use crate::error::{PrintResult, TesterError};
use crate::picker::PickerParts;
use crate::printer::{Connection, ConnectionFactory, FixedLanguageFactory};
use crate::radio::{RadioHub, RadioState};

/// Zebra Parser Data service.
pub const ZEBRA_PARSER_SERVICE: Uuid = Uuid::from_u128(0x38eb4a80_c570_11e3_9507_0002a5d5c51b);
/// Host-to-printer characteristic of the parser data service.
pub const ZEBRA_WRITE_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x38eb4a82_c570_11e3_9507_0002a5d5c51b);
/// Device Information: Model Number String.
pub const MODEL_NUMBER_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x00002a24_0000_1000_8000_00805f9b34fb);
/// Device Information: Serial Number String.
pub const SERIAL_NUMBER_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x00002a25_0000_1000_8000_00805f9b34fb);

/// First Bluetooth adapter on this host.
pub async fn first_adapter() -> PrintResult<Adapter> {
    let manager = Manager::new().await?;
    manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or(TesterError::RadioUnavailable(RadioState::Unsupported))
}

pub fn radio_state_from(state: CentralState) -> RadioState {
    match state {
        CentralState::PoweredOn => RadioState::PoweredOn,
        CentralState::PoweredOff => RadioState::PoweredOff,
        _ => RadioState::Unknown,
    }
}

struct Entry<K, P> {
    id: K,
    record: AccessoryRecord,
    handle: P,
}

/// Described accessories keyed by peripheral id, kept in connection order.
///
/// `P` is the handle a connection is later opened on.
pub struct AccessoryCache<K, P> {
    entries: RwLock<Vec<Entry<K, P>>>,
}

impl<K, P> Default for AccessoryCache<K, P> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl<K: PartialEq, P: Clone> AccessoryCache<K, P> {
    /// Adds or replaces the entry for `id`.
    pub fn insert(&self, id: K, record: AccessoryRecord, handle: P) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|e| e.id != id);
        entries.push(Entry { id, record, handle });
    }

    pub fn forget(&self, id: &K) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|e| &e.id != id);
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Drops every entry unless the radio is powered on.
    ///
    /// Returns whether the caller should re-list connected peripherals.
    /// Adapters do not always report disconnects when they power down.
    pub fn on_radio_state(&self, state: RadioState) -> bool {
        if state == RadioState::PoweredOn {
            return true;
        }
        self.clear();
        false
    }

    pub fn handle_for_serial(&self, serial_number: &str) -> Option<P> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|e| e.record.serial_number == serial_number)
            .map(|e| e.handle.clone())
    }

    fn replace(&self, entries: Vec<Entry<K, P>>) {
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = entries;
    }
}

impl<K: Send + Sync, P: Send + Sync> AccessoryProvider for AccessoryCache<K, P> {
    fn connected_accessories(&self) -> Vec<AccessoryRecord> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.record.clone())
            .collect()
    }
}

/// Connected BLE peripherals.
pub type BleAccessories = AccessoryCache<PeripheralId, Peripheral>;

impl AccessoryCache<PeripheralId, Peripheral> {
    /// Rebuilds the cache from the adapter's currently connected peripherals.
    pub async fn sync_connected(&self, adapter: &Adapter) -> PrintResult<()> {
        let mut fresh = Vec::new();
        for peripheral in adapter.peripherals().await? {
            if !peripheral.is_connected().await.unwrap_or(false) {
                continue;
            }
            match describe(&peripheral).await {
                Ok(record) => fresh.push(Entry {
                    id: peripheral.id(),
                    record,
                    handle: peripheral,
                }),
                Err(e) => warn!(error = %e, "could not describe connected peripheral"),
            }
        }
        self.replace(fresh);
        Ok(())
    }

    async fn track(&self, adapter: &Adapter, id: PeripheralId) -> PrintResult<()> {
        let peripheral = adapter.peripheral(&id).await?;
        let record = describe(&peripheral).await?;
        debug!(accessory = %record, "accessory attached");
        self.insert(id, record, peripheral);
        Ok(())
    }
}

/// Reads name, model number and serial number of a connected peripheral.
///
/// Missing Device Information falls back to an empty model and the
/// Bluetooth address as serial.
async fn describe(peripheral: &Peripheral) -> PrintResult<AccessoryRecord> {
    let name = peripheral
        .properties()
        .await?
        .and_then(|p| p.local_name)
        .unwrap_or_default();
    if peripheral.characteristics().is_empty() {
        peripheral.discover_services().await?;
    }
    let characteristics = peripheral.characteristics();
    let model_number = read_string(peripheral, &characteristics, MODEL_NUMBER_CHARACTERISTIC)
        .await
        .unwrap_or_default();
    let serial_number = read_string(peripheral, &characteristics, SERIAL_NUMBER_CHARACTERISTIC)
        .await
        .unwrap_or_else(|| peripheral.address().to_string());
    Ok(AccessoryRecord {
        name,
        model_number,
        serial_number,
    })
}

async fn read_string(
    peripheral: &Peripheral,
    characteristics: &BTreeSet<Characteristic>,
    uuid: Uuid,
) -> Option<String> {
    let characteristic = characteristics.iter().find(|c| c.uuid == uuid)?;
    match peripheral.read(characteristic).await {
        Ok(raw) => Some(decode_info_string(&raw)),
        Err(e) => {
            warn!(%uuid, error = %e, "failed to read device information");
            None
        }
    }
}

/// Device Information strings are UTF-8, often NUL padded.
fn decode_info_string(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches('\0')
        .trim()
        .to_string()
}

/// Adapter event pump feeding a [`RadioHub`] and a [`BleAccessories`] cache.
///
/// The pump stops when the backend is dropped.
pub struct BleBackend {
    radio: Arc<RadioHub>,
    accessories: Arc<BleAccessories>,
    pump: JoinHandle<()>,
}

impl BleBackend {
    pub async fn start(adapter: Adapter) -> PrintResult<Self> {
        let initial = match adapter.adapter_state().await {
            Ok(state) => radio_state_from(state),
            Err(e) => {
                warn!(error = %e, "could not read adapter state");
                RadioState::Unknown
            }
        };
        info!(state = %initial, "Bluetooth adapter ready");

        let radio = Arc::new(RadioHub::new(initial));
        let accessories = Arc::new(BleAccessories::default());
        if initial == RadioState::PoweredOn {
            accessories.sync_connected(&adapter).await?;
        }

        let mut events = adapter.events().await?;
        let pump = tokio::spawn({
            let adapter = adapter.clone();
            let radio = radio.clone();
            let accessories = accessories.clone();
            async move {
                while let Some(event) = events.next().await {
                    match event {
                        CentralEvent::StateUpdate(state) => {
                            let state = radio_state_from(state);
                            if accessories.on_radio_state(state) {
                                if let Err(e) = accessories.sync_connected(&adapter).await {
                                    warn!(error = %e, "failed to list connected peripherals");
                                }
                            }
                            radio.publish(state);
                        }
                        CentralEvent::DeviceConnected(id) => {
                            if let Err(e) = accessories.track(&adapter, id).await {
                                warn!(error = %e, "failed to describe attached peripheral");
                            }
                        }
                        CentralEvent::DeviceDisconnected(id) => accessories.forget(&id),
                        _ => {}
                    }
                }
                debug!("adapter event stream ended");
            }
        });

        Ok(Self {
            radio,
            accessories,
            pump,
        })
    }

    /// Collaborators for a [`PrinterPicker`](crate::PrinterPicker) backed by
    /// this adapter.
    pub fn picker_parts(&self, config: &PickerConfig, runtime: Handle) -> PickerParts {
        PickerParts {
            accessories: self.accessories.clone(),
            radio: self.radio.clone(),
            connections: Arc::new(BleConnectionFactory {
                accessories: self.accessories.clone(),
                runtime,
                chunk_size: config.chunk_size,
            }),
            printers: Arc::new(FixedLanguageFactory::new(config.language)),
        }
    }
}

impl Drop for BleBackend {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Resolves accessory serials to cached peripherals.
pub struct BleConnectionFactory {
    accessories: Arc<BleAccessories>,
    runtime: Handle,
    chunk_size: usize,
}

impl ConnectionFactory for BleConnectionFactory {
    fn connect(&self, serial_number: &str) -> PrintResult<Box<dyn Connection>> {
        let peripheral = self
            .accessories
            .handle_for_serial(serial_number)
            .ok_or_else(|| {
                TesterError::ConnectionConstruction(format!(
                    "no connected accessory with serial {}",
                    serial_number
                ))
            })?;
        Ok(Box::new(BleConnection {
            peripheral,
            runtime: self.runtime.clone(),
            chunk_size: self.chunk_size.max(1),
            write_characteristic: None,
        }))
    }
}

/// Blocking session writing to the Zebra parser data characteristic.
///
/// - `chunk_size`: bytes per GATT write
pub struct BleConnection {
    peripheral: Peripheral,
    runtime: Handle,
    chunk_size: usize,
    write_characteristic: Option<Characteristic>,
}

impl Connection for BleConnection {
    fn open(&mut self) -> PrintResult<()> {
        let peripheral = self.peripheral.clone();
        let characteristic = self
            .runtime
            .block_on(async move {
                if !peripheral.is_connected().await? {
                    peripheral.connect().await?;
                }
                peripheral.discover_services().await?;
                Ok::<_, btleplug::Error>(
                    peripheral
                        .characteristics()
                        .into_iter()
                        .find(|c| c.uuid == ZEBRA_WRITE_CHARACTERISTIC),
                )
            })
            .map_err(|e| TesterError::ConnectionOpen(e.to_string()))?
            .ok_or_else(|| {
                TesterError::ConnectionOpen("printer has no Zebra parser data service".into())
            })?;
        self.write_characteristic = Some(characteristic);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> PrintResult<usize> {
        let characteristic = self
            .write_characteristic
            .as_ref()
            .ok_or_else(|| TesterError::Write("connection is not open".into()))?;
        let mut sent = 0;
        for chunk in data.chunks(self.chunk_size) {
            self.runtime
                .block_on(
                    self.peripheral
                        .write(characteristic, chunk, WriteType::WithResponse),
                )
                .map_err(|e| TesterError::Write(format!("after {} bytes: {}", sent, e)))?;
            sent += chunk.len();
        }
        Ok(sent)
    }

    fn is_open(&self) -> bool {
        self.write_characteristic.is_some()
    }

    /// Ends the session; the peripheral itself stays connected.
    fn close(&mut self) {
        self.write_characteristic = None;
    }
}
