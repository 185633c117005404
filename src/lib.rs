//! Zebra tester library: pick a connected label printer and send it a ZPL test label.
//!
//! Main modules:
//! - accessory: connected accessory records and providers
//! - radio: Bluetooth radio state and subscriptions
//! - printer: connection, printer and factory traits
//! - protocol: ZPL command building
//! - picker: the accessory list and connect-and-print pipeline
//! - ble: btleplug backend for all of the above

pub mod accessory;
pub mod ble;
pub mod config;
pub mod error;
pub mod picker;
pub mod printer;
pub mod protocol;
pub mod radio;

/// Accessory snapshot API
pub use accessory::{AccessoryProvider, AccessoryRecord, StaticAccessories};
/// BLE API: adapter, event pump and connections
pub use ble::{first_adapter, BleBackend};
pub use config::PickerConfig;
pub use error::{PrintResult, TesterError};
/// Picker API
pub use picker::{connect_and_print, PickerParts, PrintReport, PrinterPicker};
pub use printer::*;
/// ZPL utilities
pub use protocol::{ControlLanguage, LabelGeometry, TestLabel, ZplBuilder};
pub use radio::{RadioHandler, RadioHub, RadioManager, RadioState, Subscription};
