//! Error types for the printer tester

use thiserror::Error;

use crate::protocol::ControlLanguage;
use crate::radio::RadioState;

/// Everything that can stop a connect-and-print attempt.
///
/// None of these reach the UI: the picker logs them where they happen and
/// hands them back only through the background task's join handle.
#[derive(Debug, Error)]
pub enum TesterError {
    /// The radio is not in a state where accessories can be used
    #[error("Bluetooth radio unavailable: {0}")]
    RadioUnavailable(RadioState),

    /// Selected accessory is not the printer model we drive
    #[error("Model {model} does not start with {prefix}")]
    ModelMismatch { model: String, prefix: String },

    /// No connection could be built for the accessory serial
    #[error("Connection construction failed: {0}")]
    ConnectionConstruction(String),

    /// The connection was built but would not open
    #[error("Connection open failed: {0}")]
    ConnectionOpen(String),

    /// The printer factory could not produce a printer instance
    #[error("Printer factory failed: {0}")]
    PrinterFactory(String),

    /// The printer speaks something other than ZPL
    #[error("Unsupported control language: {0}")]
    UnsupportedLanguage(ControlLanguage),

    /// A payload write did not complete
    #[error("Write failed: {0}")]
    Write(String),

    /// Field text that would break out of a ZPL field
    #[error("Invalid field data: {0}")]
    InvalidField(String),

    /// BLE stack error
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),
}

/// Result type for printer operations
pub type PrintResult<T> = Result<T, TesterError>;
