use tracing::{debug, info, warn};

use crate::error::{PrintResult, TesterError};
use crate::protocol::ControlLanguage;

/// Transport session with a printer (blocking).
/// Implement this for your BLE, serial or mock transport.
pub trait Connection: Send {
    /// Open the session. Must succeed before any write.
    fn open(&mut self) -> PrintResult<()>;
    /// Write raw bytes, returning how many were accepted.
    fn write(&mut self, data: &[u8]) -> PrintResult<usize>;
    /// Whether `open` has succeeded and `close` has not been called since.
    fn is_open(&self) -> bool;
    /// Close the session. Closing twice is a no-op.
    fn close(&mut self);
}

/// Builds connections keyed by accessory serial number.
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self, serial_number: &str) -> PrintResult<Box<dyn Connection>>;
}

/// A printer instance obtained from a [`PrinterFactory`].
pub trait ZebraPrinter: Send {
    fn control_language(&self) -> ControlLanguage;
}

/// Produces a printer instance for an opened connection.
pub trait PrinterFactory: Send + Sync {
    fn printer_instance(&self, connection: &mut dyn Connection)
    -> PrintResult<Box<dyn ZebraPrinter>>;
}

/// Printer that reports a fixed control language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedLanguagePrinter(pub ControlLanguage);

impl ZebraPrinter for FixedLanguagePrinter {
    fn control_language(&self) -> ControlLanguage {
        self.0
    }
}

/// Factory that trusts a configured language instead of probing the device.
///
/// - `language`: what every printer instance reports (default: ZPL)
#[derive(Debug, Clone, Copy)]
pub struct FixedLanguageFactory {
    pub language: ControlLanguage,
}

impl FixedLanguageFactory {
    pub fn new(language: ControlLanguage) -> Self {
        Self { language }
    }
}

impl Default for FixedLanguageFactory {
    fn default() -> Self {
        Self::new(ControlLanguage::Zpl)
    }
}

impl PrinterFactory for FixedLanguageFactory {
    fn printer_instance(
        &self,
        connection: &mut dyn Connection,
    ) -> PrintResult<Box<dyn ZebraPrinter>> {
        if !connection.is_open() {
            return Err(TesterError::PrinterFactory("connection is not open".into()));
        }
        Ok(Box::new(FixedLanguagePrinter(self.language)))
    }
}

/// Send a string to the printer as UTF-8 in a single write.
///
/// - `connection`: opened connection
/// - `payload`: command text
///
/// Failures are logged and reported as `false`, never retried.
pub fn send_str(connection: &mut dyn Connection, payload: &str) -> bool {
    let data = payload.as_bytes();
    debug!(payload, len = data.len(), "sending to printer");
    match connection.write(data) {
        Ok(n) if n == data.len() => {
            info!(bytes = n, "data sent to printer");
            true
        }
        Ok(n) => {
            warn!(sent = n, expected = data.len(), "short write to printer");
            false
        }
        Err(e) => {
            warn!(error = %e, "failed to send data to printer");
            false
        }
    }
}
