use crate::protocol::{ControlLanguage, LabelGeometry, TestLabel};

/// Default accessory model prefix the picker will print to.
pub const DEFAULT_MODEL_PREFIX: &str = "ZQ630";

/// Default BLE write chunk (bytes), sized for the minimum ATT MTU.
pub const DEFAULT_CHUNK_SIZE: usize = 20;

/// Settings for [`PrinterPicker`](crate::PrinterPicker) and the BLE backend.
///
/// `Default` reproduces the fixed behavior: `ZQ630` printers only, a
/// 408-dot label with a 16-dot top offset, then a `TEST` label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickerConfig {
    pub model_prefix: String,
    pub geometry: LabelGeometry,
    pub test_label: TestLabel,
    /// Language the bundled printer factory reports.
    pub language: ControlLanguage,
    pub chunk_size: usize,
}

impl Default for PickerConfig {
    fn default() -> Self {
        Self {
            model_prefix: DEFAULT_MODEL_PREFIX.to_string(),
            geometry: LabelGeometry::default(),
            test_label: TestLabel::default(),
            language: ControlLanguage::Zpl,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl PickerConfig {
    pub fn with_model_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.model_prefix = prefix.into();
        self
    }

    pub fn with_language(mut self, language: ControlLanguage) -> Self {
        self.language = language;
        self
    }

    /// Zero is clamped to one byte per write.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn accepts_model(&self, model_number: &str) -> bool {
        model_number.starts_with(&self.model_prefix)
    }
}
