use std::fmt;
use std::sync::{PoisonError, RwLock};

/// A connected accessory as the platform reports it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessoryRecord {
    pub name: String,
    pub model_number: String,
    pub serial_number: String,
}

impl AccessoryRecord {
    pub fn new(
        name: impl Into<String>,
        model_number: impl Into<String>,
        serial_number: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            model_number: model_number.into(),
            serial_number: serial_number.into(),
        }
    }
}

/// Row label: `name model serial`.
impl fmt::Display for AccessoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.name, self.model_number, self.serial_number
        )
    }
}

/// Source of the currently connected accessories.
///
/// Implement this for your platform accessory framework or a fake.
pub trait AccessoryProvider: Send + Sync {
    /// Accessories attached right now. Empty is a valid answer.
    fn connected_accessories(&self) -> Vec<AccessoryRecord>;
}

/// Provider backed by a list the caller controls.
#[derive(Debug, Default)]
pub struct StaticAccessories {
    accessories: RwLock<Vec<AccessoryRecord>>,
}

impl StaticAccessories {
    pub fn new(accessories: Vec<AccessoryRecord>) -> Self {
        Self {
            accessories: RwLock::new(accessories),
        }
    }

    /// Simulates accessories attaching or detaching.
    pub fn replace(&self, accessories: Vec<AccessoryRecord>) {
        *self
            .accessories
            .write()
            .unwrap_or_else(PoisonError::into_inner) = accessories;
    }
}

impl AccessoryProvider for StaticAccessories {
    fn connected_accessories(&self) -> Vec<AccessoryRecord> {
        self.accessories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
