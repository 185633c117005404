use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::debug;

/// Power state of the Bluetooth radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RadioState {
    PoweredOn,
    PoweredOff,
    Resetting,
    Unauthorized,
    Unsupported,
    #[default]
    Unknown,
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RadioState::PoweredOn => "powered on",
            RadioState::PoweredOff => "powered off",
            RadioState::Resetting => "resetting",
            RadioState::Unauthorized => "unauthorized",
            RadioState::Unsupported => "unsupported",
            RadioState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Callback invoked on every radio state change.
pub type RadioHandler = Arc<dyn Fn(RadioState) + Send + Sync>;

/// Registration handle returned by [`RadioManager::subscribe`].
///
/// The handler stays registered until this is dropped or
/// [`Subscription::unsubscribe`] is called.
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    unregister: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(unregister: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unregister: Some(Box::new(unregister)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(f) = self.unregister.take() {
            f();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.unregister.take() {
            f();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unregister.is_some())
            .finish()
    }
}

/// Source of radio state changes.
pub trait RadioManager: Send + Sync {
    /// Last known state.
    fn state(&self) -> RadioState;
    /// Registers `handler` for future state changes.
    fn subscribe(&self, handler: RadioHandler) -> Subscription;
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: Vec<(u64, RadioHandler)>,
}

/// In-memory [`RadioManager`] that fans published states out to handlers.
///
/// The BLE backend feeds adapter events into one of these; tests publish
/// into it directly.
#[derive(Default)]
pub struct RadioHub {
    state: Mutex<RadioState>,
    registry: Arc<Mutex<Registry>>,
}

impl RadioHub {
    pub fn new(initial: RadioState) -> Self {
        Self {
            state: Mutex::new(initial),
            registry: Arc::default(),
        }
    }

    /// Records `state` and calls every registered handler with it.
    pub fn publish(&self, state: RadioState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        // Handlers run outside the lock so they may subscribe or unsubscribe.
        let handlers: Vec<RadioHandler> = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        debug!(%state, handlers = handlers.len(), "publishing radio state");
        for handler in handlers {
            handler(state);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .len()
    }
}

impl RadioManager for RadioHub {
    fn state(&self) -> RadioState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribe(&self, handler: RadioHandler) -> Subscription {
        let id = {
            let mut reg = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            let id = reg.next_id;
            reg.next_id += 1;
            reg.handlers.push((id, handler));
            id
        };
        let registry: Weak<Mutex<Registry>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .handlers
                    .retain(|(hid, _)| *hid != id);
            }
        })
    }
}
