use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::value::ValueHandle;

/// A named-event callback. Cloned out of the registry before invocation, so
/// the callback itself may register, remove, or trigger events freely.
pub type EventCallback = Arc<dyn Fn(&[ValueHandle]) + Send + Sync>;

#[derive(Default)]
pub(crate) struct EventDispatcher {
    callbacks: Mutex<HashMap<String, EventCallback>>,
}

impl EventDispatcher {
    /// Insert-or-replace; `None` behaves like removal, matching the original
    /// empty-callback convention.
    pub(crate) fn set(&self, name: &str, callback: Option<EventCallback>) {
        match callback {
            Some(callback) => {
                self.callbacks.lock().insert(name.to_string(), callback);
            }
            None => self.remove(name),
        }
    }

    pub(crate) fn remove(&self, name: &str) {
        self.callbacks.lock().remove(name);
    }

    /// Delivers to whichever callback is registered at trigger time. The
    /// handle is copied out under the mutex and invoked after releasing it;
    /// user code never runs under the registry lock.
    pub(crate) fn trigger(&self, name: &str, args: &[ValueHandle]) {
        let callback = { self.callbacks.lock().get(name).cloned() };
        if let Some(callback) = callback {
            callback(args);
        }
    }
}
