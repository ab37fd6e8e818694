//! Per-object event handlers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::PwError;
use crate::frame::Frame;

/// Callback invoked for every event addressed to its object.
pub type Handler = Arc<dyn Fn(&Frame) -> Result<(), PwError> + Send + Sync>;

/// `object_id -> handlers`, in registration order.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<u32, Vec<Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for `object_id`. Several may coexist.
    pub fn register<F>(&self, object_id: u32, handler: F)
    where
        F: Fn(&Frame) -> Result<(), PwError> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(object_id)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Remove every handler of `object_id`; returns how many were removed.
    pub fn unregister(&self, object_id: u32) -> usize {
        self.handlers
            .write()
            .remove(&object_id)
            .map_or(0, |list| list.len())
    }

    pub fn handler_count(&self, object_id: u32) -> usize {
        self.handlers.read().get(&object_id).map_or(0, Vec::len)
    }

    /// Clone out the current handlers of `object_id` so they can run
    /// without the lock held.
    pub fn snapshot(&self, object_id: u32) -> Vec<Handler> {
        self.handlers
            .read()
            .get(&object_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        f.debug_struct("HandlerRegistry")
            .field("objects", &handlers.len())
            .field("handlers", &handlers.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}
