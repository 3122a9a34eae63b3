//! Typed per-session scratch space.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use parking_lot::Mutex;

/// Handler-to-handler context keyed by value type.
///
/// Each type stores at most one value. Handlers define their own small
/// marker types instead of sharing string keys.
#[derive(Default)]
pub struct SessionContext {
    values: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl SessionContext {
    /// Stores `value`, replacing any previous value of the same type.
    pub fn set<T: Any + Send + Sync>(&self, value: T) {
        self.values.lock().insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Returns a copy of the stored value of type `T`.
    pub fn get<T: Any + Send + Sync + Clone>(&self) -> Option<T> {
        self.values
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Removes and returns the stored value of type `T`.
    pub fn clear<T: Any + Send + Sync>(&self) -> Option<T> {
        self.values
            .lock()
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}
