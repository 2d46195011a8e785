//! Single-value caches.
//!
//! A coordinator keeps its decoded value in a [`ValueCache`]. Which cache is
//! used decides how long the value stays in memory; the coordinator itself
//! does not care.
//!
//! - [`SlotCache`] keeps the value until it is replaced.
//! - [`WeakCache`] keeps an `Arc` value only while a client still holds it;
//!   the next read after the last client handle is gone reloads from disk.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Pluggable slot holding at most one value.
pub trait ValueCache<T>: Send + Sync {
    fn retrieve(&self) -> Option<T>;

    fn store(&self, value: Option<T>);
}

/// Strong single-value slot.
#[derive(Debug)]
pub struct SlotCache<T> {
    slot: Mutex<Option<T>>,
}

impl<T> SlotCache<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<T> Default for SlotCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send> ValueCache<T> for SlotCache<T> {
    fn retrieve(&self) -> Option<T> {
        self.slot.lock().clone()
    }

    fn store(&self, value: Option<T>) {
        *self.slot.lock() = value;
    }
}

/// Weak slot for shared values.
#[derive(Debug)]
pub struct WeakCache<U: ?Sized> {
    slot: Mutex<Weak<U>>,
}

impl<U> WeakCache<U> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Weak::new()),
        }
    }
}

impl<U> Default for WeakCache<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U: Send + Sync> ValueCache<Arc<U>> for WeakCache<U> {
    fn retrieve(&self) -> Option<Arc<U>> {
        self.slot.lock().upgrade()
    }

    fn store(&self, value: Option<Arc<U>>) {
        *self.slot.lock() = value.as_ref().map(Arc::downgrade).unwrap_or_default();
    }
}
