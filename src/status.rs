//! Single-writer status snapshots.
//!
//! A device's reader thread is the only writer of its [`StatusCell`]. Readers
//! take cheap `Arc` snapshots or block until a snapshot satisfies a condition.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub struct StatusCell<T> {
    slot: Mutex<Arc<T>>,
    changed: Condvar,
}

impl<T> StatusCell<T> {
    pub fn new(value: T) -> Self {
        StatusCell {
            slot: Mutex::new(Arc::new(value)),
            changed: Condvar::new(),
        }
    }

    /// Replace the snapshot and wake all waiters.
    pub fn publish(&self, value: T) {
        let mut slot = self.slot.lock();
        *slot = Arc::new(value);
        self.changed.notify_all();
    }

    /// Publish a value derived from the current snapshot.
    pub fn modify(&self, f: impl FnOnce(&T) -> T) {
        let mut slot = self.slot.lock();
        let next = Arc::new(f(&slot));
        *slot = next;
        self.changed.notify_all();
    }

    pub fn snapshot(&self) -> Arc<T> {
        self.slot.lock().clone()
    }

    /// Block until `ready` holds for the current snapshot, at most `timeout`.
    ///
    /// Returns `None` if the timeout elapsed first.
    pub fn wait_for(&self, timeout: Duration, mut ready: impl FnMut(&T) -> bool) -> Option<Arc<T>> {
        let mut slot = self.slot.lock();
        self.changed
            .wait_while_for(&mut slot, |slot| !ready(&**slot), timeout);

        if ready(&**slot) {
            Some(slot.clone())
        } else {
            None
        }
    }
}
