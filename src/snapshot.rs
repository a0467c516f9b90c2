//! Copy-on-write snapshot handle.
//!
//! Readers take one `Arc` to the current value per operation and never hold the
//! lock while they work with it. Writers build a complete replacement value and
//! publish it in a single pointer swap, so a reader always sees either the old or
//! the new value, never a mixture.

use parking_lot::RwLock;
use std::sync::Arc;

pub struct SnapshotCell<T> {
    current: RwLock<Arc<T>>,
}

impl<T> SnapshotCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
        }
    }

    /// Current snapshot. The read lock is only held for the `Arc` clone.
    pub fn load(&self) -> Arc<T> {
        Arc::clone(&self.current.read())
    }

    /// Publish a new snapshot, returning the one it replaced.
    pub fn store(&self, value: T) -> Arc<T> {
        self.replace(Arc::new(value))
    }

    pub fn replace(&self, value: Arc<T>) -> Arc<T> {
        std::mem::replace(&mut *self.current.write(), value)
    }
}

impl<T: Default> Default for SnapshotCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for SnapshotCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SnapshotCell").field(&*self.load()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_loaded_snapshot_survives_replacement() {
        let cell = SnapshotCell::new(HashMap::from([(1, "one")]));
        let before = cell.load();

        let mut next = (*before).clone();
        next.insert(2, "two");
        cell.store(next);

        assert_eq!(before.len(), 1);
        assert_eq!(cell.load().len(), 2);
    }

    #[test]
    fn test_store_returns_previous_value() {
        let cell = SnapshotCell::new(5);
        let old = cell.store(6);
        assert_eq!(*old, 5);
        assert_eq!(*cell.load(), 6);
    }
}
