//! Lightweight callback registry used by service singletons.
//!
//! Services hand out a `CallbackId` on registration; widgets keep the id and
//! unregister in their teardown paths. All access happens on the GTK main
//! thread, so plain `RefCell` interior mutability is enough.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Opaque handle identifying one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// A registry of `Fn(&T)` callbacks keyed by id.
pub struct Callbacks<T> {
    entries: RefCell<HashMap<u64, Rc<dyn Fn(&T)>>>,
    next_id: RefCell<u64>,
}

impl<T> Callbacks<T> {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
            next_id: RefCell::new(1),
        }
    }

    /// Register a callback, returning its id.
    pub fn register<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&T) + 'static,
    {
        let mut next = self.next_id.borrow_mut();
        let id = *next;
        *next += 1;
        self.entries.borrow_mut().insert(id, Rc::new(callback));
        CallbackId(id)
    }

    /// Unregister a callback. Returns false if the id was unknown.
    pub fn unregister(&self, id: CallbackId) -> bool {
        self.entries.borrow_mut().remove(&id.0).is_some()
    }

    /// Invoke every registered callback with `value`.
    ///
    /// Callbacks are snapshotted before invocation so a callback may
    /// register or unregister others without deadlocking the registry.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Rc<dyn Fn(&T)>> = self.entries.borrow().values().cloned().collect();
        for callback in snapshot {
            callback(value);
        }
    }

    /// Invoke a single callback by id, if it is still registered.
    pub fn notify_single(&self, id: CallbackId, value: &T) {
        let callback = self.entries.borrow().get(&id.0).cloned();
        if let Some(callback) = callback {
            callback(value);
        }
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_register_notify_unregister() {
        let callbacks: Callbacks<i32> = Callbacks::new();
        let hits = Rc::new(Cell::new(0));

        let hits_cb = hits.clone();
        let id = callbacks.register(move |v| hits_cb.set(hits_cb.get() + *v));

        callbacks.notify(&2);
        assert_eq!(hits.get(), 2);

        callbacks.notify_single(id, &3);
        assert_eq!(hits.get(), 5);

        assert!(callbacks.unregister(id));
        assert!(!callbacks.unregister(id));

        callbacks.notify(&10);
        assert_eq!(hits.get(), 5);
    }

    #[test]
    fn test_unregister_during_notify() {
        let callbacks: Rc<Callbacks<()>> = Rc::new(Callbacks::new());
        let hits = Rc::new(Cell::new(0));

        let id_cell: Rc<Cell<Option<CallbackId>>> = Rc::new(Cell::new(None));

        let callbacks_inner = callbacks.clone();
        let id_cell_inner = id_cell.clone();
        let hits_inner = hits.clone();
        let id = callbacks.register(move |_| {
            hits_inner.set(hits_inner.get() + 1);
            // Remove ourselves mid-notification
            if let Some(id) = id_cell_inner.take() {
                callbacks_inner.unregister(id);
            }
        });
        id_cell.set(Some(id));

        callbacks.notify(&());
        callbacks.notify(&());
        assert_eq!(hits.get(), 1);
    }
}
