// Registries of live objects
//
// Registries hold weak references only, so they never keep an object alive.
// They exist for last-resort sweeps (force-disposing every content manager,
// resizing every viewport), not for general lookup.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Ordered list of live objects with explicit register/deregister
pub struct Registry<T> {
    entries: RefCell<Vec<Weak<T>>>,
}

impl<T> Registry<T> {
    /// Create an empty registry
    pub const fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
        }
    }

    /// Register an object. Registering twice keeps a single entry.
    pub fn register(&self, item: &Rc<T>) {
        let ptr = Rc::as_ptr(item);
        let mut entries = self.entries.borrow_mut();
        // A dead entry may share its address with `item`
        entries.retain(|entry| entry.strong_count() > 0);
        if !entries.iter().any(|entry| entry.as_ptr() == ptr) {
            entries.push(Rc::downgrade(item));
        }
    }

    /// Remove an object; returns `false` if it was not registered
    pub fn deregister(&self, item: &Rc<T>) -> bool {
        self.deregister_ptr(Rc::as_ptr(item))
    }

    /// Remove an object by address (usable while the object is being dropped)
    pub fn deregister_ptr(&self, ptr: *const T) -> bool {
        let mut entries = self.entries.borrow_mut();
        let Some(index) = entries.iter().position(|entry| entry.as_ptr() == ptr) else {
            return false;
        };
        entries.remove(index);
        true
    }

    /// Snapshot of every live object, in registration order
    pub fn live(&self) -> Vec<Rc<T>> {
        let mut entries = self.entries.borrow_mut();
        entries.retain(|entry| entry.strong_count() > 0);
        entries.iter().filter_map(Weak::upgrade).collect()
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }

    /// Check whether no live objects are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_deregister() {
        let registry = Registry::new();
        let a = Rc::new(1);
        let b = Rc::new(2);

        registry.register(&a);
        registry.register(&b);
        assert_eq!(registry.len(), 2);

        assert!(registry.deregister(&a));
        assert_eq!(registry.len(), 1);
        assert_eq!(*registry.live()[0], 2);
    }

    #[test]
    fn test_deregister_is_idempotent() {
        let registry = Registry::new();
        let a = Rc::new("manager");

        registry.register(&a);
        assert!(registry.deregister(&a));
        assert!(!registry.deregister(&a));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_double_register_keeps_one_entry() {
        let registry = Registry::new();
        let a = Rc::new(5);

        registry.register(&a);
        registry.register(&a);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_dropped_objects_disappear() {
        let registry = Registry::new();
        let a = Rc::new(1);
        {
            let b = Rc::new(2);
            registry.register(&b);
        }
        registry.register(&a);

        let live = registry.live();
        assert_eq!(live.len(), 1);
        assert_eq!(*live[0], 1);
    }

    #[test]
    fn test_register_prunes_dropped_entries() {
        let registry = Registry::new();
        for i in 0..1000 {
            let item = Rc::new(i);
            registry.register(&item);
        }
        let kept = Rc::new(-1);
        registry.register(&kept);

        assert_eq!(registry.entries.borrow().len(), 1);
        assert_eq!(registry.len(), 1);
    }
}
