// Groups: position a set of children together

use glam::Vec2;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::{Children, ElementBox, ParentNode, SceneError, TeardownStep};
use crate::core::{run_teardown, DisposeFlag, Disposable};

pub struct Group {
    parent: Weak<dyn ParentNode>,
    element: RefCell<ElementBox>,
    children: Children,
    disposed: DisposeFlag,
}

impl Group {
    const TEARDOWN: [TeardownStep; 3] = [
        TeardownStep::DisposeChildren,
        TeardownStep::DetachElement,
        TeardownStep::RemoveFromParent,
    ];

    /// Create an empty group at the parent's origin
    pub fn new<P: ParentNode + 'static>(parent: &Rc<P>) -> Result<Rc<Self>, SceneError> {
        if parent.is_disposed() {
            return Err(SceneError::ParentDisposed);
        }
        let parent_dyn: Rc<dyn ParentNode> = parent.clone();
        let group = Rc::new(Self {
            parent: Rc::downgrade(&parent_dyn),
            element: RefCell::new(ElementBox::attached()),
            children: Children::new(),
            disposed: DisposeFlag::new(),
        });
        parent.children().attach(group.clone());
        Ok(group)
    }

    /// Move the group relative to its parent
    pub fn set_position(&self, position: Vec2) {
        self.element.borrow_mut().position = position;
    }

    pub fn element(&self) -> ElementBox {
        *self.element.borrow()
    }
}

impl ParentNode for Group {
    fn children(&self) -> &Children {
        &self.children
    }
}

impl Disposable for Group {
    fn dispose(&self) {
        if !self.disposed.begin() {
            return;
        }
        run_teardown("Group", &Self::TEARDOWN, |step| match step {
            TeardownStep::DisposeChildren => self.children.dispose_all(),
            TeardownStep::DetachElement => self.element.borrow_mut().attached = false,
            TeardownStep::RemoveFromParent => {
                if let Some(parent) = self.parent.upgrade() {
                    parent.children().detach(self as *const Group as *const ());
                }
            }
            _ => {}
        });
    }

    fn is_disposed(&self) -> bool {
        self.disposed.is_set()
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Probe;
    use super::super::Viewport;
    use super::*;

    fn viewport() -> Rc<Viewport> {
        Viewport::new(100.0, 100.0, Vec2::new(100.0, 100.0))
    }

    #[test]
    fn test_group_attaches_to_parent() {
        let root = viewport();
        let group = Group::new(&root).unwrap();

        assert_eq!(root.children().len(), 1);
        assert!(group.element().attached);
        assert_eq!(group.element().position, Vec2::ZERO);
    }

    #[test]
    fn test_dispose_removes_from_parent() {
        let root = viewport();
        let first = Group::new(&root).unwrap();
        let _second = Group::new(&root).unwrap();

        first.dispose();

        assert_eq!(root.children().len(), 1);
        assert!(!first.element().attached);
    }

    #[test]
    fn test_disposal_is_post_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let root = viewport();
        let outer = Group::new(&root).unwrap();
        let inner = Group::new(&outer).unwrap();
        inner.children().attach(Probe::new("leaf", &log));
        outer.children().attach(Probe::new("sibling", &log));

        root.dispose();

        assert_eq!(*log.borrow(), vec!["leaf", "sibling"]);
        assert!(outer.is_disposed());
        assert!(inner.is_disposed());
        assert!(outer.children().is_empty());
        assert!(root.children().is_empty());
    }

    #[test]
    fn test_child_of_disposed_parent_is_rejected() {
        let root = viewport();
        let group = Group::new(&root).unwrap();
        group.dispose();

        assert!(matches!(
            Group::new(&group),
            Err(SceneError::ParentDisposed)
        ));
    }
}
