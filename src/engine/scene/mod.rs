// Visual hierarchy: viewports own groups and sprites, groups own more of the same
//
// Parents hold their children strongly; children keep a weak link back so
// they can remove themselves. Disposal is post-order: a parent disposes
// every child before tearing down its own element.

mod element;
mod group;
mod sprite;
mod viewport;

pub use element::ElementBox;
pub use group::Group;
pub use sprite::Sprite;
pub use viewport::{live_viewport_count, resize_all, Viewport};

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::Disposable;
use crate::engine::assets::ContentError;

/// Scene construction and playback errors
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("Cannot add a child to a disposed parent")]
    ParentDisposed,

    #[error(transparent)]
    Content(#[from] ContentError),
}

/// One step of a node's teardown, run in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    /// Leave the live viewport registry
    Unregister,
    /// Cancel the running animation frame
    StopPlayback,
    /// Leave the sprite sheet's sprite list
    UnbindSheet,
    /// Dispose every child, draining the list
    DisposeChildren,
    /// Detach the node's element from its parent element
    DetachElement,
    /// Remove the node from its parent's child list
    RemoveFromParent,
}

/// Owned child list of a parent node
#[derive(Default)]
pub struct Children {
    nodes: RefCell<Vec<Rc<dyn Disposable>>>,
}

impl Children {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a child
    pub fn attach(&self, child: Rc<dyn Disposable>) {
        self.nodes.borrow_mut().push(child);
    }

    /// Remove a child by address; returns `false` if it was not here
    pub fn detach(&self, child: *const ()) -> bool {
        let mut nodes = self.nodes.borrow_mut();
        let Some(index) = nodes
            .iter()
            .position(|node| Rc::as_ptr(node) as *const () == child)
        else {
            return false;
        };
        nodes.remove(index);
        true
    }

    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    /// Dispose children front to back until none are left
    pub fn dispose_all(&self) {
        loop {
            // Children remove themselves from this list while disposing
            let next = {
                let mut nodes = self.nodes.borrow_mut();
                if nodes.is_empty() {
                    None
                } else {
                    Some(nodes.remove(0))
                }
            };
            match next {
                Some(child) => child.dispose(),
                None => break,
            }
        }
    }
}

/// A node that can own groups and sprites
pub trait ParentNode: Disposable {
    fn children(&self) -> &Children;
}
