// Cancellation tokens for in-flight operations

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

type CancelAction = Box<dyn FnOnce()>;

/// Handle that aborts an asynchronous operation.
///
/// The action runs at most once: cancelling a spent token, or a token whose
/// operation already completed, does nothing. Clones share the same action.
#[derive(Clone)]
pub struct CancelToken {
    action: Rc<RefCell<Option<CancelAction>>>,
}

impl CancelToken {
    /// Create a token that runs `action` on the first cancel
    pub fn new(action: impl FnOnce() + 'static) -> Self {
        Self {
            action: Rc::new(RefCell::new(Some(Box::new(action)))),
        }
    }

    /// Create a token with nothing to cancel
    pub fn noop() -> Self {
        Self {
            action: Rc::new(RefCell::new(None)),
        }
    }

    /// Cancel the operation (no-op if already spent)
    pub fn cancel(&self) {
        // Release the borrow before running so the action may touch clones
        let action = self.action.borrow_mut().take();
        if let Some(action) = action {
            action();
        }
    }

    /// Check whether the token has been used up
    pub fn is_spent(&self) -> bool {
        self.action.borrow().is_none()
    }

    /// Combine two tokens; cancelling the result cancels both, `self` first
    pub fn join(self, other: CancelToken) -> CancelToken {
        CancelToken::new(move || {
            self.cancel();
            other.cancel();
        })
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("spent", &self.is_spent())
            .finish()
    }
}
