// Last-resort error handling for the event loop

use log::{error, warn};
use std::cell::{Cell, RefCell};
use std::fmt;

use super::assets::{dispose_all_managers, ContentError};

type NotifyHook = Box<dyn FnOnce(&ContentError)>;

/// Receives errors nothing else handled.
///
/// The first failure is reported, every live content manager is force
/// disposed and the loop is told to halt. Later failures are only logged.
#[derive(Default)]
pub struct Supervisor {
    halted: Cell<bool>,
    failures: Cell<usize>,
    notify: RefCell<Option<NotifyHook>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hook told about the first failure (e.g. to show the player a
    /// message)
    pub fn with_notify(self, hook: impl FnOnce(&ContentError) + 'static) -> Self {
        *self.notify.borrow_mut() = Some(Box::new(hook));
        self
    }

    /// Handle an unrecoverable error
    pub fn fail(&self, err: ContentError) {
        self.failures.set(self.failures.get() + 1);
        if self.halted.replace(true) {
            warn!("Further failure after halt: {}", err);
            return;
        }

        error!("Unhandled content error ({:?}): {}", err.category(), err);
        let notify = self.notify.borrow_mut().take();
        if let Some(notify) = notify {
            notify(&err);
        }

        let disposed = dispose_all_managers();
        error!("Disposed {} content managers; halting", disposed);
    }

    /// Route an error result to [`Supervisor::fail`]
    pub fn guard<T>(&self, result: Result<T, ContentError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.fail(err);
                None
            }
        }
    }

    /// Check whether a failure has stopped the loop
    pub fn is_halted(&self) -> bool {
        self.halted.get()
    }

    /// Number of failures seen, including those after the halt
    pub fn failure_count(&self) -> usize {
        self.failures.get()
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("halted", &self.halted.get())
            .field("failures", &self.failures.get())
            .finish()
    }
}
