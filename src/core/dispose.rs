// Explicit, idempotent disposal

use std::cell::Cell;
use std::fmt::Debug;

/// An object that releases its resources exactly once.
///
/// A second call to [`Disposable::dispose`] is a no-op.
pub trait Disposable {
    /// Release everything this object owns
    fn dispose(&self);

    /// Check whether `dispose` has already run
    fn is_disposed(&self) -> bool;
}

/// Once-only latch shared by the disposable types
#[derive(Debug, Default)]
pub struct DisposeFlag(Cell<bool>);

impl DisposeFlag {
    /// Create an unset flag
    pub fn new() -> Self {
        Self(Cell::new(false))
    }

    /// Mark the owner as disposed.
    ///
    /// Returns `true` only for the first call, so callers can bail out early
    /// on repeated disposal.
    pub fn begin(&self) -> bool {
        !self.0.replace(true)
    }

    /// Check whether the flag has been set
    pub fn is_set(&self) -> bool {
        self.0.get()
    }
}

/// Run a type's teardown steps in declaration order
pub fn run_teardown<S: Copy + Debug>(owner: &str, steps: &[S], mut apply: impl FnMut(S)) {
    for &step in steps {
        log::trace!("{}: teardown step {:?}", owner, step);
        apply(step);
    }
}
