// Lifecycle primitives shared by the runtime: disposal, cancellation, registries

pub mod cancel;
pub mod dispose;
pub mod registry;

pub use cancel::CancelToken;
pub use dispose::{run_teardown, DisposeFlag, Disposable};
pub use registry::Registry;
