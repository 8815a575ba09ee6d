pub mod dispatcher;
pub mod runtime;
pub mod tracker;

pub use dispatcher::{Dispatcher, InvocationContext};
pub use runtime::Runtime;
pub use tracker::{Completion, InvocationTracker, PendingRun, RunOutcome};
