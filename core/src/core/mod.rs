pub mod cancel;
pub mod context;
pub mod control;
pub mod step;

// Re-export key types for easier access from other opflow modules (and lib.rs)
pub use cancel::CancellationToken;
pub use context::{Context, ContextBuilder, Request, ResponseHandle};
pub use control::RunOutcome;
pub use step::{Done, IntoStep, Step, StepFunction};
