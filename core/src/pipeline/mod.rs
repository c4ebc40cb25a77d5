// opflow/src/pipeline/mod.rs

//! The `pipe`/`catch_error` combinator: ordered, immutable step sequences that are
//! themselves steps, plus the `parallel` decorator.

pub mod definition;
pub mod execution;
pub mod parallel;

pub use definition::{error_handler, pipe, ErrorHandler, Pipeline};
pub use parallel::{parallel, ParallelStep};
