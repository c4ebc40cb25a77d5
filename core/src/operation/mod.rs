// opflow/src/operation/mod.rs

//! Operations: a chain of steps bound to one OpenAPI operation, with
//! validation, middleware, an error handler and fork/join fan-out.

pub mod definition;
pub mod execution;
pub mod fork;

pub use definition::{middleware, Middleware, Operation, OperationBuilder, OperationKey};
pub use fork::{ForkGenerator, ForkSource, MAX_FORK_BRANCHES};
