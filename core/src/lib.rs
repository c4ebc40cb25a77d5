// src/lib.rs

//! opflow: an async execution engine for OpenAPI operations.
//!
//! An operation is a chain of steps bound to one `operationId`. Each step
//! receives the previous step's output plus a shared per-execution
//! [`Context`]. Around the chain, opflow provides:
//!  - Request and response validation compiled from the operation's schema.
//!  - One error handler per operation, and `catch_error` per pipeline.
//!  - Middleware that runs before validation.
//!  - Fork/join fan-out over a bounded number of values.
//!  - A cache decorator with LRU eviction and lazy expiry.
//!  - Cooperative cancellation that settles in-flight datasource calls.
//!  - Versioned services whose later versions inherit earlier versions' setup.

pub mod cache;
pub mod core;
pub mod datasource;
pub mod error;
pub mod operation;
pub mod pipeline;
pub mod schema;
pub mod service;

// --- Re-exports for the Public API ---

pub use crate::core::cancel::CancellationToken;
pub use crate::core::context::{Context, ContextBuilder, Request, ResponseHandle};
pub use crate::core::control::RunOutcome;
pub use crate::core::step::{Done, IntoStep, Step, StepFunction};

pub use crate::pipeline::{error_handler, parallel, pipe, ErrorHandler, ParallelStep, Pipeline};

pub use crate::cache::{cache, CacheOptions, CacheStore, CachedStep, LruStore};

pub use crate::operation::{ForkSource, Operation, OperationBuilder, OperationKey, MAX_FORK_BRANCHES};

pub use crate::service::{ApiDefinition, OperationMut, OperationTemplate, Service, ServiceBuilder, ServiceDocument, Version};

pub use crate::schema::{JsonSchemaValidator, OperationValidator};

pub use crate::datasource::{Datasource, DatasourceRequest};

pub use crate::error::{CancelError, FieldError, FlowError, FlowResult, ValidationError};

/*
    Typical setup:
    1. Build a `ServiceBuilder`, either from a `ServiceDocument` plus one `ApiDefinition`
       per version, or with `add_version`/`add_operation`.
    2. Configure operations through `operation(version, id)`; mutations of an
       earlier version reach every linked later version.
    3. `build()` the `Service` once and share it.
    4. Per request, build a `Context` (wiring client aborts to `ctx.cancel(..)`) and
       call `service.run(version, id, &ctx).await`.
*/
