// opflow/src/schema/mod.rs

//! Request/response validation for operations.
//!
//! [`OperationValidator`] is the seam an operation validates through. The
//! validator is derived from an OpenAPI/Swagger operation object. The bundled
//! [`JsonSchemaValidator`] compiles parameter, request body and response schemas
//! with `jsonschema`; any other implementation can be installed with
//! `set_validator`.

mod compiled;
pub mod openapi;

pub use openapi::{find_operation, JsonSchemaValidator};

use crate::core::context::Request;
use crate::error::ValidationError;
use serde_json::Value;

pub trait OperationValidator: Send + Sync {
  /// Applies schema defaults to `request` (coercing string parameters to their
  /// declared types), then validates it.
  fn validate_request(&self, request: &mut Request) -> Result<(), ValidationError>;

  /// Validates a produced body against the response schema declared for `status`.
  fn validate_response(&self, body: &Value, status: u16) -> Result<(), ValidationError>;
}
