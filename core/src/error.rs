// opflow/src/error.rs
use anyhow::Error as AnyhowError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One failed check reported by a validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
  /// Name of the parameter, or `body`, or `response`.
  pub path: String,
  /// Where the value lives: `query`, `path`, `header`, `body` or `response`.
  pub location: String,
  pub message: String,
  /// Machine-readable code such as `type.openapi.requestValidation`.
  pub error_code: String,
}

impl FieldError {
  pub fn new(
    path: impl Into<String>,
    location: impl Into<String>,
    message: impl Into<String>,
    error_code: impl Into<String>,
  ) -> Self {
    Self {
      path: path.into(),
      location: location.into(),
      message: message.into(),
      error_code: error_code.into(),
    }
  }
}

/// Structured request or response validation failure.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct ValidationError {
  pub message: String,
  pub errors: Vec<FieldError>,
  pub status_code: u16,
  /// The offending response body, for response-side failures.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub response: Option<Value>,
}

impl ValidationError {
  pub fn request(errors: Vec<FieldError>) -> Self {
    Self {
      message: format!("request validation failed with {} error(s)", errors.len()),
      errors,
      status_code: 400,
      response: None,
    }
  }

  pub fn response(errors: Vec<FieldError>, body: Value) -> Self {
    Self {
      message: format!("response validation failed with {} error(s)", errors.len()),
      errors,
      status_code: 500,
      response: Some(body),
    }
  }
}

/// Raised when a caller-initiated abort reaches cancellable work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("execution cancelled: {reason}")]
pub struct CancelError {
  pub reason: String,
}

impl CancelError {
  pub const NAME: &'static str = "CancelError";

  pub fn new(reason: impl Into<String>) -> Self {
    Self { reason: reason.into() }
  }

  pub fn name(&self) -> &'static str {
    Self::NAME
  }
}

#[derive(Debug, Error)]
pub enum FlowError {
  #[error("Configuration error for '{scope}': {message}")]
  Configuration { scope: String, message: String },

  #[error("Validation failed: {0}")]
  Validation(#[from] ValidationError),

  #[error("{0}")]
  Cancelled(#[from] CancelError),

  #[error("Not found: {scope}")]
  NotFound { scope: String },

  #[error("Fork produced {found} values, the limit is {limit}")]
  ForkLimitExceeded { limit: usize, found: usize },

  #[error("Invalid value: {message}")]
  InvalidValue { message: String },

  #[error("Error in user-provided step or external operation. Source: {source}")]
  Step {
    #[source]
    source: AnyhowError,
  },

  #[error("Internal opflow error: {0}")]
  Internal(String),
}

impl FlowError {
  pub fn configuration(scope: impl Into<String>, message: impl Into<String>) -> Self {
    FlowError::Configuration {
      scope: scope.into(),
      message: message.into(),
    }
  }

  pub fn not_found(scope: impl Into<String>) -> Self {
    FlowError::NotFound { scope: scope.into() }
  }

  /// Stable name of the error class. Route adapters compare against `"CancelError"`.
  pub fn name(&self) -> &'static str {
    match self {
      FlowError::Configuration { .. } => "ConfigurationError",
      FlowError::Validation(_) => "ValidationError",
      FlowError::Cancelled(_) => CancelError::NAME,
      FlowError::NotFound { .. } => "NotFoundError",
      FlowError::ForkLimitExceeded { .. } => "ForkLimitError",
      FlowError::InvalidValue { .. } => "InvalidValueError",
      FlowError::Step { .. } => "StepError",
      FlowError::Internal(_) => "InternalError",
    }
  }

  pub fn is_cancel(&self) -> bool {
    matches!(self, FlowError::Cancelled(_))
  }

  /// HTTP-like status for adapters that turn errors into responses.
  pub fn status_code(&self) -> u16 {
    match self {
      FlowError::Validation(v) => v.status_code,
      FlowError::NotFound { .. } => 404,
      FlowError::InvalidValue { .. } => 400,
      // nginx convention for "client closed request"
      FlowError::Cancelled(_) => 499,
      _ => 500,
    }
  }

  pub fn as_validation(&self) -> Option<&ValidationError> {
    match self {
      FlowError::Validation(v) => Some(v),
      _ => None,
    }
  }

  /// Reaches the user's original error inside a `Step` failure.
  pub fn downcast_ref<T>(&self) -> Option<&T>
  where
    T: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
  {
    match self {
      FlowError::Step { source } => source.downcast_ref::<T>(),
      _ => None,
    }
  }
}

// User steps return anything convertible into anyhow::Error. When that error is
// itself a FlowError (e.g. a CancelError surfaced by a datasource call), unwrap
// it instead of nesting FlowError::Step(FlowError::...).
impl From<AnyhowError> for FlowError {
  fn from(err: AnyhowError) -> Self {
    match err.downcast::<FlowError>() {
      Ok(flow_err) => flow_err,
      Err(err) => match err.downcast::<CancelError>() {
        Ok(cancel) => FlowError::Cancelled(cancel),
        Err(err) => match err.downcast::<ValidationError>() {
          Ok(validation) => FlowError::Validation(validation),
          Err(source) => FlowError::Step { source },
        },
      },
    }
  }
}

/// Converts a user-provided error into a `FlowError`.
pub(crate) fn into_flow_error<E: Into<AnyhowError>>(err: E) -> FlowError {
  FlowError::from(err.into())
}

pub type FlowResult<T, E = FlowError> = std::result::Result<T, E>;
