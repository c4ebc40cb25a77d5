// opflow/src/core/control.rs

//! Defines the outcome of a full operation run.

use serde_json::Value;

/// Outcome of an operation run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
  /// Every step ran; carries the final value (or the error handler's recovery value).
  Completed(Value),
  /// A step (or middleware, or the error handler) finished the response itself.
  /// Remaining steps and response validation were skipped.
  Terminated,
}

impl RunOutcome {
  pub fn is_terminated(&self) -> bool {
    matches!(self, RunOutcome::Terminated)
  }

  pub fn value(&self) -> Option<&Value> {
    match self {
      RunOutcome::Completed(v) => Some(v),
      RunOutcome::Terminated => None,
    }
  }

  pub fn into_value(self) -> Option<Value> {
    match self {
      RunOutcome::Completed(v) => Some(v),
      RunOutcome::Terminated => None,
    }
  }
}
