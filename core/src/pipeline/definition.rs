// opflow/src/pipeline/definition.rs

//! Contains the `Pipeline` struct and its construction.

use crate::core::context::Context;
use crate::core::step::{IntoStep, Step};
use crate::error::{into_flow_error, FlowError, FlowResult};
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Recovery function for a failed pipeline or operation. Its outcome replaces
/// the failure.
pub type ErrorHandler = Arc<dyn Fn(FlowError, Context) -> BoxFuture<'static, FlowResult<Value>> + Send + Sync>;

/// Wraps an async closure as an [`ErrorHandler`].
pub fn error_handler<F, Fut, E>(f: F) -> ErrorHandler
where
  F: Fn(FlowError, Context) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Value, E>> + Send + 'static,
  E: Into<anyhow::Error> + 'static,
{
  Arc::new(move |err, ctx| {
    let fut = f(err, ctx);
    Box::pin(async move { fut.await.map_err(into_flow_error) })
  })
}

/// An ordered, immutable composition of steps with at most one error handler.
///
/// Cloning is cheap; clones share the step list.
#[derive(Clone)]
pub struct Pipeline {
  pub(crate) steps: Arc<[Step]>,
  pub(crate) catch: Option<ErrorHandler>,
}

/// Builds a pipeline from `steps`, executed left to right.
///
/// Setup fails with a configuration error on an empty list or a missing (`None`) step.
pub fn pipe<I>(steps: I) -> FlowResult<Pipeline>
where
  I: IntoIterator,
  I::Item: IntoStep,
{
  let mut collected = Vec::new();
  for (index, item) in steps.into_iter().enumerate() {
    match item.into_step() {
      Some(step) => collected.push(step),
      None => {
        return Err(FlowError::configuration(
          "pipe",
          format!("step at position {} is undefined", index),
        ))
      }
    }
  }
  if collected.is_empty() {
    return Err(FlowError::configuration("pipe", "a pipeline needs at least one step"));
  }
  Ok(Pipeline {
    steps: collected.into(),
    catch: None,
  })
}

/// Variadic form of [`pipe`]: `pipe![a, b, c]` accepts anything implementing
/// [`IntoStep`](crate::IntoStep), mixed freely.
#[macro_export]
macro_rules! pipe {
  ($($step:expr),* $(,)?) => {
    $crate::pipe(::std::vec![$($crate::IntoStep::into_step($step)),*])
  };
}

impl Pipeline {
  /// Attaches the pipeline's recovery function, replacing any previous one.
  ///
  /// The handler only sees failures of this pipeline's own steps. Its result
  /// becomes the pipeline's result.
  pub fn catch_error<F, Fut, E>(self, handler: F) -> Self
  where
    F: Fn(FlowError, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, E>> + Send + 'static,
    E: Into<anyhow::Error> + 'static,
  {
    self.with_error_handler(error_handler(handler))
  }

  pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
    self.catch = Some(handler);
    self
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  pub fn has_error_handler(&self) -> bool {
    self.catch.is_some()
  }

  pub fn step_names(&self) -> Vec<String> {
    self.steps.iter().map(|s| s.name().to_string()).collect()
  }
}

impl IntoStep for Pipeline {
  fn into_step(self) -> Option<Step> {
    Some(Step::nested(self).named("pipeline"))
  }
}

impl std::fmt::Debug for Pipeline {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Pipeline")
      .field("steps", &self.step_names())
      .field("has_error_handler", &self.catch.is_some())
      .finish()
  }
}
