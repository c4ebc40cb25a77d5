// opflow/src/core/step.rs

//! Defines `Step`, the smallest executable unit, and the `StepFunction` trait
//! shared by everything that can stand in for a step (pipelines, caches, ...).

use crate::core::context::Context;
use crate::error::{into_flow_error, FlowError, FlowResult};
use async_trait::async_trait;
use futures::channel::oneshot;
use futures::future::{self, BoxFuture};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Anything that behaves like a single step: takes the previous value and the
/// shared context, produces the next value.
#[async_trait]
pub trait StepFunction: Send + Sync {
  async fn call(&self, value: Value, ctx: &Context) -> FlowResult<Value>;
}

pub type ReturnFn = Arc<dyn Fn(Value, Context) -> BoxFuture<'static, FlowResult<Value>> + Send + Sync>;
pub type CallbackFn = Arc<dyn Fn(Value, Context, Done) + Send + Sync>;

/// The calling convention of a step, fixed by the constructor that built it.
#[derive(Clone)]
pub(crate) enum StepKind {
  Value(Value),
  Return(ReturnFn),
  Callback(CallbackFn),
  Nested(Arc<dyn StepFunction>),
}

/// One wrapped callable or literal value with a uniform async contract.
#[derive(Clone)]
pub struct Step {
  name: Option<String>,
  kind: StepKind,
}

impl Step {
  /// A constant: resolves with `value` whatever the input.
  pub fn value(value: Value) -> Self {
    Self::from_kind(StepKind::Value(value))
  }

  /// Return-style async step: `f(value, ctx)`.
  pub fn func<F, Fut, E>(f: F) -> Self
  where
    F: Fn(Value, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, E>> + Send + 'static,
    E: Into<anyhow::Error> + 'static,
  {
    let wrapped: ReturnFn = Arc::new(move |value, ctx| {
      let fut = f(value, ctx);
      Box::pin(async move { fut.await.map_err(into_flow_error) })
    });
    Self::from_kind(StepKind::Return(wrapped))
  }

  /// Return-style synchronous step. An `Err` rejects the step's future.
  pub fn sync<F, E>(f: F) -> Self
  where
    F: Fn(Value, &Context) -> Result<Value, E> + Send + Sync + 'static,
    E: Into<anyhow::Error> + 'static,
  {
    let wrapped: ReturnFn = Arc::new(move |value, ctx| {
      let result = f(value, &ctx).map_err(into_flow_error);
      Box::pin(future::ready(result))
    });
    Self::from_kind(StepKind::Return(wrapped))
  }

  /// Callback-style step: `f(value, ctx, done)`; the step settles when `done` does.
  pub fn callback<F>(f: F) -> Self
  where
    F: Fn(Value, Context, Done) + Send + Sync + 'static,
  {
    Self::from_kind(StepKind::Callback(Arc::new(f)))
  }

  /// Any `StepFunction`: pipelines, cache and parallel decorators, user types.
  pub fn nested(step: impl StepFunction + 'static) -> Self {
    Self::from_kind(StepKind::Nested(Arc::new(step)))
  }

  pub fn from_arc(step: Arc<dyn StepFunction>) -> Self {
    Self::from_kind(StepKind::Nested(step))
  }

  /// Labels the step for introspection and tracing.
  pub fn named(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  /// The label, or the calling convention if unlabeled.
  pub fn name(&self) -> &str {
    match (&self.name, &self.kind) {
      (Some(name), _) => name,
      (None, StepKind::Value(_)) => "value",
      (None, StepKind::Return(_)) => "fn",
      (None, StepKind::Callback(_)) => "callback",
      (None, StepKind::Nested(_)) => "nested",
    }
  }

  fn from_kind(kind: StepKind) -> Self {
    Self { name: None, kind }
  }

  /// Runs the step. Always yields a future; user failures surface as `Err`.
  pub fn run(&self, ctx: &Context, value: Value) -> BoxFuture<'static, FlowResult<Value>> {
    match &self.kind {
      StepKind::Value(literal) => Box::pin(future::ready(Ok(literal.clone()))),
      StepKind::Return(f) => f(value, ctx.clone()),
      StepKind::Callback(f) => {
        let (tx, rx) = oneshot::channel();
        f(value, ctx.clone(), Done { tx });
        Box::pin(async move {
          rx.await.unwrap_or_else(|_| {
            Err(FlowError::Internal(
              "callback step dropped its completion handle without settling".to_string(),
            ))
          })
        })
      }
      StepKind::Nested(inner) => {
        let inner = inner.clone();
        let ctx = ctx.clone();
        Box::pin(async move { inner.call(value, &ctx).await })
      }
    }
  }
}

impl std::fmt::Debug for Step {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Step").field("name", &self.name()).finish()
  }
}

#[async_trait]
impl StepFunction for Step {
  async fn call(&self, value: Value, ctx: &Context) -> FlowResult<Value> {
    self.run(ctx, value).await
  }
}

/// Completion handle passed to callback-style steps. Consumed on first use,
/// so a step settles at most once.
pub struct Done {
  tx: oneshot::Sender<FlowResult<Value>>,
}

impl Done {
  pub fn resolve(self, value: Value) {
    self.settle(Ok::<_, FlowError>(value));
  }

  pub fn reject<E: Into<anyhow::Error>>(self, err: E) {
    // receiver gone means the run was dropped; nothing to report to
    let _ = self.tx.send(Err(into_flow_error(err)));
  }

  pub fn settle<E: Into<anyhow::Error>>(self, result: Result<Value, E>) {
    let _ = self.tx.send(result.map_err(into_flow_error));
  }
}

/// Conversion into a `Step`. `None` stands for a missing step and is rejected
/// as a configuration error wherever steps are registered.
pub trait IntoStep {
  fn into_step(self) -> Option<Step>;
}

impl IntoStep for Step {
  fn into_step(self) -> Option<Step> {
    Some(self)
  }
}

impl IntoStep for Value {
  fn into_step(self) -> Option<Step> {
    Some(Step::value(self))
  }
}

impl IntoStep for Arc<dyn StepFunction> {
  fn into_step(self) -> Option<Step> {
    Some(Step::from_arc(self))
  }
}

impl<T: IntoStep> IntoStep for Option<T> {
  fn into_step(self) -> Option<Step> {
    self.and_then(IntoStep::into_step)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn names_reflect_calling_convention() {
    assert_eq!(Step::value(json!(1)).name(), "value");
    assert_eq!(Step::sync(|v, _| Ok::<_, FlowError>(v)).name(), "fn");
    assert_eq!(Step::callback(|v, _, done| done.resolve(v)).name(), "callback");
    assert_eq!(Step::value(json!(1)).named("one").name(), "one");
  }

  #[test]
  fn none_is_not_a_step() {
    assert!(None::<Step>.into_step().is_none());
    assert!(Some(Step::value(json!(null))).into_step().is_some());
  }
}
