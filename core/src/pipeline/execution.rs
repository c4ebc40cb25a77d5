// opflow/src/pipeline/execution.rs

//! Contains the `Pipeline` execution logic.

use crate::core::context::Context;
use crate::core::step::StepFunction;
use crate::error::FlowResult;
use crate::pipeline::definition::Pipeline;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{event, span, Instrument, Level};

impl Pipeline {
  /// Runs the steps in order, feeding each output into the next step.
  ///
  /// The first failure skips the remaining steps and goes to the pipeline's error
  /// handler if one is attached; otherwise it is returned unchanged.
  pub async fn run(&self, ctx: &Context, input: Value) -> FlowResult<Value> {
    match self.run_steps(ctx, input).await {
      Ok(value) => Ok(value),
      Err(err) => match &self.catch {
        Some(handler) => {
          event!(Level::DEBUG, error = %err, "Pipeline error routed to its catch handler.");
          handler(err, ctx.clone()).await
        }
        None => Err(err),
      },
    }
  }

  async fn run_steps(&self, ctx: &Context, input: Value) -> FlowResult<Value> {
    let mut value = input;
    for (step_idx, step) in self.steps.iter().enumerate() {
      let step_span = span!(
        Level::DEBUG,
        "pipeline_step",
        step_name = step.name(),
        step_index = step_idx
      );
      value = match step.run(ctx, value).instrument(step_span).await {
        Ok(next) => next,
        Err(e) => {
          event!(Level::DEBUG, step_index = step_idx, error = %e, "Pipeline step failed.");
          return Err(e);
        }
      };
    }
    Ok(value)
  }
}

#[async_trait]
impl StepFunction for Pipeline {
  async fn call(&self, value: Value, ctx: &Context) -> FlowResult<Value> {
    self.run(ctx, value).await
  }
}
