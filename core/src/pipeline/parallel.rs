// opflow/src/pipeline/parallel.rs

//! Applies one step to every element of an array input concurrently.

use crate::core::context::Context;
use crate::core::step::{IntoStep, Step, StepFunction};
use crate::error::{FlowError, FlowResult};
use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;
use tracing::{event, Instrument, Level};

/// Runs `worker` once per element of an array input, all branches interleaved on
/// the caller's task. Outputs keep the input order regardless of completion order.
#[derive(Clone)]
pub struct ParallelStep {
  worker: Step,
}

pub fn parallel(worker: impl IntoStep) -> FlowResult<ParallelStep> {
  let worker = worker
    .into_step()
    .ok_or_else(|| FlowError::configuration("parallel", "wrapped step is undefined"))?;
  Ok(ParallelStep { worker })
}

#[async_trait]
impl StepFunction for ParallelStep {
  async fn call(&self, value: Value, ctx: &Context) -> FlowResult<Value> {
    let items = match value {
      Value::Array(items) => items,
      other => {
        return Err(FlowError::InvalidValue {
          message: format!("parallel step expects an array input, got {}", json_kind(&other)),
        })
      }
    };
    event!(Level::DEBUG, branches = items.len(), "Running parallel branches.");

    let branches = items.into_iter().enumerate().map(|(branch_idx, item)| {
      let span = tracing::debug_span!("parallel_branch", branch_index = branch_idx);
      self.worker.run(ctx, item).instrument(span)
    });
    Ok(Value::Array(try_join_all(branches).await?))
  }
}

impl IntoStep for ParallelStep {
  fn into_step(self) -> Option<Step> {
    Some(Step::nested(self).named("parallel"))
  }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}
