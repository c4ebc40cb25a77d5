// opflow/src/operation/execution.rs

//! Contains the `Operation` execution logic.

use crate::core::context::Context;
use crate::core::control::RunOutcome;
use crate::core::step::Step;
use crate::error::{FlowError, FlowResult};
use crate::operation::definition::{Operation, Stage};
use futures::future::try_join_all;
use serde_json::Value;
use tracing::{event, info_span, span, Instrument, Level};

/// Where a chain segment left off.
enum Flow {
  Continue(Value),
  Terminated,
}

impl Operation {
  /// Runs the operation with `null` as the first step's input.
  pub async fn run(&self, ctx: &Context) -> FlowResult<RunOutcome> {
    self.run_with(ctx, Value::Null).await
  }

  /// Runs the operation: middleware, request validation, the chain, response
  /// validation, then the error handler for any chain failure.
  ///
  /// Middleware and request validation failures skip the error handler.
  pub async fn run_with(&self, ctx: &Context, input: Value) -> FlowResult<RunOutcome> {
    let run_span = info_span!(
      parent: ctx.span(),
      "operation",
      service = %self.key.service_id,
      version = %self.key.version,
      operation = %self.key.operation_id,
      request_id = %ctx.id(),
    );
    self.execute(ctx, input).instrument(run_span).await
  }

  async fn execute(&self, ctx: &Context, input: Value) -> FlowResult<RunOutcome> {
    if let Some(datasource) = &self.datasource {
      ctx.attach_datasource(datasource.clone());
    }

    for mw in self.middleware.iter() {
      mw(ctx.clone()).await?;
      if ctx.response().is_finished() {
        event!(Level::DEBUG, "Response finished by middleware.");
        return Ok(RunOutcome::Terminated);
      }
    }

    self.check_request(ctx)?;

    let outcome = match self.run_chain(ctx, input).await {
      Ok(Flow::Terminated) => return Ok(RunOutcome::Terminated),
      Ok(Flow::Continue(value)) => self.check_response(ctx, value),
      Err(e) => Err(e),
    };

    match outcome {
      Ok(value) => Ok(RunOutcome::Completed(value)),
      Err(err) => self.recover(ctx, err).await,
    }
  }

  fn check_request(&self, ctx: &Context) -> FlowResult<()> {
    if !self.validate_request {
      return Ok(());
    }
    let Some(validator) = &self.validator else {
      return Ok(());
    };
    let result = validator.validate_request(&mut ctx.request_mut());
    result.map_err(|e| {
      event!(Level::ERROR, error = %e, errors = e.errors.len(), "Request validation failed.");
      FlowError::from(e)
    })
  }

  fn check_response(&self, ctx: &Context, value: Value) -> FlowResult<Value> {
    if !self.validate_response {
      return Ok(value);
    }
    let Some(validator) = &self.validator else {
      return Ok(value);
    };
    let status = ctx.response().status().unwrap_or(200);
    match validator.validate_response(&value, status) {
      Ok(()) => Ok(value),
      Err(e) => {
        event!(Level::ERROR, error = %e, status, "Response validation failed.");
        Err(e.into())
      }
    }
  }

  async fn recover(&self, ctx: &Context, err: FlowError) -> FlowResult<RunOutcome> {
    let Some(handler) = &self.error_handler else {
      event!(Level::ERROR, error = %err, "Operation failed.");
      return Err(err);
    };
    event!(Level::DEBUG, error = %err, "Operation error routed to its error handler.");
    let recovered = handler(err, ctx.clone()).await?;
    if ctx.response().is_finished() {
      return Ok(RunOutcome::Terminated);
    }
    Ok(RunOutcome::Completed(recovered))
  }

  async fn run_chain(&self, ctx: &Context, input: Value) -> FlowResult<Flow> {
    if self.stages.is_empty() {
      return match &self.datasource {
        Some(_) => {
          event!(Level::DEBUG, "Empty chain; answering from the datasource.");
          ctx.datasource_request(None).await.map(Flow::Continue)
        }
        None => Err(FlowError::not_found(format!("handler for operation '{}'", self.key))),
      };
    }

    let mut value = input;
    for stage in self.stages.iter() {
      let flow = match stage {
        Stage::Step(position, step) => run_step(ctx, *position, step, value).await?,
        Stage::Fork {
          position,
          source,
          branch,
        } => {
          let values = source.materialize(&value, ctx)?;
          event!(
            Level::DEBUG,
            position = *position,
            source = source.describe(),
            branches = values.len(),
            "Forking."
          );
          let branches = values.into_iter().enumerate().map(|(branch_idx, item)| {
            let branch_span = span!(Level::DEBUG, "fork_branch", branch_index = branch_idx);
            run_steps(ctx, branch, item).instrument(branch_span)
          });
          let results = try_join_all(branches).await?;
          join(results)
        }
      };
      value = match flow {
        Flow::Continue(next) => next,
        Flow::Terminated => return Ok(Flow::Terminated),
      };
    }
    Ok(Flow::Continue(value))
  }
}

async fn run_step(ctx: &Context, position: usize, step: &Step, value: Value) -> FlowResult<Flow> {
  let step_span = span!(Level::DEBUG, "operation_step", step_index = position, step_name = step.name());
  let next = match step.run(ctx, value).instrument(step_span).await {
    Ok(next) => next,
    Err(e) => {
      event!(Level::DEBUG, step_index = position, error = %e, "Operation step failed.");
      return Err(e);
    }
  };
  if ctx.response().is_finished() {
    event!(Level::DEBUG, step_index = position, "Response finished; remaining steps skipped.");
    return Ok(Flow::Terminated);
  }
  Ok(Flow::Continue(next))
}

async fn run_steps(ctx: &Context, steps: &[(usize, Step)], input: Value) -> FlowResult<Flow> {
  let mut value = input;
  for (position, step) in steps {
    value = match run_step(ctx, *position, step, value).await? {
      Flow::Continue(next) => next,
      Flow::Terminated => return Ok(Flow::Terminated),
    };
  }
  Ok(Flow::Continue(value))
}

fn join(results: Vec<Flow>) -> Flow {
  let mut joined = Vec::with_capacity(results.len());
  for flow in results {
    match flow {
      Flow::Continue(value) => joined.push(value),
      Flow::Terminated => return Flow::Terminated,
    }
  }
  Flow::Continue(Value::Array(joined))
}
