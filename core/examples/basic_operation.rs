// opflow/examples/basic_operation.rs

use opflow::{cache, CacheOptions, Context, FlowError, Operation, OperationKey, Request, RunOutcome, Step};
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, thiserror::Error)]
enum PetError {
  #[error("pet {0} not found")]
  Missing(i64),
}

#[tokio::main]
async fn main() -> Result<(), FlowError> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Basic Operation Example ---");

  // 1. The operation's schema: one integer path parameter.
  let schema = json!({
    "operationId": "getPet",
    "parameters": [{"name": "petId", "in": "path", "required": true, "schema": {"type": "integer"}}],
    "responses": {"200": {"content": {"application/json": {"schema": {"type": "object", "required": ["name"]}}}}}
  });

  // 2. A cached lookup keyed by the (already coerced) path parameter.
  let lookup = Step::sync(|_value: Value, ctx: &Context| {
    let id = ctx.request().path_params["petId"].as_i64().unwrap_or_default();
    info!(id, "Looking up pet.");
    match id {
      1 => Ok(json!({"name": "rex", "id": 1})),
      other => Err(PetError::Missing(other)),
    }
  });
  let cached = cache(
    lookup,
    |_value: &Value, ctx: &Context| ctx.request().path_params["petId"].to_string(),
    CacheOptions::default().max_size(100),
  )?;

  // 3. Build the operation.
  let mut builder = Operation::builder(OperationKey::new("petstore", "v1", "getPet"));
  builder.set_schema(&schema)?.validate_response(true);
  builder.push(cached)?;
  builder.set_error_handler(|err: FlowError, ctx: Context| async move {
    match err.downcast_ref::<PetError>() {
      Some(PetError::Missing(_)) => {
        ctx.response().send(404, json!({"error": err.to_string()}));
        Ok(Value::Null)
      }
      None => Err(err),
    }
  });
  let op = builder.build();

  // 4. Run it for a few requests.
  for pet_id in ["1", "1", "2"] {
    let ctx = Context::new(Request::get(format!("/pets/{}", pet_id)).with_path_param("petId", pet_id));
    match op.run(&ctx).await? {
      RunOutcome::Completed(value) => info!(%value, "Completed."),
      RunOutcome::Terminated => info!(status = ?ctx.response().status(), body = ?ctx.response().body(), "Terminated."),
    }
  }
  Ok(())
}
