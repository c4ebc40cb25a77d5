// opflow/examples/versioned_service.rs

use opflow::{ApiDefinition, Context, FlowError, ForkSource, Request, ServiceBuilder, ServiceDocument, Step};
use serde_json::{json, Value};
use tracing::info;

fn api(version: &str) -> ApiDefinition {
  ApiDefinition::new(
    version,
    json!({
      "paths": {
        "/pets": {
          "get": {
            "operationId": "listPets",
            "parameters": [{"name": "limit", "in": "query", "schema": {"type": "integer", "default": 3}}]
          }
        }
      }
    }),
  )
}

#[tokio::main]
async fn main() -> Result<(), FlowError> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Versioned Service Example ---");

  let document: ServiceDocument = serde_json::from_value(json!({
    "id": "petstore",
    "operations": [{"operationId": "listPets"}]
  }))
  .map_err(|e| FlowError::configuration("document", e.to_string()))?;
  let mut builder = ServiceBuilder::from_document(&document, &[api("v1"), api("v2")])?;

  // v1 setup is inherited by v2.
  builder
    .operation("v1", "listPets")?
    .push(Step::sync(|_value: Value, ctx: &Context| {
      let limit = ctx.request().query["limit"].as_u64().unwrap_or(0);
      Ok::<_, FlowError>(json!((1..=limit).collect::<Vec<_>>()))
    }))?;

  // v2 adds a fan-out over the listed ids.
  builder
    .operation("v2", "listPets")?
    .fork(ForkSource::input())?
    .push(Step::sync(|value: Value, _ctx: &Context| {
      Ok::<_, FlowError>(json!({"id": value, "name": format!("pet-{}", value)}))
    }))?
    .join()?;

  let service = builder.build();
  for version in service.version_ids() {
    let ctx = Context::new(Request::get("/pets").with_query("limit", "2"));
    let outcome = service.run(version, "listPets", &ctx).await?;
    info!(version, outcome = ?outcome, "Ran listPets.");
  }
  Ok(())
}
