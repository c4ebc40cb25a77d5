// tests/inheritance_tests.rs
mod common;

use common::*;
use opflow::{
  ApiDefinition, Context, FlowError, ForkSource, OperationKey, OperationTemplate, RunOutcome, ServiceBuilder, ServiceDocument,
};
use serde_json::{json, Value};

fn three_versions() -> ServiceBuilder {
  let mut builder = ServiceBuilder::new("petstore");
  builder.add_version("v1").unwrap();
  builder.add_version("v2").unwrap();
  builder.add_version("v3").unwrap();
  builder
}

fn key(version: &str) -> OperationKey {
  OperationKey::new("petstore", version, "listPets")
}

fn api(version: &str) -> ApiDefinition {
  ApiDefinition::new(
    version,
    json!({
      "paths": {
        "/pets": {
          "get": {
            "operationId": "listPets",
            "parameters": [
              {"name": "limit", "in": "query", "schema": {"type": "integer", "default": 10}}
            ]
          }
        }
      }
    }),
  )
}

#[tokio::test]
async fn test_push_reaches_linked_successors_live() {
  setup_tracing();
  let mut builder = three_versions();
  for version in ["v1", "v2", "v3"] {
    builder.add_operation(version, "listPets").unwrap();
  }
  builder.link(&key("v1"), &key("v2")).unwrap();
  builder.link(&key("v2"), &key("v3")).unwrap();

  builder.operation("v1", "listPets").unwrap().push(append_step("base")).unwrap();
  builder.operation("v2", "listPets").unwrap().push(append_step("v2-extra")).unwrap();

  assert_eq!(builder.get(&key("v1")).unwrap().step_names(), vec!["base"]);
  assert_eq!(builder.get(&key("v2")).unwrap().step_names(), vec!["base", "v2-extra"]);
  assert_eq!(builder.get(&key("v3")).unwrap().step_names(), vec!["base", "v2-extra"]);

  let service = builder.build();
  let ctx = test_context();
  assert_eq!(
    service.run("v3", "listPets", &ctx).await.unwrap(),
    RunOutcome::Completed(json!(["base", "v2-extra"]))
  );
}

#[tokio::test]
async fn test_link_after_push_seeds_the_successor() {
  setup_tracing();
  let mut builder = three_versions();
  builder.add_operation("v1", "listPets").unwrap().push(append_step("early")).unwrap();
  builder
    .operation("v1", "listPets")
    .unwrap()
    .set_error_handler(|_err: FlowError, _ctx: Context| async { Ok::<_, TestError>(json!("v1 handler")) })
    .unwrap();
  builder.add_operation("v2", "listPets").unwrap().push(append_step("own")).unwrap();

  builder.link(&key("v1"), &key("v2")).unwrap();
  builder.operation("v1", "listPets").unwrap().push(append_step("late")).unwrap();

  let v2 = builder.get(&key("v2")).unwrap();
  assert_eq!(v2.step_names(), vec!["own", "early", "late"]);
  assert!(v2.has_error_handler());
  assert_eq!(builder.successor(&key("v1")), Some(&key("v2")));
}

#[tokio::test]
async fn test_failed_link_leaves_both_operations_untouched() {
  setup_tracing();
  let mut builder = three_versions();
  builder
    .add_operation("v1", "listPets")
    .unwrap()
    .push(append_step("a"))
    .unwrap()
    .fork(ForkSource::input())
    .unwrap()
    .push(append_step("b"))
    .unwrap()
    .join()
    .unwrap();
  builder.add_operation("v2", "listPets").unwrap().fork(ForkSource::input()).unwrap();

  let err = builder.link(&key("v1"), &key("v2")).unwrap_err();
  assert_eq!(err.name(), "ConfigurationError");

  assert_eq!(builder.get(&key("v2")).unwrap().step_names(), vec!["fork"]);
  assert_eq!(builder.successor(&key("v1")), None);
}

#[tokio::test]
async fn test_mutations_never_propagate_backwards() {
  setup_tracing();
  let mut builder = three_versions();
  builder.add_operation("v1", "listPets").unwrap();
  builder.add_operation("v2", "listPets").unwrap();
  builder.link(&key("v1"), &key("v2")).unwrap();

  builder.operation("v2", "listPets").unwrap().push(append_step("only-v2")).unwrap();
  assert!(builder.get(&key("v1")).unwrap().step_names().is_empty());
}

#[tokio::test]
async fn test_unlinked_versions_are_isolated() {
  setup_tracing();
  let mut builder = three_versions();
  builder.add_operation("v1", "listPets").unwrap();
  builder.add_operation("v2", "listPets").unwrap();
  builder.link(&key("v1"), &key("v2")).unwrap();
  assert_eq!(builder.unlink(&key("v1")).unwrap(), Some(key("v2")));

  builder.operation("v1", "listPets").unwrap().push(append_step("v1-only")).unwrap();
  assert!(builder.get(&key("v2")).unwrap().step_names().is_empty());
}

#[tokio::test]
async fn test_cycles_are_visited_once() {
  setup_tracing();
  let mut builder = three_versions();
  builder.add_operation("v1", "listPets").unwrap();
  builder.add_operation("v2", "listPets").unwrap();
  builder.link(&key("v1"), &key("v2")).unwrap();
  builder.link(&key("v2"), &key("v1")).unwrap();

  builder.operation("v1", "listPets").unwrap().push(append_step("once")).unwrap();
  assert_eq!(builder.get(&key("v1")).unwrap().step_names(), vec!["once"]);
  assert_eq!(builder.get(&key("v2")).unwrap().step_names(), vec!["once"]);
}

#[test]
fn test_reserved_and_duplicate_ids_are_rejected() {
  let mut builder = three_versions();
  assert!(builder.add_operation("v1", "addOperation").is_err());
  assert!(builder.add_operation("v1", "operationIds").is_err());
  assert!(builder.add_operation("v1", "v1").is_err());
  assert!(builder.add_operation("v9", "listPets").is_err());
  assert!(builder.add_operation("v1", "listPets").is_ok());
  assert!(builder.add_operation("v1", "listPets").is_err());
  assert!(builder.add_version("v1").is_err());
}

// --- from_document ---

#[tokio::test]
async fn test_document_replicas_inherit_by_default() {
  setup_tracing();
  let document: ServiceDocument = serde_json::from_value(json!({
    "id": "petstore",
    "operations": [
      {"operationId": "listPets"},
      {"operationId": "adminOnly", "version": "v2", "private": true},
      {"operationId": "standalone", "inherit": false}
    ]
  }))
  .unwrap();
  let apis = vec![api("v1"), api("v2")];
  let mut builder = ServiceBuilder::from_document(&document, &apis).unwrap();

  builder.operation("v1", "listPets").unwrap().push(append_step("shared")).unwrap();
  builder.operation("v1", "standalone").unwrap().push(append_step("v1")).unwrap();

  let service = builder.build();
  assert_eq!(service.version_ids(), vec!["v1", "v2"]);
  assert_eq!(service.operation("v2", "listPets").unwrap().step_names(), vec!["shared"]);
  assert!(service.operation("v2", "standalone").unwrap().step_names().is_empty());
  assert!(service.operation("v1", "adminOnly").is_none());
  assert!(service.operation("v2", "adminOnly").unwrap().is_private());
  assert_eq!(service.version("v2").unwrap().public_operations().count(), 2);
}

#[tokio::test]
async fn test_document_replicas_validate_with_their_own_schema() {
  setup_tracing();
  let document = ServiceDocument {
    id: "petstore".into(),
    operations: vec![OperationTemplate::new("listPets")],
  };
  let apis = vec![api("v1"), api("v2")];
  let mut builder = ServiceBuilder::from_document(&document, &apis).unwrap();
  builder
    .operation("v1", "listPets")
    .unwrap()
    .push(opflow::Step::sync(|_value: Value, ctx: &Context| {
      Ok::<_, TestError>(ctx.request().query.get("limit").cloned().unwrap_or(Value::Null))
    }))
    .unwrap();
  let service = builder.build();

  // default applied by the compiled validator
  let ctx = test_context();
  assert_eq!(service.run("v2", "listPets", &ctx).await.unwrap().into_value(), Some(json!(10)));

  let bad = context_for(opflow::Request::get("/pets").with_query("limit", "lots"));
  let err = service.run("v2", "listPets", &bad).await.unwrap_err();
  assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_document_references_resolve_against_components() {
  setup_tracing();
  let document = ServiceDocument {
    id: "petstore".into(),
    operations: vec![OperationTemplate::new("listPets").validate_response(true)],
  };
  let api = ApiDefinition::new(
    "v1",
    json!({
      "openapi": "3.0.3",
      "components": {
        "schemas": {"Pet": {"type": "object", "required": ["name"], "properties": {"name": {"type": "string"}}}}
      },
      "paths": {
        "/pets": {
          "get": {
            "operationId": "listPets",
            "responses": {
              "200": {
                "content": {
                  "application/json": {"schema": {"type": "array", "items": {"$ref": "#/components/schemas/Pet"}}}
                }
              }
            }
          }
        }
      }
    }),
  );
  let mut builder = ServiceBuilder::from_document(&document, &[api]).unwrap();
  builder
    .operation("v1", "listPets")
    .unwrap()
    .push(opflow::Step::sync(|_value: Value, ctx: &Context| {
      let pets = match ctx.request().query.get("broken") {
        Some(_) => json!([{"id": 1}]),
        None => json!([{"name": "rex"}]),
      };
      Ok::<_, TestError>(pets)
    }))
    .unwrap();
  let service = builder.build();

  let ok = service.run("v1", "listPets", &test_context()).await.unwrap();
  assert_eq!(ok.into_value(), Some(json!([{"name": "rex"}])));

  let broken = context_for(opflow::Request::get("/pets").with_query("broken", "1"));
  let err = service.run("v1", "listPets", &broken).await.unwrap_err();
  assert_eq!(err.status_code(), 500);
  assert_eq!(
    err.as_validation().unwrap().errors[0].error_code,
    "schema.openapi.responseValidation"
  );
}

#[test]
fn test_document_with_unknown_version_is_rejected() {
  let document = ServiceDocument {
    id: "petstore".into(),
    operations: vec![OperationTemplate::new("listPets").in_version("v7")],
  };
  let err = ServiceBuilder::from_document(&document, &[api("v1")]).err().unwrap();
  assert_eq!(err.name(), "ConfigurationError");
}

#[tokio::test]
async fn test_unknown_dispatch_target_is_not_found() {
  setup_tracing();
  let service = three_versions().build();
  let err = service.run("v1", "missing", &test_context()).await.unwrap_err();
  assert_eq!(err.name(), "NotFoundError");
}
