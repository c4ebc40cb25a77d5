// tests/validation_tests.rs
mod common;

use common::*;
use opflow::{Context, FlowError, Operation, OperationKey, Request, Step};
use serde_json::{json, Value};
use serial_test::serial;
use std::sync::atomic::Ordering;

fn pet_schema() -> Value {
  json!({
    "operationId": "createPet",
    "parameters": [
      {"name": "dryRun", "in": "query", "schema": {"type": "boolean", "default": false}},
      {"name": "x-tenant", "in": "header", "required": true, "schema": {"type": "string"}},
      {"name": "storeId", "in": "path", "required": true, "schema": {"type": "integer", "minimum": 1}}
    ],
    "requestBody": {
      "required": true,
      "content": {
        "application/json": {
          "schema": {
            "type": "object",
            "required": ["name"],
            "properties": {"name": {"type": "string"}, "age": {"type": "integer"}}
          }
        }
      }
    },
    "responses": {
      "201": {
        "content": {
          "application/json": {
            "schema": {"type": "object", "required": ["id"], "properties": {"id": {"type": "integer"}}}
          }
        }
      },
      "4XX": {"content": {"application/json": {"schema": {"type": "object", "required": ["error"]}}}}
    }
  })
}

fn valid_request() -> Request {
  Request::post("/stores/3/pets")
    .with_path_param("storeId", "3")
    .with_header("X-Tenant", "acme")
    .with_body(json!({"name": "rex", "age": 2}))
}

fn create_pet(response: Value) -> opflow::OperationBuilder {
  let mut builder = Operation::builder(OperationKey::new("petstore", "v1", "createPet"));
  builder.set_schema(&pet_schema()).unwrap();
  builder
    .push(Step::sync(move |_value: Value, ctx: &Context| {
      ctx.response().set_status(201);
      Ok::<_, TestError>(response.clone())
    }))
    .unwrap();
  builder
}

#[tokio::test]
async fn test_valid_request_is_coerced_and_defaulted() {
  setup_tracing();
  let op = create_pet(json!({"id": 1})).build();
  let ctx = context_for(valid_request());
  let outcome = op.run(&ctx).await.unwrap();
  assert_eq!(outcome.into_value(), Some(json!({"id": 1})));

  let request = ctx.request();
  assert_eq!(request.path_params["storeId"], json!(3));
  assert_eq!(request.query["dryRun"], json!(false));
}

#[tokio::test]
#[serial]
async fn test_invalid_request_fails_before_any_step() {
  setup_tracing();
  reset_counters();
  let mut builder = create_pet(json!({"id": 1}));
  builder.push(counting_step(STEP_EXEC_COUNTER.clone())).unwrap();
  builder.set_error_handler(|_err: FlowError, _ctx: Context| async { Ok::<_, TestError>(json!("handled")) });
  let op = builder.build();

  let request = Request::post("/stores/0/pets")
    .with_path_param("storeId", "0")
    .with_body(json!({"age": "old"}));
  let err = op.run(&context_for(request)).await.unwrap_err();
  let validation = err.as_validation().expect("validation error");
  assert_eq!(validation.status_code, 400);

  let codes: Vec<(&str, &str)> = validation
    .errors
    .iter()
    .map(|e| (e.path.as_str(), e.error_code.as_str()))
    .collect();
  assert!(codes.contains(&("x-tenant", "required.openapi.requestValidation")));
  assert!(codes.contains(&("storeId", "schema.openapi.requestValidation")));
  assert!(codes.contains(&("body", "schema.openapi.requestValidation")));
  assert!(validation.errors.iter().all(|e| e.location != "response"));
  assert_eq!(STEP_EXEC_COUNTER.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_type_mismatch_gets_type_code() {
  setup_tracing();
  let op = create_pet(json!({"id": 1})).build();
  let request = valid_request().with_query("dryRun", "maybe");
  let err = op.run(&context_for(request)).await.unwrap_err();
  let validation = err.as_validation().unwrap();
  assert_eq!(validation.errors.len(), 1);
  assert_eq!(validation.errors[0].location, "query");
  assert_eq!(validation.errors[0].error_code, "type.openapi.requestValidation");
  assert_eq!(validation.errors[0].message, "must be boolean");
}

#[tokio::test]
async fn test_request_validation_can_be_disabled() {
  setup_tracing();
  let mut builder = create_pet(json!({"id": 1}));
  builder.validate_request(false);
  let outcome = builder.build().run(&context_for(Request::post("/x"))).await.unwrap();
  assert_eq!(outcome.into_value(), Some(json!({"id": 1})));
}

#[tokio::test]
async fn test_response_validation_is_opt_in() {
  setup_tracing();
  // missing "id": passes while response validation is off
  let lenient = create_pet(json!({"name": "rex"})).build();
  assert!(lenient.run(&context_for(valid_request())).await.is_ok());

  let mut strict = create_pet(json!({"name": "rex"}));
  strict.validate_response(true);
  let err = strict.build().run(&context_for(valid_request())).await.unwrap_err();
  let validation = err.as_validation().unwrap();
  assert_eq!(validation.status_code, 500);
  assert_eq!(validation.response, Some(json!({"name": "rex"})));
  assert_eq!(validation.errors[0].location, "response");
  assert_eq!(validation.errors[0].error_code, "schema.openapi.responseValidation");
}

#[tokio::test]
async fn test_response_validation_error_reaches_the_handler() {
  setup_tracing();
  let mut builder = create_pet(json!({"id": "not-a-number"}));
  builder.validate_response(true);
  builder.set_error_handler(|err: FlowError, _ctx: Context| async move {
    let codes: Vec<String> = err
      .as_validation()
      .map(|v| v.errors.iter().map(|e| e.error_code.clone()).collect())
      .unwrap_or_default();
    Ok::<_, TestError>(json!(codes))
  });
  let outcome = builder.build().run(&context_for(valid_request())).await.unwrap();
  assert_eq!(outcome.into_value(), Some(json!(["schema.openapi.responseValidation"])));
}

#[tokio::test]
async fn test_response_schema_falls_back_to_status_class() {
  setup_tracing();
  let mut builder = Operation::builder(OperationKey::new("petstore", "v1", "createPet"));
  builder.set_schema(&pet_schema()).unwrap().validate_response(true);
  builder
    .push(Step::sync(|_value: Value, ctx: &Context| {
      ctx.response().set_status(409);
      Ok::<_, TestError>(json!({"message": "exists"}))
    }))
    .unwrap();
  let err = builder.build().run(&context_for(valid_request())).await.unwrap_err();
  assert_eq!(err.as_validation().unwrap().errors[0].error_code, "schema.openapi.responseValidation");
}

#[test]
fn test_malformed_schema_is_a_configuration_error() {
  let mut builder = Operation::builder(OperationKey::new("petstore", "v1", "broken"));
  let err = builder
    .set_schema(&json!({"parameters": [{"name": "a", "in": "cookie-jar"}]}))
    .unwrap_err();
  assert_eq!(err.name(), "ConfigurationError");
  assert!(err.to_string().contains("petstore/v1/broken"));
}

fn list_pets_schema() -> Value {
  json!({
    "operationId": "listPets",
    "parameters": [{"name": "limit", "in": "query", "schema": {"type": "integer"}}],
    "responses": {"200": {"content": {"application/json": {"schema": {"type": "array"}}}}}
  })
}

#[tokio::test]
async fn test_non_integer_limit_gets_type_code() {
  setup_tracing();
  let mut builder = Operation::builder(OperationKey::new("petstore", "v1", "listPets"));
  builder.set_schema(&list_pets_schema()).unwrap();
  builder.push(append_step("listed")).unwrap();

  let request = Request::get("/pets").with_query("limit", "ten");
  let err = builder.build().run(&context_for(request)).await.unwrap_err();
  let validation = err.as_validation().unwrap();
  assert_eq!(validation.status_code, 400);
  assert_eq!(validation.errors[0].path, "limit");
  assert_eq!(validation.errors[0].error_code, "type.openapi.requestValidation");
}

#[tokio::test]
async fn test_non_array_output_fails_array_response_schema() {
  setup_tracing();
  let mut builder = Operation::builder(OperationKey::new("petstore", "v1", "listPets"));
  builder.set_schema(&list_pets_schema()).unwrap().validate_response(true);
  builder
    .push(Step::sync(|_value: Value, _ctx: &Context| Ok::<_, TestError>(json!({"pets": []}))))
    .unwrap();

  let err = builder.build().run(&context_for(Request::get("/pets"))).await.unwrap_err();
  let validation = err.as_validation().unwrap();
  assert_eq!(validation.status_code, 500);
  assert_eq!(validation.response, Some(json!({"pets": []})));
  assert_eq!(validation.errors[0].error_code, "type.openapi.responseValidation");
}
