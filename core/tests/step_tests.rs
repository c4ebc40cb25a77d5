// tests/step_tests.rs
mod common;

use common::*;
use opflow::{Context, Done, FlowError, Step};
use serde_json::{json, Value};
use std::time::Duration;

#[tokio::test]
async fn test_literal_step_resolves_with_its_value() {
  setup_tracing();
  let ctx = test_context();
  let step = Step::value(json!({"a": 1}));
  assert_eq!(step.run(&ctx, json!("ignored")).await.unwrap(), json!({"a": 1}));
}

#[tokio::test]
async fn test_sync_step_error_rejects_instead_of_raising() {
  setup_tracing();
  let ctx = test_context();
  let step = failing_step("boom");
  // building the future must not surface the error
  let fut = step.run(&ctx, Value::Null);
  let err = fut.await.unwrap_err();
  assert_eq!(err.name(), "StepError");
  assert_eq!(err.downcast_ref::<TestError>(), Some(&TestError::Step("boom".into())));
}

#[tokio::test]
async fn test_async_step_receives_value_and_context() {
  setup_tracing();
  let ctx = test_context();
  ctx.set_local("factor", json!(3));
  let step = Step::func(|value: Value, ctx: Context| async move {
    let factor = ctx.local("factor").and_then(|f| f.as_i64()).unwrap_or(1);
    Ok::<_, TestError>(json!(value.as_i64().unwrap_or(0) * factor))
  });
  assert_eq!(step.run(&ctx, json!(7)).await.unwrap(), json!(21));
}

#[tokio::test]
async fn test_callback_step_settles_through_done() {
  setup_tracing();
  let ctx = test_context();
  let ok = Step::callback(|value: Value, _ctx: Context, done: Done| {
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(5)).await;
      done.resolve(json!([value, "cb"]));
    });
  });
  assert_eq!(ok.run(&ctx, json!(1)).await.unwrap(), json!([1, "cb"]));

  let failing = Step::callback(|_value: Value, _ctx: Context, done: Done| {
    done.reject(TestError::Step("callback failed".into()));
  });
  let err = failing.run(&ctx, Value::Null).await.unwrap_err();
  assert_eq!(err.downcast_ref::<TestError>(), Some(&TestError::Step("callback failed".into())));
}

#[tokio::test]
async fn test_callback_step_dropping_done_is_an_internal_error() {
  setup_tracing();
  let ctx = test_context();
  let step = Step::callback(|_value: Value, _ctx: Context, done: Done| drop(done));
  let err = step.run(&ctx, Value::Null).await.unwrap_err();
  assert!(matches!(err, FlowError::Internal(_)));
}

#[tokio::test]
async fn test_all_conventions_compose_in_order() {
  setup_tracing();
  let ctx = test_context();
  let steps = vec![
    Step::value(json!([])),
    delayed_append_step("slow", 20),
    append_step("sync"),
    Step::callback(|value: Value, _ctx: Context, done: Done| {
      let mut items = value.as_array().cloned().unwrap_or_default();
      items.push(json!("callback"));
      done.resolve(Value::Array(items));
    }),
    delayed_append_step("fast", 1),
  ];

  let mut value = Value::Null;
  for step in &steps {
    value = step.run(&ctx, value).await.unwrap();
  }
  assert_eq!(value, json!(["slow", "sync", "callback", "fast"]));
}
