// tests/common/mod.rs
#![allow(dead_code)] // Allow unused code in this common test module

use async_trait::async_trait;
use opflow::{CancellationToken, Context, Datasource, DatasourceRequest, FlowResult, Request, Step};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::time::Duration;
use tracing::Level;

// --- Common Error Type for Tests ---
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TestError {
  #[error("Test step failed: {0}")]
  Step(String),

  #[error("Test datasource failed: {0}")]
  Datasource(String),
}

// --- Context helpers ---
pub fn test_context() -> Context {
  Context::new(Request::get("/test"))
}

pub fn context_for(request: Request) -> Context {
  Context::builder().request(request).build()
}

// --- Common Step Creators ---

/// Appends `tag` to the array carried in the value (starting a new one from `null`).
pub fn append_step(tag: &'static str) -> Step {
  Step::sync(move |value: Value, _ctx: &Context| {
    let mut items = match value {
      Value::Array(items) => items,
      Value::Null => Vec::new(),
      other => vec![other],
    };
    items.push(json!(tag));
    Ok::<_, TestError>(Value::Array(items))
  })
  .named(tag)
}

/// Async variant of [`append_step`] that sleeps first, to shuffle completion order.
pub fn delayed_append_step(tag: &'static str, delay_ms: u64) -> Step {
  Step::func(move |value: Value, _ctx: Context| async move {
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    let mut items = value.as_array().cloned().unwrap_or_default();
    items.push(json!(tag));
    Ok::<_, TestError>(Value::Array(items))
  })
  .named(tag)
}

pub fn failing_step(message: &'static str) -> Step {
  Step::sync(move |_value: Value, _ctx: &Context| Err::<Value, _>(TestError::Step(message.to_string()))).named("failing")
}

/// A step that bumps `counter` each time it runs, then echoes its input.
pub fn counting_step(counter: Arc<AtomicUsize>) -> Step {
  Step::sync(move |value: Value, _ctx: &Context| {
    counter.fetch_add(1, Ordering::SeqCst);
    Ok::<_, TestError>(value)
  })
  .named("counting")
}

// --- Datasource ---

/// Records every request it receives and answers after `delay`.
pub struct MockDatasource {
  pub delay: Duration,
  pub response: Value,
  pub calls: AtomicUsize,
  pub seen: Mutex<Vec<DatasourceRequest>>,
}

impl MockDatasource {
  pub fn new(response: Value) -> Self {
    Self {
      delay: Duration::ZERO,
      response,
      calls: AtomicUsize::new(0),
      seen: Mutex::new(Vec::new()),
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn call_count(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Datasource for MockDatasource {
  async fn request(&self, request: DatasourceRequest, _cancel: CancellationToken) -> FlowResult<Value> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.seen.lock().push(request);
    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }
    Ok(self.response.clone())
  }
}

// --- Helper for Tracing Setup (call once per test run if needed) ---
use once_cell::sync::Lazy;
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer() // Important for tests to capture output
    .try_init()
    .ok(); // Allow multiple initializations in tests (ok if fails)
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

// --- Atomic counters for checking execution counts ---
pub static STEP_EXEC_COUNTER: Lazy<Arc<AtomicUsize>> = Lazy::new(|| Arc::new(AtomicUsize::new(0)));
pub static HANDLER_EXEC_COUNTER: Lazy<Arc<AtomicUsize>> = Lazy::new(|| Arc::new(AtomicUsize::new(0)));

pub fn reset_counters() {
  STEP_EXEC_COUNTER.store(0, Ordering::SeqCst);
  HANDLER_EXEC_COUNTER.store(0, Ordering::SeqCst);
}
