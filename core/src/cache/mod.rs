// opflow/src/cache/mod.rs

//! The cache decorator: wraps any step behind a key-addressed store.
//!
//! Concurrent misses for the same key are not de-duplicated. Each miss runs the
//! wrapped step, and the last one to finish wins the slot.

pub mod store;

pub use store::{CacheStore, LruStore};

use crate::core::context::Context;
use crate::core::step::{IntoStep, Step, StepFunction};
use crate::error::{FlowError, FlowResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{event, Level};

/// Derives the cache key from a step's input and context.
pub type Normalizer = Arc<dyn Fn(&Value, &Context) -> String + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheOptions {
  /// Maximum number of entries; the least recently used one is evicted beyond it.
  pub max_size: usize,
  /// Entries older than this are treated as misses.
  #[serde(default)]
  pub max_age: Option<Duration>,
}

impl Default for CacheOptions {
  fn default() -> Self {
    Self {
      max_size: 500,
      max_age: None,
    }
  }
}

impl CacheOptions {
  pub fn max_size(mut self, max_size: usize) -> Self {
    self.max_size = max_size;
    self
  }

  pub fn max_age(mut self, max_age: Duration) -> Self {
    self.max_age = Some(max_age);
    self
  }
}

/// A step whose successful results are memoized by normalized key.
#[derive(Clone)]
pub struct CachedStep {
  inner: Step,
  normalizer: Normalizer,
  store: Arc<dyn CacheStore>,
}

/// Wraps `step` with an [`LruStore`] configured by `options`.
pub fn cache<S, N>(step: S, normalizer: N, options: CacheOptions) -> FlowResult<CachedStep>
where
  S: IntoStep,
  N: Fn(&Value, &Context) -> String + Send + Sync + 'static,
{
  if options.max_size == 0 {
    return Err(FlowError::configuration("cache", "max_size must be at least 1"));
  }
  let store = Arc::new(LruStore::new(options.max_size, options.max_age));
  CachedStep::with_store(step, normalizer, store)
}

impl CachedStep {
  /// Wraps `step` with a caller-supplied store.
  pub fn with_store<S, N>(step: S, normalizer: N, store: Arc<dyn CacheStore>) -> FlowResult<Self>
  where
    S: IntoStep,
    N: Fn(&Value, &Context) -> String + Send + Sync + 'static,
  {
    let inner = step
      .into_step()
      .ok_or_else(|| FlowError::configuration("cache", "wrapped step is undefined"))?;
    Ok(Self {
      inner,
      normalizer: Arc::new(normalizer),
      store,
    })
  }

  pub fn store(&self) -> &Arc<dyn CacheStore> {
    &self.store
  }

  pub fn invalidate(&self, key: &str) -> bool {
    self.store.delete(key)
  }

  pub fn clear(&self) {
    self.store.clear();
  }
}

#[async_trait]
impl StepFunction for CachedStep {
  async fn call(&self, value: Value, ctx: &Context) -> FlowResult<Value> {
    let key = (self.normalizer)(&value, ctx);
    if let Some(hit) = self.store.get(&key) {
      event!(Level::TRACE, cache_key = %key, "Cache hit.");
      return Ok(hit);
    }
    event!(Level::TRACE, cache_key = %key, "Cache miss.");
    // failures propagate without touching the store
    let computed = self.inner.run(ctx, value).await?;
    self.store.set(key, computed.clone());
    Ok(computed)
  }
}

impl IntoStep for CachedStep {
  fn into_step(self) -> Option<Step> {
    Some(Step::nested(self).named("cache"))
  }
}
