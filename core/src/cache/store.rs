// opflow/src/cache/store.rs

//! Backing stores for [`CachedStep`](super::CachedStep).

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A key-addressed value store. Implementations decide eviction.
pub trait CacheStore: Send + Sync {
  fn get(&self, key: &str) -> Option<Value>;
  fn has(&self, key: &str) -> bool;
  fn set(&self, key: String, value: Value);
  fn delete(&self, key: &str) -> bool;
  fn clear(&self);
  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

struct Entry {
  value: Value,
  last_access: u64,
  inserted_at: Instant,
}

struct LruState {
  map: HashMap<String, Entry>,
  // monotonically increasing access counter
  counter: u64,
}

/// Bounded store with least-recently-used eviction and optional lazy expiry.
///
/// Expired entries are dropped when read, never by a timer.
pub struct LruStore {
  state: Mutex<LruState>,
  capacity: usize,
  max_age: Option<Duration>,
}

impl LruStore {
  pub fn new(capacity: usize, max_age: Option<Duration>) -> Self {
    Self {
      state: Mutex::new(LruState {
        map: HashMap::with_capacity(capacity.min(1024)),
        counter: 0,
      }),
      capacity: capacity.max(1),
      max_age,
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn max_age(&self) -> Option<Duration> {
    self.max_age
  }

  fn is_expired(&self, entry: &Entry) -> bool {
    self.max_age.is_some_and(|age| entry.inserted_at.elapsed() > age)
  }

  fn evict_lru(state: &mut LruState) {
    let oldest_key = state
      .map
      .iter()
      .min_by_key(|(_, entry)| entry.last_access)
      .map(|(k, _)| k.clone());

    if let Some(key) = oldest_key {
      state.map.remove(&key);
    }
  }
}

impl CacheStore for LruStore {
  fn get(&self, key: &str) -> Option<Value> {
    let mut state = self.state.lock();
    let expired = self.is_expired(state.map.get(key)?);
    if expired {
      state.map.remove(key);
      return None;
    }
    state.counter += 1;
    let order = state.counter;
    let entry = state.map.get_mut(key)?;
    entry.last_access = order;
    Some(entry.value.clone())
  }

  fn has(&self, key: &str) -> bool {
    let mut state = self.state.lock();
    let expired = match state.map.get(key) {
      Some(entry) => self.is_expired(entry),
      None => return false,
    };
    if expired {
      state.map.remove(key);
    }
    !expired
  }

  fn set(&self, key: String, value: Value) {
    let mut state = self.state.lock();
    state.counter += 1;
    if state.map.len() >= self.capacity && !state.map.contains_key(&key) {
      Self::evict_lru(&mut state);
    }
    let last_access = state.counter;
    state.map.insert(
      key,
      Entry {
        value,
        last_access,
        inserted_at: Instant::now(),
      },
    );
  }

  fn delete(&self, key: &str) -> bool {
    self.state.lock().map.remove(key).is_some()
  }

  fn clear(&self) {
    let mut state = self.state.lock();
    state.map.clear();
    state.counter = 0;
  }

  fn len(&self) -> usize {
    self.state.lock().map.len()
  }
}
