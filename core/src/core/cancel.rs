// opflow/src/core/cancel.rs

//! Cooperative cancellation for a single execution.
//!
//! The engine never preempts a step. Long-running work (typically an outbound
//! request made through a datasource) observes the token and aborts by failing
//! with a `CancelError`.

use crate::error::{CancelError, FlowError, FlowResult};
use futures::future::{self, Either};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{event, Level};

pub type CancelCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct TokenState {
  cancelled: AtomicBool,
  // first reason wins
  reason: RwLock<Option<String>>,
  callbacks: RwLock<Vec<CancelCallback>>,
  notify: Notify,
}

/// A shared handle for requesting and observing cancellation.
///
/// Cloning is cheap; all clones observe the same state.
#[derive(Clone, Default)]
pub struct CancellationToken {
  state: Arc<TokenState>,
}

impl CancellationToken {
  pub fn new() -> Self {
    Self::default()
  }

  /// Requests cancellation. Idempotent: only the first reason is kept and
  /// callbacks run once. A panicking callback is logged and suppressed.
  pub fn cancel(&self, reason: impl Into<String>) {
    if self
      .state
      .cancelled
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      return;
    }
    let reason = reason.into();
    event!(Level::DEBUG, %reason, "Cancellation requested.");
    *self.state.reason.write() = Some(reason);
    self.state.notify.notify_waiters();

    let callbacks = std::mem::take(&mut *self.state.callbacks.write());
    for callback in callbacks.iter() {
      run_callback(callback.as_ref());
    }
  }

  /// Registers a callback for cancellation. Runs it immediately if the token
  /// is already cancelled.
  pub fn on_cancel<F>(&self, callback: F)
  where
    F: Fn() + Send + Sync + 'static,
  {
    if self.is_cancelled() {
      run_callback(&callback);
      return;
    }
    let mut callbacks = self.state.callbacks.write();
    // cancel() may have drained the list between the check and the lock
    if self.is_cancelled() {
      drop(callbacks);
      run_callback(&callback);
    } else {
      callbacks.push(Box::new(callback));
    }
  }

  pub fn is_cancelled(&self) -> bool {
    self.state.cancelled.load(Ordering::SeqCst)
  }

  pub fn reason(&self) -> Option<String> {
    self.state.reason.read().clone()
  }

  /// `Err(CancelError)` once cancellation has been requested.
  pub fn check(&self) -> Result<(), CancelError> {
    if self.is_cancelled() {
      Err(self.cancel_error())
    } else {
      Ok(())
    }
  }

  /// Resolves once cancellation is requested.
  pub async fn cancelled(&self) {
    // A Notified future receives notify_waiters() wakeups from the moment it is
    // created, so creating it before the flag check closes the race.
    let notified = self.state.notify.notified();
    if self.is_cancelled() {
      return;
    }
    notified.await;
  }

  /// Races `fut` against cancellation. If cancellation wins, `fut` is dropped
  /// and the result is a `CancelError`.
  pub async fn or_cancel<F, T>(&self, fut: F) -> FlowResult<T>
  where
    F: Future<Output = FlowResult<T>>,
  {
    self.check()?;
    let work = Box::pin(fut);
    let cancelled = Box::pin(self.cancelled());
    match future::select(work, cancelled).await {
      Either::Left((result, _)) => result,
      Either::Right(((), _)) => {
        event!(Level::DEBUG, "In-flight work abandoned after cancellation.");
        Err(FlowError::Cancelled(self.cancel_error()))
      }
    }
  }

  fn cancel_error(&self) -> CancelError {
    CancelError::new(self.reason().unwrap_or_else(|| "cancelled".to_string()))
  }
}

fn run_callback(callback: &(dyn Fn() + Send + Sync)) {
  if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)) {
    event!(Level::WARN, "Cancellation callback panicked: {:?}", e);
  }
}

impl std::fmt::Debug for CancellationToken {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CancellationToken")
      .field("cancelled", &self.is_cancelled())
      .field("reason", &self.reason())
      .finish()
  }
}
