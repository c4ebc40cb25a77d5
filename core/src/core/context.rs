// opflow/src/core/context.rs

//! The per-execution `Context` shared by every step of one operation run.
//!
//! A `Context` is a cheap-clone handle. All clones see the same request, response,
//! cancellation token and scratchpad, so a step may attach derived data for
//! downstream steps to read. Concurrent executions each get their own instance.
//!
//! Lock guards returned here are `parking_lot` guards: blocking, and they MUST be
//! dropped before any `.await` suspension point.

use crate::core::cancel::CancellationToken;
use crate::datasource::{Datasource, DatasourceRequest, REQUEST_ID_HEADER};
use crate::error::{FlowError, FlowResult};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{event, info_span, Level, Span};

/// The inbound request as seen by validators and steps.
///
/// Query, path and header values usually arrive as strings; the request validator
/// coerces them to their declared types and fills in schema defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
  pub method: String,
  pub path: String,
  #[serde(default)]
  pub path_params: Map<String, Value>,
  #[serde(default)]
  pub query: Map<String, Value>,
  #[serde(default)]
  pub headers: Map<String, Value>,
  #[serde(default)]
  pub body: Value,
}

impl Request {
  pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
    Self {
      method: method.into(),
      path: path.into(),
      ..Default::default()
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new("GET", path)
  }

  pub fn post(path: impl Into<String>) -> Self {
    Self::new("POST", path)
  }

  pub fn with_query(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.query.insert(name.into(), value.into());
    self
  }

  pub fn with_path_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.path_params.insert(name.into(), value.into());
    self
  }

  /// Header names are stored lower-cased.
  pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<Value>) -> Self {
    self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
    self
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = body;
    self
  }

  pub fn header(&self, name: &str) -> Option<&Value> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v)
  }
}

#[derive(Debug, Default)]
struct ResponseState {
  status: Option<u16>,
  body: Option<Value>,
  finished: bool,
}

/// Side channel describing the outbound response.
///
/// When anything finishes the response (a step that streams its own reply, an
/// adapter that already answered), the operation stops its chain at the next
/// step boundary.
#[derive(Debug, Clone, Default)]
pub struct ResponseHandle {
  state: Arc<Mutex<ResponseState>>,
}

impl ResponseHandle {
  pub fn new() -> Self {
    Self::default()
  }

  /// Records status and body and marks the response finished.
  pub fn send(&self, status: u16, body: Value) {
    let mut state = self.state.lock();
    state.status = Some(status);
    state.body = Some(body);
    state.finished = true;
  }

  pub fn set_status(&self, status: u16) {
    self.state.lock().status = Some(status);
  }

  pub fn finish(&self) {
    self.state.lock().finished = true;
  }

  pub fn is_finished(&self) -> bool {
    self.state.lock().finished
  }

  pub fn status(&self) -> Option<u16> {
    self.state.lock().status
  }

  pub fn body(&self) -> Option<Value> {
    self.state.lock().body.clone()
  }
}

struct ContextInner {
  id: String,
  request: RwLock<Request>,
  response: ResponseHandle,
  cancel: CancellationToken,
  locals: RwLock<Map<String, Value>>,
  span: Span,
  datasource: RwLock<Option<Arc<dyn Datasource>>>,
}

#[derive(Clone)]
pub struct Context {
  inner: Arc<ContextInner>,
}

impl Context {
  /// A fresh context with a generated id, for `request`.
  pub fn new(request: Request) -> Self {
    Self::builder().request(request).build()
  }

  pub fn builder() -> ContextBuilder {
    ContextBuilder::default()
  }

  /// Request id; propagated to datasources as `x-request-id`.
  pub fn id(&self) -> &str {
    &self.inner.id
  }

  pub fn request(&self) -> RwLockReadGuard<'_, Request> {
    self.inner.request.read()
  }

  pub fn request_mut(&self) -> RwLockWriteGuard<'_, Request> {
    self.inner.request.write()
  }

  pub fn response(&self) -> &ResponseHandle {
    &self.inner.response
  }

  pub fn cancellation(&self) -> &CancellationToken {
    &self.inner.cancel
  }

  pub fn cancel(&self, reason: impl Into<String>) {
    self.inner.cancel.cancel(reason);
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.cancel.is_cancelled()
  }

  /// The execution's tracing span; the context's logger.
  pub fn span(&self) -> &Span {
    &self.inner.span
  }

  // --- Scratchpad ---

  pub fn local(&self, key: &str) -> Option<Value> {
    self.inner.locals.read().get(key).cloned()
  }

  pub fn set_local(&self, key: impl Into<String>, value: Value) -> Option<Value> {
    self.inner.locals.write().insert(key.into(), value)
  }

  pub fn remove_local(&self, key: &str) -> Option<Value> {
    self.inner.locals.write().remove(key)
  }

  /// Runs `f` with write access to the whole scratchpad.
  pub fn with_locals<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
    f(&mut self.inner.locals.write())
  }

  // --- Datasource ---

  pub(crate) fn attach_datasource(&self, datasource: Arc<dyn Datasource>) {
    *self.inner.datasource.write() = Some(datasource);
  }

  pub fn has_datasource(&self) -> bool {
    self.inner.datasource.read().is_some()
  }

  /// Calls the operation's datasource, racing it against this execution's
  /// cancellation token. A cancelled execution settles with `CancelError`.
  pub async fn datasource_request(&self, overrides: Option<Value>) -> FlowResult<Value> {
    let datasource = self
      .inner
      .datasource
      .read()
      .clone()
      .ok_or_else(|| FlowError::not_found(format!("datasource for request '{}'", self.id())))?;

    let resolve_body_only = overrides
      .as_ref()
      .and_then(|o| o.get("resolveBodyOnly"))
      .and_then(Value::as_bool)
      .unwrap_or(true);
    let mut headers = Map::new();
    headers.insert(REQUEST_ID_HEADER.to_string(), Value::String(self.id().to_string()));
    let request = DatasourceRequest {
      headers,
      resolve_body_only,
      overrides,
    };

    event!(parent: self.span(), Level::DEBUG, request_id = %self.id(), "Issuing datasource request.");
    let token = self.inner.cancel.clone();
    token.or_cancel(datasource.request(request, token.clone())).await
  }
}

impl std::fmt::Debug for Context {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Context")
      .field("id", &self.inner.id)
      .field("request", &*self.inner.request.read())
      .field("response", &self.inner.response)
      .field("cancel", &self.inner.cancel)
      .finish()
  }
}

/// Builder used by route adapters to create one context per request.
#[derive(Default)]
pub struct ContextBuilder {
  id: Option<String>,
  request: Request,
  response: Option<ResponseHandle>,
  cancel: Option<CancellationToken>,
  locals: Map<String, Value>,
  span: Option<Span>,
}

impl ContextBuilder {
  pub fn id(mut self, id: impl Into<String>) -> Self {
    self.id = Some(id.into());
    self
  }

  pub fn request(mut self, request: Request) -> Self {
    self.request = request;
    self
  }

  pub fn response(mut self, response: ResponseHandle) -> Self {
    self.response = Some(response);
    self
  }

  /// Supplies a token the adapter already wired to abort/timeout listeners.
  pub fn cancellation(mut self, token: CancellationToken) -> Self {
    self.cancel = Some(token);
    self
  }

  pub fn local(mut self, key: impl Into<String>, value: Value) -> Self {
    self.locals.insert(key.into(), value);
    self
  }

  pub fn span(mut self, span: Span) -> Self {
    self.span = Some(span);
    self
  }

  pub fn build(self) -> Context {
    let id = self.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let span = self
      .span
      .unwrap_or_else(|| info_span!("request", request_id = %id, method = %self.request.method, path = %self.request.path));
    Context {
      inner: Arc::new(ContextInner {
        id,
        request: RwLock::new(self.request),
        response: self.response.unwrap_or_default(),
        cancel: self.cancel.unwrap_or_default(),
        locals: RwLock::new(self.locals),
        span,
        datasource: RwLock::new(None),
      }),
    }
  }
}
