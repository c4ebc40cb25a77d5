// opflow/src/datasource.rs

//! The seam to the HTTP-client/datasource layer.
//!
//! opflow does not perform network calls itself. A datasource compiled elsewhere
//! from a declarative request template implements [`Datasource`]; the engine calls
//! it for operations with an empty chain and exposes it to steps through
//! [`Context::datasource_request`](crate::Context::datasource_request).

use crate::core::cancel::CancellationToken;
use crate::error::FlowResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Header carrying the execution id to downstream services.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceRequest {
  /// Always contains [`REQUEST_ID_HEADER`].
  pub headers: Map<String, Value>,
  /// `true`: resolve with the body only. `false`: resolve with the full response.
  pub resolve_body_only: bool,
  /// Caller-supplied overrides of the compiled request template.
  pub overrides: Option<Value>,
}

impl DatasourceRequest {
  pub fn request_id(&self) -> Option<&str> {
    self.headers.get(REQUEST_ID_HEADER).and_then(Value::as_str)
  }
}

#[async_trait]
pub trait Datasource: Send + Sync {
  /// Performs the request. Implementations doing real I/O should stop early when
  /// `cancel` fires; the engine additionally races the returned future against it.
  async fn request(&self, request: DatasourceRequest, cancel: CancellationToken) -> FlowResult<Value>;
}
