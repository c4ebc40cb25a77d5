// opflow/src/service/version.rs

//! Built versions and the service that dispatches to them.

use crate::core::context::Context;
use crate::core::control::RunOutcome;
use crate::error::{FlowError, FlowResult};
use crate::operation::Operation;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{event, instrument, Level};

/// One API version: its operations in registration order.
#[derive(Debug, Clone)]
pub struct Version {
  pub(crate) id: String,
  pub(crate) operation_ids: Vec<String>,
  pub(crate) operations: HashMap<String, Arc<Operation>>,
}

impl Version {
  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn operation_ids(&self) -> &[String] {
    &self.operation_ids
  }

  pub fn operation(&self, operation_id: &str) -> Option<&Arc<Operation>> {
    self.operations.get(operation_id)
  }

  /// Operations not marked private, in registration order.
  pub fn public_operations(&self) -> impl Iterator<Item = &Arc<Operation>> {
    self
      .operation_ids
      .iter()
      .filter_map(|id| self.operations.get(id))
      .filter(|op| !op.is_private())
  }

  pub fn len(&self) -> usize {
    self.operation_ids.len()
  }

  pub fn is_empty(&self) -> bool {
    self.operation_ids.is_empty()
  }
}

/// A frozen service. Cheap to share behind an `Arc`; running never mutates it.
#[derive(Debug, Clone)]
pub struct Service {
  pub(crate) id: String,
  pub(crate) versions: Vec<Version>,
}

impl Service {
  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn version(&self, id: &str) -> Option<&Version> {
    self.versions.iter().find(|v| v.id == id)
  }

  pub fn version_ids(&self) -> Vec<&str> {
    self.versions.iter().map(|v| v.id.as_str()).collect()
  }

  pub fn versions(&self) -> &[Version] {
    &self.versions
  }

  pub fn operation(&self, version: &str, operation_id: &str) -> Option<&Arc<Operation>> {
    self.version(version)?.operation(operation_id)
  }

  pub async fn run(&self, version: &str, operation_id: &str, ctx: &Context) -> FlowResult<RunOutcome> {
    self.run_with(version, operation_id, ctx, Value::Null).await
  }

  #[instrument(name = "Service::run", skip(self, ctx, input), fields(service = %self.id), err(Display))]
  pub async fn run_with(
    &self,
    version: &str,
    operation_id: &str,
    ctx: &Context,
    input: Value,
  ) -> FlowResult<RunOutcome> {
    let operation = self.operation(version, operation_id).cloned().ok_or_else(|| {
      event!(Level::ERROR, version, operation_id, "No such operation.");
      FlowError::not_found(format!("operation '{}/{}/{}'", self.id, version, operation_id))
    })?;
    operation.run_with(ctx, input).await
  }
}
