// opflow/src/service/template.rs

//! Declarative service configuration, deserialized with serde.

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_true() -> bool {
  true
}

/// A service and the operations it exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDocument {
  pub id: String,
  #[serde(default)]
  pub operations: Vec<OperationTemplate>,
}

/// One operation of a service.
///
/// Without `version`, the template is materialized in every API version, each
/// replica inheriting from the previous version's unless `inherit` is `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationTemplate {
  pub operation_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  #[serde(default = "default_true")]
  pub inherit: bool,
  #[serde(default)]
  pub private: bool,
  #[serde(default = "default_true")]
  pub validate_request: bool,
  #[serde(default)]
  pub validate_response: bool,
}

impl OperationTemplate {
  pub fn new(operation_id: impl Into<String>) -> Self {
    Self {
      operation_id: operation_id.into(),
      version: None,
      inherit: true,
      private: false,
      validate_request: true,
      validate_response: false,
    }
  }

  pub fn in_version(mut self, version: impl Into<String>) -> Self {
    self.version = Some(version.into());
    self
  }

  pub fn inherit(mut self, inherit: bool) -> Self {
    self.inherit = inherit;
    self
  }

  pub fn private(mut self, private: bool) -> Self {
    self.private = private;
    self
  }

  pub fn validate_request(mut self, on: bool) -> Self {
    self.validate_request = on;
    self
  }

  pub fn validate_response(mut self, on: bool) -> Self {
    self.validate_response = on;
    self
  }
}

/// One API version and its OpenAPI/Swagger document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiDefinition {
  pub version: String,
  pub document: Value,
}

impl ApiDefinition {
  pub fn new(version: impl Into<String>, document: Value) -> Self {
    Self {
      version: version.into(),
      document,
    }
  }
}
