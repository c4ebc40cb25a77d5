// opflow/src/schema/openapi.rs

//! Compiles an OpenAPI 3 / Swagger 2 operation object into request and response
//! validators.

use super::compiled::{CheckKind, CompiledSchema, DocumentScope};
use super::OperationValidator;
use crate::core::context::Request;
use crate::error::{FieldError, FlowError, FlowResult, ValidationError};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::{event, Level};

const HTTP_METHODS: &[&str] = &["get", "put", "post", "delete", "options", "head", "patch", "trace"];

// Parameter keys that describe the parameter rather than its value (Swagger 2
// inlines the value schema next to them).
const PARAMETER_META_KEYS: &[&str] = &[
  "name",
  "in",
  "required",
  "description",
  "allowEmptyValue",
  "collectionFormat",
  "style",
  "explode",
  "deprecated",
  "example",
  "examples",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
  Query,
  Path,
  Header,
}

impl Location {
  fn as_str(self) -> &'static str {
    match self {
      Location::Query => "query",
      Location::Path => "path",
      Location::Header => "header",
    }
  }
}

struct CompiledParameter {
  name: String,
  location: Location,
  required: bool,
  schema: CompiledSchema,
}

struct CompiledBody {
  required: bool,
  schema: CompiledSchema,
}

/// Request/response validator compiled from one OpenAPI operation object.
///
/// Rebuilt wholesale from its schema; there is no incremental update.
pub struct JsonSchemaValidator {
  parameters: Vec<CompiledParameter>,
  body: Option<CompiledBody>,
  responses: HashMap<String, CompiledSchema>,
}

fn meta_schema() -> Value {
  json!({
    "type": "object",
    "properties": {
      "operationId": { "type": "string" },
      "parameters": {
        "type": "array",
        "items": {
          "type": "object",
          "required": ["name", "in"],
          "properties": {
            "name": { "type": "string" },
            "in": { "enum": ["query", "path", "header", "cookie", "body", "formData"] },
            "required": { "type": "boolean" },
            "schema": { "type": "object" }
          }
        }
      },
      "requestBody": {
        "type": "object",
        "properties": {
          "required": { "type": "boolean" },
          "content": { "type": "object" }
        }
      },
      "responses": {
        "type": "object",
        "additionalProperties": { "type": "object" }
      }
    }
  })
}

fn check_shape(schema: &Value) -> FlowResult<()> {
  let meta = jsonschema::validator_for(&meta_schema())
    .map_err(|e| FlowError::Internal(format!("operation meta-schema failed to compile: {}", e)))?;
  let problems: Vec<String> = meta.iter_errors(schema).map(|e| e.to_string()).collect();
  if problems.is_empty() {
    Ok(())
  } else {
    Err(FlowError::configuration(
      "schema",
      format!("malformed operation schema: {}", problems.join("; ")),
    ))
  }
}

/// The value schema of a parameter: `schema` (OpenAPI 3) or the inlined keys (Swagger 2).
fn parameter_schema(parameter: &Value) -> Value {
  if let Some(schema) = parameter.get("schema") {
    return schema.clone();
  }
  let inline: Map<String, Value> = parameter
    .as_object()
    .map(|obj| {
      obj
        .iter()
        .filter(|(k, _)| !PARAMETER_META_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
    })
    .unwrap_or_default();
  Value::Object(inline)
}

/// `content["application/json"].schema`, else the first media type's schema.
fn content_schema(holder: &Value) -> Option<&Value> {
  let content = holder.get("content")?.as_object()?;
  content
    .get("application/json")
    .or_else(|| content.values().next())
    .and_then(|media| media.get("schema"))
}

impl JsonSchemaValidator {
  /// Compiles `schema`, an operation object with `parameters`, `requestBody`
  /// and `responses`. It is read as OpenAPI 3.0 / Swagger 2 and may not use `$ref`.
  pub fn compile(schema: &Value) -> FlowResult<Self> {
    Self::compile_scoped(schema, &DocumentScope::standalone())
  }

  /// Compiles an operation object taken from `document`. Local `$ref`s resolve
  /// against the document, and its `openapi`/`swagger` version picks the draft.
  pub fn compile_in(schema: &Value, document: &Value) -> FlowResult<Self> {
    Self::compile_scoped(schema, &DocumentScope::of(document))
  }

  fn compile_scoped(schema: &Value, scope: &DocumentScope) -> FlowResult<Self> {
    check_shape(schema)?;

    let mut parameters = Vec::new();
    let mut body = None;
    for parameter in schema.get("parameters").and_then(Value::as_array).into_iter().flatten() {
      let name = parameter["name"].as_str().unwrap_or_default().to_string();
      let required = parameter.get("required").and_then(Value::as_bool).unwrap_or(false);
      let location = match parameter["in"].as_str() {
        Some("query") => Location::Query,
        Some("path") => Location::Path,
        Some("header") => Location::Header,
        Some("body") => {
          let compiled = CompiledSchema::compile(&parameter_schema(parameter), "body", scope)?;
          body = Some(CompiledBody {
            required,
            schema: compiled,
          });
          continue;
        }
        Some(other) => {
          event!(Level::DEBUG, parameter = %name, location = other, "Parameter location not validated.");
          continue;
        }
        None => continue,
      };
      let compiled = CompiledSchema::compile(&parameter_schema(parameter), &format!("parameter '{}'", name), scope)?;
      parameters.push(CompiledParameter {
        name,
        location,
        required: required || location == Location::Path,
        schema: compiled,
      });
    }

    if let Some(request_body) = schema.get("requestBody") {
      if let Some(body_schema) = content_schema(request_body) {
        body = Some(CompiledBody {
          required: request_body.get("required").and_then(Value::as_bool).unwrap_or(false),
          schema: CompiledSchema::compile(body_schema, "request body", scope)?,
        });
      }
    }

    let mut responses = HashMap::new();
    for (status, response) in schema.get("responses").and_then(Value::as_object).into_iter().flatten() {
      let declared = response.get("schema").or_else(|| content_schema(response));
      if let Some(declared) = declared {
        let compiled = CompiledSchema::compile(declared, &format!("response '{}'", status), scope)?;
        responses.insert(status.to_ascii_uppercase(), compiled);
      }
    }

    event!(
      Level::DEBUG,
      parameters = parameters.len(),
      has_body = body.is_some(),
      responses = responses.len(),
      "Operation schema compiled."
    );
    Ok(Self {
      parameters,
      body,
      responses,
    })
  }

  fn response_schema(&self, status: u16) -> Option<&CompiledSchema> {
    self
      .responses
      .get(&status.to_string())
      .or_else(|| self.responses.get(&format!("{}XX", status / 100)))
      .or_else(|| self.responses.get("DEFAULT"))
  }
}

fn request_code(kind: CheckKind) -> String {
  format!("{}.openapi.requestValidation", kind.as_str())
}

fn response_code(kind: CheckKind) -> String {
  format!("{}.openapi.responseValidation", kind.as_str())
}

impl OperationValidator for JsonSchemaValidator {
  fn validate_request(&self, request: &mut Request) -> Result<(), ValidationError> {
    let mut errors = Vec::new();

    for parameter in &self.parameters {
      let values = match parameter.location {
        Location::Query => &mut request.query,
        Location::Path => &mut request.path_params,
        Location::Header => &mut request.headers,
      };
      let present_key = match parameter.location {
        Location::Header => values.keys().find(|k| k.eq_ignore_ascii_case(&parameter.name)).cloned(),
        _ => values.contains_key(&parameter.name).then(|| parameter.name.clone()),
      };
      let location = parameter.location.as_str();

      let Some(key) = present_key else {
        if let Some(default) = parameter.schema.raw().get("default") {
          let key = match parameter.location {
            Location::Header => parameter.name.to_ascii_lowercase(),
            _ => parameter.name.clone(),
          };
          values.insert(key, default.clone());
        } else if parameter.required {
          errors.push(FieldError::new(
            &parameter.name,
            location,
            format!("must have required property '{}'", parameter.name),
            request_code(CheckKind::Required),
          ));
        }
        continue;
      };

      let raw = values.remove(&key).unwrap_or(Value::Null);
      let coerced = coerce(raw, parameter.schema.raw());
      for (kind, message) in parameter.schema.check(&coerced) {
        errors.push(FieldError::new(&parameter.name, location, message, request_code(kind)));
      }
      values.insert(key, coerced);
    }

    if let Some(body) = &self.body {
      if request.body.is_null() {
        if let Some(default) = body.schema.raw().get("default") {
          request.body = default.clone();
        } else if body.required {
          errors.push(FieldError::new(
            "body",
            "body",
            "request body is required",
            request_code(CheckKind::Required),
          ));
        }
      } else {
        for (kind, message) in body.schema.check(&request.body) {
          errors.push(FieldError::new("body", "body", message, request_code(kind)));
        }
      }
    }

    if errors.is_empty() {
      Ok(())
    } else {
      Err(ValidationError::request(errors))
    }
  }

  fn validate_response(&self, body: &Value, status: u16) -> Result<(), ValidationError> {
    let Some(schema) = self.response_schema(status) else {
      return Ok(());
    };
    let errors: Vec<FieldError> = schema
      .check(body)
      .into_iter()
      .map(|(kind, message)| FieldError::new("response", "response", message, response_code(kind)))
      .collect();
    if errors.is_empty() {
      Ok(())
    } else {
      Err(ValidationError::response(errors, body.clone()))
    }
  }
}

/// Coerces a string parameter to its declared scalar/array type. Repeated
/// parameters arrive as arrays and are coerced item by item. Values that do
/// not parse are left untouched so the type check reports them.
fn coerce(value: Value, schema: &Value) -> Value {
  let declared = schema.get("type").and_then(Value::as_str);
  let text = match value {
    Value::String(text) => text,
    Value::Array(values) if declared == Some("array") => {
      let items = schema.get("items").cloned().unwrap_or(Value::Null);
      return Value::Array(values.into_iter().map(|value| coerce(value, &items)).collect());
    }
    other => return other,
  };
  match declared {
    Some("integer") => match text.trim().parse::<i64>() {
      Ok(n) => Value::from(n),
      Err(_) => Value::String(text),
    },
    Some("number") => match text.trim().parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
      Some(n) => Value::Number(n),
      None => Value::String(text),
    },
    Some("boolean") => match text.as_str() {
      "true" => Value::Bool(true),
      "false" => Value::Bool(false),
      _ => Value::String(text),
    },
    Some("array") => {
      let items = schema.get("items").cloned().unwrap_or(Value::Null);
      Value::Array(
        text
          .split(',')
          .map(|part| coerce(Value::String(part.to_string()), &items))
          .collect(),
      )
    }
    _ => Value::String(text),
  }
}

/// Finds the operation object with `operation_id` in an OpenAPI document.
///
/// Path-level `parameters` are merged in unless the operation overrides them
/// (same `name` and `in`).
pub fn find_operation(document: &Value, operation_id: &str) -> Option<Value> {
  let paths = document.get("paths")?.as_object()?;
  for path_item in paths.values() {
    for method in HTTP_METHODS {
      let Some(operation) = path_item.get(*method) else {
        continue;
      };
      if operation.get("operationId").and_then(Value::as_str) != Some(operation_id) {
        continue;
      }
      let mut merged = operation.clone();
      if let Some(shared) = path_item.get("parameters").and_then(Value::as_array) {
        let own: Vec<Value> = operation
          .get("parameters")
          .and_then(Value::as_array)
          .cloned()
          .unwrap_or_default();
        let mut combined = own.clone();
        for parameter in shared {
          let overridden = own
            .iter()
            .any(|p| p.get("name") == parameter.get("name") && p.get("in") == parameter.get("in"));
          if !overridden {
            combined.push(parameter.clone());
          }
        }
        merged["parameters"] = Value::Array(combined);
      }
      return Some(merged);
    }
  }
  None
}
