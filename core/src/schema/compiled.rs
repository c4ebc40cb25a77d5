// opflow/src/schema/compiled.rs

use crate::error::{FlowError, FlowResult};
use jsonschema::{Draft, Validator};
use serde_json::{json, Map, Value};

// bound on `$ref` hops when resolving a schema's own shape
const MAX_REF_HOPS: usize = 8;

/// The API document a schema fragment belongs to: the root its local `$ref`s
/// point into, plus the JSON Schema draft its dialect implies.
pub(crate) struct DocumentScope {
  root: Value,
  draft: Option<Draft>,
}

impl DocumentScope {
  /// A fragment with no surrounding document. Read as OpenAPI 3.0 / Swagger 2.
  pub(crate) fn standalone() -> Self {
    Self {
      root: Value::Null,
      draft: Some(Draft::Draft4),
    }
  }

  /// Swagger 2 and OpenAPI 3.0 schemas follow draft 4; OpenAPI 3.1 schemas are
  /// full JSON Schema and keep draft detection.
  pub(crate) fn of(document: &Value) -> Self {
    let draft = match document.get("openapi").and_then(Value::as_str) {
      Some(version) if !version.starts_with("3.0") => None,
      _ => Some(Draft::Draft4),
    };
    let mut root = Map::new();
    for section in ["components", "definitions"] {
      if let Some(value) = document.get(section) {
        root.insert(section.to_string(), value.clone());
      }
    }
    Self {
      root: Value::Object(root),
      draft,
    }
  }

  fn has_definitions(&self) -> bool {
    self.root.as_object().is_some_and(|root| !root.is_empty())
  }

  /// Compiles `schema` with the document's sections grafted in next to it, so
  /// `#/components/...` and `#/definitions/...` resolve.
  fn validator(&self, schema: &Value) -> Result<Validator, String> {
    let rooted = if self.has_definitions() {
      let mut rooted = self.root.clone();
      rooted["allOf"] = json!([schema]);
      rooted
    } else {
      schema.clone()
    };
    let built = match self.draft {
      Some(draft) => jsonschema::options().with_draft(draft).build(&rooted),
      None => jsonschema::validator_for(&rooted),
    };
    built.map_err(|e| e.to_string())
  }

  /// Follows a top-level local `$ref` to the schema it names.
  fn resolve<'a>(&'a self, mut schema: &'a Value) -> &'a Value {
    for _ in 0..MAX_REF_HOPS {
      let target = schema
        .get("$ref")
        .and_then(Value::as_str)
        .and_then(|reference| reference.strip_prefix('#'))
        .and_then(|pointer| self.root.pointer(pointer));
      match target {
        Some(target) => schema = target,
        None => break,
      }
    }
    schema
  }

  /// `schema` with its own and its `items`' references resolved, for reading
  /// `type`, `default` and `nullable`.
  fn shape(&self, schema: &Value) -> Value {
    let mut shape = self.resolve(schema).clone();
    if let Some(items) = shape.get("items").map(|items| self.resolve(items).clone()) {
      shape["items"] = items;
    }
    shape
  }
}

/// Failure class of a single check; becomes the prefix of the error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckKind {
  Type,
  Required,
  Schema,
}

impl CheckKind {
  pub(crate) fn as_str(self) -> &'static str {
    match self {
      CheckKind::Type => "type",
      CheckKind::Required => "required",
      CheckKind::Schema => "schema",
    }
  }
}

/// A schema compiled twice: once for its declared `type` alone, once in full.
/// The type pass runs first so type mismatches get their own error code.
pub(crate) struct CompiledSchema {
  raw: Value,
  type_check: Option<(Validator, String)>,
  full: Validator,
  nullable: bool,
}

impl CompiledSchema {
  pub(crate) fn compile(schema: &Value, what: &str, scope: &DocumentScope) -> FlowResult<Self> {
    let full = scope
      .validator(schema)
      .map_err(|e| FlowError::configuration("schema", format!("invalid schema for {}: {}", what, e)))?;

    let shape = scope.shape(schema);
    let nullable = shape.get("nullable").and_then(Value::as_bool).unwrap_or(false);
    let type_check = match shape.get("type") {
      Some(declared) => {
        let validator = scope
          .validator(&json!({ "type": declared }))
          .map_err(|e| FlowError::configuration("schema", format!("invalid type for {}: {}", what, e)))?;
        Some((validator, describe_type(declared)))
      }
      None => None,
    };

    Ok(Self {
      raw: shape,
      type_check,
      full,
      nullable,
    })
  }

  pub(crate) fn raw(&self) -> &Value {
    &self.raw
  }

  /// Every failed check for `value`. A type mismatch short-circuits the full pass.
  pub(crate) fn check(&self, value: &Value) -> Vec<(CheckKind, String)> {
    if self.nullable && value.is_null() {
      return Vec::new();
    }
    if let Some((validator, expected)) = &self.type_check {
      if !validator.is_valid(value) {
        return vec![(CheckKind::Type, format!("must be {}", expected))];
      }
    }
    self
      .full
      .iter_errors(value)
      .map(|e| (CheckKind::Schema, e.to_string()))
      .collect()
  }
}

fn describe_type(declared: &Value) -> String {
  match declared {
    Value::String(t) => t.clone(),
    Value::Array(types) => types
      .iter()
      .filter_map(Value::as_str)
      .collect::<Vec<_>>()
      .join(" or "),
    other => other.to_string(),
  }
}
