// opflow/src/service/builder.rs

//! `ServiceBuilder`: the setup stage of a service, where operations of
//! successive API versions are linked so later versions inherit from earlier ones.
//!
//! Operations live in an arena. Each slot carries at most one forward link to
//! its successor. A mutation made through [`OperationMut`] applies to the slot
//! itself, then to every successor reachable from it.

use crate::core::context::Context;
use crate::core::step::IntoStep;
use crate::datasource::Datasource;
use crate::error::{FlowError, FlowResult};
use crate::operation::definition::{compile_schema, middleware, require_step, Mutation};
use crate::operation::{ForkSource, OperationBuilder, OperationKey};
use crate::pipeline::error_handler;
use crate::schema::{find_operation, OperationValidator};
use crate::service::template::{ApiDefinition, OperationTemplate, ServiceDocument};
use crate::service::version::{Service, Version};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tracing::{event, instrument, Level};

const RESERVED_OPERATION_IDS: &[&str] = &["addOperation", "operationIds"];

struct Slot {
  builder: OperationBuilder,
  next: Option<usize>,
}

pub struct ServiceBuilder {
  id: String,
  versions: Vec<String>,
  slots: Vec<Slot>,
  index: HashMap<OperationKey, usize>,
}

impl ServiceBuilder {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      versions: Vec::new(),
      slots: Vec::new(),
      index: HashMap::new(),
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn versions(&self) -> &[String] {
    &self.versions
  }

  pub fn add_version(&mut self, version: impl Into<String>) -> FlowResult<&mut Self> {
    let version = version.into();
    if self.versions.contains(&version) {
      return Err(FlowError::configuration(
        format!("service '{}'", self.id),
        format!("version '{}' is already defined", version),
      ));
    }
    event!(Level::DEBUG, service = %self.id, version = %version, "Version added.");
    self.versions.push(version);
    Ok(self)
  }

  /// Registers an empty operation in `version` and returns a handle to set it up.
  pub fn add_operation(&mut self, version: &str, operation_id: &str) -> FlowResult<OperationMut<'_>> {
    let scope = format!("service '{}' version '{}'", self.id, version);
    if !self.versions.iter().any(|v| v == version) {
      return Err(FlowError::configuration(scope, "unknown version"));
    }
    if RESERVED_OPERATION_IDS.contains(&operation_id) || operation_id == version {
      return Err(FlowError::configuration(
        scope,
        format!("'{}' is reserved and cannot be used as an operation id", operation_id),
      ));
    }
    let key = OperationKey::new(&self.id, version, operation_id);
    if self.index.contains_key(&key) {
      return Err(FlowError::configuration(
        scope,
        format!("operation '{}' is already defined", operation_id),
      ));
    }

    let slot = self.slots.len();
    event!(Level::DEBUG, operation = %key, "Operation added.");
    self.slots.push(Slot {
      builder: OperationBuilder::new(key.clone()),
      next: None,
    });
    self.index.insert(key, slot);
    Ok(OperationMut { service: self, slot })
  }

  /// Handle to an existing operation.
  pub fn operation(&mut self, version: &str, operation_id: &str) -> FlowResult<OperationMut<'_>> {
    let key = OperationKey::new(&self.id, version, operation_id);
    let slot = self.slot_of(&key)?;
    Ok(OperationMut { service: self, slot })
  }

  /// Read-only view of an operation's current setup.
  pub fn get(&self, key: &OperationKey) -> Option<&OperationBuilder> {
    self.index.get(key).map(|&slot| &self.slots[slot].builder)
  }

  fn slot_of(&self, key: &OperationKey) -> FlowResult<usize> {
    self
      .index
      .get(key)
      .copied()
      .ok_or_else(|| FlowError::not_found(format!("operation '{}'", key)))
  }

  /// Makes `next` the successor of `prev`.
  ///
  /// `next` (and whatever already follows it) takes over `prev`'s current setup,
  /// and every later mutation of `prev` reaches it. Re-linking `prev` replaces its
  /// previous successor.
  pub fn link(&mut self, prev: &OperationKey, next: &OperationKey) -> FlowResult<()> {
    let from = self.slot_of(prev)?;
    let to = self.slot_of(next)?;
    if from == to {
      return Err(FlowError::configuration(prev.to_string(), "an operation cannot inherit from itself"));
    }
    let seed = self.slots[from].builder.inheritance();
    // every successor takes the seed on a copy; nothing is installed unless all succeed
    let mut seeded = Vec::new();
    for target in self.reach(to) {
      // past `prev` the chain loops back into `next`
      if target == from {
        break;
      }
      let mut copy = self.slots[target].builder.clone();
      copy.inherit(seed.clone())?;
      seeded.push((target, copy));
    }

    for (target, copy) in seeded {
      self.slots[target].builder = copy;
    }
    if let Some(old) = self.slots[from].next.replace(to) {
      event!(
        Level::DEBUG,
        operation = %prev,
        replaced = %self.slots[old].builder.key,
        "Successor replaced."
      );
    }
    event!(Level::DEBUG, from = %prev, to = %next, "Operations linked.");
    Ok(())
  }

  /// Removes the forward link of `key`, returning the former successor.
  pub fn unlink(&mut self, key: &OperationKey) -> FlowResult<Option<OperationKey>> {
    let slot = self.slot_of(key)?;
    let former = self.slots[slot].next.take().map(|next| self.slots[next].builder.key.clone());
    event!(Level::DEBUG, operation = %key, former = ?former, "Operation unlinked.");
    Ok(former)
  }

  pub fn successor(&self, key: &OperationKey) -> Option<&OperationKey> {
    let slot = *self.index.get(key)?;
    self.slots[slot].next.map(|next| &self.slots[next].builder.key)
  }

  /// `start` and every slot reachable through forward links, each at most once.
  fn reach(&self, start: usize) -> Vec<usize> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    let mut cursor = Some(start);
    while let Some(slot) = cursor {
      if !visited.insert(slot) {
        event!(
          Level::WARN,
          operation = %self.slots[slot].builder.key,
          "Inheritance cycle detected; propagation stopped."
        );
        break;
      }
      order.push(slot);
      cursor = self.slots[slot].next;
    }
    order
  }

  fn propagate(&mut self, start: usize, mutation: Mutation) -> FlowResult<()> {
    let targets = self.reach(start);
    // checked on every target before any is touched
    for &target in &targets {
      mutation.check(&self.slots[target].builder)?;
    }
    for &target in &targets {
      mutation.clone().apply(&mut self.slots[target].builder);
    }
    event!(
      Level::DEBUG,
      operation = %self.slots[start].builder.key,
      mutation = mutation.label(),
      reached = targets.len(),
      "Mutation propagated."
    );
    Ok(())
  }

  /// Sets up the service described by `document`, one version per entry of
  /// `apis` in order. See [`OperationTemplate`] for replication and inheritance.
  #[instrument(name = "ServiceBuilder::from_document", skip_all, fields(service = %document.id), err(Display))]
  pub fn from_document(document: &ServiceDocument, apis: &[ApiDefinition]) -> FlowResult<Self> {
    let mut builder = ServiceBuilder::new(document.id.clone());
    for api in apis {
      builder.add_version(api.version.clone())?;
    }

    for template in &document.operations {
      match &template.version {
        Some(version) => {
          let api = apis.iter().find(|api| &api.version == version).ok_or_else(|| {
            FlowError::configuration(
              format!("operation '{}'", template.operation_id),
              format!("unknown version '{}'", version),
            )
          })?;
          builder.add_from_template(template, api)?;
        }
        None => {
          let mut prev: Option<OperationKey> = None;
          for api in apis {
            let key = builder.add_from_template(template, api)?;
            if template.inherit {
              if let Some(prev) = &prev {
                builder.link(prev, &key)?;
              }
            }
            prev = Some(key);
          }
        }
      }
    }
    Ok(builder)
  }

  fn add_from_template(&mut self, template: &OperationTemplate, api: &ApiDefinition) -> FlowResult<OperationKey> {
    let schema = find_operation(&api.document, &template.operation_id);
    let mut op = self.add_operation(&api.version, &template.operation_id)?;
    let key = op.key().clone();
    // local settings: never propagated
    let local = op.local();
    local
      .set_private(template.private)
      .validate_request(template.validate_request)
      .validate_response(template.validate_response);
    match schema {
      Some(schema) => {
        local.set_schema_in(&schema, &api.document)?;
      }
      None => {
        event!(Level::DEBUG, operation = %key, "No schema for operation in API document.");
      }
    }
    Ok(key)
  }

  /// Freezes every operation into a [`Service`].
  pub fn build(&self) -> Service {
    let versions = self
      .versions
      .iter()
      .map(|version_id| {
        let mut operation_ids = Vec::new();
        let mut operations = HashMap::new();
        for slot in self.slots.iter().filter(|s| &s.builder.key.version == version_id) {
          let operation_id = slot.builder.key.operation_id.clone();
          operation_ids.push(operation_id.clone());
          operations.insert(operation_id, Arc::new(slot.builder.build()));
        }
        Version {
          id: version_id.clone(),
          operation_ids,
          operations,
        }
      })
      .collect();
    event!(Level::DEBUG, service = %self.id, operations = self.slots.len(), "Service built.");
    Service {
      id: self.id.clone(),
      versions,
    }
  }
}

/// Mutable handle to one operation of a [`ServiceBuilder`]. Every mutator
/// reaches the operation's successors as well.
pub struct OperationMut<'a> {
  service: &'a mut ServiceBuilder,
  slot: usize,
}

impl OperationMut<'_> {
  pub fn key(&self) -> &OperationKey {
    &self.service.slots[self.slot].builder.key
  }

  /// The operation alone, bypassing propagation.
  pub fn local(&mut self) -> &mut OperationBuilder {
    &mut self.service.slots[self.slot].builder
  }

  fn propagate(&mut self, mutation: Mutation) -> FlowResult<&mut Self> {
    self.service.propagate(self.slot, mutation)?;
    Ok(self)
  }

  pub fn push(&mut self, step: impl IntoStep) -> FlowResult<&mut Self> {
    let step = require_step(self.key(), step)?;
    self.propagate(Mutation::Push(step))
  }

  pub fn fork(&mut self, source: ForkSource) -> FlowResult<&mut Self> {
    self.propagate(Mutation::Fork(source))
  }

  pub fn join(&mut self) -> FlowResult<&mut Self> {
    self.propagate(Mutation::Join)
  }

  pub fn set_error_handler<F, Fut, E>(&mut self, handler: F) -> FlowResult<&mut Self>
  where
    F: Fn(FlowError, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, E>> + Send + 'static,
    E: Into<anyhow::Error> + 'static,
  {
    self.propagate(Mutation::ErrorHandler(error_handler(handler)))
  }

  pub fn validate_request(&mut self, on: bool) -> FlowResult<&mut Self> {
    self.propagate(Mutation::ValidateRequest(on))
  }

  pub fn validate_response(&mut self, on: bool) -> FlowResult<&mut Self> {
    self.propagate(Mutation::ValidateResponse(on))
  }

  pub fn set_schema(&mut self, schema: &Value) -> FlowResult<&mut Self> {
    let validator = compile_schema(self.key(), schema, None)?;
    self.propagate(Mutation::Validator(validator))
  }

  pub fn set_schema_in(&mut self, schema: &Value, document: &Value) -> FlowResult<&mut Self> {
    let validator = compile_schema(self.key(), schema, Some(document))?;
    self.propagate(Mutation::Validator(validator))
  }

  pub fn set_validator(&mut self, validator: Arc<dyn OperationValidator>) -> FlowResult<&mut Self> {
    self.propagate(Mutation::Validator(validator))
  }

  pub fn use_middleware<F, Fut, E>(&mut self, f: F) -> FlowResult<&mut Self>
  where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<anyhow::Error> + 'static,
  {
    self.propagate(Mutation::Middleware(middleware(f)))
  }

  pub fn set_datasource(&mut self, datasource: Arc<dyn Datasource>) -> FlowResult<&mut Self> {
    self.propagate(Mutation::Datasource(datasource))
  }

  pub fn set_private(&mut self, private: bool) -> FlowResult<&mut Self> {
    self.propagate(Mutation::Private(private))
  }

  pub fn step_names(&self) -> Vec<String> {
    self.service.slots[self.slot].builder.step_names()
  }
}
