// opflow/src/operation/definition.rs

//! Contains `OperationKey`, the mutable `OperationBuilder` and the immutable
//! `Operation` it produces.

use crate::core::context::Context;
use crate::core::step::{IntoStep, Step};
use crate::datasource::Datasource;
use crate::error::{into_flow_error, FlowError, FlowResult};
use crate::operation::fork::ForkSource;
use crate::pipeline::{error_handler, ErrorHandler};
use crate::schema::{JsonSchemaValidator, OperationValidator};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{event, Level};

/// Identity of an operation inside a service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationKey {
  pub service_id: String,
  pub version: String,
  pub operation_id: String,
}

impl OperationKey {
  pub fn new(service_id: impl Into<String>, version: impl Into<String>, operation_id: impl Into<String>) -> Self {
    Self {
      service_id: service_id.into(),
      version: version.into(),
      operation_id: operation_id.into(),
    }
  }
}

impl fmt::Display for OperationKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}/{}", self.service_id, self.version, self.operation_id)
  }
}

/// Hook run before request validation. Finishing the response stops the run.
pub type Middleware = Arc<dyn Fn(Context) -> BoxFuture<'static, FlowResult<()>> + Send + Sync>;

pub fn middleware<F, Fut, E>(f: F) -> Middleware
where
  F: Fn(Context) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<(), E>> + Send + 'static,
  E: Into<anyhow::Error> + 'static,
{
  Arc::new(move |ctx| {
    let fut = f(ctx);
    Box::pin(async move { fut.await.map_err(into_flow_error) })
  })
}

#[derive(Clone)]
pub(crate) enum ChainLink {
  Step(Step),
  Fork(ForkSource),
  Join,
}

impl ChainLink {
  fn name(&self) -> &str {
    match self {
      ChainLink::Step(step) => step.name(),
      ChainLink::Fork(_) => "fork",
      ChainLink::Join => "join",
    }
  }
}

/// One change to an operation's setup. Services replay the same mutation on
/// every linked successor.
#[derive(Clone)]
pub(crate) enum Mutation {
  Push(Step),
  Fork(ForkSource),
  Join,
  ErrorHandler(ErrorHandler),
  ValidateRequest(bool),
  ValidateResponse(bool),
  Validator(Arc<dyn OperationValidator>),
  Middleware(Middleware),
  Datasource(Arc<dyn Datasource>),
  Private(bool),
}

impl Mutation {
  pub(crate) fn label(&self) -> &'static str {
    match self {
      Mutation::Push(_) => "push",
      Mutation::Fork(_) => "fork",
      Mutation::Join => "join",
      Mutation::ErrorHandler(_) => "set_error_handler",
      Mutation::ValidateRequest(_) => "validate_request",
      Mutation::ValidateResponse(_) => "validate_response",
      Mutation::Validator(_) => "set_validator",
      Mutation::Middleware(_) => "use_middleware",
      Mutation::Datasource(_) => "set_datasource",
      Mutation::Private(_) => "set_private",
    }
  }

  /// Rejects structural changes that would leave `target`'s chain malformed.
  pub(crate) fn check(&self, target: &OperationBuilder) -> FlowResult<()> {
    match self {
      Mutation::Fork(_) if target.pending_fork.is_some() => Err(FlowError::configuration(
        target.key.to_string(),
        "fork while another fork is pending; nested forks are not supported",
      )),
      Mutation::Join => match target.pending_fork {
        None => Err(FlowError::configuration(target.key.to_string(), "join without a pending fork")),
        Some(at) if at + 1 == target.chain.len() => Err(FlowError::configuration(
          target.key.to_string(),
          "join directly after fork; the branch has no steps",
        )),
        Some(_) => Ok(()),
      },
      _ => Ok(()),
    }
  }

  pub(crate) fn apply(self, target: &mut OperationBuilder) {
    match self {
      Mutation::Push(step) => target.chain.push(ChainLink::Step(step)),
      Mutation::Fork(source) => {
        target.pending_fork = Some(target.chain.len());
        target.chain.push(ChainLink::Fork(source));
      }
      Mutation::Join => {
        target.pending_fork = None;
        target.chain.push(ChainLink::Join);
      }
      Mutation::ErrorHandler(handler) => target.error_handler = Some(handler),
      Mutation::ValidateRequest(on) => target.validate_request = Some(on),
      Mutation::ValidateResponse(on) => target.validate_response = Some(on),
      Mutation::Validator(validator) => target.validator = Some(validator),
      Mutation::Middleware(mw) => target.middleware.push(mw),
      Mutation::Datasource(ds) => target.datasource = Some(ds),
      Mutation::Private(private) => target.private = private,
    }
  }
}

/// What a successor takes over from its predecessor when linked.
#[derive(Clone)]
pub(crate) struct Inheritance {
  chain: Vec<ChainLink>,
  middleware: Vec<Middleware>,
  error_handler: Option<ErrorHandler>,
  validate_request: Option<bool>,
  validate_response: Option<bool>,
  validator: Option<Arc<dyn OperationValidator>>,
  datasource: Option<Arc<dyn Datasource>>,
}

/// Setup stage of an operation. Every mutator applies immediately; `build`
/// snapshots the current state into an immutable [`Operation`].
#[derive(Clone)]
pub struct OperationBuilder {
  pub(crate) key: OperationKey,
  pub(crate) chain: Vec<ChainLink>,
  // chain index of the fork still waiting for its join
  pub(crate) pending_fork: Option<usize>,
  pub(crate) error_handler: Option<ErrorHandler>,
  pub(crate) validate_request: Option<bool>,
  pub(crate) validate_response: Option<bool>,
  pub(crate) validator: Option<Arc<dyn OperationValidator>>,
  pub(crate) middleware: Vec<Middleware>,
  pub(crate) datasource: Option<Arc<dyn Datasource>>,
  pub(crate) private: bool,
}

pub(crate) fn require_step(key: &OperationKey, step: impl IntoStep) -> FlowResult<Step> {
  step
    .into_step()
    .ok_or_else(|| FlowError::configuration(key.to_string(), "cannot push an undefined step"))
}

pub(crate) fn compile_schema(
  key: &OperationKey,
  schema: &Value,
  document: Option<&Value>,
) -> FlowResult<Arc<dyn OperationValidator>> {
  let compiled = match document {
    Some(document) => JsonSchemaValidator::compile_in(schema, document),
    None => JsonSchemaValidator::compile(schema),
  };
  let validator = compiled.map_err(|e| match e {
    FlowError::Configuration { message, .. } => FlowError::configuration(key.to_string(), message),
    other => other,
  })?;
  Ok(Arc::new(validator))
}

impl OperationBuilder {
  pub fn new(key: OperationKey) -> Self {
    Self {
      key,
      chain: Vec::new(),
      pending_fork: None,
      error_handler: None,
      validate_request: None,
      validate_response: None,
      validator: None,
      middleware: Vec::new(),
      datasource: None,
      private: false,
    }
  }

  pub fn key(&self) -> &OperationKey {
    &self.key
  }

  pub(crate) fn mutate(&mut self, mutation: Mutation) -> FlowResult<()> {
    mutation.check(self)?;
    event!(Level::DEBUG, operation = %self.key, mutation = mutation.label(), "Applying operation mutation.");
    mutation.apply(self);
    Ok(())
  }

  /// Appends a step. `None` is a configuration error citing this operation.
  pub fn push(&mut self, step: impl IntoStep) -> FlowResult<&mut Self> {
    let step = require_step(&self.key, step)?;
    self.mutate(Mutation::Push(step))?;
    Ok(self)
  }

  /// Starts a fork: the links pushed up to the next `join` run once per value of `source`.
  pub fn fork(&mut self, source: ForkSource) -> FlowResult<&mut Self> {
    self.mutate(Mutation::Fork(source))?;
    Ok(self)
  }

  pub fn join(&mut self) -> FlowResult<&mut Self> {
    self.mutate(Mutation::Join)?;
    Ok(self)
  }

  /// Installs the operation's error handler, replacing any previous one.
  pub fn set_error_handler<F, Fut, E>(&mut self, handler: F) -> &mut Self
  where
    F: Fn(FlowError, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, E>> + Send + 'static,
    E: Into<anyhow::Error> + 'static,
  {
    self.apply_infallible(Mutation::ErrorHandler(error_handler(handler)))
  }

  pub fn validate_request(&mut self, on: bool) -> &mut Self {
    self.apply_infallible(Mutation::ValidateRequest(on))
  }

  pub fn validate_response(&mut self, on: bool) -> &mut Self {
    self.apply_infallible(Mutation::ValidateResponse(on))
  }

  /// Compiles an OpenAPI operation object into this operation's validator.
  pub fn set_schema(&mut self, schema: &Value) -> FlowResult<&mut Self> {
    let validator = compile_schema(&self.key, schema, None)?;
    Ok(self.apply_infallible(Mutation::Validator(validator)))
  }

  /// As [`set_schema`](Self::set_schema), for an operation object taken out of
  /// `document`: its `$ref`s resolve there and its version picks the dialect.
  pub fn set_schema_in(&mut self, schema: &Value, document: &Value) -> FlowResult<&mut Self> {
    let validator = compile_schema(&self.key, schema, Some(document))?;
    Ok(self.apply_infallible(Mutation::Validator(validator)))
  }

  pub fn set_validator(&mut self, validator: Arc<dyn OperationValidator>) -> &mut Self {
    self.apply_infallible(Mutation::Validator(validator))
  }

  pub fn use_middleware<F, Fut, E>(&mut self, f: F) -> &mut Self
  where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<anyhow::Error> + 'static,
  {
    self.apply_infallible(Mutation::Middleware(middleware(f)))
  }

  pub fn set_datasource(&mut self, datasource: Arc<dyn Datasource>) -> &mut Self {
    self.apply_infallible(Mutation::Datasource(datasource))
  }

  pub fn set_private(&mut self, private: bool) -> &mut Self {
    self.apply_infallible(Mutation::Private(private))
  }

  fn apply_infallible(&mut self, mutation: Mutation) -> &mut Self {
    event!(Level::DEBUG, operation = %self.key, mutation = mutation.label(), "Applying operation mutation.");
    mutation.apply(self);
    self
  }

  pub fn step_names(&self) -> Vec<String> {
    self.chain.iter().map(|link| link.name().to_string()).collect()
  }

  pub fn has_validator(&self) -> bool {
    self.validator.is_some()
  }

  pub fn has_error_handler(&self) -> bool {
    self.error_handler.is_some()
  }

  pub fn is_private(&self) -> bool {
    self.private
  }

  pub(crate) fn inheritance(&self) -> Inheritance {
    Inheritance {
      chain: self.chain.clone(),
      middleware: self.middleware.clone(),
      error_handler: self.error_handler.clone(),
      validate_request: self.validate_request,
      validate_response: self.validate_response,
      validator: self.validator.clone(),
      datasource: self.datasource.clone(),
    }
  }

  /// Takes over a predecessor's setup: chain links and middleware are appended,
  /// everything else is filled in only where this operation has nothing.
  pub(crate) fn inherit(&mut self, from: Inheritance) -> FlowResult<()> {
    for link in from.chain {
      let mutation = match link {
        ChainLink::Step(step) => Mutation::Push(step),
        ChainLink::Fork(source) => Mutation::Fork(source),
        ChainLink::Join => Mutation::Join,
      };
      mutation.check(self)?;
      mutation.apply(self);
    }
    self.middleware.extend(from.middleware);
    if self.error_handler.is_none() {
      self.error_handler = from.error_handler;
    }
    if self.validate_request.is_none() {
      self.validate_request = from.validate_request;
    }
    if self.validate_response.is_none() {
      self.validate_response = from.validate_response;
    }
    if self.validator.is_none() {
      self.validator = from.validator;
    }
    if self.datasource.is_none() {
      self.datasource = from.datasource;
    }
    Ok(())
  }

  /// Snapshots the current setup. The builder stays usable.
  pub fn build(&self) -> Operation {
    Operation {
      key: self.key.clone(),
      stages: plan(&self.chain).into(),
      link_names: self.step_names().into(),
      error_handler: self.error_handler.clone(),
      validate_request: self.validate_request.unwrap_or(true),
      validate_response: self.validate_response.unwrap_or(false),
      validator: self.validator.clone(),
      middleware: self.middleware.clone().into(),
      datasource: self.datasource.clone(),
      private: self.private,
    }
  }
}

impl fmt::Debug for OperationBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("OperationBuilder")
      .field("key", &self.key)
      .field("chain", &self.step_names())
      .field("has_validator", &self.validator.is_some())
      .field("has_error_handler", &self.error_handler.is_some())
      .field("private", &self.private)
      .finish()
  }
}

/// Executable form of the chain: forks are resolved into their branches.
pub(crate) enum Stage {
  // chain position, step
  Step(usize, Step),
  Fork {
    position: usize,
    source: ForkSource,
    branch: Vec<(usize, Step)>,
  },
}

fn plan(chain: &[ChainLink]) -> Vec<Stage> {
  let mut stages = Vec::new();
  let mut open: Option<(usize, ForkSource, Vec<(usize, Step)>)> = None;
  for (position, link) in chain.iter().enumerate() {
    match link {
      ChainLink::Step(step) => match open.as_mut() {
        Some((_, _, branch)) => branch.push((position, step.clone())),
        None => stages.push(Stage::Step(position, step.clone())),
      },
      ChainLink::Fork(source) => {
        // a pending fork is closed before a new one opens
        if let Some((at, source, branch)) = open.take() {
          stages.push(Stage::Fork { position: at, source, branch });
        }
        open = Some((position, source.clone(), Vec::new()));
      }
      ChainLink::Join => {
        if let Some((at, source, branch)) = open.take() {
          stages.push(Stage::Fork { position: at, source, branch });
        }
      }
    }
  }
  if let Some((at, source, branch)) = open {
    stages.push(Stage::Fork { position: at, source, branch });
  }
  stages
}

/// An immutable, executable operation. Shared as `Arc<Operation>` by services.
pub struct Operation {
  pub(crate) key: OperationKey,
  pub(crate) stages: Arc<[Stage]>,
  link_names: Arc<[String]>,
  pub(crate) error_handler: Option<ErrorHandler>,
  pub(crate) validate_request: bool,
  pub(crate) validate_response: bool,
  pub(crate) validator: Option<Arc<dyn OperationValidator>>,
  pub(crate) middleware: Arc<[Middleware]>,
  pub(crate) datasource: Option<Arc<dyn Datasource>>,
  private: bool,
}

impl Operation {
  pub fn builder(key: OperationKey) -> OperationBuilder {
    OperationBuilder::new(key)
  }

  pub fn key(&self) -> &OperationKey {
    &self.key
  }

  pub fn is_private(&self) -> bool {
    self.private
  }

  pub fn step_names(&self) -> Vec<String> {
    self.link_names.to_vec()
  }

  pub fn validates_request(&self) -> bool {
    self.validate_request
  }

  pub fn validates_response(&self) -> bool {
    self.validate_response
  }
}

impl fmt::Debug for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Operation")
      .field("key", &self.key)
      .field("chain", &self.link_names)
      .field("validate_request", &self.validate_request)
      .field("validate_response", &self.validate_response)
      .field("private", &self.private)
      .finish()
  }
}
