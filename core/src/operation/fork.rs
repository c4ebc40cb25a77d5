// opflow/src/operation/fork.rs

//! Fork sources: where the values of a fork come from.

use crate::core::context::Context;
use crate::error::{FlowError, FlowResult};
use crate::pipeline::parallel::json_kind;
use serde_json::Value;
use std::sync::Arc;

/// Upper bound on the number of branches one fork may produce.
pub const MAX_FORK_BRANCHES: usize = 20;

pub type ForkGenerator = Arc<dyn Fn(&Value, &Context) -> Box<dyn Iterator<Item = Value> + Send> + Send + Sync>;

#[derive(Clone)]
enum SourceKind {
  Values(Arc<[Value]>),
  Input,
  Generator(ForkGenerator),
}

/// Supplies the values a fork spreads its branch over, one run at a time.
///
/// A `null` value ends the sequence early.
#[derive(Clone)]
pub struct ForkSource {
  kind: SourceKind,
}

impl ForkSource {
  /// A fixed list. More than [`MAX_FORK_BRANCHES`] entries is rejected here, at setup.
  pub fn values(values: Vec<Value>) -> FlowResult<Self> {
    if values.len() > MAX_FORK_BRANCHES {
      return Err(FlowError::configuration(
        "fork",
        format!(
          "{} fork values given, at most {} are allowed",
          values.len(),
          MAX_FORK_BRANCHES
        ),
      ));
    }
    Ok(Self {
      kind: SourceKind::Values(values.into()),
    })
  }

  /// The incoming value itself, which must be an array.
  pub fn input() -> Self {
    Self { kind: SourceKind::Input }
  }

  /// Calls `f(value, ctx)` on every run and forks over what it yields.
  pub fn generator<F, I>(f: F) -> Self
  where
    F: Fn(&Value, &Context) -> I + Send + Sync + 'static,
    I: IntoIterator<Item = Value>,
    I::IntoIter: Send + 'static,
  {
    let generator: ForkGenerator = Arc::new(move |value, ctx| Box::new(f(value, ctx).into_iter()));
    Self {
      kind: SourceKind::Generator(generator),
    }
  }

  pub(crate) fn describe(&self) -> &'static str {
    match self.kind {
      SourceKind::Values(_) => "values",
      SourceKind::Input => "input",
      SourceKind::Generator(_) => "generator",
    }
  }

  /// Pulls the branch values for one run.
  ///
  /// For generators, `found` in a limit error is the number pulled before giving
  /// up, not the generator's full length.
  pub(crate) fn materialize(&self, value: &Value, ctx: &Context) -> FlowResult<Vec<Value>> {
    match &self.kind {
      SourceKind::Values(values) => collect(values.iter().cloned()),
      SourceKind::Input => match value {
        Value::Array(items) => collect(items.iter().cloned()),
        other => Err(FlowError::InvalidValue {
          message: format!("fork over input expects an array, got {}", json_kind(other)),
        }),
      },
      SourceKind::Generator(generator) => collect(generator(value, ctx)),
    }
  }
}

fn collect(values: impl Iterator<Item = Value>) -> FlowResult<Vec<Value>> {
  let mut collected = Vec::new();
  for value in values.take_while(|v| !v.is_null()) {
    if collected.len() == MAX_FORK_BRANCHES {
      return Err(FlowError::ForkLimitExceeded {
        limit: MAX_FORK_BRANCHES,
        found: MAX_FORK_BRANCHES + 1,
      });
    }
    collected.push(value);
  }
  Ok(collected)
}

impl std::fmt::Debug for ForkSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("ForkSource").field(&self.describe()).finish()
  }
}
