//! JSON query expression engine used by Sluice transforms.
//!
//! Expressions use a jq-style path language (`.user.name`, `.items[]`,
//! `map(select(.n > 1))`, `{id, total: .a + .b}`, `if`, `reduce` and
//! `as $name` bindings) and are evaluated entirely
//! in-process against a [`serde_json::Value`]. There is no I/O and no access
//! to the host; evaluation is bounded by a step budget and parsing by a
//! nesting limit.
//!
//! # Null propagation
//!
//! Under the default [`NullPolicy::Propagate`], a path step that does not
//! resolve (a missing key, an out-of-range index, or any step applied to
//! `null`) yields `null`, as jq does. [`NullPolicy::Strict`] turns such steps
//! into [`TransformError::PathNotFound`]; suffix a step with `?` to turn the
//! failure into "no output", or use `//` to supply a fallback. Indexing a
//! value of the wrong type is an error under both policies.
//!
//! # Results
//!
//! A filter produces zero or more outputs. A single output is returned as is;
//! any other count is collected into a JSON array.

pub mod ast;
mod builtins;
pub mod error;
mod eval;
pub mod parser;
pub mod value;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use error::TransformError;

use crate::ast::Filter;
use crate::eval::Evaluator;

/// What a path step yields when it does not resolve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullPolicy {
    /// Unresolved paths yield `null`.
    #[default]
    Propagate,
    /// Unresolved paths are errors.
    Strict,
}

/// Limits and semantics applied to every compiled expression.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub null_policy: NullPolicy,
    /// Evaluation step budget per run.
    pub max_steps: u64,
    /// Longest accepted expression, in bytes.
    pub max_expression_bytes: usize,
    /// Deepest accepted bracket nesting.
    pub max_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            null_policy: NullPolicy::Propagate,
            max_steps: 100_000,
            max_expression_bytes: 4096,
            max_depth: 64,
        }
    }
}

/// Compiles expressions into reusable [`Program`]s.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Parse `source` into a program bound to this engine's limits.
    pub fn compile(&self, source: &str) -> Result<Program, TransformError> {
        if source.len() > self.config.max_expression_bytes {
            return Err(TransformError::ExpressionTooLong {
                len: source.len(),
                limit: self.config.max_expression_bytes,
            });
        }
        let filter = parser::parse_filter(source, self.config.max_depth)?;
        Ok(Program {
            source: source.to_owned(),
            filter,
            null_policy: self.config.null_policy,
            max_steps: self.config.max_steps,
        })
    }

    /// Compile and run `source` against `input` in one step.
    pub fn evaluate(&self, source: &str, input: &Value) -> Result<Value, TransformError> {
        self.compile(source)?.evaluate(input)
    }
}

/// A compiled expression. Cheap to share and safe to run concurrently.
#[derive(Debug, Clone)]
pub struct Program {
    source: String,
    filter: Filter,
    null_policy: NullPolicy,
    max_steps: u64,
}

impl Program {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Run the program against `input`.
    pub fn evaluate(&self, input: &Value) -> Result<Value, TransformError> {
        let evaluator = Evaluator::new(self.null_policy, self.max_steps);
        let mut outputs = evaluator.eval(&self.filter, input)?;
        if outputs.len() == 1 {
            Ok(outputs.remove(0))
        } else {
            Ok(Value::Array(outputs))
        }
    }
}
