use thiserror::Error;

/// Errors raised while compiling or evaluating a transform expression.
///
/// Every variant is terminal for the message being transformed: retrying the
/// same expression against the same payload yields the same error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    /// The expression is not valid in the query grammar.
    #[error("parse error: {0}")]
    Parse(String),

    /// The expression exceeds the configured maximum length.
    #[error("expression is {len} bytes, limit is {limit}")]
    ExpressionTooLong { len: usize, limit: usize },

    /// The expression nests brackets deeper than allowed.
    #[error("expression nesting exceeds depth {limit}")]
    TooDeep { limit: usize },

    /// A path step did not resolve against the input.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// An operation was applied to a value of the wrong type.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Any other evaluation failure (division by zero, bad number, ...).
    #[error("evaluation error: {0}")]
    Runtime(String),

    /// Evaluation consumed its whole step budget.
    #[error("evaluation exceeded {limit} steps")]
    BudgetExceeded { limit: u64 },
}

impl TransformError {
    /// Whether `?` and `//` may swallow this error.
    ///
    /// Resource limits are never swallowed.
    pub fn is_catchable(&self) -> bool {
        matches!(
            self,
            Self::PathNotFound(_) | Self::TypeMismatch(_) | Self::Runtime(_)
        )
    }
}
