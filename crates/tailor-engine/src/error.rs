//! Error types for expression parsing and evaluation.

use thiserror::Error;

/// Errors raised while parsing, rewriting or evaluating an expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("Syntax error at {position}: {message}")]
    Syntax { message: String, position: usize },

    #[error("Name '{0}' is not defined")]
    Name(String),

    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    #[error("Function '{name}' expects {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: String,
        found: usize,
    },

    #[error("Division by zero")]
    ZeroDivision,

    #[error("Type error: {0}")]
    Type(String),

    #[error("Expression produces no output")]
    NoOutput,

    #[error("Function library error: {0}")]
    Library(String),
}

impl ExprError {
    pub(crate) fn syntax(message: impl Into<String>, position: usize) -> Self {
        ExprError::Syntax {
            message: message.into(),
            position,
        }
    }

    /// Whether this is a parse failure rather than an evaluation failure.
    pub fn is_syntax(&self) -> bool {
        matches!(self, ExprError::Syntax { .. })
    }
}

pub type Result<T> = std::result::Result<T, ExprError>;
