//! tailor-engine - expression parsing, label rewriting and sandboxed evaluation.

pub mod builtins;
pub mod engine;
pub mod error;
pub mod functions;

pub use engine::{Evaluator, Scope, Value};
pub use error::{ExprError, Result};
pub use functions::FunctionLibrary;
