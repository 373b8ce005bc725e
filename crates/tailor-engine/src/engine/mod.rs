//! Expression engine API.
//!
//! - [`parse`] - Parse expression text into a [`Program`]
//! - [`rename_variables`] - Rewrite variable reads (name <-> label)
//! - [`get_variable_names`] - All identifiers used by an expression
//! - [`normalize_name`] - Turn arbitrary text into a valid variable name
//! - [`Evaluator`] - Sandboxed evaluation against a [`Scope`]
//! - [`format_number`] - Format values for display

mod ast;
mod eval;
mod format;
mod names;
mod parser;

pub use ast::{BinaryOp, Expr, Program, Statement, UnaryOp};
pub use eval::{Evaluator, Scope, Value};
pub use format::format_number;
pub use names::{free_variables, get_variable_names, normalize_name, rename_program, rename_variables};
pub use parser::parse;
