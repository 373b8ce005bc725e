//! Sandboxed evaluation of parsed expressions.
//!
//! Only arithmetic, the built-in math table and (optionally) functions from
//! a user [`FunctionLibrary`] are reachable. There is no attribute access,
//! no imports and no I/O.

use super::ast::{BinaryOp, Expr, Program, Statement, UnaryOp};
use super::parser::parse;
use crate::builtins;
use crate::error::{ExprError, Result};
use crate::functions::FunctionLibrary;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Series(Vec<f64>),
}

impl Value {
    pub fn as_slice(&self) -> &[f64] {
        match self {
            Value::Scalar(v) => std::slice::from_ref(v),
            Value::Series(values) => values,
        }
    }

    pub fn map(self, f: impl Fn(f64) -> f64) -> Value {
        match self {
            Value::Scalar(v) => Value::Scalar(f(v)),
            Value::Series(values) => Value::Series(values.into_iter().map(f).collect()),
        }
    }

    /// Combine two values element-wise, broadcasting scalars.
    pub fn zip_with(&self, other: &Value, f: impl Fn(f64, f64) -> f64) -> Result<Value> {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(f(*a, *b))),
            (Value::Scalar(a), Value::Series(b)) => {
                Ok(Value::Series(b.iter().map(|b| f(*a, *b)).collect()))
            }
            (Value::Series(a), Value::Scalar(b)) => {
                Ok(Value::Series(a.iter().map(|a| f(*a, *b)).collect()))
            }
            (Value::Series(a), Value::Series(b)) => {
                if a.len() != b.len() {
                    return Err(ExprError::Type(format!(
                        "length mismatch: {} vs {}",
                        a.len(),
                        b.len()
                    )));
                }
                Ok(Value::Series(
                    a.iter().zip(b).map(|(a, b)| f(*a, *b)).collect(),
                ))
            }
        }
    }

    /// Expand to exactly `rows` values: scalars broadcast, series must match.
    pub fn into_column(self, rows: usize) -> Result<Vec<f64>> {
        match self {
            Value::Scalar(v) => Ok(vec![v; rows]),
            Value::Series(values) if values.len() == rows => Ok(values),
            Value::Series(values) => Err(ExprError::Type(format!(
                "expression produced {} values for {} rows",
                values.len(),
                rows
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Binding<'a> {
    Series(&'a [f64]),
    Scalar(f64),
}

/// Variables visible to an expression, borrowed from their owners.
#[derive(Debug, Default, Clone)]
pub struct Scope<'a> {
    vars: HashMap<String, Binding<'a>>,
}

impl<'a> Scope<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_series(&mut self, name: impl Into<String>, values: &'a [f64]) {
        self.vars.insert(name.into(), Binding::Series(values));
    }

    pub fn push_scalar(&mut self, name: impl Into<String>, value: f64) {
        self.vars.insert(name.into(), Binding::Scalar(value));
    }

    pub fn with_series(mut self, name: impl Into<String>, values: &'a [f64]) -> Self {
        self.push_series(name, values);
        self
    }

    pub fn with_scalar(mut self, name: impl Into<String>, value: f64) -> Self {
        self.push_scalar(name, value);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.vars.get(name).map(|binding| match binding {
            Binding::Series(values) => Value::Series(values.to_vec()),
            Binding::Scalar(v) => Value::Scalar(*v),
        })
    }
}

/// Expression evaluator: built-in math plus an optional user function library.
///
/// Division, floor division and modulo by zero raise
/// [`ExprError::ZeroDivision`] unless [`Evaluator::ieee_division`] is set,
/// in which case they yield `inf`/`NaN` like plain floating point.
#[derive(Clone, Default)]
pub struct Evaluator {
    library: Option<Arc<FunctionLibrary>>,
    ieee_division: bool,
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("library", &self.library.as_ref().map(|l| l.function_names()))
            .field("ieee_division", &self.ieee_division)
            .finish()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_library(library: Arc<FunctionLibrary>) -> Self {
        Evaluator {
            library: Some(library),
            ieee_division: false,
        }
    }

    /// Same evaluator, but division by zero produces `inf`/`NaN`.
    pub fn ieee_division(mut self) -> Self {
        self.ieee_division = true;
        self
    }

    pub fn library(&self) -> Option<&Arc<FunctionLibrary>> {
        self.library.as_ref()
    }

    /// Whether `name` is a function or constant rather than a free variable.
    pub fn is_known_symbol(&self, name: &str) -> bool {
        builtins::is_known_symbol(name)
            || self
                .library
                .as_ref()
                .is_some_and(|library| library.contains(name))
    }

    /// Parse and evaluate `expression`.
    pub fn eval_str(&self, expression: &str, scope: &Scope<'_>) -> Result<Value> {
        let program = parse(expression)?;
        self.eval(&program, scope)
    }

    /// Evaluate a parsed program. The value of the last statement is the
    /// result; a program ending in an assignment has no output.
    pub fn eval(&self, program: &Program, scope: &Scope<'_>) -> Result<Value> {
        let mut locals: HashMap<String, Value> = HashMap::new();
        let mut output = None;
        for stmt in &program.statements {
            match stmt {
                Statement::Assign { target, value } => {
                    let v = self.eval_expr(value, scope, &locals)?;
                    locals.insert(target.clone(), v);
                    output = None;
                }
                Statement::Expr(expr) => {
                    output = Some(self.eval_expr(expr, scope, &locals)?);
                }
            }
        }
        output.ok_or(ExprError::NoOutput)
    }

    fn eval_expr(
        &self,
        expr: &Expr,
        scope: &Scope<'_>,
        locals: &HashMap<String, Value>,
    ) -> Result<Value> {
        match expr {
            Expr::Number { value, .. } => Ok(Value::Scalar(*value)),
            Expr::Ident(name) => locals
                .get(name)
                .cloned()
                .or_else(|| scope.get(name))
                .or_else(|| builtins::constant(name).map(Value::Scalar))
                .ok_or_else(|| ExprError::Name(name.clone())),
            Expr::Group(inner) => self.eval_expr(inner, scope, locals),
            Expr::Unary { op, operand } => {
                let v = self.eval_expr(operand, scope, locals)?;
                Ok(match op {
                    UnaryOp::Plus => v,
                    UnaryOp::Minus => v.map(|x| -x),
                })
            }
            Expr::Binary { op, lhs, rhs } => {
                let a = self.eval_expr(lhs, scope, locals)?;
                let b = self.eval_expr(rhs, scope, locals)?;
                binary(*op, &a, &b, self.ieee_division)
            }
            Expr::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval_expr(arg, scope, locals))
                    .collect::<Result<Vec<_>>>()?;
                self.call(name, args)
            }
        }
    }

    fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        if let Some(library) = self.library.as_ref().filter(|l| l.contains(name)) {
            return call_library(library, name, args);
        }
        match builtins::lookup(name) {
            Some(builtin) => builtins::call(builtin, args),
            None => Err(ExprError::UnknownFunction(name.to_string())),
        }
    }
}

fn binary(op: BinaryOp, a: &Value, b: &Value, ieee_division: bool) -> Result<Value> {
    if !ieee_division
        && matches!(op, BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod)
        && b.as_slice().iter().any(|v| *v == 0.0)
    {
        return Err(ExprError::ZeroDivision);
    }
    match op {
        BinaryOp::Add => a.zip_with(b, |x, y| x + y),
        BinaryOp::Sub => a.zip_with(b, |x, y| x - y),
        BinaryOp::Mul => a.zip_with(b, |x, y| x * y),
        BinaryOp::Div => a.zip_with(b, |x, y| x / y),
        BinaryOp::FloorDiv => a.zip_with(b, |x, y| (x / y).floor()),
        BinaryOp::Mod => a.zip_with(b, |x, y| x - y * (x / y).floor()),
        BinaryOp::Pow => a.zip_with(b, f64::powf),
    }
}

/// Apply a library function row by row, broadcasting scalar arguments.
fn call_library(library: &FunctionLibrary, name: &str, args: Vec<Value>) -> Result<Value> {
    let mut rows: Option<usize> = None;
    for arg in &args {
        if let Value::Series(values) = arg {
            match rows {
                Some(n) if n != values.len() => {
                    return Err(ExprError::Type(format!(
                        "length mismatch in call to {}()",
                        name
                    )));
                }
                _ => rows = Some(values.len()),
            }
        }
    }

    let row_args = |i: usize| -> Vec<f64> {
        args.iter()
            .map(|arg| match arg {
                Value::Scalar(v) => *v,
                Value::Series(values) => values[i],
            })
            .collect()
    };

    match rows {
        None => Ok(Value::Scalar(library.call(name, &row_args(0))?)),
        Some(n) => (0..n)
            .map(|i| library.call(name, &row_args(i)))
            .collect::<Result<Vec<_>>>()
            .map(Value::Series),
    }
}
