//! Built-in math functions and constants available to expressions.
//!
//! Conventions:
//! - Element-wise functions accept scalars or series and broadcast.
//! - Reductions collapse a series to a scalar; NaN propagates.
//! - If you add a function, add it to `BUILTINS`; [`is_known_symbol`] and
//!   the evaluator both read from that table.

use crate::engine::Value;
use crate::error::{ExprError, Result};

#[derive(Clone, Copy)]
pub enum BuiltinKind {
    /// One argument, applied element-wise.
    Unary(fn(f64) -> f64),
    /// Two arguments, applied element-wise with broadcasting.
    Binary(fn(f64, f64) -> f64),
    /// One argument reduced to a scalar.
    Reduce(fn(&[f64]) -> f64),
    /// One series in, one series of the same length out.
    Series(fn(&[f64]) -> Result<Vec<f64>>),
    /// One argument: reduction. Two arguments: element-wise.
    Extremum(fn(f64, f64) -> f64),
}

pub struct Builtin {
    pub name: &'static str,
    pub kind: BuiltinKind,
    #[allow(dead_code)]
    pub description: &'static str,
}

macro_rules! builtin {
    ($name:literal, $kind:ident($f:expr), $desc:literal) => {
        Builtin {
            name: $name,
            kind: BuiltinKind::$kind($f),
            description: $desc,
        }
    };
}

pub const BUILTINS: &[Builtin] = &[
    builtin!("abs", Unary(f64::abs), "Absolute value"),
    builtin!("sqrt", Unary(f64::sqrt), "Square root"),
    builtin!("exp", Unary(f64::exp), "Exponential"),
    builtin!("log", Unary(f64::ln), "Natural logarithm"),
    builtin!("log10", Unary(f64::log10), "Base-10 logarithm"),
    builtin!("log2", Unary(f64::log2), "Base-2 logarithm"),
    builtin!("sin", Unary(f64::sin), "Sine (radians)"),
    builtin!("cos", Unary(f64::cos), "Cosine (radians)"),
    builtin!("tan", Unary(f64::tan), "Tangent (radians)"),
    builtin!("arcsin", Unary(f64::asin), "Inverse sine"),
    builtin!("arccos", Unary(f64::acos), "Inverse cosine"),
    builtin!("arctan", Unary(f64::atan), "Inverse tangent"),
    builtin!("asin", Unary(f64::asin), "Inverse sine"),
    builtin!("acos", Unary(f64::acos), "Inverse cosine"),
    builtin!("atan", Unary(f64::atan), "Inverse tangent"),
    builtin!("sinh", Unary(f64::sinh), "Hyperbolic sine"),
    builtin!("cosh", Unary(f64::cosh), "Hyperbolic cosine"),
    builtin!("tanh", Unary(f64::tanh), "Hyperbolic tangent"),
    builtin!("arcsinh", Unary(f64::asinh), "Inverse hyperbolic sine"),
    builtin!("arccosh", Unary(f64::acosh), "Inverse hyperbolic cosine"),
    builtin!("arctanh", Unary(f64::atanh), "Inverse hyperbolic tangent"),
    builtin!("floor", Unary(f64::floor), "Round down"),
    builtin!("ceil", Unary(f64::ceil), "Round up"),
    builtin!("round", Unary(f64::round_ties_even), "Round half to even"),
    builtin!("sign", Unary(sign), "Sign of a number (0 for zero)"),
    builtin!("degrees", Unary(f64::to_degrees), "Radians to degrees"),
    builtin!("radians", Unary(f64::to_radians), "Degrees to radians"),
    builtin!("arctan2", Binary(f64::atan2), "Quadrant-aware inverse tangent of y/x"),
    builtin!("atan2", Binary(f64::atan2), "Quadrant-aware inverse tangent of y/x"),
    builtin!("hypot", Binary(f64::hypot), "Euclidean norm of two values"),
    builtin!("pow", Binary(f64::powf), "x raised to the power y"),
    builtin!("min", Extremum(nan_min), "Minimum of a series, or element-wise minimum"),
    builtin!("max", Extremum(nan_max), "Maximum of a series, or element-wise maximum"),
    builtin!("sum", Reduce(sum), "Sum of a series"),
    builtin!("mean", Reduce(mean), "Arithmetic mean of a series"),
    builtin!("std", Reduce(std_dev), "Population standard deviation of a series"),
    builtin!("var", Reduce(variance), "Population variance of a series"),
    builtin!("cumsum", Series(cumsum), "Cumulative sum"),
    builtin!("gradient", Series(gradient), "Numerical derivative with unit spacing"),
];

pub const CONSTANTS: &[(&str, f64)] = &[
    ("pi", std::f64::consts::PI),
    ("e", std::f64::consts::E),
    ("tau", std::f64::consts::TAU),
    ("inf", f64::INFINITY),
    ("nan", f64::NAN),
];

pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

pub fn constant(name: &str) -> Option<f64> {
    CONSTANTS.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
}

/// Whether `name` is a built-in function or constant.
pub fn is_known_symbol(name: &str) -> bool {
    lookup(name).is_some() || constant(name).is_some()
}

/// Apply a built-in to already evaluated arguments.
pub fn call(builtin: &Builtin, args: Vec<Value>) -> Result<Value> {
    let found = args.len();
    let arity_error = |expected: &str| ExprError::Arity {
        name: builtin.name.to_string(),
        expected: expected.to_string(),
        found,
    };
    match builtin.kind {
        BuiltinKind::Unary(f) => {
            let [arg] = take::<1>(args).map_err(|_| arity_error("1"))?;
            Ok(arg.map(f))
        }
        BuiltinKind::Binary(f) => {
            let [a, b] = take::<2>(args).map_err(|_| arity_error("2"))?;
            a.zip_with(&b, f)
        }
        BuiltinKind::Reduce(f) => {
            let [arg] = take::<1>(args).map_err(|_| arity_error("1"))?;
            Ok(Value::Scalar(f(arg.as_slice())))
        }
        BuiltinKind::Series(f) => {
            let [arg] = take::<1>(args).map_err(|_| arity_error("1"))?;
            match arg {
                Value::Series(values) => Ok(Value::Series(f(&values)?)),
                Value::Scalar(_) => Err(ExprError::Type(format!(
                    "{}() requires a column, got a scalar",
                    builtin.name
                ))),
            }
        }
        BuiltinKind::Extremum(f) => match found {
            1 => {
                let [arg] = take::<1>(args).map_err(|_| arity_error("1 or 2"))?;
                let values = arg.as_slice();
                if values.is_empty() {
                    return Err(ExprError::Type(format!(
                        "{}() of an empty column",
                        builtin.name
                    )));
                }
                Ok(Value::Scalar(values.iter().copied().fold(values[0], f)))
            }
            2 => {
                let [a, b] = take::<2>(args).map_err(|_| arity_error("1 or 2"))?;
                a.zip_with(&b, f)
            }
            _ => Err(arity_error("1 or 2")),
        },
    }
}

fn take<const N: usize>(args: Vec<Value>) -> std::result::Result<[Value; N], Vec<Value>> {
    args.try_into()
}

fn sign(x: f64) -> f64 {
    if x.is_nan() || x == 0.0 { x } else { x.signum() }
}

fn nan_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() { f64::NAN } else { a.min(b) }
}

fn nan_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) }
}

fn sum(values: &[f64]) -> f64 {
    values.iter().sum()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    sum(values) / values.len() as f64
}

fn variance(values: &[f64]) -> f64 {
    let m = mean(values);
    mean(&values.iter().map(|v| (v - m).powi(2)).collect::<Vec<_>>())
}

fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

fn cumsum(values: &[f64]) -> Result<Vec<f64>> {
    let mut total = 0.0;
    Ok(values
        .iter()
        .map(|v| {
            total += v;
            total
        })
        .collect())
}

fn gradient(values: &[f64]) -> Result<Vec<f64>> {
    let n = values.len();
    if n < 2 {
        return Err(ExprError::Type(
            "gradient() requires at least two rows".to_string(),
        ));
    }
    let mut out = Vec::with_capacity(n);
    out.push(values[1] - values[0]);
    for i in 1..n - 1 {
        out.push((values[i + 1] - values[i - 1]) / 2.0);
    }
    out.push(values[n - 1] - values[n - 2]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[f64]) -> Value {
        Value::Series(values.to_vec())
    }

    #[test]
    fn test_unary_broadcasts() {
        let out = call(lookup("sqrt").unwrap(), vec![series(&[1.0, 4.0, 9.0])]).unwrap();
        assert_eq!(out, series(&[1.0, 2.0, 3.0]));
        let out = call(lookup("abs").unwrap(), vec![Value::Scalar(-2.0)]).unwrap();
        assert_eq!(out, Value::Scalar(2.0));
    }

    #[test]
    fn test_min_max_reduce_or_elementwise() {
        let max = lookup("max").unwrap();
        assert_eq!(
            call(max, vec![series(&[1.0, 5.0, 3.0])]).unwrap(),
            Value::Scalar(5.0)
        );
        assert_eq!(
            call(max, vec![series(&[1.0, 5.0]), Value::Scalar(2.0)]).unwrap(),
            series(&[2.0, 5.0])
        );
        let min = lookup("min").unwrap();
        let out = call(min, vec![series(&[1.0, f64::NAN])]).unwrap();
        assert!(out.as_slice()[0].is_nan());
    }

    #[test]
    fn test_arity_error() {
        let err = call(lookup("sin").unwrap(), vec![]).unwrap_err();
        assert!(matches!(err, ExprError::Arity { found: 0, .. }));
    }

    #[test]
    fn test_statistics() {
        let data = series(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(
            call(lookup("mean").unwrap(), vec![data.clone()]).unwrap(),
            Value::Scalar(5.0)
        );
        assert_eq!(
            call(lookup("std").unwrap(), vec![data]).unwrap(),
            Value::Scalar(2.0)
        );
    }

    #[test]
    fn test_gradient_and_cumsum() {
        assert_eq!(
            gradient(&[1.0, 2.0, 4.0, 7.0, 11.0]).unwrap(),
            vec![1.0, 1.5, 2.5, 3.5, 4.0]
        );
        assert_eq!(cumsum(&[1.0, 2.0, 3.0]).unwrap(), vec![1.0, 3.0, 6.0]);
        assert!(gradient(&[1.0]).is_err());
    }

    #[test]
    fn test_sign_and_round() {
        assert_eq!(sign(0.0), 0.0);
        assert_eq!(sign(-3.0), -1.0);
        assert_eq!(f64::round_ties_even(2.5), 2.0);
    }

    #[test]
    fn test_known_symbols() {
        assert!(is_known_symbol("pi"));
        assert!(is_known_symbol("arctan2"));
        assert!(!is_known_symbol("a"));
    }
}
