//! User function libraries written in Rhai.
//!
//! A library is a Rhai script defining plain functions:
//!
//! ```rhai
//! fn gauss(x, mu, sigma) {
//!     exp(-((x - mu) ** 2.0) / (2.0 * sigma ** 2.0))
//! }
//! ```
//!
//! Every function becomes callable from column and model expressions and is
//! applied row by row with floating point arguments. The script engine runs
//! without module imports or `eval`, with bounded operation count and call
//! depth; `print`/`debug` output goes to the log.

use crate::error::{ExprError, Result};
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{AST, Dynamic, Engine, Scope};
use std::collections::BTreeMap;

const MAX_OPERATIONS: u64 = 1_000_000;
const MAX_CALL_LEVELS: usize = 64;

#[derive(Debug)]
pub struct FunctionLibrary {
    engine: Engine,
    ast: AST,
    /// Function name -> accepted argument counts.
    signatures: BTreeMap<String, Vec<usize>>,
}

fn create_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_module_resolver(DummyModuleResolver::new());
    engine.disable_symbol("eval");
    engine.set_max_operations(MAX_OPERATIONS);
    engine.set_max_call_levels(MAX_CALL_LEVELS);
    engine.on_print(|text| tracing::info!(target: "tailor::functions", "{}", text));
    engine.on_debug(|text, source, pos| {
        tracing::debug!(target: "tailor::functions", ?source, %pos, "{}", text)
    });
    engine
}

impl FunctionLibrary {
    /// Compile a library from script text.
    pub fn compile(script: &str) -> Result<Self> {
        let engine = create_engine();
        let ast = engine
            .compile(script)
            .map_err(|e| ExprError::Library(format!("Error in custom functions: {}", e)))?;

        let mut signatures: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for f in ast.iter_functions() {
            signatures
                .entry(f.name.to_string())
                .or_default()
                .push(f.params.len());
        }
        tracing::debug!(functions = signatures.len(), "compiled function library");

        Ok(FunctionLibrary {
            engine,
            ast,
            signatures,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.signatures.contains_key(name)
    }

    pub fn function_names(&self) -> Vec<String> {
        self.signatures.keys().cloned().collect()
    }

    /// Argument counts accepted by `name`.
    pub fn arities(&self, name: &str) -> Option<&[usize]> {
        self.signatures.get(name).map(|v| v.as_slice())
    }

    /// Call a library function with scalar arguments.
    pub fn call(&self, name: &str, args: &[f64]) -> Result<f64> {
        let arities = self
            .arities(name)
            .ok_or_else(|| ExprError::UnknownFunction(name.to_string()))?;
        if !arities.contains(&args.len()) {
            let expected = arities
                .iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(" or ");
            return Err(ExprError::Arity {
                name: name.to_string(),
                expected,
                found: args.len(),
            });
        }

        let result: Dynamic = self
            .engine
            .call_fn(&mut Scope::new(), &self.ast, name, args.to_vec())
            .map_err(|e| ExprError::Library(format!("{}(): {}", name, e)))?;
        to_f64(&result).ok_or_else(|| {
            ExprError::Type(format!(
                "{}() returned {} instead of a number",
                name,
                result.type_name()
            ))
        })
    }
}

fn to_f64(value: &Dynamic) -> Option<f64> {
    if let Ok(f) = value.as_float() {
        return Some(f);
    }
    if let Ok(i) = value.as_int() {
        return Some(i as f64);
    }
    value.as_bool().ok().map(|b| if b { 1.0 } else { 0.0 })
}
