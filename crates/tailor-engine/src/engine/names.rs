//! Variable-name handling: label/name rewriting and name normalization.
//!
//! Expressions are stored with column labels (`col3`) and shown with column
//! names (`speed`). [`rename_variables`] converts between the two forms by
//! rewriting variable reads in the syntax tree, leaving function names and
//! assignment targets alone.

use super::ast::{Expr, Program, Statement};
use super::parser::parse;
use crate::error::Result;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

/// Rewrite variable reads in `expression` according to `mapping`.
///
/// Identifiers not present in the mapping are left as they are. The result
/// is re-serialized from the syntax tree, so whitespace is normalized.
pub fn rename_variables(expression: &str, mapping: &HashMap<String, String>) -> Result<String> {
    let mut program = parse(expression)?;
    rename_program(&mut program, mapping);
    Ok(program.to_string())
}

/// In-place variant of [`rename_variables`] for an already parsed program.
pub fn rename_program(program: &mut Program, mapping: &HashMap<String, String>) {
    for stmt in &mut program.statements {
        match stmt {
            Statement::Assign { value, .. } => rename_expr(value, mapping),
            Statement::Expr(expr) => rename_expr(expr, mapping),
        }
    }
}

fn rename_expr(expr: &mut Expr, mapping: &HashMap<String, String>) {
    match expr {
        Expr::Number { .. } => {}
        Expr::Ident(name) => {
            if let Some(new_name) = mapping.get(name.as_str()) {
                *name = new_name.clone();
            }
        }
        Expr::Unary { operand, .. } => rename_expr(operand, mapping),
        Expr::Binary { lhs, rhs, .. } => {
            rename_expr(lhs, mapping);
            rename_expr(rhs, mapping);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                rename_expr(arg, mapping);
            }
        }
        Expr::Group(inner) => rename_expr(inner, mapping),
    }
}

/// All identifiers in `expression`: variables, function names and
/// assignment targets.
pub fn get_variable_names(expression: &str) -> Result<BTreeSet<String>> {
    let program = parse(expression)?;
    let mut names = BTreeSet::new();
    for stmt in &program.statements {
        match stmt {
            Statement::Assign { target, value } => {
                names.insert(target.clone());
                collect_names(value, &mut names);
            }
            Statement::Expr(expr) => collect_names(expr, &mut names),
        }
    }
    Ok(names)
}

/// Variables read by `program` that are not assigned earlier in it.
pub fn free_variables(program: &Program) -> BTreeSet<String> {
    let mut assigned = BTreeSet::new();
    let mut free = BTreeSet::new();
    for stmt in &program.statements {
        let mut reads = BTreeSet::new();
        match stmt {
            Statement::Assign { value, .. } => collect_reads(value, &mut reads),
            Statement::Expr(expr) => collect_reads(expr, &mut reads),
        }
        free.extend(reads.into_iter().filter(|name| !assigned.contains(name)));
        if let Statement::Assign { target, .. } = stmt {
            assigned.insert(target.clone());
        }
    }
    free
}

fn collect_names(expr: &Expr, names: &mut BTreeSet<String>) {
    match expr {
        Expr::Number { .. } => {}
        Expr::Ident(name) => {
            names.insert(name.clone());
        }
        Expr::Unary { operand, .. } => collect_names(operand, names),
        Expr::Binary { lhs, rhs, .. } => {
            collect_names(lhs, names);
            collect_names(rhs, names);
        }
        Expr::Call { name, args } => {
            names.insert(name.clone());
            for arg in args {
                collect_names(arg, names);
            }
        }
        Expr::Group(inner) => collect_names(inner, names),
    }
}

fn collect_reads(expr: &Expr, reads: &mut BTreeSet<String>) {
    match expr {
        Expr::Number { .. } => {}
        Expr::Ident(name) => {
            reads.insert(name.clone());
        }
        Expr::Unary { operand, .. } => collect_reads(operand, reads),
        Expr::Binary { lhs, rhs, .. } => {
            collect_reads(lhs, reads);
            collect_reads(rhs, reads);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                collect_reads(arg, reads);
            }
        }
        Expr::Group(inner) => collect_reads(inner, reads),
    }
}

fn invalid_char_re() -> &'static Regex {
    static INVALID_RE: OnceLock<Regex> = OnceLock::new();
    INVALID_RE.get_or_init(|| {
        Regex::new(r"[^A-Za-z0-9_]").expect("invalid name character regex must compile")
    })
}

/// Turn an arbitrary string into a valid variable name.
///
/// Every character outside `[A-Za-z0-9_]` becomes `_`, and a name starting
/// with a digit gets a leading `_`.
pub fn normalize_name(name: &str) -> String {
    let replaced = invalid_char_re().replace_all(name, "_");
    if replaced.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{}", replaced)
    } else {
        replaced.into_owned()
    }
}
