//! Error types for Tailor core.

use tailor_engine::ExprError;
use thiserror::Error;

/// Errors that can occur while editing a data sheet or fit model.
#[derive(Error, Debug)]
pub enum TailorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Csv { line: usize, message: String },

    #[error("Unknown column '{0}'")]
    UnknownColumn(String),

    #[error("Column name '{0}' is already in use")]
    DuplicateName(String),

    #[error("'{0}' is not a valid column name")]
    InvalidName(String),

    #[error("Column index {index} out of range (sheet has {len} columns)")]
    ColumnIndex { index: usize, len: usize },

    #[error("Row index {index} out of range (sheet has {len} rows)")]
    RowIndex { index: usize, len: usize },

    #[error("Column '{0}' is calculated and cannot be edited")]
    CalculatedColumn(String),

    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Fit(#[from] FitError),

    #[error("Project data error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid snapshot: {0}")]
    Snapshot(String),
}

/// Problems with a model expression or its parameters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Model expression is invalid: {0}")]
    Syntax(ExprError),

    #[error("Model does not use the independent variable '{0}'")]
    MissingIndependentVariable(String),

    #[error("Model uses the dependent variable '{0}'")]
    DependentVariable(String),

    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),
}

/// A fit that could not be performed or did not converge.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("No valid model to fit")]
    NoModel,

    #[error("Not enough data: {points} point(s) for {parameters} free parameter(s)")]
    InsufficientData { points: usize, parameters: usize },

    #[error("Model produces no finite residuals at the initial parameter values")]
    NonFinite,

    #[error("Fit did not converge after {nfev} function evaluations")]
    NotConverged { nfev: usize },

    #[error("Fit matrix is singular")]
    Singular,

    #[error("Model evaluation failed: {0}")]
    Evaluation(ExprError),
}

pub type Result<T> = std::result::Result<T, TailorError>;
