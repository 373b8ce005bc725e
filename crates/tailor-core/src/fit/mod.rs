//! Fit models: an algebraic model bound to an (x, y) column pair.
//!
//! The model expression is stored in terms of the x column's label, so
//! renaming columns never invalidates it. Everything else in the expression
//! that is not a known function or constant becomes a fit parameter.
//!
//! A successful fit is cached together with a checksum of the data it was
//! computed from; [`FitModel::verify_best_fit_data`] drops the cached
//! result once the data no longer matches.

mod checksum;
mod parameter;
mod solver;

pub use checksum::hash_data;
pub use parameter::{Parameter, ParameterSnapshot};
pub use solver::{FitOptions, Solution, least_squares};

use crate::error::{FitError, ModelError, Result, TailorError};
use crate::source::DataSource;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tailor_engine::engine::{Program, free_variables, parse, rename_program, rename_variables};
use tailor_engine::{Evaluator, ExprError, Scope};
use tracing::{debug, warn};

/// The rows a fit works on. Errors default to zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitData {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub x_err: Vec<f64>,
    pub y_err: Vec<f64>,
}

impl FitData {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    fn retain_rows(&mut self, keep: impl Fn(usize) -> bool) {
        let rows: Vec<usize> = (0..self.len()).filter(|&i| keep(i)).collect();
        for series in [&mut self.x, &mut self.y, &mut self.x_err, &mut self.y_err] {
            *series = rows.iter().map(|&i| series[i]).collect();
        }
    }
}

/// A fitted parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct FitParameter {
    pub name: String,
    pub value: f64,
    /// `None` when the covariance could not be estimated or the parameter
    /// was fixed.
    pub stderr: Option<f64>,
    pub init_value: f64,
    pub vary: bool,
}

/// Cached result of [`FitModel::perform_fit`].
#[derive(Debug, Clone, PartialEq)]
pub struct BestFit {
    pub params: Vec<FitParameter>,
    pub chisqr: f64,
    pub redchi: f64,
    pub aic: f64,
    pub bic: f64,
    pub ndata: usize,
    pub nvarys: usize,
    pub nfev: usize,
    pub message: String,
}

impl BestFit {
    pub fn value(&self, name: &str) -> Option<f64> {
        self.params.iter().find(|p| p.name == name).map(|p| p.value)
    }

    pub fn parameter(&self, name: &str) -> Option<&FitParameter> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// Serializable fit model state. Column references are labels and the
/// expression is label-addressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitModelSnapshot {
    pub x_col: String,
    pub y_col: String,
    pub x_err_col: Option<String>,
    pub y_err_col: Option<String>,
    pub model_expression: Option<String>,
    pub parameters: Vec<ParameterSnapshot>,
    pub fit_domain: (Option<f64>, Option<f64>),
    pub use_fit_domain: bool,
    pub has_best_fit: bool,
}

#[derive(Debug, Clone)]
pub struct FitModel {
    x_col: String,
    y_col: String,
    x_err_col: Option<String>,
    y_err_col: Option<String>,
    /// Label-addressed expression, or the raw text if it does not parse.
    expression: Option<String>,
    program: Option<Program>,
    model_error: Option<ModelError>,
    parameters: BTreeMap<String, Parameter>,
    fit_domain: (f64, f64),
    use_fit_domain: bool,
    best_fit: Option<BestFit>,
    checksum: Option<u64>,
    evaluator: Evaluator,
    options: FitOptions,
}

impl FitModel {
    /// Model over the columns `x_col`/`y_col` (labels) of `source`.
    pub fn new(
        source: &dyn DataSource,
        x_col: &str,
        y_col: &str,
        x_err_col: Option<&str>,
        y_err_col: Option<&str>,
    ) -> Result<Self> {
        for label in [Some(x_col), Some(y_col), x_err_col, y_err_col].into_iter().flatten() {
            if source.column_values(label).is_none() {
                return Err(TailorError::UnknownColumn(label.to_string()));
            }
        }
        Ok(FitModel {
            x_col: x_col.to_string(),
            y_col: y_col.to_string(),
            x_err_col: x_err_col.map(str::to_string),
            y_err_col: y_err_col.map(str::to_string),
            expression: None,
            program: None,
            model_error: None,
            parameters: BTreeMap::new(),
            fit_domain: (f64::NEG_INFINITY, f64::INFINITY),
            use_fit_domain: false,
            best_fit: None,
            checksum: None,
            // a model like `a / x` must not abort the fit at x = 0
            evaluator: source.evaluator().clone().ieee_division(),
            options: FitOptions::default(),
        })
    }

    pub fn with_options(mut self, options: FitOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &FitOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: FitOptions) {
        if options != self.options {
            self.options = options;
            self.clear_fit();
        }
    }

    pub fn x_col(&self) -> &str {
        &self.x_col
    }

    pub fn y_col(&self) -> &str {
        &self.y_col
    }

    pub fn x_err_col(&self) -> Option<&str> {
        self.x_err_col.as_deref()
    }

    pub fn y_err_col(&self) -> Option<&str> {
        self.y_err_col.as_deref()
    }

    pub fn x_col_name<'s>(&self, source: &'s dyn DataSource) -> Option<&'s str> {
        source.column_name(&self.x_col)
    }

    pub fn y_col_name<'s>(&self, source: &'s dyn DataSource) -> Option<&'s str> {
        source.column_name(&self.y_col)
    }

    pub fn x_err_col_name<'s>(&self, source: &'s dyn DataSource) -> Option<&'s str> {
        self.x_err_col.as_deref().and_then(|l| source.column_name(l))
    }

    pub fn y_err_col_name<'s>(&self, source: &'s dyn DataSource) -> Option<&'s str> {
        self.y_err_col.as_deref().and_then(|l| source.column_name(l))
    }

    /// Whether any of the model's columns is among `labels`.
    pub fn uses(&self, labels: &[&str]) -> bool {
        [Some(&self.x_col), Some(&self.y_col), self.x_err_col.as_ref(), self.y_err_col.as_ref()]
            .into_iter()
            .flatten()
            .any(|col| labels.contains(&col.as_str()))
    }

    /// Expression with the x column's current name, or the raw text of an
    /// unparseable expression.
    pub fn model_expression(&self, source: &dyn DataSource) -> Option<String> {
        let expression = self.expression.as_ref()?;
        if self.program.is_none() && matches!(self.model_error, Some(ModelError::Syntax(_))) {
            return Some(expression.clone());
        }
        let name = source.column_name(&self.x_col).unwrap_or(&self.x_col);
        let mapping = HashMap::from([(self.x_col.clone(), name.to_string())]);
        Some(rename_variables(expression, &mapping).unwrap_or_else(|_| expression.clone()))
    }

    pub fn is_model_valid(&self) -> bool {
        self.program.is_some()
    }

    pub fn model_error(&self) -> Option<&ModelError> {
        self.model_error.as_ref()
    }

    /// Set the model from an expression written with column names.
    ///
    /// Returns `Ok(false)` when the stored expression does not change (the
    /// cached fit is kept), `Ok(true)` otherwise. An unparseable expression
    /// is kept verbatim and leaves the model unevaluable.
    pub fn update_model_expression(&mut self, source: &dyn DataSource, expression: &str) -> Result<bool> {
        let x_name = source.column_name(&self.x_col).unwrap_or(&self.x_col).to_string();
        let parsed = parse(expression).map(|mut program| {
            let mapping = HashMap::from([(x_name, self.x_col.clone())]);
            rename_program(&mut program, &mapping);
            program
        });
        let stored = match &parsed {
            Ok(program) => program.to_string(),
            Err(_) => expression.to_string(),
        };
        if self.expression.as_deref() == Some(stored.as_str()) {
            return Ok(false);
        }
        self.clear_fit();
        self.expression = Some(stored);
        self.install(source, parsed)?;
        Ok(true)
    }

    /// Adopt a parsed (label form) program, rebuilding the parameter set.
    fn install(&mut self, source: &dyn DataSource, parsed: std::result::Result<Program, ExprError>) -> Result<()> {
        self.program = None;
        let program = match parsed {
            Ok(program) => program,
            Err(err) => {
                debug!(error = %err, "model expression does not parse");
                self.model_error = Some(ModelError::Syntax(err));
                return Ok(());
            }
        };

        let free = free_variables(&program);
        let y_name = source.column_name(&self.y_col).unwrap_or(&self.y_col);
        if free.contains(y_name) || free.contains(&self.y_col) {
            let err = ModelError::DependentVariable(y_name.to_string());
            warn!(error = %err, "model rejected");
            self.model_error = Some(err.clone());
            return Err(err.into());
        }
        if !free.contains(&self.x_col) {
            let x_name = source.column_name(&self.x_col).unwrap_or(&self.x_col);
            self.model_error = Some(ModelError::MissingIndependentVariable(x_name.to_string()));
            return Ok(());
        }

        let names: Vec<&String> = free
            .iter()
            .filter(|name| **name != self.x_col && !self.evaluator.is_known_symbol(name))
            .collect();
        self.parameters.retain(|name, _| names.contains(&name));
        for name in names {
            self.parameters
                .entry(name.clone())
                .or_insert_with(|| Parameter::new(name.clone()));
        }
        self.model_error = None;
        self.program = Some(program);
        Ok(())
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.get(name)
    }

    /// Parameter names in sorted order.
    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.keys().cloned().collect()
    }

    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.values()
    }

    fn parameter_mut(&mut self, name: &str) -> Result<&mut Parameter> {
        self.parameters
            .get_mut(name)
            .ok_or_else(|| ModelError::UnknownParameter(name.to_string()).into())
    }

    fn update_parameter(&mut self, name: &str, update: impl FnOnce(&mut Parameter)) -> Result<()> {
        let param = self.parameter_mut(name)?;
        let before = param.clone();
        update(param);
        if *param != before {
            self.clear_fit();
        }
        Ok(())
    }

    pub fn set_parameter_value(&mut self, name: &str, value: f64) -> Result<()> {
        self.update_parameter(name, |p| p.value = value)
    }

    /// `None` removes the bound.
    pub fn set_parameter_min(&mut self, name: &str, min: Option<f64>) -> Result<()> {
        self.update_parameter(name, |p| p.min = min.unwrap_or(f64::NEG_INFINITY))
    }

    /// `None` removes the bound.
    pub fn set_parameter_max(&mut self, name: &str, max: Option<f64>) -> Result<()> {
        self.update_parameter(name, |p| p.max = max.unwrap_or(f64::INFINITY))
    }

    pub fn set_parameter_vary(&mut self, name: &str, vary: bool) -> Result<()> {
        self.update_parameter(name, |p| p.vary = vary)
    }

    pub fn fit_domain(&self) -> (f64, f64) {
        self.fit_domain
    }

    /// Set the inclusive x range of the fit; `None` leaves that side open.
    pub fn set_fit_domain(&mut self, min: Option<f64>, max: Option<f64>) {
        let domain = (min.unwrap_or(f64::NEG_INFINITY), max.unwrap_or(f64::INFINITY));
        if domain != self.fit_domain {
            self.fit_domain = domain;
            self.clear_fit();
        }
    }

    pub fn fit_domain_enabled(&self) -> bool {
        self.use_fit_domain
    }

    pub fn set_fit_domain_enabled(&mut self, enabled: bool) {
        if enabled != self.use_fit_domain {
            self.use_fit_domain = enabled;
            self.clear_fit();
        }
    }

    fn series<'s>(&self, source: &'s dyn DataSource, label: &str) -> Result<&'s [f64]> {
        source
            .column_values(label)
            .ok_or_else(|| TailorError::UnknownColumn(label.to_string()))
    }

    /// All rows where x, y and both errors are finite.
    pub fn get_data(&self, source: &dyn DataSource) -> Result<FitData> {
        let x = self.series(source, &self.x_col)?;
        let y = self.series(source, &self.y_col)?;
        let rows = x.len();
        let err = |label: &Option<String>| -> Result<Vec<f64>> {
            match label {
                Some(label) => Ok(self.series(source, label)?.to_vec()),
                None => Ok(vec![0.0; rows]),
            }
        };
        let mut data = FitData {
            x: x.to_vec(),
            y: y.to_vec(),
            x_err: err(&self.x_err_col)?,
            y_err: err(&self.y_err_col)?,
        };
        let finite: Vec<bool> = (0..rows)
            .map(|i| {
                [&data.x, &data.y, &data.x_err, &data.y_err]
                    .iter()
                    .all(|series| series.get(i).is_some_and(|v| v.is_finite()))
            })
            .collect();
        data.retain_rows(|i| finite[i]);
        Ok(data)
    }

    /// [`FitModel::get_data`], restricted to the fit domain when enabled.
    pub fn get_data_in_fit_domain(&self, source: &dyn DataSource) -> Result<FitData> {
        let mut data = self.get_data(source)?;
        if self.use_fit_domain {
            let (min, max) = self.fit_domain;
            let inside: Vec<bool> = data.x.iter().map(|x| min <= *x && *x <= max).collect();
            data.retain_rows(|i| inside[i]);
        }
        Ok(data)
    }

    /// `(xmin, xmax, ymin, ymax)` of the data including error bars, each
    /// range widened by `padding` times its width on both sides. `None`
    /// when there is no usable data.
    pub fn limits_from_data(&self, source: &dyn DataSource, padding: f64) -> Option<(f64, f64, f64, f64)> {
        let data = self.get_data(source).ok()?;
        if data.is_empty() {
            return None;
        }
        let bounds = |values: &[f64], errors: &[f64]| {
            let lo = values.iter().zip(errors).map(|(v, e)| v - e).fold(f64::INFINITY, f64::min);
            let hi = values.iter().zip(errors).map(|(v, e)| v + e).fold(f64::NEG_INFINITY, f64::max);
            let pad = padding * (hi - lo);
            (lo - pad, hi + pad)
        };
        let (xmin, xmax) = bounds(&data.x, &data.x_err);
        let (ymin, ymax) = bounds(&data.y, &data.y_err);
        Some((xmin, xmax, ymin, ymax))
    }

    fn evaluate_with(&self, x: &[f64], values: &BTreeMap<&str, f64>) -> std::result::Result<Vec<f64>, ExprError> {
        let program = self.program.as_ref().ok_or(ExprError::NoOutput)?;
        let mut scope = Scope::new().with_series(self.x_col.clone(), x);
        for (name, value) in values {
            scope.push_scalar(*name, *value);
        }
        self.evaluator.eval(program, &scope)?.into_column(x.len())
    }

    /// Model at `x` with the current parameter values.
    pub fn evaluate_model(&self, x: &[f64]) -> Option<Vec<f64>> {
        let values = self
            .parameters
            .values()
            .map(|p| (p.name.as_str(), p.value))
            .collect();
        self.evaluate_with(x, &values).ok()
    }

    /// Model at `x` with the best-fit parameter values.
    pub fn evaluate_best_fit(&self, x: &[f64]) -> Option<Vec<f64>> {
        let fit = self.best_fit.as_ref()?;
        let values = fit.params.iter().map(|p| (p.name.as_str(), p.value)).collect();
        self.evaluate_with(x, &values).ok()
    }

    pub fn best_fit(&self) -> Option<&BestFit> {
        self.best_fit.as_ref()
    }

    pub fn has_best_fit(&self) -> bool {
        self.best_fit.is_some()
    }

    fn clear_fit(&mut self) {
        self.best_fit = None;
        self.checksum = None;
    }

    /// Fit the model to the (domain-filtered) data. On failure the cached
    /// fit stays cleared.
    pub fn perform_fit(&mut self, source: &dyn DataSource) -> Result<&BestFit> {
        self.clear_fit();
        if self.program.is_none() {
            return Err(FitError::NoModel.into());
        }
        let data = self.get_data_in_fit_domain(source)?;
        let checksum = hash_data(&data);

        let params: Vec<Parameter> = self.parameters.values().cloned().collect();
        let weights: Vec<f64> = data
            .y_err
            .iter()
            .map(|err| 1.0 / (err + self.options.weight_epsilon))
            .collect();
        let model = |values: &[f64]| {
            let named = params
                .iter()
                .zip(values)
                .map(|(p, v)| (p.name.as_str(), *v))
                .collect();
            self.evaluate_with(&data.x, &named)
        };
        let solution = least_squares(model, &data.y, &weights, &params, &self.options)?;

        let fit = BestFit {
            params: params
                .iter()
                .zip(&solution.values)
                .zip(&solution.stderr)
                .map(|((p, value), stderr)| FitParameter {
                    name: p.name.clone(),
                    value: *value,
                    stderr: *stderr,
                    init_value: p.value,
                    vary: p.vary,
                })
                .collect(),
            chisqr: solution.chisqr,
            redchi: solution.redchi,
            aic: solution.aic,
            bic: solution.bic,
            ndata: solution.ndata,
            nvarys: solution.nvarys,
            nfev: solution.nfev,
            message: solution.message,
        };
        debug!(ndata = fit.ndata, nfev = fit.nfev, chisqr = fit.chisqr, "fit performed");
        self.checksum = Some(checksum);
        Ok(self.best_fit.insert(fit))
    }

    /// Whether the cached fit still matches the data. A mismatch (or data
    /// that can no longer be read) drops the cached fit.
    pub fn verify_best_fit_data(&mut self, source: &dyn DataSource) -> bool {
        let Some(expected) = self.checksum else {
            return false;
        };
        let matches = self
            .get_data_in_fit_domain(source)
            .is_ok_and(|data| hash_data(&data) == expected);
        if !matches {
            debug!("data changed since the last fit; discarding it");
            self.clear_fit();
        }
        matches
    }

    pub fn snapshot(&self) -> FitModelSnapshot {
        let bound = |v: f64| v.is_finite().then_some(v);
        FitModelSnapshot {
            x_col: self.x_col.clone(),
            y_col: self.y_col.clone(),
            x_err_col: self.x_err_col.clone(),
            y_err_col: self.y_err_col.clone(),
            model_expression: self.expression.clone(),
            parameters: self.parameters.values().map(ParameterSnapshot::from).collect(),
            fit_domain: (bound(self.fit_domain.0), bound(self.fit_domain.1)),
            use_fit_domain: self.use_fit_domain,
            has_best_fit: self.best_fit.is_some(),
        }
    }

    /// Rebuild a model from a snapshot. A snapshot taken with a fit re-runs
    /// it; a fit that fails now is logged and left out. Only unknown columns
    /// are an error.
    pub fn from_snapshot(snapshot: &FitModelSnapshot, source: &dyn DataSource) -> Result<Self> {
        let mut model = FitModel::new(
            source,
            &snapshot.x_col,
            &snapshot.y_col,
            snapshot.x_err_col.as_deref(),
            snapshot.y_err_col.as_deref(),
        )?;
        if let Some(expression) = &snapshot.model_expression {
            model.expression = Some(expression.clone());
            // A rejected model is restored as it was saved: kept, with its error.
            if let Err(err) = model.install(source, parse(expression)) {
                debug!(error = %err, "restored model is not valid");
            }
        }
        for saved in &snapshot.parameters {
            if let Some(param) = model.parameters.get_mut(&saved.name) {
                *param = Parameter::from(saved);
            }
        }
        model.fit_domain = (
            snapshot.fit_domain.0.unwrap_or(f64::NEG_INFINITY),
            snapshot.fit_domain.1.unwrap_or(f64::INFINITY),
        );
        model.use_fit_domain = snapshot.use_fit_domain;
        if snapshot.has_best_fit {
            if let Err(err) = model.perform_fit(source) {
                warn!(error = %err, "could not restore fit");
            }
        }
        Ok(model)
    }
}
