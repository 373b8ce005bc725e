//! Weighted nonlinear least squares (Levenberg-Marquardt).
//!
//! Bounded parameters are mapped to an unbounded internal space with the
//! MINUIT transformations, so the iteration itself is unconstrained.

use super::parameter::Parameter;
use crate::error::FitError;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tailor_engine::ExprError;
use tracing::debug;

/// Solver settings. `max_nfev = None` means `2000 * (nvarys + 1)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    pub max_nfev: Option<usize>,
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    /// Added to every y error before taking `1 / err` as the weight.
    pub weight_epsilon: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            max_nfev: None,
            ftol: 1.5e-8,
            xtol: 1.5e-8,
            gtol: 0.0,
            weight_epsilon: 1e-99,
        }
    }
}

/// Outcome of a successful minimization, in external parameter space.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub values: Vec<f64>,
    pub stderr: Vec<Option<f64>>,
    pub chisqr: f64,
    pub redchi: f64,
    pub aic: f64,
    pub bic: f64,
    pub nfev: usize,
    pub ndata: usize,
    pub nvarys: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
enum Bounds {
    Free,
    Lower(f64),
    Upper(f64),
    Both(f64, f64),
}

impl Bounds {
    fn of(p: &Parameter) -> Self {
        match (p.min.is_finite(), p.max.is_finite()) {
            (true, true) => Bounds::Both(p.min, p.max),
            (true, false) => Bounds::Lower(p.min),
            (false, true) => Bounds::Upper(p.max),
            (false, false) => Bounds::Free,
        }
    }

    fn to_internal(self, value: f64) -> f64 {
        match self {
            Bounds::Free => value,
            Bounds::Lower(min) => ((value - min + 1.0).powi(2) - 1.0).sqrt(),
            Bounds::Upper(max) => ((max - value + 1.0).powi(2) - 1.0).sqrt(),
            Bounds::Both(min, max) => (2.0 * (value - min) / (max - min) - 1.0).asin(),
        }
    }

    fn to_external(self, internal: f64) -> f64 {
        match self {
            Bounds::Free => internal,
            Bounds::Lower(min) => min - 1.0 + (internal * internal + 1.0).sqrt(),
            Bounds::Upper(max) => max + 1.0 - (internal * internal + 1.0).sqrt(),
            Bounds::Both(min, max) => min + (internal.sin() + 1.0) * (max - min) / 2.0,
        }
    }

    fn upper(self) -> f64 {
        match self {
            Bounds::Upper(max) | Bounds::Both(_, max) => max,
            _ => f64::INFINITY,
        }
    }
}

/// Residuals restricted to the rows that were finite at the start.
struct Problem<'a, F> {
    model: F,
    y: &'a [f64],
    weights: Vec<f64>,
    mask: Vec<usize>,
    params: &'a [Parameter],
    bounds: Vec<Bounds>,
    /// Indices of varying parameters.
    free: Vec<usize>,
    nfev: usize,
}

impl<F> Problem<'_, F>
where
    F: FnMut(&[f64]) -> Result<Vec<f64>, ExprError>,
{
    fn external(&self, internal: &DVector<f64>) -> Vec<f64> {
        let mut values: Vec<f64> = self.params.iter().map(Parameter::clamped_value).collect();
        for (k, &i) in self.free.iter().enumerate() {
            values[i] = self.bounds[i].to_external(internal[k]);
        }
        values
    }

    fn all_residuals(&mut self, values: &[f64]) -> Result<Vec<f64>, FitError> {
        self.nfev += 1;
        let model = (self.model)(values).map_err(FitError::Evaluation)?;
        Ok(model
            .iter()
            .zip(self.y)
            .zip(&self.weights)
            .map(|((m, y), w)| (m - y) * w)
            .collect())
    }

    fn masked(&self, all: &[f64]) -> Option<DVector<f64>> {
        let r = DVector::from_iterator(self.mask.len(), self.mask.iter().map(|&i| all[i]));
        r.iter().all(|v| v.is_finite()).then_some(r)
    }

    /// Masked residuals; `None` when any of them is not finite.
    fn residuals(&mut self, values: &[f64]) -> Result<Option<DVector<f64>>, FitError> {
        let all = self.all_residuals(values)?;
        Ok(self.masked(&all))
    }

    /// Forward-difference Jacobian with respect to the internal parameters.
    fn jacobian(&mut self, theta: &DVector<f64>, r: &DVector<f64>) -> Result<DMatrix<f64>, FitError> {
        let mut jac = DMatrix::zeros(r.len(), theta.len());
        for j in 0..theta.len() {
            let h = f64::EPSILON.sqrt() * theta[j].abs().max(1.0);
            for step in [h, -h] {
                let mut shifted = theta.clone();
                shifted[j] += step;
                let values = self.external(&shifted);
                if let Some(rs) = self.residuals(&values)? {
                    jac.set_column(j, &((rs - r) / step));
                    break;
                }
            }
        }
        Ok(jac)
    }

    /// Forward-difference Jacobian with respect to the external values of
    /// the varying parameters, stepping inward at an upper bound.
    fn external_jacobian(&mut self, values: &[f64], r: &DVector<f64>) -> Result<DMatrix<f64>, FitError> {
        let mut jac = DMatrix::zeros(r.len(), self.free.len());
        for k in 0..self.free.len() {
            let i = self.free[k];
            let mut h = f64::EPSILON.sqrt() * values[i].abs().max(1.0);
            if values[i] + h > self.bounds[i].upper() {
                h = -h;
            }
            let mut shifted = values.to_vec();
            shifted[i] += h;
            if let Some(rs) = self.residuals(&shifted)? {
                jac.set_column(k, &((rs - r) / h));
            }
        }
        Ok(jac)
    }
}

fn solve_damped(a: &DMatrix<f64>, g: &DVector<f64>, mu: f64) -> Option<DVector<f64>> {
    let mut damped = a.clone();
    for i in 0..a.nrows() {
        damped[(i, i)] += mu * a[(i, i)].max(1e-300);
    }
    let rhs = -g;
    match damped.clone().cholesky() {
        Some(chol) => Some(chol.solve(&rhs)),
        None => damped.lu().solve(&rhs),
    }
}

/// Minimize `sum(((model(params) - y) * weights)^2)`.
///
/// `model` maps the values of all parameters (in `params` order) to model
/// predictions for every data point. Points whose residual is not finite at
/// the starting values are left out of the fit.
pub fn least_squares<F>(
    model: F,
    y: &[f64],
    weights: &[f64],
    params: &[Parameter],
    options: &FitOptions,
) -> Result<Solution, FitError>
where
    F: FnMut(&[f64]) -> Result<Vec<f64>, ExprError>,
{
    // Work with weights scaled to at most 1 so tiny errors cannot overflow
    // the squares; reported statistics are scaled back.
    let w_max = weights
        .iter()
        .copied()
        .filter(|w| w.is_finite())
        .fold(0.0_f64, f64::max);
    let scale = if w_max > 0.0 { w_max } else { 1.0 };

    let free: Vec<usize> = (0..params.len()).filter(|&i| params[i].vary).collect();
    let mut problem = Problem {
        model,
        y,
        weights: weights.iter().map(|w| w / scale).collect(),
        mask: Vec::new(),
        params,
        bounds: params.iter().map(Bounds::of).collect(),
        free,
        nfev: 0,
    };
    let nvarys = problem.free.len();

    let mut theta = DVector::from_iterator(
        nvarys,
        problem
            .free
            .iter()
            .map(|&i| problem.bounds[i].to_internal(params[i].clamped_value())),
    );
    let initial = problem.external(&theta);
    let all = problem.all_residuals(&initial)?;
    problem.mask = (0..all.len()).filter(|&i| all[i].is_finite()).collect();
    let ndata = problem.mask.len();
    if ndata == 0 && !all.is_empty() {
        return Err(FitError::NonFinite);
    }
    if ndata == 0 || ndata < nvarys {
        return Err(FitError::InsufficientData {
            points: ndata,
            parameters: nvarys,
        });
    }
    let mut r = problem.masked(&all).ok_or(FitError::NonFinite)?;
    let mut cost = r.norm_squared();

    let max_nfev = options.max_nfev.unwrap_or(2000 * (nvarys + 1));
    let mut mu = 1e-3;
    let mut nu = 2.0;
    let mut message = String::from("No free parameters");

    if nvarys > 0 {
        'outer: loop {
            if cost == 0.0 {
                message = "Residuals are zero".to_string();
                break;
            }
            let jac = problem.jacobian(&theta, &r)?;
            let a = jac.transpose() * &jac;
            let g = jac.transpose() * &r;
            if g.amax() <= options.gtol {
                message = "Gradient is orthogonal to the residuals within gtol".to_string();
                break;
            }

            loop {
                if problem.nfev >= max_nfev {
                    return Err(FitError::NotConverged { nfev: problem.nfev });
                }
                let delta = solve_damped(&a, &g, mu).ok_or(FitError::Singular)?;
                let small_step =
                    delta.norm() <= options.xtol * (theta.norm() + options.xtol);
                let candidate = &theta + &delta;
                let values = problem.external(&candidate);

                let accepted = match problem.residuals(&values)? {
                    Some(r_new) => {
                        let cost_new = r_new.norm_squared();
                        // predicted reduction of the linearized model
                        let mut damping = DVector::zeros(nvarys);
                        for i in 0..nvarys {
                            damping[i] = mu * a[(i, i)].max(1e-300) * delta[i];
                        }
                        let predicted = delta.dot(&(damping - &g));
                        let rho = (cost - cost_new) / predicted;
                        if predicted > 0.0 && rho > 0.0 {
                            let actual_red = (cost - cost_new) / cost;
                            let predicted_red = predicted / cost;
                            theta = candidate;
                            r = r_new;
                            cost = cost_new;
                            mu *= (1.0 - (2.0 * rho - 1.0).powi(3)).max(1.0 / 3.0);
                            nu = 2.0;
                            if actual_red.abs() <= options.ftol && predicted_red <= options.ftol {
                                message = "Relative reduction of the sum of squares is at most ftol"
                                    .to_string();
                                break 'outer;
                            }
                            true
                        } else {
                            false
                        }
                    }
                    None => false,
                };

                if small_step {
                    message = "Relative change of the parameters is at most xtol".to_string();
                    break 'outer;
                }
                if accepted {
                    break;
                }
                mu *= nu;
                nu *= 2.0;
            }
        }
    }

    let values = problem.external(&theta);
    let ndata_f = ndata as f64;
    let nfree = ndata.saturating_sub(nvarys).max(1);
    let chisqr_scaled = cost;
    let chisqr = chisqr_scaled * scale * scale;
    let redchi = chisqr / nfree as f64;
    let floor = chisqr.max(1e-250);
    let aic = ndata_f * (floor / ndata_f).ln() + 2.0 * nvarys as f64;
    let bic = ndata_f * (floor / ndata_f).ln() + ndata_f.ln() * nvarys as f64;

    let mut stderr = vec![None; params.len()];
    if nvarys > 0 {
        let jac = problem.external_jacobian(&values, &r)?;
        let a = jac.transpose() * &jac;
        if let Some(inv) = a.try_inverse() {
            // covariance in scaled units times scaled reduced chi-square
            let redchi_scaled = chisqr_scaled / nfree as f64;
            for (k, &i) in problem.free.iter().enumerate() {
                let var = inv[(k, k)] * redchi_scaled;
                if var.is_finite() && var >= 0.0 {
                    stderr[i] = Some(var.sqrt());
                }
            }
        }
    }

    debug!(nfev = problem.nfev, ndata, nvarys, chisqr, "least squares finished");
    Ok(Solution {
        values,
        stderr,
        chisqr,
        redchi,
        aic,
        bic,
        nfev: problem.nfev,
        ndata,
        nvarys,
        message,
    })
}
