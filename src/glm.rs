// src/glm.rs

use crate::error::SparError;
use crate::family::Family;
use crate::linalg_backends::{add_to_diagonal, solve_with_ridge_fallback};
use log::{trace, warn};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Penalty added to the normal-equation diagonal when a solve is singular.
pub const SINGULAR_RIDGE: f64 = 0.01;

/// `lambda_max` for a ridge path is computed as if the elastic-net mixing
/// parameter were this small, since it is unbounded at exactly zero.
const RIDGE_PATH_ALPHA: f64 = 0.001;

/// Configuration options for the penalized IRLS solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrlsConfig {
    /// Maximum number of iterations before giving up.
    /// Default: 25
    pub max_iterations: usize,

    /// Convergence tolerance on the relative deviance change
    /// `|dev - dev_old| / (|dev| + 0.1)`.
    /// Default: 1e-8
    pub tolerance: f64,

    /// Floor for the working weights.
    /// Default: 1e-10
    pub min_weight: f64,
}

impl Default for IrlsConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            tolerance: 1e-8,
            min_weight: 1e-10,
        }
    }
}

/// Result of a ridge-penalized GLM fit.
#[derive(Debug, Clone)]
pub struct RidgeGlmFit {
    /// Unpenalized intercept on the link scale.
    pub intercept: f64,
    /// One coefficient per column of the design.
    pub coefficients: Array1<f64>,
    pub deviance: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Solves `(XᵀX) b = Xᵀy`, retrying with `ridge` on the diagonal when `XᵀX`
/// is singular. No intercept is fitted.
pub fn least_squares_with_fallback(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    ridge: f64,
) -> Result<Array1<f64>, SparError> {
    let xtx = x.t().dot(&x);
    let xty = x.t().dot(&y);
    solve_with_ridge_fallback(&xtx, &xty, ridge)
}

/// Population standard deviation of each column.
fn column_population_sd(x: ArrayView2<f64>) -> Array1<f64> {
    if x.nrows() == 0 {
        return Array1::zeros(x.ncols());
    }
    x.map_axis(Axis(0), |column| column.std(0.0))
}

/// The smallest penalty on a standard 100-step ridge regularization path.
///
/// With columns standardized to unit population variance,
/// `lambda_max = max_j |x_jᵀ (y - ȳ)| / (n · 0.001)` and the path ends at
/// `1e-4 · lambda_max` when `n > p`, `1e-2 · lambda_max` otherwise.
pub fn smallest_path_lambda(x: ArrayView2<f64>, y: ArrayView1<f64>) -> f64 {
    let (n, p) = x.dim();
    if n == 0 || p == 0 {
        return 0.0;
    }
    let y_mean = y.mean().unwrap_or(0.0);
    let residual = y.mapv(|v| v - y_mean);
    let means = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(p));
    let sds = column_population_sd(x);

    let max_gradient = x
        .columns()
        .into_iter()
        .zip(means.iter().zip(sds.iter()))
        .filter(|(_, (_, &sd))| sd > 0.0)
        .map(|(column, (&mean, &sd))| {
            column
                .iter()
                .zip(residual.iter())
                .map(|(&xi, &ri)| (xi - mean) / sd * ri)
                .sum::<f64>()
                .abs()
        })
        .fold(0.0, f64::max);

    let lambda_max = max_gradient / (n as f64 * RIDGE_PATH_ALPHA);
    let ratio = if n > p { 1e-4 } else { 1e-2 };
    ratio * lambda_max
}

/// Fits `g(mu) = b0 + X b` by IRLS, minimizing
/// `deviance / (2n) + lambda / 2 · Σ (sd_j · b_j)²`.
///
/// Penalizing `sd_j · b_j` is equivalent to penalizing coefficients of the
/// standardized columns. The intercept is unpenalized. A singular weighted
/// system is retried with `SINGULAR_RIDGE` on the diagonal. A deviance that
/// becomes non-finite stops iteration at the last good iterate.
pub fn fit_ridge_glm(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    family: &dyn Family,
    lambda: f64,
    config: &IrlsConfig,
) -> Result<RidgeGlmFit, SparError> {
    let (n, p) = x.dim();
    if y.len() != n {
        return Err(SparError::ResponseLengthMismatch {
            found: y.len(),
            expected: n,
        });
    }
    let n_f = n.max(1) as f64;

    let penalty_scale = column_population_sd(x).mapv(|sd| if sd > 0.0 { sd * sd } else { 1.0 });

    let start_mu = y.mapv(|v| family.initial_mean(v));
    let mut eta = start_mu.mapv(|m| family.link(m));
    let mut mu = eta.mapv(|e| family.inverse_link(e));
    let mut deviance = family.deviance(y, mu.view());

    let mut intercept = family.link(start_mu.mean().unwrap_or(0.0));
    let mut coefficients = Array1::<f64>::zeros(p);
    let mut converged = false;
    let mut iterations = 0;

    for iter in 1..=config.max_iterations {
        iterations = iter;

        let mut weights = Array1::<f64>::zeros(n);
        let mut working = Array1::<f64>::zeros(n);
        for i in 0..n {
            let g = family.mu_eta(eta[i]);
            let w = g * g / family.variance(mu[i]);
            weights[i] = if w.is_finite() {
                w.max(config.min_weight)
            } else {
                config.min_weight
            };
            working[i] = eta[i] + (y[i] - mu[i]) / g;
        }

        // Normal equations for [1, X] with the intercept in position 0.
        let mut system = Array2::<f64>::zeros((p + 1, p + 1));
        let mut rhs = Array1::<f64>::zeros(p + 1);
        let weighted_x = &x * &weights.view().insert_axis(Axis(1));
        system[[0, 0]] = weights.sum();
        let xt_w = weighted_x.sum_axis(Axis(0));
        system.slice_mut(s![0, 1..]).assign(&xt_w);
        system.slice_mut(s![1.., 0]).assign(&xt_w);
        system.slice_mut(s![1.., 1..]).assign(&x.t().dot(&weighted_x));
        rhs[0] = weights.dot(&working);
        rhs.slice_mut(s![1..]).assign(&weighted_x.t().dot(&working));
        system /= n_f;
        rhs /= n_f;
        if lambda > 0.0 {
            let mut penalty_block = system.slice_mut(s![1.., 1..]);
            penalty_block
                .diag_mut()
                .zip_mut_with(&penalty_scale, |d, &sc| *d += lambda * sc);
        }

        let solution = solve_with_ridge_fallback(&system, &rhs, SINGULAR_RIDGE)?;
        let new_intercept = solution[0];
        let new_coefficients = solution.slice(s![1..]).to_owned();

        let new_eta = x.dot(&new_coefficients) + new_intercept;
        let new_mu = new_eta.mapv(|e| family.inverse_link(e));
        let new_deviance = family.deviance(y, new_mu.view());
        if !new_deviance.is_finite() {
            warn!(
                "IRLS ({} family) produced a non-finite deviance at iteration {}; keeping the previous iterate.",
                family.name(),
                iter
            );
            break;
        }

        let change = (new_deviance - deviance).abs() / (new_deviance.abs() + 0.1);
        trace!("IRLS iteration {}: deviance {:.6e}, change {:.3e}", iter, new_deviance, change);

        intercept = new_intercept;
        coefficients = new_coefficients;
        eta = new_eta;
        mu = new_mu;
        deviance = new_deviance;

        if change < config.tolerance {
            converged = true;
            break;
        }
    }

    if !converged {
        warn!(
            "IRLS ({} family, {} columns) did not converge within {} iterations.",
            family.name(),
            p,
            config.max_iterations
        );
    }

    Ok(RidgeGlmFit {
        intercept,
        coefficients,
        deviance,
        iterations,
        converged,
    })
}

/// Ridge GLM at the smallest lambda of the standard path.
pub fn fit_ridge_glm_path_min(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    family: &dyn Family,
    config: &IrlsConfig,
) -> Result<RidgeGlmFit, SparError> {
    let lambda = smallest_path_lambda(x, y);
    fit_ridge_glm(x, y, family, lambda, config)
}

/// The `n × n` Gram matrix `XXᵀ` with `value` added to its diagonal, for the
/// dual ridge forms used during screening.
pub(crate) fn gram_with_ridge(x: ArrayView2<f64>, value: f64) -> Array2<f64> {
    let mut gram = x.dot(&x.t());
    if value != 0.0 {
        add_to_diagonal(&mut gram, value);
    }
    gram
}
