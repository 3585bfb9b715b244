// src/screening.rs

use crate::error::SparError;
use crate::family::Family;
use crate::glm::{fit_ridge_glm, fit_ridge_glm_path_min, gram_with_ridge, IrlsConfig, SINGULAR_RIDGE};
use crate::linalg_backends::{solve_with_ridge_fallback, BackendSolve, LinAlgBackendProvider, SolveError};
use crate::standardize::sample_sd;
use log::{debug, info};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the per-variable importance scores are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScreeningType {
    /// Ridge coefficients in the limit of a vanishing penalty.
    Ridge,
    /// Slope of a univariate GLM per variable.
    MarginalLikelihood,
    /// Correlation of each variable with the response.
    Correlation,
}

impl Default for ScreeningType {
    fn default() -> Self {
        ScreeningType::Ridge
    }
}

impl fmt::Display for ScreeningType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScreeningType::Ridge => "ridge",
            ScreeningType::MarginalLikelihood => "marglik",
            ScreeningType::Correlation => "corr",
        };
        f.write_str(label)
    }
}

/// Screening coefficients for standardized predictors `z` (active columns
/// only) against the transformed response `y`. One score per column.
pub fn screening_coefficients(
    z: ArrayView2<f64>,
    y: ArrayView1<f64>,
    family: &dyn Family,
    screening: ScreeningType,
    parallel: bool,
) -> Result<Array1<f64>, SparError> {
    if z.nrows() != y.len() {
        return Err(SparError::ResponseLengthMismatch {
            found: y.len(),
            expected: z.nrows(),
        });
    }
    info!(
        "Computing {} screening coefficients for {} variables on {} observations.",
        screening,
        z.ncols(),
        z.nrows()
    );
    match screening {
        ScreeningType::Ridge => {
            if family.is_identity_gaussian() {
                ridge_limit_coefficients(z, y)
            } else {
                let fit = fit_ridge_glm_path_min(z, y, family, &IrlsConfig::default())?;
                Ok(fit.coefficients)
            }
        }
        ScreeningType::MarginalLikelihood => marginal_likelihood_coefficients(z, y, family, parallel),
        ScreeningType::Correlation => Ok(correlation_coefficients(z, y)),
    }
}

/// Ridge coefficients as the penalty tends to zero.
///
/// The normal-equation form is chosen by the aspect ratio `p / n`:
/// the primal `(ZᵀZ)⁻¹Zᵀy` when `p < n/2`, the regularized dual
/// `Zᵀ(ZZᵀ + cI)⁻¹y` when `n/2 <= p < 2n` and the minimum-norm dual
/// `Zᵀ(ZZᵀ)⁻¹y` when `p >= 2n`, with `c = sqrt(p) + sqrt(n)` used as the
/// fallback penalty for singular primal/dual systems.
pub fn ridge_limit_coefficients(z: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<Array1<f64>, SparError> {
    let (n, p) = z.dim();
    let penalty = (p as f64).sqrt() + (n as f64).sqrt();
    let (n_f, p_f) = (n as f64, p as f64);

    if p_f < n_f / 2.0 {
        debug!("Ridge screening: primal form ({} < {}/2).", p, n);
        let xtx = z.t().dot(&z);
        let xty = z.t().dot(&y);
        solve_with_ridge_fallback(&xtx, &xty, penalty)
    } else if p_f < 2.0 * n_f {
        debug!("Ridge screening: regularized dual form ({}/2 <= {} < 2*{}).", n, p, n);
        let gram = gram_with_ridge(z, penalty);
        let alpha = solve_with_ridge_fallback(&gram, &y.to_owned(), SINGULAR_RIDGE)?;
        Ok(z.t().dot(&alpha))
    } else {
        debug!("Ridge screening: minimum-norm dual form ({} >= 2*{}).", p, n);
        let gram = gram_with_ridge(z, 0.0);
        let backend = LinAlgBackendProvider::<f64>::new();
        let alpha = match backend.solve_checked(&gram, &y.to_owned()) {
            Ok(alpha) => alpha,
            Err(SolveError::Linalg(e)) => return Err(SparError::LinearSystemSolveFailed(e)),
            Err(SolveError::Singular { .. }) => {
                debug!("Ridge screening: ZZᵀ singular, retrying with penalty {:.3}.", penalty);
                let stabilized = gram_with_ridge(z, penalty);
                solve_with_ridge_fallback(&stabilized, &y.to_owned(), SINGULAR_RIDGE)?
            }
        };
        Ok(z.t().dot(&alpha))
    }
}

fn marginal_likelihood_coefficients(
    z: ArrayView2<f64>,
    y: ArrayView1<f64>,
    family: &dyn Family,
    parallel: bool,
) -> Result<Array1<f64>, SparError> {
    let config = IrlsConfig::default();
    let slope = |j: usize| -> Result<f64, SparError> {
        let column = z.column(j).insert_axis(Axis(1));
        let fit = fit_ridge_glm(column, y, family, 0.0, &config)?;
        Ok(fit.coefficients[0])
    };
    let slopes: Result<Vec<f64>, SparError> = if parallel {
        (0..z.ncols()).into_par_iter().map(slope).collect()
    } else {
        (0..z.ncols()).map(slope).collect()
    };
    Ok(Array1::from(slopes?))
}

/// Pearson correlation of each column with `y`; zero where either is constant.
pub fn correlation_coefficients(z: ArrayView2<f64>, y: ArrayView1<f64>) -> Array1<f64> {
    let y_mean = y.mean().unwrap_or(0.0);
    let y_sd = sample_sd(y);
    let n = y.len();
    z.map_axis(Axis(0), |column| {
        let col_sd = sample_sd(column);
        if n < 2 || y_sd <= 0.0 || col_sd <= 0.0 {
            return 0.0;
        }
        let col_mean = column.mean().unwrap_or(0.0);
        let covariance = column
            .iter()
            .zip(y.iter())
            .map(|(&a, &b)| (a - col_mean) * (b - y_mean))
            .sum::<f64>()
            / (n - 1) as f64;
        covariance / (col_sd * y_sd)
    })
}

/// Inclusion probabilities `|c| / max |c|`.
///
/// An all-zero (or non-finite) score vector has no valid normalization and is
/// rejected as degenerate screening.
pub fn inclusion_probabilities(coefficients: ArrayView1<f64>) -> Result<Array1<f64>, SparError> {
    let max_abs = coefficients.iter().fold(0.0_f64, |acc, c| acc.max(c.abs()));
    if !(max_abs.is_finite() && max_abs > 0.0) {
        return Err(SparError::DegenerateScreening);
    }
    Ok(coefficients.mapv(|c| c.abs() / max_abs))
}
