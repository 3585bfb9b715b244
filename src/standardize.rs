// src/standardize.rs

use crate::family::Family;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Standard deviations at or below this are treated as a constant column.
pub const SCALE_SANITIZATION_THRESHOLD: f64 = 1e-9;

/// Centring and scaling learned once from the training data.
///
/// `x_scale` is sanitized: inactive (constant) columns carry a scale of `1.0`
/// so nothing is ever divided by zero, and they never enter projection or
/// fitting arithmetic. Their coefficients are exactly zero everywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Standardization {
    x_center: Array1<f64>,
    x_scale: Array1<f64>,
    active: Vec<usize>,
    y_center: f64,
    y_scale: f64,
}

/// Sample standard deviation (n - 1 denominator); zero for fewer than two values.
pub(crate) fn sample_sd(values: ArrayView1<f64>) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.std(1.0)
}

impl Standardization {
    /// Computes column means and standard deviations over `x`, and the
    /// response centre/scale. Only the identity-Gaussian family standardizes
    /// the response; GLM deviances are computed on the raw response scale.
    pub fn from_training(x: ArrayView2<f64>, y: ArrayView1<f64>, family: &dyn Family) -> Self {
        let n = x.nrows();
        let x_center = if n > 0 {
            x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()))
        } else {
            Array1::zeros(x.ncols())
        };
        let raw_sd = x.map_axis(Axis(0), sample_sd);

        let mut active = Vec::with_capacity(x.ncols());
        let x_scale = Array1::from_iter(raw_sd.iter().enumerate().map(|(j, &sd)| {
            if sd.is_finite() && sd > SCALE_SANITIZATION_THRESHOLD {
                active.push(j);
                sd
            } else {
                1.0
            }
        }));

        let (y_center, y_scale) = if family.is_identity_gaussian() {
            let center = y.mean().unwrap_or(0.0);
            let sd = sample_sd(y);
            let scale = if sd.is_finite() && sd > SCALE_SANITIZATION_THRESHOLD {
                sd
            } else {
                1.0
            };
            (center, scale)
        } else {
            (0.0, 1.0)
        };

        Self {
            x_center,
            x_scale,
            active,
            y_center,
            y_scale,
        }
    }

    pub fn x_center(&self) -> &Array1<f64> {
        &self.x_center
    }

    pub fn x_scale(&self) -> &Array1<f64> {
        &self.x_scale
    }

    /// Original column indices of the non-constant predictors, ascending.
    pub fn active(&self) -> &[usize] {
        &self.active
    }

    pub fn n_features(&self) -> usize {
        self.x_center.len()
    }

    pub fn y_center(&self) -> f64 {
        self.y_center
    }

    pub fn y_scale(&self) -> f64 {
        self.y_scale
    }

    /// Standardized active columns of `x`, shape `(n, active().len())`.
    pub fn standardize_active(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let mut z = x.select(Axis(1), &self.active);
        for (mut column, &j) in z.columns_mut().into_iter().zip(self.active.iter()) {
            let (center, scale) = (self.x_center[j], self.x_scale[j]);
            column.mapv_inplace(|v| (v - center) / scale);
        }
        z
    }

    pub fn standardize_response(&self, y: ArrayView1<f64>) -> Array1<f64> {
        y.mapv(|v| (v - self.y_center) / self.y_scale)
    }

    /// Maps standardized, active-position coefficients to original units over
    /// all `n_features()` columns. Inactive columns stay exactly zero.
    pub fn rescale_coefficients(&self, beta_std_active: ArrayView1<f64>) -> Array1<f64> {
        let mut beta = Array1::zeros(self.n_features());
        for (&b, &j) in beta_std_active.iter().zip(self.active.iter()) {
            beta[j] = self.y_scale * b / self.x_scale[j];
        }
        beta
    }

    /// Original-scale intercept for original-scale coefficients `beta` and a
    /// mean fitted intercept `fitted_intercept`.
    pub fn intercept_for(&self, fitted_intercept: f64, beta: ArrayView1<f64>) -> f64 {
        self.y_center + fitted_intercept - self.x_center.dot(&beta)
    }
}
