// src/family.rs

use crate::error::SparError;
use ndarray::{ArrayView1, Zip};
use std::fmt;

/// Smallest mean the binomial family will produce, and one minus the largest.
const BINOMIAL_MU_EPS: f64 = 1e-10;
/// Linear predictors above this overflow `exp` for the Poisson family.
const POISSON_ETA_MAX: f64 = 700.0;

/// The capability every fitting, screening and scoring step programs against.
///
/// A family maps a linear predictor to a mean, scores observed against
/// predicted values with a deviance, and knows which responses it accepts.
/// `mu_eta` and `variance` are what the IRLS solver needs to build its
/// working weights.
pub trait Family: Send + Sync + fmt::Debug {
    /// Distribution name, e.g. `"gaussian"`.
    fn name(&self) -> &str;

    /// Link name, e.g. `"identity"`.
    fn link_name(&self) -> &str;

    fn link(&self, mu: f64) -> f64;

    fn inverse_link(&self, eta: f64) -> f64;

    /// Derivative of the mean with respect to the linear predictor.
    fn mu_eta(&self, eta: f64) -> f64;

    fn variance(&self, mu: f64) -> f64;

    /// Deviance contribution of a single observation.
    fn unit_deviance(&self, y: f64, mu: f64) -> f64;

    /// Starting mean for IRLS.
    fn initial_mean(&self, y: f64) -> f64;

    /// Rejects responses outside the family's support.
    fn validate_response(&self, y: ArrayView1<f64>) -> Result<(), SparError>;

    /// True for the Gaussian family with identity link. This is the only case
    /// where the response is standardized and marginal models have no intercept.
    fn is_identity_gaussian(&self) -> bool {
        false
    }

    /// True when the response is a 0/1 label, which enables misclassification
    /// and AUC based losses.
    fn is_binary(&self) -> bool {
        false
    }

    fn deviance(&self, y: ArrayView1<f64>, mu: ArrayView1<f64>) -> f64 {
        Zip::from(&y)
            .and(&mu)
            .fold(0.0, |acc, &yi, &mi| acc + self.unit_deviance(yi, mi))
    }
}

fn require_finite(family: &str, y: ArrayView1<f64>) -> Result<(), SparError> {
    if y.iter().any(|v| !v.is_finite()) {
        return Err(SparError::InvalidResponse {
            family: family.to_string(),
            reason: "response contains NaN or infinite values".to_string(),
        });
    }
    Ok(())
}

/// `y * ln(y / mu)` with the convention `0 * ln(0) = 0`.
fn y_log_y_over(y: f64, mu: f64) -> f64 {
    if y > 0.0 {
        y * (y / mu).ln()
    } else {
        0.0
    }
}

/// Gaussian family with identity link.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gaussian;

impl Family for Gaussian {
    fn name(&self) -> &str {
        "gaussian"
    }

    fn link_name(&self) -> &str {
        "identity"
    }

    fn link(&self, mu: f64) -> f64 {
        mu
    }

    fn inverse_link(&self, eta: f64) -> f64 {
        eta
    }

    fn mu_eta(&self, _eta: f64) -> f64 {
        1.0
    }

    fn variance(&self, _mu: f64) -> f64 {
        1.0
    }

    fn unit_deviance(&self, y: f64, mu: f64) -> f64 {
        (y - mu).powi(2)
    }

    fn initial_mean(&self, y: f64) -> f64 {
        y
    }

    fn validate_response(&self, y: ArrayView1<f64>) -> Result<(), SparError> {
        require_finite(self.name(), y)
    }

    fn is_identity_gaussian(&self) -> bool {
        true
    }
}

/// Binomial family with logit link, for 0/1 responses or proportions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Binomial;

impl Family for Binomial {
    fn name(&self) -> &str {
        "binomial"
    }

    fn link_name(&self) -> &str {
        "logit"
    }

    fn link(&self, mu: f64) -> f64 {
        let mu = mu.clamp(BINOMIAL_MU_EPS, 1.0 - BINOMIAL_MU_EPS);
        (mu / (1.0 - mu)).ln()
    }

    fn inverse_link(&self, eta: f64) -> f64 {
        (1.0 / (1.0 + (-eta).exp())).clamp(BINOMIAL_MU_EPS, 1.0 - BINOMIAL_MU_EPS)
    }

    fn mu_eta(&self, eta: f64) -> f64 {
        let e = (-eta.abs()).exp();
        (e / (1.0 + e).powi(2)).max(f64::EPSILON)
    }

    fn variance(&self, mu: f64) -> f64 {
        mu * (1.0 - mu)
    }

    fn unit_deviance(&self, y: f64, mu: f64) -> f64 {
        2.0 * (y_log_y_over(y, mu) + y_log_y_over(1.0 - y, 1.0 - mu))
    }

    fn initial_mean(&self, y: f64) -> f64 {
        (y + 0.5) / 2.0
    }

    fn validate_response(&self, y: ArrayView1<f64>) -> Result<(), SparError> {
        require_finite(self.name(), y)?;
        if y.iter().any(|&v| !(0.0..=1.0).contains(&v)) {
            return Err(SparError::InvalidResponse {
                family: self.name().to_string(),
                reason: "values must lie in [0, 1]".to_string(),
            });
        }
        Ok(())
    }

    fn is_binary(&self) -> bool {
        true
    }
}

/// Poisson family with log link, for counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Poisson;

impl Family for Poisson {
    fn name(&self) -> &str {
        "poisson"
    }

    fn link_name(&self) -> &str {
        "log"
    }

    fn link(&self, mu: f64) -> f64 {
        mu.max(f64::MIN_POSITIVE).ln()
    }

    fn inverse_link(&self, eta: f64) -> f64 {
        eta.min(POISSON_ETA_MAX).exp().max(f64::EPSILON)
    }

    fn mu_eta(&self, eta: f64) -> f64 {
        self.inverse_link(eta)
    }

    fn variance(&self, mu: f64) -> f64 {
        mu
    }

    fn unit_deviance(&self, y: f64, mu: f64) -> f64 {
        2.0 * (y_log_y_over(y, mu) - (y - mu))
    }

    fn initial_mean(&self, y: f64) -> f64 {
        y + 0.1
    }

    fn validate_response(&self, y: ArrayView1<f64>) -> Result<(), SparError> {
        require_finite(self.name(), y)?;
        if y.iter().any(|&v| v < 0.0) {
            return Err(SparError::InvalidResponse {
                family: self.name().to_string(),
                reason: "counts must be non-negative".to_string(),
            });
        }
        Ok(())
    }
}

type ScalarFn = Box<dyn Fn(f64) -> f64 + Send + Sync>;
type DevianceFn = Box<dyn Fn(f64, f64) -> f64 + Send + Sync>;

/// A family assembled from user-supplied functions.
///
/// Responses are only checked for finiteness. `binary` opts the family in to
/// the classification losses.
pub struct CustomFamily {
    name: String,
    link_name: String,
    link: ScalarFn,
    inverse_link: ScalarFn,
    mu_eta: ScalarFn,
    variance: ScalarFn,
    unit_deviance: DevianceFn,
    binary: bool,
}

impl CustomFamily {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        link_name: impl Into<String>,
        link: impl Fn(f64) -> f64 + Send + Sync + 'static,
        inverse_link: impl Fn(f64) -> f64 + Send + Sync + 'static,
        mu_eta: impl Fn(f64) -> f64 + Send + Sync + 'static,
        variance: impl Fn(f64) -> f64 + Send + Sync + 'static,
        unit_deviance: impl Fn(f64, f64) -> f64 + Send + Sync + 'static,
        binary: bool,
    ) -> Self {
        Self {
            name: name.into(),
            link_name: link_name.into(),
            link: Box::new(link),
            inverse_link: Box::new(inverse_link),
            mu_eta: Box::new(mu_eta),
            variance: Box::new(variance),
            unit_deviance: Box::new(unit_deviance),
            binary,
        }
    }
}

impl fmt::Debug for CustomFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomFamily")
            .field("name", &self.name)
            .field("link_name", &self.link_name)
            .field("binary", &self.binary)
            .finish_non_exhaustive()
    }
}

impl Family for CustomFamily {
    fn name(&self) -> &str {
        &self.name
    }

    fn link_name(&self) -> &str {
        &self.link_name
    }

    fn link(&self, mu: f64) -> f64 {
        (self.link)(mu)
    }

    fn inverse_link(&self, eta: f64) -> f64 {
        (self.inverse_link)(eta)
    }

    fn mu_eta(&self, eta: f64) -> f64 {
        (self.mu_eta)(eta)
    }

    fn variance(&self, mu: f64) -> f64 {
        (self.variance)(mu)
    }

    fn unit_deviance(&self, y: f64, mu: f64) -> f64 {
        (self.unit_deviance)(y, mu)
    }

    fn initial_mean(&self, y: f64) -> f64 {
        y
    }

    fn validate_response(&self, y: ArrayView1<f64>) -> Result<(), SparError> {
        require_finite(&self.name, y)
    }

    fn is_binary(&self) -> bool {
        self.binary
    }
}
