// src/error.rs

use thiserror::Error;

/// Everything that can abort a fit, an extraction, or a prediction.
///
/// Precondition variants are raised before any random draw is made, so a
/// rejected call never consumes randomness. Numerical singularities inside
/// the solvers are retried locally and only surface as
/// `LinearSystemSolveFailed` if the stabilized retry fails too.
#[derive(Error, Debug)]
pub enum SparError {
    #[error("Response has {found} observations, but the predictor matrix has {expected} rows.")]
    ResponseLengthMismatch { found: usize, expected: usize },

    #[error("{context} has {found} columns, but the model was trained on {expected}.")]
    ColumnCountMismatch {
        context: &'static str,
        found: usize,
        expected: usize,
    },

    #[error(
        "Reduced-dimension bounds must satisfy 1 <= mslow ({mslow}) <= msup ({msup}) <= nscreen ({nscreen})."
    )]
    InvalidDimensionBounds {
        mslow: usize,
        msup: usize,
        nscreen: usize,
    },

    #[error("Loss measure '{measure}' is only available for a binary-outcome family, got '{family}'.")]
    IncompatibleMeasure { measure: String, family: String },

    #[error("No validation row matches nummod={nummod:?} and threshold={threshold:?}.")]
    ValidationEntryNotFound {
        nummod: Option<usize>,
        threshold: Option<f64>,
    },

    #[error("Response values are outside the domain of the {family} family: {reason}")]
    InvalidResponse { family: String, reason: String },

    #[error("All predictors have zero standard deviation; there is nothing to fit.")]
    NoActiveVariables,

    #[error(
        "Screening produced only zero coefficients (is the response constant?); inclusion probabilities are undefined."
    )]
    DegenerateScreening,

    #[error("Supplied {what} has {found} entries, but max(nummods) is {expected}.")]
    SuppliedLengthMismatch {
        what: &'static str,
        found: usize,
        expected: usize,
    },

    #[error("Supplied {what} for member {member} is inconsistent: {reason}")]
    InvalidSuppliedDraw {
        what: &'static str,
        member: usize,
        reason: String,
    },

    #[error("{operation} expects {expected} entries, got {found}.")]
    ProjectionShapeMismatch {
        operation: &'static str,
        found: usize,
        expected: usize,
    },

    #[error("Projection matrix storage is inconsistent: {0}")]
    MalformedProjection(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("A linear system solve failed: {0}")]
    LinearSystemSolveFailed(#[from] ndarray_linalg::error::LinalgError),

    #[error(
        "A {dim}x{dim} linear system stayed singular after ridge stabilization (reciprocal condition number {rcond:.3e})."
    )]
    SingularSystem { dim: usize, rcond: f64 },

    #[error("Random sampling failed: {0}")]
    Sampling(String),
}
