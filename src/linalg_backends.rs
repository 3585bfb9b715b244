// src/linalg_backends.rs

use crate::error::SparError;
use log::debug;
use ndarray::{Array1, Array2};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{Factorize, ReciprocalConditionNum, Solve};
use std::marker::PhantomData;

#[derive(Debug, Default, Copy, Clone)]
pub struct LinAlgBackendProvider<F: 'static + Copy + Send + Sync> {
    _phantom: PhantomData<F>,
}

impl<F: 'static + Copy + Send + Sync> LinAlgBackendProvider<F> {
    pub fn new() -> Self {
        Self { _phantom: PhantomData }
    }
}

// --- Trait Definitions ---

/// Why a checked solve did not produce a usable answer.
#[derive(Debug)]
pub enum SolveError {
    /// The system is singular to working precision. Callers may retry with a
    /// penalty on the diagonal.
    Singular { rcond: f64 },
    /// Shape or memory-layout problems that a penalty cannot fix.
    Linalg(LinalgError),
}

/// Trait for solving a square linear system `a x = b` that refuses to return
/// an answer when `a` is computationally singular (reciprocal condition
/// number below machine epsilon), rather than handing back amplified noise.
pub trait BackendSolve<F: 'static + Copy + Send + Sync> {
    fn solve_checked(&self, a: &Array2<F>, b: &Array1<F>) -> Result<Array1<F>, SolveError>;
}

// --- NdarrayLinAlgBackend Implementation ---

#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

impl BackendSolve<f64> for NdarrayLinAlgBackend {
    fn solve_checked(&self, a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, SolveError> {
        if a.nrows() != a.ncols() || a.nrows() != b.len() {
            return Err(SolveError::Linalg(LinalgError::NotSquare {
                rows: a.nrows() as i32,
                cols: a.ncols() as i32,
            }));
        }
        if a.is_empty() {
            return Ok(Array1::zeros(0));
        }
        if a.iter().any(|v| !v.is_finite()) || b.iter().any(|v| !v.is_finite()) {
            return Err(SolveError::Singular { rcond: f64::NAN });
        }

        // A zero pivot makes getrf report failure; that is singularity, not a bug.
        let lu = match a.factorize() {
            Ok(lu) => lu,
            Err(LinalgError::Lapack(_)) => return Err(SolveError::Singular { rcond: 0.0 }),
            Err(e) => return Err(SolveError::Linalg(e)),
        };
        let rcond = lu.rcond().map_err(SolveError::Linalg)?;
        if !rcond.is_finite() || rcond < f64::EPSILON {
            return Err(SolveError::Singular { rcond });
        }
        let x = lu.solve(b).map_err(SolveError::Linalg)?;
        if x.iter().any(|v| !v.is_finite()) {
            return Err(SolveError::Singular { rcond });
        }
        Ok(x)
    }
}

// --- LinAlgBackendProvider Dispatch ---

impl<F> BackendSolve<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendSolve<F>,
{
    fn solve_checked(&self, a: &Array2<F>, b: &Array1<F>) -> Result<Array1<F>, SolveError> {
        NdarrayLinAlgBackend.solve_checked(a, b)
    }
}

// --- Ridge-stabilized solving ---

pub fn add_to_diagonal(matrix: &mut Array2<f64>, value: f64) {
    matrix.diag_mut().mapv_inplace(|d| d + value);
}

/// Solves `a x = b`; if `a` is singular, retries once with `ridge` added to
/// the diagonal. The retry is routine and only logged at debug level.
pub fn solve_with_ridge_fallback(
    a: &Array2<f64>,
    b: &Array1<f64>,
    ridge: f64,
) -> Result<Array1<f64>, SparError> {
    let backend = LinAlgBackendProvider::<f64>::new();
    match backend.solve_checked(a, b) {
        Ok(x) => Ok(x),
        Err(SolveError::Linalg(e)) => Err(SparError::LinearSystemSolveFailed(e)),
        Err(SolveError::Singular { rcond }) => {
            debug!(
                "Singular {}x{} system (rcond={:.3e}); retrying with ridge {}.",
                a.nrows(),
                a.ncols(),
                rcond,
                ridge
            );
            let mut stabilized = a.clone();
            add_to_diagonal(&mut stabilized, ridge);
            match backend.solve_checked(&stabilized, b) {
                Ok(x) => Ok(x),
                Err(SolveError::Linalg(e)) => Err(SparError::LinearSystemSolveFailed(e)),
                Err(SolveError::Singular { rcond }) => Err(SparError::SingularSystem {
                    dim: a.nrows(),
                    rcond,
                }),
            }
        }
    }
}
