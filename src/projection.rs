// src/projection.rs

use crate::error::SparError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_rand::RandomExt;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Random projection families. All produce an `m × p_use` matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionType {
    /// Count sketch whose nonzero values are the normalized, signed screening
    /// coefficients of the projected variables.
    DataDriven,
    /// Count sketch with random ±1 values.
    CountSketch,
    /// Dense i.i.d. N(0, 1/m) entries.
    Gaussian,
    /// Very sparse random projection with entries in `sqrt(1/ψ)·{-1, 0, 1}`.
    Sparse,
}

impl Default for ProjectionType {
    fn default() -> Self {
        ProjectionType::DataDriven
    }
}

impl fmt::Display for ProjectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProjectionType::DataDriven => "data-driven",
            ProjectionType::CountSketch => "count-sketch",
            ProjectionType::Gaussian => "gaussian",
            ProjectionType::Sparse => "sparse",
        };
        f.write_str(label)
    }
}

/// A projection matrix in compressed sparse column form.
///
/// Shape is `(nrows, ncols)` = (reduced dimension, number of selected
/// variables). Column `j` owns `row_idx[col_ptr[j]..col_ptr[j + 1]]` and the
/// matching `values`. The sparsity pattern is fixed at construction; only
/// `refresh_data_driven_values` may change stored values afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionMatrix {
    nrows: usize,
    ncols: usize,
    col_ptr: Vec<usize>,
    row_idx: Vec<usize>,
    values: Vec<f64>,
}

impl ProjectionMatrix {
    /// `size × size` identity, used when no reduction is needed.
    pub fn identity(size: usize) -> Self {
        Self {
            nrows: size,
            ncols: size,
            col_ptr: (0..=size).collect(),
            row_idx: (0..size).collect(),
            values: vec![1.0; size],
        }
    }

    /// Builds from a dense matrix, keeping only nonzero entries.
    pub fn from_dense(dense: ArrayView2<f64>) -> Self {
        let (nrows, ncols) = dense.dim();
        let mut col_ptr = Vec::with_capacity(ncols + 1);
        let mut row_idx = Vec::new();
        let mut values = Vec::new();
        col_ptr.push(0);
        for column in dense.columns() {
            for (i, &v) in column.iter().enumerate() {
                if v != 0.0 {
                    row_idx.push(i);
                    values.push(v);
                }
            }
            col_ptr.push(row_idx.len());
        }
        Self {
            nrows,
            ncols,
            col_ptr,
            row_idx,
            values,
        }
    }

    /// One stored entry per column: column `j` has value `values[j]` in row `rows[j]`.
    fn from_single_entries(nrows: usize, rows: Vec<usize>, values: Vec<f64>) -> Self {
        let ncols = rows.len();
        Self {
            nrows,
            ncols,
            col_ptr: (0..=ncols).collect(),
            row_idx: rows,
            values,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Checks the compressed column storage: `ncols + 1` monotone column
    /// pointers starting at 0 and ending at the entry count, and every row
    /// index below `nrows`. Deserialized matrices are only trusted after this.
    pub fn check_structure(&self) -> Result<(), SparError> {
        if self.col_ptr.len() != self.ncols + 1 {
            return Err(SparError::MalformedProjection(format!(
                "{} column pointers for {} columns",
                self.col_ptr.len(),
                self.ncols
            )));
        }
        if self.col_ptr.first() != Some(&0) || self.col_ptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(SparError::MalformedProjection(
                "column pointers must start at 0 and never decrease".to_string(),
            ));
        }
        let nnz = self.col_ptr[self.ncols];
        if self.row_idx.len() != nnz || self.values.len() != nnz {
            return Err(SparError::MalformedProjection(format!(
                "column pointers describe {} entries, storage holds {} rows and {} values",
                nnz,
                self.row_idx.len(),
                self.values.len()
            )));
        }
        if let Some(&row) = self.row_idx.iter().find(|&&row| row >= self.nrows) {
            return Err(SparError::MalformedProjection(format!(
                "row index {} out of range for {} rows",
                row, self.nrows
            )));
        }
        Ok(())
    }

    /// Stored `(row, value)` pairs of column `j`. Empty when `j` is out of range.
    pub fn column_entries(&self, j: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = match (self.col_ptr.get(j), self.col_ptr.get(j + 1)) {
            (Some(&start), Some(&end)) if j < self.ncols && start <= end => start..end,
            _ => 0..0,
        };
        let rows = self.row_idx.get(range.clone()).unwrap_or(&[]);
        let values = self.values.get(range).unwrap_or(&[]);
        rows.iter().copied().zip(values.iter().copied())
    }

    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::zeros((self.nrows, self.ncols));
        for j in 0..self.ncols {
            for (i, v) in self.column_entries(j) {
                if let Some(cell) = dense.get_mut((i, j)) {
                    *cell += v;
                }
            }
        }
        dense
    }

    /// Projects the rows of `x` (`n × ncols`) into the reduced space: `x Φᵀ`,
    /// shape `n × nrows`.
    pub fn project(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, SparError> {
        self.check_structure()?;
        if x.ncols() != self.ncols {
            return Err(SparError::ProjectionShapeMismatch {
                operation: "Projection of predictor columns",
                found: x.ncols(),
                expected: self.ncols,
            });
        }
        let mut projected = Array2::zeros((x.nrows(), self.nrows));
        for (j, x_column) in x.columns().into_iter().enumerate() {
            for (i, v) in self.column_entries(j) {
                projected.column_mut(i).scaled_add(v, &x_column);
            }
        }
        Ok(projected)
    }

    /// Maps reduced-space coefficients back to the selected variables: `Φᵀ γ`.
    pub fn back_project(&self, gamma: ArrayView1<f64>) -> Result<Array1<f64>, SparError> {
        self.check_structure()?;
        if gamma.len() != self.nrows {
            return Err(SparError::ProjectionShapeMismatch {
                operation: "Back-projection of reduced coefficients",
                found: gamma.len(),
                expected: self.nrows,
            });
        }
        Ok(Array1::from_iter((0..self.ncols).map(|j| {
            self.column_entries(j).map(|(i, v)| v * gamma[i]).sum::<f64>()
        })))
    }

    /// Overwrites the stored values of every column `j` with the normalized
    /// screening coefficient `coefficients[j] / max |coefficients|`, keeping the
    /// sparsity pattern. Leaves the matrix untouched when every coefficient is
    /// zero.
    pub fn refresh_data_driven_values(&mut self, coefficients: ArrayView1<f64>) -> Result<(), SparError> {
        self.check_structure()?;
        if coefficients.len() != self.ncols {
            return Err(SparError::ProjectionShapeMismatch {
                operation: "Data-driven refresh of screening coefficients",
                found: coefficients.len(),
                expected: self.ncols,
            });
        }
        let Some(normalized) = normalized_weights(coefficients) else {
            return Ok(());
        };
        for (j, &w) in normalized.iter().enumerate() {
            for k in self.col_ptr[j]..self.col_ptr[j + 1] {
                self.values[k] = w;
            }
        }
        Ok(())
    }
}

/// `c / max |c|`, or `None` when every coefficient is zero or non-finite.
fn normalized_weights(coefficients: ArrayView1<f64>) -> Option<Array1<f64>> {
    let max_abs = coefficients.iter().fold(0.0_f64, |acc, c| acc.max(c.abs()));
    if max_abs.is_finite() && max_abs > 0.0 {
        Some(coefficients.mapv(|c| c / max_abs))
    } else {
        None
    }
}

/// Row assignment for a count sketch: every column goes to one row, and when
/// there are at least as many columns as rows every row receives at least one
/// column.
fn count_sketch_rows(m: usize, p_use: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    let mut rows = vec![0usize; p_use];
    let mut order: Vec<usize> = (0..p_use).collect();
    order.shuffle(rng);
    for (k, &j) in order.iter().enumerate() {
        rows[j] = if k < m { k } else { rng.gen_range(0..m) };
    }
    rows
}

fn random_signs(count: usize, rng: &mut ChaCha8Rng) -> Vec<f64> {
    (0..count).map(|_| if rng.gen_bool(0.5) { 1.0 } else { -1.0 }).collect()
}

/// Draws an `m × p_use` projection of the requested type.
///
/// `screening` holds the screening coefficients of the `p_use` selected
/// variables, used only by `ProjectionType::DataDriven`. `sparse_psi` is the
/// sparsity level of `ProjectionType::Sparse` (default `sqrt(p_use)`, floored
/// at 1). When `p_use <= m` no reduction is possible and the identity of size
/// `p_use` is returned.
pub fn generate_projection(
    projection: ProjectionType,
    m: usize,
    p_use: usize,
    screening: ArrayView1<f64>,
    sparse_psi: Option<f64>,
    rng: &mut ChaCha8Rng,
) -> ProjectionMatrix {
    if p_use <= m {
        return ProjectionMatrix::identity(p_use);
    }
    match projection {
        ProjectionType::DataDriven => {
            let rows = count_sketch_rows(m, p_use, rng);
            let values = match normalized_weights(screening) {
                Some(weights) => weights.to_vec(),
                None => random_signs(p_use, rng),
            };
            ProjectionMatrix::from_single_entries(m, rows, values)
        }
        ProjectionType::CountSketch => {
            let rows = count_sketch_rows(m, p_use, rng);
            let values = random_signs(p_use, rng);
            ProjectionMatrix::from_single_entries(m, rows, values)
        }
        ProjectionType::Gaussian => {
            let scale = 1.0 / (m as f64).sqrt();
            let dense = Array2::<f64>::random_using((m, p_use), StandardNormal, rng) * scale;
            ProjectionMatrix::from_dense(dense.view())
        }
        ProjectionType::Sparse => {
            let psi = sparse_psi.unwrap_or_else(|| (p_use as f64).sqrt()).max(1.0);
            let magnitude = (1.0 / psi).sqrt();
            let half_rate = 1.0 / (2.0 * psi);
            let dense = Array2::from_shape_simple_fn((m, p_use), || {
                let u: f64 = rng.gen();
                if u < half_rate {
                    -magnitude
                } else if u < 2.0 * half_rate {
                    magnitude
                } else {
                    0.0
                }
            });
            ProjectionMatrix::from_dense(dense.view())
        }
    }
}
