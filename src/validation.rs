// src/validation.rs

use crate::family::Family;
use crate::standardize::Standardization;
use log::{info, trace};
use ndarray::{s, Array1, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Loss used to score each (ensemble size, threshold) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossMeasure {
    /// Sum of the family's unit deviances.
    Deviance,
    MeanSquaredError,
    MeanAbsoluteError,
    /// Share of rounded predicted probabilities that miss the label. Binary families only.
    Misclassification,
    /// `1 - AUC`. Binary families only; missing when the labels are constant.
    OneMinusAuc,
}

impl Default for LossMeasure {
    fn default() -> Self {
        LossMeasure::Deviance
    }
}

impl LossMeasure {
    pub fn requires_binary_family(&self) -> bool {
        matches!(self, LossMeasure::Misclassification | LossMeasure::OneMinusAuc)
    }
}

impl fmt::Display for LossMeasure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LossMeasure::Deviance => "deviance",
            LossMeasure::MeanSquaredError => "mse",
            LossMeasure::MeanAbsoluteError => "mae",
            LossMeasure::Misclassification => "class",
            LossMeasure::OneMinusAuc => "1-auc",
        };
        f.write_str(label)
    }
}

/// One cell of the validation grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRow {
    /// Position of `threshold` in the threshold grid.
    pub threshold_index: usize,
    pub threshold: f64,
    pub nummod: usize,
    /// Nonzero entries of the final original-scale coefficient vector.
    pub nonzero: usize,
    /// `None` when the loss is undefined for the validation data.
    pub loss: Option<f64>,
}

/// Sample quantile, R's default (type 7) definition. `sorted` must be
/// ascending and non-empty.
fn quantile_type7(sorted: &[f64], prob: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * prob;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Threshold grid derived from the fitted standardized coefficients.
///
/// Always starts with `0`. The remaining `nnu - 1` values are equally spaced
/// quantiles (probabilities `0..=1`) of the nonzero absolute coefficients.
/// When no coefficient is nonzero the grid is `[0]`.
pub fn auto_thresholds(betas_std: ArrayView2<f64>, nnu: usize) -> Vec<f64> {
    let mut grid = vec![0.0];
    if nnu <= 1 {
        return grid;
    }
    let mut magnitudes: Vec<f64> = betas_std
        .iter()
        .filter(|b| **b != 0.0 && b.is_finite())
        .map(|b| b.abs())
        .collect();
    if magnitudes.is_empty() {
        return grid;
    }
    magnitudes.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let steps = nnu - 1;
    grid.extend((0..steps).map(|i| {
        let prob = if steps == 1 { 0.0 } else { i as f64 / (steps - 1) as f64 };
        quantile_type7(&magnitudes, prob)
    }));
    grid
}

/// Averages the first `nummod` member columns after zeroing entries with
/// `|b| < threshold`, and rescales to original units.
///
/// Returns `(intercept, beta)` with `beta` over all training columns.
pub fn combine_members(
    betas_std: ArrayView2<f64>,
    intercepts: ArrayView1<f64>,
    nummod: usize,
    threshold: f64,
    standardization: &Standardization,
) -> (f64, Array1<f64>) {
    let k = nummod.min(betas_std.ncols());
    let members = betas_std.slice(s![.., ..k]);
    let averaged = if k == 0 {
        Array1::zeros(betas_std.nrows())
    } else {
        members.map_axis(Axis(1), |row| {
            row.iter().filter(|b| b.abs() >= threshold).sum::<f64>() / k as f64
        })
    };
    let beta = standardization.rescale_coefficients(averaged.view());
    let fitted_intercept = if k == 0 {
        0.0
    } else {
        intercepts.slice(s![..k]).mean().unwrap_or(0.0)
    };
    let intercept = standardization.intercept_for(fitted_intercept, beta.view());
    (intercept, beta)
}

/// Area under the ROC curve of `scores` against 0/1 labels, with tied
/// scores handled as a single step of the curve. `None` when only one class
/// is present.
pub fn area_under_curve(labels: ArrayView1<f64>, scores: ArrayView1<f64>) -> Option<f64> {
    let positives = labels.iter().filter(|&&y| y > 0.5).count() as f64;
    let negatives = labels.len() as f64 - positives;
    if positives == 0.0 || negatives == 0.0 {
        return None;
    }

    let mut pairs: Vec<(f64, f64)> = scores.iter().copied().zip(labels.iter().copied()).collect();
    pairs.sort_unstable_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

    let (mut tp, mut fp) = (0.0, 0.0);
    let (mut last_tpr, mut last_fpr) = (0.0, 0.0);
    let mut auc = 0.0;
    let mut i = 0;
    while i < pairs.len() {
        let score = pairs[i].0;
        while i < pairs.len() && pairs[i].0 == score {
            if pairs[i].1 > 0.5 {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            i += 1;
        }
        let (tpr, fpr) = (tp / positives, fp / negatives);
        auc += (fpr - last_fpr) * (tpr + last_tpr) / 2.0;
        last_tpr = tpr;
        last_fpr = fpr;
    }
    Some(auc)
}

/// Scores the linear predictor `eta` against `y`.
pub fn evaluate_loss(
    measure: LossMeasure,
    family: &dyn Family,
    y: ArrayView1<f64>,
    eta: ArrayView1<f64>,
) -> Option<f64> {
    let mu = eta.mapv(|e| family.inverse_link(e));
    let n = y.len().max(1) as f64;
    match measure {
        LossMeasure::Deviance => Some(family.deviance(y, mu.view())),
        LossMeasure::MeanSquaredError => {
            Some(y.iter().zip(mu.iter()).map(|(a, b)| (a - b).powi(2)).sum::<f64>() / n)
        }
        LossMeasure::MeanAbsoluteError => {
            Some(y.iter().zip(mu.iter()).map(|(a, b)| (a - b).abs()).sum::<f64>() / n)
        }
        LossMeasure::Misclassification => {
            let misses = y.iter().zip(mu.iter()).filter(|(a, b)| **a != b.round()).count();
            Some(misses as f64 / n)
        }
        LossMeasure::OneMinusAuc => area_under_curve(y, mu.view()).map(|auc| 1.0 - auc),
    }
}

/// Everything the threshold/ensemble-size sweep reads.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SweepInput<'a> {
    /// `p_active × M` standardized member coefficients.
    pub betas_std: ArrayView2<'a, f64>,
    pub intercepts: ArrayView1<'a, f64>,
    pub standardization: &'a Standardization,
    pub family: &'a dyn Family,
    pub x_val: ArrayView2<'a, f64>,
    pub y_val: ArrayView1<'a, f64>,
    pub measure: LossMeasure,
    pub thresholds: &'a [f64],
    pub nummods: &'a [usize],
    pub parallel: bool,
}

/// Scores every (ensemble size, threshold) cell. Rows are ordered by
/// ensemble size first, threshold second, matching the input orders.
pub(crate) fn sweep(input: &SweepInput<'_>) -> Vec<ValidationRow> {
    let cells: Vec<(usize, usize)> = input
        .nummods
        .iter()
        .flat_map(|&k| (0..input.thresholds.len()).map(move |t| (k, t)))
        .collect();

    let score_cell = |&(nummod, threshold_index): &(usize, usize)| {
        let threshold = input.thresholds[threshold_index];
        let (intercept, beta) = combine_members(
            input.betas_std,
            input.intercepts,
            nummod,
            threshold,
            input.standardization,
        );
        let eta = input.x_val.dot(&beta) + intercept;
        let loss = evaluate_loss(input.measure, input.family, input.y_val, eta.view());
        let nonzero = beta.iter().filter(|b| **b != 0.0).count();
        trace!(
            "nummod {} threshold {:.4e}: {} nonzero, {} = {:?}",
            nummod,
            threshold,
            nonzero,
            input.measure,
            loss
        );
        ValidationRow {
            threshold_index,
            threshold,
            nummod,
            nonzero,
            loss,
        }
    };

    let rows: Vec<ValidationRow> = if input.parallel {
        cells.par_iter().map(score_cell).collect()
    } else {
        cells.iter().map(score_cell).collect()
    };

    if let Some(best) = rows
        .iter()
        .filter_map(|r| r.loss.map(|l| (r, l)))
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
    {
        info!(
            "Validation sweep over {} cells: best {} = {:.6e} at nummod {}, threshold {:.4e} ({} nonzero).",
            rows.len(),
            input.measure,
            best.1,
            best.0.nummod,
            best.0.threshold,
            best.0.nonzero
        );
    } else {
        info!(
            "Validation sweep over {} cells: {} is undefined for every cell.",
            rows.len(),
            input.measure
        );
    }
    rows
}
