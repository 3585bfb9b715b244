// src/predict.rs

use crate::ensemble::SparFit;
use crate::error::SparError;
use crate::validation::{combine_members, ValidationRow};
use log::warn;
use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Relative tolerance when matching a requested threshold against the grid.
const THRESHOLD_MATCH_TOLERANCE: f64 = 1e-12;

/// Final model for one (ensemble size, threshold) pair, in original units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparCoefficients {
    pub intercept: f64,
    /// One coefficient per training column.
    pub beta: Array1<f64>,
    pub nummod: usize,
    pub threshold: f64,
}

impl SparCoefficients {
    pub fn nonzero(&self) -> usize {
        self.beta.iter().filter(|b| **b != 0.0).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionScale {
    /// Linear predictor.
    Link,
    /// Mean of the response.
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Averaging {
    /// Predict from the averaged, thresholded coefficients.
    Coefficients,
    /// Average the response-scale predictions of the individual, un-thresholded members.
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictOptions {
    pub scale: PredictionScale,
    pub averaging: Averaging,
    pub nummod: Option<usize>,
    pub threshold: Option<f64>,
}

impl Default for PredictOptions {
    fn default() -> Self {
        PredictOptions {
            scale: PredictionScale::Response,
            averaging: Averaging::Coefficients,
            nummod: None,
            threshold: None,
        }
    }
}

fn same_threshold(a: f64, b: f64) -> bool {
    (a - b).abs() <= THRESHOLD_MATCH_TOLERANCE * a.abs().max(b.abs())
}

impl SparFit {
    /// Validation row for the requested pair. With neither given this is the
    /// global minimum-loss row; with one given, the minimum within that slice.
    pub fn select_row(&self, nummod: Option<usize>, threshold: Option<f64>) -> Result<&ValidationRow, SparError> {
        let resolved_nummod = nummod.map(|k| {
            if k > self.num_members() {
                warn!(
                    "Requested nummod {} exceeds the {} fitted members; using {}.",
                    k,
                    self.num_members(),
                    self.num_members()
                );
                self.num_members()
            } else {
                k
            }
        });

        let candidates: Vec<&ValidationRow> = self
            .validation
            .iter()
            .filter(|row| resolved_nummod.map_or(true, |k| row.nummod == k))
            .filter(|row| threshold.map_or(true, |t| same_threshold(row.threshold, t)))
            .collect();
        let first = *candidates
            .first()
            .ok_or(SparError::ValidationEntryNotFound { nummod, threshold })?;

        let best = candidates
            .iter()
            .filter_map(|row| row.loss.map(|loss| (*row, loss)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
            .map(|(row, _)| row);
        Ok(match best {
            Some(row) => row,
            None => {
                warn!(
                    "Every matching validation loss is missing; using nummod {} and threshold {:.4e}.",
                    first.nummod, first.threshold
                );
                first
            }
        })
    }

    /// Final intercept and coefficients for an (ensemble size, threshold)
    /// pair, resolved against the validation table.
    pub fn coefficients(&self, nummod: Option<usize>, threshold: Option<f64>) -> Result<SparCoefficients, SparError> {
        let row = self.select_row(nummod, threshold)?;
        let (intercept, beta) = combine_members(
            self.betas_std.view(),
            self.intercepts.view(),
            row.nummod,
            row.threshold,
            &self.standardization,
        );
        Ok(SparCoefficients {
            intercept,
            beta,
            nummod: row.nummod,
            threshold: row.threshold,
        })
    }

    /// Predictions for the rows of `x_new`.
    ///
    /// `coefficients`, when given, replaces the lookup by
    /// `options.nummod`/`options.threshold`.
    pub fn predict(
        &self,
        x_new: ArrayView2<f64>,
        options: PredictOptions,
        coefficients: Option<&SparCoefficients>,
    ) -> Result<Array1<f64>, SparError> {
        let p = self.standardization.n_features();
        if x_new.ncols() != p {
            return Err(SparError::ColumnCountMismatch {
                context: "New predictor matrix",
                found: x_new.ncols(),
                expected: p,
            });
        }
        let resolved = match coefficients {
            Some(c) => {
                if c.beta.len() != p {
                    return Err(SparError::ColumnCountMismatch {
                        context: "Supplied coefficient vector",
                        found: c.beta.len(),
                        expected: p,
                    });
                }
                c.clone()
            }
            None => self.coefficients(options.nummod, options.threshold)?,
        };
        let family = self.family();

        match options.averaging {
            Averaging::Coefficients => {
                let eta = x_new.dot(&resolved.beta) + resolved.intercept;
                Ok(match options.scale {
                    PredictionScale::Link => eta,
                    PredictionScale::Response => eta.mapv(|e| family.inverse_link(e)),
                })
            }
            Averaging::Response => {
                let k = resolved.nummod.clamp(1, self.num_members());
                let mut mean_response = Array1::<f64>::zeros(x_new.nrows());
                for j in 0..k {
                    let beta = self.betas.column(j);
                    let intercept = self.standardization.intercept_for(self.intercepts[j], beta);
                    let eta = x_new.dot(&beta) + intercept;
                    mean_response.zip_mut_with(&eta, |acc, &e| *acc += family.inverse_link(e));
                }
                mean_response /= k as f64;
                Ok(match options.scale {
                    PredictionScale::Link => mean_response.mapv(|m| family.link(m)),
                    PredictionScale::Response => mean_response,
                })
            }
        }
    }
}
