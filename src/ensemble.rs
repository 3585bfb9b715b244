// src/ensemble.rs

use crate::error::SparError;
use crate::family::Family;
use crate::glm::IrlsConfig;
use crate::marginal::{fit_member, MemberContext, MemberFit, SuppliedDraws};
use crate::projection::{ProjectionMatrix, ProjectionType};
use crate::screening::{inclusion_probabilities, screening_coefficients, ScreeningType};
use crate::standardize::Standardization;
use crate::validation::{auto_thresholds, sweep, LossMeasure, SweepInput, ValidationRow};
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Tuning knobs of the ensemble. `None` fields take data-dependent defaults
/// resolved at fit time; the fitted model reports the resolved values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparConfig {
    /// Number of variables kept per member after screening.
    /// Default: `2 * n`.
    pub nscreen: Option<usize>,
    /// Lower bound of the per-member reduced dimension.
    /// Default: `max(1, ceil(ln p_active))`, capped at `msup`.
    pub mslow: Option<usize>,
    /// Upper bound of the per-member reduced dimension.
    /// Default: `ceil(n / 2)`.
    pub msup: Option<usize>,
    /// Compute screening coefficients on a random quarter of the rows and fit
    /// members on the rest.
    pub split_data: bool,
    /// Sparsity level ψ of `ProjectionType::Sparse`. Default: `sqrt(p_use)`.
    /// Must be at least 1.
    pub sparse_psi: Option<f64>,
    /// Seed for every random draw of a fit.
    pub random_seed: u64,
    /// Fit members and score grid cells on the rayon thread pool. Results are
    /// identical to a serial run.
    pub parallel: bool,
}

impl Default for SparConfig {
    fn default() -> Self {
        SparConfig {
            nscreen: None,
            mslow: None,
            msup: None,
            split_data: false,
            sparse_psi: None,
            random_seed: 2025,
            parallel: true,
        }
    }
}

/// Candidate thresholds for the validation sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ThresholdGrid {
    /// `nnu` thresholds derived from the fitted coefficients, starting at 0.
    Auto { nnu: usize },
    /// Caller-chosen thresholds, used in the given order.
    Explicit(Vec<f64>),
}

impl Default for ThresholdGrid {
    fn default() -> Self {
        ThresholdGrid::Auto { nnu: 20 }
    }
}

/// Everything about a fit except the data and the family.
#[derive(Debug, Clone)]
pub struct SparOptions {
    pub thresholds: ThresholdGrid,
    /// Ensemble sizes to validate. The ensemble has `max(nummods)` members.
    pub nummods: Vec<usize>,
    pub measure: LossMeasure,
    pub projection: ProjectionType,
    pub screening: ScreeningType,
    pub config: SparConfig,
    pub irls: IrlsConfig,
    /// Per-member variable indices (original columns) to use instead of
    /// drawing them. Length must be `max(nummods)`.
    pub index_sets: Option<Vec<Vec<usize>>>,
    /// Per-member projections to use instead of drawing them. Length must be
    /// `max(nummods)`. Only data-driven values are refreshed.
    pub projections: Option<Vec<ProjectionMatrix>>,
}

impl Default for SparOptions {
    fn default() -> Self {
        SparOptions {
            thresholds: ThresholdGrid::default(),
            nummods: vec![20],
            measure: LossMeasure::default(),
            projection: ProjectionType::default(),
            screening: ScreeningType::default(),
            config: SparConfig::default(),
            irls: IrlsConfig::default(),
            index_sets: None,
            projections: None,
        }
    }
}

/// Fits sparse projected averaged regression ensembles.
#[derive(Debug, Clone, Default)]
pub struct SparEstimator {
    options: SparOptions,
}

/// A fitted ensemble together with its validation table. Never mutated after
/// `SparEstimator::fit` returns.
#[derive(Debug, Clone)]
pub struct SparFit {
    pub(crate) betas: Array2<f64>,
    pub(crate) betas_std: Array2<f64>,
    pub(crate) intercepts: Array1<f64>,
    pub(crate) screening_coefficients: Array1<f64>,
    pub(crate) index_sets: Vec<Vec<usize>>,
    pub(crate) projections: Vec<ProjectionMatrix>,
    pub(crate) thresholds: Vec<f64>,
    pub(crate) nummods: Vec<usize>,
    pub(crate) validation: Vec<ValidationRow>,
    pub(crate) used_validation_data: bool,
    pub(crate) standardization: Standardization,
    pub(crate) family: Arc<dyn Family>,
    pub(crate) measure: LossMeasure,
    pub(crate) projection_type: ProjectionType,
    pub(crate) screening_type: ScreeningType,
    pub(crate) config: SparConfig,
}

/// Reduced-dimension bounds after defaults are applied.
#[derive(Debug, Clone, Copy)]
struct ResolvedBounds {
    nscreen: usize,
    mslow: usize,
    msup: usize,
}

fn resolve_bounds(config: &SparConfig, n: usize, p_active: usize) -> Result<ResolvedBounds, SparError> {
    let nscreen = config.nscreen.unwrap_or(2 * n);
    let msup = config.msup.unwrap_or_else(|| (n + 1) / 2);
    let mslow = config
        .mslow
        .unwrap_or_else(|| ((p_active as f64).ln().ceil().max(1.0) as usize).min(msup.max(1)));
    if mslow < 1 || mslow > msup || msup > nscreen {
        return Err(SparError::InvalidDimensionBounds { mslow, msup, nscreen });
    }
    Ok(ResolvedBounds { nscreen, mslow, msup })
}

/// Maps supplied original-column index sets to sorted active positions.
fn supplied_positions(
    index_sets: &[Vec<usize>],
    standardization: &Standardization,
) -> Result<Vec<Vec<usize>>, SparError> {
    let mut position_of = vec![None; standardization.n_features()];
    for (position, &column) in standardization.active().iter().enumerate() {
        position_of[column] = Some(position);
    }
    index_sets
        .iter()
        .enumerate()
        .map(|(member, set)| {
            if set.is_empty() {
                return Err(SparError::InvalidSuppliedDraw {
                    what: "index set",
                    member,
                    reason: "no variables".to_string(),
                });
            }
            let mut positions = set
                .iter()
                .map(|&column| {
                    position_of
                        .get(column)
                        .copied()
                        .flatten()
                        .ok_or_else(|| SparError::InvalidSuppliedDraw {
                            what: "index set",
                            member,
                            reason: format!("column {} is out of range or has zero variance", column),
                        })
                })
                .collect::<Result<Vec<usize>, SparError>>()?;
            positions.sort_unstable();
            if positions.windows(2).any(|w| w[0] == w[1]) {
                return Err(SparError::InvalidSuppliedDraw {
                    what: "index set",
                    member,
                    reason: "repeated column".to_string(),
                });
            }
            Ok(positions)
        })
        .collect()
}

impl SparEstimator {
    pub fn new(options: SparOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SparOptions {
        &self.options
    }

    // --- Precondition checks (no randomness consumed) ---

    fn check_options(&self, family: &dyn Family) -> Result<(), SparError> {
        let options = &self.options;
        if options.nummods.is_empty() || options.nummods.iter().any(|&k| k == 0) {
            return Err(SparError::InvalidConfig(
                "nummods must be a non-empty list of positive ensemble sizes".to_string(),
            ));
        }
        match &options.thresholds {
            ThresholdGrid::Auto { nnu } if *nnu == 0 => {
                return Err(SparError::InvalidConfig("nnu must be at least 1".to_string()));
            }
            ThresholdGrid::Explicit(values) if values.is_empty() || values.iter().any(|t| !(*t >= 0.0) || !t.is_finite()) => {
                return Err(SparError::InvalidConfig(
                    "explicit thresholds must be a non-empty list of finite, non-negative values".to_string(),
                ));
            }
            _ => {}
        }
        if options.measure.requires_binary_family() && !family.is_binary() {
            return Err(SparError::IncompatibleMeasure {
                measure: options.measure.to_string(),
                family: family.name().to_string(),
            });
        }
        if let Some(psi) = options.config.sparse_psi {
            if !(psi >= 1.0) || !psi.is_finite() {
                return Err(SparError::InvalidConfig(format!("sparse_psi must be >= 1, got {}", psi)));
            }
        }
        Ok(())
    }

    // --- Main Public Execution Method ---

    /// Fits the ensemble and runs the validation sweep.
    ///
    /// `validation` holds held-out predictors and response; when absent the
    /// sweep scores the training data. Every precondition is checked before
    /// the first random draw.
    pub fn fit(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        family: Arc<dyn Family>,
        validation: Option<(ArrayView2<f64>, ArrayView1<f64>)>,
    ) -> Result<SparFit, SparError> {
        let fit_start_time = Instant::now();
        let options = &self.options;
        let (n, p) = x.dim();

        if y.len() != n {
            return Err(SparError::ResponseLengthMismatch { found: y.len(), expected: n });
        }
        if let Some((x_val, y_val)) = validation {
            if x_val.ncols() != p {
                return Err(SparError::ColumnCountMismatch {
                    context: "Validation predictor matrix",
                    found: x_val.ncols(),
                    expected: p,
                });
            }
            if y_val.len() != x_val.nrows() {
                return Err(SparError::ResponseLengthMismatch {
                    found: y_val.len(),
                    expected: x_val.nrows(),
                });
            }
            family.validate_response(y_val)?;
        }
        self.check_options(family.as_ref())?;
        family.validate_response(y)?;

        let standardization = Standardization::from_training(x, y, family.as_ref());
        let p_active = standardization.active().len();
        if p_active == 0 {
            return Err(SparError::NoActiveVariables);
        }
        let bounds = resolve_bounds(&options.config, n, p_active)?;
        if options.config.split_data && n / 4 < 2 {
            return Err(SparError::InvalidConfig(format!(
                "split_data needs at least 8 observations, got {}",
                n
            )));
        }

        let num_members = options.nummods.iter().copied().max().unwrap_or(1);
        let supplied_sets = match &options.index_sets {
            Some(sets) if sets.len() != num_members => {
                return Err(SparError::SuppliedLengthMismatch {
                    what: "index sets",
                    found: sets.len(),
                    expected: num_members,
                });
            }
            Some(sets) => Some(supplied_positions(sets, &standardization)?),
            None => None,
        };
        if let Some(projections) = &options.projections {
            if projections.len() != num_members {
                return Err(SparError::SuppliedLengthMismatch {
                    what: "projections",
                    found: projections.len(),
                    expected: num_members,
                });
            }
            for (member, projection) in projections.iter().enumerate() {
                projection
                    .check_structure()
                    .map_err(|e| SparError::InvalidSuppliedDraw {
                        what: "projection",
                        member,
                        reason: e.to_string(),
                    })?;
                let expected_cols = supplied_sets
                    .as_ref()
                    .map_or(bounds.nscreen.min(p_active), |sets| sets[member].len());
                if projection.ncols() != expected_cols || projection.nrows() == 0 {
                    return Err(SparError::InvalidSuppliedDraw {
                        what: "projection",
                        member,
                        reason: format!(
                            "shape {}x{} does not project {} selected variables",
                            projection.nrows(),
                            projection.ncols(),
                            expected_cols
                        ),
                    });
                }
            }
        }

        info!(
            "Fitting {} members ({} family, {} link) on {} observations, {} of {} predictors active; nscreen={}, m in [{}, {}], {} projection, {} screening.",
            num_members,
            family.name(),
            family.link_name(),
            n,
            p_active,
            p,
            bounds.nscreen,
            bounds.mslow,
            bounds.msup,
            options.projection,
            options.screening
        );

        // --- Randomness starts here ---

        let mut master_rng = ChaCha8Rng::seed_from_u64(options.config.random_seed);
        let z = standardization.standardize_active(x);
        let y_transformed = standardization.standardize_response(y);

        let (screen_rows, fit_rows): (Vec<usize>, Vec<usize>) = if options.config.split_data {
            let mut rows: Vec<usize> = (0..n).collect();
            rows.shuffle(&mut master_rng);
            let mut fit_rows = rows.split_off(n / 4);
            rows.sort_unstable();
            fit_rows.sort_unstable();
            debug!("Split data: {} screening rows, {} fitting rows.", rows.len(), fit_rows.len());
            (rows, fit_rows)
        } else {
            ((0..n).collect(), (0..n).collect())
        };

        let screening_start_time = Instant::now();
        let z_screen = z.select(Axis(0), &screen_rows);
        let y_screen = y_transformed.select(Axis(0), &screen_rows);
        let screening = screening_coefficients(
            z_screen.view(),
            y_screen.view(),
            family.as_ref(),
            options.screening,
            options.config.parallel,
        )?;
        let inclusion = inclusion_probabilities(screening.view())?;
        info!("Computed screening coefficients in {:?}", screening_start_time.elapsed());

        let (z_fit, y_fit) = if options.config.split_data {
            (z.select(Axis(0), &fit_rows), y_transformed.select(Axis(0), &fit_rows))
        } else {
            (z, y_transformed)
        };

        let member_seeds: Vec<u64> = (0..num_members).map(|_| master_rng.gen()).collect();
        let ctx = MemberContext {
            z: z_fit.view(),
            y: y_fit.view(),
            family: family.as_ref(),
            screening: screening.view(),
            inclusion: inclusion.view(),
            nscreen: bounds.nscreen,
            mslow: bounds.mslow,
            msup: bounds.msup,
            projection_type: options.projection,
            sparse_psi: options.config.sparse_psi,
            irls: &options.irls,
        };
        let supplied_for = |member: usize| SuppliedDraws {
            positions: supplied_sets.as_ref().map(|sets| sets[member].clone()),
            projection: options.projections.as_ref().map(|ps| ps[member].clone()),
        };

        let members_start_time = Instant::now();
        let members: Vec<MemberFit> = if options.config.parallel {
            (0..num_members)
                .into_par_iter()
                .map(|k| fit_member(&ctx, member_seeds[k], supplied_for(k)))
                .collect::<Result<Vec<MemberFit>, SparError>>()?
        } else {
            (0..num_members)
                .map(|k| fit_member(&ctx, member_seeds[k], supplied_for(k)))
                .collect::<Result<Vec<MemberFit>, SparError>>()?
        };
        info!("Fitted {} ensemble members in {:?}", num_members, members_start_time.elapsed());

        let mut betas_std = Array2::<f64>::zeros((p_active, num_members));
        let mut intercepts = Array1::<f64>::zeros(num_members);
        let mut index_sets = Vec::with_capacity(num_members);
        let mut projections = Vec::with_capacity(num_members);
        for (k, member) in members.into_iter().enumerate() {
            let mut column = betas_std.column_mut(k);
            for (&position, &value) in member.positions.iter().zip(member.coefficients.iter()) {
                column[position] = value;
            }
            intercepts[k] = member.intercept;
            index_sets.push(
                member
                    .positions
                    .iter()
                    .map(|&position| standardization.active()[position])
                    .collect::<Vec<usize>>(),
            );
            projections.push(member.projection);
        }

        let thresholds = match &options.thresholds {
            ThresholdGrid::Auto { nnu } => auto_thresholds(betas_std.view(), *nnu),
            ThresholdGrid::Explicit(values) => values.clone(),
        };

        let (x_val, y_val) = match validation {
            Some((x_v, y_v)) => (x_v.reborrow(), y_v.reborrow()),
            None => (x.reborrow(), y.reborrow()),
        };
        let validation_rows = sweep(&SweepInput {
            betas_std: betas_std.view(),
            intercepts: intercepts.view(),
            standardization: &standardization,
            family: family.as_ref(),
            x_val,
            y_val,
            measure: options.measure,
            thresholds: &thresholds,
            nummods: &options.nummods,
            parallel: options.config.parallel,
        });

        let mut betas = Array2::<f64>::zeros((p, num_members));
        for (k, member_std) in betas_std.columns().into_iter().enumerate() {
            betas
                .column_mut(k)
                .assign(&standardization.rescale_coefficients(member_std));
        }

        let config = SparConfig {
            nscreen: Some(bounds.nscreen),
            mslow: Some(bounds.mslow),
            msup: Some(bounds.msup),
            ..options.config.clone()
        };
        info!("SPAR fit finished in {:?}", fit_start_time.elapsed());

        Ok(SparFit {
            betas,
            betas_std,
            intercepts,
            screening_coefficients: screening,
            index_sets,
            projections,
            thresholds,
            nummods: options.nummods.clone(),
            validation: validation_rows,
            used_validation_data: validation.is_some(),
            standardization,
            family,
            measure: options.measure,
            projection_type: options.projection,
            screening_type: options.screening,
            config,
        })
    }
}

impl SparFit {
    /// Un-thresholded original-scale member coefficients, `p × max(nummods)`.
    /// Zero-variance columns are zero in every member.
    pub fn betas(&self) -> &Array2<f64> {
        &self.betas
    }

    /// Standardized member coefficients over the active columns,
    /// `p_active × max(nummods)`.
    pub fn betas_std(&self) -> &Array2<f64> {
        &self.betas_std
    }

    /// Fitted member intercepts on the link scale of the transformed response.
    /// Exactly zero for the identity-Gaussian family.
    pub fn intercepts(&self) -> &Array1<f64> {
        &self.intercepts
    }

    /// One screening coefficient per active column.
    pub fn screening_coefficients(&self) -> &Array1<f64> {
        &self.screening_coefficients
    }

    /// Sorted original column indices each member was fitted on.
    pub fn index_sets(&self) -> &[Vec<usize>] {
        &self.index_sets
    }

    pub fn projections(&self) -> &[ProjectionMatrix] {
        &self.projections
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    pub fn nummods(&self) -> &[usize] {
        &self.nummods
    }

    /// One row per (ensemble size, threshold), ensemble size major.
    pub fn validation(&self) -> &[ValidationRow] {
        &self.validation
    }

    /// Whether the sweep scored held-out data rather than the training data.
    pub fn used_validation_data(&self) -> bool {
        self.used_validation_data
    }

    pub fn standardization(&self) -> &Standardization {
        &self.standardization
    }

    pub fn family(&self) -> &dyn Family {
        self.family.as_ref()
    }

    pub fn measure(&self) -> LossMeasure {
        self.measure
    }

    pub fn projection_type(&self) -> ProjectionType {
        self.projection_type
    }

    pub fn screening_type(&self) -> ScreeningType {
        self.screening_type
    }

    /// The configuration with data-dependent defaults filled in.
    pub fn config(&self) -> &SparConfig {
        &self.config
    }

    /// Number of fitted members, `max(nummods)`.
    pub fn num_members(&self) -> usize {
        self.betas.ncols()
    }
}
