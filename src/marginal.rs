// src/marginal.rs

use crate::error::SparError;
use crate::family::Family;
use crate::glm::{fit_ridge_glm_path_min, least_squares_with_fallback, IrlsConfig, SINGULAR_RIDGE};
use crate::projection::{generate_projection, ProjectionMatrix, ProjectionType};
use log::{debug, trace};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use rand::seq::index::sample_weighted;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Everything a single ensemble member reads. Shared immutably by all members.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MemberContext<'a> {
    /// Standardized fitting rows over the active columns.
    pub z: ArrayView2<'a, f64>,
    /// Transformed response on the fitting rows.
    pub y: ArrayView1<'a, f64>,
    pub family: &'a dyn Family,
    /// Screening coefficient per active column.
    pub screening: ArrayView1<'a, f64>,
    /// Inclusion probability per active column.
    pub inclusion: ArrayView1<'a, f64>,
    pub nscreen: usize,
    pub mslow: usize,
    pub msup: usize,
    pub projection_type: ProjectionType,
    pub sparse_psi: Option<f64>,
    pub irls: &'a IrlsConfig,
}

/// Draws a member may take from the caller instead of the generator.
#[derive(Debug, Clone, Default)]
pub(crate) struct SuppliedDraws {
    /// Sorted active-column positions.
    pub positions: Option<Vec<usize>>,
    pub projection: Option<ProjectionMatrix>,
}

/// One fitted ensemble member.
#[derive(Debug, Clone)]
pub(crate) struct MemberFit {
    /// Sorted active-column positions the member was fitted on.
    pub positions: Vec<usize>,
    /// Back-projected standardized coefficients, aligned with `positions`.
    pub coefficients: Array1<f64>,
    /// Zero for the identity-Gaussian family.
    pub intercept: f64,
    pub projection: ProjectionMatrix,
}

/// Screening-weighted draw of `nscreen` active positions without
/// replacement, or every active position when the pool is not larger than
/// `nscreen`. Returned sorted.
pub(crate) fn draw_positions(
    inclusion: ArrayView1<f64>,
    nscreen: usize,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<usize>, SparError> {
    let pool = inclusion.len();
    if nscreen >= pool {
        return Ok((0..pool).collect());
    }
    let mut positions = sample_weighted(rng, pool, |j| inclusion[j], nscreen)
        .map_err(|e| SparError::Sampling(e.to_string()))?
        .into_vec();
    positions.sort_unstable();
    Ok(positions)
}

/// Fits one member from its own seed.
///
/// Draw order is fixed: selected positions, reduced dimension, projection.
/// Supplied draws skip their step without consuming randomness for it.
pub(crate) fn fit_member(
    ctx: &MemberContext<'_>,
    seed: u64,
    supplied: SuppliedDraws,
) -> Result<MemberFit, SparError> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let positions = match supplied.positions {
        Some(positions) => positions,
        None => draw_positions(ctx.inclusion, ctx.nscreen, &mut rng)?,
    };
    let selected_screening = ctx.screening.select(Axis(0), &positions);

    let projection = match supplied.projection {
        Some(mut projection) => {
            // An identity carries no sketch values to refresh.
            if ctx.projection_type == ProjectionType::DataDriven && projection.nrows() < projection.ncols() {
                projection.refresh_data_driven_values(selected_screening.view())?;
            }
            projection
        }
        None => {
            let m = rng.gen_range(ctx.mslow..=ctx.msup);
            generate_projection(
                ctx.projection_type,
                m,
                positions.len(),
                selected_screening.view(),
                ctx.sparse_psi,
                &mut rng,
            )
        }
    };
    debug!(
        "Member (seed {}): {} selected variables projected to {} dimensions.",
        seed,
        positions.len(),
        projection.nrows()
    );

    let selected = ctx.z.select(Axis(1), &positions);
    let reduced = projection.project(selected.view())?;

    let (intercept, gamma) = if ctx.family.is_identity_gaussian() {
        (0.0, least_squares_with_fallback(reduced.view(), ctx.y, SINGULAR_RIDGE)?)
    } else {
        let fit = fit_ridge_glm_path_min(reduced.view(), ctx.y, ctx.family, ctx.irls)?;
        trace!(
            "Member (seed {}): IRLS {} after {} iterations, deviance {:.4e}.",
            seed,
            if fit.converged { "converged" } else { "stopped" },
            fit.iterations,
            fit.deviance
        );
        (fit.intercept, fit.coefficients)
    };

    let coefficients = projection.back_project(gamma.view())?;
    Ok(MemberFit {
        positions,
        coefficients,
        intercept,
        projection,
    })
}
