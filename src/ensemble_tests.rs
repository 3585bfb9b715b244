// src/ensemble_tests.rs
#![cfg(test)]

use crate::ensemble::{SparConfig, SparEstimator, SparOptions, ThresholdGrid};
use crate::error::SparError;
use crate::family::{Binomial, Family, Gaussian, Poisson};
use crate::predict::{Averaging, PredictOptions, PredictionScale};
use crate::projection::{ProjectionMatrix, ProjectionType};
use crate::screening::ScreeningType;
use crate::validation::LossMeasure;
use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array2, Axis};
use ndarray_rand::RandomExt;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use std::sync::Arc;

/// `n × p` standard-normal design with `y = 2 x0 - 1.5 x1 + x2 + 0.3 ε`.
fn gaussian_problem(n: usize, p: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let x = Array2::<f64>::random_using((n, p), StandardNormal, &mut rng);
    let noise = Array1::<f64>::random_using(n, StandardNormal, &mut rng);
    let y = x.column(0).mapv(|v| 2.0 * v) - x.column(1).mapv(|v| 1.5 * v) + x.column(2) + noise * 0.3;
    (x, y)
}

fn binary_problem(n: usize, p: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let (x, signal) = gaussian_problem(n, p, seed);
    let mut rng = ChaCha8Rng::seed_from_u64(seed + 1000);
    let y = signal.mapv(|s| {
        let prob = 1.0 / (1.0 + (-s).exp());
        if rng.gen::<f64>() < prob { 1.0 } else { 0.0 }
    });
    (x, y)
}

fn small_options(nummods: Vec<usize>) -> SparOptions {
    SparOptions {
        nummods,
        thresholds: ThresholdGrid::Auto { nnu: 5 },
        ..SparOptions::default()
    }
}

fn fit_gaussian(options: SparOptions, x: &Array2<f64>, y: &Array1<f64>) -> crate::ensemble::SparFit {
    SparEstimator::new(options)
        .fit(x.view(), y.view(), Arc::new(Gaussian), None)
        .expect("gaussian fit should succeed")
}

#[test]
fn constant_columns_have_zero_coefficients_everywhere() {
    let (mut x, y) = gaussian_problem(50, 20, 1);
    x.column_mut(4).fill(3.0);
    x.column_mut(11).fill(-1.0);
    let fit = fit_gaussian(small_options(vec![6]), &x, &y);

    assert_eq!(fit.standardization().active().len(), 18);
    for &j in &[4, 11] {
        assert!(fit.betas().row(j).iter().all(|&b| b == 0.0));
        assert!(fit.index_sets().iter().all(|set| !set.contains(&j)));
    }
    for row in fit.validation() {
        let coefs = fit.coefficients(Some(row.nummod), Some(row.threshold)).unwrap();
        assert_eq!(coefs.beta[4], 0.0);
        assert_eq!(coefs.beta[11], 0.0);
    }
}

#[test]
fn index_sets_never_exceed_pool_or_active_count() {
    let (x, y) = gaussian_problem(40, 60, 2);
    let options = SparOptions {
        config: SparConfig {
            nscreen: Some(15),
            mslow: Some(2),
            msup: Some(8),
            ..SparConfig::default()
        },
        ..small_options(vec![8])
    };
    let fit = fit_gaussian(options, &x, &y);
    assert_eq!(fit.index_sets().len(), 8);
    for (set, projection) in fit.index_sets().iter().zip(fit.projections()) {
        assert_eq!(set.len(), 15);
        assert!(set.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(projection.ncols(), 15);
        assert!((2..=8).contains(&projection.nrows()));
    }

    let (x_small, y_small) = gaussian_problem(40, 6, 3);
    let fit = fit_gaussian(small_options(vec![3]), &x_small, &y_small);
    assert!(fit.index_sets().iter().all(|set| set == &vec![0, 1, 2, 3, 4, 5]));
}

#[test]
fn identity_gaussian_intercepts_and_final_intercept() {
    let (x, y) = gaussian_problem(60, 25, 4);
    let fit = fit_gaussian(small_options(vec![5, 10]), &x, &y);
    assert!(fit.intercepts().iter().all(|&b0| b0 == 0.0));

    let coefs = fit.coefficients(None, None).unwrap();
    let y_mean = y.mean().unwrap();
    let x_mean = x.mean_axis(Axis(0)).unwrap();
    assert_abs_diff_eq!(coefs.intercept, y_mean - x_mean.dot(&coefs.beta), epsilon = 1e-10);
}

#[test]
fn extraction_reproduces_validation_nonzero_counts() {
    let (x, y) = gaussian_problem(60, 40, 5);
    let fit = fit_gaussian(small_options(vec![4, 12]), &x, &y);

    let best_row = fit.select_row(None, None).unwrap().clone();
    let best = fit.coefficients(None, None).unwrap();
    assert_eq!(best.nonzero(), best_row.nonzero);
    assert_eq!((best.nummod, best.threshold), (best_row.nummod, best_row.threshold));

    for row in fit.validation() {
        let coefs = fit.coefficients(Some(row.nummod), Some(row.threshold)).unwrap();
        assert_eq!(coefs.nonzero(), row.nonzero);
    }
}

#[test]
fn auto_grid_contains_zero_and_nonzero_counts_do_not_grow() {
    let (x, y) = gaussian_problem(80, 30, 6);
    let fit = fit_gaussian(small_options(vec![10]), &x, &y);
    assert_eq!(fit.thresholds()[0], 0.0);
    assert_eq!(fit.thresholds().len(), 5);
    let counts: Vec<usize> = fit.validation().iter().map(|r| r.nonzero).collect();
    assert!(counts.windows(2).all(|w| w[1] <= w[0]), "{:?}", counts);
}

#[test]
fn slice_lookup_and_missing_entries() {
    let (x, y) = gaussian_problem(50, 20, 7);
    let options = SparOptions {
        thresholds: ThresholdGrid::Explicit(vec![0.0, 0.05, 0.2]),
        ..small_options(vec![3, 6])
    };
    let fit = fit_gaussian(options, &x, &y);

    let within = fit.coefficients(Some(3), None).unwrap();
    assert_eq!(within.nummod, 3);
    let slice_best = fit
        .validation()
        .iter()
        .filter(|r| r.nummod == 3)
        .map(|r| r.loss.unwrap())
        .fold(f64::INFINITY, f64::min);
    let chosen = fit.select_row(Some(3), None).unwrap();
    assert_eq!(chosen.loss, Some(slice_best));

    let by_threshold = fit.coefficients(None, Some(0.05)).unwrap();
    assert_eq!(by_threshold.threshold, 0.05);

    assert!(matches!(
        fit.coefficients(Some(4), None),
        Err(SparError::ValidationEntryNotFound { .. })
    ));
    assert!(matches!(
        fit.coefficients(None, Some(0.07)),
        Err(SparError::ValidationEntryNotFound { .. })
    ));
    // Oversized ensemble sizes fall back to every fitted member.
    assert_eq!(fit.coefficients(Some(50), None).unwrap().nummod, 6);
}

#[test]
fn preconditions_are_rejected() {
    let (x, y) = gaussian_problem(30, 10, 8);
    let estimator = SparEstimator::new(small_options(vec![4]));
    let gaussian: Arc<dyn Family> = Arc::new(Gaussian);

    let short_y = y.slice(ndarray::s![..20]).to_owned();
    assert!(matches!(
        estimator.fit(x.view(), short_y.view(), gaussian.clone(), None),
        Err(SparError::ResponseLengthMismatch { found: 20, expected: 30 })
    ));

    let narrow = Array2::<f64>::zeros((5, 9));
    let y_val = Array1::<f64>::zeros(5);
    assert!(matches!(
        estimator.fit(x.view(), y.view(), gaussian.clone(), Some((narrow.view(), y_val.view()))),
        Err(SparError::ColumnCountMismatch { found: 9, expected: 10, .. })
    ));

    let bounds = SparOptions {
        config: SparConfig {
            mslow: Some(6),
            msup: Some(3),
            ..SparConfig::default()
        },
        ..small_options(vec![4])
    };
    assert!(matches!(
        SparEstimator::new(bounds).fit(x.view(), y.view(), gaussian.clone(), None),
        Err(SparError::InvalidDimensionBounds { mslow: 6, msup: 3, .. })
    ));

    let auc = SparOptions {
        measure: LossMeasure::OneMinusAuc,
        ..small_options(vec![4])
    };
    assert!(matches!(
        SparEstimator::new(auc).fit(x.view(), y.view(), gaussian.clone(), None),
        Err(SparError::IncompatibleMeasure { .. })
    ));

    assert!(matches!(
        estimator.fit(x.view(), y.view(), Arc::new(Binomial), None),
        Err(SparError::InvalidResponse { .. })
    ));

    let wrong_sets = SparOptions {
        index_sets: Some(vec![vec![0, 1]; 3]),
        ..small_options(vec![4])
    };
    assert!(matches!(
        SparEstimator::new(wrong_sets).fit(x.view(), y.view(), gaussian.clone(), None),
        Err(SparError::SuppliedLengthMismatch { found: 3, expected: 4, .. })
    ));

    let empty = SparOptions {
        nummods: vec![],
        ..SparOptions::default()
    };
    assert!(matches!(
        SparEstimator::new(empty).fit(x.view(), y.view(), gaussian.clone(), None),
        Err(SparError::InvalidConfig(_))
    ));

    let psi = SparOptions {
        config: SparConfig {
            sparse_psi: Some(0.5),
            ..SparConfig::default()
        },
        ..small_options(vec![4])
    };
    assert!(matches!(
        SparEstimator::new(psi).fit(x.view(), y.view(), gaussian.clone(), None),
        Err(SparError::InvalidConfig(_))
    ));

    let flat = Array2::<f64>::ones((30, 10));
    assert!(matches!(
        estimator.fit(flat.view(), y.view(), gaussian.clone(), None),
        Err(SparError::NoActiveVariables)
    ));

    let constant_y = Array1::<f64>::from_elem(30, 2.0);
    assert!(matches!(
        estimator.fit(x.view(), constant_y.view(), gaussian, None),
        Err(SparError::DegenerateScreening)
    ));
}

#[test]
fn fixed_seed_is_reproducible_and_parallelism_does_not_matter() {
    let (x, y) = gaussian_problem(50, 40, 9);
    let serial_options = SparOptions {
        config: SparConfig {
            parallel: false,
            ..SparConfig::default()
        },
        ..small_options(vec![7])
    };
    let a = fit_gaussian(small_options(vec![7]), &x, &y);
    let b = fit_gaussian(small_options(vec![7]), &x, &y);
    let serial = fit_gaussian(serial_options, &x, &y);
    assert_eq!(a.betas(), b.betas());
    assert_eq!(a.betas(), serial.betas());
    assert_eq!(a.index_sets(), serial.index_sets());
    assert_eq!(a.projections(), serial.projections());
    assert_eq!(a.validation(), serial.validation());

    let reseeded = SparOptions {
        config: SparConfig {
            random_seed: 7,
            ..SparConfig::default()
        },
        ..small_options(vec![7])
    };
    let c = fit_gaussian(reseeded, &x, &y);
    assert_ne!(a.betas(), c.betas());
}

#[test]
fn supplied_index_sets_and_projections_are_adopted() {
    let (x, y) = gaussian_problem(40, 12, 10);
    let sets = vec![vec![5, 0, 2], vec![1, 2, 3, 4]];
    let projections = vec![
        ProjectionMatrix::identity(3),
        ProjectionMatrix::from_dense(ndarray::array![[1.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 1.0]].view()),
    ];
    let options = SparOptions {
        index_sets: Some(sets),
        projections: Some(projections),
        projection: ProjectionType::CountSketch,
        ..small_options(vec![2])
    };
    let fit = fit_gaussian(options, &x, &y);
    assert_eq!(fit.index_sets(), &[vec![0, 2, 5], vec![1, 2, 3, 4]]);
    assert_eq!(fit.projections()[0], ProjectionMatrix::identity(3));
    assert_eq!(fit.projections()[1].nrows(), 2);
    for j in [1, 3, 4, 6, 7, 8, 9, 10, 11] {
        assert_eq!(fit.betas()[[j, 0]], 0.0);
    }

    let bad = SparOptions {
        index_sets: Some(vec![vec![0, 0, 1], vec![2]]),
        ..small_options(vec![2])
    };
    assert!(matches!(
        SparEstimator::new(bad).fit(x.view(), y.view(), Arc::new(Gaussian), None),
        Err(SparError::InvalidSuppliedDraw { member: 0, .. })
    ));
}

#[test]
fn refitting_with_stored_draws_reproduces_coefficients() {
    let (x, y) = gaussian_problem(30, 80, 16);
    for projection in [ProjectionType::DataDriven, ProjectionType::CountSketch] {
        let options = SparOptions {
            projection,
            ..small_options(vec![6])
        };
        let first = fit_gaussian(options.clone(), &x, &y);
        assert!(first.projections().iter().all(|phi| phi.nrows() < phi.ncols()));

        let refit_options = SparOptions {
            index_sets: Some(first.index_sets().to_vec()),
            projections: Some(first.projections().to_vec()),
            config: SparConfig {
                random_seed: 99,
                ..SparConfig::default()
            },
            ..options
        };
        let refit = fit_gaussian(refit_options, &x, &y);
        assert_eq!(refit.index_sets(), first.index_sets(), "{}", projection);
        assert_eq!(refit.projections(), first.projections(), "{}", projection);
        assert_eq!(refit.betas(), first.betas(), "{}", projection);
        assert_eq!(refit.validation(), first.validation(), "{}", projection);
    }
}

#[test]
fn malformed_supplied_projection_is_rejected() {
    let (x, y) = gaussian_problem(30, 12, 17);
    let broken: ProjectionMatrix = serde_json::from_str(
        r#"{"nrows":2,"ncols":3,"col_ptr":[0,1,2,3],"row_idx":[0,5,1],"values":[1.0,1.0,1.0]}"#,
    )
    .unwrap();
    let options = SparOptions {
        index_sets: Some(vec![vec![0, 1, 2]]),
        projections: Some(vec![broken]),
        ..small_options(vec![1])
    };
    assert!(matches!(
        SparEstimator::new(options).fit(x.view(), y.view(), Arc::new(Gaussian), None),
        Err(SparError::InvalidSuppliedDraw { what: "projection", member: 0, .. })
    ));
}

#[test]
fn every_projection_and_screening_combination_fits() {
    let (x, y) = gaussian_problem(40, 50, 11);
    for projection in [
        ProjectionType::DataDriven,
        ProjectionType::CountSketch,
        ProjectionType::Gaussian,
        ProjectionType::Sparse,
    ] {
        for screening in [
            ScreeningType::Ridge,
            ScreeningType::MarginalLikelihood,
            ScreeningType::Correlation,
        ] {
            let options = SparOptions {
                projection,
                screening,
                ..small_options(vec![4])
            };
            let fit = fit_gaussian(options, &x, &y);
            assert_eq!(fit.projection_type(), projection);
            assert_eq!(fit.screening_type(), screening);
            assert!(fit.validation().iter().all(|r| r.loss.map_or(false, f64::is_finite)));
        }
    }
}

#[test]
fn split_data_uses_the_resolved_configuration() {
    let (x, y) = gaussian_problem(64, 30, 12);
    let options = SparOptions {
        config: SparConfig {
            split_data: true,
            ..SparConfig::default()
        },
        ..small_options(vec![5])
    };
    let fit = fit_gaussian(options, &x, &y);
    assert!(fit.config().split_data);
    assert_eq!(fit.config().nscreen, Some(128));
    assert_eq!(fit.config().msup, Some(32));
    assert_eq!(fit.config().mslow, Some(4));
    assert!(!fit.used_validation_data());
}

#[test]
fn glm_families_fit_and_predict() {
    let (x, y) = binary_problem(120, 30, 13);
    let options = SparOptions {
        measure: LossMeasure::Misclassification,
        ..small_options(vec![6])
    };
    let fit = SparEstimator::new(options)
        .fit(x.view(), y.view(), Arc::new(Binomial), None)
        .unwrap();
    assert!(fit.intercepts().iter().all(|b0| b0.is_finite()));
    let probs = fit.predict(x.view(), PredictOptions::default(), None).unwrap();
    assert!(probs.iter().all(|&p| (0.0..=1.0).contains(&p)));
    let link = fit
        .predict(
            x.view(),
            PredictOptions {
                scale: PredictionScale::Link,
                ..PredictOptions::default()
            },
            None,
        )
        .unwrap();
    for (l, p) in link.iter().zip(probs.iter()) {
        assert_abs_diff_eq!(1.0 / (1.0 + (-l).exp()), *p, epsilon = 1e-9);
    }

    let (xc, signal) = gaussian_problem(100, 20, 14);
    let counts = signal.mapv(|s| (0.5 + 0.3 * s).exp().round());
    let fit = SparEstimator::new(small_options(vec![4]))
        .fit(xc.view(), counts.view(), Arc::new(Poisson), None)
        .unwrap();
    let means = fit.predict(xc.view(), PredictOptions::default(), None).unwrap();
    assert!(means.iter().all(|&m| m > 0.0 && m.is_finite()));
}

#[test]
fn response_averaging_matches_coefficient_averaging_for_identity_link() {
    let (x, y) = gaussian_problem(50, 30, 15);
    let options = SparOptions {
        thresholds: ThresholdGrid::Explicit(vec![0.0]),
        ..small_options(vec![5])
    };
    let fit = fit_gaussian(options, &x, &y);
    let by_coefficients = fit.predict(x.view(), PredictOptions::default(), None).unwrap();
    let by_response = fit
        .predict(
            x.view(),
            PredictOptions {
                averaging: Averaging::Response,
                ..PredictOptions::default()
            },
            None,
        )
        .unwrap();
    assert_abs_diff_eq!(by_coefficients, by_response, epsilon = 1e-9);

    let coefs = fit.coefficients(None, None).unwrap();
    let explicit = fit.predict(x.view(), PredictOptions::default(), Some(&coefs)).unwrap();
    assert_abs_diff_eq!(explicit, by_coefficients, epsilon = 1e-12);

    let wide = Array2::<f64>::zeros((3, 31));
    assert!(matches!(
        fit.predict(wide.view(), PredictOptions::default(), None),
        Err(SparError::ColumnCountMismatch { found: 31, expected: 30, .. })
    ));
}
