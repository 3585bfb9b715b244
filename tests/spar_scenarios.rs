// In tests/spar_scenarios.rs

use ndarray::{Array1, Array2};
use ndarray_rand::RandomExt;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use spar::{
    Binomial, Gaussian, LossMeasure, ProjectionType, ScreeningType, SparConfig, SparError, SparEstimator,
    SparOptions, ThresholdGrid, ValidationRow,
};
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Three strong predictors among `p`, unit-variance noise.
fn sparse_linear_model(n: usize, p: usize, rng: &mut ChaCha8Rng) -> (Array2<f64>, Array1<f64>) {
    let x = Array2::<f64>::random_using((n, p), StandardNormal, rng);
    let noise = Array1::<f64>::random_using(n, StandardNormal, rng);
    let y = x.column(0).mapv(|v| 3.0 * v) + x.column(1).mapv(|v| -2.0 * v) + x.column(2).mapv(|v| 2.5 * v) + noise;
    (x, y)
}

fn best_loss(rows: &[ValidationRow], nummod: usize) -> f64 {
    rows.iter()
        .filter(|r| r.nummod == nummod)
        .filter_map(|r| r.loss)
        .fold(f64::INFINITY, f64::min)
}

#[test]
fn strong_sparse_signal_gaussian_scenario() {
    init_logging();
    let mut rng = ChaCha8Rng::seed_from_u64(100);
    let (x, y) = sparse_linear_model(100, 50, &mut rng);
    let (x_val, y_val) = sparse_linear_model(100, 50, &mut rng);

    let options = SparOptions {
        nummods: vec![10, 20],
        thresholds: ThresholdGrid::Auto { nnu: 5 },
        projection: ProjectionType::DataDriven,
        screening: ScreeningType::Ridge,
        config: SparConfig {
            split_data: false,
            ..SparConfig::default()
        },
        ..SparOptions::default()
    };
    let fit = SparEstimator::new(options)
        .fit(x.view(), y.view(), Arc::new(Gaussian), Some((x_val.view(), y_val.view())))
        .expect("fit should succeed");

    assert!(fit.used_validation_data());
    assert_eq!(fit.validation().len(), 10);
    assert_eq!(fit.thresholds()[0], 0.0);

    let small = best_loss(fit.validation(), 10);
    let large = best_loss(fit.validation(), 20);
    assert!(small.is_finite() && large.is_finite());
    assert!(large <= 1.5 * small, "nummod 20 loss {} vs nummod 10 loss {}", large, small);

    let counts: Vec<usize> = fit
        .validation()
        .iter()
        .filter(|r| r.nummod == 10)
        .map(|r| r.nonzero)
        .collect();
    assert_eq!(counts.len(), 5);
    assert!(counts.windows(2).all(|w| w[1] <= w[0]), "{:?}", counts);

    let best = fit.coefficients(None, None).unwrap();
    let strongest: Vec<usize> = {
        let mut order: Vec<usize> = (0..50).collect();
        order.sort_by(|&a, &b| best.beta[b].abs().partial_cmp(&best.beta[a].abs()).unwrap());
        let mut top = order[..3].to_vec();
        top.sort_unstable();
        top
    };
    assert_eq!(strongest, vec![0, 1, 2]);
}

#[test]
fn all_constant_predictors_are_rejected() {
    init_logging();
    let x = Array2::<f64>::from_elem((40, 12), 1.5);
    let y = Array1::from_iter((0..40).map(|i| i as f64));
    let result = SparEstimator::new(SparOptions::default()).fit(x.view(), y.view(), Arc::new(Gaussian), None);
    assert!(matches!(result, Err(SparError::NoActiveVariables)));
}

#[test]
fn constant_validation_labels_give_missing_auc() {
    init_logging();
    let mut rng = ChaCha8Rng::seed_from_u64(200);
    let x = Array2::<f64>::random_using((80, 20), StandardNormal, &mut rng);
    let y = x.column(0).mapv(|v| {
        let prob = 1.0 / (1.0 + (-2.0 * v).exp());
        if rng.gen::<f64>() < prob { 1.0 } else { 0.0 }
    });
    let x_val = Array2::<f64>::random_using((30, 20), StandardNormal, &mut rng);
    let y_val = Array1::<f64>::ones(30);

    let options = SparOptions {
        nummods: vec![3, 6],
        thresholds: ThresholdGrid::Auto { nnu: 4 },
        measure: LossMeasure::OneMinusAuc,
        ..SparOptions::default()
    };
    let fit = SparEstimator::new(options)
        .fit(x.view(), y.view(), Arc::new(Binomial), Some((x_val.view(), y_val.view())))
        .expect("fit should succeed");

    assert_eq!(fit.validation().len(), 8);
    assert!(fit.validation().iter().all(|r| r.loss.is_none()));

    // Extraction still works and falls back to the first row.
    let coefs = fit.coefficients(None, None).unwrap();
    assert_eq!(coefs.nummod, 3);
    assert_eq!(coefs.threshold, 0.0);
}

#[test]
fn validation_table_and_config_serialize() {
    init_logging();
    let mut rng = ChaCha8Rng::seed_from_u64(300);
    let (x, y) = sparse_linear_model(60, 25, &mut rng);
    let options = SparOptions {
        nummods: vec![4],
        thresholds: ThresholdGrid::Explicit(vec![0.0, 0.1]),
        ..SparOptions::default()
    };
    let fit = SparEstimator::new(options)
        .fit(x.view(), y.view(), Arc::new(Gaussian), None)
        .unwrap();

    let json = serde_json::to_string(fit.validation()).unwrap();
    let rows: Vec<ValidationRow> = serde_json::from_str(&json).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].threshold, 0.1);
    assert_eq!(rows[1].threshold_index, 1);

    let config_json = serde_json::to_string(fit.config()).unwrap();
    let config: SparConfig = serde_json::from_str(&config_json).unwrap();
    assert_eq!(&config, fit.config());
    assert_eq!(config.nscreen, Some(120));
}
