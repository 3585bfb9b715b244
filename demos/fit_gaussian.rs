// Fits a Gaussian SPAR ensemble on simulated data and prints the validation
// table. Run with `RUST_LOG=info cargo run --example fit_gaussian`.

use ndarray::{Array1, Array2};
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use spar::{Gaussian, PredictOptions, SparEstimator, SparOptions, ThresholdGrid};
use std::error::Error;
use std::sync::Arc;

fn simulate(n: usize, p: usize, rng: &mut ChaCha8Rng) -> (Array2<f64>, Array1<f64>) {
    let x = Array2::<f64>::random_using((n, p), StandardNormal, rng);
    let noise = Array1::<f64>::random_using(n, StandardNormal, rng);
    let y = x.column(0).mapv(|v| 3.0 * v) - x.column(7).mapv(|v| 2.0 * v) + x.column(42).mapv(|v| 1.5 * v) + noise;
    (x, y)
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut rng = ChaCha8Rng::seed_from_u64(2025);
    let (x, y) = simulate(200, 2000, &mut rng);
    let (x_val, y_val) = simulate(100, 2000, &mut rng);

    let options = SparOptions {
        nummods: vec![10, 20, 40],
        thresholds: ThresholdGrid::Auto { nnu: 10 },
        ..SparOptions::default()
    };
    let fit = SparEstimator::new(options).fit(
        x.view(),
        y.view(),
        Arc::new(Gaussian),
        Some((x_val.view(), y_val.view())),
    )?;

    println!("{:>8} {:>12} {:>8} {:>14}", "nummod", "threshold", "nonzero", "deviance");
    for row in fit.validation() {
        let loss = row.loss.map_or("NA".to_string(), |l| format!("{:.4}", l));
        println!("{:>8} {:>12.4e} {:>8} {:>14}", row.nummod, row.threshold, row.nonzero, loss);
    }

    let best = fit.coefficients(None, None)?;
    println!(
        "\nbest: nummod {}, threshold {:.4e}, {} nonzero, intercept {:.4}",
        best.nummod,
        best.threshold,
        best.nonzero(),
        best.intercept
    );
    for j in [0, 7, 42] {
        println!("beta[{}] = {:.4}", j, best.beta[j]);
    }

    let predictions = fit.predict(x_val.view(), PredictOptions::default(), Some(&best))?;
    let mse = (&predictions - &y_val).mapv(|r| r * r).mean().unwrap_or(f64::NAN);
    println!("held-out MSE: {:.4}", mse);
    Ok(())
}
