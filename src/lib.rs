// Sparse projected averaged regression (SPAR)

#![doc = include_str!("../README.md")]

pub mod ensemble;
pub mod error;
pub mod family;
pub mod glm;
pub mod linalg_backends;
mod marginal;
pub mod predict;
pub mod projection;
pub mod screening;
pub mod standardize;
pub mod validation;

#[cfg(test)]
mod ensemble_tests;

pub use ensemble::{SparConfig, SparEstimator, SparFit, SparOptions, ThresholdGrid};
pub use error::SparError;
pub use family::{Binomial, CustomFamily, Family, Gaussian, Poisson};
pub use glm::IrlsConfig;
pub use predict::{Averaging, PredictOptions, PredictionScale, SparCoefficients};
pub use projection::{ProjectionMatrix, ProjectionType};
pub use screening::ScreeningType;
pub use standardize::Standardization;
pub use validation::{LossMeasure, ValidationRow};
