//! Convolutional autoencoder anomaly detection for detector hit maps.
//!
//! Events are split into training and validation sets, an autoencoder is
//! trained to reconstruct them, and validation events whose reconstruction
//! error reaches `mean + std` of all errors are flagged as anomalous.

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod utils;

#[cfg(feature = "python")]
mod python;

pub use config::{InputShape, PipelineConfig, PlotTarget, TrainingParameters};
pub use error::{AutoencoderError, Result};
pub use models::autoencoder::{AutoencoderConfig, AutoencoderModel};
pub use models::base_model::Reconstructor;
pub use models::checkpoint::RunDirectory;
pub use models::trainer::{Trainer, TrainingBackend, TrainingHistory};
pub use pipeline::{evaluate_run, train_pipeline, PipelineOutcome};
pub use utils::evaluation::{Evaluation, Label};
pub use utils::stats::{anomaly_threshold, ErrorStatistic};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// A Python module implemented in Rust.
#[cfg(feature = "python")]
#[pymodule]
fn hit_autoencoder(_py: Python, m: &PyModule) -> PyResult<()> {
    python::register(m)
}
