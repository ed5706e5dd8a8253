//! Typed pipeline configuration.
//!
//! Every field defaults to the constants the AFP hit pipeline was tuned with,
//! so an empty TOML file (or none at all) reproduces the reference run.

use crate::error::{AutoencoderError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Both spatial axes are pooled twice by a factor of four.
pub const SPATIAL_MULTIPLE: usize = 16;

/// Shape of a single event: `x × y × channels`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputShape {
    pub x: usize,
    pub y: usize,
    pub channels: usize,
}

impl InputShape {
    pub fn new(x: usize, y: usize, channels: usize) -> Self {
        InputShape { x, y, channels }
    }

    pub fn as_array(&self) -> [usize; 3] {
        [self.x, self.y, self.channels]
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(AutoencoderError::invalid_config("channel count must be positive"));
        }
        for (axis, len) in [("x", self.x), ("y", self.y)] {
            if len == 0 || len % SPATIAL_MULTIPLE != 0 {
                return Err(AutoencoderError::invalid_config(format!(
                    "shape axis {axis}={len} must be a positive multiple of {SPATIAL_MULTIPLE}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for InputShape {
    fn default() -> Self {
        InputShape::new(336, 80, 4)
    }
}

/// Optimisation schedule for a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParameters {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Seeds weight initialisation and batch shuffling; drawn from entropy when absent.
    pub seed: Option<u64>,
}

impl Default for TrainingParameters {
    fn default() -> Self {
        TrainingParameters {
            epochs: 2,
            batch_size: 2,
            learning_rate: 1e-3,
            seed: None,
        }
    }
}

/// Full configuration of a train/evaluate run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub input_path: PathBuf,
    pub validate_fraction: f64,
    /// Persist trained runs here; `None` keeps everything in memory.
    pub output_dir: Option<PathBuf>,
    pub shape: InputShape,
    pub training: TrainingParameters,
    /// Event rendered in display mode.
    pub shown_event: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            input_path: PathBuf::from("drive/MyDrive/AFP-ML/output-data/hits.npy"),
            validate_fraction: 0.1,
            output_dir: Some(PathBuf::from("drive/MyDrive/AFP-ML/trained-models")),
            shape: InputShape::default(),
            training: TrainingParameters::default(),
            shown_event: 0,
        }
    }
}

impl PipelineConfig {
    /// Load a TOML configuration file; missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        let config: PipelineConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.validate_fraction) {
            return Err(AutoencoderError::invalid_config(format!(
                "validate_fraction must be in [0, 1), got {}",
                self.validate_fraction
            )));
        }
        if self.training.epochs == 0 {
            return Err(AutoencoderError::invalid_config("epochs must be positive"));
        }
        if self.training.batch_size == 0 {
            return Err(AutoencoderError::invalid_config("batch_size must be positive"));
        }
        if self.training.learning_rate <= 0.0 {
            return Err(AutoencoderError::invalid_config("learning_rate must be positive"));
        }
        self.shape.validate()
    }
}

/// Where diagnostic plots end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlotTarget {
    /// Render a single requested event into a scratch preview directory.
    Display,
    /// Render the full set of diagnostics into the given directory.
    Save(PathBuf),
}

impl PlotTarget {
    pub fn is_save(&self) -> bool {
        matches!(self, PlotTarget::Save(_))
    }

    /// Directory the plots are written to, created on demand.
    pub fn directory(&self) -> Result<PathBuf> {
        let dir = match self {
            PlotTarget::Display => std::env::temp_dir().join("hit-autoencoder-preview"),
            PlotTarget::Save(path) => path.clone(),
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}
