//! Timestamped run directories: model weights, architecture, history and a
//! human-readable training report.

use crate::config::{InputShape, TrainingParameters};
use crate::error::{AutoencoderError, Result};
use crate::models::autoencoder::{AutoencoderConfig, AutoencoderModel, InferenceBackend};
use crate::models::trainer::TrainingHistory;
use burn::backend::ndarray::NdArrayDevice;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const MODEL_FILE: &str = "model";
const CONFIG_FILE: &str = "model.json";
const HISTORY_FILE: &str = "history.json";
const REPORT_FILE: &str = "training-parameters.txt";
/// Weights are stored at full precision so a reloaded run reproduces its
/// trained evaluation exactly.
type WeightRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;
/// Subdirectory of a run holding the saved diagnostic plots.
pub const GRAPH_DIR: &str = "trained-model-graphs";

/// Everything the training report mentions besides the history.
#[derive(Debug, Clone)]
pub struct TrainingReport<'a> {
    pub params: &'a TrainingParameters,
    pub input_path: &'a Path,
    pub num_events: usize,
    pub validate_fraction: f64,
    pub history: &'a TrainingHistory,
    pub summary: String,
}

impl TrainingReport<'_> {
    pub fn render(&self) -> String {
        let last = |series: &[f64]| series.last().map_or_else(|| "n/a".to_string(), f64::to_string);
        let mut out = String::new();
        out.push_str(&format!("- epochs: {}\n", self.params.epochs));
        out.push_str(&format!("- batch size: {}\n \n", self.params.batch_size));
        out.push_str(&format!("- input: {}\n", self.input_path.display()));
        out.push_str(&format!("- number of events: {}\n", self.num_events));
        out.push_str(&format!("- validate fraction: {}\n \n", self.validate_fraction));
        out.push_str(&format!("- training accuracy (last epoch): {}\n", last(&self.history.accuracy)));
        out.push_str(&format!("- validation accuracy (last epoch): {}\n \n", last(&self.history.val_accuracy)));
        out.push_str(&format!("- training loss (last epoch): {}\n", last(&self.history.loss)));
        out.push_str(&format!("- validation loss (last epoch): {}\n \n \n", last(&self.history.val_loss)));
        out.push_str(&self.summary);
        out
    }
}

/// A persisted training run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    pub path: PathBuf,
}

impl RunDirectory {
    /// Create `autoencoder_<dd-mm-YYYY_HH-MM-SS>` under `output_dir`.
    ///
    /// The parent is created if needed; an existing run directory is an error.
    pub fn create(output_dir: &Path) -> Result<Self> {
        fs::create_dir_all(output_dir)?;
        let stamp = chrono::Local::now().format("autoencoder_%d-%m-%Y_%H-%M-%S");
        let path = output_dir.join(stamp.to_string());
        fs::create_dir(&path)?;
        info!(path = %path.display(), "created run directory");
        Ok(RunDirectory { path })
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.join(CONFIG_FILE).is_file() {
            return Err(AutoencoderError::Record(format!(
                "{} is not a saved autoencoder run",
                path.display()
            )));
        }
        Ok(RunDirectory { path })
    }

    pub fn graph_dir(&self) -> PathBuf {
        self.path.join(GRAPH_DIR)
    }

    pub fn save_model(&self, model: &AutoencoderModel) -> Result<()> {
        model
            .config
            .save(self.path.join(CONFIG_FILE))
            .map_err(|err| AutoencoderError::Record(err.to_string()))?;
        model
            .model
            .clone()
            .save_file(self.path.join(MODEL_FILE), &WeightRecorder::new())
            .map_err(|err| AutoencoderError::Record(format!("{err:?}")))?;
        debug!(path = %self.path.display(), "saved model");
        Ok(())
    }

    pub fn load_model(&self) -> Result<AutoencoderModel> {
        let config = AutoencoderConfig::load(self.path.join(CONFIG_FILE))
            .map_err(|err| AutoencoderError::Record(format!("{err:?}")))?;
        let device = NdArrayDevice::default();
        let model = config
            .init::<InferenceBackend>(&device)
            .load_file(self.path.join(MODEL_FILE), &WeightRecorder::new(), &device)
            .map_err(|err| AutoencoderError::Record(format!("{err:?}")))?;
        Ok(AutoencoderModel::new(model, config))
    }

    pub fn save_history(&self, history: &TrainingHistory) -> Result<()> {
        let json = serde_json::to_string_pretty(history)?;
        fs::write(self.path.join(HISTORY_FILE), json)?;
        Ok(())
    }

    pub fn load_history(&self) -> Result<TrainingHistory> {
        let raw = fs::read_to_string(self.path.join(HISTORY_FILE))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save_report(&self, report: &TrainingReport<'_>) -> Result<()> {
        fs::write(self.path.join(REPORT_FILE), report.render())?;
        Ok(())
    }

    /// Restore the model and its training history.
    pub fn load(&self) -> Result<(AutoencoderModel, TrainingHistory)> {
        Ok((self.load_model()?, self.load_history()?))
    }
}

/// Restore the model and history saved in `dir`.
pub fn load_run(dir: impl Into<PathBuf>) -> Result<(AutoencoderModel, TrainingHistory)> {
    RunDirectory::open(dir)?.load()
}

/// Architecture summary for a model at the given input shape.
pub fn model_summary(model: &AutoencoderModel, shape: &InputShape) -> String {
    model.network().summary(shape)
}
