//! End-to-end runs: prepare, train, persist, evaluate and visualize.

use crate::config::{PipelineConfig, PlotTarget};
use crate::error::{AutoencoderError, Result};
use crate::models::autoencoder::{AutoencoderConfig, AutoencoderModel};
use crate::models::checkpoint::{model_summary, RunDirectory, TrainingReport};
use crate::models::trainer::{Trainer, TrainingBackend, TrainingHistory};
use crate::utils::data::{events_to_f32, prepare_data};
use crate::utils::evaluation::Evaluation;
use crate::utils::plot::{plot_error_histograms, plot_loss_accuracy, plot_reconstruction};
use burn::backend::ndarray::NdArrayDevice;
use ndarray::{Array4, ArrayView4, Axis};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Events rendered when saving diagnostics.
pub const SAVED_EVENTS: usize = 10;

/// Everything a finished run produced.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub model: AutoencoderModel,
    pub history: TrainingHistory,
    /// The validation events the evaluation ran on.
    pub events: Array4<f32>,
    pub evaluation: Evaluation,
    /// Set when the run was persisted.
    pub run: Option<RunDirectory>,
    /// Every plot written, in order.
    pub plots: Vec<PathBuf>,
}

/// Train a fresh autoencoder and evaluate it on the validation split.
///
/// With `output_dir` configured the run is persisted and the full set of
/// diagnostics is saved under its graph directory. The configured event is
/// always rendered in display mode afterwards.
pub fn train_pipeline(config: &PipelineConfig) -> Result<PipelineOutcome> {
    config.validate()?;
    let (train, validate) = prepare_data(&config.input_path, config.validate_fraction, &config.shape)?;
    let num_events = train.len_of(Axis(0)) + validate.len_of(Axis(0));
    let train = events_to_f32(train.view());
    let validate = events_to_f32(validate.view());

    let model_config = AutoencoderConfig::new(config.shape.channels);
    let trainer = Trainer::<TrainingBackend>::new(model_config.clone(), config.training.clone(), NdArrayDevice::default());
    let (network, history) = trainer.fit(train.view(), validate.view())?;
    let model = AutoencoderModel::new(network, model_config);

    let evaluation = Evaluation::run(&model, validate.view())?;
    let mut plots = Vec::new();

    let run = match &config.output_dir {
        Some(output_dir) => {
            let run = RunDirectory::create(output_dir)?;
            run.save_model(&model)?;
            run.save_history(&history)?;
            run.save_report(&TrainingReport {
                params: &config.training,
                input_path: &config.input_path,
                num_events,
                validate_fraction: config.validate_fraction,
                history: &history,
                summary: model_summary(&model, &config.shape),
            })?;
            let target = PlotTarget::Save(run.graph_dir());
            plots.extend(visualize(&evaluation, validate.view(), &history, config.shown_event, &target)?);
            info!(path = %run.path.display(), "saved run");
            Some(run)
        }
        None => None,
    };

    plots.extend(visualize(
        &evaluation,
        validate.view(),
        &history,
        config.shown_event,
        &PlotTarget::Display,
    )?);

    Ok(PipelineOutcome {
        model,
        history,
        events: validate,
        evaluation,
        run,
        plots,
    })
}

/// Re-evaluate a persisted run on freshly prepared validation data.
///
/// `event` overrides the configured shown event; `save` writes the full
/// diagnostics into the run's graph directory instead of previewing.
pub fn evaluate_run(run_dir: &Path, config: &PipelineConfig, event: Option<usize>, save: bool) -> Result<PipelineOutcome> {
    config.validate()?;
    let run = RunDirectory::open(run_dir)?;
    let (model, history) = run.load()?;
    if model.config().channels != config.shape.channels {
        return Err(AutoencoderError::shape_mismatch(
            model.config().channels,
            config.shape.channels,
        ));
    }
    info!(path = %run.path.display(), epochs = history.epochs(), "loaded run");

    let (_, validate) = prepare_data(&config.input_path, config.validate_fraction, &config.shape)?;
    let validate = events_to_f32(validate.view());
    let evaluation = Evaluation::run(&model, validate.view())?;

    let target = if save {
        PlotTarget::Save(run.graph_dir())
    } else {
        PlotTarget::Display
    };
    let plots = visualize(
        &evaluation,
        validate.view(),
        &history,
        event.unwrap_or(config.shown_event),
        &target,
    )?;

    Ok(PipelineOutcome {
        model,
        history,
        events: validate,
        evaluation,
        run: Some(run),
        plots,
    })
}

/// Render training curves, error histograms and reconstructions for `target`.
///
/// Display mode renders `shown_event` (clamped to the last event); save mode
/// renders the first [`SAVED_EVENTS`] events.
pub fn visualize(
    evaluation: &Evaluation,
    events: ArrayView4<'_, f32>,
    history: &TrainingHistory,
    shown_event: usize,
    target: &PlotTarget,
) -> Result<Vec<PathBuf>> {
    if evaluation.is_empty() {
        return Err(AutoencoderError::EmptyEvaluation);
    }
    if events.len_of(Axis(0)) != evaluation.len() {
        return Err(AutoencoderError::shape_mismatch(evaluation.len(), events.len_of(Axis(0))));
    }
    let dir = target.directory()?;

    let mut written = plot_loss_accuracy(history, &dir)?;
    written.extend(plot_error_histograms(&evaluation.errors.to_vec(), evaluation.threshold, &dir)?);

    for index in shown_events(evaluation.len(), shown_event, target) {
        written.push(plot_reconstruction(
            index,
            events.index_axis(Axis(0), index),
            evaluation.reconstructions.index_axis(Axis(0), index),
            evaluation.errors[index],
            evaluation.threshold,
            &dir,
        )?);
    }

    info!(
        dir = %dir.display(),
        save = target.is_save(),
        plots = written.len(),
        anomalies = evaluation.anomaly_count(),
        events = evaluation.len(),
        "wrote diagnostics"
    );
    Ok(written)
}

fn shown_events(len: usize, shown_event: usize, target: &PlotTarget) -> Vec<usize> {
    match target {
        PlotTarget::Save(_) => (0..len.min(SAVED_EVENTS)).collect(),
        PlotTarget::Display if shown_event < len => vec![shown_event],
        PlotTarget::Display => {
            warn!(requested = shown_event, available = len, "shown event out of range, using last");
            vec![len - 1]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InputShape, TrainingParameters};
    use ndarray_npy::write_npy;

    fn write_events(dir: &Path, count: usize) -> PathBuf {
        let events = Array4::<f32>::from_shape_fn((count, 16, 16, 1), |(n, x, y, _)| {
            if (x * 3 + y + n) % 5 == 0 {
                1.0
            } else {
                0.0
            }
        });
        let path = dir.join("hits.npy");
        write_npy(&path, &events).unwrap();
        path
    }

    fn config(dir: &Path, count: usize) -> PipelineConfig {
        PipelineConfig {
            input_path: write_events(dir, count),
            validate_fraction: 0.5,
            output_dir: Some(dir.join("runs")),
            shape: InputShape::new(16, 16, 1),
            training: TrainingParameters {
                epochs: 1,
                batch_size: 4,
                learning_rate: 1e-3,
                seed: Some(3),
            },
            shown_event: 0,
        }
    }

    #[test]
    fn shown_events_follow_target() {
        let save = PlotTarget::Save(PathBuf::from("graphs"));
        assert_eq!(shown_events(25, 3, &save), (0..10).collect::<Vec<_>>());
        assert_eq!(shown_events(4, 3, &save), vec![0, 1, 2, 3]);
        assert_eq!(shown_events(4, 2, &PlotTarget::Display), vec![2]);
        assert_eq!(shown_events(4, 9, &PlotTarget::Display), vec![3]);
    }

    #[test]
    fn training_persists_a_complete_run() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path(), 24);

        let outcome = train_pipeline(&config).unwrap();
        assert_eq!(outcome.events.len_of(Axis(0)), 12);
        assert_eq!(outcome.evaluation.len(), 12);
        assert_eq!(outcome.history.epochs(), 1);

        let run = outcome.run.unwrap();
        for file in ["model.mpk", "model.json", "history.json", "training-parameters.txt"] {
            assert!(run.path.join(file).is_file(), "missing {file}");
        }
        let graphs = run.graph_dir();
        assert!(graphs.join("cost function.svg").is_file());
        assert!(graphs.join("reconstructed_event_number_10.svg").is_file());
        assert!(!graphs.join("reconstructed_event_number_11.svg").exists());

        let report = std::fs::read_to_string(run.path.join("training-parameters.txt")).unwrap();
        assert!(report.contains("- number of events: 24\n"));
        assert!(report.contains("Model: \"autoencoder\""));
        assert!(report.contains("Total params: "));
    }

    #[test]
    fn persisted_run_reproduces_its_threshold() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path(), 8);
        let trained = train_pipeline(&config).unwrap();
        let run = trained.run.unwrap();

        let first = evaluate_run(&run.path, &config, Some(1), true).unwrap();
        let second = evaluate_run(&run.path, &config, None, false).unwrap();
        assert_eq!(first.evaluation.threshold, second.evaluation.threshold);
        assert_eq!(first.evaluation.threshold, trained.evaluation.threshold);
        assert_eq!(first.evaluation.errors, trained.evaluation.errors);
        assert_eq!(first.history, trained.history);
        assert!(run.graph_dir().join("reconstructed_event_number_4.svg").is_file());
    }

    #[test]
    fn evaluation_rejects_channel_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path(), 8);
        let run = train_pipeline(&config).unwrap().run.unwrap();

        let mismatched = PipelineConfig {
            shape: InputShape::new(16, 16, 2),
            ..config
        };
        assert!(matches!(
            evaluate_run(&run.path, &mismatched, None, false),
            Err(AutoencoderError::ShapeMismatch { .. })
        ));
    }
}
