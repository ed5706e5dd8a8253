use crate::error::{AutoencoderError, Result};
use crate::models::base_model::Reconstructor;
use crate::utils::stats::ErrorStatistic;
use ndarray::{Array1, Array4, ArrayView, ArrayView4, Axis, RemoveAxis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Verdict for a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    Normal,
    Anomalous,
}

impl Label {
    /// Events at or above the threshold are anomalous.
    pub fn classify(error: f64, threshold: f64) -> Self {
        if error >= threshold {
            Label::Anomalous
        } else {
            Label::Normal
        }
    }

    pub fn is_anomalous(self) -> bool {
        self == Label::Anomalous
    }
}

/// Mean squared error of every event, computed over the flattened event.
///
/// Both arrays index events along axis 0 and must have identical shapes.
pub fn reconstruction_errors<D>(original: ArrayView<'_, f32, D>, reconstructed: ArrayView<'_, f32, D>) -> Result<Array1<f64>>
where
    D: RemoveAxis,
{
    if original.shape() != reconstructed.shape() {
        return Err(AutoencoderError::shape_mismatch(original.shape(), reconstructed.shape()));
    }
    if original.ndim() == 0 {
        return Err(AutoencoderError::shape_mismatch("(events, ..)", original.shape()));
    }

    let num_events = original.len_of(Axis(0));
    let errors: Vec<f64> = (0..num_events)
        .into_par_iter()
        .map(|i| {
            let input = original.index_axis(Axis(0), i);
            let output = reconstructed.index_axis(Axis(0), i);
            let len = input.len().max(1) as f64;
            let sum: f64 = input
                .iter()
                .zip(output.iter())
                .map(|(&a, &b)| {
                    let diff = f64::from(a) - f64::from(b);
                    diff * diff
                })
                .sum();
            sum / len
        })
        .collect();
    Ok(Array1::from_vec(errors))
}

/// Label every error against a threshold.
pub fn label_anomalies(errors: &[f64], threshold: f64) -> Vec<Label> {
    errors.iter().map(|&e| Label::classify(e, threshold)).collect()
}

/// Outcome of running a model over an evaluation set.
///
/// The threshold is derived from this set alone and is recomputed on every
/// run; it is never stored with the model.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub reconstructions: Array4<f32>,
    pub errors: Array1<f64>,
    pub statistic: ErrorStatistic,
    pub threshold: f64,
}

impl Evaluation {
    /// Reconstruct `events` with `model` and derive the anomaly threshold.
    pub fn run<R>(model: &R, events: ArrayView4<'_, f32>) -> Result<Self>
    where
        R: Reconstructor + ?Sized,
    {
        let reconstructions = model.reconstruct(events)?;
        Self::from_reconstructions(events, reconstructions)
    }

    pub fn from_reconstructions(events: ArrayView4<'_, f32>, reconstructions: Array4<f32>) -> Result<Self> {
        let errors = reconstruction_errors(events, reconstructions.view())?;
        // Sequential fold keeps the threshold reproducible.
        let statistic = errors.iter().fold(ErrorStatistic::new(), |mut stat, &e| {
            stat.update(e);
            stat
        });
        let threshold = statistic.threshold().ok_or(AutoencoderError::EmptyEvaluation)?;
        info!(threshold, events = errors.len(), "reconstruction error threshold");

        Ok(Evaluation {
            reconstructions,
            errors,
            statistic,
            threshold,
        })
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn label(&self, index: usize) -> Option<Label> {
        self.errors.get(index).map(|&e| Label::classify(e, self.threshold))
    }

    pub fn labels(&self) -> Vec<Label> {
        self.errors.iter().map(|&e| Label::classify(e, self.threshold)).collect()
    }

    pub fn anomalous_indices(&self) -> Vec<usize> {
        self.errors
            .iter()
            .enumerate()
            .filter(|(_, e)| **e >= self.threshold)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn anomaly_count(&self) -> usize {
        self.anomalous_indices().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array4;

    /// Reconstructs every event as all zeros.
    struct ZeroModel;

    impl Reconstructor for ZeroModel {
        fn reconstruct(&self, events: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
            Ok(Array4::zeros(events.raw_dim()))
        }
    }

    fn events_with_energy(levels: &[f32]) -> Array4<f32> {
        Array4::from_shape_fn((levels.len(), 2, 2, 1), |(n, _, _, _)| levels[n])
    }

    #[test]
    fn mse_is_taken_over_the_flattened_event() {
        let original = Array4::from_shape_vec((1, 1, 2, 2), vec![1.0f32, 0.0, 0.0, 1.0]).unwrap();
        let reconstructed = Array4::from_shape_vec((1, 1, 2, 2), vec![0.0f32, 0.0, 0.0, 0.0]).unwrap();
        let errors = reconstruction_errors(original.view(), reconstructed.view()).unwrap();
        assert_relative_eq!(errors[0], 0.5);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let a = Array4::<f32>::zeros((2, 2, 2, 1));
        let b = Array4::<f32>::zeros((2, 2, 2, 2));
        assert!(matches!(
            reconstruction_errors(a.view(), b.view()),
            Err(AutoencoderError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn threshold_from_zero_model() {
        // Squared energies give errors [0, 0, 0, 10].
        let events = events_with_energy(&[0.0, 0.0, 0.0, 10f32.sqrt()]);
        let evaluation = Evaluation::run(&ZeroModel, events.view()).unwrap();
        assert_relative_eq!(evaluation.errors[3], 10.0, epsilon = 1e-5);
        assert_relative_eq!(evaluation.threshold, 6.830127, epsilon = 1e-5);
        assert_eq!(evaluation.anomalous_indices(), vec![3]);
        assert_eq!(evaluation.label(0), Some(Label::Normal));
        assert_eq!(evaluation.label(4), None);
    }

    #[test]
    fn boundary_error_is_anomalous() {
        assert_eq!(Label::classify(1.0, 1.0), Label::Anomalous);
        assert_eq!(Label::classify(0.999, 1.0), Label::Normal);
        let labels = label_anomalies(&[0.5, 1.0, 2.0], 1.0);
        assert_eq!(labels, vec![Label::Normal, Label::Anomalous, Label::Anomalous]);
    }

    #[test]
    fn identical_errors_are_all_anomalous() {
        // Zero spread puts every event exactly on the threshold.
        let events = events_with_energy(&[1.0, 1.0, 1.0]);
        let evaluation = Evaluation::run(&ZeroModel, events.view()).unwrap();
        assert_eq!(evaluation.anomaly_count(), 3);
    }

    #[test]
    fn empty_set_has_no_threshold() {
        let events = Array4::<f32>::zeros((0, 2, 2, 1));
        assert!(matches!(
            Evaluation::run(&ZeroModel, events.view()),
            Err(AutoencoderError::EmptyEvaluation)
        ));
    }
}
