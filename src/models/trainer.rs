use crate::config::TrainingParameters;
use crate::error::{AutoencoderError, Result};
use crate::models::autoencoder::{
    binary_accuracy, binary_cross_entropy, events_to_tensor, Autoencoder, AutoencoderConfig, InferenceBackend,
};
use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use ndarray::{ArrayView4, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Backend used while fitting: the inference backend with gradients.
pub type TrainingBackend = Autodiff<InferenceBackend>;

/// Metrics of one completed epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
}

/// Per-epoch metric sequences, one entry per completed epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub loss: Vec<f64>,
    pub accuracy: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub val_accuracy: Vec<f64>,
}

impl TrainingHistory {
    pub fn record(&mut self, metrics: EpochMetrics) {
        self.loss.push(metrics.loss);
        self.accuracy.push(metrics.accuracy);
        self.val_loss.push(metrics.val_loss);
        self.val_accuracy.push(metrics.val_accuracy);
    }

    pub fn epochs(&self) -> usize {
        self.loss.len()
    }

    pub fn last(&self) -> Option<EpochMetrics> {
        Some(EpochMetrics {
            loss: *self.loss.last()?,
            accuracy: *self.accuracy.last()?,
            val_loss: *self.val_loss.last()?,
            val_accuracy: *self.val_accuracy.last()?,
        })
    }
}

/// Fits an autoencoder to reconstruct its own input.
pub struct Trainer<B: AutodiffBackend> {
    config: AutoencoderConfig,
    params: TrainingParameters,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(config: AutoencoderConfig, params: TrainingParameters, device: B::Device) -> Self {
        Trainer { config, params, device }
    }

    /// Build a fresh model and train it on `train`, validating on `validate`
    /// after every epoch. Returns the inference copy of the model.
    pub fn fit(
        &self,
        train: ArrayView4<'_, f32>,
        validate: ArrayView4<'_, f32>,
    ) -> Result<(Autoencoder<B::InnerBackend>, TrainingHistory)> {
        if train.len_of(Axis(0)) == 0 {
            return Err(AutoencoderError::invalid_config("training split is empty"));
        }
        if validate.len_of(Axis(0)) == 0 {
            return Err(AutoencoderError::invalid_config("validation split is empty"));
        }
        if let Some(seed) = self.params.seed {
            B::seed(seed);
        }
        let mut rng = match self.params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut model: Autoencoder<B> = self.config.init(&self.device);
        let mut optim = AdamConfig::new().with_epsilon(1e-7).init::<B, Autoencoder<B>>();
        let mut history = TrainingHistory::default();

        let num_train = train.len_of(Axis(0));
        let mut indices: Vec<usize> = (0..num_train).collect();
        info!(
            epochs = self.params.epochs,
            batch_size = self.params.batch_size,
            train = num_train,
            validate = validate.len_of(Axis(0)),
            "training autoencoder"
        );

        for epoch in 1..=self.params.epochs {
            indices.shuffle(&mut rng);
            let mut loss_sum = 0.0;
            let mut accuracy_sum = 0.0;

            for (step, batch_indices) in indices.chunks(self.params.batch_size).enumerate() {
                let batch = train.select(Axis(0), batch_indices);
                let input = events_to_tensor::<B>(batch.view(), &self.device);

                let output = model.forward(input.clone());
                let loss = binary_cross_entropy(output.clone(), input.clone())
                    + model.weight_penalty().mul_scalar(self.config.l2);
                let accuracy = binary_accuracy(output, input);

                let batch_loss: f64 = loss.clone().into_scalar().elem();
                let batch_accuracy: f64 = accuracy.into_scalar().elem();
                let weight = batch_indices.len() as f64;
                loss_sum += batch_loss * weight;
                accuracy_sum += batch_accuracy * weight;
                debug!(epoch, step, loss = batch_loss, accuracy = batch_accuracy, "batch");

                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                model = optim.step(self.params.learning_rate, model, grads);
            }

            let (val_loss, val_accuracy) = evaluate_batches(
                &model.valid(),
                self.config.l2,
                validate,
                self.params.batch_size,
                &self.device,
            );
            let metrics = EpochMetrics {
                loss: loss_sum / num_train as f64,
                accuracy: accuracy_sum / num_train as f64,
                val_loss,
                val_accuracy,
            };
            info!(
                epoch,
                loss = metrics.loss,
                accuracy = metrics.accuracy,
                val_loss,
                val_accuracy,
                "epoch complete"
            );
            history.record(metrics);
        }

        Ok((model.valid(), history))
    }
}

/// Sample-weighted loss and accuracy of `model` over `events`, without gradients.
pub fn evaluate_batches<B: Backend>(
    model: &Autoencoder<B>,
    l2: f64,
    events: ArrayView4<'_, f32>,
    batch_size: usize,
    device: &B::Device,
) -> (f64, f64) {
    let num_events = events.len_of(Axis(0));
    if num_events == 0 {
        return (f64::NAN, f64::NAN);
    }
    let penalty: f64 = model.weight_penalty().mul_scalar(l2).into_scalar().elem();

    let mut loss_sum = 0.0;
    let mut accuracy_sum = 0.0;
    for start in (0..num_events).step_by(batch_size.max(1)) {
        let end = (start + batch_size.max(1)).min(num_events);
        let batch = events.slice_axis(Axis(0), ndarray::Slice::from(start..end));
        let input = events_to_tensor::<B>(batch, device);
        let output = model.forward(input.clone());

        let loss: f64 = binary_cross_entropy(output.clone(), input.clone()).into_scalar().elem();
        let accuracy: f64 = binary_accuracy(output, input).into_scalar().elem();
        let weight = (end - start) as f64;
        loss_sum += (loss + penalty) * weight;
        accuracy_sum += accuracy * weight;
    }
    (loss_sum / num_events as f64, accuracy_sum / num_events as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArrayDevice;
    use ndarray::Array4;

    fn sparse_events(count: usize) -> Array4<f32> {
        Array4::from_shape_fn((count, 16, 16, 1), |(n, x, y, _)| {
            if (x + y + n) % 7 == 0 {
                1.0
            } else {
                0.0
            }
        })
    }

    fn params(epochs: usize) -> TrainingParameters {
        TrainingParameters {
            epochs,
            batch_size: 2,
            learning_rate: 1e-3,
            seed: Some(7),
        }
    }

    #[test]
    fn history_has_one_entry_per_epoch() {
        let train = sparse_events(4);
        let validate = sparse_events(2);
        let trainer = Trainer::<TrainingBackend>::new(AutoencoderConfig::new(1), params(2), NdArrayDevice::default());

        let (model, history) = trainer.fit(train.view(), validate.view()).unwrap();
        assert_eq!(history.epochs(), 2);
        assert_eq!(history.val_accuracy.len(), 2);
        let last = history.last().unwrap();
        assert!(last.loss.is_finite() && last.loss > 0.0);
        assert!((0.0..=1.0).contains(&last.val_accuracy));

        let output = model.forward(events_to_tensor::<InferenceBackend>(validate.view(), &NdArrayDevice::default()));
        assert_eq!(output.dims(), [2, 1, 16, 16]);
    }

    #[test]
    fn empty_validation_split_is_rejected() {
        let train = sparse_events(2);
        let validate = Array4::<f32>::zeros((0, 16, 16, 1));
        let trainer = Trainer::<TrainingBackend>::new(AutoencoderConfig::new(1), params(1), NdArrayDevice::default());
        assert!(matches!(
            trainer.fit(train.view(), validate.view()),
            Err(AutoencoderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn history_last_needs_every_series() {
        let mut history = TrainingHistory::default();
        assert!(history.last().is_none());
        history.record(EpochMetrics {
            loss: 0.7,
            accuracy: 0.1,
            val_loss: 0.8,
            val_accuracy: 0.05,
        });
        assert_eq!(history.last().map(|m| m.val_loss), Some(0.8));
    }

    #[test]
    fn history_serializes_with_metric_names() {
        let mut history = TrainingHistory::default();
        history.record(EpochMetrics {
            loss: 0.5,
            accuracy: 0.25,
            val_loss: 0.75,
            val_accuracy: 0.125,
        });
        let json = serde_json::to_value(&history).unwrap();
        assert_eq!(json["val_loss"][0], 0.75);
        assert_eq!(json["accuracy"][0], 0.25);
    }
}
