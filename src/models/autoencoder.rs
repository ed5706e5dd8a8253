//! Convolutional autoencoder for detector hit maps.
//!
//! Events arrive as `(events, x, y, channels)` arrays; the network works in
//! burn's `(batch, channels, x, y)` layout. Three convolutional encoder stages
//! (16, 32, 64 filters, two of them followed by 4×4 max-pooling) are mirrored
//! by a decoder that upsamples twice by 4 and ends in a sigmoid convolution
//! with the input's channel count, so the output shape equals the input shape.

use crate::config::InputShape;
use crate::error::AutoencoderError;
use crate::models::base_model::Reconstructor;
use burn::backend::ndarray::NdArrayDevice;
use burn::backend::NdArray;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Initializer, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::{relu, sigmoid};
use burn::tensor::TensorData;
use ndarray::{s, Array4, ArrayView4, Axis};

/// CPU backend used for inference and persisted models.
pub type InferenceBackend = NdArray<f32>;

const KERNEL: [usize; 2] = [4, 3];
const BOTTLENECK_KERNEL: [usize; 2] = [4, 4];
const POOL: usize = 4;
const FILTERS: [usize; 3] = [16, 32, 64];
/// Events per forward pass during inference.
const PREDICT_BATCH: usize = 32;
/// Probabilities are clamped away from 0 and 1 before taking logs.
const EPSILON: f64 = 1e-7;

#[derive(Config, Debug)]
pub struct AutoencoderConfig {
    /// Channels per event; the output layer reproduces the same count.
    pub channels: usize,
    /// L2 factor applied to every kernel after the first encoder stage.
    #[config(default = "1e-4")]
    pub l2: f64,
}

impl AutoencoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Autoencoder<B> {
        let [f1, f2, f3] = FILTERS;
        let pool = || MaxPool2dConfig::new([POOL, POOL]).with_strides([POOL, POOL]).init();

        Autoencoder {
            encode1: SameConv2d::new([self.channels, f1], KERNEL, device),
            pool1: pool(),
            encode2: SameConv2d::new([f1, f2], KERNEL, device),
            pool2: pool(),
            encode3: SameConv2d::new([f2, f3], KERNEL, device),
            decode1: SameConv2d::new([f3, f3], BOTTLENECK_KERNEL, device),
            decode2: SameConv2d::new([f3, f2], KERNEL, device),
            output: SameConv2d::new([f2, self.channels], KERNEL, device),
        }
    }
}

/// 2D convolution with "same" padding: output height and width equal the
/// input's for any kernel size. For even kernels the extra padding row and
/// column go after the data, matching TensorFlow.
#[derive(Module, Debug)]
pub struct SameConv2d<B: Backend> {
    conv: Conv2d<B>,
}

impl<B: Backend> SameConv2d<B> {
    pub fn new(channels: [usize; 2], kernel: [usize; 2], device: &B::Device) -> Self {
        let conv = Conv2dConfig::new(channels, kernel)
            .with_padding(PaddingConfig2d::Explicit(kernel[0] / 2, kernel[1] / 2))
            .with_initializer(Initializer::XavierUniform { gain: 1.0 })
            .init(device);
        SameConv2d { conv }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch, _, height, width] = x.dims();
        let out = self.conv.forward(x);
        let [_, channels, out_height, out_width] = out.dims();
        // Symmetric padding overshoots by one for even kernels; the leading
        // row/column is the one TensorFlow never computes.
        let (dh, dw) = (out_height - height, out_width - width);
        out.slice([0..batch, 0..channels, dh..dh + height, dw..dw + width])
    }

    /// Sum of squared kernel weights.
    pub fn weight_penalty(&self) -> Tensor<B, 1> {
        self.conv.weight.val().powf_scalar(2.0).sum()
    }

    pub fn out_channels(&self) -> usize {
        self.conv.weight.val().dims()[0]
    }
}

/// Repeat every pixel `factor` times along both spatial axes.
pub fn upsample_nearest<B: Backend>(x: Tensor<B, 4>, factor: usize) -> Tensor<B, 4> {
    let [batch, channels, height, width] = x.dims();

    let rows: Tensor<B, 5> = x.reshape([batch, channels, height, 1, width]);
    let rows: Tensor<B, 4> = Tensor::cat(vec![rows; factor], 3).reshape([batch, channels, height * factor, width]);

    let cols: Tensor<B, 5> = rows.reshape([batch, channels, height * factor, width, 1]);
    Tensor::cat(vec![cols; factor], 4).reshape([batch, channels, height * factor, width * factor])
}

#[derive(Module, Debug)]
pub struct Autoencoder<B: Backend> {
    encode1: SameConv2d<B>,
    pool1: MaxPool2d,
    encode2: SameConv2d<B>,
    pool2: MaxPool2d,
    encode3: SameConv2d<B>,
    decode1: SameConv2d<B>,
    decode2: SameConv2d<B>,
    output: SameConv2d<B>,
}

impl<B: Backend> Autoencoder<B> {
    /// # Shapes
    ///   - Input `[batch, channels, x, y]`
    ///   - Output `[batch, channels, x, y]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.encode1.forward(input));
        let x = self.pool1.forward(x);
        let x = relu(self.encode2.forward(x));
        let x = self.pool2.forward(x);
        let x = relu(self.encode3.forward(x));

        let x = relu(self.decode1.forward(x));
        let x = upsample_nearest(x, POOL);
        let x = relu(self.decode2.forward(x));
        let x = upsample_nearest(x, POOL);
        sigmoid(self.output.forward(x))
    }

    /// Unscaled L2 penalty over the regularized kernels.
    pub fn weight_penalty(&self) -> Tensor<B, 1> {
        self.encode2.weight_penalty()
            + self.encode3.weight_penalty()
            + self.decode1.weight_penalty()
            + self.decode2.weight_penalty()
    }

    /// Keras-style table of layers, output shapes and parameter counts.
    pub fn summary(&self, shape: &InputShape) -> String {
        let (x, y) = (shape.x, shape.y);
        let (px, py) = (x / POOL, y / POOL);
        let (bx, by) = (px / POOL, py / POOL);
        let conv = |name: &str, layer: &SameConv2d<B>, ox: usize, oy: usize| {
            (name.to_string(), [ox, oy, layer.out_channels()], layer.num_params())
        };
        let rows = vec![
            ("input".to_string(), [x, y, shape.channels], 0),
            conv("conv2d (relu)", &self.encode1, x, y),
            ("max_pooling2d".to_string(), [px, py, FILTERS[0]], 0),
            conv("conv2d_1 (relu, l2)", &self.encode2, px, py),
            ("max_pooling2d_1".to_string(), [bx, by, FILTERS[1]], 0),
            conv("conv2d_2 (relu, l2)", &self.encode3, bx, by),
            conv("conv2d_3 (relu, l2)", &self.decode1, bx, by),
            ("up_sampling2d".to_string(), [px, py, FILTERS[2]], 0),
            conv("conv2d_4 (relu, l2)", &self.decode2, px, py),
            ("up_sampling2d_1".to_string(), [x, y, FILTERS[1]], 0),
            conv("conv2d_5 (sigmoid)", &self.output, x, y),
        ];

        let rule = "_".repeat(65);
        let mut lines = vec![
            "Model: \"autoencoder\"".to_string(),
            rule.clone(),
            format!(" {:<28}{:<26}{}", "Layer (type)", "Output Shape", "Param #"),
            "=".repeat(65),
        ];
        for (name, [a, b, c], params) in rows {
            lines.push(format!(" {:<28}{:<26}{}", name, format!("(None, {a}, {b}, {c})"), params));
        }
        let total = self.num_params();
        lines.push("=".repeat(65));
        lines.push(format!("Total params: {total}"));
        lines.push(format!("Trainable params: {total}"));
        lines.push("Non-trainable params: 0".to_string());
        lines.push(rule);
        lines.join("\n")
    }
}

/// Binary cross-entropy averaged over every element.
pub fn binary_cross_entropy<B: Backend>(output: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 1> {
    let output = output.clamp(EPSILON, 1.0 - EPSILON);
    let positive = target.clone() * output.clone().log();
    let negative = target.neg().add_scalar(1.0) * output.neg().add_scalar(1.0).log();
    (positive + negative).mean().neg()
}

/// Share of elements where the rounded prediction equals the target.
///
/// Reconstruction targets are continuous, so this only counts exact 0/1 hits;
/// it is reported for continuity with earlier runs.
pub fn binary_accuracy<B: Backend>(output: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 1> {
    output.greater_elem(0.5).float().equal(target).float().mean()
}

/// Move `(events, x, y, channels)` values into a `[events, channels, x, y]` tensor.
pub fn events_to_tensor<B: Backend>(events: ArrayView4<'_, f32>, device: &B::Device) -> Tensor<B, 4> {
    let (n, x, y, c) = events.dim();
    let values: Vec<f32> = events.permuted_axes([0, 3, 1, 2]).iter().copied().collect();
    Tensor::from_data(TensorData::new(values, [n, c, x, y]), device)
}

/// Inverse of [`events_to_tensor`].
pub fn tensor_to_events<B: Backend>(tensor: Tensor<B, 4>) -> crate::error::Result<Array4<f32>> {
    let [n, c, x, y] = tensor.dims();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| AutoencoderError::Serialization(format!("{err:?}")))?;
    let nchw = Array4::from_shape_vec((n, c, x, y), values)?;
    Ok(nchw.permuted_axes([0, 2, 3, 1]).as_standard_layout().into_owned())
}

/// A trained autoencoder on the CPU backend, ready for inference.
#[derive(Debug)]
pub struct AutoencoderModel {
    pub(crate) model: Autoencoder<InferenceBackend>,
    pub(crate) config: AutoencoderConfig,
    pub(crate) device: NdArrayDevice,
}

impl AutoencoderModel {
    pub fn new(model: Autoencoder<InferenceBackend>, config: AutoencoderConfig) -> Self {
        AutoencoderModel {
            model,
            config,
            device: NdArrayDevice::default(),
        }
    }

    pub fn config(&self) -> &AutoencoderConfig {
        &self.config
    }

    pub fn network(&self) -> &Autoencoder<InferenceBackend> {
        &self.model
    }
}

impl Reconstructor for AutoencoderModel {
    fn reconstruct(&self, events: ArrayView4<'_, f32>) -> crate::error::Result<Array4<f32>> {
        let channels = events.len_of(Axis(3));
        if channels != self.config.channels {
            return Err(AutoencoderError::shape_mismatch(self.config.channels, channels));
        }

        let num_events = events.len_of(Axis(0));
        let mut parts = Vec::with_capacity(num_events.div_ceil(PREDICT_BATCH));
        for start in (0..num_events).step_by(PREDICT_BATCH) {
            let end = (start + PREDICT_BATCH).min(num_events);
            let batch = events_to_tensor::<InferenceBackend>(events.slice(s![start..end, .., .., ..]), &self.device);
            parts.push(tensor_to_events(self.model.forward(batch))?);
        }

        if parts.is_empty() {
            return Ok(Array4::zeros(events.raw_dim()));
        }
        let views: Vec<_> = parts.iter().map(|part| part.view()).collect();
        Ok(ndarray::concatenate(Axis(0), &views)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::tensor::ElementConversion;

    type TestBackend = InferenceBackend;

    fn device() -> NdArrayDevice {
        NdArrayDevice::default()
    }

    #[test]
    fn output_shape_matches_input_shape() {
        for (x, y, channels) in [(16, 16, 1), (32, 48, 4), (64, 16, 2)] {
            let model = AutoencoderConfig::new(channels).init::<TestBackend>(&device());
            let input = Tensor::<TestBackend, 4>::zeros([2, channels, x, y], &device());
            assert_eq!(model.forward(input).dims(), [2, channels, x, y]);
        }
    }

    #[test]
    fn config_survives_json_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("model.json");
        let config = AutoencoderConfig::new(4);
        assert_eq!(config.l2, 1e-4);

        config.save(&path).unwrap();
        let restored = AutoencoderConfig::load(&path).unwrap();
        assert_eq!(restored.channels, 4);
        assert_eq!(restored.l2, config.l2);
    }

    #[test]
    fn same_conv_keeps_size_for_even_kernels() {
        let conv = SameConv2d::<TestBackend>::new([1, 3], BOTTLENECK_KERNEL, &device());
        let input = Tensor::<TestBackend, 4>::ones([1, 1, 5, 7], &device());
        assert_eq!(conv.forward(input).dims(), [1, 3, 5, 7]);
    }

    #[test]
    fn nearest_upsampling_repeats_pixels() {
        let input = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [1, 1, 2, 2]),
            &device(),
        );
        let values = upsample_nearest(input, 2).into_data().to_vec::<f32>().unwrap();
        assert_eq!(
            values,
            vec![
                1.0, 1.0, 2.0, 2.0, //
                1.0, 1.0, 2.0, 2.0, //
                3.0, 3.0, 4.0, 4.0, //
                3.0, 3.0, 4.0, 4.0,
            ]
        );
    }

    #[test]
    fn event_layout_survives_tensor_conversion() {
        let events = Array4::from_shape_fn((2, 3, 4, 2), |(n, x, y, c)| (n * 100 + x * 10 + y + c * 1000) as f32);
        let tensor = events_to_tensor::<TestBackend>(events.view(), &device());
        assert_eq!(tensor.dims(), [2, 2, 3, 4]);
        assert_eq!(tensor_to_events(tensor).unwrap(), events);
    }

    #[test]
    fn confident_correct_predictions_have_small_loss() {
        let target = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![0.0f32, 1.0, 1.0, 0.0], [1, 1, 2, 2]),
            &device(),
        );
        let output = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![0.01f32, 0.99, 0.99, 0.01], [1, 1, 2, 2]),
            &device(),
        );
        let loss: f64 = binary_cross_entropy(output.clone(), target.clone()).into_scalar().elem();
        assert_relative_eq!(loss, -(0.99f64).ln(), epsilon = 1e-4);

        let accuracy: f64 = binary_accuracy(output, target).into_scalar().elem();
        assert_relative_eq!(accuracy, 1.0);
    }

    #[test]
    fn accuracy_ignores_continuous_targets() {
        let target = Tensor::<TestBackend, 4>::full([1, 1, 2, 2], 0.3, &device());
        let output = Tensor::<TestBackend, 4>::full([1, 1, 2, 2], 0.3, &device());
        let accuracy: f64 = binary_accuracy(output, target).into_scalar().elem();
        assert_relative_eq!(accuracy, 0.0);
    }

    #[test]
    fn summary_lists_parameter_totals() {
        let model = AutoencoderConfig::new(4).init::<TestBackend>(&device());
        let summary = model.summary(&InputShape::new(336, 80, 4));
        // First convolution: (4 * 3 * 4 + 1) * 16 weights.
        assert!(summary.contains("(None, 336, 80, 16)"));
        assert!(summary.contains("784"));
        assert!(summary.contains(&format!("Total params: {}", model.num_params())));
    }

    #[test]
    fn reconstructs_in_batches() {
        let config = AutoencoderConfig::new(1);
        let model = AutoencoderModel::new(config.init(&device()), config);
        let events = Array4::<f32>::zeros((PREDICT_BATCH + 3, 16, 16, 1));
        let reconstructed = model.reconstruct(events.view()).unwrap();
        assert_eq!(reconstructed.dim(), events.dim());
        assert!(reconstructed.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn rejects_wrong_channel_count() {
        let config = AutoencoderConfig::new(2);
        let model = AutoencoderModel::new(config.init(&device()), config);
        let events = Array4::<f32>::zeros((1, 16, 16, 1));
        assert!(model.reconstruct(events.view()).is_err());
    }
}
