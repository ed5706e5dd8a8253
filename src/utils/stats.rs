use crate::error::{AutoencoderError, Result};

/// Running statistics over reconstruction errors: count, min, max, sum, mean,
/// population variance and standard deviation.
///
/// Values are folded in one at a time (Welford update), so the result only
/// depends on the order the errors are fed in.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorStatistic {
    num_items: usize,
    max: f64,
    min: f64,
    sum: f64,
    mean: f64,
    sum_squares: f64,
}

impl Default for ErrorStatistic {
    fn default() -> Self {
        ErrorStatistic {
            num_items: 0,
            max: f64::NEG_INFINITY,
            min: f64::INFINITY,
            sum: 0.0,
            mean: 0.0,
            sum_squares: 0.0,
        }
    }
}

impl ErrorStatistic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_errors(errors: &[f64]) -> Self {
        let mut stat = Self::new();
        for &error in errors {
            stat.update(error);
        }
        stat
    }

    /// Update with a new error value.
    pub fn update(&mut self, x: f64) {
        self.num_items += 1;
        self.max = self.max.max(x);
        self.min = self.min.min(x);
        self.sum += x;

        let old_mean = self.mean;
        self.mean = old_mean + (x - old_mean) / self.num_items as f64;
        self.sum_squares += (x - old_mean) * (x - self.mean);
    }

    pub fn count(&self) -> usize {
        self.num_items
    }

    pub fn is_empty(&self) -> bool {
        self.num_items == 0
    }

    pub fn max(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.max)
    }

    pub fn min(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.min)
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn mean(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.mean)
    }

    /// Population variance (divides by `n`, not `n - 1`).
    pub fn var(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.sum_squares / self.num_items as f64)
    }

    pub fn std(&self) -> Option<f64> {
        self.var().map(f64::sqrt)
    }

    /// Anomaly threshold: mean plus one population standard deviation.
    pub fn threshold(&self) -> Option<f64> {
        Some(self.mean()? + self.std()?)
    }
}

/// Threshold for a set of reconstruction errors, see [`ErrorStatistic::threshold`].
pub fn anomaly_threshold(errors: &[f64]) -> Result<f64> {
    ErrorStatistic::from_errors(errors)
        .threshold()
        .ok_or(AutoencoderError::EmptyEvaluation)
}
