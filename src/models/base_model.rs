use crate::error::Result;
use crate::utils::evaluation::reconstruction_errors;
use ndarray::{Array1, Array4, ArrayView4};

/// A common trait for models that reconstruct their input.
pub trait Reconstructor {
    /// Reconstruct a batch of events shaped `(events, x, y, channels)`.
    fn reconstruct(&self, events: ArrayView4<'_, f32>) -> Result<Array4<f32>>;

    /// Default: reconstruct, then score every event by its mean squared error.
    fn reconstruction_errors(&self, events: ArrayView4<'_, f32>) -> Result<Array1<f64>> {
        let reconstructed = self.reconstruct(events)?;
        reconstruction_errors(events, reconstructed.view())
    }
}
