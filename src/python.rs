use crate::config::InputShape;
use crate::error::AutoencoderError;
use crate::utils::data;
use crate::utils::evaluation;
use crate::utils::stats::{self, ErrorStatistic};
use half::f16;
use numpy::{IntoPyArray, PyArray1, PyArray4, PyReadonlyArrayDyn};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

impl From<AutoencoderError> for PyErr {
    fn from(err: AutoencoderError) -> Self {
        PyValueError::new_err(err.to_string())
    }
}

/// Load hit events from a `.npy` file and split off the trailing validation share.
///
/// Returns `(train, validate)` as float16 arrays.
#[pyfunction]
#[pyo3(signature = (path, validate_fraction=0.1, shape=(336, 80, 4)))]
fn prepare_data<'py>(
    py: Python<'py>,
    path: &str,
    validate_fraction: f64,
    shape: (usize, usize, usize),
) -> PyResult<(&'py PyArray4<f16>, &'py PyArray4<f16>)> {
    let shape = InputShape::new(shape.0, shape.1, shape.2);
    let (train, validate) = py.allow_threads(|| data::prepare_data(path, validate_fraction, &shape))?;
    Ok((train.into_pyarray(py), validate.into_pyarray(py)))
}

/// Per-event mean squared error between two arrays indexed by event on axis 0.
#[pyfunction]
fn reconstruction_errors<'py>(
    py: Python<'py>,
    original: PyReadonlyArrayDyn<'_, f32>,
    reconstructed: PyReadonlyArrayDyn<'_, f32>,
) -> PyResult<&'py PyArray1<f64>> {
    let errors = evaluation::reconstruction_errors(original.as_array(), reconstructed.as_array())?;
    Ok(errors.into_pyarray(py))
}

/// Mean plus population standard deviation of the errors.
#[pyfunction]
fn anomaly_threshold(errors: Vec<f64>) -> PyResult<f64> {
    Ok(stats::anomaly_threshold(&errors)?)
}

/// Python-exposed wrapper around ErrorStatistic
#[pyclass]
pub struct AnomalyEvaluator {
    inner: ErrorStatistic,
}

#[pymethods]
impl AnomalyEvaluator {
    #[new]
    fn new() -> Self {
        AnomalyEvaluator {
            inner: ErrorStatistic::new(),
        }
    }

    /// Replace the accumulated statistic with one over `errors`.
    fn fit(&mut self, errors: Vec<f64>) {
        self.inner = ErrorStatistic::from_errors(&errors);
    }

    fn update(&mut self, error: f64) {
        self.inner.update(error);
    }

    fn threshold(&self) -> PyResult<f64> {
        self.inner
            .threshold()
            .ok_or_else(|| AutoencoderError::EmptyEvaluation.into())
    }

    fn is_anomalous(&self, error: f64) -> PyResult<bool> {
        Ok(evaluation::Label::classify(error, self.threshold()?).is_anomalous())
    }

    fn labels(&self, errors: Vec<f64>) -> PyResult<Vec<bool>> {
        let threshold = self.threshold()?;
        Ok(evaluation::label_anomalies(&errors, threshold)
            .into_iter()
            .map(evaluation::Label::is_anomalous)
            .collect())
    }

    fn get_count(&self) -> usize {
        self.inner.count()
    }

    fn get_mean(&self) -> Option<f64> {
        self.inner.mean()
    }

    fn get_std(&self) -> Option<f64> {
        self.inner.std()
    }
}

pub fn register(m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(prepare_data, m)?)?;
    m.add_function(wrap_pyfunction!(reconstruction_errors, m)?)?;
    m.add_function(wrap_pyfunction!(anomaly_threshold, m)?)?;
    // AnomalyEvaluator:
    m.add_class::<AnomalyEvaluator>()?;
    Ok(())
}
