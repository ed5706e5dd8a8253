use crate::config::InputShape;
use crate::error::{AutoencoderError, Result};
use half::f16;
use ndarray::{Array, Array4, ArrayD, ArrayView4, Axis, Ix4, RemoveAxis, Slice};
use ndarray_npy::{read_npy, ReadNpyError, ReadableElement};
use std::path::Path;
use tracing::{debug, info};

/// Detector events stored at half precision, axis 0 indexes events and the
/// remaining axes are `x × y × channels`.
pub type Events = Array4<f16>;

/// Number of events held out for validation: `floor(len × fraction)`.
pub fn validation_size(len: usize, validate_fraction: f64) -> usize {
    ((len as f64) * validate_fraction).floor() as usize
}

/// Split along axis 0 into `(train, validation)`, the validation part being
/// the trailing `validation_size` rows. Order is preserved in both halves.
pub fn split_validation<A, D>(events: &Array<A, D>, validate_fraction: f64) -> (Array<A, D>, Array<A, D>)
where
    A: Clone,
    D: RemoveAxis,
{
    let len = events.len_of(Axis(0));
    let train_len = len - validation_size(len, validate_fraction).min(len);

    let train = events.slice_axis(Axis(0), Slice::from(..train_len)).to_owned();
    let validate = events.slice_axis(Axis(0), Slice::from(train_len..)).to_owned();
    (train, validate)
}

/// Load a `.npy` file of events and split it into training and validation sets.
///
/// # Arguments
/// * `path` - `.npy` array of shape `(events, x, y, channels)`
/// * `validate_fraction` - Trailing share of events held out, in `[0, 1)`
/// * `shape` - Expected per-event shape
pub fn prepare_data(path: impl AsRef<Path>, validate_fraction: f64, shape: &InputShape) -> Result<(Events, Events)> {
    if !(0.0..1.0).contains(&validate_fraction) {
        return Err(AutoencoderError::invalid_config(format!(
            "validate_fraction must be in [0, 1), got {validate_fraction}"
        )));
    }

    let events = load_events(path.as_ref(), shape)?;
    let (train, validate) = split_validation(&events, validate_fraction);
    info!(
        total = events.len_of(Axis(0)),
        train = train.len_of(Axis(0)),
        validate = validate.len_of(Axis(0)),
        "prepared events"
    );
    Ok((train, validate))
}

/// Read events from disk, accepting any of the common numeric dtypes and
/// downcasting them to `f16`.
pub fn load_events(path: &Path, shape: &InputShape) -> Result<Events> {
    let raw = read_any_dtype(path)?;

    let actual = raw.shape().to_vec();
    let events = raw
        .into_dimensionality::<Ix4>()
        .map_err(|_| AutoencoderError::ShapeMismatch {
            expected: "(events, x, y, channels)".to_string(),
            actual: format!("{actual:?}"),
        })?;
    if events.shape()[1..] != shape.as_array() {
        return Err(AutoencoderError::shape_mismatch(shape.as_array(), &events.shape()[1..]));
    }
    Ok(events)
}

/// Element types accepted on disk, widened to `f64` before the `f16` downcast.
trait StoredValue: ReadableElement + Copy {
    fn widen(self) -> f64;
}

macro_rules! impl_stored_value {
    ($($t:ty),*) => {
        $(impl StoredValue for $t {
            fn widen(self) -> f64 {
                self as f64
            }
        })*
    };
}

impl_stored_value!(f32, f64, u8, u16, u32, u64, i8, i16, i32, i64);

impl StoredValue for bool {
    fn widen(self) -> f64 {
        f64::from(u8::from(self))
    }
}

fn read_any_dtype(path: &Path) -> Result<ArrayD<f16>> {
    // Tried in order; the first matching descriptor wins.
    let readers: [fn(&Path) -> Result<Option<ArrayD<f16>>>; 11] = [
        read_as_f16::<f32>,
        read_as_f16::<f64>,
        read_as_f16::<i64>,
        read_as_f16::<i32>,
        read_as_f16::<i16>,
        read_as_f16::<i8>,
        read_as_f16::<u64>,
        read_as_f16::<u32>,
        read_as_f16::<u16>,
        read_as_f16::<u8>,
        read_as_f16::<bool>,
    ];
    for read in readers {
        if let Some(events) = read(path)? {
            return Ok(events);
        }
    }
    Err(AutoencoderError::ReadEvents {
        path: path.to_path_buf(),
        reason: "unsupported dtype: expected a float, integer or bool array".to_string(),
    })
}

fn read_as_f16<T: StoredValue>(path: &Path) -> Result<Option<ArrayD<f16>>> {
    match read_npy::<_, ArrayD<T>>(path) {
        Ok(array) => {
            debug!(path = %path.display(), dtype = std::any::type_name::<T>(), "read events");
            Ok(Some(array.mapv(|v| f16::from_f64(v.widen()))))
        }
        Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
        Err(err) => Err(AutoencoderError::ReadEvents {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }),
    }
}

/// Widen half precision events to `f32` for the network.
pub fn events_to_f32(events: ArrayView4<'_, f16>) -> Array4<f32> {
    events.mapv(f16::to_f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array4};
    use ndarray_npy::write_npy;

    #[test]
    fn validation_takes_trailing_fraction() {
        let events = Array1::from_iter(0..10);
        let (train, validate) = split_validation(&events, 0.3);
        assert_eq!(train.to_vec(), vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(validate.to_vec(), vec![7, 8, 9]);
    }

    #[test]
    fn zero_fraction_keeps_everything_for_training() {
        let events = Array1::from_iter(0..4);
        let (train, validate) = split_validation(&events, 0.0);
        assert_eq!(train.len(), 4);
        assert!(validate.is_empty());
    }

    #[test]
    fn validation_size_floors() {
        assert_eq!(validation_size(10, 0.1), 1);
        assert_eq!(validation_size(19, 0.1), 1);
        assert_eq!(validation_size(20, 0.1), 2);
        assert_eq!(validation_size(3, 0.5), 1);
    }

    #[test]
    fn prepare_data_reads_and_downcasts() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hits.npy");
        let raw = Array4::<f64>::from_shape_fn((10, 16, 16, 2), |(n, x, _, c)| {
            (n + x + c) as f64 / 64.0
        });
        write_npy(&path, &raw).unwrap();

        let shape = InputShape::new(16, 16, 2);
        let (train, validate) = prepare_data(&path, 0.2, &shape).unwrap();
        assert_eq!(train.shape(), &[8, 16, 16, 2]);
        assert_eq!(validate.shape(), &[2, 16, 16, 2]);
        assert_eq!(validate[[0, 3, 0, 1]], f16::from_f64(raw[[8, 3, 0, 1]]));
    }

    #[test]
    fn integer_arrays_are_accepted() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hits.npy");
        write_npy(&path, &Array4::<u8>::ones((2, 16, 16, 1))).unwrap();

        let events = load_events(&path, &InputShape::new(16, 16, 1)).unwrap();
        assert_eq!(events[[1, 15, 15, 0]], f16::ONE);
    }

    #[test]
    fn numpy_default_integers_are_accepted() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hits.npy");
        let raw = Array4::<i64>::from_shape_fn((2, 16, 16, 1), |(n, x, _, _)| (n * 16 + x) as i64);
        write_npy(&path, &raw).unwrap();

        let events = load_events(&path, &InputShape::new(16, 16, 1)).unwrap();
        assert_eq!(events[[1, 3, 0, 0]], f16::from_f64(19.0));
    }

    #[test]
    fn unsigned_and_bool_arrays_are_accepted() {
        let tmp = tempfile::tempdir().unwrap();
        let shape = InputShape::new(16, 16, 1);

        let wide = tmp.path().join("wide.npy");
        write_npy(&wide, &Array4::<u32>::from_elem((1, 16, 16, 1), 3)).unwrap();
        assert_eq!(load_events(&wide, &shape).unwrap()[[0, 0, 0, 0]], f16::from_f64(3.0));

        let mask = tmp.path().join("mask.npy");
        write_npy(&mask, &Array4::<bool>::from_elem((1, 16, 16, 1), true)).unwrap();
        assert_eq!(load_events(&mask, &shape).unwrap()[[0, 5, 5, 0]], f16::ONE);
    }

    #[test]
    fn wrong_event_shape_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hits.npy");
        write_npy(&path, &Array4::<f32>::zeros((2, 16, 16, 3))).unwrap();

        let err = load_events(&path, &InputShape::new(16, 16, 4)).unwrap_err();
        assert!(matches!(err, AutoencoderError::ShapeMismatch { .. }));
    }

    #[test]
    fn missing_file_propagates() {
        let err = load_events(Path::new("/nonexistent/hits.npy"), &InputShape::default()).unwrap_err();
        assert!(matches!(err, AutoencoderError::ReadEvents { .. }));
    }

    #[test]
    fn rejects_fraction_of_one() {
        let err = prepare_data("/nonexistent/hits.npy", 1.0, &InputShape::default()).unwrap_err();
        assert!(matches!(err, AutoencoderError::InvalidConfig(_)));
    }
}
