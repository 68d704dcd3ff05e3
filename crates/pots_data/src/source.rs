//! Named in-memory arrays that make up a dataset source.

use std::collections::BTreeMap;

use ndarray::{Array1, Array3, ArrayD, Ix3};
use pots_core::SeriesShape;

use crate::error::{DataError, Result};

/// Well-known array names in a dataset source.
pub mod keys {
    /// Primary feature array, `(N, T, F)`, NaN where unobserved.
    pub const X: &str = "X";
    /// Labels, `(N,)`.
    pub const Y: &str = "y";
    /// Ground-truth series before artificial masking, `(N, T, F)`.
    pub const X_INTACT: &str = "X_intact";
    /// 1 where a value was artificially masked for evaluation, `(N, T, F)`.
    pub const INDICATING_MASK: &str = "indicating_mask";
}

/// A keyed collection of arrays.
///
/// Only `X` is required. Arrays are stored as `f32`; integer labels are
/// converted when loaded.
///
/// # Example
///
/// ```rust,ignore
/// use pots_data::{keys, NamedArrays};
///
/// let source = NamedArrays::new()
///     .with(keys::X, x.into_dyn())
///     .with(keys::Y, y.into_dyn());
/// ```
#[derive(Debug, Clone, Default)]
pub struct NamedArrays {
    arrays: BTreeMap<String, ArrayD<f32>>,
}

impl NamedArrays {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a collection from a feature array and optional labels.
    #[must_use]
    pub fn from_arrays(x: Array3<f32>, y: Option<Array1<f32>>) -> Self {
        let mut arrays = Self::new().with(keys::X, x.into_dyn());
        if let Some(y) = y {
            arrays.insert(keys::Y, y.into_dyn());
        }
        arrays
    }

    /// Add an array under `key`.
    #[must_use]
    pub fn with(mut self, key: &str, array: ArrayD<f32>) -> Self {
        self.insert(key, array);
        self
    }

    /// Insert or replace an array.
    pub fn insert(&mut self, key: &str, array: ArrayD<f32>) {
        self.arrays.insert(key.to_string(), array);
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.arrays.contains_key(key)
    }

    /// Array names in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.arrays.keys().map(String::as_str)
    }

    /// Borrow an array.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ArrayD<f32>> {
        self.arrays.get(key)
    }

    /// Take an array out of the collection.
    pub fn remove(&mut self, key: &str) -> Option<ArrayD<f32>> {
        self.arrays.remove(key)
    }

    /// Shape of the primary feature array.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Schema`] if `X` is absent and
    /// [`DataError::Shape`] if it is not 3-dimensional.
    pub fn shape(&self) -> Result<SeriesShape> {
        let x = self
            .get(keys::X)
            .ok_or_else(|| DataError::schema(keys::X, "in-memory arrays"))?;
        SeriesShape::from_dims(x.shape()).map_err(|e| DataError::Shape(format!("X: {e}")))
    }

    /// Take a 3-D array, checking its sample count and extent against `shape`.
    pub(crate) fn take_series(&mut self, key: &str, shape: SeriesShape) -> Result<Option<Array3<f32>>> {
        let Some(array) = self.remove(key) else {
            return Ok(None);
        };
        check_series_dims(key, array.shape(), shape)?;
        let array = array
            .into_dimensionality::<Ix3>()
            .map_err(|e| DataError::Shape(format!("{key}: {e}")))?;
        Ok(Some(array))
    }

    /// Take the label vector, checking its length against `n`.
    pub(crate) fn take_labels(&mut self, n: usize) -> Result<Option<Array1<f32>>> {
        let Some(array) = self.remove(keys::Y) else {
            return Ok(None);
        };
        check_label_dims(array.shape(), n)?;
        let labels = array
            .into_shape_with_order(n)
            .map_err(|e| DataError::Shape(format!("y must hold one label per sample: {e}")))?;
        Ok(Some(labels))
    }
}

/// Check that a series array named `key` has the sample count and extent of `X`.
pub(crate) fn check_series_dims(key: &str, dims: &[usize], shape: SeriesShape) -> Result<()> {
    let [n, t, f] = *dims else {
        return Err(DataError::Shape(format!(
            "{key} must be 3-dimensional, got {} dimensions",
            dims.len()
        )));
    };
    if n != shape.samples() {
        return Err(DataError::Shape(format!(
            "{key} has {n} samples but X has {}",
            shape.samples()
        )));
    }
    if (t, f) != shape.sample_extent() {
        return Err(DataError::Shape(format!(
            "{key} has extent (T={t}, F={f}) but X has (T={}, F={})",
            shape.steps(),
            shape.features()
        )));
    }
    Ok(())
}

/// Check that labels hold exactly one value per sample.
pub(crate) fn check_label_dims(dims: &[usize], n: usize) -> Result<()> {
    let len: usize = dims.iter().product();
    if len != n || dims.iter().filter(|&&d| d != 1).count() > 1 {
        return Err(DataError::Shape(format!(
            "y must hold one label per sample: got shape {dims:?} for {n} samples"
        )));
    }
    Ok(())
}
