//! Backing stores for lazily loaded datasets.
//!
//! A store describes where the arrays live; a handle is an open read
//! session on it. Every loader worker opens its own handle, and a handle is
//! never shared between threads.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ndarray::{Array2, Axis, Ix2};
use pots_core::SeriesShape;

use crate::error::{DataError, Result};
use crate::source::{check_label_dims, check_series_dims, keys, NamedArrays};

/// What a store holds, read without keeping anything open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    /// Shape of the primary feature array.
    pub shape: SeriesShape,
    /// Dimensions of every array in the store, by name.
    pub arrays: BTreeMap<String, Vec<usize>>,
}

impl StoreLayout {
    /// Build a layout from the dimensions of each array.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Schema`] if `X` is absent and
    /// [`DataError::Shape`] if it is not 3-dimensional.
    pub fn from_dims(arrays: BTreeMap<String, Vec<usize>>, source_desc: &str) -> Result<Self> {
        let x = arrays
            .get(keys::X)
            .ok_or_else(|| DataError::schema(keys::X, source_desc))?;
        let shape = SeriesShape::from_dims(x).map_err(|e| DataError::Shape(format!("X: {e}")))?;
        Ok(Self { shape, arrays })
    }

    /// Whether the store holds `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.arrays.contains_key(key)
    }

    /// Array names in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.arrays.keys().map(String::as_str)
    }

    /// Check every array against `X`, as an eager dataset does.
    ///
    /// # Errors
    ///
    /// - [`DataError::Shape`] if `X_intact`, `indicating_mask` or `y`
    ///   disagree with the extent or sample count of `X`.
    /// - [`DataError::Schema`] if `indicating_mask` is given without `X_intact`.
    pub fn validate(&self, source_desc: &str) -> Result<()> {
        for key in [keys::X_INTACT, keys::INDICATING_MASK] {
            if let Some(dims) = self.arrays.get(key) {
                check_series_dims(key, dims, self.shape)?;
            }
        }
        if self.contains(keys::INDICATING_MASK) && !self.contains(keys::X_INTACT) {
            return Err(DataError::schema(keys::X_INTACT, source_desc));
        }
        if let Some(dims) = self.arrays.get(keys::Y) {
            check_label_dims(dims, self.shape.samples())?;
        }
        Ok(())
    }
}

/// A location holding named arrays indexed by sample.
pub trait ArrayStore: Send + Sync + fmt::Debug {
    /// Human-readable location, used in errors and logs.
    fn describe(&self) -> String;

    /// Read the layout of the store.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Schema`] when the primary feature array is absent.
    fn inspect(&self) -> Result<StoreLayout>;

    /// Open an independent read handle.
    fn open(&self) -> Result<Box<dyn StoreHandle>>;
}

/// An open read session on an [`ArrayStore`].
pub trait StoreHandle: Send {
    /// Read the `(T, F)` slice of a series array at `index`.
    fn read_series(&mut self, key: &str, index: usize) -> Result<Array2<f32>>;

    /// Read the label at `index`, if the store has labels.
    fn read_label(&mut self, index: usize) -> Result<Option<f32>>;
}

/// A store over arrays already resident in memory.
///
/// Handles share the arrays read-only through an [`Arc`].
#[derive(Debug, Clone)]
pub struct MemoryStore {
    arrays: Arc<NamedArrays>,
}

impl MemoryStore {
    /// Wrap a set of named arrays.
    #[must_use]
    pub fn new(arrays: NamedArrays) -> Self {
        Self {
            arrays: Arc::new(arrays),
        }
    }
}

impl ArrayStore for MemoryStore {
    fn describe(&self) -> String {
        "in-memory store".to_string()
    }

    fn inspect(&self) -> Result<StoreLayout> {
        let dims = self
            .arrays
            .keys()
            .filter_map(|key| Some((key.to_string(), self.arrays.get(key)?.shape().to_vec())))
            .collect();
        StoreLayout::from_dims(dims, &self.describe())
    }

    fn open(&self) -> Result<Box<dyn StoreHandle>> {
        Ok(Box::new(MemoryHandle {
            arrays: Arc::clone(&self.arrays),
        }))
    }
}

struct MemoryHandle {
    arrays: Arc<NamedArrays>,
}

impl StoreHandle for MemoryHandle {
    fn read_series(&mut self, key: &str, index: usize) -> Result<Array2<f32>> {
        let array = self
            .arrays
            .get(key)
            .ok_or_else(|| DataError::schema(key, "in-memory store"))?;
        let length = array.shape().first().copied().unwrap_or(0);
        if index >= length {
            return Err(DataError::IndexOutOfBounds { index, length });
        }
        array
            .index_axis(Axis(0), index)
            .to_owned()
            .into_dimensionality::<Ix2>()
            .map_err(|e| DataError::Shape(format!("{key}: {e}")))
    }

    fn read_label(&mut self, index: usize) -> Result<Option<f32>> {
        let Some(y) = self.arrays.get(keys::Y) else {
            return Ok(None);
        };
        y.iter()
            .nth(index)
            .copied()
            .map(Some)
            .ok_or(DataError::IndexOutOfBounds {
                index,
                length: y.len(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array3};

    #[test]
    fn test_memory_handles_are_independent() {
        let x = Array3::from_shape_fn((3, 2, 2), |(n, t, f)| (n * 4 + t * 2 + f) as f32);
        let store = MemoryStore::new(NamedArrays::from_arrays(x, Some(Array1::from(vec![0.0, 1.0, 2.0]))));

        let mut a = store.open().unwrap();
        let mut b = store.open().unwrap();
        assert_eq!(a.read_series(keys::X, 2).unwrap(), b.read_series(keys::X, 2).unwrap());
        assert_eq!(a.read_label(1).unwrap(), Some(1.0));
        assert!(matches!(
            b.read_series(keys::X, 3),
            Err(DataError::IndexOutOfBounds { index: 3, length: 3 })
        ));
    }

    #[test]
    fn test_inspect_without_x_is_schema_error() {
        let store = MemoryStore::new(NamedArrays::new());
        assert!(matches!(store.inspect(), Err(DataError::Schema { .. })));
    }

    #[test]
    fn test_layout_validation_matches_eager_checks() {
        let x = Array3::<f32>::zeros((4, 3, 2));
        let short_labels = NamedArrays::from_arrays(x.clone(), Some(Array1::zeros(3)));
        let layout = MemoryStore::new(short_labels).inspect().unwrap();
        assert_eq!(layout.arrays[keys::Y], vec![3]);
        assert!(matches!(layout.validate("test"), Err(DataError::Shape(_))));

        let wide_truth = NamedArrays::from_arrays(x.clone(), None)
            .with(keys::X_INTACT, Array3::<f32>::zeros((4, 3, 5)).into_dyn());
        let layout = MemoryStore::new(wide_truth).inspect().unwrap();
        assert!(matches!(layout.validate("test"), Err(DataError::Shape(_))));

        let mask_only = NamedArrays::from_arrays(x.clone(), None)
            .with(keys::INDICATING_MASK, Array3::<f32>::zeros((4, 3, 2)).into_dyn());
        let layout = MemoryStore::new(mask_only).inspect().unwrap();
        assert!(matches!(layout.validate("test"), Err(DataError::Schema { key, .. }) if key == "X_intact"));

        let good = NamedArrays::from_arrays(x, Some(Array1::zeros(4)));
        assert!(MemoryStore::new(good).inspect().unwrap().validate("test").is_ok());
    }
}
