//! Shape metadata for partially-observed series.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Shape metadata for a set of series.
///
/// Follows the convention `(N, T, F)`:
/// - `N`: Number of samples
/// - `T`: Time steps
/// - `F`: Features
///
/// # Example
///
/// ```rust
/// use pots_core::SeriesShape;
///
/// let shape = SeriesShape::new(128, 48, 35);
/// assert_eq!(shape.samples(), 128);
/// assert_eq!(shape.steps(), 48);
/// assert_eq!(shape.features(), 35);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesShape {
    samples: usize,
    steps: usize,
    features: usize,
}

impl SeriesShape {
    /// Create a new shape.
    #[must_use]
    pub const fn new(samples: usize, steps: usize, features: usize) -> Self {
        Self {
            samples,
            steps,
            features,
        }
    }

    /// Create a shape from a slice of exactly 3 dimensions `[N, T, F]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice doesn't contain exactly 3 elements.
    pub fn from_dims(dims: &[usize]) -> Result<Self> {
        match dims {
            [n, t, f] => Ok(Self::new(*n, *t, *f)),
            _ => Err(CoreError::DimensionError {
                expected: 3,
                got: dims.len(),
            }),
        }
    }

    /// Number of samples.
    #[must_use]
    pub const fn samples(&self) -> usize {
        self.samples
    }

    /// Number of time steps.
    #[must_use]
    pub const fn steps(&self) -> usize {
        self.steps
    }

    /// Number of features.
    #[must_use]
    pub const fn features(&self) -> usize {
        self.features
    }

    /// Extent of one sample, `(T, F)`.
    #[must_use]
    pub const fn sample_extent(&self) -> (usize, usize) {
        (self.steps, self.features)
    }

    /// Number of elements in one sample.
    #[must_use]
    pub const fn sample_numel(&self) -> usize {
        self.steps * self.features
    }

    /// Convert to an array.
    #[must_use]
    pub const fn as_array(&self) -> [usize; 3] {
        [self.samples, self.steps, self.features]
    }

    /// Same shape with a different sample count.
    #[must_use]
    pub const fn with_samples(&self, samples: usize) -> Self {
        Self::new(samples, self.steps, self.features)
    }

    /// Check that `other` has the same `(T, F)` extent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ShapeMismatch`] naming both extents otherwise.
    pub fn ensure_same_extent(&self, other: &Self, what: &str) -> Result<()> {
        if self.sample_extent() == other.sample_extent() {
            Ok(())
        } else {
            Err(CoreError::ShapeMismatch(format!(
                "{what} has extent (T={}, F={}) but X has (T={}, F={})",
                other.steps, other.features, self.steps, self.features
            )))
        }
    }
}

impl std::fmt::Display for SeriesShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(N={}, T={}, F={})", self.samples, self.steps, self.features)
    }
}

impl From<[usize; 3]> for SeriesShape {
    fn from([samples, steps, features]: [usize; 3]) -> Self {
        Self::new(samples, steps, features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_from_dims() {
        let shape = SeriesShape::from_dims(&[10, 24, 3]).unwrap();
        assert_eq!(shape.as_array(), [10, 24, 3]);
        assert!(SeriesShape::from_dims(&[10, 24]).is_err());
    }

    #[test]
    fn test_extent_check_ignores_sample_count() {
        let x = SeriesShape::new(10, 24, 3);
        assert!(x.ensure_same_extent(&x.with_samples(4), "X_intact").is_ok());

        let err = x
            .ensure_same_extent(&SeriesShape::new(10, 12, 3), "indicating_mask")
            .unwrap_err();
        assert!(err.to_string().contains("indicating_mask"));
    }

    #[test]
    fn test_shape_display() {
        assert_eq!(SeriesShape::new(2, 5, 1).to_string(), "(N=2, T=5, F=1)");
    }
}
