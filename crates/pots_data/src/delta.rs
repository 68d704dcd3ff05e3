//! Time-gap ("delta") encoding of missingness masks.
//!
//! For every feature column the encoder records how much time has elapsed
//! since that feature was last observed. Recurrent imputation models use it
//! to decay stale hidden state.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{DataError, Result};

/// Elapsed time between consecutive time steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepGap {
    /// Regularly sampled series with a fixed unit between steps.
    Uniform(f32),
    /// Irregular sampling. `gaps[t]` is the time elapsed between step `t - 1`
    /// and step `t`; `gaps[0]` is unused.
    Irregular(Vec<f32>),
}

impl StepGap {
    /// Build per-step gaps from observation timestamps.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::InvalidStepGap`] if a timestamp is not finite or
    /// the timestamps decrease.
    pub fn from_timestamps(timestamps: &[f32]) -> Result<Self> {
        if let Some(t) = timestamps.iter().position(|v| !v.is_finite()) {
            return Err(DataError::InvalidStepGap(format!(
                "timestamp {t} is not finite"
            )));
        }
        if let Some(t) = timestamps.windows(2).position(|w| w[1] < w[0]) {
            return Err(DataError::InvalidStepGap(format!(
                "timestamps decrease between steps {t} and {}",
                t + 1
            )));
        }
        let mut gaps = Vec::with_capacity(timestamps.len());
        gaps.push(0.0);
        gaps.extend(timestamps.windows(2).map(|w| w[1] - w[0]));
        gaps.truncate(timestamps.len());
        Ok(StepGap::Irregular(gaps))
    }

    /// Gap preceding step `t` (`t >= 1`), `None` past the end of an
    /// irregular sequence.
    #[inline]
    #[must_use]
    pub fn at(&self, t: usize) -> Option<f32> {
        match self {
            StepGap::Uniform(gap) => Some(*gap),
            StepGap::Irregular(gaps) => gaps.get(t).copied(),
        }
    }

    /// Check that every gap is finite and non-negative.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::InvalidStepGap`] naming the first bad gap.
    pub fn validate(&self) -> Result<()> {
        let bad = |gap: f32| !gap.is_finite() || gap < 0.0;
        match self {
            StepGap::Uniform(gap) if bad(*gap) => Err(DataError::InvalidStepGap(format!(
                "uniform gap {gap} must be finite and non-negative"
            ))),
            StepGap::Irregular(gaps) => match gaps.iter().skip(1).position(|&g| bad(g)) {
                Some(t) => Err(DataError::InvalidStepGap(format!(
                    "gap {} before step {} must be finite and non-negative",
                    gaps[t + 1],
                    t + 1
                ))),
                None => Ok(()),
            },
            StepGap::Uniform(_) => Ok(()),
        }
    }

    /// Number of steps the gap sequence covers, `None` when uniform.
    #[must_use]
    pub fn steps(&self) -> Option<usize> {
        match self {
            StepGap::Uniform(_) => None,
            StepGap::Irregular(gaps) => Some(gaps.len()),
        }
    }

    /// Gaps of the same series read back to front.
    ///
    /// Walking backwards, the gap before reversed step `t` is the forward gap
    /// before step `T - t`.
    #[must_use]
    pub fn reversed(&self) -> Self {
        match self {
            StepGap::Uniform(gap) => StepGap::Uniform(*gap),
            StepGap::Irregular(gaps) => {
                let n = gaps.len();
                let mut rev = Vec::with_capacity(n);
                if n > 0 {
                    rev.push(0.0);
                    rev.extend((1..n).map(|t| gaps[n - t]));
                }
                StepGap::Irregular(rev)
            }
        }
    }
}

impl Default for StepGap {
    fn default() -> Self {
        StepGap::Uniform(1.0)
    }
}

/// Encodes a `(T, F)` observation mask into a `(T, F)` time-gap matrix.
///
/// For each feature `f`:
/// - `delta[0, f] = 0`
/// - `delta[t, f] = gap(t)` if step `t - 1` was observed
/// - `delta[t, f] = gap(t) + delta[t - 1, f]` otherwise
///
/// # Example
///
/// ```rust
/// use ndarray::array;
/// use pots_data::DeltaEncoder;
///
/// let mask = array![[1.0], [0.0], [0.0], [1.0], [0.0]];
/// let delta = DeltaEncoder::uniform().encode(mask.view()).unwrap();
/// assert_eq!(delta.column(0).to_vec(), vec![0.0, 1.0, 2.0, 3.0, 1.0]);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeltaEncoder {
    gap: StepGap,
}

impl DeltaEncoder {
    /// Create an encoder with the given gap sequence.
    #[must_use]
    pub fn new(gap: StepGap) -> Self {
        Self { gap }
    }

    /// Encoder for regularly sampled series with unit gaps.
    #[must_use]
    pub fn uniform() -> Self {
        Self::new(StepGap::Uniform(1.0))
    }

    /// The gap sequence used by this encoder.
    #[must_use]
    pub fn gap(&self) -> &StepGap {
        &self.gap
    }

    /// Encoder for the time-reversed view of the same series.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self::new(self.gap.reversed())
    }

    /// Compute the delta matrix for `mask` (1 = observed, 0 = missing).
    ///
    /// The recurrence runs strictly forward in time per column.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::InvalidStepGap`] if an irregular gap sequence
    /// is shorter than the mask.
    pub fn encode(&self, mask: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        let (steps, features) = mask.dim();
        let mut delta = Array2::<f32>::zeros((steps, features));

        for t in 1..steps {
            let gap = self.gap.at(t).ok_or_else(|| {
                DataError::InvalidStepGap(format!("no gap given for step {t} of {steps}"))
            })?;
            for f in 0..features {
                delta[[t, f]] = if mask[[t - 1, f]] > 0.0 {
                    gap
                } else {
                    gap + delta[[t - 1, f]]
                };
            }
        }

        Ok(delta)
    }
}
