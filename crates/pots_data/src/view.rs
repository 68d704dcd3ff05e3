//! Forward and backward views of a partially-observed sample.

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::delta::{DeltaEncoder, StepGap};
use crate::error::{DataError, Result};

/// Options for building sample views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleViewConfig {
    /// Value written at unobserved positions.
    pub fill_value: f32,
    /// Time elapsed between consecutive steps.
    pub step_gap: StepGap,
}

impl Default for SampleViewConfig {
    fn default() -> Self {
        Self {
            fill_value: 0.0,
            step_gap: StepGap::default(),
        }
    }
}

impl SampleViewConfig {
    /// Set the neutral fill value.
    #[must_use]
    pub fn with_fill_value(mut self, fill_value: f32) -> Self {
        self.fill_value = fill_value;
        self
    }

    /// Set the step gap.
    #[must_use]
    pub fn with_step_gap(mut self, step_gap: StepGap) -> Self {
        self.step_gap = step_gap;
        self
    }
}

/// One direction of a sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Position of the sample in its dataset.
    pub index: usize,
    /// Filled observations, `(T, F)`.
    pub x: Array2<f32>,
    /// Observation mask, 1 where observed, `(T, F)`.
    pub mask: Array2<f32>,
    /// Time since last observation, `(T, F)`.
    pub delta: Array2<f32>,
    /// Optional class label.
    pub label: Option<f32>,
}

/// A sample together with its time-reversed counterpart.
///
/// `backward.delta` is computed from the reversed mask, so in general it is
/// not the reverse of `forward.delta`.
#[derive(Debug, Clone, PartialEq)]
pub struct BidirectionalSample {
    /// Original time order.
    pub forward: Sample,
    /// Reversed time order.
    pub backward: Sample,
}

impl BidirectionalSample {
    /// Index of the sample in its dataset.
    #[must_use]
    pub fn index(&self) -> usize {
        self.forward.index
    }

    /// Label carried by the sample, if any.
    #[must_use]
    pub fn label(&self) -> Option<f32> {
        self.forward.label
    }

    /// Copy with the label removed from both directions.
    #[must_use]
    pub fn without_label(mut self) -> Self {
        self.forward.label = None;
        self.backward.label = None;
        self
    }
}

/// Held-out ground truth used to score imputations on validation data.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundTruth {
    /// Complete series with artificially removed values restored, `(T, F)`.
    pub x_intact: Array2<f32>,
    /// 1 where a value was removed for evaluation, `(T, F)`.
    pub indicating_mask: Array2<f32>,
}

/// Builds [`BidirectionalSample`]s from raw `(T, F)` matrices.
///
/// An entry is missing when it is not finite.
///
/// # Example
///
/// ```rust
/// use ndarray::array;
/// use pots_data::{SampleView, SampleViewConfig};
///
/// let view = SampleView::new(SampleViewConfig::default());
/// let raw = array![[1.0], [f32::NAN], [f32::NAN], [4.0], [f32::NAN]];
/// let sample = view.build(0, raw.view()).unwrap();
///
/// assert_eq!(sample.forward.delta.column(0).to_vec(), vec![0.0, 1.0, 2.0, 3.0, 1.0]);
/// assert_eq!(sample.backward.delta.column(0).to_vec(), vec![0.0, 1.0, 1.0, 2.0, 3.0]);
/// ```
#[derive(Debug, Clone)]
pub struct SampleView {
    config: SampleViewConfig,
    forward: DeltaEncoder,
    backward: DeltaEncoder,
}

impl SampleView {
    /// Create a view builder.
    #[must_use]
    pub fn new(config: SampleViewConfig) -> Self {
        let forward = DeltaEncoder::new(config.step_gap.clone());
        let backward = forward.reversed();
        Self {
            config,
            forward,
            backward,
        }
    }

    /// The configuration used by this builder.
    #[must_use]
    pub fn config(&self) -> &SampleViewConfig {
        &self.config
    }

    /// Build the forward and backward views of `raw`.
    ///
    /// # Errors
    ///
    /// - [`DataError::Shape`] if an irregular gap sequence does not cover
    ///   every time step of `raw`.
    /// - [`DataError::InvalidStepGap`] if a gap is negative or not finite.
    pub fn build(&self, index: usize, raw: ArrayView2<'_, f32>) -> Result<BidirectionalSample> {
        self.check_gaps(raw.nrows())?;

        let mask = raw.mapv(observed);
        let fill = self.config.fill_value;
        let x = raw.mapv(|v| if v.is_finite() { v } else { fill });
        let delta = self.forward.encode(mask.view())?;

        let back_x = reversed_in_time(x.view());
        let back_mask = reversed_in_time(mask.view());
        let back_delta = self.backward.encode(back_mask.view())?;

        Ok(BidirectionalSample {
            forward: Sample {
                index,
                x,
                mask,
                delta,
                label: None,
            },
            backward: Sample {
                index,
                x: back_x,
                mask: back_mask,
                delta: back_delta,
                label: None,
            },
        })
    }

    /// Build views of `raw` after checking that the ground-truth arrays
    /// share its extent.
    ///
    /// `x_intact` is filled like `raw`. The indicating mask marks entries
    /// that are missing in `raw` but present in `x_intact`.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Shape`] when any extent differs from `raw`.
    pub fn build_with_ground_truth(
        &self,
        index: usize,
        raw: ArrayView2<'_, f32>,
        x_intact: ArrayView2<'_, f32>,
        indicating_mask: Option<ArrayView2<'_, f32>>,
    ) -> Result<(BidirectionalSample, GroundTruth)> {
        ensure_extent(raw, x_intact, "X_intact")?;
        if let Some(ind) = indicating_mask {
            ensure_extent(raw, ind, "indicating_mask")?;
        }

        let sample = self.build(index, raw)?;
        let fill = self.config.fill_value;
        let indicating_mask = match indicating_mask {
            Some(ind) => ind.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            None => ndarray::Zip::from(&raw)
                .and(&x_intact)
                .map_collect(|&r, &i| (!r.is_finite() && i.is_finite()) as u8 as f32),
        };
        let truth = GroundTruth {
            x_intact: x_intact.mapv(|v| if v.is_finite() { v } else { fill }),
            indicating_mask,
        };
        Ok((sample, truth))
    }

    fn check_gaps(&self, steps: usize) -> Result<()> {
        self.config.step_gap.validate()?;
        match self.config.step_gap.steps() {
            Some(n) if n != steps => Err(DataError::Shape(format!(
                "step gaps cover {n} steps but the sample has {steps}"
            ))),
            _ => Ok(()),
        }
    }
}

impl Default for SampleView {
    fn default() -> Self {
        Self::new(SampleViewConfig::default())
    }
}

#[inline]
fn observed(v: f32) -> f32 {
    if v.is_finite() {
        1.0
    } else {
        0.0
    }
}

fn ensure_extent(x: ArrayView2<'_, f32>, other: ArrayView2<'_, f32>, what: &str) -> Result<()> {
    if x.dim() == other.dim() {
        return Ok(());
    }
    let (t, f) = x.dim();
    let (ot, of) = other.dim();
    Err(DataError::Shape(format!(
        "{what} has extent (T={ot}, F={of}) but X has (T={t}, F={f})"
    )))
}

/// Reverse `a` along its time axis (axis 0 for a `(T, F)` matrix).
#[must_use]
pub fn reversed_in_time(a: ArrayView2<'_, f32>) -> Array2<f32> {
    let mut out = a.to_owned();
    out.invert_axis(Axis(0));
    out
}
