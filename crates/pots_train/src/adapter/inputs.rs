//! Assembly of host batches into per-model tensor inputs.

use burn::prelude::*;
use pots_data::{to_tensor1, to_tensor3, DirectionBatch, SampleBatch};
use serde::{Deserialize, Serialize};

/// Input layout a model family expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    /// Forward and backward views, `(B, T, F)`, for bidirectional recurrent models.
    #[default]
    Bidirectional,
    /// Observed data and masks permuted to `(B, F, T)`, for attention and
    /// diffusion models.
    Masked,
}

/// One direction of a batch on a device, each tensor `(B, T, F)`.
#[derive(Debug, Clone)]
pub struct DirectionTensors<B: Backend> {
    /// Filled observations.
    pub x: Tensor<B, 3>,
    /// Observation mask.
    pub mask: Tensor<B, 3>,
    /// Time since last observation.
    pub delta: Tensor<B, 3>,
}

impl<B: Backend> DirectionTensors<B> {
    fn from_host(direction: &DirectionBatch, device: &B::Device) -> Self {
        Self {
            x: to_tensor3(&direction.x, device),
            mask: to_tensor3(&direction.mask, device),
            delta: to_tensor3(&direction.delta, device),
        }
    }
}

/// Held-out ground truth on a device, in the layout of the inputs it accompanies.
#[derive(Debug, Clone)]
pub struct GroundTruthTensors<B: Backend> {
    /// Complete series.
    pub x_intact: Tensor<B, 3>,
    /// 1 where a value was held out.
    pub indicating_mask: Tensor<B, 3>,
}

/// Inputs for one forward pass.
#[derive(Debug, Clone)]
pub enum ModelInputs<B: Backend> {
    /// Forward and time-reversed views.
    Bidirectional {
        /// Forward view.
        forward: DirectionTensors<B>,
        /// Backward view with recomputed deltas.
        backward: DirectionTensors<B>,
        /// Labels, when the dataset returns them.
        labels: Option<Tensor<B, 1>>,
        /// Ground truth, when present.
        ground_truth: Option<GroundTruthTensors<B>>,
    },
    /// Features-first observed data.
    Masked {
        /// Filled observations, `(B, F, T)`.
        observed_data: Tensor<B, 3>,
        /// Observation mask, `(B, F, T)`.
        observed_mask: Tensor<B, 3>,
        /// Entries observed in the complete series: the observation mask
        /// plus held-out entries, `(B, F, T)`.
        gt_mask: Tensor<B, 3>,
        /// Labels, when the dataset returns them.
        labels: Option<Tensor<B, 1>>,
        /// Ground truth, `(B, F, T)`, when present.
        ground_truth: Option<GroundTruthTensors<B>>,
    },
}

impl<B: Backend> ModelInputs<B> {
    /// Labels, if any.
    pub fn labels(&self) -> Option<&Tensor<B, 1>> {
        match self {
            ModelInputs::Bidirectional { labels, .. } | ModelInputs::Masked { labels, .. } => {
                labels.as_ref()
            }
        }
    }

    /// Ground truth, if any.
    pub fn ground_truth(&self) -> Option<&GroundTruthTensors<B>> {
        match self {
            ModelInputs::Bidirectional { ground_truth, .. }
            | ModelInputs::Masked { ground_truth, .. } => ground_truth.as_ref(),
        }
    }
}

impl InputKind {
    /// Copy `batch` onto `device` in this layout.
    pub fn assemble<B: Backend>(&self, batch: &SampleBatch, device: &B::Device) -> ModelInputs<B> {
        let labels = batch.labels.as_ref().map(|y| to_tensor1(y, device));
        let truth = batch.ground_truth.as_ref().map(|gt| GroundTruthTensors::<B> {
            x_intact: to_tensor3(&gt.x_intact, device),
            indicating_mask: to_tensor3(&gt.indicating_mask, device),
        });

        match self {
            InputKind::Bidirectional => ModelInputs::Bidirectional {
                forward: DirectionTensors::from_host(&batch.forward, device),
                backward: DirectionTensors::from_host(&batch.backward, device),
                labels,
                ground_truth: truth,
            },
            InputKind::Masked => {
                let observed_data = to_tensor3::<B>(&batch.forward.x, device).swap_dims(1, 2);
                let observed_mask = to_tensor3::<B>(&batch.forward.mask, device).swap_dims(1, 2);
                let ground_truth = truth.map(|gt| GroundTruthTensors {
                    x_intact: gt.x_intact.swap_dims(1, 2),
                    indicating_mask: gt.indicating_mask.swap_dims(1, 2),
                });
                let gt_mask = match &ground_truth {
                    Some(gt) => observed_mask.clone() + gt.indicating_mask.clone(),
                    None => observed_mask.clone(),
                };
                ModelInputs::Masked {
                    observed_data,
                    observed_mask,
                    gt_mask,
                    labels,
                    ground_truth,
                }
            }
        }
    }
}
