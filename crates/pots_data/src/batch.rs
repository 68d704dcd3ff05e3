//! Collation of dataset items into batches.

use std::ops::Range;

use burn::prelude::*;
use ndarray::{s, Array1, Array3, Axis};
use pots_core::SeriesShape;

use crate::dataset::DatasetItem;
use crate::error::{DataError, Result};

/// One direction of a batch, each array `(B, T, F)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionBatch {
    /// Filled observations.
    pub x: Array3<f32>,
    /// Observation mask.
    pub mask: Array3<f32>,
    /// Time since last observation.
    pub delta: Array3<f32>,
}

impl DirectionBatch {
    fn slice(&self, range: Range<usize>) -> Self {
        Self {
            x: self.x.slice(s![range.clone(), .., ..]).to_owned(),
            mask: self.mask.slice(s![range.clone(), .., ..]).to_owned(),
            delta: self.delta.slice(s![range, .., ..]).to_owned(),
        }
    }
}

/// Ground-truth arrays of a batch, each `(B, T, F)`.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundTruthBatch {
    /// Complete series.
    pub x_intact: Array3<f32>,
    /// 1 where a value was held out for evaluation.
    pub indicating_mask: Array3<f32>,
}

/// A batch of bidirectional samples held in host memory.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    /// Dataset index of every row, in batch order.
    pub indices: Vec<usize>,
    /// Forward views.
    pub forward: DirectionBatch,
    /// Backward views.
    pub backward: DirectionBatch,
    /// Labels, present only when every item carries one.
    pub labels: Option<Array1<f32>>,
    /// Ground truth, present only when every item carries it.
    pub ground_truth: Option<GroundTruthBatch>,
}

impl SampleBatch {
    /// Stack items into a batch.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::EmptyDataset`] for no items and
    /// [`DataError::Shape`] when items disagree on extent.
    pub fn collate(items: Vec<DatasetItem>) -> Result<Self> {
        let first = items.first().ok_or(DataError::EmptyDataset)?;
        let (t, f) = first.sample.forward.x.dim();
        let b = items.len();

        let mut fwd = empty_direction(b, t, f);
        let mut bwd = empty_direction(b, t, f);
        let mut labels = Vec::with_capacity(b);
        let mut truth = first
            .ground_truth
            .as_ref()
            .map(|_| (Array3::<f32>::zeros((b, t, f)), Array3::<f32>::zeros((b, t, f))));
        let mut indices = Vec::with_capacity(b);

        for (row, item) in items.iter().enumerate() {
            let sample = &item.sample;
            if sample.forward.x.dim() != (t, f) {
                return Err(DataError::Shape(format!(
                    "item {} has extent {:?}, batch expects {:?}",
                    sample.index(),
                    sample.forward.x.dim(),
                    (t, f)
                )));
            }
            indices.push(sample.index());
            fwd.x.index_axis_mut(Axis(0), row).assign(&sample.forward.x);
            fwd.mask.index_axis_mut(Axis(0), row).assign(&sample.forward.mask);
            fwd.delta.index_axis_mut(Axis(0), row).assign(&sample.forward.delta);
            bwd.x.index_axis_mut(Axis(0), row).assign(&sample.backward.x);
            bwd.mask.index_axis_mut(Axis(0), row).assign(&sample.backward.mask);
            bwd.delta.index_axis_mut(Axis(0), row).assign(&sample.backward.delta);
            labels.push(sample.label());

            truth = match (truth, &item.ground_truth) {
                (Some((mut intact, mut ind)), Some(gt)) => {
                    intact.index_axis_mut(Axis(0), row).assign(&gt.x_intact);
                    ind.index_axis_mut(Axis(0), row).assign(&gt.indicating_mask);
                    Some((intact, ind))
                }
                _ => None,
            };
        }

        let labels = labels
            .into_iter()
            .collect::<Option<Vec<f32>>>()
            .map(Array1::from);

        Ok(Self {
            indices,
            forward: fwd,
            backward: bwd,
            labels,
            ground_truth: truth.map(|(x_intact, indicating_mask)| GroundTruthBatch {
                x_intact,
                indicating_mask,
            }),
        })
    }

    /// Number of samples in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Check if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Shape as `(B, T, F)`.
    #[must_use]
    pub fn shape(&self) -> SeriesShape {
        let (b, t, f) = self.forward.x.dim();
        SeriesShape::new(b, t, f)
    }

    /// Copy out the rows in `range`.
    #[must_use]
    pub fn slice(&self, range: Range<usize>) -> Self {
        Self {
            indices: self.indices[range.clone()].to_vec(),
            forward: self.forward.slice(range.clone()),
            backward: self.backward.slice(range.clone()),
            labels: self
                .labels
                .as_ref()
                .map(|y| y.slice(s![range.clone()]).to_owned()),
            ground_truth: self.ground_truth.as_ref().map(|g| GroundTruthBatch {
                x_intact: g.x_intact.slice(s![range.clone(), .., ..]).to_owned(),
                indicating_mask: g.indicating_mask.slice(s![range.clone(), .., ..]).to_owned(),
            }),
        }
    }

    /// Split into contiguous shards of the given sizes, skipping empty ones.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::InvalidBatchSize`] when the sizes do not add up
    /// to the batch length.
    pub fn shard(&self, sizes: &[usize]) -> Result<Vec<Self>> {
        let total: usize = sizes.iter().sum();
        if total != self.len() {
            return Err(DataError::InvalidBatchSize(format!(
                "shards cover {total} samples but the batch has {}",
                self.len()
            )));
        }
        let mut start = 0;
        let mut shards = Vec::with_capacity(sizes.len());
        for &size in sizes {
            if size > 0 {
                shards.push(self.slice(start..start + size));
            }
            start += size;
        }
        Ok(shards)
    }
}

fn empty_direction(b: usize, t: usize, f: usize) -> DirectionBatch {
    DirectionBatch {
        x: Array3::zeros((b, t, f)),
        mask: Array3::zeros((b, t, f)),
        delta: Array3::zeros((b, t, f)),
    }
}

/// Copy a host array onto `device` as a rank-3 tensor.
#[must_use]
pub fn to_tensor3<B: Backend>(array: &Array3<f32>, device: &B::Device) -> Tensor<B, 3> {
    let (b, t, f) = array.dim();
    let flat: Vec<f32> = array.iter().copied().collect();
    Tensor::<B, 1>::from_floats(flat.as_slice(), device).reshape([b, t, f])
}

/// Copy a host vector onto `device` as a rank-1 tensor.
#[must_use]
pub fn to_tensor1<B: Backend>(array: &Array1<f32>, device: &B::Device) -> Tensor<B, 1> {
    let flat: Vec<f32> = array.iter().copied().collect();
    Tensor::<B, 1>::from_floats(flat.as_slice(), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::PotsDataset;
    use burn_ndarray::NdArray;
    use ndarray::Array3;

    fn batch(n: usize) -> SampleBatch {
        let x = Array3::from_shape_fn((n, 4, 2), |(i, t, f)| {
            if t == 1 && f == 0 {
                f32::NAN
            } else {
                (i * 10 + t) as f32
            }
        });
        let y = ndarray::Array1::from_shape_fn(n, |i| i as f32);
        let ds = PotsDataset::from_arrays(x, Some(y)).unwrap();
        let items = (0..n).rev().map(|i| ds.get(i).unwrap()).collect();
        SampleBatch::collate(items).unwrap()
    }

    #[test]
    fn test_collate_keeps_item_order() {
        let b = batch(3);
        assert_eq!(b.indices, vec![2, 1, 0]);
        assert_eq!(b.shape(), SeriesShape::new(3, 4, 2));
        assert_eq!(b.labels.as_ref().unwrap().to_vec(), vec![2.0, 1.0, 0.0]);
        assert_eq!(b.forward.mask[[0, 1, 0]], 0.0);
        assert_eq!(b.backward.x[[0, 0, 1]], 23.0);
        assert!(b.ground_truth.is_none());
    }

    #[test]
    fn test_collate_empty() {
        assert!(matches!(SampleBatch::collate(Vec::new()), Err(DataError::EmptyDataset)));
    }

    #[test]
    fn test_shard_sizes() {
        let b = batch(5);
        let shards = b.shard(&[3, 2, 0]).unwrap();
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0].indices, vec![4, 3, 2]);
        assert_eq!(shards[1].labels.as_ref().unwrap().to_vec(), vec![1.0, 0.0]);
        assert!(b.shard(&[2, 2]).is_err());
    }

    #[test]
    fn test_to_tensor_preserves_layout() {
        let b = batch(2);
        let device = Default::default();
        let tensor = to_tensor3::<NdArray>(&b.forward.x, &device);
        assert_eq!(tensor.dims(), [2, 4, 2]);
        let values: Vec<f32> = tensor.into_data().to_vec().unwrap();
        assert_eq!(values, b.forward.x.iter().copied().collect::<Vec<_>>());
    }
}
