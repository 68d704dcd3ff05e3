//! Datasets of partially-observed series.

use std::sync::Arc;

use ndarray::{Array1, Array3, Axis};
use pots_core::SeriesShape;
use rayon::prelude::*;

use crate::error::{DataError, Result};
use crate::source::{keys, NamedArrays};
use crate::store::{ArrayStore, StoreHandle};
use crate::view::{BidirectionalSample, GroundTruth, SampleView, SampleViewConfig};

/// One indexed item of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetItem {
    /// Forward and backward views. Labels are attached only when the
    /// dataset returns labels.
    pub sample: BidirectionalSample,
    /// Held-out ground truth, when the source carries it.
    pub ground_truth: Option<GroundTruth>,
}

impl DatasetItem {
    /// Index of the item in its dataset.
    #[must_use]
    pub fn index(&self) -> usize {
        self.sample.index()
    }
}

#[derive(Debug)]
struct EagerData {
    samples: Vec<BidirectionalSample>,
    ground_truth: Option<Vec<GroundTruth>>,
    labels: Option<Array1<f32>>,
}

#[derive(Debug, Clone)]
enum Backing {
    Eager(Arc<EagerData>),
    Lazy(Arc<dyn ArrayStore>),
}

/// A dataset of partially-observed series.
///
/// Two backing modes share one interface:
/// - *eager*: arrays are resident and every sample view is computed once
///   at construction;
/// - *lazy*: arrays stay in an [`ArrayStore`]; each [`DatasetWorker`] opens
///   its own handle on first access and builds views on demand.
///
/// Both modes yield identical items for the same index. Cloning is cheap
/// and shares the underlying data.
///
/// # Example
///
/// ```rust,ignore
/// use pots_data::{NamedArrays, PotsDataset, SampleViewConfig};
///
/// let train = PotsDataset::eager(NamedArrays::from_arrays(x, None), SampleViewConfig::default())?;
/// let item = train.get(0)?;
/// assert_eq!(item.sample.forward.x.dim(), (48, 35));
/// ```
#[derive(Debug, Clone)]
pub struct PotsDataset {
    backing: Backing,
    view: Arc<SampleView>,
    shape: SeriesShape,
    has_labels: bool,
    has_ground_truth: bool,
    return_labels: bool,
}

impl PotsDataset {
    /// Build an eager dataset, computing every sample view up front.
    ///
    /// # Errors
    ///
    /// - [`DataError::Schema`] if `X` is absent, or `indicating_mask` is
    ///   given without `X_intact`.
    /// - [`DataError::Shape`] if any array disagrees with the extent of `X`.
    pub fn eager(mut arrays: NamedArrays, config: SampleViewConfig) -> Result<Self> {
        let shape = arrays.shape()?;
        let x = arrays
            .take_series(keys::X, shape)?
            .ok_or_else(|| DataError::schema(keys::X, "in-memory arrays"))?;
        let x_intact = arrays.take_series(keys::X_INTACT, shape)?;
        let indicating = arrays.take_series(keys::INDICATING_MASK, shape)?;
        if indicating.is_some() && x_intact.is_none() {
            return Err(DataError::schema(keys::X_INTACT, "in-memory arrays"));
        }
        let labels = arrays.take_labels(shape.samples())?;

        let view = SampleView::new(config);
        let (samples, ground_truth) = match &x_intact {
            Some(intact) => {
                let built = (0..shape.samples())
                    .into_par_iter()
                    .map(|i| {
                        view.build_with_ground_truth(
                            i,
                            x.index_axis(Axis(0), i),
                            intact.index_axis(Axis(0), i),
                            indicating.as_ref().map(|m| m.index_axis(Axis(0), i)),
                        )
                    })
                    .collect::<Result<Vec<_>>>()?;
                let (samples, truth): (Vec<_>, Vec<_>) = built.into_iter().unzip();
                (samples, Some(truth))
            }
            None => {
                let samples = build_all(&view, &x)?;
                (samples, None)
            }
        };

        tracing::debug!(%shape, labels = labels.is_some(), "built eager dataset");

        Ok(Self {
            has_labels: labels.is_some(),
            has_ground_truth: ground_truth.is_some(),
            backing: Backing::Eager(Arc::new(EagerData {
                samples,
                ground_truth,
                labels,
            })),
            view: Arc::new(view),
            shape,
            return_labels: true,
        })
    }

    /// Convenience constructor for an eager dataset from a feature array.
    pub fn from_arrays(x: Array3<f32>, y: Option<Array1<f32>>) -> Result<Self> {
        Self::eager(NamedArrays::from_arrays(x, y), SampleViewConfig::default())
    }

    /// Build a lazy dataset over `store`.
    ///
    /// Only the store layout is read here; no handle is kept open. The
    /// layout is checked the same way [`PotsDataset::eager`] checks its
    /// arrays, so a store rejected eagerly is rejected here too.
    ///
    /// # Errors
    ///
    /// - [`DataError::Schema`] if the store has no `X` array, or
    ///   `indicating_mask` without `X_intact`.
    /// - [`DataError::Shape`] if any array disagrees with the extent of `X`.
    pub fn lazy<S: ArrayStore + 'static>(store: S, config: SampleViewConfig) -> Result<Self> {
        let layout = store.inspect()?;
        layout.validate(&store.describe())?;
        tracing::debug!(store = %store.describe(), shape = %layout.shape, "opened lazy dataset");
        Ok(Self {
            has_labels: layout.contains(keys::Y),
            has_ground_truth: layout.contains(keys::X_INTACT),
            backing: Backing::Lazy(Arc::new(store)),
            view: Arc::new(SampleView::new(config)),
            shape: layout.shape,
            return_labels: true,
        })
    }

    /// Return a copy that includes or omits labels in its items.
    #[must_use]
    pub fn with_return_labels(mut self, return_labels: bool) -> Self {
        self.return_labels = return_labels;
        self
    }

    /// Whether items carry labels.
    #[must_use]
    pub fn returns_labels(&self) -> bool {
        self.return_labels && self.has_labels
    }

    /// Whether the source has labels at all.
    #[must_use]
    pub fn has_labels(&self) -> bool {
        self.has_labels
    }

    /// Whether items carry ground truth for evaluation.
    #[must_use]
    pub fn has_ground_truth(&self) -> bool {
        self.has_ground_truth
    }

    /// Whether samples are read from a backing store on demand.
    #[must_use]
    pub fn is_lazy(&self) -> bool {
        matches!(self.backing, Backing::Lazy(_))
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shape.samples()
    }

    /// Check if the dataset is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shape as `(N, T, F)`.
    #[must_use]
    pub fn shape(&self) -> SeriesShape {
        self.shape
    }

    /// Create a worker context with its own store handle.
    ///
    /// For lazy datasets the handle is opened on the worker's first access
    /// and closed when the worker is dropped.
    #[must_use]
    pub fn worker(&self, id: usize) -> DatasetWorker {
        DatasetWorker {
            id,
            dataset: self.clone(),
            handle: None,
        }
    }

    /// Get one item.
    ///
    /// Lazy datasets open and close a handle for this call; use
    /// [`PotsDataset::worker`] when reading many items.
    pub fn get(&self, index: usize) -> Result<DatasetItem> {
        self.worker(0).get(index)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.len() {
            return Err(DataError::IndexOutOfBounds {
                index,
                length: self.len(),
            });
        }
        Ok(())
    }

    fn attach_label(&self, mut sample: BidirectionalSample, label: Option<f32>) -> BidirectionalSample {
        if self.return_labels {
            sample.forward.label = label;
            sample.backward.label = label;
        }
        sample
    }
}

fn build_all(view: &SampleView, x: &Array3<f32>) -> Result<Vec<BidirectionalSample>> {
    (0..x.len_of(Axis(0)))
        .into_par_iter()
        .map(|i| view.build(i, x.index_axis(Axis(0), i)))
        .collect()
}

/// A per-worker read context over a [`PotsDataset`].
///
/// Owns the worker's private store handle. The handle is opened on first
/// use and released on drop; it is never shared with another worker.
pub struct DatasetWorker {
    id: usize,
    dataset: PotsDataset,
    handle: Option<Box<dyn StoreHandle>>,
}

impl DatasetWorker {
    /// Worker identifier.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Whether this worker currently holds an open store handle.
    #[must_use]
    pub fn has_open_handle(&self) -> bool {
        self.handle.is_some()
    }

    /// Get one item.
    pub fn get(&mut self, index: usize) -> Result<DatasetItem> {
        self.dataset.check_index(index)?;
        match &self.dataset.backing {
            Backing::Eager(data) => {
                let label = data.labels.as_ref().map(|y| y[index]);
                Ok(DatasetItem {
                    sample: self.dataset.attach_label(data.samples[index].clone(), label),
                    ground_truth: data.ground_truth.as_ref().map(|g| g[index].clone()),
                })
            }
            Backing::Lazy(store) => {
                if self.handle.is_none() {
                    tracing::debug!(worker = self.id, store = %store.describe(), "opening store handle");
                    self.handle = Some(store.open()?);
                }
                let Some(handle) = self.handle.as_mut() else {
                    return Err(DataError::Store("store handle unavailable".to_string()));
                };
                read_lazy(&self.dataset, handle.as_mut(), index)
            }
        }
    }
}

impl Drop for DatasetWorker {
    fn drop(&mut self) {
        if self.handle.take().is_some() {
            tracing::debug!(worker = self.id, "closed store handle");
        }
    }
}

fn read_lazy(dataset: &PotsDataset, handle: &mut dyn StoreHandle, index: usize) -> Result<DatasetItem> {
    let raw = handle.read_series(keys::X, index)?;
    let (sample, ground_truth) = if dataset.has_ground_truth {
        let intact = handle.read_series(keys::X_INTACT, index)?;
        let indicating = match handle.read_series(keys::INDICATING_MASK, index) {
            Ok(m) => Some(m),
            Err(DataError::Schema { .. }) => None,
            Err(e) => return Err(e),
        };
        let (sample, truth) = dataset.view.build_with_ground_truth(
            index,
            raw.view(),
            intact.view(),
            indicating.as_ref().map(|m| m.view()),
        )?;
        (sample, Some(truth))
    } else {
        (dataset.view.build(index, raw.view())?, None)
    };

    let label = if dataset.returns_labels() {
        handle.read_label(index)?
    } else {
        None
    };

    Ok(DatasetItem {
        sample: dataset.attach_label(sample, label),
        ground_truth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npy::NpyDirStore;
    use crate::store::MemoryStore;
    use ndarray::{Array1, Array3};
    use ndarray_npy::write_npy;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;

    fn synthetic(n: usize, t: usize, f: usize) -> (Array3<f32>, Array1<f32>) {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let x = Array3::from_shape_fn((n, t, f), |_| {
            if rng.gen_bool(0.3) {
                f32::NAN
            } else {
                rng.gen_range(-2.0..2.0)
            }
        });
        let y = Array1::from_shape_fn(n, |i| (i % 3) as f32);
        (x, y)
    }

    #[test]
    fn test_eager_requires_x() {
        let arrays = NamedArrays::new().with(keys::Y, Array1::<f32>::zeros(2).into_dyn());
        let err = PotsDataset::eager(arrays, SampleViewConfig::default()).unwrap_err();
        assert!(matches!(err, DataError::Schema { key, .. } if key == "X"));
    }

    #[test]
    fn test_eager_rejects_mismatched_ground_truth() {
        let (x, _) = synthetic(4, 6, 2);
        let arrays = NamedArrays::from_arrays(x, None)
            .with(keys::X_INTACT, Array3::<f32>::zeros((4, 6, 3)).into_dyn());
        assert!(matches!(
            PotsDataset::eager(arrays, SampleViewConfig::default()),
            Err(DataError::Shape(_))
        ));
    }

    #[test]
    fn test_return_labels_flag() {
        let (x, y) = synthetic(6, 5, 2);
        let ds = PotsDataset::from_arrays(x, Some(y)).unwrap();
        assert_eq!(ds.get(4).unwrap().sample.label(), Some(1.0));

        let blind = ds.with_return_labels(false);
        assert!(!blind.returns_labels());
        assert_eq!(blind.get(4).unwrap().sample.label(), None);
    }

    #[test]
    fn test_index_out_of_bounds() {
        let (x, _) = synthetic(3, 4, 1);
        let ds = PotsDataset::from_arrays(x, None).unwrap();
        assert!(matches!(
            ds.get(3),
            Err(DataError::IndexOutOfBounds { index: 3, length: 3 })
        ));
    }

    #[test]
    fn test_lazy_rejects_what_eager_rejects() {
        let (x, _) = synthetic(5, 4, 2);
        let short_y = Array1::from(vec![0.0f32, 1.0, 0.0]);

        let dir = tempfile::tempdir().unwrap();
        write_npy(dir.path().join("X.npy"), &x).unwrap();
        write_npy(dir.path().join("y.npy"), &short_y).unwrap();

        let arrays = NamedArrays::from_arrays(x, Some(short_y));
        assert!(matches!(
            PotsDataset::eager(arrays.clone(), SampleViewConfig::default()),
            Err(DataError::Shape(_))
        ));
        assert!(matches!(
            PotsDataset::lazy(MemoryStore::new(arrays), SampleViewConfig::default()),
            Err(DataError::Shape(_))
        ));
        assert!(matches!(
            PotsDataset::lazy(NpyDirStore::new(dir.path()), SampleViewConfig::default()),
            Err(DataError::Shape(_))
        ));
    }

    #[test]
    fn test_lazy_reads_fortran_ordered_store() {
        use ndarray::ShapeBuilder;

        let mut x = Array3::<f32>::zeros((3, 4, 2).f());
        x[[1, 2, 0]] = f32::NAN;
        x[[2, 3, 1]] = 4.5;
        let dir = tempfile::tempdir().unwrap();
        write_npy(dir.path().join("X.npy"), &x).unwrap();

        let lazy = PotsDataset::lazy(NpyDirStore::new(dir.path()), SampleViewConfig::default()).unwrap();
        let eager = PotsDataset::from_arrays(x.as_standard_layout().to_owned(), None).unwrap();
        assert_eq!(lazy.shape(), eager.shape());
        for i in 0..eager.len() {
            assert_eq!(lazy.get(i).unwrap(), eager.get(i).unwrap());
        }
        assert_eq!(lazy.get(1).unwrap().sample.forward.mask[[2, 0]], 0.0);
    }

    #[test]
    fn test_eager_and_lazy_items_match() {
        let (x, y) = synthetic(12, 9, 4);
        let intact = x.mapv(|v| if v.is_nan() { 0.5 } else { v });

        let dir = tempfile::tempdir().unwrap();
        write_npy(dir.path().join("X.npy"), &x).unwrap();
        write_npy(dir.path().join("y.npy"), &y).unwrap();
        write_npy(dir.path().join("X_intact.npy"), &intact).unwrap();

        let arrays = NamedArrays::from_arrays(x, Some(y)).with(keys::X_INTACT, intact.into_dyn());
        let eager = PotsDataset::eager(arrays.clone(), SampleViewConfig::default()).unwrap();
        let lazy = PotsDataset::lazy(NpyDirStore::new(dir.path()), SampleViewConfig::default()).unwrap();
        let in_memory = PotsDataset::lazy(MemoryStore::new(arrays), SampleViewConfig::default()).unwrap();

        assert!(lazy.is_lazy() && !eager.is_lazy());
        assert_eq!(lazy.len(), eager.len());

        let mut worker = lazy.worker(1);
        let mut mem_worker = in_memory.worker(2);
        assert!(!worker.has_open_handle());
        for i in 0..eager.len() {
            let expected = eager.get(i).unwrap();
            assert_eq!(worker.get(i).unwrap(), expected);
            assert_eq!(mem_worker.get(i).unwrap(), expected);
        }
        assert!(worker.has_open_handle());
    }
}
