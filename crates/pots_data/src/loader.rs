//! Batched iteration with optional background workers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use pots_core::{Seed, Stage};

use crate::batch::SampleBatch;
use crate::dataset::{DatasetWorker, PotsDataset};
use crate::error::{DataError, Result};
use crate::sampler::{RandomSampler, Sampler, SequentialSampler};

/// Batches prefetched per worker.
const PREFETCH_PER_WORKER: usize = 2;

type BatchMessage = (usize, Result<SampleBatch>);

/// A dataloader producing [`SampleBatch`]es from a [`PotsDataset`].
///
/// With `num_workers == 0` batches are built on the calling thread. With
/// `n > 0` workers, each worker thread owns a [`DatasetWorker`] (and so its
/// own store handle) and builds every `n`-th batch ahead of consumption.
/// Batches are always yielded in plan order, so unshuffled loaders preserve
/// the dataset order.
///
/// # Example
///
/// ```rust,ignore
/// use pots_core::{Seed, Stage};
/// use pots_data::{PotsDataLoader, PotsDataset};
///
/// let loader = PotsDataLoader::builder(train_set)
///     .batch_size(32)
///     .stage(Stage::Train)
///     .num_workers(4)
///     .seed(Seed::new(42))
///     .build()?;
///
/// for batch in loader.epoch(0) {
///     let batch = batch?;
/// }
/// ```
pub struct PotsDataLoader {
    dataset: PotsDataset,
    batch_size: usize,
    drop_last: bool,
    num_workers: usize,
    stage: Stage,
    shuffle: bool,
    sampler: Box<dyn Sampler>,
}

impl std::fmt::Debug for PotsDataLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PotsDataLoader")
            .field("len", &self.dataset.len())
            .field("batch_size", &self.batch_size)
            .field("drop_last", &self.drop_last)
            .field("num_workers", &self.num_workers)
            .field("stage", &self.stage)
            .field("shuffle", &self.shuffle)
            .finish()
    }
}

impl PotsDataLoader {
    /// Create a new dataloader builder.
    #[must_use]
    pub fn builder(dataset: PotsDataset) -> PotsDataLoaderBuilder {
        PotsDataLoaderBuilder::new(dataset)
    }

    /// Get the dataset.
    #[must_use]
    pub fn dataset(&self) -> &PotsDataset {
        &self.dataset
    }

    /// Get the batch size.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of background workers.
    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Stage this loader serves.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Whether the sample order changes between epochs.
    #[must_use]
    pub fn shuffles(&self) -> bool {
        self.shuffle
    }

    /// Whether the last incomplete batch is dropped.
    #[must_use]
    pub fn drops_last(&self) -> bool {
        self.drop_last
    }

    /// Get the number of batches per epoch.
    #[must_use]
    pub fn n_batches(&self) -> usize {
        let n = self.dataset.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    /// Get the total number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    /// Check if the loader is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Iterate the batches of epoch 0.
    #[must_use]
    pub fn iter(&self) -> LoaderIter {
        self.epoch(0)
    }

    /// Iterate the batches of `epoch`.
    ///
    /// Shuffled loaders draw a fresh order per epoch.
    #[must_use]
    pub fn epoch(&self, epoch: usize) -> LoaderIter {
        let order = self.sampler.indices(self.dataset.len(), epoch);
        let plan: Vec<Vec<usize>> = order
            .chunks(self.batch_size)
            .take(self.n_batches())
            .map(<[usize]>::to_vec)
            .collect();
        LoaderIter::start(&self.dataset, Arc::new(plan), self.num_workers)
    }
}

/// Builder for [`PotsDataLoader`].
pub struct PotsDataLoaderBuilder {
    dataset: PotsDataset,
    batch_size: usize,
    shuffle: Option<bool>,
    drop_last: bool,
    num_workers: usize,
    seed: Option<Seed>,
    stage: Stage,
}

impl PotsDataLoaderBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new(dataset: PotsDataset) -> Self {
        Self {
            dataset,
            batch_size: 32,
            shuffle: None,
            drop_last: false,
            num_workers: 0,
            seed: None,
            stage: Stage::Train,
        }
    }

    /// Set the batch size.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Override the stage's default shuffling.
    #[must_use]
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = Some(shuffle);
        self
    }

    /// Enable or disable dropping the last incomplete batch.
    #[must_use]
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Number of background workers, 0 to load on the calling thread.
    #[must_use]
    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Set the random seed for shuffling.
    #[must_use]
    pub fn seed(mut self, seed: Seed) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the stage. Training shuffles by default; other stages keep order.
    #[must_use]
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    /// Build the dataloader.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch size is zero or the dataset is empty.
    pub fn build(self) -> Result<PotsDataLoader> {
        if self.batch_size == 0 {
            return Err(DataError::InvalidBatchSize(
                "Batch size must be greater than 0".to_string(),
            ));
        }

        if self.dataset.is_empty() {
            return Err(DataError::EmptyDataset);
        }

        let shuffle = self.shuffle.unwrap_or_else(|| self.stage.shuffles());
        let sampler: Box<dyn Sampler> = match (shuffle, self.seed) {
            (false, _) => Box::new(SequentialSampler),
            (true, Some(seed)) => Box::new(RandomSampler::new(seed)),
            (true, None) => Box::new(RandomSampler::from_entropy()),
        };

        Ok(PotsDataLoader {
            dataset: self.dataset,
            batch_size: self.batch_size,
            drop_last: self.drop_last,
            num_workers: self.num_workers,
            stage: self.stage,
            shuffle,
            sampler,
        })
    }
}

/// Iterator over the batches of one epoch.
///
/// Dropping it stops and joins any worker threads.
pub struct LoaderIter {
    plan: Arc<Vec<Vec<usize>>>,
    next: usize,
    mode: Mode,
}

enum Mode {
    Inline(DatasetWorker),
    Parallel {
        rx: Option<Receiver<BatchMessage>>,
        pending: BTreeMap<usize, Result<SampleBatch>>,
        workers: Vec<JoinHandle<()>>,
        n_workers: usize,
    },
}

impl LoaderIter {
    fn start(dataset: &PotsDataset, plan: Arc<Vec<Vec<usize>>>, num_workers: usize) -> Self {
        if num_workers == 0 {
            return Self {
                plan,
                next: 0,
                mode: Mode::Inline(dataset.worker(0)),
            };
        }

        let n_workers = num_workers.min(plan.len()).max(1);
        let (tx, rx) = bounded::<BatchMessage>(n_workers * PREFETCH_PER_WORKER);
        let workers = (0..n_workers)
            .map(|id| {
                let worker = dataset.worker(id);
                let plan = Arc::clone(&plan);
                let tx = tx.clone();
                std::thread::spawn(move || run_worker(worker, n_workers, plan, tx))
            })
            .collect();

        Self {
            plan,
            next: 0,
            mode: Mode::Parallel {
                rx: Some(rx),
                pending: BTreeMap::new(),
                workers,
                n_workers,
            },
        }
    }
}

fn run_worker(
    mut worker: DatasetWorker,
    n_workers: usize,
    plan: Arc<Vec<Vec<usize>>>,
    tx: Sender<BatchMessage>,
) {
    for batch_idx in (worker.id()..plan.len()).step_by(n_workers) {
        let batch = load_batch(&mut worker, &plan[batch_idx]);
        if tx.send((batch_idx, batch)).is_err() {
            break;
        }
    }
}

fn load_batch(worker: &mut DatasetWorker, indices: &[usize]) -> Result<SampleBatch> {
    let items = indices
        .iter()
        .map(|&i| worker.get(i))
        .collect::<Result<Vec<_>>>()?;
    SampleBatch::collate(items)
}

impl Iterator for LoaderIter {
    type Item = Result<SampleBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.plan.len() {
            return None;
        }
        let batch_idx = self.next;
        self.next += 1;

        match &mut self.mode {
            Mode::Inline(worker) => Some(load_batch(worker, &self.plan[batch_idx])),
            Mode::Parallel {
                rx,
                pending,
                n_workers,
                ..
            } => {
                if let Some(batch) = pending.remove(&batch_idx) {
                    return Some(batch);
                }
                let rx = rx.as_ref()?;
                loop {
                    match rx.recv() {
                        Ok((idx, batch)) if idx == batch_idx => return Some(batch),
                        Ok((idx, batch)) => {
                            pending.insert(idx, batch);
                        }
                        Err(_) => {
                            self.next = self.plan.len();
                            return Some(Err(DataError::WorkerPanicked(batch_idx % *n_workers)));
                        }
                    }
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.plan.len() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for LoaderIter {}

impl Drop for LoaderIter {
    fn drop(&mut self) {
        if let Mode::Parallel { rx, workers, .. } = &mut self.mode {
            // Disconnect first so blocked senders return.
            rx.take();
            for handle in workers.drain(..) {
                if handle.join().is_err() {
                    tracing::warn!("loader worker panicked");
                }
            }
        }
    }
}
