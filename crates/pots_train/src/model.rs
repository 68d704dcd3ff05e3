//! The contract between the training loop and a concrete model.

use std::path::{Path, PathBuf};

use pots_data::SampleBatch;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::predict::BatchOutput;

/// A named loss term with its own optimizer and step cadence.
///
/// The stream fires on batch `idx` of an epoch when `idx % every_n_batches == 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossStream {
    /// Name of the loss term, e.g. `generation_loss`.
    pub name: String,
    /// Step cadence in batches.
    pub every_n_batches: usize,
}

impl LossStream {
    /// Create a stream.
    pub fn new(name: impl Into<String>, every_n_batches: usize) -> Self {
        Self {
            name: name.into(),
            every_n_batches,
        }
    }

    /// A stream stepping on every batch.
    pub fn every_batch(name: impl Into<String>) -> Self {
        Self::new(name, 1)
    }
}

/// A model the orchestrator can train.
///
/// Implementations own their parameters and optimizers; the orchestrator
/// only decides which stream steps on which batch, when to snapshot and
/// when to stop.
pub trait Trainable {
    /// A restorable copy of the full model and optimizer state.
    type Snapshot: Clone + Send;

    /// Class name, used to name checkpoint files.
    fn name(&self) -> &str;

    /// Loss streams in stepping order. The first is the primary stream.
    fn streams(&self) -> Vec<LossStream> {
        vec![LossStream::every_batch("loss")]
    }

    /// Whether batches should carry labels.
    fn uses_labels(&self) -> bool {
        false
    }

    /// Forward, backward and one optimizer step for `stream`. Returns the loss value.
    fn train_step(&mut self, batch: &SampleBatch, stream: &LossStream) -> Result<f32>;

    /// Loss of one validation batch, with gradients disabled.
    fn validation_loss(&mut self, batch: &SampleBatch) -> Result<f32>;

    /// Outputs for one inference batch, rows aligned with `batch.indices`.
    fn predict_batch(&mut self, batch: &SampleBatch) -> Result<BatchOutput>;

    /// Copy the current state.
    fn snapshot(&self) -> Result<Self::Snapshot>;

    /// Replace the current state with `snapshot`.
    fn restore(&mut self, snapshot: &Self::Snapshot) -> Result<()>;

    /// Disable further gradient tracking.
    fn freeze(&mut self);

    /// Write `snapshot` under `stem`. Returns the path of the written model file.
    fn persist(&self, snapshot: &Self::Snapshot, stem: &Path) -> Result<PathBuf>;

    /// Load state previously written by [`Trainable::persist`].
    fn load_persisted(&mut self, path: &Path) -> Result<()>;
}
