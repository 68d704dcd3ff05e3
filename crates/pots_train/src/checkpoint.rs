//! Strategy-driven checkpoint persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::TrainerConfig;
use crate::error::{Result, TrainError};
use crate::model::Trainable;
use crate::orchestrator::TrainingState;

/// When checkpoints are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SavingStrategy {
    /// Never write.
    None,
    /// Write the best snapshot once, when training finishes.
    #[default]
    Best,
    /// Write on every improving epoch, named after the epoch and its loss.
    Better,
}

impl std::str::FromStr for SavingStrategy {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "best" => Ok(Self::Best),
            "better" => Ok(Self::Better),
            other => Err(TrainError::ConfigurationError(format!(
                "unknown saving strategy '{other}', expected none, best or better"
            ))),
        }
    }
}

/// A checkpoint that was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Path of the written model file.
    pub path: PathBuf,
    /// Epoch the snapshot was taken at.
    pub epoch: Option<usize>,
    /// Loss of that epoch.
    pub loss: f32,
}

/// Writes snapshots according to a [`SavingStrategy`].
///
/// Write failures are logged and never abort training.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    saving_path: Option<PathBuf>,
    strategy: SavingStrategy,
    records: Vec<CheckpointRecord>,
}

impl Default for CheckpointManager {
    fn default() -> Self {
        Self::disabled()
    }
}

impl CheckpointManager {
    /// Create a manager writing into `saving_path`.
    pub fn new(saving_path: impl Into<PathBuf>, strategy: SavingStrategy) -> Self {
        Self {
            saving_path: Some(saving_path.into()),
            strategy,
            records: Vec::new(),
        }
    }

    /// A manager that never writes.
    pub fn disabled() -> Self {
        Self {
            saving_path: None,
            strategy: SavingStrategy::None,
            records: Vec::new(),
        }
    }

    /// Build from a trainer configuration.
    pub fn from_config(config: &TrainerConfig) -> Self {
        match &config.saving_path {
            Some(path) => Self::new(path.clone(), config.saving_strategy),
            None => Self::disabled(),
        }
    }

    /// The strategy in use.
    pub fn strategy(&self) -> SavingStrategy {
        self.strategy
    }

    /// The checkpoint directory.
    pub fn saving_path(&self) -> Option<&Path> {
        self.saving_path.as_deref()
    }

    /// Checkpoints written so far, oldest first.
    pub fn records(&self) -> &[CheckpointRecord] {
        &self.records
    }

    /// File stem of an improving-epoch checkpoint.
    pub fn checkpoint_name(class_name: &str, epoch: usize, loss: f32) -> String {
        format!("{class_name}_epoch{epoch}_loss{loss}")
    }

    /// Persist `state.best_snapshot` if the strategy calls for it.
    ///
    /// `Best` writes only when `training_finished`; `Better` writes only
    /// when it is not, i.e. right after an improving epoch. Returns the
    /// record of the written checkpoint.
    pub fn maybe_save<M: Trainable>(
        &mut self,
        model: &M,
        state: &TrainingState<M::Snapshot>,
        training_finished: bool,
    ) -> Option<&CheckpointRecord> {
        let dir = self.saving_path.clone()?;
        let stem = match (self.strategy, training_finished) {
            (SavingStrategy::Best, true) => dir.join(model.name()),
            (SavingStrategy::Better, false) => dir.join(Self::checkpoint_name(
                model.name(),
                state.best_epoch?,
                state.best_loss,
            )),
            _ => return None,
        };
        let snapshot = state.best_snapshot.as_ref()?;

        match Self::write(model, snapshot, &stem) {
            Ok(path) => {
                tracing::info!(path = %path.display(), "saved checkpoint");
                self.records.push(CheckpointRecord {
                    path,
                    epoch: state.best_epoch,
                    loss: state.best_loss,
                });
                self.records.last()
            }
            Err(err) => {
                tracing::warn!(path = %stem.display(), error = %err, "failed to save checkpoint");
                None
            }
        }
    }

    fn write<M: Trainable>(model: &M, snapshot: &M::Snapshot, stem: &Path) -> Result<PathBuf> {
        if let Some(parent) = stem.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TrainError::CheckpointError(format!(
                    "failed to create checkpoint directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        model.persist(snapshot, stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LossStream;
    use crate::predict::BatchOutput;
    use pots_data::SampleBatch;

    /// Persists its snapshot as a JSON number.
    struct Weights(f32);

    impl Trainable for Weights {
        type Snapshot = f32;

        fn name(&self) -> &str {
            "Weights"
        }

        fn train_step(&mut self, _batch: &SampleBatch, _stream: &LossStream) -> Result<f32> {
            Ok(self.0)
        }

        fn validation_loss(&mut self, _batch: &SampleBatch) -> Result<f32> {
            Ok(self.0)
        }

        fn predict_batch(&mut self, _batch: &SampleBatch) -> Result<BatchOutput> {
            Err(TrainError::ModelError("not used".to_string()))
        }

        fn snapshot(&self) -> Result<f32> {
            Ok(self.0)
        }

        fn restore(&mut self, snapshot: &f32) -> Result<()> {
            self.0 = *snapshot;
            Ok(())
        }

        fn freeze(&mut self) {}

        fn persist(&self, snapshot: &f32, stem: &Path) -> Result<PathBuf> {
            let path = PathBuf::from(format!("{}.json", stem.display()));
            std::fs::write(&path, serde_json::to_string(snapshot)?)?;
            Ok(path)
        }

        fn load_persisted(&mut self, path: &Path) -> Result<()> {
            self.0 = serde_json::from_str(&std::fs::read_to_string(path)?)?;
            Ok(())
        }
    }

    fn improved_state(epoch: usize, loss: f32) -> TrainingState<f32> {
        let mut state = TrainingState::new(None);
        state.best_epoch = Some(epoch);
        state.best_loss = loss;
        state.best_snapshot = Some(loss * 10.0);
        state
    }

    #[test]
    fn test_checkpoint_name() {
        assert_eq!(
            CheckpointManager::checkpoint_name("BRITS", 3, 0.25),
            "BRITS_epoch3_loss0.25"
        );
    }

    #[test]
    fn test_better_writes_on_improvement_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = CheckpointManager::new(dir.path(), SavingStrategy::Better);
        let model = Weights(0.0);

        let record = manager.maybe_save(&model, &improved_state(2, 0.5), false).cloned().unwrap();
        assert_eq!(record.path, dir.path().join("Weights_epoch2_loss0.5.json"));
        assert!(manager.maybe_save(&model, &improved_state(2, 0.5), true).is_none());
        assert_eq!(manager.records().len(), 1);

        let mut restored = Weights(0.0);
        restored.load_persisted(&record.path).unwrap();
        assert_eq!(restored.0, 5.0);
    }

    #[test]
    fn test_best_writes_when_finished() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = CheckpointManager::new(dir.path().join("nested"), SavingStrategy::Best);
        let model = Weights(0.0);
        assert!(manager.maybe_save(&model, &improved_state(1, 0.5), false).is_none());
        let record = manager.maybe_save(&model, &improved_state(1, 0.5), true).unwrap();
        assert_eq!(record.path, dir.path().join("nested").join("Weights.json"));
    }

    #[test]
    fn test_none_and_disabled_never_write() {
        let dir = tempfile::tempdir().unwrap();
        let model = Weights(0.0);
        let mut none = CheckpointManager::new(dir.path(), SavingStrategy::None);
        assert!(none.maybe_save(&model, &improved_state(0, 1.0), true).is_none());
        assert!(none.maybe_save(&model, &improved_state(0, 1.0), false).is_none());
        let mut disabled = CheckpointManager::disabled();
        assert!(disabled.maybe_save(&model, &improved_state(0, 1.0), true).is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_write_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let mut manager = CheckpointManager::new(blocker.join("sub"), SavingStrategy::Best);
        let model = Weights(0.0);
        assert!(manager.maybe_save(&model, &improved_state(0, 1.0), true).is_none());
        assert!(manager.records().is_empty());
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("Better".parse::<SavingStrategy>().unwrap(), SavingStrategy::Better);
        assert!("sometimes".parse::<SavingStrategy>().is_err());
    }
}
