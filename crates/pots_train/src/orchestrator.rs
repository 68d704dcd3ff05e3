//! The epoch loop: stepping, validation, early stopping and recovery.
//!
//! Training is an explicit state machine:
//!
//! ```text
//! Idle -> Running -> { Converged | PatienceExhausted | Interrupted } -> Finalized
//! ```
//!
//! An error inside an epoch moves to `Interrupted`. With a snapshot from an
//! earlier improving epoch, `fit` still succeeds and the report carries the
//! interruption as a warning; without one the error is fatal.

use std::collections::BTreeMap;
use std::fmt;

use pots_data::PotsDataLoader;
use serde::{Deserialize, Serialize};

use crate::callback::{Callback, CallbackContext, CallbackList};
use crate::checkpoint::CheckpointManager;
use crate::config::TrainerConfig;
use crate::error::{Result, TrainError};
use crate::model::Trainable;
use crate::schedule::StepSchedule;

/// Lifecycle phase of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Not started.
    Idle,
    /// Running epochs.
    Running,
    /// Ran the full epoch budget.
    Converged,
    /// Stopped early: patience ran out.
    PatienceExhausted,
    /// An epoch failed after an earlier improving epoch.
    Interrupted,
    /// Done; `best_snapshot` is ready to load.
    Finalized,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Running => "running",
            Phase::Converged => "converged",
            Phase::PatienceExhausted => "patience exhausted",
            Phase::Interrupted => "interrupted",
            Phase::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// Summary of one completed epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// Epoch index.
    pub epoch: usize,
    /// Mean training loss per stream, over the batches where it stepped.
    pub train_losses: BTreeMap<String, f32>,
    /// Validation loss, when a validation loader was given.
    pub valid_loss: Option<f32>,
    /// Whether the epoch improved on the best loss.
    pub improved: bool,
}

/// Per-epoch loss history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    epochs: Vec<EpochRecord>,
}

impl TrainingHistory {
    /// Append an epoch.
    pub fn push(&mut self, record: EpochRecord) {
        self.epochs.push(record);
    }

    /// All epochs in order.
    pub fn epochs(&self) -> &[EpochRecord] {
        &self.epochs
    }

    /// Number of recorded epochs.
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    /// Check if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Mean loss of `stream` per epoch; `None` where it never stepped.
    pub fn stream_losses(&self, stream: &str) -> Vec<Option<f32>> {
        self.epochs
            .iter()
            .map(|e| e.train_losses.get(stream).copied())
            .collect()
    }

    /// Validation loss per epoch.
    pub fn valid_losses(&self) -> Vec<Option<f32>> {
        self.epochs.iter().map(|e| e.valid_loss).collect()
    }
}

/// Mutable state of a training run.
#[derive(Debug, Clone)]
pub struct TrainingState<S> {
    /// Current phase.
    pub phase: Phase,
    /// Epochs that ran to completion.
    pub epochs_completed: usize,
    /// Optimizer steps taken over all streams.
    pub global_step: usize,
    /// Lowest loss seen; `+inf` until an epoch improves.
    pub best_loss: f32,
    /// Epoch of `best_loss`.
    pub best_epoch: Option<usize>,
    /// State captured at `best_epoch`.
    pub best_snapshot: Option<S>,
    /// Configured patience.
    pub patience: Option<usize>,
    /// Non-improving epochs left before stopping.
    pub patience_remaining: Option<usize>,
    /// Per-epoch history.
    pub history: TrainingHistory,
}

impl<S> TrainingState<S> {
    /// A fresh state in [`Phase::Idle`].
    pub fn new(patience: Option<usize>) -> Self {
        Self {
            phase: Phase::Idle,
            epochs_completed: 0,
            global_step: 0,
            best_loss: f32::INFINITY,
            best_epoch: None,
            best_snapshot: None,
            patience,
            patience_remaining: patience,
            history: TrainingHistory::default(),
        }
    }

    fn transition(&mut self, to: Phase) {
        tracing::debug!(from = %self.phase, to = %to, "training phase");
        self.phase = to;
    }
}

/// Outcome of a successful [`TrainingOrchestrator::fit`].
#[derive(Debug)]
pub struct FitReport<S> {
    /// Final state, in [`Phase::Finalized`].
    pub state: TrainingState<S>,
    /// How the epoch loop ended.
    pub termination: Phase,
    /// The interruption that training recovered from, if any.
    pub warning: Option<TrainError>,
}

impl<S> FitReport<S> {
    /// Whether training was interrupted and fell back to an earlier snapshot.
    pub fn is_recovered(&self) -> bool {
        self.warning.is_some()
    }

    /// The best snapshot.
    pub fn best_snapshot(&self) -> Option<&S> {
        self.state.best_snapshot.as_ref()
    }
}

enum EpochFlow {
    Continue,
    Stop,
}

/// Drives epochs over a [`Trainable`] model.
///
/// # Example
///
/// ```rust,ignore
/// use pots_train::{TrainerConfig, TrainingOrchestrator};
///
/// let mut orchestrator = TrainingOrchestrator::from_config(&config)?;
/// let report = orchestrator.fit(&mut model, &train_loader, Some(&val_loader))?;
/// if let Some(snapshot) = report.best_snapshot() {
///     model.restore(snapshot)?;
/// }
/// model.freeze();
/// ```
#[derive(Debug)]
pub struct TrainingOrchestrator {
    epochs: usize,
    patience: Option<usize>,
    checkpoints: CheckpointManager,
    callbacks: CallbackList,
}

impl TrainingOrchestrator {
    /// Create an orchestrator without checkpoints or callbacks.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::ConfigurationError`] for zero epochs or a patience of zero.
    pub fn new(epochs: usize, patience: Option<usize>) -> Result<Self> {
        if epochs == 0 {
            return Err(TrainError::ConfigurationError(
                "epochs must be positive".to_string(),
            ));
        }
        if patience == Some(0) {
            return Err(TrainError::ConfigurationError(
                "patience must be positive; use None to disable early stopping".to_string(),
            ));
        }
        Ok(Self {
            epochs,
            patience,
            checkpoints: CheckpointManager::disabled(),
            callbacks: CallbackList::new(),
        })
    }

    /// Create an orchestrator from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns the configuration's validation error.
    pub fn from_config(config: &TrainerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.epochs, config.patience)?
            .with_checkpoints(CheckpointManager::from_config(config)))
    }

    /// Set the checkpoint manager.
    #[must_use]
    pub fn with_checkpoints(mut self, checkpoints: CheckpointManager) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    /// Add a callback.
    #[must_use]
    pub fn with_callback<C: Callback + 'static>(mut self, callback: C) -> Self {
        self.callbacks.add(callback);
        self
    }

    /// The checkpoint manager.
    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Train `model`.
    ///
    /// The loss compared against the best is the validation loss when
    /// `val` is given, else the mean loss of the primary stream.
    ///
    /// # Errors
    ///
    /// - [`TrainError::ConfigurationError`] for an invalid stream schedule,
    ///   or when no epoch ever improved on `+inf`
    /// - [`TrainError::RuntimeError`] when an epoch fails before any epoch improved
    pub fn fit<M: Trainable>(
        &mut self,
        model: &mut M,
        train: &PotsDataLoader,
        val: Option<&PotsDataLoader>,
    ) -> Result<FitReport<M::Snapshot>> {
        let schedule = StepSchedule::new(model.streams())?;
        let mut state = TrainingState::new(self.patience);
        let mut ctx = CallbackContext::new(self.epochs, train.n_batches());
        self.callbacks.before_fit(&ctx)?;

        state.transition(Phase::Running);
        let mut warning = None;
        for epoch in 0..self.epochs {
            ctx.epoch = epoch;
            match self.run_epoch(model, &schedule, train, val, &mut state, &mut ctx) {
                Ok(EpochFlow::Continue) => {}
                Ok(EpochFlow::Stop) => {
                    tracing::info!(
                        epoch,
                        "Exceeded the training patience. Terminating the training procedure"
                    );
                    state.transition(Phase::PatienceExhausted);
                    break;
                }
                Err(err) => {
                    tracing::error!(epoch, error = %err, "training epoch failed");
                    state.transition(Phase::Interrupted);
                    if state.best_snapshot.is_none() {
                        return Err(TrainError::RuntimeError(format!(
                            "training got interrupted at epoch {epoch} and no model was trained: {err}"
                        )));
                    }
                    tracing::warn!(
                        epoch,
                        best_epoch = ?state.best_epoch,
                        "training got interrupted; the best snapshot so far will be used"
                    );
                    warning = Some(TrainError::Interrupted {
                        epoch,
                        reason: err.to_string(),
                    });
                    break;
                }
            }
        }

        if state.phase == Phase::Running {
            state.transition(Phase::Converged);
        }
        let termination = state.phase;

        if state.best_loss == f32::INFINITY {
            return Err(TrainError::ConfigurationError(format!(
                "best loss is still +inf after {} epochs; no epoch produced a finite loss",
                state.epochs_completed
            )));
        }

        self.checkpoints.maybe_save(model, &state, true);
        ctx.best_loss = state.best_loss;
        self.callbacks.after_fit(&ctx)?;
        state.transition(Phase::Finalized);

        Ok(FitReport {
            state,
            termination,
            warning,
        })
    }

    fn run_epoch<M: Trainable>(
        &mut self,
        model: &mut M,
        schedule: &StepSchedule,
        train: &PotsDataLoader,
        val: Option<&PotsDataLoader>,
        state: &mut TrainingState<M::Snapshot>,
        ctx: &mut CallbackContext,
    ) -> Result<EpochFlow> {
        let epoch = ctx.epoch;

        let mut collectors: BTreeMap<&str, Vec<f32>> = BTreeMap::new();
        for (idx, batch) in train.epoch(epoch).enumerate() {
            let batch = batch?;
            for stream in schedule.firing(idx) {
                let loss = model.train_step(&batch, stream)?;
                collectors.entry(stream.name.as_str()).or_default().push(loss);
                state.global_step += 1;
            }
        }
        let train_losses: BTreeMap<String, f32> = collectors
            .into_iter()
            .map(|(name, losses)| (name.to_string(), mean(&losses)))
            .collect();

        let valid_loss = match val {
            Some(loader) => Some(validate(model, loader)?),
            None => None,
        };
        let current = valid_loss
            .or_else(|| train_losses.get(&schedule.primary().name).copied())
            .unwrap_or(f32::INFINITY);

        tracing::info!(epoch, ?train_losses, ?valid_loss, "epoch finished");

        let improved = current < state.best_loss;
        if improved {
            state.best_loss = current;
            state.best_epoch = Some(epoch);
            state.patience_remaining = state.patience;
            state.best_snapshot = Some(model.snapshot()?);
            self.checkpoints.maybe_save(model, state, false);
        } else if let Some(remaining) = state.patience_remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }

        ctx.train_losses = train_losses;
        ctx.valid_loss = valid_loss;
        ctx.best_loss = state.best_loss;
        ctx.improved = improved;
        ctx.patience_remaining = state.patience_remaining;
        state.history.push(ctx.record());
        state.epochs_completed = epoch + 1;
        self.callbacks.after_epoch(ctx)?;

        if state.patience_remaining == Some(0) {
            Ok(EpochFlow::Stop)
        } else {
            Ok(EpochFlow::Continue)
        }
    }
}

/// Sample-weighted mean validation loss.
fn validate<M: Trainable>(model: &mut M, loader: &PotsDataLoader) -> Result<f32> {
    let mut total = 0.0f64;
    let mut samples = 0usize;
    for batch in loader.iter() {
        let batch = batch?;
        let loss = model.validation_loss(&batch)?;
        total += f64::from(loss) * batch.len() as f64;
        samples += batch.len();
    }
    if samples == 0 {
        return Ok(f32::INFINITY);
    }
    Ok((total / samples as f64) as f32)
}

fn mean(values: &[f32]) -> f32 {
    values.iter().sum::<f32>() / values.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    use ndarray::Array3;
    use pots_core::Stage;
    use pots_data::{PotsDataset, SampleBatch};

    use crate::checkpoint::SavingStrategy;
    use crate::model::LossStream;
    use crate::predict::BatchOutput;

    const BATCHES: usize = 2;

    /// Returns a scripted loss per epoch; its "weights" are the epoch index.
    struct Scripted {
        losses: Vec<f32>,
        fail_at: Option<usize>,
        steps: usize,
        weights: usize,
    }

    impl Scripted {
        fn new(losses: Vec<f32>) -> Self {
            Self {
                losses,
                fail_at: None,
                steps: 0,
                weights: 0,
            }
        }

        fn failing_at(mut self, epoch: usize) -> Self {
            self.fail_at = Some(epoch);
            self
        }
    }

    impl Trainable for Scripted {
        type Snapshot = usize;

        fn name(&self) -> &str {
            "Scripted"
        }

        fn train_step(&mut self, _batch: &SampleBatch, _stream: &LossStream) -> Result<f32> {
            let epoch = self.steps / BATCHES;
            self.steps += 1;
            if self.fail_at == Some(epoch) {
                return Err(TrainError::ModelError("injected fault".to_string()));
            }
            self.weights = epoch;
            Ok(self.losses[epoch])
        }

        fn validation_loss(&mut self, _batch: &SampleBatch) -> Result<f32> {
            Ok(self.losses[self.weights])
        }

        fn predict_batch(&mut self, _batch: &SampleBatch) -> Result<BatchOutput> {
            Err(TrainError::ModelError("not used".to_string()))
        }

        fn snapshot(&self) -> Result<usize> {
            Ok(self.weights)
        }

        fn restore(&mut self, snapshot: &usize) -> Result<()> {
            self.weights = *snapshot;
            Ok(())
        }

        fn freeze(&mut self) {}

        fn persist(&self, snapshot: &usize, stem: &Path) -> Result<PathBuf> {
            let path = PathBuf::from(format!("{}.json", stem.display()));
            std::fs::write(&path, serde_json::to_string(snapshot)?)?;
            Ok(path)
        }

        fn load_persisted(&mut self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn loader(stage: Stage) -> PotsDataLoader {
        let x = Array3::from_shape_fn((4, 3, 2), |(i, t, f)| (i * t + f) as f32);
        PotsDataLoader::builder(PotsDataset::from_arrays(x, None).unwrap())
            .batch_size(4 / BATCHES)
            .stage(stage)
            .build()
            .unwrap()
    }

    #[test]
    fn test_runs_full_budget_without_patience() {
        let mut model = Scripted::new(vec![3.0, 2.0, 2.5, 1.0]);
        let mut orchestrator = TrainingOrchestrator::new(4, None).unwrap();
        let report = orchestrator.fit(&mut model, &loader(Stage::Train), None).unwrap();

        assert_eq!(report.termination, Phase::Converged);
        assert_eq!(report.state.phase, Phase::Finalized);
        assert_eq!(report.state.epochs_completed, 4);
        assert_eq!(report.state.best_epoch, Some(3));
        assert_eq!(report.best_snapshot(), Some(&3));
        assert_eq!(report.state.global_step, 4 * BATCHES);
        assert!(!report.is_recovered());
    }

    #[test]
    fn test_patience_stops_early() {
        let patience = 2;
        let mut model = Scripted::new(vec![5.0, 4.0, 3.0, 3.0, 3.0, 1.0, 1.0]);
        let mut orchestrator = TrainingOrchestrator::new(7, Some(patience)).unwrap();
        let report = orchestrator.fit(&mut model, &loader(Stage::Train), None).unwrap();

        assert_eq!(report.termination, Phase::PatienceExhausted);
        assert_eq!(report.state.epochs_completed, 2 + patience + 1);
        assert_eq!(report.state.history.epochs().last().unwrap().epoch, 2 + patience);
        assert_eq!(report.best_snapshot(), Some(&2));
    }

    #[test]
    fn test_improvement_is_strict() {
        let mut model = Scripted::new(vec![2.0, 2.0, 2.0]);
        let mut orchestrator = TrainingOrchestrator::new(3, None).unwrap();
        let report = orchestrator.fit(&mut model, &loader(Stage::Train), None).unwrap();
        assert_eq!(report.state.best_epoch, Some(0));
        let improved: Vec<bool> = report.state.history.epochs().iter().map(|e| e.improved).collect();
        assert_eq!(improved, vec![true, false, false]);
    }

    #[test]
    fn test_validation_loss_drives_selection() {
        let mut model = Scripted::new(vec![3.0, 1.0, 2.0]);
        let mut orchestrator = TrainingOrchestrator::new(3, None).unwrap();
        let report = orchestrator
            .fit(&mut model, &loader(Stage::Train), Some(&loader(Stage::Validate)))
            .unwrap();
        assert_eq!(report.state.best_epoch, Some(1));
        assert_eq!(report.state.history.valid_losses(), vec![Some(3.0), Some(1.0), Some(2.0)]);
    }

    #[test]
    fn test_recovers_from_late_fault() {
        let mut model = Scripted::new(vec![3.0, 2.0, 2.0, 1.0, 0.5]).failing_at(3);
        let mut orchestrator = TrainingOrchestrator::new(5, None).unwrap();
        let report = orchestrator.fit(&mut model, &loader(Stage::Train), None).unwrap();

        assert_eq!(report.termination, Phase::Interrupted);
        assert_eq!(report.state.phase, Phase::Finalized);
        assert!(matches!(report.warning, Some(TrainError::Interrupted { epoch: 3, .. })));
        assert_eq!(report.best_snapshot(), Some(&1));
    }

    #[test]
    fn test_fault_before_improvement_is_fatal() {
        let mut model = Scripted::new(vec![3.0, 2.0]).failing_at(0);
        let mut orchestrator = TrainingOrchestrator::new(2, None).unwrap();
        let err = orchestrator.fit(&mut model, &loader(Stage::Train), None).unwrap_err();
        assert!(matches!(err, TrainError::RuntimeError(_)));
    }

    #[test]
    fn test_never_improving_is_a_configuration_error() {
        let mut model = Scripted::new(vec![f32::INFINITY, f32::NAN]);
        let mut orchestrator = TrainingOrchestrator::new(2, None).unwrap();
        let err = orchestrator.fit(&mut model, &loader(Stage::Train), None).unwrap_err();
        assert!(matches!(err, TrainError::ConfigurationError(_)));
    }

    #[test]
    fn test_better_checkpoints_each_improvement() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = Scripted::new(vec![3.0, 2.0, 1.0, 1.0, 1.0]);
        let mut orchestrator = TrainingOrchestrator::new(5, None)
            .unwrap()
            .with_checkpoints(CheckpointManager::new(dir.path(), SavingStrategy::Better));
        orchestrator.fit(&mut model, &loader(Stage::Train), None).unwrap();

        let epochs: Vec<Option<usize>> =
            orchestrator.checkpoints().records().iter().map(|r| r.epoch).collect();
        assert_eq!(epochs, vec![Some(0), Some(1), Some(2)]);
        assert!(dir.path().join("Scripted_epoch1_loss2.json").exists());
    }

    /// Counts `after_fit` calls.
    #[derive(Clone, Default)]
    struct FitEnds(std::sync::Arc<std::sync::atomic::AtomicUsize>);

    impl FitEnds {
        fn count(&self) -> usize {
            self.0.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    impl Callback for FitEnds {
        fn after_fit(&mut self, _ctx: &CallbackContext) -> Result<()> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_after_fit_runs_only_when_fit_succeeds() {
        let recovered = FitEnds::default();
        let mut orchestrator = TrainingOrchestrator::new(3, None)
            .unwrap()
            .with_callback(recovered.clone());
        let mut model = Scripted::new(vec![3.0, 2.0, 1.0]).failing_at(2);
        assert!(orchestrator.fit(&mut model, &loader(Stage::Train), None).is_ok());
        assert_eq!(recovered.count(), 1);

        let fatal = FitEnds::default();
        let mut orchestrator = TrainingOrchestrator::new(2, None)
            .unwrap()
            .with_callback(fatal.clone());
        let mut model = Scripted::new(vec![3.0, 2.0]).failing_at(0);
        assert!(orchestrator.fit(&mut model, &loader(Stage::Train), None).is_err());

        let mut model = Scripted::new(vec![f32::INFINITY, f32::INFINITY]);
        assert!(orchestrator.fit(&mut model, &loader(Stage::Train), None).is_err());
        assert_eq!(fatal.count(), 0);
    }

    #[test]
    fn test_invalid_orchestrator_settings() {
        assert!(TrainingOrchestrator::new(0, None).is_err());
        assert!(TrainingOrchestrator::new(3, Some(0)).is_err());
    }
}
