//! The fit / predict facade shared by every model.

use std::path::{Path, PathBuf};

use pots_core::Stage;
use pots_data::{PotsDataLoader, PotsDataset};

use crate::callback::{Callback, ProgressCallback};
use crate::config::TrainerConfig;
use crate::error::{Result, TrainError};
use crate::model::Trainable;
use crate::orchestrator::{FitReport, TrainingOrchestrator};
use crate::predict::{InferenceResult, Predictor};

/// Wraps a model with its training configuration.
///
/// `fit` builds the loaders (shuffled for training, in order for
/// validation), runs the [`TrainingOrchestrator`], loads the best snapshot
/// into the model and freezes it.
///
/// # Example
///
/// ```rust,ignore
/// use pots_train::{Estimator, ResultKey, TrainerConfig};
///
/// let config = TrainerConfig::default().with_epochs(20).with_patience(Some(3));
/// let mut estimator = Estimator::new(model, config)?;
/// let report = estimator.fit(train_set, Some(val_set))?;
/// let imputed = estimator.predict(test_set)?.take(ResultKey::Imputation);
/// ```
pub struct Estimator<M: Trainable> {
    model: M,
    config: TrainerConfig,
    orchestrator: TrainingOrchestrator,
    fitted: bool,
}

impl<M: Trainable> Estimator<M> {
    /// Create an estimator that logs progress through `tracing`.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::ConfigurationError`] for an invalid configuration.
    pub fn new(model: M, config: TrainerConfig) -> Result<Self> {
        let orchestrator =
            TrainingOrchestrator::from_config(&config)?.with_callback(ProgressCallback::new());
        Ok(Self {
            model,
            config,
            orchestrator,
            fitted: false,
        })
    }

    /// Add a callback.
    #[must_use]
    pub fn with_callback<C: Callback + 'static>(mut self, callback: C) -> Self {
        self.orchestrator = self.orchestrator.with_callback(callback);
        self
    }

    /// The wrapped model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Mutable access to the wrapped model.
    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    /// Unwrap the model.
    pub fn into_model(self) -> M {
        self.model
    }

    /// The configuration.
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// The orchestrator, for inspecting checkpoint records.
    pub fn orchestrator(&self) -> &TrainingOrchestrator {
        &self.orchestrator
    }

    /// Whether `fit` completed.
    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    /// Train on `train_set`, selecting the best epoch on `val_set` when given.
    ///
    /// On success the model holds the best snapshot and is frozen. A
    /// recovered interruption is returned in [`FitReport::warning`].
    ///
    /// # Errors
    ///
    /// - [`TrainError::ConfigurationError`] if the estimator was already fitted
    /// - data errors from building the loaders
    /// - the orchestrator's fatal errors
    pub fn fit(
        &mut self,
        train_set: PotsDataset,
        val_set: Option<PotsDataset>,
    ) -> Result<FitReport<M::Snapshot>> {
        if self.fitted {
            return Err(TrainError::ConfigurationError(format!(
                "{} is already fitted and frozen",
                self.model.name()
            )));
        }

        let return_labels = self.model.uses_labels();
        let train = PotsDataLoader::builder(train_set.with_return_labels(return_labels))
            .batch_size(self.config.batch_size)
            .num_workers(self.config.num_workers)
            .seed(self.config.shuffle_seed())
            .stage(Stage::Train)
            .build()?;
        let val = val_set
            .map(|set| self.loader(set.with_return_labels(return_labels), Stage::Validate))
            .transpose()?;

        let report = self.orchestrator.fit(&mut self.model, &train, val.as_ref())?;
        if let Some(warning) = &report.warning {
            tracing::warn!(%warning, "loading the last good snapshot");
        }
        let snapshot = report.best_snapshot().ok_or_else(|| {
            TrainError::RuntimeError("training finished without a best snapshot".to_string())
        })?;
        self.model.restore(snapshot)?;
        self.model.freeze();
        self.fitted = true;
        Ok(report)
    }

    /// Run the model over `test_set`, keeping sample order.
    ///
    /// # Errors
    ///
    /// Propagates data and model errors.
    pub fn predict(&mut self, test_set: PotsDataset) -> Result<InferenceResult> {
        if !self.fitted {
            tracing::warn!(model = self.model.name(), "predicting with a model that was not fitted");
        }
        let loader = self.loader(test_set.with_return_labels(false), Stage::Predict)?;
        Predictor::new(&mut self.model).predict(&loader)
    }

    /// Persist the current model as `dir/file_name`.
    ///
    /// Returns the written path, which carries the model's own extension.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::CheckpointError`] or an I/O error if writing fails.
    pub fn save_model(&self, dir: impl AsRef<Path>, file_name: &str) -> Result<PathBuf> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let snapshot = self.model.snapshot()?;
        let path = self.model.persist(&snapshot, &dir.join(file_name))?;
        tracing::info!(path = %path.display(), "saved model");
        Ok(path)
    }

    /// Load model state written by [`Estimator::save_model`] or a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns the model's load error.
    pub fn load_model(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.model.load_persisted(path)?;
        tracing::info!(path = %path.display(), "loaded model");
        Ok(())
    }

    fn loader(&self, dataset: PotsDataset, stage: Stage) -> Result<PotsDataLoader> {
        Ok(PotsDataLoader::builder(dataset)
            .batch_size(self.config.batch_size)
            .num_workers(self.config.num_workers)
            .stage(stage)
            .build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array3, Axis, Zip};
    use pots_data::SampleBatch;

    use crate::model::LossStream;
    use crate::predict::{BatchOutput, ResultKey};

    /// Fills missing entries with a running estimate of the observed mean.
    #[derive(Default)]
    struct MeanFill {
        estimate: f32,
        frozen: bool,
        saw_labels: bool,
    }

    impl MeanFill {
        fn observed_mean(batch: &SampleBatch) -> f32 {
            let total: f32 = (&batch.forward.x * &batch.forward.mask).sum();
            total / batch.forward.mask.sum().max(1.0)
        }
    }

    impl Trainable for MeanFill {
        type Snapshot = f32;

        fn name(&self) -> &str {
            "MeanFill"
        }

        fn train_step(&mut self, batch: &SampleBatch, _stream: &LossStream) -> Result<f32> {
            if self.frozen {
                return Err(TrainError::ModelError("frozen".to_string()));
            }
            self.saw_labels |= batch.labels.is_some();
            let target = Self::observed_mean(batch);
            let loss = (self.estimate - target).powi(2);
            self.estimate += 0.5 * (target - self.estimate);
            Ok(loss)
        }

        fn validation_loss(&mut self, batch: &SampleBatch) -> Result<f32> {
            Ok((self.estimate - Self::observed_mean(batch)).powi(2))
        }

        fn predict_batch(&mut self, batch: &SampleBatch) -> Result<BatchOutput> {
            let mut imputed = batch.forward.x.clone();
            Zip::from(&mut imputed)
                .and(&batch.forward.mask)
                .for_each(|x, &m| {
                    if m == 0.0 {
                        *x = self.estimate;
                    }
                });
            Ok(BatchOutput::new(ResultKey::Imputation, imputed.into_dyn()))
        }

        fn snapshot(&self) -> Result<f32> {
            Ok(self.estimate)
        }

        fn restore(&mut self, snapshot: &f32) -> Result<()> {
            self.estimate = *snapshot;
            Ok(())
        }

        fn freeze(&mut self) {
            self.frozen = true;
        }

        fn persist(&self, snapshot: &f32, stem: &Path) -> Result<PathBuf> {
            let path = PathBuf::from(format!("{}.json", stem.display()));
            std::fs::write(&path, serde_json::to_string(snapshot)?)?;
            Ok(path)
        }

        fn load_persisted(&mut self, path: &Path) -> Result<()> {
            self.estimate = serde_json::from_str(&std::fs::read_to_string(path)?)?;
            Ok(())
        }
    }

    fn dataset(n: usize) -> PotsDataset {
        let x = Array3::from_shape_fn((n, 6, 2), |(i, t, f)| {
            if (i + t + f) % 3 == 0 {
                f32::NAN
            } else {
                2.0 + ((i * 7 + t) % 5) as f32 * 0.1
            }
        });
        let y = Array1::from_shape_fn(n, |i| (i % 2) as f32);
        PotsDataset::from_arrays(x, Some(y)).unwrap()
    }

    fn config() -> TrainerConfig {
        TrainerConfig::default()
            .with_epochs(5)
            .with_batch_size(4)
            .with_seed(7)
            .with_saving_strategy(crate::checkpoint::SavingStrategy::None)
    }

    #[test]
    fn test_fit_freezes_and_predict_keeps_order() {
        let mut estimator = Estimator::new(MeanFill::default(), config()).unwrap();
        let report = estimator.fit(dataset(12), Some(dataset(8))).unwrap();

        assert!(estimator.is_fitted());
        assert!(estimator.model().frozen);
        assert!(!estimator.model().saw_labels);
        assert_eq!(report.state.history.len(), 5);
        assert_eq!(estimator.model().estimate, *report.best_snapshot().unwrap());

        let test = dataset(10);
        let mut result = estimator.predict(test.clone()).unwrap();
        let imputed = result.take(ResultKey::Imputation).unwrap();
        assert_eq!(imputed.shape(), &[10, 6, 2]);
        assert!(imputed.iter().all(|v| v.is_finite()));
        // Observed entries pass through unchanged, in dataset order.
        let item = test.get(3).unwrap();
        let row = imputed.index_axis(Axis(0), 3);
        assert_eq!(row[[1, 0]], item.sample.forward.x[[1, 0]]);
    }

    #[test]
    fn test_refit_is_rejected() {
        let mut estimator = Estimator::new(MeanFill::default(), config()).unwrap();
        estimator.fit(dataset(8), None).unwrap();
        let err = estimator.fit(dataset(8), None).unwrap_err();
        assert!(matches!(err, TrainError::ConfigurationError(_)));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = Estimator::new(MeanFill::default(), config().with_patience(Some(0)));
        assert!(matches!(result, Err(TrainError::ConfigurationError(_))));
    }

    #[test]
    fn test_save_and_load_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut estimator = Estimator::new(MeanFill::default(), config()).unwrap();
        estimator.fit(dataset(8), None).unwrap();
        let path = estimator.save_model(dir.path().join("models"), "mean_fill").unwrap();
        assert!(path.exists());

        let mut fresh = Estimator::new(MeanFill::default(), config()).unwrap();
        fresh.load_model(&path).unwrap();
        assert_eq!(fresh.model().estimate, estimator.model().estimate);
    }

    #[test]
    fn test_best_strategy_writes_after_fit() {
        let dir = tempfile::tempdir().unwrap();
        let config = config()
            .with_saving_path(dir.path())
            .with_saving_strategy(crate::checkpoint::SavingStrategy::Best);
        let mut estimator = Estimator::new(MeanFill::default(), config).unwrap();
        estimator.fit(dataset(8), Some(dataset(4))).unwrap();

        let records = estimator.orchestrator().checkpoints().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, dir.path().join("MeanFill.json"));
    }
}
