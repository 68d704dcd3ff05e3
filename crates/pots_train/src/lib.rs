//! # pots_train
//!
//! Training orchestration, checkpointing, and prediction for pots-rs.
//!
//! This crate provides:
//! - [`TrainingOrchestrator`], the epoch loop as an explicit state machine
//!   with early stopping and recovery from interrupted epochs
//! - [`CheckpointManager`] with the `none`, `best` and `better` strategies
//! - [`StepSchedule`] for multi-optimizer models whose loss streams step at
//!   independent cadences
//! - [`Estimator`], the `fit` / `predict` facade
//! - [`adapter::BurnTrainer`], which trains any burn module implementing
//!   [`adapter::PotsModule`], optionally replicated across devices
//!
//! ## Example
//!
//! ```rust,ignore
//! use pots_compute::{DeviceCatalog, DeviceDispatcher};
//! use pots_train::{adapter::BurnTrainer, Estimator, SavingStrategy, TrainerConfig};
//!
//! let config = TrainerConfig::default()
//!     .with_epochs(50)
//!     .with_patience(Some(5))
//!     .with_saving_path("runs/brits")
//!     .with_saving_strategy(SavingStrategy::Better);
//! let dispatcher = DeviceDispatcher::new(DeviceCatalog::ndarray());
//! let trainer = BurnTrainer::from_config(model, &dispatcher, &config)?;
//!
//! let mut estimator = Estimator::new(trainer, config)?;
//! estimator.fit(train_set, Some(val_set))?;
//! let result = estimator.predict(test_set)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod callback;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod estimator;
pub mod model;
pub mod orchestrator;
pub mod predict;
pub mod schedule;

pub use callback::{Callback, CallbackContext, CallbackList, HistoryCallback, ProgressCallback};
pub use checkpoint::{CheckpointManager, CheckpointRecord, SavingStrategy};
pub use config::TrainerConfig;
pub use error::{Result, TrainError};
pub use estimator::Estimator;
pub use model::{LossStream, Trainable};
pub use orchestrator::{
    EpochRecord, FitReport, Phase, TrainingHistory, TrainingOrchestrator, TrainingState,
};
pub use predict::{BatchOutput, InferenceResult, Predictor, ResultKey};
pub use schedule::StepSchedule;
