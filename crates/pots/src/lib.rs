//! # pots
//!
//! Training core for neural models of partially-observed time series.
//!
//! pots-rs provides the parts every imputation, classification, clustering
//! and forecasting model shares:
//!
//! - **Data**: delta (time-gap) encoding, bidirectional sample views, eager
//!   and lazy datasets, concurrent loaders
//! - **Compute**: device resolution and replicated data-parallel plans
//! - **Training**: the epoch state machine with early stopping, recovery from
//!   interrupted epochs, multi-optimizer step schedules and checkpointing
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pots::prelude::*;
//!
//! let train_set = PotsDataset::eager(read_npz("train.npz")?, SampleViewConfig::default())?;
//! let val_set = PotsDataset::eager(read_npz("val.npz")?, SampleViewConfig::default())?;
//!
//! let config = TrainerConfig::default()
//!     .with_epochs(100)
//!     .with_patience(Some(10))
//!     .with_saving_path("runs/imputer");
//! let dispatcher = DeviceDispatcher::new(DeviceCatalog::ndarray());
//! let trainer = BurnTrainer::from_config(model, &dispatcher, &config)?;
//!
//! let mut estimator = Estimator::new(trainer, config)?;
//! estimator.fit(train_set, Some(val_set))?;
//! let imputation = estimator.predict(test_set)?.take(ResultKey::Imputation);
//! ```
//!
//! ## Feature Flags
//!
//! - `backend-ndarray` (default): CPU device catalog
//! - `backend-wgpu`: GPU device catalog through WGPU

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Re-export all crates
pub use pots_compute as compute;
pub use pots_core as core;
pub use pots_data as data;
pub use pots_train as train;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use pots::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use pots_core::{Seed, SeriesShape, Stage};

    // Data
    pub use pots_data::{
        read_npy, read_npz, DeltaEncoder, MemoryStore, NamedArrays, NpyDirStore, PotsDataLoader,
        PotsDataset, SampleBatch, SampleView, SampleViewConfig, StepGap,
    };

    // Compute
    pub use pots_compute::{DeviceCatalog, DeviceDispatcher, DeviceId, DevicePlan, DeviceSpec};

    // Training
    pub use pots_train::adapter::{
        BurnTrainer, InputKind, ModelInputs, ModelOutput, PotsInference, PotsModule,
    };
    pub use pots_train::{
        Callback, CheckpointManager, Estimator, FitReport, HistoryCallback, InferenceResult,
        LossStream, Phase, ResultKey, SavingStrategy, Trainable, TrainError, TrainerConfig,
        TrainingOrchestrator,
    };
}
