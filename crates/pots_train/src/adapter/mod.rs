//! burn implementation of the [`crate::Trainable`] contract.
//!
//! A model implements [`PotsModule`] on the autodiff backend and
//! [`PotsInference`] on its inner backend; [`BurnTrainer`] then provides
//! per-stream optimizers, replicated data-parallel steps, snapshots and
//! `.mpk` persistence.

mod inputs;
mod module;
mod trainer;

pub use inputs::{DirectionTensors, GroundTruthTensors, InputKind, ModelInputs};
pub use module::{ModelOutput, PotsInference, PotsModule};
pub use trainer::{adam_config, BurnSnapshot, BurnTrainer, StreamOptimizer};
