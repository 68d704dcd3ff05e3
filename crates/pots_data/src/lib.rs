//! # pots_data
//!
//! Missingness-aware data preparation for pots-rs.
//!
//! This crate provides:
//! - [`DeltaEncoder`] for time-gap encoding of observation masks
//! - [`SampleView`] for forward and time-reversed backward sample views
//! - [`PotsDataset`] with eager (in-memory) and lazy (on-disk) backing
//! - [`PotsDataLoader`] for batched iteration with background workers
//! - Backing stores ([`MemoryStore`], [`NpyDirStore`]) and NumPy readers
//!
//! ## Missing values
//!
//! An entry is missing when it is not finite. Missing entries are replaced
//! by a neutral fill value and recorded as 0 in the observation mask.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pots_core::{Seed, Stage};
//! use pots_data::{read_npz, PotsDataLoader, PotsDataset, SampleViewConfig};
//!
//! let train_set = PotsDataset::eager(read_npz("train.npz")?, SampleViewConfig::default())?
//!     .with_return_labels(false);
//! let loader = PotsDataLoader::builder(train_set)
//!     .batch_size(32)
//!     .stage(Stage::Train)
//!     .seed(Seed::new(42))
//!     .build()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod batch;
mod dataset;
mod delta;
mod error;
mod io;
mod loader;
mod npy;
mod sampler;
mod source;
mod store;
mod view;

pub use batch::{to_tensor1, to_tensor3, DirectionBatch, GroundTruthBatch, SampleBatch};
pub use dataset::{DatasetItem, DatasetWorker, PotsDataset};
pub use delta::{DeltaEncoder, StepGap};
pub use error::{DataError, Result};
pub use io::{read_npy, read_npz};
pub use loader::{LoaderIter, PotsDataLoader, PotsDataLoaderBuilder};
pub use npy::NpyDirStore;
pub use sampler::{RandomSampler, Sampler, SequentialSampler};
pub use source::{keys, NamedArrays};
pub use store::{ArrayStore, MemoryStore, StoreHandle, StoreLayout};
pub use view::{
    reversed_in_time, BidirectionalSample, GroundTruth, Sample, SampleView, SampleViewConfig,
};
