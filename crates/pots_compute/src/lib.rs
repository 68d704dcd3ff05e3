//! # pots_compute
//!
//! Device resolution for pots-rs.
//!
//! This crate turns a requested [`DeviceSpec`] into a [`DevicePlan`]:
//!
//! - **Auto**: the highest-priority accelerator of the backend, else the CPU
//! - **Single**: exactly the named device
//! - **Multi**: replicated data parallelism over every listed device
//!
//! Requests naming a device the backend does not have fail with
//! [`ComputeError::UnsupportedDevice`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pots_compute::{DeviceCatalog, DeviceDispatcher, DeviceSpec};
//!
//! let dispatcher = DeviceDispatcher::new(DeviceCatalog::ndarray());
//! let plan = dispatcher.resolve(&"cpu".parse::<DeviceSpec>()?)?;
//! let model = plan.place(model);
//! ```
//!
//! ## Feature Flags
//!
//! - `backend-ndarray` (default): [`DeviceCatalog::ndarray`]
//! - `backend-wgpu`: `DeviceCatalog::wgpu`

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod catalog;
mod device;
mod dispatch;
mod error;

pub use catalog::DeviceCatalog;
pub use device::{DeviceId, DeviceKind};
pub use dispatch::{DeviceDispatcher, DevicePlan, DeviceSpec, Placement};
pub use error::{ComputeError, ComputeResult};
