//! # pots_core
//!
//! Core types shared by every pots-rs crate.
//!
//! This crate provides:
//! - [`Seed`] for deterministic shuffling and initialization
//! - [`SeriesShape`] for `(N, T, F)` shape metadata of partially-observed series
//! - [`Stage`] for the role a dataset plays (train, validate, predict)
//! - Error types and common utilities
//!
//! ## Shape Convention
//!
//! Partially-observed time series follow the convention `(N, T, F)`:
//! - `N`: Number of samples (or batch size)
//! - `T`: Time steps
//! - `F`: Features
//!
//! A single sample is a `(T, F)` matrix.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pots_core::{Seed, SeriesShape, Stage};
//!
//! let seed = Seed::new(42);
//! let shape = SeriesShape::new(128, 48, 35); // samples=128, steps=48, features=35
//! assert!(Stage::Train.shuffles());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod seed;
mod shape;
mod stage;

pub use error::{CoreError, Result};
pub use seed::Seed;
pub use shape::SeriesShape;
pub use stage::Stage;
