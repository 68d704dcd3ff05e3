//! Callback system for training hooks.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::orchestrator::{EpochRecord, TrainingHistory};

/// Context passed to callbacks containing training state.
#[derive(Debug, Clone)]
pub struct CallbackContext {
    /// Current epoch (0-indexed).
    pub epoch: usize,
    /// Total number of epochs.
    pub n_epochs: usize,
    /// Number of training batches per epoch.
    pub n_batches: usize,
    /// Mean training loss per stream for the current epoch.
    pub train_losses: BTreeMap<String, f32>,
    /// Validation loss of the current epoch.
    pub valid_loss: Option<f32>,
    /// Best loss so far.
    pub best_loss: f32,
    /// Whether the current epoch improved on the best loss.
    pub improved: bool,
    /// Non-improving epochs left before stopping, if early stopping is on.
    pub patience_remaining: Option<usize>,
}

impl CallbackContext {
    /// Create a new callback context.
    pub fn new(n_epochs: usize, n_batches: usize) -> Self {
        Self {
            epoch: 0,
            n_epochs,
            n_batches,
            train_losses: BTreeMap::new(),
            valid_loss: None,
            best_loss: f32::INFINITY,
            improved: false,
            patience_remaining: None,
        }
    }

    /// The epoch summary this context describes.
    pub fn record(&self) -> EpochRecord {
        EpochRecord {
            epoch: self.epoch,
            train_losses: self.train_losses.clone(),
            valid_loss: self.valid_loss,
            improved: self.improved,
        }
    }
}

/// Trait for training callbacks.
///
/// An error from `after_epoch` interrupts the epoch like any other failure
/// inside it.
pub trait Callback: Send {
    /// Called before training starts.
    fn before_fit(&mut self, _ctx: &CallbackContext) -> Result<()> {
        Ok(())
    }

    /// Called after each completed epoch.
    fn after_epoch(&mut self, _ctx: &CallbackContext) -> Result<()> {
        Ok(())
    }

    /// Called once training has finished with a usable model: converged,
    /// out of patience, or recovered from an interruption.
    ///
    /// Not called when `fit` returns an error.
    fn after_fit(&mut self, _ctx: &CallbackContext) -> Result<()> {
        Ok(())
    }

    /// Get the callback name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A list of callbacks.
#[derive(Default)]
pub struct CallbackList {
    callbacks: Vec<Box<dyn Callback>>,
}

impl std::fmt::Debug for CallbackList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.callbacks.iter().map(|cb| cb.name()))
            .finish()
    }
}

impl CallbackList {
    /// Create a new empty callback list.
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    /// Add a callback.
    pub fn add<C: Callback + 'static>(&mut self, callback: C) {
        self.callbacks.push(Box::new(callback));
    }

    /// Number of callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Check if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Call before_fit on all callbacks.
    pub fn before_fit(&mut self, ctx: &CallbackContext) -> Result<()> {
        for cb in &mut self.callbacks {
            cb.before_fit(ctx)?;
        }
        Ok(())
    }

    /// Call after_epoch on all callbacks.
    pub fn after_epoch(&mut self, ctx: &CallbackContext) -> Result<()> {
        for cb in &mut self.callbacks {
            cb.after_epoch(ctx)?;
        }
        Ok(())
    }

    /// Call after_fit on all callbacks.
    pub fn after_fit(&mut self, ctx: &CallbackContext) -> Result<()> {
        for cb in &mut self.callbacks {
            cb.after_fit(ctx)?;
        }
        Ok(())
    }
}

/// Logs epoch summaries through `tracing`.
#[derive(Debug, Default)]
pub struct ProgressCallback;

impl ProgressCallback {
    /// Create a new progress callback.
    pub fn new() -> Self {
        Self
    }
}

impl Callback for ProgressCallback {
    fn before_fit(&mut self, ctx: &CallbackContext) -> Result<()> {
        tracing::info!("Starting training for {} epochs", ctx.n_epochs);
        Ok(())
    }

    fn after_epoch(&mut self, ctx: &CallbackContext) -> Result<()> {
        let train: Vec<String> = ctx
            .train_losses
            .iter()
            .map(|(name, loss)| format!("{name}={loss:.4}"))
            .collect();
        let valid_loss = ctx.valid_loss.map(|l| format!("{l:.4}")).unwrap_or_default();
        let marker = if ctx.improved { " *" } else { "" };

        tracing::info!(
            "Epoch {}/{}: training {}, valid_loss={}{}",
            ctx.epoch + 1,
            ctx.n_epochs,
            train.join(", "),
            valid_loss,
            marker
        );
        Ok(())
    }

    fn after_fit(&mut self, ctx: &CallbackContext) -> Result<()> {
        tracing::info!("Finished training, best loss {:.4}", ctx.best_loss);
        Ok(())
    }

    fn name(&self) -> &str {
        "ProgressCallback"
    }
}

/// Records every epoch summary.
///
/// Clones share the same history, so keep one clone to read it after
/// handing the other to a [`CallbackList`].
#[derive(Debug, Clone, Default)]
pub struct HistoryCallback {
    history: Arc<Mutex<TrainingHistory>>,
}

impl HistoryCallback {
    /// Create a new history callback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the history recorded so far.
    pub fn history(&self) -> TrainingHistory {
        self.history.lock().clone()
    }
}

impl Callback for HistoryCallback {
    fn before_fit(&mut self, _ctx: &CallbackContext) -> Result<()> {
        *self.history.lock() = TrainingHistory::default();
        Ok(())
    }

    fn after_epoch(&mut self, ctx: &CallbackContext) -> Result<()> {
        self.history.lock().push(ctx.record());
        Ok(())
    }

    fn name(&self) -> &str {
        "HistoryCallback"
    }
}
