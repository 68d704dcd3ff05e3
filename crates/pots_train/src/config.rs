//! Trainer configuration.

use std::path::{Path, PathBuf};

use pots_compute::DeviceSpec;
use pots_core::Seed;
use serde::{Deserialize, Serialize};

use crate::checkpoint::SavingStrategy;
use crate::error::{Result, TrainError};

/// Configuration shared by every estimator.
///
/// # Example
///
/// ```rust,ignore
/// use pots_train::{SavingStrategy, TrainerConfig};
///
/// let config = TrainerConfig::default()
///     .with_epochs(50)
///     .with_patience(Some(5))
///     .with_saving_path("runs/brits")
///     .with_saving_strategy(SavingStrategy::Better);
/// config.validate()?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Maximum number of epochs.
    pub epochs: usize,
    /// Samples per batch.
    pub batch_size: usize,
    /// Non-improving epochs tolerated before stopping. `None` disables early stopping.
    pub patience: Option<usize>,
    /// Background loader workers (0 = load in the calling thread).
    pub num_workers: usize,
    /// Devices to train on.
    pub device: DeviceSpec,
    /// Directory for checkpoints. `None` disables automatic saving.
    pub saving_path: Option<PathBuf>,
    /// When checkpoints are written.
    pub saving_strategy: SavingStrategy,
    /// Seed for shuffling. `None` draws one from entropy.
    pub seed: Option<u64>,
    /// Learning rate.
    pub lr: f64,
    /// Optional weight decay.
    pub weight_decay: Option<f32>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 32,
            patience: None,
            num_workers: 0,
            device: DeviceSpec::Auto,
            saving_path: None,
            saving_strategy: SavingStrategy::Best,
            seed: None,
            lr: 1e-3,
            weight_decay: None,
        }
    }
}

impl TrainerConfig {
    /// Set the number of epochs.
    #[must_use]
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Set the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the patience.
    #[must_use]
    pub fn with_patience(mut self, patience: Option<usize>) -> Self {
        self.patience = patience;
        self
    }

    /// Set the number of loader workers.
    #[must_use]
    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Set the device specification.
    #[must_use]
    pub fn with_device(mut self, device: DeviceSpec) -> Self {
        self.device = device;
        self
    }

    /// Set the checkpoint directory.
    #[must_use]
    pub fn with_saving_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.saving_path = Some(path.into());
        self
    }

    /// Set the checkpoint strategy.
    #[must_use]
    pub fn with_saving_strategy(mut self, strategy: SavingStrategy) -> Self {
        self.saving_strategy = strategy;
        self
    }

    /// Set the shuffle seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the learning rate.
    #[must_use]
    pub fn with_lr(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    /// Set the weight decay.
    #[must_use]
    pub fn with_weight_decay(mut self, weight_decay: Option<f32>) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// The shuffle seed, drawn from entropy when unset.
    #[must_use]
    pub fn shuffle_seed(&self) -> Seed {
        self.seed.map_or_else(Seed::from_entropy, Seed::new)
    }

    /// Check the configuration for invalid values.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::ConfigurationError`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(TrainError::ConfigurationError(
                "epochs must be positive".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(TrainError::ConfigurationError(
                "batch_size must be positive".to_string(),
            ));
        }
        if self.patience == Some(0) {
            return Err(TrainError::ConfigurationError(
                "patience must be positive; use None to disable early stopping".to_string(),
            ));
        }
        if let Some(patience) = self.patience {
            if patience > self.epochs {
                return Err(TrainError::ConfigurationError(format!(
                    "patience ({patience}) exceeds epochs ({})",
                    self.epochs
                )));
            }
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(TrainError::ConfigurationError(format!(
                "learning rate must be positive, got {}",
                self.lr
            )));
        }
        Ok(())
    }

    /// Load a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write the configuration to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pots_compute::DeviceId;

    #[test]
    fn test_config_default() {
        let config = TrainerConfig::default();
        assert_eq!(config.epochs, 100);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.saving_strategy, SavingStrategy::Best);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_patience() {
        let config = TrainerConfig::default().with_patience(Some(0));
        assert!(matches!(config.validate(), Err(TrainError::ConfigurationError(_))));
        let config = TrainerConfig::default().with_epochs(3).with_patience(Some(4));
        assert!(config.validate().is_err());
        assert!(TrainerConfig::default().with_lr(0.0).validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = TrainerConfig::default()
            .with_epochs(7)
            .with_patience(Some(2))
            .with_device(DeviceSpec::Single(DeviceId::cpu()))
            .with_saving_strategy(SavingStrategy::Better)
            .with_seed(11);
        config.to_json_file(&path).unwrap();
        assert_eq!(TrainerConfig::from_json_file(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: TrainerConfig =
            serde_json::from_str(r#"{"epochs": 5, "saving_strategy": "none", "device": ["cpu"]}"#)
                .unwrap();
        assert_eq!(config.epochs, 5);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.saving_strategy, SavingStrategy::None);
        assert_eq!(config.device, DeviceSpec::Multi(vec![DeviceId::cpu()]));
    }
}
