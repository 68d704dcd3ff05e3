//! The role a dataset plays in a training run.

use serde::{Deserialize, Serialize};

/// Which loop a dataset feeds.
///
/// The stage decides whether batches are shuffled and whether gradients
/// are tracked. Validation and prediction keep the original sample order
/// so outputs align with input indices.
///
/// # Example
///
/// ```rust
/// use pots_core::Stage;
///
/// assert!(Stage::Train.shuffles());
/// assert!(!Stage::Predict.shuffles());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Stage {
    /// Optimization loop.
    #[default]
    Train,
    /// Held-out loss evaluation, gradients disabled.
    Validate,
    /// Label-blind inference.
    Predict,
}

impl Stage {
    /// Whether loaders shuffle sample order by default at this stage.
    #[must_use]
    pub const fn shuffles(&self) -> bool {
        matches!(self, Stage::Train)
    }

    /// Whether the model tracks gradients at this stage.
    #[must_use]
    pub const fn tracks_gradients(&self) -> bool {
        matches!(self, Stage::Train)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Train => write!(f, "train"),
            Stage::Validate => write!(f, "val"),
            Stage::Predict => write!(f, "test"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_training_shuffles() {
        assert!(Stage::Train.shuffles());
        assert!(!Stage::Validate.shuffles());
        assert!(!Stage::Predict.shuffles());
        assert!(!Stage::Validate.tracks_gradients());
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Validate.to_string(), "val");
    }
}
