//! Modular step cadence for multi-optimizer training.

use std::collections::HashSet;

use crate::error::{Result, TrainError};
use crate::model::LossStream;

/// Decides which loss streams step on each batch.
///
/// Each stream has an independent counter: it fires on batch `idx` when
/// `idx % every_n_batches == 0`. Streams fire in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSchedule {
    streams: Vec<LossStream>,
}

impl StepSchedule {
    /// Build a schedule.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::ConfigurationError`] for no streams, a zero
    /// cadence or a repeated stream name.
    pub fn new(streams: Vec<LossStream>) -> Result<Self> {
        if streams.is_empty() {
            return Err(TrainError::ConfigurationError(
                "a model must declare at least one loss stream".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for stream in &streams {
            if stream.every_n_batches == 0 {
                return Err(TrainError::ConfigurationError(format!(
                    "stream '{}' has a zero step cadence",
                    stream.name
                )));
            }
            if !names.insert(stream.name.as_str()) {
                return Err(TrainError::ConfigurationError(format!(
                    "stream '{}' declared twice",
                    stream.name
                )));
            }
        }
        Ok(Self { streams })
    }

    /// The stream whose mean is the training loss.
    #[must_use]
    pub fn primary(&self) -> &LossStream {
        &self.streams[0]
    }

    /// All streams in declaration order.
    #[must_use]
    pub fn streams(&self) -> &[LossStream] {
        &self.streams
    }

    /// Streams stepping on batch `idx`.
    pub fn firing(&self, idx: usize) -> impl Iterator<Item = &LossStream> + '_ {
        self.streams
            .iter()
            .filter(move |s| idx % s.every_n_batches == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(schedule: &StepSchedule, idx: usize) -> Vec<&str> {
        schedule.firing(idx).map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_generator_discriminator_cadence() {
        let schedule = StepSchedule::new(vec![
            LossStream::new("generation_loss", 1),
            LossStream::new("discrimination_loss", 3),
        ])
        .unwrap();
        assert_eq!(schedule.primary().name, "generation_loss");
        assert_eq!(names(&schedule, 0), vec!["generation_loss", "discrimination_loss"]);
        assert_eq!(names(&schedule, 1), vec!["generation_loss"]);
        assert_eq!(names(&schedule, 2), vec!["generation_loss"]);
        assert_eq!(names(&schedule, 3), vec!["generation_loss", "discrimination_loss"]);
    }

    #[test]
    fn test_invalid_schedules() {
        assert!(StepSchedule::new(vec![]).is_err());
        assert!(StepSchedule::new(vec![LossStream::new("g", 0)]).is_err());
        assert!(StepSchedule::new(vec![LossStream::new("g", 1), LossStream::new("g", 2)]).is_err());
    }
}
