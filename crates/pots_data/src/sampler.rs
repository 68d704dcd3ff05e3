//! Sampling strategies deciding the sample order of each epoch.

use rand::seq::SliceRandom;

use pots_core::Seed;

/// Produces the sample order for one pass over a dataset.
pub trait Sampler: Send + Sync {
    /// Indices to visit during `epoch`, for a dataset of `n` samples.
    fn indices(&self, n: usize, epoch: usize) -> Vec<usize>;
}

/// Visits samples in their original order.
///
/// Used for validation and prediction so outputs align with inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialSampler;

impl Sampler for SequentialSampler {
    fn indices(&self, n: usize, _epoch: usize) -> Vec<usize> {
        (0..n).collect()
    }
}

/// Shuffles samples anew every epoch.
///
/// The order of epoch `e` depends only on the seed and `e`, so a fixed seed
/// reproduces a whole run.
#[derive(Debug, Clone, Copy)]
pub struct RandomSampler {
    seed: Seed,
}

impl RandomSampler {
    /// Create a shuffling sampler with a fixed seed.
    #[must_use]
    pub fn new(seed: Seed) -> Self {
        Self { seed }
    }

    /// Create a shuffling sampler seeded from the clock.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self::new(Seed::from_entropy())
    }
}

impl Sampler for RandomSampler {
    fn indices(&self, n: usize, epoch: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(&mut self.seed.for_epoch(epoch).to_rng());
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_sampler() {
        assert_eq!(SequentialSampler.indices(5, 3), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_random_sampler_is_a_permutation() {
        let sampler = RandomSampler::new(Seed::new(42));
        let mut indices = sampler.indices(100, 0);
        assert_ne!(indices, (0..100).collect::<Vec<_>>());
        indices.sort_unstable();
        assert_eq!(indices, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_random_sampler_epochs() {
        let sampler = RandomSampler::new(Seed::new(42));
        assert_eq!(sampler.indices(50, 2), RandomSampler::new(Seed::new(42)).indices(50, 2));
        assert_ne!(sampler.indices(50, 0), sampler.indices(50, 1));
    }
}
