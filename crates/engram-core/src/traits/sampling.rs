//! Creative-association sampling strategy.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Strategy for picking episode pairs to probe for creative (non-obvious)
/// associations during replay.
///
/// The engine only sees this trait; "random pairs" is one implementation,
/// not the algorithm.
pub trait PairSampler: Send {
    /// Sample up to `count` distinct id pairs from `ids`. Pairs never
    /// repeat an id with itself.
    fn sample_pairs(&mut self, ids: &[String], count: usize) -> Vec<(String, String)>;
}

/// Uniform random pairing with a seeded RNG for reproducible runs.
pub struct RandomPairSampler {
    rng: StdRng,
}

impl RandomPairSampler {
    /// Create a sampler from a seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl PairSampler for RandomPairSampler {
    fn sample_pairs(&mut self, ids: &[String], count: usize) -> Vec<(String, String)> {
        if ids.len() < 2 {
            return Vec::new();
        }
        let mut pairs = Vec::with_capacity(count);
        for _ in 0..count {
            let a = self.rng.gen_range(0..ids.len());
            let mut b = self.rng.gen_range(0..ids.len() - 1);
            if b >= a {
                b += 1;
            }
            pairs.push((ids[a].clone(), ids[b].clone()));
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("ep{}", i)).collect()
    }

    #[test]
    fn test_no_self_pairs() {
        let mut sampler = RandomPairSampler::new(7);
        for (a, b) in sampler.sample_pairs(&ids(10), 100) {
            assert_ne!(a, b);
        }
    }

    #[test]
    fn test_seeded_sampling_is_deterministic() {
        let pool = ids(20);
        let first = RandomPairSampler::new(42).sample_pairs(&pool, 10);
        let second = RandomPairSampler::new(42).sample_pairs(&pool, 10);
        assert_eq!(first, second);
    }

    #[test]
    fn test_too_few_ids_yields_nothing() {
        let mut sampler = RandomPairSampler::new(1);
        assert!(sampler.sample_pairs(&ids(1), 5).is_empty());
        assert!(sampler.sample_pairs(&[], 5).is_empty());
    }
}
