use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Derives an independent RNG stream per generation task.
///
/// Task `i` always gets ChaCha8 stream `i` of the run seed, so the scenario
/// produced for a given index depends only on the seed and the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSource {
    seed: u64,
}

impl SeedSource {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Pick a fresh seed from the OS-seeded thread RNG.
    pub fn from_entropy() -> Self {
        Self::new(rand::thread_rng().gen())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// RNG for the task with the given index.
    pub fn rng_for(&self, index: u64) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(index);
        rng
    }
}
