//! Parallel scenario generation on a rayon pool.

use crate::{GeneratorError, SamplingPlan, SeedSource};
use montecarlo_types::Scenario;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Configuration for a [`ParallelGenerator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Worker threads; `None` uses the available hardware concurrency.
    pub threads: Option<usize>,

    /// Scenarios buffered between the pool and the consumer.
    pub channel_capacity: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            threads: None,
            channel_capacity: 1024,
        }
    }
}

impl GeneratorConfig {
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads.max(1));
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Thread count after resolving the hardware default.
    pub fn resolved_threads(&self) -> usize {
        self.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// Generates scenarios on a dedicated rayon pool.
///
/// Every index gets its own RNG from the [`SeedSource`], so the scenario for
/// an index is the same regardless of pool size or scheduling; only the
/// arrival order varies.
pub struct ParallelGenerator {
    plan: Arc<SamplingPlan>,
    seeds: SeedSource,
    pool: ThreadPool,
    channel_capacity: usize,
}

impl ParallelGenerator {
    pub fn new(
        plan: SamplingPlan,
        seeds: SeedSource,
        config: GeneratorConfig,
    ) -> Result<Self, GeneratorError> {
        let threads = config.resolved_threads();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("montecarlo-gen-{i}"))
            .build()?;

        debug!(threads, seed = seeds.seed(), "Scenario generator ready");

        Ok(Self {
            plan: Arc::new(plan),
            seeds,
            pool,
            channel_capacity: config.channel_capacity,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seeds.seed()
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Generate the scenarios for `indices` in the background.
    ///
    /// Scenarios arrive on the returned receiver in completion order, tagged
    /// with their index. Generation stops early once the receiver is dropped.
    /// Must not be called from inside the generation pool.
    pub fn generate(&self, indices: Range<u64>) -> mpsc::Receiver<(u64, Scenario)> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let plan = Arc::clone(&self.plan);
        let seeds = self.seeds;

        self.pool.spawn(move || {
            let outcome = indices.clone().into_par_iter().try_for_each_with(tx, |tx, index| {
                let scenario = plan.sample(&mut seeds.rng_for(index));
                trace!(index, "Scenario generated");
                tx.blocking_send((index, scenario)).map_err(|_| ())
            });
            if outcome.is_err() {
                debug!(?indices, "Scenario receiver dropped; generation stopped");
            }
        });

        rx
    }

    /// Generate the scenarios for `indices` and return them in index order.
    pub fn generate_blocking(&self, indices: Range<u64>) -> Vec<Scenario> {
        let plan = &self.plan;
        let seeds = self.seeds;
        self.pool.install(|| {
            indices
                .into_par_iter()
                .map(|index| plan.sample(&mut seeds.rng_for(index)))
                .collect()
        })
    }
}
