//! Configuration types for the simulator.

use montecarlo_production::{DistributorConfig, WorkerConfig};
use std::time::Duration;

/// Configuration for a local simulation run.
#[derive(Clone, Debug)]
pub struct SimulatorConfig {
    /// Number of concurrent workers.
    pub workers: usize,

    /// Producer settings (seed, threads, duplicate policy, topology).
    pub distributor: DistributorConfig,

    /// Settings shared by every worker.
    pub worker: WorkerConfig,

    /// How often the aggregator polls the result queue.
    pub poll_interval: Duration,

    /// Drop results left over from earlier runs before aggregating.
    pub purge_results: bool,
}

impl SimulatorConfig {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            distributor: DistributorConfig::default(),
            worker: WorkerConfig::default(),
            poll_interval: Duration::from_millis(50),
            purge_results: false,
        }
    }

    pub fn with_distributor(mut self, distributor: DistributorConfig) -> Self {
        self.distributor = distributor;
        self
    }

    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }

    /// Set the generation seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.distributor = self.distributor.with_seed(seed);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_purge_results(mut self, purge: bool) -> Self {
        self.purge_results = purge;
        self
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self::new(4)
    }
}
