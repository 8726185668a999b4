//! Local simulation runner.

use crate::{ResultAggregator, ResultSummary, SimulatorConfig};
use montecarlo_core::{BrokerError, Channel, QueueOptions};
use montecarlo_production::{
    DistributionReport, Distributor, DistributorError, Worker, WorkerError, WorkerReport,
    WorkerState,
};
use montecarlo_simulation::InMemoryBroker;
use montecarlo_types::ModelConfiguration;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

/// Errors that abort a simulation.
#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error(transparent)]
    Distributor(#[from] DistributorError),

    #[error("Worker {index} failed: {source}")]
    Worker {
        index: usize,
        #[source]
        source: WorkerError,
    },

    #[error("Result aggregation failed: {0}")]
    Broker(#[from] BrokerError),

    #[error("Task panicked: {0}")]
    Task(#[from] JoinError),
}

/// Outcome of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub distribution: DistributionReport,
    pub workers: Vec<WorkerReport>,
    pub results: ResultSummary,
    pub elapsed: Duration,
}

impl SimulationReport {
    /// Scenarios evaluated across all workers.
    pub fn processed(&self) -> u64 {
        self.workers.iter().map(|w| w.processed).sum()
    }

    /// Scenarios rejected across all workers.
    pub fn rejected(&self) -> u64 {
        self.workers.iter().map(|w| w.rejected).sum()
    }

    pub fn print(&self) {
        print!("{self}");
    }
}

impl std::fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let d = &self.distribution;
        writeln!(f, "Simulation finished in {:.2?}", self.elapsed)?;
        writeln!(f, "  Seed:      {}", d.seed)?;
        writeln!(f, "  Requested: {}", d.requested)?;
        writeln!(f, "  Delivered: {} ({} duplicates)", d.delivered, d.duplicates)?;
        writeln!(f, "  Processed: {}", self.processed())?;
        writeln!(f, "  Rejected:  {}", self.rejected())?;
        for (index, worker) in self.workers.iter().enumerate() {
            writeln!(
                f,
                "    worker {index}: {} processed, {} rejected",
                worker.processed, worker.rejected
            )?;
        }
        write!(f, "{}", self.results)
    }
}

/// Runs one distributor, N workers and a result aggregator in one process.
pub struct Simulator {
    config: SimulatorConfig,
    broker: InMemoryBroker,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            broker: InMemoryBroker::new(),
        }
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    pub async fn run(&self, model: &ModelConfiguration) -> Result<SimulationReport, SimulatorError> {
        let started = Instant::now();
        let topology = self.config.distributor.topology.clone();
        let worker_config = self.config.worker.clone().with_topology(topology.clone());

        // Workers must be bound to the broadcast exchange before the
        // configuration is published, or they never receive it.
        let mut workers = JoinSet::new();
        for index in 0..self.config.workers {
            let mut worker = Worker::new(self.broker.channel(), worker_config.clone());
            let mut state = worker.subscribe();
            workers.spawn(async move { (index, worker.run().await) });
            // A closed sender means the worker already finished; its result
            // is collected below.
            let _ = state.wait_for(|s| *s != WorkerState::Init).await;
        }
        info!(workers = self.config.workers, "Workers subscribed");

        // The result queue is ready, and optionally emptied, before the first
        // scenario goes out.
        let mut results_channel = self.broker.channel();
        results_channel
            .declare_queue(&topology.result_queue, QueueOptions::default())
            .await?;
        if self.config.purge_results {
            let purged = results_channel.purge_queue(&topology.result_queue).await?;
            if purged > 0 {
                info!(purged, queue = %topology.result_queue, "Discarded stale results");
            }
        }

        let (done_tx, done_rx) = watch::channel(false);
        let aggregator = tokio::spawn(aggregate(
            results_channel,
            topology.result_queue.clone(),
            self.config.poll_interval,
            done_rx,
        ));

        let mut distributor = Distributor::new(self.broker.channel(), self.config.distributor.clone());
        let distribution = distributor.run(model).await;
        // Let workers end once the queue drains, whatever the outcome.
        self.broker.close_queue(&topology.scenario_queue);
        let distribution = distribution?;

        let mut reports = vec![WorkerReport::default(); self.config.workers];
        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            let (index, result) = joined?;
            match result {
                Ok(report) => reports[index] = report,
                Err(source) => {
                    warn!(index, error = %source, "Worker failed");
                    failure.get_or_insert(SimulatorError::Worker { index, source });
                }
            }
        }

        let _ = done_tx.send(true);
        let results = aggregator.await??;

        if let Some(failure) = failure {
            return Err(failure);
        }

        let report = SimulationReport {
            distribution,
            workers: reports,
            results,
            elapsed: started.elapsed(),
        };
        info!(
            delivered = report.distribution.delivered,
            processed = report.processed(),
            rejected = report.rejected(),
            results = report.results.count,
            "Simulation complete"
        );
        Ok(report)
    }
}

/// Poll the declared result queue until told to stop, then drain it one
/// last time.
async fn aggregate<C: Channel>(
    mut channel: C,
    queue: String,
    interval: Duration,
    mut done: watch::Receiver<bool>,
) -> Result<ResultSummary, BrokerError> {
    let mut aggregator = ResultAggregator::new();
    loop {
        aggregator.poll(&mut channel, &queue).await?;
        if *done.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = done.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    aggregator.poll(&mut channel, &queue).await?;

    debug!(count = aggregator.count(), "Aggregation finished");
    Ok(aggregator.summary())
}
