//! Consumer side: receive the configuration once, then evaluate scenarios.
//!
//! # Lifecycle
//!
//! ```text
//! Init ──▶ AwaitingConfig ──▶ Ready ──▶ Processing ──▶ Stopped
//!   │            │              │            │
//!   └────────────┴──────────────┴────────────┴──▶ Stopped (error)
//! ```
//!
//! The worker holds at most one unacknowledged scenario. A result is
//! published before its scenario is acked, so a crash between the two
//! redelivers the scenario (at-least-once).

use crate::WorkerConfig;
use indexmap::IndexMap;
use montecarlo_core::{
    AckMode, BrokerError, Channel, ConsumerTag, Delivery, DeliveryMode, ExchangeKind,
    QueueOptions, DEFAULT_EXCHANGE,
};
use montecarlo_formula::{Formula, FormulaError, Overlay};
use montecarlo_messages::{
    decode_message, encode_message, CodecError, ConfigurationMessage, ResultMessage,
    ScenarioMessage,
};
use montecarlo_types::ConfigurationError;
use std::future::Future;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Init,
    /// Subscribed to the configuration broadcast, waiting for it.
    AwaitingConfig,
    /// Configuration received and validated.
    Ready,
    /// Consuming scenarios.
    Processing,
    Stopped,
}

/// Errors that stop a worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Broker failure: {0}")]
    Broker(#[from] BrokerError),

    #[error("Undecodable configuration: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration subscription ended before a configuration arrived")]
    SubscriptionEnded,
}

/// Outcome of a worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Scenarios evaluated, with their result published and acked.
    pub processed: u64,
    /// Scenarios rejected without requeue.
    pub rejected: u64,
}

/// Why a single scenario could not be evaluated.
#[derive(Debug, Error)]
enum ScenarioFailure {
    #[error(transparent)]
    Decode(#[from] CodecError),

    #[error("formula did not compile")]
    NoFormula,

    #[error(transparent)]
    Formula(#[from] FormulaError),
}

/// Configuration as the worker uses it.
struct Evaluator {
    /// `None` when the broadcast formula failed to compile.
    formula: Option<Formula>,
    constants: IndexMap<String, f64>,
}

impl Evaluator {
    /// Validate a received configuration. An empty formula or empty
    /// constants are fatal; a formula that does not compile is not.
    fn from_message(message: ConfigurationMessage) -> Result<Self, ConfigurationError> {
        if message.formula.trim().is_empty() {
            return Err(ConfigurationError::EmptyFormula);
        }
        if message.constants.is_empty() {
            return Err(ConfigurationError::EmptyConstants);
        }

        let formula = match Formula::parse(&message.formula) {
            Ok(formula) => Some(formula),
            Err(e) => {
                warn!(formula = %message.formula, error = %e, "Formula does not compile; every scenario will be rejected");
                None
            }
        };

        Ok(Self {
            formula,
            constants: message.constants,
        })
    }

    /// Scenario values shadow constants of the same name.
    fn evaluate(&self, payload: &[u8]) -> Result<f64, ScenarioFailure> {
        let message: ScenarioMessage = decode_message(payload)?;
        let formula = self.formula.as_ref().ok_or(ScenarioFailure::NoFormula)?;
        let env = Overlay::new(message.scenario(), &self.constants);
        Ok(formula.evaluate(&env).map_err(FormulaError::from)?)
    }
}

/// Consumes scenarios from the work queue and publishes results.
pub struct Worker<C> {
    channel: C,
    config: WorkerConfig,
    state: watch::Sender<WorkerState>,
}

impl<C: Channel> Worker<C> {
    pub fn new(channel: C, config: WorkerConfig) -> Self {
        let (state, _) = watch::channel(WorkerState::Init);
        Self {
            channel,
            config,
            state,
        }
    }

    /// Observe the worker's state.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    fn set_state(&self, state: WorkerState) {
        debug!(?state, "Worker state");
        self.state.send_replace(state);
    }

    /// Run until the work queue ends or the broker fails.
    pub async fn run(&mut self) -> Result<WorkerReport, WorkerError> {
        self.run_until(std::future::pending()).await
    }

    /// Run until the work queue ends, the broker fails, or `shutdown`
    /// completes.
    pub async fn run_until(
        &mut self,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<WorkerReport, WorkerError> {
        tokio::pin!(shutdown);
        let result = self.run_inner(shutdown).await;
        self.set_state(WorkerState::Stopped);
        match &result {
            Ok(report) => info!(
                processed = report.processed,
                rejected = report.rejected,
                "Worker stopped"
            ),
            Err(e) => warn!(error = %e, "Worker failed"),
        }
        result
    }

    async fn run_inner(
        &mut self,
        mut shutdown: std::pin::Pin<&mut (impl Future<Output = ()> + Send)>,
    ) -> Result<WorkerReport, WorkerError> {
        self.declare_topology().await?;

        let evaluator = tokio::select! {
            biased;
            _ = shutdown.as_mut() => return Ok(WorkerReport::default()),
            evaluator = self.await_configuration() => evaluator?,
        };
        self.set_state(WorkerState::Ready);

        self.channel.set_prefetch(1).await?;
        let consumer = self
            .channel
            .consume(&self.config.topology.scenario_queue, AckMode::Manual)
            .await?;
        self.set_state(WorkerState::Processing);

        let mut report = WorkerReport::default();
        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.as_mut() => {
                    debug!("Stop requested");
                    self.channel.cancel(&consumer).await?;
                    break;
                }
                delivery = self.channel.next_delivery(&consumer) => delivery?,
            };
            let Some(delivery) = delivery else {
                debug!("Work queue ended");
                break;
            };
            self.process(delivery, &evaluator, &mut report).await?;
        }

        Ok(report)
    }

    async fn declare_topology(&mut self) -> Result<(), WorkerError> {
        let topology = &self.config.topology;
        self.channel
            .declare_exchange(&topology.configuration_exchange, ExchangeKind::Fanout, false)
            .await?;
        self.channel
            .declare_queue(&topology.scenario_queue, QueueOptions::durable())
            .await?;
        self.channel
            .declare_queue(&topology.result_queue, QueueOptions::default())
            .await?;

        if self.config.purge_on_start {
            let purged = self.channel.purge_queue(&topology.scenario_queue).await?;
            info!(purged, "Work queue purged");
        }
        Ok(())
    }

    /// Subscribe to the broadcast, take exactly one configuration, then drop
    /// the subscription.
    async fn await_configuration(&mut self) -> Result<Evaluator, WorkerError> {
        let exchange = self.config.topology.configuration_exchange.clone();
        let queue = self
            .channel
            .declare_queue("", QueueOptions::exclusive())
            .await?;
        self.channel.bind_queue(&queue, &exchange, "").await?;
        let consumer = self.channel.consume(&queue, AckMode::Auto).await?;
        self.set_state(WorkerState::AwaitingConfig);
        debug!(%queue, %exchange, "Waiting for configuration");

        let delivery = match self.config.config_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.channel.next_delivery(&consumer))
                .await
                .map_err(|_| ConfigurationError::NotReceived(timeout))??,
            None => self.channel.next_delivery(&consumer).await?,
        };
        let delivery = delivery.ok_or(WorkerError::SubscriptionEnded)?;

        self.release_subscription(&consumer, &queue).await?;

        let message: ConfigurationMessage = decode_message(&delivery.payload)?;
        let evaluator = Evaluator::from_message(message)?;
        info!(
            formula = evaluator.formula.as_ref().map(Formula::source).unwrap_or(""),
            constants = evaluator.constants.len(),
            "Configuration received"
        );
        Ok(evaluator)
    }

    async fn release_subscription(
        &mut self,
        consumer: &ConsumerTag,
        queue: &str,
    ) -> Result<(), WorkerError> {
        self.channel.cancel(consumer).await?;
        self.channel.delete_queue(queue).await?;
        Ok(())
    }

    async fn process(
        &mut self,
        delivery: Delivery,
        evaluator: &Evaluator,
        report: &mut WorkerReport,
    ) -> Result<(), WorkerError> {
        match evaluator.evaluate(&delivery.payload) {
            Ok(value) => {
                let payload = encode_message(&ResultMessage::new(value))?;
                self.channel
                    .publish(
                        DEFAULT_EXCHANGE,
                        &self.config.topology.result_queue,
                        payload,
                        DeliveryMode::Persistent,
                    )
                    .await?;
                self.channel.ack(delivery.tag).await?;
                report.processed += 1;
                debug!(tag = %delivery.tag, value, redelivered = delivery.redelivered, "Scenario evaluated");
            }
            Err(failure) => {
                self.channel.reject(delivery.tag, false).await?;
                report.rejected += 1;
                warn!(tag = %delivery.tag, error = %failure, "Scenario rejected");
            }
        }
        Ok(())
    }
}
