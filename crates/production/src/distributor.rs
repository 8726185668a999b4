//! Producer side: broadcast the configuration, then stream scenarios.

use crate::{DistributorConfig, DuplicatePolicy};
use montecarlo_core::{BrokerError, Channel, DeliveryMode, ExchangeKind, QueueOptions, DEFAULT_EXCHANGE};
use montecarlo_generator::{GeneratorConfig, GeneratorError, ParallelGenerator, SamplingPlan, SeedSource};
use montecarlo_messages::{encode_message, CodecError, ConfigurationMessage, ScenarioMessage};
use montecarlo_types::{ConfigurationError, ModelConfiguration};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that abort a distribution run.
#[derive(Debug, Error)]
pub enum DistributorError {
    #[error("Invalid model: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error("Broker failure: {0}")]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Outcome of a distribution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributionReport {
    /// Scenarios the model asked for.
    pub requested: u64,
    /// Scenarios drawn, duplicates included.
    pub generated: u64,
    /// Unique scenarios published.
    pub delivered: u64,
    /// Draws skipped as exact repeats.
    pub duplicates: u64,
    /// Seed the run used; rerunning with it reproduces the same scenarios.
    pub seed: u64,
}

impl DistributionReport {
    pub fn shortfall(&self) -> u64 {
        self.requested.saturating_sub(self.delivered)
    }
}

/// Publishes one model's configuration and scenarios.
///
/// The distributor is the only publisher: it owns the channel and the set of
/// already-published payloads, while generation runs on a separate pool.
pub struct Distributor<C> {
    channel: C,
    config: DistributorConfig,
}

impl<C: Channel> Distributor<C> {
    pub fn new(channel: C, config: DistributorConfig) -> Self {
        Self { channel, config }
    }

    pub fn config(&self) -> &DistributorConfig {
        &self.config
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Load a model document and distribute it.
    pub async fn run_from_path(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<DistributionReport, DistributorError> {
        let model = ModelConfiguration::from_path(path)?;
        self.run(&model).await
    }

    /// Declare topology, broadcast the configuration, then publish scenarios.
    pub async fn run(
        &mut self,
        model: &ModelConfiguration,
    ) -> Result<DistributionReport, DistributorError> {
        self.declare_topology().await?;
        self.publish_configuration(model).await?;
        self.publish_scenarios(model).await
    }

    /// Declare the configuration exchange and the durable work queue.
    pub async fn declare_topology(&mut self) -> Result<(), DistributorError> {
        let topology = &self.config.topology;
        self.channel
            .declare_exchange(&topology.configuration_exchange, ExchangeKind::Fanout, false)
            .await?;
        self.channel
            .declare_queue(&topology.scenario_queue, QueueOptions::durable())
            .await?;
        debug!(
            exchange = %topology.configuration_exchange,
            queue = %topology.scenario_queue,
            "Producer topology declared"
        );
        Ok(())
    }

    /// Broadcast formula and constants. Only subscribers already bound to
    /// the exchange receive it.
    pub async fn publish_configuration(
        &mut self,
        model: &ModelConfiguration,
    ) -> Result<(), DistributorError> {
        let message = ConfigurationMessage::from(model.configuration_for_broadcast());
        let payload = encode_message(&message)?;
        self.channel
            .publish(
                &self.config.topology.configuration_exchange,
                "",
                payload,
                DeliveryMode::Persistent,
            )
            .await?;
        info!(
            formula = %message.formula,
            constants = message.constants.len(),
            "Configuration broadcast"
        );
        Ok(())
    }

    /// Generate and publish the model's scenarios, skipping exact repeats.
    pub async fn publish_scenarios(
        &mut self,
        model: &ModelConfiguration,
    ) -> Result<DistributionReport, DistributorError> {
        let seeds = self.config.seed.map_or_else(SeedSource::from_entropy, SeedSource::new);
        let mut generator_config = GeneratorConfig::default();
        if let Some(threads) = self.config.threads {
            generator_config = generator_config.with_threads(threads);
        }
        let generator = ParallelGenerator::new(
            SamplingPlan::compile(model.variable_definitions())?,
            seeds,
            generator_config,
        )?;

        let requested = model.iterations();
        let budget = self.config.duplicate_policy.draw_budget(requested);
        info!(
            iterations = requested,
            seed = seeds.seed(),
            threads = generator.threads(),
            policy = ?self.config.duplicate_policy,
            "Generating scenarios"
        );

        let mut published: HashSet<Vec<u8>> = HashSet::new();
        let mut report = DistributionReport {
            requested,
            generated: 0,
            delivered: 0,
            duplicates: 0,
            seed: seeds.seed(),
        };

        // Each round draws only as many scenarios as are still missing, so
        // Skip finishes after one round.
        while report.delivered < requested && report.generated < budget {
            let wanted = (requested - report.delivered).min(budget - report.generated);
            let start = report.generated;
            let mut scenarios = generator.generate(start..start + wanted);

            while let Some((index, scenario)) = scenarios.recv().await {
                report.generated += 1;
                let payload = encode_message(&ScenarioMessage::from(scenario))?;
                if published.contains(&payload) {
                    report.duplicates += 1;
                    debug!(index, "Duplicate scenario skipped");
                    continue;
                }

                self.channel
                    .publish(
                        DEFAULT_EXCHANGE,
                        &self.config.topology.scenario_queue,
                        payload.clone(),
                        DeliveryMode::Persistent,
                    )
                    .await?;
                published.insert(payload);
                report.delivered += 1;
            }
        }

        if report.shortfall() > 0 && self.config.duplicate_policy != DuplicatePolicy::Skip {
            warn!(
                requested,
                delivered = report.delivered,
                generated = report.generated,
                "Draw budget exhausted before enough unique scenarios were found"
            );
        }
        info!(
            delivered = report.delivered,
            duplicates = report.duplicates,
            seed = report.seed,
            "Scenarios distributed"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use montecarlo_core::AckMode;
    use montecarlo_messages::{decode_message, topology};
    use montecarlo_simulation::InMemoryBroker;
    use montecarlo_test_helpers::{continuous_model, discrete_model, write_model, PRICING_MODEL};
    use tracing_test::traced_test;

    async fn drain(broker: &InMemoryBroker, queue: &str) -> Vec<Vec<u8>> {
        let mut channel = broker.channel();
        let mut payloads = Vec::new();
        while let Some(delivery) = channel.get(queue, AckMode::Auto).await.unwrap() {
            assert_eq!(delivery.mode, DeliveryMode::Persistent);
            payloads.push(delivery.payload);
        }
        payloads
    }

    #[traced_test]
    #[tokio::test]
    async fn test_continuous_model_delivers_every_iteration() {
        let broker = InMemoryBroker::new();
        let mut distributor = Distributor::new(
            broker.channel(),
            DistributorConfig::default().with_seed(7).with_threads(2),
        );

        let report = distributor.run(&continuous_model(500)).await.unwrap();
        assert_eq!(report.requested, 500);
        assert_eq!(report.delivered, 500);
        assert_eq!(report.duplicates, 0);
        assert_eq!(report.seed, 7);

        let payloads = drain(&broker, topology::SCENARIO_QUEUE).await;
        assert_eq!(payloads.len(), 500);
        assert!(logs_contain("Scenarios distributed"));
    }

    #[tokio::test]
    async fn test_duplicates_skipped() {
        // Four possible scenarios, far more draws.
        let broker = InMemoryBroker::new();
        let mut distributor =
            Distributor::new(broker.channel(), DistributorConfig::default().with_seed(1));

        let report = distributor.run(&discrete_model(200)).await.unwrap();
        assert_eq!(report.generated, 200);
        assert_eq!(report.delivered, 4);
        assert_eq!(report.duplicates, 196);
        assert_eq!(report.shortfall(), 196);

        let payloads = drain(&broker, topology::SCENARIO_QUEUE).await;
        let unique: HashSet<_> = payloads.iter().collect();
        assert_eq!(unique.len(), payloads.len());
        for payload in &payloads {
            let message: ScenarioMessage = decode_message(payload).unwrap();
            assert_eq!(message.scenario().len(), 2);
        }
    }

    #[traced_test]
    #[tokio::test]
    async fn test_regenerate_fills_shortfall_within_budget() {
        let broker = InMemoryBroker::new();
        let mut distributor = Distributor::new(
            broker.channel(),
            DistributorConfig::default()
                .with_seed(3)
                .with_duplicate_policy(DuplicatePolicy::Regenerate { max_attempts: 1_000 }),
        );

        // Four unique scenarios exist; asking for exactly four succeeds.
        let report = distributor.run(&discrete_model(4)).await.unwrap();
        assert_eq!(report.delivered, 4);
        assert!(report.generated >= 4 && report.generated <= 1_000);
        assert_eq!(report.generated, report.delivered + report.duplicates);

        // Asking for ten exhausts the budget.
        let report = distributor.run(&discrete_model(10)).await.unwrap();
        assert_eq!(report.delivered, 4);
        assert_eq!(report.generated, 1_000);
        assert!(logs_contain("Draw budget exhausted"));
    }

    #[tokio::test]
    async fn test_same_seed_same_scenarios() {
        let mut runs = Vec::new();
        for threads in [1, 4] {
            let broker = InMemoryBroker::new();
            let mut distributor = Distributor::new(
                broker.channel(),
                DistributorConfig::default().with_seed(99).with_threads(threads),
            );
            distributor.run(&continuous_model(100)).await.unwrap();
            let mut payloads = drain(&broker, topology::SCENARIO_QUEUE).await;
            payloads.sort();
            runs.push(payloads);
        }
        assert_eq!(runs[0], runs[1]);
    }

    #[tokio::test]
    async fn test_configuration_reaches_bound_subscribers() {
        let broker = InMemoryBroker::new();
        let mut subscriber = broker.channel();
        subscriber
            .declare_exchange(topology::CONFIGURATION_EXCHANGE, ExchangeKind::Fanout, false)
            .await
            .unwrap();
        let queue = subscriber
            .declare_queue("", QueueOptions::exclusive())
            .await
            .unwrap();
        subscriber
            .bind_queue(&queue, topology::CONFIGURATION_EXCHANGE, "")
            .await
            .unwrap();

        let model = continuous_model(10);
        let mut distributor =
            Distributor::new(broker.channel(), DistributorConfig::default().with_seed(1));
        distributor.run(&model).await.unwrap();

        let delivery = subscriber.get(&queue, AckMode::Auto).await.unwrap().unwrap();
        let message: ConfigurationMessage = decode_message(&delivery.payload).unwrap();
        assert_eq!(message.formula, model.formula().source());
        assert_eq!(&message.constants, model.constants());
    }

    #[tokio::test]
    async fn test_run_from_path() {
        let file = write_model(PRICING_MODEL);
        let broker = InMemoryBroker::new();
        let mut distributor =
            Distributor::new(broker.channel(), DistributorConfig::default().with_seed(5));

        let report = distributor.run_from_path(file.path()).await.unwrap();
        assert_eq!(report.requested, 1000);
        assert_eq!(broker.queue_len(topology::SCENARIO_QUEUE), Some(report.delivered as usize));
    }

    #[tokio::test]
    async fn test_invalid_model_is_fatal() {
        let file = write_model(&PRICING_MODEL.replace("[0.2, 0.5, 0.3]", "[0.2, 0.5, 0.5]"));
        let broker = InMemoryBroker::new();
        let mut distributor = Distributor::new(broker.channel(), DistributorConfig::default());

        let err = distributor.run_from_path(file.path()).await.unwrap_err();
        assert!(matches!(
            err,
            DistributorError::Configuration(ConfigurationError::ProbabilitySum { .. })
        ));
        // Nothing was declared or published.
        assert!(!broker.queue_exists(topology::SCENARIO_QUEUE));
    }

    #[tokio::test]
    async fn test_broker_failure_is_fatal() {
        let broker = InMemoryBroker::new();
        let mut distributor =
            Distributor::new(broker.channel(), DistributorConfig::default().with_seed(1));
        broker.restart();

        let err = distributor.run(&continuous_model(10)).await.unwrap_err();
        assert!(matches!(err, DistributorError::Broker(BrokerError::Disconnected)));
    }
}
