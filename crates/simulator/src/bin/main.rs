//! Monte Carlo Simulator CLI
//!
//! Runs a model end to end in one process: a distributor, a pool of workers
//! and a result aggregator sharing an in-memory broker. `distribute` and
//! `work` run one side each against an AMQP server instead.

use anyhow::Context;
use clap::{Parser, Subcommand};
use montecarlo_production::telemetry::{init_tracing, DEFAULT_FILTER};
use montecarlo_production::{
    AmqpBroker, Distributor, DistributorConfig, DuplicatePolicy, Worker, WorkerConfig,
    DEFAULT_AMQP_URI,
};
use montecarlo_simulator::{Simulator, SimulatorConfig};
use montecarlo_types::ModelConfiguration;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "montecarlo-sim")]
#[command(about = "Local Monte Carlo simulation over an in-process broker")]
#[command(version)]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = DEFAULT_FILTER)]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a model document and print what it declares
    Check {
        /// Model document (JSON)
        model: PathBuf,
    },

    /// Distribute a model to local workers and aggregate the results
    Run {
        /// Model document (JSON)
        model: PathBuf,

        /// Number of workers
        #[arg(short, long, default_value = "4")]
        workers: usize,

        /// Generation seed (random when omitted)
        #[arg(long)]
        seed: Option<u64>,

        /// Generation threads (hardware concurrency when omitted)
        #[arg(long)]
        threads: Option<usize>,

        /// Replace duplicate scenarios, drawing at most this many in total
        #[arg(long, value_name = "MAX_ATTEMPTS")]
        regenerate: Option<u64>,

        /// Give up when a worker gets no configuration in time (e.g. "30s")
        #[arg(long)]
        config_timeout: Option<humantime::Duration>,

        /// Distributor settings (TOML); flags override the file
        #[arg(long)]
        distributor_config: Option<PathBuf>,

        /// Worker settings (TOML); flags override the file
        #[arg(long)]
        worker_config: Option<PathBuf>,
    },

    /// Publish a model's configuration and scenarios to an AMQP server
    Distribute {
        /// Model document (JSON)
        model: PathBuf,

        /// AMQP server URI
        #[arg(long, env = "AMQP_URI", default_value = DEFAULT_AMQP_URI)]
        amqp_uri: String,

        /// Generation seed (random when omitted)
        #[arg(long)]
        seed: Option<u64>,

        /// Distributor settings (TOML); flags override the file
        #[arg(long)]
        distributor_config: Option<PathBuf>,
    },

    /// Evaluate scenarios from an AMQP server until interrupted
    Work {
        /// AMQP server URI
        #[arg(long, env = "AMQP_URI", default_value = DEFAULT_AMQP_URI)]
        amqp_uri: String,

        /// Worker settings (TOML)
        #[arg(long)]
        worker_config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    match cli.command {
        Commands::Check { model } => {
            let model = ModelConfiguration::from_path(&model)
                .with_context(|| format!("loading {}", model.display()))?;
            println!("Formula:    {}", model.formula().source());
            println!("Iterations: {}", model.iterations());
            for (name, value) in model.constants() {
                println!("Constant:   {name} = {value}");
            }
            for (name, variable) in model.variable_definitions() {
                println!("Variable:   {name} ({})", variable.kind());
            }
        }

        Commands::Run {
            model,
            workers,
            seed,
            threads,
            regenerate,
            config_timeout,
            distributor_config,
            worker_config,
        } => {
            let model = ModelConfiguration::from_path(&model)
                .with_context(|| format!("loading {}", model.display()))?;

            let mut distributor = match distributor_config {
                Some(path) => DistributorConfig::from_path(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => DistributorConfig::default(),
            };
            if let Some(seed) = seed {
                distributor = distributor.with_seed(seed);
            }
            if let Some(threads) = threads {
                distributor = distributor.with_threads(threads);
            }
            if let Some(max_attempts) = regenerate {
                distributor =
                    distributor.with_duplicate_policy(DuplicatePolicy::Regenerate { max_attempts });
            }

            let mut worker = match worker_config {
                Some(path) => WorkerConfig::from_path(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => WorkerConfig::default(),
            };
            if let Some(timeout) = config_timeout {
                worker = worker.with_config_timeout(timeout.into());
            }

            let config = SimulatorConfig::new(workers)
                .with_distributor(distributor)
                .with_worker(worker);
            let report = Simulator::new(config).run(&model).await?;
            report.print();
        }

        Commands::Distribute {
            model,
            amqp_uri,
            seed,
            distributor_config,
        } => {
            let model = ModelConfiguration::from_path(&model)
                .with_context(|| format!("loading {}", model.display()))?;
            let mut config = match distributor_config {
                Some(path) => DistributorConfig::from_path(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => DistributorConfig::default(),
            };
            if let Some(seed) = seed {
                config = config.with_seed(seed);
            }

            let broker = AmqpBroker::connect(&amqp_uri)
                .await
                .with_context(|| format!("connecting to {amqp_uri}"))?;
            let report = Distributor::new(broker.channel().await?, config)
                .run(&model)
                .await?;
            println!(
                "Delivered {} of {} scenarios ({} duplicates, seed {})",
                report.delivered, report.requested, report.duplicates, report.seed
            );
            broker.close().await?;
        }

        Commands::Work {
            amqp_uri,
            worker_config,
        } => {
            let config = match worker_config {
                Some(path) => WorkerConfig::from_path(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => WorkerConfig::default(),
            };

            let broker = AmqpBroker::connect(&amqp_uri)
                .await
                .with_context(|| format!("connecting to {amqp_uri}"))?;
            let mut worker = Worker::new(broker.channel().await?, config);
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            let report = worker.run_until(shutdown).await?;
            println!(
                "Processed {} scenarios, rejected {}",
                report.processed, report.rejected
            );
            broker.close().await?;
        }
    }

    Ok(())
}
