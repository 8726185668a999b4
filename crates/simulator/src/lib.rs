//! Monte Carlo Simulator
//!
//! Runs a whole model in one process on top of the in-memory broker from
//! `montecarlo-simulation`:
//!
//! - **Workers**: N concurrent consumers, each subscribed before anything is
//!   published so none misses the configuration broadcast
//! - **Distribution**: one distributor publishing the configuration and every
//!   scenario
//! - **Aggregation**: running mean, variance and range over the result queue
//!
//! # Example
//!
//! ```ignore
//! use montecarlo_simulator::{Simulator, SimulatorConfig};
//! use montecarlo_types::ModelConfiguration;
//!
//! let model = ModelConfiguration::from_path("model.json")?;
//! let simulator = Simulator::new(SimulatorConfig::new(4).with_seed(42));
//! let report = simulator.run(&model).await?;
//!
//! println!("mean: {:?}", report.results.mean);
//! ```

pub mod aggregator;
pub mod config;
pub mod runner;

pub use aggregator::{ResultAggregator, ResultSummary};
pub use config::SimulatorConfig;
pub use runner::{SimulationReport, Simulator, SimulatorError};
