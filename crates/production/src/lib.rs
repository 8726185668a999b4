//! Producer and consumer runners.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────┐  fanout "Cofiguracion"   ┌──────────┐
//!  model ──▶ │ Distributor  │ ───────────────────────▶ │ Worker 1 │ ──┐
//!            │  (rayon pool │  queue "Escenarios"      │ Worker 2 │   │ queue
//!            │   + dedup)   │ ───────────────────────▶ │   ...    │   │ "Resultados"
//!            └──────────────┘   prefetch 1, manual ack └──────────┘ ◀─┘
//! ```
//!
//! Both runners are generic over [`montecarlo_core::Channel`], so they run the
//! same against any broker implementation: [`AmqpBroker`] for a real AMQP
//! 0-9-1 server, or the in-process broker for local runs and tests.

pub mod amqp;
pub mod config;
mod distributor;
pub mod telemetry;
mod worker;

pub use amqp::{AmqpBroker, AmqpChannel, DEFAULT_AMQP_URI};
pub use config::{ConfigFileError, DistributorConfig, DuplicatePolicy, WorkerConfig};
pub use distributor::{DistributionReport, Distributor, DistributorError};
pub use worker::{Worker, WorkerError, WorkerReport, WorkerState};
