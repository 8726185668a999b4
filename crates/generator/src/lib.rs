//! Scenario generation.
//!
//! A [`SamplingPlan`] is compiled once from the model's variable definitions
//! and then shared read-only. Every generation task owns a private RNG drawn
//! from a [`SeedSource`], so generation is reproducible for a recorded seed
//! no matter how tasks are scheduled across the [`ParallelGenerator`] pool.

mod error;
mod parallel;
mod plan;
mod seed;

pub use error::GeneratorError;
pub use parallel::{GeneratorConfig, ParallelGenerator};
pub use plan::{sample, SamplingPlan};
pub use seed::SeedSource;
