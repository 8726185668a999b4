//! Live aggregation of evaluation results.

use montecarlo_core::{AckMode, BrokerError, Channel};
use montecarlo_messages::{decode_message, ResultMessage};
use std::fmt;
use tracing::{trace, warn};

/// Running statistics over results, updated one value at a time (Welford).
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    count: u64,
    mean: f64,
    m2: f64,
    min: Option<f64>,
    max: Option<f64>,
    skipped: u64,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.min = Some(self.min.map_or(value, |min| min.min(value)));
        self.max = Some(self.max.map_or(value, |max| max.max(value)));
    }

    /// Drain every result currently waiting in `queue` without blocking.
    /// Returns how many results were recorded.
    pub async fn poll<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        queue: &str,
    ) -> Result<usize, BrokerError> {
        let mut recorded = 0;
        while let Some(delivery) = channel.get(queue, AckMode::Auto).await? {
            match decode_message::<ResultMessage>(&delivery.payload) {
                Ok(result) => {
                    self.record(result.value);
                    recorded += 1;
                }
                Err(e) => {
                    self.skipped += 1;
                    warn!(error = %e, "Skipping undecodable result");
                }
            }
        }
        if recorded > 0 {
            trace!(recorded, count = self.count, mean = self.mean, "Results aggregated");
        }
        Ok(recorded)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Cumulative mean; `None` before the first result.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Sample variance; `None` with fewer than two results.
    pub fn variance(&self) -> Option<f64> {
        (self.count > 1).then(|| self.m2 / (self.count - 1) as f64)
    }

    pub fn std_dev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    /// Payloads that could not be decoded.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn summary(&self) -> ResultSummary {
        ResultSummary {
            count: self.count,
            mean: self.mean(),
            variance: self.variance(),
            std_dev: self.std_dev(),
            min: self.min,
            max: self.max,
            skipped: self.skipped,
        }
    }
}

/// Snapshot of a [`ResultAggregator`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultSummary {
    pub count: u64,
    pub mean: Option<f64>,
    pub variance: Option<f64>,
    pub std_dev: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub skipped: u64,
}

impl fmt::Display for ResultSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn show(value: Option<f64>) -> String {
            value.map_or_else(|| "-".to_string(), |v| format!("{v:.6}"))
        }
        writeln!(f, "  Results:   {}", self.count)?;
        writeln!(f, "  Mean:      {}", show(self.mean))?;
        writeln!(f, "  Variance:  {}", show(self.variance))?;
        writeln!(f, "  Std dev:   {}", show(self.std_dev))?;
        writeln!(f, "  Min:       {}", show(self.min))?;
        writeln!(f, "  Max:       {}", show(self.max))?;
        if self.skipped > 0 {
            writeln!(f, "  Skipped:   {}", self.skipped)?;
        }
        Ok(())
    }
}
