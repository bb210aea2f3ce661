//! Hooks for watching the scraper at work
//!
//! The scraper reports every probe and every state transition to an
//! injected [`ScraperObserver`]. [`Metrics`] is the stock implementation:
//! atomic counters plus log lines for the transitions.

use crate::scraper::{Outcome, Pool};
use log::{debug, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub trait ScraperObserver: Send + Sync {
    /// Called once per completed probe, whatever the outcome
    fn on_query(&self, address: &str, pool: Pool, elapsed: Duration, outcome: &Outcome);

    /// An address was demoted to the degraded pool
    fn on_archive(&self, address: &str);

    /// An address left both pools for good
    fn on_remove(&self, address: &str);

    /// A degraded address answered again and went back to the active pool
    fn on_revive(&self, address: &str) {
        let _ = address;
    }
}

/// Point-in-time copy of the counters in [`Metrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queries: u64,
    pub successes: u64,
    pub failures: u64,
    pub errors: u64,
    pub implausible: u64,
    pub archives: u64,
    pub removals: u64,
    pub revivals: u64,
    pub query_time_micros: u64,
}

impl MetricsSnapshot {
    /// Mean probe duration, zero before the first probe
    pub fn mean_query_time(&self) -> Duration {
        if self.queries == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.query_time_micros / self.queries)
    }
}

/// Counting observer
///
/// `failures` counts every failed probe; `errors` only the ones that were
/// not plain timeouts (bad responses, resolution or socket errors).
#[derive(Debug, Default)]
pub struct Metrics {
    queries: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    errors: AtomicU64,
    implausible: AtomicU64,
    archives: AtomicU64,
    removals: AtomicU64,
    revivals: AtomicU64,
    query_time_micros: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            implausible: self.implausible.load(Ordering::Relaxed),
            archives: self.archives.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            revivals: self.revivals.load(Ordering::Relaxed),
            query_time_micros: self.query_time_micros.load(Ordering::Relaxed),
        }
    }
}

impl ScraperObserver for Metrics {
    fn on_query(&self, address: &str, pool: Pool, elapsed: Duration, outcome: &Outcome) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.query_time_micros.fetch_add(micros, Ordering::Relaxed);

        match outcome {
            Outcome::Updated(_) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Failed(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                if !err.is_timeout() {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                }
            }
            Outcome::Implausible(_) => {
                self.implausible.fetch_add(1, Ordering::Relaxed);
            }
        }

        debug!(
            "{} query of {} took {:?}: {}",
            pool,
            address,
            elapsed,
            outcome.as_label()
        );
    }

    fn on_archive(&self, address: &str) {
        self.archives.fetch_add(1, Ordering::Relaxed);
        info!("Archiving {}, probing it less often", address);
    }

    fn on_remove(&self, address: &str) {
        self.removals.fetch_add(1, Ordering::Relaxed);
        info!("Removing {}", address);
    }

    fn on_revive(&self, address: &str) {
        self.revivals.fetch_add(1, Ordering::Relaxed);
        info!("{} answered again, back in the active rotation", address);
    }
}
