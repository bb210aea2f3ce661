use thiserror::Error;

/// Errors surfaced while setting up or persisting scraper state
///
/// None of these come from probing; probe failures are absorbed by the
/// scraper and only show up through its events.
#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("interval cannot be zero")]
    InvalidInterval,

    #[error("degraded interval overflows: {factor} x {interval_secs}s")]
    IntervalOverflow { factor: u32, interval_secs: u64 },

    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding error: {0}")]
    Snapshot(#[from] bincode::Error),
}
