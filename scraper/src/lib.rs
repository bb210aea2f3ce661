//! # Game Server Scraper
//!
//! Keeps a registry of game servers current by probing each one over the
//! legacy query protocol on a fixed cadence and reporting what it finds.
//!
//! ## Core Responsibilities
//!
//! ### Paced Probing
//! Addresses are spread across a [`TickerPool`]: each pass over the pool
//! fires every address once, with launches spaced evenly over the interval
//! so thousands of servers never get queried in one burst. The spacing is
//! recomputed every pass as addresses come and go.
//!
//! ### Failure Tracking
//! Consecutive failures are counted per address. An address that keeps
//! failing is archived and moved to a second pool probed ten times less
//! often; if it keeps failing there it is removed. A single success resets
//! the count and moves a degraded address back.
//!
//! ### Data Hygiene
//! Responses reporting more players than slots, or an absurd slot count,
//! are never stored; the address is dropped outright.
//!
//! ## Module Organization
//!
//! ### Ticker Pool Module (`ticker_pool`)
//! The self-pacing rotation of named tasks.
//!
//! ### Scraper Module (`scraper`)
//! The per-address state machine and the [`ScraperEvents`] it reports to.
//!
//! ### Observer Module (`observer`)
//! Injected counters and logging for probes and transitions.
//!
//! ### Registry Module (`registry`)
//! An in-memory [`ScraperEvents`] implementation with bincode snapshots,
//! used by the `scraper` binary.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use scraper::{MemoryRegistry, Scraper, ScraperConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(MemoryRegistry::new());
//!     let scraper = Scraper::new(
//!         ["127.0.0.1:7777"],
//!         ScraperConfig::default(),
//!         registry.clone(),
//!     )?;
//!
//!     // New registrations join the rotation at any time
//!     scraper.add("127.0.0.1:7778");
//!
//!     tokio::signal::ctrl_c().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod observer;
pub mod registry;
pub mod scraper;
pub mod ticker_pool;

pub use config::ScraperConfig;
pub use error::ScraperError;
pub use observer::{Metrics, MetricsSnapshot, ScraperObserver};
pub use registry::MemoryRegistry;
pub use scraper::{default_query_fn, Outcome, Pool, ProbeFuture, QueryFn, Scraper, ScraperEvents};
pub use ticker_pool::TickerPool;
