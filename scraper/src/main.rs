use clap::Parser;
use log::{error, info};
use scraper::{default_query_fn, MemoryRegistry, Metrics, Scraper, ScraperConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about = "Keep a game server registry current", long_about = None)]
struct Args {
    /// Addresses to track, as host:port
    addresses: Vec<String>,

    /// File with one address per line; blank lines and # comments skipped
    #[arg(short = 'f', long)]
    addresses_file: Option<PathBuf>,

    /// Registry snapshot loaded at startup and written on shutdown
    #[arg(short = 's', long)]
    snapshot: Option<PathBuf>,

    /// Seconds for one full pass over the active servers
    #[arg(short = 'i', long, default_value = "60")]
    interval_secs: u64,

    /// Consecutive failures tolerated before a server is archived
    #[arg(short = 'm', long, default_value = "10")]
    max_failed: u32,

    /// Deadline for a single probe in seconds
    #[arg(short = 't', long, default_value = "10")]
    timeout_secs: u64,

    /// Archived servers are probed this many times less often
    #[arg(long, default_value = "10")]
    degraded_factor: u32,
}

impl Args {
    fn config(&self) -> ScraperConfig {
        ScraperConfig {
            query_interval: Duration::from_secs(self.interval_secs),
            max_failed: self.max_failed,
            query_timeout: Duration::from_secs(self.timeout_secs),
            degraded_factor: self.degraded_factor,
        }
    }

    fn file_addresses(&self) -> Result<Vec<String>, std::io::Error> {
        let path = match &self.addresses_file {
            Some(path) => path,
            None => return Ok(Vec::new()),
        };
        let contents = std::fs::read_to_string(path)?;
        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.config();
    config.validate()?;

    let registry = Arc::new(match &args.snapshot {
        Some(path) => MemoryRegistry::load(path)?,
        None => MemoryRegistry::new(),
    });

    let mut initial = registry.addresses();
    initial.extend(args.addresses.iter().cloned());
    initial.extend(args.file_addresses()?);

    info!(
        "Starting scraper: {} addresses, {:?} interval, {} failures allowed",
        initial.len(),
        config.query_interval,
        config.max_failed
    );

    let metrics = Arc::new(Metrics::new());
    let scraper = Scraper::with_parts(
        initial,
        config.clone(),
        registry.clone(),
        metrics.clone(),
        default_query_fn(),
    )?;

    // Periodic status report, once per pass
    let mut report = interval(config.query_interval);
    report.set_missed_tick_behavior(MissedTickBehavior::Skip);
    report.tick().await;

    loop {
        tokio::select! {
            _ = report.tick() => {
                let snapshot = metrics.snapshot();
                info!(
                    "{} active, {} degraded, {} stored ({} live): {} queries, {} ok, {} failed, {} archived, {} removed, mean {:?}",
                    scraper.active_len(),
                    scraper.degraded_len(),
                    registry.len(),
                    registry.active_count(),
                    snapshot.queries,
                    snapshot.successes,
                    snapshot.failures,
                    snapshot.archives,
                    snapshot.removals,
                    snapshot.mean_query_time()
                );
            },

            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Scraper shutting down");
                break;
            },
        }
    }

    if let Some(path) = &args.snapshot {
        registry.save(path)?;
    }

    Ok(())
}
