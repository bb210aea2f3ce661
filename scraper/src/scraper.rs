//! Probe scheduling and the per-address failure state machine
//!
//! Every tracked address lives in exactly one of two ticker pools:
//! - **Active**: probed once per query interval
//! - **Degraded**: probed once per `degraded_factor` intervals
//!
//! Consecutive failures are counted per address. An active address that
//! keeps failing is archived and demoted; a degraded one that keeps failing
//! is removed for good. Any success clears the count and brings a degraded
//! address back to the active pool. The outside world only hears about
//! this through [`ScraperEvents`].

use crate::config::ScraperConfig;
use crate::error::ScraperError;
use crate::observer::{Metrics, ScraperObserver};
use crate::ticker_pool::TickerPool;
use log::{debug, warn};
use protocol::{Implausible, Server};
use query::QueryError;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::time::Instant;

/// Receiver of the scraper's outward events, usually the server registry
pub trait ScraperEvents: Send + Sync {
    /// Mark the record inactive without deleting it
    fn on_archive(&self, address: &str);
    /// Delete the record
    fn on_remove(&self, address: &str);
    /// Insert or refresh the record
    fn on_update(&self, server: Server);
}

/// Future returned by a probe function
pub type ProbeFuture = Pin<Box<dyn Future<Output = Result<Server, QueryError>> + Send>>;

/// Probes one address within the given timeout
pub type QueryFn = Arc<dyn Fn(String, Duration) -> ProbeFuture + Send + Sync>;

/// Probe function backed by a real query session
pub fn default_query_fn() -> QueryFn {
    Arc::new(|address: String, timeout: Duration| {
        Box::pin(async move { query::get_server_info(&address, timeout).await }) as ProbeFuture
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    Active,
    Degraded,
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pool::Active => write!(f, "active"),
            Pool::Degraded => write!(f, "degraded"),
        }
    }
}

/// Result of one probe after validation
#[derive(Debug)]
pub enum Outcome {
    Updated(Server),
    Failed(QueryError),
    /// Decoded fine but reports impossible figures
    Implausible(Implausible),
}

impl Outcome {
    pub fn as_label(&self) -> &'static str {
        match self {
            Outcome::Updated(_) => "updated",
            Outcome::Failed(err) => err.as_label(),
            Outcome::Implausible(_) => "implausible",
        }
    }
}

/// Where an address lives and how often it has failed in a row there
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tracked {
    pool: Pool,
    failures: Option<u32>,
}

/// Event owed to the outside world once the state lock is released
enum Transition {
    Unchanged,
    Archived,
    Removed,
    Revived,
}

pub struct Scraper {
    config: ScraperConfig,
    /// Authoritative membership; pool changes only happen under this lock
    tracked: Mutex<HashMap<String, Tracked>>,
    active: TickerPool,
    degraded: TickerPool,
    events: Arc<dyn ScraperEvents>,
    observer: Arc<dyn ScraperObserver>,
    query: QueryFn,
}

impl Scraper {
    /// Creates a scraper probing with real sessions and counting into a
    /// private [`Metrics`]
    ///
    /// Must be called from within a tokio runtime: every address in
    /// `initial` is added straight away.
    pub fn new<I>(
        initial: I,
        config: ScraperConfig,
        events: Arc<dyn ScraperEvents>,
    ) -> Result<Arc<Self>, ScraperError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self::with_parts(
            initial,
            config,
            events,
            Arc::new(Metrics::new()),
            default_query_fn(),
        )
    }

    /// Creates a scraper with an explicit observer and probe function
    pub fn with_parts<I>(
        initial: I,
        config: ScraperConfig,
        events: Arc<dyn ScraperEvents>,
        observer: Arc<dyn ScraperObserver>,
        query: QueryFn,
    ) -> Result<Arc<Self>, ScraperError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        config.validate()?;
        let active = TickerPool::new("active", config.query_interval)?;
        let degraded = TickerPool::new("degraded", config.degraded_interval()?)?;

        let scraper = Arc::new(Scraper {
            config,
            tracked: Mutex::new(HashMap::new()),
            active,
            degraded,
            events,
            observer,
            query,
        });

        for address in initial {
            scraper.add(address);
        }

        Ok(scraper)
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    /// Starts probing `address` at the normal cadence
    ///
    /// An address sitting in the degraded pool is moved over with a fresh
    /// failure count. Returns false if it was already in the active pool.
    pub fn add(self: &Arc<Self>, address: impl Into<String>) -> bool {
        let address = address.into();
        let mut tracked = self.tracked();

        match tracked.get(&address).map(|entry| entry.pool) {
            Some(Pool::Active) => false,
            Some(Pool::Degraded) => {
                debug!("Moving {} from the degraded pool", address);
                self.promote(&mut tracked, &address);
                true
            }
            None => {
                tracked.insert(
                    address.clone(),
                    Tracked {
                        pool: Pool::Active,
                        failures: None,
                    },
                );
                self.active
                    .add(address.clone(), probe_task(Arc::downgrade(self), address));
                true
            }
        }
    }

    /// Stops probing `address` and emits a remove event
    ///
    /// Returns false, without emitting anything, if the address was not
    /// tracked.
    pub fn remove(&self, address: &str) -> bool {
        let evicted = self.evict(&mut self.tracked(), address);
        if evicted {
            self.report(address, Transition::Removed);
        }
        evicted
    }

    pub fn is_active(&self, address: &str) -> bool {
        self.pool_of(address) == Some(Pool::Active)
    }

    pub fn is_degraded(&self, address: &str) -> bool {
        self.pool_of(address) == Some(Pool::Degraded)
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn degraded_len(&self) -> usize {
        self.degraded.len()
    }

    /// Consecutive failures since the last success, if any
    pub fn failures(&self, address: &str) -> Option<u32> {
        self.tracked().get(address).and_then(|entry| entry.failures)
    }

    fn tracked(&self) -> MutexGuard<'_, HashMap<String, Tracked>> {
        self.tracked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn pool_of(&self, address: &str) -> Option<Pool> {
        self.tracked().get(address).map(|entry| entry.pool)
    }

    /// Moves a degraded address back to the active pool
    fn promote(self: &Arc<Self>, tracked: &mut HashMap<String, Tracked>, address: &str) {
        self.degraded.remove(address);
        tracked.insert(
            address.to_string(),
            Tracked {
                pool: Pool::Active,
                failures: None,
            },
        );
        self.active.add(
            address.to_string(),
            probe_task(Arc::downgrade(self), address.to_string()),
        );
    }

    /// Archives an active address into the degraded pool
    fn demote(self: &Arc<Self>, tracked: &mut HashMap<String, Tracked>, address: &str) {
        self.active.remove(address);
        tracked.insert(
            address.to_string(),
            Tracked {
                pool: Pool::Degraded,
                failures: None,
            },
        );
        self.degraded.add(
            address.to_string(),
            probe_task(Arc::downgrade(self), address.to_string()),
        );
    }

    /// Drops an address and its counter from whichever pool holds it
    fn evict(&self, tracked: &mut HashMap<String, Tracked>, address: &str) -> bool {
        let entry = match tracked.remove(address) {
            Some(entry) => entry,
            None => return false,
        };
        match entry.pool {
            Pool::Active => self.active.remove(address),
            Pool::Degraded => self.degraded.remove(address),
        };
        true
    }

    /// Counts a failure; true once the address has used up its allowance
    ///
    /// The count is dropped when that happens, so the next pool starts
    /// from scratch.
    fn record_failure(&self, entry: &mut Tracked) -> bool {
        match entry.failures {
            None => {
                entry.failures = Some(1);
                false
            }
            Some(count) if count < self.config.max_failed => {
                entry.failures = Some(count + 1);
                false
            }
            Some(_) => {
                entry.failures = None;
                true
            }
        }
    }

    /// Runs the probe function under the probe deadline and validates the result
    async fn probe(&self, address: &str) -> Outcome {
        let timeout = self.config.query_timeout;
        let pending = (self.query)(address.to_string(), timeout);

        let mut server = match tokio::time::timeout(timeout, pending).await {
            Err(_) => return Outcome::Failed(QueryError::Timeout),
            Ok(Err(err)) => return Outcome::Failed(err),
            Ok(Ok(server)) => server,
        };

        server.core.address = address.to_string();
        if let Some(version) = server.rules.get("version") {
            server.core.version = version.clone();
        }

        match server.core.check_plausible() {
            Ok(()) => Outcome::Updated(server),
            Err(reason) => Outcome::Implausible(reason),
        }
    }

    /// Applies a finished probe to the state of `address`
    ///
    /// Returns the pool the address was in, or `None` if it stopped being
    /// tracked while the probe was out.
    fn apply(self: &Arc<Self>, address: &str, outcome: &Outcome) -> Option<(Pool, Transition)> {
        let mut tracked = self.tracked();
        let mut entry = *tracked.get(address)?;
        let pool = entry.pool;

        let transition = match outcome {
            Outcome::Updated(_) => match pool {
                Pool::Active => {
                    entry.failures = None;
                    tracked.insert(address.to_string(), entry);
                    Transition::Unchanged
                }
                Pool::Degraded => {
                    self.promote(&mut tracked, address);
                    Transition::Revived
                }
            },
            Outcome::Failed(_) => {
                if !self.record_failure(&mut entry) {
                    tracked.insert(address.to_string(), entry);
                    Transition::Unchanged
                } else if pool == Pool::Active {
                    self.demote(&mut tracked, address);
                    Transition::Archived
                } else {
                    self.evict(&mut tracked, address);
                    Transition::Removed
                }
            }
            Outcome::Implausible(_) => {
                self.evict(&mut tracked, address);
                Transition::Removed
            }
        };

        Some((pool, transition))
    }

    /// Emits the observer and registry side of a transition
    fn report(&self, address: &str, transition: Transition) {
        match transition {
            Transition::Unchanged => {}
            Transition::Archived => {
                self.observer.on_archive(address);
                self.events.on_archive(address);
            }
            Transition::Removed => {
                self.observer.on_remove(address);
                self.events.on_remove(address);
            }
            Transition::Revived => self.observer.on_revive(address),
        }
    }

    /// One scheduled firing for `address`
    async fn fire(self: Arc<Self>, address: String) {
        let started = Instant::now();
        let outcome = self.probe(&address).await;

        let (pool, transition) = match self.apply(&address, &outcome) {
            Some(applied) => applied,
            None => {
                debug!("Dropping {} result for untracked {}", outcome.as_label(), address);
                return;
            }
        };
        self.observer
            .on_query(&address, pool, started.elapsed(), &outcome);

        match &outcome {
            Outcome::Failed(err) => debug!("{} probe of {} failed: {}", pool, address, err),
            Outcome::Implausible(reason) => {
                warn!("{} reported implausible data: {}", address, reason)
            }
            Outcome::Updated(_) => {}
        }

        self.report(&address, transition);
        if let Outcome::Updated(server) = outcome {
            self.events.on_update(server);
        }
    }
}

impl Drop for Scraper {
    fn drop(&mut self) {
        // Leaves both rotations with nothing to run so they wind down
        self.active.clear();
        self.degraded.clear();
    }
}

/// Pool task probing `address`; holds the scraper weakly so the pools do
/// not keep it alive
fn probe_task(
    scraper: Weak<Scraper>,
    address: String,
) -> impl Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static {
    move || {
        let scraper = scraper.clone();
        let address = address.clone();
        Box::pin(async move {
            if let Some(scraper) = scraper.upgrade() {
                scraper.fire(address).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{RuleSet, ServerCore};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::sleep;

    const ADDRESS: &str = "192.0.2.1:7777";

    #[derive(Default)]
    struct RecordingEvents {
        archives: Mutex<Vec<String>>,
        removes: Mutex<Vec<String>>,
        updates: Mutex<Vec<Server>>,
    }

    impl RecordingEvents {
        fn archives(&self) -> usize {
            self.archives.lock().unwrap().len()
        }

        fn removes(&self) -> usize {
            self.removes.lock().unwrap().len()
        }

        fn updates(&self) -> usize {
            self.updates.lock().unwrap().len()
        }

        fn updates_for(&self, address: &str) -> usize {
            self.updates
                .lock()
                .unwrap()
                .iter()
                .filter(|server| server.core.address == address)
                .count()
        }
    }

    impl ScraperEvents for RecordingEvents {
        fn on_archive(&self, address: &str) {
            self.archives.lock().unwrap().push(address.to_string());
        }

        fn on_remove(&self, address: &str) {
            self.removes.lock().unwrap().push(address.to_string());
        }

        fn on_update(&self, server: Server) {
            self.updates.lock().unwrap().push(server);
        }
    }

    fn server(players: u16, max_players: u16) -> Server {
        let mut rules = RuleSet::new();
        rules.insert("version".to_string(), "0.3.7".to_string());
        Server::from_probe(
            "192.0.2.1".to_string(),
            ServerCore {
                address: "spoofed:1".to_string(),
                hostname: "Test Server".to_string(),
                players,
                max_players,
                ..Default::default()
            },
            rules,
        )
    }

    /// Probe that times out until `online` is set, then answers with 5/20
    fn switchable_query(online: Arc<AtomicBool>, calls: Arc<AtomicUsize>) -> QueryFn {
        Arc::new(move |_address: String, _timeout: Duration| {
            calls.fetch_add(1, Ordering::SeqCst);
            let result = if online.load(Ordering::SeqCst) {
                Ok(server(5, 20))
            } else {
                Err(QueryError::Timeout)
            };
            Box::pin(async move { result }) as ProbeFuture
        })
    }

    fn config(max_failed: u32) -> ScraperConfig {
        ScraperConfig {
            query_interval: Duration::from_secs(1),
            max_failed,
            query_timeout: Duration::from_millis(100),
            degraded_factor: 10,
        }
    }

    struct Harness {
        scraper: Arc<Scraper>,
        events: Arc<RecordingEvents>,
        metrics: Arc<Metrics>,
        online: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
    }

    fn harness(max_failed: u32, online: bool) -> Harness {
        let events = Arc::new(RecordingEvents::default());
        let metrics = Arc::new(Metrics::new());
        let online = Arc::new(AtomicBool::new(online));
        let calls = Arc::new(AtomicUsize::new(0));

        let scraper = Scraper::with_parts(
            [ADDRESS],
            config(max_failed),
            events.clone(),
            metrics.clone(),
            switchable_query(online.clone(), calls.clone()),
        )
        .unwrap();

        Harness {
            scraper,
            events,
            metrics,
            online,
            calls,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_lands_in_active_pool() {
        let h = harness(3, true);

        assert!(h.scraper.is_active(ADDRESS));
        assert!(!h.scraper.is_degraded(ADDRESS));
        assert!(!h.scraper.add(ADDRESS));
        assert!(h.scraper.add("198.51.100.7:7777"));
        assert_eq!(h.scraper.active_len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_config_error() {
        let events = Arc::new(RecordingEvents::default());
        let result = Scraper::new(
            Vec::<String>::new(),
            ScraperConfig {
                query_interval: Duration::ZERO,
                ..Default::default()
            },
            events,
        );
        assert!(matches!(result, Err(ScraperError::InvalidInterval)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_emits_update_with_dialed_address() {
        let h = harness(3, true);

        sleep(Duration::from_millis(2500)).await;

        let updates = h.events.updates.lock().unwrap();
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[0].core.address, ADDRESS);
        assert_eq!(updates[0].core.version, "0.3.7");
        assert_eq!(h.scraper.failures(ADDRESS), None);
        assert_eq!(h.events.archives(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_counted_below_threshold() {
        let h = harness(3, false);

        // Firings at t = 0, 1, 2
        sleep(Duration::from_millis(2500)).await;

        assert_eq!(h.scraper.failures(ADDRESS), Some(3));
        assert!(h.scraper.is_active(ADDRESS));
        assert_eq!(h.events.archives(), 0);
        assert_eq!(h.events.removes(), 0);
        assert_eq!(h.events.updates(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_clears_failure_counter() {
        let h = harness(3, false);

        sleep(Duration::from_millis(1500)).await;
        assert_eq!(h.scraper.failures(ADDRESS), Some(2));

        h.online.store(true, Ordering::SeqCst);
        sleep(Duration::from_millis(1000)).await;

        assert_eq!(h.scraper.failures(ADDRESS), None);
        assert_eq!(h.events.updates(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_archive_after_threshold_plus_one_failures() {
        let h = harness(3, false);

        // Active firings at t = 0, 1, 2, 3; the fourth one demotes
        sleep(Duration::from_millis(2500)).await;
        assert_eq!(h.events.archives(), 0);

        sleep(Duration::from_millis(1000)).await;
        assert_eq!(h.events.archives(), 1);
        assert_eq!(h.events.archives.lock().unwrap()[0], ADDRESS);
        assert!(!h.scraper.is_active(ADDRESS));
        assert!(h.scraper.is_degraded(ADDRESS));
        assert_eq!(h.events.removes(), 0);

        // Degraded cadence is ten times slower
        sleep(Duration::from_secs(5)).await;
        assert_eq!(h.events.archives(), 1);
        assert_eq!(h.calls.load(Ordering::SeqCst), 5);
        assert_eq!(h.metrics.snapshot().archives, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_removed_after_threshold_plus_one_failures() {
        let h = harness(3, false);

        // Demoted at t = 3, degraded firings at t = 3, 13, 23, 33
        sleep(Duration::from_millis(32_500)).await;
        assert!(h.scraper.is_degraded(ADDRESS));
        assert_eq!(h.events.removes(), 0);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(h.events.removes(), 1);
        assert!(!h.scraper.is_active(ADDRESS));
        assert!(!h.scraper.is_degraded(ADDRESS));
        assert_eq!(h.scraper.failures(ADDRESS), None);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(h.events.removes(), 1);
        assert_eq!(h.calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_success_revives() {
        let h = harness(3, false);

        sleep(Duration::from_millis(3500)).await;
        assert!(h.scraper.is_degraded(ADDRESS));
        h.online.store(true, Ordering::SeqCst);

        // Next degraded firing at t = 13
        sleep(Duration::from_millis(9400)).await;
        assert_eq!(h.events.updates(), 0);

        // The revival emits one update, and the idle active rotation it
        // restarts probes the address straight away for a second
        sleep(Duration::from_millis(200)).await;
        assert_eq!(h.events.updates(), 2);
        assert!(h.scraper.is_active(ADDRESS));
        assert!(!h.scraper.is_degraded(ADDRESS));
        assert_eq!(h.scraper.failures(ADDRESS), None);
        assert_eq!(h.metrics.snapshot().revivals, 1);

        // Back at the one second cadence
        let before = h.events.updates();
        sleep(Duration::from_secs(5)).await;
        assert_eq!(h.events.updates(), before + 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revival_emits_single_update() {
        const ANCHOR: &str = "198.51.100.7:7777";
        let events = Arc::new(RecordingEvents::default());
        let online = Arc::new(AtomicBool::new(false));

        // Every probe takes 50ms; the anchor keeps the active rotation alive
        let flag = online.clone();
        let query: QueryFn = Arc::new(move |address: String, _timeout: Duration| {
            let up = address == ANCHOR || flag.load(Ordering::SeqCst);
            Box::pin(async move {
                sleep(Duration::from_millis(50)).await;
                if up {
                    Ok(server(5, 20))
                } else {
                    Err(QueryError::Timeout)
                }
            }) as ProbeFuture
        });

        let scraper = Scraper::with_parts(
            [ADDRESS, ANCHOR],
            config(3),
            events.clone(),
            Arc::new(Metrics::new()),
            query,
        )
        .unwrap();

        // Demoted by the fourth failure, at t = 3.05 or 3.55
        sleep(Duration::from_secs(4)).await;
        assert!(scraper.is_degraded(ADDRESS));
        online.store(true, Ordering::SeqCst);

        // Degraded firing at t = 13.05 or 13.55
        sleep(Duration::from_millis(8900)).await;
        assert_eq!(events.updates_for(ADDRESS), 0);

        // Joins the running active rotation on its next pass at t = 14
        sleep(Duration::from_secs(1)).await;
        assert_eq!(events.updates_for(ADDRESS), 1);
        assert!(scraper.is_active(ADDRESS));

        sleep(Duration::from_secs(1)).await;
        assert_eq!(events.updates_for(ADDRESS), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_implausible_data_is_terminal() {
        let events = Arc::new(RecordingEvents::default());
        let query: QueryFn = Arc::new(|_address: String, _timeout: Duration| {
            Box::pin(async { Ok(server(50, 40)) }) as ProbeFuture
        });

        let scraper = Scraper::with_parts(
            [ADDRESS],
            config(3),
            events.clone(),
            Arc::new(Metrics::new()),
            query,
        )
        .unwrap();

        sleep(Duration::from_millis(500)).await;

        assert_eq!(events.removes(), 1);
        assert_eq!(events.updates(), 0);
        assert_eq!(events.archives(), 0);
        assert!(!scraper.is_active(ADDRESS));
        assert!(!scraper.is_degraded(ADDRESS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_implausible_regardless_of_timeout() {
        let query: QueryFn = Arc::new(|_address: String, _timeout: Duration| {
            Box::pin(async { Ok(server(50, 40)) }) as ProbeFuture
        });

        for timeout in [Duration::from_millis(1), Duration::from_secs(60)] {
            let scraper = Scraper::with_parts(
                Vec::<String>::new(),
                ScraperConfig {
                    query_timeout: timeout,
                    ..config(3)
                },
                Arc::new(RecordingEvents::default()),
                Arc::new(Metrics::new()),
                query.clone(),
            )
            .unwrap();

            assert!(matches!(
                scraper.probe(ADDRESS).await,
                Outcome::Implausible(Implausible::Overfull {
                    players: 50,
                    max_players: 40
                })
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probe_times_out() {
        let query: QueryFn = Arc::new(|_address: String, _timeout: Duration| {
            Box::pin(std::future::pending()) as ProbeFuture
        });
        let scraper = Scraper::with_parts(
            Vec::<String>::new(),
            config(3),
            Arc::new(RecordingEvents::default()),
            Arc::new(Metrics::new()),
            query,
        )
        .unwrap();

        let outcome = scraper.probe(ADDRESS).await;
        assert!(matches!(outcome, Outcome::Failed(QueryError::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_remove() {
        let h = harness(3, false);

        sleep(Duration::from_millis(500)).await;
        assert_eq!(h.scraper.failures(ADDRESS), Some(1));

        assert!(h.scraper.remove(ADDRESS));
        assert_eq!(h.events.removes(), 1);
        assert_eq!(h.scraper.failures(ADDRESS), None);
        assert!(!h.scraper.is_active(ADDRESS));

        // Second remove is a no-op
        assert!(!h.scraper.remove(ADDRESS));
        assert_eq!(h.events.removes(), 1);

        let calls = h.calls.load(Ordering::SeqCst);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_add_promotes_degraded_address() {
        let h = harness(0, false);

        // With no allowance the second failure demotes
        sleep(Duration::from_millis(1500)).await;
        assert!(h.scraper.is_degraded(ADDRESS));

        assert!(h.scraper.add(ADDRESS));
        assert!(h.scraper.is_active(ADDRESS));
        assert!(!h.scraper.is_degraded(ADDRESS));
    }

    /// Registry stand-in that registers every archived address again
    #[derive(Default)]
    struct ReAddOnArchive {
        scraper: Mutex<Weak<Scraper>>,
        archives: AtomicUsize,
    }

    impl ScraperEvents for ReAddOnArchive {
        fn on_archive(&self, address: &str) {
            self.archives.fetch_add(1, Ordering::SeqCst);
            if let Some(scraper) = self.scraper.lock().unwrap().upgrade() {
                scraper.add(address);
            }
        }

        fn on_remove(&self, _address: &str) {}

        fn on_update(&self, _server: Server) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_during_archive_keeps_pools_exclusive() {
        let events = Arc::new(ReAddOnArchive::default());
        let scraper = Scraper::with_parts(
            [ADDRESS],
            config(0),
            events.clone(),
            Arc::new(Metrics::new()),
            switchable_query(Arc::new(AtomicBool::new(false)), Arc::new(AtomicUsize::new(0))),
        )
        .unwrap();
        *events.scraper.lock().unwrap() = Arc::downgrade(&scraper);

        for _ in 0..45 {
            sleep(Duration::from_millis(100)).await;
            let in_active = scraper.active.exists(ADDRESS);
            let in_degraded = scraper.degraded.exists(ADDRESS);
            assert!(!(in_active && in_degraded), "address in both pools");
            assert_eq!(scraper.is_active(ADDRESS), in_active);
            assert_eq!(scraper.is_degraded(ADDRESS), in_degraded);
        }

        // Archived at t = 1 and t = 3, re-added to the active pool each time
        assert_eq!(events.archives.load(Ordering::SeqCst), 2);
        assert!(scraper.is_active(ADDRESS));
        assert_eq!(scraper.degraded_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_while_probe_in_flight_leaves_no_counter() {
        let events = Arc::new(RecordingEvents::default());
        let query: QueryFn = Arc::new(|_address: String, _timeout: Duration| {
            Box::pin(async {
                sleep(Duration::from_millis(50)).await;
                Err(QueryError::Timeout)
            }) as ProbeFuture
        });
        let metrics = Arc::new(Metrics::new());
        let scraper = Scraper::with_parts(
            [ADDRESS],
            config(3),
            events.clone(),
            metrics.clone(),
            query,
        )
        .unwrap();

        sleep(Duration::from_millis(20)).await;
        assert!(scraper.remove(ADDRESS));

        sleep(Duration::from_millis(100)).await;
        assert_eq!(scraper.failures(ADDRESS), None);
        assert_eq!(events.removes(), 1);
        assert_eq!(events.archives(), 0);
        assert_eq!(metrics.snapshot().queries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_scraper_idles_pools() {
        let h = harness(3, true);
        let active = h.scraper.active.clone();

        sleep(Duration::from_millis(500)).await;
        assert!(active.is_running());
        drop(h);

        sleep(Duration::from_secs(2)).await;
        assert!(active.is_empty());
        assert!(!active.is_running());
    }
}
