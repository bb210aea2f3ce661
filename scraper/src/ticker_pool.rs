//! Rotating pool of named periodic tasks
//!
//! A ticker pool runs every registered task once per interval, spreading the
//! launches evenly across the interval instead of firing them together:
//! - Each pass divides the interval by the current task count
//! - Tasks are launched in turn with that spacing between launches
//! - Launched tasks run on their own and are never awaited by the rotation
//! - Membership changes are picked up at the start of the next pass; a task
//!   removed mid-pass leaves its slot empty so the pass still spans the
//!   interval
//!
//! An empty pool has no rotation running at all; the first `add` starts one
//! and the rotation exits once a pass finds nothing left to run.

use crate::error::ScraperError;
use log::{debug, error};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Future produced by one firing of a task
pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A zero-argument task that can be fired any number of times
pub type Task = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

struct Inner {
    label: String,
    interval: Duration,
    tasks: RwLock<HashMap<String, Task>>,
    running: AtomicBool,
}

impl Inner {
    fn tasks(&self) -> RwLockReadGuard<'_, HashMap<String, Task>> {
        self.tasks.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn tasks_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Task>> {
        self.tasks.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle to a ticker pool; clones share the same pool
#[derive(Clone)]
pub struct TickerPool {
    inner: Arc<Inner>,
}

impl TickerPool {
    /// Creates an empty pool firing each task once per `interval`
    ///
    /// A zero interval is rejected since spacing would collapse to nothing
    /// and the rotation would spin.
    pub fn new(label: impl Into<String>, interval: Duration) -> Result<Self, ScraperError> {
        if interval.is_zero() {
            return Err(ScraperError::InvalidInterval);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                label: label.into(),
                interval,
                tasks: RwLock::new(HashMap::new()),
                running: AtomicBool::new(false),
            }),
        })
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Registers `task` under `name`
    ///
    /// Returns true if the name was already taken, in which case the pool
    /// is left untouched. Adding to an idle pool starts its rotation, so
    /// this must be called from within a tokio runtime.
    pub fn add<F, Fut>(&self, name: impl Into<String>, task: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        {
            let mut tasks = self.inner.tasks_mut();
            if tasks.contains_key(&name) {
                return true;
            }
            let task: Task = Arc::new(move || Box::pin(task()) as TaskFuture);
            tasks.insert(name, task);
        }

        if !self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("Starting {} rotation", self.inner.label);
            tokio::spawn(rotate(Arc::clone(&self.inner)));
        }
        false
    }

    /// Deregisters a task; returns false if it was not registered
    pub fn remove(&self, name: &str) -> bool {
        self.inner.tasks_mut().remove(name).is_some()
    }

    /// Deregisters every task; the rotation goes idle after its current pass
    pub fn clear(&self) {
        self.inner.tasks_mut().clear();
    }

    pub fn exists(&self, name: &str) -> bool {
        self.inner.tasks().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tasks().is_empty()
    }

    /// True while a rotation task is alive for this pool
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}

/// Spacing between launches for a pass over `count` tasks
fn spacing(interval: Duration, count: usize) -> Duration {
    let count = u32::try_from(count).unwrap_or(u32::MAX).max(1);
    interval / count
}

/// Runs passes over the pool until a pass finds it empty
async fn rotate(inner: Arc<Inner>) {
    loop {
        let names: Vec<String> = inner.tasks().keys().cloned().collect();

        if names.is_empty() {
            inner.running.store(false, Ordering::SeqCst);
            // An add may have landed between the snapshot and the store above
            let refilled = !inner.tasks().is_empty();
            if refilled && !inner.running.swap(true, Ordering::SeqCst) {
                continue;
            }
            debug!("{} rotation idle", inner.label);
            return;
        }

        let gap = spacing(inner.interval, names.len());

        for name in names {
            // Tasks removed since the pass started keep their slot empty
            let task = inner.tasks().get(&name).map(Arc::clone);
            if let Some(task) = task {
                launch(&inner.label, name, task);
            }
            tokio::time::sleep(gap).await;
        }
    }
}

/// Fires a task on its own tokio task; a panic inside it is logged and
/// goes no further
fn launch(label: &str, name: String, task: Task) {
    let handle = tokio::spawn(task());
    let label = label.to_string();

    tokio::spawn(async move {
        if let Err(e) = handle.await {
            if e.is_panic() {
                error!("{} task {} panicked", label, name);
            }
        }
    });
}
