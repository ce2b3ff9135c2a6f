//! Time-bounded target cache with stale fallback.
//!
//! [`TargetCache::get_targets`] serves the last discovery result until the
//! TTL expires, then refreshes. At most one refresh runs at a time: callers
//! that find the cache expired while a refresh is in flight wait for it and
//! share its outcome instead of starting their own.

use std::sync::Arc;
use std::time::Duration;

use proxsd_inventory::InventoryError;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::discovery::Discovery;
use crate::metrics::{CacheStatus, DiscoveryMetrics};
use crate::resolver::TargetGroup;

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// No usable targets: the last refresh failed and nothing is cached.
    #[error("{0}")]
    Unavailable(Arc<InventoryError>),
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Default)]
struct CacheEntry {
    targets: Arc<Vec<TargetGroup>>,
    /// Last refresh attempt, successful or not.
    last_updated: Option<Instant>,
    error: Option<Arc<InventoryError>>,
    /// Bumped on every recorded refresh.
    generation: u64,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.last_updated
            .map(|at| at.elapsed() < ttl)
            .unwrap_or(false)
    }

    /// Inside the TTL window a recorded error is re-reported as is.
    fn serve_fresh(&self) -> Result<Arc<Vec<TargetGroup>>> {
        match &self.error {
            Some(err) => Err(CacheError::Unavailable(err.clone())),
            None => Ok(self.targets.clone()),
        }
    }

    /// What callers of the most recent refresh observe.
    fn refresh_outcome(&self) -> Result<Arc<Vec<TargetGroup>>> {
        match &self.error {
            Some(err) if self.targets.is_empty() => Err(CacheError::Unavailable(err.clone())),
            _ => Ok(self.targets.clone()),
        }
    }

    fn record_success(&mut self, targets: Vec<TargetGroup>) {
        self.targets = Arc::new(targets);
        self.error = None;
        self.last_updated = Some(Instant::now());
        self.generation += 1;
    }

    fn record_failure(&mut self, err: InventoryError) {
        self.error = Some(Arc::new(err));
        self.last_updated = Some(Instant::now());
        self.generation += 1;
    }
}

struct CacheState {
    discovery: Discovery,
    entry: RwLock<CacheEntry>,
}

impl CacheState {
    async fn refresh(&self) -> Result<Arc<Vec<TargetGroup>>> {
        let result = self.discovery.run().await;

        let mut entry = self.entry.write().await;
        match result {
            Ok(targets) => entry.record_success(targets),
            Err(err) => {
                if !entry.targets.is_empty() {
                    warn!("Returning stale cache due to error: {}", err);
                }
                entry.record_failure(err);
            }
        }
        entry.refresh_outcome()
    }
}

pub struct TargetCache {
    state: Arc<CacheState>,
    metrics: Arc<DiscoveryMetrics>,
    ttl: Duration,
    refresh: Arc<Mutex<()>>,
}

impl TargetCache {
    pub fn new(discovery: Discovery, metrics: Arc<DiscoveryMetrics>, ttl: Duration) -> Self {
        Self {
            state: Arc::new(CacheState {
                discovery,
                entry: RwLock::new(CacheEntry::default()),
            }),
            metrics,
            ttl,
            refresh: Arc::new(Mutex::new(())),
        }
    }

    pub async fn get_targets(&self) -> Result<Arc<Vec<TargetGroup>>> {
        self.metrics.requests_total.inc();

        let observed = {
            let entry = self.state.entry.read().await;
            if entry.is_fresh(self.ttl) {
                self.metrics.cache_hits.inc();
                return entry.serve_fresh();
            }
            entry.generation
        };
        self.metrics.cache_misses.inc();

        let gate = self.refresh.clone().lock_owned().await;

        {
            let entry = self.state.entry.read().await;
            if entry.generation != observed {
                // Another caller refreshed while this one waited.
                return entry.refresh_outcome();
            }
        }

        // The run owns the gate, so dropping this caller neither cancels it
        // nor lets a queued caller start a second one.
        let state = self.state.clone();
        let run = tokio::spawn(async move {
            let outcome = state.refresh().await;
            drop(gate);
            outcome
        });

        match run.await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("Target refresh task failed: {}", err);
                self.state.entry.read().await.refresh_outcome()
            }
        }
    }

    /// Startup refresh. A failure leaves the cache untouched so the first
    /// request retries immediately.
    pub async fn prewarm(&self) -> Result<usize> {
        let _gate = self.refresh.lock().await;

        match self.state.discovery.run().await {
            Ok(targets) => {
                let count = targets.len();
                self.state.entry.write().await.record_success(targets);
                info!("Cache pre-warmed with {} targets", count);
                Ok(count)
            }
            Err(err) => Err(CacheError::Unavailable(Arc::new(err))),
        }
    }

    pub async fn status(&self) -> CacheStatus {
        let entry = self.state.entry.read().await;
        CacheStatus {
            cached_targets: entry.targets.len(),
            age: entry.last_updated.map(|at| at.elapsed()),
        }
    }
}
