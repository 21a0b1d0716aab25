//! Time-bounded cache of the last successful registry scan.
//!
//! Concurrent refreshes share one scan: the first caller spawns it and every
//! later caller awaits the same future. Each scan records the cache
//! generation it started in and only publishes if that generation is still
//! current, so an [`invalidate`](VaultCache::invalidate) during a slow scan
//! cannot be overwritten by its stale result.

use super::record::VaultRecord;
use super::scanner::{ScanError, VaultSource};
use crate::metrics::metrics;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default freshness window
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

pub type VaultList = Arc<Vec<VaultRecord>>;

type SharedScan = Shared<BoxFuture<'static, Result<VaultList, ScanError>>>;

/// Something that must be told when on-chain vault state changed.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self);
}

struct InFlight {
    generation: u64,
    scan: SharedScan,
}

struct CacheState {
    vaults: VaultList,
    last_fetched_at: Option<Instant>,
    generation: u64,
    in_flight: Option<InFlight>,
}

impl CacheState {
    fn empty() -> Self {
        Self {
            vaults: Arc::new(Vec::new()),
            last_fetched_at: None,
            generation: 0,
            in_flight: None,
        }
    }
}

pub struct VaultCache {
    source: Arc<dyn VaultSource>,
    ttl: Duration,
    state: Arc<Mutex<CacheState>>,
}

impl VaultCache {
    pub fn new(source: Arc<dyn VaultSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            state: Arc::new(Mutex::new(CacheState::empty())),
        }
    }

    pub fn with_default_ttl(source: Arc<dyn VaultSource>) -> Self {
        Self::new(source, DEFAULT_TTL)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the vault list, scanning only when needed.
    ///
    /// Without `force_refresh` a list younger than the TTL is returned as the
    /// same `Arc`. If a scan is already running the caller joins it. A failed
    /// scan returns its error and leaves the cached list untouched.
    pub async fn fetch_all_vaults(&self, force_refresh: bool) -> Result<VaultList, ScanError> {
        let scan = {
            let mut state = self.state.lock();

            if !force_refresh {
                if let Some(fetched_at) = state.last_fetched_at {
                    if fetched_at.elapsed() < self.ttl {
                        metrics().cache_hits.inc();
                        return Ok(Arc::clone(&state.vaults));
                    }
                }
            }

            match &state.in_flight {
                Some(in_flight) => {
                    metrics().cache_joins.inc();
                    debug!(generation = in_flight.generation, "Joining in-flight vault scan");
                    in_flight.scan.clone()
                }
                None => {
                    metrics().cache_misses.inc();
                    self.start_scan(&mut state)
                }
            }
        };

        scan.await
    }

    // Caller holds the lock, so the spawned task cannot observe the state
    // before `in_flight` is set.
    fn start_scan(&self, state: &mut CacheState) -> SharedScan {
        let generation = state.generation;
        let source = Arc::clone(&self.source);
        let shared_state = Arc::clone(&self.state);

        debug!(generation, "Starting vault scan");

        let task = tokio::spawn(async move {
            let clear_state = Arc::clone(&shared_state);
            let _in_flight = scopeguard::guard((), move |_| {
                let mut state = clear_state.lock();
                if state
                    .in_flight
                    .as_ref()
                    .is_some_and(|in_flight| in_flight.generation == generation)
                {
                    state.in_flight = None;
                }
            });

            let outcome = source.scan().await.map(Arc::new);

            let mut state = shared_state.lock();
            match &outcome {
                Ok(vaults) if state.generation == generation => {
                    state.vaults = Arc::clone(vaults);
                    state.last_fetched_at = Some(Instant::now());
                    metrics().cached_vaults.set(vaults.len() as i64);
                    debug!(generation, vaults = vaults.len(), "Vault cache refreshed");
                }
                Ok(_) => {
                    metrics().scans_discarded.inc();
                    debug!(
                        generation,
                        current = state.generation,
                        "Discarding scan result from invalidated generation"
                    );
                }
                Err(err) => {
                    warn!(generation, error = %err, "Vault scan failed, keeping cached list");
                }
            }
            outcome
        });

        let scan = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(join_err) => Err(ScanError::Internal(join_err.to_string())),
            }
        }
        .boxed()
        .shared();

        state.in_flight = Some(InFlight {
            generation,
            scan: scan.clone(),
        });
        scan
    }

    /// Drop the cached list and the freshness timestamp.
    ///
    /// A scan in flight keeps running for whoever awaits it but will not be
    /// published.
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        state.vaults = Arc::new(Vec::new());
        state.last_fetched_at = None;
        state.generation += 1;
        state.in_flight = None;

        metrics().cache_invalidations.inc();
        metrics().cached_vaults.set(0);
        debug!(generation = state.generation, "Vault cache invalidated");
    }

    /// Current contents without triggering a scan
    pub fn snapshot(&self) -> VaultList {
        Arc::clone(&self.state.lock().vaults)
    }

    pub fn last_fetched_at(&self) -> Option<Instant> {
        self.state.lock().last_fetched_at
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn is_fetching(&self) -> bool {
        self.state.lock().in_flight.is_some()
    }
}

impl CacheInvalidator for VaultCache {
    fn invalidate(&self) {
        VaultCache::invalidate(self);
    }
}
