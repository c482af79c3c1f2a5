//! Typed query caches
//!
//! A cache owns one feed and the last snapshot it produced. Snapshots are
//! immutable and swapped behind an `Arc`, so a reader always gets either the
//! previous value or the next one, never a mix.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use vigil_core::{AuthProvider, Identity, RemoteGateway, Result, RetryConfig, SyncError};

use crate::classifier::{RetryClassifier, Verdict};
use crate::scheduler::{CommitGate, Refresh};

/// A data source the cache knows how to fetch.
#[async_trait]
pub trait Feed: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    /// Stable subscription key; equal keys must mean equal queries.
    fn key(&self) -> String;

    /// `Ok(None)` is a valid absence, not a failure.
    async fn fetch(
        &self,
        gateway: &dyn RemoteGateway,
        owner: &Identity,
    ) -> Result<Option<Self::Output>>;
}

#[derive(Debug)]
pub struct Snapshot<T> {
    pub data: Option<Arc<T>>,
    /// A fetch is outstanding and none has completed yet.
    pub is_loading: bool,
    pub is_fetching: bool,
    pub error: Option<Arc<SyncError>>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            data: None,
            is_loading: false,
            is_fetching: false,
            error: None,
            last_updated: None,
        }
    }
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            is_loading: self.is_loading,
            is_fetching: self.is_fetching,
            error: self.error.clone(),
            last_updated: self.last_updated,
        }
    }
}

impl<T> Snapshot<T> {
    pub fn data(&self) -> Option<&T> {
        self.data.as_deref()
    }

    /// Only a failure with nothing cached is worth showing as an error state.
    pub fn is_error_state(&self) -> bool {
        self.error.is_some() && self.data.is_none()
    }
}

/// Result of one fetch cycle after classification.
#[derive(Debug)]
pub enum FetchOutcome<T> {
    Fresh(T),
    Absent,
    Failed(SyncError),
}

/// Anything that can hand out the current snapshot of a `T`.
pub trait SnapshotSource<T>: Send + Sync {
    fn current_snapshot(&self) -> Arc<Snapshot<T>>;

    fn retry_count(&self) -> u64 {
        0
    }
}

pub struct QueryCache<F: Feed> {
    feed: F,
    gateway: Arc<dyn RemoteGateway>,
    auth: Arc<dyn AuthProvider>,
    classifier: RetryClassifier,
    retry: RetryConfig,
    snapshot: RwLock<Arc<Snapshot<F::Output>>>,
    retries: AtomicU64,
    /// Set by the first completed cycle, whatever its outcome.
    completed: AtomicBool,
}

impl<F: Feed> std::fmt::Debug for QueryCache<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.current_snapshot();
        f.debug_struct("QueryCache")
            .field("key", &self.feed.key())
            .field("has_data", &snapshot.data.is_some())
            .field("has_error", &snapshot.error.is_some())
            .field("last_updated", &snapshot.last_updated)
            .finish()
    }
}

impl<F: Feed> QueryCache<F> {
    pub fn new(
        feed: F,
        gateway: Arc<dyn RemoteGateway>,
        auth: Arc<dyn AuthProvider>,
        classifier: RetryClassifier,
        retry: RetryConfig,
    ) -> Self {
        Self {
            feed,
            gateway,
            auth,
            classifier,
            retry,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            retries: AtomicU64::new(0),
            completed: AtomicBool::new(false),
        }
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }

    pub fn key(&self) -> String {
        self.feed.key()
    }

    pub fn current_snapshot(&self) -> Arc<Snapshot<F::Output>> {
        self.snapshot.read().clone()
    }

    /// Retries performed across all cycles.
    pub fn retry_count(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    fn swap(&self, update: impl FnOnce(&Snapshot<F::Output>) -> Snapshot<F::Output>) {
        let mut slot = self.snapshot.write();
        let next = update(&slot);
        *slot = Arc::new(next);
    }

    pub fn begin_fetch(&self) {
        self.swap(|prev| Snapshot {
            is_fetching: true,
            is_loading: !self.completed.load(Ordering::SeqCst),
            ..prev.clone()
        });
    }

    /// Folds a classified outcome into the snapshot.
    pub fn apply(&self, outcome: FetchOutcome<F::Output>) {
        let now = Utc::now();
        self.completed.store(true, Ordering::SeqCst);
        match outcome {
            FetchOutcome::Fresh(data) => self.swap(|_| Snapshot {
                data: Some(Arc::new(data)),
                is_loading: false,
                is_fetching: false,
                error: None,
                last_updated: Some(now),
            }),
            FetchOutcome::Absent => self.swap(|_| Snapshot {
                data: None,
                is_loading: false,
                is_fetching: false,
                error: None,
                last_updated: Some(now),
            }),
            // Stale data beats blank data.
            FetchOutcome::Failed(error) => self.swap(|prev| Snapshot {
                data: prev.data.clone(),
                is_loading: false,
                is_fetching: false,
                error: Some(Arc::new(error)),
                last_updated: prev.last_updated,
            }),
        }
    }

    /// Runs one fetch cycle with retries. The identity is read once, up front.
    #[instrument(skip(self), fields(key = %self.feed.key()))]
    pub async fn fetch_cycle(&self) -> FetchOutcome<F::Output> {
        let owner = self.auth.current_user().await;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match &owner {
                Some(owner) => self.feed.fetch(self.gateway.as_ref(), owner).await,
                None => Err(SyncError::Unauthenticated),
            };

            let error = match result {
                Ok(Some(data)) => return FetchOutcome::Fresh(data),
                Ok(None) => {
                    debug!("resource absent");
                    return FetchOutcome::Absent;
                }
                Err(error) => error,
            };

            match self.classifier.classify(&error, attempt) {
                Verdict::AbandonSilently => {
                    debug!(%error, "resource not available, treating as absent");
                    return FetchOutcome::Absent;
                }
                Verdict::AbandonWithError => {
                    warn!(%error, attempt, "fetch failed");
                    return FetchOutcome::Failed(self.classifier.surface(error, attempt));
                }
                Verdict::Retry => {
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    let delay = self.retry.backoff(attempt);
                    warn!(%error, attempt, delay_ms = delay.as_millis() as u64, "fetch failed, retrying");
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    /// Fetch cycle outside the scheduler, applied unconditionally.
    pub async fn refresh_once(&self) -> Arc<Snapshot<F::Output>> {
        self.begin_fetch();
        let outcome = self.fetch_cycle().await;
        self.apply(outcome);
        self.current_snapshot()
    }
}

impl<F: Feed> SnapshotSource<F::Output> for QueryCache<F> {
    fn current_snapshot(&self) -> Arc<Snapshot<F::Output>> {
        QueryCache::current_snapshot(self)
    }

    fn retry_count(&self) -> u64 {
        QueryCache::retry_count(self)
    }
}

#[async_trait]
impl<F: Feed> Refresh for QueryCache<F> {
    async fn refresh(&self, gate: &CommitGate) {
        gate.commit(|| self.begin_fetch());
        let outcome = self.fetch_cycle().await;
        if !gate.commit(|| self.apply(outcome)) {
            debug!(key = %self.feed.key(), "subscription detached, result discarded");
        }
    }

    /// No fetch will commit any more, so the cache is no longer fetching.
    fn detached(&self) {
        self.swap(|prev| Snapshot {
            is_fetching: false,
            is_loading: false,
            ..prev.clone()
        });
    }
}
