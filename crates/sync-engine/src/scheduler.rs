//! Polling scheduler
//!
//! An explicit registry of subscriptions keyed by a stable string. Each live
//! subscription owns a timer task; consumers attach and detach by reference
//! count. A tick starts a fetch only when the previous fetch for the same key
//! has finished, and every cache mutation goes through the subscription's
//! [`CommitGate`], which detach closes before returning.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub type SubscriptionKey = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    Idle,
    Active,
    Paused,
}

/// One fetch-and-update cycle, driven by the scheduler.
#[async_trait]
pub trait Refresh: Send + Sync + 'static {
    async fn refresh(&self, gate: &CommitGate);

    /// Runs after the last consumer detached and the gate closed. A fetch
    /// may still be running, but nothing it produces will be committed.
    fn detached(&self) {}
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    fetches_started: AtomicU64,
    ticks_skipped: AtomicU64,
    results_discarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStats {
    pub ticks: u64,
    pub fetches_started: u64,
    /// Ticks dropped because the previous fetch was still outstanding.
    pub ticks_skipped: u64,
    pub results_discarded: u64,
}

impl Counters {
    fn snapshot(&self) -> SubscriptionStats {
        SubscriptionStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            results_discarded: self.results_discarded.load(Ordering::Relaxed),
        }
    }
}

/// Liveness flag every cache mutation must pass through.
#[derive(Debug, Clone)]
pub struct CommitGate {
    live: Arc<Mutex<bool>>,
    counters: Arc<Counters>,
}

impl CommitGate {
    /// A gate that is open and not tied to any subscription.
    pub fn open() -> Self {
        Self {
            live: Arc::new(Mutex::new(true)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Runs `apply` while holding the gate, or drops it if the gate is closed.
    pub fn commit<F: FnOnce()>(&self, apply: F) -> bool {
        let live = self.live.lock();
        if *live {
            apply();
            true
        } else {
            self.counters
                .results_discarded
                .fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn is_open(&self) -> bool {
        *self.live.lock()
    }

    pub(crate) fn close(&self) {
        *self.live.lock() = false;
    }
}

struct Subscription {
    interval: Duration,
    task: Arc<dyn Refresh>,
    consumers: usize,
    token: CancellationToken,
    gate: CommitGate,
    paused: Arc<AtomicBool>,
    wake: Arc<Notify>,
    counters: Arc<Counters>,
}

impl Subscription {
    fn state(&self) -> SubscriptionState {
        if self.paused.load(Ordering::SeqCst) {
            SubscriptionState::Paused
        } else {
            SubscriptionState::Active
        }
    }
}

/// Resets the in-flight flag when the fetch task ends, even by panic.
struct FlightGuard(Arc<AtomicBool>);

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub struct PollScheduler {
    subscriptions: Arc<DashMap<SubscriptionKey, Subscription>>,
    /// Outlives detach so a re-attached key never overlaps an old fetch.
    in_flight: Arc<DashMap<SubscriptionKey, Arc<AtomicBool>>>,
    live_tasks: Arc<AtomicUsize>,
}

impl std::fmt::Debug for PollScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler")
            .field("subscriptions", &self.subscriptions.len())
            .field("live_tasks", &self.live_tasks.load(Ordering::Relaxed))
            .finish()
    }
}

impl PollScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a consumer to `key`, starting its timer if it was idle.
    ///
    /// The returned guard detaches on drop. When the key is already live the
    /// existing task and interval are kept.
    #[instrument(skip(self, key, task), fields(key = %key.as_ref()))]
    pub fn attach(
        &self,
        key: impl AsRef<str>,
        interval: Duration,
        task: Arc<dyn Refresh>,
    ) -> ConsumerGuard {
        let key = key.as_ref().to_string();

        match self.subscriptions.entry(key.clone()) {
            MapEntry::Occupied(mut occupied) => {
                if !Arc::ptr_eq(&occupied.get().task, &task) {
                    warn!("key already live with a different task, new task ignored");
                }
                occupied.get_mut().consumers += 1;
                debug!(consumers = occupied.get().consumers, "consumer attached");
            }
            MapEntry::Vacant(vacant) => {
                let counters = Arc::new(Counters::default());
                let subscription = Subscription {
                    interval,
                    task: task.clone(),
                    consumers: 1,
                    token: CancellationToken::new(),
                    gate: CommitGate {
                        live: Arc::new(Mutex::new(true)),
                        counters: counters.clone(),
                    },
                    paused: Arc::new(AtomicBool::new(false)),
                    wake: Arc::new(Notify::new()),
                    counters,
                };

                let flight = self
                    .in_flight
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(AtomicBool::new(false)))
                    .clone();

                info!(interval_ms = interval.as_millis() as u64, "subscription activated");
                self.spawn_loop(key.clone(), &subscription, task, flight);
                vacant.insert(subscription);
            }
        }

        ConsumerGuard {
            scheduler: self.clone(),
            key,
        }
    }

    fn spawn_loop(
        &self,
        key: SubscriptionKey,
        subscription: &Subscription,
        task: Arc<dyn Refresh>,
        flight: Arc<AtomicBool>,
    ) {
        let interval = subscription.interval;
        let token = subscription.token.clone();
        let gate = subscription.gate.clone();
        let paused = subscription.paused.clone();
        let wake = subscription.wake.clone();
        let counters = subscription.counters.clone();
        let live_tasks = self.live_tasks.clone();

        live_tasks.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = wake.notified() => ticker.reset(),
                    _ = ticker.tick() => {}
                }

                counters.ticks.fetch_add(1, Ordering::Relaxed);
                if paused.load(Ordering::SeqCst) {
                    debug!(key = %key, "tick dropped while paused");
                    continue;
                }
                if flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    counters.ticks_skipped.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "previous fetch outstanding, tick skipped");
                    continue;
                }

                counters.fetches_started.fetch_add(1, Ordering::Relaxed);
                let task = task.clone();
                let gate = gate.clone();
                let guard = FlightGuard(flight.clone());
                tokio::spawn(async move {
                    let _guard = guard;
                    task.refresh(&gate).await;
                });
            }

            live_tasks.fetch_sub(1, Ordering::SeqCst);
            debug!(key = %key, "subscription timer stopped");
        });
    }

    /// Removes one consumer. The last one closes the commit gate and cancels
    /// the timer; a fetch already running finishes but cannot commit.
    #[instrument(skip(self))]
    pub fn detach(&self, key: &str) -> SubscriptionState {
        match self.subscriptions.get_mut(key) {
            None => return SubscriptionState::Idle,
            Some(mut subscription) => {
                subscription.consumers = subscription.consumers.saturating_sub(1);
                if subscription.consumers > 0 {
                    debug!(consumers = subscription.consumers, "consumer detached");
                    return subscription.state();
                }
            }
        }

        if let Some((_, subscription)) = self
            .subscriptions
            .remove_if(key, |_, s| s.consumers == 0)
        {
            subscription.gate.close();
            subscription.task.detached();
            subscription.token.cancel();
            info!("last consumer detached, subscription idle");
            return SubscriptionState::Idle;
        }
        self.state(key)
    }

    /// Keeps consumers but drops ticks until [`PollScheduler::resume`].
    pub fn pause(&self, key: &str) -> bool {
        match self.subscriptions.get(key) {
            Some(subscription) => {
                subscription.paused.store(true, Ordering::SeqCst);
                info!(key, "subscription paused");
                true
            }
            None => false,
        }
    }

    /// Returns a paused subscription to active and fetches right away.
    pub fn resume(&self, key: &str) -> bool {
        match self.subscriptions.get(key) {
            Some(subscription) => {
                if subscription.paused.swap(false, Ordering::SeqCst) {
                    subscription.wake.notify_one();
                    info!(key, "subscription resumed");
                }
                true
            }
            None => false,
        }
    }

    /// Requests an immediate fetch, subject to the one-in-flight rule.
    pub fn refresh_now(&self, key: &str) -> bool {
        match self.subscriptions.get(key) {
            Some(subscription) => {
                subscription.wake.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn state(&self, key: &str) -> SubscriptionState {
        self.subscriptions
            .get(key)
            .map(|s| s.state())
            .unwrap_or(SubscriptionState::Idle)
    }

    pub fn consumers(&self, key: &str) -> usize {
        self.subscriptions
            .get(key)
            .map(|s| s.consumers)
            .unwrap_or(0)
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight
            .get(key)
            .map(|f| f.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn stats(&self, key: &str) -> Option<SubscriptionStats> {
        self.subscriptions.get(key).map(|s| s.counters.snapshot())
    }

    pub fn keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self.subscriptions.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Number of timer tasks still running, including ones winding down.
    pub fn live_tasks(&self) -> usize {
        self.live_tasks.load(Ordering::SeqCst)
    }
}

/// RAII handle for one consumer of a subscription.
pub struct ConsumerGuard {
    scheduler: PollScheduler,
    key: SubscriptionKey,
}

impl ConsumerGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }
}

impl std::fmt::Debug for ConsumerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerGuard").field("key", &self.key).finish()
    }
}

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        self.scheduler.detach(&self.key);
    }
}
