//! `AgentSync`: the subscribe/unsubscribe surface over all four caches
//!
//! Caches are created on first subscription and kept for the lifetime of the
//! facade, so a consumer that comes back sees the last known snapshot while
//! the first new fetch is running.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument};
use vigil_core::{
    AgentLogEntry, AgentMessage, AgentState, AuthProvider, FeedConfig, MarketDepthSnapshot,
    NotificationSink, RemoteGateway, Result, SyncError, VigilConfig,
};

use crate::cache::{Feed, QueryCache, Snapshot, SnapshotSource};
use crate::classifier::RetryClassifier;
use crate::feeds::{LogFeed, LogFilter, MarketDepthFeed, MessageFeed, MessageFilter, StateFeed};
use crate::scheduler::{ConsumerGuard, PollScheduler, SubscriptionKey, SubscriptionState, SubscriptionStats};
use crate::trigger::BatchTrigger;

/// One consumer's handle on a cache. Dropping it detaches.
pub struct Subscription<T> {
    source: Arc<dyn SnapshotSource<T>>,
    guard: ConsumerGuard,
}

impl<T> Subscription<T> {
    pub fn snapshot(&self) -> Arc<Snapshot<T>> {
        self.source.current_snapshot()
    }

    pub fn key(&self) -> &str {
        self.guard.key()
    }

    /// Retries performed by the underlying cache.
    pub fn retry_count(&self) -> u64 {
        self.source.retry_count()
    }

    /// Asks for an out-of-band fetch; skipped if one is already running.
    pub fn refresh(&self) -> bool {
        self.guard.scheduler().refresh_now(self.key())
    }

    pub fn pause(&self) -> bool {
        self.guard.scheduler().pause(self.key())
    }

    pub fn resume(&self) -> bool {
        self.guard.scheduler().resume(self.key())
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("key", &self.key()).finish()
    }
}

/// Scheduler view of one live subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionReport {
    pub key: SubscriptionKey,
    pub state: SubscriptionState,
    pub consumers: usize,
    pub in_flight: bool,
    pub stats: SubscriptionStats,
}

pub struct AgentSync {
    config: VigilConfig,
    gateway: Arc<dyn RemoteGateway>,
    auth: Arc<dyn AuthProvider>,
    scheduler: PollScheduler,
    trigger: BatchTrigger,
    logs: DashMap<LogFilter, Arc<QueryCache<LogFeed>>>,
    messages: DashMap<MessageFilter, Arc<QueryCache<MessageFeed>>>,
    states: Arc<QueryCache<StateFeed>>,
    depth: DashMap<String, Arc<QueryCache<MarketDepthFeed>>>,
}

impl std::fmt::Debug for AgentSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSync")
            .field("market", &self.config.market.name)
            .field("scheduler", &self.scheduler)
            .field("log_caches", &self.logs.len())
            .field("message_caches", &self.messages.len())
            .field("depth_caches", &self.depth.len())
            .finish()
    }
}

impl AgentSync {
    pub fn new(
        config: VigilConfig,
        gateway: Arc<dyn RemoteGateway>,
        auth: Arc<dyn AuthProvider>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        config.validate()?;

        let trigger = BatchTrigger::new(gateway.clone(), sink, config.trigger.procedure.clone());
        let states = Arc::new(QueryCache::new(
            StateFeed {
                limit: config.feeds.states.limit,
            },
            gateway.clone(),
            auth.clone(),
            RetryClassifier::for_feed(&config.retry, &config.feeds.states),
            config.retry.clone(),
        ));

        info!(market = %config.market.name, "agent sync ready");
        Ok(Self {
            config,
            gateway,
            auth,
            scheduler: PollScheduler::new(),
            trigger,
            logs: DashMap::new(),
            messages: DashMap::new(),
            states,
            depth: DashMap::new(),
        })
    }

    pub fn config(&self) -> &VigilConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    fn cache<F: Feed>(&self, feed: F, settings: &FeedConfig) -> Arc<QueryCache<F>> {
        Arc::new(QueryCache::new(
            feed,
            self.gateway.clone(),
            self.auth.clone(),
            RetryClassifier::for_feed(&self.config.retry, settings),
            self.config.retry.clone(),
        ))
    }

    fn attach<F: Feed>(&self, cache: Arc<QueryCache<F>>, settings: &FeedConfig) -> Subscription<F::Output> {
        let guard = self
            .scheduler
            .attach(cache.key(), settings.interval(), cache.clone());
        Subscription {
            source: cache,
            guard,
        }
    }

    pub fn subscribe_logs(&self, filter: LogFilter) -> Subscription<Vec<AgentLogEntry>> {
        let settings = &self.config.feeds.logs;
        let cache = self
            .logs
            .entry(filter.clone())
            .or_insert_with(|| {
                self.cache(
                    LogFeed {
                        filter,
                        limit: settings.limit,
                    },
                    settings,
                )
            })
            .clone();
        self.attach(cache, settings)
    }

    pub fn subscribe_messages(&self, filter: MessageFilter) -> Subscription<Vec<AgentMessage>> {
        let settings = &self.config.feeds.messages;
        let cache = self
            .messages
            .entry(filter.clone())
            .or_insert_with(|| {
                self.cache(
                    MessageFeed {
                        filter,
                        limit: settings.limit,
                    },
                    settings,
                )
            })
            .clone();
        self.attach(cache, settings)
    }

    pub fn subscribe_states(&self) -> Subscription<Vec<AgentState>> {
        self.attach(self.states.clone(), &self.config.feeds.states)
    }

    /// Polls the order book for `symbol` while the subscription lives.
    pub fn subscribe_market_depth(&self, symbol: &str) -> Result<Subscription<MarketDepthSnapshot>> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(SyncError::Config {
                reason: "market depth symbol must not be empty".to_string(),
            });
        }

        let settings = &self.config.feeds.market_depth;
        let cache = self
            .depth
            .entry(symbol.to_string())
            .or_insert_with(|| {
                self.cache(
                    MarketDepthFeed {
                        market: self.config.market.name.clone(),
                        symbol: symbol.to_string(),
                        levels: self.config.market.depth_levels,
                    },
                    settings,
                )
            })
            .clone();
        Ok(self.attach(cache, settings))
    }

    /// Starts the backend market data job. Rejected while one is in flight.
    #[instrument(skip(self))]
    pub async fn trigger_batch_job(&self) -> Result<Value> {
        self.trigger.trigger().await
    }

    pub fn is_triggering(&self) -> bool {
        self.trigger.is_triggering()
    }

    pub fn trigger_invocations(&self) -> u64 {
        self.trigger.invocations()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionReport> {
        self.scheduler
            .keys()
            .into_iter()
            .filter_map(|key| {
                let stats = self.scheduler.stats(&key)?;
                Some(SubscriptionReport {
                    state: self.scheduler.state(&key),
                    consumers: self.scheduler.consumers(&key),
                    in_flight: self.scheduler.is_in_flight(&key),
                    stats,
                    key,
                })
            })
            .collect()
    }
}

/// The one market depth subscription a view keeps for its selected symbol.
#[derive(Debug, Default)]
pub struct DepthSelection {
    current: Option<(String, Subscription<MarketDepthSnapshot>)>,
}

impl DepthSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches to `symbol`, or stops polling with `None`. Selecting the
    /// current symbol again keeps the existing subscription.
    pub fn select(&mut self, sync: &AgentSync, symbol: Option<&str>) -> Result<()> {
        let symbol = symbol.map(str::trim).filter(|s| !s.is_empty());
        if symbol == self.symbol() {
            return Ok(());
        }

        self.current = None;
        if let Some(symbol) = symbol {
            let subscription = sync.subscribe_market_depth(symbol)?;
            self.current = Some((symbol.to_string(), subscription));
        }
        Ok(())
    }

    pub fn symbol(&self) -> Option<&str> {
        self.current.as_ref().map(|(symbol, _)| symbol.as_str())
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot<MarketDepthSnapshot>>> {
        self.current.as_ref().map(|(_, sub)| sub.snapshot())
    }

    pub fn subscription(&self) -> Option<&Subscription<MarketDepthSnapshot>> {
        self.current.as_ref().map(|(_, sub)| sub)
    }
}
