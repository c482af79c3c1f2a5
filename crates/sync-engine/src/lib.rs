//! # Sync Engine
//!
//! Keeps client-side read models of agent telemetry in step with the backend.
//!
//! - [`PollScheduler`] drives one timer per subscription key, reference
//!   counted by consumers
//! - [`QueryCache`] runs a fetch cycle through the [`RetryClassifier`] and
//!   swaps immutable [`Snapshot`]s
//! - [`BatchTrigger`] starts the backend market data job at most once at a time
//! - [`AgentSync`] ties them together behind subscribe/unsubscribe calls

pub use vigil_core;

mod cache;
mod classifier;
mod feeds;
mod scheduler;
mod sync;
mod trigger;

pub use cache::{Feed, FetchOutcome, QueryCache, Snapshot, SnapshotSource};
pub use classifier::{RetryClassifier, Verdict};
pub use feeds::{LogFeed, LogFilter, MarketDepthFeed, MessageFeed, MessageFilter, StateFeed};
pub use scheduler::{
    CommitGate, ConsumerGuard, PollScheduler, Refresh, SubscriptionKey, SubscriptionState,
    SubscriptionStats,
};
pub use sync::{AgentSync, DepthSelection, Subscription, SubscriptionReport};
pub use trigger::BatchTrigger;

// Re-export core types for convenience
pub use vigil_core::{Result, SyncError, VigilConfig};
