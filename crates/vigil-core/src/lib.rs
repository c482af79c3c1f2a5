//! # Vigil Core
//!
//! Core types and traits for the Vigil agent telemetry synchronization layer.
//!
//! ## What lives here
//! - Agent records (logs, bus messages, state snapshots) and the market depth view
//! - The gateway contract every transport implements
//! - The error taxonomy shared by classifier, caches and binaries
//! - Identity, notification and configuration primitives

pub mod agent;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod market;
pub mod notify;

pub use agent::{
    AgentLogEntry, AgentMessage, AgentState, MessagePayload, PayloadKind, RecordId, Severity,
};
pub use config::{
    FeedConfig, FeedsConfig, GatewayConfig, MarketConfig, RetryConfig, TriggerConfig,
    UnavailableMarkers, VigilConfig,
};
pub use error::{Result, SyncError};
pub use gateway::{Filter, Order, Record, RecordQuery, RemoteGateway};
pub use identity::{AuthProvider, Identity, OwnerId, SessionStore};
pub use market::{BookEntry, DepthLevel, MarketDepthSnapshot, OrderBook};
pub use notify::{
    FanoutSink, MemorySink, Notification, NotificationLevel, NotificationSink, TracingSink,
};

/// Current Vigil version for compatibility checks
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Vigil build information for telemetry and debugging
pub const BUILD_INFO: &str = concat!(
    "Vigil ",
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("CARGO_PKG_NAME"),
    ")"
);

/// Record store collections and their ordering columns
pub mod collections {
    pub const AGENT_LOGS: &str = "agent_logs";
    pub const AGENT_MESSAGES: &str = "agent_messages";
    pub const AGENT_STATE: &str = "agent_state";

    pub const OWNER_COLUMN: &str = "user_id";
    pub const LOGS_ORDER: &str = "timestamp";
    pub const MESSAGES_ORDER: &str = "created_at";
    pub const STATE_ORDER: &str = "updated_at";
}

/// Standard API endpoints for Vigil services
pub mod endpoints {
    pub const HEALTH: &str = "/health";
    pub const METRICS: &str = "/metrics";
    pub const API_V1_LOGS: &str = "/api/v1/logs";
    pub const API_V1_MESSAGES: &str = "/api/v1/messages";
    pub const API_V1_STATES: &str = "/api/v1/states";
    pub const API_V1_MARKET_DEPTH: &str = "/api/v1/market-depth";
    pub const API_V1_MARKET_DATA_JOB: &str = "/api/v1/jobs/market-data";
    pub const API_V1_NOTIFICATIONS: &str = "/api/v1/notifications";
}
