//! Configuration for gateways, feeds, retry policy and the trigger channel
//!
//! Every field has a default, so an empty JSON object is a valid config.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub gateway: GatewayConfig,
    pub retry: RetryConfig,
    pub feeds: FeedsConfig,
    pub market: MarketConfig,
    pub trigger: TriggerConfig,
}

impl VigilConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: VigilConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| SyncError::Config {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(config_error("retry.max_attempts must be at least 1"));
        }
        for (name, feed) in [
            ("logs", &self.feeds.logs),
            ("messages", &self.feeds.messages),
            ("states", &self.feeds.states),
            ("market_depth", &self.feeds.market_depth),
        ] {
            if feed.interval_ms == 0 {
                return Err(config_error(format!("feeds.{name}.interval_ms must be non-zero")));
            }
        }
        if self.market.name.trim().is_empty() {
            return Err(config_error("market.name must not be empty"));
        }
        if self.trigger.procedure.trim().is_empty() {
            return Err(config_error("trigger.procedure must not be empty"));
        }
        Ok(())
    }
}

fn config_error(reason: impl Into<String>) -> SyncError {
    SyncError::Config {
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            api_key: None,
            timeout_ms: 10_000,
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per fetch cycle, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let delay = self.base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Fault codes and message fragments meaning "this resource is not tracked".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnavailableMarkers {
    pub codes: Vec<String>,
    pub messages: Vec<String>,
}

impl UnavailableMarkers {
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty() && self.messages.is_empty()
    }

    pub fn matches(&self, code: Option<&str>, message: &str) -> bool {
        self.codes
            .iter()
            .any(|c| code == Some(c.as_str()) || message.contains(c.as_str()))
            || self.messages.iter().any(|m| message.contains(m.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub interval_ms: u64,
    pub limit: Option<usize>,
    pub unavailable: UnavailableMarkers,
}

impl FeedConfig {
    pub fn every(interval_ms: u64, limit: Option<usize>) -> Self {
        Self {
            interval_ms,
            limit,
            unavailable: UnavailableMarkers::default(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self::every(5_000, None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedsConfig {
    pub logs: FeedConfig,
    pub messages: FeedConfig,
    pub states: FeedConfig,
    pub market_depth: FeedConfig,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            logs: FeedConfig::every(5_000, Some(100)),
            messages: FeedConfig::every(3_000, Some(100)),
            states: FeedConfig::every(5_000, None),
            market_depth: FeedConfig {
                interval_ms: 5_000,
                limit: None,
                unavailable: UnavailableMarkers {
                    codes: vec!["40309".to_string(), "40034".to_string()],
                    messages: vec!["Symbol not available".to_string()],
                },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Provider name used in `get-<name>-orderbook`.
    pub name: String,
    pub depth_levels: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            name: "bitget".to_string(),
            depth_levels: 15,
        }
    }
}

impl MarketConfig {
    pub fn orderbook_procedure(&self) -> String {
        format!("get-{}-orderbook", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub procedure: String,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            procedure: "mkt-data-scheduler".to_string(),
        }
    }
}
