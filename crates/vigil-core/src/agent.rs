//! Agent telemetry records: logs, bus messages and state snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::SyncError;
use crate::identity::OwnerId;

pub type RecordId = Uuid;

/// Log severity as written by the agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Debug,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Debug => "debug",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "debug" => Ok(Severity::Debug),
            other => Err(SyncError::Config {
                reason: format!("unknown severity '{other}'"),
            }),
        }
    }
}

/// Immutable audit record emitted by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentLogEntry {
    pub id: RecordId,
    pub agent_name: String,
    pub user_id: OwnerId,
    #[serde(rename = "log_level")]
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Envelope carried by an [`AgentMessage`].
///
/// The well-known fields are typed; anything else a producer attaches lands
/// in `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Tagged view over a [`MessagePayload`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PayloadKind<'a> {
    Failure(&'a str),
    Outcome(&'a Value),
    Command {
        action: &'a str,
        data: Option<&'a Value>,
    },
    Opaque(&'a Map<String, Value>),
}

impl MessagePayload {
    /// Error wins over result, result over a pending command.
    pub fn kind(&self) -> PayloadKind<'_> {
        if let Some(error) = self.error.as_deref() {
            return PayloadKind::Failure(error);
        }
        if let Some(result) = self.result.as_ref() {
            return PayloadKind::Outcome(result);
        }
        match self.action.as_deref() {
            Some(action) => PayloadKind::Command {
                action,
                data: self.data.as_ref(),
            },
            None => PayloadKind::Opaque(&self.extra),
        }
    }
}

/// Point-to-point message on the inter-agent bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: RecordId,
    pub sender_agent: String,
    pub receiver_agent: String,
    pub message_type: String,
    #[serde(default)]
    pub payload: MessagePayload,
    #[serde(default)]
    pub priority: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    pub user_id: OwnerId,
}

impl AgentMessage {
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    /// True when `agent` is either end of the message.
    pub fn involves(&self, agent: &str) -> bool {
        self.sender_agent == agent || self.receiver_agent == agent
    }
}

/// Latest known status of one agent for one owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub id: RecordId,
    pub agent_name: String,
    pub user_id: OwnerId,
    pub status: String,
    #[serde(default)]
    pub last_execution: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub performance_metrics: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
