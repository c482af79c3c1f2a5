//! The four data sources behind the typed caches

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use vigil_core::collections::{
    AGENT_LOGS, AGENT_MESSAGES, AGENT_STATE, LOGS_ORDER, MESSAGES_ORDER, OWNER_COLUMN, STATE_ORDER,
};
use vigil_core::{
    AgentLogEntry, AgentMessage, AgentState, Filter, Identity, MarketDepthSnapshot, OrderBook,
    Record, RecordQuery, RemoteGateway, Result, Severity, SyncError,
};

use crate::cache::Feed;

/// Builds `base?name=value&..` from the fields that are set, escaping the
/// separators inside values so distinct queries never share a key.
fn subscription_key(base: &str, fields: &[(&str, Option<&str>)]) -> String {
    let mut key = base.to_string();
    let mut separator = '?';
    for (name, value) in fields {
        let Some(value) = value else { continue };
        key.push(separator);
        key.push_str(name);
        key.push('=');
        for c in value.chars() {
            match c {
                '%' => key.push_str("%25"),
                '&' => key.push_str("%26"),
                '=' => key.push_str("%3D"),
                '?' => key.push_str("%3F"),
                c => key.push(c),
            }
        }
        separator = '&';
    }
    key
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Record>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(SyncError::from))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogFilter {
    pub agent: Option<String>,
    pub severity: Option<Severity>,
}

impl LogFilter {
    pub fn agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn matches(&self, entry: &AgentLogEntry) -> bool {
        self.agent.as_deref().map_or(true, |a| entry.agent_name == a)
            && self.severity.map_or(true, |s| entry.severity == s)
    }
}

#[derive(Debug, Clone)]
pub struct LogFeed {
    pub filter: LogFilter,
    pub limit: Option<usize>,
}

impl LogFeed {
    pub fn query(&self, owner: &Identity) -> RecordQuery {
        let mut query = RecordQuery::new(AGENT_LOGS).filter(Filter::eq(OWNER_COLUMN, owner.user_id));
        if let Some(agent) = &self.filter.agent {
            query = query.filter(Filter::eq("agent_name", agent));
        }
        if let Some(severity) = self.filter.severity {
            query = query.filter(Filter::eq("log_level", severity));
        }
        query.order_desc(LOGS_ORDER).limit(self.limit)
    }
}

#[async_trait]
impl Feed for LogFeed {
    type Output = Vec<AgentLogEntry>;

    fn key(&self) -> String {
        subscription_key(
            AGENT_LOGS,
            &[
                ("agent", self.filter.agent.as_deref()),
                ("severity", self.filter.severity.map(|s| s.as_str())),
            ],
        )
    }

    async fn fetch(
        &self,
        gateway: &dyn RemoteGateway,
        owner: &Identity,
    ) -> Result<Option<Self::Output>> {
        let rows = gateway.query(&self.query(owner)).await?;
        decode_rows(rows).map(Some)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageFilter {
    /// Matches either end of the message.
    pub agent: Option<String>,
}

impl MessageFilter {
    pub fn agent(agent: impl Into<String>) -> Self {
        Self {
            agent: Some(agent.into()),
        }
    }

    pub fn matches(&self, message: &AgentMessage) -> bool {
        self.agent.as_deref().map_or(true, |a| message.involves(a))
    }
}

#[derive(Debug, Clone)]
pub struct MessageFeed {
    pub filter: MessageFilter,
    pub limit: Option<usize>,
}

impl MessageFeed {
    pub fn query(&self, owner: &Identity) -> RecordQuery {
        let mut query =
            RecordQuery::new(AGENT_MESSAGES).filter(Filter::eq(OWNER_COLUMN, owner.user_id));
        if let Some(agent) = &self.filter.agent {
            query = query.filter(Filter::Any(vec![
                Filter::eq("sender_agent", agent),
                Filter::eq("receiver_agent", agent),
            ]));
        }
        query.order_desc(MESSAGES_ORDER).limit(self.limit)
    }
}

#[async_trait]
impl Feed for MessageFeed {
    type Output = Vec<AgentMessage>;

    fn key(&self) -> String {
        subscription_key(AGENT_MESSAGES, &[("agent", self.filter.agent.as_deref())])
    }

    async fn fetch(
        &self,
        gateway: &dyn RemoteGateway,
        owner: &Identity,
    ) -> Result<Option<Self::Output>> {
        let rows = gateway.query(&self.query(owner)).await?;
        decode_rows(rows).map(Some)
    }
}

#[derive(Debug, Clone)]
pub struct StateFeed {
    pub limit: Option<usize>,
}

impl StateFeed {
    pub fn query(&self, owner: &Identity) -> RecordQuery {
        RecordQuery::new(AGENT_STATE)
            .filter(Filter::eq(OWNER_COLUMN, owner.user_id))
            .order_desc(STATE_ORDER)
            .limit(self.limit)
    }
}

#[async_trait]
impl Feed for StateFeed {
    type Output = Vec<AgentState>;

    fn key(&self) -> String {
        AGENT_STATE.to_string()
    }

    async fn fetch(
        &self,
        gateway: &dyn RemoteGateway,
        owner: &Identity,
    ) -> Result<Option<Self::Output>> {
        let rows = gateway.query(&self.query(owner)).await?;
        decode_rows(rows).map(Some)
    }
}

/// Order book for one symbol, fetched through the market's remote procedure.
#[derive(Debug, Clone)]
pub struct MarketDepthFeed {
    pub market: String,
    pub symbol: String,
    pub levels: usize,
}

impl MarketDepthFeed {
    pub fn procedure(&self) -> String {
        format!("get-{}-orderbook", self.market)
    }

    /// `null` is absence; an `error` field is a provider fault.
    fn parse(&self, reply: Value) -> Result<Option<MarketDepthSnapshot>> {
        let reply = match reply {
            Value::Null => return Ok(None),
            Value::Object(mut map) => {
                if let Some(error) = map.get("error").filter(|e| !e.is_null()) {
                    let code = match map.get("code") {
                        Some(Value::String(s)) => Some(s.clone()),
                        Some(Value::Number(n)) => Some(n.to_string()),
                        _ => None,
                    };
                    let message = error
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| error.to_string());
                    return Err(SyncError::Backend { code, message });
                }
                match map.remove("data") {
                    Some(Value::Null) => return Ok(None),
                    Some(inner) => inner,
                    None => Value::Object(map),
                }
            }
            other => other,
        };

        let book: OrderBook = serde_json::from_value(reply)?;
        Ok(Some(MarketDepthSnapshot::from_order_book(
            self.symbol.clone(),
            &book,
            self.levels,
        )))
    }
}

#[async_trait]
impl Feed for MarketDepthFeed {
    type Output = MarketDepthSnapshot;

    fn key(&self) -> String {
        subscription_key(
            "market_depth",
            &[
                ("market", Some(self.market.as_str())),
                ("symbol", Some(self.symbol.as_str())),
            ],
        )
    }

    async fn fetch(&self, gateway: &dyn RemoteGateway, _owner: &Identity) -> Result<Option<Self::Output>> {
        let reply = gateway
            .invoke(&self.procedure(), json!({ "symbol": self.symbol }))
            .await?;
        let snapshot = self.parse(reply)?;
        if snapshot.is_none() {
            debug!(symbol = %self.symbol, "no order book");
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn depth() -> MarketDepthFeed {
        MarketDepthFeed {
            market: "bitget".into(),
            symbol: "BTCUSDT".into(),
            levels: 15,
        }
    }

    #[test]
    fn keys_are_stable_per_query() {
        let all = LogFeed {
            filter: LogFilter::default(),
            limit: Some(100),
        };
        let narrowed = LogFeed {
            filter: LogFilter::default().agent("LP.PROFILER").severity(Severity::Error),
            limit: Some(100),
        };
        assert_eq!(all.key(), "agent_logs");
        assert_eq!(narrowed.key(), "agent_logs?agent=LP.PROFILER&severity=error");

        let messages = MessageFeed {
            filter: MessageFilter::agent("QA.WATCHDOG"),
            limit: Some(100),
        };
        assert_eq!(messages.key(), "agent_messages?agent=QA.WATCHDOG");
        assert_eq!(StateFeed { limit: None }.key(), "agent_state");
        assert_eq!(depth().key(), "market_depth?market=bitget&symbol=BTCUSDT");
    }

    #[test]
    fn separators_in_values_cannot_forge_another_key() {
        let log_key = |filter: LogFilter| LogFeed { filter, limit: None }.key();

        let colon_agent = log_key(LogFilter::default().agent("X:error"));
        let agent_and_severity = log_key(LogFilter::default().agent("X").severity(Severity::Error));
        assert_ne!(colon_agent, agent_and_severity);

        let forged = log_key(LogFilter::default().agent("X&severity=error"));
        assert_eq!(forged, "agent_logs?agent=X%26severity%3Derror");
        assert_ne!(forged, agent_and_severity);

        let depth_key = |market: &str, symbol: &str| {
            MarketDepthFeed {
                market: market.into(),
                symbol: symbol.into(),
                levels: 15,
            }
            .key()
        };
        assert_ne!(depth_key("a&symbol=b", "c"), depth_key("a", "b&symbol=c"));
    }

    #[test]
    fn log_query_is_owner_scoped_and_ordered() {
        let owner = Identity::new(Uuid::new_v4());
        let feed = LogFeed {
            filter: LogFilter::default().severity(Severity::Warning),
            limit: Some(100),
        };
        let query = feed.query(&owner);

        assert_eq!(query.collection, "agent_logs");
        assert_eq!(query.filters[0], Filter::eq("user_id", owner.user_id));
        assert_eq!(query.filters[1], Filter::eq("log_level", "warning"));
        assert_eq!(query.order.as_ref().map(|o| o.column.as_str()), Some("timestamp"));
        assert_eq!(query.limit, Some(100));
    }

    #[test]
    fn message_agent_filter_matches_either_end() {
        let owner = Identity::new(Uuid::new_v4());
        let feed = MessageFeed {
            filter: MessageFilter::agent("QA.WATCHDOG"),
            limit: Some(100),
        };
        let query = feed.query(&owner);
        assert!(matches!(&query.filters[1], Filter::Any(inner) if inner.len() == 2));
    }

    #[test]
    fn depth_reply_shapes() {
        let feed = depth();

        assert!(feed.parse(Value::Null).unwrap().is_none());
        assert!(feed.parse(json!({"data": null})).unwrap().is_none());

        let wrapped = json!({"data": {"bids": [["100", "1"]], "asks": [["101", "2"]]}});
        let snapshot = feed.parse(wrapped).unwrap().unwrap();
        assert_eq!(snapshot.symbol, "BTCUSDT");
        assert_eq!(snapshot.spread, 1.0);

        match feed.parse(json!({"error": "Symbol not available", "code": 40034})) {
            Err(SyncError::Backend { code, message }) => {
                assert_eq!(code.as_deref(), Some("40034"));
                assert_eq!(message, "Symbol not available");
            }
            other => panic!("expected backend fault, got {other:?}"),
        }
    }
}
