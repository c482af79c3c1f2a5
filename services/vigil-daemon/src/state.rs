//! Long-lived subscriptions held by the daemon

use parking_lot::Mutex;
use remote_gateway::MemoryGateway;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use sync_engine::{AgentSync, DepthSelection, Snapshot, Subscription};
use tracing::info;
use vigil_core::{
    AgentLogEntry, AgentMessage, AgentState, MarketDepthSnapshot, MemorySink, Result, SyncError,
    VigilConfig,
};

pub struct DaemonState {
    pub sync: Arc<AgentSync>,
    pub logs: Subscription<Vec<AgentLogEntry>>,
    pub messages: Subscription<Vec<AgentMessage>>,
    pub states: Subscription<Vec<AgentState>>,
    pub depth: Mutex<DepthSelection>,
    pub notifications: MemorySink,
    pub started_at: Instant,
}

impl std::fmt::Debug for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonState")
            .field("sync", &self.sync)
            .field("depth_symbol", &self.depth.lock().symbol())
            .finish()
    }
}

impl DaemonState {
    /// Opens the unfiltered logs, messages and states subscriptions.
    pub fn new(sync: Arc<AgentSync>, notifications: MemorySink) -> Self {
        let logs = sync.subscribe_logs(Default::default());
        let messages = sync.subscribe_messages(Default::default());
        let states = sync.subscribe_states();
        info!("daemon subscriptions open");

        Self {
            sync,
            logs,
            messages,
            states,
            depth: Mutex::new(DepthSelection::new()),
            notifications,
            started_at: Instant::now(),
        }
    }

    pub fn select_depth(&self, symbol: Option<&str>) -> Result<()> {
        self.depth.lock().select(&self.sync, symbol)
    }

    pub fn depth_view(&self) -> DepthView {
        let selection = self.depth.lock();
        DepthView {
            symbol: selection.symbol().map(str::to_string),
            snapshot: selection
                .snapshot()
                .map(|snapshot| SnapshotView::project(&snapshot, Clone::clone)),
        }
    }
}

/// Wire form of a cache snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotView<T> {
    pub data: Option<T>,
    pub is_loading: bool,
    pub is_fetching: bool,
    pub error: Option<String>,
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
}

impl<T> SnapshotView<T> {
    pub fn project<S>(snapshot: &Snapshot<S>, project: impl FnOnce(&S) -> T) -> Self {
        Self {
            data: snapshot.data().map(project),
            is_loading: snapshot.is_loading,
            is_fetching: snapshot.is_fetching,
            error: snapshot.error.as_ref().map(|e| e.to_string()),
            last_updated: snapshot.last_updated,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DepthView {
    pub symbol: Option<String>,
    pub snapshot: Option<SnapshotView<MarketDepthSnapshot>>,
}

/// In-process backend for `--offline`, optionally seeded from a JSON file of
/// `{collection: [records]}`.
pub fn offline_gateway(config: &VigilConfig, seed: Option<&Path>) -> Result<MemoryGateway> {
    let gateway = match seed {
        Some(path) => {
            let raw = std::fs::read_to_string(path).map_err(|e| SyncError::Config {
                reason: format!("cannot read seed {}: {e}", path.display()),
            })?;
            let seed: Value = serde_json::from_str(&raw)?;
            MemoryGateway::from_seed(&seed)?
        }
        None => MemoryGateway::new(),
    };

    gateway.register_procedure(&config.market.orderbook_procedure(), |_| Ok(Value::Null));
    gateway.register_procedure(&config.trigger.procedure, |_| {
        Ok(json!({ "message": "Market data collection queued (offline)" }))
    });
    Ok(gateway)
}
