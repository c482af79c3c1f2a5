use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use sync_engine::{LogFilter, MessageFilter};
use tracing::{info, instrument, warn};
use vigil_core::{endpoints, AgentLogEntry, AgentMessage, AgentState, Severity, SyncError, VERSION};

use crate::state::{DaemonState, DepthView, SnapshotView};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;

fn api_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}

pub fn router(state: Arc<DaemonState>) -> Router {
    Router::new()
        .route(endpoints::HEALTH, get(health_check))
        .route(endpoints::METRICS, get(metrics))
        .route(endpoints::API_V1_LOGS, get(list_logs))
        .route(endpoints::API_V1_MESSAGES, get(list_messages))
        .route(endpoints::API_V1_STATES, get(list_states))
        .route(
            endpoints::API_V1_MARKET_DEPTH,
            get(market_depth).put(select_market_depth),
        )
        .route(endpoints::API_V1_MARKET_DATA_JOB, post(trigger_market_data))
        .route(endpoints::API_V1_NOTIFICATIONS, get(notifications))
        .with_state(state)
}

#[instrument]
async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "vigil-daemon",
        "version": VERSION
    }))
}

#[instrument(skip(state))]
async fn metrics(State(state): State<Arc<DaemonState>>) -> Json<Value> {
    Json(json!({
        "service": "vigil-daemon",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "subscriptions": state.sync.subscriptions(),
        "live_timers": state.sync.scheduler().live_tasks(),
        "trigger_invocations": state.sync.trigger_invocations(),
        "triggering": state.sync.is_triggering()
    }))
}

#[derive(Debug, Default, Deserialize)]
struct LogsQuery {
    agent: Option<String>,
    severity: Option<String>,
}

#[instrument(skip(state))]
async fn list_logs(
    State(state): State<Arc<DaemonState>>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<SnapshotView<Vec<AgentLogEntry>>> {
    let severity = query
        .severity
        .as_deref()
        .map(str::parse::<Severity>)
        .transpose()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    let filter = LogFilter {
        agent: query.agent,
        severity,
    };

    let snapshot = state.logs.snapshot();
    let view = SnapshotView::project(&snapshot, |entries| {
        entries
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect()
    });
    Ok(Json(view))
}

#[derive(Debug, Default, Deserialize)]
struct MessagesQuery {
    agent: Option<String>,
}

#[instrument(skip(state))]
async fn list_messages(
    State(state): State<Arc<DaemonState>>,
    Query(query): Query<MessagesQuery>,
) -> Json<SnapshotView<Vec<AgentMessage>>> {
    let filter = MessageFilter { agent: query.agent };
    let snapshot = state.messages.snapshot();
    let view = SnapshotView::project(&snapshot, |messages| {
        messages
            .iter()
            .filter(|message| filter.matches(message))
            .cloned()
            .collect()
    });
    Json(view)
}

#[instrument(skip(state))]
async fn list_states(State(state): State<Arc<DaemonState>>) -> Json<SnapshotView<Vec<AgentState>>> {
    let snapshot = state.states.snapshot();
    Json(SnapshotView::project(&snapshot, Clone::clone))
}

#[instrument(skip(state))]
async fn market_depth(State(state): State<Arc<DaemonState>>) -> Json<DepthView> {
    Json(state.depth_view())
}

#[derive(Debug, Deserialize)]
struct DepthSelectionBody {
    symbol: Option<String>,
}

#[instrument(skip(state))]
async fn select_market_depth(
    State(state): State<Arc<DaemonState>>,
    Json(body): Json<DepthSelectionBody>,
) -> ApiResult<DepthView> {
    state
        .select_depth(body.symbol.as_deref())
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    info!(symbol = ?body.symbol, "market depth selection changed");
    Ok(Json(state.depth_view()))
}

#[instrument(skip(state))]
async fn trigger_market_data(State(state): State<Arc<DaemonState>>) -> ApiResult<Value> {
    match state.sync.trigger_batch_job().await {
        Ok(result) => Ok(Json(json!({
            "status": "started",
            "result": result
        }))),
        Err(error @ SyncError::CommandRejected { .. }) => {
            Err(api_error(StatusCode::CONFLICT, error.to_string()))
        }
        Err(error) => {
            warn!(%error, "market data trigger failed");
            Err(api_error(StatusCode::BAD_GATEWAY, error.to_string()))
        }
    }
}

#[instrument(skip(state))]
async fn notifications(State(state): State<Arc<DaemonState>>) -> Json<Value> {
    Json(json!({ "notifications": state.notifications.recent() }))
}
