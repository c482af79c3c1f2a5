//! BDD Tests for the Vigil Daemon HTTP surface

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use cucumber::{given, then, when, World};
use remote_gateway::MemoryGateway;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use sync_engine::AgentSync;
use tower::ServiceExt;
use uuid::Uuid;
use vigil_core::{Identity, MemorySink, SessionStore, VigilConfig};
use vigil_daemon::{offline_gateway, router, DaemonState};

#[derive(Debug, World)]
#[world(init = Self::new)]
struct DaemonWorld {
    owners: HashMap<String, Uuid>,
    gateway: Option<MemoryGateway>,
    state: Option<Arc<DaemonState>>,
    status: Option<StatusCode>,
    body: Value,
}

impl DaemonWorld {
    fn new() -> Self {
        Self {
            owners: HashMap::new(),
            gateway: None,
            state: None,
            status: None,
            body: Value::Null,
        }
    }

    fn state(&self) -> Arc<DaemonState> {
        self.state.clone().expect("daemon not started")
    }

    async fn send(&mut self, method: Method, uri: &str, body: Option<String>) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(raw) => {
                request = request.header("content-type", "application/json");
                Body::from(raw)
            }
            None => Body::empty(),
        };
        let response = router(self.state())
            .oneshot(request.body(body).expect("valid request"))
            .await
            .expect("infallible router");

        self.status = Some(response.status());
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        self.body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    }
}

#[given(expr = "a daemon backed by an in-memory store for owner {string}")]
async fn given_daemon(world: &mut DaemonWorld, name: String) {
    let owner = *world.owners.entry(name).or_insert_with(Uuid::new_v4);
    let config = VigilConfig::default();
    let gateway = offline_gateway(&config, None).expect("offline gateway");
    let recent = MemorySink::default();

    let sync = AgentSync::new(
        config,
        Arc::new(gateway.clone()),
        Arc::new(SessionStore::signed_in(Identity::new(owner))),
        Arc::new(recent.clone()),
    )
    .expect("valid config");

    world.gateway = Some(gateway);
    world.state = Some(Arc::new(DaemonState::new(Arc::new(sync), recent)));
}

#[given(expr = "the store holds a {string} log from {string}")]
async fn given_log(world: &mut DaemonWorld, level: String, agent: String) {
    let owner = *world.owners.values().next().expect("no owner");
    let gateway = world.gateway.as_ref().expect("daemon not started");
    gateway.insert(
        "agent_logs",
        json!({
            "id": Uuid::new_v4(),
            "agent_name": agent,
            "user_id": owner,
            "log_level": level,
            "message": "scan complete",
            "timestamp": "2025-03-01T10:00:00Z",
            "created_at": "2025-03-01T10:00:00Z"
        }),
    );
}

#[given("the daemon has fetched its feeds")]
async fn given_fetched(world: &mut DaemonWorld) {
    let state = world.state();
    for _ in 0..200 {
        // Skipped while the startup fetch is still running.
        state.logs.refresh();
        let snapshot = state.logs.snapshot();
        if snapshot.data().is_some_and(|rows| !rows.is_empty()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("logs were never fetched");
}

#[when(expr = "I GET {string}")]
async fn when_get(world: &mut DaemonWorld, uri: String) {
    world.send(Method::GET, &uri, None).await;
}

#[when(expr = "I POST {string}")]
async fn when_post(world: &mut DaemonWorld, uri: String) {
    world.send(Method::POST, &uri, None).await;
}

#[when(regex = r#"^I PUT "([^"]*)" with body '(.*)'$"#)]
async fn when_put(world: &mut DaemonWorld, uri: String, body: String) {
    world.send(Method::PUT, &uri, Some(body)).await;
}

#[then(expr = "the response status should be {int}")]
async fn then_status(world: &mut DaemonWorld, expected: u16) {
    assert_eq!(world.status.map(|s| s.as_u16()), Some(expected));
}

#[then(expr = "the response field {string} should be {string}")]
async fn then_field(world: &mut DaemonWorld, field: String, expected: String) {
    assert_eq!(world.body[&field].as_str(), Some(expected.as_str()));
}

#[then(expr = "the response should list {int} entries")]
async fn then_entries(world: &mut DaemonWorld, expected: usize) {
    let rows = world.body["data"].as_array().expect("data is a list");
    assert_eq!(rows.len(), expected);
}

#[then(expr = "the first entry field {string} should be {string}")]
async fn then_first_entry(world: &mut DaemonWorld, field: String, expected: String) {
    assert_eq!(world.body["data"][0][&field].as_str(), Some(expected.as_str()));
}

#[then(expr = "the scheduler should track {string}")]
async fn then_tracks(world: &mut DaemonWorld, key: String) {
    let keys = world.state().sync.scheduler().keys();
    assert!(keys.contains(&key), "{key} not in {keys:?}");
}

#[then(expr = "the response should contain {int} notifications")]
async fn then_notifications(world: &mut DaemonWorld, expected: usize) {
    let list = world.body["notifications"].as_array().expect("notification list");
    assert_eq!(list.len(), expected);
}

#[tokio::main]
async fn main() {
    DaemonWorld::cucumber().run_and_exit("tests/features").await;
}
