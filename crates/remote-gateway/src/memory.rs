//! In-process record store with scripted faults
//!
//! Evaluates filters, ordering and limits the same way the REST backend does,
//! serves registered procedures, and can be told to fail, slow down or count
//! calls per collection/procedure.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use vigil_core::{Record, RecordQuery, RemoteGateway, Result, SyncError};

pub type ProcedureHandler = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// A failure the gateway will report instead of serving a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    Transport(String),
    Backend {
        code: Option<String>,
        message: String,
    },
}

impl Fault {
    pub fn backend(code: &str, message: &str) -> Self {
        Fault::Backend {
            code: Some(code.to_string()),
            message: message.to_string(),
        }
    }

    fn to_error(&self) -> SyncError {
        match self {
            Fault::Transport(reason) => SyncError::transport(reason.clone()),
            Fault::Backend { code, message } => SyncError::Backend {
                code: code.clone(),
                message: message.clone(),
            },
        }
    }
}

#[derive(Debug, Default)]
struct CallCounter {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight(Arc<CallCounter>);

impl InFlight {
    fn enter(counter: Arc<CallCounter>) -> Self {
        counter.calls.fetch_add(1, AtomicOrdering::SeqCst);
        let now = counter.in_flight.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        counter.max_in_flight.fetch_max(now, AtomicOrdering::SeqCst);
        InFlight(counter)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, AtomicOrdering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub struct MemoryGateway {
    collections: Arc<DashMap<String, Vec<Record>>>,
    procedures: Arc<DashMap<String, ProcedureHandler>>,
    faults: Arc<DashMap<String, VecDeque<Fault>>>,
    counters: Arc<DashMap<String, Arc<CallCounter>>>,
    latency: Arc<RwLock<Duration>>,
}

impl std::fmt::Debug for MemoryGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGateway")
            .field("collections", &self.collections.len())
            .field("procedures", &self.procedures.len())
            .field("latency", &*self.latency.read())
            .finish()
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from `{ "collection": [records...], ... }`.
    pub fn from_seed(seed: &Value) -> Result<Self> {
        let gateway = Self::new();
        let Some(collections) = seed.as_object() else {
            return Err(SyncError::Config {
                reason: "seed must be an object of collection arrays".to_string(),
            });
        };
        for (name, rows) in collections {
            let rows = rows.as_array().ok_or_else(|| SyncError::Config {
                reason: format!("seed collection '{name}' is not an array"),
            })?;
            gateway.extend(name, rows.iter().cloned());
        }
        Ok(gateway)
    }

    pub fn insert(&self, collection: &str, record: Record) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(record);
    }

    pub fn extend(&self, collection: &str, records: impl IntoIterator<Item = Record>) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .extend(records);
    }

    pub fn clear(&self, collection: &str) {
        self.collections.remove(collection);
    }

    pub fn register_procedure<F>(&self, name: &str, handler: F)
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.procedures.insert(name.to_string(), Arc::new(handler));
    }

    /// Makes the next `times` calls to `target` (collection or procedure) fail.
    pub fn fail_next(&self, target: &str, times: usize, fault: Fault) {
        let mut queue = self.faults.entry(target.to_string()).or_default();
        queue.extend(std::iter::repeat(fault).take(times));
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    pub fn calls(&self, target: &str) -> usize {
        self.counters
            .get(target)
            .map(|c| c.calls.load(AtomicOrdering::SeqCst))
            .unwrap_or(0)
    }

    pub fn in_flight(&self, target: &str) -> usize {
        self.counters
            .get(target)
            .map(|c| c.in_flight.load(AtomicOrdering::SeqCst))
            .unwrap_or(0)
    }

    /// Highest number of concurrent calls ever observed for `target`.
    pub fn max_in_flight(&self, target: &str) -> usize {
        self.counters
            .get(target)
            .map(|c| c.max_in_flight.load(AtomicOrdering::SeqCst))
            .unwrap_or(0)
    }

    fn counter(&self, target: &str) -> Arc<CallCounter> {
        self.counters
            .entry(target.to_string())
            .or_default()
            .value()
            .clone()
    }

    async fn begin(&self, target: &str) -> Result<InFlight> {
        let guard = InFlight::enter(self.counter(target));

        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let fault = self
            .faults
            .get_mut(target)
            .and_then(|mut queue| queue.pop_front());
        match fault {
            Some(fault) => {
                debug!(call = target, ?fault, "injecting fault");
                Err(fault.to_error())
            }
            None => Ok(guard),
        }
    }
}

fn compare_json(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.total_cmp(&y)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        // Nulls sort after values ascending, as in Postgres.
        (None | Some(Value::Null), _) => Ordering::Greater,
        (_, None | Some(Value::Null)) => Ordering::Less,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    #[instrument(skip(self, query), fields(collection = %query.collection))]
    async fn query(&self, query: &RecordQuery) -> Result<Vec<Record>> {
        let _call = self.begin(&query.collection).await?;

        let mut rows: Vec<Record> = self
            .collections
            .get(&query.collection)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters.iter().all(|f| f.matches(row)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare_json(a.get(&order.column), b.get(&order.column));
                if order.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    #[instrument(skip(self, body))]
    async fn invoke(&self, procedure: &str, body: Value) -> Result<Value> {
        let _call = self.begin(procedure).await?;

        let handler = self
            .procedures
            .get(procedure)
            .map(|h| h.value().clone())
            .ok_or_else(|| SyncError::backend(Some("404"), format!("procedure {procedure} not found")))?;
        handler(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vigil_core::Filter;

    fn seeded() -> MemoryGateway {
        MemoryGateway::from_seed(&json!({
            "agent_logs": [
                {"id": 1, "user_id": "u1", "agent_name": "A", "timestamp": "2025-01-01T00:00:01Z"},
                {"id": 2, "user_id": "u1", "agent_name": "B", "timestamp": "2025-01-01T00:00:03Z"},
                {"id": 3, "user_id": "u2", "agent_name": "A", "timestamp": "2025-01-01T00:00:02Z"},
                {"id": 4, "user_id": "u1", "agent_name": "A", "timestamp": "2025-01-01T00:00:02Z"}
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn filters_orders_and_limits() {
        let gateway = seeded();
        let query = RecordQuery::new("agent_logs")
            .filter(Filter::eq("user_id", "u1"))
            .order_desc("timestamp")
            .limit(Some(2));

        let rows = gateway.query(&query).await.unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![2, 4]);
        assert_eq!(gateway.calls("agent_logs"), 1);
    }

    #[test]
    fn unknown_collection_is_empty_not_an_error() {
        let gateway = MemoryGateway::new();
        let rows = tokio_test::block_on(gateway.query(&RecordQuery::new("agent_messages"))).unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn scripted_faults_are_consumed_in_order() {
        let gateway = seeded();
        gateway.fail_next("agent_logs", 2, Fault::Transport("connection reset".into()));

        let query = RecordQuery::new("agent_logs");
        assert!(matches!(gateway.query(&query).await, Err(SyncError::Transport { .. })));
        assert!(matches!(gateway.query(&query).await, Err(SyncError::Transport { .. })));
        assert_eq!(gateway.query(&query).await.unwrap().len(), 4);
        assert_eq!(gateway.calls("agent_logs"), 3);
    }

    #[tokio::test]
    async fn procedures_receive_body_and_unknown_ones_fail() {
        let gateway = MemoryGateway::new();
        gateway.register_procedure("echo", |body| Ok(json!({"echo": body.clone()})));

        let reply = gateway.invoke("echo", json!({"symbol": "BTCUSDT"})).await.unwrap();
        assert_eq!(reply["echo"]["symbol"], "BTCUSDT");

        let missing = gateway.invoke("nope", Value::Null).await;
        assert!(matches!(missing, Err(SyncError::Backend { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn tracks_concurrent_calls() {
        let gateway = seeded();
        gateway.set_latency(Duration::from_secs(1));

        let query = RecordQuery::new("agent_logs");
        let (a, b) = tokio::join!(gateway.query(&query), gateway.query(&query));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(gateway.max_in_flight("agent_logs"), 2);
        assert_eq!(gateway.in_flight("agent_logs"), 0);
    }

    #[test]
    fn seed_must_be_an_object_of_arrays() {
        assert!(MemoryGateway::from_seed(&json!([1, 2])).is_err());
        assert!(MemoryGateway::from_seed(&json!({"agent_logs": {}})).is_err());
    }
}
