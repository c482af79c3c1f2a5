//! Fire-and-forget batch job trigger
//!
//! `Idle -> Triggering -> Idle`. A second request while one is outstanding is
//! rejected locally and never reaches the backend.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use vigil_core::{
    Notification, NotificationLevel, NotificationSink, RemoteGateway, Result, SyncError,
};

const START_TITLE: &str = "Starting market data collection";
const SUCCESS_TITLE: &str = "Market data collection started";
const FAILURE_TITLE: &str = "Market data collection failed";
const FAILURE_FALLBACK: &str = "Failed to start market data collection";

struct Triggering<'a>(&'a AtomicBool);

impl Drop for Triggering<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct BatchTrigger {
    gateway: Arc<dyn RemoteGateway>,
    sink: Arc<dyn NotificationSink>,
    procedure: String,
    in_flight: AtomicBool,
    invocations: AtomicU64,
}

impl std::fmt::Debug for BatchTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchTrigger")
            .field("procedure", &self.procedure)
            .field("triggering", &self.is_triggering())
            .field("invocations", &self.invocations())
            .finish()
    }
}

impl BatchTrigger {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        sink: Arc<dyn NotificationSink>,
        procedure: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            sink,
            procedure: procedure.into(),
            in_flight: AtomicBool::new(false),
            invocations: AtomicU64::new(0),
        }
    }

    pub fn is_triggering(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Calls that actually reached the gateway.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    #[instrument(skip(self), fields(procedure = %self.procedure))]
    pub async fn trigger(&self) -> Result<Value> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("trigger already in flight, rejecting");
            return Err(SyncError::CommandRejected {
                command: self.procedure.clone(),
            });
        }
        let _reset = Triggering(&self.in_flight);

        self.sink
            .notify(Notification::new(NotificationLevel::Info, START_TITLE));
        self.invocations.fetch_add(1, Ordering::Relaxed);

        match self.gateway.invoke(&self.procedure, json!({})).await {
            Ok(result) => {
                info!("batch job started");
                self.sink.notify(
                    Notification::new(NotificationLevel::Success, SUCCESS_TITLE)
                        .with_description(describe(&result)),
                );
                Ok(result)
            }
            Err(error) => {
                warn!(%error, "batch job trigger failed");
                self.sink.notify(
                    Notification::new(NotificationLevel::Error, FAILURE_TITLE)
                        .with_description(failure_message(&error)),
                );
                Err(error)
            }
        }
    }
}

fn describe(result: &Value) -> String {
    match result.get("message").and_then(Value::as_str) {
        Some(message) => message.to_string(),
        None => "Job accepted".to_string(),
    }
}

fn failure_message(error: &SyncError) -> String {
    let message = match error {
        SyncError::Backend { message, .. } => message.clone(),
        SyncError::Transport { reason } => reason.clone(),
        other => other.to_string(),
    };
    if message.trim().is_empty() {
        FAILURE_FALLBACK.to_string()
    } else {
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;
    use vigil_core::{MemorySink, Record, RecordQuery};

    struct JobBackend {
        reply: Mutex<Option<Result<Value>>>,
        hold: Duration,
        calls: AtomicU64,
    }

    impl JobBackend {
        fn new(reply: Result<Value>, hold: Duration) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(Some(reply)),
                hold,
                calls: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl RemoteGateway for JobBackend {
        async fn query(&self, _: &RecordQuery) -> Result<Vec<Record>> {
            Ok(vec![])
        }

        async fn invoke(&self, _: &str, _: Value) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.hold).await;
            self.reply.lock().take().unwrap_or(Ok(Value::Null))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn back_to_back_triggers_invoke_once() {
        let backend = JobBackend::new(Ok(json!({"message": "queued"})), Duration::from_millis(50));
        let sink = Arc::new(MemorySink::default());
        let trigger = BatchTrigger::new(backend.clone(), sink.clone(), "mkt-data-scheduler");

        let (first, second) = tokio::join!(trigger.trigger(), trigger.trigger());

        assert!(first.is_ok());
        assert!(matches!(second, Err(SyncError::CommandRejected { .. })));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(trigger.invocations(), 1);
        assert_eq!(sink.count(NotificationLevel::Info), 1);
        assert_eq!(sink.count(NotificationLevel::Success), 1);
        assert!(!trigger.is_triggering());
    }

    #[tokio::test]
    async fn failure_notifies_with_backend_message() {
        let backend = JobBackend::new(
            Err(SyncError::backend(Some("500"), "scheduler offline")),
            Duration::ZERO,
        );
        let sink = Arc::new(MemorySink::default());
        let trigger = BatchTrigger::new(backend, sink.clone(), "mkt-data-scheduler");

        assert!(trigger.trigger().await.is_err());

        let recent = sink.recent();
        let last = recent.last().unwrap();
        assert_eq!(last.level, NotificationLevel::Error);
        assert_eq!(last.description.as_deref(), Some("scheduler offline"));
        assert!(!trigger.is_triggering());
    }

    #[test]
    fn empty_failure_message_falls_back() {
        let error = SyncError::backend(None::<String>, " ");
        assert_eq!(failure_message(&error), FAILURE_FALLBACK);
    }
}
