//! Notification sink for user-facing progress messages

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub emitted_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(level: NotificationLevel, title: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            description: None,
            emitted_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Fire-and-forget consumer of notifications.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, n: Notification) {
        let description = n.description.as_deref().unwrap_or("");
        match n.level {
            NotificationLevel::Error => error!(title = %n.title, %description, "notification"),
            _ => info!(level = ?n.level, title = %n.title, %description, "notification"),
        }
    }
}

/// Keeps the most recent notifications in memory, oldest first.
#[derive(Debug, Clone)]
pub struct MemorySink {
    capacity: usize,
    entries: Arc<Mutex<VecDeque<Notification>>>,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn recent(&self) -> Vec<Notification> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn count(&self, level: NotificationLevel) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|n| n.level == level)
            .count()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(100)
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, notification: Notification) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(notification);
    }
}

/// Sends every notification to each inner sink in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl NotificationSink for FanoutSink {
    fn notify(&self, notification: Notification) {
        for sink in &self.sinks {
            sink.notify(notification.clone());
        }
    }
}
