//! Remote data gateway contract
//!
//! A gateway fronts one authenticated backend: record queries over named
//! collections and invocable remote procedures. Classification of failures
//! is not the gateway's job; it reports raw `Transport` / `Backend` errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Raw record as returned by the record store.
pub type Record = Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Filter {
    /// `column == value`
    Eq { column: String, value: String },
    /// Matches when any inner filter matches.
    Any(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Filter::Eq {
            column: column.into(),
            value: value.to_string(),
        }
    }

    /// Checks a JSON record; strings compare verbatim, other scalars by
    /// their JSON rendering.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::Eq { column, value } => match record.get(column) {
                Some(Value::String(s)) => s == value,
                Some(Value::Null) | None => false,
                Some(other) => other.to_string() == *value,
            },
            Filter::Any(filters) => filters.iter().any(|f| f.matches(record)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordQuery {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl RecordQuery {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_desc(mut self, column: impl Into<String>) -> Self {
        self.order = Some(Order {
            column: column.into(),
            descending: true,
        });
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }
}

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn query(&self, query: &RecordQuery) -> Result<Vec<Record>>;

    async fn invoke(&self, procedure: &str, body: Value) -> Result<Value>;
}
