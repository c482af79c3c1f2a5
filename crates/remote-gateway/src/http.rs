//! REST record store + function invocation over HTTP
//!
//! Queries are rendered in PostgREST syntax against `{base}/rest/v1/{collection}`;
//! procedures are invoked with `POST {base}/functions/v1/{name}`.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{RequestBuilder, Response};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};
use vigil_core::{Filter, GatewayConfig, Record, RecordQuery, RemoteGateway, Result, SyncError};

#[derive(Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    access_token: Arc<RwLock<Option<String>>>,
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .field("has_access_token", &self.access_token.read().is_some())
            .finish()
    }
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SyncError::Config {
                reason: format!("cannot build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Bearer token of the signed-in user; falls back to the api key when unset.
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write() = token;
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let mut request = request;
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }
        let bearer = self
            .access_token
            .read()
            .clone()
            .or_else(|| self.api_key.clone());
        match bearer {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// PostgREST query string for a [`RecordQuery`].
pub fn query_params(query: &RecordQuery) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];

    for filter in &query.filters {
        match filter {
            Filter::Eq { column, value } => params.push((column.clone(), format!("eq.{value}"))),
            Filter::Any(inner) => params.push(("or".to_string(), format!("({})", or_terms(inner)))),
        }
    }
    if let Some(order) = &query.order {
        let direction = if order.descending { "desc" } else { "asc" };
        params.push(("order".to_string(), format!("{}.{direction}", order.column)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

fn or_terms(filters: &[Filter]) -> String {
    filters
        .iter()
        .map(|f| match f {
            Filter::Eq { column, value } => format!("{column}.eq.{value}"),
            Filter::Any(inner) => format!("or({})", or_terms(inner)),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Maps a non-success reply to a backend fault, picking the provider's
/// `code` and `message`/`msg`/`error` fields when the body is JSON.
async fn backend_fault(response: Response) -> SyncError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();

    let Ok(body) = serde_json::from_str::<Value>(&text) else {
        let message = if text.trim().is_empty() {
            status.to_string()
        } else {
            text
        };
        return SyncError::backend(Some(status.as_u16().to_string()), message);
    };

    let code = match body.get("code") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => Some(status.as_u16().to_string()),
    };
    let message = ["message", "msg", "error", "error_description"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());

    SyncError::Backend { code, message }
}

fn transport(err: reqwest::Error) -> SyncError {
    SyncError::transport(err.to_string())
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    #[instrument(skip(self, query), fields(collection = %query.collection))]
    async fn query(&self, query: &RecordQuery) -> Result<Vec<Record>> {
        let url = format!("{}/rest/v1/{}", self.base_url, query.collection);
        let request = self.client.get(url).query(&query_params(query));

        let response = self.authorize(request).send().await.map_err(transport)?;
        if !response.status().is_success() {
            return Err(backend_fault(response).await);
        }

        let rows: Vec<Record> = response.json().await.map_err(transport)?;
        debug!(rows = rows.len(), "query returned");
        Ok(rows)
    }

    #[instrument(skip(self, body))]
    async fn invoke(&self, procedure: &str, body: Value) -> Result<Value> {
        let url = format!("{}/functions/v1/{procedure}", self.base_url);
        let request = self.client.post(url).json(&body);

        let response = self.authorize(request).send().await.map_err(transport)?;
        if !response.status().is_success() {
            return Err(backend_fault(response).await);
        }

        let text = response.text().await.map_err(transport)?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_filters_order_and_limit() {
        let query = RecordQuery::new("agent_messages")
            .filter(Filter::eq("user_id", "u1"))
            .filter(Filter::Any(vec![
                Filter::eq("sender_agent", "QA.WATCHDOG"),
                Filter::eq("receiver_agent", "QA.WATCHDOG"),
            ]))
            .order_desc("created_at")
            .limit(Some(100));

        let params = query_params(&query);
        assert_eq!(
            params,
            vec![
                ("select".to_string(), "*".to_string()),
                ("user_id".to_string(), "eq.u1".to_string()),
                (
                    "or".to_string(),
                    "(sender_agent.eq.QA.WATCHDOG,receiver_agent.eq.QA.WATCHDOG)".to_string()
                ),
                ("order".to_string(), "created_at.desc".to_string()),
                ("limit".to_string(), "100".to_string()),
            ]
        );
    }

    #[test]
    fn unbounded_query_has_no_limit() {
        let params = query_params(&RecordQuery::new("agent_state").order_desc("updated_at"));
        assert!(params.iter().all(|(k, _)| k != "limit"));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let gateway = HttpGateway::new(&GatewayConfig {
            base_url: "http://backend.local/".into(),
            api_key: Some("anon".into()),
            timeout_ms: 1_000,
        })
        .unwrap();
        assert_eq!(gateway.base_url, "http://backend.local");
    }
}
