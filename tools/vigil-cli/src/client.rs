//! Thin HTTP client for the daemon routes

use anyhow::{bail, Context, Result};
use reqwest::{Method, Response};
use serde_json::{json, Value};
use std::time::Duration;
use vigil_core::endpoints;

#[derive(Debug, Clone)]
pub struct DaemonClient {
    http: reqwest::Client,
    base_url: String,
}

impl DaemonClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value> {
        let mut request = self.http.request(method, self.url(path)).query(query);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("daemon unreachable at {}", self.base_url))?;
        decode(response).await
    }

    pub async fn logs(&self, agent: Option<&str>, severity: Option<&str>) -> Result<Value> {
        let mut query = Vec::new();
        if let Some(agent) = agent {
            query.push(("agent", agent));
        }
        if let Some(severity) = severity {
            query.push(("severity", severity));
        }
        self.send(Method::GET, endpoints::API_V1_LOGS, &query, None).await
    }

    pub async fn messages(&self, agent: Option<&str>) -> Result<Value> {
        let query: Vec<_> = agent.map(|a| ("agent", a)).into_iter().collect();
        self.send(Method::GET, endpoints::API_V1_MESSAGES, &query, None)
            .await
    }

    pub async fn states(&self) -> Result<Value> {
        self.send(Method::GET, endpoints::API_V1_STATES, &[], None).await
    }

    /// Selects `symbol` and waits up to `wait` for its first fetch to settle.
    pub async fn depth(&self, symbol: &str, wait: Duration) -> Result<Value> {
        let mut view = self
            .send(
                Method::PUT,
                endpoints::API_V1_MARKET_DEPTH,
                &[],
                Some(json!({ "symbol": symbol })),
            )
            .await?;

        let deadline = tokio::time::Instant::now() + wait;
        while !settled(&view) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(200)).await;
            view = self
                .send(Method::GET, endpoints::API_V1_MARKET_DEPTH, &[], None)
                .await?;
        }
        Ok(view)
    }

    pub async fn trigger(&self) -> Result<Value> {
        self.send(Method::POST, endpoints::API_V1_MARKET_DATA_JOB, &[], None)
            .await
    }

    pub async fn health(&self) -> Result<Value> {
        self.send(Method::GET, endpoints::HEALTH, &[], None).await
    }

    pub async fn metrics(&self) -> Result<Value> {
        self.send(Method::GET, endpoints::METRICS, &[], None).await
    }
}

fn settled(view: &Value) -> bool {
    let snapshot = &view["snapshot"];
    !snapshot["last_updated"].is_null() || !snapshot["error"].is_null()
}

async fn decode(response: Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if status.is_success() {
        return Ok(body);
    }
    match body["error"].as_str() {
        Some(message) => bail!("daemon answered {status}: {message}"),
        None => bail!("daemon answered {status}"),
    }
}
