//! Prometheus HTTP API client.
//!
//! One client instance per run, one request per (entity, metric) pair. There
//! are no retries anywhere: the experiment windows are timing-sensitive, so a
//! slow silent retry loop is worse than a fast visible failure.

pub mod promql;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::error::ExportError;

/// One `[timestamp, raw-value]` pair as returned by the backend. The
/// timestamp is a JSON number; the value arrives as a JSON string (or null
/// from some proxies), so it is kept raw until the normalizer parses it.
#[derive(Debug, Clone, Deserialize)]
pub struct Sample(pub f64, pub serde_json::Value);

/// One labeled series from a range or instant query.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSeries {
    #[serde(default)]
    pub metric: HashMap<String, String>,

    /// Range query ("matrix") samples.
    #[serde(default)]
    pub values: Vec<Sample>,

    /// Instant query ("vector") sample.
    #[serde(default)]
    pub value: Option<Sample>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,

    #[serde(default)]
    error: Option<String>,

    #[serde(default)]
    data: Option<ApiData>,
}

#[derive(Debug, Deserialize)]
struct ApiData {
    #[serde(default)]
    result: Vec<RawSeries>,
}

/// HTTP client for the Prometheus query API.
pub struct PromClient {
    http: reqwest::Client,
    base: String,
}

impl PromClient {
    /// Create a client with a fixed per-request timeout ceiling.
    pub fn new(base: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    /// Execute a range query over `[start, end]` at `step` spacing.
    pub async fn query_range(
        &self,
        expr: &str,
        start: &str,
        end: &str,
        step: &str,
    ) -> Result<Vec<RawSeries>, ExportError> {
        debug!(query = %expr, start, end, step, "range query");

        let params = [
            ("query", expr),
            ("start", start),
            ("end", end),
            ("step", step),
        ];
        self.get("/api/v1/query_range", &params, expr).await
    }

    /// Execute an instant query, used for node discovery.
    pub async fn query_instant(&self, expr: &str) -> Result<Vec<RawSeries>, ExportError> {
        debug!(query = %expr, "instant query");

        self.get("/api/v1/query", &[("query", expr)], expr).await
    }

    async fn get(
        &self,
        path: &str,
        params: &[(&str, &str)],
        expr: &str,
    ) -> Result<Vec<RawSeries>, ExportError> {
        let url = format!("{}{}", self.base, path);

        let response = self
            .http
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| ExportError::backend(expr, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExportError::backend(
                expr,
                format!("unexpected status {status}: {body}"),
            ));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| ExportError::backend(expr, format!("decoding response: {e}")))?;

        if parsed.status != "success" {
            let detail = parsed.error.unwrap_or(parsed.status);
            return Err(ExportError::backend(expr, detail));
        }

        Ok(parsed.data.map(|d| d.result).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_matrix_response() {
        let raw = json!({
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [
                    {
                        "metric": {"pod": "carts-7d4f5"},
                        "values": [[1700000000, "1.5"], [1700000015.5, "2.0"]]
                    },
                    {
                        "metric": {"pod": "carts-9k2m1"},
                        "values": [[1700000000, "NaN"]]
                    }
                ]
            }
        });

        let parsed: ApiResponse = serde_json::from_value(raw).expect("valid response");
        assert_eq!(parsed.status, "success");

        let result = parsed.data.expect("data present").result;
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].metric["pod"], "carts-7d4f5");
        assert_eq!(result[0].values.len(), 2);
        assert_eq!(result[0].values[1].0, 1700000015.5);
        assert_eq!(result[1].values[0].1, json!("NaN"));
    }

    #[test]
    fn test_parse_instant_vector_response() {
        let raw = json!({
            "status": "success",
            "data": {
                "resultType": "vector",
                "result": [
                    {"metric": {"instance": "10.0.0.5:9100"}, "value": [1700000000, "1"]}
                ]
            }
        });

        let parsed: ApiResponse = serde_json::from_value(raw).expect("valid response");
        let result = parsed.data.expect("data present").result;
        assert_eq!(result.len(), 1);
        assert!(result[0].values.is_empty());
        let value = result[0].value.as_ref().expect("instant sample");
        assert_eq!(value.0, 1700000000.0);
    }

    #[test]
    fn test_parse_error_response() {
        let raw = json!({
            "status": "error",
            "errorType": "bad_data",
            "error": "invalid parameter"
        });

        let parsed: ApiResponse = serde_json::from_value(raw).expect("valid response");
        assert_eq!(parsed.status, "error");
        assert_eq!(parsed.error.as_deref(), Some("invalid parameter"));
    }

    #[test]
    fn test_parse_empty_result() {
        let raw = json!({
            "status": "success",
            "data": {"resultType": "matrix", "result": []}
        });

        let parsed: ApiResponse = serde_json::from_value(raw).expect("valid response");
        assert!(parsed.data.expect("data present").result.is_empty());
    }
}
