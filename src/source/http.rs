//! Remote metric source over HTTP
//!
//! POSTs `{"expression": ..., "anchor_ms": ...}` to `{base_url}/query` and
//! expects a JSON array of series back. A `404` is reported as missing data.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{MetricDataSource, SourceError};
use crate::data::Series;

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoteQueryRequest {
    pub expression: String,
    pub anchor_ms: i64,
}

#[derive(Debug, Clone)]
pub struct HttpMetricSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMetricSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Query(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn query_url(&self) -> String {
        format!("{}/query", self.base_url)
    }
}

#[async_trait]
impl MetricDataSource for HttpMetricSource {
    async fn query(&self, expression: &str, anchor_ms: i64) -> Result<Vec<Series>, SourceError> {
        let request = RemoteQueryRequest {
            expression: expression.to_string(),
            anchor_ms,
        };

        let response = self
            .client
            .post(self.query_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::Timeout(0)
                } else {
                    SourceError::Query(format!("Failed to reach metric source: {}", e))
                }
            })?;

        match response.status() {
            status if status.is_success() => response
                .json::<Vec<Series>>()
                .await
                .map_err(|e| SourceError::Query(format!("Invalid response body: {}", e))),
            StatusCode::NOT_FOUND => Err(SourceError::MissingData(expression.to_string())),
            StatusCode::BAD_REQUEST => Err(SourceError::Expression(
                response.text().await.unwrap_or_default(),
            )),
            status => Err(SourceError::Query(format!(
                "Metric source returned status {}",
                status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_url() {
        let source = HttpMetricSource::new("http://tsdb:4242/", Duration::from_secs(1)).unwrap();
        assert_eq!(source.query_url(), "http://tsdb:4242/query");
    }

    #[tokio::test]
    async fn test_unreachable_source_is_query_error() {
        let source = HttpMetricSource::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = source.query("-1h:s:m", 0).await.unwrap_err();
        assert!(matches!(err, SourceError::Query(_) | SourceError::Timeout(_)));
    }
}
