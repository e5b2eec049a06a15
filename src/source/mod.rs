//! Metric data sources
//!
//! A source resolves an alert expression plus an anchor timestamp into series.
//! Relative time tokens in the expression are resolved against the anchor.

use std::time::Duration;

use async_trait::async_trait;

use crate::data::Series;

pub mod http;
pub mod memory;
pub mod window;

pub use http::HttpMetricSource;
pub use memory::InMemoryMetricSource;
pub use window::QueryWindow;

#[async_trait]
pub trait MetricDataSource: Send + Sync {
    async fn query(&self, expression: &str, anchor_ms: i64) -> Result<Vec<Series>, SourceError>;
}

/// Run a query bounded by `timeout`
pub async fn query_with_timeout(
    source: &dyn MetricDataSource,
    expression: &str,
    anchor_ms: i64,
    timeout: Duration,
) -> Result<Vec<Series>, SourceError> {
    match tokio::time::timeout(timeout, source.query(expression, anchor_ms)).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout(timeout.as_millis() as u64)),
    }
}

/// Metric source errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("Metric query timed out after {0}ms")]
    Timeout(u64),

    #[error("Invalid expression: {0}")]
    Expression(String),

    /// The backing store has no data for part of the expression
    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Metric query failed: {0}")]
    Query(String),
}

impl SourceError {
    pub fn is_missing_data(&self) -> bool {
        matches!(self, SourceError::MissingData(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stalled;

    #[async_trait]
    impl MetricDataSource for Stalled {
        async fn query(&self, _: &str, _: i64) -> Result<Vec<Series>, SourceError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_query_timeout() {
        let result = query_with_timeout(&Stalled, "-1h:s:m", 0, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(SourceError::Timeout(20))));
    }
}
