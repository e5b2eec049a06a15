//! In-process metric source
//!
//! Understands single-selector expressions of the form
//! `<start>[:<end>]:<scope>:<metric>[{tag=value,...}][:<aggregator>]`.
//! A tag value of `*` matches any value. Datapoints outside the resolved
//! window are dropped.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::window::{parse_offset, QueryWindow};
use super::{MetricDataSource, SourceError};
use crate::data::Series;

#[derive(Debug, Clone, PartialEq)]
struct Selector {
    scope: String,
    metric: String,
    tags: BTreeMap<String, String>,
}

impl Selector {
    fn parse(expression: &str) -> Result<Self, SourceError> {
        if expression.contains('(') {
            return Err(SourceError::Expression(format!(
                "functions are not supported by the in-memory source: {}",
                expression
            )));
        }

        let (head, tags) = match expression.find('{') {
            Some(open) => {
                let close = expression[open..]
                    .find('}')
                    .map(|i| open + i)
                    .ok_or_else(|| SourceError::Expression("unclosed tag block".to_string()))?;
                let tags = parse_tags(&expression[open + 1..close])?;
                (format!("{}{}", &expression[..open], &expression[close + 1..]), tags)
            }
            None => (expression.to_string(), BTreeMap::new()),
        };

        let mut parts: Vec<&str> = Vec::new();
        for part in head.split(':').map(str::trim).filter(|p| !p.is_empty()) {
            if !is_relative_token(part) {
                parts.push(part);
            } else if parse_offset(part).is_none() {
                return Err(SourceError::Expression(format!(
                    "invalid relative time '{}' in '{}'",
                    part, expression
                )));
            }
        }

        match parts.as_slice() {
            [scope, metric] | [scope, metric, _] => Ok(Self {
                scope: scope.to_string(),
                metric: metric.to_string(),
                tags,
            }),
            _ => Err(SourceError::Expression(format!(
                "expected scope:metric in '{}'",
                expression
            ))),
        }
    }

    fn matches(&self, series: &Series) -> bool {
        series.scope == self.scope
            && series.metric == self.metric
            && self.tags.iter().all(|(k, v)| {
                series
                    .tags
                    .get(k)
                    .map(|actual| v == "*" || actual == v)
                    .unwrap_or(false)
            })
    }
}

fn is_relative_token(part: &str) -> bool {
    part.strip_prefix('-')
        .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
}

fn parse_tags(block: &str) -> Result<BTreeMap<String, String>, SourceError> {
    block
        .split(',')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| SourceError::Expression(format!("bad tag '{}'", pair)))
        })
        .collect()
}

/// Metric source backed by series pushed into memory
#[derive(Default)]
pub struct InMemoryMetricSource {
    series: RwLock<Vec<Series>>,
    latency: RwLock<Option<Duration>>,
    failure: RwLock<Option<SourceError>>,
}

impl InMemoryMetricSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge datapoints into the series with the same identity
    pub fn push(&self, series: Series) {
        let mut all = self.series.write();
        match all.iter_mut().find(|s| s.identity() == series.identity()) {
            Some(existing) => existing.datapoints.extend(series.datapoints),
            None => all.push(series),
        }
    }

    pub fn clear(&self) {
        self.series.write().clear();
    }

    /// Delay every query, for timeout tests
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    /// Fail every query with `error` until cleared
    pub fn set_failure(&self, error: Option<SourceError>) {
        *self.failure.write() = error;
    }
}

#[async_trait]
impl MetricDataSource for InMemoryMetricSource {
    async fn query(&self, expression: &str, anchor_ms: i64) -> Result<Vec<Series>, SourceError> {
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = self.failure.read().clone() {
            return Err(error);
        }

        let selector = Selector::parse(expression)?;
        let window = QueryWindow::from_expression(expression, anchor_ms);

        let all = self.series.read();
        Ok(all
            .iter()
            .filter(|s| selector.matches(s))
            .map(|s| Series {
                scope: s.scope.clone(),
                metric: s.metric.clone(),
                tags: s.tags.clone(),
                datapoints: s
                    .datapoints
                    .range(window.start_ms..=window.end_ms)
                    .map(|(ts, v)| (*ts, *v))
                    .collect(),
            })
            .filter(|s| !s.is_empty())
            .collect())
    }
}
