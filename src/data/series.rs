//! Metric series returned by a metric source

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::alert::TriggerId;

/// A single time series: identity tags plus timestamp-ordered datapoints
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Series {
    pub scope: String,
    pub metric: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Timestamp (unix millis) to value, ascending
    #[serde(default)]
    pub datapoints: BTreeMap<i64, f64>,
}

impl Series {
    pub fn new(scope: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            metric: metric.into(),
            tags: BTreeMap::new(),
            datapoints: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_datapoint(mut self, ts: i64, value: f64) -> Self {
        self.datapoints.insert(ts, value);
        self
    }

    pub fn with_datapoints(mut self, points: impl IntoIterator<Item = (i64, f64)>) -> Self {
        self.datapoints.extend(points);
        self
    }

    /// Stable identity: `scope:metric{k1=v1,k2=v2}` with tags sorted by key
    pub fn identity(&self) -> String {
        let mut out = format!("{}:{}", self.scope, self.metric);
        if !self.tags.is_empty() {
            let tags: Vec<String> = self
                .tags
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            out.push('{');
            out.push_str(&tags.join(","));
            out.push('}');
        }
        out
    }

    /// Key for per-(trigger, series) notification state
    pub fn state_key(&self, trigger_id: TriggerId) -> String {
        state_key(trigger_id, &self.identity())
    }

    pub fn latest(&self) -> Option<(i64, f64)> {
        self.datapoints.iter().next_back().map(|(ts, v)| (*ts, *v))
    }

    pub fn is_empty(&self) -> bool {
        self.datapoints.is_empty()
    }
}

/// Build the `"{trigger_id}$${hash}"` state key for a series identity
pub fn state_key(trigger_id: TriggerId, identity: &str) -> String {
    format!("{}$${:016x}", trigger_id, fxhash::hash64(identity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_sorts_tags() {
        let a = Series::new("host", "cpu")
            .with_tag("region", "us")
            .with_tag("dc", "east");
        assert_eq!(a.identity(), "host:cpu{dc=east,region=us}");
        assert_eq!(Series::new("host", "cpu").identity(), "host:cpu");
    }

    #[test]
    fn test_state_key_is_stable_and_distinct() {
        let a = Series::new("s", "m").with_tag("h", "1");
        let b = Series::new("s", "m").with_tag("h", "2");

        assert_eq!(a.state_key(7), a.clone().with_datapoint(1, 1.0).state_key(7));
        assert_ne!(a.state_key(7), b.state_key(7));
        assert_ne!(a.state_key(7), a.state_key(8));
        assert!(a.state_key(7).starts_with("7$$"));
    }

    #[test]
    fn test_latest() {
        let s = Series::new("s", "m").with_datapoints([(3, 3.0), (1, 1.0), (2, 2.0)]);
        assert_eq!(s.latest(), Some((3, 3.0)));
        assert_eq!(Series::new("s", "m").latest(), None);
    }
}
