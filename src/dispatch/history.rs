//! Per-evaluation history records

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::data::AlertId;

/// Outcome of one evaluation job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Success,
    Failure,
    Skipped,
}

/// Message lines accumulated while evaluating one alert
///
/// Cloned into every notifier context so channels can append their own lines.
#[derive(Debug, Clone, Default)]
pub struct AuditTrail {
    lines: Arc<Mutex<Vec<String>>>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, line: impl Into<String>) {
        self.lines.lock().push(line.into());
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub alert_id: AlertId,
    pub tracking_id: String,
    pub status: JobStatus,
    pub started_at_ms: i64,
    pub latency_ms: u64,
    pub messages: Vec<String>,
}

impl HistoryEntry {
    pub fn message(&self) -> String {
        self.messages.join("\n")
    }
}

/// Bounded log of recent history entries, newest last
pub struct HistoryLog {
    entries: Mutex<VecDeque<HistoryEntry>>,
    capacity: usize,
}

impl HistoryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, entry: HistoryEntry) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Up to `limit` entries, newest first
    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        self.entries.lock().iter().rev().take(limit).cloned().collect()
    }

    /// Entries for one alert, newest first
    pub fn for_alert(&self, alert_id: AlertId) -> Vec<HistoryEntry> {
        self.entries
            .lock()
            .iter()
            .rev()
            .filter(|e| e.alert_id == alert_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(1000)
    }
}
