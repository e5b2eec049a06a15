//! Evaluation counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct EvaluationStats {
    pub(crate) evaluated: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) skipped: AtomicU64,
    pub(crate) delayed: AtomicU64,
    pub(crate) notifications_sent: AtomicU64,
    pub(crate) notifications_cleared: AtomicU64,
    pub(crate) notifier_failures: AtomicU64,
    pub(crate) state_write_failures: AtomicU64,
    pub(crate) triggers_violated: AtomicU64,
    pub(crate) on_cooldown: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvaluationStatsSnapshot {
    pub evaluated: u64,
    pub failed: u64,
    pub skipped: u64,
    pub delayed: u64,
    pub notifications_sent: u64,
    pub notifications_cleared: u64,
    pub notifier_failures: u64,
    pub state_write_failures: u64,
    pub triggers_violated: u64,
    pub on_cooldown: u64,
}

impl EvaluationStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EvaluationStatsSnapshot {
        EvaluationStatsSnapshot {
            evaluated: self.evaluated.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            delayed: self.delayed.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_cleared: self.notifications_cleared.load(Ordering::Relaxed),
            notifier_failures: self.notifier_failures.load(Ordering::Relaxed),
            state_write_failures: self.state_write_failures.load(Ordering::Relaxed),
            triggers_violated: self.triggers_violated.load(Ordering::Relaxed),
            on_cooldown: self.on_cooldown.load(Ordering::Relaxed),
        }
    }
}
