//! Relative time windows in metric expressions
//!
//! Expressions carry relative tokens such as `-1h` or `-30m:-5m` ahead of each
//! metric selector. Tokens resolve against an anchor timestamp (the minute an
//! alert was scheduled for) rather than the wall clock, so a delayed
//! evaluation still looks at the intended window.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Window used when an expression carries no relative tokens
pub const DEFAULT_LOOKBACK_MS: i64 = 60 * 60 * 1000;

/// Inclusive time range in unix milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl QueryWindow {
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self { start_ms, end_ms }
    }

    /// Widest window spanned by all relative tokens in `expression`
    pub fn from_expression(expression: &str, anchor_ms: i64) -> Self {
        let mut window: Option<QueryWindow> = None;

        for caps in token_regex().captures_iter(expression) {
            let Some(start) = caps.get(1).and_then(|m| parse_offset(m.as_str())) else {
                continue;
            };
            let end = caps
                .get(2)
                .and_then(|m| parse_offset(m.as_str()))
                .unwrap_or(0);

            // offsets that overflow the anchor are dropped like unparseable ones
            let (Some(start), Some(end)) = (anchor_ms.checked_add(start), anchor_ms.checked_add(end))
            else {
                continue;
            };
            let candidate = QueryWindow::new(start.min(end), start.max(end));
            window = Some(match window {
                Some(w) => QueryWindow::new(
                    w.start_ms.min(candidate.start_ms),
                    w.end_ms.max(candidate.end_ms),
                ),
                None => candidate,
            });
        }

        window.unwrap_or_else(|| {
            QueryWindow::new(anchor_ms.saturating_sub(DEFAULT_LOOKBACK_MS), anchor_ms)
        })
    }

    pub fn contains(&self, ts_ms: i64) -> bool {
        ts_ms >= self.start_ms && ts_ms <= self.end_ms
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| {
        Regex::new(r"(?:^|[\s(,])(-\d+[smhdw])(?::(-\d+[smhdw]))?(?::|$|[\s),])")
            .expect("relative time pattern is valid")
    })
}

/// Parse `-<n><unit>` into a (negative) millisecond offset
///
/// Returns `None` for unknown units and for amounts too large to represent.
pub fn parse_offset(token: &str) -> Option<i64> {
    let body = token.strip_prefix('-')?;
    let unit = body.chars().last()?;
    let amount: i64 = body[..body.len() - unit.len_utf8()].parse().ok()?;
    let unit_ms = match unit {
        's' => 1_000,
        'm' => 60_000,
        'h' => 3_600_000,
        'd' => 86_400_000,
        'w' => 7 * 86_400_000,
        _ => return None,
    };
    amount.checked_mul(unit_ms)?.checked_neg()
}
