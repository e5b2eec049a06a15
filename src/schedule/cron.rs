//! Minute-resolution cron entries
//!
//! Accepts the standard 5-field syntax (`minute hour day-of-month month
//! day-of-week`) plus the `@hourly`, `@daily`/`@midnight`, `@weekly`,
//! `@monthly` and `@yearly`/`@annually` shorthands. Entries are translated
//! into the seconds-first format understood by the `cron` crate.
//!
//! Day-of-week accepts `0-7` (both `0` and `7` are Sunday) or three-letter
//! names. When both day-of-month and day-of-week are restricted, both must
//! match.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use cron::Schedule;
use moka::sync::Cache;

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A parsed cron entry
#[derive(Debug, Clone)]
pub struct CronEntry {
    raw: String,
    schedule: Schedule,
}

impl CronEntry {
    pub fn parse(entry: &str) -> Result<Self, CronError> {
        let expanded = expand_shorthand(entry);
        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount {
                entry: entry.to_string(),
                count: fields.len(),
            });
        }

        let day_of_month = normalize_wildcard(fields[2]);
        let day_of_week = expand_day_of_week(fields[4]).map_err(|reason| CronError::Invalid {
            entry: entry.to_string(),
            reason,
        })?;
        let translated = format!(
            "0 {} {} {} {} {}",
            fields[0], fields[1], day_of_month, fields[3], day_of_week
        );

        let schedule = Schedule::from_str(&translated).map_err(|e| CronError::Invalid {
            entry: entry.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            raw: entry.trim().to_string(),
            schedule,
        })
    }

    /// Check an entry without keeping the parsed form
    pub fn is_valid(entry: &str) -> bool {
        Self::parse(entry).is_ok()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// First fire time strictly after `ts_ms`
    pub fn next_after(&self, ts_ms: i64) -> Option<i64> {
        let after = Utc.timestamp_millis_opt(ts_ms).single()?;
        self.schedule
            .after(&after)
            .next()
            .map(|dt| dt.timestamp_millis())
    }

    /// Whether the entry fires exactly at `minute_start_ms`
    pub fn fires_at(&self, minute_start_ms: i64) -> bool {
        self.next_after(minute_start_ms - 1000) == Some(minute_start_ms)
    }
}

/// Cron parse errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum CronError {
    #[error("Cron entry '{entry}' has {count} fields, expected 5")]
    FieldCount { entry: String, count: usize },

    #[error("Invalid cron entry '{entry}': {reason}")]
    Invalid { entry: String, reason: String },
}

/// Parsed schedules keyed by raw entry
///
/// Parse failures are not cached; a bad entry is re-reported on every tick
/// until the catalog drops it.
pub struct CronCache {
    cache: Cache<String, Arc<CronEntry>>,
}

impl CronCache {
    pub fn new(max_entries: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_entries).build(),
        }
    }

    pub fn get(&self, entry: &str) -> Result<Arc<CronEntry>, CronError> {
        if let Some(parsed) = self.cache.get(entry) {
            return Ok(parsed);
        }
        let parsed = Arc::new(CronEntry::parse(entry)?);
        self.cache.insert(entry.to_string(), Arc::clone(&parsed));
        Ok(parsed)
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for CronCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

fn expand_shorthand(entry: &str) -> String {
    match entry.trim().to_ascii_uppercase().as_str() {
        "@YEARLY" | "@ANNUALLY" => "0 0 1 1 *".to_string(),
        "@MONTHLY" => "0 0 1 * *".to_string(),
        "@WEEKLY" => "0 0 * * 0".to_string(),
        "@DAILY" | "@MIDNIGHT" => "0 0 * * *".to_string(),
        "@HOURLY" => "0 * * * *".to_string(),
        _ => entry.trim().to_string(),
    }
}

fn normalize_wildcard(field: &str) -> &str {
    if field == "?" {
        "*"
    } else {
        field
    }
}

/// Rewrite a 0-based day-of-week field as the 1-based (Sunday = 1) list the
/// `cron` crate expects
fn expand_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok("*".to_string());
    }

    let mut days = BTreeSet::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid day-of-week step '{}'", step))?;
                if step == 0 {
                    return Err("day-of-week step must be positive".to_string());
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range == "*" {
            (0, 6)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_day(a)?, parse_day(b)?)
        } else {
            let day = parse_day(range)?;
            // `5/2` means "from 5 through the end of the week"
            (day, if step > 1 { 6 } else { day })
        };
        if start > end {
            return Err(format!("day-of-week range '{}' is reversed", range));
        }

        let mut day = start;
        while day <= end {
            days.insert(day % 7);
            day += step;
        }
    }

    if days.is_empty() {
        return Err("empty day-of-week field".to_string());
    }
    let ordinals: Vec<String> = days.iter().map(|d| (d + 1).to_string()).collect();
    Ok(ordinals.join(","))
}

fn parse_day(token: &str) -> Result<u32, String> {
    if let Ok(n) = token.parse::<u32>() {
        return if n <= 7 {
            Ok(n)
        } else {
            Err(format!("day-of-week {} out of range", n))
        };
    }
    let upper = token.to_ascii_uppercase();
    DAY_NAMES
        .iter()
        .position(|name| *name == upper)
        .map(|i| i as u32)
        .ok_or_else(|| format!("unknown day-of-week '{}'", token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> i64 {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap().timestamp_millis()
    }

    /// Straightforward field matcher used as the reference evaluator
    fn reference_matches(minute: u32, hour: u32, ts_ms: i64) -> bool {
        let dt = Utc.timestamp_millis_opt(ts_ms).unwrap();
        dt.minute() % minute == 0 && dt.hour() % hour == 0
    }

    #[test]
    fn test_every_minute() {
        let cron = CronEntry::parse("*/1 * * * *").unwrap();
        let start = ts(2024, 3, 1, 10, 0);
        for i in 0..120 {
            assert!(cron.fires_at(start + i * 60_000));
        }
        assert!(!cron.fires_at(start + 30_000));
    }

    #[test]
    fn test_matches_reference_evaluator() {
        let cron = CronEntry::parse("*/15 */2 * * *").unwrap();
        let start = ts(2024, 1, 1, 0, 0);
        for i in 0..(48 * 60) {
            let minute = start + i * 60_000;
            assert_eq!(
                cron.fires_at(minute),
                reference_matches(15, 2, minute),
                "mismatch at minute offset {}",
                i
            );
        }
    }

    #[test]
    fn test_fixed_minute() {
        let cron = CronEntry::parse("30 4 * * *").unwrap();
        assert!(cron.fires_at(ts(2024, 5, 5, 4, 30)));
        assert!(!cron.fires_at(ts(2024, 5, 5, 4, 31)));
        assert!(!cron.fires_at(ts(2024, 5, 5, 5, 30)));
    }

    #[test]
    fn test_day_of_week_zero_and_seven_are_sunday() {
        // 2024-03-03 is a Sunday
        let sunday = ts(2024, 3, 3, 0, 0);
        let monday = ts(2024, 3, 4, 0, 0);
        for entry in ["0 0 * * 0", "0 0 * * 7", "0 0 * * sun", "@weekly"] {
            let cron = CronEntry::parse(entry).unwrap();
            assert!(cron.fires_at(sunday), "{} should fire on Sunday", entry);
            assert!(!cron.fires_at(monday), "{} should not fire on Monday", entry);
        }
    }

    #[test]
    fn test_weekday_range() {
        let cron = CronEntry::parse("0 9 * * 1-5").unwrap();
        let start = ts(2024, 3, 3, 9, 0); // Sunday
        let fired: Vec<u32> = (0..7)
            .map(|d| start + d * 86_400_000)
            .filter(|t| cron.fires_at(*t))
            .map(|t| {
                Utc.timestamp_millis_opt(t)
                    .unwrap()
                    .weekday()
                    .num_days_from_sunday()
            })
            .collect();
        assert_eq!(fired, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_shorthands() {
        let daily = CronEntry::parse("@daily").unwrap();
        assert!(daily.fires_at(ts(2024, 2, 10, 0, 0)));
        assert!(!daily.fires_at(ts(2024, 2, 10, 1, 0)));

        let hourly = CronEntry::parse("@HOURLY").unwrap();
        assert!(hourly.fires_at(ts(2024, 2, 10, 7, 0)));
        assert!(!hourly.fires_at(ts(2024, 2, 10, 7, 1)));

        let yearly = CronEntry::parse("@annually").unwrap();
        assert!(yearly.fires_at(ts(2025, 1, 1, 0, 0)));
        assert!(!yearly.fires_at(ts(2025, 2, 1, 0, 0)));
    }

    #[test]
    fn test_invalid_entries() {
        assert!(!CronEntry::is_valid("* * * *"));
        assert!(!CronEntry::is_valid("61 * * * *"));
        assert!(!CronEntry::is_valid("* * * * 9"));
        assert!(!CronEntry::is_valid("not a cron"));
        assert!(CronEntry::is_valid("0 0 ? * MON"));
    }

    #[test]
    fn test_cache_reuses_parsed_entries() {
        let cache = CronCache::new(16);
        let a = cache.get("*/5 * * * *").unwrap();
        let b = cache.get("*/5 * * * *").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(cache.get("bogus").is_err());
    }
}
