//! Trigger evaluation over a single series
//!
//! [`fired_at`] is a pure function of the trigger, the datapoints and the
//! query window: it returns the timestamp at which the trigger fired, or
//! `None`.

use std::collections::BTreeMap;

use crate::data::Trigger;
use crate::source::QueryWindow;

/// Timestamp at which `trigger` fires over `datapoints`, if it does
///
/// - No datapoints never fire.
/// - A single datapoint fires (at its own timestamp) only when inertia is
///   not positive and the comparison holds.
/// - No-data triggers with positive inertia fire on the first gap longer than
///   the inertia: window start to first point, last point to window end, then
///   between consecutive points (returning the earlier point).
/// - Threshold triggers scan newest to oldest and fire once a contiguous run
///   of violating points spans at least the inertia, returning the newest
///   timestamp of that run.
pub fn fired_at(
    trigger: &Trigger,
    datapoints: &BTreeMap<i64, f64>,
    window: QueryWindow,
) -> Option<i64> {
    let points: Vec<(i64, f64)> = datapoints.iter().map(|(ts, v)| (*ts, *v)).collect();

    match points.as_slice() {
        [] => None,
        [(ts, value)] => {
            if trigger.inertia_ms <= 0 && trigger.holds(*value) {
                Some(*ts)
            } else {
                None
            }
        }
        _ if trigger.is_no_data() => no_data_gap(trigger.inertia_ms, &points, window),
        _ => persistent_violation(trigger, &points),
    }
}

fn no_data_gap(inertia_ms: i64, points: &[(i64, f64)], window: QueryWindow) -> Option<i64> {
    if inertia_ms <= 0 {
        return None;
    }
    let (first, _) = points[0];
    let (last, _) = points[points.len() - 1];

    if first.saturating_sub(window.start_ms) > inertia_ms {
        return Some(first);
    }
    if window.end_ms.saturating_sub(last) > inertia_ms {
        return Some(last);
    }
    points
        .windows(2)
        .find(|pair| pair[1].0 - pair[0].0 > inertia_ms)
        .map(|pair| pair[0].0)
}

fn persistent_violation(trigger: &Trigger, points: &[(i64, f64)]) -> Option<i64> {
    // One past the newest point of the current violating run
    let mut end = points.len();

    for start in (0..points.len()).rev() {
        let (ts, value) = points[start];
        if trigger.holds(value) {
            let newest = points[end - 1].0;
            if newest - ts >= trigger.inertia_ms {
                return Some(newest);
            }
        } else {
            end = start;
        }
    }
    None
}
