use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{State, StatusRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub latest: f64,
    pub baseline: f64,
    pub baseline_at: DateTime<Utc>,
    pub delta: f64,
    /// Percent change against the baseline; absent for a zero baseline.
    pub pct: Option<f64>,
    pub direction: Direction,
}

/// Time-weighted share of `[start, now]` spent in OK.
///
/// Each record holds until the next one; the newest holds until `now`.
/// Time before the first record is unobserved and left out.
pub fn uptime(records: &[StatusRecord], start: DateTime<Utc>, now: DateTime<Utc>) -> Option<f64> {
    let visible: Vec<&StatusRecord> = records.iter().filter(|r| r.ts <= now).collect();
    let last = visible.last()?;

    let mut total_ms: i64 = 0;
    let mut ok_ms: i64 = 0;
    for (idx, record) in visible.iter().enumerate() {
        let from = record.ts.max(start);
        let to = visible.get(idx + 1).map_or(now, |next| next.ts).min(now);
        if to <= from {
            continue;
        }
        let span = (to - from).num_milliseconds();
        total_ms += span;
        if record.state.is_ok() {
            ok_ms += span;
        }
    }

    if total_ms == 0 {
        // A single sample taken exactly at `now`.
        return (last.ts >= start).then(|| if last.state.is_ok() { 1.0 } else { 0.0 });
    }
    Some(ok_ms as f64 / total_ms as f64)
}

/// Change between the latest value and the value one window ago.
///
/// The baseline is the nearest valued record at or before `now - window`;
/// when history is younger than the window, the oldest valued record is used.
pub fn trend(
    records: &[StatusRecord],
    now: DateTime<Utc>,
    window: Duration,
    deadband: f64,
) -> Option<Trend> {
    let valued: Vec<(DateTime<Utc>, f64)> = records
        .iter()
        .filter(|r| r.ts <= now)
        .filter_map(|r| r.value.filter(|v| v.is_finite()).map(|v| (r.ts, v)))
        .collect();
    let &(_, latest) = valued.last()?;

    let cutoff = now - window;
    let (baseline_at, baseline) = valued
        .iter()
        .rev()
        .find(|(ts, _)| *ts <= cutoff)
        .or_else(|| valued.first())
        .copied()?;

    let delta = latest - baseline;
    let direction = if delta == 0.0 || delta.abs() < deadband {
        Direction::Flat
    } else if delta > 0.0 {
        Direction::Up
    } else {
        Direction::Down
    };
    let pct = (baseline != 0.0).then(|| delta / baseline.abs() * 100.0);

    Some(Trend {
        latest,
        baseline,
        baseline_at,
        delta,
        pct,
        direction,
    })
}

/// Number of transitions into a non-OK state inside `(start, now]`.
pub fn episodes(records: &[StatusRecord], start: DateTime<Utc>, now: DateTime<Utc>) -> usize {
    let mut previous: Option<State> = None;
    let mut count = 0;
    for record in records.iter().filter(|r| r.ts <= now) {
        if record.ts > start && !record.state.is_ok() && previous.is_none_or(State::is_ok) {
            count += 1;
        }
        previous = Some(record.state);
    }
    count
}

/// Hour slot of `ts` within `[start, start + slots hours]`. A record exactly
/// at the window end belongs to the last slot.
fn slot_index(ts: DateTime<Utc>, start: DateTime<Utc>, slots: usize) -> Option<usize> {
    let offset = (ts - start).num_milliseconds();
    if offset < 0 || slots == 0 {
        return None;
    }
    let idx = (offset / Duration::hours(1).num_milliseconds()) as usize;
    Some(idx.min(slots - 1))
}

/// Worst state per hour slot across `[start, start + slots hours]`.
///
/// Records are expected in ascending order and may include the one at or
/// before `start`; anything before the window is skipped.
pub fn buckets(records: &[StatusRecord], start: DateTime<Utc>, slots: usize) -> Vec<Option<State>> {
    let mut out = vec![None; slots];
    for record in records {
        let Some(idx) = slot_index(record.ts, start, slots) else {
            continue;
        };
        let slot = &mut out[idx];
        *slot = State::worst(slot.iter().copied().chain([record.state]));
    }
    out
}

/// Last value observed in each hour slot.
pub fn value_buckets(
    records: &[StatusRecord],
    start: DateTime<Utc>,
    slots: usize,
) -> Vec<Option<f64>> {
    let mut out = vec![None; slots];
    for record in records {
        let Some(value) = record.value.filter(|v| v.is_finite()) else {
            continue;
        };
        if let Some(idx) = slot_index(record.ts, start, slots) {
            out[idx] = Some(value);
        }
    }
    out
}

/// Lowest and highest value observed inside `[start, now]`.
pub fn range(records: &[StatusRecord], start: DateTime<Utc>, now: DateTime<Utc>) -> Option<(f64, f64)> {
    records
        .iter()
        .filter(|r| r.ts >= start && r.ts <= now)
        .filter_map(|r| r.value.filter(|v| v.is_finite()))
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((f64::min(lo, v), f64::max(hi, v))),
        })
}
