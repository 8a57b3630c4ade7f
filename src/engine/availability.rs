use chrono::{DateTime, LocalResult, NaiveDate, TimeDelta, TimeZone};
use chrono_tz::Tz;

use crate::limits::MAX_QUERY_DAYS;
use crate::model::*;
use crate::schedule::{is_blacked_out, BlackoutDate, WeeklySchedule};

use super::EngineError;

/// Longest run of non-existent local time we walk across (the widest
/// real-world transitions skip a whole calendar day).
const MAX_GAP_MINUTES: i64 = 26 * 60;

// ── Availability Algorithm ────────────────────────────────────────

pub fn validate_range(from: NaiveDate, to: NaiveDate) -> Result<(), EngineError> {
    if from > to {
        return Err(EngineError::validation("date range ends before it starts"));
    }
    if (to - from).num_days() + 1 > MAX_QUERY_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

/// Map a local wall-clock minute of `date` to an instant.
///
/// Ambiguous times (clocks going back) resolve to the earliest instant.
/// Non-existent times (clocks going forward) resolve to the first valid
/// instant after the gap.
pub fn local_instant(tz: &Tz, date: NaiveDate, minute: u16) -> Option<Ms> {
    let naive = date.and_hms_opt(0, 0, 0)? + TimeDelta::minutes(minute as i64);
    for step in 0..=MAX_GAP_MINUTES {
        let candidate = naive + TimeDelta::minutes(step);
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(dt) => return Some(dt.timestamp_millis()),
            LocalResult::Ambiguous(earliest, _) => return Some(earliest.timestamp_millis()),
            LocalResult::None => continue,
        }
    }
    None
}

/// Calendar date of an instant in the account's timezone.
pub fn local_date(tz: &Tz, at: Ms) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(at).map(|utc| utc.with_timezone(tz).date_naive())
}

/// Open (bookable, before occupancy) intervals for every local day in
/// `[from, to]`, as sorted, merged instants.
///
/// Per day: closed weekdays contribute nothing; a blackout match short-circuits
/// the day; otherwise each configured slot is converted through the timezone.
pub fn open_intervals(
    tz: &Tz,
    schedule: &WeeklySchedule,
    blackouts: &[BlackoutDate],
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<Span> {
    let mut open = Vec::new();
    for date in from.iter_days().take_while(|d| *d <= to) {
        let day = schedule.day(chrono::Datelike::weekday(&date));
        if !day.is_available {
            continue;
        }
        if is_blacked_out(blackouts, date) {
            continue;
        }
        for slot in &day.time_slots {
            let (Some(start), Some(end)) = (
                local_instant(tz, date, slot.start),
                local_instant(tz, date, slot.end),
            ) else {
                continue;
            };
            // A slot swallowed by a DST gap collapses to nothing.
            if end > start {
                open.push(Span::new(start, end));
            }
        }
    }
    open.sort_by_key(|s| s.start);
    merge_overlapping(&open)
}

/// Subtract occupied time from open time and keep pieces at least
/// `min_duration` wide.
pub fn free_slots(open: &[Span], occupied: &[Span], min_duration: Ms) -> Vec<Span> {
    let mut blocked = occupied.to_vec();
    blocked.sort_by_key(|s| s.start);
    let blocked = merge_overlapping(&blocked);

    let mut free = if blocked.is_empty() {
        open.to_vec()
    } else {
        subtract_intervals(open, &blocked)
    };
    free.retain(|span| span.duration_ms() >= min_duration);
    free
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
