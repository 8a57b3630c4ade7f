//! Per-account weekly schedule and blackout dates.
//!
//! Pure data plus well-formedness checks. The booking path only reads these;
//! account administrators replace them through the engine.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::engine::EngineError;
use crate::limits::*;

pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// Sunday-first, matching the numeric `dayOfWeek` of the persisted layout.
pub const WEEKDAYS: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

pub fn weekday_index(day: Weekday) -> u8 {
    day.num_days_from_sunday() as u8
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Sun => "sunday",
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
    }
}

pub fn weekday_from_name(name: &str) -> Option<Weekday> {
    WEEKDAYS
        .into_iter()
        .find(|d| weekday_name(*d) == name.to_ascii_lowercase())
}

// ── Time slots ───────────────────────────────────────────────────

/// Wall-clock interval within one local day, in minutes since midnight.
/// `end` may be 1440 (24:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: u16,
    pub end: u16,
}

impl TimeSlot {
    pub fn new(start: u16, end: u16) -> Result<Self, EngineError> {
        if start >= end {
            return Err(EngineError::validation(format!(
                "time slot {}-{} must start before it ends",
                format_minute(start),
                format_minute(end)
            )));
        }
        if end > MINUTES_PER_DAY {
            return Err(EngineError::validation("time slot may not end after 24:00"));
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, EngineError> {
        Self::new(parse_minute(start)?, parse_minute(end)?)
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", format_minute(self.start), format_minute(self.end))
    }
}

/// Parse `HH:MM` into minutes since midnight. `24:00` is accepted.
pub fn parse_minute(text: &str) -> Result<u16, EngineError> {
    let bad = || EngineError::validation(format!("bad wall-clock time {text:?} (expected HH:MM)"));
    let (h, m) = text.trim().split_once(':').ok_or_else(bad)?;
    let h: u16 = h.parse().map_err(|_| bad())?;
    let m: u16 = m.parse().map_err(|_| bad())?;
    if m >= 60 || h > 24 || (h == 24 && m != 0) {
        return Err(bad());
    }
    Ok(h * 60 + m)
}

pub fn format_minute(minute: u16) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

// ── Weekly schedule ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayAvailability {
    pub weekday: Weekday,
    pub is_available: bool,
    /// Ascending and non-overlapping.
    pub time_slots: Vec<TimeSlot>,
}

impl DayAvailability {
    pub fn new(weekday: Weekday, is_available: bool, time_slots: Vec<TimeSlot>) -> Result<Self, EngineError> {
        if time_slots.len() > MAX_SLOTS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many time slots in one day"));
        }
        for pair in time_slots.windows(2) {
            if pair[1].start < pair[0].end {
                return Err(EngineError::validation(format!(
                    "{}: time slots {} and {} are out of order or overlap",
                    weekday_name(weekday),
                    pair[0],
                    pair[1]
                )));
            }
        }
        Ok(Self {
            weekday,
            is_available,
            time_slots,
        })
    }

    pub fn closed(weekday: Weekday) -> Self {
        Self {
            weekday,
            is_available: false,
            time_slots: Vec::new(),
        }
    }
}

/// Seven entries, one per weekday, stored Sunday-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    days: Vec<DayAvailability>,
}

impl Default for WeeklySchedule {
    fn default() -> Self {
        Self {
            days: WEEKDAYS.into_iter().map(DayAvailability::closed).collect(),
        }
    }
}

impl WeeklySchedule {
    /// Build from any subset of days; weekdays not mentioned are closed.
    /// A weekday given twice is rejected.
    pub fn new(days: Vec<DayAvailability>) -> Result<Self, EngineError> {
        let mut schedule = Self::default();
        let mut seen = HashSet::new();
        for day in days {
            if !seen.insert(day.weekday) {
                return Err(EngineError::validation(format!(
                    "{} appears more than once",
                    weekday_name(day.weekday)
                )));
            }
            let idx = weekday_index(day.weekday) as usize;
            schedule.days[idx] = day;
        }
        Ok(schedule)
    }

    pub fn day(&self, weekday: Weekday) -> &DayAvailability {
        &self.days[weekday_index(weekday) as usize]
    }

    pub fn days(&self) -> &[DayAvailability] {
        &self.days
    }

    /// Strict parse of the persisted layout: a JSON object keyed by weekday
    /// name, every entry carrying a matching numeric `dayOfWeek`.
    #[cfg(test)]
    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        let doc: Value = serde_json::from_str(text)
            .map_err(|e| EngineError::validation(format!("schedule is not valid JSON: {e}")))?;
        Self::from_value(&doc)
    }

    pub fn from_value(doc: &Value) -> Result<Self, EngineError> {
        let entries: BTreeMap<String, PersistedDay> = serde_json::from_value(doc.clone())
            .map_err(|e| EngineError::validation(format!("malformed schedule: {e}")))?;

        let mut days = Vec::with_capacity(entries.len());
        for (key, entry) in entries {
            let weekday = weekday_from_name(&key)
                .ok_or_else(|| EngineError::validation(format!("unknown weekday key {key:?}")))?;
            let tagged = entry.day_of_week.ok_or_else(|| {
                EngineError::validation(format!("{key}: missing dayOfWeek"))
            })?;
            if tagged != weekday_index(weekday) {
                return Err(EngineError::validation(format!(
                    "{key}: dayOfWeek {tagged} does not match weekday {}",
                    weekday_index(weekday)
                )));
            }
            let slots = entry
                .time_slots
                .iter()
                .map(|s| TimeSlot::parse(&s.start, &s.end))
                .collect::<Result<Vec<_>, _>>()?;
            days.push(DayAvailability::new(weekday, entry.is_available, slots)?);
        }
        Self::new(days)
    }

    pub fn to_value(&self) -> Value {
        let mut doc = Map::new();
        for day in &self.days {
            let slots: Vec<Value> = day
                .time_slots
                .iter()
                .map(|s| json!({ "start": format_minute(s.start), "end": format_minute(s.end) }))
                .collect();
            doc.insert(
                weekday_name(day.weekday).to_string(),
                json!({
                    "dayOfWeek": weekday_index(day.weekday),
                    "isAvailable": day.is_available,
                    "timeSlots": slots,
                }),
            );
        }
        Value::Object(doc)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PersistedDay {
    #[serde(default)]
    day_of_week: Option<u8>,
    #[serde(default)]
    is_available: bool,
    #[serde(default)]
    time_slots: Vec<PersistedSlot>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PersistedSlot {
    start: String,
    end: String,
}

// ── Blackout dates ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackoutDate {
    /// Calendar date in the account's timezone.
    pub date: NaiveDate,
    pub reason: Option<String>,
    /// Recurring entries repeat on the same month/day every year.
    pub recurring: bool,
}

impl BlackoutDate {
    pub fn matches(&self, day: NaiveDate) -> bool {
        if self.recurring {
            self.date.month() == day.month() && self.date.day() == day.day()
        } else {
            self.date == day
        }
    }
}

pub fn is_blacked_out(blackouts: &[BlackoutDate], day: NaiveDate) -> bool {
    blackouts.iter().any(|b| b.matches(day))
}

/// At most one absolute entry per date and one recurring entry per month/day.
pub fn validate_blackouts(blackouts: &[BlackoutDate]) -> Result<(), EngineError> {
    if blackouts.len() > MAX_BLACKOUTS {
        return Err(EngineError::LimitExceeded("too many blackout dates"));
    }
    let mut absolute = HashSet::new();
    let mut recurring = HashSet::new();
    for b in blackouts {
        if let Some(reason) = &b.reason
            && reason.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("blackout reason too long"));
        }
        let fresh = if b.recurring {
            recurring.insert((b.date.month(), b.date.day()))
        } else {
            absolute.insert(b.date)
        };
        if !fresh {
            return Err(EngineError::validation(format!(
                "duplicate blackout date {}",
                b.date.format("%Y-%m-%d")
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parse_wall_clock() {
        assert_eq!(parse_minute("09:30").unwrap(), 570);
        assert_eq!(parse_minute("24:00").unwrap(), 1440);
        assert!(parse_minute("24:01").is_err());
        assert!(parse_minute("9").is_err());
        assert!(parse_minute("12:60").is_err());
        assert_eq!(format_minute(570), "09:30");
    }

    #[test]
    fn slot_must_start_before_end() {
        assert!(TimeSlot::parse("12:00", "09:00").is_err());
        assert!(TimeSlot::parse("09:00", "09:00").is_err());
        assert_eq!(TimeSlot::parse("22:00", "24:00").unwrap(), TimeSlot { start: 1320, end: 1440 });
    }

    #[test]
    fn overlapping_slots_rejected() {
        let slots = vec![
            TimeSlot::parse("09:00", "12:00").unwrap(),
            TimeSlot::parse("11:00", "13:00").unwrap(),
        ];
        assert!(DayAvailability::new(Weekday::Mon, true, slots).is_err());

        let unordered = vec![
            TimeSlot::parse("13:00", "15:00").unwrap(),
            TimeSlot::parse("09:00", "12:00").unwrap(),
        ];
        assert!(DayAvailability::new(Weekday::Mon, true, unordered).is_err());
    }

    #[test]
    fn duplicate_weekday_rejected() {
        let days = vec![DayAvailability::closed(Weekday::Tue), DayAvailability::closed(Weekday::Tue)];
        assert!(WeeklySchedule::new(days).is_err());
    }

    #[test]
    fn missing_days_are_closed() {
        let monday = DayAvailability::new(
            Weekday::Mon,
            true,
            vec![TimeSlot::parse("09:00", "12:00").unwrap()],
        )
        .unwrap();
        let schedule = WeeklySchedule::new(vec![monday.clone()]).unwrap();
        assert_eq!(schedule.day(Weekday::Mon), &monday);
        assert!(!schedule.day(Weekday::Sun).is_available);
        assert_eq!(schedule.days().len(), 7);
    }

    #[test]
    fn persisted_layout_parses() {
        let text = r#"{
            "monday": {"dayOfWeek": 1, "isAvailable": true,
                       "timeSlots": [{"start": "09:00", "end": "12:00"}, {"start": "13:00", "end": "17:00"}]},
            "sunday": {"dayOfWeek": 0, "isAvailable": false, "timeSlots": []}
        }"#;
        let schedule = WeeklySchedule::from_json(text).unwrap();
        let monday = schedule.day(Weekday::Mon);
        assert!(monday.is_available);
        assert_eq!(monday.time_slots.len(), 2);
        assert_eq!(monday.time_slots[1].to_string(), "13:00-17:00");
        assert!(!schedule.day(Weekday::Fri).is_available);
    }

    #[test]
    fn missing_weekday_tag_rejected() {
        let text = r#"{"monday": {"isAvailable": true, "timeSlots": []}}"#;
        let err = WeeklySchedule::from_json(text).unwrap_err();
        assert!(err.to_string().contains("missing dayOfWeek"), "{err}");
    }

    #[test]
    fn mismatched_weekday_tag_rejected() {
        let text = r#"{"monday": {"dayOfWeek": 2, "isAvailable": true, "timeSlots": []}}"#;
        let err = WeeklySchedule::from_json(text).unwrap_err();
        assert!(err.to_string().contains("does not match"), "{err}");
    }

    #[test]
    fn unknown_weekday_key_rejected() {
        let text = r#"{"funday": {"dayOfWeek": 1, "isAvailable": true, "timeSlots": []}}"#;
        assert!(WeeklySchedule::from_json(text).is_err());
    }

    #[test]
    fn persisted_layout_roundtrips_through_value() {
        let text = r#"{"friday": {"dayOfWeek": 5, "isAvailable": true, "timeSlots": [{"start": "08:15", "end": "24:00"}]}}"#;
        let schedule = WeeklySchedule::from_json(text).unwrap();
        let again = WeeklySchedule::from_value(&schedule.to_value()).unwrap();
        assert_eq!(schedule, again);
        assert_eq!(schedule.to_value()["friday"]["dayOfWeek"], 5);
    }

    #[test]
    fn blackout_matching() {
        let once = BlackoutDate { date: date(2025, 12, 24), reason: None, recurring: false };
        let yearly = BlackoutDate { date: date(2020, 1, 1), reason: Some("New year".into()), recurring: true };
        assert!(once.matches(date(2025, 12, 24)));
        assert!(!once.matches(date(2026, 12, 24)));
        assert!(yearly.matches(date(2031, 1, 1)));
        assert!(!yearly.matches(date(2031, 1, 2)));

        let leap = BlackoutDate { date: date(2024, 2, 29), reason: None, recurring: true };
        assert!(leap.matches(date(2028, 2, 29)));
        assert!(!leap.matches(date(2027, 2, 28)));
        assert!(!leap.matches(date(2027, 3, 1)));
    }

    #[test]
    fn duplicate_blackouts_rejected() {
        let a = BlackoutDate { date: date(2025, 12, 24), reason: None, recurring: false };
        assert!(validate_blackouts(&[a.clone(), a.clone()]).is_err());

        let yearly = BlackoutDate { date: date(2019, 12, 24), reason: None, recurring: true };
        let yearly_other_year = BlackoutDate { date: date(2021, 12, 24), reason: None, recurring: true };
        assert!(validate_blackouts(&[yearly.clone(), yearly_other_year]).is_err());

        // An absolute and a recurring entry on the same day may coexist.
        assert!(validate_blackouts(&[a, yearly]).is_ok());
    }
}
