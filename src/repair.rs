use serde_json::Value;

use crate::engine::EngineError;
use crate::schedule::{weekday_from_name, weekday_index};

/// Backfill a missing `dayOfWeek` on each entry of a persisted weekly
/// schedule from the entry's weekday key. Returns how many entries changed.
///
/// Re-running on repaired input is a no-op. A present value is never
/// overwritten, so a key/tag mismatch still fails strict parsing afterwards.
pub fn backfill_weekdays(doc: &mut Value) -> Result<usize, EngineError> {
    let entries = doc
        .as_object_mut()
        .ok_or_else(|| EngineError::validation("schedule must be a JSON object keyed by weekday"))?;

    let mut repaired = 0;
    for (key, entry) in entries.iter_mut() {
        let Some(weekday) = weekday_from_name(key) else {
            continue;
        };
        let Some(fields) = entry.as_object_mut() else {
            continue;
        };
        let missing = fields.get("dayOfWeek").is_none_or(Value::is_null);
        if missing {
            fields.insert("dayOfWeek".into(), Value::from(weekday_index(weekday)));
            repaired += 1;
        }
    }
    Ok(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::WeeklySchedule;
    use chrono::Weekday;
    use serde_json::json;

    #[test]
    fn backfills_missing_tags_once() {
        let mut doc = json!({
            "monday": {"isAvailable": true, "timeSlots": [{"start": "09:00", "end": "12:00"}]},
            "tuesday": {"dayOfWeek": 2, "isAvailable": false, "timeSlots": []},
            "saturday": {"dayOfWeek": null, "isAvailable": false, "timeSlots": []}
        });
        assert_eq!(backfill_weekdays(&mut doc).unwrap(), 2);
        assert_eq!(doc["monday"]["dayOfWeek"], 1);
        assert_eq!(doc["saturday"]["dayOfWeek"], 6);

        // Idempotent.
        assert_eq!(backfill_weekdays(&mut doc).unwrap(), 0);

        let schedule = WeeklySchedule::from_value(&doc).unwrap();
        assert!(schedule.day(Weekday::Mon).is_available);
    }

    #[test]
    fn never_overwrites_a_mismatch() {
        let mut doc = json!({"monday": {"dayOfWeek": 4, "isAvailable": true, "timeSlots": []}});
        assert_eq!(backfill_weekdays(&mut doc).unwrap(), 0);
        assert!(WeeklySchedule::from_value(&doc).is_err());
    }

    #[test]
    fn rejects_non_object() {
        let mut doc = json!([1, 2, 3]);
        assert!(backfill_weekdays(&mut doc).is_err());
    }
}
