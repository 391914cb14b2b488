use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::models::{BusinessHours, TimeSlot};
use crate::services::calendar::BusyInterval;

/// Display form used in offers and confirmations, in the client's timezone.
pub fn format_slot(start: DateTime<Utc>, tz: Tz) -> String {
    start.with_timezone(&tz).format("%A, %B %-d at %-I:%M %p").to_string()
}

pub fn format_time(minutes: u32) -> String {
    let hour = minutes / 60;
    let minute = minutes % 60;
    let (display, suffix) = match hour {
        0 => (12, "AM"),
        1..=11 => (hour, "AM"),
        12 => (12, "PM"),
        _ => (hour - 12, "PM"),
    };
    format!("{display}:{minute:02} {suffix}")
}

pub fn local_date(slot: &TimeSlot, tz: Tz) -> NaiveDate {
    slot.start.with_timezone(&tz).date_naive()
}

/// Minutes after local midnight at which the slot starts.
pub fn local_minutes(slot: &TimeSlot, tz: Tz) -> u32 {
    let local = slot.start.with_timezone(&tz);
    local.hour() * 60 + local.minute()
}

/// Numbered list, one slot per line.
pub fn format_slot_list(slots: &[TimeSlot]) -> String {
    slots
        .iter()
        .enumerate()
        .map(|(i, slot)| format!("{}. {}", i + 1, slot.formatted))
        .collect::<Vec<_>>()
        .join("\n")
}

fn local_to_utc(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Free slots of `slot_minutes` inside business hours, starting no earlier
/// than `earliest` and within `lookahead_days` local days of it.
pub fn generate_slots(
    hours: &BusinessHours,
    tz: Tz,
    busy: &[BusyInterval],
    earliest: DateTime<Utc>,
    lookahead_days: u32,
    slot_minutes: u32,
) -> Vec<TimeSlot> {
    let step = Duration::minutes(i64::from(slot_minutes.max(5)));
    let first_day = earliest.with_timezone(&tz).date_naive();
    let mut slots = Vec::new();

    for offset in 0..lookahead_days {
        let Some(date) = first_day.checked_add_signed(Duration::days(i64::from(offset))) else {
            break;
        };
        for (open, close) in hours.windows_for(date.weekday()) {
            let (Some(mut start), Some(window_end)) =
                (local_to_utc(tz, date, open), local_to_utc(tz, date, close))
            else {
                continue;
            };
            while start + step <= window_end {
                let end = start + step;
                if start >= earliest && !busy.iter().any(|b| b.overlaps(start, end)) {
                    slots.push(TimeSlot {
                        start,
                        end,
                        formatted: format_slot(start, tz),
                    });
                }
                start = end;
            }
        }
    }

    slots.sort_by_key(|s| s.start);
    slots.dedup();
    slots
}

/// Spreads the offer across days and parts of the day: per day, the middle
/// morning slot then the middle afternoon slot, until `max` are chosen.
pub fn select_diverse(slots: &[TimeSlot], max: usize, tz: Tz) -> Vec<TimeSlot> {
    if slots.len() <= max {
        return slots.to_vec();
    }

    let mut days: Vec<(NaiveDate, Vec<&TimeSlot>)> = Vec::new();
    for slot in slots {
        let date = local_date(slot, tz);
        match days.last_mut() {
            Some((d, bucket)) if *d == date => bucket.push(slot),
            _ => days.push((date, vec![slot])),
        }
    }

    let mut chosen = Vec::with_capacity(max);
    for (_, day_slots) in days {
        let (morning, afternoon): (Vec<&TimeSlot>, Vec<&TimeSlot>) = day_slots
            .into_iter()
            .partition(|s| s.start.with_timezone(&tz).hour() < 12);
        for bucket in [morning, afternoon] {
            if chosen.len() >= max {
                return chosen;
            }
            if let Some(slot) = bucket.get(bucket.len() / 2) {
                chosen.push((*slot).clone());
            }
        }
    }
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn slot(start: DateTime<Utc>) -> TimeSlot {
        TimeSlot {
            start,
            end: start + Duration::minutes(30),
            formatted: format_slot(start, chrono_tz::UTC),
        }
    }

    #[test]
    fn test_format_slot_in_client_timezone() {
        // 15:00 UTC is 10:00 in Chicago during daylight time.
        let start = utc(2025, 6, 16, 15, 0);
        assert_eq!(format_slot(start, chrono_tz::America::Chicago), "Monday, June 16 at 10:00 AM");
        assert_eq!(format_time(14 * 60 + 30), "2:30 PM");
        assert_eq!(format_time(0), "12:00 AM");
    }

    #[test]
    fn test_generate_slots_respects_hours_and_busy() {
        let hours = BusinessHours::from_json(
            r#"{"slots":[{"day":"mon","start":"09:00","end":"11:00"}]}"#,
        )
        .unwrap();
        let busy = vec![BusyInterval {
            start: utc(2025, 6, 16, 9, 30),
            end: utc(2025, 6, 16, 10, 0),
        }];
        // Sunday evening: Monday is inside a 2-day window.
        let slots = generate_slots(&hours, chrono_tz::UTC, &busy, utc(2025, 6, 15, 18, 0), 2, 30);
        let starts: Vec<DateTime<Utc>> = slots.iter().map(|s| s.start).collect();
        assert_eq!(
            starts,
            vec![utc(2025, 6, 16, 9, 0), utc(2025, 6, 16, 10, 0), utc(2025, 6, 16, 10, 30)]
        );
    }

    #[test]
    fn test_generate_slots_skips_past_times() {
        let hours = BusinessHours::default();
        let slots = generate_slots(&hours, chrono_tz::UTC, &[], utc(2025, 6, 16, 16, 10), 1, 30);
        let starts: Vec<DateTime<Utc>> = slots.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![utc(2025, 6, 16, 16, 30)]);
    }

    #[test]
    fn test_select_diverse_returns_all_when_few() {
        let slots = vec![slot(utc(2025, 6, 16, 10, 0)), slot(utc(2025, 6, 16, 14, 0))];
        assert_eq!(select_diverse(&slots, 4, chrono_tz::UTC), slots);
    }

    #[test]
    fn test_select_diverse_spreads_across_days() {
        let mut slots = Vec::new();
        for day in [16, 17, 18] {
            for hour in 9..17 {
                slots.push(slot(utc(2025, 6, day, hour, 0)));
            }
        }
        let chosen = select_diverse(&slots, 4, chrono_tz::UTC);
        let starts: Vec<DateTime<Utc>> = chosen.iter().map(|s| s.start).collect();
        // Morning bucket 9,10,11 -> 10; afternoon 12..16 -> 14.
        assert_eq!(
            starts,
            vec![
                utc(2025, 6, 16, 10, 0),
                utc(2025, 6, 16, 14, 0),
                utc(2025, 6, 17, 10, 0),
                utc(2025, 6, 17, 14, 0),
            ]
        );
    }

    #[test]
    fn test_format_slot_list() {
        let slots = vec![slot(utc(2025, 6, 16, 10, 0)), slot(utc(2025, 6, 17, 14, 0))];
        assert_eq!(
            format_slot_list(&slots),
            "1. Monday, June 16 at 10:00 AM\n2. Tuesday, June 17 at 2:00 PM"
        );
    }
}
