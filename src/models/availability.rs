use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayWindow {
    pub day: String,
    pub start: String,
    pub end: String,
}

/// Weekly opening windows in the client's local time, e.g.
/// `{"slots":[{"day":"mon","start":"09:00","end":"17:00"}]}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusinessHours {
    pub slots: Vec<DayWindow>,
}

impl Default for BusinessHours {
    fn default() -> Self {
        let slots = ["mon", "tue", "wed", "thu", "fri"]
            .iter()
            .map(|day| DayWindow {
                day: day.to_string(),
                start: "09:00".to_string(),
                end: "17:00".to_string(),
            })
            .collect();
        Self { slots }
    }
}

impl BusinessHours {
    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        let hours: BusinessHours = serde_json::from_str(s)?;
        for slot in &hours.slots {
            parse_weekday(&slot.day)?;
            let start = parse_time(&slot.start)?;
            let end = parse_time(&slot.end)?;
            if end <= start {
                anyhow::bail!("window ends before it starts: {}-{}", slot.start, slot.end);
            }
        }
        Ok(hours)
    }

    /// Parses configured hours, falling back to weekdays 09:00-17:00 when the
    /// value is missing, invalid, or empty.
    pub fn from_config(raw: Option<&str>) -> Self {
        match raw.map(Self::from_json) {
            Some(Ok(hours)) if !hours.slots.is_empty() => hours,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "invalid business hours, using defaults");
                Self::default()
            }
            _ => Self::default(),
        }
    }

    /// Opening windows for one weekday, in chronological order.
    pub fn windows_for(&self, weekday: Weekday) -> Vec<(NaiveTime, NaiveTime)> {
        let mut windows: Vec<(NaiveTime, NaiveTime)> = self
            .slots
            .iter()
            .filter(|slot| parse_weekday(&slot.day).ok() == Some(weekday))
            .filter_map(|slot| Some((parse_time(&slot.start).ok()?, parse_time(&slot.end).ok()?)))
            .collect();
        windows.sort();
        windows
    }

    pub fn to_human_readable(&self) -> String {
        if self.slots.is_empty() {
            return String::new();
        }

        let day_order = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

        let mut sorted_slots = self.slots.clone();
        sorted_slots.sort_by_key(|s| {
            day_order
                .iter()
                .position(|d| *d == s.day.to_lowercase())
                .unwrap_or(7)
        });

        sorted_slots
            .iter()
            .map(|s| {
                let day = capitalize(&s.day);
                format!("{day}: {}-{}", s.start, s.end)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn capitalize(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        None => String::new(),
        Some(f) => f.to_uppercase().to_string() + &c.as_str().to_lowercase(),
    }
}

fn parse_weekday(s: &str) -> anyhow::Result<Weekday> {
    match s.to_lowercase().as_str() {
        "mon" => Ok(Weekday::Mon),
        "tue" => Ok(Weekday::Tue),
        "wed" => Ok(Weekday::Wed),
        "thu" => Ok(Weekday::Thu),
        "fri" => Ok(Weekday::Fri),
        "sat" => Ok(Weekday::Sat),
        "sun" => Ok(Weekday::Sun),
        _ => Err(anyhow::anyhow!("invalid weekday: {s}")),
    }
}

fn parse_time(s: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| anyhow::anyhow!("invalid time: {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_json() {
        let json = r#"{"slots":[{"day":"mon","start":"09:00","end":"17:00"},{"day":"tue","start":"09:00","end":"12:00"}]}"#;
        let hours = BusinessHours::from_json(json).unwrap();
        assert_eq!(hours.slots.len(), 2);
        assert_eq!(hours.windows_for(Weekday::Tue).len(), 1);
        assert!(hours.windows_for(Weekday::Sun).is_empty());
    }

    #[test]
    fn test_parse_invalid_day() {
        let json = r#"{"slots":[{"day":"xyz","start":"09:00","end":"17:00"}]}"#;
        assert!(BusinessHours::from_json(json).is_err());
    }

    #[test]
    fn test_parse_invalid_time() {
        let json = r#"{"slots":[{"day":"mon","start":"25:00","end":"17:00"}]}"#;
        assert!(BusinessHours::from_json(json).is_err());
    }

    #[test]
    fn test_parse_inverted_window() {
        let json = r#"{"slots":[{"day":"mon","start":"17:00","end":"09:00"}]}"#;
        assert!(BusinessHours::from_json(json).is_err());
    }

    #[test]
    fn test_from_config_falls_back() {
        assert_eq!(BusinessHours::from_config(None), BusinessHours::default());
        assert_eq!(BusinessHours::from_config(Some("not json")), BusinessHours::default());
        assert_eq!(BusinessHours::from_config(Some(r#"{"slots":[]}"#)), BusinessHours::default());
    }

    #[test]
    fn test_windows_sorted() {
        let json = r#"{"slots":[{"day":"mon","start":"13:00","end":"17:00"},{"day":"mon","start":"08:00","end":"11:00"}]}"#;
        let hours = BusinessHours::from_json(json).unwrap();
        let windows = hours.windows_for(Weekday::Mon);
        assert_eq!(windows[0].0, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert_eq!(windows[1].0, NaiveTime::from_hms_opt(13, 0, 0).unwrap());
    }

    #[test]
    fn test_to_human_readable() {
        let json = r#"{"slots":[{"day":"fri","start":"10:00","end":"16:00"},{"day":"mon","start":"09:00","end":"17:00"}]}"#;
        let hours = BusinessHours::from_json(json).unwrap();
        assert_eq!(hours.to_human_readable(), "Mon: 09:00-17:00, Fri: 10:00-16:00");
    }
}
