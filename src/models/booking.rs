use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A concrete bookable interval. Two slots are the same slot when their
/// start and end match; the display string does not take part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub formatted: String,
}

impl PartialEq for TimeSlot {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start && self.end == other.end
    }
}

impl Eq for TimeSlot {}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookingState {
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub offered_slots: Vec<TimeSlot>,
    #[serde(default)]
    pub slots_offered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub selected_slot: Option<TimeSlot>,
    #[serde(default)]
    pub offer_attempts: u32,
    #[serde(default)]
    pub last_offered_slot: Option<TimeSlot>,
    #[serde(default)]
    pub is_rescheduling: bool,
    #[serde(default)]
    pub existing_appointment_id: Option<String>,
    #[serde(default)]
    pub existing_calendar_event_id: Option<String>,
}

impl BookingState {
    pub fn is_offering(&self) -> bool {
        self.is_active && !self.offered_slots.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "cancelled" => AppointmentStatus::Cancelled,
            "completed" => AppointmentStatus::Completed,
            _ => AppointmentStatus::Confirmed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub contact_id: String,
    pub workflow_id: String,
    pub client_id: String,
    pub calendar_event_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_slot_equality_ignores_display_text() {
        let start = Utc.with_ymd_and_hms(2025, 6, 16, 14, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 6, 16, 14, 30, 0).unwrap();
        let a = TimeSlot {
            start,
            end,
            formatted: "Monday at 2:00 PM".to_string(),
        };
        let b = TimeSlot {
            start,
            end,
            formatted: "Mon 2pm".to_string(),
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_default_state_is_idle() {
        let state = BookingState::default();
        assert!(!state.is_active);
        assert!(!state.is_offering());
        assert_eq!(state.offer_attempts, 0);
    }
}
