pub mod google;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::CalendarConnection;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BusyInterval {
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && self.end > start
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarEvent {
    pub summary: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attendee_email: Option<String>,
    pub attendee_name: Option<String>,
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedEvent {
    pub id: String,
    pub html_link: Option<String>,
}

/// Calendar capability used by the booking flow. Connection lookup and token
/// refresh happen before a provider is called.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    async fn get_free_busy(
        &self,
        connection: &CalendarConnection,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<BusyInterval>>;

    async fn create_event(
        &self,
        connection: &CalendarConnection,
        event: &CalendarEvent,
    ) -> anyhow::Result<CreatedEvent>;

    async fn update_event(
        &self,
        connection: &CalendarConnection,
        event_id: &str,
        event: &CalendarEvent,
    ) -> anyhow::Result<CreatedEvent>;
}
