//! Google Calendar API v3: free/busy lookup and event writes.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;

use super::{BusyInterval, CalendarEvent, CalendarProvider, CreatedEvent};
use crate::models::CalendarConnection;

const API_BASE: &str = "https://www.googleapis.com/calendar/v3";

pub struct GoogleCalendarProvider {
    base_url: String,
    client: reqwest::Client,
}

impl Default for GoogleCalendarProvider {
    fn default() -> Self {
        Self::new(API_BASE.to_string())
    }
}

impl GoogleCalendarProvider {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    fn events_url(&self, calendar_id: &str, event_id: Option<&str>) -> anyhow::Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url).context("invalid calendar base url")?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow::anyhow!("calendar base url cannot be a base"))?;
            segments.push("calendars").push(calendar_id).push("events");
            if let Some(id) = event_id {
                segments.push(id);
            }
        }
        url.query_pairs_mut().append_pair("sendUpdates", "all");
        Ok(url)
    }
}

#[derive(Debug, Deserialize)]
struct FreeBusyResponse {
    #[serde(default)]
    calendars: std::collections::HashMap<String, FreeBusyCalendar>,
}

#[derive(Debug, Deserialize)]
struct FreeBusyCalendar {
    #[serde(default)]
    busy: Vec<BusyRaw>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BusyRaw {
    start: String,
    end: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventResponse {
    id: String,
    html_link: Option<String>,
}

fn rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn event_body(event: &CalendarEvent) -> serde_json::Value {
    let tz = event.time_zone.clone().unwrap_or_else(|| "UTC".to_string());
    let mut body = json!({
        "summary": event.summary,
        "description": event.description,
        "start": { "dateTime": rfc3339(event.start), "timeZone": tz },
        "end": { "dateTime": rfc3339(event.end), "timeZone": tz },
    });
    if let Some(email) = &event.attendee_email {
        body["attendees"] = json!([{
            "email": email,
            "displayName": event.attendee_name,
        }]);
    }
    body
}

fn parse_busy(calendar_id: &str, data: FreeBusyResponse) -> anyhow::Result<Vec<BusyInterval>> {
    let calendar = data
        .calendars
        .get(calendar_id)
        .ok_or_else(|| anyhow::anyhow!("calendar {calendar_id} missing from free/busy response"))?;
    if !calendar.errors.is_empty() {
        anyhow::bail!("free/busy errors for {calendar_id}: {:?}", calendar.errors);
    }

    calendar
        .busy
        .iter()
        .map(|b| {
            Ok(BusyInterval {
                start: DateTime::parse_from_rfc3339(&b.start)
                    .with_context(|| format!("invalid busy start: {}", b.start))?
                    .with_timezone(&Utc),
                end: DateTime::parse_from_rfc3339(&b.end)
                    .with_context(|| format!("invalid busy end: {}", b.end))?
                    .with_timezone(&Utc),
            })
        })
        .collect()
}

#[async_trait]
impl CalendarProvider for GoogleCalendarProvider {
    async fn get_free_busy(
        &self,
        connection: &CalendarConnection,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<BusyInterval>> {
        let body = json!({
            "timeMin": rfc3339(start),
            "timeMax": rfc3339(end),
            "items": [{ "id": connection.calendar_id }],
        });

        let data: FreeBusyResponse = self
            .client
            .post(format!("{}/freeBusy", self.base_url))
            .bearer_auth(&connection.access_token)
            .json(&body)
            .send()
            .await
            .context("failed to call Google free/busy")?
            .error_for_status()
            .context("Google free/busy returned error")?
            .json()
            .await
            .context("failed to parse free/busy response")?;

        parse_busy(&connection.calendar_id, data)
    }

    async fn create_event(
        &self,
        connection: &CalendarConnection,
        event: &CalendarEvent,
    ) -> anyhow::Result<CreatedEvent> {
        let created: EventResponse = self
            .client
            .post(self.events_url(&connection.calendar_id, None)?)
            .bearer_auth(&connection.access_token)
            .json(&event_body(event))
            .send()
            .await
            .context("failed to create Google Calendar event")?
            .error_for_status()
            .context("Google Calendar rejected event")?
            .json()
            .await
            .context("failed to parse created event")?;

        Ok(CreatedEvent {
            id: created.id,
            html_link: created.html_link,
        })
    }

    async fn update_event(
        &self,
        connection: &CalendarConnection,
        event_id: &str,
        event: &CalendarEvent,
    ) -> anyhow::Result<CreatedEvent> {
        let updated: EventResponse = self
            .client
            .patch(self.events_url(&connection.calendar_id, Some(event_id))?)
            .bearer_auth(&connection.access_token)
            .json(&event_body(event))
            .send()
            .await
            .context("failed to update Google Calendar event")?
            .error_for_status()
            .context("Google Calendar rejected event update")?
            .json()
            .await
            .context("failed to parse updated event")?;

        Ok(CreatedEvent {
            id: updated.id,
            html_link: updated.html_link,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_busy() {
        let data: FreeBusyResponse = serde_json::from_str(
            r#"{"calendars":{"team@example.com":{"busy":[{"start":"2025-06-16T14:00:00Z","end":"2025-06-16T15:00:00+00:00"}]}}}"#,
        )
        .unwrap();
        let busy = parse_busy("team@example.com", data).unwrap();
        assert_eq!(busy.len(), 1);
        assert_eq!(busy[0].start, Utc.with_ymd_and_hms(2025, 6, 16, 14, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_busy_reports_calendar_errors() {
        let data: FreeBusyResponse = serde_json::from_str(
            r#"{"calendars":{"x":{"busy":[],"errors":[{"reason":"notFound"}]}}}"#,
        )
        .unwrap();
        assert!(parse_busy("x", data).is_err());
    }

    #[test]
    fn test_event_body_with_attendee() {
        let event = CalendarEvent {
            summary: "Intro call".into(),
            description: "Booked via SMS".into(),
            start: Utc.with_ymd_and_hms(2025, 6, 16, 14, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 6, 16, 14, 30, 0).unwrap(),
            attendee_email: Some("lead@example.com".into()),
            attendee_name: Some("Dana".into()),
            time_zone: Some("America/Chicago".into()),
        };
        let body = event_body(&event);
        assert_eq!(body["start"]["dateTime"], "2025-06-16T14:00:00Z");
        assert_eq!(body["start"]["timeZone"], "America/Chicago");
        assert_eq!(body["attendees"][0]["email"], "lead@example.com");
    }

    #[test]
    fn test_events_url() {
        let provider = GoogleCalendarProvider::default();
        let url = provider.events_url("team@example.com", Some("evt1")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.googleapis.com/calendar/v3/calendars/team@example.com/events/evt1?sendUpdates=all"
        );
    }
}
