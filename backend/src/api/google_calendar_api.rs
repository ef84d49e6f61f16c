use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::utils::scheduling::TimeSlot;

#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("No Google Calendar connection found")]
    NoConnection,
    #[error("Google rejected the access token")]
    Unauthorized,
    #[error("Token error: {0}")]
    TokenError(String),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Event to create on the user's primary calendar.
#[derive(Debug, Clone)]
pub struct EventRequest {
    pub summary: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attendee_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedEvent {
    pub id: String,
    pub html_link: Option<String>,
    pub meeting_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FreeBusyResponse {
    #[serde(default)]
    calendars: HashMap<String, FreeBusyCalendar>,
}

#[derive(Debug, Deserialize)]
struct FreeBusyCalendar {
    #[serde(default)]
    busy: Vec<TimeSlot>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventResponse {
    id: String,
    html_link: Option<String>,
    hangout_link: Option<String>,
    conference_data: Option<ConferenceData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConferenceData {
    #[serde(default)]
    entry_points: Vec<EntryPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryPoint {
    entry_point_type: String,
    uri: String,
}

impl EventResponse {
    fn into_created(self) -> CreatedEvent {
        let video = self.conference_data.and_then(|data| {
            data.entry_points
                .into_iter()
                .find(|entry| entry.entry_point_type == "video")
                .map(|entry| entry.uri)
        });
        CreatedEvent {
            id: self.id,
            html_link: self.html_link,
            meeting_link: self.hangout_link.or(video),
        }
    }
}

/// Thin client over the Calendar v3 REST API. Callers own token refresh:
/// a 401 surfaces as `CalendarError::Unauthorized`.
pub struct GoogleCalendarApi {
    client: reqwest::Client,
    base_url: String,
}

impl GoogleCalendarApi {
    pub fn new(base_url: &str) -> Result<Self, CalendarError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CalendarError::ApiError(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Busy intervals of the primary calendar inside `[time_min, time_max)`.
    pub async fn free_busy(
        &self,
        access_token: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<TimeSlot>, CalendarError> {
        tracing::debug!("Querying free/busy from {} to {}", time_min, time_max);
        let body = json!({
            "timeMin": time_min.to_rfc3339(),
            "timeMax": time_max.to_rfc3339(),
            "timeZone": "UTC",
            "items": [{"id": "primary"}],
        });

        let response = self.client
            .post(format!("{}/freeBusy", self.base_url))
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CalendarError::ApiError(e.to_string()))?;
        let response = check_status(response, "free/busy query").await?;

        let parsed: FreeBusyResponse = response
            .json()
            .await
            .map_err(|e| CalendarError::ParseError(e.to_string()))?;

        let mut busy = Vec::new();
        for (calendar_id, calendar) in parsed.calendars {
            if !calendar.errors.is_empty() {
                return Err(CalendarError::ApiError(format!(
                    "free/busy failed for calendar {}: {:?}",
                    calendar_id, calendar.errors
                )));
            }
            busy.extend(calendar.busy);
        }
        busy.sort_by_key(|slot| slot.start);
        Ok(busy)
    }

    /// Inserts an event on the primary calendar with a Google Meet link.
    pub async fn insert_event(
        &self,
        access_token: &str,
        event: &EventRequest,
    ) -> Result<CreatedEvent, CalendarError> {
        let mut body = json!({
            "summary": event.summary,
            "start": {"dateTime": event.start.to_rfc3339(), "timeZone": "UTC"},
            "end": {"dateTime": event.end.to_rfc3339(), "timeZone": "UTC"},
            "conferenceData": {
                "createRequest": {
                    "requestId": Uuid::new_v4().to_string(),
                    "conferenceSolutionKey": {"type": "hangoutsMeet"}
                }
            },
        });
        if let Some(description) = &event.description {
            body["description"] = json!(description);
        }
        if let Some(email) = &event.attendee_email {
            body["attendees"] = json!([{"email": email}]);
        }

        let response = self.client
            .post(format!("{}/calendars/primary/events", self.base_url))
            .query(&[("conferenceDataVersion", "1"), ("sendUpdates", "all")])
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CalendarError::ApiError(e.to_string()))?;
        let response = check_status(response, "event insert").await?;

        let created: EventResponse = response
            .json()
            .await
            .map_err(|e| CalendarError::ParseError(e.to_string()))?;
        tracing::info!("Created calendar event {}", created.id);
        Ok(created.into_created())
    }

    /// Deletes an event and notifies its attendees. An event that is
    /// already gone counts as deleted.
    pub async fn delete_event(&self, access_token: &str, event_id: &str) -> Result<(), CalendarError> {
        let response = self.client
            .delete(format!("{}/calendars/primary/events/{}", self.base_url, event_id))
            .query(&[("sendUpdates", "all")])
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(|e| CalendarError::ApiError(e.to_string()))?;
        if matches!(response.status().as_u16(), 404 | 410) {
            tracing::info!("Calendar event {} was already deleted", event_id);
            return Ok(());
        }
        check_status(response, "event delete").await?;
        tracing::info!("Deleted calendar event {}", event_id);
        Ok(())
    }
}

async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response, CalendarError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(CalendarError::Unauthorized);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!("Google Calendar {} failed with {}: {}", what, status, body);
        return Err(CalendarError::ApiError(format!("{} failed: {}", what, status)));
    }
    Ok(response)
}
