use std::fmt;
use std::str::FromStr;

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use crate::schema::{google_calendar, meetings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
}

impl MeetingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingStatus::Scheduled => "scheduled",
            MeetingStatus::Completed => "completed",
            MeetingStatus::Cancelled => "cancelled",
            MeetingStatus::NoShow => "no_show",
        }
    }
}

impl fmt::Display for MeetingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeetingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(MeetingStatus::Scheduled),
            "completed" => Ok(MeetingStatus::Completed),
            "cancelled" => Ok(MeetingStatus::Cancelled),
            "no_show" => Ok(MeetingStatus::NoShow),
            other => Err(format!("unknown meeting status '{}'", other)),
        }
    }
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = meetings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Meeting {
    pub id: i32,
    pub user_id: i32,
    pub lead_id: i32,
    pub campaign_id: i32,
    pub scheduled_at: i32, // epoch seconds, start of the meeting
    pub duration_minutes: i32,
    pub calendar_event_id: Option<String>,
    pub meeting_link: Option<String>,
    pub status: String,
    pub created_at: i32,
}

#[derive(Insertable)]
#[diesel(table_name = meetings)]
pub struct NewMeeting {
    pub user_id: i32,
    pub lead_id: i32,
    pub campaign_id: i32,
    pub scheduled_at: i32,
    pub duration_minutes: i32,
    pub calendar_event_id: Option<String>,
    pub meeting_link: Option<String>,
    pub status: String,
    pub created_at: i32,
}

/// The encrypted token pair of a calendar connection.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = google_calendar)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct GoogleCalendarTokens {
    pub encrypted_access_token: String,
    pub encrypted_refresh_token: String,
}

#[derive(Insertable)]
#[diesel(table_name = google_calendar)]
pub struct NewGoogleCalendar {
    pub user_id: i32,
    pub encrypted_access_token: String,
    pub encrypted_refresh_token: String,
    pub status: String,
    pub expires_in: i32,
    pub last_update: i32,
    pub created_on: i32,
}
