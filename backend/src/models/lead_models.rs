use std::fmt;
use std::str::FromStr;

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use crate::schema::{lead_notes, linkedin_leads};

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = linkedin_leads)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Lead {
    pub id: i32,
    pub campaign_id: i32,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: String,
    pub job_title: Option<String>,
    pub company: Option<String>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub linkedin_url: Option<String>,
    pub email: Option<String>,
    pub message_sent: bool,
    pub message_sent_at: Option<i32>,
    pub replied: bool,
    pub reply_content: Option<String>,
    pub replied_at: Option<i32>,
    pub intent: Option<String>,
    pub meeting_scheduled: bool,
    pub created_at: i32,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = linkedin_leads)]
pub struct NewLead {
    pub campaign_id: i32,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: String,
    pub job_title: Option<String>,
    pub company: Option<String>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub linkedin_url: Option<String>,
    pub email: Option<String>,
    pub created_at: i32,
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = lead_notes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct LeadNote {
    pub id: i32,
    pub lead_id: i32,
    pub user_id: i32,
    pub content: String,
    pub created_at: i32,
}

#[derive(Insertable)]
#[diesel(table_name = lead_notes)]
pub struct NewLeadNote {
    pub lead_id: i32,
    pub user_id: i32,
    pub content: String,
    pub created_at: i32,
}

/// How a lead's reply was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyIntent {
    Interested,
    NotInterested,
    MeetingRequest,
    OutOfOffice,
    Referral,
    Other,
}

impl ReplyIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyIntent::Interested => "interested",
            ReplyIntent::NotInterested => "not_interested",
            ReplyIntent::MeetingRequest => "meeting_request",
            ReplyIntent::OutOfOffice => "out_of_office",
            ReplyIntent::Referral => "referral",
            ReplyIntent::Other => "other",
        }
    }

    /// Intents counted as a positive response in campaign stats.
    pub fn is_positive(&self) -> bool {
        matches!(self, ReplyIntent::Interested | ReplyIntent::MeetingRequest)
    }
}

impl fmt::Display for ReplyIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplyIntent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interested" => Ok(ReplyIntent::Interested),
            "not_interested" => Ok(ReplyIntent::NotInterested),
            "meeting_request" => Ok(ReplyIntent::MeetingRequest),
            "out_of_office" => Ok(ReplyIntent::OutOfOffice),
            "referral" => Ok(ReplyIntent::Referral),
            "other" => Ok(ReplyIntent::Other),
            other => Err(format!("unknown reply intent '{}'", other)),
        }
    }
}
