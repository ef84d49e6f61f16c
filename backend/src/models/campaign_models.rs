use std::fmt;
use std::str::FromStr;

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use crate::schema::campaigns;

/// Lifecycle of a campaign.
///
/// `draft` and `failed` campaigns can be launched into `enriching`; the lead
/// search outcome then moves them to `active` or `failed`. From `active` the
/// owner may pause, resume and finally complete the campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Enriching,
    Active,
    Failed,
    Completed,
    Paused,
}

impl CampaignStatus {
    pub const ALL: [CampaignStatus; 6] = [
        CampaignStatus::Draft,
        CampaignStatus::Enriching,
        CampaignStatus::Active,
        CampaignStatus::Failed,
        CampaignStatus::Completed,
        CampaignStatus::Paused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Enriching => "enriching",
            CampaignStatus::Active => "active",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Paused => "paused",
        }
    }

    pub fn can_transition_to(self, next: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, next),
            (Draft, Enriching)
                | (Failed, Enriching)
                | (Enriching, Active)
                | (Enriching, Failed)
                | (Active, Paused)
                | (Active, Completed)
                | (Paused, Active)
                | (Paused, Completed)
        )
    }

    /// Whether a lead search may be started from this status.
    pub fn is_launchable(self) -> bool {
        self.can_transition_to(CampaignStatus::Enriching)
    }

    /// Targeting and template may only change while no leads are being worked.
    pub fn is_editable(self) -> bool {
        matches!(self, CampaignStatus::Draft | CampaignStatus::Failed | CampaignStatus::Paused)
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for CampaignStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CampaignStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = campaigns)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Campaign {
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub status: String,
    pub job_titles: String, // json array of strings
    pub industries: String, // json array of strings
    pub locations: String, // json array of strings
    pub company_sizes: String, // json array of strings
    pub message_template: String,
    pub max_leads: i32,
    pub leads_generated: i32,
    pub credits_reserved: i32, // credits held while a lead search is in flight
    pub last_error: Option<String>,
    pub retryable: bool,
    pub created_at: i32,
    pub updated_at: i32,
}

impl Campaign {
    pub fn status(&self) -> Result<CampaignStatus, UnknownStatus> {
        self.status.parse()
    }

    pub fn filters(&self) -> CampaignFilters {
        CampaignFilters {
            job_titles: decode_list(&self.job_titles),
            industries: decode_list(&self.industries),
            locations: decode_list(&self.locations),
            company_sizes: decode_list(&self.company_sizes),
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = campaigns)]
pub struct NewCampaign {
    pub user_id: i32,
    pub name: String,
    pub status: String,
    pub job_titles: String,
    pub industries: String,
    pub locations: String,
    pub company_sizes: String,
    pub message_template: String,
    pub max_leads: i32,
    pub created_at: i32,
    pub updated_at: i32,
}

#[derive(AsChangeset)]
#[diesel(table_name = campaigns)]
pub struct CampaignChanges {
    pub name: Option<String>,
    pub job_titles: Option<String>,
    pub industries: Option<String>,
    pub locations: Option<String>,
    pub company_sizes: Option<String>,
    pub message_template: Option<String>,
    pub max_leads: Option<i32>,
    pub updated_at: i32,
}

/// Lead targeting, stored as json text columns on the campaign row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignFilters {
    #[serde(default)]
    pub job_titles: Vec<String>,
    #[serde(default)]
    pub industries: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub company_sizes: Vec<String>,
}

impl CampaignFilters {
    pub fn is_empty(&self) -> bool {
        self.job_titles.is_empty()
            && self.industries.is_empty()
            && self.locations.is_empty()
            && self.company_sizes.is_empty()
    }
}

pub fn encode_list(values: &[String]) -> String {
    let cleaned: Vec<&str> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect();
    serde_json::to_string(&cleaned).unwrap_or_else(|_| "[]".to_string())
}

fn decode_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

#[derive(Serialize, Debug)]
pub struct CampaignResponse {
    pub id: i32,
    pub name: String,
    pub status: String,
    #[serde(flatten)]
    pub filters: CampaignFilters,
    pub message_template: String,
    pub max_leads: i32,
    pub leads_generated: i32,
    pub credits_reserved: i32,
    pub last_error: Option<String>,
    pub retryable: bool,
    pub created_at: i32,
    pub updated_at: i32,
}

impl From<Campaign> for CampaignResponse {
    fn from(campaign: Campaign) -> Self {
        let filters = campaign.filters();
        CampaignResponse {
            id: campaign.id,
            name: campaign.name,
            status: campaign.status,
            filters,
            message_template: campaign.message_template,
            max_leads: campaign.max_leads,
            leads_generated: campaign.leads_generated,
            credits_reserved: campaign.credits_reserved,
            last_error: campaign.last_error,
            retryable: campaign.retryable,
            created_at: campaign.created_at,
            updated_at: campaign.updated_at,
        }
    }
}
