use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::{Deserialize, Serialize};

use crate::models::campaign_models::CampaignFilters;

/// Targeting sent to the lead search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadSearchQuery {
    pub job_titles: Vec<String>,
    pub industries: Vec<String>,
    pub locations: Vec<String>,
    pub company_sizes: Vec<String>,
    pub count: i32,
    pub start: i32,
}

impl LeadSearchQuery {
    pub fn from_filters(filters: &CampaignFilters, count: i32) -> Self {
        LeadSearchQuery {
            job_titles: filters.job_titles.clone(),
            industries: filters.industries.clone(),
            locations: filters.locations.clone(),
            company_sizes: filters.company_sizes.clone(),
            count,
            start: 0,
        }
    }
}

/// One person as returned by Lix.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadRecord {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default, alias = "name")]
    pub full_name: Option<String>,
    #[serde(default, alias = "headline", alias = "title")]
    pub job_title: Option<String>,
    #[serde(default, alias = "companyName")]
    pub company: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default, alias = "locationName")]
    pub location: Option<String>,
    #[serde(default, alias = "link", alias = "profileUrl")]
    pub linkedin_url: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl LeadRecord {
    /// Best display name: explicit full name, else first + last.
    pub fn display_name(&self) -> Option<String> {
        if let Some(name) = self.full_name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            return Some(name.to_string());
        }
        let joined = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if joined.is_empty() { None } else { Some(joined) }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default, alias = "leads", alias = "people")]
    results: Vec<LeadRecord>,
}

#[derive(Debug, thiserror::Error)]
pub enum LixError {
    #[error("Lead search timed out after {0} seconds")]
    Timeout(u64),
    #[error("Lead search request failed: {0}")]
    Transport(String),
    #[error("Lead search returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Could not parse lead search response: {0}")]
    Parse(String),
}

impl LixError {
    /// Whether repeating the same search later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LixError::Timeout(_) | LixError::Transport(_) => true,
            LixError::Status { status, .. } => *status == 429 || *status >= 500,
            LixError::Parse(_) => false,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LeadSearch: Send + Sync {
    async fn search_people(&self, query: &LeadSearchQuery) -> Result<Vec<LeadRecord>, LixError>;
}

pub struct LixClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout_secs: u64,
}

impl LixClient {
    pub fn new(api_key: String, base_url: String, timeout_secs: u64) -> Result<Self, LixError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LixError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs,
        })
    }
}

impl LixClient {
    fn request_error(&self, e: reqwest::Error) -> LixError {
        if e.is_timeout() {
            LixError::Timeout(self.timeout_secs)
        } else {
            LixError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl LeadSearch for LixClient {
    async fn search_people(&self, query: &LeadSearchQuery) -> Result<Vec<LeadRecord>, LixError> {
        tracing::info!(
            "Searching leads: {} titles, {} industries, {} locations, count {}",
            query.job_titles.len(), query.industries.len(), query.locations.len(), query.count
        );

        let response = self.client
            .post(format!("{}/v1/search/people", self.base_url))
            .header(AUTHORIZATION, &self.api_key)
            .header(ACCEPT, "application/json")
            .json(query)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Lead search failed with {}: {}", status, body);
            return Err(LixError::Status { status: status.as_u16(), body });
        }

        // the timeout also covers the body, so read it before decoding
        let body = response.bytes().await.map_err(|e| self.request_error(e))?;
        let parsed: SearchResponse = serde_json::from_slice(&body)
            .map_err(|e| LixError::Parse(e.to_string()))?;
        tracing::info!("Lead search returned {} people", parsed.results.len());
        Ok(parsed.results)
    }
}
