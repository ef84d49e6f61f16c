use serde::Serialize;

use crate::{
    api::lix::{LeadRecord, LeadSearch, LeadSearchQuery},
    db::{now_epoch, DbError},
    models::campaign_models::{Campaign, CampaignStatus},
    models::lead_models::NewLead,
    repositories::campaign_repository::{CampaignRepository, LaunchStart},
    repositories::credit_repository::LedgerError,
    utils::usage::{charge_for, reservation_for},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentOutcome {
    pub status: CampaignStatus,
    pub leads_generated: i32,
    pub credits_charged: i32,
    pub error: Option<String>,
    pub retryable: bool,
}

impl EnrichmentOutcome {
    fn failed(error: String, retryable: bool) -> Self {
        EnrichmentOutcome {
            status: CampaignStatus::Failed,
            leads_generated: 0,
            credits_charged: 0,
            error: Some(error),
            retryable,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("Campaign cannot be launched from status '{0}'")]
    NotLaunchable(String),
    #[error("{0}")]
    Budget(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<DbError> for EnrichmentError {
    fn from(e: DbError) -> Self {
        EnrichmentError::Ledger(LedgerError::Db(e))
    }
}

fn to_new_lead(campaign_id: i32, record: LeadRecord, created_at: i32) -> Option<NewLead> {
    let full_name = record.display_name()?;
    Some(NewLead {
        campaign_id,
        first_name: record.first_name,
        last_name: record.last_name,
        full_name,
        job_title: record.job_title,
        company: record.company,
        industry: record.industry,
        location: record.location,
        linkedin_url: record.linkedin_url,
        email: record.email,
        created_at,
    })
}

/// Launches (or relaunches) a campaign: reserve credits, search leads,
/// then settle. The campaign always leaves `enriching` before this returns,
/// unless the settling write itself fails and so does the fallback.
pub async fn run_enrichment(
    campaigns: &CampaignRepository,
    lead_search: &dyn LeadSearch,
    campaign: &Campaign,
    credits_per_lead: i32,
) -> Result<EnrichmentOutcome, EnrichmentError> {
    let status = campaign
        .status()
        .map_err(|e| EnrichmentError::NotLaunchable(e.0))?;
    if !status.is_launchable() {
        return Err(EnrichmentError::NotLaunchable(status.to_string()));
    }
    let reservation = reservation_for(campaign.max_leads, credits_per_lead)
        .map_err(EnrichmentError::Budget)?;

    let reserved = match campaigns.begin_enrichment(campaign, status, reservation)? {
        LaunchStart::Reserved(reserved) => reserved,
        LaunchStart::InsufficientCredits { available, required } => {
            tracing::info!(
                "Campaign {} needs {} credits, user has {}",
                campaign.id, required, available
            );
            return Ok(EnrichmentOutcome::failed(
                format!("Insufficient credits: {} available, {} required", available, required),
                true,
            ));
        }
        LaunchStart::NotLaunchable => {
            return Err(EnrichmentError::NotLaunchable(status.to_string()));
        }
    };
    tracing::info!("Campaign {} enriching with {} credits reserved", reserved.id, reservation);

    let query = LeadSearchQuery::from_filters(&reserved.filters(), reserved.max_leads);
    let records = match lead_search.search_people(&query).await {
        Ok(records) => records,
        Err(e) => {
            let retryable = e.is_retryable();
            tracing::error!("Lead search failed for campaign {}: {}", reserved.id, e);
            campaigns.fail_enrichment(reserved.id, &e.to_string(), retryable)?;
            return Ok(EnrichmentOutcome::failed(e.to_string(), retryable));
        }
    };

    let created_at = now_epoch();
    let leads: Vec<NewLead> = records
        .into_iter()
        .filter_map(|record| to_new_lead(reserved.id, record, created_at))
        .take(reserved.max_leads.max(0) as usize)
        .collect();
    let found = leads.len() as i32;

    match campaigns.complete_enrichment(&reserved, leads, credits_per_lead) {
        Ok(Some(active)) => {
            tracing::info!("Campaign {} active with {} leads", active.id, active.leads_generated);
            Ok(EnrichmentOutcome {
                status: CampaignStatus::Active,
                leads_generated: found,
                credits_charged: charge_for(found, credits_per_lead, reservation),
                error: None,
                retryable: false,
            })
        }
        Ok(None) => {
            // Someone else (the stale sweeper) already settled this launch.
            tracing::warn!("Campaign {} left enriching before its results were stored", reserved.id);
            let current = campaigns.find_by_id(reserved.id)?;
            let error = current
                .as_ref()
                .and_then(|c| c.last_error.clone())
                .unwrap_or_else(|| "Enrichment was interrupted".to_string());
            let retryable = current.map(|c| c.retryable).unwrap_or(true);
            Ok(EnrichmentOutcome::failed(error, retryable))
        }
        Err(e) => {
            tracing::error!("Failed to store leads for campaign {}: {}", reserved.id, e);
            if let Err(fail_err) = campaigns.fail_enrichment(
                reserved.id,
                &format!("Failed to store leads: {}", e),
                true,
            ) {
                tracing::error!("Could not mark campaign {} failed: {}", reserved.id, fail_err);
            }
            Err(e.into())
        }
    }
}
