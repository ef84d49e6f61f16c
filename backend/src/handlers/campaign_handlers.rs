use std::sync::Arc;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    AppState,
    db::now_epoch,
    error::{bad_request, conflict, db_error, error_response, internal_error, not_found, ApiResult, ApiError},
    handlers::auth_middleware::AuthUser,
    models::campaign_models::{
        encode_list, Campaign, CampaignChanges, CampaignResponse, CampaignStatus, NewCampaign,
    },
    utils::enrichment::{run_enrichment, EnrichmentError},
};

pub const DEFAULT_MAX_LEADS: i32 = 25;
pub const MAX_LEADS_LIMIT: i32 = 1000;

#[derive(Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    #[serde(default)]
    pub job_titles: Vec<String>,
    #[serde(default)]
    pub industries: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub company_sizes: Vec<String>,
    #[serde(default)]
    pub message_template: String,
    pub max_leads: Option<i32>,
}

#[derive(Deserialize, Default)]
pub struct UpdateCampaignRequest {
    pub name: Option<String>,
    pub job_titles: Option<Vec<String>>,
    pub industries: Option<Vec<String>>,
    pub locations: Option<Vec<String>>,
    pub company_sizes: Option<Vec<String>>,
    pub message_template: Option<String>,
    pub max_leads: Option<i32>,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

fn validate_max_leads(max_leads: i32) -> Result<i32, ApiError> {
    if (1..=MAX_LEADS_LIMIT).contains(&max_leads) {
        Ok(max_leads)
    } else {
        Err(bad_request(format!("max_leads must be between 1 and {}", MAX_LEADS_LIMIT)))
    }
}

fn validate_name(name: &str) -> Result<String, ApiError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(bad_request("Campaign name is required"));
    }
    if name.len() > 200 {
        return Err(bad_request("Campaign name is too long"));
    }
    Ok(name.to_string())
}

/// Loads a campaign owned by the caller, 404 otherwise.
pub fn owned_campaign(state: &AppState, campaign_id: i32, user_id: i32) -> Result<Campaign, ApiError> {
    state.campaign_repository
        .find_for_user(campaign_id, user_id)
        .map_err(db_error)?
        .ok_or_else(|| not_found("Campaign not found"))
}

fn current_status(campaign: &Campaign) -> Result<CampaignStatus, ApiError> {
    campaign.status().map_err(internal_error)
}

pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Json(req): Json<CreateCampaignRequest>,
) -> ApiResult {
    let name = validate_name(&req.name)?;
    let max_leads = validate_max_leads(req.max_leads.unwrap_or(DEFAULT_MAX_LEADS))?;
    let now = now_epoch();

    let campaign = state.campaign_repository
        .create(NewCampaign {
            user_id: auth_user.user_id,
            name,
            status: CampaignStatus::Draft.to_string(),
            job_titles: encode_list(&req.job_titles),
            industries: encode_list(&req.industries),
            locations: encode_list(&req.locations),
            company_sizes: encode_list(&req.company_sizes),
            message_template: req.message_template,
            max_leads,
            created_at: now,
            updated_at: now,
        })
        .map_err(db_error)?;
    tracing::info!("User {} created campaign {}", auth_user.user_id, campaign.id);

    Ok(Json(json!({
        "success": true,
        "campaign": CampaignResponse::from(campaign),
    })))
}

pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
) -> ApiResult {
    let campaigns: Vec<CampaignResponse> = state.campaign_repository
        .list_for_user(auth_user.user_id)
        .map_err(db_error)?
        .into_iter()
        .map(CampaignResponse::from)
        .collect();
    Ok(Json(json!({
        "success": true,
        "campaigns": campaigns,
    })))
}

pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Path(campaign_id): Path<i32>,
) -> ApiResult {
    let campaign = owned_campaign(&state, campaign_id, auth_user.user_id)?;
    Ok(Json(json!({
        "success": true,
        "campaign": CampaignResponse::from(campaign),
    })))
}

pub async fn update_campaign(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Path(campaign_id): Path<i32>,
    Json(req): Json<UpdateCampaignRequest>,
) -> ApiResult {
    let campaign = owned_campaign(&state, campaign_id, auth_user.user_id)?;
    let status = current_status(&campaign)?;
    if !status.is_editable() {
        return Err(conflict(format!("Campaign cannot be edited while {}", status)));
    }

    let changes = CampaignChanges {
        name: req.name.as_deref().map(validate_name).transpose()?,
        job_titles: req.job_titles.as_deref().map(encode_list),
        industries: req.industries.as_deref().map(encode_list),
        locations: req.locations.as_deref().map(encode_list),
        company_sizes: req.company_sizes.as_deref().map(encode_list),
        message_template: req.message_template,
        max_leads: req.max_leads.map(validate_max_leads).transpose()?,
        updated_at: now_epoch(),
    };

    let updated = state.campaign_repository
        .update(campaign.id, auth_user.user_id, changes)
        .map_err(db_error)?
        .ok_or_else(|| conflict("Campaign changed status and can no longer be edited"))?;
    Ok(Json(json!({
        "success": true,
        "campaign": CampaignResponse::from(updated),
    })))
}

pub async fn delete_campaign(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Path(campaign_id): Path<i32>,
) -> ApiResult {
    let campaign = owned_campaign(&state, campaign_id, auth_user.user_id)?;
    let deleted = state.campaign_repository
        .delete(campaign.id, auth_user.user_id)
        .map_err(db_error)?;
    if !deleted {
        return Err(conflict("Campaign cannot be deleted while enriching"));
    }
    tracing::info!("User {} deleted campaign {}", auth_user.user_id, campaign_id);
    Ok(Json(json!({ "success": true })))
}

/// Starts the lead search for a draft campaign, or retries a failed one.
pub async fn launch_campaign(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Path(campaign_id): Path<i32>,
) -> ApiResult {
    let campaign = owned_campaign(&state, campaign_id, auth_user.user_id)?;
    if campaign.filters().is_empty() {
        return Err(bad_request("Campaign needs at least one targeting filter"));
    }

    let outcome = run_enrichment(
        &state.campaign_repository,
        state.lead_search.as_ref(),
        &campaign,
        state.config.credits_per_lead,
    )
    .await
    .map_err(|e| match e {
        EnrichmentError::NotLaunchable(_) => conflict(e.to_string()),
        EnrichmentError::Budget(_) => bad_request(e.to_string()),
        EnrichmentError::Ledger(_) => internal_error(e),
    })?;

    Ok(Json(json!({
        "success": outcome.error.is_none(),
        "campaign_id": campaign_id,
        "status": outcome.status,
        "leads_generated": outcome.leads_generated,
        "credits_charged": outcome.credits_charged,
        "error": outcome.error,
        "retryable": outcome.retryable,
    })))
}

/// Manual pause, resume and complete.
pub async fn update_campaign_status(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Path(campaign_id): Path<i32>,
    Json(req): Json<StatusRequest>,
) -> ApiResult {
    let target: CampaignStatus = req.status.parse().map_err(|e| bad_request(format!("{}", e)))?;
    if !matches!(target, CampaignStatus::Active | CampaignStatus::Paused | CampaignStatus::Completed) {
        return Err(bad_request(format!(
            "Status '{}' cannot be set directly, use launch to start a lead search",
            target
        )));
    }

    let campaign = owned_campaign(&state, campaign_id, auth_user.user_id)?;
    let from = current_status(&campaign)?;
    let moved = state.campaign_repository
        .transition(campaign.id, from, target)
        .map_err(db_error)?;
    if !moved {
        return Err(error_response(
            StatusCode::CONFLICT,
            format!("Cannot move campaign from {} to {}", from, target),
        ));
    }
    tracing::info!("Campaign {} moved from {} to {}", campaign_id, from, target);

    Ok(Json(json!({
        "success": true,
        "campaign_id": campaign_id,
        "status": target,
    })))
}

pub async fn campaign_stats(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Path(campaign_id): Path<i32>,
) -> ApiResult {
    let campaign = owned_campaign(&state, campaign_id, auth_user.user_id)?;
    let stats = state.lead_repository
        .campaign_stats(campaign.id)
        .map_err(db_error)?;
    Ok(Json(json!({
        "success": true,
        "campaign_id": campaign.id,
        "status": campaign.status,
        "leads_generated": campaign.leads_generated,
        "stats": stats,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_leads_bounds() {
        assert!(validate_max_leads(1).is_ok());
        assert!(validate_max_leads(MAX_LEADS_LIMIT).is_ok());
        assert!(validate_max_leads(0).is_err());
        assert!(validate_max_leads(MAX_LEADS_LIMIT + 1).is_err());
    }

    #[test]
    fn names_are_trimmed_and_required() {
        assert_eq!(validate_name("  Q4 push ").unwrap(), "Q4 push");
        assert!(validate_name("   ").is_err());
    }
}
