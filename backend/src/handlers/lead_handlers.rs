use std::sync::Arc;
use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    AppState,
    error::{bad_request, db_error, not_found, ApiResult, ApiError},
    handlers::auth_middleware::AuthUser,
    handlers::campaign_handlers::owned_campaign,
    models::lead_models::{Lead, ReplyIntent},
};

#[derive(Deserialize)]
pub struct ReplyRequest {
    pub content: String,
    pub intent: Option<String>,
}

#[derive(Deserialize)]
pub struct NoteRequest {
    pub content: String,
}

fn owned_lead(state: &AppState, lead_id: i32, user_id: i32) -> Result<Lead, ApiError> {
    state.lead_repository
        .find_for_user(lead_id, user_id)
        .map_err(db_error)?
        .ok_or_else(|| not_found("Lead not found"))
}

pub async fn list_campaign_leads(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Path(campaign_id): Path<i32>,
) -> ApiResult {
    let campaign = owned_campaign(&state, campaign_id, auth_user.user_id)?;
    let leads = state.lead_repository
        .list_for_campaign(campaign.id)
        .map_err(db_error)?;
    Ok(Json(json!({
        "success": true,
        "campaign_id": campaign.id,
        "leads": leads,
    })))
}

pub async fn mark_message_sent(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Path(lead_id): Path<i32>,
) -> ApiResult {
    let lead = owned_lead(&state, lead_id, auth_user.user_id)?;
    let lead = state.lead_repository
        .mark_message_sent(lead.id)
        .map_err(db_error)?;
    Ok(Json(json!({
        "success": true,
        "lead": lead,
    })))
}

pub async fn record_reply(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Path(lead_id): Path<i32>,
    Json(req): Json<ReplyRequest>,
) -> ApiResult {
    if req.content.trim().is_empty() {
        return Err(bad_request("Reply content is required"));
    }
    let intent = req.intent
        .as_deref()
        .map(str::parse::<ReplyIntent>)
        .transpose()
        .map_err(bad_request)?;

    let lead = owned_lead(&state, lead_id, auth_user.user_id)?;
    let lead = state.lead_repository
        .record_reply(lead.id, req.content.trim(), intent)
        .map_err(db_error)?;
    tracing::info!("Recorded reply for lead {} ({:?})", lead.id, intent);
    Ok(Json(json!({
        "success": true,
        "lead": lead,
    })))
}

pub async fn list_notes(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Path(lead_id): Path<i32>,
) -> ApiResult {
    let lead = owned_lead(&state, lead_id, auth_user.user_id)?;
    let notes = state.lead_repository
        .notes(lead.id)
        .map_err(db_error)?;
    Ok(Json(json!({
        "success": true,
        "notes": notes,
    })))
}

pub async fn add_note(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Path(lead_id): Path<i32>,
    Json(req): Json<NoteRequest>,
) -> ApiResult {
    let content = req.content.trim();
    if content.is_empty() {
        return Err(bad_request("Note content is required"));
    }
    let lead = owned_lead(&state, lead_id, auth_user.user_id)?;
    let note = state.lead_repository
        .add_note(lead.id, auth_user.user_id, content)
        .map_err(db_error)?;
    Ok(Json(json!({
        "success": true,
        "note": note,
    })))
}
