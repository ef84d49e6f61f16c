use std::sync::Arc;
use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::{
    AppState,
    api::google_calendar_api::EventRequest,
    db::now_epoch,
    error::{bad_request, conflict, db_error, not_found, ApiResult},
    handlers::auth_middleware::AuthUser,
    handlers::google_calendar::{calendar_error, create_event, delete_event, fetch_busy},
    models::meeting_models::{MeetingStatus, NewMeeting},
    utils::scheduling::{is_free, validate_duration, TimeSlot},
};

#[derive(Deserialize)]
pub struct CreateMeetingRequest {
    pub lead_id: i32,
    pub start: DateTime<Utc>,
    pub duration_minutes: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct MeetingStatusRequest {
    pub status: String,
}

/// Books a meeting with a lead: re-checks the slot against the calendar,
/// creates the event with a Meet link, then records it.
pub async fn create_meeting(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Json(req): Json<CreateMeetingRequest>,
) -> ApiResult {
    let duration = req.duration_minutes.unwrap_or(30);
    validate_duration(duration).map_err(|e| bad_request(e.to_string()))?;
    if req.start < Utc::now() {
        return Err(bad_request("Meeting start is in the past"));
    }

    let lead = state.lead_repository
        .find_for_user(req.lead_id, auth_user.user_id)
        .map_err(db_error)?
        .ok_or_else(|| not_found("Lead not found"))?;

    let slot = TimeSlot {
        start: req.start,
        end: req.start + Duration::minutes(duration),
    };
    let busy = fetch_busy(&state, auth_user.user_id, slot.start, slot.end)
        .await
        .map_err(calendar_error)?;
    if !is_free(&slot, &busy) {
        tracing::info!("Slot {} for lead {} is no longer free", slot.start, lead.id);
        return Err(conflict("Requested time is no longer available"));
    }

    let event = EventRequest {
        summary: req.title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("Meeting with {}", lead.full_name)),
        description: req.description,
        start: slot.start,
        end: slot.end,
        attendee_email: lead.email.clone(),
    };
    let created = create_event(&state, auth_user.user_id, &event)
        .await
        .map_err(calendar_error)?;

    let recorded = state.meeting_repository
        .create(NewMeeting {
            user_id: auth_user.user_id,
            lead_id: lead.id,
            campaign_id: lead.campaign_id,
            scheduled_at: slot.start.timestamp() as i32,
            duration_minutes: duration as i32,
            calendar_event_id: Some(created.id.clone()),
            meeting_link: created.meeting_link.clone(),
            status: MeetingStatus::Scheduled.to_string(),
            created_at: now_epoch(),
        });
    let meeting = match recorded {
        Ok(meeting) => meeting,
        Err(e) => {
            // invites already went out, take the event back down
            tracing::error!(
                "Failed to record meeting for calendar event {} (lead {}): {}",
                created.id, lead.id, e
            );
            if let Err(delete_err) = delete_event(&state, auth_user.user_id, &created.id).await {
                tracing::error!("Calendar event {} left without a meeting: {}", created.id, delete_err);
            }
            return Err(db_error(e));
        }
    };
    tracing::info!("Booked meeting {} with lead {}", meeting.id, lead.id);

    Ok(Json(json!({
        "success": true,
        "meeting": meeting,
        "event_link": created.html_link,
    })))
}

pub async fn list_meetings(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
) -> ApiResult {
    let meetings = state.meeting_repository
        .list_for_user(auth_user.user_id)
        .map_err(db_error)?;
    Ok(Json(json!({
        "success": true,
        "meetings": meetings,
    })))
}

pub async fn update_meeting_status(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Path(meeting_id): Path<i32>,
    Json(req): Json<MeetingStatusRequest>,
) -> ApiResult {
    let status: MeetingStatus = req.status.parse().map_err(bad_request)?;
    let meeting = state.meeting_repository
        .find_for_user(meeting_id, auth_user.user_id)
        .map_err(db_error)?
        .ok_or_else(|| not_found("Meeting not found"))?;

    let updated = state.meeting_repository
        .update_status(meeting.id, status)
        .map_err(db_error)?;
    tracing::info!("Meeting {} is now {}", updated.id, status);
    Ok(Json(json!({
        "success": true,
        "meeting": updated,
    })))
}
