use std::sync::Arc;
use crate::handlers::auth_middleware::AuthUser;
use axum::{
    extract::{State, Query},
    response::Json,
    http::StatusCode,
};
use serde_json::json;
use serde::Deserialize;
use oauth2::TokenResponse;
use chrono::{DateTime, Utc};

use crate::{
    AppState,
    api::google_calendar_api::{CalendarError, CreatedEvent, EventRequest},
    error::{bad_request, error_response, ApiError, ApiResult},
    handlers::google_calendar_auth::oauth_http_client,
    utils::scheduling::{generate_slots, validate_duration, validate_range, SlotOptions, TimeSlot},
};

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_minutes: Option<i64>,
}

pub fn calendar_error(e: CalendarError) -> ApiError {
    tracing::error!("Calendar error: {}", e);
    let status = match e {
        CalendarError::NoConnection => StatusCode::BAD_REQUEST,
        CalendarError::Unauthorized | CalendarError::TokenError(_) => StatusCode::UNAUTHORIZED,
        CalendarError::ApiError(_) | CalendarError::ParseError(_) => StatusCode::BAD_GATEWAY,
    };
    error_response(status, e.to_string())
}

fn stored_tokens(state: &AppState, user_id: i32) -> Result<(String, String), CalendarError> {
    match state.calendar_repository.get_google_calendar_tokens(user_id) {
        Ok(Some(tokens)) => Ok(tokens),
        Ok(None) => Err(CalendarError::NoConnection),
        Err(e) => Err(CalendarError::TokenError(format!("Failed to load tokens: {}", e))),
    }
}

/// Exchanges the refresh token for a new access token and stores it.
async fn refresh_access_token(
    state: &AppState,
    user_id: i32,
    refresh_token: &str,
) -> Result<String, CalendarError> {
    tracing::info!("Refreshing Google access token for user {}", user_id);
    let http_client = oauth_http_client()
        .map_err(|e| CalendarError::TokenError(e.to_string()))?;

    let token_result = state
        .oauth_client
        .exchange_refresh_token(&oauth2::RefreshToken::new(refresh_token.to_string()))
        .request_async(&http_client)
        .await
        .map_err(|e| CalendarError::TokenError(e.to_string()))?;

    let access_token = token_result.access_token().secret().to_string();
    let expires_in = token_result.expires_in().unwrap_or_default().as_secs() as i32;

    state.calendar_repository
        .update_google_calendar_access_token(user_id, &access_token, expires_in)
        .map_err(|e| CalendarError::TokenError(e.to_string()))?;
    Ok(access_token)
}

/// Busy intervals from the user's primary calendar, refreshing the token once on 401.
pub async fn fetch_busy(
    state: &AppState,
    user_id: i32,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<TimeSlot>, CalendarError> {
    let (access_token, refresh_token) = stored_tokens(state, user_id)?;
    match state.calendar_api.free_busy(&access_token, start, end).await {
        Err(CalendarError::Unauthorized) => {
            let access_token = refresh_access_token(state, user_id, &refresh_token).await?;
            state.calendar_api.free_busy(&access_token, start, end).await
        }
        other => other,
    }
}

/// Creates an event on the user's primary calendar, refreshing the token once on 401.
pub async fn create_event(
    state: &AppState,
    user_id: i32,
    event: &EventRequest,
) -> Result<CreatedEvent, CalendarError> {
    let (access_token, refresh_token) = stored_tokens(state, user_id)?;
    match state.calendar_api.insert_event(&access_token, event).await {
        Err(CalendarError::Unauthorized) => {
            let access_token = refresh_access_token(state, user_id, &refresh_token).await?;
            state.calendar_api.insert_event(&access_token, event).await
        }
        other => other,
    }
}

/// Deletes an event from the user's primary calendar, refreshing the token once on 401.
pub async fn delete_event(
    state: &AppState,
    user_id: i32,
    event_id: &str,
) -> Result<(), CalendarError> {
    let (access_token, refresh_token) = stored_tokens(state, user_id)?;
    match state.calendar_api.delete_event(&access_token, event_id).await {
        Err(CalendarError::Unauthorized) => {
            let access_token = refresh_access_token(state, user_id, &refresh_token).await?;
            state.calendar_api.delete_event(&access_token, event_id).await
        }
        other => other,
    }
}

pub async fn get_availability(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Query(query): Query<AvailabilityQuery>,
) -> ApiResult {
    let options = SlotOptions {
        slot_minutes: query.duration_minutes.unwrap_or(30),
        ..SlotOptions::default()
    };
    validate_range(query.start, query.end).map_err(|e| bad_request(e.to_string()))?;
    validate_duration(options.slot_minutes).map_err(|e| bad_request(e.to_string()))?;

    let busy = fetch_busy(&state, auth_user.user_id, query.start, query.end)
        .await
        .map_err(calendar_error)?;
    let slots = generate_slots(query.start, query.end, &busy, Utc::now(), options)
        .map_err(|e| bad_request(e.to_string()))?;

    tracing::info!(
        "User {} has {} free slots between {} and {}",
        auth_user.user_id, slots.len(), query.start, query.end
    );
    Ok(Json(json!({
        "success": true,
        "duration_minutes": options.slot_minutes,
        "slots": slots,
        "busy": busy,
    })))
}
