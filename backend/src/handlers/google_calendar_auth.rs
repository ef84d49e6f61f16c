use std::sync::Arc;
use axum::{
    extract::{Query, State},
    response::{Json, Redirect},
    http::StatusCode,
};
use tower_sessions::{session_store::SessionStore, session::{Id, Record}};
use oauth2::{
    basic::BasicClient,
    AuthUrl,
    AuthorizationCode,
    ClientId,
    ClientSecret,
    CsrfToken,
    EndpointNotSet,
    EndpointSet,
    PkceCodeChallenge,
    PkceCodeVerifier,
    RedirectUrl,
    Scope,
    TokenResponse,
    TokenUrl,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use time::OffsetDateTime;

use crate::{
    AppState,
    config::AppConfig,
    error::{bad_request, db_error, error_response, internal_error, ApiResult, ApiError},
    handlers::auth_middleware::AuthUser,
};

pub type GoogleOAuthClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

pub const CALENDAR_SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/calendar.events",
    "https://www.googleapis.com/auth/calendar.readonly",
];

pub fn build_oauth_client(config: &AppConfig) -> Result<GoogleOAuthClient, oauth2::url::ParseError> {
    Ok(BasicClient::new(ClientId::new(config.google_calendar_client_id.clone()))
        .set_client_secret(ClientSecret::new(config.google_calendar_client_secret.clone()))
        .set_auth_uri(AuthUrl::new(config.google_auth_url.clone())?)
        .set_token_uri(TokenUrl::new(config.google_token_url.clone())?)
        .set_redirect_uri(RedirectUrl::new(config.google_calendar_redirect_url())?))
}

/// HTTP client for token endpoints. Redirects are not followed.
pub fn oauth_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

#[derive(Deserialize)]
pub struct AuthRequest {
    code: String,
    state: String,
}

pub async fn google_calendar_login(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
) -> ApiResult {
    let csrf_token = CsrfToken::new_random();
    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

    let mut record = Record {
        id: Id(Uuid::new_v4().as_u128() as i128),
        data: Default::default(),
        expiry_date: OffsetDateTime::now_utc() + time::Duration::hours(1),
    };
    record.data.insert("user_id".to_string(), json!(auth_user.user_id));
    record.data.insert("pkce_verifier".to_string(), json!(pkce_verifier.secret().to_string()));
    record.data.insert("csrf_token".to_string(), json!(csrf_token.secret().to_string()));

    if let Err(e) = state.session_store.create(&mut record).await {
        tracing::error!("Failed to store session record: {}", e);
        return Err(internal_error(format!("Failed to store session record: {}", e)));
    }

    let state_token = format!("{}:{}", record.id.0, csrf_token.secret());
    let mut request = state
        .oauth_client
        .authorize_url(|| CsrfToken::new(state_token.clone()))
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .set_pkce_challenge(pkce_challenge);
    for scope in CALENDAR_SCOPES {
        request = request.add_scope(Scope::new(scope.to_string()));
    }
    let (auth_url, _) = request.url();

    tracing::info!("Started Google Calendar OAuth for user {}", auth_user.user_id);
    Ok(Json(json!({
        "success": true,
        "auth_url": auth_url.to_string(),
    })))
}

fn session_string(record: &Record, key: &str) -> Result<String, ApiError> {
    record.data.get(key)
        .and_then(|v| v.as_str().map(String::from))
        .ok_or_else(|| {
            tracing::error!("{} missing from session record", key);
            bad_request(format!("{} missing from session", key))
        })
}

pub async fn google_calendar_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuthRequest>,
) -> Result<Redirect, ApiError> {
    let Some((session_id_str, state_csrf)) = query.state.split_once(':') else {
        tracing::error!("Invalid state format: {}", query.state);
        return Err(bad_request("Invalid state format"));
    };

    let session_id = session_id_str.parse::<i128>()
        .map(Id)
        .map_err(|_| bad_request("Invalid session ID format"))?;

    let record = state.session_store.load(&session_id).await
        .map_err(|e| internal_error(format!("Session store error: {}", e)))?
        .ok_or_else(|| bad_request("Session record not found"))?;

    let stored_csrf_token = session_string(&record, "csrf_token")?;
    if stored_csrf_token != state_csrf {
        tracing::error!("CSRF token mismatch for session {}", session_id_str);
        return Err(bad_request("CSRF token mismatch"));
    }
    let pkce_verifier = PkceCodeVerifier::new(session_string(&record, "pkce_verifier")?);
    let user_id = record.data.get("user_id")
        .and_then(|v| v.as_i64())
        .map(|id| id as i32)
        .ok_or_else(|| bad_request("user_id missing from session"))?;

    let http_client = oauth_http_client().map_err(internal_error)?;
    let token_result = state
        .oauth_client
        .exchange_code(AuthorizationCode::new(query.code))
        .set_pkce_verifier(pkce_verifier)
        .request_async(&http_client)
        .await
        .map_err(|e| {
            tracing::error!("Token exchange failed: {}", e);
            error_response(StatusCode::BAD_GATEWAY, format!("Token exchange failed: {}", e))
        })?;

    if let Err(e) = state.session_store.delete(&session_id).await {
        tracing::error!("Failed to delete session record: {}", e);
    }

    let access_token = token_result.access_token().secret();
    let refresh_token = token_result.refresh_token()
        .map(|rt| rt.secret().to_string())
        .ok_or_else(|| bad_request("Google did not return a refresh token"))?;
    let expires_in = token_result.expires_in().unwrap_or_default().as_secs() as i32;

    state.calendar_repository
        .create_google_calendar_connection(user_id, access_token, &refresh_token, expires_in)
        .map_err(internal_error)?;
    tracing::info!("Google Calendar connected for user {}", user_id);

    Ok(Redirect::to(&state.config.frontend_url))
}

pub async fn google_calendar_status(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
) -> ApiResult {
    let connected = state.calendar_repository
        .has_active_google_calendar(auth_user.user_id)
        .map_err(db_error)?;
    Ok(Json(json!({
        "success": true,
        "connected": connected,
    })))
}

pub async fn delete_google_calendar_connection(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
) -> ApiResult {
    let deleted = state.calendar_repository
        .delete_google_calendar_connection(auth_user.user_id)
        .map_err(db_error)?;
    tracing::info!("Google Calendar disconnected for user {} (existed: {})", auth_user.user_id, deleted);
    Ok(Json(json!({
        "success": true,
        "deleted": deleted,
    })))
}
