use std::sync::Arc;
use crate::handlers::auth_middleware::AuthUser;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use serde_json::json;
use jsonwebtoken::{encode, Header, EncodingKey};
use chrono::{Duration, Utc};

use crate::{
    AppState,
    db::DbError,
    error::{bad_request, db_error, error_response, internal_error, not_found, ApiResult, ApiError},
    handlers::auth_dtos::{Claims, LoginRequest, RegisterRequest, UserResponse},
};

#[cfg(not(test))]
const HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const HASH_COST: u32 = 4;

pub fn issue_token(user_id: i32, secret: &str) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        exp: (Utc::now() + Duration::hours(24)).timestamp(),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| {
            tracing::error!("Token generation failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Token generation failed")
        })
}

// a concurrent registration can pass the existence check and lose on the unique index
fn create_user_error(e: DbError) -> ApiError {
    if e.is_unique_violation() {
        error_response(StatusCode::CONFLICT, "Email already registered")
    } else {
        db_error(e)
    }
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult {
    let email = req.email.trim().to_lowercase();
    if !email.contains('@') || email.len() < 3 {
        return Err(bad_request("Invalid email address"));
    }
    if req.password.len() < 8 {
        return Err(bad_request("Password must be at least 8 characters"));
    }

    if state.user_repository.email_exists(&email).map_err(db_error)? {
        return Err(error_response(StatusCode::CONFLICT, "Email already registered"));
    }

    let password_hash = bcrypt::hash(&req.password, HASH_COST).map_err(internal_error)?;
    let user = state.user_repository
        .create_user(&email, &password_hash, req.full_name, req.company_name)
        .map_err(create_user_error)?;
    tracing::info!("Registered user {}", user.id);

    let token = issue_token(user.id, &state.config.jwt_secret_key)?;
    Ok(Json(json!({
        "success": true,
        "token": token,
        "user_id": user.id,
    })))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult {
    let email = req.email.trim().to_lowercase();
    let invalid = || error_response(StatusCode::UNAUTHORIZED, "Invalid email or password");

    let user = state.user_repository
        .find_by_email(&email)
        .map_err(db_error)?
        .ok_or_else(invalid)?;

    let valid = bcrypt::verify(&req.password, &user.password_hash).map_err(|e| {
        tracing::error!("Password verification failed for user {}: {}", user.id, e);
        invalid()
    })?;
    if !valid {
        tracing::info!("Failed login for user {}", user.id);
        return Err(invalid());
    }

    let token = issue_token(user.id, &state.config.jwt_secret_key)?;
    Ok(Json(json!({
        "success": true,
        "token": token,
    })))
}

pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
) -> ApiResult {
    let user = state.user_repository
        .find_by_id(auth_user.user_id)
        .map_err(db_error)?
        .ok_or_else(|| not_found("User not found"))?;
    let profile = state.user_repository
        .get_profile(auth_user.user_id)
        .map_err(db_error)?;

    let response = UserResponse {
        id: user.id,
        email: user.email,
        full_name: profile.as_ref().and_then(|p| p.full_name.clone()),
        company_name: profile.as_ref().and_then(|p| p.company_name.clone()),
        credits_balance: profile.map(|p| p.credits_balance).unwrap_or(0),
        created_at: user.created_at,
    };
    Ok(Json(json!({
        "success": true,
        "user": response,
    })))
}
