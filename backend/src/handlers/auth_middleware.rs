use futures::Future;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use crate::AppState;
use jsonwebtoken::{decode, DecodingKey, Validation, Algorithm};
use serde_json::json;

use crate::handlers::auth_dtos::Claims;

#[derive(Clone, Copy, Debug)]
pub struct AuthUser {
    pub user_id: i32,
}

#[derive(Debug)]
pub struct AuthError {
    pub status: StatusCode,
    pub message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": self.message,
        }));

        (self.status, body).into_response()
    }
}

pub fn decode_user_id(token: &str, secret: &str) -> Result<i32, AuthError> {
    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| {
        tracing::debug!("Rejected token: {}", e);
        AuthError {
            status: StatusCode::UNAUTHORIZED,
            message: "Invalid token".to_string(),
        }
    })?
    .claims;
    Ok(claims.sub)
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AuthError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|header| header.to_str().ok())
            .and_then(|header| header.strip_prefix("Bearer "))
            .map(str::to_string);
        let secret = state.config.jwt_secret_key.clone();

        async move {
            let token = auth_header.ok_or(AuthError {
                status: StatusCode::UNAUTHORIZED,
                message: "No authorization token provided".to_string(),
            })?;

            let user_id = decode_user_id(&token, &secret)?;
            Ok(AuthUser { user_id })
        }
    }
}
