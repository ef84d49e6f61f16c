use std::sync::Arc;
use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    AppState,
    error::{db_error, ApiResult},
    handlers::auth_middleware::AuthUser,
};

const DEFAULT_TRANSACTION_LIMIT: i64 = 50;
const MAX_TRANSACTION_LIMIT: i64 = 500;

#[derive(Deserialize)]
pub struct TransactionsQuery {
    pub limit: Option<i64>,
}

pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
) -> ApiResult {
    // ledger sum, also written back to the profile cache
    let balance = state.credit_repository
        .refresh_cached_balance(auth_user.user_id)
        .map_err(db_error)?;
    Ok(Json(json!({
        "success": true,
        "balance": balance,
        "credits_per_lead": state.config.credits_per_lead,
        "credit_price_cents": state.config.credit_price_cents,
    })))
}

pub async fn get_transactions(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Query(query): Query<TransactionsQuery>,
) -> ApiResult {
    let limit = query.limit
        .unwrap_or(DEFAULT_TRANSACTION_LIMIT)
        .clamp(1, MAX_TRANSACTION_LIMIT);
    let transactions = state.credit_repository
        .transactions(auth_user.user_id, limit)
        .map_err(db_error)?;
    Ok(Json(json!({
        "success": true,
        "transactions": transactions,
    })))
}
