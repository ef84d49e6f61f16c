use std::collections::BTreeMap;
use std::sync::Arc;
use axum::{
    Json,
    extract::State,
};
use serde_json::json;

use crate::{
    AppState,
    error::{db_error, ApiResult},
    handlers::auth_middleware::AuthUser,
    models::campaign_models::CampaignStatus,
};

pub async fn get_dashboard_stats(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
) -> ApiResult {
    let user_id = auth_user.user_id;

    // every status is reported, zero when absent
    let mut campaigns_by_status: BTreeMap<&'static str, i64> =
        CampaignStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();
    let mut total_campaigns = 0;
    for (status, count) in state.campaign_repository.count_by_status(user_id).map_err(db_error)? {
        if let Ok(status) = status.parse::<CampaignStatus>() {
            campaigns_by_status.insert(status.as_str(), count);
        }
        total_campaigns += count;
    }

    let leads = state.lead_repository.user_stats(user_id).map_err(db_error)?;
    let meetings = state.meeting_repository.count_for_user(user_id).map_err(db_error)?;
    let balance = state.credit_repository.balance(user_id).map_err(db_error)?;

    Ok(Json(json!({
        "success": true,
        "total_campaigns": total_campaigns,
        "campaigns_by_status": campaigns_by_status,
        "total_leads": leads.total_leads,
        "messages_sent": leads.messages_sent,
        "replies": leads.replies,
        "positive_replies": leads.positive_replies,
        "reply_rate": leads.reply_rate,
        "leads_with_meetings": leads.meetings_scheduled,
        "meetings": meetings,
        "credit_balance": balance,
    })))
}
