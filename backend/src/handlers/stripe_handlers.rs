use stripe::{
    Client,
    Customer,
    CreateCustomer,
    CustomerId,
    PaymentIntent,
    CreatePaymentIntent,
};

use serde::Deserialize;

use axum::{
    extract::State,
    http::{StatusCode, HeaderMap},
    body::Bytes,
    Json,
};
use crate::handlers::auth_middleware::AuthUser;
use crate::{
    AppState,
    error::{bad_request, db_error, error_response, internal_error, not_found, ApiError, ApiResult},
    repositories::credit_repository::{LedgerError, PurchaseOutcome},
    utils::usage::purchase_amount_cents,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct PaymentIntentRequest {
    pub credits: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentEventKind {
    Succeeded,
    Failed,
    Canceled,
}

/// The parts of a PaymentIntent webhook the ledger cares about.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    pub kind: PaymentEventKind,
    pub payment_intent_id: String,
    pub amount: i64,
    pub metadata: HashMap<String, String>,
}

fn stripe_error(context: &str, e: impl std::fmt::Display) -> ApiError {
    tracing::error!("{}: {}", context, e);
    error_response(StatusCode::BAD_GATEWAY, format!("{}: {}", context, e))
}

// Returns the user's Stripe customer id, creating the customer on first use
async fn ensure_customer(
    client: &Client,
    state: &AppState,
    user_id: i32,
) -> Result<CustomerId, ApiError> {
    let existing = state.user_repository
        .get_stripe_customer_id(user_id)
        .map_err(db_error)?;
    if let Some(id) = existing {
        return id.parse::<CustomerId>().map_err(internal_error);
    }

    let user = state.user_repository
        .find_by_id(user_id)
        .map_err(db_error)?
        .ok_or_else(|| not_found("User not found"))?;
    let user_id_str = user_id.to_string();
    let customer = Customer::create(
        client,
        CreateCustomer {
            email: Some(&user.email),
            metadata: Some(HashMap::from([("user_id".to_string(), user_id_str)])),
            ..Default::default()
        },
    )
    .await
    .map_err(|e| stripe_error("Failed to create Stripe customer", e))?;

    tracing::info!("Created Stripe customer for user {}", user_id);
    state.user_repository
        .set_stripe_customer_id(user_id, customer.id.as_str())
        .map_err(db_error)?;
    Ok(customer.id)
}

pub async fn create_payment_intent(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Json(req): Json<PaymentIntentRequest>,
) -> ApiResult {
    let amount_cents = purchase_amount_cents(req.credits, &state.config).map_err(bad_request)?;
    let client = Client::new(state.config.stripe_secret_key.clone());
    let customer_id = ensure_customer(&client, &state, auth_user.user_id).await?;

    let description = format!("{} outreach credits", req.credits);
    let mut create_intent = CreatePaymentIntent::new(amount_cents, stripe::Currency::USD);
    create_intent.customer = Some(customer_id);
    create_intent.description = Some(&description);
    create_intent.payment_method_types = Some(vec!["card".to_string()]);
    create_intent.metadata = Some(HashMap::from([
        ("user_id".to_string(), auth_user.user_id.to_string()),
        ("credits".to_string(), req.credits.to_string()),
    ]));

    let payment_intent = PaymentIntent::create(&client, create_intent)
        .await
        .map_err(|e| stripe_error("Failed to create PaymentIntent", e))?;
    tracing::info!(
        "Created PaymentIntent {} for user {} ({} credits)",
        payment_intent.id, auth_user.user_id, req.credits
    );

    Ok(Json(json!({
        "success": true,
        "client_secret": payment_intent.client_secret,
        "payment_intent_id": payment_intent.id.to_string(),
        "amount_cents": amount_cents,
        "credits": req.credits,
    })))
}

fn metadata_int(metadata: &HashMap<String, String>, key: &str) -> Result<i32, ApiError> {
    metadata
        .get(key)
        .ok_or_else(|| bad_request(format!("PaymentIntent metadata is missing '{}'", key)))?
        .trim()
        .parse::<i32>()
        .map_err(|_| bad_request(format!("PaymentIntent metadata '{}' is not a number", key)))
}

/// Applies a verified PaymentIntent event to the ledger. Redelivery of a
/// succeeded event is acknowledged without crediting twice.
pub fn apply_payment_event(state: &AppState, event: PaymentEvent) -> ApiResult {
    match event.kind {
        PaymentEventKind::Failed | PaymentEventKind::Canceled => {
            tracing::info!("PaymentIntent {} ended as {:?}, no credits added", event.payment_intent_id, event.kind);
            Ok(Json(json!({
                "success": true,
                "received": true,
                "credited": false,
            })))
        }
        PaymentEventKind::Succeeded => {
            let user_id = metadata_int(&event.metadata, "user_id")?;
            let credits = metadata_int(&event.metadata, "credits")?;
            if credits <= 0 {
                return Err(bad_request("PaymentIntent metadata 'credits' must be positive"));
            }
            if state.user_repository.find_by_id(user_id).map_err(db_error)?.is_none() {
                return Err(bad_request(format!("PaymentIntent references unknown user {}", user_id)));
            }
            let expected = (credits as i64).saturating_mul(state.config.credit_price_cents);
            if event.amount != expected {
                tracing::warn!(
                    "PaymentIntent {} amount {} differs from {} credits at current price ({})",
                    event.payment_intent_id, event.amount, credits, expected
                );
            }

            let outcome = state.credit_repository
                .record_purchase(
                    user_id,
                    credits,
                    &event.payment_intent_id,
                    Some(format!("Stripe payment {}", event.payment_intent_id)),
                )
                .map_err(|e| match e {
                    LedgerError::InvalidAmount(_) => bad_request(e.to_string()),
                    other => internal_error(other),
                })?;

            match outcome {
                PurchaseOutcome::Recorded { balance } => {
                    tracing::info!("Credited {} credits to user {}, balance {}", credits, user_id, balance);
                    Ok(Json(json!({
                        "success": true,
                        "received": true,
                        "credited": true,
                        "balance": balance,
                    })))
                }
                PurchaseOutcome::Duplicate => {
                    tracing::info!("PaymentIntent {} already credited, ignoring redelivery", event.payment_intent_id);
                    Ok(Json(json!({
                        "success": true,
                        "received": true,
                        "credited": false,
                        "duplicate": true,
                    })))
                }
            }
        }
    }
}

pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let payload_str = String::from_utf8(body.to_vec())
        .map_err(|_| bad_request("Invalid payload encoding"))?;
    tracing::info!("Stripe webhook received");

    let sig_header = headers
        .get("stripe-signature")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| bad_request("Missing Stripe-Signature header"))?;

    let event = stripe::Webhook::construct_event(
        &payload_str,
        sig_header,
        &state.config.stripe_webhook_secret,
    ).map_err(|e| {
        tracing::warn!("Rejected Stripe webhook: {}", e);
        bad_request(format!("Invalid Stripe webhook signature: {}", e))
    })?;

    tracing::info!("Stripe event verified successfully: {}", event.type_);
    let kind = match event.type_ {
        stripe::EventType::PaymentIntentSucceeded => PaymentEventKind::Succeeded,
        stripe::EventType::PaymentIntentPaymentFailed => PaymentEventKind::Failed,
        stripe::EventType::PaymentIntentCanceled => PaymentEventKind::Canceled,
        other => {
            tracing::debug!("Ignoring Stripe event {}", other);
            return Ok(Json(json!({"success": true, "received": true})));
        }
    };

    let stripe::EventObject::PaymentIntent(payment_intent) = event.data.object else {
        return Err(bad_request("PaymentIntent event without a PaymentIntent object"));
    };

    apply_payment_event(&state, PaymentEvent {
        kind,
        payment_intent_id: payment_intent.id.to_string(),
        amount: payment_intent.amount,
        metadata: payment_intent.metadata.into_iter().collect(),
    })
}
