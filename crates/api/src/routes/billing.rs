//! Billing routes for Stripe integration
//!
//! Webhook intake, customer identity establishment, pricing quotes, and
//! aggregate fleet statistics.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use botfleet_billing::{TierLine, WebhookOutcome};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Handle Stripe webhook events
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<Value>> {
    tracing::info!(body_len = body.len(), "Stripe webhook received");

    // Get signature header
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Stripe webhook missing signature header");
            ApiError::BadRequest("Missing Stripe signature".to_string())
        })?;

    // Verify and parse event
    let event = state
        .billing
        .webhooks
        .verify_event(&body, signature)
        .map_err(|e| {
            tracing::warn!(error = %e, "Stripe webhook signature verification failed");
            ApiError::BadRequest("Invalid webhook signature".to_string())
        })?;

    tracing::info!(
        event_type = %event.event_type,
        event_id = ?event.id,
        "Stripe webhook event verified"
    );

    // Handle the event; subscription-lifecycle failures surface as errors
    // so the notification source redelivers
    let outcome = state.billing.webhooks.handle(event).await?;

    let response = match outcome {
        WebhookOutcome::Reconciled { .. } => json!({ "received": true }),
        WebhookOutcome::Ignored { event_type } => {
            json!({ "received": true, "ignored": event_type })
        }
        WebhookOutcome::NoIdentity => json!({ "received": true, "note": "No email to map user" }),
        WebhookOutcome::Acknowledged { note } => json!({ "received": true, "error": note }),
    };

    Ok(Json(response))
}

/// Request to establish a provider customer for an email
#[derive(Debug, Deserialize)]
pub struct EnsureCustomerRequest {
    pub email: String,
}

/// Response from establishing a provider customer
#[derive(Debug, Serialize)]
pub struct EnsureCustomerResponse {
    pub customer_id: String,
}

/// Find or create the provider customer for an email
pub async fn ensure_customer(
    State(state): State<AppState>,
    Json(req): Json<EnsureCustomerRequest>,
) -> ApiResult<Json<EnsureCustomerResponse>> {
    let email = req.email.trim();
    if email.is_empty() {
        return Err(ApiError::BadRequest("email is required".to_string()));
    }

    let customer = state.billing.provider.find_or_create_customer(email).await?;

    Ok(Json(EnsureCustomerResponse {
        customer_id: customer.id,
    }))
}

/// Query params for a pricing quote
#[derive(Debug, Deserialize)]
pub struct QuoteQuery {
    pub quantity: u64,
}

/// Response for a pricing quote
#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub quantity: u64,
    pub currency: &'static str,
    pub total_cents: i64,
    pub breakdown: Vec<TierLine>,
}

/// Price a bot quantity against the configured tier table
pub async fn pricing_quote(
    State(state): State<AppState>,
    Query(query): Query<QuoteQuery>,
) -> ApiResult<Json<QuoteResponse>> {
    let breakdown = state.billing.pricing.breakdown(query.quantity);
    let total_cents = breakdown.iter().map(|line| line.subtotal).sum();

    Ok(Json(QuoteResponse {
        quantity: query.quantity,
        currency: "usd",
        total_cents,
        breakdown,
    }))
}

/// Aggregate statistics over accounts with contracted bots
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Only accounts with more than 0 contracted bots
    pub total_accounts: usize,
    pub total_contracted_bots: u64,
}

/// Current contracted-bot statistics from the downstream user store
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<StatsResponse>> {
    let users = state.billing.store.list_users().await?;

    let accounts_with_bots: Vec<_> = users
        .iter()
        .filter(|user| user.max_concurrent_bots > 0)
        .collect();

    Ok(Json(StatsResponse {
        total_accounts: accounts_with_bots.len(),
        total_contracted_bots: accounts_with_bots
            .iter()
            .map(|user| user.max_concurrent_bots)
            .sum(),
    }))
}
