//! API routes

pub mod billing;
pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health::health))
        .route("/health", get(health::health))
        // Stripe webhook (public, uses signature verification)
        .route("/v1/stripe/webhook", post(billing::webhook))
        // Alias matching the public webhook URL
        .route("/webhook/stripe", post(billing::webhook))
        // Identity establishment
        .route("/v1/customers", post(billing::ensure_customer))
        // Pricing quotes from the static tier catalog
        .route("/v1/pricing/quote", get(billing::pricing_quote))
        // Aggregate fleet statistics
        .route("/v1/stats", get(billing::stats))
        .with_state(state)
}
