#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Botfleet Billing Module
//!
//! Keeps the downstream record of how many concurrent bots each customer
//! is entitled to consistent with the payment provider, despite
//! duplicated and reordered change notifications.
//!
//! ## Features
//!
//! - **Entitlement Reconciliation**: re-derive entitlements from the
//!   provider's live subscription list on every notification
//! - **Subscription Classification**: normalize provider subscriptions
//!   into typed entitlement records
//! - **Tiered Pricing**: cumulative volume tier price calculation
//! - **Webhooks**: verify and dispatch Stripe events
//! - **Downstream Sync**: write entitlements through the admin user store

pub mod admin;
pub mod client;
pub mod entitlement;
pub mod error;
pub mod pricing;
pub mod provider;
pub mod reconcile;
pub mod webhooks;

// Admin store
pub use admin::{
    AdminApiClient, AdminConfig, AdminUser, EntitlementData, EntitlementPatch, UserStore,
};

// Client
pub use client::{StripeClient, StripeConfig};

// Entitlement
pub use entitlement::{classify, select_best, CancellationPolicy};

// Error
pub use error::{BillingError, BillingResult};

// Pricing
pub use pricing::{PriceTier, TierLine, TierTable};

// Provider
pub use provider::{ProviderCustomer, StripeProvider, SubscriptionProvider};

// Reconciliation
pub use reconcile::Reconciler;

// Webhooks
pub use webhooks::{NotificationData, NotificationEvent, WebhookHandler, WebhookOutcome};

use std::sync::Arc;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub provider: Arc<dyn SubscriptionProvider>,
    pub store: Arc<dyn UserStore>,
    pub reconciler: Reconciler,
    pub webhooks: WebhookHandler,
    pub pricing: TierTable,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        let admin = AdminApiClient::from_env()?;

        let policy = match std::env::var("CANCELLATION_POLICY") {
            Ok(value) => CancellationPolicy::from_str(&value).ok_or_else(|| {
                BillingError::Config(format!("unknown CANCELLATION_POLICY '{}'", value))
            })?,
            Err(_) => CancellationPolicy::default(),
        };

        let pricing = match std::env::var("PRICE_TIERS_JSON") {
            Ok(json) => TierTable::from_json(&json)?,
            Err(_) => TierTable::startup(),
        };

        let webhook_secret = stripe.config().webhook_secret.clone();
        Ok(Self::new(
            Arc::new(StripeProvider::new(stripe)),
            Arc::new(admin),
            policy,
            pricing,
            webhook_secret,
        ))
    }

    /// Create a new billing service with explicit collaborators
    pub fn new(
        provider: Arc<dyn SubscriptionProvider>,
        store: Arc<dyn UserStore>,
        policy: CancellationPolicy,
        pricing: TierTable,
        webhook_secret: String,
    ) -> Self {
        let reconciler = Reconciler::new(provider.clone(), policy);
        let webhooks = WebhookHandler::new(
            webhook_secret,
            provider.clone(),
            store.clone(),
            reconciler.clone(),
        );

        Self {
            provider,
            store,
            reconciler,
            webhooks,
            pricing,
        }
    }
}
