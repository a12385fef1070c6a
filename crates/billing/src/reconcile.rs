//! Entitlement reconciliation
//!
//! Notifications never drive entitlements directly. Whatever event comes
//! in, the reconciler re-derives the record from the provider's live
//! subscription list. That makes handling idempotent and order
//! independent: a stale cancellation event cannot erase an entitlement
//! backed by a newer active subscription, because the result depends only
//! on current provider state.

use std::sync::Arc;

use botfleet_shared::types::Entitlement;
use time::OffsetDateTime;

use crate::entitlement::{select_best, CancellationPolicy};
use crate::error::BillingResult;
use crate::provider::SubscriptionProvider;

/// Recomputes a customer's entitlement from full provider state
#[derive(Clone)]
pub struct Reconciler {
    provider: Arc<dyn SubscriptionProvider>,
    policy: CancellationPolicy,
}

impl Reconciler {
    pub fn new(provider: Arc<dyn SubscriptionProvider>, policy: CancellationPolicy) -> Self {
        Self { provider, policy }
    }

    /// Current authoritative entitlement for `email`
    ///
    /// A missing customer or an empty subscription list yields an explicit
    /// `none` record. Provider failures are returned as errors so callers
    /// can tell "no entitlement" from "could not determine" — the two
    /// write the same zero-bot shape but mean different things.
    pub async fn reconcile(&self, email: &str) -> BillingResult<Entitlement> {
        let now = OffsetDateTime::now_utc().unix_timestamp();

        let Some(customer) = self.provider.find_customer(email).await? else {
            tracing::info!(email = %email, "No provider customer, entitlement is none");
            return Ok(Entitlement::none(now));
        };

        let subscriptions = self.provider.list_subscriptions(&customer.id).await?;
        let mut entitlement = select_best(&subscriptions, self.policy, now);
        if entitlement.stripe_customer_id.is_none() {
            entitlement.stripe_customer_id = Some(customer.id.clone());
        }

        tracing::info!(
            email = %email,
            customer_id = %customer.id,
            status = %entitlement.status,
            max_concurrent_bots = entitlement.max_concurrent_bots,
            subscriptions = subscriptions.len(),
            "Reconciled entitlement"
        );

        Ok(entitlement)
    }

    pub fn policy(&self) -> CancellationPolicy {
        self.policy
    }
}
