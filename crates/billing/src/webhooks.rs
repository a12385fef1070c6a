//! Stripe webhook handling
//!
//! Verifies notification signatures and routes entitlement-relevant
//! events through full reconciliation. The event payload is never the
//! source of truth: it only identifies the customer whose provider state
//! must be re-read. Delivery is at-least-once and unordered, so the
//! handler is safe to run twice for the same event and safe to run
//! concurrently for events about the same customer.

use std::sync::Arc;

use botfleet_shared::types::Subscription;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use time::OffsetDateTime;

use crate::admin::{EntitlementPatch, UserStore};
use crate::error::{BillingError, BillingResult};
use crate::provider::SubscriptionProvider;
use crate::reconcile::Reconciler;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a webhook signature timestamp, in seconds
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// A verified notification event
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: NotificationData,
}

/// Event payload container
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationData {
    pub object: serde_json::Value,
}

/// Checkout session fields the dispatcher needs
#[derive(Debug, Clone, Deserialize)]
struct CheckoutSession {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    subscription: Option<String>,
}

/// Result of handling one notification
#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    /// Entitlements were reconciled and written downstream
    Reconciled {
        email: String,
        max_concurrent_bots: u64,
    },
    /// Event type carries no entitlement information
    Ignored { event_type: String },
    /// No customer identity could be resolved from the event
    NoIdentity,
    /// Non-critical path failed; acknowledged so the provider stops
    /// redelivering
    Acknowledged { note: String },
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    webhook_secret: String,
    provider: Arc<dyn SubscriptionProvider>,
    store: Arc<dyn UserStore>,
    reconciler: Reconciler,
}

impl WebhookHandler {
    pub fn new(
        webhook_secret: String,
        provider: Arc<dyn SubscriptionProvider>,
        store: Arc<dyn UserStore>,
        reconciler: Reconciler,
    ) -> Self {
        Self {
            webhook_secret,
            provider,
            store,
            reconciler,
        }
    }

    /// Verify and parse a webhook payload
    ///
    /// Parses the `t=timestamp,v1=signature` header, checks the timestamp
    /// tolerance, and compares an HMAC-SHA256 over `"{t}.{payload}"`
    /// keyed with the `whsec_`-stripped signing secret.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<NotificationEvent> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<String> = None;

        for part in signature.split(',') {
            let kv: Vec<&str> = part.splitn(2, '=').collect();
            if kv.len() == 2 {
                match kv[0] {
                    "t" => timestamp = kv[1].parse().ok(),
                    "v1" => v1_signature = Some(kv[1].to_string()),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or(BillingError::WebhookSignatureInvalid)?;
        let v1_signature = v1_signature.ok_or(BillingError::WebhookSignatureInvalid)?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::warn!(
                timestamp = timestamp,
                now = now,
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let secret_key = self
            .webhook_secret
            .strip_prefix("whsec_")
            .unwrap_or(&self.webhook_secret);
        let signed_payload = format!("{}.{}", timestamp, payload);

        let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
            .map_err(|_| BillingError::WebhookSignatureInvalid)?;
        mac.update(signed_payload.as_bytes());
        let computed = hex::encode(mac.finalize().into_bytes());

        if computed != v1_signature {
            tracing::warn!("Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        serde_json::from_str(payload).map_err(|e| BillingError::InvalidPayload(e.to_string()))
    }

    /// Handle a verified notification event
    pub async fn handle(&self, event: NotificationEvent) -> BillingResult<WebhookOutcome> {
        match event.event_type.as_str() {
            "customer.subscription.created"
            | "customer.subscription.updated"
            | "customer.subscription.deleted" => self.handle_subscription_event(event).await,
            "checkout.session.completed" => self.handle_checkout_completed(event).await,
            _ => {
                tracing::debug!(event_type = %event.event_type, "Ignoring event type");
                Ok(WebhookOutcome::Ignored {
                    event_type: event.event_type,
                })
            }
        }
    }

    /// Subscription lifecycle path
    ///
    /// Failures here propagate to the caller so the notification source's
    /// retry mechanism redelivers the event.
    async fn handle_subscription_event(
        &self,
        event: NotificationEvent,
    ) -> BillingResult<WebhookOutcome> {
        let sub: Subscription = serde_json::from_value(event.data.object.clone())
            .map_err(|e| BillingError::InvalidPayload(format!("subscription object: {}", e)))?;

        tracing::info!(
            event_type = %event.event_type,
            event_id = ?event.id,
            subscription_id = %sub.id,
            status = %sub.status,
            "Processing subscription event"
        );

        let Some(email) = self.resolve_email(&sub).await else {
            // Without an email there is no user to map the entitlement to
            tracing::warn!(
                subscription_id = %sub.id,
                "No resolvable customer identity, accepting as no-op"
            );
            return Ok(WebhookOutcome::NoIdentity);
        };

        self.reconcile_and_store(&email).await
    }

    /// Checkout completion path
    ///
    /// Checkout completion is enrichment: a subscription event for the
    /// same change also arrives, so failures here are acknowledged rather
    /// than surfaced for redelivery.
    async fn handle_checkout_completed(
        &self,
        event: NotificationEvent,
    ) -> BillingResult<WebhookOutcome> {
        let session: CheckoutSession = serde_json::from_value(event.data.object.clone())
            .map_err(|e| BillingError::InvalidPayload(format!("checkout session object: {}", e)))?;

        let Some(subscription_id) = session.subscription else {
            tracing::debug!(
                session_id = ?session.id,
                "Checkout session without subscription, nothing to reconcile"
            );
            return Ok(WebhookOutcome::Ignored {
                event_type: event.event_type,
            });
        };

        match self.process_checkout(&subscription_id).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!(
                    subscription_id = %subscription_id,
                    error = %e,
                    "Checkout reconciliation failed"
                );
                Ok(WebhookOutcome::Acknowledged {
                    note: e.to_string(),
                })
            }
        }
    }

    async fn process_checkout(&self, subscription_id: &str) -> BillingResult<WebhookOutcome> {
        let sub = self.provider.get_subscription(subscription_id).await?;
        match self.resolve_email(&sub).await {
            Some(email) => self.reconcile_and_store(&email).await,
            None => Ok(WebhookOutcome::NoIdentity),
        }
    }

    /// Email for the subscription's owner: event payload first, then a
    /// provider customer lookup
    async fn resolve_email(&self, sub: &Subscription) -> Option<String> {
        if let Some(email) = sub.email_hint() {
            return Some(email);
        }

        let customer_id = sub.customer.as_deref()?;
        match self.provider.get_customer(customer_id).await {
            Ok(customer) => customer.email.filter(|email| !email.is_empty()),
            Err(e) => {
                tracing::warn!(
                    customer_id = %customer_id,
                    error = %e,
                    "Customer lookup for email failed"
                );
                None
            }
        }
    }

    async fn reconcile_and_store(&self, email: &str) -> BillingResult<WebhookOutcome> {
        let entitlement = self.reconciler.reconcile(email).await?;

        let user_id = self.store.upsert_user(email).await?;
        let patch = EntitlementPatch::from_entitlement(&entitlement);
        self.store.patch_user(user_id, &patch).await?;

        tracing::info!(
            email = %email,
            user_id = user_id,
            status = %entitlement.status,
            max_concurrent_bots = entitlement.max_concurrent_bots,
            "Entitlement written downstream"
        );

        Ok(WebhookOutcome::Reconciled {
            email: email.to_string(),
            max_concurrent_bots: entitlement.max_concurrent_bots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::AdminUser;
    use crate::entitlement::CancellationPolicy;
    use crate::provider::ProviderCustomer;
    use async_trait::async_trait;

    struct NullProvider;

    #[async_trait]
    impl SubscriptionProvider for NullProvider {
        async fn find_customer(&self, _email: &str) -> BillingResult<Option<ProviderCustomer>> {
            Ok(None)
        }
        async fn find_or_create_customer(&self, _email: &str) -> BillingResult<ProviderCustomer> {
            Err(BillingError::Internal("not implemented".to_string()))
        }
        async fn get_customer(&self, customer_id: &str) -> BillingResult<ProviderCustomer> {
            Err(BillingError::CustomerNotFound(customer_id.to_string()))
        }
        async fn list_subscriptions(&self, _customer_id: &str) -> BillingResult<Vec<Subscription>> {
            Ok(vec![])
        }
        async fn get_subscription(&self, subscription_id: &str) -> BillingResult<Subscription> {
            Err(BillingError::SubscriptionNotFound(subscription_id.to_string()))
        }
    }

    struct NullStore;

    #[async_trait]
    impl UserStore for NullStore {
        async fn upsert_user(&self, _email: &str) -> BillingResult<i64> {
            Ok(1)
        }
        async fn patch_user(&self, _user_id: i64, _patch: &EntitlementPatch) -> BillingResult<()> {
            Ok(())
        }
        async fn list_users(&self) -> BillingResult<Vec<AdminUser>> {
            Ok(vec![])
        }
    }

    fn handler(secret: &str) -> WebhookHandler {
        let provider = Arc::new(NullProvider);
        let reconciler = Reconciler::new(provider.clone(), CancellationPolicy::default());
        WebhookHandler::new(secret.to_string(), provider, Arc::new(NullStore), reconciler)
    }

    fn sign(secret: &str, timestamp: i64, payload: &str) -> String {
        let key = secret.strip_prefix("whsec_").unwrap_or(secret);
        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    const PAYLOAD: &str =
        r#"{"id": "evt_1", "type": "invoice.paid", "data": {"object": {"id": "in_1"}}}"#;

    #[test]
    fn test_verify_event_accepts_valid_signature() {
        let handler = handler("whsec_testsecret");
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let header = format!("t={},v1={}", now, sign("whsec_testsecret", now, PAYLOAD));

        let event = handler.verify_event(PAYLOAD, &header).unwrap();
        assert_eq!(event.event_type, "invoice.paid");
        assert_eq!(event.id.as_deref(), Some("evt_1"));
    }

    #[test]
    fn test_verify_event_rejects_tampered_payload() {
        let handler = handler("whsec_testsecret");
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let header = format!("t={},v1={}", now, sign("whsec_testsecret", now, PAYLOAD));

        let tampered = PAYLOAD.replace("invoice.paid", "customer.subscription.deleted");
        assert!(matches!(
            handler.verify_event(&tampered, &header),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn test_verify_event_rejects_wrong_secret() {
        let handler = handler("whsec_testsecret");
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let header = format!("t={},v1={}", now, sign("whsec_othersecret", now, PAYLOAD));

        assert!(handler.verify_event(PAYLOAD, &header).is_err());
    }

    #[test]
    fn test_verify_event_rejects_stale_timestamp() {
        let handler = handler("whsec_testsecret");
        let old = OffsetDateTime::now_utc().unix_timestamp() - 3600;
        let header = format!("t={},v1={}", old, sign("whsec_testsecret", old, PAYLOAD));

        assert!(matches!(
            handler.verify_event(PAYLOAD, &header),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn test_verify_event_rejects_malformed_header() {
        let handler = handler("whsec_testsecret");
        assert!(handler.verify_event(PAYLOAD, "garbage").is_err());
        assert!(handler.verify_event(PAYLOAD, "t=123").is_err());
    }

    #[tokio::test]
    async fn test_irrelevant_event_is_ignored() {
        let handler = handler("whsec_testsecret");
        let event: NotificationEvent = serde_json::from_str(PAYLOAD).unwrap();

        let outcome = handler.handle(event).await.unwrap();
        assert!(matches!(
            outcome,
            WebhookOutcome::Ignored { event_type } if event_type == "invoice.paid"
        ));
    }

    #[tokio::test]
    async fn test_subscription_event_without_identity_is_noop() {
        let handler = handler("whsec_testsecret");
        let event: NotificationEvent = serde_json::from_str(
            r#"{
                "id": "evt_2",
                "type": "customer.subscription.updated",
                "data": {"object": {"id": "sub_1", "status": "active", "customer": "cus_missing"}}
            }"#,
        )
        .unwrap();

        let outcome = handler.handle(event).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::NoIdentity));
    }

    #[tokio::test]
    async fn test_malformed_subscription_object_is_rejected() {
        let handler = handler("whsec_testsecret");
        let event: NotificationEvent = serde_json::from_str(
            r#"{"type": "customer.subscription.updated", "data": {"object": {"status": "active"}}}"#,
        )
        .unwrap();

        assert!(matches!(
            handler.handle(event).await,
            Err(BillingError::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_checkout_without_subscription_is_ignored() {
        let handler = handler("whsec_testsecret");
        let event: NotificationEvent = serde_json::from_str(
            r#"{"type": "checkout.session.completed", "data": {"object": {"id": "cs_1"}}}"#,
        )
        .unwrap();

        let outcome = handler.handle(event).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
    }

    #[tokio::test]
    async fn test_checkout_failure_is_acknowledged() {
        // NullProvider errors on get_subscription, but the checkout path
        // must still acknowledge the event
        let handler = handler("whsec_testsecret");
        let event: NotificationEvent = serde_json::from_str(
            r#"{
                "type": "checkout.session.completed",
                "data": {"object": {"id": "cs_1", "subscription": "sub_404"}}
            }"#,
        )
        .unwrap();

        let outcome = handler.handle(event).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Acknowledged { .. }));
    }
}
