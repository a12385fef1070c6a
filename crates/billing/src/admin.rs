//! Downstream admin user store
//!
//! Reconciled entitlements land in the admin service's user records over
//! HTTP. Each patch carries the complete set of tracked entitlement
//! fields, so concurrent reconciliations resolve last-writer-wins to one
//! coherent record rather than a field-by-field merge of different runs.

use async_trait::async_trait;
use botfleet_shared::types::{Entitlement, EntitlementStatus};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};

/// Configuration for the admin API
#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// Base URL of the admin service
    pub base_url: String,
    /// API key sent in the `X-Admin-API-Key` header
    pub api_token: String,
}

impl AdminConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            base_url: std::env::var("ADMIN_API_URL")
                .map_err(|_| BillingError::Config("ADMIN_API_URL not set".to_string()))?,
            api_token: std::env::var("ADMIN_API_TOKEN")
                .map_err(|_| BillingError::Config("ADMIN_API_TOKEN not set".to_string()))?,
        })
    }
}

/// A user record as the admin API reports it
#[derive(Debug, Clone, Deserialize)]
pub struct AdminUser {
    pub id: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub max_concurrent_bots: u64,
}

/// Bookkeeping fields nested under `data` in a user patch
#[derive(Debug, Clone, Serialize)]
pub struct EntitlementData {
    /// When the reconciliation that produced this patch ran (UNIX seconds)
    pub updated_by_webhook: i64,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub subscription_tier: String,
    pub subscription_status: EntitlementStatus,
    pub subscription_scheduled_to_cancel: bool,
    pub subscription_cancel_at_period_end: bool,
    pub subscription_cancellation_date: Option<i64>,
    pub subscription_current_period_start: Option<i64>,
    pub subscription_current_period_end: Option<i64>,
    pub subscription_trial_start: Option<i64>,
    pub subscription_trial_end: Option<i64>,
}

/// Full entitlement patch written to a user record
///
/// `max_concurrent_bots` is a root-level field on the user; everything
/// else lives in the nested `data` bag.
#[derive(Debug, Clone, Serialize)]
pub struct EntitlementPatch {
    pub max_concurrent_bots: u64,
    pub data: EntitlementData,
}

impl EntitlementPatch {
    /// Build the downstream patch for one reconciled entitlement
    pub fn from_entitlement(entitlement: &Entitlement) -> Self {
        Self {
            max_concurrent_bots: entitlement.max_concurrent_bots,
            data: EntitlementData {
                updated_by_webhook: entitlement.reconciled_at,
                stripe_customer_id: entitlement.stripe_customer_id.clone(),
                stripe_subscription_id: entitlement.stripe_subscription_id.clone(),
                subscription_tier: entitlement.tier.clone(),
                subscription_status: entitlement.status,
                subscription_scheduled_to_cancel: entitlement.scheduled_to_cancel,
                subscription_cancel_at_period_end: entitlement.scheduled_to_cancel,
                subscription_cancellation_date: entitlement.cancellation_effective_at,
                subscription_current_period_start: entitlement.current_period_start,
                subscription_current_period_end: entitlement.current_period_end,
                subscription_trial_start: entitlement.trial_start,
                subscription_trial_end: entitlement.trial_end,
            },
        }
    }
}

/// Downstream user-store interface
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find or create a user by email, returning its id
    async fn upsert_user(&self, email: &str) -> BillingResult<i64>;

    /// Replace the tracked entitlement fields on a user record
    async fn patch_user(&self, user_id: i64, patch: &EntitlementPatch) -> BillingResult<()>;

    /// List all user records, for aggregate stats
    async fn list_users(&self) -> BillingResult<Vec<AdminUser>>;
}

/// HTTP client for the admin API
#[derive(Clone)]
pub struct AdminApiClient {
    config: AdminConfig,
    client: reqwest::Client,
}

impl AdminApiClient {
    /// Create a new admin API client
    pub fn new(config: AdminConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(AdminConfig::from_env()?))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl UserStore for AdminApiClient {
    async fn upsert_user(&self, email: &str) -> BillingResult<i64> {
        let response = self
            .client
            .post(self.url("/admin/users"))
            .header("X-Admin-API-Key", &self.config.api_token)
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::AdminApi(format!(
                "user upsert failed ({}): {}",
                status, body
            )));
        }

        let body: serde_json::Value = response.json().await?;

        // Some admin responses wrap the user in a `data` envelope
        body.get("id")
            .or_else(|| body.get("data").and_then(|data| data.get("id")))
            .and_then(|id| id.as_i64())
            .ok_or_else(|| BillingError::AdminApi("user upsert response carried no id".to_string()))
    }

    async fn patch_user(&self, user_id: i64, patch: &EntitlementPatch) -> BillingResult<()> {
        let response = self
            .client
            .patch(self.url(&format!("/admin/users/{}", user_id)))
            .header("X-Admin-API-Key", &self.config.api_token)
            .json(patch)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::AdminApi(format!(
                "user patch failed ({}): {}",
                status, body
            )));
        }

        tracing::debug!(user_id, "Patched user entitlement fields");
        Ok(())
    }

    async fn list_users(&self) -> BillingResult<Vec<AdminUser>> {
        let response = self
            .client
            .get(self.url("/admin/users?limit=10000"))
            .header("X-Admin-API-Key", &self.config.api_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(BillingError::AdminApi(format!("user list failed ({})", status)));
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(server: &mockito::Server) -> AdminApiClient {
        AdminApiClient::new(AdminConfig {
            base_url: server.url(),
            api_token: "test-token".to_string(),
        })
    }

    #[tokio::test]
    async fn test_upsert_user_parses_plain_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/admin/users")
            .match_header("x-admin-api-key", "test-token")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "email": "ops@example.com"
            })))
            .with_status(201)
            .with_body(r#"{"id": 42, "email": "ops@example.com"}"#)
            .create_async()
            .await;

        let user_id = client_for(&server).upsert_user("ops@example.com").await.unwrap();
        assert_eq!(user_id, 42);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upsert_user_parses_wrapped_id() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/admin/users")
            .with_status(200)
            .with_body(r#"{"data": {"id": 7}}"#)
            .create_async()
            .await;

        let user_id = client_for(&server).upsert_user("ops@example.com").await.unwrap();
        assert_eq!(user_id, 7);
    }

    #[tokio::test]
    async fn test_upsert_user_surfaces_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/admin/users")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let err = client_for(&server).upsert_user("ops@example.com").await.unwrap_err();
        assert!(matches!(err, BillingError::AdminApi(_)));
    }

    #[tokio::test]
    async fn test_patch_user_sends_root_and_data_fields() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/admin/users/42")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "max_concurrent_bots": 0,
                "data": {
                    "subscription_status": "none",
                    "subscription_tier": "standard",
                    "updated_by_webhook": 1700000000
                }
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let patch = EntitlementPatch::from_entitlement(&Entitlement::none(1_700_000_000));
        client_for(&server).patch_user(42, &patch).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_users() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/admin/users?limit=10000")
            .with_status(200)
            .with_body(r#"[{"id": 1, "max_concurrent_bots": 3}, {"id": 2}]"#)
            .create_async()
            .await;

        let users = client_for(&server).list_users().await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].max_concurrent_bots, 3);
        assert_eq!(users[1].max_concurrent_bots, 0);
    }
}
