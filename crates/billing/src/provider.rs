//! Payment provider query interface
//!
//! The reconciliation core talks to the provider through this trait so it
//! can be driven by an in-memory fake in tests. `StripeProvider` is the
//! production implementation over async-stripe.

use std::collections::HashMap;

use async_trait::async_trait;
use botfleet_shared::types::{
    Subscription, SubscriptionItem, SubscriptionItems, SubscriptionStatus,
};
use stripe::{CreateCustomer, Customer, CustomerId, ListCustomers, ListSubscriptions,
    SubscriptionId, SubscriptionStatusFilter};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// A provider customer
#[derive(Debug, Clone)]
pub struct ProviderCustomer {
    pub id: String,
    pub email: Option<String>,
}

/// Query interface against the payment provider
#[async_trait]
pub trait SubscriptionProvider: Send + Sync {
    /// Look a customer up by email
    async fn find_customer(&self, email: &str) -> BillingResult<Option<ProviderCustomer>>;

    /// Look a customer up by email, creating one if absent
    async fn find_or_create_customer(&self, email: &str) -> BillingResult<ProviderCustomer>;

    /// Retrieve a customer by provider id
    async fn get_customer(&self, customer_id: &str) -> BillingResult<ProviderCustomer>;

    /// All subscriptions for a customer, regardless of status
    async fn list_subscriptions(&self, customer_id: &str) -> BillingResult<Vec<Subscription>>;

    /// Retrieve a single subscription by provider id
    async fn get_subscription(&self, subscription_id: &str) -> BillingResult<Subscription>;
}

/// Stripe-backed provider implementation
#[derive(Clone)]
pub struct StripeProvider {
    stripe: StripeClient,
}

impl StripeProvider {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }
}

fn parse_customer_id(customer_id: &str) -> BillingResult<CustomerId> {
    customer_id
        .parse::<CustomerId>()
        .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))
}

fn map_status(status: stripe::SubscriptionStatus) -> SubscriptionStatus {
    match status {
        stripe::SubscriptionStatus::Active => SubscriptionStatus::Active,
        stripe::SubscriptionStatus::Trialing => SubscriptionStatus::Trialing,
        stripe::SubscriptionStatus::PastDue => SubscriptionStatus::PastDue,
        stripe::SubscriptionStatus::Unpaid => SubscriptionStatus::Unpaid,
        stripe::SubscriptionStatus::Canceled => SubscriptionStatus::Canceled,
        stripe::SubscriptionStatus::Incomplete => SubscriptionStatus::Incomplete,
        stripe::SubscriptionStatus::IncompleteExpired => SubscriptionStatus::IncompleteExpired,
        stripe::SubscriptionStatus::Paused => SubscriptionStatus::Unknown,
    }
}

fn map_subscription(sub: &stripe::Subscription) -> Subscription {
    let items = SubscriptionItems {
        data: sub
            .items
            .data
            .iter()
            .map(|item| SubscriptionItem {
                quantity: item.quantity.unwrap_or(0),
            })
            .collect(),
    };

    Subscription {
        id: sub.id.to_string(),
        status: map_status(sub.status),
        customer: Some(sub.customer.id().to_string()),
        cancel_at_period_end: sub.cancel_at_period_end,
        cancel_at: sub.cancel_at,
        canceled_at: sub.canceled_at,
        current_period_start: Some(sub.current_period_start),
        current_period_end: Some(sub.current_period_end),
        trial_start: sub.trial_start,
        trial_end: sub.trial_end,
        items,
        metadata: sub.metadata.clone(),
        customer_details: None,
    }
}

#[async_trait]
impl SubscriptionProvider for StripeProvider {
    async fn find_customer(&self, email: &str) -> BillingResult<Option<ProviderCustomer>> {
        let params = ListCustomers {
            email: Some(email),
            limit: Some(1),
            ..Default::default()
        };
        let customers = Customer::list(self.stripe.inner(), &params).await?;

        Ok(customers.data.into_iter().next().map(|customer| ProviderCustomer {
            id: customer.id.to_string(),
            email: customer.email,
        }))
    }

    async fn find_or_create_customer(&self, email: &str) -> BillingResult<ProviderCustomer> {
        if let Some(existing) = self.find_customer(email).await? {
            return Ok(existing);
        }

        let mut metadata = HashMap::new();
        metadata.insert("userEmail".to_string(), email.to_string());

        let params = CreateCustomer {
            email: Some(email),
            metadata: Some(metadata),
            ..Default::default()
        };
        let customer = Customer::create(self.stripe.inner(), params).await?;

        tracing::info!(
            customer_id = %customer.id,
            email = %email,
            "Created Stripe customer"
        );

        Ok(ProviderCustomer {
            id: customer.id.to_string(),
            email: customer.email,
        })
    }

    async fn get_customer(&self, customer_id: &str) -> BillingResult<ProviderCustomer> {
        let id = parse_customer_id(customer_id)?;
        let customer = Customer::retrieve(self.stripe.inner(), &id, &[]).await?;

        Ok(ProviderCustomer {
            id: customer.id.to_string(),
            email: customer.email,
        })
    }

    async fn list_subscriptions(&self, customer_id: &str) -> BillingResult<Vec<Subscription>> {
        let id = parse_customer_id(customer_id)?;

        let params = ListSubscriptions {
            customer: Some(id),
            status: Some(SubscriptionStatusFilter::All),
            limit: Some(50),
            ..Default::default()
        };
        let subscriptions = stripe::Subscription::list(self.stripe.inner(), &params).await?;

        Ok(subscriptions.data.iter().map(map_subscription).collect())
    }

    async fn get_subscription(&self, subscription_id: &str) -> BillingResult<Subscription> {
        let id = subscription_id
            .parse::<SubscriptionId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid subscription ID: {}", e)))?;
        let subscription = stripe::Subscription::retrieve(self.stripe.inner(), &id, &[]).await?;

        Ok(map_subscription(&subscription))
    }
}
