//! Common types used across Botfleet
//!
//! Wire shapes exchanged with the payment provider and the entitlement
//! record written to the downstream admin store.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Provider subscription state
// =============================================================================

/// Raw subscription status as reported by the payment provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Unpaid,
    Canceled,
    Incomplete,
    IncompleteExpired,
    /// Pending activation via a subscription schedule
    Scheduled,
    /// Any status string this service does not recognize
    #[serde(other)]
    Unknown,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Scheduled => "scheduled",
            SubscriptionStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// A single subscription line item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionItem {
    #[serde(default)]
    pub quantity: u64,
}

/// Line item container, shaped like the provider's `items` list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

/// Customer contact details embedded in some event payloads
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
}

/// A subscription as returned by the payment provider
///
/// All timestamps are UNIX seconds, as on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub status: SubscriptionStatus,
    /// Provider customer id the subscription belongs to
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    /// When a scheduled cancellation will take effect
    #[serde(default)]
    pub cancel_at: Option<i64>,
    /// When the subscription was actually canceled
    #[serde(default)]
    pub canceled_at: Option<i64>,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub trial_start: Option<i64>,
    #[serde(default)]
    pub trial_end: Option<i64>,
    #[serde(default)]
    pub items: SubscriptionItems,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
}

impl Subscription {
    /// Contracted quantity, taken from the first line item
    pub fn quantity(&self) -> u64 {
        self.items.data.first().map(|item| item.quantity).unwrap_or(0)
    }

    /// Best-effort email for the subscription's owner
    ///
    /// Prefers explicit metadata, then customer details carried on the
    /// event. Callers fall back to a provider customer lookup when this
    /// returns `None`.
    pub fn email_hint(&self) -> Option<String> {
        self.metadata
            .get("userEmail")
            .or_else(|| self.metadata.get("email"))
            .cloned()
            .filter(|email| !email.is_empty())
            .or_else(|| {
                self.customer_details
                    .as_ref()
                    .and_then(|details| details.email.clone())
                    .filter(|email| !email.is_empty())
            })
    }
}

// =============================================================================
// Entitlement record
// =============================================================================

/// Normalized entitlement status written downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementStatus {
    Active,
    Trialing,
    /// Active subscription with a cancellation scheduled at period end
    ScheduledToCancel,
    PastDue,
    Unpaid,
    Canceled,
    Incomplete,
    IncompleteExpired,
    /// No subscription at all (or no provider customer)
    None,
    Unknown,
}

impl EntitlementStatus {
    /// Whether this status carries zero contracted bots regardless of
    /// the subscription's quantity
    pub fn revokes_access(&self) -> bool {
        matches!(
            self,
            EntitlementStatus::Canceled
                | EntitlementStatus::IncompleteExpired
                | EntitlementStatus::Unpaid
                | EntitlementStatus::None
        )
    }
}

impl fmt::Display for EntitlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntitlementStatus::Active => "active",
            EntitlementStatus::Trialing => "trialing",
            EntitlementStatus::ScheduledToCancel => "scheduled_to_cancel",
            EntitlementStatus::PastDue => "past_due",
            EntitlementStatus::Unpaid => "unpaid",
            EntitlementStatus::Canceled => "canceled",
            EntitlementStatus::Incomplete => "incomplete",
            EntitlementStatus::IncompleteExpired => "incomplete_expired",
            EntitlementStatus::None => "none",
            EntitlementStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Current entitlement of a single customer, derived from provider state
///
/// Records are recomputed in full on every reconciliation, never patched
/// incrementally. Timestamps are UNIX seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entitlement {
    pub status: EntitlementStatus,
    pub max_concurrent_bots: u64,
    pub scheduled_to_cancel: bool,
    /// The date access actually ends, when one is known
    pub cancellation_effective_at: Option<i64>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub trial_start: Option<i64>,
    pub trial_end: Option<i64>,
    /// Plan label from subscription metadata, "standard" when unset
    pub tier: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    /// When this record was computed
    pub reconciled_at: i64,
}

impl Entitlement {
    pub const DEFAULT_TIER: &'static str = "standard";

    /// Record for a customer with no subscription at all
    pub fn none(reconciled_at: i64) -> Self {
        Self {
            status: EntitlementStatus::None,
            max_concurrent_bots: 0,
            scheduled_to_cancel: false,
            cancellation_effective_at: None,
            current_period_start: None,
            current_period_end: None,
            trial_start: None,
            trial_end: None,
            tier: Self::DEFAULT_TIER.to_string(),
            stripe_customer_id: None,
            stripe_subscription_id: None,
            reconciled_at,
        }
    }
}
