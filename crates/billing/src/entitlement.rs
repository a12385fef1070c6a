//! Entitlement Module
//!
//! Provides a unified view of how many concurrent bots a customer may run
//! based on their provider subscription state.
//!
//! ## Design Principles
//!
//! 1. **Single Source of Truth**: `select_best()` over the full provider
//!    subscription list is THE function that determines access
//! 2. **Deterministic**: Same inputs always produce same outputs
//! 3. **Testable**: Pure functions with clear inputs/outputs

use botfleet_shared::types::{Entitlement, EntitlementStatus, Subscription, SubscriptionStatus};

/// What happens to contracted bots while a cancellation is pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancellationPolicy {
    /// Keep the paid quantity until the cancellation takes effect
    #[default]
    PreserveUntilPeriodEnd,
    /// Drop to zero as soon as the cancellation is scheduled
    RevokeOnSchedule,
}

impl CancellationPolicy {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "preserve" | "preserve_until_period_end" => Some(Self::PreserveUntilPeriodEnd),
            "revoke" | "revoke_on_schedule" => Some(Self::RevokeOnSchedule),
            _ => None,
        }
    }
}

/// Priority order used by `select_best`; earlier is more authoritative.
/// Statuses not listed here rank below everything listed.
const STATUS_PRIORITY: &[SubscriptionStatus] = &[
    SubscriptionStatus::Active,
    SubscriptionStatus::Trialing,
    SubscriptionStatus::Scheduled,
    SubscriptionStatus::PastDue,
    SubscriptionStatus::Unpaid,
    SubscriptionStatus::Canceled,
    SubscriptionStatus::Incomplete,
];

fn status_rank(status: SubscriptionStatus) -> usize {
    STATUS_PRIORITY
        .iter()
        .position(|s| *s == status)
        .unwrap_or(STATUS_PRIORITY.len())
}

fn normalize(sub: &Subscription) -> EntitlementStatus {
    if sub.cancel_at_period_end && sub.status == SubscriptionStatus::Active {
        return EntitlementStatus::ScheduledToCancel;
    }
    match sub.status {
        SubscriptionStatus::Active => EntitlementStatus::Active,
        SubscriptionStatus::Trialing => EntitlementStatus::Trialing,
        SubscriptionStatus::PastDue => EntitlementStatus::PastDue,
        SubscriptionStatus::Unpaid => EntitlementStatus::Unpaid,
        SubscriptionStatus::Canceled => EntitlementStatus::Canceled,
        SubscriptionStatus::Incomplete => EntitlementStatus::Incomplete,
        SubscriptionStatus::IncompleteExpired => EntitlementStatus::IncompleteExpired,
        SubscriptionStatus::Scheduled | SubscriptionStatus::Unknown => EntitlementStatus::Unknown,
    }
}

/// Normalize one provider subscription into an entitlement record
///
/// Bot count rules:
/// - 0 for canceled/expired/unpaid subscriptions
/// - the contracted quantity otherwise, including while a cancellation is
///   scheduled (access lasts until the effective date) unless the
///   `RevokeOnSchedule` policy is configured
pub fn classify(sub: &Subscription, policy: CancellationPolicy, now: i64) -> Entitlement {
    let scheduled_to_cancel = sub.cancel_at_period_end;
    let status = normalize(sub);

    let max_concurrent_bots = if status.revokes_access() {
        0
    } else if scheduled_to_cancel && policy == CancellationPolicy::RevokeOnSchedule {
        0
    } else {
        sub.quantity()
    };

    // The date access actually ends: the scheduled effective date while a
    // cancellation is pending, the cancellation timestamp once terminal
    let cancellation_effective_at = if scheduled_to_cancel {
        sub.cancel_at.or(sub.current_period_end)
    } else if status == EntitlementStatus::Canceled {
        sub.canceled_at
    } else {
        None
    };

    let tier = sub
        .metadata
        .get("tier")
        .cloned()
        .filter(|tier| !tier.is_empty())
        .unwrap_or_else(|| Entitlement::DEFAULT_TIER.to_string());

    Entitlement {
        status,
        max_concurrent_bots,
        scheduled_to_cancel,
        cancellation_effective_at,
        current_period_start: sub.current_period_start,
        current_period_end: sub.current_period_end,
        trial_start: sub.trial_start,
        trial_end: sub.trial_end,
        tier,
        stripe_customer_id: sub.customer.clone(),
        stripe_subscription_id: Some(sub.id.clone()),
        reconciled_at: now,
    }
}

/// Pick the authoritative subscription from a customer's full list and
/// classify it
///
/// A customer accumulates subscription objects over time (old canceled
/// ones, an expired trial, the current plan); only the most valuable
/// current state drives entitlement. Ties keep input order.
pub fn select_best(subs: &[Subscription], policy: CancellationPolicy, now: i64) -> Entitlement {
    match subs.iter().min_by_key(|sub| status_rank(sub.status)) {
        Some(best) => {
            tracing::debug!(
                subscription_id = %best.id,
                status = %best.status,
                candidates = subs.len(),
                "Selected authoritative subscription"
            );
            classify(best, policy, now)
        }
        None => Entitlement::none(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botfleet_shared::types::{SubscriptionItem, SubscriptionItems};

    const NOW: i64 = 1_700_000_000;

    fn sub(id: &str, status: SubscriptionStatus, quantity: u64) -> Subscription {
        Subscription {
            id: id.to_string(),
            status,
            customer: Some("cus_1".to_string()),
            cancel_at_period_end: false,
            cancel_at: None,
            canceled_at: None,
            current_period_start: Some(NOW - 86_400),
            current_period_end: Some(NOW + 86_400),
            trial_start: None,
            trial_end: None,
            items: SubscriptionItems {
                data: vec![SubscriptionItem { quantity }],
            },
            metadata: Default::default(),
            customer_details: None,
        }
    }

    #[test]
    fn test_terminal_statuses_zero_bots() {
        for status in [
            SubscriptionStatus::Canceled,
            SubscriptionStatus::IncompleteExpired,
            SubscriptionStatus::Unpaid,
        ] {
            let ent = classify(&sub("sub_1", status, 7), CancellationPolicy::default(), NOW);
            assert_eq!(ent.max_concurrent_bots, 0, "status {}", status);
        }
    }

    #[test]
    fn test_active_keeps_quantity() {
        let ent = classify(
            &sub("sub_1", SubscriptionStatus::Active, 7),
            CancellationPolicy::default(),
            NOW,
        );
        assert_eq!(ent.status, EntitlementStatus::Active);
        assert_eq!(ent.max_concurrent_bots, 7);
        assert_eq!(ent.stripe_subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(ent.reconciled_at, NOW);
    }

    #[test]
    fn test_scheduled_cancellation_preserves_access() {
        let mut s = sub("sub_1", SubscriptionStatus::Active, 3);
        s.cancel_at_period_end = true;
        let ent = classify(&s, CancellationPolicy::PreserveUntilPeriodEnd, NOW);
        assert_eq!(ent.status, EntitlementStatus::ScheduledToCancel);
        assert!(ent.scheduled_to_cancel);
        assert_eq!(ent.max_concurrent_bots, 3);
    }

    #[test]
    fn test_revoke_on_schedule_policy_zeroes_bots() {
        let mut s = sub("sub_1", SubscriptionStatus::Active, 3);
        s.cancel_at_period_end = true;
        let ent = classify(&s, CancellationPolicy::RevokeOnSchedule, NOW);
        assert_eq!(ent.status, EntitlementStatus::ScheduledToCancel);
        assert_eq!(ent.max_concurrent_bots, 0);
    }

    #[test]
    fn test_cancellation_date_prefers_cancel_at() {
        let mut s = sub("sub_1", SubscriptionStatus::Active, 1);
        s.cancel_at_period_end = true;
        s.cancel_at = Some(NOW + 1000);
        let ent = classify(&s, CancellationPolicy::default(), NOW);
        assert_eq!(ent.cancellation_effective_at, Some(NOW + 1000));

        // Without an explicit cancel_at the period end is the effective date
        s.cancel_at = None;
        let ent = classify(&s, CancellationPolicy::default(), NOW);
        assert_eq!(ent.cancellation_effective_at, s.current_period_end);
    }

    #[test]
    fn test_canceled_uses_canceled_at() {
        let mut s = sub("sub_1", SubscriptionStatus::Canceled, 1);
        s.canceled_at = Some(NOW - 500);
        let ent = classify(&s, CancellationPolicy::default(), NOW);
        assert_eq!(ent.cancellation_effective_at, Some(NOW - 500));
    }

    #[test]
    fn test_active_has_no_cancellation_date() {
        let ent = classify(
            &sub("sub_1", SubscriptionStatus::Active, 1),
            CancellationPolicy::default(),
            NOW,
        );
        assert_eq!(ent.cancellation_effective_at, None);
    }

    #[test]
    fn test_unrecognized_status_keeps_quantity() {
        let ent = classify(
            &sub("sub_1", SubscriptionStatus::Unknown, 2),
            CancellationPolicy::default(),
            NOW,
        );
        assert_eq!(ent.status, EntitlementStatus::Unknown);
        assert_eq!(ent.max_concurrent_bots, 2);
    }

    #[test]
    fn test_tier_label_from_metadata() {
        let mut s = sub("sub_1", SubscriptionStatus::Active, 1);
        s.metadata.insert("tier".to_string(), "startup".to_string());
        let ent = classify(&s, CancellationPolicy::default(), NOW);
        assert_eq!(ent.tier, "startup");

        let ent = classify(
            &sub("sub_2", SubscriptionStatus::Active, 1),
            CancellationPolicy::default(),
            NOW,
        );
        assert_eq!(ent.tier, "standard");
    }

    #[test]
    fn test_select_best_empty_is_none() {
        let ent = select_best(&[], CancellationPolicy::default(), NOW);
        assert_eq!(ent.status, EntitlementStatus::None);
        assert_eq!(ent.max_concurrent_bots, 0);
        assert_eq!(ent.current_period_end, None);
    }

    #[test]
    fn test_select_best_prefers_active() {
        let subs = vec![
            sub("sub_old", SubscriptionStatus::Canceled, 9),
            sub("sub_new", SubscriptionStatus::Active, 5),
            sub("sub_trial", SubscriptionStatus::Trialing, 1),
        ];
        let ent = select_best(&subs, CancellationPolicy::default(), NOW);
        assert_eq!(ent.stripe_subscription_id.as_deref(), Some("sub_new"));
        assert_eq!(ent.max_concurrent_bots, 5);
    }

    #[test]
    fn test_select_best_tie_keeps_input_order() {
        let subs = vec![
            sub("sub_a", SubscriptionStatus::Active, 2),
            sub("sub_b", SubscriptionStatus::Active, 8),
        ];
        let ent = select_best(&subs, CancellationPolicy::default(), NOW);
        assert_eq!(ent.stripe_subscription_id.as_deref(), Some("sub_a"));
    }

    #[test]
    fn test_unranked_status_loses_to_ranked() {
        let subs = vec![
            sub("sub_weird", SubscriptionStatus::Unknown, 9),
            sub("sub_old", SubscriptionStatus::Canceled, 0),
        ];
        let ent = select_best(&subs, CancellationPolicy::default(), NOW);
        assert_eq!(ent.stripe_subscription_id.as_deref(), Some("sub_old"));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            CancellationPolicy::from_str("preserve"),
            Some(CancellationPolicy::PreserveUntilPeriodEnd)
        );
        assert_eq!(
            CancellationPolicy::from_str("REVOKE"),
            Some(CancellationPolicy::RevokeOnSchedule)
        );
        assert_eq!(CancellationPolicy::from_str("other"), None);
    }
}
