//! Tiered subscription pricing
//!
//! The bot subscription is priced with cumulative volume tiers: each unit
//! is billed at the rate of the tier its cumulative position falls into
//! (the first unit at the first tier's rate, units two through five at
//! the second tier's rate, and so on). The tier table is static
//! configuration; catalog synchronization lives outside this service.

use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};

/// One pricing tier
///
/// `up_to` is the cumulative upper bound (inclusive); `None` marks the
/// final, unbounded tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTier {
    pub up_to: Option<u64>,
    /// Price per unit in minor currency units (cents)
    pub unit_amount: i64,
}

/// One line of a price breakdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierLine {
    /// First cumulative unit billed at this tier (1-based)
    pub from: u64,
    /// Cumulative upper bound of the tier, `None` for the unbounded tier
    pub up_to: Option<u64>,
    /// Units billed at this tier
    pub quantity: u64,
    pub unit_amount: i64,
    pub subtotal: i64,
}

/// Validated, ordered tier table
///
/// The tiers partition all positive quantities: strictly increasing
/// bounds with a single unbounded tier at the end, so every unit falls
/// into exactly one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierTable {
    tiers: Vec<PriceTier>,
}

impl TierTable {
    /// Build a validated tier table
    ///
    /// Rejects empty tables, non-increasing bounds, an unbounded tier
    /// before the end, and a bounded final tier. A malformed table is a
    /// configuration error and must never silently misprice.
    pub fn new(tiers: Vec<PriceTier>) -> BillingResult<Self> {
        if tiers.is_empty() {
            return Err(BillingError::Config("price tier table is empty".to_string()));
        }

        let mut prev: u64 = 0;
        for (idx, tier) in tiers.iter().enumerate() {
            let last = idx == tiers.len() - 1;
            match tier.up_to {
                Some(bound) if last => {
                    return Err(BillingError::Config(format!(
                        "final price tier must be unbounded, got up_to={}",
                        bound
                    )));
                }
                Some(bound) => {
                    if bound <= prev {
                        return Err(BillingError::Config(format!(
                            "price tier bounds must be strictly increasing: {} after {}",
                            bound, prev
                        )));
                    }
                    prev = bound;
                }
                None if last => {}
                None => {
                    return Err(BillingError::Config(
                        "only the final price tier may be unbounded".to_string(),
                    ));
                }
            }
        }

        Ok(Self { tiers })
    }

    /// Parse a tier table from its JSON representation
    pub fn from_json(json: &str) -> BillingResult<Self> {
        let tiers: Vec<PriceTier> = serde_json::from_str(json)
            .map_err(|e| BillingError::Config(format!("invalid price tier JSON: {}", e)))?;
        Self::new(tiers)
    }

    /// The built-in "Startup" catalog for the bot subscription
    pub fn startup() -> Self {
        // Matches the synced Stripe price; construction cannot fail
        Self {
            tiers: vec![
                PriceTier { up_to: Some(1), unit_amount: 1200 },
                PriceTier { up_to: Some(5), unit_amount: 2400 },
                PriceTier { up_to: Some(50), unit_amount: 2000 },
                PriceTier { up_to: Some(200), unit_amount: 1500 },
                PriceTier { up_to: None, unit_amount: 1000 },
            ],
        }
    }

    pub fn tiers(&self) -> &[PriceTier] {
        &self.tiers
    }

    /// Total price for `quantity` units in minor currency units
    pub fn total(&self, quantity: u64) -> i64 {
        self.breakdown(quantity).iter().map(|line| line.subtotal).sum()
    }

    /// Per-tier breakdown for `quantity` units
    ///
    /// Walks tiers in order; each bounded tier absorbs up to its span of
    /// units, the final tier absorbs whatever remains. Zero quantity
    /// yields an empty breakdown.
    pub fn breakdown(&self, quantity: u64) -> Vec<TierLine> {
        let mut lines = Vec::new();
        let mut remaining = quantity;
        let mut prev: u64 = 0;

        for tier in &self.tiers {
            if remaining == 0 {
                break;
            }
            let span = match tier.up_to {
                Some(bound) => (bound - prev).min(remaining),
                None => remaining,
            };
            lines.push(TierLine {
                from: prev + 1,
                up_to: tier.up_to,
                quantity: span,
                unit_amount: tier.unit_amount,
                subtotal: tier.unit_amount * span as i64,
            });
            remaining -= span;
            if let Some(bound) = tier.up_to {
                prev = bound;
            }
        }

        lines
    }
}
