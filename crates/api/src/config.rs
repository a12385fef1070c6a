//! Application configuration

use std::env;

/// Application configuration loaded from environment variables
///
/// Billing collaborator configuration (Stripe keys, admin API credentials,
/// price tiers) is loaded by `botfleet_billing::BillingService::from_env`.
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
        }
    }
}
