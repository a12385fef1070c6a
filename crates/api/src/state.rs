//! Shared application state

use std::sync::Arc;

use botfleet_billing::BillingService;

/// State shared across request handlers
#[derive(Clone)]
pub struct AppState {
    pub billing: Arc<BillingService>,
}
