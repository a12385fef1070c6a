//! Botfleet billing API server

use std::sync::Arc;

use anyhow::Context;
use botfleet_api::{routes, AppState, Config};
use botfleet_billing::BillingService;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let billing = BillingService::from_env().context("billing service configuration")?;

    let state = AppState {
        billing: Arc::new(billing),
    };

    let app = routes::create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("binding {}", config.bind_address))?;

    tracing::info!(address = %config.bind_address, "Billing service listening");

    axum::serve(listener, app).await?;

    Ok(())
}
