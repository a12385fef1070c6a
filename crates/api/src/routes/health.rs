//! Health check endpoint

use axum::Json;
use serde_json::{json, Value};

/// Health check endpoint
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "billing" }))
}
