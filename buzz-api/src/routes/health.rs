//! Health check endpoint

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<&'static str>,
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let database = match &state.database {
        Some(pool) => Some(match pool.health_check().await {
            Ok(()) => "ok",
            Err(_) => "unavailable",
        }),
        None => None,
    };

    Json(HealthResponse {
        status: "ok",
        version: buzz_core::VERSION,
        database,
    })
}
