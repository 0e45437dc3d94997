//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok" or "degraded")
    pub status: String,
    /// Module name ("btr-engine")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Short git hash of the build
    pub build: String,
    pub uptime_seconds: u64,
    /// Sessions held in memory
    pub active_sessions: usize,
    /// Sessions in the SQLite archive, absent without an archive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_sessions: Option<i64>,
}

/// GET /health
///
/// Reports "degraded" when the archive is configured but cannot be queried.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let (status, archived_sessions) = match &state.db {
        Some(pool) => match crate::db::sessions::count_sessions(pool).await {
            Ok(count) => ("ok", Some(count)),
            Err(e) => {
                tracing::warn!(error = %e, "Archive unavailable for health check");
                ("degraded", None)
            }
        },
        None => ("ok", None),
    };

    Json(HealthResponse {
        status: status.to_string(),
        module: "btr-engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build: env!("GIT_HASH").to_string(),
        uptime_seconds,
        active_sessions: state.controller.store().len().await,
        archived_sessions,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
