//! btr-engine library interface
//!
//! Multi-technique birth-time rectification: pluggable technique predictors,
//! agreement analysis, confidence aggregation and an adaptive session loop,
//! exposed over HTTP + SSE by the `btr-engine` binary.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod fusion;
pub mod models;
pub mod predictors;
pub mod questions;
pub mod session;
pub mod types;
pub mod validators;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use btr_common::events::EventBus;
use chrono::{DateTime, Utc};
use session::SessionController;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<SessionController>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Session archive, when configured
    pub db: Option<SqlitePool>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(controller: Arc<SessionController>, event_bus: EventBus, db: Option<SqlitePool>) -> Self {
        Self {
            controller,
            event_bus,
            db,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::session_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
