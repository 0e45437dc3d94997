//! Test Helper Utilities
//!
//! Shared fixtures for btr-engine integration tests: a sample chart,
//! scripted predictors and controller/app builders.

#![allow(dead_code)]

use async_trait::async_trait;
use btr_common::clock::ClockTime;
use btr_common::events::EventBus;
use btr_engine::config::RectificationConfig;
use btr_engine::predictors::reasoning::{RefinementRequest, RefinementResponse};
use btr_engine::predictors::{
    FanoutSettings, PredictorError, PredictorRegistry, ReasoningService, TechniquePredictor,
};
use btr_engine::session::{SessionController, SessionStore};
use btr_engine::types::{
    BirthChart, BirthDetails, Body, LifeEventAnswer, PlanetaryPosition, TechniqueEstimate,
    TimeDistribution,
};
use btr_engine::AppState;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// 14:30 near New Delhi, ascendant 128° (Leo)
pub fn sample_chart() -> BirthChart {
    let positions = [
        (Body::Sun, 28.4),
        (Body::Moon, 211.7),
        (Body::Mars, 95.2),
        (Body::Mercury, 12.9),
        (Body::Jupiter, 247.3),
        (Body::Venus, 341.0),
        (Body::Saturn, 283.6),
        (Body::Rahu, 300.4),
        (Body::Ketu, 120.4),
    ];
    BirthChart {
        approximate_time: ClockTime::from_minute(870),
        latitude: 28.6139,
        longitude: 77.209,
        timezone: "Asia/Kolkata".to_string(),
        planetary_positions: positions
            .iter()
            .map(|(body, longitude)| PlanetaryPosition {
                body: *body,
                longitude: *longitude,
                retrograde: false,
            })
            .collect(),
        house_cusps: (0..12).map(|i| (128.0 + i as f64 * 30.0) % 360.0).collect(),
    }
}

/// Every field present at full precision
pub fn precise_details() -> BirthDetails {
    BirthDetails {
        date: Some("1990-04-12".to_string()),
        time: Some("14:30".to_string()),
        latitude: Some("28.6139".to_string()),
        longitude: Some("77.2090".to_string()),
        timezone: Some("Asia/Kolkata".to_string()),
        place: Some("New Delhi".to_string()),
    }
}

/// Integer coordinates (0.3) and a zone abbreviation (0.5): with text metrics
/// unweighted the quality multiplier is (0.3 + 1 + 0.5 + 1) / 4 = 0.7
pub fn rough_details() -> BirthDetails {
    BirthDetails {
        date: Some("1990-04-12".to_string()),
        time: Some("14:30".to_string()),
        latitude: Some("28".to_string()),
        longitude: Some("77".to_string()),
        timezone: Some("IST".to_string()),
        place: None,
    }
}

/// Defaults with the free-text metrics carrying no weight
pub fn details_only_config() -> RectificationConfig {
    let mut config = RectificationConfig::default();
    config.quality_weights.text_word_count = 0.0;
    config.quality_weights.text_diversity = 0.0;
    config.quality_weights.temporal_indicator_density = 0.0;
    config
}

/// Answer every pending question with "no"
pub fn answer_all(question_ids: &[String]) -> Vec<LifeEventAnswer> {
    question_ids
        .iter()
        .map(|id| LifeEventAnswer::new(id.clone(), "no"))
        .collect()
}

// ============================================================================
// Scripted predictors
// ============================================================================

/// All mass on one minute, optionally after a delay
pub struct SpikePredictor {
    pub id: &'static str,
    pub minute: u16,
    pub delay: Option<Duration>,
}

impl SpikePredictor {
    pub fn new(id: &'static str, minute: u16) -> Self {
        Self {
            id,
            minute,
            delay: None,
        }
    }

    pub fn slow(id: &'static str, minute: u16, delay: Duration) -> Self {
        Self {
            id,
            minute,
            delay: Some(delay),
        }
    }
}

#[async_trait]
impl TechniquePredictor for SpikePredictor {
    fn technique_id(&self) -> &'static str {
        self.id
    }

    async fn estimate(
        &self,
        _chart: &BirthChart,
        _answers: &[LifeEventAnswer],
    ) -> Result<TechniqueEstimate, PredictorError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(TechniqueEstimate::new(self.id, TimeDistribution::point(self.minute)))
    }
}

/// Returns a distribution whose mass sums to 720
pub struct UnnormalizedPredictor;

#[async_trait]
impl TechniquePredictor for UnnormalizedPredictor {
    fn technique_id(&self) -> &'static str {
        "broken"
    }

    async fn estimate(
        &self,
        _chart: &BirthChart,
        _answers: &[LifeEventAnswer],
    ) -> Result<TechniqueEstimate, PredictorError> {
        Ok(TechniqueEstimate::new(
            "broken",
            TimeDistribution::from_raw(vec![0.5; 1440]),
        ))
    }
}

/// Reasoning service that is never reachable
pub struct UnreachableReasoning;

#[async_trait]
impl ReasoningService for UnreachableReasoning {
    async fn refine(&self, _request: &RefinementRequest) -> Result<RefinementResponse, PredictorError> {
        Err(PredictorError::Service("connection refused".to_string()))
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn registry(
    config: &RectificationConfig,
    predictors: Vec<Arc<dyn TechniquePredictor>>,
) -> Arc<PredictorRegistry> {
    let mut registry = PredictorRegistry::new(FanoutSettings::from(config));
    for predictor in predictors {
        registry.register(predictor).expect("unique technique ids");
    }
    Arc::new(registry)
}

/// Spike predictors at the given minutes
pub fn spikes(peaks: &[(&'static str, u16)]) -> Vec<Arc<dyn TechniquePredictor>> {
    peaks
        .iter()
        .map(|(id, minute)| Arc::new(SpikePredictor::new(id, *minute)) as Arc<dyn TechniquePredictor>)
        .collect()
}

pub fn controller(
    config: RectificationConfig,
    predictors: Vec<Arc<dyn TechniquePredictor>>,
) -> SessionController {
    let registry = registry(&config, predictors);
    SessionController::new(config, registry, Arc::new(SessionStore::new()), EventBus::new(256))
}

/// Single-connection in-memory archive (each connection would get its own database)
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    btr_engine::db::init_tables(&pool)
        .await
        .expect("Failed to initialize database schema");
    pool
}

/// Router over a controller archiving to an in-memory database
pub async fn test_app(
    config: RectificationConfig,
    predictors: Vec<Arc<dyn TechniquePredictor>>,
) -> (axum::Router, Arc<SessionController>, SqlitePool) {
    let pool = memory_pool().await;
    let event_bus = EventBus::new(256);
    let controller = Arc::new(
        SessionController::new(
            config.clone(),
            registry(&config, predictors),
            Arc::new(SessionStore::new()),
            event_bus.clone(),
        )
        .with_archive(pool.clone()),
    );
    let state = AppState::new(Arc::clone(&controller), event_bus, Some(pool.clone()));
    (btr_engine::build_router(state), controller, pool)
}
