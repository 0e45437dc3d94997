//! Technique Predictors
//!
//! Each astrological technique is an independent estimator of the birth
//! minute behind the [`TechniquePredictor`] trait. The [`PredictorRegistry`]
//! keys them by technique id and runs them concurrently for one analysis pass.
//!
//! # Predictors
//! 1. **tattva** - elemental sub-periods counted from local sunrise
//! 2. **nadi** - house occupancy from the projected ascendant
//! 3. **kp** - Vimshottari sub-lord of the projected ascendant
//!
//! Any of them can be wrapped in [`reasoning::ReasonedPredictor`] to have an
//! external reasoning service refine its candidates.
//!
//! # Fan-out
//! All predictors run concurrently. A predictor that errors is retried; one
//! that exceeds its timeout is not, so the barrier waits at most one timeout
//! per predictor. Either way it ends up replaced by a degraded Gaussian around
//! the chart's approximate time. One technique's outage never aborts the pass.

pub mod distribution;
pub mod kp;
pub mod nadi;
pub mod reasoning;
pub mod tattva;

use crate::config::RectificationConfig;
use crate::questions::LifeEventCategory;
use crate::types::{BirthChart, LifeEventAnswer, RectificationError, TechniqueEstimate};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

pub use kp::KpPredictor;
pub use nadi::NadiPredictor;
pub use reasoning::{HttpReasoningService, ReasonedPredictor, ReasoningService};
pub use tattva::TattvaPredictor;

/// Predictor-local failure; converted to a degraded estimate at the fan-out
#[derive(Debug, Clone, Error)]
pub enum PredictorError {
    /// The chart lacks something this technique needs
    #[error("missing input: {0}")]
    MissingInput(String),

    /// External reasoning service failure
    #[error("reasoning service: {0}")]
    Service(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Predictor trait - every technique implements this
///
/// Implementations must be deterministic: identical chart and answers give
/// an identical estimate.
#[async_trait]
pub trait TechniquePredictor: Send + Sync {
    /// Unique technique identifier (e.g. "tattva", "nadi", "kp")
    fn technique_id(&self) -> &'static str;

    /// Life-event categories this technique reacts to most strongly
    fn sensitive_categories(&self) -> &'static [LifeEventCategory] {
        &[]
    }

    async fn estimate(
        &self,
        chart: &BirthChart,
        answers: &[LifeEventAnswer],
    ) -> Result<TechniqueEstimate, PredictorError>;
}

/// Fan-out policy
#[derive(Debug, Clone)]
pub struct FanoutSettings {
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub fallback_sigma_minutes: f64,
}

impl From<&RectificationConfig> for FanoutSettings {
    fn from(config: &RectificationConfig) -> Self {
        Self {
            timeout: config.predictor_timeout(),
            retry_attempts: config.predictor_retry_attempts,
            fallback_sigma_minutes: config.fallback_sigma_minutes,
        }
    }
}

/// One predictor's contribution to an analysis pass
#[derive(Debug, Clone)]
pub struct PredictorOutcome {
    pub estimate: TechniqueEstimate,
    /// Last failure when the estimate is the fan-out fallback
    pub failure: Option<RectificationError>,
}

impl PredictorOutcome {
    /// Why the estimate is degraded, if it is
    pub fn degraded_reason(&self) -> Option<String> {
        match (&self.failure, self.estimate.degraded) {
            (Some(failure), _) => Some(failure.to_string()),
            (None, true) => Some("refinement unavailable, heuristic estimate kept".to_string()),
            (None, false) => None,
        }
    }
}

/// Registry of predictors keyed by technique id
pub struct PredictorRegistry {
    predictors: BTreeMap<&'static str, Arc<dyn TechniquePredictor>>,
    settings: FanoutSettings,
}

impl PredictorRegistry {
    pub fn new(settings: FanoutSettings) -> Self {
        Self {
            predictors: BTreeMap::new(),
            settings,
        }
    }

    /// Tattva, Nadi and KP, optionally refined by a reasoning service
    pub fn with_defaults(
        config: &RectificationConfig,
        reasoning: Option<(Arc<dyn ReasoningService>, usize)>,
    ) -> Result<Self, RectificationError> {
        let mut registry = Self::new(FanoutSettings::from(config));
        let defaults: Vec<Arc<dyn TechniquePredictor>> = vec![
            Arc::new(TattvaPredictor::from_config(config)),
            Arc::new(NadiPredictor::from_config(config)),
            Arc::new(KpPredictor::from_config(config)),
        ];
        for predictor in defaults {
            let predictor: Arc<dyn TechniquePredictor> = match &reasoning {
                Some((service, candidates)) => Arc::new(ReasonedPredictor::new(
                    predictor,
                    Arc::clone(service),
                    *candidates,
                )),
                None => predictor,
            };
            registry.register(predictor)?;
        }
        Ok(registry)
    }

    /// Add a predictor; ids must be unique
    pub fn register(&mut self, predictor: Arc<dyn TechniquePredictor>) -> Result<(), RectificationError> {
        let id = predictor.technique_id();
        if self.predictors.contains_key(id) {
            return Err(RectificationError::Configuration(format!(
                "technique '{}' registered twice",
                id
            )));
        }
        self.predictors.insert(id, predictor);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.predictors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictors.is_empty()
    }

    pub fn technique_ids(&self) -> Vec<&'static str> {
        self.predictors.keys().copied().collect()
    }

    /// technique id → sensitive categories, used for question selection
    pub fn sensitivities(&self) -> BTreeMap<String, Vec<LifeEventCategory>> {
        self.predictors
            .iter()
            .map(|(id, p)| (id.to_string(), p.sensitive_categories().to_vec()))
            .collect()
    }

    /// Run every predictor concurrently; results come back in technique id order.
    ///
    /// Returns `Cancelled` as soon as `cancel` fires; nothing is partially applied.
    pub async fn estimate_all(
        &self,
        session_id: Uuid,
        chart: &BirthChart,
        answers: &[LifeEventAnswer],
        cancel: &CancellationToken,
    ) -> Result<Vec<PredictorOutcome>, RectificationError> {
        let futures = self
            .predictors
            .values()
            .map(|predictor| self.run_one(session_id, predictor.as_ref(), chart, answers));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RectificationError::Cancelled),
            outcomes = join_all(futures) => Ok(outcomes),
        }
    }

    async fn run_one(
        &self,
        session_id: Uuid,
        predictor: &dyn TechniquePredictor,
        chart: &BirthChart,
        answers: &[LifeEventAnswer],
    ) -> PredictorOutcome {
        let id = predictor.technique_id();
        let timeout_ms = self.settings.timeout.as_millis() as u64;
        let mut failure = None;

        for attempt in 0..=self.settings.retry_attempts {
            match tokio::time::timeout(self.settings.timeout, predictor.estimate(chart, answers)).await {
                Ok(Ok(mut estimate)) => {
                    estimate.technique_id = id.to_string();
                    debug!(
                        session_id = %session_id,
                        technique = id,
                        peak = estimate.peak_time,
                        degraded = estimate.degraded,
                        "Technique estimate ready"
                    );
                    return PredictorOutcome {
                        estimate,
                        failure: None,
                    };
                }
                Ok(Err(e)) => {
                    warn!(
                        session_id = %session_id,
                        technique = id,
                        attempt = attempt + 1,
                        error = %e,
                        "Predictor failed"
                    );
                    failure = Some(RectificationError::PredictorFailure {
                        technique_id: id.to_string(),
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!(
                        session_id = %session_id,
                        technique = id,
                        attempt = attempt + 1,
                        timeout_ms,
                        "Predictor timed out"
                    );
                    failure = Some(RectificationError::PredictorTimeout {
                        technique_id: id.to_string(),
                        timeout_ms,
                    });
                    break;
                }
            }
        }

        warn!(
            session_id = %session_id,
            technique = id,
            "Using degraded fallback estimate"
        );
        PredictorOutcome {
            estimate: TechniqueEstimate::degraded_fallback(
                id,
                chart.approximate_minute(),
                self.settings.fallback_sigma_minutes,
            ),
            failure,
        }
    }
}

// ============================================================================
// Mock Predictor for Testing
// ============================================================================


// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::mock::MockPredictor;
    use super::*;
    use crate::types::{Body, PlanetaryPosition};
    use btr_common::clock::ClockTime;
    use std::sync::atomic::Ordering;

    /// Chart used across predictor tests: 14:30 near New Delhi
    pub(crate) fn test_chart() -> BirthChart {
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
            latitude: 28.61,
            longitude: 77.21,
            timezone: "UTC+05:30".to_string(),
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

    fn settings(timeout_ms: u64, retries: u32) -> FanoutSettings {
        FanoutSettings {
            timeout: Duration::from_millis(timeout_ms),
            retry_attempts: retries,
            fallback_sigma_minutes: 30.0,
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = PredictorRegistry::new(settings(1000, 0));
        registry.register(Arc::new(MockPredictor::new("kp", 10))).unwrap();
        let err = registry
            .register(Arc::new(MockPredictor::new("kp", 20)))
            .unwrap_err();
        assert!(matches!(err, RectificationError::Configuration(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_defaults_registered() {
        let registry = PredictorRegistry::with_defaults(&RectificationConfig::default(), None).unwrap();
        assert_eq!(registry.technique_ids(), vec!["kp", "nadi", "tattva"]);
        assert!(!registry.sensitivities()["nadi"].is_empty());
    }

    #[tokio::test]
    async fn test_results_in_id_order() {
        let mut registry = PredictorRegistry::new(settings(1000, 0));
        registry.register(Arc::new(MockPredictor::new("tattva", 100))).unwrap();
        registry.register(Arc::new(MockPredictor::new("kp", 200))).unwrap();

        let outcomes = registry
            .estimate_all(Uuid::new_v4(), &test_chart(), &[], &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<_> = outcomes.iter().map(|o| o.estimate.technique_id.as_str()).collect();
        assert_eq!(ids, vec!["kp", "tattva"]);
        assert!(outcomes.iter().all(|o| o.failure.is_none() && !o.estimate.degraded));
    }

    #[tokio::test]
    async fn test_failure_is_retried_before_degrading() {
        let flaky = Arc::new(MockPredictor::failing("nadi", 1));
        let mut registry = PredictorRegistry::new(settings(1000, 1));
        registry.register(flaky.clone()).unwrap();

        let outcomes = registry
            .estimate_all(Uuid::new_v4(), &test_chart(), &[], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
        assert!(!outcomes[0].estimate.degraded);
    }

    #[tokio::test]
    async fn test_persistent_failure_degrades() {
        let mut registry = PredictorRegistry::new(settings(1000, 1));
        registry.register(Arc::new(MockPredictor::failing("nadi", 10))).unwrap();
        registry.register(Arc::new(MockPredictor::new("kp", 500))).unwrap();

        let outcomes = registry
            .estimate_all(Uuid::new_v4(), &test_chart(), &[], &CancellationToken::new())
            .await
            .unwrap();

        let nadi = &outcomes[1];
        assert!(nadi.estimate.degraded);
        assert_eq!(nadi.estimate.peak_time, 870);
        assert!(matches!(
            nadi.failure,
            Some(RectificationError::PredictorFailure { .. })
        ));
        assert!(!outcomes[0].estimate.degraded);
    }

    #[tokio::test]
    async fn test_timeout_degrades_without_retry() {
        let slow = Arc::new(MockPredictor::slow("tattva", Duration::from_secs(5)));
        let mut registry = PredictorRegistry::new(settings(20, 1));
        registry.register(slow.clone()).unwrap();

        let outcomes = registry
            .estimate_all(Uuid::new_v4(), &test_chart(), &[], &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcomes[0].estimate.degraded);
        assert!(matches!(
            outcomes[0].failure,
            Some(RectificationError::PredictorTimeout { timeout_ms: 20, .. })
        ));
        assert!(outcomes[0].degraded_reason().unwrap().contains("timed out"));
        assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_returns_cancelled() {
        let mut registry = PredictorRegistry::new(settings(10_000, 0));
        registry
            .register(Arc::new(MockPredictor::slow("tattva", Duration::from_secs(5))))
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = registry
            .estimate_all(Uuid::new_v4(), &test_chart(), &[], &cancel)
            .await;
        assert!(matches!(result, Err(RectificationError::Cancelled)));
    }
}
