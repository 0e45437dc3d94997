//! External reasoning refinement
//!
//! A [`ReasoningService`] receives a technique's strongest candidate minutes
//! together with the native's answers and returns multiplicative
//! adjustments. [`ReasonedPredictor`] wraps any predictor with one; when the
//! service is unreachable the wrapped predictor's own estimate is used,
//! marked degraded.

use super::{PredictorError, TechniquePredictor};
use crate::config::ReasoningConfig;
use crate::questions::LifeEventCategory;
use crate::types::{BirthChart, LifeEventAnswer, TechniqueEstimate, TimeDistribution};
use async_trait::async_trait;
use btr_common::clock::{circular_distance, format_minute_of_day};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("btr-engine/", env!("CARGO_PKG_VERSION"));

/// Adjustment factors are clamped to this range
const MIN_FACTOR: f64 = 0.25;
const MAX_FACTOR: f64 = 4.0;

/// Minutes either side of an adjusted candidate that share its factor
const ADJUSTMENT_RADIUS: u16 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMinute {
    pub minute: u16,
    /// "HH:MM"
    pub time: String,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSummary {
    pub question_id: String,
    pub value: String,
}

/// Body of `POST {url}/refine`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementRequest {
    pub technique_id: String,
    pub approximate_time: String,
    pub candidates: Vec<CandidateMinute>,
    pub answers: Vec<AnswerSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub minute: u16,
    pub factor: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefinementResponse {
    #[serde(default)]
    pub adjustments: Vec<Adjustment>,
}

#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn refine(&self, request: &RefinementRequest) -> Result<RefinementResponse, PredictorError>;
}

/// JSON-over-HTTP reasoning service client
pub struct HttpReasoningService {
    http_client: reqwest::Client,
    /// One request per `min_interval`, no bursts
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
    endpoint: String,
}

impl HttpReasoningService {
    pub fn new(config: &ReasoningConfig) -> Result<Self, PredictorError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| PredictorError::Service(e.to_string()))?;

        let quota = config.min_interval().and_then(Quota::with_period).ok_or_else(|| {
            PredictorError::Service(format!(
                "requests_per_second {} gives no usable request interval",
                config.requests_per_second
            ))
        })?;

        Ok(Self {
            http_client,
            rate_limiter: RateLimiter::direct(quota),
            endpoint: format!("{}/refine", config.url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl ReasoningService for HttpReasoningService {
    async fn refine(&self, request: &RefinementRequest) -> Result<RefinementResponse, PredictorError> {
        self.rate_limiter.until_ready().await;

        debug!(
            technique = %request.technique_id,
            candidates = request.candidates.len(),
            "Requesting reasoning refinement"
        );

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| PredictorError::Service(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(PredictorError::Service(format!(
                "HTTP {}: {}",
                status.as_u16(),
                error_text
            )));
        }

        response
            .json::<RefinementResponse>()
            .await
            .map_err(|e| PredictorError::Service(format!("invalid response: {}", e)))
    }
}

/// Strongest `count` minutes, highest mass first, earliest on ties
fn top_candidates(distribution: &TimeDistribution, count: usize) -> Vec<CandidateMinute> {
    let mut ranked: Vec<(u16, f64)> = distribution
        .masses()
        .iter()
        .enumerate()
        .filter(|(_, &mass)| mass > 0.0)
        .map(|(minute, &mass)| (minute as u16, mass))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(count)
        .map(|(minute, probability)| CandidateMinute {
            minute,
            time: format_minute_of_day(minute),
            probability,
        })
        .collect()
}

/// Multiply masses near each requested candidate; unknown minutes are ignored
fn apply_adjustments(
    distribution: &TimeDistribution,
    candidates: &[CandidateMinute],
    adjustments: &[Adjustment],
) -> Result<TimeDistribution, PredictorError> {
    let mut weights = distribution.masses().to_vec();
    for adjustment in adjustments {
        if !candidates.iter().any(|c| c.minute == adjustment.minute) {
            continue;
        }
        if !adjustment.factor.is_finite() {
            return Err(PredictorError::Service(format!(
                "non-finite factor for minute {}",
                adjustment.minute
            )));
        }
        let factor = adjustment.factor.clamp(MIN_FACTOR, MAX_FACTOR);
        for (minute, weight) in weights.iter_mut().enumerate() {
            if circular_distance(minute as u16, adjustment.minute) <= ADJUSTMENT_RADIUS {
                *weight *= factor;
            }
        }
    }
    TimeDistribution::from_weights(weights).map_err(|e| PredictorError::Internal(e.to_string()))
}

/// Predictor whose estimate is refined by a reasoning service
pub struct ReasonedPredictor {
    inner: Arc<dyn TechniquePredictor>,
    service: Arc<dyn ReasoningService>,
    candidate_count: usize,
}

impl ReasonedPredictor {
    pub fn new(
        inner: Arc<dyn TechniquePredictor>,
        service: Arc<dyn ReasoningService>,
        candidate_count: usize,
    ) -> Self {
        Self {
            inner,
            service,
            candidate_count: candidate_count.max(1),
        }
    }
}

#[async_trait]
impl TechniquePredictor for ReasonedPredictor {
    fn technique_id(&self) -> &'static str {
        self.inner.technique_id()
    }

    fn sensitive_categories(&self) -> &'static [LifeEventCategory] {
        self.inner.sensitive_categories()
    }

    async fn estimate(
        &self,
        chart: &BirthChart,
        answers: &[LifeEventAnswer],
    ) -> Result<TechniqueEstimate, PredictorError> {
        let heuristic = self.inner.estimate(chart, answers).await?;
        let request = RefinementRequest {
            technique_id: heuristic.technique_id.clone(),
            approximate_time: chart.approximate_time.to_string(),
            candidates: top_candidates(&heuristic.time_distribution, self.candidate_count),
            answers: answers
                .iter()
                .map(|a| AnswerSummary {
                    question_id: a.question_id.clone(),
                    value: a.raw_value.clone(),
                })
                .collect(),
        };

        let refined = match self.service.refine(&request).await {
            Ok(response) => apply_adjustments(
                &heuristic.time_distribution,
                &request.candidates,
                &response.adjustments,
            ),
            Err(e) => Err(e),
        };

        match refined {
            Ok(distribution) => Ok(TechniqueEstimate::new(heuristic.technique_id, distribution)),
            Err(e) => {
                warn!(
                    technique = %heuristic.technique_id,
                    error = %e,
                    "Reasoning refinement unavailable, using heuristic estimate"
                );
                Ok(heuristic.mark_degraded())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictors::mock::MockPredictor;
    use crate::predictors::tests::test_chart;
    use crate::predictors::NadiPredictor;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedService {
        response: Result<RefinementResponse, PredictorError>,
        calls: AtomicU32,
    }

    impl ScriptedService {
        fn new(response: Result<RefinementResponse, PredictorError>) -> Self {
            Self {
                response,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ReasoningService for ScriptedService {
        async fn refine(&self, _request: &RefinementRequest) -> Result<RefinementResponse, PredictorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone()
        }
    }

    fn config(url: &str) -> ReasoningConfig {
        ReasoningConfig {
            url: url.to_string(),
            requests_per_second: 5.0,
            timeout_ms: 2000,
            candidate_count: 3,
        }
    }

    #[test]
    fn test_top_candidates_ranked() {
        let dist = TimeDistribution::from_weights(
            (0..1440).map(|m| if m == 100 { 3.0 } else if m == 50 || m == 200 { 1.0 } else { 0.0 }).collect(),
        )
        .unwrap();
        let top = top_candidates(&dist, 5);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].minute, 100);
        assert_eq!(top[0].time, "01:40");
        // Tie broken by earliest minute
        assert_eq!(top[1].minute, 50);
        assert_eq!(top[2].minute, 200);
    }

    #[test]
    fn test_adjustments_clamped_and_local() {
        let dist = TimeDistribution::gaussian(600, 60.0);
        let candidates = top_candidates(&dist, 1);
        let adjusted = apply_adjustments(
            &dist,
            &candidates,
            &[
                Adjustment { minute: 600, factor: 100.0 },
                // Not a candidate: ignored
                Adjustment { minute: 700, factor: 0.0 },
            ],
        )
        .unwrap();
        assert!(adjusted.validate().is_ok());
        let before = dist.mass_at(600) / dist.mass_at(620);
        let after = adjusted.mass_at(600) / adjusted.mass_at(620);
        assert!((after / before - MAX_FACTOR).abs() < 1e-9);
        assert!(adjusted.mass_at(700) > 0.0);
    }

    #[tokio::test]
    async fn test_refinement_moves_mass() {
        let inner: Arc<dyn TechniquePredictor> = Arc::new(NadiPredictor::new(120));
        let chart = test_chart();
        let heuristic = inner.estimate(&chart, &[]).await.unwrap();

        let service = Arc::new(ScriptedService::new(Ok(RefinementResponse {
            adjustments: vec![Adjustment { minute: 870, factor: 2.0 }],
        })));
        let predictor = ReasonedPredictor::new(Arc::clone(&inner), service.clone(), 3);
        let refined = predictor.estimate(&chart, &[]).await.unwrap();

        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
        assert!(!refined.degraded);
        assert_eq!(refined.technique_id, "nadi");
        assert!(refined.peak_probability > heuristic.peak_probability);
    }

    #[tokio::test]
    async fn test_service_failure_degrades_to_heuristic() {
        let inner: Arc<dyn TechniquePredictor> = Arc::new(MockPredictor::new("tattva", 420));
        let service = Arc::new(ScriptedService::new(Err(PredictorError::Service(
            "connection refused".to_string(),
        ))));
        let predictor = ReasonedPredictor::new(inner, service, 3);
        let estimate = predictor.estimate(&test_chart(), &[]).await.unwrap();
        assert!(estimate.degraded);
        // Own heuristic kept: still a real technique peak
        assert!(!estimate.fallback);
        assert_eq!(estimate.peak_time, 420);
    }

    #[tokio::test]
    async fn test_inner_failure_propagates() {
        let inner: Arc<dyn TechniquePredictor> = Arc::new(MockPredictor::failing("kp", 1));
        let service = Arc::new(ScriptedService::new(Ok(RefinementResponse::default())));
        let predictor = ReasonedPredictor::new(inner, service.clone(), 3);
        assert!(predictor.estimate(&test_chart(), &[]).await.is_err());
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_requests() {
        // 10 req/s: first permit immediate, each later one ~100 ms apart
        let mut cfg = config("http://127.0.0.1:9");
        cfg.requests_per_second = 10.0;
        let service = HttpReasoningService::new(&cfg).unwrap();

        let start = std::time::Instant::now();
        service.rate_limiter.until_ready().await;
        assert!(
            start.elapsed() < Duration::from_millis(50),
            "First permit should be immediate, took {:?}",
            start.elapsed()
        );

        service.rate_limiter.until_ready().await;
        service.rate_limiter.until_ready().await;
        assert!(
            start.elapsed() >= Duration::from_millis(180),
            "Three permits should span ~200 ms, took {:?}",
            start.elapsed()
        );
    }

    #[test]
    fn test_unusable_request_rate_rejected() {
        let mut cfg = config("http://127.0.0.1:9");
        cfg.requests_per_second = f64::INFINITY;
        assert!(matches!(
            HttpReasoningService::new(&cfg),
            Err(PredictorError::Service(_))
        ));
    }

    #[tokio::test]
    async fn test_http_service_round_trip() {
        use axum::{routing::post, Json, Router};

        async fn refine(Json(request): Json<RefinementRequest>) -> Json<RefinementResponse> {
            Json(RefinementResponse {
                adjustments: request
                    .candidates
                    .iter()
                    .map(|c| Adjustment { minute: c.minute, factor: 1.5 })
                    .collect(),
            })
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/refine", post(refine)))
                .await
                .unwrap();
        });

        let service = HttpReasoningService::new(&config(&format!("http://{}/", addr))).unwrap();
        let request = RefinementRequest {
            technique_id: "kp".to_string(),
            approximate_time: "14:30".to_string(),
            candidates: vec![CandidateMinute {
                minute: 870,
                time: "14:30".to_string(),
                probability: 0.01,
            }],
            answers: vec![],
        };
        let response = service.refine(&request).await.unwrap();
        assert_eq!(response.adjustments, vec![Adjustment { minute: 870, factor: 1.5 }]);
    }

    #[tokio::test]
    async fn test_http_service_unreachable() {
        // Port 9 (discard) is not expected to host an HTTP server
        let service = HttpReasoningService::new(&config("http://127.0.0.1:9")).unwrap();
        let request = RefinementRequest {
            technique_id: "kp".to_string(),
            approximate_time: "14:30".to_string(),
            candidates: vec![],
            answers: vec![],
        };
        assert!(matches!(
            service.refine(&request).await,
            Err(PredictorError::Service(_))
        ));
    }
}
