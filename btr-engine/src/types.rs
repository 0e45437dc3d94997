// Shared Types and Data Contracts
//
// Data contracts between the rectification stages: chart and answers flow
// into the predictors, estimates flow into agreement analysis and
// aggregation, and a ConfidenceResult flows back out to the session.

use btr_common::clock::{self, ClockTime, MINUTES_PER_DAY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Inputs: Chart, Birth Details, Answers
// ============================================================================

/// Bodies supplied by the external chart calculator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Body {
    Sun,
    Moon,
    Mars,
    Mercury,
    Jupiter,
    Venus,
    Saturn,
    Rahu,
    Ketu,
}

/// Ecliptic position of one body, degrees in `[0, 360)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanetaryPosition {
    pub body: Body,
    pub longitude: f64,
    #[serde(default)]
    pub retrograde: bool,
}

/// Chart snapshot produced by the external chart calculator.
///
/// Read-only to the engine. `house_cusps[0]` is the ascendant at
/// `approximate_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BirthChart {
    pub approximate_time: ClockTime,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    pub planetary_positions: Vec<PlanetaryPosition>,
    pub house_cusps: Vec<f64>,
}

impl BirthChart {
    /// Reject charts the engine cannot reason about
    pub fn validate(&self) -> Result<(), RectificationError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(RectificationError::InputQuality(format!(
                "latitude {} outside [-90, 90]",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(RectificationError::InputQuality(format!(
                "longitude {} outside [-180, 180]",
                self.longitude
            )));
        }
        if self.timezone.trim().is_empty() {
            return Err(RectificationError::InputQuality("timezone is required".to_string()));
        }
        if self.house_cusps.len() != 12 {
            return Err(RectificationError::InputQuality(format!(
                "expected 12 house cusps, got {}",
                self.house_cusps.len()
            )));
        }
        if let Some(bad) = self.house_cusps.iter().find(|c| !valid_longitude(**c)) {
            return Err(RectificationError::InputQuality(format!(
                "house cusp {} outside [0, 360)",
                bad
            )));
        }
        if self.planetary_positions.is_empty() {
            return Err(RectificationError::InputQuality(
                "planetary positions are required".to_string(),
            ));
        }
        for position in &self.planetary_positions {
            if !valid_longitude(position.longitude) {
                return Err(RectificationError::InputQuality(format!(
                    "{:?} longitude {} outside [0, 360)",
                    position.body, position.longitude
                )));
            }
        }
        Ok(())
    }

    pub fn approximate_minute(&self) -> u16 {
        self.approximate_time.minute()
    }

    /// Ascendant longitude at the approximate time
    pub fn ascendant(&self) -> f64 {
        self.house_cusps.first().copied().unwrap_or(0.0)
    }

    pub fn position(&self, body: Body) -> Option<&PlanetaryPosition> {
        self.planetary_positions.iter().find(|p| p.body == body)
    }
}

fn valid_longitude(value: f64) -> bool {
    value.is_finite() && (0.0..360.0).contains(&value)
}

/// Raw birth-data fields as the user typed them.
///
/// Only feeds the quality assessment; malformed values lower the quality
/// score and never fail a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BirthDetails {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub latitude: Option<String>,
    #[serde(default)]
    pub longitude: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub place: Option<String>,
}

impl BirthDetails {
    /// Best-effort details reconstructed from a chart when the caller sent none
    pub fn from_chart(chart: &BirthChart) -> Self {
        Self {
            date: None,
            time: Some(chart.approximate_time.to_string()),
            latitude: Some(chart.latitude.to_string()),
            longitude: Some(chart.longitude.to_string()),
            timezone: Some(chart.timezone.clone()),
            place: None,
        }
    }
}

/// One answer to a life-event question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifeEventAnswer {
    pub question_id: String,
    pub raw_value: String,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl LifeEventAnswer {
    pub fn new(question_id: impl Into<String>, raw_value: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            raw_value: raw_value.into(),
            received_at: Utc::now(),
        }
    }
}

// ============================================================================
// Predictor Outputs: Time Distributions
// ============================================================================

/// Tolerance for a distribution's total mass
pub const MASS_TOLERANCE: f64 = 1e-6;

/// Why a distribution is unusable
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DistributionError {
    #[error("distribution has {0} entries, expected 1440")]
    WrongLength(usize),
    #[error("invalid mass {value} at minute {minute}")]
    InvalidMass { minute: usize, value: f64 },
    #[error("distribution has no mass")]
    ZeroMass,
    #[error("distribution sums to {0}, expected 1")]
    NotNormalized(f64),
}

/// Probability mass per minute-of-day (index 0 = 00:00, 1439 = 23:59)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeDistribution(Vec<f64>);

impl TimeDistribution {
    /// Normalize non-negative weights into a distribution
    pub fn from_weights(weights: Vec<f64>) -> Result<Self, DistributionError> {
        if weights.len() != MINUTES_PER_DAY as usize {
            return Err(DistributionError::WrongLength(weights.len()));
        }
        if let Some((minute, &value)) = weights
            .iter()
            .enumerate()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(DistributionError::InvalidMass { minute, value });
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(DistributionError::ZeroMass);
        }
        Ok(Self(weights.into_iter().map(|w| w / total).collect()))
    }

    /// Wrap masses as-is; call [`TimeDistribution::validate`] before trusting them
    pub fn from_raw(masses: Vec<f64>) -> Self {
        Self(masses)
    }

    /// Wrapped Gaussian centered on `center` with standard deviation `sigma` minutes
    pub fn gaussian(center: u16, sigma: f64) -> Self {
        let sigma = sigma.max(1.0);
        let masses: Vec<f64> = (0..MINUTES_PER_DAY)
            .map(|m| {
                let d = clock::circular_distance(m, center) as f64;
                (-0.5 * (d / sigma).powi(2)).exp()
            })
            .collect();
        let total: f64 = masses.iter().sum();
        Self(masses.into_iter().map(|w| w / total).collect())
    }

    /// All the mass on one minute
    pub fn point(minute: u16) -> Self {
        let mut masses = vec![0.0; MINUTES_PER_DAY as usize];
        masses[(minute % MINUTES_PER_DAY) as usize] = 1.0;
        Self(masses)
    }

    pub fn masses(&self) -> &[f64] {
        &self.0
    }

    pub fn mass_at(&self, minute: u16) -> f64 {
        self.0.get(minute as usize).copied().unwrap_or(0.0)
    }

    pub fn validate(&self) -> Result<(), DistributionError> {
        if self.0.len() != MINUTES_PER_DAY as usize {
            return Err(DistributionError::WrongLength(self.0.len()));
        }
        if let Some((minute, &value)) = self
            .0
            .iter()
            .enumerate()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(DistributionError::InvalidMass { minute, value });
        }
        let total: f64 = self.0.iter().sum();
        if (total - 1.0).abs() > MASS_TOLERANCE {
            return Err(DistributionError::NotNormalized(total));
        }
        Ok(())
    }

    /// Highest-mass minute; the earliest minute wins ties
    pub fn peak(&self) -> (u16, f64) {
        self.0
            .iter()
            .enumerate()
            .fold((0u16, f64::MIN), |best, (m, &mass)| {
                if mass > best.1 {
                    (m as u16, mass)
                } else {
                    best
                }
            })
    }

    /// Shannon entropy in nats
    pub fn entropy(&self) -> f64 {
        -self
            .0
            .iter()
            .filter(|p| **p > 0.0)
            .map(|p| p * p.ln())
            .sum::<f64>()
    }

    /// Entropy scaled to `[0, 1]` by the entropy of the uniform day
    pub fn normalized_entropy(&self) -> f64 {
        (self.entropy() / (MINUTES_PER_DAY as f64).ln()).clamp(0.0, 1.0)
    }

    /// How clearly the top peak stands out: `(top / second - 1)` clamped to
    /// `[0, 1]`, where `second` is the highest local maximum further than
    /// `min_separation` minutes from the top peak. 1.0 when there is none.
    pub fn peak_distinctiveness(&self, min_separation: u16) -> f64 {
        let (top_minute, top_mass) = self.peak();
        if top_mass <= 0.0 {
            return 0.0;
        }
        let n = self.0.len();
        let second = (0..n)
            .filter(|&m| {
                let mass = self.0[m];
                mass > 0.0
                    && mass >= self.0[(m + n - 1) % n]
                    && mass >= self.0[(m + 1) % n]
                    && clock::circular_distance(m as u16, top_minute) > min_separation
            })
            .map(|m| self.0[m])
            .fold(0.0_f64, f64::max);

        if second <= 0.0 {
            1.0
        } else {
            (top_mass / second - 1.0).clamp(0.0, 1.0)
        }
    }

    /// Weighted sum of distributions; weights are normalized first
    pub fn mixture(components: &[(&TimeDistribution, f64)]) -> Result<Self, DistributionError> {
        let mut masses = vec![0.0; MINUTES_PER_DAY as usize];
        for (distribution, weight) in components {
            for (slot, mass) in masses.iter_mut().zip(distribution.masses()) {
                *slot += weight * mass;
            }
        }
        Self::from_weights(masses)
    }
}

/// One technique's estimate for one analysis pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechniqueEstimate {
    pub technique_id: String,
    pub time_distribution: TimeDistribution,
    pub peak_time: u16,
    pub peak_probability: f64,
    /// Weaker than the technique normally delivers: either a fallback
    /// substitute or a heuristic whose refinement was unavailable
    #[serde(default)]
    pub degraded: bool,
    /// Generic substitute carrying no technique evidence (implies `degraded`)
    #[serde(default)]
    pub fallback: bool,
}

impl TechniqueEstimate {
    pub fn new(technique_id: impl Into<String>, time_distribution: TimeDistribution) -> Self {
        let (peak_time, peak_probability) = time_distribution.peak();
        Self {
            technique_id: technique_id.into(),
            time_distribution,
            peak_time,
            peak_probability,
            degraded: false,
            fallback: false,
        }
    }

    /// Gaussian around `center` standing in for a technique that produced nothing
    pub fn degraded_fallback(technique_id: impl Into<String>, center: u16, sigma: f64) -> Self {
        let mut estimate = Self::new(technique_id, TimeDistribution::gaussian(center, sigma));
        estimate.degraded = true;
        estimate.fallback = true;
        estimate
    }

    /// The technique's own estimate, kept at reduced trust
    pub fn mark_degraded(mut self) -> Self {
        self.degraded = true;
        self
    }
}

// ============================================================================
// Analysis Outputs: Quality, Agreement, Confidence
// ============================================================================

/// Input quality, every field in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityScore {
    pub coordinate_precision: f64,
    pub time_format_validity: f64,
    pub timezone_accuracy: f64,
    pub completeness_fraction: f64,
    pub text_word_count: f64,
    pub text_diversity: f64,
    pub temporal_indicator_density: f64,
}

impl QualityScore {
    /// Every sub-score set to `value`
    pub fn uniform(value: f64) -> Self {
        Self {
            coordinate_precision: value,
            time_format_validity: value,
            timezone_accuracy: value,
            completeness_fraction: value,
            text_word_count: value,
            text_diversity: value,
            temporal_indicator_density: value,
        }
    }
}

/// Proximity band for two technique peaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgreementTier {
    Exact,
    Close,
    Broad,
    Loose,
}

impl AgreementTier {
    pub const ALL: [AgreementTier; 4] = [
        AgreementTier::Exact,
        AgreementTier::Close,
        AgreementTier::Broad,
        AgreementTier::Loose,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgreementResult {
    /// Fraction of technique pairs agreeing within each tier's window
    pub tier_scores: BTreeMap<AgreementTier, f64>,
    /// Tier-weighted agreement in `[0, 1]`
    pub combined_score: f64,
    /// Fewer than two usable techniques; agreement undefined
    pub insufficient_techniques: bool,
    /// Per technique: summed tier weights of the pairs it agrees in
    pub technique_contributions: BTreeMap<String, f64>,
    pub pair_count: usize,
}

/// Discrete reliability label, ordered from lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReliabilityLevel {
    #[serde(rename = "Very Low")]
    VeryLow,
    Low,
    Moderate,
    High,
    #[serde(rename = "Very High")]
    VeryHigh,
}

impl ReliabilityLevel {
    pub fn label(self) -> &'static str {
        match self {
            ReliabilityLevel::VeryLow => "Very Low",
            ReliabilityLevel::Low => "Low",
            ReliabilityLevel::Moderate => "Moderate",
            ReliabilityLevel::High => "High",
            ReliabilityLevel::VeryHigh => "Very High",
        }
    }

    /// 0 (Very Low) through 4 (Very High)
    pub fn rank(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for ReliabilityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Final output of one analysis pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceResult {
    /// Confidence 0-100, two decimals
    pub score: f64,
    /// Minute-of-day
    pub rectified_time: u16,
    /// `rectified_time` as HH:MM
    pub rectified_clock: String,
    pub reliability_level: ReliabilityLevel,
    /// technique_id → weight; sums to 1
    pub contributing_weights: BTreeMap<String, f64>,
    pub base_confidence: f64,
    pub quality_multiplier: f64,
    /// The low-agreement ceiling condition held for this result
    pub ceiling_applied: bool,
    pub degraded_techniques: Vec<String>,
    pub agreement: AgreementResult,
    pub quality: QualityScore,
}

// ============================================================================
// Errors
// ============================================================================

/// Rectification error taxonomy
#[derive(Debug, Clone, Error)]
pub enum RectificationError {
    /// Malformed or missing required chart fields
    #[error("Input quality error: {0}")]
    InputQuality(String),

    #[error("Predictor '{technique_id}' timed out after {timeout_ms} ms")]
    PredictorTimeout { technique_id: String, timeout_ms: u64 },

    #[error("Predictor '{technique_id}' failed: {message}")]
    PredictorFailure { technique_id: String, message: String },

    /// Fatal to the current iteration
    #[error("Aggregation inconsistency: {0}")]
    AggregationInconsistency(String),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Session {session_id} is {state} and accepts no further answers")]
    SessionClosed { session_id: Uuid, state: String },

    #[error("Analysis cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<btr_common::Error> for RectificationError {
    fn from(err: btr_common::Error) -> Self {
        RectificationError::Storage(err.to_string())
    }
}

impl From<sqlx::Error> for RectificationError {
    fn from(err: sqlx::Error) -> Self {
        RectificationError::Storage(err.to_string())
    }
}

pub type RectificationResult<T> = Result<T, RectificationError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chart() -> BirthChart {
        BirthChart {
            approximate_time: ClockTime::from_minute(870),
            latitude: 28.61,
            longitude: 77.21,
            timezone: "Asia/Kolkata".to_string(),
            planetary_positions: vec![PlanetaryPosition {
                body: Body::Sun,
                longitude: 120.5,
                retrograde: false,
            }],
            house_cusps: (0..12).map(|i| (i as f64) * 30.0 + 5.0).collect(),
        }
    }

    #[test]
    fn test_valid_chart_passes() {
        assert!(sample_chart().validate().is_ok());
    }

    #[test]
    fn test_chart_with_missing_cusps_is_input_quality_error() {
        let mut chart = sample_chart();
        chart.house_cusps.truncate(3);
        assert!(matches!(chart.validate(), Err(RectificationError::InputQuality(_))));
    }

    #[test]
    fn test_chart_with_bad_latitude_is_rejected() {
        let mut chart = sample_chart();
        chart.latitude = 91.0;
        assert!(matches!(chart.validate(), Err(RectificationError::InputQuality(_))));
        chart.latitude = f64::NAN;
        assert!(chart.validate().is_err());
    }

    #[test]
    fn test_from_weights_normalizes() {
        let mut weights = vec![0.0; 1440];
        weights[10] = 3.0;
        weights[20] = 1.0;
        let dist = TimeDistribution::from_weights(weights).unwrap();
        assert!(dist.validate().is_ok());
        assert_eq!(dist.peak(), (10, 0.75));
    }

    #[test]
    fn test_from_weights_rejects_bad_input() {
        assert_eq!(
            TimeDistribution::from_weights(vec![1.0; 10]),
            Err(DistributionError::WrongLength(10))
        );
        assert_eq!(
            TimeDistribution::from_weights(vec![0.0; 1440]),
            Err(DistributionError::ZeroMass)
        );
        let mut weights = vec![1.0; 1440];
        weights[5] = -1.0;
        assert!(matches!(
            TimeDistribution::from_weights(weights),
            Err(DistributionError::InvalidMass { minute: 5, .. })
        ));
    }

    #[test]
    fn test_raw_distribution_fails_validation_when_unnormalized() {
        let dist = TimeDistribution::from_raw(vec![0.5; 1440]);
        assert!(matches!(dist.validate(), Err(DistributionError::NotNormalized(_))));
    }

    #[test]
    fn test_gaussian_wraps_around_midnight() {
        let dist = TimeDistribution::gaussian(2, 10.0);
        assert!(dist.validate().is_ok());
        assert_eq!(dist.peak().0, 2);
        // Symmetric across midnight
        let before = dist.mass_at(1439);
        let after = dist.mass_at(5);
        assert!((before - after).abs() < 1e-12);
    }

    #[test]
    fn test_entropy_bounds() {
        assert_eq!(TimeDistribution::point(100).normalized_entropy(), 0.0);
        let uniform = TimeDistribution::from_weights(vec![1.0; 1440]).unwrap();
        assert!((uniform.normalized_entropy() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_peak_distinctiveness() {
        // Single spike has no competitor
        assert_eq!(TimeDistribution::point(600).peak_distinctiveness(5), 1.0);

        // Two equal spikes far apart are indistinct
        let mut weights = vec![0.0; 1440];
        weights[100] = 1.0;
        weights[700] = 1.0;
        let twin = TimeDistribution::from_weights(weights).unwrap();
        assert_eq!(twin.peak_distinctiveness(5), 0.0);

        // 1.5:1 ratio
        let mut weights = vec![0.0; 1440];
        weights[100] = 3.0;
        weights[700] = 2.0;
        let uneven = TimeDistribution::from_weights(weights).unwrap();
        assert!((uneven.peak_distinctiveness(5) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_peaks_inside_separation_are_not_competitors() {
        let mut weights = vec![0.0; 1440];
        weights[100] = 1.0;
        weights[103] = 1.0;
        let close = TimeDistribution::from_weights(weights).unwrap();
        assert_eq!(close.peak_distinctiveness(5), 1.0);
    }

    #[test]
    fn test_reliability_levels_are_ordered() {
        assert!(ReliabilityLevel::VeryLow < ReliabilityLevel::Low);
        assert!(ReliabilityLevel::High < ReliabilityLevel::VeryHigh);
        assert_eq!(ReliabilityLevel::VeryHigh.rank(), 4);
        assert_eq!(
            serde_json::to_string(&ReliabilityLevel::VeryHigh).unwrap(),
            "\"Very High\""
        );
    }

    #[test]
    fn test_answer_received_at_defaults() {
        let answer: LifeEventAnswer =
            serde_json::from_str(r#"{"question_id":"q1","raw_value":"yes"}"#).unwrap();
        assert_eq!(answer.question_id, "q1");
    }
}
