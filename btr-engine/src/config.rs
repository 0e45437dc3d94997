//! Configuration for btr-engine
//!
//! One TOML bootstrap file carries everything: port, database path,
//! logging, the optional reasoning service and every rectification
//! threshold. Missing keys fall back to built-in defaults.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (--port, --database, --log-level)
//! 2. Environment variables (BTR_CONFIG, BTR_PORT, BTR_DATABASE)
//! 3. TOML configuration file
//! 4. Built-in defaults

use btr_common::config::{load_toml_config, resolve_config_path, LoggingConfig};
use btr_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5790;

/// Environment variable naming the TOML file
pub const CONFIG_ENV_VAR: &str = "BTR_CONFIG";

/// File name looked up under the platform config directory
pub const CONFIG_FILE_NAME: &str = "btr-engine.toml";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    /// SQLite archive path; defaults to `<data_local_dir>/btr/btr.db`
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// External reasoning service (optional)
    #[serde(default)]
    pub reasoning: Option<ReasoningConfig>,

    #[serde(default)]
    pub rectification: RectificationConfig,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl TomlConfig {
    /// Resolve and load the bootstrap file, or use defaults when none exists
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let config = match resolve_config_path(cli_path, CONFIG_ENV_VAR, CONFIG_FILE_NAME) {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                let mut config: TomlConfig = load_toml_config(&path)?;
                if config.port == 0 {
                    config.port = DEFAULT_PORT;
                }
                config
            }
            None => {
                info!("No configuration file found, using built-in defaults");
                TomlConfig {
                    port: DEFAULT_PORT,
                    ..Default::default()
                }
            }
        };
        config.rectification.validate()?;
        if let Some(reasoning) = &config.reasoning {
            reasoning.validate()?;
        }
        Ok(config)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| btr_common::config::default_data_folder().join("btr.db"))
    }
}

/// External reasoning service connection
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ReasoningConfig {
    /// Base URL; requests go to `{url}/refine`
    pub url: String,

    /// Outbound request ceiling
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    #[serde(default = "default_reasoning_timeout_ms")]
    pub timeout_ms: u64,

    /// How many top candidate minutes are sent for refinement
    #[serde(default = "default_candidate_count")]
    pub candidate_count: usize,
}

fn default_requests_per_second() -> f64 {
    2.0
}

fn default_reasoning_timeout_ms() -> u64 {
    5000
}

fn default_candidate_count() -> usize {
    5
}

impl ReasoningConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "reasoning.url must be an http(s) URL, got '{}'",
                self.url
            )));
        }
        if !(self.requests_per_second.is_finite() && self.requests_per_second > 0.0) {
            return Err(Error::Config(
                "reasoning.requests_per_second must be positive".to_string(),
            ));
        }
        if self.candidate_count == 0 {
            return Err(Error::Config("reasoning.candidate_count must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Minimum spacing between outbound requests; `None` for rates that
    /// give no representable non-zero interval
    pub fn min_interval(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(1.0 / self.requests_per_second)
            .ok()
            .filter(|interval| !interval.is_zero())
    }
}

/// Agreement window tiers: half-widths in minutes and tier weights
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TierConfig {
    pub exact_minutes: u16,
    pub close_minutes: u16,
    pub broad_minutes: u16,
    pub loose_minutes: u16,
    pub exact_weight: f64,
    pub close_weight: f64,
    pub broad_weight: f64,
    pub loose_weight: f64,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            exact_minutes: 5,
            close_minutes: 15,
            broad_minutes: 30,
            loose_minutes: 60,
            exact_weight: 0.4,
            close_weight: 0.3,
            broad_weight: 0.2,
            loose_weight: 0.1,
        }
    }
}

/// Lower score bounds for each reliability label
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ReliabilityBands {
    pub very_high: f64,
    pub high: f64,
    pub moderate: f64,
    pub low: f64,
}

impl Default for ReliabilityBands {
    fn default() -> Self {
        Self {
            very_high: 70.0,
            high: 55.0,
            moderate: 40.0,
            low: 20.0,
        }
    }
}

/// Weights of the quality sub-scores in the quality multiplier
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct QualityWeights {
    pub coordinate_precision: f64,
    pub time_format_validity: f64,
    pub timezone_accuracy: f64,
    pub completeness_fraction: f64,
    pub text_word_count: f64,
    pub text_diversity: f64,
    pub temporal_indicator_density: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            coordinate_precision: 1.0,
            time_format_validity: 1.0,
            timezone_accuracy: 1.0,
            completeness_fraction: 1.0,
            text_word_count: 1.0,
            text_diversity: 1.0,
            temporal_indicator_density: 1.0,
        }
    }
}

impl QualityWeights {
    pub fn as_array(&self) -> [f64; 7] {
        [
            self.coordinate_precision,
            self.time_format_validity,
            self.timezone_accuracy,
            self.completeness_fraction,
            self.text_word_count,
            self.text_diversity,
            self.temporal_indicator_density,
        ]
    }
}

/// Rectification thresholds and weights
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RectificationConfig {
    /// Score at or above which a session completes
    pub completion_threshold: f64,
    pub max_iterations: u32,
    pub questions_per_iteration: usize,
    pub predictor_timeout_ms: u64,
    /// Extra attempts after a failed or timed-out predictor call
    pub predictor_retry_attempts: u32,
    /// Idle time before an in-memory session is purged
    pub session_ttl_secs: u64,

    pub tiers: TierConfig,

    pub base_weight: f64,
    pub agreement_weight: f64,
    pub entropy_weight: f64,
    pub distinctiveness_weight: f64,
    pub low_agreement_floor: f64,
    pub low_agreement_ceiling: f64,
    pub min_peak_separation_minutes: u16,
    /// Ensemble weight multiplier for degraded estimates
    pub degraded_weight_factor: f64,

    pub quality_weights: QualityWeights,
    pub reliability_bands: ReliabilityBands,

    /// Historical reliability per technique id; unknown techniques get 1.0
    pub technique_reliability: BTreeMap<String, f64>,

    /// Half-width of the candidate window searched by the default predictors
    pub search_window_minutes: u16,
    /// Sigma of the degraded Gaussian fallback
    pub fallback_sigma_minutes: f64,
}

impl Default for RectificationConfig {
    fn default() -> Self {
        Self {
            completion_threshold: 80.0,
            max_iterations: 5,
            questions_per_iteration: 3,
            predictor_timeout_ms: 10_000,
            predictor_retry_attempts: 1,
            session_ttl_secs: 86_400,
            tiers: TierConfig::default(),
            base_weight: 0.5,
            agreement_weight: 0.5,
            entropy_weight: 0.6,
            distinctiveness_weight: 0.4,
            low_agreement_floor: 0.15,
            low_agreement_ceiling: 40.0,
            min_peak_separation_minutes: 5,
            degraded_weight_factor: 0.5,
            quality_weights: QualityWeights::default(),
            reliability_bands: ReliabilityBands::default(),
            technique_reliability: BTreeMap::new(),
            search_window_minutes: 120,
            fallback_sigma_minutes: 30.0,
        }
    }
}

impl RectificationConfig {
    pub fn predictor_timeout(&self) -> Duration {
        Duration::from_millis(self.predictor_timeout_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Historical reliability for a technique
    pub fn reliability_of(&self, technique_id: &str) -> f64 {
        self.technique_reliability
            .get(technique_id)
            .copied()
            .unwrap_or(1.0)
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::Config(msg));

        if !(0.0..=100.0).contains(&self.completion_threshold) {
            return fail(format!(
                "completion_threshold {} outside [0, 100]",
                self.completion_threshold
            ));
        }
        if self.max_iterations == 0 {
            return fail("max_iterations must be at least 1".to_string());
        }
        if self.questions_per_iteration == 0 {
            return fail("questions_per_iteration must be at least 1".to_string());
        }
        if self.predictor_timeout_ms == 0 {
            return fail("predictor_timeout_ms must be positive".to_string());
        }

        let t = &self.tiers;
        if !(0 < t.exact_minutes
            && t.exact_minutes < t.close_minutes
            && t.close_minutes < t.broad_minutes
            && t.broad_minutes < t.loose_minutes
            && t.loose_minutes <= 720)
        {
            return fail(format!(
                "tier windows must increase strictly within (0, 720]: {}/{}/{}/{}",
                t.exact_minutes, t.close_minutes, t.broad_minutes, t.loose_minutes
            ));
        }
        let tier_weights = [t.exact_weight, t.close_weight, t.broad_weight, t.loose_weight];
        if tier_weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return fail("tier weights must be positive".to_string());
        }
        if tier_weights.windows(2).any(|pair| pair[0] < pair[1]) {
            return fail("tier weights must not increase from Exact to Loose".to_string());
        }

        for (name, value) in [
            ("base_weight", self.base_weight),
            ("agreement_weight", self.agreement_weight),
            ("entropy_weight", self.entropy_weight),
            ("distinctiveness_weight", self.distinctiveness_weight),
        ] {
            if !value.is_finite() || value < 0.0 {
                return fail(format!("{} must be non-negative", name));
            }
        }
        if self.base_weight + self.agreement_weight <= 0.0 {
            return fail("base_weight + agreement_weight must be positive".to_string());
        }
        if self.entropy_weight + self.distinctiveness_weight <= 0.0 {
            return fail("entropy_weight + distinctiveness_weight must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.low_agreement_floor) {
            return fail("low_agreement_floor must be within [0, 1]".to_string());
        }
        if !(0.0..=100.0).contains(&self.low_agreement_ceiling) {
            return fail("low_agreement_ceiling must be within [0, 100]".to_string());
        }
        if !(self.degraded_weight_factor > 0.0 && self.degraded_weight_factor <= 1.0) {
            return fail("degraded_weight_factor must be within (0, 1]".to_string());
        }

        let quality = self.quality_weights.as_array();
        if quality.iter().any(|w| !w.is_finite() || *w < 0.0) || quality.iter().sum::<f64>() <= 0.0 {
            return fail("quality weights must be non-negative with a positive sum".to_string());
        }

        let b = &self.reliability_bands;
        if !(b.very_high > b.high && b.high > b.moderate && b.moderate > b.low && b.low >= 0.0) {
            return fail(format!(
                "reliability bands must decrease strictly: {}/{}/{}/{}",
                b.very_high, b.high, b.moderate, b.low
            ));
        }

        if let Some((id, value)) = self
            .technique_reliability
            .iter()
            .find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            return fail(format!("technique_reliability.{} = {} is invalid", id, value));
        }

        if self.search_window_minutes == 0 || self.search_window_minutes > 720 {
            return fail("search_window_minutes must be within (0, 720]".to_string());
        }
        if !(self.fallback_sigma_minutes.is_finite() && self.fallback_sigma_minutes > 0.0) {
            return fail("fallback_sigma_minutes must be positive".to_string());
        }
        Ok(())
    }
}
