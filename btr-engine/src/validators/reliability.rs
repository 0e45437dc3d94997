//! Reliability classification
//!
//! Maps a confidence score onto a label, evaluated top-down with the first
//! matching band winning. Bands come from configuration and are validated to
//! decrease strictly, which keeps the mapping monotonic.

use crate::config::ReliabilityBands;
use crate::types::ReliabilityLevel;

#[derive(Debug, Clone, Default)]
pub struct ReliabilityClassifier {
    bands: ReliabilityBands,
}

impl ReliabilityClassifier {
    pub fn new(bands: ReliabilityBands) -> Self {
        Self { bands }
    }

    /// Label for a score; NaN falls through to Very Low
    pub fn classify(&self, score: f64) -> ReliabilityLevel {
        let b = &self.bands;
        if score >= b.very_high {
            ReliabilityLevel::VeryHigh
        } else if score >= b.high {
            ReliabilityLevel::High
        } else if score >= b.moderate {
            ReliabilityLevel::Moderate
        } else if score >= b.low {
            ReliabilityLevel::Low
        } else {
            ReliabilityLevel::VeryLow
        }
    }
}
