//! Shared distribution shaping for the built-in predictors
//!
//! Every built-in technique scores candidate minutes around the approximate
//! birth time. The shaped distribution is a Gaussian prior at the approximate
//! time, boosted by `1 + gain × score`, lightly smoothed and normalized.

use super::PredictorError;
use crate::types::TimeDistribution;
use btr_common::clock::{wrap_minute, MINUTES_PER_DAY};

/// Multiplier applied to a fully matching candidate minute
pub const EVIDENCE_GAIN: f64 = 3.0;

/// Half-width of the moving average applied after scoring
const SMOOTHING_RADIUS: i64 = 2;

/// Candidate minutes searched by a technique
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateWindow {
    pub center: u16,
    pub half_width: u16,
    /// Standard deviation of the prior, minutes
    pub prior_sigma: f64,
}

impl CandidateWindow {
    /// Prior sigma defaults to half the window
    pub fn new(center: u16, half_width: u16) -> Self {
        Self {
            center,
            half_width,
            prior_sigma: (half_width as f64 / 2.0).max(1.0),
        }
    }

    /// `(offset from center, minute-of-day)` for every candidate
    pub fn candidates(&self) -> impl Iterator<Item = (i32, u16)> + '_ {
        let half = self.half_width.min(MINUTES_PER_DAY / 2 - 1) as i32;
        (-half..=half).map(move |offset| (offset, wrap_minute(self.center as i64 + offset as i64)))
    }

    /// Build a distribution from per-candidate evidence scores in `[0, 1]`
    pub fn shape<F>(&self, gain: f64, mut score: F) -> Result<TimeDistribution, PredictorError>
    where
        F: FnMut(i32, u16) -> f64,
    {
        let mut weights = vec![0.0; MINUTES_PER_DAY as usize];
        for (offset, minute) in self.candidates() {
            let prior = (-0.5 * (offset as f64 / self.prior_sigma).powi(2)).exp();
            let evidence = score(offset, minute);
            if !evidence.is_finite() {
                return Err(PredictorError::Internal(format!(
                    "non-finite evidence at minute {}",
                    minute
                )));
            }
            weights[minute as usize] = prior * (1.0 + gain * evidence.clamp(0.0, 1.0));
        }

        TimeDistribution::from_weights(smooth(&weights))
            .map_err(|e| PredictorError::Internal(e.to_string()))
    }
}

/// Circular moving average
fn smooth(weights: &[f64]) -> Vec<f64> {
    let n = weights.len() as i64;
    let span = (2 * SMOOTHING_RADIUS + 1) as f64;
    (0..n)
        .map(|i| {
            (-SMOOTHING_RADIUS..=SMOOTHING_RADIUS)
                .map(|d| weights[(i + d).rem_euclid(n) as usize])
                .sum::<f64>()
                / span
        })
        .collect()
}

/// Normalize an angle to `[0, 360)`
pub fn normalize_degrees(value: f64) -> f64 {
    value.rem_euclid(360.0)
}

/// Zodiac sign index 0 (Aries) through 11 (Pisces)
pub fn sign_of(longitude: f64) -> u8 {
    ((normalize_degrees(longitude) / 30.0).floor() as u8).min(11)
}

/// Whole-sign house (1-12) of a longitude counted from the ascendant's sign
pub fn whole_sign_house(ascendant: f64, longitude: f64) -> u8 {
    (sign_of(longitude) + 12 - sign_of(ascendant)) % 12 + 1
}

/// Degrees the ascendant advances per clock minute (one sidereal day per 1436 min)
pub const ASCENDANT_DEGREES_PER_MINUTE: f64 = 360.0 / 1436.0;

/// Ascendant longitude `offset` minutes from the chart's approximate time
pub fn projected_ascendant(base_ascendant: f64, offset: i32) -> f64 {
    normalize_degrees(base_ascendant + offset as f64 * ASCENDANT_DEGREES_PER_MINUTE)
}
