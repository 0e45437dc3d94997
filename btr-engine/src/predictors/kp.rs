//! KP (Krishnamurti Paddhati) predictor
//!
//! The zodiac is split into 27 nakshatras of 13°20', each subdivided into
//! nine unequal subs proportional to the Vimshottari dasha years. The sub
//! lord of the rising degree must signify the events the native reports;
//! candidate minutes whose ascendant sub lord does so gain mass.

use super::distribution::{
    normalize_degrees, projected_ascendant, whole_sign_house, CandidateWindow, EVIDENCE_GAIN,
};
use super::{PredictorError, TechniquePredictor};
use crate::config::RectificationConfig;
use crate::questions::{evidence, LifeEventCategory};
use crate::types::{BirthChart, Body, LifeEventAnswer, TechniqueEstimate};
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Vimshottari order with dasha years
const DASHA: [(Body, f64); 9] = [
    (Body::Ketu, 7.0),
    (Body::Venus, 20.0),
    (Body::Sun, 6.0),
    (Body::Moon, 10.0),
    (Body::Mars, 7.0),
    (Body::Rahu, 18.0),
    (Body::Jupiter, 16.0),
    (Body::Saturn, 19.0),
    (Body::Mercury, 17.0),
];

const DASHA_TOTAL_YEARS: f64 = 120.0;

/// 360° / 27
pub const NAKSHATRA_SPAN: f64 = 40.0 / 3.0;

/// Star lord and sub lord of a sidereal longitude
pub fn star_and_sub_lord(longitude: f64) -> (Body, Body) {
    let longitude = normalize_degrees(longitude);
    let nakshatra = ((longitude / NAKSHATRA_SPAN).floor() as usize).min(26);
    let star_index = nakshatra % 9;
    let mut remaining = longitude - nakshatra as f64 * NAKSHATRA_SPAN;

    for step in 0..9 {
        let (lord, years) = DASHA[(star_index + step) % 9];
        let span = NAKSHATRA_SPAN * years / DASHA_TOTAL_YEARS;
        if remaining < span {
            return (DASHA[star_index].0, lord);
        }
        remaining -= span;
    }
    // Floating-point remainder at the very end of the nakshatra
    (DASHA[star_index].0, DASHA[(star_index + 8) % 9].0)
}

pub struct KpPredictor {
    search_window_minutes: u16,
}

impl KpPredictor {
    pub fn new(search_window_minutes: u16) -> Self {
        Self {
            search_window_minutes,
        }
    }

    pub fn from_config(config: &RectificationConfig) -> Self {
        Self::new(config.search_window_minutes)
    }
}

/// Natural significators of a category plus the bodies occupying its houses
fn significators(chart: &BirthChart, category: LifeEventCategory) -> BTreeSet<Body> {
    let ascendant = chart.ascendant();
    let mut bodies: BTreeSet<Body> = category.significators().iter().copied().collect();
    bodies.extend(
        chart
            .planetary_positions
            .iter()
            .filter(|p| category.houses().contains(&whole_sign_house(ascendant, p.longitude)))
            .map(|p| p.body),
    );
    bodies
}

#[async_trait]
impl TechniquePredictor for KpPredictor {
    fn technique_id(&self) -> &'static str {
        "kp"
    }

    fn sensitive_categories(&self) -> &'static [LifeEventCategory] {
        &[
            LifeEventCategory::Marriage,
            LifeEventCategory::Career,
            LifeEventCategory::Education,
            LifeEventCategory::Parents,
            LifeEventCategory::Travel,
        ]
    }

    async fn estimate(
        &self,
        chart: &BirthChart,
        answers: &[LifeEventAnswer],
    ) -> Result<TechniqueEstimate, PredictorError> {
        if chart.house_cusps.is_empty() {
            return Err(PredictorError::MissingInput("ascendant".to_string()));
        }
        let event_significators: Vec<BTreeSet<Body>> = evidence(answers)
            .into_iter()
            .map(|(q, _)| significators(chart, q.category))
            .collect();
        let base_ascendant = chart.ascendant();

        let window = CandidateWindow::new(chart.approximate_minute(), self.search_window_minutes);
        let distribution = window.shape(EVIDENCE_GAIN, |offset, _| {
            if event_significators.is_empty() {
                return 0.0;
            }
            let (_, sub_lord) = star_and_sub_lord(projected_ascendant(base_ascendant, offset));
            let matches = event_significators
                .iter()
                .filter(|set| set.contains(&sub_lord))
                .count();
            matches as f64 / event_significators.len() as f64
        })?;

        Ok(TechniqueEstimate::new(self.technique_id(), distribution))
    }
}
