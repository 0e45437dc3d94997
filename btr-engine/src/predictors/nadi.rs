//! Nadi predictor
//!
//! Projects the ascendant across candidate minutes and checks, for every
//! reported life event, whether the houses signifying that event are
//! occupied counting whole signs from the candidate ascendant. Minutes where
//! more event houses are occupied gain mass.

use super::distribution::{projected_ascendant, whole_sign_house, CandidateWindow, EVIDENCE_GAIN};
use super::{PredictorError, TechniquePredictor};
use crate::config::RectificationConfig;
use crate::questions::{evidence, LifeEventCategory};
use crate::types::{BirthChart, LifeEventAnswer, TechniqueEstimate};
use async_trait::async_trait;

pub struct NadiPredictor {
    search_window_minutes: u16,
}

impl NadiPredictor {
    pub fn new(search_window_minutes: u16) -> Self {
        Self {
            search_window_minutes,
        }
    }

    pub fn from_config(config: &RectificationConfig) -> Self {
        Self::new(config.search_window_minutes)
    }
}

/// Fraction of event houses occupied by at least one body
fn occupancy_score(chart: &BirthChart, ascendant: f64, categories: &[LifeEventCategory]) -> f64 {
    let mut considered = 0usize;
    let mut occupied = 0usize;
    for category in categories {
        for &house in category.houses() {
            considered += 1;
            if chart
                .planetary_positions
                .iter()
                .any(|p| whole_sign_house(ascendant, p.longitude) == house)
            {
                occupied += 1;
            }
        }
    }
    if considered == 0 {
        0.0
    } else {
        occupied as f64 / considered as f64
    }
}

#[async_trait]
impl TechniquePredictor for NadiPredictor {
    fn technique_id(&self) -> &'static str {
        "nadi"
    }

    fn sensitive_categories(&self) -> &'static [LifeEventCategory] {
        &[
            LifeEventCategory::Marriage,
            LifeEventCategory::Children,
            LifeEventCategory::Career,
            LifeEventCategory::Relocation,
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
        let categories: Vec<LifeEventCategory> =
            evidence(answers).into_iter().map(|(q, _)| q.category).collect();
        let base_ascendant = chart.ascendant();

        let window = CandidateWindow::new(chart.approximate_minute(), self.search_window_minutes);
        let distribution = window.shape(EVIDENCE_GAIN, |offset, _| {
            occupancy_score(chart, projected_ascendant(base_ascendant, offset), &categories)
        })?;

        Ok(TechniqueEstimate::new(self.technique_id(), distribution))
    }
}
