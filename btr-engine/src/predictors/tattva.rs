//! Tattva predictor
//!
//! The day is divided from local sunrise into 24-minute tattva spans cycling
//! Prithvi, Jala, Agni, Vayu, Akasha. Life events and self-descriptions vote
//! for an element; candidate minutes whose tattva matches the vote share gain
//! mass.

use super::distribution::{normalize_degrees, CandidateWindow, EVIDENCE_GAIN};
use super::{PredictorError, TechniquePredictor};
use crate::config::RectificationConfig;
use crate::questions::{evidence, LifeEventCategory, QuestionKind};
use crate::types::{BirthChart, Body, LifeEventAnswer, TechniqueEstimate};
use async_trait::async_trait;
use btr_common::clock::{parse_utc_offset, wrap_minute, MINUTES_PER_DAY};

/// Obliquity of the ecliptic, degrees
const OBLIQUITY: f64 = 23.44;

/// Length of one tattva span, minutes
const TATTVA_SPAN_MINUTES: u16 = 24;

/// Fuzzy match threshold for element keywords
const KEYWORD_SIMILARITY: f64 = 0.92;

/// Weight of one keyword vote relative to a category vote
const KEYWORD_VOTE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tattva {
    Prithvi,
    Jala,
    Agni,
    Vayu,
    Akasha,
}

impl Tattva {
    const CYCLE: [Tattva; 5] = [
        Tattva::Prithvi,
        Tattva::Jala,
        Tattva::Agni,
        Tattva::Vayu,
        Tattva::Akasha,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Tattva::Prithvi => &["practical", "stable", "grounded", "stubborn", "patient", "earth"],
            Tattva::Jala => &["calm", "emotional", "gentle", "caring", "sensitive", "water"],
            Tattva::Agni => &["fiery", "ambitious", "energetic", "angry", "leader", "fire"],
            Tattva::Vayu => &["restless", "quick", "talkative", "anxious", "curious", "air"],
            Tattva::Akasha => &["reflective", "spiritual", "quiet", "intuitive", "philosophical"],
        }
    }

    /// Element a life area is traditionally ruled by
    fn of_category(category: LifeEventCategory) -> Option<Tattva> {
        match category {
            LifeEventCategory::Career => Some(Tattva::Agni),
            LifeEventCategory::Marriage | LifeEventCategory::Children => Some(Tattva::Jala),
            LifeEventCategory::Health | LifeEventCategory::Parents => Some(Tattva::Prithvi),
            LifeEventCategory::Relocation | LifeEventCategory::Travel => Some(Tattva::Vayu),
            LifeEventCategory::Education | LifeEventCategory::BirthCircumstances => {
                Some(Tattva::Akasha)
            }
            LifeEventCategory::Personality => None,
        }
    }
}

pub struct TattvaPredictor {
    search_window_minutes: u16,
}

impl TattvaPredictor {
    pub fn new(search_window_minutes: u16) -> Self {
        Self {
            search_window_minutes,
        }
    }

    pub fn from_config(config: &RectificationConfig) -> Self {
        Self::new(config.search_window_minutes)
    }

    /// Element votes, indexed by `Tattva::index`
    fn votes(answers: &[LifeEventAnswer]) -> [f64; 5] {
        let mut votes = [0.0; 5];
        for (question, answer) in evidence(answers) {
            if let Some(tattva) = Tattva::of_category(question.category) {
                votes[tattva.index()] += 1.0;
            }
            if matches!(question.kind, QuestionKind::FreeText | QuestionKind::Choice) {
                for token in answer
                    .raw_value
                    .split(|c: char| !c.is_alphabetic())
                    .filter(|t| t.len() >= 3)
                {
                    let token = token.to_lowercase();
                    for tattva in Tattva::CYCLE {
                        if tattva
                            .keywords()
                            .iter()
                            .any(|kw| strsim::jaro_winkler(&token, kw) >= KEYWORD_SIMILARITY)
                        {
                            votes[tattva.index()] += KEYWORD_VOTE;
                        }
                    }
                }
            }
        }
        votes
    }
}

/// Local sunrise as a clock minute.
///
/// Uses the Sun's declination from its ecliptic longitude and the standard
/// hour-angle formula; polar day/night clamp to 00:00/12:00 solar. Local mean
/// time is shifted to zone time by the timezone offset, or by the nearest
/// 15° meridian when the timezone is a zone name.
pub fn sunrise_minute(chart: &BirthChart) -> Result<u16, PredictorError> {
    let sun = chart
        .position(Body::Sun)
        .ok_or_else(|| PredictorError::MissingInput("Sun position".to_string()))?;

    let declination = (OBLIQUITY.to_radians().sin() * normalize_degrees(sun.longitude).to_radians().sin()).asin();
    let latitude = chart.latitude.to_radians();
    let cos_hour_angle = (-latitude.tan() * declination.tan()).clamp(-1.0, 1.0);
    let hour_angle_degrees = cos_hour_angle.acos().to_degrees();
    let solar_sunrise = 720.0 - hour_angle_degrees * 4.0;

    let zone_meridian = match parse_utc_offset(&chart.timezone) {
        Some(offset_minutes) => offset_minutes as f64 / 4.0,
        None => (chart.longitude / 15.0).round() * 15.0,
    };
    let clock_sunrise = solar_sunrise + (zone_meridian - chart.longitude) * 4.0;
    Ok(wrap_minute(clock_sunrise.round() as i64))
}

/// Tattva ruling a clock minute given the day's sunrise
pub fn tattva_at(minute: u16, sunrise: u16) -> Tattva {
    let elapsed = (minute as i32 - sunrise as i32).rem_euclid(MINUTES_PER_DAY as i32) as u16;
    Tattva::CYCLE[((elapsed / TATTVA_SPAN_MINUTES) % 5) as usize]
}

#[async_trait]
impl TechniquePredictor for TattvaPredictor {
    fn technique_id(&self) -> &'static str {
        "tattva"
    }

    fn sensitive_categories(&self) -> &'static [LifeEventCategory] {
        &[
            LifeEventCategory::Personality,
            LifeEventCategory::Health,
            LifeEventCategory::BirthCircumstances,
        ]
    }

    async fn estimate(
        &self,
        chart: &BirthChart,
        answers: &[LifeEventAnswer],
    ) -> Result<TechniqueEstimate, PredictorError> {
        let sunrise = sunrise_minute(chart)?;
        let votes = Self::votes(answers);
        let total: f64 = votes.iter().sum();

        let window = CandidateWindow::new(chart.approximate_minute(), self.search_window_minutes);
        let distribution = window.shape(EVIDENCE_GAIN, |_, minute| {
            if total > 0.0 {
                votes[tattva_at(minute, sunrise).index()] / total
            } else {
                0.0
            }
        })?;

        Ok(TechniqueEstimate::new(self.technique_id(), distribution))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictors::tests::test_chart;

    #[test]
    fn test_equinox_sunrise_near_six_local_mean_time() {
        let mut chart = test_chart();
        chart.planetary_positions[0].longitude = 0.0;
        chart.latitude = 0.0;
        chart.longitude = 75.0;
        chart.timezone = "UTC+05:00".to_string();
        assert_eq!(sunrise_minute(&chart).unwrap(), 360);
    }

    #[test]
    fn test_summer_sunrise_earlier_in_north() {
        let mut chart = test_chart();
        chart.longitude = 75.0;
        chart.timezone = "UTC+05:00".to_string();
        chart.latitude = 50.0;
        chart.planetary_positions[0].longitude = 90.0;
        let summer = sunrise_minute(&chart).unwrap();
        chart.planetary_positions[0].longitude = 270.0;
        let winter = sunrise_minute(&chart).unwrap();
        assert!(summer < 360 && winter > 360, "summer {} winter {}", summer, winter);
    }

    #[test]
    fn test_missing_sun_is_error() {
        let mut chart = test_chart();
        chart.planetary_positions.retain(|p| p.body != Body::Sun);
        assert!(matches!(sunrise_minute(&chart), Err(PredictorError::MissingInput(_))));
    }

    #[test]
    fn test_tattva_cycle() {
        assert_eq!(tattva_at(360, 360), Tattva::Prithvi);
        assert_eq!(tattva_at(384, 360), Tattva::Jala);
        assert_eq!(tattva_at(360 + 4 * 24, 360), Tattva::Akasha);
        assert_eq!(tattva_at(360 + 5 * 24, 360), Tattva::Prithvi);
        // Before sunrise counts from the previous sunrise
        assert_eq!(tattva_at(359, 360), Tattva::CYCLE[((1439 / 24) % 5) as usize]);
    }

    #[test]
    fn test_keywords_vote_fuzzily() {
        let answers = vec![LifeEventAnswer::new(
            "self_description",
            "Very ambitous and energetic, a natural leader",
        )];
        let votes = TattvaPredictor::votes(&answers);
        assert!(votes[Tattva::Agni.index()] >= 1.5);
        assert_eq!(votes[Tattva::Jala.index()], 0.0);
    }

    #[tokio::test]
    async fn test_estimate_is_deterministic_and_normalized() {
        let predictor = TattvaPredictor::new(120);
        let answers = vec![
            LifeEventAnswer::new("career_change", "yes"),
            LifeEventAnswer::new("temperament", "fiery"),
        ];
        let chart = test_chart();
        let first = predictor.estimate(&chart, &answers).await.unwrap();
        let second = predictor.estimate(&chart, &answers).await.unwrap();
        assert_eq!(first, second);
        assert!(first.time_distribution.validate().is_ok());
        assert_eq!(first.technique_id, "tattva");
    }

    #[tokio::test]
    async fn test_agni_votes_land_in_agni_span() {
        let predictor = TattvaPredictor::new(120);
        let chart = test_chart();
        let answers = vec![
            LifeEventAnswer::new("career_change", "yes"),
            LifeEventAnswer::new("first_job_date", "2012-03-01"),
            LifeEventAnswer::new("temperament", "fiery"),
        ];
        let estimate = predictor.estimate(&chart, &answers).await.unwrap();
        let sunrise = sunrise_minute(&chart).unwrap();
        // Smoothing can blur the span edge by a couple of minutes
        let near_agni = (-2..=2).any(|d| {
            tattva_at(wrap_minute(estimate.peak_time as i64 + d), sunrise) == Tattva::Agni
        });
        assert!(near_agni);
    }
}
