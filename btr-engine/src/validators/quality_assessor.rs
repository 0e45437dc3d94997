// Quality Assessor
//
// Concept: Score how much the engine should trust its own inputs
// Synchronization: Accepts raw birth details + free-text answers, outputs QualityScore
//
// Algorithm:
// 1. Coordinate precision from decimal places of the typed latitude/longitude
// 2. Time validity from parsing the typed birth time
// 3. Timezone accuracy from the form of the timezone (IANA > offset > abbreviation)
// 4. Completeness as the fraction of required fields present
// 5. Text metrics over tokenized free text: length, lexical diversity, temporal cues
//
// Never fails: bad input produces low sub-scores, which only dampen confidence.

use crate::types::{BirthDetails, QualityScore};
use btr_common::clock::{parse_clock_time, parse_utc_offset};
use std::collections::HashSet;

/// Words that anchor an answer in time
const TEMPORAL_KEYWORDS: &[&str] = &[
    "morning", "evening", "night", "afternoon", "noon", "midnight", "dawn", "dusk",
    "sunrise", "sunset", "early", "late", "around", "about", "approximately", "before",
    "after", "am", "pm", "o'clock", "hour", "hours", "minute", "minutes", "year", "years",
    "month", "months", "january", "february", "march", "april", "may", "june", "july",
    "august", "september", "october", "november", "december", "spring", "summer",
    "autumn", "winter", "when", "age",
];

/// Free text length at which the word-count score saturates
const DEFAULT_WORD_COUNT_TARGET: usize = 40;

/// Words per expected temporal cue
const WORDS_PER_TEMPORAL_CUE: f64 = 20.0;

/// Quality assessor (pure scoring, no side effects)
#[derive(Debug, Clone)]
pub struct QualityAssessor {
    word_count_target: usize,
}

impl Default for QualityAssessor {
    fn default() -> Self {
        Self {
            word_count_target: DEFAULT_WORD_COUNT_TARGET,
        }
    }
}

impl QualityAssessor {
    pub fn new(word_count_target: usize) -> Self {
        Self {
            word_count_target: word_count_target.max(1),
        }
    }

    /// Score birth details and the free-text answers of a session
    pub fn assess(&self, details: &BirthDetails, free_text: &[&str]) -> QualityScore {
        let latitude = coordinate_precision(details.latitude.as_deref(), 90.0);
        let longitude = coordinate_precision(details.longitude.as_deref(), 180.0);

        let time_format_validity = match details.time.as_deref().and_then(parse_clock_time) {
            Some(_) => 1.0,
            None => 0.0,
        };

        let required = [
            &details.date,
            &details.time,
            &details.latitude,
            &details.longitude,
            &details.timezone,
        ];
        let present = required
            .iter()
            .filter(|field| field.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false))
            .count();

        let text = TextMetrics::from_texts(free_text);

        QualityScore {
            coordinate_precision: (latitude + longitude) / 2.0,
            time_format_validity,
            timezone_accuracy: timezone_accuracy(details.timezone.as_deref()),
            completeness_fraction: present as f64 / required.len() as f64,
            text_word_count: (text.words as f64 / self.word_count_target as f64).min(1.0),
            text_diversity: text.diversity(),
            temporal_indicator_density: text.temporal_density(),
        }
    }
}

/// 1.0 for two or more decimal places, 0.6 for one, 0.3 for an integer,
/// 0.0 when missing, unparseable or out of range
fn coordinate_precision(raw: Option<&str>, bound: f64) -> f64 {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return 0.0;
    };
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() && value.abs() <= bound => {}
        _ => return 0.0,
    }
    let decimals = raw
        .split_once('.')
        .map(|(_, frac)| frac.chars().take_while(|c| c.is_ascii_digit()).count())
        .unwrap_or(0);
    match decimals {
        0 => 0.3,
        1 => 0.6,
        _ => 1.0,
    }
}

/// 1.0 for an IANA zone name, 0.8 for a UTC offset, 0.5 for an abbreviation
fn timezone_accuracy(raw: Option<&str>) -> f64 {
    let Some(tz) = raw.map(str::trim).filter(|t| !t.is_empty()) else {
        return 0.0;
    };
    if is_iana_zone(tz) {
        1.0
    } else if parse_utc_offset(tz).is_some() {
        0.8
    } else if (2..=5).contains(&tz.len()) && tz.chars().all(|c| c.is_ascii_uppercase()) {
        0.5
    } else {
        0.0
    }
}

fn is_iana_zone(tz: &str) -> bool {
    let parts: Vec<&str> = tz.split('/').collect();
    parts.len() >= 2
        && parts.iter().all(|part| {
            part.chars().next().map(|c| c.is_ascii_uppercase()).unwrap_or(false)
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+'))
        })
}

struct TextMetrics {
    words: usize,
    unique: usize,
    temporal: usize,
}

impl TextMetrics {
    fn from_texts(texts: &[&str]) -> Self {
        let tokens: Vec<String> = texts
            .iter()
            .flat_map(|text| tokenize(text))
            .collect();
        let unique: HashSet<&str> = tokens.iter().map(String::as_str).collect();
        let temporal = tokens.iter().filter(|t| is_temporal(t)).count();
        Self {
            words: tokens.len(),
            unique: unique.len(),
            temporal,
        }
    }

    fn diversity(&self) -> f64 {
        if self.words == 0 {
            0.0
        } else {
            self.unique as f64 / self.words as f64
        }
    }

    fn temporal_density(&self) -> f64 {
        if self.words == 0 {
            return 0.0;
        }
        let expected = (self.words as f64 / WORDS_PER_TEMPORAL_CUE).max(1.0);
        (self.temporal as f64 / expected).min(1.0)
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | ';' | '!' | '?' | '(' | ')' | '"'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn is_temporal(token: &str) -> bool {
    if TEMPORAL_KEYWORDS.contains(&token) || parse_clock_time(token).is_some() {
        return true;
    }
    token.len() == 4
        && token
            .parse::<u16>()
            .map(|year| (1900..=2100).contains(&year))
            .unwrap_or(false)
}
