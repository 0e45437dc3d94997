//! Life-event questionnaire
//!
//! The built-in catalog of clarifying questions, how answers are read as
//! evidence, and the selection of the next batch of questions for a session.
//!
//! Selection favours the categories of the techniques that contributed least
//! to agreement in the last result: more evidence there is the likeliest way
//! to move a lagging technique.

use crate::types::{Body, LifeEventAnswer};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Life area a question asks about
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifeEventCategory {
    Marriage,
    Career,
    Children,
    Health,
    Relocation,
    Education,
    Parents,
    Travel,
    Personality,
    BirthCircumstances,
}

impl LifeEventCategory {
    /// Houses (1-12) that signify the category
    pub fn houses(self) -> &'static [u8] {
        match self {
            LifeEventCategory::Marriage => &[7, 2],
            LifeEventCategory::Career => &[10, 6],
            LifeEventCategory::Children => &[5],
            LifeEventCategory::Health => &[6, 1],
            LifeEventCategory::Relocation => &[4, 12],
            LifeEventCategory::Education => &[4, 9],
            LifeEventCategory::Parents => &[4, 9],
            LifeEventCategory::Travel => &[3, 9, 12],
            LifeEventCategory::Personality => &[1],
            LifeEventCategory::BirthCircumstances => &[1, 8],
        }
    }

    /// Natural significator planets of the category
    pub fn significators(self) -> &'static [Body] {
        match self {
            LifeEventCategory::Marriage => &[Body::Venus, Body::Jupiter],
            LifeEventCategory::Career => &[Body::Saturn, Body::Sun, Body::Mercury],
            LifeEventCategory::Children => &[Body::Jupiter],
            LifeEventCategory::Health => &[Body::Sun, Body::Mars],
            LifeEventCategory::Relocation => &[Body::Rahu, Body::Moon],
            LifeEventCategory::Education => &[Body::Mercury, Body::Jupiter],
            LifeEventCategory::Parents => &[Body::Sun, Body::Moon],
            LifeEventCategory::Travel => &[Body::Rahu, Body::Moon],
            LifeEventCategory::Personality => &[Body::Mars, Body::Sun],
            LifeEventCategory::BirthCircumstances => &[Body::Ketu, Body::Moon, Body::Saturn],
        }
    }
}

/// Expected answer shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// ISO date or year
    Date,
    YesNo,
    Choice,
    FreeText,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Question {
    pub id: &'static str,
    pub category: LifeEventCategory,
    pub kind: QuestionKind,
    pub prompt: &'static str,
    #[serde(skip_serializing_if = "no_choices")]
    pub choices: &'static [&'static str],
}

fn no_choices(choices: &&'static [&'static str]) -> bool {
    choices.is_empty()
}

const fn q(
    id: &'static str,
    category: LifeEventCategory,
    kind: QuestionKind,
    prompt: &'static str,
) -> Question {
    Question {
        id,
        category,
        kind,
        prompt,
        choices: &[],
    }
}

use LifeEventCategory as C;
use QuestionKind as K;

static CATALOG: [Question; 26] = [
    q("marriage_date", C::Marriage, K::Date, "When did you marry or enter a long-term partnership?"),
    q("marriage_more_than_once", C::Marriage, K::YesNo, "Have you married more than once?"),
    q("partner_meeting", C::Marriage, K::FreeText, "Describe how and when you met your partner."),
    q("first_job_date", C::Career, K::Date, "When did you start your first full-time job?"),
    q("career_change", C::Career, K::YesNo, "Have you made a major career change?"),
    q("career_peak", C::Career, K::FreeText, "Describe the high point of your career so far and when it happened."),
    q("first_child_date", C::Children, K::Date, "When was your first child born?"),
    q("children_count", C::Children, K::YesNo, "Do you have more than one child?"),
    q("major_illness", C::Health, K::YesNo, "Have you had a major illness or surgery?"),
    q("illness_date", C::Health, K::Date, "When did the most significant health event occur?"),
    q("health_description", C::Health, K::FreeText, "Describe your general health and energy through the day."),
    q("relocation_date", C::Relocation, K::Date, "When did you first move far away from your birthplace?"),
    q("lived_abroad", C::Relocation, K::YesNo, "Have you lived abroad for more than a year?"),
    q("graduation_date", C::Education, K::Date, "When did you complete your highest degree?"),
    q(
        "education_interrupted",
        C::Education,
        K::YesNo,
        "Was your education interrupted for a year or more?",
    ),
    q("father_event_date", C::Parents, K::Date, "When did a major event affect your father?"),
    q("mother_event_date", C::Parents, K::Date, "When did a major event affect your mother?"),
    q("parents_relationship", C::Parents, K::FreeText, "Describe your relationship with your parents as a child."),
    q("long_journey_date", C::Travel, K::Date, "When did you take your first long journey overseas?"),
    q("frequent_travel", C::Travel, K::YesNo, "Does your work involve frequent travel?"),
    Question {
        id: "temperament",
        category: C::Personality,
        kind: K::Choice,
        prompt: "Which word best describes your temperament?",
        choices: &["fiery", "calm", "practical", "restless", "reflective"],
    },
    q("self_description", C::Personality, K::FreeText, "Describe your personality in a few sentences."),
    q("daily_rhythm", C::Personality, K::FreeText, "At what time of day do you feel most alert and why?"),
    q("birth_order", C::BirthCircumstances, K::YesNo, "Were you the first-born child?"),
    q("birth_complications", C::BirthCircumstances, K::YesNo, "Were there complications at your birth?"),
    q(
        "birth_story",
        C::BirthCircumstances,
        K::FreeText,
        "What were you told about the circumstances and hour of your birth?",
    ),
];

/// The full catalog in presentation order
pub fn catalog() -> &'static [Question] {
    &CATALOG
}

pub fn find_question(id: &str) -> Option<&'static Question> {
    CATALOG.iter().find(|q| q.id == id)
}

/// Whether an answer asserts that the event happened.
///
/// "no" to a yes/no question or an empty date carries no timing evidence.
pub fn signals_event(question: &Question, raw_value: &str) -> bool {
    let value = raw_value.trim().to_ascii_lowercase();
    if value.is_empty() {
        return false;
    }
    match question.kind {
        QuestionKind::YesNo => matches!(value.as_str(), "yes" | "y" | "true" | "1"),
        QuestionKind::Date => value.chars().any(|c| c.is_ascii_digit()),
        QuestionKind::Choice => value != "none",
        QuestionKind::FreeText => true,
    }
}

/// Catalog answers that signal an event, paired with their question
pub fn evidence(answers: &[LifeEventAnswer]) -> Vec<(&'static Question, &LifeEventAnswer)> {
    answers
        .iter()
        .filter_map(|a| find_question(&a.question_id).map(|q| (q, a)))
        .filter(|(q, a)| signals_event(q, &a.raw_value))
        .collect()
}

/// Text of free-form answers: free-text catalog questions plus any answer to
/// a question outside the catalog
pub fn free_text(answers: &[LifeEventAnswer]) -> Vec<&str> {
    answers
        .iter()
        .filter(|a| {
            find_question(&a.question_id)
                .map(|q| q.kind == QuestionKind::FreeText)
                .unwrap_or(true)
        })
        .map(|a| a.raw_value.as_str())
        .collect()
}

/// Pick the next clarifying questions.
///
/// Techniques are visited by ascending contributing weight (ties by id);
/// unanswered questions from their sensitive categories come first, in
/// catalog order, then any other unanswered question fills the batch.
pub fn select_questions(
    contributing_weights: &BTreeMap<String, f64>,
    sensitivities: &BTreeMap<String, Vec<LifeEventCategory>>,
    answered: &BTreeSet<String>,
    limit: usize,
) -> Vec<&'static Question> {
    let mut techniques: Vec<(&String, f64)> = sensitivities
        .keys()
        .map(|id| (id, contributing_weights.get(id).copied().unwrap_or(0.0)))
        .collect();
    techniques.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));

    let mut selected: Vec<&'static Question> = Vec::with_capacity(limit);
    let push = |question: &'static Question, selected: &mut Vec<&'static Question>| {
        if selected.len() < limit
            && !answered.contains(question.id)
            && !selected.iter().any(|s| s.id == question.id)
        {
            selected.push(question);
        }
    };

    for (technique_id, _) in techniques {
        let categories = &sensitivities[technique_id];
        for question in CATALOG.iter().filter(|q| categories.contains(&q.category)) {
            push(question, &mut selected);
        }
    }
    for question in CATALOG.iter() {
        push(question, &mut selected);
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_ids_are_unique() {
        let ids: BTreeSet<_> = catalog().iter().map(|q| q.id).collect();
        assert_eq!(ids.len(), catalog().len());
    }

    #[test]
    fn test_signals_event_by_kind() {
        let yes_no = find_question("career_change").unwrap();
        assert!(signals_event(yes_no, "Yes"));
        assert!(!signals_event(yes_no, "no"));

        let date = find_question("marriage_date").unwrap();
        assert!(signals_event(date, "2010-06-01"));
        assert!(!signals_event(date, "never"));

        let text = find_question("birth_story").unwrap();
        assert!(!signals_event(text, "   "));
    }

    #[test]
    fn test_free_text_includes_unknown_questions() {
        let answers = vec![
            LifeEventAnswer::new("career_change", "yes"),
            LifeEventAnswer::new("self_description", "Calm and steady"),
            LifeEventAnswer::new("custom_note", "Born around dawn"),
        ];
        assert_eq!(free_text(&answers), vec!["Calm and steady", "Born around dawn"]);
    }

    #[test]
    fn test_selection_prefers_weakest_technique() {
        let weights = BTreeMap::from([
            ("kp".to_string(), 0.6),
            ("nadi".to_string(), 0.1),
        ]);
        let sensitivities = BTreeMap::from([
            ("kp".to_string(), vec![LifeEventCategory::Career]),
            ("nadi".to_string(), vec![LifeEventCategory::Children]),
        ]);

        let picked = select_questions(&weights, &sensitivities, &BTreeSet::new(), 3);
        let ids: Vec<_> = picked.iter().map(|q| q.id).collect();
        assert_eq!(ids, vec!["first_child_date", "children_count", "first_job_date"]);
    }

    #[test]
    fn test_selection_skips_answered_and_fills_from_catalog() {
        let sensitivities =
            BTreeMap::from([("nadi".to_string(), vec![LifeEventCategory::Children])]);
        let answered = BTreeSet::from(["first_child_date".to_string(), "children_count".to_string()]);

        let picked = select_questions(&BTreeMap::new(), &sensitivities, &answered, 2);
        let ids: Vec<_> = picked.iter().map(|q| q.id).collect();
        assert_eq!(ids, vec!["marriage_date", "marriage_more_than_once"]);
    }

    #[test]
    fn test_selection_empty_when_everything_answered() {
        let answered: BTreeSet<String> = catalog().iter().map(|q| q.id.to_string()).collect();
        assert!(select_questions(&BTreeMap::new(), &BTreeMap::new(), &answered, 3).is_empty());
    }
}
