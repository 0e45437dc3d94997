//! Rectification session state machine
//!
//! INITIALIZED → ANALYZING → {AWAITING_ANSWERS ⇄ ANALYZING} → COMPLETED | TERMINATED

use crate::types::{BirthChart, BirthDetails, ConfidenceResult, LifeEventAnswer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Session workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Created with chart and seed answers, first pass not yet run
    Initialized,
    /// Predictors and aggregation running
    Analyzing,
    /// Clarifying questions issued, waiting for `submit_answers`
    AwaitingAnswers,
    /// Completion threshold reached; result frozen
    Completed,
    /// Iteration budget exhausted, questions exhausted, or aggregation error
    Terminated,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Terminated)
    }

    /// Lowercase label used in API responses and logs
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Initialized => "initialized",
            SessionState::Analyzing => "analyzing",
            SessionState::AwaitingAnswers => "awaiting_answers",
            SessionState::Completed => "completed",
            SessionState::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session was terminated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminationReason {
    /// Threshold not reached within the budget; the last result stands
    InsufficientConfidence,
    /// An analysis pass failed irrecoverably
    Error { message: String },
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::InsufficientConfidence => "insufficient_confidence",
            TerminationReason::Error { .. } => "error",
        }
    }
}

/// State transition record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub old_state: SessionState,
    pub new_state: SessionState,
    pub transitioned_at: DateTime<Utc>,
}

/// Rectification session (in-memory state)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RectificationSession {
    pub session_id: Uuid,

    /// Chart snapshot from the external calculator, never modified
    pub chart: BirthChart,

    /// Raw birth-data fields as entered, scored by the quality assessor
    pub birth_details: BirthDetails,

    /// Append-only, one entry per question id
    pub answers: Vec<LifeEventAnswer>,

    /// Completed analysis passes
    pub iteration_count: u32,

    pub state: SessionState,

    /// Set when `state` is `Terminated`
    pub termination: Option<TerminationReason>,

    pub last_result: Option<ConfidenceResult>,

    /// Questions issued by the last pass and not yet answered
    pub pending_question_ids: Vec<String>,

    pub transitions: Vec<StateTransition>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl RectificationSession {
    /// New session; duplicate question ids among the seed answers keep the first
    pub fn new(chart: BirthChart, birth_details: BirthDetails, seed_answers: Vec<LifeEventAnswer>) -> Self {
        let now = Utc::now();
        let mut session = Self {
            session_id: Uuid::new_v4(),
            chart,
            birth_details,
            answers: Vec::new(),
            iteration_count: 0,
            state: SessionState::Initialized,
            termination: None,
            last_result: None,
            pending_question_ids: Vec::new(),
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
            ended_at: None,
        };
        session.record_answers(seed_answers);
        session
    }

    /// Transition to new state
    ///
    /// Terminal states are final: a transition out of one is ignored and
    /// returns `None`.
    pub fn transition_to(&mut self, new_state: SessionState) -> Option<StateTransition> {
        if self.state.is_terminal() {
            return None;
        }
        let now = Utc::now();
        let transition = StateTransition {
            old_state: self.state,
            new_state,
            transitioned_at: now,
        };
        self.state = new_state;
        self.updated_at = now;
        if new_state.is_terminal() {
            self.ended_at = Some(now);
        }
        self.transitions.push(transition.clone());
        Some(transition)
    }

    /// Terminate with a reason
    pub fn terminate(&mut self, reason: TerminationReason) -> Option<StateTransition> {
        let transition = self.transition_to(SessionState::Terminated)?;
        self.termination = Some(reason);
        self.pending_question_ids.clear();
        Some(transition)
    }

    /// Append answers whose question id is not yet recorded.
    ///
    /// Returns how many were added; repeats of a recorded question id (or
    /// within the batch) are dropped.
    pub fn record_answers(&mut self, answers: Vec<LifeEventAnswer>) -> usize {
        let mut known = self.answered_ids();
        let mut added = 0;
        for answer in answers {
            if known.insert(answer.question_id.clone()) {
                self.pending_question_ids.retain(|id| id != &answer.question_id);
                self.answers.push(answer);
                added += 1;
            }
        }
        if added > 0 {
            self.updated_at = Utc::now();
        }
        added
    }

    pub fn answered_ids(&self) -> BTreeSet<String> {
        self.answers.iter().map(|a| a.question_id.clone()).collect()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// `insufficient_confidence` flag of the outcome
    pub fn insufficient_confidence(&self) -> bool {
        matches!(self.termination, Some(TerminationReason::InsufficientConfidence))
    }
}
