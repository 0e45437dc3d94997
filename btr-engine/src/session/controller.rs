//! Adaptive Session Controller
//!
//! **Concept:** Drive each session through repeated analysis passes until
//! the confidence threshold is met or the iteration budget runs out.
//!
//! **Synchronization:** One writer per session. Every pass runs on a copy of
//! the committed session and is committed as a whole, so a cancelled or
//! failed pass leaves the visible state untouched.
//!
//! **Algorithm:**
//! 1. Fan out to every technique predictor (timeouts degrade, never abort)
//! 2. Assess input quality, analyze agreement, aggregate confidence
//! 3. Score ≥ threshold → Completed
//! 4. Passes left and questions left → AwaitingAnswers with the next batch
//! 5. Otherwise → Terminated (insufficient confidence); aggregation errors
//!    terminate with an error

use super::store::{SessionHandle, SessionStore};
use crate::config::RectificationConfig;
use crate::db::sessions::{load_session, save_session};
use crate::fusion::{AgreementAnalyzer, ConfidenceAggregator};
use crate::models::{RectificationSession, SessionState, TerminationReason};
use crate::predictors::PredictorRegistry;
use crate::questions::{find_question, free_text, select_questions, Question};
use crate::types::{
    BirthChart, BirthDetails, ConfidenceResult, LifeEventAnswer, RectificationError,
    RectificationResult,
};
use crate::validators::QualityAssessor;
use btr_common::events::{EventBus, RectificationEvent};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Response to `create_session` and `submit_answers`
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    pub status: SessionState,
    pub iteration_count: u32,
    /// Questions to answer next; empty once the session is terminal
    pub next_questions: Vec<&'static Question>,
    /// Latest result; final once the session is terminal
    pub result: Option<ConfidenceResult>,
    pub insufficient_confidence: bool,
    /// Set when the session terminated with an error
    pub error: Option<String>,
}

impl SessionOutcome {
    fn of(session: &RectificationSession) -> Self {
        Self {
            session_id: session.session_id,
            status: session.state,
            iteration_count: session.iteration_count,
            next_questions: session
                .pending_question_ids
                .iter()
                .filter_map(|id| find_question(id))
                .collect(),
            result: session.last_result.clone(),
            insufficient_confidence: session.insufficient_confidence(),
            error: termination_error(session),
        }
    }
}

/// Response to `get_result`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionResult {
    /// Session still iterating
    Pending {
        session_id: Uuid,
        state: SessionState,
        iteration_count: u32,
    },
    /// Session is terminal
    Final {
        session_id: Uuid,
        state: SessionState,
        iteration_count: u32,
        insufficient_confidence: bool,
        error: Option<String>,
        /// Absent only when the first pass already failed
        result: Option<ConfidenceResult>,
    },
}

impl SessionResult {
    fn of(session: &RectificationSession) -> Self {
        if session.is_terminal() {
            SessionResult::Final {
                session_id: session.session_id,
                state: session.state,
                iteration_count: session.iteration_count,
                insufficient_confidence: session.insufficient_confidence(),
                error: termination_error(session),
                result: session.last_result.clone(),
            }
        } else {
            SessionResult::Pending {
                session_id: session.session_id,
                state: session.state,
                iteration_count: session.iteration_count,
            }
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, SessionResult::Final { .. })
    }
}

fn termination_error(session: &RectificationSession) -> Option<String> {
    match &session.termination {
        Some(TerminationReason::Error { message }) => Some(message.clone()),
        _ => None,
    }
}

pub struct SessionController {
    store: Arc<SessionStore>,
    registry: Arc<PredictorRegistry>,
    assessor: QualityAssessor,
    analyzer: AgreementAnalyzer,
    aggregator: ConfidenceAggregator,
    config: RectificationConfig,
    event_bus: EventBus,
    archive: Option<SqlitePool>,
    shutdown: CancellationToken,
}

impl SessionController {
    pub fn new(
        config: RectificationConfig,
        registry: Arc<PredictorRegistry>,
        store: Arc<SessionStore>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            store,
            registry,
            assessor: QualityAssessor::default(),
            analyzer: AgreementAnalyzer::new(&config.tiers),
            aggregator: ConfidenceAggregator::new(config.clone()),
            config,
            event_bus,
            archive: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Archive terminal sessions to SQLite
    pub fn with_archive(mut self, pool: SqlitePool) -> Self {
        self.archive = Some(pool);
        self
    }

    /// In-flight passes are cancelled when `token` fires
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn config(&self) -> &RectificationConfig {
        &self.config
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Validate the chart, run the first pass and register the session.
    ///
    /// `birth_details` defaults to the fields derivable from the chart.
    pub async fn create_session(
        &self,
        chart: BirthChart,
        birth_details: Option<BirthDetails>,
        seed_answers: Vec<LifeEventAnswer>,
    ) -> RectificationResult<SessionOutcome> {
        chart.validate()?;
        if self.registry.is_empty() {
            return Err(RectificationError::Configuration(
                "no technique predictors registered".to_string(),
            ));
        }

        let details = birth_details.unwrap_or_else(|| BirthDetails::from_chart(&chart));
        let mut session = RectificationSession::new(chart, details, seed_answers);
        let session_id = session.session_id;

        info!(
            session_id = %session_id,
            techniques = self.registry.len(),
            seed_answers = session.answers.len(),
            "Creating rectification session"
        );
        self.event_bus.emit_lossy(RectificationEvent::SessionCreated {
            session_id,
            technique_count: self.registry.len(),
            seed_answer_count: session.answers.len(),
            timestamp: Utc::now(),
        });

        self.analyze(&mut session).await?;

        let outcome = SessionOutcome::of(&session);
        let handle = self.store.insert(session.clone()).await;
        if session.is_terminal() {
            self.archive_session(&handle, &session).await;
        }
        Ok(outcome)
    }

    /// Record new answers and run the next pass.
    ///
    /// Answers for already-recorded question ids are ignored; a batch with
    /// nothing new returns the current outcome without running a pass.
    pub async fn submit_answers(
        &self,
        session_id: Uuid,
        answers: Vec<LifeEventAnswer>,
    ) -> RectificationResult<SessionOutcome> {
        let Some(handle) = self.store.get(session_id).await else {
            let archived = self.load_archived(session_id).await?;
            return Self::replay_on_closed(archived, &answers);
        };

        let _writer = handle.lock_writer().await;
        // A purge may have dropped the session while this call waited
        let still_held = matches!(
            self.store.get(session_id).await,
            Some(current) if Arc::ptr_eq(&current, &handle)
        );
        if !still_held {
            debug!(session_id = %session_id, "Session left memory before its writer lock was taken");
            let archived = self.load_archived(session_id).await?;
            return Self::replay_on_closed(archived, &answers);
        }
        let committed = handle.snapshot().await;
        if committed.is_terminal() {
            return Self::replay_on_closed(committed, &answers);
        }

        let mut working = committed.clone();
        let added = working.record_answers(answers);
        if added == 0 {
            debug!(session_id = %session_id, "No new answers, outcome unchanged");
            return Ok(SessionOutcome::of(&committed));
        }
        info!(session_id = %session_id, added, total = working.answers.len(), "Answers recorded");

        self.analyze(&mut working).await?;

        handle.commit(working.clone()).await;
        if working.is_terminal() {
            self.archive_session(&handle, &working).await;
        }
        Ok(SessionOutcome::of(&working))
    }

    /// Final result, or pending while the session still iterates.
    ///
    /// Retrieving the final result of an archived session releases its
    /// in-memory copy.
    pub async fn get_result(&self, session_id: Uuid) -> RectificationResult<SessionResult> {
        match self.store.get(session_id).await {
            Some(handle) => {
                let session = handle.snapshot().await;
                let result = SessionResult::of(&session);
                if result.is_final() && handle.is_archived() {
                    self.store.remove(session_id).await;
                    debug!(session_id = %session_id, "Final result retrieved, released from memory");
                }
                Ok(result)
            }
            None => Ok(SessionResult::of(&self.load_archived(session_id).await?)),
        }
    }

    /// Committed session state, from memory or the archive
    pub async fn snapshot(&self, session_id: Uuid) -> RectificationResult<RectificationSession> {
        match self.store.get(session_id).await {
            Some(handle) => Ok(handle.snapshot().await),
            None => self.load_archived(session_id).await,
        }
    }

    /// Periodically drop idle sessions until shutdown
    pub fn spawn_purge_task(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = controller.shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        controller.store.purge_expired(controller.config.session_ttl()).await;
                    }
                }
            }
            debug!("Session purge task stopped");
        })
    }

    // ========================================================================
    // Analysis pass
    // ========================================================================

    /// Run one pass on `session` and apply the transition rule.
    ///
    /// Only `Cancelled` is returned as an error; aggregation failures
    /// terminate the session instead.
    async fn analyze(&self, session: &mut RectificationSession) -> RectificationResult<()> {
        let session_id = session.session_id;
        let iteration = session.iteration_count + 1;
        session.transition_to(SessionState::Analyzing);
        self.event_bus.emit_lossy(RectificationEvent::AnalysisStarted {
            session_id,
            iteration,
            timestamp: Utc::now(),
        });

        let outcomes = match self
            .registry
            .estimate_all(session_id, &session.chart, &session.answers, &self.shutdown)
            .await
        {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(session_id = %session_id, iteration, error = %e, "Analysis cancelled");
                return Err(e);
            }
        };

        let mut estimates = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            if let Some(reason) = outcome.degraded_reason() {
                self.event_bus.emit_lossy(RectificationEvent::TechniqueDegraded {
                    session_id,
                    technique_id: outcome.estimate.technique_id.clone(),
                    reason,
                    timestamp: Utc::now(),
                });
            }
            estimates.push(outcome.estimate);
        }

        let quality = self
            .assessor
            .assess(&session.birth_details, &free_text(&session.answers));
        let agreement = self.analyzer.analyze(&estimates);

        let result = match self.aggregator.aggregate(&estimates, &agreement, &quality) {
            Ok(result) => result,
            Err(e) => {
                warn!(session_id = %session_id, iteration, error = %e, "Analysis failed, terminating session");
                session.terminate(TerminationReason::Error {
                    message: e.to_string(),
                });
                self.event_bus.emit_lossy(RectificationEvent::SessionTerminated {
                    session_id,
                    reason: "error".to_string(),
                    score: session.last_result.as_ref().map(|r| r.score),
                    timestamp: Utc::now(),
                });
                return Ok(());
            }
        };

        session.iteration_count = iteration;
        info!(
            session_id = %session_id,
            iteration,
            score = result.score,
            reliability = %result.reliability_level,
            rectified_time = %result.rectified_clock,
            "Analysis complete"
        );
        self.event_bus.emit_lossy(RectificationEvent::AnalysisCompleted {
            session_id,
            iteration,
            score: result.score,
            reliability_level: result.reliability_level.label().to_string(),
            rectified_time: result.rectified_clock.clone(),
            timestamp: Utc::now(),
        });

        let score = result.score;
        let rectified_time = result.rectified_clock.clone();
        let next = if score >= self.config.completion_threshold {
            Vec::new()
        } else {
            select_questions(
                &result.contributing_weights,
                &self.registry.sensitivities(),
                &session.answered_ids(),
                self.config.questions_per_iteration,
            )
        };
        session.last_result = Some(result);

        if score >= self.config.completion_threshold {
            session.pending_question_ids.clear();
            session.transition_to(SessionState::Completed);
            info!(session_id = %session_id, score, "Session completed");
            self.event_bus.emit_lossy(RectificationEvent::SessionCompleted {
                session_id,
                score,
                rectified_time,
                timestamp: Utc::now(),
            });
        } else if iteration < self.config.max_iterations && !next.is_empty() {
            session.pending_question_ids = next.iter().map(|q| q.id.to_string()).collect();
            session.transition_to(SessionState::AwaitingAnswers);
            self.event_bus.emit_lossy(RectificationEvent::QuestionsIssued {
                session_id,
                question_ids: session.pending_question_ids.clone(),
                timestamp: Utc::now(),
            });
        } else {
            info!(
                session_id = %session_id,
                iteration,
                score,
                questions_left = !next.is_empty(),
                "Session terminated with insufficient confidence"
            );
            session.terminate(TerminationReason::InsufficientConfidence);
            self.event_bus.emit_lossy(RectificationEvent::SessionTerminated {
                session_id,
                reason: TerminationReason::InsufficientConfidence.as_str().to_string(),
                score: Some(score),
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Archive
    // ========================================================================

    async fn archive_session(&self, handle: &SessionHandle, session: &RectificationSession) {
        let Some(pool) = &self.archive else {
            return;
        };
        match save_session(pool, session).await {
            Ok(()) => {
                handle.mark_archived();
                debug!(session_id = %session.session_id, state = %session.state, "Session archived");
            }
            Err(e) => warn!(
                session_id = %session.session_id,
                error = %e,
                "Failed to archive session, keeping it in memory"
            ),
        }
    }

    async fn load_archived(&self, session_id: Uuid) -> RectificationResult<RectificationSession> {
        let Some(pool) = &self.archive else {
            return Err(RectificationError::SessionNotFound(session_id));
        };
        load_session(pool, session_id)
            .await?
            .ok_or(RectificationError::SessionNotFound(session_id))
    }

    /// Retried batches against a terminal session get its final outcome;
    /// batches carrying new answers are rejected.
    fn replay_on_closed(
        session: RectificationSession,
        answers: &[LifeEventAnswer],
    ) -> RectificationResult<SessionOutcome> {
        let answered = session.answered_ids();
        if answers.iter().all(|a| answered.contains(&a.question_id)) {
            Ok(SessionOutcome::of(&session))
        } else {
            Err(RectificationError::SessionClosed {
                session_id: session.session_id,
                state: session.state.to_string(),
            })
        }
    }
}
