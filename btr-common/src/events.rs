//! Event types for the rectification event system
//!
//! Provides the shared event definitions and the broadcast EventBus used to
//! fan session progress out to SSE clients and log consumers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Rectification session lifecycle events
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum RectificationEvent {
    /// Session accepted and about to run its first analysis
    SessionCreated {
        session_id: Uuid,
        /// Number of registered techniques
        technique_count: usize,
        /// Seed answers supplied at creation
        seed_answer_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An analysis pass started
    AnalysisStarted {
        session_id: Uuid,
        /// 1-based number of the pass being run
        iteration: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A technique fell back to its heuristic distribution
    ///
    /// Triggers:
    /// - SSE: Mark technique as degraded in the progress view
    TechniqueDegraded {
        session_id: Uuid,
        technique_id: String,
        /// Failure that caused the fallback (timeout, service error, ...)
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An analysis pass produced a confidence result
    AnalysisCompleted {
        session_id: Uuid,
        iteration: u32,
        /// Confidence score 0-100
        score: f64,
        /// Reliability label ("Very High" ... "Very Low")
        reliability_level: String,
        /// Rectified time as HH:MM
        rectified_time: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Clarifying questions were issued to the caller
    QuestionsIssued {
        session_id: Uuid,
        question_ids: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Completion threshold reached; result frozen
    SessionCompleted {
        session_id: Uuid,
        score: f64,
        rectified_time: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Session ended without reaching the completion threshold
    SessionTerminated {
        session_id: Uuid,
        /// "insufficient_confidence" or "error"
        reason: String,
        /// Best-effort score, absent when the session ended in error before any result
        score: Option<f64>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl RectificationEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            RectificationEvent::SessionCreated { .. } => "SessionCreated",
            RectificationEvent::AnalysisStarted { .. } => "AnalysisStarted",
            RectificationEvent::TechniqueDegraded { .. } => "TechniqueDegraded",
            RectificationEvent::AnalysisCompleted { .. } => "AnalysisCompleted",
            RectificationEvent::QuestionsIssued { .. } => "QuestionsIssued",
            RectificationEvent::SessionCompleted { .. } => "SessionCompleted",
            RectificationEvent::SessionTerminated { .. } => "SessionTerminated",
        }
    }

    /// Session the event belongs to
    pub fn session_id(&self) -> Uuid {
        match self {
            RectificationEvent::SessionCreated { session_id, .. }
            | RectificationEvent::AnalysisStarted { session_id, .. }
            | RectificationEvent::TechniqueDegraded { session_id, .. }
            | RectificationEvent::AnalysisCompleted { session_id, .. }
            | RectificationEvent::QuestionsIssued { session_id, .. }
            | RectificationEvent::SessionCompleted { session_id, .. }
            | RectificationEvent::SessionTerminated { session_id, .. } => *session_id,
        }
    }
}

/// Broadcast bus for rectification events
///
/// Lagging receivers lose the oldest events; the engine never blocks on a
/// slow subscriber.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RectificationEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use btr_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<RectificationEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: RectificationEvent,
    ) -> Result<usize, broadcast::error::SendError<RectificationEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: RectificationEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
