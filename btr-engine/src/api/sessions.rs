//! Rectification session API handlers
//!
//! POST /sessions, POST /sessions/:id/answers, GET /sessions/:id/result,
//! GET /sessions/:id, GET /questions

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    models::{SessionState, TerminationReason},
    questions::{catalog, find_question, Question},
    session::{SessionOutcome, SessionResult},
    types::{BirthChart, BirthDetails, ConfidenceResult, LifeEventAnswer},
    AppState,
};

/// One answer as sent by the questionnaire
#[derive(Debug, Deserialize)]
pub struct AnswerInput {
    pub question_id: String,
    #[serde(alias = "value")]
    pub raw_value: String,
}

/// POST /sessions request
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub chart: BirthChart,
    /// Raw birth-data fields as entered; derived from the chart when absent
    #[serde(default)]
    pub birth_details: Option<BirthDetails>,
    #[serde(default)]
    pub seed_answers: Vec<AnswerInput>,
}

/// POST /sessions/:id/answers request
#[derive(Debug, Deserialize)]
pub struct SubmitAnswersRequest {
    pub answers: Vec<AnswerInput>,
}

/// GET /sessions/:id response
#[derive(Debug, Serialize)]
pub struct SessionSnapshotResponse {
    pub session_id: Uuid,
    pub status: SessionState,
    pub iteration_count: u32,
    pub answers: Vec<LifeEventAnswer>,
    pub pending_questions: Vec<&'static Question>,
    pub termination: Option<TerminationReason>,
    pub last_result: Option<ConfidenceResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

fn to_answers(inputs: Vec<AnswerInput>) -> ApiResult<Vec<LifeEventAnswer>> {
    inputs
        .into_iter()
        .map(|input| {
            let question_id = input.question_id.trim();
            if question_id.is_empty() {
                return Err(ApiError::BadRequest("answer without question_id".to_string()));
            }
            Ok(LifeEventAnswer::new(question_id, input.raw_value))
        })
        .collect()
}

/// POST /sessions
///
/// Create a session and run its first analysis. Returns 201 with the outcome.
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<SessionOutcome>)> {
    let seed_answers = to_answers(request.seed_answers)?;
    let outcome = state
        .controller
        .create_session(request.chart, request.birth_details, seed_answers)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// POST /sessions/:id/answers
pub async fn submit_answers(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SubmitAnswersRequest>,
) -> ApiResult<Json<SessionOutcome>> {
    let answers = to_answers(request.answers)?;
    let outcome = state.controller.submit_answers(session_id, answers).await?;
    Ok(Json(outcome))
}

/// GET /sessions/:id/result
///
/// `{"status": "pending", ...}` until the session is terminal.
pub async fn get_result(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionResult>> {
    Ok(Json(state.controller.get_result(session_id).await?))
}

/// GET /sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionSnapshotResponse>> {
    let session = state.controller.snapshot(session_id).await?;
    Ok(Json(SessionSnapshotResponse {
        session_id: session.session_id,
        status: session.state,
        iteration_count: session.iteration_count,
        pending_questions: session
            .pending_question_ids
            .iter()
            .filter_map(|id| find_question(id))
            .collect(),
        answers: session.answers,
        termination: session.termination,
        last_result: session.last_result,
        created_at: session.created_at,
        updated_at: session.updated_at,
        ended_at: session.ended_at,
    }))
}

/// GET /questions
pub async fn list_questions() -> Json<&'static [Question]> {
    Json(catalog())
}

/// Build session routes
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/answers", post(submit_answers))
        .route("/sessions/:id/result", get(get_result))
        .route("/questions", get(list_questions))
}
