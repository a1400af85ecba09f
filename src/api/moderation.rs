//! Moderation API Endpoints
//!
//! Citizen submissions plus the operator decisions that move them out of
//! the pending state. Decisions are mounted under `/admin`.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::context::RequestContext;
use crate::error::CivicError;
use crate::moderation::{ModeratedRequest, ModerationStatus, RequestKind, TransitionOutcome};

const DEFAULT_PENDING_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct VolunteerApplicationRequest {
    pub motivation: String,
    #[serde(default)]
    pub skills: String,
}

#[derive(Debug, Deserialize)]
pub struct ThoughtRequest {
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    pub id: i64,
    pub status: ModerationStatus,
}

/// Result of an approve/reject call.
///
/// `success` is true when the request ends in the asked-for state, whether
/// this call moved it there or an earlier one did. Winner and loser get the
/// same body; delivery of the notification is only logged.
#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub success: bool,
    pub status: ModerationStatus,
}

impl DecisionResponse {
    fn from_outcome(outcome: TransitionOutcome, wanted: ModerationStatus) -> Self {
        let status = match outcome {
            TransitionOutcome::Applied { request, .. } => request.status,
            TransitionOutcome::AlreadyTransitioned { status } => status,
        };
        Self {
            success: status == wanted,
            status,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

/// POST /volunteers/apply - submit a volunteer application
async fn apply_volunteer(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Json(request): Json<VolunteerApplicationRequest>,
) -> Result<Json<SubmissionResponse>, CivicError> {
    let id = state
        .workflows
        .submit_volunteer_application(&ctx, &request.motivation, &request.skills)
        .await?;
    Ok(Json(SubmissionResponse {
        id,
        status: ModerationStatus::Pending,
    }))
}

/// POST /thoughts - submit a thought for moderation
async fn submit_thought(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Json(request): Json<ThoughtRequest>,
) -> Result<Json<SubmissionResponse>, CivicError> {
    let submission = state.workflows.submit_thought(&ctx, &request.body).await?;
    Ok(Json(SubmissionResponse {
        id: submission.thought_id,
        status: ModerationStatus::Pending,
    }))
}

/// POST /admin/volunteers/{id}/approve
async fn approve_volunteer(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<DecisionResponse>, CivicError> {
    let outcome = state.workflows.approve_volunteer(id).await?;
    Ok(Json(DecisionResponse::from_outcome(outcome, ModerationStatus::Accepted)))
}

/// POST /admin/volunteers/{id}/reject
async fn reject_volunteer(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<DecisionResponse>, CivicError> {
    let outcome = state.workflows.reject_volunteer(id).await?;
    Ok(Json(DecisionResponse::from_outcome(outcome, ModerationStatus::Rejected)))
}

/// POST /admin/thoughts/{id}/approve
async fn approve_thought(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<DecisionResponse>, CivicError> {
    let outcome = state.workflows.approve_thought(id).await?;
    Ok(Json(DecisionResponse::from_outcome(outcome, ModerationStatus::Accepted)))
}

/// POST /admin/thoughts/{id}/reject
async fn reject_thought(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<DecisionResponse>, CivicError> {
    let outcome = state.workflows.reject_thought(id).await?;
    Ok(Json(DecisionResponse::from_outcome(outcome, ModerationStatus::Rejected)))
}

/// GET /admin/volunteers/pending
async fn pending_volunteers(
    State(state): State<ApiState>,
    Query(query): Query<PendingQuery>,
) -> Result<Json<Vec<ModeratedRequest>>, CivicError> {
    let limit = query.limit.unwrap_or(DEFAULT_PENDING_LIMIT);
    Ok(Json(
        state
            .workflows
            .pending(RequestKind::VolunteerApplication, limit)
            .await?,
    ))
}

/// GET /admin/thoughts/pending
async fn pending_thoughts(
    State(state): State<ApiState>,
    Query(query): Query<PendingQuery>,
) -> Result<Json<Vec<ModeratedRequest>>, CivicError> {
    let limit = query.limit.unwrap_or(DEFAULT_PENDING_LIMIT);
    Ok(Json(state.workflows.pending(RequestKind::Thought, limit).await?))
}

/// Citizen submission routes.
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/volunteers/apply", post(apply_volunteer))
        .route("/thoughts", post(submit_thought))
        .with_state(state)
}

/// Operator decision routes, nested under `/admin`.
pub fn create_admin_router(state: ApiState) -> Router {
    Router::new()
        .route("/volunteers/pending", get(pending_volunteers))
        .route("/volunteers/{id}/approve", post(approve_volunteer))
        .route("/volunteers/{id}/reject", post(reject_volunteer))
        .route("/thoughts/pending", get(pending_thoughts))
        .route("/thoughts/{id}/approve", post(approve_thought))
        .route("/thoughts/{id}/reject", post(reject_thought))
        .with_state(state)
}
