//! Ledger API Endpoints
//!
//! Records point-earning actions for the calling session and reports its
//! totals. Points always come from the catalog here.

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::context::RequestContext;
use crate::error::CivicError;
use crate::identity::Actor;
use crate::ledger::{ActionType, EntryId, LedgerContext, LedgerEntry};

const DEFAULT_HISTORY_LIMIT: usize = 100;
const MAX_HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct RecordActionRequest {
    pub action_type: String,
    pub context: LedgerContext,
}

#[derive(Debug, Serialize)]
pub struct RecordActionResponse {
    pub entry_id: EntryId,
    pub duplicate: bool,
    pub points: i64,
    pub total_points: i64,
}

#[derive(Debug, Serialize)]
pub struct PointsResponse {
    pub total_points: i64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub entries: Vec<LedgerEntry>,
    pub truncated: bool,
}

/// POST /ledger/actions - record an action for the session
async fn record_action(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Json(request): Json<RecordActionRequest>,
) -> Result<Json<RecordActionResponse>, CivicError> {
    let action: ActionType = request.action_type.parse()?;
    if matches!(
        action,
        ActionType::EmailVerified
            | ActionType::PhoneVerified
            | ActionType::ThoughtSubmitted
            | ActionType::ClerkAward
    ) {
        return Err(CivicError::forbidden(format!(
            "{} is recorded by the system, not by clients",
            action
        )));
    }

    let actor = Actor::Session(ctx.session_token.clone());
    let outcome = state
        .ledger
        .record_default(&actor, action, &request.context)
        .await?;
    let total_points = state.ledger.total_points(&actor).await?;

    Ok(Json(RecordActionResponse {
        entry_id: outcome.entry_id,
        duplicate: outcome.duplicate,
        points: if outcome.duplicate {
            0
        } else {
            state.ledger.catalog().points_for(action)
        },
        total_points,
    }))
}

/// GET /ledger/points - total for the session or its identity
async fn points(
    State(state): State<ApiState>,
    ctx: RequestContext,
) -> Result<Json<PointsResponse>, CivicError> {
    let total_points = state
        .ledger
        .total_points(&Actor::Session(ctx.session_token))
        .await?;
    Ok(Json(PointsResponse { total_points }))
}

/// GET /ledger/history - newest entries first
async fn history(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, CivicError> {
    let filter = query
        .action_type
        .as_deref()
        .map(str::parse::<ActionType>)
        .transpose()?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let actor = Actor::Session(ctx.session_token);
    // One extra row tells whether the page was cut short.
    let mut entries: Vec<LedgerEntry> = state
        .ledger
        .history(&actor, filter)
        .await?
        .take(limit + 1)
        .try_collect()
        .await?;

    let truncated = entries.len() > limit;
    entries.truncate(limit);
    Ok(Json(HistoryResponse { entries, truncated }))
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/ledger/actions", post(record_action))
        .route("/ledger/points", get(points))
        .route("/ledger/history", get(history))
        .with_state(state)
}
