//! Clerk API Endpoints

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::clerk::{ActionOutcome, ClerkAction};
use crate::error::CivicError;

const MAX_ACTIONS_PER_CALL: usize = 50;

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub actions: Vec<ClerkAction>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub results: Vec<ActionOutcome>,
}

/// POST /clerk/{name}/execute - run a batch of actions as the named clerk
///
/// Denied or failed actions are reported per entry; the call itself only
/// fails for an unknown clerk or a malformed batch.
async fn execute(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, CivicError> {
    if request.actions.len() > MAX_ACTIONS_PER_CALL {
        return Err(CivicError::validation(format!(
            "at most {} actions per call",
            MAX_ACTIONS_PER_CALL
        )));
    }
    let results = state.clerks.execute_as(&name, &request.actions).await?;
    Ok(Json(ExecuteResponse { results }))
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/{name}/execute", post(execute))
        .with_state(state)
}
