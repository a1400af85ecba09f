//! Operator API Endpoints
//!
//! Identity administration, clerk registration and the moderation
//! decision routes. Everything here sits behind the API key.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::citizen::IdentityView;
use super::ApiState;
use crate::clerk::{CapabilitySet, Clerk};
use crate::error::CivicError;
use crate::identity::{
    AgeBracket, BindMode, BindOutcome, DeviceBinding, ErasureReport, IdentityId, Role,
    SessionToken,
};

const MAX_CLERK_NAME_LEN: usize = 64;

#[derive(Debug, Serialize)]
pub struct IdentityDetailResponse {
    pub identity: IdentityView,
    pub bindings: Vec<DeviceBinding>,
    pub total_points: i64,
}

#[derive(Debug, Deserialize)]
pub struct BindRequest {
    pub session_token: String,
    #[serde(default)]
    pub mode: BindMode,
}

#[derive(Debug, Deserialize)]
pub struct PhoneRequest {
    pub phone: String,
}

#[derive(Debug, Deserialize)]
pub struct ConsentRequest {
    pub consent: bool,
}

#[derive(Debug, Deserialize)]
pub struct AgeRequest {
    pub age_bracket: AgeBracket,
}

#[derive(Debug, Deserialize)]
pub struct ResetVerificationRequest {
    #[serde(default)]
    pub email: bool,
    #[serde(default)]
    pub phone: bool,
}

#[derive(Debug, Deserialize)]
pub struct ClerkRequest {
    pub capabilities: CapabilitySet,
}

/// GET /admin/identities/{id}
async fn get_identity(
    State(state): State<ApiState>,
    Path(id): Path<IdentityId>,
) -> Result<Json<IdentityDetailResponse>, CivicError> {
    let identity = state.resolver.identity(id).await?;
    let bindings = state.resolver.bindings_of(id).await?;
    let total_points = state.ledger.total_points(&id.into()).await?;

    Ok(Json(IdentityDetailResponse {
        identity: IdentityView::from(&identity),
        bindings,
        total_points,
    }))
}

/// POST /admin/identities/{id}/bind - attach a session token to the identity
async fn bind_session(
    State(state): State<ApiState>,
    Path(id): Path<IdentityId>,
    Json(request): Json<BindRequest>,
) -> Result<Json<BindOutcome>, CivicError> {
    let token = SessionToken::parse(&request.session_token)?;
    let outcome = state.resolver.bind(&token, id, request.mode).await?;
    Ok(Json(outcome))
}

/// POST /admin/identities/{id}/phone - record a confirmed phone number
async fn confirm_phone(
    State(state): State<ApiState>,
    Path(id): Path<IdentityId>,
    Json(request): Json<PhoneRequest>,
) -> Result<Json<IdentityView>, CivicError> {
    let identity = state.resolver.confirm_phone(id, &request.phone).await?;
    Ok(Json(IdentityView::from(&identity)))
}

/// POST /admin/identities/{id}/consent - record parental consent
async fn parental_consent(
    State(state): State<ApiState>,
    Path(id): Path<IdentityId>,
    Json(request): Json<ConsentRequest>,
) -> Result<Json<IdentityView>, CivicError> {
    let identity = state
        .resolver
        .record_parental_consent(id, request.consent)
        .await?;
    Ok(Json(IdentityView::from(&identity)))
}

/// POST /admin/identities/{id}/age
async fn age_bracket(
    State(state): State<ApiState>,
    Path(id): Path<IdentityId>,
    Json(request): Json<AgeRequest>,
) -> Result<Json<IdentityView>, CivicError> {
    let identity = state.resolver.set_age_bracket(id, request.age_bracket).await?;
    Ok(Json(IdentityView::from(&identity)))
}

/// POST /admin/identities/{id}/verification/reset - demote verification flags
async fn reset_verification(
    State(state): State<ApiState>,
    Path(id): Path<IdentityId>,
    Json(request): Json<ResetVerificationRequest>,
) -> Result<Json<IdentityView>, CivicError> {
    if !request.email && !request.phone {
        return Err(CivicError::validation("nothing to reset"));
    }
    let identity = state
        .resolver
        .reset_verification(id, request.email, request.phone)
        .await?;
    Ok(Json(IdentityView::from(&identity)))
}

/// DELETE /admin/identities/{id}/roles/{role}
async fn revoke_role(
    State(state): State<ApiState>,
    Path((id, role)): Path<(IdentityId, String)>,
) -> Result<Json<IdentityView>, CivicError> {
    let role: Role = role.parse()?;
    let identity = state.resolver.revoke_role(id, role).await?;
    Ok(Json(IdentityView::from(&identity)))
}

/// DELETE /admin/identities/{id} - tombstone and erase
async fn erase_identity(
    State(state): State<ApiState>,
    Path(id): Path<IdentityId>,
) -> Result<Json<ErasureReport>, CivicError> {
    Ok(Json(state.resolver.erase_identity(id).await?))
}

/// PUT /admin/clerks/{name} - register or replace a clerk
async fn put_clerk(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(request): Json<ClerkRequest>,
) -> Result<Json<Clerk>, CivicError> {
    let name = name.trim();
    if name.is_empty() || name.len() > MAX_CLERK_NAME_LEN {
        return Err(CivicError::validation(format!(
            "clerk name must be 1..={} characters",
            MAX_CLERK_NAME_LEN
        )));
    }

    let clerk = Clerk::new(name, request.capabilities);
    state.db.clerks().upsert(&clerk).await?;
    info!(clerk = %clerk.name, capabilities = clerk.capabilities.len(), "Clerk registered");
    Ok(Json(clerk))
}

/// DELETE /admin/clerks/{name}
async fn delete_clerk(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<StatusCode, CivicError> {
    if state.db.clerks().remove(&name).await? {
        info!(clerk = %name, "Clerk removed");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(CivicError::not_found(format!("clerk '{}'", name)))
    }
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/identities/{id}", get(get_identity).delete(erase_identity))
        .route("/identities/{id}/bind", post(bind_session))
        .route("/identities/{id}/phone", post(confirm_phone))
        .route("/identities/{id}/consent", post(parental_consent))
        .route("/identities/{id}/age", post(age_bracket))
        .route("/identities/{id}/verification/reset", post(reset_verification))
        .route("/identities/{id}/roles/{role}", delete(revoke_role))
        .route("/clerks/{name}", put(put_clerk).delete(delete_clerk))
        .with_state(state.clone())
        .merge(super::moderation::create_admin_router(state))
}
