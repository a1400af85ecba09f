//! Citizen session and identity endpoints.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::ApiState;
use crate::context::RequestContext;
use crate::database::ProfileDraft;
use crate::error::CivicError;
use crate::identity::{
    Actor, AgeBracket, Identity, IdentityId, MergeOutcome, Resolved, Role, SessionToken,
};
use crate::trust::{self, TrustLevel};

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_token: SessionToken,
    pub trust_level: TrustLevel,
}

/// Identity as shown to its owner and to operators.
#[derive(Debug, Serialize)]
pub struct IdentityView {
    pub id: IdentityId,
    pub email: Option<String>,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub roles: BTreeSet<Role>,
    pub age_bracket: AgeBracket,
    pub parental_consent: bool,
    pub display_name: Option<String>,
    pub postal_code: Option<String>,
    pub trust_level: TrustLevel,
    pub can_post: bool,
}

impl From<&Identity> for IdentityView {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            email: identity.email.clone(),
            email_verified: identity.email_verified,
            phone_verified: identity.phone_verified,
            roles: identity.roles.clone(),
            age_bracket: identity.age_bracket,
            parental_consent: identity.parental_consent,
            display_name: identity.display_name.clone(),
            postal_code: identity.postal_code.clone(),
            trust_level: trust::level_of(identity),
            can_post: trust::can_post(identity),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub trust_level: TrustLevel,
    pub total_points: i64,
    /// Absent for anonymous sessions.
    pub identity: Option<IdentityView>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub email: String,
    /// Session that requested the link, when it is opened on another device.
    #[serde(default)]
    pub supersedes_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyEmailResponse {
    pub identity: IdentityView,
    pub created: bool,
    pub merged_entries: u64,
    pub bonus_awarded: bool,
}

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub saved: bool,
    /// True when stored as a draft on the anonymous session.
    pub draft: bool,
}

/// POST /session - mint an anonymous session
async fn open_session(State(state): State<ApiState>) -> Result<Json<SessionResponse>, CivicError> {
    let session_token = state.resolver.open_session().await?;
    Ok(Json(SessionResponse {
        session_token,
        trust_level: TrustLevel::Anonymous,
    }))
}

/// GET /me - resolve the calling session
async fn me(
    State(state): State<ApiState>,
    ctx: RequestContext,
) -> Result<Json<MeResponse>, CivicError> {
    let resolved = state.resolver.resolve(&ctx.session_token).await?;
    let total_points = state
        .ledger
        .total_points(&Actor::Session(ctx.session_token.clone()))
        .await?;

    Ok(Json(MeResponse {
        trust_level: trust::level_of_resolved(&resolved),
        total_points,
        identity: resolved.identity().map(IdentityView::from),
    }))
}

/// POST /identity/verify-email - complete a verification link
async fn verify_email(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Json(request): Json<VerifyEmailRequest>,
) -> Result<Json<VerifyEmailResponse>, CivicError> {
    let supersedes = request
        .supersedes_token
        .as_deref()
        .map(SessionToken::parse)
        .transpose()?;

    let outcome = state
        .resolver
        .verify_email(&ctx, &request.email, supersedes.as_ref())
        .await?;

    Ok(Json(VerifyEmailResponse {
        identity: IdentityView::from(&outcome.identity),
        created: outcome.created,
        merged_entries: outcome.merged_entries,
        bonus_awarded: !outcome.bonus.duplicate,
    }))
}

/// POST /identity/signup - remember this device without verification
async fn sign_up(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Json(request): Json<SignUpRequest>,
) -> Result<Json<IdentityView>, CivicError> {
    let identity = state
        .resolver
        .sign_up(&ctx, request.display_name.as_deref())
        .await?;
    Ok(Json(IdentityView::from(&identity)))
}

/// POST /identity/profile - save profile fields or a session draft
async fn save_profile(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Json(request): Json<ProfileRequest>,
) -> Result<Json<ProfileResponse>, CivicError> {
    let anonymous = state.resolver.resolve(&ctx.session_token).await?.is_anonymous();
    state
        .resolver
        .save_profile(
            &ctx,
            ProfileDraft {
                display_name: request.display_name,
                postal_code: request.postal_code,
            },
        )
        .await?;

    Ok(Json(ProfileResponse {
        saved: true,
        draft: anonymous,
    }))
}

/// POST /identity/merge - move this session's history onto its identity
async fn merge(
    State(state): State<ApiState>,
    ctx: RequestContext,
) -> Result<Json<MergeOutcome>, CivicError> {
    match state.resolver.resolve(&ctx.session_token).await? {
        Resolved::Identity(identity) => {
            let outcome = state.resolver.merge(&ctx.session_token, identity.id).await?;
            Ok(Json(outcome))
        }
        Resolved::Anonymous(_) => Err(CivicError::conflict(
            "session is not bound to an identity",
        )),
    }
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/session", post(open_session))
        .route("/me", get(me))
        .route("/identity/verify-email", post(verify_email))
        .route("/identity/signup", post(sign_up))
        .route("/identity/profile", post(save_profile))
        .route("/identity/merge", post(merge))
        .with_state(state)
}
