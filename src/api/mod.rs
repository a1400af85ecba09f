//! HTTP API for the civic ledger
//!
//! Provides REST APIs for:
//! - Citizen sessions, verification and profile drafts
//! - Ledger actions, totals and history
//! - Volunteer applications and thought submissions
//! - Operator moderation and identity administration
//! - Clerk action execution
//! - Security middleware (auth, rate limiting, headers)

pub mod admin;
pub mod citizen;
pub mod clerk;
mod error;
pub mod ledger;
pub mod middleware;
pub mod moderation;
mod session;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    middleware as mw,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::clerk::ClerkExecutor;
use crate::database::DatabasePool;
use crate::identity::IdentityResolver;
use crate::ledger::{ActionLedger, PointsCatalog};
use crate::moderation::ModerationWorkflows;
use crate::notify::Notifier;

pub use middleware::{
    auth_middleware, body_size_middleware, logging_middleware, method_validation_middleware,
    rate_limit_middleware, security_headers_middleware, RateLimiter, SecurityMiddlewareConfig,
    SecurityState,
};
pub use session::SESSION_HEADER;

/// Shared state for every route.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<DatabasePool>,
    pub resolver: IdentityResolver,
    pub ledger: ActionLedger,
    pub workflows: ModerationWorkflows,
    pub clerks: ClerkExecutor,
}

impl ApiState {
    /// Wire the components over one store and one notifier.
    pub fn new(db: Arc<DatabasePool>, notifier: Arc<dyn Notifier>, catalog: PointsCatalog) -> Self {
        let resolver = IdentityResolver::new(db.clone(), catalog.clone());
        let ledger = ActionLedger::new(db.clone(), resolver.clone(), catalog);
        let workflows =
            ModerationWorkflows::new(db.clone(), resolver.clone(), ledger.clone(), notifier.clone());
        let clerks = ClerkExecutor::new(
            db.clone(),
            resolver.clone(),
            ledger.clone(),
            workflows.clone(),
            notifier,
        );

        Self {
            db,
            resolver,
            ledger,
            workflows,
            clerks,
        }
    }
}

/// GET /health - store reachability
async fn health(State(state): State<ApiState>) -> (StatusCode, &'static str) {
    match state.db.health_check().await {
        Ok(()) => (StatusCode::OK, "OK"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "store unavailable"),
    }
}

/// Full application router with security middleware applied.
pub fn build_router(state: ApiState, security: SecurityState) -> Router {
    let max_body = security.config.max_request_size;

    Router::new()
        .merge(citizen::create_router(state.clone()))
        .merge(ledger::create_router(state.clone()))
        .merge(moderation::create_router(state.clone()))
        .nest("/admin", admin::create_router(state.clone()))
        .nest("/clerk", clerk::create_router(state.clone()))
        .route("/health", get(health).with_state(state))
        // Outermost last
        .layer(DefaultBodyLimit::max(max_body))
        .layer(mw::from_fn_with_state(security.clone(), body_size_middleware))
        .layer(mw::from_fn_with_state(security.clone(), auth_middleware))
        .layer(mw::from_fn(method_validation_middleware))
        .layer(mw::from_fn_with_state(security.clone(), rate_limit_middleware))
        .layer(mw::from_fn_with_state(security, logging_middleware))
        .layer(mw::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
}
