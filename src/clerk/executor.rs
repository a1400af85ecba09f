//! Capability-gated executor for clerk action lists.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::{Clerk, ClerkActionType};
use crate::database::DatabasePool;
use crate::error::{CivicError, Result};
use crate::identity::{Actor, IdentityId, IdentityResolver};
use crate::ledger::{ActionLedger, ActionType, LedgerContext};
use crate::moderation::ModerationWorkflows;
use crate::notify::{Email, Notifier};
use crate::trust;

/// One requested action as sent by the clerk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClerkAction {
    pub action: String,
    #[serde(default)]
    pub params: Value,
}

impl ClerkAction {
    pub fn new(action: impl Into<String>, params: Value) -> Self {
        Self { action: action.into(), params }
    }
}

/// Per-action result; failures are reported here and nowhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    fn ok(action: String, result: Value) -> Self {
        Self { action, success: true, result: Some(result), error: None }
    }

    fn failed(action: String, error: String) -> Self {
        Self { action, success: false, result: None, error: Some(error) }
    }
}

#[derive(Debug, Deserialize)]
struct AwardParams {
    identity_id: IdentityId,
    reason: String,
    #[serde(default)]
    points: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct EmailParams {
    identity_id: IdentityId,
    subject: String,
    body: String,
}

#[derive(Debug, Deserialize)]
struct RequestParams {
    request_id: i64,
}

#[derive(Debug, Deserialize)]
struct LookupParams {
    identity_id: IdentityId,
}

#[derive(Clone)]
pub struct ClerkExecutor {
    db: Arc<DatabasePool>,
    resolver: IdentityResolver,
    ledger: ActionLedger,
    workflows: ModerationWorkflows,
    notifier: Arc<dyn Notifier>,
}

impl ClerkExecutor {
    pub fn new(
        db: Arc<DatabasePool>,
        resolver: IdentityResolver,
        ledger: ActionLedger,
        workflows: ModerationWorkflows,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { db, resolver, ledger, workflows, notifier }
    }

    /// Look up a registered clerk and run its actions.
    pub async fn execute_as(&self, clerk_name: &str, actions: &[ClerkAction]) -> Result<Vec<ActionOutcome>> {
        let clerk = self
            .db
            .clerks()
            .find(clerk_name)
            .await?
            .ok_or_else(|| CivicError::not_found(format!("clerk '{}'", clerk_name)))?;
        Ok(self.execute(&clerk, actions).await)
    }

    /// Run each action in order. No retries; earlier actions are never
    /// undone when a later one fails.
    pub async fn execute(&self, clerk: &Clerk, actions: &[ClerkAction]) -> Vec<ActionOutcome> {
        let mut outcomes = Vec::with_capacity(actions.len());

        for requested in actions {
            let action_type = match requested.action.parse::<ClerkActionType>() {
                Ok(t) => t,
                Err(e) => {
                    outcomes.push(ActionOutcome::failed(requested.action.clone(), e.to_string()));
                    continue;
                }
            };
            let name = action_type.name().to_string();

            if let Err(denied) = clerk.authorize(action_type) {
                warn!(clerk = %clerk.name, action = %action_type, "Clerk action denied");
                outcomes.push(ActionOutcome::failed(name, denied.to_string()));
                continue;
            }

            match self.run(action_type, &requested.params).await {
                Ok(result) => {
                    info!(clerk = %clerk.name, action = %action_type, "Clerk action executed");
                    outcomes.push(ActionOutcome::ok(name, result));
                }
                Err(e) => {
                    warn!(clerk = %clerk.name, action = %action_type, error = %e, "Clerk action failed");
                    outcomes.push(ActionOutcome::failed(name, e.to_string()));
                }
            }
        }

        outcomes
    }

    async fn run(&self, action: ClerkActionType, params: &Value) -> Result<Value> {
        match action {
            ClerkActionType::AwardPoints => {
                let p: AwardParams = parse_params(params)?;
                let points = p.points.unwrap_or_else(|| self.ledger.catalog().clerk_award);
                let outcome = self
                    .ledger
                    .record(
                        &Actor::Identity(p.identity_id),
                        ActionType::ClerkAward,
                        &LedgerContext::Award { reason: p.reason },
                        points,
                    )
                    .await?;
                Ok(json!(outcome))
            }
            ClerkActionType::SendEmail => {
                let p: EmailParams = parse_params(params)?;
                let identity = self.resolver.identity(p.identity_id).await?;
                let to = identity
                    .email
                    .filter(|_| identity.email_verified)
                    .ok_or_else(|| CivicError::validation("identity has no verified email"))?;
                self.notifier.send(&Email::new(to, p.subject, p.body)).await?;
                Ok(json!({ "sent": true }))
            }
            ClerkActionType::ApproveVolunteer => {
                let p: RequestParams = parse_params(params)?;
                Ok(json!(self.workflows.approve_volunteer(p.request_id).await?))
            }
            ClerkActionType::RejectVolunteer => {
                let p: RequestParams = parse_params(params)?;
                Ok(json!(self.workflows.reject_volunteer(p.request_id).await?))
            }
            ClerkActionType::ApproveThought => {
                let p: RequestParams = parse_params(params)?;
                Ok(json!(self.workflows.approve_thought(p.request_id).await?))
            }
            ClerkActionType::RejectThought => {
                let p: RequestParams = parse_params(params)?;
                Ok(json!(self.workflows.reject_thought(p.request_id).await?))
            }
            ClerkActionType::LookupCitizen => {
                let p: LookupParams = parse_params(params)?;
                let identity = self.resolver.identity(p.identity_id).await?;
                let total = self.ledger.total_points(&Actor::Identity(identity.id)).await?;
                Ok(json!({
                    "identity_id": identity.id,
                    "trust_level": trust::level_of(&identity),
                    "can_post": trust::can_post(&identity),
                    "roles": identity.roles,
                    "total_points": total,
                }))
            }
        }
    }
}

fn parse_params<T: DeserializeOwned>(params: &Value) -> Result<T> {
    serde_json::from_value(params.clone())
        .map_err(|e| CivicError::validation(format!("invalid params: {}", e)))
}
