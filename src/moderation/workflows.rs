//! Volunteer application and thought workflows.
//!
//! Submissions are gated on posting rights. Every decision goes through the
//! guard, so a double click or a retried request never sends a second email.

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::{ModeratedRequest, ModerationGuard, ModerationStatus, RequestKind, RequestRef, TransitionOutcome};
use crate::context::RequestContext;
use crate::database::{DatabasePool, LedgerRepository, ModerationRepository, NewEntry};
use crate::error::{CivicError, Result};
use crate::identity::{Identity, IdentityResolver, Resolved};
use crate::ledger::{ActionLedger, ActionType, LedgerContext, RecordOutcome};
use crate::notify::{Email, Notifier};
use crate::trust;

const MAX_MOTIVATION_LEN: usize = 2000;
const MAX_THOUGHT_LEN: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThoughtSubmission {
    pub thought_id: i64,
    pub entry: RecordOutcome,
}

#[derive(Clone)]
pub struct ModerationWorkflows {
    db: Arc<DatabasePool>,
    guard: ModerationGuard,
    resolver: IdentityResolver,
    ledger: ActionLedger,
    notifier: Arc<dyn Notifier>,
}

impl ModerationWorkflows {
    pub fn new(
        db: Arc<DatabasePool>,
        resolver: IdentityResolver,
        ledger: ActionLedger,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            guard: ModerationGuard::new(db.clone()),
            db,
            resolver,
            ledger,
            notifier,
        }
    }

    pub fn guard(&self) -> &ModerationGuard {
        &self.guard
    }

    pub async fn submit_volunteer_application(
        &self,
        ctx: &RequestContext,
        motivation: &str,
        skills: &str,
    ) -> Result<i64> {
        let identity = self.poster(ctx).await?;
        let motivation = required_text("motivation", motivation, MAX_MOTIVATION_LEN)?;
        let skills = skills.trim();
        if skills.chars().count() > MAX_MOTIVATION_LEN {
            return Err(CivicError::validation("skills text is too long"));
        }

        let id = self
            .db
            .moderation()
            .insert_volunteer_application(identity.id, motivation, skills)
            .await?;
        info!(application_id = id, identity_id = %identity.id, "Volunteer application submitted");
        Ok(id)
    }

    /// Store a thought for moderation and record the submission in the ledger.
    ///
    /// Both rows are written in one transaction.
    pub async fn submit_thought(&self, ctx: &RequestContext, body: &str) -> Result<ThoughtSubmission> {
        let identity = self.poster(ctx).await?;
        let body = required_text("body", body, MAX_THOUGHT_LEN)?;
        let fp = ctx.session_fingerprint();

        let mut tx = self.db.pool().begin().await?;
        let thought_id = ModerationRepository::insert_thought_in(&mut tx, identity.id, body).await?;
        let context = LedgerContext::Thought { thought_id };
        let entry = LedgerRepository::insert_in(
            &mut tx,
            &NewEntry {
                session_fingerprint: Some(&fp),
                identity_id: Some(identity.id),
                action_type: ActionType::ThoughtSubmitted,
                context: &context,
                points: self.ledger.catalog().points_for(ActionType::ThoughtSubmitted),
                dedup_actor: None,
            },
        )
        .await?;
        tx.commit().await?;

        info!(thought_id, identity_id = %identity.id, "Thought submitted");
        Ok(ThoughtSubmission { thought_id, entry })
    }

    pub async fn pending(&self, kind: RequestKind, limit: i64) -> Result<Vec<ModeratedRequest>> {
        self.db.moderation().pending(kind, limit.clamp(1, 500)).await
    }

    pub async fn approve_volunteer(&self, id: i64) -> Result<TransitionOutcome> {
        self.decide(
            RequestRef::volunteer(id),
            ModerationStatus::Accepted,
            "Your volunteer application was accepted",
            "Welcome aboard! Your volunteer application has been accepted.",
        )
        .await
    }

    pub async fn reject_volunteer(&self, id: i64) -> Result<TransitionOutcome> {
        self.decide(
            RequestRef::volunteer(id),
            ModerationStatus::Rejected,
            "Your volunteer application",
            "Thank you for applying. We are unable to accept your application at this time.",
        )
        .await
    }

    pub async fn approve_thought(&self, id: i64) -> Result<TransitionOutcome> {
        self.decide(
            RequestRef::thought(id),
            ModerationStatus::Accepted,
            "Your thought is published",
            "Your thought passed moderation and is now visible to everyone.",
        )
        .await
    }

    pub async fn reject_thought(&self, id: i64) -> Result<TransitionOutcome> {
        self.decide(
            RequestRef::thought(id),
            ModerationStatus::Rejected,
            "Your thought was not published",
            "Your thought did not pass moderation.",
        )
        .await
    }

    async fn decide(
        &self,
        request: RequestRef,
        to: ModerationStatus,
        subject: &str,
        body: &str,
    ) -> Result<TransitionOutcome> {
        let db = &self.db;
        let notifier = &self.notifier;

        self.guard
            .try_transition(request, ModerationStatus::Pending, to, |decided| async move {
                let recipient = db
                    .identities()
                    .find(decided.identity_id)
                    .await?
                    .and_then(|identity| identity.email)
                    .ok_or_else(|| CivicError::not_found(format!("email for {}", decided.reference())))?;
                notifier.send(&Email::new(recipient, subject, body)).await?;
                Ok(())
            })
            .await
    }

    /// Identity behind the session, if it may post.
    async fn poster(&self, ctx: &RequestContext) -> Result<Identity> {
        match self.resolver.resolve(&ctx.session_token).await? {
            Resolved::Identity(identity) if trust::can_post(&identity) => Ok(identity),
            Resolved::Identity(identity) => Err(CivicError::forbidden(format!(
                "trust level {} cannot post",
                trust::level_of(&identity)
            ))),
            Resolved::Anonymous(_) => Err(CivicError::forbidden("verify your email first")),
        }
    }
}

fn required_text<'a>(field: &str, value: &'a str, max: usize) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CivicError::validation(format!("{} is required", field)));
    }
    if value.chars().count() > max {
        return Err(CivicError::validation(format!("{} exceeds {} characters", field, max)));
    }
    Ok(value)
}
