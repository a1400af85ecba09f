//! Action Ledger - records point-earning actions and aggregates totals.

use futures::stream::BoxStream;
use std::sync::Arc;
use tracing::debug;

use super::{ActionType, LedgerContext, LedgerEntry, PointsCatalog, RecordOutcome};
use crate::database::{DatabasePool, NewEntry};
use crate::error::{CivicError, Result};
use crate::identity::{Actor, AnchoredActor, IdentityResolver};

#[derive(Clone)]
pub struct ActionLedger {
    db: Arc<DatabasePool>,
    resolver: IdentityResolver,
    catalog: PointsCatalog,
}

impl ActionLedger {
    pub fn new(db: Arc<DatabasePool>, resolver: IdentityResolver, catalog: PointsCatalog) -> Self {
        Self { db, resolver, catalog }
    }

    pub fn catalog(&self) -> &PointsCatalog {
        &self.catalog
    }

    /// Record one action. A repeated one-time action returns the existing
    /// entry with `duplicate = true` and changes nothing.
    pub async fn record(
        &self,
        actor: &Actor,
        action: ActionType,
        context: &LedgerContext,
        points: i64,
    ) -> Result<RecordOutcome> {
        if points < 0 {
            return Err(CivicError::validation("points must be non-negative"));
        }
        context.validate_for(action)?;

        let anchored = self.resolver.normalize_actor(actor).await?;
        let outcome = self
            .db
            .ledger()
            .insert(&NewEntry {
                session_fingerprint: anchored.session_fingerprint(),
                identity_id: anchored.identity_id(),
                action_type: action,
                context,
                points,
                dedup_actor: action.is_idempotent_once().then(|| anchored.dedup_scope()),
            })
            .await?;

        if outcome.duplicate {
            debug!(action = %action, entry_id = outcome.entry_id, "Action already recorded");
        }
        Ok(outcome)
    }

    /// [`Self::record`] with the catalog's points for the action type.
    pub async fn record_default(
        &self,
        actor: &Actor,
        action: ActionType,
        context: &LedgerContext,
    ) -> Result<RecordOutcome> {
        self.record(actor, action, context, self.catalog.points_for(action))
            .await
    }

    pub async fn total_points(&self, actor: &Actor) -> Result<i64> {
        match self.resolver.normalize_actor(actor).await? {
            AnchoredActor::Identity { id, .. } => self.db.ledger().identity_total(id).await,
            AnchoredActor::Session { fingerprint } => self.db.ledger().session_total(&fingerprint).await,
        }
    }

    /// Entries newest first. The stream is lazy, finite and reads a fresh
    /// snapshot on every call; its items sum to [`Self::total_points`].
    pub async fn history(
        &self,
        actor: &Actor,
        filter: Option<ActionType>,
    ) -> Result<BoxStream<'_, Result<LedgerEntry>>> {
        Ok(match self.resolver.normalize_actor(actor).await? {
            AnchoredActor::Identity { id, .. } => self.db.ledger().identity_history(id, filter),
            AnchoredActor::Session { fingerprint } => {
                self.db.ledger().session_history(fingerprint, filter)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SessionToken;
    use futures::TryStreamExt;

    async fn ledger() -> ActionLedger {
        let db = Arc::new(DatabasePool::in_memory().await.unwrap());
        let resolver = IdentityResolver::new(db.clone(), PointsCatalog::default());
        ActionLedger::new(db, resolver, PointsCatalog::default())
    }

    #[tokio::test]
    async fn test_negative_points_rejected_before_write() {
        let ledger = ledger().await;
        let actor = Actor::Session(SessionToken::generate());
        let err = ledger
            .record(&actor, ActionType::PageVisit, &LedgerContext::page("home"), -1)
            .await
            .unwrap_err();
        assert!(matches!(err, CivicError::Validation(_)));
        assert_eq!(ledger.total_points(&actor).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_identity_actor_is_not_found() {
        let ledger = ledger().await;
        let actor = Actor::Identity(crate::identity::IdentityId::new());
        assert!(matches!(
            ledger.total_points(&actor).await,
            Err(CivicError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_history_filter() {
        let ledger = ledger().await;
        let actor = Actor::Session(SessionToken::generate());
        ledger
            .record_default(&actor, ActionType::PageVisit, &LedgerContext::page("home"))
            .await
            .unwrap();
        ledger
            .record_default(
                &actor,
                ActionType::OnboardingStep,
                &LedgerContext::Onboarding { step: "postal_code".into() },
            )
            .await
            .unwrap();

        let all: Vec<LedgerEntry> = ledger.history(&actor, None).await.unwrap().try_collect().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].action_type, ActionType::OnboardingStep);

        let visits: Vec<LedgerEntry> = ledger
            .history(&actor, Some(ActionType::PageVisit))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(visits.len(), 1);
        assert_eq!(ledger.total_points(&actor).await.unwrap(), 6);
    }
}
