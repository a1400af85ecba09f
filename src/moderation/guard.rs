//! Moderation Guard - atomic check-and-transition with a one-time effect.

use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{ModeratedRequest, ModerationStatus, RequestKind, RequestRef};
use crate::database::{DatabasePool, IdentityRepository, ModerationRepository};
use crate::error::{CivicError, Result};
use crate::identity::Role;

/// Result of a transition attempt. Losing the race is not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    /// This call moved the request; `notified` reports whether the effect succeeded.
    Applied {
        request: ModeratedRequest,
        notified: bool,
    },
    /// Another call got there first; nothing was done.
    AlreadyTransitioned { status: ModerationStatus },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }
}

#[derive(Clone)]
pub struct ModerationGuard {
    db: Arc<DatabasePool>,
}

impl ModerationGuard {
    pub fn new(db: Arc<DatabasePool>) -> Self {
        Self { db }
    }

    /// Move `request` from `from` to `to` and run `effect` once if this call won.
    ///
    /// The status change, the notification flag and (for an accepted volunteer
    /// application) the Volunteer role grant commit together. `effect` runs
    /// after commit; its failure is logged and the transition stands.
    pub async fn try_transition<F, Fut>(
        &self,
        request: RequestRef,
        from: ModerationStatus,
        to: ModerationStatus,
        effect: F,
    ) -> Result<TransitionOutcome>
    where
        F: FnOnce(ModeratedRequest) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if from == to {
            return Err(CivicError::validation(format!(
                "transition {} -> {} is not a change",
                from, to
            )));
        }

        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        let Some(updated) = ModerationRepository::transition_in(&mut tx, request, from, to, now).await? else {
            tx.rollback().await?;
            return match self.db.moderation().find(request).await? {
                Some(current) => {
                    debug!(request = %request, status = %current.status, "Request already transitioned");
                    Ok(TransitionOutcome::AlreadyTransitioned { status: current.status })
                }
                None => Err(CivicError::not_found(format!("{}", request))),
            };
        };

        if request.kind == RequestKind::VolunteerApplication && to == ModerationStatus::Accepted {
            IdentityRepository::grant_role_in(&mut tx, updated.identity_id, Role::Volunteer, now).await?;
        }
        tx.commit().await?;

        info!(request = %request, from = %from, to = %to, "Moderation transition applied");

        let notified = match effect(updated.clone()).await {
            Ok(()) => true,
            Err(e) => {
                error!(request = %request, error = %e, "Moderation effect failed, transition kept");
                false
            }
        };

        Ok(TransitionOutcome::Applied { request: updated, notified })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn setup() -> (Arc<DatabasePool>, IdentityId, i64) {
        let db = Arc::new(DatabasePool::in_memory().await.unwrap());
        let id = IdentityId::new();
        {
            let mut conn = db.pool().acquire().await.unwrap();
            IdentityRepository::insert_verified_or_ignore_in(&mut conn, id, "vol@example.org", Utc::now())
                .await
                .unwrap();
        }
        let app = db
            .moderation()
            .insert_volunteer_application(id, "I like maps", "")
            .await
            .unwrap();
        (db, id, app)
    }

    #[tokio::test]
    async fn test_second_transition_is_already_transitioned() {
        let (db, id, app) = setup().await;
        let guard = ModerationGuard::new(db.clone());
        let effects = AtomicUsize::new(0);

        for _ in 0..2 {
            guard
                .try_transition(
                    RequestRef::volunteer(app),
                    ModerationStatus::Pending,
                    ModerationStatus::Accepted,
                    |_| async {
                        effects.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    },
                )
                .await
                .unwrap();
        }

        assert_eq!(effects.load(Ordering::SeqCst), 1);
        assert!(db.identities().find(id).await.unwrap().unwrap().has_role(Role::Volunteer));
    }

    #[tokio::test]
    async fn test_reject_after_accept_does_nothing() {
        let (db, _, app) = setup().await;
        let guard = ModerationGuard::new(db);

        guard
            .try_transition(RequestRef::volunteer(app), ModerationStatus::Pending, ModerationStatus::Accepted, |_| async { Ok(()) })
            .await
            .unwrap();
        let outcome = guard
            .try_transition(RequestRef::volunteer(app), ModerationStatus::Pending, ModerationStatus::Rejected, |_| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(outcome, TransitionOutcome::AlreadyTransitioned { status: ModerationStatus::Accepted });
    }

    #[tokio::test]
    async fn test_effect_failure_keeps_transition() {
        let (db, _, app) = setup().await;
        let guard = ModerationGuard::new(db.clone());

        let outcome = guard
            .try_transition(RequestRef::volunteer(app), ModerationStatus::Pending, ModerationStatus::Rejected, |_| async {
                Err(CivicError::validation("smtp down"))
            })
            .await
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::Applied { notified: false, .. }));

        let stored = db.moderation().find(RequestRef::volunteer(app)).await.unwrap().unwrap();
        assert_eq!(stored.status, ModerationStatus::Rejected);
        assert!(stored.notification_sent);
    }

    #[tokio::test]
    async fn test_missing_request_is_not_found() {
        let (db, _, _) = setup().await;
        let guard = ModerationGuard::new(db);
        let result = guard
            .try_transition(RequestRef::thought(999), ModerationStatus::Pending, ModerationStatus::Accepted, |_| async { Ok(()) })
            .await;
        assert!(matches!(result, Err(CivicError::NotFound(_))));
    }
}
