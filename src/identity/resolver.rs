//! Identity Resolver
//!
//! Owns every write to identities and device bindings. Multi-step changes
//! (bind, merge, verification) run in one transaction whose first statement
//! is a write, so SQLite serializes them instead of failing a lock upgrade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnection;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    normalize_email, Actor, AgeBracket, AnchoredActor, DeviceBinding, Identity, IdentityId,
    Resolved, Role, SessionToken,
};
use crate::context::RequestContext;
use crate::database::{
    BindingRepository, DatabasePool, IdentityRepository, LedgerRepository, ModerationRepository,
    NewEntry, ProfileDraft,
};
use crate::error::{CivicError, Result};
use crate::ledger::{ActionType, LedgerContext, PointsCatalog, RecordOutcome};

const MAX_DISPLAY_NAME_LEN: usize = 80;
const MAX_POSTAL_CODE_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindMode {
    /// Fail when the token is actively bound to another identity.
    #[default]
    Default,
    /// "This device now belongs to account X."
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BindOutcome {
    pub identity_id: IdentityId,
    /// Identity the token pointed at before a forced rebind.
    pub rebound_from: Option<IdentityId>,
    pub already_bound: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MergeOutcome {
    /// Entries moved from the session onto the identity.
    pub reanchored: u64,
    /// One-time entries discarded because the identity already held them.
    pub dropped: u64,
    pub profile_applied: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationOutcome {
    pub identity: Identity,
    /// False when the email already belonged to an identity.
    pub created: bool,
    pub merged_entries: u64,
    pub bonus: RecordOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ErasureReport {
    pub ledger_entries: u64,
    pub bindings: u64,
    pub requests: u64,
}

#[derive(Clone)]
pub struct IdentityResolver {
    db: Arc<DatabasePool>,
    catalog: PointsCatalog,
}

impl IdentityResolver {
    pub fn new(db: Arc<DatabasePool>, catalog: PointsCatalog) -> Self {
        Self { db, catalog }
    }

    /// Mint a token and register it as an anonymous session.
    pub async fn open_session(&self) -> Result<SessionToken> {
        let token = SessionToken::generate();
        self.db.bindings().touch(&token.fingerprint()).await?;
        debug!("Anonymous session opened");
        Ok(token)
    }

    pub async fn resolve(&self, token: &SessionToken) -> Result<Resolved> {
        let binding = self.db.bindings().touch(&token.fingerprint()).await?;

        if let (Some(id), true) = (binding.identity_id, binding.is_active) {
            if let Some(identity) = self.db.identities().find(id).await? {
                return Ok(Resolved::Identity(identity));
            }
        }
        Ok(Resolved::Anonymous(token.clone()))
    }

    /// Map a caller-supplied actor to the anchor its ledger entries use.
    pub async fn normalize_actor(&self, actor: &Actor) -> Result<AnchoredActor> {
        match actor {
            Actor::Session(token) => match self.resolve(token).await? {
                Resolved::Identity(identity) => Ok(AnchoredActor::Identity {
                    id: identity.id,
                    via_fingerprint: Some(token.fingerprint()),
                }),
                Resolved::Anonymous(_) => Ok(AnchoredActor::Session {
                    fingerprint: token.fingerprint(),
                }),
            },
            Actor::Identity(id) => {
                self.identity(*id).await?;
                Ok(AnchoredActor::Identity { id: *id, via_fingerprint: None })
            }
        }
    }

    /// Live identity or NotFound.
    pub async fn identity(&self, id: IdentityId) -> Result<Identity> {
        self.db
            .identities()
            .find(id)
            .await?
            .ok_or_else(|| CivicError::not_found(format!("identity {}", id)))
    }

    pub async fn bindings_of(&self, id: IdentityId) -> Result<Vec<DeviceBinding>> {
        self.db.bindings().for_identity(id).await
    }

    pub async fn bind(
        &self,
        token: &SessionToken,
        identity_id: IdentityId,
        mode: BindMode,
    ) -> Result<BindOutcome> {
        let fp = token.fingerprint();
        let now = Utc::now();

        let mut tx = self.db.pool().begin().await?;
        BindingRepository::touch_in(&mut tx, &fp, now).await?;
        let outcome = Self::bind_in(&mut tx, &fp, identity_id, mode, now).await?;
        tx.commit().await?;

        if let Some(previous) = outcome.rebound_from {
            warn!(from = %previous, to = %identity_id, "Device rebound to a different identity");
        }
        Ok(outcome)
    }

    /// Move the session's anonymous history onto the identity it is bound to.
    pub async fn merge(&self, token: &SessionToken, identity_id: IdentityId) -> Result<MergeOutcome> {
        let fp = token.fingerprint();
        let now = Utc::now();

        let mut tx = self.db.pool().begin().await?;
        BindingRepository::touch_in(&mut tx, &fp, now).await?;
        let outcome = Self::merge_in(&mut tx, &fp, identity_id, now).await?;
        tx.commit().await?;

        debug!(
            identity_id = %identity_id,
            reanchored = outcome.reanchored,
            dropped = outcome.dropped,
            "Session merged"
        );
        Ok(outcome)
    }

    /// Complete an email verification for the request's session.
    ///
    /// `supersedes` is the session that asked for the verification link when
    /// the link is opened on a different device.
    pub async fn verify_email(
        &self,
        ctx: &RequestContext,
        email: &str,
        supersedes: Option<&SessionToken>,
    ) -> Result<VerificationOutcome> {
        let email = normalize_email(email)?;
        let fp = ctx.session_fingerprint();
        let now = Utc::now();

        let mut tx = self.db.pool().begin().await?;
        BindingRepository::touch_in(&mut tx, &fp, now).await?;

        let (target, created) = match Self::live_bound_identity_in(&mut tx, &fp).await? {
            Some(identity) => {
                match identity.email.as_deref() {
                    Some(owned) if owned == email => {
                        if !identity.email_verified {
                            IdentityRepository::set_verified_email_in(&mut tx, identity.id, &email, now)
                                .await?;
                        }
                    }
                    Some(_) => {
                        return Err(CivicError::conflict(
                            "session is bound to an identity with a different email",
                        ))
                    }
                    None => {
                        IdentityRepository::set_verified_email_in(&mut tx, identity.id, &email, now)
                            .await
                            .map_err(|e| {
                                if e.is_unique_violation() {
                                    CivicError::conflict("email belongs to another identity")
                                } else {
                                    e
                                }
                            })?;
                    }
                }
                (identity.id, false)
            }
            None => {
                let candidate = IdentityId::new();
                let created =
                    IdentityRepository::insert_verified_or_ignore_in(&mut tx, candidate, &email, now)
                        .await?;
                let owner = IdentityRepository::find_by_email_in(&mut tx, &email)
                    .await?
                    .ok_or_else(|| {
                        CivicError::Corrupt("verified email has no owning identity".to_string())
                    })?;
                if !owner.email_verified {
                    IdentityRepository::set_verified_email_in(&mut tx, owner.id, &email, now).await?;
                }
                if !created {
                    debug!(identity_id = %owner.id, "Email already owned, binding to existing identity");
                }
                (owner.id, created)
            }
        };

        Self::bind_in(&mut tx, &fp, target, BindMode::Default, now).await?;
        let mut merged_entries = Self::merge_in(&mut tx, &fp, target, now).await?.reanchored;

        if let Some(old) = supersedes.filter(|old| old.fingerprint() != fp) {
            let old_fp = old.fingerprint();
            let previous = BindingRepository::find_in(&mut tx, &old_fp)
                .await?
                .and_then(|b| b.identity_id);
            match previous {
                Some(other) if other != target => {
                    warn!(identity_id = %target, other = %other, "Superseded session belongs to another identity, left untouched");
                }
                _ => {
                    Self::bind_in(&mut tx, &old_fp, target, BindMode::Default, now).await?;
                    merged_entries += Self::merge_in(&mut tx, &old_fp, target, now).await?.reanchored;
                    BindingRepository::deactivate_in(&mut tx, &old_fp).await?;
                }
            }
        }

        tx.commit().await?;

        let bonus = self
            .award_bonus(target, Some(&fp), ActionType::EmailVerified)
            .await?;
        let identity = self.identity(target).await?;

        info!(identity_id = %target, created, merged_entries, "Email verified");
        Ok(VerificationOutcome { identity, created, merged_entries, bonus })
    }

    /// Explicit signup without verification ("remember this device").
    ///
    /// Returns the already bound identity when there is one.
    pub async fn sign_up(&self, ctx: &RequestContext, display_name: Option<&str>) -> Result<Identity> {
        let display_name = display_name.map(str::trim).filter(|n| !n.is_empty());
        if let Some(name) = display_name {
            check_len("display_name", name, MAX_DISPLAY_NAME_LEN)?;
        }
        let fp = ctx.session_fingerprint();
        let now = Utc::now();

        let mut tx = self.db.pool().begin().await?;
        BindingRepository::touch_in(&mut tx, &fp, now).await?;

        if let Some(identity) = Self::live_bound_identity_in(&mut tx, &fp).await? {
            tx.commit().await?;
            return Ok(identity);
        }

        let id = IdentityId::new();
        IdentityRepository::insert_unverified_in(&mut tx, id, display_name, now).await?;
        Self::bind_in(&mut tx, &fp, id, BindMode::Default, now).await?;
        Self::merge_in(&mut tx, &fp, id, now).await?;
        tx.commit().await?;

        info!(identity_id = %id, "Identity signed up");
        self.identity(id).await
    }

    /// Store profile fields: on the identity when bound, as a draft otherwise.
    pub async fn save_profile(&self, ctx: &RequestContext, draft: ProfileDraft) -> Result<()> {
        let draft = ProfileDraft {
            display_name: draft.display_name.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            postal_code: draft.postal_code.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        };
        if let Some(name) = &draft.display_name {
            check_len("display_name", name, MAX_DISPLAY_NAME_LEN)?;
        }
        if let Some(code) = &draft.postal_code {
            check_len("postal_code", code, MAX_POSTAL_CODE_LEN)?;
        }

        match self.resolve(&ctx.session_token).await? {
            Resolved::Identity(identity) => {
                self.db
                    .identities()
                    .update_profile(
                        identity.id,
                        draft.display_name.as_deref(),
                        draft.postal_code.as_deref(),
                    )
                    .await?;
            }
            Resolved::Anonymous(token) => {
                self.db.bindings().save_draft(&token.fingerprint(), &draft).await?;
            }
        }
        Ok(())
    }

    pub async fn confirm_phone(&self, id: IdentityId, phone: &str) -> Result<Identity> {
        let phone = normalize_phone(phone)?;
        if !self.db.identities().confirm_phone(id, &phone).await? {
            return Err(CivicError::not_found(format!("identity {}", id)));
        }
        self.award_bonus(id, None, ActionType::PhoneVerified).await?;
        info!(identity_id = %id, "Phone verified");
        self.identity(id).await
    }

    pub async fn record_parental_consent(&self, id: IdentityId, consent: bool) -> Result<Identity> {
        if !self.db.identities().set_parental_consent(id, consent).await? {
            return Err(CivicError::not_found(format!("identity {}", id)));
        }
        info!(identity_id = %id, consent, "Parental consent recorded");
        self.identity(id).await
    }

    pub async fn set_age_bracket(&self, id: IdentityId, bracket: AgeBracket) -> Result<Identity> {
        if !self.db.identities().set_age_bracket(id, bracket).await? {
            return Err(CivicError::not_found(format!("identity {}", id)));
        }
        self.identity(id).await
    }

    /// Administrator demotion. Revoking a role that was never granted is a no-op.
    pub async fn revoke_role(&self, id: IdentityId, role: Role) -> Result<Identity> {
        self.identity(id).await?;
        if self.db.identities().revoke_role(id, role).await? {
            info!(identity_id = %id, role = role.as_str(), "Role revoked");
        }
        self.identity(id).await
    }

    /// Administrator demotion of verification flags.
    pub async fn reset_verification(&self, id: IdentityId, email: bool, phone: bool) -> Result<Identity> {
        if !self.db.identities().reset_verification(id, email, phone).await? {
            return Err(CivicError::not_found(format!("identity {}", id)));
        }
        info!(identity_id = %id, email, phone, "Verification reset");
        self.identity(id).await
    }

    /// Tombstone the identity and remove everything hanging off it.
    pub async fn erase_identity(&self, id: IdentityId) -> Result<ErasureReport> {
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        if !IdentityRepository::tombstone_in(&mut tx, id, now).await? {
            return Err(CivicError::not_found(format!("identity {}", id)));
        }
        // Ledger first: its cascade finds unmerged sessions through the bindings.
        let ledger_entries = LedgerRepository::delete_for_identity_in(&mut tx, id).await?;
        let requests = ModerationRepository::delete_for_identity_in(&mut tx, id).await?;
        let bindings = BindingRepository::delete_for_identity_in(&mut tx, id).await?;
        tx.commit().await?;

        let report = ErasureReport { ledger_entries, bindings, requests };
        info!(identity_id = %id, ?report, "Identity erased");
        Ok(report)
    }

    async fn award_bonus(
        &self,
        id: IdentityId,
        via_fingerprint: Option<&str>,
        action: ActionType,
    ) -> Result<RecordOutcome> {
        let anchored = AnchoredActor::Identity { id, via_fingerprint: None };
        self.db
            .ledger()
            .insert(&NewEntry {
                session_fingerprint: via_fingerprint,
                identity_id: Some(id),
                action_type: action,
                context: &LedgerContext::Verification,
                points: self.catalog.points_for(action),
                dedup_actor: Some(anchored.dedup_scope()),
            })
            .await
    }

    async fn live_bound_identity_in(
        conn: &mut SqliteConnection,
        fingerprint: &str,
    ) -> Result<Option<Identity>> {
        match BindingRepository::find_in(conn, fingerprint).await? {
            Some(DeviceBinding { identity_id: Some(id), is_active: true, .. }) => {
                IdentityRepository::find_in(conn, id).await
            }
            _ => Ok(None),
        }
    }

    async fn bind_in(
        conn: &mut SqliteConnection,
        fingerprint: &str,
        identity_id: IdentityId,
        mode: BindMode,
        now: DateTime<Utc>,
    ) -> Result<BindOutcome> {
        if IdentityRepository::find_in(conn, identity_id).await?.is_none() {
            return Err(CivicError::not_found(format!("identity {}", identity_id)));
        }

        let existing = BindingRepository::find_in(conn, fingerprint).await?;
        let active = existing
            .as_ref()
            .filter(|b| b.is_active)
            .and_then(|b| b.identity_id);
        if active.is_some_and(|other| other != identity_id) && mode != BindMode::Force {
            return Err(CivicError::conflict("session is bound to a different identity"));
        }

        BindingRepository::upsert_bound_in(conn, fingerprint, identity_id, now).await?;

        Ok(BindOutcome {
            identity_id,
            rebound_from: existing
                .and_then(|b| b.identity_id)
                .filter(|previous| *previous != identity_id),
            already_bound: active == Some(identity_id),
        })
    }

    async fn merge_in(
        conn: &mut SqliteConnection,
        fingerprint: &str,
        identity_id: IdentityId,
        now: DateTime<Utc>,
    ) -> Result<MergeOutcome> {
        let bound_to = BindingRepository::find_in(conn, fingerprint)
            .await?
            .and_then(|b| b.identity_id);
        if bound_to != Some(identity_id) {
            return Err(CivicError::conflict("session is not bound to this identity"));
        }

        let dropped =
            LedgerRepository::drop_held_session_entries_in(conn, fingerprint, identity_id).await?;
        let reanchored = LedgerRepository::reanchor_session_in(conn, fingerprint, identity_id).await?;

        // Binding wins: drafts only fill fields the identity left empty.
        let profile_applied = match BindingRepository::take_draft_in(conn, fingerprint).await? {
            Some(draft) => {
                IdentityRepository::fill_profile_gaps_in(
                    conn,
                    identity_id,
                    draft.display_name.as_deref(),
                    draft.postal_code.as_deref(),
                    now,
                )
                .await?;
                true
            }
            None => false,
        };

        BindingRepository::mark_merged_in(conn, fingerprint, now).await?;

        Ok(MergeOutcome { reanchored, dropped, profile_applied })
    }
}

fn check_len(field: &str, value: &str, max: usize) -> Result<()> {
    if value.chars().count() > max {
        return Err(CivicError::validation(format!("{} exceeds {} characters", field, max)));
    }
    Ok(())
}

/// Keep digits and a leading plus; reject anything that is not a phone number.
fn normalize_phone(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    for (i, c) in trimmed.chars().enumerate() {
        match c {
            '0'..='9' => out.push(c),
            '+' if i == 0 => out.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return Err(CivicError::validation(format!("invalid phone number: {}", raw))),
        }
    }
    let digits = out.trim_start_matches('+').len();
    if !(6..=15).contains(&digits) {
        return Err(CivicError::validation(format!("invalid phone number: {}", raw)));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn resolver() -> IdentityResolver {
        let db = Arc::new(DatabasePool::in_memory().await.unwrap());
        IdentityResolver::new(db, PointsCatalog::default())
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+33 6 12-34-56-78").unwrap(), "+33612345678");
        assert!(normalize_phone("call me").is_err());
        assert!(normalize_phone("123").is_err());
        assert!(normalize_phone("12+345678").is_err());
    }

    #[tokio::test]
    async fn test_fresh_session_resolves_anonymous() {
        let resolver = resolver().await;
        let token = resolver.open_session().await.unwrap();
        assert!(resolver.resolve(&token).await.unwrap().is_anonymous());
    }

    #[tokio::test]
    async fn test_bind_conflict_and_force() {
        let resolver = resolver().await;
        let a = resolver.sign_up(&RequestContext::new(SessionToken::generate()), None).await.unwrap();
        let b = resolver.sign_up(&RequestContext::new(SessionToken::generate()), None).await.unwrap();
        let token = SessionToken::generate();

        let first = resolver.bind(&token, a.id, BindMode::Default).await.unwrap();
        assert!(!first.already_bound);
        let again = resolver.bind(&token, a.id, BindMode::Default).await.unwrap();
        assert!(again.already_bound);

        let err = resolver.bind(&token, b.id, BindMode::Default).await.unwrap_err();
        assert!(matches!(err, CivicError::Conflict(_)));
        assert_eq!(resolver.resolve(&token).await.unwrap().identity_id(), Some(a.id));

        let forced = resolver.bind(&token, b.id, BindMode::Force).await.unwrap();
        assert_eq!(forced.rebound_from, Some(a.id));
        assert_eq!(resolver.resolve(&token).await.unwrap().identity_id(), Some(b.id));
    }

    #[tokio::test]
    async fn test_bind_unknown_identity_is_not_found() {
        let resolver = resolver().await;
        let err = resolver
            .bind(&SessionToken::generate(), IdentityId::new(), BindMode::Default)
            .await
            .unwrap_err();
        assert!(matches!(err, CivicError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_merge_requires_binding() {
        let resolver = resolver().await;
        let owner = resolver.sign_up(&RequestContext::new(SessionToken::generate()), None).await.unwrap();
        let err = resolver.merge(&SessionToken::generate(), owner.id).await.unwrap_err();
        assert!(matches!(err, CivicError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_draft_fills_only_empty_fields() {
        let resolver = resolver().await;
        let ctx = RequestContext::new(SessionToken::generate());
        resolver
            .save_profile(&ctx, ProfileDraft { display_name: Some("Anon".into()), postal_code: Some("69001".into()) })
            .await
            .unwrap();

        let identity = resolver.sign_up(&ctx, Some("Ada")).await.unwrap();
        assert_eq!(identity.display_name.as_deref(), Some("Ada"));
        assert_eq!(identity.postal_code.as_deref(), Some("69001"));
    }

    #[tokio::test]
    async fn test_verify_email_conflicts_for_other_email() {
        let resolver = resolver().await;
        let ctx = RequestContext::new(SessionToken::generate());
        resolver.verify_email(&ctx, "ada@example.org", None).await.unwrap();

        let err = resolver.verify_email(&ctx, "grace@example.org", None).await.unwrap_err();
        assert!(matches!(err, CivicError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_signed_up_identity_claims_email_owned_elsewhere_conflicts() {
        let resolver = resolver().await;
        resolver
            .verify_email(&RequestContext::new(SessionToken::generate()), "ada@example.org", None)
            .await
            .unwrap();

        let ctx = RequestContext::new(SessionToken::generate());
        resolver.sign_up(&ctx, None).await.unwrap();
        let err = resolver.verify_email(&ctx, "ADA@example.org", None).await.unwrap_err();
        assert!(matches!(err, CivicError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_erase_identity() {
        let resolver = resolver().await;
        let ctx = RequestContext::new(SessionToken::generate());
        let outcome = resolver.verify_email(&ctx, "erase@example.org", None).await.unwrap();
        let id = outcome.identity.id;

        let report = resolver.erase_identity(id).await.unwrap();
        assert_eq!(report.ledger_entries, 1);
        assert_eq!(report.bindings, 1);
        assert!(resolver.resolve(&ctx.session_token).await.unwrap().is_anonymous());
        assert!(matches!(resolver.erase_identity(id).await, Err(CivicError::NotFound(_))));

        // The email is free again.
        let again = resolver
            .verify_email(&RequestContext::new(SessionToken::generate()), "erase@example.org", None)
            .await
            .unwrap();
        assert!(again.created);
        assert_ne!(again.identity.id, id);
    }
}
