//! Ledger Repository - append-only action entries

use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{CivicError, Result};
use crate::identity::IdentityId;
use crate::ledger::{ActionType, EntryId, LedgerContext, LedgerEntry, RecordOutcome};

/// Entries counted for an identity (`?1`, as text).
///
/// Its own entries, plus entries of bound sessions that have not been merged
/// yet. A one-time entry of such a session is skipped when the identity holds
/// the same one in its own right or an older bound session already does.
macro_rules! identity_scope {
    () => {
        r#"
        (e.identity_id = ?1
         OR (e.identity_id IS NULL
             AND e.session_fingerprint IN (
                 SELECT token_fingerprint FROM device_bindings
                 WHERE identity_id = ?1 AND is_active = 1)
             AND NOT (e.dedup_actor IS NOT NULL AND (
                 EXISTS (
                     SELECT 1 FROM ledger_entries x
                     WHERE x.dedup_actor = 'identity:' || ?1
                       AND x.action_type = e.action_type
                       AND x.context_key = e.context_key)
                 OR EXISTS (
                     SELECT 1 FROM ledger_entries y
                     WHERE y.identity_id IS NULL
                       AND y.dedup_actor IS NOT NULL
                       AND y.id < e.id
                       AND y.action_type = e.action_type
                       AND y.context_key = e.context_key
                       AND y.session_fingerprint IN (
                           SELECT token_fingerprint FROM device_bindings
                 WHERE identity_id = ?1 AND is_active = 1))))))
        "#
    };
}

macro_rules! entry_columns {
    () => {
        "SELECT e.id, e.session_fingerprint, e.identity_id, e.action_type, e.context, e.points, e.created_at FROM ledger_entries e WHERE "
    };
}

const IDENTITY_TOTAL: &str = concat!(
    "SELECT COALESCE(SUM(e.points), 0) FROM ledger_entries e WHERE ",
    identity_scope!()
);

const IDENTITY_HISTORY: &str = concat!(
    entry_columns!(),
    identity_scope!(),
    " AND (?2 IS NULL OR e.action_type = ?2) ORDER BY e.id DESC"
);

const SESSION_TOTAL: &str = r#"
    SELECT COALESCE(SUM(e.points), 0) FROM ledger_entries e
    WHERE e.session_fingerprint = ?1 AND e.identity_id IS NULL
"#;

const SESSION_HISTORY: &str = concat!(
    entry_columns!(),
    "e.session_fingerprint = ?1 AND e.identity_id IS NULL",
    " AND (?2 IS NULL OR e.action_type = ?2) ORDER BY e.id DESC"
);

/// Entry to append.
#[derive(Debug, Clone)]
pub struct NewEntry<'a> {
    pub session_fingerprint: Option<&'a str>,
    pub identity_id: Option<IdentityId>,
    pub action_type: ActionType,
    pub context: &'a LedgerContext,
    pub points: i64,
    /// Deduplication scope; `None` for repeatable action types.
    pub dedup_actor: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct EntryRow {
    id: i64,
    session_fingerprint: Option<String>,
    identity_id: Option<String>,
    action_type: String,
    context: String,
    points: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for LedgerEntry {
    type Error = CivicError;

    fn try_from(row: EntryRow) -> Result<Self> {
        let identity_id = row
            .identity_id
            .as_deref()
            .map(|raw| {
                raw.parse::<IdentityId>()
                    .map_err(|_| CivicError::Corrupt(format!("entry {} identity '{}'", row.id, raw)))
            })
            .transpose()?;
        let action_type = row
            .action_type
            .parse()
            .map_err(|_| CivicError::Corrupt(format!("entry {} action '{}'", row.id, row.action_type)))?;
        let context = serde_json::from_str(&row.context)
            .map_err(|e| CivicError::Corrupt(format!("entry {} context: {}", row.id, e)))?;

        Ok(LedgerEntry {
            id: row.id,
            session_fingerprint: row.session_fingerprint,
            identity_id,
            action_type,
            context,
            points: row.points,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
}

impl LedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append an entry; a one-time entry that already exists is not written.
    pub async fn insert(&self, entry: &NewEntry<'_>) -> Result<RecordOutcome> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_in(&mut conn, entry).await
    }

    pub async fn insert_in(conn: &mut SqliteConnection, entry: &NewEntry<'_>) -> Result<RecordOutcome> {
        let context_json = serde_json::to_string(entry.context)
            .map_err(|e| CivicError::validation(format!("unserializable context: {}", e)))?;
        let context_key = entry.context.dedup_key();

        // The existing row can vanish between the conflict and the lookup if a
        // merge drops it, so a lost lookup retries the insert once.
        for _ in 0..2 {
            let inserted: Option<i64> = sqlx::query_scalar(
                r#"
                INSERT INTO ledger_entries
                    (session_fingerprint, identity_id, action_type, context_key, context,
                     points, dedup_actor, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT (dedup_actor, action_type, context_key) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(entry.session_fingerprint)
            .bind(entry.identity_id.map(|id| id.to_string()))
            .bind(entry.action_type.as_str())
            .bind(&context_key)
            .bind(&context_json)
            .bind(entry.points)
            .bind(entry.dedup_actor.as_deref())
            .bind(Utc::now())
            .fetch_optional(&mut *conn)
            .await?;

            if let Some(entry_id) = inserted {
                debug!(entry_id, action = %entry.action_type, points = entry.points, "Ledger entry recorded");
                return Ok(RecordOutcome { entry_id, duplicate: false });
            }

            let Some(dedup_actor) = entry.dedup_actor.as_deref() else {
                break;
            };
            let existing: Option<EntryId> = sqlx::query_scalar(
                r#"
                SELECT id FROM ledger_entries
                WHERE dedup_actor = ?1 AND action_type = ?2 AND context_key = ?3
                "#,
            )
            .bind(dedup_actor)
            .bind(entry.action_type.as_str())
            .bind(&context_key)
            .fetch_optional(&mut *conn)
            .await?;

            if let Some(entry_id) = existing {
                debug!(entry_id, action = %entry.action_type, "Duplicate one-time action ignored");
                return Ok(RecordOutcome { entry_id, duplicate: true });
            }
        }

        Err(CivicError::Corrupt(format!(
            "ledger insert for {} neither wrote nor found an entry",
            entry.action_type
        )))
    }

    pub async fn identity_total(&self, identity_id: IdentityId) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(IDENTITY_TOTAL)
            .bind(identity_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }

    pub async fn session_total(&self, fingerprint: &str) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(SESSION_TOTAL)
            .bind(fingerprint)
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }

    /// Entries counted in [`Self::identity_total`], newest first.
    pub fn identity_history(
        &self,
        identity_id: IdentityId,
        filter: Option<ActionType>,
    ) -> BoxStream<'_, Result<LedgerEntry>> {
        sqlx::query_as::<_, EntryRow>(IDENTITY_HISTORY)
            .bind(identity_id.to_string())
            .bind(filter.map(|t| t.as_str()))
            .fetch(&self.pool)
            .map(|row| row.map_err(CivicError::from).and_then(LedgerEntry::try_from))
            .boxed()
    }

    /// Entries of an unbound session, newest first.
    pub fn session_history(
        &self,
        fingerprint: String,
        filter: Option<ActionType>,
    ) -> BoxStream<'_, Result<LedgerEntry>> {
        sqlx::query_as::<_, EntryRow>(SESSION_HISTORY)
            .bind(fingerprint)
            .bind(filter.map(|t| t.as_str()))
            .fetch(&self.pool)
            .map(|row| row.map_err(CivicError::from).and_then(LedgerEntry::try_from))
            .boxed()
    }

    /// Delete session one-time entries the identity already holds.
    pub async fn drop_held_session_entries_in(
        conn: &mut SqliteConnection,
        fingerprint: &str,
        identity_id: IdentityId,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM ledger_entries
            WHERE session_fingerprint = ?1
              AND identity_id IS NULL
              AND dedup_actor IS NOT NULL
              AND EXISTS (
                  SELECT 1 FROM ledger_entries x
                  WHERE x.dedup_actor = 'identity:' || ?2
                    AND x.action_type = ledger_entries.action_type
                    AND x.context_key = ledger_entries.context_key)
            "#,
        )
        .bind(fingerprint)
        .bind(identity_id.to_string())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Move every entry anchored only to the session onto the identity.
    pub async fn reanchor_session_in(
        conn: &mut SqliteConnection,
        fingerprint: &str,
        identity_id: IdentityId,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE ledger_entries
            SET identity_id = ?2,
                dedup_actor = CASE WHEN dedup_actor IS NOT NULL THEN 'identity:' || ?2 END
            WHERE session_fingerprint = ?1 AND identity_id IS NULL
            "#,
        )
        .bind(fingerprint)
        .bind(identity_id.to_string())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Erasure cascade: the identity's entries and those of its unmerged devices.
    pub async fn delete_for_identity_in(
        conn: &mut SqliteConnection,
        identity_id: IdentityId,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM ledger_entries
            WHERE identity_id = ?1
               OR (identity_id IS NULL AND session_fingerprint IN (
                   SELECT token_fingerprint FROM device_bindings
                 WHERE identity_id = ?1 AND is_active = 1))
            "#,
        )
        .bind(identity_id.to_string())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabasePool;
    use futures::TryStreamExt;

    fn page_entry<'a>(fp: &'a str, ctx: &'a LedgerContext) -> NewEntry<'a> {
        NewEntry {
            session_fingerprint: Some(fp),
            identity_id: None,
            action_type: ActionType::PageVisit,
            context: ctx,
            points: 1,
            dedup_actor: Some(format!("session:{}", fp)),
        }
    }

    #[tokio::test]
    async fn test_one_time_insert_is_deduplicated() {
        let db = DatabasePool::in_memory().await.unwrap();
        let repo = db.ledger();
        let ctx = LedgerContext::page("home");

        let first = repo.insert(&page_entry("fp-a", &ctx)).await.unwrap();
        let second = repo.insert(&page_entry("fp-a", &ctx)).await.unwrap();
        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.entry_id, second.entry_id);
        assert_eq!(repo.session_total("fp-a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_repeatable_entries_accumulate() {
        let db = DatabasePool::in_memory().await.unwrap();
        let repo = db.ledger();
        let ctx = LedgerContext::Vote { target: "budget-2026".into(), choice: "yes".into() };
        let entry = NewEntry {
            session_fingerprint: Some("fp-v"),
            identity_id: None,
            action_type: ActionType::VoteCast,
            context: &ctx,
            points: 2,
            dedup_actor: None,
        };

        repo.insert(&entry).await.unwrap();
        repo.insert(&entry).await.unwrap();
        assert_eq!(repo.session_total("fp-v").await.unwrap(), 4);

        let history: Vec<LedgerEntry> = repo
            .session_history("fp-v".to_string(), Some(ActionType::VoteCast))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].id > history[1].id);
        assert_eq!(history[0].context, ctx);
    }
}
