//! Binding Repository - device bindings and anonymous session profiles

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::Row;
use tracing::debug;

use crate::error::{CivicError, Result};
use crate::identity::{DeviceBinding, IdentityId};

/// Profile fields a visitor typed in before having an identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileDraft {
    pub display_name: Option<String>,
    pub postal_code: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct BindingRow {
    token_fingerprint: String,
    identity_id: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    merged_at: Option<DateTime<Utc>>,
}

impl TryFrom<BindingRow> for DeviceBinding {
    type Error = CivicError;

    fn try_from(row: BindingRow) -> Result<Self> {
        let identity_id = row
            .identity_id
            .as_deref()
            .map(|raw| {
                raw.parse::<IdentityId>()
                    .map_err(|_| CivicError::Corrupt(format!("binding identity '{}'", raw)))
            })
            .transpose()?;

        Ok(DeviceBinding {
            token_fingerprint: row.token_fingerprint,
            identity_id,
            is_active: row.is_active,
            created_at: row.created_at,
            last_seen_at: row.last_seen_at,
            merged_at: row.merged_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BindingRepository {
    pool: SqlitePool,
}

impl BindingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, fingerprint: &str) -> Result<Option<DeviceBinding>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_in(&mut conn, fingerprint).await
    }

    pub async fn find_in(
        conn: &mut SqliteConnection,
        fingerprint: &str,
    ) -> Result<Option<DeviceBinding>> {
        let row = sqlx::query_as::<_, BindingRow>(
            r#"
            SELECT token_fingerprint, identity_id, is_active, created_at, last_seen_at, merged_at
            FROM device_bindings
            WHERE token_fingerprint = ?1
            "#,
        )
        .bind(fingerprint)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(DeviceBinding::try_from).transpose()
    }

    /// Make sure an anonymous row exists for the token and bump last-seen.
    ///
    /// An existing row keeps its identity and active flag.
    pub async fn touch(&self, fingerprint: &str) -> Result<DeviceBinding> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, BindingRow>(
            r#"
            INSERT INTO device_bindings (token_fingerprint, identity_id, is_active, created_at, last_seen_at)
            VALUES (?1, NULL, 1, ?2, ?2)
            ON CONFLICT (token_fingerprint) DO UPDATE SET last_seen_at = excluded.last_seen_at
            RETURNING token_fingerprint, identity_id, is_active, created_at, last_seen_at, merged_at
            "#,
        )
        .bind(fingerprint)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        DeviceBinding::try_from(row)
    }

    /// Same as [`Self::touch`] inside a transaction. Being a write, it also
    /// takes the database write lock before the transaction reads anything.
    pub async fn touch_in(
        conn: &mut SqliteConnection,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO device_bindings (token_fingerprint, identity_id, is_active, created_at, last_seen_at)
            VALUES (?1, NULL, 1, ?2, ?2)
            ON CONFLICT (token_fingerprint) DO UPDATE SET last_seen_at = excluded.last_seen_at
            "#,
        )
        .bind(fingerprint)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Point the token at an identity, reactivating it.
    ///
    /// The merge marker is kept only when the identity does not change.
    pub async fn upsert_bound_in(
        conn: &mut SqliteConnection,
        fingerprint: &str,
        identity_id: IdentityId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO device_bindings (token_fingerprint, identity_id, is_active, created_at, last_seen_at)
            VALUES (?1, ?2, 1, ?3, ?3)
            ON CONFLICT (token_fingerprint) DO UPDATE SET
                identity_id = excluded.identity_id,
                is_active = 1,
                last_seen_at = excluded.last_seen_at,
                merged_at = CASE
                    WHEN device_bindings.identity_id = excluded.identity_id
                    THEN device_bindings.merged_at
                    ELSE NULL
                END
            "#,
        )
        .bind(fingerprint)
        .bind(identity_id.to_string())
        .bind(now)
        .execute(&mut *conn)
        .await?;

        debug!(identity_id = %identity_id, "Device bound");
        Ok(())
    }

    /// Record the first merge time; later merges keep the original.
    pub async fn mark_merged_in(
        conn: &mut SqliteConnection,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE device_bindings
            SET merged_at = COALESCE(merged_at, ?2)
            WHERE token_fingerprint = ?1
            "#,
        )
        .bind(fingerprint)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn deactivate(&self, fingerprint: &str) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        Self::deactivate_in(&mut conn, fingerprint).await
    }

    pub async fn deactivate_in(conn: &mut SqliteConnection, fingerprint: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE device_bindings SET is_active = 0 WHERE token_fingerprint = ?1 AND is_active = 1",
        )
        .bind(fingerprint)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// All bindings pointing at an identity, most recently seen first.
    pub async fn for_identity(&self, identity_id: IdentityId) -> Result<Vec<DeviceBinding>> {
        let rows = sqlx::query_as::<_, BindingRow>(
            r#"
            SELECT token_fingerprint, identity_id, is_active, created_at, last_seen_at, merged_at
            FROM device_bindings
            WHERE identity_id = ?1
            ORDER BY last_seen_at DESC
            "#,
        )
        .bind(identity_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeviceBinding::try_from).collect()
    }

    /// Save (or overwrite) the anonymous profile draft for a session.
    pub async fn save_draft(&self, fingerprint: &str, draft: &ProfileDraft) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO session_profiles (token_fingerprint, display_name, postal_code, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (token_fingerprint) DO UPDATE SET
                display_name = COALESCE(excluded.display_name, session_profiles.display_name),
                postal_code = COALESCE(excluded.postal_code, session_profiles.postal_code),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(fingerprint)
        .bind(draft.display_name.as_deref())
        .bind(draft.postal_code.as_deref())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Remove and return the session's draft, if any.
    pub async fn take_draft_in(
        conn: &mut SqliteConnection,
        fingerprint: &str,
    ) -> Result<Option<ProfileDraft>> {
        let row = sqlx::query(
            r#"
            DELETE FROM session_profiles
            WHERE token_fingerprint = ?1
            RETURNING display_name, postal_code
            "#,
        )
        .bind(fingerprint)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(|row| ProfileDraft {
            display_name: row.get("display_name"),
            postal_code: row.get("postal_code"),
        }))
    }

    pub async fn draft(&self, fingerprint: &str) -> Result<Option<ProfileDraft>> {
        let row = sqlx::query(
            "SELECT display_name, postal_code FROM session_profiles WHERE token_fingerprint = ?1",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ProfileDraft {
            display_name: row.get("display_name"),
            postal_code: row.get("postal_code"),
        }))
    }

    /// Erasure cascade: drafts and bindings of every device of the identity.
    pub async fn delete_for_identity_in(
        conn: &mut SqliteConnection,
        identity_id: IdentityId,
    ) -> Result<u64> {
        sqlx::query(
            r#"
            DELETE FROM session_profiles
            WHERE token_fingerprint IN (
                SELECT token_fingerprint FROM device_bindings WHERE identity_id = ?1
            )
            "#,
        )
        .bind(identity_id.to_string())
        .execute(&mut *conn)
        .await?;

        let result = sqlx::query("DELETE FROM device_bindings WHERE identity_id = ?1")
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

    #[tokio::test]
    async fn test_touch_creates_one_anonymous_row() {
        let db = DatabasePool::in_memory().await.unwrap();
        let repo = db.bindings();

        let first = repo.touch("fp-touch").await.unwrap();
        let second = repo.touch("fp-touch").await.unwrap();
        assert_eq!(first.identity_id, None);
        assert!(second.is_active);
        assert_eq!(first.created_at, second.created_at);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM device_bindings")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_drafts_are_taken_once() {
        let db = DatabasePool::in_memory().await.unwrap();
        let repo = db.bindings();

        repo.save_draft("fp-draft", &ProfileDraft { display_name: Some("Ada".into()), postal_code: None })
            .await
            .unwrap();
        repo.save_draft("fp-draft", &ProfileDraft { display_name: None, postal_code: Some("75011".into()) })
            .await
            .unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let draft = BindingRepository::take_draft_in(&mut conn, "fp-draft").await.unwrap().unwrap();
        assert_eq!(draft.display_name.as_deref(), Some("Ada"));
        assert_eq!(draft.postal_code.as_deref(), Some("75011"));
        assert!(BindingRepository::take_draft_in(&mut conn, "fp-draft").await.unwrap().is_none());
    }
}
