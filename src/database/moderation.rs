//! Moderation Repository - volunteer applications and thoughts

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{CivicError, Result};
use crate::identity::IdentityId;
use crate::moderation::{ModeratedRequest, ModerationStatus, RequestKind, RequestRef};

#[derive(Debug, sqlx::FromRow)]
struct RequestRow {
    id: i64,
    identity_id: String,
    status: String,
    notification_sent: bool,
    created_at: DateTime<Utc>,
    decided_at: Option<DateTime<Utc>>,
}

impl RequestRow {
    fn into_request(self, kind: RequestKind) -> Result<ModeratedRequest> {
        let identity_id = self
            .identity_id
            .parse()
            .map_err(|_| CivicError::Corrupt(format!("{} #{} identity", kind, self.id)))?;

        Ok(ModeratedRequest {
            kind,
            id: self.id,
            identity_id,
            status: self.status.parse()?,
            notification_sent: self.notification_sent,
            created_at: self.created_at,
            decided_at: self.decided_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ModerationRepository {
    pool: SqlitePool,
}

impl ModerationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_volunteer_application(
        &self,
        identity_id: IdentityId,
        motivation: &str,
        skills: &str,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO volunteer_applications (identity_id, motivation, skills, created_at)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING id
            "#,
        )
        .bind(identity_id.to_string())
        .bind(motivation)
        .bind(skills)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        debug!(application_id = id, identity_id = %identity_id, "Volunteer application stored");
        Ok(id)
    }

    pub async fn insert_thought(&self, identity_id: IdentityId, body: &str) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_thought_in(&mut conn, identity_id, body).await
    }

    pub async fn insert_thought_in(
        conn: &mut SqliteConnection,
        identity_id: IdentityId,
        body: &str,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO thoughts (identity_id, body, created_at)
            VALUES (?1, ?2, ?3)
            RETURNING id
            "#,
        )
        .bind(identity_id.to_string())
        .bind(body)
        .bind(Utc::now())
        .fetch_one(&mut *conn)
        .await?;

        debug!(thought_id = id, identity_id = %identity_id, "Thought stored");
        Ok(id)
    }

    pub async fn find(&self, request: RequestRef) -> Result<Option<ModeratedRequest>> {
        let sql = format!(
            "SELECT id, identity_id, status, notification_sent, created_at, decided_at FROM {} WHERE id = ?1",
            request.kind.table()
        );
        let row = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(request.id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_request(request.kind)).transpose()
    }

    /// Pending requests of a kind, oldest first.
    pub async fn pending(&self, kind: RequestKind, limit: i64) -> Result<Vec<ModeratedRequest>> {
        let sql = format!(
            r#"
            SELECT id, identity_id, status, notification_sent, created_at, decided_at
            FROM {}
            WHERE status = 'pending'
            ORDER BY id ASC
            LIMIT ?1
            "#,
            kind.table()
        );
        let rows = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.into_request(kind)).collect()
    }

    /// The conditional transition. Returns the updated row only for the caller
    /// that moved the request out of `from` and claimed the notification.
    pub async fn transition_in(
        conn: &mut SqliteConnection,
        request: RequestRef,
        from: ModerationStatus,
        to: ModerationStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<ModeratedRequest>> {
        let sql = format!(
            r#"
            UPDATE {}
            SET status = ?1, notification_sent = 1, decided_at = ?2
            WHERE id = ?3 AND status = ?4 AND notification_sent = 0
            RETURNING id, identity_id, status, notification_sent, created_at, decided_at
            "#,
            request.kind.table()
        );
        let row = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(to.as_str())
            .bind(now)
            .bind(request.id)
            .bind(from.as_str())
            .fetch_optional(&mut *conn)
            .await?;

        row.map(|r| r.into_request(request.kind)).transpose()
    }

    /// Erasure cascade for both request kinds.
    pub async fn delete_for_identity_in(
        conn: &mut SqliteConnection,
        identity_id: IdentityId,
    ) -> Result<u64> {
        let mut removed = 0;
        for kind in [RequestKind::VolunteerApplication, RequestKind::Thought] {
            let sql = format!("DELETE FROM {} WHERE identity_id = ?1", kind.table());
            removed += sqlx::query(&sql)
                .bind(identity_id.to_string())
                .execute(&mut *conn)
                .await?
                .rows_affected();
        }
        Ok(removed)
    }
}
