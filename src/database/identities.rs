//! Identity Repository - identities and role grants

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use std::collections::BTreeSet;
use tracing::debug;

use crate::error::{CivicError, Result};
use crate::identity::{AgeBracket, Identity, IdentityId, Role};

#[derive(Debug, sqlx::FromRow)]
struct IdentityRow {
    id: String,
    email: Option<String>,
    email_verified: bool,
    phone: Option<String>,
    phone_verified: bool,
    age_bracket: String,
    parental_consent: bool,
    display_name: Option<String>,
    postal_code: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl IdentityRow {
    fn into_identity(self, roles: BTreeSet<Role>) -> Result<Identity> {
        let id = self
            .id
            .parse()
            .map_err(|_| CivicError::Corrupt(format!("identity id '{}'", self.id)))?;
        let age_bracket: AgeBracket = self
            .age_bracket
            .parse()
            .map_err(|_| CivicError::Corrupt(format!("age bracket '{}'", self.age_bracket)))?;

        Ok(Identity {
            id,
            email: self.email,
            email_verified: self.email_verified,
            phone: self.phone,
            phone_verified: self.phone_verified,
            roles,
            age_bracket,
            parental_consent: self.parental_consent,
            display_name: self.display_name,
            postal_code: self.postal_code,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const SELECT_IDENTITY: &str = r#"
    SELECT id, email, email_verified, phone, phone_verified, age_bracket,
           parental_consent, display_name, postal_code, created_at, updated_at
    FROM identities
"#;

#[derive(Debug, Clone)]
pub struct IdentityRepository {
    pool: SqlitePool,
}

impl IdentityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Live (non-tombstoned) identity by id.
    pub async fn find(&self, id: IdentityId) -> Result<Option<Identity>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_in(&mut conn, id).await
    }

    pub async fn find_in(conn: &mut SqliteConnection, id: IdentityId) -> Result<Option<Identity>> {
        let sql = format!("{} WHERE id = ?1 AND deleted_at IS NULL", SELECT_IDENTITY);
        let row = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => {
                let roles = Self::roles_in(conn, id).await?;
                Ok(Some(row.into_identity(roles)?))
            }
            None => Ok(None),
        }
    }

    /// Live identity owning a (normalized) email.
    pub async fn find_by_email_in(
        conn: &mut SqliteConnection,
        email: &str,
    ) -> Result<Option<Identity>> {
        let sql = format!("{} WHERE email = ?1 AND deleted_at IS NULL", SELECT_IDENTITY);
        let row = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(email)
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => {
                let id: IdentityId = row
                    .id
                    .parse()
                    .map_err(|_| CivicError::Corrupt(format!("identity id '{}'", row.id)))?;
                let roles = Self::roles_in(conn, id).await?;
                Ok(Some(row.into_identity(roles)?))
            }
            None => Ok(None),
        }
    }

    async fn roles_in(conn: &mut SqliteConnection, id: IdentityId) -> Result<BTreeSet<Role>> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT role FROM identity_roles WHERE identity_id = ?1")
                .bind(id.to_string())
                .fetch_all(&mut *conn)
                .await?;

        names
            .iter()
            .map(|name| {
                name.parse::<Role>()
                    .map_err(|_| CivicError::Corrupt(format!("role '{}'", name)))
            })
            .collect()
    }

    /// Identity without any verification (explicit signup / remember me).
    pub async fn insert_unverified_in(
        conn: &mut SqliteConnection,
        id: IdentityId,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO identities (id, display_name, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            "#,
        )
        .bind(id.to_string())
        .bind(display_name)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        debug!(identity_id = %id, "Unverified identity created");
        Ok(())
    }

    /// Insert an identity with a verified email unless the email is taken.
    ///
    /// Returns true when this call created the row. A false return means a
    /// concurrent or earlier verification owns the email.
    pub async fn insert_verified_or_ignore_in(
        conn: &mut SqliteConnection,
        id: IdentityId,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO identities (id, email, email_verified, created_at, updated_at)
            VALUES (?1, ?2, 1, ?3, ?3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(id.to_string())
        .bind(email)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Attach a verified email to an existing identity.
    ///
    /// Fails with a unique violation when another identity owns the email.
    pub async fn set_verified_email_in(
        conn: &mut SqliteConnection,
        id: IdentityId,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE identities
            SET email = ?2, email_verified = 1, updated_at = ?3
            WHERE id = ?1 AND deleted_at IS NULL
            "#,
        )
        .bind(id.to_string())
        .bind(email)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn confirm_phone(&self, id: IdentityId, phone: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE identities
            SET phone = ?2, phone_verified = 1, updated_at = ?3
            WHERE id = ?1 AND deleted_at IS NULL
            "#,
        )
        .bind(id.to_string())
        .bind(phone)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn set_parental_consent(&self, id: IdentityId, consent: bool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE identities
            SET parental_consent = ?2, updated_at = ?3
            WHERE id = ?1 AND deleted_at IS NULL
            "#,
        )
        .bind(id.to_string())
        .bind(consent)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn set_age_bracket(&self, id: IdentityId, bracket: AgeBracket) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE identities
            SET age_bracket = ?2, updated_at = ?3
            WHERE id = ?1 AND deleted_at IS NULL
            "#,
        )
        .bind(id.to_string())
        .bind(bracket.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Administrator demotion of verification flags. Contact data is kept.
    pub async fn reset_verification(
        &self,
        id: IdentityId,
        email: bool,
        phone: bool,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE identities
            SET email_verified = CASE WHEN ?2 THEN 0 ELSE email_verified END,
                phone_verified = CASE WHEN ?3 THEN 0 ELSE phone_verified END,
                updated_at = ?4
            WHERE id = ?1 AND deleted_at IS NULL
            "#,
        )
        .bind(id.to_string())
        .bind(email)
        .bind(phone)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Grant a role; granting twice is a no-op. Returns true if newly granted.
    pub async fn grant_role_in(
        conn: &mut SqliteConnection,
        id: IdentityId,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO identity_roles (identity_id, role, granted_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (identity_id, role) DO NOTHING
            "#,
        )
        .bind(id.to_string())
        .bind(role.as_str())
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn grant_role(&self, id: IdentityId, role: Role) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        Self::grant_role_in(&mut conn, id, role, Utc::now()).await
    }

    pub async fn revoke_role(&self, id: IdentityId, role: Role) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM identity_roles WHERE identity_id = ?1 AND role = ?2")
                .bind(id.to_string())
                .bind(role.as_str())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Profile edit by the identity itself; `None` leaves a field unchanged.
    pub async fn update_profile(
        &self,
        id: IdentityId,
        display_name: Option<&str>,
        postal_code: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE identities
            SET display_name = COALESCE(?2, display_name),
                postal_code = COALESCE(?3, postal_code),
                updated_at = ?4
            WHERE id = ?1 AND deleted_at IS NULL
            "#,
        )
        .bind(id.to_string())
        .bind(display_name)
        .bind(postal_code)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Copy session draft fields into the identity where the identity has none.
    pub async fn fill_profile_gaps_in(
        conn: &mut SqliteConnection,
        id: IdentityId,
        display_name: Option<&str>,
        postal_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE identities
            SET display_name = COALESCE(display_name, ?2),
                postal_code = COALESCE(postal_code, ?3),
                updated_at = ?4
            WHERE id = ?1 AND deleted_at IS NULL
            "#,
        )
        .bind(id.to_string())
        .bind(display_name)
        .bind(postal_code)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Soft-delete: keep the row, drop personal data and role grants.
    pub async fn tombstone_in(
        conn: &mut SqliteConnection,
        id: IdentityId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE identities
            SET email = NULL, email_verified = 0, phone = NULL, phone_verified = 0,
                display_name = NULL, postal_code = NULL,
                updated_at = ?2, deleted_at = ?2
            WHERE id = ?1 AND deleted_at IS NULL
            "#,
        )
        .bind(id.to_string())
        .bind(now)
        .execute(&mut *conn)
        .await?;

        sqlx::query("DELETE FROM identity_roles WHERE identity_id = ?1")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabasePool;

    #[tokio::test]
    async fn test_verified_email_is_unique() {
        let db = DatabasePool::in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let now = Utc::now();

        let first = IdentityId::new();
        let second = IdentityId::new();
        assert!(IdentityRepository::insert_verified_or_ignore_in(&mut conn, first, "a@b.org", now)
            .await
            .unwrap());
        assert!(!IdentityRepository::insert_verified_or_ignore_in(&mut conn, second, "a@b.org", now)
            .await
            .unwrap());

        let owner = IdentityRepository::find_by_email_in(&mut conn, "a@b.org")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(owner.id, first);
        assert!(owner.email_verified);
    }

    #[tokio::test]
    async fn test_roles_and_tombstone() {
        let db = DatabasePool::in_memory().await.unwrap();
        let repo = db.identities();
        let id = IdentityId::new();
        {
            let mut conn = db.pool().acquire().await.unwrap();
            IdentityRepository::insert_verified_or_ignore_in(&mut conn, id, "c@d.org", Utc::now())
                .await
                .unwrap();
        }

        assert!(repo.grant_role(id, Role::Volunteer).await.unwrap());
        assert!(!repo.grant_role(id, Role::Volunteer).await.unwrap());
        assert!(repo.find(id).await.unwrap().unwrap().has_role(Role::Volunteer));

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(IdentityRepository::tombstone_in(&mut conn, id, Utc::now()).await.unwrap());
        drop(conn);
        assert!(repo.find(id).await.unwrap().is_none());
    }
}
