//! Clerk Repository - registered automated callers

use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::info;

use crate::clerk::{CapabilitySet, Clerk};
use crate::error::{CivicError, Result};

#[derive(Debug, Clone)]
pub struct ClerkRepository {
    pool: SqlitePool,
}

impl ClerkRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a clerk or replace its capability set.
    pub async fn upsert(&self, clerk: &Clerk) -> Result<()> {
        let capabilities = serde_json::to_string(&clerk.capabilities)
            .map_err(|e| CivicError::validation(format!("capabilities: {}", e)))?;
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO clerks (name, capabilities, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT (name) DO UPDATE SET
                capabilities = excluded.capabilities,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&clerk.name)
        .bind(&capabilities)
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!(clerk = %clerk.name, capabilities = %capabilities, "Clerk registered");
        Ok(())
    }

    pub async fn find(&self, name: &str) -> Result<Option<Clerk>> {
        let row = sqlx::query("SELECT name, capabilities FROM clerks WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("capabilities");
                let capabilities: CapabilitySet = serde_json::from_str(&raw)
                    .map_err(|e| CivicError::Corrupt(format!("clerk '{}' capabilities: {}", name, e)))?;
                Ok(Some(Clerk { name: row.get("name"), capabilities }))
            }
            None => Ok(None),
        }
    }

    pub async fn remove(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM clerks WHERE name = ?1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clerk::ClerkActionType;
    use crate::database::DatabasePool;

    #[tokio::test]
    async fn test_upsert_replaces_capabilities() {
        let db = DatabasePool::in_memory().await.unwrap();
        let repo = db.clerks();

        let mut clerk = Clerk::new("mailer", CapabilitySet::empty());
        repo.upsert(&clerk).await.unwrap();
        clerk.capabilities.grant(ClerkActionType::SendEmail);
        repo.upsert(&clerk).await.unwrap();

        let stored = repo.find("mailer").await.unwrap().unwrap();
        assert!(stored.capabilities.allows(ClerkActionType::SendEmail));
        assert!(repo.find("nobody").await.unwrap().is_none());
        assert!(repo.remove("mailer").await.unwrap());
    }
}
