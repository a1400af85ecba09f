//! Database Connection Pool using sqlx

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::database::bindings::BindingRepository;
use crate::database::clerks::ClerkRepository;
use crate::database::identities::IdentityRepository;
use crate::database::ledger::LedgerRepository;
use crate::database::moderation::ModerationRepository;
use crate::error::Result;

/// URL of the private in-memory database.
pub const IN_MEMORY_URL: &str = "sqlite::memory:";

#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: SqlitePool,
    identities: IdentityRepository,
    bindings: BindingRepository,
    ledger: LedgerRepository,
    moderation: ModerationRepository,
    clerks: ClerkRepository,
}

impl DatabasePool {
    /// Connect to a SQLite database, creating the file if it does not exist.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let options = if in_memory {
            options
        } else {
            options.journal_mode(SqliteJournalMode::Wal)
        };

        // Every connection to ":memory:" is a separate database, so pin one
        // connection and never recycle it.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections.max(1))
                .min_connections(1)
        };

        let pool = pool_options.connect_with(options).await?;

        info!(in_memory, "Connected to SQLite");

        Ok(Self::from_pool(pool))
    }

    /// Private in-memory database with migrations applied.
    pub async fn in_memory() -> Result<Self> {
        let db = Self::connect(IN_MEMORY_URL, 1).await?;
        db.run_migrations().await?;
        Ok(db)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            identities: IdentityRepository::new(pool.clone()),
            bindings: BindingRepository::new(pool.clone()),
            ledger: LedgerRepository::new(pool.clone()),
            moderation: ModerationRepository::new(pool.clone()),
            clerks: ClerkRepository::new(pool.clone()),
            pool,
        }
    }

    /// Apply the versioned schema.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database schema up to date");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    pub fn identities(&self) -> &IdentityRepository {
        &self.identities
    }

    pub fn bindings(&self) -> &BindingRepository {
        &self.bindings
    }

    pub fn ledger(&self) -> &LedgerRepository {
        &self.ledger
    }

    pub fn moderation(&self) -> &ModerationRepository {
        &self.moderation
    }

    pub fn clerks(&self) -> &ClerkRepository {
        &self.clerks
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_in_memory_pool_keeps_schema() {
        let db = DatabasePool::in_memory().await.unwrap();
        db.health_check().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ledger_entries")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_file_pool_migrations_are_rerunnable() {
        let temp_db = NamedTempFile::new().unwrap();
        let url = format!("sqlite://{}", temp_db.path().display());

        let db = DatabasePool::connect(&url, 4).await.unwrap();
        db.run_migrations().await.unwrap();
        db.run_migrations().await.unwrap();
        db.health_check().await.unwrap();
        db.close().await;
    }
}
