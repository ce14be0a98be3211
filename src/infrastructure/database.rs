//! Pooled SQLite connection for the local fallback store

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::ops::Deref;
use std::path::Path;

pub struct DatabaseConnection {
    connection: SqlitePool,
}

impl DatabaseConnection {
    /// Opens (creating if needed) the database file and runs migrations.
    pub async fn open(path: &Path) -> Result<DatabaseConnection, sqlx::Error> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::migrated(pool).await
    }

    /// Single-connection in-memory database, mostly useful for tests.
    pub async fn in_memory() -> Result<DatabaseConnection, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<DatabaseConnection, sqlx::Error> {
        sqlx::migrate!().run(&pool).await?;
        Ok(DatabaseConnection { connection: pool })
    }
}

impl Deref for DatabaseConnection {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}
