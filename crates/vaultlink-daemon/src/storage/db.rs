//! Database connection and initialization.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

/// Configuration store errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to create store directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open configuration store: {0}")]
    Open(#[source] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),

    /// A stored setting does not parse as the type its key holds.
    #[error("Setting '{key}' holds an invalid value '{value}'")]
    InvalidSetting { key: String, value: String },

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Seconds since the Unix epoch.
#[allow(clippy::cast_possible_wrap)]
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// The broker's `SQLite` configuration store.
#[derive(Clone)]
pub struct ConfigDatabase {
    pool: Pool<Sqlite>,
}

impl ConfigDatabase {
    /// Open or create the store at `path`, creating its directory first.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| DatabaseError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
            .map_err(DatabaseError::Open)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(DatabaseError::Open)?;

        tracing::info!(path = %path.display(), "Configuration store opened");
        Self::migrated(pool).await
    }

    /// In-memory store for tests. One connection, so every query sees the
    /// same database.
    pub async fn open_in_memory() -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(DatabaseError::Open)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(DatabaseError::Open)?;
        Self::migrated(pool).await
    }

    async fn migrated(pool: Pool<Sqlite>) -> Result<Self, DatabaseError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::debug!("Configuration store migrations complete");
        Ok(Self { pool })
    }

    pub(super) const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_works() {
        let db = ConfigDatabase::open_in_memory().await;
        assert!(db.is_ok());
    }

    #[tokio::test]
    async fn file_store_creates_its_directory_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("vaultlink.db");
        drop(ConfigDatabase::open(&path).await.unwrap());
        assert!(path.exists());
        assert!(ConfigDatabase::open(&path).await.is_ok());
    }

    #[tokio::test]
    async fn unwritable_directory_is_reported_with_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();

        let err = ConfigDatabase::open(&blocker.join("vaultlink.db"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DatabaseError::CreateDir { ref path, .. } if path == &blocker));
    }

    #[test]
    fn unix_timestamp_is_recent() {
        // After 2024-01-01
        assert!(unix_timestamp() > 1_704_067_200);
    }
}
