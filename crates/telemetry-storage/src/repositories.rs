// Repository layer for database operations
//
// One append-only table, `events (type, user, app, location, json, dt)`.
// Connections come from a sqlx pool: each operation checks a handle out and
// the pool takes it back when the operation finishes or fails.

use sqlx::migrate::MigrateError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::time::Duration;
use telemetry_core::{format_timestamp, ConfigError, EventKey, EventQuery, StoredRecord};

use crate::models::EventRow;

/// Path that selects a private in-memory database
pub const IN_MEMORY_PATH: &str = ":memory:";

/// Connection settings for the SQLite store
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Database file, or `:memory:`
    pub path: String,
    /// Bound on waiting for a pooled handle and on SQLite lock contention
    pub timeout: Duration,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "logs.db".to_string(),
            timeout: Duration::from_millis(5000),
            max_connections: 8,
        }
    }
}

impl StorageConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = lookup("TELEMETRY_DB_PATH").filter(|s| !s.is_empty()) {
            config.path = path;
        }
        if let Some(raw) = lookup("TELEMETRY_DB_TIMEOUT_MS") {
            let millis: u64 = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::new("TELEMETRY_DB_TIMEOUT_MS", &raw, "not an integer"))?;
            config.timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database described by `config`
    pub async fn connect(config: &StorageConfig) -> sqlx::Result<Self> {
        if config.path == IN_MEMORY_PATH {
            return Self::in_memory().await;
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.timeout)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Private in-memory database on a single long-lived connection
    pub async fn in_memory() -> sqlx::Result<Self> {
        let options: SqliteConnectOptions = "sqlite::memory:".parse()?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the events table and its indexes
    pub async fn migrate(&self) -> Result<(), MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    // ============================================
    // Events (append-only)
    // ============================================

    pub async fn insert_event(&self, record: &StoredRecord) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (type, user, app, location, json, dt)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&record.event_type)
        .bind(&record.user_id)
        .bind(&record.app_name)
        .bind(&record.location)
        .bind(&record.payload)
        .bind(format_timestamp(record.timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn latest_event(&self, key: &EventKey) -> sqlx::Result<Option<EventRow>> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT type, user, app, location, json, dt
            FROM events
            WHERE app = ?1 AND type = ?2 AND user = ?3
            ORDER BY dt DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(&key.app_name)
        .bind(&key.event_type)
        .bind(&key.user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_event_types(&self) -> sqlx::Result<Vec<String>> {
        let types = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT type
            FROM events
            ORDER BY type
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(types)
    }

    pub async fn list_events(&self, query: &EventQuery) -> sqlx::Result<Vec<EventRow>> {
        // A negative LIMIT means no upper bound in SQLite
        let limit = query.limit.map_or(-1, i64::from);

        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT type, user, app, location, json, dt
            FROM events
            WHERE (?1 IS NULL OR app = ?1)
              AND (?2 IS NULL OR type = ?2)
              AND (?3 IS NULL OR user = ?3)
              AND (?4 IS NULL OR dt >= ?4)
              AND (?5 IS NULL OR dt <= ?5)
            ORDER BY dt ASC, rowid ASC
            LIMIT ?6
            "#,
        )
        .bind(query.app.as_exact())
        .bind(query.event_type.as_exact())
        .bind(query.user.as_exact())
        .bind(query.from.map(format_timestamp))
        .bind(query.to.map(format_timestamp))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
