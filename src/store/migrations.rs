//! Store lifecycle and schema migrations.
//!
//! | Version | Change |
//! |---|---|
//! | 1 | `config_data`, `download_data(ID)`, `option_data` (legacy layout, adopted if present) |
//! | 2 | `download_data.completed_at`, `download_data.destination` |
//! | 3 | `runtime_state` |

use crate::error::StoreError;
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{Store, StoreResult};

impl Store {
    /// Open (or create) the store at `path`
    ///
    /// Creates the database file and its parent directory if needed, then runs
    /// pending migrations.
    pub async fn new(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                ))
            })?;
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                StoreError::ConnectionFailed(format!("Failed to parse database path: {}", e))
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            StoreError::ConnectionFailed(format!("Failed to connect to database: {}", e))
        })?;

        let store = Self {
            pool,
            claims: Arc::new(Mutex::new(HashMap::new())),
        };

        store.run_migrations().await?;

        Ok(store)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            StoreError::ConnectionFailed(format!("Failed to acquire connection: {}", e))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            StoreError::MigrationFailed(format!("Failed to create schema_version table: {}", e))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    StoreError::QueryFailed(format!("Failed to query schema version: {}", e))
                })?
                .flatten();

        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::apply_migration(&mut conn, 1).await?;
        }
        if current_version < 2 {
            Self::apply_migration(&mut conn, 2).await?;
        }
        if current_version < 3 {
            Self::apply_migration(&mut conn, 3).await?;
        }

        Ok(())
    }

    /// Apply one migration inside a transaction
    ///
    /// A failure rolls back so the database is never left half-migrated.
    async fn apply_migration(conn: &mut SqliteConnection, version: i32) -> StoreResult<()> {
        tracing::info!(version, "Applying database migration");

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                StoreError::MigrationFailed(format!("Failed to begin transaction: {}", e))
            })?;

        let result = async {
            match version {
                1 => Self::migrate_v1(conn).await?,
                2 => Self::migrate_v2(conn).await?,
                3 => Self::migrate_v3(conn).await?,
                other => {
                    return Err(StoreError::MigrationFailed(format!(
                        "Unknown migration version {}",
                        other
                    )));
                }
            }
            Self::record_migration(conn, version).await
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        StoreError::MigrationFailed(format!(
                            "Failed to commit migration v{}: {}",
                            version, e
                        ))
                    })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!(version, "Database migration complete");
        Ok(())
    }

    /// Migration v1: legacy tables plus seeded defaults
    async fn migrate_v1(conn: &mut SqliteConnection) -> StoreResult<()> {
        let statements = [
            (
                "config_data",
                r#"
                CREATE TABLE IF NOT EXISTS config_data (
                    NAME TEXT PRIMARY KEY,
                    VALUE INTEGER NOT NULL CHECK(VALUE IN (0, 1))
                )
                "#,
            ),
            (
                "download_data",
                r#"
                CREATE TABLE IF NOT EXISTS download_data (
                    ID TEXT PRIMARY KEY
                )
                "#,
            ),
            (
                "option_data",
                r#"
                CREATE TABLE IF NOT EXISTS option_data (
                    NAME TEXT PRIMARY KEY,
                    VALUE TEXT NOT NULL
                )
                "#,
            ),
        ];

        for (table, sql) in statements {
            sqlx::query(sql).execute(&mut *conn).await.map_err(|e| {
                StoreError::MigrationFailed(format!("Failed to create {} table: {}", table, e))
            })?;
        }

        // Seed defaults without touching values an existing database already holds
        for (name, value) in [
            (super::flags::RECORD, 1_i64),
            (super::flags::LOGGER, 0),
            (super::flags::DISCLAIMER, 0),
        ] {
            sqlx::query("INSERT OR IGNORE INTO config_data (NAME, VALUE) VALUES (?, ?)")
                .bind(name)
                .bind(value)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    StoreError::MigrationFailed(format!("Failed to seed flag {}: {}", name, e))
                })?;
        }

        sqlx::query("INSERT OR IGNORE INTO option_data (NAME, VALUE) VALUES ('Language', 'zh_CN')")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                StoreError::MigrationFailed(format!("Failed to seed options: {}", e))
            })?;

        Ok(())
    }

    /// Migration v2: completion timestamp and destination on dedup records
    async fn migrate_v2(conn: &mut SqliteConnection) -> StoreResult<()> {
        let existing: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info('download_data')")
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| {
                    StoreError::MigrationFailed(format!(
                        "Failed to inspect download_data columns: {}",
                        e
                    ))
                })?;

        for (column, ddl) in [
            (
                "completed_at",
                "ALTER TABLE download_data ADD COLUMN completed_at INTEGER",
            ),
            (
                "destination",
                "ALTER TABLE download_data ADD COLUMN destination TEXT",
            ),
        ] {
            if existing.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                continue;
            }
            sqlx::query(ddl).execute(&mut *conn).await.map_err(|e| {
                StoreError::MigrationFailed(format!("Failed to add column {}: {}", column, e))
            })?;
        }

        Ok(())
    }

    /// Migration v3: runtime state table for shutdown tracking
    async fn migrate_v3(conn: &mut SqliteConnection) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runtime_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            StoreError::MigrationFailed(format!("Failed to create runtime_state table: {}", e))
        })?;

        Ok(())
    }

    async fn record_migration(conn: &mut SqliteConnection, version: i32) -> StoreResult<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                StoreError::MigrationFailed(format!("Failed to record migration: {}", e))
            })?;

        Ok(())
    }

    /// Current schema version
    pub async fn schema_version(&self) -> StoreResult<i64> {
        let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                StoreError::QueryFailed(format!("Failed to query schema version: {}", e))
            })?;
        Ok(version.unwrap_or(0))
    }

    /// Close the database connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
