//! Runtime state tracking: shutdown detection and liveness.

use crate::error::StoreError;

use super::{Store, StoreResult};

impl Store {
    /// Check if the last shutdown was unclean
    ///
    /// Returns true if the previous session did not call set_clean_shutdown(),
    /// indicating a crash or forced termination.
    pub async fn was_unclean_shutdown(&self) -> StoreResult<bool> {
        let value: Option<String> = sqlx::query_scalar(
            r#"
            SELECT value FROM runtime_state WHERE key = 'clean_shutdown'
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("Failed to check shutdown state: {}", e)))?;

        // Missing or "false" means the last session never shut down cleanly
        Ok(value.is_none_or(|v| v != "true"))
    }

    /// Mark that the engine has started
    ///
    /// Called when the downloader is constructed. If set_clean_shutdown() is
    /// not called before the next start, was_unclean_shutdown() returns true.
    pub async fn set_clean_start(&self) -> StoreResult<()> {
        self.set_shutdown_marker("false").await
    }

    /// Mark that the engine is shutting down cleanly
    pub async fn set_clean_shutdown(&self) -> StoreResult<()> {
        self.set_shutdown_marker("true").await
    }

    async fn set_shutdown_marker(&self, value: &str) -> StoreResult<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO runtime_state (key, value, updated_at)
            VALUES ('clean_shutdown', ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("Failed to set shutdown state: {}", e)))?;

        Ok(())
    }

    /// Run a trivial query to prove the database is reachable
    pub async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::ConnectionFailed(format!("Store unreachable: {}", e)))?;
        Ok(())
    }
}
