//! Option records and 0/1 feature flags.

use crate::error::StoreError;
use crate::types::OptionRecord;

use super::{Store, StoreResult, flags, write_error};

impl Store {
    /// Get option `name`, or `default` when it has never been set
    pub async fn get_option(&self, name: &str, default: &str) -> StoreResult<String> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT VALUE FROM option_data WHERE NAME = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    StoreError::QueryFailed(format!("Failed to read option {}: {}", name, e))
                })?;

        Ok(value.unwrap_or_else(|| default.to_string()))
    }

    /// Set option `name` to `value`, replacing any previous value
    pub async fn set_option(&self, name: &str, value: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO option_data (NAME, VALUE) VALUES (?, ?)
            ON CONFLICT(NAME) DO UPDATE SET VALUE = excluded.VALUE
            "#,
        )
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(&format!("Failed to write option {}", name), e))?;

        Ok(())
    }

    /// All option records, ordered by name
    pub async fn list_options(&self) -> StoreResult<Vec<OptionRecord>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT NAME, VALUE FROM option_data ORDER BY NAME")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::QueryFailed(format!("Failed to list options: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|(name, value)| OptionRecord { name, value })
            .collect())
    }

    /// Read a 0/1 flag; None when the flag is unknown
    pub async fn get_flag(&self, name: &str) -> StoreResult<Option<bool>> {
        let value: Option<i64> = sqlx::query_scalar("SELECT VALUE FROM config_data WHERE NAME = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Failed to read flag {}: {}", name, e)))?;

        Ok(value.map(|v| v != 0))
    }

    /// Write a flag as a raw integer
    ///
    /// The column only accepts 0 and 1; anything else fails with
    /// [`StoreError::ConstraintViolation`].
    pub async fn set_flag_value(&self, name: &str, value: i64) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO config_data (NAME, VALUE) VALUES (?, ?)
            ON CONFLICT(NAME) DO UPDATE SET VALUE = excluded.VALUE
            "#,
        )
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(&format!("Failed to write flag {}", name), e))?;

        Ok(())
    }

    /// Enable or disable a flag
    pub async fn set_flag(&self, name: &str, enabled: bool) -> StoreResult<()> {
        self.set_flag_value(name, i64::from(enabled)).await
    }

    /// Whether completed ids are recorded and skipped (defaults to on)
    pub async fn record_enabled(&self) -> StoreResult<bool> {
        Ok(self.get_flag(flags::RECORD).await?.unwrap_or(true))
    }

    /// Whether the user accepted the usage disclaimer
    pub async fn disclaimer_accepted(&self) -> StoreResult<bool> {
        Ok(self.get_flag(flags::DISCLAIMER).await?.unwrap_or(false))
    }

    /// Persist the user's acceptance of the usage disclaimer
    pub async fn accept_disclaimer(&self) -> StoreResult<()> {
        tracing::info!("Usage disclaimer accepted");
        self.set_flag(flags::DISCLAIMER, true).await
    }
}
