//! Dedup records: durable proof that an id was fully downloaded.

use crate::error::StoreError;
use crate::types::{DedupRecord, ItemId};
use std::path::Path;

use super::{DedupRow, Store, StoreResult, write_error};

impl Store {
    /// Check whether `id` has a dedup record
    pub async fn has_record(&self, id: &ItemId) -> StoreResult<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM download_data WHERE ID = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Failed to check record {}: {}", id, e)))?;

        Ok(found.is_some())
    }

    /// Get the dedup record for `id`
    pub async fn get_record(&self, id: &ItemId) -> StoreResult<Option<DedupRecord>> {
        let row = sqlx::query_as::<_, DedupRow>(
            r#"
            SELECT ID, completed_at, destination
            FROM download_data
            WHERE ID = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("Failed to get record {}: {}", id, e)))?;

        Ok(row.map(DedupRecord::from))
    }

    /// Record `id` as completed at `destination`
    ///
    /// Idempotent: a second call for the same id is a no-op. Returns `true`
    /// when this call inserted the record.
    pub async fn mark_complete(&self, id: &ItemId, destination: &Path) -> StoreResult<bool> {
        let now = chrono::Utc::now().timestamp_millis();
        let result = sqlx::query(
            r#"
            INSERT INTO download_data (ID, completed_at, destination)
            VALUES (?, ?, ?)
            ON CONFLICT(ID) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(destination.to_string_lossy().into_owned())
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(&format!("Failed to record {}", id), e))?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            tracing::debug!(
                item_id = %id,
                destination = %destination.display(),
                "Dedup record written"
            );
        }
        Ok(inserted)
    }

    /// Insert or overwrite the record for `id` after a forced re-download
    pub async fn refresh_record(&self, id: &ItemId, destination: &Path) -> StoreResult<()> {
        let now = chrono::Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO download_data (ID, completed_at, destination)
            VALUES (?, ?, ?)
            ON CONFLICT(ID) DO UPDATE SET
                completed_at = excluded.completed_at,
                destination = excluded.destination
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(destination.to_string_lossy().into_owned())
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(&format!("Failed to refresh record {}", id), e))?;

        Ok(())
    }

    /// Delete the record for `id`; returns whether one existed
    pub async fn remove_record(&self, id: &ItemId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM download_data WHERE ID = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error(&format!("Failed to remove record {}", id), e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Number of dedup records
    pub async fn count_records(&self) -> StoreResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM download_data")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Failed to count records: {}", e)))
    }
}
