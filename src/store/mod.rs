//! Persistence layer for douk-dl
//!
//! Handles SQLite persistence for dedup records, options, feature flags and
//! runtime state. Opening an existing database created by older releases
//! adopts its tables in place; migrations are additive only.
//!
//! ## Submodules
//!
//! Methods on [`Store`] are organized by domain:
//! - [`migrations`] - Store lifecycle, schema migrations
//! - [`dedup`] - Dedup records (completed item ids)
//! - [`options`] - Option records and 0/1 feature flags
//! - [`state`] - Runtime state (shutdown tracking, liveness)
//! - [`claims`] - Per-id commit serialization

use crate::error::StoreError;
use crate::types::ItemId;
use sqlx::{FromRow, sqlite::SqlitePool};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

mod claims;
mod dedup;
mod migrations;
mod options;
mod state;

pub use claims::IdClaim;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Feature flag names stored in `config_data`
pub mod flags {
    /// Record completed ids and skip them on later runs
    pub const RECORD: &str = "Record";
    /// Verbose logging requested by the user
    pub const LOGGER: &str = "Logger";
    /// The user accepted the usage disclaimer
    pub const DISCLAIMER: &str = "Disclaimer";
}

/// Dedup record row (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub(crate) struct DedupRow {
    #[sqlx(rename = "ID")]
    pub id: ItemId,
    /// Unix timestamp in milliseconds (NULL for legacy rows)
    pub completed_at: Option<i64>,
    pub destination: Option<String>,
}

impl From<DedupRow> for crate::types::DedupRecord {
    fn from(row: DedupRow) -> Self {
        crate::types::DedupRecord {
            id: row.id,
            completed_at: row
                .completed_at
                .and_then(chrono::DateTime::from_timestamp_millis),
            destination: row.destination.map(PathBuf::from),
        }
    }
}

/// Persistent store handle
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct Store {
    pool: SqlitePool,
    claims: Arc<Mutex<HashMap<ItemId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

/// Map a failed write to a [`StoreError`], surfacing constraint failures distinctly
pub(crate) fn write_error(context: &str, e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        use sqlx::error::ErrorKind;
        if matches!(
            db_err.kind(),
            ErrorKind::CheckViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
        ) {
            return StoreError::ConstraintViolation(format!("{}: {}", context, e));
        }
    }
    StoreError::QueryFailed(format!("{}: {}", context, e))
}
