//! Relational store, sync state, advisory locks, the raw response archive and
//! the sync-history log.
//!
//! Entity rows are JSON documents keyed by their natural key, one table per
//! [`Table`]. Temporal attributes live in a single interval table. Both an
//! in-memory and a PostgreSQL implementation are provided behind the same
//! traits so the merge engine is agnostic of the backend.

mod history;
mod locks;
mod memory;
mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sleeper_core::{EntityKind, Interval, SyncKey, Table, TemporalKind};
use thiserror::Error;
use uuid::Uuid;

pub use history::{MemoryHistory, TracingHistory};
pub use locks::{LocalLocks, LockGuard, PgAdvisoryLocks};
pub use memory::MemoryStore;
pub use postgres::{connect_pool, run_migrations, PgStore, PgSyncHistory};

pub const CRATE_NAME: &str = "sleeper-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("row encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub data: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An interval about to be opened; the store assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewInterval {
    pub kind: TemporalKind,
    pub scope: String,
    pub subject: String,
    pub value: JsonValue,
    pub is_primary: bool,
    pub valid_from: DateTime<Utc>,
}

/// One atomic unit of work. Dropping it without `commit` discards every
/// write made through it.
#[async_trait]
pub trait StoreTx: Send {
    async fn load_row(&mut self, table: Table, key: &str) -> Result<Option<JsonValue>, StoreError>;

    async fn row_exists(&mut self, table: Table, key: &str) -> Result<bool, StoreError> {
        Ok(self.load_row(table, key).await?.is_some())
    }

    /// Insert, or overwrite only when the stored document differs.
    async fn upsert_if_changed(
        &mut self,
        table: Table,
        key: &str,
        data: &JsonValue,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Returns `true` when the row was written.
    async fn insert_if_absent(
        &mut self,
        table: Table,
        key: &str,
        data: &JsonValue,
    ) -> Result<bool, StoreError>;

    /// Overwrites the top-level fields present in `patch`, leaving the rest.
    /// Returns `true` when anything changed.
    async fn update_fields(
        &mut self,
        table: Table,
        key: &str,
        patch: &JsonValue,
    ) -> Result<bool, StoreError>;

    async fn open_intervals(
        &mut self,
        kind: TemporalKind,
        scope: &str,
    ) -> Result<Vec<Interval>, StoreError>;

    async fn close_interval(&mut self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn open_interval(&mut self, interval: NewInterval) -> Result<i64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    async fn load_row(&self, table: Table, key: &str) -> Result<Option<JsonValue>, StoreError>;

    /// Cheap round trip used by readiness checks.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Per-key bookkeeping used for change detection and cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub key: SyncKey,
    pub checksum: Option<String>,
    pub last_synced_at: DateTime<Utc>,
    pub next_eligible_at: DateTime<Utc>,
}

#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn get(&self, key: &SyncKey) -> Result<Option<SyncState>, StoreError>;

    async fn put(&self, state: &SyncState) -> Result<(), StoreError>;

    /// Every tracked key, ordered by key.
    async fn list(&self) -> Result<Vec<SyncState>, StoreError>;
}

/// One upstream response exactly as fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResponse {
    pub path: String,
    pub entity: EntityKind,
    pub status: u16,
    pub checksum: String,
    pub body: JsonValue,
    pub size_bytes: u64,
    pub response_time_ms: u64,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    New,
    Processed,
    Deferred,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Processed => "processed",
            Self::Deferred => "deferred",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedResponse {
    pub id: i64,
    pub response: RawResponse,
    pub processing: ProcessingStatus,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Result of [`RawArchive::archive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Archived {
    pub id: i64,
    /// `false` when a response with the same path and checksum was already kept.
    pub inserted: bool,
}

/// Append-only archive of upstream responses, unique per `(path, checksum)`.
#[async_trait]
pub trait RawArchive: Send + Sync {
    async fn archive(&self, response: &RawResponse) -> Result<Archived, StoreError>;

    async fn mark_processed(&self, id: i64, status: ProcessingStatus) -> Result<(), StoreError>;
}

/// Mutual exclusion across workers (and processes, for the Postgres backend).
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Waits at most `wait`; `None` means another holder kept the lock.
    async fn try_acquire(&self, key: &str, wait: Duration) -> Result<Option<LockGuard>, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Committed, possibly with some rows deferred to the next pass.
    Merged,
    Unchanged,
    /// Not attempted because a parent task did not complete in this run.
    Deferred,
    Failed,
    TimedOut,
}

impl SyncOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Merged => "merged",
            Self::Unchanged => "unchanged",
            Self::Deferred => "deferred",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub run_id: Uuid,
    pub key: SyncKey,
    pub outcome: SyncOutcome,
    pub detail: JsonValue,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[async_trait]
pub trait SyncHistory: Send + Sync {
    async fn record(&self, entry: &SyncLogEntry) -> Result<(), StoreError>;
}
