use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sleeper_core::{EntityKind, Interval, SyncKey, Table, TemporalKind};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::{
    Archived, NewInterval, ProcessingStatus, RawArchive, RawResponse, RelationalStore, StoreError,
    StoreTx, SyncHistory, SyncLogEntry, SyncState, SyncStateStore, UpsertOutcome,
};

pub async fn connect_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections.max(2))
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .with_context(|| "connecting to postgres (DATABASE_URL)".to_string())
}

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    MIGRATOR.run(pool).await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn interval_from_row(kind: TemporalKind, row: &PgRow) -> Result<Interval, StoreError> {
    Ok(Interval {
        id: row.try_get("id")?,
        kind,
        scope: row.try_get("scope")?,
        subject: row.try_get("subject")?,
        value: row.try_get("value")?,
        is_primary: row.try_get("is_primary")?,
        valid_from: row.try_get("valid_from")?,
        valid_to: row.try_get("valid_to")?,
    })
}

#[async_trait]
impl RelationalStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn load_row(&self, table: Table, key: &str) -> Result<Option<JsonValue>, StoreError> {
        let sql = format!("SELECT data FROM {} WHERE key = $1", table.as_str());
        Ok(sqlx::query_scalar(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn load_row(&mut self, table: Table, key: &str) -> Result<Option<JsonValue>, StoreError> {
        let sql = format!("SELECT data FROM {} WHERE key = $1", table.as_str());
        Ok(sqlx::query_scalar(&sql)
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn upsert_if_changed(
        &mut self,
        table: Table,
        key: &str,
        data: &JsonValue,
    ) -> Result<UpsertOutcome, StoreError> {
        // xmax = 0 only on a freshly inserted tuple.
        let sql = format!(
            r#"
            INSERT INTO {t} (key, data, created_at, updated_at)
            VALUES ($1, $2, NOW(), NOW())
            ON CONFLICT (key) DO UPDATE
               SET data = EXCLUDED.data,
                   updated_at = NOW()
             WHERE {t}.data IS DISTINCT FROM EXCLUDED.data
            RETURNING (xmax = 0) AS inserted
            "#,
            t = table.as_str()
        );
        let inserted: Option<bool> = sqlx::query_scalar(&sql)
            .bind(key)
            .bind(data)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(match inserted {
            Some(true) => UpsertOutcome::Inserted,
            Some(false) => UpsertOutcome::Updated,
            None => UpsertOutcome::Unchanged,
        })
    }

    async fn insert_if_absent(
        &mut self,
        table: Table,
        key: &str,
        data: &JsonValue,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO {} (key, data, created_at, updated_at)
            VALUES ($1, $2, NOW(), NOW())
            ON CONFLICT (key) DO NOTHING
            "#,
            table.as_str()
        );
        let result = sqlx::query(&sql)
            .bind(key)
            .bind(data)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_fields(
        &mut self,
        table: Table,
        key: &str,
        patch: &JsonValue,
    ) -> Result<bool, StoreError> {
        if !patch.is_object() {
            return Err(StoreError::Corrupt("field patch must be an object".to_string()));
        }
        let sql = format!(
            r#"
            UPDATE {}
               SET data = data || $2,
                   updated_at = NOW()
             WHERE key = $1
               AND NOT (data @> $2)
            "#,
            table.as_str()
        );
        let result = sqlx::query(&sql)
            .bind(key)
            .bind(patch)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn open_intervals(
        &mut self,
        kind: TemporalKind,
        scope: &str,
    ) -> Result<Vec<Interval>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, scope, subject, value, is_primary, valid_from, valid_to
              FROM temporal_intervals
             WHERE kind = $1
               AND scope = $2
               AND valid_to IS NULL
             ORDER BY id
            "#,
        )
        .bind(kind.as_str())
        .bind(scope)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(|row| interval_from_row(kind, row)).collect()
    }

    async fn close_interval(&mut self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE temporal_intervals
               SET valid_to = $2
             WHERE id = $1
               AND valid_to IS NULL
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() != 1 {
            return Err(StoreError::Constraint(format!("interval {id} is not open")));
        }
        Ok(())
    }

    async fn open_interval(&mut self, interval: NewInterval) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO temporal_intervals (kind, scope, subject, value, is_primary, valid_from)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(interval.kind.as_str())
        .bind(&interval.scope)
        .bind(&interval.subject)
        .bind(&interval.value)
        .bind(interval.is_primary)
        .bind(interval.valid_from)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl SyncStateStore for PgStore {
    async fn get(&self, key: &SyncKey) -> Result<Option<SyncState>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT entity_type, entity_id, checksum, last_synced_at, next_eligible_at
              FROM sync_state
             WHERE entity_type = $1
               AND entity_id = $2
            "#,
        )
        .bind(key.entity.as_str())
        .bind(&key.entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(sync_state_from_row).transpose()
    }

    async fn put(&self, state: &SyncState) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (entity_type, entity_id, checksum, last_synced_at, next_eligible_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (entity_type, entity_id) DO UPDATE
               SET checksum = EXCLUDED.checksum,
                   last_synced_at = EXCLUDED.last_synced_at,
                   next_eligible_at = EXCLUDED.next_eligible_at
            "#,
        )
        .bind(state.key.entity.as_str())
        .bind(&state.key.entity_id)
        .bind(&state.checksum)
        .bind(state.last_synced_at)
        .bind(state.next_eligible_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SyncState>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT entity_type, entity_id, checksum, last_synced_at, next_eligible_at
              FROM sync_state
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        let mut states = rows
            .iter()
            .map(sync_state_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        states.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(states)
    }
}

fn sync_state_from_row(row: &PgRow) -> Result<SyncState, StoreError> {
    let entity_type: String = row.try_get("entity_type")?;
    let entity = entity_type
        .parse::<EntityKind>()
        .map_err(|err| StoreError::Corrupt(err.to_string()))?;
    Ok(SyncState {
        key: SyncKey::new(entity, row.try_get::<String, _>("entity_id")?),
        checksum: row.try_get("checksum")?,
        last_synced_at: row.try_get("last_synced_at")?,
        next_eligible_at: row.try_get("next_eligible_at")?,
    })
}

#[async_trait]
impl RawArchive for PgStore {
    async fn archive(&self, response: &RawResponse) -> Result<Archived, StoreError> {
        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO raw_responses
                (path, entity_type, status, checksum, body, size_bytes, response_time_ms, fetched_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (path, checksum) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&response.path)
        .bind(response.entity.as_str())
        .bind(i32::from(response.status))
        .bind(&response.checksum)
        .bind(&response.body)
        .bind(i64::try_from(response.size_bytes).unwrap_or(i64::MAX))
        .bind(i64::try_from(response.response_time_ms).unwrap_or(i64::MAX))
        .bind(response.fetched_at)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(id) = inserted {
            return Ok(Archived { id, inserted: true });
        }

        let id: i64 = sqlx::query_scalar(
            "SELECT id FROM raw_responses WHERE path = $1 AND checksum = $2",
        )
        .bind(&response.path)
        .bind(&response.checksum)
        .fetch_one(&self.pool)
        .await?;
        Ok(Archived {
            id,
            inserted: false,
        })
    }

    async fn mark_processed(&self, id: i64, status: ProcessingStatus) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE raw_responses
               SET processing_status = $2,
                   processed_at = NOW()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() != 1 {
            return Err(StoreError::Constraint(format!("raw response {id} does not exist")));
        }
        Ok(())
    }
}

/// Appends to the `sync_log` table.
#[derive(Debug, Clone)]
pub struct PgSyncHistory {
    pool: PgPool,
}

impl PgSyncHistory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncHistory for PgSyncHistory {
    async fn record(&self, entry: &SyncLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_log (run_id, entity_type, entity_id, outcome, detail, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.run_id)
        .bind(entry.key.entity.as_str())
        .bind(&entry.key.entity_id)
        .bind(entry.outcome.as_str())
        .bind(&entry.detail)
        .bind(entry.started_at)
        .bind(entry.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
