use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sleeper_core::{Interval, SyncKey, Table, TemporalKind};
use tokio::sync::Mutex;

use crate::{
    Archived, ArchivedResponse, NewInterval, ProcessingStatus, RawArchive, RawResponse,
    RelationalStore, StoreError, StoreTx, StoredRow, SyncState, SyncStateStore, UpsertOutcome,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: HashMap<Table, BTreeMap<String, StoredRow>>,
    intervals: BTreeMap<i64, Interval>,
}

#[derive(Debug, Clone)]
enum Op {
    Put {
        table: Table,
        key: String,
        data: JsonValue,
        at: DateTime<Utc>,
    },
    Close {
        id: i64,
        at: DateTime<Utc>,
    },
    Open(Interval),
}

impl MemoryState {
    fn row(&self, table: Table, key: &str) -> Option<&StoredRow> {
        self.tables.get(&table).and_then(|rows| rows.get(key))
    }

    fn apply(&mut self, op: &Op) -> Result<(), StoreError> {
        match op {
            Op::Put {
                table,
                key,
                data,
                at,
            } => {
                let rows = self.tables.entry(*table).or_default();
                match rows.get_mut(key) {
                    Some(row) => {
                        row.data = data.clone();
                        row.updated_at = *at;
                    }
                    None => {
                        rows.insert(
                            key.clone(),
                            StoredRow {
                                data: data.clone(),
                                created_at: *at,
                                updated_at: *at,
                            },
                        );
                    }
                }
            }
            Op::Close { id, at } => {
                let interval = self
                    .intervals
                    .get_mut(id)
                    .ok_or_else(|| StoreError::Constraint(format!("interval {id} does not exist")))?;
                if interval.valid_to.is_some() {
                    return Err(StoreError::Constraint(format!("interval {id} is already closed")));
                }
                if *at < interval.valid_from {
                    return Err(StoreError::Constraint(format!(
                        "interval {id} would close before it opened"
                    )));
                }
                interval.valid_to = Some(*at);
            }
            Op::Open(interval) => {
                if interval.is_primary && self.open_primary(interval).is_some() {
                    return Err(StoreError::Constraint(format!(
                        "{} already has an open primary interval for {} in {}",
                        interval.kind, interval.subject, interval.scope
                    )));
                }
                self.intervals.insert(interval.id, interval.clone());
            }
        }
        Ok(())
    }

    fn open_primary(&self, candidate: &Interval) -> Option<&Interval> {
        self.intervals.values().find(|existing| {
            existing.is_open()
                && existing.is_primary
                && existing.kind == candidate.kind
                && existing.scope == candidate.scope
                && existing.subject == candidate.subject
        })
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    state: Mutex<MemoryState>,
    sync_state: Mutex<HashMap<SyncKey, SyncState>>,
    raw: Mutex<Vec<ArchivedResponse>>,
    next_interval_id: AtomicI64,
    writes: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    fail_next_commit: AtomicBool,
    fail_next_write: AtomicBool,
}

/// Process-local store with transactional semantics: each transaction works
/// on a private view and its writes become visible atomically on commit.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows written by committed transactions (inserts, updates, interval changes).
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> u64 {
        self.inner.commits.load(Ordering::SeqCst)
    }

    pub fn rollback_count(&self) -> u64 {
        self.inner.rollbacks.load(Ordering::SeqCst)
    }

    /// Makes the next commit fail after all of its writes were staged.
    pub fn fail_next_commit(&self) {
        self.inner.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Makes the next staged write of any transaction fail.
    pub fn fail_next_write(&self) {
        self.inner.fail_next_write.store(true, Ordering::SeqCst);
    }

    pub async fn row(&self, table: Table, key: &str) -> Option<StoredRow> {
        self.inner.state.lock().await.row(table, key).cloned()
    }

    pub async fn rows(&self, table: Table) -> Vec<(String, JsonValue)> {
        let state = self.inner.state.lock().await;
        state
            .tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .map(|(key, row)| (key.clone(), row.data.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn row_count(&self, table: Table) -> usize {
        let state = self.inner.state.lock().await;
        state.tables.get(&table).map(BTreeMap::len).unwrap_or(0)
    }

    pub async fn archived_responses(&self) -> Vec<ArchivedResponse> {
        self.inner.raw.lock().await.clone()
    }

    /// Full history (open and closed) for one kind and scope, ordered by id.
    pub async fn intervals(&self, kind: TemporalKind, scope: &str) -> Vec<Interval> {
        let state = self.inner.state.lock().await;
        state
            .intervals
            .values()
            .filter(|interval| interval.kind == kind && interval.scope == scope)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let view = self.inner.state.lock().await.clone();
        Ok(Box::new(MemoryTx {
            inner: Arc::clone(&self.inner),
            view,
            ops: Vec::new(),
        }))
    }

    async fn load_row(&self, table: Table, key: &str) -> Result<Option<JsonValue>, StoreError> {
        Ok(self.row(table, key).await.map(|row| row.data))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl SyncStateStore for MemoryStore {
    async fn get(&self, key: &SyncKey) -> Result<Option<SyncState>, StoreError> {
        Ok(self.inner.sync_state.lock().await.get(key).cloned())
    }

    async fn put(&self, state: &SyncState) -> Result<(), StoreError> {
        self.inner
            .sync_state
            .lock()
            .await
            .insert(state.key.clone(), state.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SyncState>, StoreError> {
        let mut states: Vec<SyncState> =
            self.inner.sync_state.lock().await.values().cloned().collect();
        states.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(states)
    }
}

#[async_trait]
impl RawArchive for MemoryStore {
    async fn archive(&self, response: &RawResponse) -> Result<Archived, StoreError> {
        let mut raw = self.inner.raw.lock().await;
        if let Some(existing) = raw.iter().find(|kept| {
            kept.response.path == response.path && kept.response.checksum == response.checksum
        }) {
            return Ok(Archived {
                id: existing.id,
                inserted: false,
            });
        }
        let id = raw.len() as i64 + 1;
        raw.push(ArchivedResponse {
            id,
            response: response.clone(),
            processing: ProcessingStatus::New,
            processed_at: None,
        });
        Ok(Archived { id, inserted: true })
    }

    async fn mark_processed(&self, id: i64, status: ProcessingStatus) -> Result<(), StoreError> {
        let mut raw = self.inner.raw.lock().await;
        let kept = raw
            .iter_mut()
            .find(|kept| kept.id == id)
            .ok_or_else(|| StoreError::Constraint(format!("raw response {id} does not exist")))?;
        kept.processing = status;
        kept.processed_at = Some(Utc::now());
        Ok(())
    }
}

struct MemoryTx {
    inner: Arc<MemoryInner>,
    view: MemoryState,
    ops: Vec<Op>,
}

impl MemoryTx {
    fn stage(&mut self, op: Op) -> Result<(), StoreError> {
        if self.inner.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Constraint("injected write failure".to_string()));
        }
        self.view.apply(&op)?;
        self.ops.push(op);
        Ok(())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn load_row(&mut self, table: Table, key: &str) -> Result<Option<JsonValue>, StoreError> {
        Ok(self.view.row(table, key).map(|row| row.data.clone()))
    }

    async fn upsert_if_changed(
        &mut self,
        table: Table,
        key: &str,
        data: &JsonValue,
    ) -> Result<UpsertOutcome, StoreError> {
        let outcome = match self.view.row(table, key) {
            Some(existing) if existing.data == *data => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        };
        self.stage(Op::Put {
            table,
            key: key.to_string(),
            data: data.clone(),
            at: Utc::now(),
        })?;
        Ok(outcome)
    }

    async fn insert_if_absent(
        &mut self,
        table: Table,
        key: &str,
        data: &JsonValue,
    ) -> Result<bool, StoreError> {
        if self.view.row(table, key).is_some() {
            return Ok(false);
        }
        self.stage(Op::Put {
            table,
            key: key.to_string(),
            data: data.clone(),
            at: Utc::now(),
        })?;
        Ok(true)
    }

    async fn update_fields(
        &mut self,
        table: Table,
        key: &str,
        patch: &JsonValue,
    ) -> Result<bool, StoreError> {
        let JsonValue::Object(fields) = patch else {
            return Err(StoreError::Corrupt("field patch must be an object".to_string()));
        };
        let Some(existing) = self.view.row(table, key) else {
            return Ok(false);
        };
        let mut data = existing.data.clone();
        let JsonValue::Object(target) = &mut data else {
            return Err(StoreError::Corrupt(format!("{table}/{key} is not an object")));
        };
        let mut changed = false;
        for (field, value) in fields {
            if target.get(field) != Some(value) {
                target.insert(field.clone(), value.clone());
                changed = true;
            }
        }
        if changed {
            self.stage(Op::Put {
                table,
                key: key.to_string(),
                data,
                at: Utc::now(),
            })?;
        }
        Ok(changed)
    }

    async fn open_intervals(
        &mut self,
        kind: TemporalKind,
        scope: &str,
    ) -> Result<Vec<Interval>, StoreError> {
        Ok(self
            .view
            .intervals
            .values()
            .filter(|interval| interval.is_open() && interval.kind == kind && interval.scope == scope)
            .cloned()
            .collect())
    }

    async fn close_interval(&mut self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.stage(Op::Close { id, at })
    }

    async fn open_interval(&mut self, interval: NewInterval) -> Result<i64, StoreError> {
        let id = self.inner.next_interval_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.stage(Op::Open(Interval {
            id,
            kind: interval.kind,
            scope: interval.scope,
            subject: interval.subject,
            value: interval.value,
            is_primary: interval.is_primary,
            valid_from: interval.valid_from,
            valid_to: None,
        }))?;
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut shared = self.inner.state.lock().await;
        let mut next = shared.clone();
        for op in &self.ops {
            next.apply(op)?;
        }
        if self.inner.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Constraint("injected commit failure".to_string()));
        }
        *shared = next;
        self.inner
            .writes
            .fetch_add(self.ops.len() as u64, Ordering::SeqCst);
        self.inner.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 4, hour, 0, 0).single().expect("ts")
    }

    fn ownership(subject: &str, owner: &str, from: DateTime<Utc>) -> NewInterval {
        NewInterval {
            kind: TemporalKind::RosterOwnership,
            scope: "L1".to_string(),
            subject: subject.to_string(),
            value: json!(owner),
            is_primary: true,
            valid_from: from,
        }
    }

    #[tokio::test]
    async fn writes_become_visible_only_on_commit() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.expect("begin");
        let outcome = tx
            .upsert_if_changed(Table::Users, "u1", &json!({"user_id": "u1"}))
            .await
            .expect("upsert");
        assert_eq!(outcome, UpsertOutcome::Inserted);
        assert!(store.row(Table::Users, "u1").await.is_none());

        tx.commit().await.expect("commit");
        assert!(store.row(Table::Users, "u1").await.is_some());
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn identical_upsert_is_not_a_write() {
        let store = MemoryStore::new();
        let row = json!({"user_id": "u1", "display_name": "Ana"});
        let mut tx = store.begin().await.expect("begin");
        tx.upsert_if_changed(Table::Users, "u1", &row).await.expect("first");
        tx.commit().await.expect("commit");

        let mut tx = store.begin().await.expect("begin");
        let outcome = tx.upsert_if_changed(Table::Users, "u1", &row).await.expect("second");
        tx.commit().await.expect("commit");

        assert_eq!(outcome, UpsertOutcome::Unchanged);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let store = MemoryStore::new();
        {
            let mut tx = store.begin().await.expect("begin");
            tx.insert_if_absent(Table::Transactions, "t1", &json!({"status": "pending"}))
                .await
                .expect("insert");
        }
        assert_eq!(store.row_count(Table::Transactions).await, 0);
    }

    #[tokio::test]
    async fn failed_commit_applies_nothing() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.expect("begin");
        tx.upsert_if_changed(Table::Rosters, "L1:1", &json!({"roster_number": 1}))
            .await
            .expect("r1");
        tx.upsert_if_changed(Table::Rosters, "L1:2", &json!({"roster_number": 2}))
            .await
            .expect("r2");
        store.fail_next_commit();
        assert!(tx.commit().await.is_err());
        assert_eq!(store.row_count(Table::Rosters).await, 0);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn rolled_back_transaction_is_counted_and_discarded() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.expect("begin");
        tx.upsert_if_changed(Table::Users, "u1", &json!({"user_id": "u1"}))
            .await
            .expect("upsert");
        store.fail_next_write();
        assert!(tx
            .upsert_if_changed(Table::Users, "u2", &json!({"user_id": "u2"}))
            .await
            .is_err());
        tx.rollback().await.expect("rollback");

        assert_eq!(store.rollback_count(), 1);
        assert_eq!(store.row_count(Table::Users).await, 0);
        assert_eq!(store.commit_count(), 0);
    }

    fn raw(path: &str, checksum: &str) -> RawResponse {
        RawResponse {
            path: path.to_string(),
            entity: sleeper_core::EntityKind::League,
            status: 200,
            checksum: checksum.to_string(),
            body: json!({"league_id": "L1"}),
            size_bytes: 18,
            response_time_ms: 12,
            fetched_at: at(1),
        }
    }

    #[tokio::test]
    async fn archive_keeps_one_row_per_path_and_checksum() {
        let store = MemoryStore::new();
        let first = store.archive(&raw("/league/L1", "aa")).await.expect("first");
        let again = store.archive(&raw("/league/L1", "aa")).await.expect("again");
        let changed = store.archive(&raw("/league/L1", "bb")).await.expect("changed");

        assert!(first.inserted);
        assert_eq!(again, Archived { id: first.id, inserted: false });
        assert!(changed.inserted);
        assert_ne!(changed.id, first.id);

        store
            .mark_processed(first.id, ProcessingStatus::Deferred)
            .await
            .expect("mark");
        let kept = store.archived_responses().await;
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].processing, ProcessingStatus::Deferred);
        assert!(kept[0].processed_at.is_some());
        assert_eq!(kept[1].processing, ProcessingStatus::New);
        assert!(store.mark_processed(99, ProcessingStatus::Failed).await.is_err());
    }

    #[tokio::test]
    async fn sync_states_list_in_key_order() {
        let store = MemoryStore::new();
        for key in [SyncKey::players(), SyncKey::league("L2"), SyncKey::league("L1")] {
            store
                .put(&SyncState {
                    key,
                    checksum: None,
                    last_synced_at: at(1),
                    next_eligible_at: at(2),
                })
                .await
                .expect("put");
        }
        let keys: Vec<String> = store
            .list()
            .await
            .expect("list")
            .into_iter()
            .map(|state| state.key.to_string())
            .collect();
        assert_eq!(keys, vec!["league/L1", "league/L2", "players/nfl"]);
    }

    #[tokio::test]
    async fn second_open_primary_interval_is_rejected() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.expect("begin");
        tx.open_interval(ownership("1", "u1", at(1))).await.expect("open");
        let err = tx.open_interval(ownership("1", "u2", at(2))).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn concurrent_opens_conflict_at_commit() {
        let store = MemoryStore::new();
        let mut first = store.begin().await.expect("first");
        let mut second = store.begin().await.expect("second");
        first.open_interval(ownership("1", "u1", at(1))).await.expect("open a");
        second.open_interval(ownership("1", "u2", at(1))).await.expect("open b");

        first.commit().await.expect("first commit");
        assert!(second.commit().await.is_err());
        assert_eq!(store.intervals(TemporalKind::RosterOwnership, "L1").await.len(), 1);
    }

    #[tokio::test]
    async fn close_then_open_keeps_one_open_interval() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.expect("begin");
        let id = tx.open_interval(ownership("1", "u1", at(1))).await.expect("open");
        tx.close_interval(id, at(3)).await.expect("close");
        tx.open_interval(ownership("1", "u2", at(3))).await.expect("reopen");
        tx.commit().await.expect("commit");

        let history = store.intervals(TemporalKind::RosterOwnership, "L1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].valid_to, Some(at(3)));
        assert_eq!(history[1].valid_from, at(3));
        assert!(history[1].is_open());
    }

    #[tokio::test]
    async fn field_update_touches_only_named_fields() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.expect("begin");
        tx.insert_if_absent(
            Table::Transactions,
            "t1",
            &json!({"status": "pending", "kind": "waiver"}),
        )
        .await
        .expect("insert");
        let changed = tx
            .update_fields(Table::Transactions, "t1", &json!({"status": "complete"}))
            .await
            .expect("update");
        tx.commit().await.expect("commit");

        assert!(changed);
        let row = store.row(Table::Transactions, "t1").await.expect("row");
        assert_eq!(row.data, json!({"status": "complete", "kind": "waiver"}));
    }
}
