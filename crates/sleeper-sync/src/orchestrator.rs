//! Executes plans: planning claim, league lock, then each task in parent-first
//! order under its own deadline.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use sleeper_client::{ApiClient, FetchError, FetchedPayload};
use sleeper_core::{
    decode_record_list, decode_record_map, decode_single, ApiDraft, ApiDraftPick, ApiLeague,
    ApiMatchup, ApiNflState, ApiPlayer, ApiRoster, ApiTransaction, ApiUser, DecodeError, Decoded,
    EntityKind, LeagueRow, NflStateRow, RejectedRecord, SyncKey, Table, NFL_SCOPE,
};
use sleeper_store::{
    LockProvider, ProcessingStatus, RawArchive, RawResponse, RelationalStore, StoreError,
    SyncHistory, SyncLogEntry, SyncOutcome, SyncState, SyncStateStore,
};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::detector::ChangeDetector;
use crate::merge::{MergeEngine, MergeError, MergeGroup, MergeResult};
use crate::planner::{
    LeagueSnapshot, NflContext, PlanRequest, PlanTarget, Planner, PlannerConfig, SyncTask,
};
use crate::status::{Readiness, StatusSource};
use crate::transform::{self, TransformError};

/// Run-level failure. Task failures are reported per task instead.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("decoding {path}: {source}")]
    Decode { path: String, source: DecodeError },
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("task has no league or draft to address")]
    Unaddressable,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub key: SyncKey,
    pub outcome: SyncOutcome,
    pub merge: Option<MergeResult>,
    pub error: Option<String>,
    pub attempts: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Another plan for the same target was still pending.
    pub deduplicated: bool,
    pub lock_contended: bool,
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            deduplicated: false,
            lock_contended: false,
            tasks: Vec::new(),
        }
    }

    pub fn task(&self, key: &SyncKey) -> Option<&TaskReport> {
        self.tasks.iter().find(|task| &task.key == key)
    }

    pub fn count(&self, outcome: SyncOutcome) -> usize {
        self.tasks.iter().filter(|task| task.outcome == outcome).count()
    }
}

/// Something that can execute a sync request; the worker pool only needs this.
#[async_trait]
pub trait SyncRunner: Send + Sync + 'static {
    async fn run(&self, request: PlanRequest) -> Result<RunReport, SyncError>;
}

/// Store-side collaborators of the orchestrator.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn RelationalStore>,
    pub states: Arc<dyn SyncStateStore>,
    pub locks: Arc<dyn LockProvider>,
    pub history: Arc<dyn SyncHistory>,
    pub archive: Arc<dyn RawArchive>,
}

/// Transformed payload ready for the merge engine.
struct Prepared {
    group: MergeGroup,
    rejected: Vec<RejectedRecord>,
    snapshot: Option<LeagueSnapshot>,
}

enum Executed {
    Unchanged {
        payload: FetchedPayload,
    },
    Merged {
        payload: FetchedPayload,
        result: MergeResult,
        snapshot: Option<LeagueSnapshot>,
    },
}

pub struct Orchestrator {
    client: ApiClient,
    backends: Backends,
    planner: Planner,
    merge: MergeEngine,
    detector: ChangeDetector,
    lock_wait: Duration,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("planner", &self.planner)
            .field("lock_wait", &self.lock_wait)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        client: ApiClient,
        backends: Backends,
        planner: PlannerConfig,
        lock_wait: Duration,
    ) -> Self {
        Self {
            planner: Planner::new(planner, Arc::clone(&backends.states)),
            merge: MergeEngine::new(Arc::clone(&backends.store)),
            detector: ChangeDetector::new(Arc::clone(&backends.states)),
            client,
            backends,
            lock_wait,
        }
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    /// Explicitly scoped triggers queue behind a running sync of their league
    /// instead of being dropped on contention.
    fn lock_wait_for(&self, request: &PlanRequest) -> Duration {
        match request.scope {
            Some(_) => self.lock_wait.max(self.planner.config().task_deadline),
            None => self.lock_wait,
        }
    }

    /// Runs `request` as of `now`; `now` drives due checks and game windows.
    pub async fn run_at(
        &self,
        request: PlanRequest,
        now: DateTime<Utc>,
    ) -> Result<RunReport, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "sync_run",
            %run_id,
            lock = %request.lock_name(),
            mode = request.mode.as_str(),
        );
        self.run_inner(run_id, request, now).instrument(span).await
    }

    async fn snapshot(&self, request: &PlanRequest) -> Result<LeagueSnapshot, StoreError> {
        let nfl = self.nfl_context().await?;
        let PlanTarget::League(league_id) = &request.target else {
            return Ok(LeagueSnapshot::unknown().with_nfl(nfl));
        };
        let Some(data) = self.backends.store.load_row(Table::Leagues, league_id).await? else {
            return Ok(LeagueSnapshot::unknown().with_nfl(nfl));
        };
        let snapshot = match serde_json::from_value::<LeagueRow>(data) {
            Ok(row) => LeagueSnapshot::from_row(&row),
            Err(err) => {
                warn!(%league_id, error = %err, "stored league row unreadable; planning from scratch");
                LeagueSnapshot::unknown()
            }
        };
        Ok(snapshot.with_nfl(nfl))
    }

    async fn nfl_context(&self) -> Result<Option<NflContext>, StoreError> {
        let Some(data) = self.backends.store.load_row(Table::NflState, NFL_SCOPE).await? else {
            return Ok(None);
        };
        match serde_json::from_value::<NflStateRow>(data) {
            Ok(row) => Ok(Some(NflContext::from_row(&row))),
            Err(err) => {
                warn!(error = %err, "stored nfl state unreadable; ignoring season calendar");
                Ok(None)
            }
        }
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        request: PlanRequest,
        now: DateTime<Utc>,
    ) -> Result<RunReport, SyncError> {
        let mut report = RunReport::new(run_id);
        let snapshot = self.snapshot(&request).await?;
        let mut plan = self.planner.plan(&request, &snapshot, now).await?;

        if plan.deduplicated {
            info!("plan already pending; nothing to do");
            report.deduplicated = true;
            return Ok(report);
        }
        if plan.is_empty() {
            debug!("nothing due");
            return Ok(report);
        }

        let lock_name = request.lock_name();
        let Some(_guard) = self
            .backends
            .locks
            .try_acquire(&lock_name, self.lock_wait_for(&request))
            .await?
        else {
            warn!(lock = %lock_name, "lock held elsewhere; skipping run");
            report.lock_contended = true;
            return Ok(report);
        };

        // A run that held the lock may have moved the league on.
        let current = self.snapshot(&request).await?;
        if current != snapshot {
            let added = self.planner.expand(&mut plan, &current, now).await?;
            debug!(added, "plan expanded from league state stored while waiting");
        }
        let nfl = current.nfl;

        info!(tasks = plan.tasks.len(), "executing plan");
        let mut blocked: HashSet<SyncKey> = HashSet::new();
        let mut next = 0;
        while next < plan.tasks.len() {
            let task = plan.tasks[next].clone();
            next += 1;
            let started_at = Utc::now();

            if let Some(parent) = task.parent.as_ref().filter(|p| blocked.contains(*p)) {
                debug!(key = %task.key, parent = %parent, "parent did not complete; deferring");
                blocked.insert(task.key.clone());
                let entry = TaskReport {
                    key: task.key.clone(),
                    outcome: SyncOutcome::Deferred,
                    merge: None,
                    error: Some(format!("parent {parent} did not complete")),
                    attempts: 0,
                };
                self.record(run_id, &entry, started_at).await;
                report.tasks.push(entry);
                continue;
            }

            let (entry, fresh) = self.run_task(&task, now).await?;
            // A committed group with deferred rows still counts as complete.
            if matches!(entry.outcome, SyncOutcome::Failed | SyncOutcome::TimedOut) {
                blocked.insert(task.key.clone());
            }
            self.record(run_id, &entry, started_at).await;
            report.tasks.push(entry);

            if let Some(fresh) = fresh {
                let fresh = fresh.with_nfl(nfl);
                let added = self.planner.expand(&mut plan, &fresh, now).await?;
                if added > 0 {
                    debug!(added, "plan expanded from fresh league state");
                }
            }
        }

        info!(
            merged = report.count(SyncOutcome::Merged),
            unchanged = report.count(SyncOutcome::Unchanged),
            deferred = report.count(SyncOutcome::Deferred),
            failed = report.count(SyncOutcome::Failed) + report.count(SyncOutcome::TimedOut),
            "sync run finished"
        );
        Ok(report)
    }

    /// Runs one task under its deadline and updates its sync state.
    async fn run_task(
        &self,
        task: &SyncTask,
        now: DateTime<Utc>,
    ) -> Result<(TaskReport, Option<LeagueSnapshot>), StoreError> {
        let span = info_span!("sync_task", key = %task.key, priority = task.priority.as_str());
        let outcome = tokio::time::timeout(task.deadline, self.execute(task))
            .instrument(span)
            .await;

        let mut entry = TaskReport {
            key: task.key.clone(),
            outcome: SyncOutcome::Failed,
            merge: None,
            error: None,
            attempts: 0,
        };
        let previous = self.backends.states.get(&task.key).await?;
        let synced_at = Utc::now();
        let next_due = now + chrono::Duration::from_std(task.cadence).unwrap_or_else(|_| chrono::Duration::zero());

        let fresh = match outcome {
            Err(_elapsed) => {
                error!(key = %task.key, deadline_secs = task.deadline.as_secs(), "task deadline exceeded; rolled back");
                entry.outcome = SyncOutcome::TimedOut;
                entry.error = Some(format!("deadline of {:?} exceeded", task.deadline));
                None
            }
            Ok(Err(err)) => {
                if let TaskError::Fetch(FetchError::Transient { attempts, .. }) = &err {
                    entry.attempts = *attempts;
                }
                error!(key = %task.key, error = %err, "task failed");
                entry.error = Some(err.to_string());
                None
            }
            Ok(Ok(Executed::Unchanged { payload })) => {
                entry.outcome = SyncOutcome::Unchanged;
                entry.attempts = payload.attempts;
                self.backends
                    .states
                    .put(&SyncState {
                        key: task.key.clone(),
                        checksum: Some(payload.checksum),
                        last_synced_at: synced_at,
                        next_eligible_at: next_due,
                    })
                    .await?;
                None
            }
            Ok(Ok(Executed::Merged {
                payload,
                result,
                snapshot,
            })) => {
                entry.attempts = payload.attempts;
                entry.merge = Some(result);
                entry.outcome = SyncOutcome::Merged;
                // Deferred rows keep the checksum stale so the next pass refetches.
                let state = if result.deferred > 0 {
                    SyncState {
                        key: task.key.clone(),
                        checksum: previous.and_then(|state| state.checksum),
                        last_synced_at: synced_at,
                        next_eligible_at: now,
                    }
                } else {
                    SyncState {
                        key: task.key.clone(),
                        checksum: Some(payload.checksum),
                        last_synced_at: synced_at,
                        next_eligible_at: next_due,
                    }
                };
                self.backends.states.put(&state).await?;
                snapshot
            }
        };
        Ok((entry, fresh))
    }

    async fn execute(&self, task: &SyncTask) -> Result<Executed, TaskError> {
        let payload = self.client.fetch(&task.path).await?;
        if !self.detector.has_changed(&task.key, &payload.checksum).await? {
            debug!(key = %task.key, "payload unchanged; skipping merge");
            return Ok(Executed::Unchanged { payload });
        }

        let archived = self.archive(task, &payload).await;
        let merged = self.merge_payload(task, &payload).await;
        if let Some(id) = archived {
            let status = match &merged {
                Ok((result, _)) if result.deferred > 0 => ProcessingStatus::Deferred,
                Ok(_) => ProcessingStatus::Processed,
                Err(_) => ProcessingStatus::Failed,
            };
            if let Err(err) = self.backends.archive.mark_processed(id, status).await {
                warn!(key = %task.key, archive_id = id, error = %err, "could not mark archived response");
            }
        }

        let (result, snapshot) = merged?;
        Ok(Executed::Merged {
            payload,
            result,
            snapshot,
        })
    }

    async fn merge_payload(
        &self,
        task: &SyncTask,
        payload: &FetchedPayload,
    ) -> Result<(MergeResult, Option<LeagueSnapshot>), TaskError> {
        let prepared = prepare(task, payload)?;
        for rejected in &prepared.rejected {
            warn!(
                key = %task.key,
                record = %rejected.locator,
                reason = %rejected.reason,
                "skipping invalid upstream record"
            );
        }

        let mut result = self.merge.apply(&prepared.group, Utc::now()).await?;
        result.rejected = prepared.rejected.len();
        Ok((result, prepared.snapshot))
    }

    /// Keeps the changed response in the raw archive. Archive trouble never
    /// fails the task.
    async fn archive(&self, task: &SyncTask, payload: &FetchedPayload) -> Option<i64> {
        let body = match serde_json::from_slice::<JsonValue>(&payload.body) {
            Ok(body) => body,
            Err(err) => {
                warn!(key = %task.key, error = %err, "response body is not json; not archived");
                return None;
            }
        };
        let response = RawResponse {
            path: payload.path.clone(),
            entity: task.entity,
            status: payload.status,
            checksum: payload.checksum.clone(),
            body,
            size_bytes: payload.body.len() as u64,
            response_time_ms: u64::try_from(payload.response_time.as_millis()).unwrap_or(u64::MAX),
            fetched_at: Utc::now(),
        };
        match self.backends.archive.archive(&response).await {
            Ok(archived) => {
                debug!(key = %task.key, archive_id = archived.id, inserted = archived.inserted, "response archived");
                Some(archived.id)
            }
            Err(err) => {
                warn!(key = %task.key, error = %err, "could not archive response");
                None
            }
        }
    }

    async fn record(&self, run_id: Uuid, task: &TaskReport, started_at: DateTime<Utc>) {
        let entry = SyncLogEntry {
            run_id,
            key: task.key.clone(),
            outcome: task.outcome,
            detail: json!({
                "merge": task.merge,
                "error": task.error,
                "attempts": task.attempts,
            }),
            started_at,
            finished_at: Utc::now(),
        };
        if let Err(err) = self.backends.history.record(&entry).await {
            warn!(key = %task.key, error = %err, "could not write sync log entry");
        }
    }
}

#[async_trait]
impl SyncRunner for Orchestrator {
    async fn run(&self, request: PlanRequest) -> Result<RunReport, SyncError> {
        self.run_at(request, Utc::now()).await
    }
}

#[async_trait]
impl StatusSource for Orchestrator {
    async fn readiness(&self) -> Readiness {
        let (database, upstream) =
            tokio::join!(self.backends.store.ping(), self.client.check_reachable());
        if let Err(err) = &database {
            warn!(error = %err, "database not ready");
        }
        if let Err(err) = &upstream {
            warn!(error = %err, "sleeper api not reachable");
        }
        Readiness {
            database: database.is_ok(),
            sleeper_api: upstream.is_ok(),
        }
    }

    async fn sync_states(&self) -> Result<Vec<SyncState>, SyncError> {
        Ok(self.backends.states.list().await?)
    }
}

fn decode_err(payload: &FetchedPayload) -> impl FnOnce(DecodeError) -> TaskError + '_ {
    move |source| TaskError::Decode {
        path: payload.path.clone(),
        source,
    }
}

fn list<T: serde::de::DeserializeOwned>(payload: &FetchedPayload) -> Result<Decoded<T>, TaskError> {
    decode_record_list(&payload.body).map_err(decode_err(payload))
}

/// Decodes and transforms a payload into its merge group.
fn prepare(task: &SyncTask, payload: &FetchedPayload) -> Result<Prepared, TaskError> {
    let league_id = task.league_id.as_deref();
    let week = task.week.unwrap_or_default();
    let simple = |group| Prepared {
        group,
        rejected: Vec::new(),
        snapshot: None,
    };

    let prepared = match task.entity {
        EntityKind::League => {
            let api: ApiLeague = decode_single(&payload.body).map_err(decode_err(payload))?;
            let row = transform::league_row(&api)?;
            Prepared {
                snapshot: Some(LeagueSnapshot::from_row(&row)),
                group: MergeGroup::League(row),
                rejected: Vec::new(),
            }
        }
        EntityKind::Users => {
            let league_id = league_id.ok_or(TaskError::Unaddressable)?;
            let decoded = list::<ApiUser>(payload)?;
            let (users, members) = transform::user_rows(league_id, &decoded.records);
            Prepared {
                group: MergeGroup::Users { users, members },
                rejected: decoded.rejected,
                snapshot: None,
            }
        }
        EntityKind::Rosters => {
            let league_id = league_id.ok_or(TaskError::Unaddressable)?;
            let decoded = list::<ApiRoster>(payload)?;
            Prepared {
                group: MergeGroup::Rosters {
                    league_id: league_id.to_string(),
                    rosters: decoded
                        .records
                        .iter()
                        .map(|roster| transform::roster_snapshot(league_id, roster))
                        .collect(),
                },
                rejected: decoded.rejected,
                snapshot: None,
            }
        }
        EntityKind::Matchups => {
            let league_id = league_id.ok_or(TaskError::Unaddressable)?;
            let decoded = list::<ApiMatchup>(payload)?;
            let (matchups, participants) =
                transform::matchup_rows(league_id, week, task.week_is_final, &decoded.records);
            Prepared {
                group: MergeGroup::Matchups {
                    matchups,
                    participants,
                },
                rejected: decoded.rejected,
                snapshot: None,
            }
        }
        EntityKind::Transactions => {
            let league_id = league_id.ok_or(TaskError::Unaddressable)?;
            let decoded = list::<ApiTransaction>(payload)?;
            Prepared {
                group: MergeGroup::Transactions(
                    decoded
                        .records
                        .iter()
                        .map(|tx| transform::transaction_bundle(league_id, week, tx))
                        .collect(),
                ),
                rejected: decoded.rejected,
                snapshot: None,
            }
        }
        EntityKind::Draft => {
            let api: ApiDraft = decode_single(&payload.body).map_err(decode_err(payload))?;
            simple(MergeGroup::Draft(transform::draft_row(&api)))
        }
        EntityKind::DraftPicks => {
            let draft_id = task.key.entity_id.clone();
            let decoded = list::<ApiDraftPick>(payload)?;
            Prepared {
                group: MergeGroup::DraftPicks {
                    picks: transform::draft_pick_rows(&draft_id, &decoded.records),
                    draft_id,
                },
                rejected: decoded.rejected,
                snapshot: None,
            }
        }
        EntityKind::NflState => {
            let api: ApiNflState = decode_single(&payload.body).map_err(decode_err(payload))?;
            simple(MergeGroup::NflState(transform::nfl_state_row(&api)))
        }
        EntityKind::Players => {
            let decoded: Decoded<ApiPlayer> =
                decode_record_map(&payload.body).map_err(decode_err(payload))?;
            Prepared {
                group: MergeGroup::Players(decoded.records.iter().map(transform::player_rows).collect()),
                rejected: decoded.rejected,
                snapshot: None,
            }
        }
    };
    Ok(prepared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::Value as JsonValue;
    use sleeper_client::{BackoffPolicy, ClientConfig, ScriptedUpstream};
    use sleeper_core::SyncMode;
    use sleeper_store::{LocalLocks, MemoryHistory, MemoryStore};

    fn wednesday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 7, 12, 0, 0).single().expect("ts")
    }

    struct Harness {
        upstream: Arc<ScriptedUpstream>,
        store: MemoryStore,
        history: MemoryHistory,
        locks: Arc<LocalLocks>,
        orchestrator: Orchestrator,
    }

    fn harness() -> Harness {
        let upstream = Arc::new(ScriptedUpstream::new());
        let store = MemoryStore::new();
        let history = MemoryHistory::new();
        let locks = Arc::new(LocalLocks::new());
        let client = ApiClient::new(
            upstream.clone(),
            ClientConfig {
                backoff: BackoffPolicy {
                    max_retries: 0,
                    ..BackoffPolicy::default()
                },
                ..ClientConfig::default()
            },
        );
        let orchestrator = Orchestrator::new(
            client,
            Backends {
                store: Arc::new(store.clone()),
                states: Arc::new(store.clone()),
                locks: locks.clone(),
                history: Arc::new(history.clone()),
                archive: Arc::new(store.clone()),
            },
            PlannerConfig::default(),
            Duration::from_millis(50),
        );
        Harness {
            upstream,
            store,
            history,
            locks,
            orchestrator,
        }
    }

    fn league(status: &str) -> JsonValue {
        json!({
            "league_id": "L1",
            "name": "Test League",
            "season": "2026",
            "sport": "nfl",
            "status": status,
            "total_rosters": 2,
            "settings": {"leg": 5, "last_scored_leg": 4}
        })
    }

    fn users() -> JsonValue {
        json!([
            {"user_id": "u1", "display_name": "one"},
            {"user_id": "u2", "display_name": "two"}
        ])
    }

    fn rosters() -> JsonValue {
        json!([
            {"roster_id": 1, "owner_id": "u1", "players": ["p1"], "settings": {"wins": 3}},
            {"roster_id": 2, "owner_id": "u2", "players": ["p2"], "settings": {"wins": 1}}
        ])
    }

    #[tokio::test]
    async fn unknown_league_expands_after_status_is_known() {
        let h = harness();
        h.upstream.set_json("/league/L1", &league("in_season"));
        h.upstream.set_json("/league/L1/users", &users());
        h.upstream.set_json("/league/L1/rosters", &rosters());
        h.upstream.set_json("/league/L1/transactions/5", &json!([]));

        let report = h
            .orchestrator
            .run_at(PlanRequest::league("L1", SyncMode::Incremental), wednesday())
            .await
            .expect("run");

        let keys: Vec<String> = report.tasks.iter().map(|t| t.key.to_string()).collect();
        assert_eq!(
            keys,
            vec!["league/L1", "users/L1", "rosters/L1", "transactions/L1:5"]
        );
        assert_eq!(report.count(SyncOutcome::Merged), 4);
        assert_eq!(h.store.row_count(Table::Rosters).await, 2);
        assert_eq!(h.history.entries().await.len(), 4);
    }

    #[tokio::test]
    async fn failed_parent_defers_children() {
        let h = harness();
        h.upstream.set_json("/league/L1", &league("in_season"));
        h.upstream.set_json("/league/L1/users", &users());
        h.upstream.push_status("/league/L1/rosters", 404, b"{}");
        h.upstream.set_json("/league/L1/transactions/5", &json!([]));

        let report = h
            .orchestrator
            .run_at(PlanRequest::league("L1", SyncMode::Incremental), wednesday())
            .await
            .expect("run");

        let rosters = report
            .task(&SyncKey::new(EntityKind::Rosters, "L1"))
            .expect("rosters task");
        assert_eq!(rosters.outcome, SyncOutcome::Failed);
        let tx = report
            .task(&SyncKey::weekly(EntityKind::Transactions, "L1", 5))
            .expect("transactions task");
        assert_eq!(tx.outcome, SyncOutcome::Deferred);
        assert_eq!(h.upstream.calls("/league/L1/transactions/5"), 0);
    }

    #[tokio::test]
    async fn contended_lock_makes_the_run_a_no_op() {
        let h = harness();
        h.upstream.set_json("/league/L1", &league("in_season"));
        let _held = h
            .locks
            .try_acquire("sync:league:L1", Duration::from_millis(10))
            .await
            .expect("lock")
            .expect("free");

        let report = h
            .orchestrator
            .run_at(PlanRequest::league("L1", SyncMode::Incremental), wednesday())
            .await
            .expect("run");

        assert!(report.lock_contended);
        assert!(report.tasks.is_empty());
        assert_eq!(h.upstream.total_calls(), 0);
    }

    #[tokio::test]
    async fn invalid_records_are_skipped_not_fatal() {
        let h = harness();
        h.upstream.set_json("/league/L1", &league("pre_draft"));
        h.upstream.set_json(
            "/league/L1/users",
            &json!([{"user_id": "u1"}, {"display_name": "no id"}]),
        );

        let report = h
            .orchestrator
            .run_at(PlanRequest::league("L1", SyncMode::Incremental), wednesday())
            .await
            .expect("run");

        let users = report
            .task(&SyncKey::new(EntityKind::Users, "L1"))
            .expect("users task");
        assert_eq!(users.outcome, SyncOutcome::Merged);
        assert_eq!(users.merge.map(|m| m.rejected), Some(1));
        assert_eq!(h.store.row_count(Table::Users).await, 1);
    }

    #[tokio::test]
    async fn changed_responses_are_archived_once_with_their_outcome() {
        let h = harness();
        h.upstream.set_json("/league/L1", &league("in_season"));
        h.upstream.set_json("/league/L1/users", &users());
        h.upstream.set_json("/league/L1/rosters", &rosters());
        h.upstream.set_json("/league/L1/transactions/5", &json!([]));
        let request = PlanRequest::league("L1", SyncMode::Incremental);

        h.orchestrator.run_at(request.clone(), wednesday()).await.expect("first run");
        let archived = h.store.archived_responses().await;
        assert_eq!(archived.len(), 4);
        assert!(archived
            .iter()
            .all(|row| row.processing == ProcessingStatus::Processed && row.processed_at.is_some()));
        let rosters_row = archived
            .iter()
            .find(|row| row.response.path == "/league/L1/rosters")
            .expect("rosters archived");
        assert_eq!(rosters_row.response.entity, EntityKind::Rosters);
        assert_eq!(rosters_row.response.status, 200);
        assert!(rosters_row.response.size_bytes > 0);
        assert_eq!(rosters_row.response.body, rosters());

        let week_later = wednesday() + chrono::Duration::days(7);
        let report = h.orchestrator.run_at(request, week_later).await.expect("resync");
        assert_eq!(report.count(SyncOutcome::Unchanged), 4);
        assert_eq!(h.store.archived_responses().await.len(), 4);
    }

    #[tokio::test]
    async fn archived_response_waits_with_its_deferred_rows() {
        let h = harness();
        h.upstream.set_json("/league/L1", &league("in_season"));
        h.upstream.set_json("/league/L1/users", &users());
        h.upstream.set_json(
            "/league/L1/rosters",
            &json!([{"roster_id": 1, "owner_id": "gone", "players": ["p1"]}]),
        );
        h.upstream.set_json("/league/L1/transactions/5", &json!([]));

        h.orchestrator
            .run_at(PlanRequest::league("L1", SyncMode::Incremental), wednesday())
            .await
            .expect("run");

        let archived = h.store.archived_responses().await;
        let status_of = |path: &str| {
            archived
                .iter()
                .find(|row| row.response.path == path)
                .map(|row| row.processing)
        };
        assert_eq!(status_of("/league/L1/rosters"), Some(ProcessingStatus::Deferred));
        assert_eq!(status_of("/league/L1/users"), Some(ProcessingStatus::Processed));
    }

    #[tokio::test]
    async fn stored_nfl_week_addresses_a_league_without_one() {
        let h = harness();
        h.upstream.set_json(
            "/state/nfl",
            &json!({
                "season": "2026",
                "season_type": "regular",
                "week": 6,
                "display_week": 6,
                "previous_season": "2025",
                "season_start_date": "2026-09-10",
                "league_season": "2026",
                "league_create_season": "2026"
            }),
        );
        let report = h
            .orchestrator
            .run_at(PlanRequest::nfl_state(SyncMode::Incremental), wednesday())
            .await
            .expect("nfl state run");
        let task = report.task(&SyncKey::nfl_state()).expect("nfl state task");
        assert_eq!(task.outcome, SyncOutcome::Merged);
        assert_eq!(h.store.row_count(Table::NflState).await, 1);

        let mut without_week = league("in_season");
        without_week["settings"] = json!({});
        h.upstream.set_json("/league/L1", &without_week);
        h.upstream.set_json("/league/L1/users", &users());
        h.upstream.set_json("/league/L1/rosters", &rosters());
        h.upstream.set_json("/league/L1/transactions/6", &json!([]));

        let report = h
            .orchestrator
            .run_at(PlanRequest::league("L1", SyncMode::Incremental), wednesday())
            .await
            .expect("league run");
        let tx = report
            .task(&SyncKey::weekly(EntityKind::Transactions, "L1", 6))
            .expect("week from nfl state");
        assert_eq!(tx.outcome, SyncOutcome::Merged);
        assert_eq!(h.upstream.calls("/league/L1/transactions/6"), 1);
    }

    #[tokio::test]
    async fn status_lists_states_and_reports_readiness() {
        let h = harness();
        h.upstream.set_json("/league/L1", &league("pre_draft"));
        h.upstream.set_json("/league/L1/users", &users());
        h.upstream.set_json("/state/nfl", &json!({"season": "2026", "week": 0}));

        let ready = h.orchestrator.readiness().await;
        assert!(ready.is_ready());

        h.orchestrator
            .run_at(PlanRequest::league("L1", SyncMode::Incremental), wednesday())
            .await
            .expect("run");
        let keys: Vec<String> = h
            .orchestrator
            .sync_states()
            .await
            .expect("states")
            .iter()
            .map(|state| state.key.to_string())
            .collect();
        assert!(keys.contains(&"league/L1".to_string()));
        assert!(keys.contains(&"users/L1".to_string()));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_not_ready() {
        let h = harness();
        h.upstream.push_status("/state/nfl", 503, b"{}");

        let ready = h.orchestrator.readiness().await;
        assert!(ready.database);
        assert!(!ready.sleeper_api);
        assert!(!ready.is_ready());
    }
}
