//! Turns a sync request plus the last known league state into an ordered,
//! dependency-linked list of tasks.
//!
//! The league lifecycle status decides which resources are polled and how
//! often; game windows tighten the cadence of in-season resources. Tasks
//! that are not yet due are dropped and their children re-attached to the
//! nearest emitted ancestor so execution order stays parent-first.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use sleeper_client::paths;
use sleeper_core::{EntityKind, LeagueRow, LeagueStatus, NflStateRow, SeasonType, SyncKey, SyncMode};
use sleeper_store::{StoreError, SyncStateStore};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Live,
    Active,
    Routine,
    Static,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Active => "active",
            Self::Routine => "routine",
            Self::Static => "static",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadences {
    pub draft_live: Duration,
    pub matchups_live: Duration,
    pub rosters_active: Duration,
    pub transactions_active: Duration,
    pub routine: Duration,
    pub static_: Duration,
    pub players: Duration,
}

impl Default for Cadences {
    fn default() -> Self {
        Self {
            draft_live: Duration::from_secs(60),
            matchups_live: Duration::from_secs(120),
            rosters_active: Duration::from_secs(5 * 60),
            transactions_active: Duration::from_secs(15 * 60),
            routine: Duration::from_secs(60 * 60),
            static_: Duration::from_secs(24 * 60 * 60),
            players: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// `[start_hour, end_hour)` UTC on `weekday`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameWindow {
    pub weekday: Weekday,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl GameWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at.weekday() == self.weekday && at.hour() >= self.start_hour && at.hour() < self.end_hour
    }
}

/// Thursday night, Sunday and Monday night slates, in UTC.
pub fn default_game_windows() -> Vec<GameWindow> {
    vec![
        GameWindow { weekday: Weekday::Fri, start_hour: 0, end_hour: 5 },
        GameWindow { weekday: Weekday::Sun, start_hour: 13, end_hour: 24 },
        GameWindow { weekday: Weekday::Mon, start_hour: 0, end_hour: 5 },
        GameWindow { weekday: Weekday::Tue, start_hour: 0, end_hour: 5 },
    ]
}

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub cadences: Cadences,
    pub game_windows: Vec<GameWindow>,
    pub task_deadline: Duration,
    pub players_deadline: Duration,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            cadences: Cadences::default(),
            game_windows: default_game_windows(),
            task_deadline: Duration::from_secs(60),
            players_deadline: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlanTarget {
    League(String),
    Players,
    NflState,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlanRequest {
    pub target: PlanTarget,
    pub mode: SyncMode,
    /// Restricts a league plan to this entity and its ancestors.
    pub scope: Option<EntityKind>,
}

impl PlanRequest {
    pub fn league(league_id: impl Into<String>, mode: SyncMode) -> Self {
        Self {
            target: PlanTarget::League(league_id.into()),
            mode,
            scope: None,
        }
    }

    pub fn players(mode: SyncMode) -> Self {
        Self {
            target: PlanTarget::Players,
            mode,
            scope: None,
        }
    }

    pub fn nfl_state(mode: SyncMode) -> Self {
        Self {
            target: PlanTarget::NflState,
            mode,
            scope: None,
        }
    }

    /// Request for one externally named entity type. Everything except the
    /// player catalog and the NFL state is addressed by league id.
    pub fn for_entity(entity: EntityKind, entity_id: impl Into<String>, mode: SyncMode) -> Self {
        match entity {
            EntityKind::Players => Self::players(mode),
            EntityKind::NflState => Self::nfl_state(mode),
            other => Self {
                target: PlanTarget::League(entity_id.into()),
                mode,
                scope: Some(other),
            },
        }
    }

    /// Identity used to collapse duplicate in-flight requests.
    pub fn dedup_key(&self) -> SyncKey {
        match &self.target {
            PlanTarget::Players => SyncKey::players(),
            PlanTarget::NflState => SyncKey::nfl_state(),
            PlanTarget::League(id) => SyncKey::new(self.scope.unwrap_or(EntityKind::League), id),
        }
    }

    pub fn lock_name(&self) -> String {
        match &self.target {
            PlanTarget::Players => "sync:players:nfl".to_string(),
            PlanTarget::NflState => "sync:nfl_state".to_string(),
            PlanTarget::League(id) => format!("sync:league:{id}"),
        }
    }
}

/// Season calendar shared by every league, from the stored NFL state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NflContext {
    pub season_type: Option<SeasonType>,
    pub week: u32,
}

impl NflContext {
    pub fn from_row(row: &NflStateRow) -> Self {
        Self {
            season_type: row.season_type,
            week: row.week,
        }
    }
}

/// What the planner knows about a league before fetching it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeagueSnapshot {
    pub status: Option<LeagueStatus>,
    pub current_week: Option<u32>,
    pub last_scored_week: Option<u32>,
    pub draft_id: Option<String>,
    pub nfl: Option<NflContext>,
}

impl LeagueSnapshot {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn from_row(row: &LeagueRow) -> Self {
        Self {
            status: Some(row.status),
            current_week: row.current_week,
            last_scored_week: row.last_scored_week,
            draft_id: row.draft_id.clone(),
            nfl: None,
        }
    }

    pub fn with_nfl(mut self, nfl: Option<NflContext>) -> Self {
        self.nfl = nfl;
        self
    }

    /// League week, falling back to the NFL week while it is positive.
    fn week(&self) -> Option<u32> {
        self.current_week
            .or_else(|| self.nfl.map(|nfl| nfl.week).filter(|week| *week > 0))
    }

    fn final_week(&self) -> Option<u32> {
        self.current_week.or(self.last_scored_week)
    }

    /// Unknown calendars do not suppress game windows.
    fn games_possible(&self) -> bool {
        self.nfl
            .and_then(|nfl| nfl.season_type)
            .map_or(true, SeasonType::has_games)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTask {
    pub key: SyncKey,
    pub entity: EntityKind,
    pub league_id: Option<String>,
    pub path: String,
    pub parent: Option<SyncKey>,
    pub priority: Priority,
    pub cadence: Duration,
    pub deadline: Duration,
    pub week: Option<u32>,
    /// Week is over; stored results may no longer change.
    pub week_is_final: bool,
}

/// Removes its key from the pending set when dropped.
#[derive(Debug)]
pub struct PendingClaim {
    key: SyncKey,
    pending: Arc<StdMutex<HashSet<SyncKey>>>,
}

impl Drop for PendingClaim {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.key);
        }
    }
}

#[derive(Debug)]
pub struct Plan {
    pub request: PlanRequest,
    pub tasks: Vec<SyncTask>,
    /// Set when a plan for the same dedup key was still pending.
    pub deduplicated: bool,
    claim: Option<PendingClaim>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, key: &SyncKey) -> bool {
        self.tasks.iter().any(|task| &task.key == key)
    }

    pub fn is_claimed(&self) -> bool {
        self.claim.is_some()
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    entity: EntityKind,
    week: Option<u32>,
    week_is_final: bool,
    cadence: Duration,
    priority: Priority,
}

#[derive(Clone)]
pub struct Planner {
    config: PlannerConfig,
    states: Arc<dyn SyncStateStore>,
    pending: Arc<StdMutex<HashSet<SyncKey>>>,
}

impl std::fmt::Debug for Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner").field("config", &self.config).finish()
    }
}

impl Planner {
    pub fn new(config: PlannerConfig, states: Arc<dyn SyncStateStore>) -> Self {
        Self {
            config,
            states,
            pending: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn in_game_window(&self, now: DateTime<Utc>) -> bool {
        self.config.game_windows.iter().any(|window| window.contains(now))
    }

    fn try_claim(&self, key: SyncKey) -> Option<PendingClaim> {
        let mut pending = self.pending.lock().ok()?;
        if !pending.insert(key.clone()) {
            return None;
        }
        Some(PendingClaim {
            key,
            pending: Arc::clone(&self.pending),
        })
    }

    pub async fn plan(
        &self,
        request: &PlanRequest,
        snapshot: &LeagueSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Plan, StoreError> {
        let Some(claim) = self.try_claim(request.dedup_key()) else {
            debug!(key = %request.dedup_key(), "plan already pending; returning empty plan");
            return Ok(Plan {
                request: request.clone(),
                tasks: Vec::new(),
                deduplicated: true,
                claim: None,
            });
        };

        let mut plan = Plan {
            request: request.clone(),
            tasks: Vec::new(),
            deduplicated: false,
            claim: Some(claim),
        };
        self.extend(&mut plan, snapshot, now).await?;
        Ok(plan)
    }

    /// Re-plans with a freshly observed league state, appending tasks the
    /// plan does not already contain. Returns how many were added.
    pub async fn expand(
        &self,
        plan: &mut Plan,
        snapshot: &LeagueSnapshot,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let before = plan.tasks.len();
        self.extend(plan, snapshot, now).await?;
        Ok(plan.tasks.len() - before)
    }

    async fn extend(
        &self,
        plan: &mut Plan,
        snapshot: &LeagueSnapshot,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let request = plan.request.clone();
        let candidates = match &request.target {
            PlanTarget::Players => vec![Candidate {
                entity: EntityKind::Players,
                week: None,
                week_is_final: false,
                cadence: self.config.cadences.players,
                priority: Priority::Static,
            }],
            PlanTarget::NflState => vec![Candidate {
                entity: EntityKind::NflState,
                week: None,
                week_is_final: false,
                cadence: self.config.cadences.routine,
                priority: Priority::Routine,
            }],
            PlanTarget::League(_) => self.league_candidates(&request, snapshot, now),
        };

        for candidate in candidates {
            if let Some(scope) = request.scope {
                if !candidate.entity.is_ancestor_or_self(scope) {
                    continue;
                }
            }
            let Some(mut task) = self.task_for(&request.target, snapshot, &candidate) else {
                continue;
            };
            if plan.contains(&task.key) {
                continue;
            }

            let forced = request.mode == SyncMode::Full || request.scope == Some(candidate.entity);
            if !forced && !self.is_due(&task.key, now).await? {
                debug!(key = %task.key, "not yet due");
                continue;
            }

            task.parent = nearest_emitted_ancestor(&plan.tasks, task.entity);
            plan.tasks.push(task);
        }
        Ok(())
    }

    async fn is_due(&self, key: &SyncKey, now: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(match self.states.get(key).await? {
            None => true,
            Some(state) => now >= state.next_eligible_at,
        })
    }

    fn league_candidates(
        &self,
        request: &PlanRequest,
        snapshot: &LeagueSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<Candidate> {
        let c = &self.config.cadences;
        let full = request.mode == SyncMode::Full;
        let in_window = snapshot.games_possible() && self.in_game_window(now);
        let simple = |entity, cadence, priority| Candidate {
            entity,
            week: None,
            week_is_final: false,
            cadence,
            priority,
        };
        let weekly = |entity, week, week_is_final, cadence, priority| Candidate {
            entity,
            week: Some(week),
            week_is_final,
            cadence,
            priority,
        };

        let mut out = Vec::new();
        match snapshot.status {
            None => {
                out.push(simple(EntityKind::League, c.routine, Priority::Routine));
                out.push(simple(EntityKind::Users, c.routine, Priority::Routine));
            }
            Some(LeagueStatus::PreDraft) => {
                for entity in [
                    EntityKind::League,
                    EntityKind::Users,
                    EntityKind::Draft,
                    EntityKind::DraftPicks,
                ] {
                    out.push(simple(entity, c.routine, Priority::Routine));
                }
            }
            Some(LeagueStatus::Drafting) => {
                for entity in [
                    EntityKind::League,
                    EntityKind::Users,
                    EntityKind::Draft,
                    EntityKind::DraftPicks,
                ] {
                    out.push(simple(entity, c.draft_live, Priority::Live));
                }
            }
            Some(LeagueStatus::InSeason) => {
                let (cadence, priority) = if in_window {
                    (c.rosters_active, Priority::Active)
                } else {
                    (c.routine, Priority::Routine)
                };
                out.push(simple(EntityKind::League, cadence, priority));
                out.push(simple(EntityKind::Users, c.routine, Priority::Routine));
                out.push(simple(EntityKind::Rosters, cadence, priority));

                if let Some(week) = snapshot.week() {
                    let matchups_wanted =
                        in_window || full || request.scope == Some(EntityKind::Matchups);
                    if matchups_wanted {
                        out.push(weekly(
                            EntityKind::Matchups,
                            week,
                            false,
                            c.matchups_live,
                            Priority::Live,
                        ));
                    }
                    let tx_cadence = if in_window { c.transactions_active } else { c.routine };
                    out.push(weekly(EntityKind::Transactions, week, false, tx_cadence, priority));
                }
            }
            Some(LeagueStatus::Complete) => {
                for entity in [EntityKind::League, EntityKind::Users, EntityKind::Rosters] {
                    out.push(simple(entity, c.static_, Priority::Static));
                }
                if let Some(week) = snapshot.final_week() {
                    out.push(weekly(
                        EntityKind::Transactions,
                        week,
                        true,
                        c.static_,
                        Priority::Static,
                    ));
                }
            }
        }

        if full && snapshot.status.is_some() {
            out.push(simple(EntityKind::Rosters, c.routine, Priority::Routine));
            out.push(simple(EntityKind::Draft, c.static_, Priority::Static));
            out.push(simple(EntityKind::DraftPicks, c.static_, Priority::Static));

            let complete = snapshot.status == Some(LeagueStatus::Complete);
            let last_week = match snapshot.status {
                Some(LeagueStatus::InSeason) => snapshot.week(),
                Some(LeagueStatus::Complete) => snapshot.final_week(),
                _ => None,
            };
            if let Some(current) = last_week {
                for week in 1..=current {
                    let is_final = complete || week < current;
                    let cadence = if is_final { c.static_ } else { c.routine };
                    out.push(weekly(EntityKind::Matchups, week, is_final, cadence, Priority::Routine));
                    out.push(weekly(
                        EntityKind::Transactions,
                        week,
                        is_final,
                        cadence,
                        Priority::Routine,
                    ));
                }
            }
        }

        // Parents first; the first occurrence of a key wins.
        out.sort_by_key(|candidate| (candidate.entity, candidate.week));
        out.dedup_by(|later, earlier| later.entity == earlier.entity && later.week == earlier.week);
        out
    }

    fn task_for(
        &self,
        target: &PlanTarget,
        snapshot: &LeagueSnapshot,
        candidate: &Candidate,
    ) -> Option<SyncTask> {
        let (key, path, league_id) = match (target, candidate.entity) {
            (PlanTarget::Players, _) => (SyncKey::players(), paths::players(), None),
            (PlanTarget::NflState, _) => (SyncKey::nfl_state(), paths::nfl_state(), None),
            (PlanTarget::League(id), EntityKind::League) => {
                (SyncKey::league(id), paths::league(id), Some(id.clone()))
            }
            (PlanTarget::League(id), EntityKind::Users) => {
                (SyncKey::new(EntityKind::Users, id), paths::users(id), Some(id.clone()))
            }
            (PlanTarget::League(id), EntityKind::Rosters) => {
                (SyncKey::new(EntityKind::Rosters, id), paths::rosters(id), Some(id.clone()))
            }
            (PlanTarget::League(id), EntityKind::Matchups) => {
                let week = candidate.week?;
                (
                    SyncKey::weekly(EntityKind::Matchups, id, week),
                    paths::matchups(id, week),
                    Some(id.clone()),
                )
            }
            (PlanTarget::League(id), EntityKind::Transactions) => {
                let week = candidate.week?;
                (
                    SyncKey::weekly(EntityKind::Transactions, id, week),
                    paths::transactions(id, week),
                    Some(id.clone()),
                )
            }
            (PlanTarget::League(id), EntityKind::Draft) => {
                let draft_id = snapshot.draft_id.as_deref()?;
                (
                    SyncKey::new(EntityKind::Draft, draft_id),
                    paths::draft(draft_id),
                    Some(id.clone()),
                )
            }
            (PlanTarget::League(id), EntityKind::DraftPicks) => {
                let draft_id = snapshot.draft_id.as_deref()?;
                (
                    SyncKey::new(EntityKind::DraftPicks, draft_id),
                    paths::draft_picks(draft_id),
                    Some(id.clone()),
                )
            }
            (PlanTarget::League(_), EntityKind::Players | EntityKind::NflState) => return None,
        };

        let deadline = if candidate.entity == EntityKind::Players {
            self.config.players_deadline
        } else {
            self.config.task_deadline
        };
        Some(SyncTask {
            key,
            entity: candidate.entity,
            league_id,
            path,
            parent: None,
            priority: candidate.priority,
            cadence: candidate.cadence,
            deadline,
            week: candidate.week,
            week_is_final: candidate.week_is_final,
        })
    }
}

fn nearest_emitted_ancestor(emitted: &[SyncTask], entity: EntityKind) -> Option<SyncKey> {
    let mut cursor = entity.parent();
    while let Some(kind) = cursor {
        if let Some(task) = emitted.iter().find(|task| task.entity == kind) {
            return Some(task.key.clone());
        }
        cursor = kind.parent();
    }
    None
}
