//! Upsert/merge engine.
//!
//! Each [`MergeGroup`] is written in one store transaction. Simple rows are
//! compare-and-swap upserts, temporal attributes are reconciled by closing
//! the open interval and opening a new one at the observation time, and
//! immutable rows are insert-if-absent. Children whose parent row is not
//! present yet are counted as deferred and left for the next pass.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use sleeper_core::{
    roster_key, DraftPickRow, DraftRow, Interval, LeagueRow, LeagueUserRow, MatchupRow,
    NflStateRow, ParticipantRow, PlayerRow, PlayerStatusValue, Record, Table, TemporalKind, UserRow,
    NFL_SCOPE,
};
use sleeper_store::{NewInterval, RelationalStore, StoreError, StoreTx, UpsertOutcome};
use thiserror::Error;
use tracing::{debug, warn};

use crate::transform::{RosterSnapshot, TransactionBundle};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("encoding row for {table}: {source}")]
    Encode {
        table: Table,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeResult {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deferred: usize,
    pub intervals_opened: usize,
    pub intervals_closed: usize,
    /// Upstream records that failed validation before reaching the engine.
    pub rejected: usize,
}

impl MergeResult {
    fn count(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn writes(&self) -> usize {
        self.inserted + self.updated + self.intervals_opened + self.intervals_closed
    }
}

/// One logical unit written atomically.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeGroup {
    League(LeagueRow),
    Users {
        users: Vec<UserRow>,
        members: Vec<LeagueUserRow>,
    },
    Rosters {
        league_id: String,
        rosters: Vec<RosterSnapshot>,
    },
    Matchups {
        matchups: Vec<MatchupRow>,
        participants: Vec<ParticipantRow>,
    },
    Transactions(Vec<TransactionBundle>),
    Draft(DraftRow),
    DraftPicks {
        draft_id: String,
        picks: Vec<DraftPickRow>,
    },
    Players(Vec<(PlayerRow, PlayerStatusValue)>),
    NflState(NflStateRow),
}

impl MergeGroup {
    pub fn label(&self) -> &'static str {
        match self {
            Self::League(_) => "league",
            Self::Users { .. } => "users",
            Self::Rosters { .. } => "rosters",
            Self::Matchups { .. } => "matchups",
            Self::Transactions(_) => "transactions",
            Self::Draft(_) => "draft",
            Self::DraftPicks { .. } => "draft_picks",
            Self::Players(_) => "players",
            Self::NflState(_) => "nfl_state",
        }
    }
}

fn encode<R: Record>(row: &R) -> Result<JsonValue, MergeError> {
    serde_json::to_value(row).map_err(|source| MergeError::Encode {
        table: R::TABLE,
        source,
    })
}

async fn upsert<R: Record>(tx: &mut dyn StoreTx, row: &R) -> Result<UpsertOutcome, MergeError> {
    let data = encode(row)?;
    Ok(tx.upsert_if_changed(R::TABLE, &row.key(), &data).await?)
}

async fn insert_once<R: Record>(tx: &mut dyn StoreTx, row: &R) -> Result<UpsertOutcome, MergeError> {
    let data = encode(row)?;
    Ok(if tx.insert_if_absent(R::TABLE, &row.key(), &data).await? {
        UpsertOutcome::Inserted
    } else {
        UpsertOutcome::Unchanged
    })
}

/// Transaction lifecycle rank; a status may only move to a higher rank.
fn status_rank(status: &str) -> u8 {
    match status {
        "complete" | "failed" => 2,
        "pending" => 1,
        _ => 0,
    }
}

/// Desired state of one temporal subject.
struct Observation {
    subject: String,
    value: JsonValue,
}

#[derive(Clone)]
pub struct MergeEngine {
    store: Arc<dyn RelationalStore>,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self { store }
    }

    pub async fn apply(
        &self,
        group: &MergeGroup,
        observed_at: DateTime<Utc>,
    ) -> Result<MergeResult, MergeError> {
        let mut tx = self.store.begin().await?;
        let mut result = MergeResult::default();

        if let Err(err) = self.stage(tx.as_mut(), group, observed_at, &mut result).await {
            if let Err(rollback) = tx.rollback().await {
                warn!(group = group.label(), error = %rollback, "rollback failed");
            }
            return Err(err);
        }

        tx.commit().await?;
        debug!(
            group = group.label(),
            inserted = result.inserted,
            updated = result.updated,
            unchanged = result.unchanged,
            deferred = result.deferred,
            "merged group"
        );
        Ok(result)
    }

    async fn stage(
        &self,
        tx: &mut dyn StoreTx,
        group: &MergeGroup,
        observed_at: DateTime<Utc>,
        result: &mut MergeResult,
    ) -> Result<(), MergeError> {
        match group {
            MergeGroup::League(row) => {
                result.count(upsert(tx, row).await?);
            }
            MergeGroup::Users { users, members } => {
                for user in users {
                    result.count(upsert(tx, user).await?);
                }
                for member in members {
                    result.count(upsert(tx, member).await?);
                }
            }
            MergeGroup::Rosters { league_id, rosters } => {
                self.merge_rosters(tx, league_id, rosters, observed_at, result).await?;
            }
            MergeGroup::Matchups {
                matchups,
                participants,
            } => {
                self.merge_matchups(tx, matchups, participants, result).await?;
            }
            MergeGroup::Transactions(bundles) => {
                self.merge_transactions(tx, bundles, result).await?;
            }
            MergeGroup::Draft(row) => {
                result.count(upsert(tx, row).await?);
            }
            MergeGroup::NflState(row) => {
                result.count(upsert(tx, row).await?);
            }
            MergeGroup::DraftPicks { draft_id, picks } => {
                if tx.row_exists(Table::Drafts, draft_id).await? {
                    for pick in picks {
                        result.count(insert_once(tx, pick).await?);
                    }
                } else if !picks.is_empty() {
                    warn!(%draft_id, picks = picks.len(), "draft not stored yet; deferring picks");
                    result.deferred += picks.len();
                }
            }
            MergeGroup::Players(players) => {
                let mut observed = Vec::with_capacity(players.len());
                for (player, status) in players {
                    result.count(upsert(tx, player).await?);
                    observed.push(Observation {
                        subject: player.player_id.clone(),
                        value: serde_json::to_value(status).map_err(|source| {
                            MergeError::Encode {
                                table: Table::Players,
                                source,
                            }
                        })?,
                    });
                }
                reconcile_intervals(
                    tx,
                    TemporalKind::PlayerStatus,
                    NFL_SCOPE,
                    observed,
                    false,
                    observed_at,
                    result,
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn merge_rosters(
        &self,
        tx: &mut dyn StoreTx,
        league_id: &str,
        rosters: &[RosterSnapshot],
        observed_at: DateTime<Utc>,
        result: &mut MergeResult,
    ) -> Result<(), MergeError> {
        let mut owners = Vec::new();
        let mut deferred_subjects = Vec::new();
        let mut members: BTreeMap<String, u32> = BTreeMap::new();

        for roster in rosters {
            let row = &roster.row;
            result.count(upsert(tx, row).await?);

            let subject = row.roster_number.to_string();
            match &row.owner_id {
                Some(owner) if tx.row_exists(Table::Users, owner).await? => owners.push(Observation {
                    subject,
                    value: json!(owner),
                }),
                Some(owner) => {
                    warn!(league_id, roster = row.roster_number, %owner, "owner not stored yet; deferring ownership");
                    result.deferred += 1;
                    deferred_subjects.push(subject);
                }
                None => {}
            }

            for player in &roster.players {
                if let Some(previous) = members.insert(player.clone(), row.roster_number) {
                    warn!(league_id, %player, previous, current = row.roster_number, "player listed on two rosters");
                }
            }
        }

        // Deferred owners keep whatever interval is open today.
        let open = tx.open_intervals(TemporalKind::RosterOwnership, league_id).await?;
        for interval in open {
            if deferred_subjects.contains(&interval.subject) {
                owners.push(Observation {
                    subject: interval.subject.clone(),
                    value: interval.value.clone(),
                });
            }
        }
        reconcile_intervals(
            tx,
            TemporalKind::RosterOwnership,
            league_id,
            owners,
            true,
            observed_at,
            result,
        )
        .await?;

        let memberships = members
            .into_iter()
            .map(|(player, roster)| Observation {
                subject: player,
                value: json!(roster),
            })
            .collect();
        reconcile_intervals(
            tx,
            TemporalKind::RosterMembership,
            league_id,
            memberships,
            true,
            observed_at,
            result,
        )
        .await
    }

    async fn merge_matchups(
        &self,
        tx: &mut dyn StoreTx,
        matchups: &[MatchupRow],
        participants: &[ParticipantRow],
        result: &mut MergeResult,
    ) -> Result<(), MergeError> {
        for matchup in matchups {
            if is_final_in_store(tx, Table::Matchups, &matchup.key()).await? {
                result.unchanged += 1;
                continue;
            }
            result.count(upsert(tx, matchup).await?);
        }

        for participant in participants {
            let roster = roster_key(&participant.league_id, participant.roster_number);
            if !tx.row_exists(Table::Rosters, &roster).await? {
                warn!(%roster, week = participant.week, "roster not stored yet; deferring participant");
                result.deferred += 1;
                continue;
            }
            if is_final_in_store(tx, Table::MatchupParticipants, &participant.key()).await? {
                result.unchanged += 1;
                continue;
            }
            result.count(upsert(tx, participant).await?);
        }
        Ok(())
    }

    async fn merge_transactions(
        &self,
        tx: &mut dyn StoreTx,
        bundles: &[TransactionBundle],
        result: &mut MergeResult,
    ) -> Result<(), MergeError> {
        'bundles: for bundle in bundles {
            let row = &bundle.transaction;
            for roster in bundle.referenced_rosters() {
                if !tx.row_exists(Table::Rosters, &roster_key(&row.league_id, roster)).await? {
                    warn!(
                        transaction_id = %row.transaction_id,
                        roster,
                        "roster not stored yet; deferring transaction"
                    );
                    result.deferred += 1;
                    continue 'bundles;
                }
            }

            let existing = tx.load_row(Table::Transactions, &row.key()).await?;
            let Some(existing) = existing else {
                result.count(insert_once(tx, row).await?);
                for child in &bundle.moves {
                    result.count(insert_once(tx, child).await?);
                }
                for child in &bundle.faab {
                    result.count(insert_once(tx, child).await?);
                }
                for child in &bundle.picks {
                    result.count(insert_once(tx, child).await?);
                }
                continue;
            };

            let stored_status = existing
                .get("status")
                .and_then(JsonValue::as_str)
                .unwrap_or_default();
            if status_rank(&row.status) > status_rank(stored_status) {
                let patch = json!({
                    "status": row.status,
                    "status_updated_at": row.status_updated_at,
                });
                if tx.update_fields(Table::Transactions, &row.key(), &patch).await? {
                    result.updated += 1;
                    continue;
                }
            } else if row.status != stored_status {
                debug!(
                    transaction_id = %row.transaction_id,
                    stored = stored_status,
                    observed = %row.status,
                    "ignoring backward status change"
                );
            }
            result.unchanged += 1;
        }
        Ok(())
    }
}

async fn is_final_in_store(tx: &mut dyn StoreTx, table: Table, key: &str) -> Result<bool, MergeError> {
    Ok(tx
        .load_row(table, key)
        .await?
        .and_then(|row| row.get("is_final").and_then(JsonValue::as_bool))
        .unwrap_or(false))
}

/// Brings the open intervals of `(kind, scope)` in line with `observed`:
/// equal values are left alone, differing ones are closed and reopened at
/// `observed_at`. With `close_missing`, subjects absent from `observed` have
/// their open interval closed.
async fn reconcile_intervals(
    tx: &mut dyn StoreTx,
    kind: TemporalKind,
    scope: &str,
    observed: Vec<Observation>,
    close_missing: bool,
    observed_at: DateTime<Utc>,
    result: &mut MergeResult,
) -> Result<(), MergeError> {
    let open = tx.open_intervals(kind, scope).await?;
    let mut open_by_subject: HashMap<String, Interval> = open
        .into_iter()
        .filter(|interval| interval.is_primary)
        .map(|interval| (interval.subject.clone(), interval))
        .collect();

    for observation in observed {
        match open_by_subject.remove(&observation.subject) {
            Some(current) if current.value == observation.value => {}
            Some(current) => {
                tx.close_interval(current.id, observed_at).await?;
                result.intervals_closed += 1;
                open_new(tx, kind, scope, observation, observed_at, result).await?;
            }
            None => open_new(tx, kind, scope, observation, observed_at, result).await?,
        }
    }

    if close_missing {
        for (_, stale) in open_by_subject {
            tx.close_interval(stale.id, observed_at).await?;
            result.intervals_closed += 1;
        }
    }
    Ok(())
}

async fn open_new(
    tx: &mut dyn StoreTx,
    kind: TemporalKind,
    scope: &str,
    observation: Observation,
    observed_at: DateTime<Utc>,
    result: &mut MergeResult,
) -> Result<(), MergeError> {
    tx.open_interval(NewInterval {
        kind,
        scope: scope.to_string(),
        subject: observation.subject,
        value: observation.value,
        is_primary: true,
        valid_from: observed_at,
    })
    .await?;
    result.intervals_opened += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sleeper_core::{LeagueStatus, RosterRow, TransactionRow};
    use sleeper_store::MemoryStore;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 4, hour, 0, 0).single().expect("ts")
    }

    fn user(id: &str) -> UserRow {
        UserRow {
            user_id: id.to_string(),
            username: Some(id.to_string()),
            display_name: None,
            avatar: None,
            is_bot: false,
        }
    }

    fn roster(number: u32, owner: Option<&str>, players: &[&str]) -> RosterSnapshot {
        RosterSnapshot {
            row: RosterRow {
                league_id: "L1".to_string(),
                roster_number: number,
                owner_id: owner.map(ToString::to_string),
                co_owners: Vec::new(),
                wins: 0,
                losses: 0,
                ties: 0,
                points_for: 0.0,
                points_against: 0.0,
                waiver_position: None,
                waiver_budget_used: None,
                starters: Vec::new(),
                reserve: Vec::new(),
                taxi: Vec::new(),
            },
            players: players.iter().map(ToString::to_string).collect(),
        }
    }

    fn transaction(id: &str, status: &str, rosters: &[u32]) -> TransactionBundle {
        TransactionBundle {
            transaction: TransactionRow {
                transaction_id: id.to_string(),
                league_id: "L1".to_string(),
                kind: "waiver".to_string(),
                status: status.to_string(),
                week: Some(3),
                roster_numbers: rosters.to_vec(),
                creator: None,
                waiver_bid: None,
                created_at: None,
                status_updated_at: None,
            },
            moves: Vec::new(),
            faab: Vec::new(),
            picks: Vec::new(),
        }
    }

    async fn seed_users(engine: &MergeEngine, ids: &[&str]) {
        engine
            .apply(
                &MergeGroup::Users {
                    users: ids.iter().map(|id| user(id)).collect(),
                    members: Vec::new(),
                },
                at(1),
            )
            .await
            .expect("users");
    }

    #[tokio::test]
    async fn league_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let engine = MergeEngine::new(Arc::new(store.clone()));
        let league = MergeGroup::League(LeagueRow {
            league_id: "L1".to_string(),
            name: Some("Dynasty".to_string()),
            season: Some("2026".to_string()),
            sport: Some("nfl".to_string()),
            status: LeagueStatus::InSeason,
            current_week: Some(5),
            last_scored_week: Some(4),
            total_rosters: Some(12),
            draft_id: None,
            previous_league_id: None,
            metadata: json!({}),
        });

        let first = engine.apply(&league, at(1)).await.expect("first");
        let second = engine.apply(&league, at(2)).await.expect("second");
        assert_eq!(first.inserted, 1);
        assert_eq!(second.unchanged, 1);
        assert_eq!(second.writes(), 0);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn failed_write_rolls_back_the_whole_group() {
        let store = MemoryStore::new();
        let engine = MergeEngine::new(Arc::new(store.clone()));
        seed_users(&engine, &["u1", "u2"]).await;
        let writes = store.write_count();

        let group = MergeGroup::Rosters {
            league_id: "L1".to_string(),
            rosters: vec![roster(1, Some("u1"), &["p1"]), roster(2, Some("u2"), &["p2"])],
        };
        store.fail_next_write();
        let err = engine.apply(&group, at(2)).await.unwrap_err();

        assert!(matches!(err, MergeError::Store(StoreError::Constraint(_))));
        assert_eq!(store.rollback_count(), 1);
        assert_eq!(store.write_count(), writes);
        assert_eq!(store.row_count(Table::Rosters).await, 0);
    }

    #[tokio::test]
    async fn roster_moves_close_then_open_membership() {
        let store = MemoryStore::new();
        let engine = MergeEngine::new(Arc::new(store.clone()));
        seed_users(&engine, &["u1", "u2"]).await;

        let week1 = MergeGroup::Rosters {
            league_id: "L1".to_string(),
            rosters: vec![roster(1, Some("u1"), &["p1", "p2"]), roster(2, Some("u2"), &["p3"])],
        };
        let r = engine.apply(&week1, at(2)).await.expect("initial");
        assert_eq!(r.intervals_opened, 5);

        let week2 = MergeGroup::Rosters {
            league_id: "L1".to_string(),
            rosters: vec![roster(1, Some("u1"), &["p1"]), roster(2, Some("u2"), &["p3", "p2"])],
        };
        let r = engine.apply(&week2, at(3)).await.expect("move");
        assert_eq!((r.intervals_closed, r.intervals_opened), (1, 1));

        let history: Vec<Interval> = store
            .intervals(TemporalKind::RosterMembership, "L1")
            .await
            .into_iter()
            .filter(|i| i.subject == "p2")
            .collect();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].valid_to, Some(at(3)));
        assert_eq!(history[1].value, json!(2));
        assert!(history[1].is_open());
    }

    #[tokio::test]
    async fn released_player_membership_is_closed() {
        let store = MemoryStore::new();
        let engine = MergeEngine::new(Arc::new(store.clone()));
        seed_users(&engine, &["u1"]).await;

        let with = MergeGroup::Rosters {
            league_id: "L1".to_string(),
            rosters: vec![roster(1, Some("u1"), &["p1", "p2"])],
        };
        let without = MergeGroup::Rosters {
            league_id: "L1".to_string(),
            rosters: vec![roster(1, Some("u1"), &["p1"])],
        };
        engine.apply(&with, at(2)).await.expect("with");
        let r = engine.apply(&without, at(4)).await.expect("without");

        assert_eq!((r.intervals_closed, r.intervals_opened), (1, 0));
        let open: Vec<Interval> = store
            .intervals(TemporalKind::RosterMembership, "L1")
            .await
            .into_iter()
            .filter(Interval::is_open)
            .collect();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].subject, "p1");
    }

    #[tokio::test]
    async fn ownership_for_unknown_user_is_deferred() {
        let store = MemoryStore::new();
        let engine = MergeEngine::new(Arc::new(store.clone()));

        let group = MergeGroup::Rosters {
            league_id: "L1".to_string(),
            rosters: vec![roster(1, Some("ghost"), &[])],
        };
        let r = engine.apply(&group, at(2)).await.expect("rosters");

        assert_eq!(r.deferred, 1);
        assert_eq!(r.inserted, 1);
        assert!(store
            .intervals(TemporalKind::RosterOwnership, "L1")
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn transactions_wait_for_rosters_and_only_move_forward() {
        let store = MemoryStore::new();
        let engine = MergeEngine::new(Arc::new(store.clone()));
        seed_users(&engine, &["u1"]).await;

        let pending = MergeGroup::Transactions(vec![transaction("t1", "pending", &[1])]);
        let r = engine.apply(&pending, at(2)).await.expect("deferred");
        assert_eq!(r.deferred, 1);
        assert_eq!(store.row_count(Table::Transactions).await, 0);

        engine
            .apply(
                &MergeGroup::Rosters {
                    league_id: "L1".to_string(),
                    rosters: vec![roster(1, Some("u1"), &[])],
                },
                at(2),
            )
            .await
            .expect("rosters");
        let r = engine.apply(&pending, at(3)).await.expect("insert");
        assert_eq!(r.inserted, 1);

        let complete = MergeGroup::Transactions(vec![transaction("t1", "complete", &[1])]);
        let r = engine.apply(&complete, at(4)).await.expect("advance");
        assert_eq!(r.updated, 1);

        let r = engine.apply(&pending, at(5)).await.expect("regress");
        assert_eq!(r.unchanged, 1);
        let stored = store.row(Table::Transactions, "t1").await.expect("row");
        assert_eq!(stored.data["status"], json!("complete"));
    }

    #[tokio::test]
    async fn final_matchups_are_immutable() {
        let store = MemoryStore::new();
        let engine = MergeEngine::new(Arc::new(store.clone()));
        let matchup = |points_marker: u32, is_final: bool| MatchupRow {
            league_id: "L1".to_string(),
            week: 2,
            matchup_id: 1,
            roster_numbers: vec![1, points_marker],
            is_final,
        };

        engine
            .apply(
                &MergeGroup::Matchups {
                    matchups: vec![matchup(2, true)],
                    participants: Vec::new(),
                },
                at(1),
            )
            .await
            .expect("final");
        let r = engine
            .apply(
                &MergeGroup::Matchups {
                    matchups: vec![matchup(3, true)],
                    participants: Vec::new(),
                },
                at(2),
            )
            .await
            .expect("rewrite");

        assert_eq!(r.unchanged, 1);
        let stored = store.row(Table::Matchups, "L1:2:1").await.expect("row");
        assert_eq!(stored.data["roster_numbers"], json!([1, 2]));
    }

    #[tokio::test]
    async fn player_status_changes_are_versioned() {
        let store = MemoryStore::new();
        let engine = MergeEngine::new(Arc::new(store.clone()));
        let player = |injury: Option<&str>| {
            (
                PlayerRow {
                    player_id: "4046".to_string(),
                    first_name: Some("Pat".to_string()),
                    last_name: None,
                    full_name: None,
                    age: None,
                    years_exp: None,
                    college: None,
                    height: None,
                    weight: None,
                    birth_date: None,
                    number: None,
                    fantasy_positions: vec!["QB".to_string()],
                },
                PlayerStatusValue {
                    team: Some("KC".to_string()),
                    position: Some("QB".to_string()),
                    depth_chart_position: None,
                    depth_chart_order: Some(1),
                    status: Some("Active".to_string()),
                    injury_status: injury.map(ToString::to_string),
                    injury_body_part: None,
                    active: true,
                },
            )
        };

        engine
            .apply(&MergeGroup::Players(vec![player(None)]), at(1))
            .await
            .expect("first");
        let same = engine
            .apply(&MergeGroup::Players(vec![player(None)]), at(2))
            .await
            .expect("same");
        let hurt = engine
            .apply(&MergeGroup::Players(vec![player(Some("Questionable"))]), at(3))
            .await
            .expect("hurt");
        let missing = engine
            .apply(&MergeGroup::Players(Vec::new()), at(4))
            .await
            .expect("missing");

        assert_eq!(same.writes(), 0);
        assert_eq!((hurt.intervals_closed, hurt.intervals_opened), (1, 1));
        assert_eq!(hurt.unchanged, 1);
        assert_eq!(missing.intervals_closed, 0);
    }

    #[tokio::test]
    async fn picks_wait_for_their_draft() {
        let store = MemoryStore::new();
        let engine = MergeEngine::new(Arc::new(store.clone()));
        let picks = MergeGroup::DraftPicks {
            draft_id: "d1".to_string(),
            picks: vec![DraftPickRow {
                draft_id: "d1".to_string(),
                pick_no: 1,
                round: 1,
                roster_number: Some(1),
                player_id: Some("4046".to_string()),
                picked_by: None,
                draft_slot: Some(1),
                is_keeper: false,
            }],
        };

        let r = engine.apply(&picks, at(1)).await.expect("deferred");
        assert_eq!(r.deferred, 1);

        engine
            .apply(
                &MergeGroup::Draft(DraftRow {
                    draft_id: "d1".to_string(),
                    league_id: Some("L1".to_string()),
                    status: Some("drafting".to_string()),
                    kind: Some("snake".to_string()),
                    season: Some("2026".to_string()),
                    start_time: None,
                    settings: json!({}),
                }),
                at(1),
            )
            .await
            .expect("draft");
        let r = engine.apply(&picks, at(2)).await.expect("picks");
        assert_eq!(r.inserted, 1);
        let r = engine.apply(&picks, at(3)).await.expect("again");
        assert_eq!(r.unchanged, 1);
    }
}
