//! Upstream payload records to normalized rows.

use std::collections::BTreeMap;

use serde_json::json;
use sleeper_core::{
    from_epoch_millis, ApiDraft, ApiDraftPick, ApiLeague, ApiMatchup, ApiNflState, ApiPlayer,
    ApiRoster, ApiTransaction, ApiUser, DraftPickRow, DraftRow, FaabTransferRow, LeagueRow,
    LeagueStatus, LeagueUserRow, MatchupRow, MoveKind, NflStateRow, ParticipantRow, PlayerRow,
    PlayerStatusValue, RosterRow, SeasonType, TradedPickRow, TransactionMoveRow, TransactionRow,
    UserRow,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("league {league_id} has no status")]
    MissingStatus { league_id: String },
    #[error("league {league_id} has unrecognized status `{status}`")]
    UnknownStatus { league_id: String, status: String },
}

pub fn league_row(api: &ApiLeague) -> Result<LeagueRow, TransformError> {
    let raw_status = api.status.as_deref().ok_or_else(|| TransformError::MissingStatus {
        league_id: api.league_id.clone(),
    })?;
    let status =
        LeagueStatus::from_upstream(raw_status).ok_or_else(|| TransformError::UnknownStatus {
            league_id: api.league_id.clone(),
            status: raw_status.to_string(),
        })?;

    Ok(LeagueRow {
        league_id: api.league_id.clone(),
        name: api.name.clone(),
        season: api.season.clone(),
        sport: api.sport.clone(),
        status,
        current_week: api.current_week(),
        last_scored_week: api.last_scored_week(),
        total_rosters: api.total_rosters,
        draft_id: api.draft_id.clone().filter(|id| !id.is_empty()),
        previous_league_id: api
            .previous_league_id
            .clone()
            .filter(|id| !id.is_empty() && id != "0"),
        metadata: json!({
            "settings": api.settings,
            "scoring_settings": api.scoring_settings,
            "roster_positions": api.roster_positions,
            "metadata": api.metadata,
        }),
    })
}

pub fn user_rows(league_id: &str, users: &[ApiUser]) -> (Vec<UserRow>, Vec<LeagueUserRow>) {
    users
        .iter()
        .map(|user| {
            (
                UserRow {
                    user_id: user.user_id.clone(),
                    username: user.username.clone(),
                    display_name: user.display_name.clone(),
                    avatar: user.avatar.clone(),
                    is_bot: user.is_bot.unwrap_or(false),
                },
                LeagueUserRow {
                    league_id: league_id.to_string(),
                    user_id: user.user_id.clone(),
                    team_name: user.team_name(),
                    is_commissioner: user.is_owner.unwrap_or(false),
                },
            )
        })
        .unzip()
}

/// A roster row together with every player it currently holds.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterSnapshot {
    pub row: RosterRow,
    pub players: Vec<String>,
}

pub fn roster_snapshot(league_id: &str, api: &ApiRoster) -> RosterSnapshot {
    let mut co_owners = api.co_owners.clone();
    co_owners.sort();
    co_owners.dedup();

    RosterSnapshot {
        row: RosterRow {
            league_id: league_id.to_string(),
            roster_number: api.roster_id,
            owner_id: api.owner_id.clone().filter(|id| !id.is_empty()),
            co_owners,
            wins: api.settings.wins,
            losses: api.settings.losses,
            ties: api.settings.ties,
            points_for: api.settings.points_for(),
            points_against: api.settings.points_against(),
            waiver_position: api.settings.waiver_position,
            waiver_budget_used: api.settings.waiver_budget_used,
            starters: api.starters.clone(),
            reserve: api.reserve.clone(),
            taxi: api.taxi.clone(),
        },
        players: api.players.clone(),
    }
}

pub fn matchup_rows(
    league_id: &str,
    week: u32,
    week_is_final: bool,
    entries: &[ApiMatchup],
) -> (Vec<MatchupRow>, Vec<ParticipantRow>) {
    let mut pairings: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    let mut participants = Vec::with_capacity(entries.len());

    for entry in entries {
        if let Some(matchup_id) = entry.matchup_id {
            pairings.entry(matchup_id).or_default().push(entry.roster_id);
        }
        participants.push(ParticipantRow {
            league_id: league_id.to_string(),
            week,
            roster_number: entry.roster_id,
            matchup_id: entry.matchup_id,
            points: entry.points.unwrap_or(0.0),
            custom_points: entry.custom_points,
            starters: entry.starters.clone(),
            starters_points: entry.starters_points.clone(),
            players_points: entry.players_points.clone(),
            is_final: week_is_final,
        });
    }

    let matchups = pairings
        .into_iter()
        .map(|(matchup_id, mut roster_numbers)| {
            roster_numbers.sort_unstable();
            MatchupRow {
                league_id: league_id.to_string(),
                week,
                matchup_id,
                roster_numbers,
                is_final: week_is_final,
            }
        })
        .collect();
    (matchups, participants)
}

/// A transaction and its insert-only children.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionBundle {
    pub transaction: TransactionRow,
    pub moves: Vec<TransactionMoveRow>,
    pub faab: Vec<FaabTransferRow>,
    pub picks: Vec<TradedPickRow>,
}

impl TransactionBundle {
    /// Every roster the transaction touches, including through its children.
    pub fn referenced_rosters(&self) -> Vec<u32> {
        let mut rosters: Vec<u32> = self
            .transaction
            .roster_numbers
            .iter()
            .copied()
            .chain(self.moves.iter().map(|m| m.roster_number))
            .chain(self.faab.iter().flat_map(|f| [f.sender, f.receiver]))
            .chain(self.picks.iter().map(|p| p.owner))
            .collect();
        rosters.sort_unstable();
        rosters.dedup();
        rosters
    }
}

pub fn transaction_bundle(league_id: &str, week: u32, api: &ApiTransaction) -> TransactionBundle {
    let tx_id = &api.transaction_id;
    let mut roster_numbers = api.roster_ids.clone();
    roster_numbers.sort_unstable();
    roster_numbers.dedup();

    let moves = api
        .adds
        .iter()
        .map(|(player, roster)| (MoveKind::Add, player, *roster))
        .chain(api.drops.iter().map(|(player, roster)| (MoveKind::Drop, player, *roster)))
        .map(|(move_kind, player_id, roster_number)| TransactionMoveRow {
            transaction_id: tx_id.clone(),
            move_kind,
            player_id: player_id.clone(),
            roster_number,
        })
        .collect();

    let faab = api
        .waiver_budget
        .iter()
        .enumerate()
        .map(|(seq, budget)| FaabTransferRow {
            transaction_id: tx_id.clone(),
            seq: seq as u32,
            sender: budget.sender,
            receiver: budget.receiver,
            amount: budget.amount,
        })
        .collect();

    let picks = api
        .draft_picks
        .iter()
        .map(|pick| TradedPickRow {
            transaction_id: tx_id.clone(),
            season: pick.season.clone(),
            round: pick.round,
            original_roster: pick.roster_id,
            previous_owner: pick.previous_owner_id,
            owner: pick.owner_id,
        })
        .collect();

    TransactionBundle {
        transaction: TransactionRow {
            transaction_id: tx_id.clone(),
            league_id: league_id.to_string(),
            kind: api.kind.clone(),
            status: api.status.clone(),
            week: Some(api.leg.unwrap_or(week)),
            roster_numbers,
            creator: api.creator.clone(),
            waiver_bid: api.waiver_bid(),
            created_at: api.created.and_then(from_epoch_millis),
            status_updated_at: api.status_updated.and_then(from_epoch_millis),
        },
        moves,
        faab,
        picks,
    }
}

pub fn draft_row(api: &ApiDraft) -> DraftRow {
    DraftRow {
        draft_id: api.draft_id.clone(),
        league_id: api.league_id.clone(),
        status: api.status.clone(),
        kind: api.kind.clone(),
        season: api.season.clone(),
        start_time: api.start_time.and_then(from_epoch_millis),
        settings: json!({
            "settings": api.settings,
            "draft_order": api.draft_order,
        }),
    }
}

/// Picks without a selected player are not yet made and are left out.
pub fn draft_pick_rows(draft_id: &str, picks: &[ApiDraftPick]) -> Vec<DraftPickRow> {
    picks
        .iter()
        .filter(|pick| pick.player_id.as_deref().is_some_and(|id| !id.is_empty()))
        .map(|pick| DraftPickRow {
            draft_id: draft_id.to_string(),
            pick_no: pick.pick_no,
            round: pick.round,
            roster_number: pick.roster_id,
            player_id: pick.player_id.clone(),
            picked_by: pick.picked_by.clone().filter(|id| !id.is_empty()),
            draft_slot: pick.draft_slot,
            is_keeper: pick.is_keeper.unwrap_or(false),
        })
        .collect()
}

pub fn player_rows(api: &ApiPlayer) -> (PlayerRow, PlayerStatusValue) {
    (
        PlayerRow {
            player_id: api.player_id.clone(),
            first_name: api.first_name.clone(),
            last_name: api.last_name.clone(),
            full_name: api.full_name.clone(),
            age: api.age,
            years_exp: api.years_exp,
            college: api.college.clone(),
            height: api.height.clone(),
            weight: api.weight.clone(),
            birth_date: api.birth_date.clone(),
            number: api.number,
            fantasy_positions: api.fantasy_positions.clone(),
        },
        PlayerStatusValue {
            team: api.team.clone(),
            position: api.position.clone(),
            depth_chart_position: api.depth_chart_position.clone(),
            depth_chart_order: api.depth_chart_order,
            status: api.status.clone(),
            injury_status: api.injury_status.clone(),
            injury_body_part: api.injury_body_part.clone(),
            active: api.active.unwrap_or(false),
        },
    )
}

/// An unrecognized season type is kept as unknown rather than rejected.
pub fn nfl_state_row(api: &ApiNflState) -> NflStateRow {
    NflStateRow {
        season: api.season.clone(),
        season_type: api.season_type.as_deref().and_then(SeasonType::from_upstream),
        week: api.week,
        display_week: api.display_week,
        previous_season: api.previous_season.clone(),
        season_start_date: api.season_start_date.clone().filter(|date| !date.is_empty()),
        league_season: api.league_season.clone(),
        league_create_season: api.league_create_season.clone(),
    }
}
