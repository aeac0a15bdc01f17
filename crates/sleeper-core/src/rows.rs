//! Normalized rows written by the merge engine.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::entity::LeagueStatus;

/// Store tables holding simple (non-temporal) rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Leagues,
    Users,
    LeagueUsers,
    Rosters,
    Matchups,
    MatchupParticipants,
    Transactions,
    TransactionMoves,
    FaabTransfers,
    TradedPicks,
    Drafts,
    DraftPicks,
    Players,
    NflState,
}

impl Table {
    pub const ALL: [Table; 14] = [
        Self::Leagues,
        Self::Users,
        Self::LeagueUsers,
        Self::Rosters,
        Self::Matchups,
        Self::MatchupParticipants,
        Self::Transactions,
        Self::TransactionMoves,
        Self::FaabTransfers,
        Self::TradedPicks,
        Self::Drafts,
        Self::DraftPicks,
        Self::Players,
        Self::NflState,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Leagues => "leagues",
            Self::Users => "users",
            Self::LeagueUsers => "league_users",
            Self::Rosters => "rosters",
            Self::Matchups => "matchups",
            Self::MatchupParticipants => "matchup_participants",
            Self::Transactions => "transactions",
            Self::TransactionMoves => "transaction_moves",
            Self::FaabTransfers => "faab_transfers",
            Self::TradedPicks => "traded_picks",
            Self::Drafts => "drafts",
            Self::DraftPicks => "draft_picks",
            Self::Players => "players",
            Self::NflState => "nfl_state",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row with a natural key in one of the store tables.
pub trait Record: Serialize {
    const TABLE: Table;

    fn key(&self) -> String;
}

pub fn roster_key(league_id: &str, roster_number: u32) -> String {
    format!("{league_id}:{roster_number}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueRow {
    pub league_id: String,
    pub name: Option<String>,
    pub season: Option<String>,
    pub sport: Option<String>,
    pub status: LeagueStatus,
    pub current_week: Option<u32>,
    pub last_scored_week: Option<u32>,
    pub total_rosters: Option<u32>,
    pub draft_id: Option<String>,
    pub previous_league_id: Option<String>,
    pub metadata: JsonValue,
}

impl Record for LeagueRow {
    const TABLE: Table = Table::Leagues;

    fn key(&self) -> String {
        self.league_id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRow {
    pub user_id: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub is_bot: bool,
}

impl Record for UserRow {
    const TABLE: Table = Table::Users;

    fn key(&self) -> String {
        self.user_id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueUserRow {
    pub league_id: String,
    pub user_id: String,
    pub team_name: Option<String>,
    pub is_commissioner: bool,
}

impl Record for LeagueUserRow {
    const TABLE: Table = Table::LeagueUsers;

    fn key(&self) -> String {
        format!("{}:{}", self.league_id, self.user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterRow {
    pub league_id: String,
    pub roster_number: u32,
    pub owner_id: Option<String>,
    pub co_owners: Vec<String>,
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
    pub points_for: f64,
    pub points_against: f64,
    pub waiver_position: Option<u32>,
    pub waiver_budget_used: Option<u32>,
    pub starters: Vec<String>,
    pub reserve: Vec<String>,
    pub taxi: Vec<String>,
}

impl Record for RosterRow {
    const TABLE: Table = Table::Rosters;

    fn key(&self) -> String {
        roster_key(&self.league_id, self.roster_number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchupRow {
    pub league_id: String,
    pub week: u32,
    pub matchup_id: u32,
    pub roster_numbers: Vec<u32>,
    pub is_final: bool,
}

impl Record for MatchupRow {
    const TABLE: Table = Table::Matchups;

    fn key(&self) -> String {
        format!("{}:{}:{}", self.league_id, self.week, self.matchup_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRow {
    pub league_id: String,
    pub week: u32,
    pub roster_number: u32,
    pub matchup_id: Option<u32>,
    pub points: f64,
    pub custom_points: Option<f64>,
    pub starters: Vec<String>,
    pub starters_points: Vec<f64>,
    pub players_points: BTreeMap<String, f64>,
    pub is_final: bool,
}

impl Record for ParticipantRow {
    const TABLE: Table = Table::MatchupParticipants;

    fn key(&self) -> String {
        format!("{}:{}:{}", self.league_id, self.week, self.roster_number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub transaction_id: String,
    pub league_id: String,
    pub kind: String,
    pub status: String,
    pub week: Option<u32>,
    pub roster_numbers: Vec<u32>,
    pub creator: Option<String>,
    pub waiver_bid: Option<u32>,
    pub created_at: Option<DateTime<Utc>>,
    pub status_updated_at: Option<DateTime<Utc>>,
}

impl Record for TransactionRow {
    const TABLE: Table = Table::Transactions;

    fn key(&self) -> String {
        self.transaction_id.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveKind {
    Add,
    Drop,
}

impl MoveKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Drop => "drop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionMoveRow {
    pub transaction_id: String,
    pub move_kind: MoveKind,
    pub player_id: String,
    pub roster_number: u32,
}

impl Record for TransactionMoveRow {
    const TABLE: Table = Table::TransactionMoves;

    fn key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.transaction_id,
            self.move_kind.as_str(),
            self.player_id
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaabTransferRow {
    pub transaction_id: String,
    pub seq: u32,
    pub sender: u32,
    pub receiver: u32,
    pub amount: u32,
}

impl Record for FaabTransferRow {
    const TABLE: Table = Table::FaabTransfers;

    fn key(&self) -> String {
        format!("{}:faab:{}", self.transaction_id, self.seq)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradedPickRow {
    pub transaction_id: String,
    pub season: String,
    pub round: u32,
    pub original_roster: u32,
    pub previous_owner: Option<u32>,
    pub owner: u32,
}

impl Record for TradedPickRow {
    const TABLE: Table = Table::TradedPicks;

    fn key(&self) -> String {
        format!(
            "{}:pick:{}:{}:{}",
            self.transaction_id, self.season, self.round, self.original_roster
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftRow {
    pub draft_id: String,
    pub league_id: Option<String>,
    pub status: Option<String>,
    pub kind: Option<String>,
    pub season: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub settings: JsonValue,
}

impl Record for DraftRow {
    const TABLE: Table = Table::Drafts;

    fn key(&self) -> String {
        self.draft_id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftPickRow {
    pub draft_id: String,
    pub pick_no: u32,
    pub round: u32,
    pub roster_number: Option<u32>,
    pub player_id: Option<String>,
    pub picked_by: Option<String>,
    pub draft_slot: Option<u32>,
    pub is_keeper: bool,
}

impl Record for DraftPickRow {
    const TABLE: Table = Table::DraftPicks;

    fn key(&self) -> String {
        format!("{}:{}", self.draft_id, self.pick_no)
    }
}

/// Static player identity; mutable status lives in [`PlayerStatusValue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRow {
    pub player_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub age: Option<u32>,
    pub years_exp: Option<u32>,
    pub college: Option<String>,
    pub height: Option<String>,
    pub weight: Option<String>,
    pub birth_date: Option<String>,
    pub number: Option<u32>,
    pub fantasy_positions: Vec<String>,
}

impl Record for PlayerRow {
    const TABLE: Table = Table::Players;

    fn key(&self) -> String {
        self.player_id.clone()
    }
}

/// Phase of the NFL calendar; planning treats `Regular` and `Post` as live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonType {
    Pre,
    Regular,
    Post,
    Off,
}

impl SeasonType {
    pub fn from_upstream(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pre" => Some(Self::Pre),
            "regular" => Some(Self::Regular),
            "post" => Some(Self::Post),
            "off" => Some(Self::Off),
            _ => None,
        }
    }

    pub fn has_games(self) -> bool {
        matches!(self, Self::Regular | Self::Post)
    }
}

/// Single row keyed by [`crate::NFL_SCOPE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NflStateRow {
    pub season: String,
    pub season_type: Option<SeasonType>,
    pub week: u32,
    pub display_week: Option<u32>,
    pub previous_season: Option<String>,
    pub season_start_date: Option<String>,
    pub league_season: Option<String>,
    pub league_create_season: Option<String>,
}

impl Record for NflStateRow {
    const TABLE: Table = Table::NflState;

    fn key(&self) -> String {
        crate::NFL_SCOPE.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatusValue {
    pub team: Option<String>,
    pub position: Option<String>,
    pub depth_chart_position: Option<String>,
    pub depth_chart_order: Option<u32>,
    pub status: Option<String>,
    pub injury_status: Option<String>,
    pub injury_body_part: Option<String>,
    pub active: bool,
}

/// Attributes tracked with `valid_from`/`valid_to` history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalKind {
    /// scope = league, subject = roster number, value = owner user id
    RosterOwnership,
    /// scope = league, subject = player id, value = roster number
    RosterMembership,
    /// scope = `nfl`, subject = player id, value = [`PlayerStatusValue`]
    PlayerStatus,
}

impl TemporalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RosterOwnership => "roster_ownership",
            Self::RosterMembership => "roster_membership",
            Self::PlayerStatus => "player_status",
        }
    }
}

impl fmt::Display for TemporalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One interval-valid fact. `valid_to == None` means currently true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub id: i64,
    pub kind: TemporalKind,
    pub scope: String,
    pub subject: String,
    pub value: JsonValue,
    pub is_primary: bool,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl Interval {
    pub fn is_open(&self) -> bool {
        self.valid_to.is_none()
    }
}
