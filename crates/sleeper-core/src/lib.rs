//! Core domain model for Sleeper league sync: upstream payload schemas,
//! syncable entity identities and the rows written to the relational store.

mod entity;
mod rows;
mod upstream;

pub use entity::{EntityKind, LeagueStatus, ParseEntityError, SyncKey, SyncMode};
pub use rows::{
    roster_key, DraftPickRow, DraftRow, FaabTransferRow, Interval, LeagueRow, LeagueUserRow, MatchupRow,
    MoveKind, NflStateRow, ParticipantRow, PlayerRow, PlayerStatusValue, Record, RosterRow,
    SeasonType, Table, TemporalKind, TradedPickRow, TransactionMoveRow, TransactionRow, UserRow,
};
pub use upstream::{
    decode_record_list, decode_record_map, decode_single, ApiDraft, ApiDraftPick, ApiLeague,
    ApiMatchup, ApiNflState, ApiPlayer, ApiRoster, ApiTradedPick, ApiTransaction, ApiUser, ApiWaiverBudget,
    DecodeError, Decoded, RejectedRecord,
};

pub const CRATE_NAME: &str = "sleeper-core";

/// Scope used for catalog-wide temporal attributes (player status).
pub const NFL_SCOPE: &str = "nfl";

/// Sleeper timestamps are epoch milliseconds.
pub fn from_epoch_millis(millis: i64) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::from_timestamp_millis(millis)
}
