use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// League lifecycle as reported by the upstream `status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeagueStatus {
    PreDraft,
    Drafting,
    InSeason,
    Complete,
}

impl LeagueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreDraft => "pre_draft",
            Self::Drafting => "drafting",
            Self::InSeason => "in_season",
            Self::Complete => "complete",
        }
    }

    /// Maps an upstream status string. `post_season` is still live play.
    pub fn from_upstream(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pre_draft" => Some(Self::PreDraft),
            "drafting" => Some(Self::Drafting),
            "in_season" | "post_season" => Some(Self::InSeason),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

impl fmt::Display for LeagueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Syncable upstream resource types, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    League,
    Users,
    Rosters,
    Matchups,
    Transactions,
    Draft,
    DraftPicks,
    Players,
    NflState,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown entity type `{0}`")]
pub struct ParseEntityError(pub String);

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        Self::League,
        Self::Users,
        Self::Rosters,
        Self::Matchups,
        Self::Transactions,
        Self::Draft,
        Self::DraftPicks,
        Self::Players,
        Self::NflState,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::League => "league",
            Self::Users => "users",
            Self::Rosters => "rosters",
            Self::Matchups => "matchups",
            Self::Transactions => "transactions",
            Self::Draft => "draft",
            Self::DraftPicks => "draft_picks",
            Self::Players => "players",
            Self::NflState => "nfl_state",
        }
    }

    /// Logical parent in the league dependency chain.
    pub fn parent(self) -> Option<EntityKind> {
        match self {
            Self::League | Self::Players | Self::NflState => None,
            Self::Users => Some(Self::League),
            Self::Rosters => Some(Self::Users),
            Self::Matchups | Self::Transactions | Self::Draft => Some(Self::Rosters),
            Self::DraftPicks => Some(Self::Draft),
        }
    }

    /// Whether `self` is `other` or one of its ancestors.
    pub fn is_ancestor_or_self(self, other: EntityKind) -> bool {
        let mut cursor = Some(other);
        while let Some(kind) = cursor {
            if kind == self {
                return true;
            }
            cursor = kind.parent();
        }
        false
    }

    /// Entity types an external trigger may name.
    pub fn is_triggerable(self) -> bool {
        !matches!(self, Self::DraftPicks)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ParseEntityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseEntityError(s.to_string()))
    }
}

/// Identity of one sync-state row: `(entity_type, entity_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncKey {
    pub entity: EntityKind,
    pub entity_id: String,
}

impl SyncKey {
    pub fn new(entity: EntityKind, entity_id: impl Into<String>) -> Self {
        Self {
            entity,
            entity_id: entity_id.into(),
        }
    }

    pub fn league(league_id: &str) -> Self {
        Self::new(EntityKind::League, league_id)
    }

    pub fn weekly(entity: EntityKind, league_id: &str, week: u32) -> Self {
        Self::new(entity, format!("{league_id}:{week}"))
    }

    pub fn players() -> Self {
        Self::new(EntityKind::Players, crate::NFL_SCOPE)
    }

    pub fn nfl_state() -> Self {
        Self::new(EntityKind::NflState, crate::NFL_SCOPE)
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity, self.entity_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Full,
    #[default]
    Incremental,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}
