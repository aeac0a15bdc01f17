//! Upstream (Sleeper API) payload schemas.
//!
//! Every resource is an explicit struct with optional fields; unknown fields
//! are ignored so upstream additions never break decoding. Lists are decoded
//! record by record: one malformed element is rejected on its own while the
//! rest of the payload stays usable.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiLeague {
    pub league_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub sport: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub total_rosters: Option<u32>,
    #[serde(default)]
    pub draft_id: Option<String>,
    #[serde(default)]
    pub previous_league_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub roster_positions: Vec<String>,
    #[serde(default)]
    pub settings: Option<JsonValue>,
    #[serde(default)]
    pub scoring_settings: Option<JsonValue>,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
}

impl ApiLeague {
    fn setting_u32(&self, name: &str) -> Option<u32> {
        self.settings
            .as_ref()
            .and_then(|s| s.get(name))
            .and_then(JsonValue::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }

    /// Current week pointer (`settings.leg`); zero means "not started".
    pub fn current_week(&self) -> Option<u32> {
        self.setting_u32("leg").filter(|week| *week > 0)
    }

    pub fn last_scored_week(&self) -> Option<u32> {
        self.setting_u32("last_scored_leg").filter(|week| *week > 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiUser {
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_bot: Option<bool>,
    #[serde(default)]
    pub is_owner: Option<bool>,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
}

impl ApiUser {
    pub fn team_name(&self) -> Option<String> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("team_name"))
            .and_then(JsonValue::as_str)
            .filter(|name| !name.trim().is_empty())
            .map(ToString::to_string)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiRosterSettings {
    #[serde(default)]
    pub wins: u32,
    #[serde(default)]
    pub losses: u32,
    #[serde(default)]
    pub ties: u32,
    #[serde(default)]
    pub fpts: i64,
    #[serde(default)]
    pub fpts_decimal: i64,
    #[serde(default)]
    pub fpts_against: i64,
    #[serde(default)]
    pub fpts_against_decimal: i64,
    #[serde(default)]
    pub waiver_position: Option<u32>,
    #[serde(default)]
    pub waiver_budget_used: Option<u32>,
}

impl ApiRosterSettings {
    /// Points are split into whole and hundredths parts upstream.
    pub fn points_for(&self) -> f64 {
        self.fpts as f64 + self.fpts_decimal as f64 / 100.0
    }

    pub fn points_against(&self) -> f64 {
        self.fpts_against as f64 + self.fpts_against_decimal as f64 / 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRoster {
    pub roster_id: u32,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub league_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub players: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub starters: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reserve: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub taxi: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub co_owners: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub settings: ApiRosterSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMatchup {
    pub roster_id: u32,
    #[serde(default)]
    pub matchup_id: Option<u32>,
    #[serde(default)]
    pub points: Option<f64>,
    #[serde(default)]
    pub custom_points: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub starters: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub starters_points: Vec<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub players_points: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiWaiverBudget {
    pub sender: u32,
    pub receiver: u32,
    pub amount: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiTradedPick {
    pub season: String,
    pub round: u32,
    pub roster_id: u32,
    #[serde(default)]
    pub previous_owner_id: Option<u32>,
    pub owner_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiTransaction {
    pub transaction_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    #[serde(default)]
    pub status_updated: Option<i64>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub leg: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub roster_ids: Vec<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub adds: BTreeMap<String, u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub drops: BTreeMap<String, u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub waiver_budget: Vec<ApiWaiverBudget>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub draft_picks: Vec<ApiTradedPick>,
    #[serde(default)]
    pub settings: Option<JsonValue>,
}

impl ApiTransaction {
    pub fn waiver_bid(&self) -> Option<u32> {
        self.settings
            .as_ref()
            .and_then(|s| s.get("waiver_bid"))
            .and_then(JsonValue::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiPlayer {
    pub player_id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub years_exp: Option<u32>,
    #[serde(default)]
    pub college: Option<String>,
    #[serde(default)]
    pub height: Option<String>,
    #[serde(default)]
    pub weight: Option<String>,
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fantasy_positions: Vec<String>,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub depth_chart_position: Option<String>,
    #[serde(default)]
    pub depth_chart_order: Option<u32>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub injury_status: Option<String>,
    #[serde(default)]
    pub injury_body_part: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiDraft {
    pub draft_id: String,
    #[serde(default)]
    pub league_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub settings: Option<JsonValue>,
    #[serde(default)]
    pub draft_order: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiDraftPick {
    pub pick_no: u32,
    pub round: u32,
    #[serde(default)]
    pub roster_id: Option<u32>,
    #[serde(default)]
    pub player_id: Option<String>,
    #[serde(default)]
    pub picked_by: Option<String>,
    #[serde(default)]
    pub draft_slot: Option<u32>,
    #[serde(default)]
    pub is_keeper: Option<bool>,
}

/// `/state/nfl`: the league-independent season calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiNflState {
    pub season: String,
    #[serde(default)]
    pub season_type: Option<String>,
    #[serde(default)]
    pub week: u32,
    #[serde(default)]
    pub display_week: Option<u32>,
    #[serde(default)]
    pub leg: Option<u32>,
    #[serde(default)]
    pub previous_season: Option<String>,
    #[serde(default)]
    pub season_start_date: Option<String>,
    #[serde(default)]
    pub league_season: Option<String>,
    #[serde(default)]
    pub league_create_season: Option<String>,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected {expected}, found {found}")]
    Shape {
        expected: &'static str,
        found: &'static str,
    },
}

/// A single upstream record that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    pub locator: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Decoded<T> {
    pub records: Vec<T>,
    pub rejected: Vec<RejectedRecord>,
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

pub fn decode_single<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    let value: JsonValue = serde_json::from_slice(bytes)?;
    if value.is_null() {
        return Err(DecodeError::Shape {
            expected: "object",
            found: "null",
        });
    }
    Ok(serde_json::from_value(value)?)
}

/// Decodes a JSON array. `null` is treated as an empty list, which is how
/// the upstream answers for weeks that do not exist yet.
pub fn decode_record_list<T: DeserializeOwned>(bytes: &[u8]) -> Result<Decoded<T>, DecodeError> {
    let value: JsonValue = serde_json::from_slice(bytes)?;
    let items = match value {
        JsonValue::Null => Vec::new(),
        JsonValue::Array(items) => items,
        other => {
            return Err(DecodeError::Shape {
                expected: "array",
                found: json_kind(&other),
            })
        }
    };

    let mut decoded = Decoded {
        records: Vec::with_capacity(items.len()),
        rejected: Vec::new(),
    };
    for (idx, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<T>(item) {
            Ok(record) => decoded.records.push(record),
            Err(err) => decoded.rejected.push(RejectedRecord {
                locator: format!("[{idx}]"),
                reason: err.to_string(),
            }),
        }
    }
    Ok(decoded)
}

/// Decodes a JSON object keyed by record id (the player catalog shape).
pub fn decode_record_map<T: DeserializeOwned>(bytes: &[u8]) -> Result<Decoded<T>, DecodeError> {
    let value: JsonValue = serde_json::from_slice(bytes)?;
    let entries = match value {
        JsonValue::Object(entries) => entries,
        other => {
            return Err(DecodeError::Shape {
                expected: "object",
                found: json_kind(&other),
            })
        }
    };

    let mut decoded = Decoded {
        records: Vec::with_capacity(entries.len()),
        rejected: Vec::new(),
    };
    for (key, item) in entries {
        match serde_json::from_value::<T>(item) {
            Ok(record) => decoded.records.push(record),
            Err(err) => decoded.rejected.push(RejectedRecord {
                locator: key,
                reason: err.to_string(),
            }),
        }
    }
    Ok(decoded)
}
