use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::Weekday;
use serde::Deserialize;
use sleeper_client::{BackoffPolicy, ClientConfig, HttpUpstreamConfig, TokenBucketConfig};
use thiserror::Error;

use crate::planner::{Cadences, GameWindow, PlannerConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: `{value}`")]
    Invalid { name: &'static str, value: String },
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockBackend {
    Local,
    Postgres,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// `None` runs against the in-memory store.
    pub database_url: Option<String>,
    pub api_base_url: String,
    pub http_timeout_secs: u64,
    pub max_in_flight: usize,
    pub rate_burst: u32,
    pub rate_refill_ms: u64,
    pub retry_attempts: usize,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub workers: usize,
    pub queue_capacity: usize,
    pub task_deadline_secs: u64,
    pub players_deadline_secs: u64,
    pub lock_wait_ms: u64,
    pub lock_backend: LockBackend,
    pub shared_secret: Option<String>,
    pub scheduler_enabled: bool,
    pub leagues_file: Option<PathBuf>,
    pub web_port: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            api_base_url: "https://api.sleeper.app/v1".to_string(),
            http_timeout_secs: 20,
            max_in_flight: 5,
            rate_burst: 10,
            rate_refill_ms: 100,
            retry_attempts: 3,
            retry_base_ms: 250,
            retry_max_ms: 8_000,
            workers: 4,
            queue_capacity: 64,
            task_deadline_secs: 60,
            players_deadline_secs: 300,
            lock_wait_ms: 2_000,
            lock_backend: LockBackend::Local,
            shared_secret: None,
            scheduler_enabled: false,
            leagues_file: None,
            web_port: 3000,
        }
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        _ => Ok(default),
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|v| !v.trim().is_empty())
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let lock_backend = match non_empty(&lookup, "SYNC_LOCK_BACKEND").as_deref() {
            None | Some("local") => LockBackend::Local,
            Some("postgres") => LockBackend::Postgres,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "SYNC_LOCK_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            database_url: non_empty(&lookup, "DATABASE_URL"),
            api_base_url: non_empty(&lookup, "SLEEPER_API_BASE_URL")
                .unwrap_or(defaults.api_base_url),
            http_timeout_secs: parse_var(&lookup, "SLEEPER_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs)?,
            max_in_flight: parse_var(&lookup, "SLEEPER_MAX_IN_FLIGHT", defaults.max_in_flight)?,
            rate_burst: parse_var(&lookup, "SLEEPER_RATE_BURST", defaults.rate_burst)?,
            rate_refill_ms: parse_var(&lookup, "SLEEPER_RATE_REFILL_MS", defaults.rate_refill_ms)?,
            retry_attempts: parse_var(&lookup, "SLEEPER_RETRY_ATTEMPTS", defaults.retry_attempts)?,
            retry_base_ms: parse_var(&lookup, "SLEEPER_RETRY_BASE_MS", defaults.retry_base_ms)?,
            retry_max_ms: parse_var(&lookup, "SLEEPER_RETRY_MAX_MS", defaults.retry_max_ms)?,
            workers: parse_var(&lookup, "SYNC_WORKERS", defaults.workers)?,
            queue_capacity: parse_var(&lookup, "SYNC_QUEUE_CAPACITY", defaults.queue_capacity)?,
            task_deadline_secs: parse_var(&lookup, "SYNC_TASK_DEADLINE_SECS", defaults.task_deadline_secs)?,
            players_deadline_secs: parse_var(
                &lookup,
                "SYNC_PLAYERS_DEADLINE_SECS",
                defaults.players_deadline_secs,
            )?,
            lock_wait_ms: parse_var(&lookup, "SYNC_LOCK_WAIT_MS", defaults.lock_wait_ms)?,
            lock_backend,
            shared_secret: non_empty(&lookup, "SYNC_SHARED_SECRET"),
            scheduler_enabled: lookup("SYNC_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            leagues_file: non_empty(&lookup, "SYNC_LEAGUES_FILE").map(PathBuf::from),
            web_port: parse_var(&lookup, "SYNC_WEB_PORT", defaults.web_port)?,
        })
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            max_in_flight: self.max_in_flight.max(1),
            rate: TokenBucketConfig {
                capacity: self.rate_burst.max(1),
                refill_every: Duration::from_millis(self.rate_refill_ms),
            },
            backoff: BackoffPolicy {
                max_retries: self.retry_attempts,
                base_delay: Duration::from_millis(self.retry_base_ms),
                max_delay: Duration::from_millis(self.retry_max_ms),
                ..BackoffPolicy::default()
            },
        }
    }

    pub fn http_config(&self) -> HttpUpstreamConfig {
        HttpUpstreamConfig {
            base_url: self.api_base_url.clone(),
            timeout: Duration::from_secs(self.http_timeout_secs),
            ..HttpUpstreamConfig::default()
        }
    }

    pub fn planner_config(&self, registry: Option<&LeagueRegistry>) -> PlannerConfig {
        let mut planner = PlannerConfig {
            task_deadline: Duration::from_secs(self.task_deadline_secs),
            players_deadline: Duration::from_secs(self.players_deadline_secs),
            ..PlannerConfig::default()
        };
        if let Some(windows) = registry.and_then(|r| r.game_windows.as_ref()) {
            planner.game_windows = windows.iter().filter_map(WindowSpec::to_window).collect();
        }
        if let Some(cadences) = registry.and_then(|r| r.cadences.clone()) {
            planner.cadences = cadences.into_cadences(planner.cadences);
        }
        planner
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_league_cron() -> String {
    "0 */5 * * * *".to_string()
}

fn default_players_cron() -> String {
    "0 0 9 * * Tue".to_string()
}

fn default_nfl_state_cron() -> String {
    "0 0 * * * *".to_string()
}

/// Tracked leagues and schedules (`SYNC_LEAGUES_FILE`).
#[derive(Debug, Clone, Deserialize)]
pub struct LeagueRegistry {
    #[serde(default)]
    pub leagues: Vec<TrackedLeague>,
    #[serde(default = "default_players_cron")]
    pub players_cron: String,
    /// Refreshes the season calendar that league plans read.
    #[serde(default = "default_nfl_state_cron")]
    pub nfl_state_cron: String,
    #[serde(default)]
    pub game_windows: Option<Vec<WindowSpec>>,
    #[serde(default)]
    pub cadences: Option<CadenceOverrides>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackedLeague {
    pub league_id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_league_cron")]
    pub cron: String,
    #[serde(default)]
    pub full_cron: Option<String>,
}

/// `weekday` accepts chrono's names (`sun`, `Sunday`, ...); hours are UTC,
/// `end_hour` exclusive and at most 24.
#[derive(Debug, Clone, Deserialize)]
pub struct WindowSpec {
    pub weekday: String,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl WindowSpec {
    fn to_window(&self) -> Option<GameWindow> {
        let weekday = Weekday::from_str(&self.weekday).ok()?;
        (self.start_hour < self.end_hour && self.end_hour <= 24).then_some(GameWindow {
            weekday,
            start_hour: self.start_hour,
            end_hour: self.end_hour,
        })
    }
}

/// Cadence overrides in seconds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CadenceOverrides {
    pub live_secs: Option<u64>,
    pub matchups_live_secs: Option<u64>,
    pub active_secs: Option<u64>,
    pub transactions_active_secs: Option<u64>,
    pub routine_secs: Option<u64>,
    pub static_secs: Option<u64>,
    pub players_secs: Option<u64>,
}

impl CadenceOverrides {
    fn into_cadences(self, base: Cadences) -> Cadences {
        let pick = |value: Option<u64>, fallback: Duration| {
            value.map(Duration::from_secs).unwrap_or(fallback)
        };
        Cadences {
            draft_live: pick(self.live_secs, base.draft_live),
            matchups_live: pick(self.matchups_live_secs, base.matchups_live),
            rosters_active: pick(self.active_secs, base.rosters_active),
            transactions_active: pick(self.transactions_active_secs, base.transactions_active),
            routine: pick(self.routine_secs, base.routine),
            static_: pick(self.static_secs, base.static_),
            players: pick(self.players_secs, base.players),
        }
    }
}

impl LeagueRegistry {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &TrackedLeague> {
        self.leagues.iter().filter(|league| league.enabled)
    }
}
