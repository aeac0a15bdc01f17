//! Sync pipeline: planning, change detection, merging and dispatch.

pub mod config;
mod context;
mod detector;
pub mod merge;
mod orchestrator;
pub mod planner;
mod pool;
mod scheduler;
mod status;
pub mod transform;

pub use config::{ConfigError, LeagueRegistry, LockBackend, SyncConfig, TrackedLeague};
pub use context::ServiceContext;
pub use detector::ChangeDetector;
pub use merge::{MergeEngine, MergeError, MergeGroup, MergeResult};
pub use orchestrator::{
    Backends, Orchestrator, RunReport, SyncError, SyncRunner, TaskError, TaskReport,
};
pub use planner::{
    LeagueSnapshot, NflContext, Plan, PlanRequest, PlanTarget, Planner, PlannerConfig, Priority,
    SyncTask,
};
pub use pool::{DispatchError, DispatchOutcome, WorkerPool};
pub use scheduler::build_scheduler;
pub use sleeper_store::SyncState;
pub use status::{Readiness, StatusSource};

pub const CRATE_NAME: &str = "sleeper-sync";
