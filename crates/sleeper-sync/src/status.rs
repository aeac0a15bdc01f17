//! Read-only view of the service for readiness checks and the admin status page.

use async_trait::async_trait;
use serde::Serialize;
use sleeper_store::SyncState;

use crate::orchestrator::SyncError;

/// Dependencies a sync run cannot do without.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub database: bool,
    pub sleeper_api: bool,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.database && self.sleeper_api
    }
}

#[async_trait]
pub trait StatusSource: Send + Sync + 'static {
    async fn readiness(&self) -> Readiness;

    /// Sync state of every tracked key, ordered by key.
    async fn sync_states(&self) -> Result<Vec<SyncState>, SyncError>;
}
