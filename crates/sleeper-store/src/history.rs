use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{StoreError, SyncHistory, SyncLogEntry, SyncOutcome};

/// Emits each entry as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHistory;

#[async_trait]
impl SyncHistory for TracingHistory {
    async fn record(&self, entry: &SyncLogEntry) -> Result<(), StoreError> {
        let elapsed_ms = (entry.finished_at - entry.started_at).num_milliseconds();
        match entry.outcome {
            SyncOutcome::Failed | SyncOutcome::TimedOut => warn!(
                run_id = %entry.run_id,
                key = %entry.key,
                outcome = entry.outcome.as_str(),
                elapsed_ms,
                detail = %entry.detail,
                "sync task did not complete"
            ),
            _ => info!(
                run_id = %entry.run_id,
                key = %entry.key,
                outcome = entry.outcome.as_str(),
                elapsed_ms,
                detail = %entry.detail,
                "sync task finished"
            ),
        }
        Ok(())
    }
}

/// Shared in-memory log; clones see the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryHistory {
    entries: Arc<Mutex<Vec<SyncLogEntry>>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<SyncLogEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl SyncHistory for MemoryHistory {
    async fn record(&self, entry: &SyncLogEntry) -> Result<(), StoreError> {
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }
}
