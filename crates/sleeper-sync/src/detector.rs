use std::sync::Arc;

use sleeper_core::SyncKey;
use sleeper_store::{StoreError, SyncStateStore};

/// Compares a fresh payload checksum against the last one merged for `key`.
#[derive(Clone)]
pub struct ChangeDetector {
    states: Arc<dyn SyncStateStore>,
}

impl ChangeDetector {
    pub fn new(states: Arc<dyn SyncStateStore>) -> Self {
        Self { states }
    }

    /// `true` when the key was never merged or its last checksum differs.
    pub async fn has_changed(&self, key: &SyncKey, checksum: &str) -> Result<bool, StoreError> {
        let previous = self.states.get(key).await?;
        Ok(previous
            .and_then(|state| state.checksum)
            .map_or(true, |last| last != checksum))
    }
}
