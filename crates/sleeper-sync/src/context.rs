use std::sync::Arc;

use anyhow::{bail, Context, Result};
use sleeper_client::{ApiClient, Upstream};
use sleeper_store::{
    connect_pool, LocalLocks, LockProvider, MemoryStore, PgAdvisoryLocks, PgStore, PgSyncHistory,
    SyncHistory, TracingHistory,
};
use tracing::{info, warn};

use crate::config::{LeagueRegistry, LockBackend, SyncConfig};
use crate::orchestrator::{Backends, Orchestrator};
use crate::pool::WorkerPool;

/// Everything a running service needs, wired from [`SyncConfig`].
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub config: SyncConfig,
    pub registry: Option<LeagueRegistry>,
    pub orchestrator: Arc<Orchestrator>,
}

impl ServiceContext {
    pub async fn from_config(config: SyncConfig) -> Result<Self> {
        let registry = match &config.leagues_file {
            Some(path) => Some(LeagueRegistry::load(path)?),
            None => None,
        };
        let client = ApiClient::http(config.http_config(), config.client_config())
            .context("building upstream client")?;

        let backends = match &config.database_url {
            Some(url) => {
                let max_connections = u32::try_from(config.workers + 4).unwrap_or(u32::MAX);
                let pool = connect_pool(url, max_connections).await?;
                let store = Arc::new(PgStore::new(pool.clone()));
                let locks: Arc<dyn LockProvider> = match config.lock_backend {
                    LockBackend::Postgres => Arc::new(PgAdvisoryLocks::new(pool.clone())),
                    LockBackend::Local => Arc::new(LocalLocks::new()),
                };
                info!(lock_backend = ?config.lock_backend, "using postgres store");
                Backends {
                    store: store.clone(),
                    states: store.clone(),
                    locks,
                    history: Arc::new(PgSyncHistory::new(pool)),
                    archive: store,
                }
            }
            None => {
                if config.lock_backend == LockBackend::Postgres {
                    bail!("SYNC_LOCK_BACKEND=postgres requires DATABASE_URL");
                }
                warn!("DATABASE_URL not set; using the in-memory store");
                memory_backends(MemoryStore::new(), Arc::new(TracingHistory))
            }
        };

        Ok(Self::with_parts(config, registry, client, backends))
    }

    /// In-memory wiring around an arbitrary upstream.
    pub fn in_memory(
        config: SyncConfig,
        upstream: Arc<dyn Upstream>,
        store: MemoryStore,
        history: Arc<dyn SyncHistory>,
    ) -> Self {
        let client = ApiClient::new(upstream, config.client_config());
        Self::with_parts(config, None, client, memory_backends(store, history))
    }

    fn with_parts(
        config: SyncConfig,
        registry: Option<LeagueRegistry>,
        client: ApiClient,
        backends: Backends,
    ) -> Self {
        let planner = config.planner_config(registry.as_ref());
        let orchestrator = Orchestrator::new(client, backends, planner, config.lock_wait());
        Self {
            config,
            registry,
            orchestrator: Arc::new(orchestrator),
        }
    }

    pub fn start_pool(&self) -> Arc<WorkerPool> {
        WorkerPool::start(
            self.orchestrator.clone(),
            self.config.workers,
            self.config.queue_capacity,
        )
    }
}

fn memory_backends(store: MemoryStore, history: Arc<dyn SyncHistory>) -> Backends {
    let store = Arc::new(store);
    Backends {
        store: store.clone(),
        states: store.clone(),
        locks: Arc::new(LocalLocks::new()),
        history,
        archive: store,
    }
}
