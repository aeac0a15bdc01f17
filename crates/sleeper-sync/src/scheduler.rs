use std::sync::Arc;

use anyhow::{Context, Result};
use sleeper_core::SyncMode;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::config::LeagueRegistry;
use crate::planner::PlanRequest;
use crate::pool::WorkerPool;

fn cron_job(cron: &str, pool: Arc<WorkerPool>, request: PlanRequest) -> Result<Job> {
    Job::new_async(cron, move |_uuid, _l| {
        let pool = Arc::clone(&pool);
        let request = request.clone();
        Box::pin(async move {
            let target = request.lock_name();
            match pool.dispatch(request) {
                Ok(outcome) => info!(lock = %target, ?outcome, "scheduled sync dispatched"),
                Err(err) => warn!(lock = %target, error = %err, "scheduled sync not dispatched"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))
}

/// Cron jobs for every enabled league, the weekly player catalog and the NFL
/// state. All jobs go through the same dispatcher as external triggers.
pub async fn build_scheduler(registry: &LeagueRegistry, pool: Arc<WorkerPool>) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;

    for league in registry.enabled() {
        let incremental = PlanRequest::league(league.league_id.clone(), SyncMode::Incremental);
        sched
            .add(cron_job(&league.cron, Arc::clone(&pool), incremental)?)
            .await
            .context("adding league job")?;

        if let Some(full_cron) = &league.full_cron {
            let full = PlanRequest::league(league.league_id.clone(), SyncMode::Full);
            sched
                .add(cron_job(full_cron, Arc::clone(&pool), full)?)
                .await
                .context("adding full league job")?;
        }
        info!(
            league_id = %league.league_id,
            label = league.label.as_deref().unwrap_or(""),
            cron = %league.cron,
            "scheduled league"
        );
    }

    sched
        .add(cron_job(
            &registry.players_cron,
            Arc::clone(&pool),
            PlanRequest::players(SyncMode::Incremental),
        )?)
        .await
        .context("adding player catalog job")?;
    sched
        .add(cron_job(
            &registry.nfl_state_cron,
            pool,
            PlanRequest::nfl_state(SyncMode::Incremental),
        )?)
        .await
        .context("adding nfl state job")?;
    Ok(sched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::orchestrator::{RunReport, SyncError, SyncRunner};

    struct NoopRunner;

    #[async_trait]
    impl SyncRunner for NoopRunner {
        async fn run(&self, _request: PlanRequest) -> Result<RunReport, SyncError> {
            Err(SyncError::Store(sleeper_store::StoreError::Corrupt("unused".to_string())))
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejects_malformed_cron() {
        let registry = LeagueRegistry::parse(
            r#"
leagues:
  - league_id: "784"
    cron: "every five minutes"
"#,
        )
        .expect("registry");
        let pool = WorkerPool::start(Arc::new(NoopRunner), 1, 1);

        let err = build_scheduler(&registry, Arc::clone(&pool))
            .await
            .err()
            .expect("bad cron");
        assert!(err.to_string().contains("every five minutes"));
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn builds_jobs_for_enabled_leagues() {
        let registry = LeagueRegistry::parse(
            r#"
leagues:
  - league_id: "784"
    full_cron: "0 0 10 * * Wed"
  - league_id: "911"
    enabled: false
    cron: "not a cron"
"#,
        )
        .expect("registry");
        let pool = WorkerPool::start(Arc::new(NoopRunner), 1, 1);

        let sched = build_scheduler(&registry, Arc::clone(&pool)).await;
        assert!(sched.is_ok());
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn nfl_state_cron_is_validated() {
        let registry = LeagueRegistry::parse("nfl_state_cron: \"hourly\"\n").expect("registry");
        let pool = WorkerPool::start(Arc::new(NoopRunner), 1, 1);

        let err = build_scheduler(&registry, Arc::clone(&pool))
            .await
            .err()
            .expect("bad cron");
        assert!(err.to_string().contains("hourly"));
        pool.shutdown().await;
    }
}
