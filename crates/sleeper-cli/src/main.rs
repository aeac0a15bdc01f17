use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sleeper_core::SyncMode;
use sleeper_store::{connect_pool, run_migrations};
use sleeper_sync::{build_scheduler, PlanRequest, ServiceContext, SyncConfig, SyncRunner};
use sleeper_web::AppState;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "sleeper-sync")]
#[command(about = "Keeps a local copy of Sleeper fantasy leagues in sync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the trigger endpoint, the worker pool and the cron scheduler.
    Serve,
    /// Sync one league immediately and print the run report.
    Sync {
        league_id: String,
        #[arg(long)]
        full: bool,
    },
    /// Refresh the NFL player catalog.
    SyncPlayers {
        #[arg(long)]
        full: bool,
    },
    /// Refresh the NFL season and week.
    SyncNflState,
    Migrate,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("SYNC_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

fn mode(full: bool) -> SyncMode {
    if full {
        SyncMode::Full
    } else {
        SyncMode::Incremental
    }
}

async fn run_once(request: PlanRequest) -> Result<()> {
    let ctx = ServiceContext::from_config(SyncConfig::from_env()?).await?;
    let report = ctx.orchestrator.run(request).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn serve() -> Result<()> {
    let config = SyncConfig::from_env()?;
    let ctx = ServiceContext::from_config(config).await?;
    let pool = ctx.start_pool();

    let mut scheduler = match (&ctx.registry, ctx.config.scheduler_enabled) {
        (Some(registry), true) => {
            let sched = build_scheduler(registry, pool.clone()).await?;
            sched.start().await.context("starting scheduler")?;
            Some(sched)
        }
        (None, true) => {
            warn!("scheduler enabled but SYNC_LEAGUES_FILE is not set; only triggers will run");
            None
        }
        _ => None,
    };

    if ctx.config.shared_secret.is_none() {
        warn!("SYNC_SHARED_SECRET is not set; every trigger will be rejected");
    }
    let state = AppState::new(
        pool.clone(),
        ctx.orchestrator.clone(),
        ctx.config.shared_secret.clone(),
    );
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("could not listen for ctrl-c");
        }
        info!("shutdown requested");
    };
    let served = sleeper_web::serve(state, ctx.config.web_port, shutdown).await;

    if let Some(sched) = scheduler.as_mut() {
        if let Err(err) = sched.shutdown().await {
            warn!(error = %err, "scheduler did not shut down cleanly");
        }
    }
    pool.shutdown().await;
    served
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve().await?,
        Commands::Sync { league_id, full } => {
            run_once(PlanRequest::league(league_id, mode(full))).await?
        }
        Commands::SyncPlayers { full } => run_once(PlanRequest::players(mode(full))).await?,
        Commands::SyncNflState => run_once(PlanRequest::nfl_state(SyncMode::Incremental)).await?,
        Commands::Migrate => {
            let config = SyncConfig::from_env()?;
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required to run migrations")?;
            let pool = connect_pool(url, 2).await?;
            run_migrations(&pool).await?;
            println!("migrations applied");
        }
    }

    Ok(())
}
