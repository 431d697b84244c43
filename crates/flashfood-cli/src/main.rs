use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flashfood_storage::http::{HttpClient, HttpClientConfig};
use flashfood_storage::SqliteStore;
use flashfood_sync::{
    build_scheduler, schedule_from_config, AppConfig, BarkNotifier, DataCleaningService,
    JobRunner, NotificationService,
};
use flashfood_web::AppState;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "flashfood")]
#[command(about = "Flash-sale food aggregator: ingest, de-duplicate and watch prices")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the HTTP API; the scheduler starts only when FLASHFOOD_SCHEDULER_ENABLED is set.
    Serve,
    /// Serve the HTTP API and run scheduled jobs until Ctrl-C.
    Run,
    /// Promote every candidate with enough corroboration once.
    Promote,
    /// Snapshot every master price into today's trend row.
    RecordTrends,
    /// Push alerts for watches whose target price has been reached.
    CheckPrices,
    /// Apply database migrations and exit.
    Migrate,
}

fn init_tracing() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))
}

struct Services {
    config: AppConfig,
    store: Arc<SqliteStore>,
    cleaning: Arc<DataCleaningService>,
    notifications: Arc<NotificationService<SqliteStore>>,
}

impl Services {
    async fn from_env() -> Result<Self> {
        let config = AppConfig::from_env()?;
        let store = Arc::new(
            SqliteStore::connect(&config.database_url)
                .await
                .with_context(|| format!("opening {}", config.database_url))?,
        );
        let tuning = config.cleaning()?;
        let client = HttpClient::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            ..HttpClientConfig::default()
        })
        .context("building push client")?;
        let notifier = Arc::new(BarkNotifier::new(config.bark_url.clone(), client));

        let cleaning = Arc::new(DataCleaningService::new(store.clone(), tuning));
        let notifications = Arc::new(NotificationService::new(store.clone(), notifier));
        Ok(Self {
            config,
            store,
            cleaning,
            notifications,
        })
    }

    fn app_state(&self) -> AppState {
        AppState::new(
            self.store.clone(),
            self.cleaning.clone(),
            self.notifications.clone(),
        )
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for ctrl-c");
    }
    info!("shutdown requested");
}

async fn serve(services: Services, with_scheduler: bool) -> Result<()> {
    let mut scheduler = if with_scheduler {
        let runner = Arc::new(JobRunner::new(
            services.store.clone(),
            services.config.job_timeout,
            services.config.window,
        ));
        let entries = schedule_from_config(
            &services.config,
            services.cleaning.clone(),
            services.notifications.clone(),
        );
        let sched = build_scheduler(runner, entries).await?;
        sched.start().await.context("starting scheduler")?;
        info!("scheduler started");
        Some(sched)
    } else {
        None
    };

    let result = flashfood_web::serve(
        services.app_state(),
        services.config.web_port,
        shutdown_signal(),
    )
    .await;

    if let Some(sched) = scheduler.as_mut() {
        if let Err(err) = sched.shutdown().await {
            error!(error = %err, "scheduler shutdown failed");
        }
    }
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    let services = Services::from_env().await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Serve => {
            let with_scheduler = services.config.scheduler_enabled;
            serve(services, with_scheduler).await?;
        }
        Commands::Run => serve(services, true).await?,
        Commands::Promote => {
            let promoted = services.cleaning.promote_candidates().await?;
            for (region, products) in &promoted {
                println!("{region}: {} promoted", products.len());
            }
            let total: usize = promoted.values().map(Vec::len).sum();
            println!("promotion complete: promoted={total}");
        }
        Commands::RecordTrends => {
            let recorded = services.cleaning.record_daily_trends().await?;
            println!("trend snapshot complete: recorded={recorded}");
        }
        Commands::CheckPrices => {
            let sent = services.notifications.check_and_notify().await?;
            println!("price check complete: sent={sent}");
        }
        Commands::Migrate => {
            services.store.migrate().await?;
            println!("migrations applied to {}", services.config.database_url);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn subcommands_parse_in_kebab_case() {
        let cli = Cli::try_parse_from(["flashfood", "record-trends"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::RecordTrends)));
        let cli = Cli::try_parse_from(["flashfood", "check-prices"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::CheckPrices)));
        assert!(Cli::try_parse_from(["flashfood"]).unwrap().command.is_none());
        assert!(Cli::try_parse_from(["flashfood", "sync"]).is_err());
    }
}
