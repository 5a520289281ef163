//! Billing mirror - main entry point
//!
//! `serve` exposes the HTTP trigger and runs the cron schedule,
//! `run-once` performs a single reconciliation and exits.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use billing_mirror_config::{AppConfig, ConfigLoader};
use billing_mirror_reconciler::RenewalReconciliationJob;
use billing_mirror_server::{build_job, build_scheduler, router};
use billing_mirror_telemetry::{init_tracing, LogFormat};
use billing_mirror_types::{RunRequest, TriggerSource};
use clap::{Parser, Subcommand};
use tracing::{error, info};

/// Subscription renewal reconciliation service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (TOML, YAML or JSON); environment overrides apply on top
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API and run the configured schedule
    Serve {
        /// Overrides server.bind
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run one reconciliation and print the result as JSON
    RunOnce {
        /// Restrict the run to one tenant
        #[arg(long)]
        tenant: Option<String>,

        /// Records per transaction
        #[arg(long)]
        batch_size: Option<usize>,

        /// Upper bound on records selected
        #[arg(long)]
        max_records: Option<usize>,

        /// Reconcile exactly this provider subscription, ignoring window filters
        #[arg(long)]
        subscription: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::load(args.config.as_deref()).context("loading configuration")?;
    let format: LogFormat = config.logging.format.parse()?;
    init_tracing(Some(&config.logging.level), format)?;

    info!("Starting billing mirror");
    let job = Arc::new(build_job(&config).await?);

    match args.command {
        Command::Serve { bind } => serve(job, &config, bind).await,
        Command::RunOnce {
            tenant,
            batch_size,
            max_records,
            subscription,
        } => {
            let request = RunRequest {
                tenant_id: tenant,
                batch_size,
                max_records,
                external_subscription_id: subscription,
            };
            run_once(&job, request).await
        }
    }
}

async fn serve(
    job: Arc<RenewalReconciliationJob>,
    config: &AppConfig,
    bind: Option<String>,
) -> anyhow::Result<()> {
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {bind}"))?;

    let scheduler = build_scheduler(job.clone(), &config.scheduler).await?;
    if let Some(scheduler) = &scheduler {
        scheduler.start().await.context("starting scheduler")?;
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Billing mirror listening on {}", addr);

    axum::serve(listener, router(job))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(mut scheduler) = scheduler {
        if let Err(e) = scheduler.shutdown().await {
            error!("Scheduler shutdown failed: {}", e);
        }
    }
    info!("Billing mirror stopped");

    Ok(())
}

async fn run_once(job: &RenewalReconciliationJob, request: RunRequest) -> anyhow::Result<()> {
    let response = job.trigger(request, TriggerSource::Cli).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if !response.success {
        anyhow::bail!(response.message);
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
