use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use evictd::config::MonitorConfig;
use evictd::dashboard::{self, StatusBoard};
use evictd::hooks;
use evictd::tracing::{init_tracing, shutdown_tracing};
use evictd::{metrics, CycleOrchestrator, DockerCli, SqliteAudit};

#[derive(Parser)]
#[command(name = "evictd")]
#[command(about = "Evicts containers that breach CPU/memory thresholds")]
struct Cli {
    /// TOML config file; defaults apply when it does not exist
    #[arg(long, default_value = "evictd.toml")]
    config: PathBuf,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Log eviction decisions without terminating anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let config = Arc::new(MonitorConfig::load_or_default(&cli.config)?);
    init_tracing(
        "evictd",
        config.telemetry.otlp_endpoint.as_deref(),
        config.telemetry.json_logs,
    )?;
    metrics::init();

    info!(
        config = %cli.config.display(),
        interval_secs = config.general.interval_secs,
        cpu_percent = config.thresholds.cpu_percent,
        mem_percent = config.thresholds.mem_percent,
        min_low = config.floors.min_low,
        min_high = config.floors.min_high,
        dry_run = cli.dry_run,
        "starting evictd"
    );

    let audit = SqliteAudit::open(&config.audit.database_path).map_err(|e| {
        error!(path = %config.audit.database_path.display(), error = %e, "cannot open audit database");
        e
    })?;

    let hook_timeout = config.runtime.command_timeout();
    hooks::run_commands("startup", &config.hooks.startup, hook_timeout).await;

    let board = StatusBoard::new();
    if let Some(addr) = &config.telemetry.metrics_addr {
        let addr: SocketAddr = addr.parse()?;
        let board = board.clone();
        tokio::spawn(async move {
            if let Err(e) = dashboard::serve(addr, board).await {
                error!(%addr, error = %e, "status server stopped");
            }
        });
    }

    let runtime = DockerCli::new(&config.runtime.docker_bin, config.runtime.command_timeout());
    let orchestrator =
        CycleOrchestrator::new(Arc::clone(&config), runtime, audit).with_dry_run(cli.dry_run);

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut ticker = tokio::time::interval(config.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let cycle_id = Uuid::now_v7();
                let span = tracing::info_span!("cycle", %cycle_id);
                match orchestrator.run_once().instrument(span).await {
                    Ok(summary) => board.record_success(summary),
                    Err(e) => {
                        warn!(%cycle_id, error = %e, "cycle aborted");
                        board.record_failure(&e);
                    }
                }
                if cli.once {
                    break;
                }
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                break;
            }
        }
    }

    hooks::run_commands("shutdown", &config.hooks.shutdown, hook_timeout).await;
    if config.hooks.stops_workloads(cli.dry_run) {
        let stopped = hooks::stop_all_workloads(orchestrator.runtime(), orchestrator.policy()).await;
        info!(stopped = stopped.len(), "stopped workloads on exit");
    }

    shutdown_tracing();
    Ok(())
}
