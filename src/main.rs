//! AFROSTORM - continental early-warning monitor
//!
//! # Usage
//!
//! ```bash
//! # One detection cycle, JSON result on stdout
//! afrostorm monitor --once
//!
//! # Continuous monitoring + HTTP API (respects SIGINT/SIGTERM)
//! afrostorm monitor --daemon
//!
//! # Snapshot of recent runs and active hazards
//! afrostorm monitor --status
//! afrostorm monitor --recent 24
//!
//! # Alert tooling
//! afrostorm alerts --test mozambique
//! afrostorm alerts --stats
//! ```
//!
//! # Environment
//!
//! See `PipelineConfig::from_env`: `CHECK_INTERVAL_HOURS`, `BASIN_N/S/W/E`,
//! `MIN_PRESSURE_HPA`, `MIN_WIND_MS`, `CONVERGENCE_DISTANCE_KM`,
//! `SMTP_HOST/PORT/USER/PASSWORD/FROM`, `TRACKING_PIXEL_BASE`,
//! `CACHE_TTL_SECONDS`, `DB_PATH`, provider URLs, `RUST_LOG`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use afrostorm::alerts::{AlertPipeline, ChannelSet, EnglishTemplateRenderer};
use afrostorm::api::{create_app, ApiState};
use afrostorm::config::PipelineConfig;
use afrostorm::detectors::{CycloneDetector, Detector, FloodDetector, LandslideDetector};
use afrostorm::monitor::{AppState, CycleDeps, Scheduler};
use afrostorm::query::QueryEngine;
use afrostorm::sources::{
    CycloneForecastSource, HazardSource, OutbreakSurveillanceSource, ReanalysisSource,
    SarFloodSource, TerrainRainfallSource,
};
use afrostorm::store::HazardStore;
use afrostorm::types::HazardKind;
use afrostorm::validation;

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "afrostorm")]
#[command(about = "Continental hazard-intelligence and early-warning engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the detection pipeline
    Monitor {
        /// Single cycle; prints the run record as JSON
        #[arg(long)]
        once: bool,
        /// Continuous monitoring with the HTTP API
        #[arg(long)]
        daemon: bool,
        /// Print a snapshot of recent runs and active hazards
        #[arg(long)]
        status: bool,
        /// Print the last N hours of detections
        #[arg(long, value_name = "N")]
        recent: Option<i64>,
    },
    /// Alert tooling
    Alerts {
        /// Dry-run fanout for a country (renders messages, sends nothing)
        #[arg(long, value_name = "COUNTRY")]
        test: Option<String>,
        /// Print validation statistics
        #[arg(long)]
        stats: bool,
    },
}

// ============================================================================
// Wiring
// ============================================================================

/// Shared runtime handles built once at startup and injected everywhere
struct Runtime {
    config: Arc<PipelineConfig>,
    store: HazardStore,
    state: Arc<RwLock<AppState>>,
    alerts: Arc<AlertPipeline>,
    query: Arc<QueryEngine>,
    sources: Vec<Arc<dyn HazardSource>>,
}

fn build_sources(config: &PipelineConfig) -> Vec<Arc<dyn HazardSource>> {
    let timeout = Duration::from_secs(config.adapter_timeout_secs);
    let bulk = Duration::from_secs(config.bulk_timeout_secs);
    let mut sources: Vec<Arc<dyn HazardSource>> = Vec::new();

    if let Some(url) = &config.sources.cyclone_forecast_url {
        match CycloneForecastSource::new(url.clone(), timeout) {
            Ok(s) => sources.push(Arc::new(s)),
            Err(e) => warn!(error = %e, "cyclone forecast adapter disabled"),
        }
    }
    if let Some(url) = &config.sources.reanalysis_url {
        match ReanalysisSource::new(url.clone(), config.basin, bulk) {
            Ok(s) => sources.push(Arc::new(s)),
            Err(e) => warn!(error = %e, "reanalysis adapter disabled"),
        }
    }
    if let Some(url) = &config.sources.flood_api_url {
        match SarFloodSource::new(url.clone(), timeout) {
            Ok(s) => sources.push(Arc::new(s)),
            Err(e) => warn!(error = %e, "flood adapter disabled"),
        }
    }
    if let Some(url) = &config.sources.terrain_api_url {
        match TerrainRainfallSource::new(url.clone(), config.basin, bulk) {
            Ok(s) => sources.push(Arc::new(s)),
            Err(e) => warn!(error = %e, "terrain adapter disabled"),
        }
    }
    if let Some(url) = &config.sources.outbreak_api_url {
        match OutbreakSurveillanceSource::new(url.clone(), timeout) {
            Ok(s) => sources.push(Arc::new(s)),
            Err(e) => warn!(error = %e, "surveillance adapter disabled"),
        }
    }

    if sources.is_empty() {
        warn!("no source adapters configured - cycles will fetch nothing");
    }
    sources
}

fn build_detectors(config: &PipelineConfig) -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(CycloneDetector::new(
            config.basin,
            config.min_pressure_hpa,
            config.min_wind_ms,
        )),
        Box::new(FloodDetector::new(
            afrostorm::config::defaults::MIN_FLOOD_AREA_KM2,
        )),
        Box::new(LandslideDetector::default()),
    ]
}

async fn build_runtime() -> Result<Runtime> {
    let config = Arc::new(PipelineConfig::from_env().context("invalid configuration")?);

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create data directory {}", parent.display()))?;
    }
    let store = HazardStore::open(&config.db_path)
        .with_context(|| format!("cannot open hazard store at {}", config.db_path.display()))?;

    let sources = build_sources(&config);
    let state = Arc::new(RwLock::new(AppState {
        sources_available: sources.iter().map(|s| s.name().to_string()).collect(),
        ..AppState::default()
    }));

    let channels = ChannelSet::from_config(&config);
    info!(channels = ?channels.registered(), "delivery channels registered");

    let alerts = Arc::new(AlertPipeline::new(
        store.clone(),
        channels,
        Arc::new(EnglishTemplateRenderer),
        config.tracking_pixel_base.clone(),
        config.alert_dedup_hours,
    ));

    let query = Arc::new(QueryEngine::new(
        store.clone(),
        config.clone(),
        state.clone(),
    ));

    Ok(Runtime {
        config,
        store,
        state,
        alerts,
        query,
        sources,
    })
}

fn cycle_deps(runtime: &Runtime) -> CycleDeps {
    CycleDeps {
        config: runtime.config.clone(),
        store: runtime.store.clone(),
        sources: runtime.sources.clone(),
        detectors: build_detectors(&runtime.config),
        alerts: runtime.alerts.clone(),
        state: runtime.state.clone(),
    }
}

// ============================================================================
// Daemon supervisor
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    Scheduler,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::Scheduler => write!(f, "Scheduler"),
        }
    }
}

async fn run_daemon(runtime: Runtime, cancel: CancellationToken) -> Result<()> {
    let api_state = ApiState {
        query: runtime.query.clone(),
        store: runtime.store.clone(),
        alerts: runtime.alerts.clone(),
        app_state: runtime.state.clone(),
        config: runtime.config.clone(),
    };
    let app = create_app(api_state);

    let listener = tokio::net::TcpListener::bind(&runtime.config.server_addr)
        .await
        .with_context(|| format!("failed to bind {}", runtime.config.server_addr))?;
    info!(addr = %runtime.config.server_addr, "HTTP API listening");

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    // Task 1: HTTP server
    let http_cancel = cancel.clone();
    task_set.spawn(async move {
        info!("[HttpServer] task starting");
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                http_cancel.cancelled().await;
                info!("[HttpServer] shutdown signal received");
            })
            .await;
        match result {
            Ok(()) => Ok(TaskName::HttpServer),
            Err(e) => {
                error!("[HttpServer] server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });

    // Task 2: Scheduler
    let scheduler = Scheduler::new(cycle_deps(&runtime));
    let scheduler_cancel = cancel.clone();
    task_set.spawn(async move {
        info!("[Scheduler] task starting");
        scheduler.run_continuous(scheduler_cancel).await;
        Ok(TaskName::Scheduler)
    });

    // Supervisor loop
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("supervisor: task {} completed", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("supervisor: task failed: {}", e);
                        cancel.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("supervisor: task panicked: {}", e);
                        cancel.cancel();
                        return Err(anyhow::anyhow!("task panicked: {}", e));
                    }
                    None => break,
                }
            }
        }
    }

    // Let any in-flight cycle reach persistence quiescence
    while task_set.join_next().await.is_some() {}
    runtime.store.flush().context("final store flush failed")?;
    Ok(())
}

// ============================================================================
// Subcommands
// ============================================================================

async fn monitor_once(runtime: Runtime) -> Result<i32> {
    let scheduler = Scheduler::new(cycle_deps(&runtime));
    let run = scheduler.run_once(&CancellationToken::new()).await;
    println!("{}", serde_json::to_string_pretty(&run)?);
    Ok(match run.status {
        afrostorm::types::RunStatus::Success => 0,
        afrostorm::types::RunStatus::Error => 1,
    })
}

async fn monitor_status(runtime: Runtime) -> Result<()> {
    let summary = runtime.query.summary().await?;
    let runs = runtime.store.recent_runs(5);
    let snapshot = serde_json::json!({
        "active": serde_json::from_str::<serde_json::Value>(&summary)?,
        "recent_runs": runs,
        "total_runs": runtime.store.run_count(),
        "total_alerts": runtime.store.alert_count(),
        "sources": runtime.sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn monitor_recent(runtime: Runtime, hours: i64) -> Result<()> {
    let since = chrono::Utc::now() - chrono::Duration::hours(hours.max(1));
    let mut detections = Vec::new();
    for kind in [
        HazardKind::Cyclone,
        HazardKind::Flood,
        HazardKind::Landslide,
    ] {
        detections.extend(runtime.store.list_detections(kind, since)?);
    }
    detections.sort_by_key(|h| std::cmp::Reverse(h.detection_time()));
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "since": since,
            "count": detections.len(),
            "detections": detections,
        }))?
    );
    Ok(())
}

fn alerts_test(runtime: &Runtime, country: &str) -> Result<i32> {
    let hazard = afrostorm::api::handlers::sample_hazard(afrostorm::types::AlertType::Cyclone);
    match runtime.alerts.preview(&hazard, country) {
        Some((message, recipients)) => {
            println!("Dry-run fanout for {}:", country);
            println!();
            for recipient in &recipients {
                println!(
                    "  -> {} <{}> via {} (priority {})",
                    recipient.name, recipient.address, recipient.channel, recipient.priority
                );
            }
            println!();
            println!("Subject: {}", message.subject);
            println!();
            println!("{}", message.plain);
            Ok(0)
        }
        None => {
            eprintln!(
                "Unknown country '{}'. Try: mozambique, madagascar, malawi, zimbabwe, regional",
                country
            );
            Ok(1)
        }
    }
}

fn alerts_stats(runtime: &Runtime) -> Result<()> {
    let stats = validation::stats(&runtime.store)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "total_alerts": stats.total_alerts,
            "opened_alerts": stats.opened_alerts,
            "validated_alerts": stats.validated_alerts,
            "open_rate": stats.open_rate(),
            "validated_rate": stats.validated_rate(),
            "mean_lead_time_hours": stats.mean_lead_time_hours,
        }))?
    );
    Ok(())
}

// ============================================================================
// Entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let runtime = build_runtime().await?;

    let exit_code = match cli.command {
        Command::Monitor {
            once,
            daemon,
            status,
            recent,
        } => {
            if once {
                monitor_once(runtime).await?
            } else if daemon {
                let cancel = CancellationToken::new();

                // SIGINT / SIGTERM initiate graceful shutdown
                let signal_cancel = cancel.clone();
                tokio::spawn(async move {
                    let ctrl_c = tokio::signal::ctrl_c();
                    #[cfg(unix)]
                    {
                        let mut term = tokio::signal::unix::signal(
                            tokio::signal::unix::SignalKind::terminate(),
                        )
                        .expect("failed to install SIGTERM handler");
                        tokio::select! {
                            _ = ctrl_c => {}
                            _ = term.recv() => {}
                        }
                    }
                    #[cfg(not(unix))]
                    {
                        ctrl_c.await.ok();
                    }
                    info!("termination signal received, shutting down");
                    signal_cancel.cancel();
                });

                run_daemon(runtime, cancel).await?;
                info!("shutdown complete");
                0
            } else if status {
                monitor_status(runtime).await?;
                0
            } else if let Some(hours) = recent {
                monitor_recent(runtime, hours).await?;
                0
            } else {
                eprintln!("monitor requires one of --once, --daemon, --status, --recent N");
                2
            }
        }
        Command::Alerts { test, stats } => {
            if let Some(country) = test {
                alerts_test(&runtime, &country)?
            } else if stats {
                alerts_stats(&runtime)?;
                0
            } else {
                eprintln!("alerts requires one of --test COUNTRY, --stats");
                2
            }
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
