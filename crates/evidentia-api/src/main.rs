//! evidentia-api - HTTP server for the evidence pipeline

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use evidentia_db::{Database, PoolConfig};
use evidentia_inference::{backend_from_env, LinkClassifier, NarrativeGenerator};
use evidentia_jobs::{
    LinkingConfig, LinkingEngine, NarrativeConfig, NarrativeDrain, NarrativeQueue,
    PipelineScheduler, SchedulerConfig,
};

use evidentia_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "evidentia=debug,tower_http=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "evidentia_api=debug,evidentia_jobs=debug,evidentia_inference=info,evidentia_db=info,tower_http=info"
            .into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("evidentia-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    // Fail before any side effect when credentials are missing.
    let cron_secret = std::env::var("CRON_SECRET")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .context("CRON_SECRET must be set")?;
    let backend = backend_from_env()?;
    info!(model = backend.model_name(), "Inference backend ready");

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/evidentia".to_string());
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    info!("Connecting to database...");
    let db = Database::connect_with_config(&database_url, PoolConfig::from_env()).await?;
    info!("Database connected");

    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");

    let repos = db.repositories();
    let queue = NarrativeQueue::new(repos.narrative_jobs.clone());
    let linking = Arc::new(
        LinkingEngine::with_config(
            repos.clone(),
            LinkClassifier::new(backend.clone()),
            LinkingConfig::from_env(),
        )
        .with_change_sink(Arc::new(queue)),
    );
    let drain = Arc::new(NarrativeDrain::with_config(
        repos.clone(),
        NarrativeGenerator::new(backend),
        NarrativeConfig::from_env(),
    ));

    let scheduler_config = SchedulerConfig::from_env();
    let scheduler = if scheduler_config.enabled {
        Some(PipelineScheduler::new(linking.clone(), drain.clone(), scheduler_config).start())
    } else {
        info!("In-process scheduler disabled, relying on cron triggers");
        None
    };

    let app = router(AppState::new(repos, linking, drain, cron_secret));

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = scheduler {
        if let Err(e) = handle.shutdown().await {
            warn!(error = %e, "Scheduler did not shut down cleanly");
        }
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
