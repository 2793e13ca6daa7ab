//! Question relay worker
//!
//! Runs two independent tasks on one runtime:
//! - the supervised consume loop answering questions from the input queue
//! - the HTTP surface (`/health`, `/chat`, `/questions`, `/metrics`)
//!
//! They share no mutable state; both stop on SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use qa_api::{create_router, AppState};
use qa_common::telemetry::init_tracing;
use qa_config::AppConfig;
use qa_queue::Producer;
use qa_worker::{Completer, GeminiCompleter, Worker};
use tokio::{net::TcpListener, signal};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "qa-worker")]
#[command(about = "Answers queued questions and serves the relay HTTP API")]
struct Args {
    /// TOML configuration file
    #[arg(long, env = "QA_CONFIG_FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    info!("Starting question relay worker");

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    let completer: Arc<dyn Completer> = Arc::new(
        GeminiCompleter::new(&config.completion).context("Failed to create completion client")?,
    );
    let producer = Arc::new(Producer::new(config.broker.clone(), config.queues.input.clone()));

    // Consume loop
    let worker = Worker::new(config.clone(), completer.clone()).context("Failed to create worker")?;
    let worker_task = tokio::spawn(async move { worker.run().await });

    // HTTP surface
    let app = create_router(AppState {
        completer,
        publisher: producer,
        metrics: Some(metrics),
    })
    .layer(TraceLayer::new_for_http());

    let addr = config.api.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "HTTP server failed");
        }
    });

    log_startup_summary(&config);

    shutdown_signal().await;
    info!("Shutdown signal received...");

    worker_task.abort();
    server_task.abort();

    info!("Question relay worker shutdown complete");
    Ok(())
}

fn log_startup_summary(config: &AppConfig) {
    info!("=== Question Relay Startup Summary ===");
    info!(
        "  Broker: {}:{} (vhost {})",
        config.broker.host, config.broker.port, config.broker.vhost
    );
    info!("  Input queue: {}", config.queues.input);
    info!("  Response queue: {}", config.queues.responses);
    info!("  Max retries: {}", config.retry.max_retries);
    info!("  Completion model: {}", config.completion.model);
    if config.delivery.bot_user_id.is_nil() {
        info!("  Direct delivery: Disabled (BOT_USER_ID not set)");
    } else {
        info!("  Direct delivery: {}", config.delivery.base_url);
    }
    info!("  HTTP API: {}", config.api.bind_address());
    info!("  Worker id: {}", config.worker.processed_by);
    info!("======================================");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
