use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use sluice_core::AccountId;
use sluice_pipeline::Pipeline;
use sluice_server::api::AppState;
use sluice_server::config::SluiceConfig;

/// Sluice ingestion pipeline server.
#[derive(Parser, Debug)]
#[command(name = "sluice-server", about = "HTTP front door and queue worker for Sluice")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "sluice.toml")]
    config: String,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP API, plus the queue worker when `[worker] enabled`.
    Serve,
    /// Consume the queue without serving HTTP.
    Worker,
    /// Generate and store a new API key for an account, printing it.
    IssueKey {
        #[arg(long)]
        account: String,
    },
    /// Store an account's destination and transform expression.
    SetConfig {
        #[arg(long)]
        account: String,
        #[arg(long)]
        destination: String,
        #[arg(long)]
        expression: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = SluiceConfig::load(&cli.config)?;
    let telemetry_guard = sluice_server::telemetry::init(&config.telemetry);

    if !std::path::Path::new(&cli.config).exists() {
        info!(path = %cli.config, "config file not found, using defaults");
    }

    let collaborators = sluice_server::backend::create_collaborators(&config).await?;
    let pipeline = Arc::new(Pipeline::new(&collaborators, config.pipeline_config()));

    let result = match cli.command {
        Some(Commands::IssueKey { account }) => {
            let key = pipeline.provisioner().issue_api_key(&account).await?;
            println!("{key}");
            Ok(())
        }
        Some(Commands::SetConfig {
            account,
            destination,
            expression,
        }) => {
            let account_id = AccountId::parse(&account)?;
            let saved = pipeline
                .provisioner()
                .put_config(account_id, &destination, &expression)
                .await?;
            println!("configuration saved for {}", saved.account_id);
            Ok(())
        }
        Some(Commands::Worker) => run_worker(&pipeline, &config).await,
        Some(Commands::Serve) | None => serve(pipeline, &config, cli.host, cli.port).await,
    };

    telemetry_guard.shutdown();
    result
}

/// Run the HTTP server, with the queue worker alongside when enabled.
async fn serve(
    pipeline: Arc<Pipeline>,
    config: &SluiceConfig,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let worker = config.worker.enabled.then(|| {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let mut worker = pipeline.worker(shutdown_rx);
        let handle = tokio::spawn(async move { worker.run().await });
        (shutdown_tx, handle)
    });

    let app = sluice_server::api::router(AppState {
        pipeline,
        max_body_bytes: config.server.max_body_bytes,
    });

    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, worker = config.worker.enabled, "sluice-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some((shutdown_tx, handle)) = worker {
        // A closed channel means the worker already stopped.
        let _ = shutdown_tx.send(()).await;
        let timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "queue worker task failed"),
            Err(_) => warn!(
                timeout_secs = config.server.shutdown_timeout_seconds,
                "queue worker did not stop in time, in-flight messages will be redelivered"
            ),
        }
    }

    info!("sluice-server shut down");
    Ok(())
}

/// Consume the queue until SIGINT or SIGTERM.
async fn run_worker(
    pipeline: &Pipeline,
    config: &SluiceConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let mut worker = pipeline.worker(shutdown_rx);
    let mut handle = tokio::spawn(async move { worker.run().await });

    tokio::select! {
        () = shutdown_signal() => {
            let _ = shutdown_tx.send(()).await;
            let timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);
            if tokio::time::timeout(timeout, &mut handle).await.is_err() {
                warn!("queue worker did not stop in time, in-flight messages will be redelivered");
            }
        }
        joined = &mut handle => joined?,
    }

    info!("queue worker shut down");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
