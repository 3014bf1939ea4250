use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use coffer_attachments::AttachmentServiceBuilder;
use coffer_server::api::AppState;
use coffer_server::config::CofferConfig;
use coffer_server::storage_factory;
use coffer_server::sweeper::OrphanSweeper;

/// Coffer HTTP server.
#[derive(Parser, Debug)]
#[command(name = "coffer-server", about = "Standalone HTTP server for Coffer")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "coffer.toml")]
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
    /// Create the database schema of the configured storage backend, then exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration from TOML file, or use defaults if the file does not exist.
    let config_exists = Path::new(&cli.config).exists();
    let config: CofferConfig = if config_exists {
        let contents = std::fs::read_to_string(&cli.config)?;
        toml::from_str(&contents)?
    } else {
        toml::from_str("")?
    };

    coffer_server::logging::init(&config.logging);

    if !config_exists {
        info!(path = %cli.config, "config file not found, using defaults");
    }

    if let Some(Commands::Migrate) = cli.command {
        info!(backend = %config.storage.backend, "running storage migrations...");
        storage_factory::run_migrations(&config.storage).await?;
        info!("migrations complete");
        return Ok(());
    }

    let stores = storage_factory::create_stores(&config.storage).await?;
    let service = Arc::new(
        AttachmentServiceBuilder::new()
            .records(stores.records)
            .blobs(stores.blobs)
            .max_upload_bytes(config.attachments.max_upload_bytes)
            .build()?,
    );
    info!(
        backend = %config.storage.backend,
        max_upload_bytes = config.attachments.max_upload_bytes,
        "attachment service initialized"
    );

    // Start the orphan sweeper unless disabled.
    let sweeper = config.attachments.sweep_interval().map(|period| {
        let (sweeper, shutdown_tx) = OrphanSweeper::new(
            Arc::clone(&service),
            period,
            config.attachments.sweep_grace(),
        );
        (tokio::spawn(sweeper.run()), shutdown_tx)
    });
    if sweeper.is_none() {
        info!("orphan sweeper disabled");
    }

    let app = coffer_server::api::router(AppState { service });

    // Resolve the bind address (CLI overrides take precedence).
    let host = cli.host.unwrap_or(config.server.host);
    let port = cli.port.unwrap_or(config.server.port);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "coffer-server listening");

    // Serve with graceful shutdown on SIGINT / SIGTERM.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the sweeper, letting an in-flight sweep finish within the timeout.
    if let Some((handle, shutdown_tx)) = sweeper {
        let _ = shutdown_tx.send(()).await;
        let timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);
        if tokio::time::timeout(timeout, handle).await.is_err() {
            tracing::warn!(
                timeout_secs = config.server.shutdown_timeout_seconds,
                "shutdown timeout exceeded, abandoning orphan sweep"
            );
        }
    }

    info!("coffer-server shut down");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
