//! Tessera server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use tessera_core::config::AppConfig;
use tessera_server::sweeper::{self, QueueConsumer, SweepScheduler};
use tessera_server::{AppState, create_router};
use tessera_sync::queue;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tessera - a read-through image cache
#[derive(Parser, Debug)]
#[command(name = "tesserad")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "TESSERA_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Tessera v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    tessera_server::metrics::register_metrics();

    let storage = tessera_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    // Fail before serving if the store is unreachable
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(
        backend = storage.backend_name(),
        "Storage backend connectivity verified"
    );

    let origin = tessera_origin::from_config(&config.origin)
        .context("failed to initialize origin clients")?;

    let state = AppState::new(config.clone(), storage, origin);
    let shutdown = CancellationToken::new();

    let (queue_tx, queue_rx) =
        queue::channel(config.sweep.queue_capacity, config.sweep.queue_batch_size);
    let sweep = Arc::new(sweeper::build_sweep(&state, Arc::new(queue_tx)));

    let mut sweep_tasks = Vec::new();
    sweep_tasks.push(tokio::spawn(
        QueueConsumer::new(sweep.clone(), queue_rx).run(shutdown.clone()),
    ));
    if config.sweep.enabled {
        sweep_tasks.push(tokio::spawn(
            SweepScheduler::new(sweep, config.sweep.interval()).run(shutdown.clone()),
        ));
    } else {
        tracing::info!("Scheduled sweeps disabled");
    }

    let app = create_router(state.clone());
    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Let in-flight sweep pages and populates finish
    shutdown.cancel();
    for task in sweep_tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Sweep task ended abnormally");
        }
    }
    state.background.close();
    tracing::info!(
        pending = state.background.len(),
        "Waiting for background populates"
    );
    state.background.wait_idle().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Load configuration from the optional file and `TESSERA_` environment
/// variables. At least one of the two must be present.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    let has_config_file = std::path::Path::new(path).exists();

    if has_config_file {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("TESSERA_") && key != "TESSERA_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: tesserad --config /path/to/config.toml\n  \
             2. Environment variables: TESSERA_ORIGIN__GOOGLE_DRIVE__CLIENT_ID=... \
             TESSERA_ORIGIN__GOOGLE_DRIVE__REFRESH_TOKEN=... tesserad\n\n\
             Set TESSERA_CONFIG to change the default config file path."
        );
    }

    figment
        .merge(Env::prefixed("TESSERA_").split("__"))
        .extract()
        .context("failed to load configuration")
}

/// Resolve on Ctrl-C or SIGTERM, or when something else cancels `shutdown`.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = shutdown.cancelled() => {}
    }
    tracing::info!("Shutdown signal received");
}
