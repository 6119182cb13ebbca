#![forbid(unsafe_code)]

use bucketd_lib::config::{load_from_path, validate, Config};
use bucketd_lib::server;
use bucketd_lib::telemetry::init_tracing;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Per-address UDP admission service (token buckets)")]
struct Cli {
    /// Path to configuration TOML file; built-in defaults are used when absent
    #[arg(short, long, value_name = "FILE", env = "BUCKETD_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen address from the configuration
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = match load_config(&cli) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = init_tracing(&cfg.logging) {
        eprintln!("failed to initialize logging: {err}");
        std::process::exit(1);
    }
    info!(?cfg.listen, config = ?cli.config, "configuration loaded");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
        // Keep the sender alive until the server has observed the change.
        shutdown_tx.closed().await;
    });

    if let Err(err) = server::run(Arc::new(cfg), shutdown_rx).await {
        error!(%err, "admission service exited with error");
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> bucketd_lib::Result<Config> {
    let mut cfg = match &cli.config {
        Some(path) => load_from_path(path)?,
        None => Config::default(),
    };
    if let Some(listen) = cli.listen {
        cfg.listen = listen;
        validate(&cfg)?;
    }
    Ok(cfg)
}

/// Waits for SIGINT or SIGTERM (Ctrl+C elsewhere).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot register SIGTERM handler, waiting for SIGINT only");
                if ctrl_c.await.is_ok() {
                    info!("received SIGINT, shutting down");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        match ctrl_c.await {
            Ok(()) => info!("received Ctrl+C, shutting down"),
            Err(e) => {
                warn!(error = %e, "cannot listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    }
}
