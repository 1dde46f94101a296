use anyhow::{Context as _, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use syncd::config::{self, ConfigStore, DEFAULT_PORT};
use syncd::{control, drift, Engine};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "syncd", about = "Video playout phase-synchronization engine", version)]
struct Args {
    /// HTTP/WebSocket control surface port
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory holding config.json
    #[arg(long, env = "SYNCD_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error), or an EnvFilter directive
    #[arg(long, env = "SYNCD_LOG", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log);

    info!(version = env!("CARGO_PKG_VERSION"), "syncd starting");

    let engine_config = match config::load(&args.data_dir) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(err = %e, "failed to load config — refusing to start");
            std::process::exit(1);
        }
    };
    info!(
        data_dir = %args.data_dir.display(),
        fps = engine_config.fps,
        slots = engine_config.slots.len(),
        "config loaded"
    );

    let fps = engine_config.fps;
    let loop_frames = engine_config.loop_frames;
    let store = ConfigStore::new(args.data_dir.clone(), engine_config);
    let engine = Arc::new(Engine::new(store, fps, loop_frames));

    let (drift_shutdown_tx, drift_shutdown_rx) = tokio::sync::oneshot::channel();
    let drift_engine = engine.clone();
    let drift_handle = tokio::spawn(async move {
        drift::run(drift_engine, drift_shutdown_rx).await;
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let control_engine = engine.clone();
    let control_handle = tokio::spawn(async move { control::serve(control_engine, addr).await });

    tokio::select! {
        res = control_handle => {
            match res {
                Ok(Ok(())) => warn!("control surface exited"),
                Ok(Err(e)) => {
                    error!(err = %e, "control surface failed to bind or serve");
                    std::process::exit(1);
                }
                Err(e) => error!(err = %e, "control surface task panicked"),
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    let _ = drift_shutdown_tx.send(());
    match tokio::time::timeout(std::time::Duration::from_secs(5), drift_handle).await {
        Ok(_) => info!("drift controller stopped cleanly"),
        Err(_) => warn!("drift controller did not stop within the 5s shutdown deadline"),
    }

    Ok(())
}

/// Resolves on SIGINT or SIGTERM (Unix) / Ctrl-C (all platforms).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .context("failed to install Ctrl-C handler")
            .ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => warn!(err = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn setup_logging(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(log_level.to_owned())
        .compact()
        .init();
}
