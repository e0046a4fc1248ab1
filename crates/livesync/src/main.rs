//! Livesync client binary
//!
//! Reads the settings file, starts one supervised session per host and runs
//! until a daemon asks for shutdown or the user interrupts.

use anyhow::{Context, Result};
use livesync::ssh::{LocalBinaries, ProcessTransport};
use livesync::{IdleForwarder, Session, Settings, Supervisor};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_SETTINGS: &str = "livesync.json";

#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS));
    let settings = Settings::load(&path)
        .with_context(|| format!("Cannot load settings from {}", path.display()))?;

    let default_level = if settings.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("Starting livesync for {} host(s)", settings.hosts.len());

    let catalog = Arc::new(LocalBinaries::new(
        settings.binaries_dir.clone(),
        env!("CARGO_PKG_VERSION"),
    ));
    let transport = Arc::new(ProcessTransport::new());
    let forwarder = Arc::new(IdleForwarder);

    let mut sessions = JoinSet::new();
    for config in settings.session_configs() {
        let supervisor = Supervisor::new(
            Session::new(config),
            transport.clone(),
            catalog.clone(),
            forwarder.clone(),
        );
        sessions.spawn(async move { supervisor.run().await });
    }

    tokio::select! {
        joined = sessions.join_next() => match joined {
            Some(Ok(request)) => info!("Shutdown requested by {}", request.host),
            Some(Err(e)) => error!("Session task failed: {}", e),
            None => info!("No sessions to run"),
        },
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Cannot listen for interrupt: {}", e);
            }
            info!("Interrupted");
        }
    }

    sessions.shutdown().await;
    info!("Livesync shutting down");
    Ok(())
}
