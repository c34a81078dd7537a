mod backend;
mod config;
mod coordinator;
mod feed_host;
mod ipc_server;
mod macros;
mod prefetch;
mod resource_pool;
mod visibility;

use anyhow::Result;
use common::{Candidate, ItemId, LifecycleEvent, Rect, Response};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, oneshot};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting feed playback daemon v{}", env!("CARGO_PKG_VERSION"));

    let config_path = config::Config::default_config_path()?;
    log::info!("Looking for config at: {}", config_path.display());

    let config = match config::Config::load() {
        Ok(cfg) => {
            log::info!("✓ Configuration loaded successfully");
            log::info!("  General settings:");
            log::info!("    - Log level: {}", cfg.general.log_level);
            log::info!("  Playback settings:");
            log::info!("    - Backend: {}", cfg.playback.backend);
            log::info!(
                "    - Visibility threshold: {}",
                cfg.playback.visibility_threshold
            );
            log::info!("    - Preload ceiling: {}", cfg.playback.preload_ceiling);
            log::info!(
                "    - Prefetch window: {} ahead, {} behind",
                cfg.playback.prefetch_ahead,
                cfg.playback.prefetch_behind
            );
            log::info!(
                "    - Muted by default: {}",
                if cfg.playback.default_muted { "yes" } else { "no" }
            );
            cfg
        }
        Err(e) => {
            log::warn!("Failed to load config: {}. Using defaults.", e);
            config::Config::default()
        }
    };

    let (feed_tx, feed_rx) = mpsc::unbounded_channel();
    let (backend_tx, backend_rx) = mpsc::unbounded_channel();

    let state = Arc::new(Mutex::new(DaemonState::new()));
    let settings = config.playback.coordinator_settings();

    let host_handle = match config.playback.backend.as_str() {
        #[cfg(feature = "video")]
        "gstreamer" => {
            let backend = backend::GstBackend::new(backend_tx)?;
            log::info!("Using GStreamer playback backend");
            feed_host::spawn(state.clone(), backend, settings, feed_rx, backend_rx)
        }
        other => {
            if other != "simulated" {
                log::warn!(
                    "Backend '{}' not compiled (build with --features video to enable), using simulated",
                    other
                );
            }
            let backend = backend::SimulatedBackend::new(config.simulated.clone(), backend_tx);
            log::info!("Using simulated playback backend");
            feed_host::spawn(state.clone(), backend, settings, feed_rx, backend_rx)
        }
    };

    // Start IPC server
    let ipc_state = state.clone();
    let ipc_handle = tokio::spawn(async move {
        if let Err(e) = ipc_server::start(ipc_state, feed_tx).await {
            log::error!("IPC server error: {}", e);
        }
    });

    // Set up signal handlers
    let signal_state = state.clone();
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    log::error!("Failed to setup signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                log::info!("Received SIGTERM, shutting down...");
            }
            _ = sigint.recv() => {
                log::info!("Received SIGINT, shutting down...");
            }
        }

        signal_state.lock().await.should_exit = true;
    });

    // Wait for either task to complete
    tokio::select! {
        result = ipc_handle => {
            log_and_continue!(result, "join IPC server");
            log::info!("IPC server stopped");
        }
        result = host_handle => {
            log_and_continue!(result, "join feed host");
            log::info!("Feed host stopped");
        }
    }

    log::info!("Daemon shutting down");
    Ok(())
}

/// Commands sent from IPC to the feed host
#[derive(Debug)]
pub enum FeedCommand {
    Visibility {
        viewport: Rect,
        candidates: Vec<Candidate>,
    },
    WillRecycle(ItemId),
    Lifecycle(LifecycleEvent),
    SetMuted {
        item: ItemId,
        muted: bool,
    },
    Status,
}

/// A command plus the channel its response goes back on
pub struct FeedRequest {
    pub command: FeedCommand,
    pub reply: oneshot::Sender<Response>,
}

/// Shared daemon state
pub struct DaemonState {
    pub should_exit: bool,
    pub start_time: std::time::Instant,
}

impl DaemonState {
    fn new() -> Self {
        Self {
            should_exit: false,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
