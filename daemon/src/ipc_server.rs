use anyhow::Result;
use common::{Command, FeedError, Response};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::{DaemonState, FeedCommand, FeedRequest};

pub async fn start(
    state: Arc<Mutex<DaemonState>>,
    feed_tx: mpsc::UnboundedSender<FeedRequest>,
) -> Result<()> {
    let socket_path = common::get_socket_path();

    // Remove old socket if it exists
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }

    let listener = UnixListener::bind(&socket_path)?;
    log::info!("IPC server listening on: {}", socket_path.display());

    loop {
        if state.lock().await.should_exit {
            break;
        }

        // Accept connections with timeout
        let accept_result =
            tokio::time::timeout(std::time::Duration::from_millis(100), listener.accept()).await;

        match accept_result {
            Ok(Ok((stream, _addr))) => {
                let state = state.clone();
                let tx = feed_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, state, tx).await {
                        log::error!("Error handling client: {}", e);
                    }
                });
            }
            Ok(Err(e)) => {
                log::error!("Error accepting connection: {}", e);
            }
            Err(_) => {
                // Timeout, continue loop to check exit condition
                continue;
            }
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    log::info!("IPC server stopped");
    Ok(())
}

async fn handle_client(
    stream: UnixStream,
    state: Arc<Mutex<DaemonState>>,
    feed_tx: mpsc::UnboundedSender<FeedRequest>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<Command>(&line) {
            Ok(command) => handle_command(command, &state, &feed_tx).await,
            Err(e) => {
                log::warn!("Invalid command: {}", e);
                Response::Error(FeedError::Ipc(format!("Invalid command: {}", e)))
            }
        };

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        line.clear();
    }

    Ok(())
}

async fn handle_command(
    command: Command,
    state: &Arc<Mutex<DaemonState>>,
    feed_tx: &mpsc::UnboundedSender<FeedRequest>,
) -> Response {
    log::debug!("Handling command: {:?}", command);

    match command {
        Command::Ping => Response::Pong,

        Command::Kill => {
            log::info!("Received kill command, shutting down");
            state.lock().await.should_exit = true;
            Response::Ok
        }

        Command::Visibility {
            viewport,
            candidates,
        } => {
            if viewport.height <= 0.0 || !viewport.is_finite() {
                return Response::Error(FeedError::Ipc(format!(
                    "Invalid viewport: {}x{} at ({}, {})",
                    viewport.width, viewport.height, viewport.x, viewport.y
                )));
            }
            log::trace!(
                "Visibility update: viewport y={} h={}, {} candidates",
                viewport.y,
                viewport.height,
                candidates.len()
            );
            forward(
                feed_tx,
                FeedCommand::Visibility {
                    viewport,
                    candidates,
                },
            )
            .await
        }

        Command::WillRecycle { item } => forward(feed_tx, FeedCommand::WillRecycle(item)).await,

        Command::Lifecycle { event } => {
            log::info!("Lifecycle transition: {:?}", event);
            forward(feed_tx, FeedCommand::Lifecycle(event)).await
        }

        Command::SetMuted { item, muted } => {
            log::info!("Setting item {} muted: {}", item, muted);
            forward(feed_tx, FeedCommand::SetMuted { item, muted }).await
        }

        Command::Status => forward(feed_tx, FeedCommand::Status).await,
    }
}

/// Hand a command to the feed host and wait for its answer
async fn forward(feed_tx: &mpsc::UnboundedSender<FeedRequest>, command: FeedCommand) -> Response {
    let (reply, response) = oneshot::channel();

    if let Err(e) = feed_tx.send(FeedRequest { command, reply }) {
        return Response::Error(FeedError::Ipc(format!(
            "Failed to send command: {}",
            e
        )));
    }

    match response.await {
        Ok(response) => response,
        Err(_) => Response::Error(FeedError::Ipc(
            "Feed host stopped before answering".to_string(),
        )),
    }
}
