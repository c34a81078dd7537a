//! Feed host loop
//!
//! Owns the [`PlaybackCoordinator`] and serializes everything that touches
//! it: IPC requests arrive on one channel, backend completions on another.
//! Playback events the coordinator emits while handling a backend completion
//! are held back and delivered with the next command response.

use crate::backend::{BackendEvent, PlayerBackend};
use crate::coordinator::{CoordinatorSettings, PlaybackCoordinator};
use crate::{DaemonState, FeedCommand, FeedRequest};
use anyhow::Result;
use common::{LifecycleEvent, PlaybackEvent, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Build the coordinator for `backend` and run the host loop on its own task
pub fn spawn<B>(
    state: Arc<Mutex<DaemonState>>,
    backend: B,
    settings: CoordinatorSettings,
    requests: mpsc::UnboundedReceiver<FeedRequest>,
    backend_events: mpsc::UnboundedReceiver<BackendEvent>,
) -> JoinHandle<()>
where
    B: PlayerBackend + Send + 'static,
    B::Player: Send + 'static,
{
    let (playback_tx, playback_rx) = mpsc::unbounded_channel();
    let coordinator = PlaybackCoordinator::new(backend, settings, playback_tx);

    tokio::spawn(async move {
        if let Err(e) = run(state, coordinator, requests, backend_events, playback_rx).await {
            log::error!("Feed host error: {}", e);
        }
    })
}

pub async fn run<B: PlayerBackend>(
    state: Arc<Mutex<DaemonState>>,
    mut coordinator: PlaybackCoordinator<B>,
    mut requests: mpsc::UnboundedReceiver<FeedRequest>,
    mut backend_events: mpsc::UnboundedReceiver<BackendEvent>,
    mut playback_events: mpsc::UnboundedReceiver<PlaybackEvent>,
) -> Result<()> {
    log::info!("Feed host started");
    let mut exit_check = tokio::time::interval(Duration::from_millis(100));
    let mut pending: Vec<PlaybackEvent> = Vec::new();

    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(FeedRequest { command, reply }) = request else {
                    log::info!("Request channel closed");
                    break;
                };

                let response = match command {
                    FeedCommand::Status => {
                        let uptime = state.lock().await.uptime_secs();
                        Response::Status(coordinator.snapshot(uptime))
                    }
                    command => match apply(&mut coordinator, command) {
                        Ok(()) => {
                            drain_into(&mut playback_events, &mut pending);
                            Response::Events(std::mem::take(&mut pending))
                        }
                        Err(e) => Response::Error(e),
                    },
                };

                if reply.send(response).is_err() {
                    log::debug!("Client went away before the response was ready");
                }
            }

            Some(event) = backend_events.recv() => {
                log::trace!("Backend event: {:?}", event);
                coordinator.handle_backend_event(event);
                drain_into(&mut playback_events, &mut pending);
            }

            _ = exit_check.tick() => {
                if state.lock().await.should_exit {
                    break;
                }
            }
        }
    }

    coordinator.shutdown();
    log::info!("Feed host stopped");
    Ok(())
}

fn apply<B: PlayerBackend>(
    coordinator: &mut PlaybackCoordinator<B>,
    command: FeedCommand,
) -> Result<(), common::FeedError> {
    match command {
        FeedCommand::Visibility {
            viewport,
            candidates,
        } => coordinator.on_visibility_changed(&viewport, &candidates),
        FeedCommand::WillRecycle(item) => coordinator.item_will_recycle(item),
        FeedCommand::Lifecycle(event) => match event {
            LifecycleEvent::EnteredBackground => coordinator.entered_background(),
            LifecycleEvent::WillEnterForeground => coordinator.will_enter_foreground(),
            LifecycleEvent::DidBecomeActive => coordinator.did_become_active(),
        },
        FeedCommand::SetMuted { item, muted } => coordinator.set_muted(item, muted)?,
        FeedCommand::Status => {}
    }
    Ok(())
}

fn drain_into(events: &mut mpsc::UnboundedReceiver<PlaybackEvent>, pending: &mut Vec<PlaybackEvent>) {
    while let Ok(event) = events.try_recv() {
        pending.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedBackend;
    use crate::config::SimulatedSettings;
    use common::{Candidate, ItemId, Rect, SourceLocator};
    use tokio::sync::oneshot;

    async fn request(tx: &mpsc::UnboundedSender<FeedRequest>, command: FeedCommand) -> Response {
        let (reply, rx) = oneshot::channel();
        tx.send(FeedRequest { command, reply }).unwrap();
        rx.await.unwrap()
    }

    fn visibility(offset: f64) -> FeedCommand {
        FeedCommand::Visibility {
            viewport: Rect::new(0.0, 0.0, 390.0, 800.0),
            candidates: (1..=4)
                .map(|id| Candidate {
                    id: ItemId(id),
                    source: SourceLocator::new(format!("bundle:clip{}", id)),
                    frame: Rect::new(0.0, (id - 1) as f64 * 500.0 - offset, 390.0, 400.0),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_host_round_trip() {
        let state = Arc::new(Mutex::new(DaemonState::new()));
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let (backend_tx, backend_rx) = mpsc::unbounded_channel();
        let settings = SimulatedSettings {
            prime_delay_ms: 1,
            clip_duration_ms: 0,
            failing_sources: vec!["bundle:clip3".to_string()],
        };
        let backend = SimulatedBackend::new(settings, backend_tx);
        let handle = spawn(
            state.clone(),
            backend,
            CoordinatorSettings::default(),
            feed_rx,
            backend_rx,
        );

        let Response::Events(events) = request(&feed_tx, visibility(0.0)).await else {
            panic!("expected events");
        };
        assert_eq!(
            events,
            vec![
                PlaybackEvent::Started(ItemId(1)),
                PlaybackEvent::Started(ItemId(2))
            ]
        );

        // Let the failing pre-roll of item 3 complete
        tokio::time::sleep(Duration::from_millis(50)).await;

        let Response::Status(status) = request(&feed_tx, FeedCommand::Status).await else {
            panic!("expected status");
        };
        assert_eq!(status.playing, vec![ItemId(1), ItemId(2)]);
        assert_eq!(status.preloaded, vec![SourceLocator::from("bundle:clip4")]);

        let response = request(
            &feed_tx,
            FeedCommand::SetMuted {
                item: ItemId(42),
                muted: false,
            },
        )
        .await;
        assert!(matches!(response, Response::Error(_)));

        let Response::Events(events) = request(
            &feed_tx,
            FeedCommand::Lifecycle(LifecycleEvent::EnteredBackground),
        )
        .await
        else {
            panic!("expected events");
        };
        assert_eq!(events.len(), 2);

        state.lock().await.should_exit = true;
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
