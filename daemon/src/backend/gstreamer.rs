//! GStreamer player backend
//!
//! One `playbin` per resource with fake sinks, so decoding and clock sync run
//! without a display. Priming is the PAUSED pre-roll. A watcher thread per
//! player pops bus messages and forwards them to the host loop:
//!
//! - `AsyncDone` while priming: [`BackendEvent::Primed`] with `Ok`
//! - `Error` while priming: [`BackendEvent::Primed`] with the error
//! - `Error` otherwise: [`BackendEvent::Failed`]
//! - `Eos`: [`BackendEvent::ReachedEnd`]

use super::{BackendError, BackendEvent, PlayerBackend};
use crate::resource_pool::ResourceId;
use common::SourceLocator;
use gstreamer as gst;
use gstreamer::prelude::*;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;

/// How long the watcher blocks on the bus before re-checking its flags
const BUS_POLL_MS: u64 = 200;

/// Initialize GStreamer once; later calls return the first outcome
fn initialize_gstreamer() -> Result<(), BackendError> {
    static GSTREAMER_INITIALIZED: OnceLock<Result<(), String>> = OnceLock::new();

    GSTREAMER_INITIALIZED
        .get_or_init(|| {
            gst::init().map_err(|e| e.to_string())?;
            log::info!("GStreamer initialized");
            Ok(())
        })
        .clone()
        .map_err(BackendError::Construction)
}

/// Turn a locator into a URI `playbin` understands
fn resolve_uri(source: &SourceLocator) -> Result<String, BackendError> {
    let locator = source.as_str();

    if locator.starts_with("http://") || locator.starts_with("https://") || locator.starts_with("file://") {
        return Ok(locator.to_string());
    }

    if locator.starts_with("bundle:") {
        // Bundled assets only exist inside the host app
        return Err(BackendError::Unresolvable(locator.to_string()));
    }

    let expanded = shellexpand::tilde(locator);
    let path = Path::new(expanded.as_ref())
        .canonicalize()
        .map_err(|_| BackendError::Unresolvable(locator.to_string()))?;

    Ok(format!("file://{}", path.display()))
}

struct WatchFlags {
    priming: AtomicBool,
    released: AtomicBool,
}

pub struct GstPlayer {
    pipeline: gst::Element,
    flags: Arc<WatchFlags>,
}

pub struct GstBackend {
    events: mpsc::UnboundedSender<BackendEvent>,
}

impl GstBackend {
    pub fn new(events: mpsc::UnboundedSender<BackendEvent>) -> Result<Self, BackendError> {
        initialize_gstreamer()?;
        Ok(Self { events })
    }

    fn spawn_watcher(&self, id: ResourceId, pipeline: &gst::Element, flags: Arc<WatchFlags>) -> Result<(), BackendError> {
        let bus = pipeline
            .bus()
            .ok_or_else(|| BackendError::Construction("pipeline has no bus".to_string()))?;
        let events = self.events.clone();

        std::thread::Builder::new()
            .name(format!("gst-watch-{}", id.0))
            .spawn(move || {
                let types = [
                    gst::MessageType::AsyncDone,
                    gst::MessageType::Eos,
                    gst::MessageType::Error,
                ];

                while !flags.released.load(Ordering::Acquire) {
                    let Some(msg) =
                        bus.timed_pop_filtered(gst::ClockTime::from_mseconds(BUS_POLL_MS), &types)
                    else {
                        continue;
                    };

                    let event = match msg.view() {
                        gst::MessageView::AsyncDone(_) => {
                            if flags.priming.swap(false, Ordering::AcqRel) {
                                Some(BackendEvent::Primed { id, result: Ok(()) })
                            } else {
                                None
                            }
                        }
                        gst::MessageView::Eos(_) => Some(BackendEvent::ReachedEnd { id }),
                        gst::MessageView::Error(err) => {
                            log::warn!(
                                "GStreamer error on resource {}: {} (debug: {:?})",
                                id,
                                err.error(),
                                err.debug()
                            );
                            let description = err.error().to_string();
                            if flags.priming.swap(false, Ordering::AcqRel) {
                                Some(BackendEvent::Primed {
                                    id,
                                    result: Err(BackendError::Priming(description)),
                                })
                            } else {
                                Some(BackendEvent::Failed {
                                    id,
                                    error: BackendError::Playback(description),
                                })
                            }
                        }
                        _ => None,
                    };

                    if let Some(event) = event
                        && events.send(event).is_err()
                    {
                        // Host loop is gone
                        break;
                    }
                }

                log::trace!("Bus watcher for resource {} exiting", id);
            })
            .map_err(|e| BackendError::Construction(format!("failed to spawn bus watcher: {}", e)))?;

        Ok(())
    }

    fn set_state(player: &GstPlayer, state: gst::State) -> Result<(), BackendError> {
        player
            .pipeline
            .set_state(state)
            .map(|_| ())
            .map_err(|e| BackendError::Playback(format!("state change to {:?} failed: {}", state, e)))
    }
}

impl PlayerBackend for GstBackend {
    type Player = GstPlayer;

    fn create(&mut self, id: ResourceId, source: &SourceLocator) -> Result<GstPlayer, BackendError> {
        let uri = resolve_uri(source)?;
        log::debug!("Creating playbin for resource {}: {}", id, uri);

        let video_sink = gst::ElementFactory::make("fakesink")
            .property("sync", true)
            .build()
            .map_err(|e| BackendError::Construction(e.to_string()))?;
        let audio_sink = gst::ElementFactory::make("fakesink")
            .property("sync", true)
            .build()
            .map_err(|e| BackendError::Construction(e.to_string()))?;

        let pipeline = gst::ElementFactory::make("playbin")
            .name(format!("feed-player-{}", id.0))
            .property("uri", &uri)
            .property("mute", true)
            .property("video-sink", &video_sink)
            .property("audio-sink", &audio_sink)
            .build()
            .map_err(|e| BackendError::Construction(e.to_string()))?;

        let flags = Arc::new(WatchFlags {
            priming: AtomicBool::new(false),
            released: AtomicBool::new(false),
        });
        self.spawn_watcher(id, &pipeline, Arc::clone(&flags))?;

        Ok(GstPlayer { pipeline, flags })
    }

    fn prime(&mut self, id: ResourceId, player: &mut GstPlayer) -> Result<(), BackendError> {
        player.flags.priming.store(true, Ordering::Release);
        match player.pipeline.set_state(gst::State::Paused) {
            Ok(gst::StateChangeSuccess::Async) => Ok(()),
            Ok(_) => {
                // Pre-rolled synchronously, nothing will arrive on the bus
                if player.flags.priming.swap(false, Ordering::AcqRel) {
                    let _ = self.events.send(BackendEvent::Primed { id, result: Ok(()) });
                }
                Ok(())
            }
            Err(e) => {
                player.flags.priming.store(false, Ordering::Release);
                Err(BackendError::Priming(e.to_string()))
            }
        }
    }

    fn play(&mut self, player: &mut GstPlayer) -> Result<(), BackendError> {
        Self::set_state(player, gst::State::Playing)
    }

    fn pause(&mut self, player: &mut GstPlayer) -> Result<(), BackendError> {
        Self::set_state(player, gst::State::Paused)
    }

    fn seek_to_start(&mut self, player: &mut GstPlayer) -> Result<(), BackendError> {
        player
            .pipeline
            .seek_simple(
                gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
                gst::ClockTime::ZERO,
            )
            .map_err(|e| BackendError::Playback(format!("seek to start failed: {}", e)))
    }

    fn set_muted(&mut self, player: &mut GstPlayer, muted: bool) -> Result<(), BackendError> {
        player.pipeline.set_property("mute", muted);
        Ok(())
    }

    fn release(&mut self, player: GstPlayer) {
        player.flags.released.store(true, Ordering::Release);
        if let Err(e) = player.pipeline.set_state(gst::State::Null) {
            log::warn!("Failed to set pipeline state to Null: {}", e);
        }
    }
}
