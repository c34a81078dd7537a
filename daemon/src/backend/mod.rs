//! Player backends
//!
//! A backend turns a [`SourceLocator`] into a playable pipeline and drives
//! it. Construction and control calls are synchronous; priming, end of media
//! and late playback errors complete asynchronously and are reported as
//! [`BackendEvent`]s on the channel handed to the backend at creation. The
//! host loop feeds those events back into the coordinator on its own task, so
//! backends never touch coordinator or pool state directly.
//!
//! - `simulated`: timer-driven backend for development and demos
//! - `gstreamer`: `playbin` pipelines (requires the `video` feature)

mod simulated;

#[cfg(feature = "video")]
mod gstreamer;

pub use simulated::SimulatedBackend;

#[cfg(feature = "video")]
pub use self::gstreamer::GstBackend;

use crate::resource_pool::ResourceId;
use common::SourceLocator;
use thiserror::Error;

/// Failures reported by a player backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The locator could not be resolved into media
    #[error("cannot resolve source {0}")]
    Unresolvable(String),

    /// Pipeline construction failed after the source resolved
    #[cfg_attr(not(feature = "video"), allow(dead_code))]
    #[error("failed to construct player: {0}")]
    Construction(String),

    /// Pre-roll did not complete
    #[error("priming failed: {0}")]
    Priming(String),

    /// Error while playing or changing state
    #[error("playback failed: {0}")]
    Playback(String),
}

/// Asynchronous completion delivered back to the host loop
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// Pre-roll for a preloaded resource finished
    Primed {
        id: ResourceId,
        result: Result<(), BackendError>,
    },
    /// Media reached its end while playing
    ReachedEnd { id: ResourceId },
    /// Late error from a resource that was already constructed
    #[cfg_attr(not(feature = "video"), allow(dead_code))]
    Failed { id: ResourceId, error: BackendError },
}

/// Constructs and controls playable resources
pub trait PlayerBackend {
    /// Backend-specific pipeline handle
    type Player;

    /// Build a new muted player bound to `source`
    fn create(&mut self, id: ResourceId, source: &SourceLocator) -> Result<Self::Player, BackendError>;

    /// Start zero-rate pre-roll. Completion arrives as [`BackendEvent::Primed`].
    fn prime(&mut self, id: ResourceId, player: &mut Self::Player) -> Result<(), BackendError>;

    fn play(&mut self, player: &mut Self::Player) -> Result<(), BackendError>;

    fn pause(&mut self, player: &mut Self::Player) -> Result<(), BackendError>;

    fn seek_to_start(&mut self, player: &mut Self::Player) -> Result<(), BackendError>;

    fn set_muted(&mut self, player: &mut Self::Player, muted: bool) -> Result<(), BackendError>;

    /// Tear the player down. Pending completions for it become stale.
    fn release(&mut self, player: Self::Player);
}
