//! Common types and utilities for feedplay.
//!
//! This crate defines the shared data structures and IPC protocol used for
//! communication between the feed host daemon (`feedplayd`) and the feed
//! container client (`feedctl`).
//!
//! # IPC Protocol
//!
//! Communication happens over a Unix domain socket using newline-delimited
//! JSON messages. The client sends [`Command`] variants and receives
//! [`Response`] variants.
//!
//! # Examples
//!
//! ```no_run
//! use common::{Candidate, Command, ItemId, Rect, SourceLocator};
//!
//! // Report one video item filling the top half of an 800pt viewport
//! let cmd = Command::Visibility {
//!     viewport: Rect::new(0.0, 0.0, 390.0, 800.0),
//!     candidates: vec![Candidate {
//!         id: ItemId(1),
//!         source: SourceLocator::from("bundle:beach"),
//!         frame: Rect::new(0.0, 0.0, 390.0, 400.0),
//!     }],
//! };
//!
//! // Serialize for sending over IPC
//! let json = serde_json::to_string(&cmd).unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Common error types shared between client and daemon.
///
/// All errors are serializable for transmission over IPC.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum FeedError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Unknown item: {0}")]
    UnknownItem(ItemId),
}

impl From<std::io::Error> for FeedError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        Self::Ipc(e.to_string())
    }
}

/// Stable identity of one feed slot that may host video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Locator of a video source.
///
/// Accepted forms are `bundle:<name>`, `file://<path>`, `http(s)://...` and
/// plain filesystem paths. Resolution is left to the player backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceLocator(String);

impl SourceLocator {
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SourceLocator {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SourceLocator {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Axis-aligned rectangle in feed (point) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Top edge
    pub fn min_y(&self) -> f64 {
        self.y
    }

    /// Bottom edge
    pub fn max_y(&self) -> f64 {
        self.y + self.height
    }

    /// True when every coordinate is a finite number
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }
}

/// One video-bearing item as reported by the feed container on a scroll tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Slot identity
    pub id: ItemId,
    /// Media the slot currently shows
    pub source: SourceLocator,
    /// On-screen frame in the same coordinate space as the viewport
    pub frame: Rect,
}

/// Application lifecycle transitions injected by the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    /// The app moved to the background
    EnteredBackground,
    /// The app is about to return to the foreground
    WillEnterForeground,
    /// The app became active again
    DidBecomeActive,
}

impl LifecycleEvent {
    /// Parse a lifecycle event name (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "background" | "backgrounded" | "entered-background" => Some(Self::EnteredBackground),
            "foreground" | "will-foreground" | "will-enter-foreground" => {
                Some(Self::WillEnterForeground)
            }
            "active" | "did-become-active" => Some(Self::DidBecomeActive),
            _ => None,
        }
    }
}

/// Playback notifications for optional UI feedback (e.g. a play/pause glyph).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackEvent {
    Started(ItemId),
    Stopped(ItemId),
    LoadFailed { item: ItemId, error: String },
}

impl PlaybackEvent {
    pub fn item(&self) -> ItemId {
        match self {
            Self::Started(item) | Self::Stopped(item) => *item,
            Self::LoadFailed { item, .. } => *item,
        }
    }
}

/// Playback phase of one feed slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemPhase {
    Idle,
    Preloading,
    Playing,
    Paused,
    Failed,
}

/// Commands sent from the feed container (client) to the host daemon.
#[derive(Debug, Serialize, Deserialize)]
pub enum Command {
    /// Report the viewport and every video-bearing item currently laid out.
    ///
    /// Sent on every scroll tick, drag begin/end, deceleration end and
    /// programmatic scroll end.
    Visibility {
        viewport: Rect,
        candidates: Vec<Candidate>,
    },
    /// The slot is about to be reused for different content
    WillRecycle { item: ItemId },
    /// App lifecycle transition
    Lifecycle { event: LifecycleEvent },
    /// User toggled the mute button on an item
    SetMuted { item: ItemId, muted: bool },
    /// Query coordinator status
    Status,
    /// Ping the daemon
    Ping,
    /// Kill the daemon
    Kill,
}

/// Response from daemon to client
#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Error(FeedError),
    /// Playback events emitted while handling the command
    Events(Vec<PlaybackEvent>),
    Status(FeedStatus),
    Pong,
}

/// Snapshot of the playback coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub enabled: bool,
    pub playing: Vec<ItemId>,
    pub preloaded: Vec<SourceLocator>,
    pub resource_count: usize,
    pub items: Vec<ItemStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemStatus {
    pub id: ItemId,
    pub source: SourceLocator,
    pub frame: Rect,
    pub phase: ItemPhase,
    pub has_resource: bool,
    pub muted: bool,
}

/// IPC socket path helper
pub fn get_socket_path() -> std::path::PathBuf {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .unwrap_or_else(|_| format!("/run/user/{}", unsafe { libc::getuid() }));

    std::path::PathBuf::from(runtime_dir).join("feedplay.sock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_edges() {
        let rect = Rect::new(0.0, 780.0, 390.0, 400.0);
        assert_eq!(rect.min_y(), 780.0);
        assert_eq!(rect.max_y(), 1180.0);
        assert!(rect.is_finite());
        assert!(!Rect::new(0.0, f64::NAN, 1.0, 1.0).is_finite());
    }

    #[test]
    fn test_lifecycle_parse() {
        assert_eq!(
            LifecycleEvent::parse("background"),
            Some(LifecycleEvent::EnteredBackground)
        );
        assert_eq!(
            LifecycleEvent::parse("Foreground"),
            Some(LifecycleEvent::WillEnterForeground)
        );
        assert_eq!(
            LifecycleEvent::parse("active"),
            Some(LifecycleEvent::DidBecomeActive)
        );
        assert!(LifecycleEvent::parse("suspended").is_none());
    }

    #[test]
    fn test_playback_event_item() {
        assert_eq!(PlaybackEvent::Started(ItemId(3)).item(), ItemId(3));
        let failed = PlaybackEvent::LoadFailed {
            item: ItemId(9),
            error: "missing".to_string(),
        };
        assert_eq!(failed.item(), ItemId(9));
    }

    #[test]
    fn test_identifiers_serialize_transparently() {
        let json = serde_json::to_string(&ItemId(42)).unwrap();
        assert_eq!(json, "42");

        let json = serde_json::to_string(&SourceLocator::from("bundle:beach")).unwrap();
        assert_eq!(json, "\"bundle:beach\"");
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Error(FeedError::UnknownItem(ItemId(7)));
        let json = serde_json::to_string(&resp).unwrap();
        let deserialized: Response = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            deserialized,
            Response::Error(FeedError::UnknownItem(ItemId(7)))
        ));

        let resp = Response::Events(vec![PlaybackEvent::Stopped(ItemId(1))]);
        let json = serde_json::to_string(&resp).unwrap();
        let deserialized: Response = serde_json::from_str(&json).unwrap();
        match deserialized {
            Response::Events(events) => assert_eq!(events, vec![PlaybackEvent::Stopped(ItemId(1))]),
            _ => panic!("Wrong response type"),
        }
    }

    #[test]
    fn test_feed_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "socket missing");
        let err: FeedError = io_err.into();
        assert!(matches!(err, FeedError::Io(_)));

        let json_err = serde_json::from_str::<Command>("invalid json").unwrap_err();
        let err: FeedError = json_err.into();
        assert!(matches!(err, FeedError::Ipc(_)));
    }

    #[test]
    fn test_socket_path() {
        let path = get_socket_path();
        assert!(path.to_str().unwrap().contains("feedplay.sock"));
    }
}
