//! Timer-driven player backend
//!
//! Resolves locators the way a real backend would (files must exist), then
//! fakes decoding with tokio timers: priming completes after a fixed delay
//! and a playing clip reports end of media every `clip_duration`.

use super::{BackendError, BackendEvent, PlayerBackend};
use crate::config::SimulatedSettings;
use crate::resource_pool::ResourceId;
use common::SourceLocator;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

pub struct SimulatedPlayer {
    id: ResourceId,
    source: SourceLocator,
    /// Bumped on every state change so stale timers can tell they lost
    epoch: Arc<AtomicU64>,
    playing: bool,
    muted: bool,
}

impl SimulatedPlayer {
    fn invalidate_timers(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }
}

pub struct SimulatedBackend {
    settings: SimulatedSettings,
    events: mpsc::UnboundedSender<BackendEvent>,
}

impl SimulatedBackend {
    pub fn new(settings: SimulatedSettings, events: mpsc::UnboundedSender<BackendEvent>) -> Self {
        Self { settings, events }
    }

    fn resolve(source: &SourceLocator) -> Result<(), BackendError> {
        let locator = source.as_str();

        if let Some(name) = locator.strip_prefix("bundle:") {
            if name.is_empty() {
                return Err(BackendError::Unresolvable(locator.to_string()));
            }
            return Ok(());
        }

        if locator.starts_with("http://") || locator.starts_with("https://") {
            return Ok(());
        }

        let path = locator.strip_prefix("file://").unwrap_or(locator);
        if path.is_empty() {
            return Err(BackendError::Unresolvable(locator.to_string()));
        }

        let expanded = shellexpand::tilde(path);
        if Path::new(expanded.as_ref()).is_file() {
            Ok(())
        } else {
            Err(BackendError::Unresolvable(locator.to_string()))
        }
    }

    fn schedule_end_of_media(&self, player: &SimulatedPlayer) {
        if self.settings.clip_duration_ms == 0 {
            return;
        }

        let epoch = Arc::clone(&player.epoch);
        let armed_at = epoch.load(Ordering::Acquire);
        let duration = Duration::from_millis(self.settings.clip_duration_ms);
        let events = self.events.clone();
        let id = player.id;

        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if epoch.load(Ordering::Acquire) == armed_at {
                let _ = events.send(BackendEvent::ReachedEnd { id });
            }
        });
    }
}

impl PlayerBackend for SimulatedBackend {
    type Player = SimulatedPlayer;

    fn create(&mut self, id: ResourceId, source: &SourceLocator) -> Result<SimulatedPlayer, BackendError> {
        Self::resolve(source)?;
        log::debug!("Simulated player {} created for {}", id, source);

        Ok(SimulatedPlayer {
            id,
            source: source.clone(),
            epoch: Arc::new(AtomicU64::new(0)),
            playing: false,
            muted: true,
        })
    }

    fn prime(&mut self, id: ResourceId, player: &mut SimulatedPlayer) -> Result<(), BackendError> {
        let fails = self
            .settings
            .failing_sources
            .iter()
            .any(|failing| failing == player.source.as_str());
        let delay = Duration::from_millis(self.settings.prime_delay_ms);
        let events = self.events.clone();
        let source = player.source.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let result = if fails {
                Err(BackendError::Priming(format!("{} could not be pre-rolled", source)))
            } else {
                Ok(())
            };
            let _ = events.send(BackendEvent::Primed { id, result });
        });

        Ok(())
    }

    fn play(&mut self, player: &mut SimulatedPlayer) -> Result<(), BackendError> {
        if player.playing {
            return Ok(());
        }
        player.invalidate_timers();
        player.playing = true;
        self.schedule_end_of_media(player);
        Ok(())
    }

    fn pause(&mut self, player: &mut SimulatedPlayer) -> Result<(), BackendError> {
        player.invalidate_timers();
        player.playing = false;
        Ok(())
    }

    fn seek_to_start(&mut self, player: &mut SimulatedPlayer) -> Result<(), BackendError> {
        player.invalidate_timers();
        // Restart the clip clock for a player that keeps playing
        if player.playing {
            self.schedule_end_of_media(player);
        }
        Ok(())
    }

    fn set_muted(&mut self, player: &mut SimulatedPlayer, muted: bool) -> Result<(), BackendError> {
        player.muted = muted;
        Ok(())
    }

    fn release(&mut self, player: SimulatedPlayer) {
        player.invalidate_timers();
        log::debug!(
            "Simulated player {} released ({}, muted: {})",
            player.id,
            player.source,
            player.muted
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(clip_duration_ms: u64) -> SimulatedSettings {
        SimulatedSettings {
            prime_delay_ms: 5,
            clip_duration_ms,
            failing_sources: vec!["bundle:broken".to_string()],
        }
    }

    #[test]
    fn test_resolve_locators() {
        assert!(SimulatedBackend::resolve(&SourceLocator::from("bundle:beach")).is_ok());
        assert!(SimulatedBackend::resolve(&SourceLocator::from("https://cdn.example/v.mp4")).is_ok());
        assert!(SimulatedBackend::resolve(&SourceLocator::from("bundle:")).is_err());
        assert!(SimulatedBackend::resolve(&SourceLocator::from("")).is_err());
        assert!(SimulatedBackend::resolve(&SourceLocator::from("/definitely/not/here.mp4")).is_err());

        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().display().to_string();
        assert!(SimulatedBackend::resolve(&SourceLocator::new(path.clone())).is_ok());
        assert!(SimulatedBackend::resolve(&SourceLocator::new(format!("file://{}", path))).is_ok());
    }

    #[tokio::test]
    async fn test_priming_reports_completion() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut backend = SimulatedBackend::new(settings(0), tx);

        let mut good = backend.create(ResourceId(1), &SourceLocator::from("bundle:beach")).unwrap();
        let mut bad = backend.create(ResourceId(2), &SourceLocator::from("bundle:broken")).unwrap();
        backend.prime(ResourceId(1), &mut good).unwrap();
        backend.prime(ResourceId(2), &mut bad).unwrap();

        let mut results = Vec::new();
        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            results.push(event);
        }

        assert!(results.contains(&BackendEvent::Primed {
            id: ResourceId(1),
            result: Ok(())
        }));
        assert!(results.iter().any(|event| matches!(
            event,
            BackendEvent::Primed {
                id: ResourceId(2),
                result: Err(BackendError::Priming(_))
            }
        )));
    }

    #[tokio::test]
    async fn test_end_of_media_only_while_playing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut backend = SimulatedBackend::new(settings(10), tx);
        let mut player = backend.create(ResourceId(7), &SourceLocator::from("bundle:loop")).unwrap();

        backend.play(&mut player).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, BackendEvent::ReachedEnd { id: ResourceId(7) });

        backend.pause(&mut player).unwrap();
        backend.release(player);
        let late = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(late.is_err() || late.unwrap().is_none());
    }
}
