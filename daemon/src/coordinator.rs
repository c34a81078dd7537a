//! Playback coordinator
//!
//! Decides, per visibility update, which feed items play, which pause and
//! which sources get preloaded. All state is confined to the host loop's
//! task; asynchronous backend completions re-enter through
//! [`PlaybackCoordinator::handle_backend_event`].
//!
//! Per item the phases run `Idle -> Preloading -> Playing <-> Paused -> Idle`.
//! Looping at end of media is a seek and replay, not a phase change.

use crate::backend::{BackendError, BackendEvent, PlayerBackend};
use crate::prefetch::PrefetchWindow;
use crate::resource_pool::{PlaybackResourcePool, PrimeOutcome, PreloadOutcome, ResourceId};
use crate::visibility::VisibilityClassifier;
use common::{
    Candidate, FeedError, FeedStatus, ItemId, ItemPhase, ItemStatus, PlaybackEvent, Rect, SourceLocator,
};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

/// Tunables taken from the `[playback]` config section
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    pub visibility_threshold: f64,
    pub preload_ceiling: usize,
    pub prefetch: PrefetchWindow,
    pub default_muted: bool,
    pub loop_playback: bool,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            visibility_threshold: crate::visibility::DEFAULT_VISIBILITY_THRESHOLD,
            preload_ceiling: crate::resource_pool::DEFAULT_PRELOAD_CEILING,
            prefetch: PrefetchWindow::default(),
            default_muted: true,
            loop_playback: true,
        }
    }
}

/// One feed slot that may host video
#[derive(Debug, Clone)]
struct ItemSlot {
    source: SourceLocator,
    /// Last reported on-screen frame
    frame: Rect,
    /// Borrowed handle, the pool owns the resource
    resource: Option<ResourceId>,
    phase: ItemPhase,
    /// Set once the user touches the mute button
    muted_override: Option<bool>,
}

impl ItemSlot {
    fn new(candidate: &Candidate) -> Self {
        Self {
            source: candidate.source.clone(),
            frame: candidate.frame,
            resource: None,
            phase: ItemPhase::Idle,
            muted_override: None,
        }
    }
}

pub struct PlaybackCoordinator<B: PlayerBackend> {
    classifier: VisibilityClassifier,
    prefetch: PrefetchWindow,
    pool: PlaybackResourcePool<B>,
    items: HashMap<ItemId, ItemSlot>,
    /// Playing items in start order
    playing: Vec<ItemId>,
    enabled: bool,
    default_muted: bool,
    loop_playback: bool,
    events: mpsc::UnboundedSender<PlaybackEvent>,
}

impl<B: PlayerBackend> PlaybackCoordinator<B> {
    pub fn new(backend: B, settings: CoordinatorSettings, events: mpsc::UnboundedSender<PlaybackEvent>) -> Self {
        let classifier = VisibilityClassifier::new(settings.visibility_threshold);
        log::debug!(
            "Coordinator ready: threshold {}, preload ceiling {}, prefetch {}+{}",
            classifier.threshold(),
            settings.preload_ceiling,
            settings.prefetch.ahead,
            settings.prefetch.behind
        );

        Self {
            classifier,
            prefetch: settings.prefetch,
            pool: PlaybackResourcePool::new(backend, settings.preload_ceiling),
            items: HashMap::new(),
            playing: Vec::new(),
            enabled: true,
            default_muted: settings.default_muted,
            loop_playback: settings.loop_playback,
            events,
        }
    }

    fn emit(&self, event: PlaybackEvent) {
        log::debug!("Playback event: {:?}", event);
        // The host may have stopped listening during shutdown
        let _ = self.events.send(event);
    }

    /// Entry point for every scroll tick and drag/deceleration boundary
    pub fn on_visibility_changed(&mut self, viewport: &Rect, candidates: &[Candidate]) {
        self.sync_items(candidates);

        let report = self.classifier.classify(viewport, candidates);
        let upcoming = self.prefetch.upcoming(&report);
        self.update_visible_items(&report.visible_ids(), &upcoming);
    }

    /// Track the container's current slots. A slot that now shows a different
    /// source, or that is no longer reported, is treated as recycled.
    fn sync_items(&mut self, candidates: &[Candidate]) {
        let reported: HashSet<ItemId> = candidates.iter().map(|c| c.id).collect();
        let mut gone: Vec<ItemId> = self
            .items
            .keys()
            .filter(|id| !reported.contains(id))
            .copied()
            .collect();
        gone.sort();
        for id in gone {
            log::debug!("Item {} left the feed container", id);
            self.item_will_recycle(id);
        }

        for candidate in candidates {
            let same_source = self
                .items
                .get(&candidate.id)
                .map(|slot| slot.source == candidate.source);

            match same_source {
                Some(true) => {
                    if let Some(slot) = self.items.get_mut(&candidate.id) {
                        slot.frame = candidate.frame;
                    }
                }
                Some(false) => {
                    log::debug!("Item {} now shows {}", candidate.id, candidate.source);
                    self.item_will_recycle(candidate.id);
                    self.items.insert(candidate.id, ItemSlot::new(candidate));
                }
                None => {
                    self.items.insert(candidate.id, ItemSlot::new(candidate));
                }
            }
        }
    }

    /// Reconcile playback with the visible items.
    ///
    /// `visible` is ordered most visible first; `upcoming` lists out-of-view
    /// items expected next, most likely first.
    pub fn update_visible_items(&mut self, visible: &[ItemId], upcoming: &[ItemId]) {
        if !self.enabled {
            log::trace!("Coordinator disabled, ignoring visibility update");
            return;
        }

        let visible_set: HashSet<ItemId> = visible.iter().copied().collect();
        let to_stop: Vec<ItemId> = self
            .playing
            .iter()
            .filter(|id| !visible_set.contains(id))
            .copied()
            .collect();

        let mut seen = HashSet::new();
        let to_start: Vec<ItemId> = visible
            .iter()
            .filter(|id| seen.insert(**id) && !self.playing.contains(id))
            .copied()
            .collect();

        // Stops first, then starts
        for id in to_stop {
            self.stop_item(id);
        }
        for id in to_start {
            self.start_item(id);
        }

        self.evict_outside(visible, upcoming);
        self.preload_upcoming(upcoming);
    }

    fn stop_item(&mut self, id: ItemId) {
        self.playing.retain(|playing| *playing != id);

        if let Some(slot) = self.items.get_mut(&id) {
            // Resource stays attached while the item is a likely neighbor
            if let Some(resource) = slot.resource
                && let Err(e) = self.pool.pause(resource)
            {
                log::warn!("Failed to pause {} for item {}: {}", resource, id, e);
            }
            slot.phase = ItemPhase::Paused;
        }

        self.emit(PlaybackEvent::Stopped(id));
    }

    fn start_item(&mut self, id: ItemId) {
        let Some(slot) = self.items.get(&id) else {
            log::warn!("Cannot start unknown item {}", id);
            return;
        };
        if slot.phase == ItemPhase::Failed {
            return;
        }

        let source = slot.source.clone();
        let muted = slot.muted_override.unwrap_or(self.default_muted);
        let attached = slot.resource.filter(|resource| self.pool.contains(*resource));

        let resource = match attached {
            Some(resource) => resource,
            None => match self.pool.acquire_or_create(&source) {
                Ok(resource) => resource,
                Err(e) => {
                    self.fail_item(id, e);
                    return;
                }
            },
        };

        if let Some(slot) = self.items.get_mut(&id) {
            slot.resource = Some(resource);
        }

        let started = self
            .pool
            .set_muted(resource, muted)
            .and_then(|_| self.pool.play(resource));
        if let Err(e) = started {
            self.pool.release(resource);
            self.fail_item(id, e);
            return;
        }

        if let Some(slot) = self.items.get_mut(&id) {
            slot.phase = ItemPhase::Playing;
        }
        self.playing.push(id);
        log::debug!("Item {} playing {} on {} (muted: {})", id, source, resource, muted);
        self.emit(PlaybackEvent::Started(id));
    }

    /// Mark an item as unplayable until it is recycled
    fn fail_item(&mut self, id: ItemId, error: BackendError) {
        log::warn!("Video for item {} failed to load: {}", id, error);
        let was_playing = self.playing.contains(&id);
        self.playing.retain(|playing| *playing != id);
        if let Some(slot) = self.items.get_mut(&id) {
            slot.resource = None;
            slot.phase = ItemPhase::Failed;
        }
        if was_playing {
            self.emit(PlaybackEvent::Stopped(id));
        }
        self.emit(PlaybackEvent::LoadFailed {
            item: id,
            error: error.to_string(),
        });
    }

    fn preload_upcoming(&mut self, upcoming: &[ItemId]) {
        for id in upcoming {
            if self.idle_resources() >= self.pool.ceiling() {
                break;
            }

            let Some(slot) = self.items.get(id) else {
                continue;
            };
            if slot.resource.is_some() || slot.phase == ItemPhase::Failed {
                continue;
            }

            let source = slot.source.clone();
            match self.pool.preload(&source) {
                PreloadOutcome::Started(resource) => {
                    log::debug!("Preloading {} for upcoming item {} ({})", source, id, resource);
                    if let Some(slot) = self.items.get_mut(id) {
                        slot.phase = ItemPhase::Preloading;
                    }
                }
                PreloadOutcome::AlreadyPresent => {}
                PreloadOutcome::AtCapacity => break,
                PreloadOutcome::Failed(e) => {
                    log::debug!("Skipping preload of {} for item {}: {}", source, id, e);
                }
            }
        }
    }

    /// Resources held by items that are not playing, preloads included
    fn idle_resources(&self) -> usize {
        self.pool.len().saturating_sub(self.playing.len())
    }

    /// Release everything the visible and upcoming items will not need.
    ///
    /// Paused items share the preload ceiling: once idle resources exceed it,
    /// the least likely paused neighbors give theirs up first.
    fn evict_outside(&mut self, visible: &[ItemId], upcoming: &[ItemId]) {
        let keep: HashSet<SourceLocator> = visible
            .iter()
            .chain(upcoming)
            .filter_map(|id| self.items.get(id))
            .map(|slot| slot.source.clone())
            .collect();

        let evicted = self.pool.evict_unused(&keep);
        if !evicted.is_empty() {
            log::debug!("Evicted {} preloaded resources", evicted.len());
            self.refresh_preload_phases();
        }

        let mut scrolled_away: Vec<ItemId> = self
            .items
            .iter()
            .filter(|(_, slot)| {
                slot.phase == ItemPhase::Paused && slot.resource.is_some() && !keep.contains(&slot.source)
            })
            .map(|(id, _)| *id)
            .collect();
        scrolled_away.sort();
        for id in scrolled_away {
            self.detach_paused(id);
        }

        for id in upcoming.iter().rev() {
            if self.idle_resources() <= self.pool.ceiling() {
                break;
            }
            self.detach_paused(*id);
        }
    }

    /// Drop a paused item's resource; it is rebuilt on the next start
    fn detach_paused(&mut self, id: ItemId) {
        let Some(slot) = self.items.get_mut(&id) else {
            return;
        };
        if slot.phase != ItemPhase::Paused {
            return;
        }
        if let Some(resource) = slot.resource.take() {
            log::debug!("Releasing {} from paused item {}", resource, id);
            self.pool.release(resource);
        }
        slot.phase = ItemPhase::Idle;
    }

    /// Items waiting on a preload that no longer exists fall back to idle
    fn refresh_preload_phases(&mut self) {
        for slot in self.items.values_mut() {
            if slot.phase == ItemPhase::Preloading && !self.pool.is_preloaded(&slot.source) {
                slot.phase = ItemPhase::Idle;
            }
        }
    }

    fn owner_of(&self, resource: ResourceId) -> Option<ItemId> {
        self.items
            .iter()
            .find(|(_, slot)| slot.resource == Some(resource))
            .map(|(id, _)| *id)
    }

    /// App moved to the background: pause everything, drop every resource and
    /// ignore further visibility updates until foregrounded
    pub fn entered_background(&mut self) {
        log::info!("App entered background, pausing {} videos", self.playing.len());

        for id in std::mem::take(&mut self.playing) {
            if let Some(slot) = self.items.get_mut(&id) {
                if let Some(resource) = slot.resource
                    && let Err(e) = self.pool.pause(resource)
                {
                    log::warn!("Failed to pause {} for item {}: {}", resource, id, e);
                }
                slot.phase = ItemPhase::Paused;
            }
            self.emit(PlaybackEvent::Stopped(id));
        }

        // Hard cancellation: in-flight priming for released ids turns stale
        for slot in self.items.values_mut() {
            slot.resource = None;
            if slot.phase != ItemPhase::Failed {
                slot.phase = ItemPhase::Idle;
            }
        }
        self.pool.release_all();
        self.enabled = false;
    }

    /// Re-enable updates. Playback resumes on the next visibility update.
    pub fn will_enter_foreground(&mut self) {
        log::info!("App will enter foreground");
        self.enabled = true;
    }

    pub fn did_become_active(&mut self) {
        log::debug!("App became active");
        self.enabled = true;
    }

    /// The item's slot is about to show different content
    pub fn item_will_recycle(&mut self, id: ItemId) {
        let Some(slot) = self.items.remove(&id) else {
            return;
        };

        let was_playing = self.playing.contains(&id);
        self.playing.retain(|playing| *playing != id);

        if let Some(resource) = slot.resource {
            log::debug!("Releasing {} from recycled item {}", resource, id);
            self.pool.release(resource);
        }

        // An in-flight preload nobody else shows is cancelled; its completion turns stale
        if slot.phase == ItemPhase::Preloading
            && !self.items.values().any(|other| other.source == slot.source)
            && let Some(resource) = self.pool.cancel_preload(&slot.source)
        {
            log::debug!("Cancelled preload {} of recycled item {}", resource, id);
        }

        if was_playing {
            self.emit(PlaybackEvent::Stopped(id));
        }
    }

    /// Apply an asynchronous completion from the player backend
    pub fn handle_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Primed { id, result } => match self.pool.complete_priming(id, result) {
                PrimeOutcome::Ready => log::trace!("Resource {} primed", id),
                PrimeOutcome::Discarded(e) => {
                    log::debug!("Discarded preloaded resource {}: {}", id, e);
                    self.refresh_preload_phases();
                }
                PrimeOutcome::Stale => log::debug!("Ignoring stale priming completion for {}", id),
                PrimeOutcome::AttachedFailed(e) => {
                    self.pool.release(id);
                    if let Some(item) = self.owner_of(id) {
                        self.fail_item(item, e);
                    }
                }
            },

            BackendEvent::ReachedEnd { id } => {
                let Some(item) = self.owner_of(id) else {
                    log::debug!("End of media for released resource {}", id);
                    return;
                };
                if !self.playing.contains(&item) {
                    return;
                }
                if !self.loop_playback {
                    log::debug!("Item {} finished playing", item);
                    return;
                }

                log::trace!("Looping item {}", item);
                if let Err(e) = self.pool.restart(id) {
                    self.pool.release(id);
                    self.fail_item(item, e);
                }
            }

            BackendEvent::Failed { id, error } => {
                if let Some(item) = self.owner_of(id) {
                    self.pool.release(id);
                    self.fail_item(item, error);
                } else if self.pool.contains(id) {
                    log::debug!("Preloaded resource {} failed: {}", id, error);
                    self.pool.release(id);
                    self.refresh_preload_phases();
                } else {
                    log::debug!("Ignoring failure of released resource {}: {}", id, error);
                }
            }
        }
    }

    /// User toggled the mute button of an item
    pub fn set_muted(&mut self, id: ItemId, muted: bool) -> Result<(), FeedError> {
        let slot = self.items.get_mut(&id).ok_or(FeedError::UnknownItem(id))?;
        slot.muted_override = Some(muted);

        if let Some(resource) = slot.resource {
            self.pool
                .set_muted(resource, muted)
                .map_err(|e| FeedError::Playback(e.to_string()))?;
        }
        Ok(())
    }

    pub fn snapshot(&self, uptime_secs: u64) -> FeedStatus {
        let mut items: Vec<ItemStatus> = self
            .items
            .iter()
            .map(|(id, slot)| ItemStatus {
                id: *id,
                source: slot.source.clone(),
                frame: slot.frame,
                phase: slot.phase,
                has_resource: slot.resource.is_some(),
                muted: slot
                    .resource
                    .and_then(|resource| self.pool.get(resource))
                    .map(|resource| resource.muted)
                    .unwrap_or_else(|| slot.muted_override.unwrap_or(self.default_muted)),
            })
            .collect();
        items.sort_by_key(|item| item.id);

        FeedStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs,
            enabled: self.enabled,
            playing: self.playing.clone(),
            preloaded: self.pool.preloaded_sources(),
            resource_count: self.pool.len(),
            items,
        }
    }

    /// Release everything on teardown
    pub fn shutdown(&mut self) {
        log::info!(
            "Shutting down playback ({} items, {} resources)",
            self.items.len(),
            self.pool.len()
        );
        self.playing.clear();
        self.items.clear();
        self.pool.release_all();
    }
}

#[cfg(test)]
impl<B: PlayerBackend> PlaybackCoordinator<B> {
    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn playing(&self) -> &[ItemId] {
        &self.playing
    }

    pub(crate) fn pool(&self) -> &PlaybackResourcePool<B> {
        &self.pool
    }

    pub(crate) fn phase(&self, id: ItemId) -> Option<ItemPhase> {
        self.items.get(&id).map(|slot| slot.phase)
    }

    pub(crate) fn attached_resource(&self, id: ItemId) -> Option<ResourceId> {
        self.items.get(&id).and_then(|slot| slot.resource)
    }
}
