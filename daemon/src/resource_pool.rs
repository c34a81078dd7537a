//! Playable resource pool
//!
//! Sole owner of every player the feed creates. Resources live in an arena
//! keyed by [`ResourceId`]; ids are never reused, so a completion that names
//! an id the arena no longer holds is stale by construction. Items only keep
//! the id of their attached resource.
//!
//! Two kinds of resources are held:
//! - attached: handed out by [`PlaybackResourcePool::acquire_or_create`] and
//!   bound to one item until it is recycled
//! - preloaded: primed ahead of time, keyed by source, at most `ceiling`

use crate::backend::{BackendError, PlayerBackend};
use common::SourceLocator;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Arena handle of a playable resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Default number of preloaded-but-not-playing resources
pub const DEFAULT_PRELOAD_CEILING: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Pre-roll requested, completion pending
    Priming,
    /// Prepared, not playing
    Ready,
    Playing,
    Paused,
}

pub struct PlayableResource<P> {
    pub source: SourceLocator,
    pub state: ResourceState,
    pub muted: bool,
    /// Monotonic use marker, drives eviction order
    pub last_used: u64,
    player: P,
}

/// Result of a preload request
#[derive(Debug, Clone, PartialEq)]
pub enum PreloadOutcome {
    Started(ResourceId),
    /// A resource for this source already exists
    AlreadyPresent,
    /// Preload set is full
    AtCapacity,
    /// Construction or priming failed, nothing was kept
    Failed(BackendError),
}

/// What a priming completion turned out to mean
#[derive(Debug, Clone, PartialEq)]
pub enum PrimeOutcome {
    Ready,
    /// Preloaded resource failed to pre-roll and was released
    Discarded(BackendError),
    /// The resource was released before the completion arrived
    Stale,
    /// The resource had already been handed to an item when pre-roll failed
    AttachedFailed(BackendError),
}

pub struct PlaybackResourcePool<B: PlayerBackend> {
    backend: B,
    resources: HashMap<ResourceId, PlayableResource<B::Player>>,
    preloaded: HashMap<SourceLocator, ResourceId>,
    ceiling: usize,
    next_id: u64,
    clock: u64,
}

impl<B: PlayerBackend> PlaybackResourcePool<B> {
    pub fn new(backend: B, ceiling: usize) -> Self {
        Self {
            backend,
            resources: HashMap::new(),
            preloaded: HashMap::new(),
            ceiling,
            next_id: 0,
            clock: 0,
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Total resources held, attached and preloaded
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn preloaded_count(&self) -> usize {
        self.preloaded.len()
    }

    pub fn is_preloaded(&self, source: &SourceLocator) -> bool {
        self.preloaded.contains_key(source)
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.resources.contains_key(&id)
    }

    pub fn get(&self, id: ResourceId) -> Option<&PlayableResource<B::Player>> {
        self.resources.get(&id)
    }

    /// Preloaded sources, least recently used first
    pub fn preloaded_sources(&self) -> Vec<SourceLocator> {
        let mut entries: Vec<(u64, &SourceLocator)> = self
            .preloaded
            .iter()
            .filter_map(|(source, id)| self.resources.get(id).map(|r| (r.last_used, source)))
            .collect();
        entries.sort();
        entries.into_iter().map(|(_, source)| source.clone()).collect()
    }

    fn has_resource_for(&self, source: &SourceLocator) -> bool {
        self.preloaded.contains_key(source) || self.resources.values().any(|r| &r.source == source)
    }

    fn allocate_id(&mut self) -> ResourceId {
        self.next_id += 1;
        ResourceId(self.next_id)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn touch(&mut self, id: ResourceId) {
        let now = self.tick();
        if let Some(resource) = self.resources.get_mut(&id) {
            resource.last_used = now;
        }
    }

    fn construct(&mut self, source: &SourceLocator, state: ResourceState) -> Result<ResourceId, BackendError> {
        let id = self.allocate_id();
        let player = self.backend.create(id, source)?;
        let last_used = self.tick();

        self.resources.insert(
            id,
            PlayableResource {
                source: source.clone(),
                state,
                muted: true,
                last_used,
                player,
            },
        );
        Ok(id)
    }

    /// Take the preloaded resource for `source`, or construct a new muted one.
    ///
    /// The returned resource is no longer part of the preload set; it stays in
    /// the pool until [`release`](Self::release).
    pub fn acquire_or_create(&mut self, source: &SourceLocator) -> Result<ResourceId, BackendError> {
        if let Some(id) = self.preloaded.remove(source) {
            log::debug!("Reusing preloaded resource {} for {}", id, source);
            self.touch(id);
            return Ok(id);
        }

        let id = self.construct(source, ResourceState::Ready)?;
        log::debug!("Constructed resource {} for {}", id, source);
        Ok(id)
    }

    /// Construct and prime a resource for `source` without playing it.
    ///
    /// Best effort: failures discard the resource and are reported, never
    /// propagated.
    pub fn preload(&mut self, source: &SourceLocator) -> PreloadOutcome {
        if self.has_resource_for(source) {
            return PreloadOutcome::AlreadyPresent;
        }
        if self.preloaded.len() >= self.ceiling {
            return PreloadOutcome::AtCapacity;
        }

        let id = match self.construct(source, ResourceState::Priming) {
            Ok(id) => id,
            Err(e) => return PreloadOutcome::Failed(e),
        };

        let primed = match self.resources.get_mut(&id) {
            Some(resource) => self.backend.prime(id, &mut resource.player),
            None => Ok(()),
        };

        if let Err(e) = primed {
            log::debug!("Priming {} failed immediately: {}", source, e);
            self.discard(id);
            return PreloadOutcome::Failed(e);
        }

        self.preloaded.insert(source.clone(), id);
        log::debug!(
            "Preloading {} as {} ({}/{})",
            source,
            id,
            self.preloaded.len(),
            self.ceiling
        );
        PreloadOutcome::Started(id)
    }

    /// Apply an asynchronous priming completion
    pub fn complete_priming(&mut self, id: ResourceId, result: Result<(), BackendError>) -> PrimeOutcome {
        let Some(resource) = self.resources.get_mut(&id) else {
            return PrimeOutcome::Stale;
        };

        let source = resource.source.clone();
        let still_preloaded = self.preloaded.get(&source) == Some(&id);

        match (result, still_preloaded) {
            (Ok(()), true) => {
                if resource.state == ResourceState::Priming {
                    resource.state = ResourceState::Ready;
                }
                PrimeOutcome::Ready
            }
            (Ok(()), false) => PrimeOutcome::Ready,
            (Err(e), true) => {
                self.preloaded.remove(&source);
                self.discard(id);
                PrimeOutcome::Discarded(e)
            }
            (Err(e), false) => PrimeOutcome::AttachedFailed(e),
        }
    }

    /// Release every preloaded resource whose source is not in `keep`
    pub fn evict_unused(&mut self, keep: &HashSet<SourceLocator>) -> Vec<SourceLocator> {
        let evicted: Vec<SourceLocator> = self
            .preloaded_sources()
            .into_iter()
            .filter(|source| !keep.contains(source))
            .collect();

        for source in &evicted {
            if let Some(id) = self.preloaded.remove(source) {
                log::debug!("Evicting preloaded {} ({})", source, id);
                self.discard(id);
            }
        }

        evicted
    }

    /// Release the preloaded resource for `source`, if any
    pub fn cancel_preload(&mut self, source: &SourceLocator) -> Option<ResourceId> {
        let id = self.preloaded.remove(source)?;
        self.discard(id);
        Some(id)
    }

    pub fn play(&mut self, id: ResourceId) -> Result<(), BackendError> {
        self.touch(id);
        let resource = self.resources.get_mut(&id).ok_or_else(|| unavailable(id))?;
        self.backend.play(&mut resource.player)?;
        resource.state = ResourceState::Playing;
        Ok(())
    }

    pub fn pause(&mut self, id: ResourceId) -> Result<(), BackendError> {
        let resource = self.resources.get_mut(&id).ok_or_else(|| unavailable(id))?;
        self.backend.pause(&mut resource.player)?;
        resource.state = ResourceState::Paused;
        Ok(())
    }

    /// Seek to the start and keep playing (loop on end of media)
    pub fn restart(&mut self, id: ResourceId) -> Result<(), BackendError> {
        self.touch(id);
        let resource = self.resources.get_mut(&id).ok_or_else(|| unavailable(id))?;
        self.backend.seek_to_start(&mut resource.player)?;
        self.backend.play(&mut resource.player)?;
        resource.state = ResourceState::Playing;
        Ok(())
    }

    pub fn set_muted(&mut self, id: ResourceId, muted: bool) -> Result<(), BackendError> {
        let resource = self.resources.get_mut(&id).ok_or_else(|| unavailable(id))?;
        if resource.muted != muted {
            self.backend.set_muted(&mut resource.player, muted)?;
            resource.muted = muted;
        }
        Ok(())
    }

    /// Pause and release one resource, attached or preloaded
    pub fn release(&mut self, id: ResourceId) {
        if let Some(resource) = self.resources.get(&id)
            && self.preloaded.get(&resource.source) == Some(&id)
        {
            let source = resource.source.clone();
            self.preloaded.remove(&source);
        }
        self.discard(id);
    }

    /// Pause and release everything
    pub fn release_all(&mut self) {
        let count = self.resources.len();
        self.preloaded.clear();
        let ids: Vec<ResourceId> = self.resources.keys().copied().collect();
        for id in ids {
            self.discard(id);
        }
        if count > 0 {
            log::info!("Released {} playback resources", count);
        }
    }

    fn discard(&mut self, id: ResourceId) {
        if let Some(mut resource) = self.resources.remove(&id) {
            if resource.state == ResourceState::Playing
                && let Err(e) = self.backend.pause(&mut resource.player)
            {
                log::debug!("Pause before release of {} failed: {}", id, e);
            }
            self.backend.release(resource.player);
        }
    }

    #[cfg(test)]
    pub(crate) fn backend(&self) -> &B {
        &self.backend
    }
}

fn unavailable(id: ResourceId) -> BackendError {
    BackendError::Playback(format!("resource {} is no longer available", id))
}
