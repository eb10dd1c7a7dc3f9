//! Mixer graph and channel routing
//!
//! Mixers form a forest of fallback chains. Every mixer routes its channels
//! into one native backend mixer; when a user mixer goes away its channels are
//! handed to the first live mixer down its fallback chain instead of being
//! dropped. In shared-sink mode every native mixer is created decode-only and
//! attached to a single process-wide sink, which is invisible to callers.

pub mod channel;

pub use channel::{ChannelId, ChannelRef, MixerChannel};

use crate::domain::audio::{AudioBackend, AudioError, NativeHandle, Result};
use crate::domain::component::{AudioComponent, ComponentContainer, ContainerHandle};
use crate::domain::events::{EventRegistry, SubscriptionId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

static NEXT_USER_MIXER: AtomicU64 = AtomicU64::new(1);

/// Identifier for an anonymous mixer: `user #1`, `user #2`, ...
pub fn next_user_identifier() -> String {
    format!("user #{}", NEXT_USER_MIXER.fetch_add(1, Ordering::Relaxed))
}

/// Handle to a mixer inside a [`MixerGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MixerId(u32);

impl MixerId {
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for MixerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mixer-{}", self.0)
    }
}

/// Entry of the active mixer list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixerInfo {
    pub id: MixerId,
    pub identifier: String,
}

/// Change to the active mixer list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MixerEvent {
    Added(MixerInfo),
    Removed(MixerInfo),
}

/// A lifecycle-managed mixer and the channels routed through it
pub struct Mixer {
    id: MixerId,
    identifier: String,
    fallback: Option<MixerId>,
    native: Option<NativeHandle>,
    channels: ComponentContainer<MixerChannel>,
    backend: Arc<dyn AudioBackend>,
    disposed: bool,
}

impl Mixer {
    fn new(
        id: MixerId,
        identifier: String,
        fallback: Option<MixerId>,
        backend: Arc<dyn AudioBackend>,
        sink: Option<NativeHandle>,
    ) -> Result<Self> {
        let mut mixer = Self {
            id,
            identifier,
            fallback,
            native: None,
            channels: ComponentContainer::new(),
            backend,
            disposed: false,
        };
        mixer.rebuild_native(sink)?;
        Ok(mixer)
    }

    pub fn id(&self) -> MixerId {
        self.id
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn fallback(&self) -> Option<MixerId> {
        self.fallback
    }

    pub fn native(&self) -> Option<NativeHandle> {
        self.native
    }

    pub fn info(&self) -> MixerInfo {
        MixerInfo {
            id: self.id,
            identifier: self.identifier.clone(),
        }
    }

    /// Channels currently routed through this mixer. Queued additions are not
    /// included until the next update.
    pub fn channels(&self) -> impl Iterator<Item = &ChannelRef> {
        self.channels.items().iter().map(MixerChannel::channel)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.channels.find(|entry| entry.id() == id).is_some()
    }

    pub fn add_channel(&mut self, channel: ChannelRef) -> Result<()> {
        if self.disposed {
            return Err(AudioError::Disposed("Mixer"));
        }

        let mut entry = MixerChannel::new(channel);
        if self.channels.is_audio_thread() {
            if let Some(native) = self.native {
                entry.route(&*self.backend, native)?;
            }
        }
        self.channels.add_item(entry)
    }

    /// Detach one channel and hand it back. The channel keeps playing.
    pub fn take_channel(&mut self, id: ChannelId) -> Option<ChannelRef> {
        let mut taken = None;
        let backend = &*self.backend;
        let _ = self.channels.remove_where(
            move |entry| entry.id() == id,
            |mut entry| {
                entry.unroute(backend);
                taken = Some(entry.channel().clone());
            },
        );
        taken
    }

    /// Detach every channel, including queued ones, and hand them back.
    pub fn take_channels(&mut self) -> Vec<ChannelRef> {
        let backend = &*self.backend;
        self.channels
            .drain()
            .into_iter()
            .filter_map(|mut entry| {
                entry.unroute(backend);
                (!entry.channel().is_disposed()).then(|| entry.channel().clone())
            })
            .collect()
    }

    /// Replace the native mixer, e.g. after a device change or when the
    /// shared sink changes, and re-attach every channel to the new one.
    pub fn rebuild_native(&mut self, sink: Option<NativeHandle>) -> Result<()> {
        if self.disposed {
            return Err(AudioError::Disposed("Mixer"));
        }

        if let Some(old) = self.native.take() {
            if let Err(e) = self.backend.free(old) {
                trace!("Freeing native mixer {} failed: {}", old, e);
            }
        }
        for entry in self.channels.items_mut() {
            entry.reset_routing();
        }

        let native = self.backend.create_mixer(sink.is_some())?;
        if let Some(sink) = sink {
            if let Err(e) = self.backend.attach(sink, native) {
                let _ = self.backend.free(native);
                return Err(e);
            }
        }
        self.native = Some(native);
        debug!(mixer = %self.identifier, native = %native, shared_sink = sink.is_some(), "Native mixer built");

        self.route_pending();
        Ok(())
    }

    fn route_pending(&mut self) {
        let Some(native) = self.native else {
            return;
        };
        let backend = &*self.backend;
        for entry in self.channels.items_mut() {
            if entry.routed_to() != Some(native) {
                if let Err(e) = entry.route(backend, native) {
                    warn!("Failed to route {} into {}: {}", entry.id(), native, e);
                }
            }
        }
    }
}

impl AudioComponent for Mixer {
    fn update(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }

        let backend = &*self.backend;
        self.channels.update_with(|mut entry| entry.unroute(backend));
        self.route_pending();
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.channels.dispose();
        if let Some(native) = self.native.take() {
            if let Err(e) = self.backend.free(native) {
                warn!("Failed to free native mixer {}: {}", native, e);
            }
        }
        self.disposed = true;
        debug!(mixer = %self.identifier, "Mixer disposed");
    }
}

impl fmt::Debug for Mixer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mixer")
            .field("id", &self.id)
            .field("identifier", &self.identifier)
            .field("fallback", &self.fallback)
            .field("native", &self.native)
            .field("channels", &self.channels.len())
            .field("disposed", &self.disposed)
            .finish()
    }
}

/// Cloneable, thread-safe way to route channels into a mixer.
///
/// Channels added through a handle are attached on the mixer's next update.
#[derive(Clone)]
pub struct MixerHandle {
    id: MixerId,
    identifier: Arc<str>,
    intake: ContainerHandle<MixerChannel>,
}

impl MixerHandle {
    pub fn id(&self) -> MixerId {
        self.id
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Fails once the mixer has been removed.
    pub fn add_channel(&self, channel: ChannelRef) -> Result<()> {
        self.intake
            .add_item(MixerChannel::new(channel))
            .map_err(|_| AudioError::Disposed("Mixer"))
    }
}

impl fmt::Debug for MixerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MixerHandle")
            .field("id", &self.id)
            .field("identifier", &self.identifier)
            .finish()
    }
}

/// Every mixer of one orchestrator, plus the fallback links between them.
pub struct MixerGraph {
    backend: Arc<dyn AudioBackend>,
    mixers: ComponentContainer<Mixer>,
    /// Links of live mixers, plus those of removed mixers that some live
    /// chain still passes through
    fallbacks: HashMap<MixerId, Option<MixerId>>,
    handles: HashMap<MixerId, MixerHandle>,
    shared_sink: Option<NativeHandle>,
    next_id: u32,
    active: Vec<MixerInfo>,
    events: EventRegistry<MixerEvent>,
    disposed: bool,
}

impl MixerGraph {
    pub fn new(backend: Arc<dyn AudioBackend>, shared_sink: Option<NativeHandle>) -> Self {
        Self {
            backend,
            mixers: ComponentContainer::new(),
            fallbacks: HashMap::new(),
            handles: HashMap::new(),
            shared_sink,
            next_id: 0,
            active: Vec::new(),
            events: EventRegistry::new(),
            disposed: false,
        }
    }

    /// Create a mixer. Anonymous mixers get a `user #N` identifier; explicit
    /// identifiers are taken as-is.
    pub fn create_mixer(
        &mut self,
        identifier: Option<&str>,
        fallback: Option<MixerId>,
    ) -> Result<MixerHandle> {
        if self.disposed {
            return Err(AudioError::Disposed("MixerGraph"));
        }

        let id = MixerId(self.next_id);
        self.next_id += 1;

        let identifier = identifier
            .map(str::to_string)
            .unwrap_or_else(next_user_identifier);

        if let Some(target) = fallback.filter(|f| !self.fallbacks.contains_key(f)) {
            warn!("Fallback {} is unknown or long removed, chain ends there", target);
        }

        let mixer = Mixer::new(
            id,
            identifier.clone(),
            fallback,
            Arc::clone(&self.backend),
            self.shared_sink,
        )?;
        let handle = MixerHandle {
            id,
            identifier: Arc::from(identifier.as_str()),
            intake: mixer.channels.handle(),
        };

        self.mixers.add_item(mixer)?;
        self.fallbacks.insert(id, fallback);
        self.handles.insert(id, handle.clone());

        let info = MixerInfo { id, identifier };
        info!(mixer = %info.identifier, id = %id, fallback = ?fallback, "Mixer created");
        self.active.push(info.clone());
        self.events.emit(&MixerEvent::Added(info));

        Ok(handle)
    }

    /// Remove a mixer, handing its channels down the fallback chain.
    pub fn remove_mixer(&mut self, id: MixerId) -> Result<()> {
        if self.disposed {
            return Err(AudioError::Disposed("MixerGraph"));
        }

        let mut removed = Vec::new();
        self.mixers
            .remove_where(move |m| m.id == id, |m| removed.push(m))?;
        for mixer in removed {
            self.handle_removed(mixer);
        }
        Ok(())
    }

    /// Remove one channel from a mixer. Channels leaving a mixer with a
    /// fallback are reassigned down the chain rather than dropped.
    pub fn remove_channel(&mut self, mixer: MixerId, channel: ChannelId) -> Result<()> {
        let (taken, fallback) = {
            let source = self
                .mixer_mut(mixer)
                .ok_or_else(|| AudioError::InvalidConfiguration(format!("unknown {}", mixer)))?;
            (source.take_channel(channel), source.fallback)
        };

        let Some(taken) = taken else {
            return Ok(());
        };
        match self.resolve_fallback(fallback) {
            Some(target) => self.move_channels(target, vec![taken]),
            None => trace!("{} left {} without a fallback", channel, mixer),
        }
        Ok(())
    }

    /// First live mixer on the chain starting at `start`.
    ///
    /// Links of removed mixers are followed; a cycle ends the walk.
    pub fn resolve_fallback(&self, start: Option<MixerId>) -> Option<MixerId> {
        let mut visited = HashSet::new();
        let mut current = start;

        while let Some(id) = current {
            if !visited.insert(id) {
                warn!("Fallback cycle detected at {}", id);
                return None;
            }
            if self.mixers.find(|m| m.id == id && m.is_alive()).is_some() {
                return Some(id);
            }
            current = self.fallbacks.get(&id).copied().flatten();
        }

        None
    }

    fn move_channels(&mut self, target: MixerId, channels: Vec<ChannelRef>) {
        let Some(mixer) = self.mixer_mut(target) else {
            return;
        };
        for channel in channels {
            let id = channel.id();
            if let Err(e) = mixer.add_channel(channel) {
                warn!("Failed to move {} into {}: {}", id, target, e);
            }
        }
    }

    fn handle_removed(&mut self, mut mixer: Mixer) {
        let channels = mixer.take_channels();

        if !channels.is_empty() {
            match self.resolve_fallback(mixer.fallback) {
                Some(target) => {
                    debug!(
                        from = %mixer.identifier,
                        to = %target,
                        count = channels.len(),
                        "Moving channels to fallback mixer"
                    );
                    self.move_channels(target, channels);
                }
                None => warn!(
                    mixer = %mixer.identifier,
                    count = channels.len(),
                    "Removed mixer has no live fallback, dropping its channels"
                ),
            }
        }

        mixer.dispose();
        self.handles.remove(&mixer.id);
        self.prune_fallbacks();

        if let Some(pos) = self.active.iter().position(|info| info.id == mixer.id) {
            let info = self.active.remove(pos);
            info!(mixer = %info.identifier, "Mixer removed");
            self.events.emit(&MixerEvent::Removed(info));
        }
    }

    /// Drop links of removed mixers that no live mixer's chain reaches.
    fn prune_fallbacks(&mut self) {
        let mut reachable = HashSet::new();
        for &id in self.handles.keys() {
            let mut current = Some(id);
            while let Some(link) = current {
                if !reachable.insert(link) {
                    break;
                }
                current = self.fallbacks.get(&link).copied().flatten();
            }
        }

        let before = self.fallbacks.len();
        self.fallbacks.retain(|id, _| reachable.contains(id));
        if self.fallbacks.len() != before {
            trace!("Pruned {} fallback links", before - self.fallbacks.len());
        }
    }

    /// Number of fallback links held, live mixers included.
    pub fn fallback_links(&self) -> usize {
        self.fallbacks.len()
    }

    /// Apply queued mixer and channel changes and update every mixer.
    pub fn update(&mut self) {
        if self.disposed {
            return;
        }

        let mut removed = Vec::new();
        self.mixers.update_with(|m| removed.push(m));
        for mixer in removed {
            self.handle_removed(mixer);
        }
    }

    pub fn mixer(&self, id: MixerId) -> Option<&Mixer> {
        self.mixers.find(|m| m.id == id)
    }

    pub fn mixer_mut(&mut self, id: MixerId) -> Option<&mut Mixer> {
        self.mixers.find_mut(|m| m.id == id)
    }

    pub fn find_by_identifier(&self, identifier: &str) -> Option<&Mixer> {
        self.mixers.find(|m| m.identifier == identifier)
    }

    pub fn handle(&self, id: MixerId) -> Option<MixerHandle> {
        self.handles.get(&id).cloned()
    }

    pub fn mixers(&self) -> &[Mixer] {
        self.mixers.items()
    }

    /// Active mixers in creation order.
    pub fn active_mixers(&self) -> &[MixerInfo] {
        &self.active
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&MixerEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn shared_sink(&self) -> Option<NativeHandle> {
        self.shared_sink
    }

    pub fn using_shared_sink(&self) -> bool {
        self.shared_sink.is_some()
    }

    /// Switch shared-sink mode and rebuild every native mixer accordingly.
    pub fn set_shared_sink(&mut self, sink: Option<NativeHandle>) {
        if self.shared_sink == sink {
            return;
        }
        info!(sink = ?sink, "Shared sink changed");
        self.shared_sink = sink;
        self.reattach();
    }

    /// Rebuild every native mixer and re-attach its channels, e.g. after the
    /// output device changed.
    pub fn reattach(&mut self) {
        if self.disposed {
            return;
        }

        let sink = self.shared_sink;
        for mixer in self.mixers.items_mut() {
            if let Err(e) = mixer.rebuild_native(sink) {
                warn!(mixer = %mixer.identifier, error = %e, "Failed to rebuild mixer");
            }
        }
    }

    /// Channels routed through every mixer.
    pub fn channel_count(&self) -> usize {
        self.mixers.items().iter().map(Mixer::channel_count).sum()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.mixers.dispose();
        self.handles.clear();
        self.fallbacks.clear();
        self.active.clear();
        self.events.clear();
    }
}

impl Drop for MixerGraph {
    fn drop(&mut self) {
        self.dispose();
    }
}
