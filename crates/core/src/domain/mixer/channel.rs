//! Playable channels and their routing entries inside a mixer

use crate::domain::audio::{AudioBackend, AudioError, NativeHandle, Result};
use crate::domain::component::AudioComponent;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

struct ChannelShared {
    id: ChannelId,
    native: NativeHandle,
    backend: Arc<dyn AudioBackend>,
    playing: AtomicBool,
    disposed: AtomicBool,
}

/// Shared reference to one backend channel.
///
/// The owner (a sample or track) and the mixer routing it hold clones of the
/// same reference; releasing it is visible to both.
#[derive(Clone)]
pub struct ChannelRef {
    shared: Arc<ChannelShared>,
}

impl ChannelRef {
    /// Create a backend channel from raw audio data.
    pub fn create(backend: Arc<dyn AudioBackend>, data: &[u8]) -> Result<Self> {
        let native = backend.create_channel(data)?;
        Ok(Self::from_native(backend, native))
    }

    pub fn from_native(backend: Arc<dyn AudioBackend>, native: NativeHandle) -> Self {
        let id = ChannelId::next();
        trace!("Created {} ({})", id, native);
        Self {
            shared: Arc::new(ChannelShared {
                id,
                native,
                backend,
                playing: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.shared.id
    }

    pub fn native(&self) -> NativeHandle {
        self.shared.native
    }

    pub fn play(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(AudioError::Disposed("Channel"));
        }
        self.shared.backend.play(self.shared.native)?;
        self.shared.playing.store(true, Ordering::Release);
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.shared.playing.store(false, Ordering::Release);
        if self.is_disposed() {
            return Ok(());
        }
        self.shared.backend.stop(self.shared.native)
    }

    /// Last known playback state, see [`ChannelRef::refresh`].
    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    /// Pick up playback that ended on the backend side.
    pub fn refresh(&self) -> bool {
        if self.is_playing() && !self.shared.backend.is_playing(self.shared.native) {
            self.shared.playing.store(false, Ordering::Release);
        }
        self.is_playing()
    }

    pub fn set_volume(&self, volume: f64) -> Result<()> {
        if self.is_disposed() {
            return Err(AudioError::Disposed("Channel"));
        }
        self.shared.backend.set_volume(self.shared.native, volume)
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Stop and free the backend channel. Idempotent.
    pub fn release(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.playing.store(false, Ordering::Release);

        let backend = &self.shared.backend;
        if let Err(e) = backend.stop(self.shared.native) {
            trace!("Stopping {} on release failed: {}", self.shared.id, e);
        }
        if let Err(e) = backend.free(self.shared.native) {
            warn!("Failed to free {}: {}", self.shared.id, e);
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRef")
            .field("id", &self.shared.id)
            .field("native", &self.shared.native)
            .field("playing", &self.is_playing())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A channel as seen by the mixer routing it.
///
/// `routed` records which native mixer the channel is currently attached to,
/// so a rebuilt or replaced mixer knows what still needs attaching.
#[derive(Debug)]
pub struct MixerChannel {
    channel: ChannelRef,
    routed: Option<NativeHandle>,
}

impl MixerChannel {
    pub fn new(channel: ChannelRef) -> Self {
        Self {
            channel,
            routed: None,
        }
    }

    pub fn channel(&self) -> &ChannelRef {
        &self.channel
    }

    pub fn id(&self) -> ChannelId {
        self.channel.id()
    }

    pub fn routed_to(&self) -> Option<NativeHandle> {
        self.routed
    }

    /// Attach to `mixer` unless already routed there.
    pub(crate) fn route(&mut self, backend: &dyn AudioBackend, mixer: NativeHandle) -> Result<()> {
        if self.routed == Some(mixer) || self.channel.is_disposed() {
            return Ok(());
        }
        backend.attach(mixer, self.channel.native())?;
        self.routed = Some(mixer);
        Ok(())
    }

    /// Detach from the current mixer, if any. The channel itself stays alive.
    pub(crate) fn unroute(&mut self, backend: &dyn AudioBackend) {
        if let Some(mixer) = self.routed.take() {
            if self.channel.is_disposed() {
                return;
            }
            if let Err(e) = backend.detach(mixer, self.channel.native()) {
                trace!("Detaching {} from {} failed: {}", self.channel.id(), mixer, e);
            }
        }
    }

    /// Forget the routing without touching the backend, used when the mixer
    /// native handle is already gone.
    pub(crate) fn reset_routing(&mut self) {
        self.routed = None;
    }
}

impl AudioComponent for MixerChannel {
    fn update(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.channel.is_disposed()
    }

    /// Mixers never own channel playback; disposing the routing entry only
    /// forgets where it was attached.
    fn dispose(&mut self) {
        self.routed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::virtual_backend::VirtualBackend;

    fn backend() -> Arc<VirtualBackend> {
        let backend = Arc::new(VirtualBackend::with_devices(&["Speakers"]));
        backend.init_device(2).unwrap();
        backend
    }

    #[test]
    fn test_play_refresh_and_release() {
        let virt = backend();
        let channel = ChannelRef::create(virt.clone(), &[]).unwrap();

        channel.play().unwrap();
        assert!(channel.refresh());

        virt.finish(channel.native());
        assert!(!channel.refresh());

        channel.release();
        channel.release();
        assert!(channel.is_disposed());
        assert!(!virt.exists(channel.native()));
        assert!(matches!(channel.play(), Err(AudioError::Disposed(_))));
    }

    #[test]
    fn test_channel_ids_are_unique() {
        let virt = backend();
        let a = ChannelRef::create(virt.clone(), &[]).unwrap();
        let b = ChannelRef::create(virt, &[]).unwrap();
        assert_ne!(a.id(), b.id());
        assert!(a.clone().ptr_eq(&a));
    }

    #[test]
    fn test_routing_entry_follows_channel_state() {
        let virt = backend();
        let mixer = virt.create_mixer(false).unwrap();
        let channel = ChannelRef::create(virt.clone(), &[]).unwrap();
        let mut entry = MixerChannel::new(channel.clone());

        entry.route(&*virt, mixer).unwrap();
        assert_eq!(virt.children(mixer), vec![channel.native()]);
        assert!(entry.is_alive());

        channel.release();
        assert!(!entry.is_alive());
        assert!(virt.children(mixer).is_empty());
    }
}
