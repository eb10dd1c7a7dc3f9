//! Short one-shot samples with bounded concurrent playback

use crate::domain::audio::{AudioBackend, AudioError, Result};
use crate::domain::component::{AudioComponent, ComponentContainer};
use crate::domain::config::DEFAULT_SAMPLE_CONCURRENCY;
use crate::domain::mixer::{ChannelRef, MixerHandle};
use crate::domain::volume::Volume;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// One playback of a [`Sample`].
///
/// Alive while playing; once playback ends or is stopped the owning sample
/// disposes it, which frees the backend channel.
pub struct SampleChannel {
    channel: ChannelRef,
    volume: Volume,
    applied_volume: Option<f64>,
}

impl SampleChannel {
    fn new(channel: ChannelRef, volume: Volume) -> Self {
        Self {
            channel,
            volume,
            applied_volume: None,
        }
    }

    pub fn channel(&self) -> &ChannelRef {
        &self.channel
    }

    pub fn is_playing(&self) -> bool {
        self.channel.is_playing()
    }

    pub fn stop(&self) -> Result<()> {
        self.channel.stop()
    }

    fn apply_volume(&mut self) -> Result<()> {
        let volume = self.volume.get();
        if self.applied_volume != Some(volume) {
            self.channel.set_volume(volume)?;
            self.applied_volume = Some(volume);
        }
        Ok(())
    }
}

impl AudioComponent for SampleChannel {
    fn update(&mut self) -> Result<()> {
        if self.channel.is_disposed() {
            return Ok(());
        }
        self.apply_volume()?;
        self.channel.refresh();
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.channel.is_disposed()
    }

    fn dispose(&mut self) {
        self.channel.release();
    }

    fn is_alive(&self) -> bool {
        !self.is_disposed() && self.channel.is_playing()
    }
}

impl Drop for SampleChannel {
    fn drop(&mut self) {
        self.dispose();
    }
}

type PlayHook = Box<dyn FnMut(&str) + Send>;

/// Decoded sample data plus the channels currently playing it.
pub struct Sample {
    name: String,
    data: Arc<[u8]>,
    backend: Arc<dyn AudioBackend>,
    mixer: MixerHandle,
    volume: Volume,
    channels: ComponentContainer<SampleChannel>,
    concurrency: usize,
    on_play: Option<PlayHook>,
    disposed: bool,
}

impl Sample {
    pub fn new(
        name: impl Into<String>,
        data: impl Into<Arc<[u8]>>,
        backend: Arc<dyn AudioBackend>,
        mixer: MixerHandle,
        volume: Volume,
    ) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            backend,
            mixer,
            volume,
            channels: ComponentContainer::new(),
            concurrency: DEFAULT_SAMPLE_CONCURRENCY,
            on_play: None,
            disposed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Maximum simultaneously playing channels. Zero is treated as one.
    pub fn set_concurrency(&mut self, concurrency: usize) {
        self.concurrency = concurrency.max(1);
    }

    /// Register a hook fired with the sample name every time it plays.
    pub fn on_play<F>(&mut self, hook: F)
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.on_play = Some(Box::new(hook));
    }

    /// Number of channels that are still playing.
    pub fn playing_channels(&self) -> usize {
        self.channels.items().iter().filter(|c| c.is_alive()).count()
    }

    pub fn channels(&self) -> impl Iterator<Item = &ChannelRef> {
        self.channels.items().iter().map(SampleChannel::channel)
    }

    /// Create a channel routed into the sample's mixer without playing it.
    pub fn get_channel(&mut self) -> Result<SampleChannel> {
        if self.disposed {
            return Err(AudioError::Disposed("Sample"));
        }

        let channel = ChannelRef::create(Arc::clone(&self.backend), &self.data)?;
        if let Err(e) = self.mixer.add_channel(channel.clone()) {
            channel.release();
            return Err(e);
        }

        Ok(SampleChannel::new(channel, self.volume.clone()))
    }

    /// Start playback of `channel`, stopping the oldest playing channels first
    /// if the concurrency limit would be exceeded.
    pub fn play_channel(&mut self, mut channel: SampleChannel) -> Result<ChannelRef> {
        if self.disposed {
            return Err(AudioError::Disposed("Sample"));
        }

        while self.playing_channels() >= self.concurrency {
            let Some(oldest) = self.channels.items().iter().find(|c| c.is_alive()) else {
                break;
            };
            trace!(sample = %self.name, channel = %oldest.channel().id(), "Evicting oldest playback");
            oldest.stop()?;
        }

        channel.apply_volume()?;
        channel.channel.play()?;
        let playing = channel.channel.clone();
        self.channels.add_item(channel)?;

        if let Some(hook) = self.on_play.as_mut() {
            hook(&self.name);
        }
        Ok(playing)
    }

    pub fn play(&mut self) -> Result<ChannelRef> {
        let channel = self.get_channel()?;
        self.play_channel(channel)
    }
}

impl AudioComponent for Sample {
    fn update(&mut self) -> Result<()> {
        self.channels.update();
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
        self.disposed = true;
        debug!(sample = %self.name, "Sample disposed");
    }
}

impl fmt::Debug for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sample")
            .field("name", &self.name)
            .field("bytes", &self.data.len())
            .field("concurrency", &self.concurrency)
            .field("channels", &self.channels.len())
            .field("disposed", &self.disposed)
            .finish()
    }
}
