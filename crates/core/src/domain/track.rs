//! Long-running tracks (music, ambience)

use crate::domain::audio::Result;
use crate::domain::component::AudioComponent;
use crate::domain::mixer::ChannelRef;
use crate::domain::volume::Volume;
use tracing::debug;

/// A track owned by its store. Callers play it through the returned
/// [`ChannelRef`]; releasing that channel retires the track.
#[derive(Debug)]
pub struct Track {
    name: String,
    channel: ChannelRef,
    volume: Volume,
    applied_volume: Option<f64>,
    disposed: bool,
}

impl Track {
    pub fn new(name: impl Into<String>, channel: ChannelRef, volume: Volume) -> Self {
        Self {
            name: name.into(),
            channel,
            volume,
            applied_volume: None,
            disposed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> &ChannelRef {
        &self.channel
    }
}

impl AudioComponent for Track {
    fn update(&mut self) -> Result<()> {
        if self.is_disposed() {
            return Ok(());
        }

        let volume = self.volume.get();
        if self.applied_volume != Some(volume) {
            self.channel.set_volume(volume)?;
            self.applied_volume = Some(volume);
        }
        self.channel.refresh();
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.disposed || self.channel.is_disposed()
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.channel.release();
        self.disposed = true;
        debug!(track = %self.name, "Track disposed");
    }
}
