//! Resource lookup and the track/sample stores built on it

use crate::domain::audio::{AudioBackend, AudioError, Result};
use crate::domain::component::{AudioComponent, ComponentContainer};
use crate::domain::config::DEFAULT_SAMPLE_CONCURRENCY;
use crate::domain::mixer::{ChannelRef, MixerHandle};
use crate::domain::sample::Sample;
use crate::domain::track::Track;
use crate::domain::volume::Volume;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, trace, warn};

/// Source of raw audio bytes by name.
pub trait ResourceStore: Send + Sync {
    /// Bytes stored under `name`, or [`AudioError::ResourceNotFound`].
    fn get(&self, name: &str) -> Result<Vec<u8>>;

    fn available_resources(&self) -> Vec<String>;
}

/// In-memory resource store.
#[derive(Debug, Default)]
pub struct MemoryResourceStore {
    resources: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, data: impl Into<Arc<[u8]>>) {
        if let Ok(mut resources) = self.resources.write() {
            resources.insert(name.into(), data.into());
        }
    }

    pub fn with(self, name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        self.insert(name, data);
        self
    }
}

impl ResourceStore for MemoryResourceStore {
    fn get(&self, name: &str) -> Result<Vec<u8>> {
        let resources = self
            .resources
            .read()
            .map_err(|_| AudioError::Backend("resource store lock poisoned".to_string()))?;
        resources
            .get(name)
            .map(|data| data.to_vec())
            .ok_or_else(|| AudioError::ResourceNotFound(name.to_string()))
    }

    fn available_resources(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .resources
            .read()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

/// Caches one [`Sample`] per requested name.
///
/// Lookups try the exact name first, then the name with each configured
/// extension appended (`hit`, `hit.wav`, `hit.ogg`).
pub struct SampleStore {
    resources: Arc<dyn ResourceStore>,
    backend: Arc<dyn AudioBackend>,
    mixer: MixerHandle,
    volume: Volume,
    extensions: Vec<String>,
    samples: HashMap<String, Sample>,
    concurrency: usize,
    disposed: bool,
}

impl SampleStore {
    pub fn new(
        resources: Arc<dyn ResourceStore>,
        backend: Arc<dyn AudioBackend>,
        mixer: MixerHandle,
        volume: Volume,
    ) -> Self {
        Self {
            resources,
            backend,
            mixer,
            volume,
            extensions: vec!["wav".to_string(), "ogg".to_string()],
            samples: HashMap::new(),
            concurrency: DEFAULT_SAMPLE_CONCURRENCY,
            disposed: false,
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn add_extension(&mut self, extension: &str) {
        let extension = extension.trim_start_matches('.');
        if !extension.is_empty() && !self.extensions.iter().any(|e| e == extension) {
            self.extensions.push(extension.to_string());
        }
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    pub fn mixer(&self) -> &MixerHandle {
        &self.mixer
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Concurrency applied to samples loaded from now on.
    pub fn set_concurrency(&mut self, concurrency: usize) {
        self.concurrency = concurrency.max(1);
    }

    fn candidates(&self, name: &str) -> Vec<String> {
        std::iter::once(name.to_string())
            .chain(self.extensions.iter().map(|ext| format!("{}.{}", name, ext)))
            .collect()
    }

    fn load(&self, name: &str) -> Result<Vec<u8>> {
        for candidate in self.candidates(name) {
            match self.resources.get(&candidate) {
                Ok(data) => {
                    trace!(sample = name, resource = %candidate, "Sample resource resolved");
                    return Ok(data);
                }
                Err(AudioError::ResourceNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(AudioError::ResourceNotFound(name.to_string()))
    }

    /// The sample stored under `name`, loading it on first use.
    pub fn get(&mut self, name: &str) -> Result<&mut Sample> {
        if self.disposed {
            return Err(AudioError::Disposed("SampleStore"));
        }

        if !self.samples.contains_key(name) {
            let data = self.load(name)?;
            let mut sample = Sample::new(
                name,
                data,
                Arc::clone(&self.backend),
                self.mixer.clone(),
                self.volume.clone(),
            );
            sample.set_concurrency(self.concurrency);
            debug!(sample = name, "Sample loaded");
            self.samples.insert(name.to_string(), sample);
        }

        self.samples
            .get_mut(name)
            .ok_or_else(|| AudioError::ResourceNotFound(name.to_string()))
    }

    pub fn available_resources(&self) -> Vec<String> {
        self.resources.available_resources()
    }
}

impl AudioComponent for SampleStore {
    fn update(&mut self) -> Result<()> {
        for sample in self.samples.values_mut() {
            if let Err(e) = sample.update() {
                warn!(sample = %sample.name(), error = %e, "Sample update failed");
            }
        }
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        for sample in self.samples.values_mut() {
            sample.dispose();
        }
        self.samples.clear();
        self.disposed = true;
    }
}

/// Creates a fresh [`Track`] for every lookup and owns it until released.
pub struct TrackStore {
    resources: Arc<dyn ResourceStore>,
    backend: Arc<dyn AudioBackend>,
    mixer: MixerHandle,
    volume: Volume,
    tracks: ComponentContainer<Track>,
    disposed: bool,
}

impl TrackStore {
    pub fn new(
        resources: Arc<dyn ResourceStore>,
        backend: Arc<dyn AudioBackend>,
        mixer: MixerHandle,
        volume: Volume,
    ) -> Self {
        Self {
            resources,
            backend,
            mixer,
            volume,
            tracks: ComponentContainer::new(),
            disposed: false,
        }
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    pub fn mixer(&self) -> &MixerHandle {
        &self.mixer
    }

    /// Tracks currently owned by the store.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Create a new track for `name`, routed into the store's mixer.
    pub fn get(&mut self, name: &str) -> Result<ChannelRef> {
        if self.disposed {
            return Err(AudioError::Disposed("TrackStore"));
        }

        let data = self.resources.get(name)?;
        let channel = ChannelRef::create(Arc::clone(&self.backend), &data)?;
        if let Err(e) = self.mixer.add_channel(channel.clone()) {
            channel.release();
            return Err(e);
        }

        self.tracks
            .add_item(Track::new(name, channel.clone(), self.volume.clone()))?;
        debug!(track = name, channel = %channel.id(), "Track created");
        Ok(channel)
    }

    pub fn available_resources(&self) -> Vec<String> {
        self.resources.available_resources()
    }
}

impl AudioComponent for TrackStore {
    fn update(&mut self) -> Result<()> {
        self.tracks.update();
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.tracks.dispose();
        self.disposed = true;
    }
}
