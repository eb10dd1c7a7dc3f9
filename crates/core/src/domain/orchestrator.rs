//! Composition root for the audio subsystem
//!
//! The [`AudioOrchestrator`] owns the default mixers and stores, selects the
//! output device and reacts to hot-plug changes reported by the
//! [`DeviceMonitor`]. Whoever owns it is the audio thread: every mutation of
//! mixers, channels and devices happens inside its methods or inside tasks
//! run by [`AudioOrchestrator::update`].

use crate::domain::audio::{AudioBackend, AudioError, DeviceDescriptor, DeviceTopology, NativeHandle, Result};
use crate::domain::component::{AudioComponent, ComponentContainer, SharedComponent};
use crate::domain::config::AudioConfig;
use crate::domain::device_monitor::{DeviceMonitor, MonitorSettings, TopologyChange};
use crate::domain::events::{DeviceEvent, EventRegistry, SubscriptionId};
use crate::domain::mixer::{MixerEvent, MixerGraph, MixerHandle, MixerId, MixerInfo};
use crate::domain::scheduler::{Scheduler, SchedulerHandle};
use crate::domain::store::{ResourceStore, SampleStore, TrackStore};
use crate::domain::thread::{AudioThread, ManagerId};
use crate::domain::volume::Volume;
use std::cell::OnceCell;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const TRACK_MIXER: &str = "TrackMixer";
pub const SAMPLE_MIXER: &str = "SampleMixer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    /// Device selection ran, whether or not it found a device
    DeviceSelected,
    Disposed,
}

/// Construction options beyond the user-facing configuration.
#[derive(Default)]
pub struct OrchestratorOptions {
    pub config: AudioConfig,
    /// Where device events are delivered; defaults to the audio scheduler
    pub event_scheduler: Option<SchedulerHandle<()>>,
    /// Route every mixer into this sink instead of straight to the device
    pub shared_sink: Option<NativeHandle>,
}

#[derive(Clone)]
enum EventDispatch {
    Audio(SchedulerHandle<AudioOrchestrator>),
    External(SchedulerHandle<()>),
}

impl EventDispatch {
    fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            Self::Audio(handle) => handle.add(move |_| task()),
            Self::External(handle) => handle.add(move |_| task()),
        }
    }
}

/// Thread-safe control surface for an orchestrator owned by another thread.
///
/// Everything sent through the handle runs on the owner's next update.
#[derive(Clone)]
pub struct AudioHandle {
    audio: SchedulerHandle<AudioOrchestrator>,
}

impl AudioHandle {
    /// Returns `false` once the orchestrator is gone.
    pub fn set_preferred_device(&self, name: impl Into<String>) -> bool {
        let name = name.into();
        self.audio.add(move |audio| {
            if let Err(e) = audio.set_preferred_device(name) {
                debug!("Ignoring device preference: {}", e);
            }
        })
    }

    /// Run `task` on the audio thread.
    pub fn run<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut AudioOrchestrator) + Send + 'static,
    {
        self.audio.add(task)
    }
}

pub struct AudioOrchestrator {
    backend: Arc<dyn AudioBackend>,
    thread: Arc<AudioThread>,
    manager: ManagerId,
    config: AudioConfig,
    preferred_device: String,
    monitor: DeviceMonitor,
    mixers: MixerGraph,
    track_mixer: MixerHandle,
    sample_mixer: MixerHandle,
    track_volume: Volume,
    sample_volume: Volume,
    track_resources: Arc<dyn ResourceStore>,
    sample_resources: Arc<dyn ResourceStore>,
    tracks: OnceCell<SharedComponent<TrackStore>>,
    samples: OnceCell<SharedComponent<SampleStore>>,
    stores: ComponentContainer<Box<dyn AudioComponent>>,
    scheduler: Option<Scheduler<AudioOrchestrator>>,
    audio: SchedulerHandle<AudioOrchestrator>,
    events: EventDispatch,
    device_events: EventRegistry<DeviceEvent>,
    selected: Option<usize>,
    state: LifecycleState,
}

impl AudioOrchestrator {
    /// Create the default mixers, select an output device and start watching
    /// for hot-plug changes.
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        thread: Arc<AudioThread>,
        track_resources: Arc<dyn ResourceStore>,
        sample_resources: Arc<dyn ResourceStore>,
        options: OrchestratorOptions,
    ) -> Result<Self> {
        let config = options
            .config
            .validate()
            .map_err(|e| AudioError::InvalidConfiguration(e.to_string()))?;

        let mut mixers = MixerGraph::new(Arc::clone(&backend), options.shared_sink);
        let track_mixer = mixers.create_mixer(Some(TRACK_MIXER), None)?;
        let sample_mixer = mixers.create_mixer(Some(SAMPLE_MIXER), None)?;

        let monitor = DeviceMonitor::new(
            Arc::clone(&backend),
            Arc::clone(&thread),
            MonitorSettings {
                poll_interval: config.poll_interval(),
                initial_delay: config.initial_poll_delay(),
                headless: config.headless,
            },
        );

        let scheduler = Scheduler::new();
        let audio = scheduler.handle();
        let events = match options.event_scheduler {
            Some(handle) => EventDispatch::External(handle),
            None => EventDispatch::Audio(audio.clone()),
        };

        let manager = thread.register_manager("AudioOrchestrator");

        let mut orchestrator = Self {
            backend,
            thread,
            manager,
            preferred_device: config.preferred_device.clone(),
            track_volume: Volume::new(config.track_volume),
            sample_volume: Volume::new(config.sample_volume),
            config,
            monitor,
            mixers,
            track_mixer,
            sample_mixer,
            track_resources,
            sample_resources,
            tracks: OnceCell::new(),
            samples: OnceCell::new(),
            stores: ComponentContainer::new(),
            scheduler: Some(scheduler),
            audio,
            events,
            device_events: EventRegistry::new(),
            selected: None,
            state: LifecycleState::Uninitialized,
        };

        // Baseline topology; nothing is announced for it.
        if let Err(e) = orchestrator.monitor.resync() {
            warn!("Initial device enumeration failed: {}", e);
        }
        orchestrator.select_device();
        orchestrator.start_polling()?;
        orchestrator.state = LifecycleState::DeviceSelected;

        info!(device = %orchestrator.current_device_name(), "Audio orchestrator ready");
        Ok(orchestrator)
    }

    fn start_polling(&mut self) -> Result<()> {
        let audio = self.audio.clone();
        let events = self.events.clone();
        let registry = self.device_events.clone();
        let cancelled = self.monitor.cancellation();

        self.monitor.start_polling(move |change: TopologyChange| {
            if cancelled.load(Ordering::Acquire) {
                return;
            }

            let flag = Arc::clone(&cancelled);
            audio.add(move |audio| {
                if flag.load(Ordering::Acquire) {
                    return;
                }
                audio.on_devices_changed();
            });

            if change.has_changes() {
                let batch = change.events();
                let registry = registry.clone();
                let flag = Arc::clone(&cancelled);
                events.post(move || {
                    if flag.load(Ordering::Acquire) {
                        return;
                    }
                    for event in &batch {
                        registry.emit(event);
                    }
                });
            }
        })
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.state == LifecycleState::Disposed {
            return Err(AudioError::Disposed("AudioOrchestrator"));
        }
        Ok(())
    }

    fn on_devices_changed(&mut self) {
        if self.state == LifecycleState::Disposed {
            return;
        }
        if !self.monitor.is_current_device_valid(&self.preferred_device) {
            debug!("Current audio device no longer valid, reselecting");
            self.select_device();
        }
    }

    /// Run the fallback cascade for the current preference. Mixers are
    /// rebuilt on the new device when the selection changed.
    fn select_device(&mut self) -> Option<usize> {
        let selected = self.monitor.select_device(&self.preferred_device);
        if selected.is_some() && selected != self.selected {
            self.selected = selected;
            self.mixers.reattach();
        }
        selected
    }

    /// Process queued work, then update mixers and stores.
    pub fn update(&mut self) {
        if self.state == LifecycleState::Disposed {
            return;
        }

        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.update(self);
            self.scheduler = Some(scheduler);
        }

        if self.state == LifecycleState::Disposed {
            return;
        }
        self.mixers.update();
        self.stores.update();
    }

    pub fn handle(&self) -> AudioHandle {
        AudioHandle {
            audio: self.audio.clone(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn preferred_device(&self) -> &str {
        &self.preferred_device
    }

    /// Change the preferred device. Selection runs on the next update.
    pub fn set_preferred_device(&mut self, name: impl Into<String>) -> Result<()> {
        self.ensure_alive()?;
        let name = name.into();
        if name == self.preferred_device {
            return Ok(());
        }

        info!(device = %name, "Preferred audio device changed");
        self.preferred_device = name;
        self.audio.add(|audio| {
            audio.select_device();
        });
        Ok(())
    }

    pub fn current_device(&self) -> Option<DeviceDescriptor> {
        self.monitor.current_device()
    }

    pub fn current_device_name(&self) -> String {
        self.current_device()
            .map(|d| d.name)
            .unwrap_or_else(|| "Unknown".to_string())
    }

    pub fn topology(&self) -> Arc<DeviceTopology> {
        self.monitor.topology()
    }

    /// Names of every enabled output device.
    pub fn audio_device_names(&self) -> Vec<String> {
        self.monitor.topology().enabled_names().to_vec()
    }

    pub fn on_device_event<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        self.device_events.subscribe(listener)
    }

    pub fn remove_device_listener(&self, id: SubscriptionId) -> bool {
        self.device_events.unsubscribe(id)
    }

    pub fn track_volume(&self) -> &Volume {
        &self.track_volume
    }

    pub fn sample_volume(&self) -> &Volume {
        &self.sample_volume
    }

    pub fn track_mixer(&self) -> &MixerHandle {
        &self.track_mixer
    }

    pub fn sample_mixer(&self) -> &MixerHandle {
        &self.sample_mixer
    }

    pub fn mixers(&self) -> &MixerGraph {
        &self.mixers
    }

    pub fn active_mixers(&self) -> &[MixerInfo] {
        self.mixers.active_mixers()
    }

    pub fn on_mixer_event<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&MixerEvent) + Send + Sync + 'static,
    {
        self.mixers.subscribe(listener)
    }

    /// Create a user mixer falling back to the sample mixer.
    pub fn create_mixer(&mut self, identifier: Option<&str>) -> Result<MixerHandle> {
        self.ensure_alive()?;
        self.mixers
            .create_mixer(identifier, Some(self.sample_mixer.id()))
    }

    pub fn remove_mixer(&mut self, id: MixerId) -> Result<()> {
        self.ensure_alive()?;
        self.mixers.remove_mixer(id)
    }

    pub fn using_shared_sink(&self) -> bool {
        self.mixers.using_shared_sink()
    }

    /// Switch shared-sink mode. Routing is rebuilt immediately and device
    /// selection reruns on the next update.
    pub fn set_shared_sink(&mut self, sink: Option<NativeHandle>) -> Result<()> {
        self.ensure_alive()?;
        if self.mixers.shared_sink() == sink {
            return Ok(());
        }
        self.mixers.set_shared_sink(sink);
        self.audio.add(|audio| {
            audio.select_device();
        });
        Ok(())
    }

    /// The global track store, created on first use.
    pub fn tracks(&mut self) -> Result<SharedComponent<TrackStore>> {
        self.ensure_alive()?;
        if let Some(store) = self.tracks.get() {
            return Ok(store.clone());
        }

        let store = self.new_track_store(Arc::clone(&self.track_resources), self.track_mixer.clone())?;
        Ok(self.tracks.get_or_init(|| store).clone())
    }

    /// The global sample store, created on first use.
    pub fn samples(&mut self) -> Result<SharedComponent<SampleStore>> {
        self.ensure_alive()?;
        if let Some(store) = self.samples.get() {
            return Ok(store.clone());
        }

        let store =
            self.new_sample_store(Arc::clone(&self.sample_resources), self.sample_mixer.clone())?;
        Ok(self.samples.get_or_init(|| store).clone())
    }

    /// A track store over `resources`, torn down with the orchestrator.
    ///
    /// Without `resources` this is the global store from [`tracks`] and
    /// `mixer` is ignored. Otherwise a new store is created, routed into
    /// `mixer` or the track mixer.
    ///
    /// [`tracks`]: Self::tracks
    pub fn track_store(
        &mut self,
        resources: Option<Arc<dyn ResourceStore>>,
        mixer: Option<&MixerHandle>,
    ) -> Result<SharedComponent<TrackStore>> {
        let Some(resources) = resources else {
            return self.tracks();
        };
        self.ensure_alive()?;
        let mixer = mixer.unwrap_or(&self.track_mixer).clone();
        self.new_track_store(resources, mixer)
    }

    /// A sample store over `resources`, torn down with the orchestrator.
    ///
    /// Without `resources` this is the global store from [`samples`] and
    /// `mixer` is ignored. Otherwise a new store is created, routed into
    /// `mixer` or the sample mixer.
    ///
    /// [`samples`]: Self::samples
    pub fn sample_store(
        &mut self,
        resources: Option<Arc<dyn ResourceStore>>,
        mixer: Option<&MixerHandle>,
    ) -> Result<SharedComponent<SampleStore>> {
        let Some(resources) = resources else {
            return self.samples();
        };
        self.ensure_alive()?;
        let mixer = mixer.unwrap_or(&self.sample_mixer).clone();
        self.new_sample_store(resources, mixer)
    }

    fn new_track_store(
        &mut self,
        resources: Arc<dyn ResourceStore>,
        mixer: MixerHandle,
    ) -> Result<SharedComponent<TrackStore>> {
        let store = SharedComponent::new(TrackStore::new(
            resources,
            Arc::clone(&self.backend),
            mixer,
            self.track_volume.clone(),
        ));
        self.stores.add_item(Box::new(store.clone()))?;
        Ok(store)
    }

    fn new_sample_store(
        &mut self,
        resources: Arc<dyn ResourceStore>,
        mixer: MixerHandle,
    ) -> Result<SharedComponent<SampleStore>> {
        let store = SharedComponent::new(
            SampleStore::new(
                resources,
                Arc::clone(&self.backend),
                mixer,
                self.sample_volume.clone(),
            )
            .with_extensions(self.config.sample_extensions.clone())
            .with_concurrency(self.config.sample_concurrency),
        );
        self.stores.add_item(Box::new(store.clone()))?;
        Ok(store)
    }

    pub fn is_disposed(&self) -> bool {
        self.state == LifecycleState::Disposed
    }

    /// Stop polling, tear down stores and mixers and release devices.
    /// Idempotent.
    pub fn dispose(&mut self) {
        if self.state == LifecycleState::Disposed {
            return;
        }
        self.state = LifecycleState::Disposed;

        self.monitor.cancel();
        self.thread.unregister_manager(self.manager);
        self.device_events.clear();

        self.stores.dispose();
        self.mixers.dispose();

        if self.thread.manager_count() == 0 {
            self.thread.free_devices(&*self.backend);
        }
        info!("Audio orchestrator disposed");
    }
}

impl Drop for AudioOrchestrator {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Display for AudioOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AudioOrchestrator ({})", self.current_device_name())
    }
}
