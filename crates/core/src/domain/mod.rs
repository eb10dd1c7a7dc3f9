//! Domain entities and business rules

pub mod audio;
pub mod component;
pub mod config;
pub mod device_monitor;
pub mod events;
pub mod mixer;
pub mod orchestrator;
pub mod sample;
pub mod scheduler;
pub mod store;
pub mod thread;
pub mod track;
pub mod virtual_backend;
pub mod volume;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{
    enumerate_topology, AudioBackend, AudioError, DeviceDescriptor, DeviceState, DeviceTopology,
    NativeHandle, DEFAULT_DEVICE, INTERNAL_DEVICE_COUNT, NO_SOUND_DEVICE,
};
pub use component::{AudioComponent, ComponentContainer, ContainerHandle, SharedComponent};
pub use config::{AudioConfig, ConfigError, ConfigManager, DEFAULT_SAMPLE_CONCURRENCY};
pub use device_monitor::{detect_changes, DeviceMonitor, MonitorSettings, TopologyChange};
pub use events::{DeviceEvent, EventRegistry, SubscriptionId};
pub use mixer::{
    next_user_identifier, ChannelId, ChannelRef, Mixer, MixerChannel, MixerEvent, MixerGraph,
    MixerHandle, MixerId, MixerInfo,
};
pub use orchestrator::{
    AudioHandle, AudioOrchestrator, LifecycleState, OrchestratorOptions, SAMPLE_MIXER, TRACK_MIXER,
};
pub use sample::{Sample, SampleChannel};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use store::{MemoryResourceStore, ResourceStore, SampleStore, TrackStore};
pub use thread::{AudioThread, ManagerId};
pub use track::Track;
pub use virtual_backend::VirtualBackend;
pub use volume::Volume;
