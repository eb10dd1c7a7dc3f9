//! Shared fixtures for the integration suites
//!
//! Everything here runs against [`VirtualBackend`], so the suites need no
//! audio hardware.

use sonority_core::domain::config::AudioConfig;
use sonority_core::domain::events::DeviceEvent;
use sonority_core::domain::orchestrator::{AudioOrchestrator, OrchestratorOptions};
use sonority_core::domain::store::{MemoryResourceStore, ResourceStore};
use sonority_core::domain::thread::AudioThread;
use sonority_core::domain::virtual_backend::VirtualBackend;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::filter::LevelFilter;

/// How long a suite waits for the poll thread before giving up.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Route test logs through the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(LevelFilter::DEBUG)
        .try_init();
}

/// A config that polls every 10ms, so hot-plug tests settle quickly.
pub fn fast_config(preferred: &str) -> AudioConfig {
    AudioConfig {
        preferred_device: preferred.to_string(),
        poll_interval_ms: 10,
        initial_poll_delay_ms: 10,
        ..AudioConfig::default()
    }
}

/// Interleaved little-endian `f32` PCM, the format channels are created from.
pub fn pcm(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// A resource store with one short clip per name.
pub fn clips(names: &[&str]) -> Arc<MemoryResourceStore> {
    let store = MemoryResourceStore::new();
    for name in names {
        store.insert(*name, pcm(&[0.25; 64]));
    }
    Arc::new(store)
}

pub fn orchestrator(virt: &Arc<VirtualBackend>, config: AudioConfig) -> AudioOrchestrator {
    orchestrator_with_resources(virt, config, clips(&[]), clips(&[]))
}

pub fn orchestrator_with_resources(
    virt: &Arc<VirtualBackend>,
    config: AudioConfig,
    tracks: Arc<dyn ResourceStore>,
    samples: Arc<dyn ResourceStore>,
) -> AudioOrchestrator {
    init_tracing();
    AudioOrchestrator::new(
        virt.clone(),
        Arc::new(AudioThread::new()),
        tracks,
        samples,
        OrchestratorOptions {
            config,
            ..OrchestratorOptions::default()
        },
    )
    .expect("orchestrator should start on a virtual backend")
}

/// Run `audio.update()` until `done` holds or [`SETTLE_TIMEOUT`] passes.
pub fn pump_until<F>(audio: &mut AudioOrchestrator, mut done: F) -> bool
where
    F: FnMut(&AudioOrchestrator) -> bool,
{
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    loop {
        audio.update();
        if done(audio) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// Keep updating for `duration` regardless of what happens.
pub fn pump_for(audio: &mut AudioOrchestrator, duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        audio.update();
        thread::sleep(Duration::from_millis(5));
    }
}

/// Records every device event an orchestrator delivers.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<DeviceEvent>>>,
}

impl EventLog {
    pub fn attach(audio: &AudioOrchestrator) -> Self {
        let log = Self::default();
        let sink = Arc::clone(&log.events);
        audio.on_device_event(move |event| {
            if let Ok(mut events) = sink.lock() {
                events.push(event.clone());
            }
        });
        log
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn added(name: &str) -> DeviceEvent {
    DeviceEvent::Added(name.to_string())
}

pub fn removed(name: &str) -> DeviceEvent {
    DeviceEvent::Removed(name.to_string())
}
