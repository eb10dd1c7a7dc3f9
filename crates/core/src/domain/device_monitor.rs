//! Device hot-plug monitoring and output device selection
//!
//! The [`DeviceMonitor`] owns the current [`DeviceTopology`] snapshot and the
//! fallback cascade used to pick an output device. A background thread polls
//! the backend for changes; it only computes diffs and hands them to a
//! callback, it never touches mixer or channel state.

use crate::domain::audio::{
    enumerate_topology, AudioBackend, AudioError, DeviceDescriptor, DeviceTopology, Result,
};
use crate::domain::events::DeviceEvent;
use crate::domain::thread::AudioThread;
use arc_swap::ArcSwap;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Result of a topology resync.
#[derive(Debug, Clone)]
pub struct TopologyChange {
    pub topology: Arc<DeviceTopology>,
    /// Newly enabled device names, in enumeration order
    pub added: Vec<String>,
    /// Lost device names, in their previous enumeration order
    pub removed: Vec<String>,
}

impl TopologyChange {
    /// Whether subscribers need to hear about this change.
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    /// The notification batch: additions first, then removals.
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.added
            .iter()
            .cloned()
            .map(DeviceEvent::Added)
            .chain(self.removed.iter().cloned().map(DeviceEvent::Removed))
            .collect()
    }
}

/// Polling cadence and selection policy.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub initial_delay: Duration,
    /// Refuse every device except "no sound"
    pub headless: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            initial_delay: Duration::from_secs(1),
            headless: false,
        }
    }
}

struct Poller {
    wake: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct DeviceMonitor {
    backend: Arc<dyn AudioBackend>,
    thread: Arc<AudioThread>,
    topology: Arc<ArcSwap<DeviceTopology>>,
    cancelled: Arc<AtomicBool>,
    settings: MonitorSettings,
    poller: Option<Poller>,
}

/// Cheap check for a topology change: device count plus per-index enabled and
/// default flags. Names and drivers are not compared.
pub fn detect_changes(backend: &dyn AudioBackend, previous: &DeviceTopology) -> Result<bool> {
    let count = backend.device_count()?;
    if count != previous.len() {
        return Ok(true);
    }

    for (index, prev) in previous.devices().iter().enumerate() {
        let state = backend.device_state(index)?;
        if state.is_enabled != prev.is_enabled || state.is_default != prev.is_default {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Names present in `from` but missing in `other`, preserving `from`'s order.
fn difference(from: &[String], other: &[String]) -> Vec<String> {
    from.iter()
        .filter(|name| !other.contains(name))
        .cloned()
        .collect()
}

fn resync_into(
    backend: &dyn AudioBackend,
    topology: &ArcSwap<DeviceTopology>,
) -> Result<TopologyChange> {
    let fresh = Arc::new(enumerate_topology(backend)?);
    let previous = topology.swap(Arc::clone(&fresh));

    let added = difference(fresh.enabled_names(), previous.enabled_names());
    let removed = difference(previous.enabled_names(), fresh.enabled_names());

    if !added.is_empty() || !removed.is_empty() {
        info!(added = ?added, removed = ?removed, "Audio device topology changed");
    } else {
        debug!("Audio device flags changed");
    }

    Ok(TopologyChange {
        topology: fresh,
        added,
        removed,
    })
}

/// Sleep for `duration`, returning `true` if woken for shutdown instead.
fn wait_for_shutdown(wake: &Receiver<()>, duration: Duration) -> bool {
    !matches!(wake.recv_timeout(duration), Err(RecvTimeoutError::Timeout))
}

impl DeviceMonitor {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        thread: Arc<AudioThread>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            backend,
            thread,
            topology: Arc::new(ArcSwap::from_pointee(DeviceTopology::default())),
            cancelled: Arc::new(AtomicBool::new(false)),
            settings,
            poller: None,
        }
    }

    /// Current snapshot; safe to hold across threads.
    pub fn topology(&self) -> Arc<DeviceTopology> {
        self.topology.load_full()
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn has_changed(&self) -> Result<bool> {
        detect_changes(&*self.backend, &self.topology.load())
    }

    /// Rebuild the topology from scratch and diff the enabled device names.
    pub fn resync(&self) -> Result<TopologyChange> {
        resync_into(&*self.backend, &self.topology)
    }

    /// Pick an output device: the preferred one, then the OS default, then
    /// "no sound". Returns the slot that ended up current, or `None` when even
    /// "no sound" failed, in which case backend state is left as it was.
    pub fn select_device(&self, preferred: &str) -> Option<usize> {
        let topology = self.topology.load_full();

        if !preferred.is_empty() {
            match topology.find_by_name(preferred) {
                Some(device) => {
                    if self.try_device(&topology, device.index) {
                        return self.backend.current_device();
                    }
                }
                None => debug!(device = preferred, "Preferred audio device not present"),
            }
        }

        // The OS default only resolves to something when a real device is up.
        if !topology.enabled_names().is_empty()
            && self.try_device(&topology, self.backend.default_device())
        {
            return self.backend.current_device();
        }

        if self.try_device(&topology, self.backend.no_sound_device()) {
            return self.backend.current_device();
        }

        error!("No audio device could be initialised, audio is unavailable");
        None
    }

    fn try_device(&self, topology: &DeviceTopology, index: usize) -> bool {
        let Some(device) = topology.get(index) else {
            return false;
        };

        if !device.is_enabled {
            debug!(device = %device.name, "Skipping disabled audio device");
            return false;
        }

        // Never open real hardware from a headless host.
        if self.settings.headless && index != self.backend.no_sound_device() {
            return false;
        }

        if self.backend.current_device() == Some(index) {
            return true;
        }

        // The default slot resolves to a real device; already being on it counts.
        if index == self.backend.default_device() {
            if let Some(current) = self.current_device() {
                if current.is_default && current.is_enabled && current.is_initialized {
                    return true;
                }
            }
        }

        if let Err(e) = self.thread.init_device(&*self.backend, index) {
            match e {
                AudioError::DeviceUnavailable { .. } => {
                    warn!(device = %device.name, error = %e, "Audio device unavailable")
                }
                _ => error!(device = %device.name, error = %e, "Audio device failed to initialise"),
            }
            return false;
        }

        let current = self
            .backend
            .current_device()
            .and_then(|i| self.backend.device_info(i).ok())
            .unwrap_or_else(|| device.clone());

        info!(
            backend = %self.backend.version(),
            device = %current.name,
            driver = %current.driver,
            index = current.index,
            "🔈 Audio device initialised"
        );
        true
    }

    /// Fresh descriptor of the backend's current device.
    pub fn current_device(&self) -> Option<DeviceDescriptor> {
        let index = self.backend.current_device()?;
        self.backend
            .device_info(index)
            .ok()
            .or_else(|| self.topology.load().get(index).cloned())
    }

    /// The current device is valid if it is enabled, initialised and not a
    /// fallback for the preference.
    pub fn is_current_device_valid(&self, preferred: &str) -> bool {
        let Some(device) = self.current_device() else {
            return false;
        };

        let is_fallback = if preferred.is_empty() {
            !device.is_default
        } else {
            device.name != preferred
        };

        device.is_enabled && device.is_initialized && !is_fallback
    }

    /// Shared cancellation flag, also checked by deferred device handlers.
    pub fn cancellation(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_some()
    }

    /// Start the background poll thread. `on_change` runs on that thread after
    /// every resync and must only hand work off to other threads.
    pub fn start_polling<F>(&mut self, on_change: F) -> Result<()>
    where
        F: Fn(TopologyChange) + Send + 'static,
    {
        if self.poller.is_some() {
            return Ok(());
        }
        if self.is_cancelled() {
            return Err(AudioError::Disposed("DeviceMonitor"));
        }

        let (wake, wake_rx) = bounded::<()>(1);
        let backend = Arc::clone(&self.backend);
        let topology = Arc::clone(&self.topology);
        let cancelled = Arc::clone(&self.cancelled);
        let settings = self.settings.clone();

        let handle = thread::Builder::new()
            .name("device-monitor".to_string())
            .spawn(move || {
                if wait_for_shutdown(&wake_rx, settings.initial_delay) {
                    return;
                }

                loop {
                    if cancelled.load(Ordering::Acquire) {
                        break;
                    }

                    match detect_changes(&*backend, &topology.load()) {
                        Ok(true) => match resync_into(&*backend, &topology) {
                            Ok(change) => on_change(change),
                            Err(e) => debug!("Device resync failed: {}", e),
                        },
                        Ok(false) => trace!("No device changes"),
                        Err(e) => debug!("Device poll failed: {}", e),
                    }

                    if wait_for_shutdown(&wake_rx, settings.poll_interval) {
                        break;
                    }
                }

                debug!("Device monitor thread exiting");
            })
            .map_err(|e| AudioError::OsError(format!("failed to spawn device monitor: {}", e)))?;

        self.poller = Some(Poller { wake, handle });
        Ok(())
    }

    /// Stop polling. Idempotent; blocks until the poll thread has exited.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);

        if let Some(poller) = self.poller.take() {
            let _ = poller.wake.try_send(());
            drop(poller.wake);
            if poller.handle.join().is_err() {
                warn!("Device monitor thread panicked");
            }
        }
    }
}

impl Drop for DeviceMonitor {
    fn drop(&mut self) {
        self.cancel();
    }
}
