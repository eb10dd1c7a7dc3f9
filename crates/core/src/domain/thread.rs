//! Host-side bookkeeping for the audio thread
//!
//! The [`AudioThread`] records which orchestrators are attached to it and which
//! backend devices were initialised through it, so devices can be released when
//! the last manager goes away.

use crate::domain::audio::{AudioBackend, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Identifies a registered manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagerId(u64);

#[derive(Default)]
struct ThreadState {
    managers: Vec<(ManagerId, String)>,
    initialised_devices: Vec<usize>,
}

#[derive(Default)]
pub struct AudioThread {
    state: Mutex<ThreadState>,
    next_id: AtomicU64,
}

impl AudioThread {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_manager(&self, name: impl Into<String>) -> ManagerId {
        let id = ManagerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        debug!("Registering audio manager {:?} ({})", id, name);
        if let Ok(mut state) = self.state.lock() {
            state.managers.push((id, name));
        }
        id
    }

    pub fn unregister_manager(&self, id: ManagerId) {
        if let Ok(mut state) = self.state.lock() {
            state.managers.retain(|(existing, _)| *existing != id);
        }
    }

    pub fn manager_count(&self) -> usize {
        self.state.lock().map(|s| s.managers.len()).unwrap_or(0)
    }

    /// Initialise `index` on the backend and remember it for later release.
    pub fn init_device(&self, backend: &dyn AudioBackend, index: usize) -> Result<()> {
        backend.init_device(index)?;

        // The default sentinel resolves to a real slot; track what is current.
        let initialised = backend.current_device().unwrap_or(index);
        if let Ok(mut state) = self.state.lock() {
            if !state.initialised_devices.contains(&initialised) {
                state.initialised_devices.push(initialised);
            }
        }
        Ok(())
    }

    pub fn initialised_devices(&self) -> Vec<usize> {
        self.state
            .lock()
            .map(|s| s.initialised_devices.clone())
            .unwrap_or_default()
    }

    /// Release every device initialised through this thread.
    pub fn free_devices(&self, backend: &dyn AudioBackend) {
        let devices = match self.state.lock() {
            Ok(mut state) => std::mem::take(&mut state.initialised_devices),
            Err(_) => return,
        };

        for index in devices {
            if let Err(e) = backend.free_device(index) {
                warn!("Failed to free audio device {}: {}", index, e);
            }
        }
    }
}
