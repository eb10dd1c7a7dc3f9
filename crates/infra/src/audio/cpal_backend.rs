//! CPAL-based audio backend
//!
//! Exposes the host's output devices behind the core's [`AudioBackend`]
//! contract. cpal has no notion of a "no sound" or "default" device, so both
//! sentinels are synthesized ahead of the real devices. Mixers and channels
//! live in a software [`MixGraph`] rendered by the output stream.

use super::mix::{decode_f32_le, MixGraph};
use super::stream::OutputThread;
use cpal::traits::{DeviceTrait, HostTrait};
use sonority_core::domain::audio::{
    AudioBackend, AudioError, DeviceDescriptor, NativeHandle, Result, DEFAULT_DEVICE,
    INTERNAL_DEVICE_COUNT, NO_SOUND_DEVICE,
};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

const NO_SOUND_NAME: &str = "No sound";
const DEFAULT_NAME: &str = "Default";

#[derive(Debug, Default)]
struct CpalState {
    devices: Vec<DeviceDescriptor>,
    current: Option<String>,
    initialised: HashSet<String>,
}

impl CpalState {
    fn index_of(&self, name: &str) -> Option<usize> {
        self.devices
            .iter()
            .skip(INTERNAL_DEVICE_COUNT)
            .find(|d| d.name == name)
            .map(|d| d.index)
    }
}

/// Output device names in host order, plus the name of the host default.
fn enumerate_outputs(host: &cpal::Host) -> Result<(Vec<String>, Option<String>)> {
    #[allow(deprecated)]
    let names = host
        .output_devices()
        .map_err(|e| AudioError::OsError(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .collect();

    #[allow(deprecated)]
    let default = host.default_output_device().and_then(|d| d.name().ok());

    Ok((names, default))
}

/// Build a descriptor table with the sentinels first. A device that is
/// current but no longer listed stays in the table, disabled, so the core can
/// see that it went away.
fn build_devices(
    driver: &str,
    names: Vec<String>,
    default: Option<&str>,
    current: Option<&str>,
    initialised: &HashSet<String>,
) -> Vec<DeviceDescriptor> {
    let mut no_sound = DeviceDescriptor::new(NO_SOUND_DEVICE, NO_SOUND_NAME, driver);
    no_sound.is_initialized = initialised.contains(NO_SOUND_NAME);
    let mut default_slot = DeviceDescriptor::new(DEFAULT_DEVICE, DEFAULT_NAME, driver);
    default_slot.is_enabled = default.is_some();

    let mut devices = vec![no_sound, default_slot];
    for name in names {
        let mut device = DeviceDescriptor::new(devices.len(), name, driver);
        device.is_default = default == Some(device.name.as_str());
        device.is_initialized = initialised.contains(&device.name);
        devices.push(device);
    }

    if let Some(current) = current {
        let listed = current == NO_SOUND_NAME
            || devices
                .iter()
                .skip(INTERNAL_DEVICE_COUNT)
                .any(|d| d.name == current);
        if !listed {
            let mut ghost = DeviceDescriptor::new(devices.len(), current, driver);
            ghost.is_enabled = false;
            ghost.is_initialized = true;
            devices.push(ghost);
        }
    }

    devices
}

pub struct CpalBackend {
    host_id: cpal::HostId,
    state: Mutex<CpalState>,
    graph: Arc<Mutex<MixGraph>>,
    output: OutputThread,
}

impl CpalBackend {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        info!("Using audio host: {:?}", host.id());

        let graph = Arc::new(Mutex::new(MixGraph::new()));
        let output = OutputThread::spawn(Arc::clone(&graph))?;

        let backend = Self {
            host_id: host.id(),
            state: Mutex::new(CpalState::default()),
            graph,
            output,
        };
        backend.refresh()?;
        Ok(backend)
    }

    fn driver(&self) -> String {
        format!("{:?}", self.host_id)
    }

    fn host(&self) -> Result<cpal::Host> {
        cpal::host_from_id(self.host_id).map_err(|e| AudioError::OsError(e.to_string()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, CpalState>> {
        self.state
            .lock()
            .map_err(|_| AudioError::Backend("backend state lock poisoned".to_string()))
    }

    fn graph(&self) -> Result<MutexGuard<'_, MixGraph>> {
        self.graph
            .lock()
            .map_err(|_| AudioError::Backend("mix graph lock poisoned".to_string()))
    }

    /// Re-enumerate the host's output devices.
    fn refresh(&self) -> Result<usize> {
        let (names, default) = enumerate_outputs(&self.host()?)?;
        let driver = self.driver();

        let mut state = self.lock()?;
        let devices = build_devices(
            &driver,
            names,
            default.as_deref(),
            state.current.as_deref(),
            &state.initialised,
        );
        state.devices = devices;
        debug!("Enumerated {} device slots", state.devices.len());
        Ok(state.devices.len())
    }

    fn descriptor(&self, index: usize) -> Result<DeviceDescriptor> {
        self.lock()?
            .devices
            .get(index)
            .cloned()
            .ok_or_else(|| AudioError::DeviceNotFound(format!("index {}", index)))
    }

    fn set_current(&self, name: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.current = Some(name.to_string());
        state.initialised.insert(name.to_string());
        for device in state.devices.iter_mut() {
            if device.name == name && device.index != DEFAULT_DEVICE {
                device.is_initialized = true;
            }
        }
        Ok(())
    }
}

impl AudioBackend for CpalBackend {
    fn version(&self) -> String {
        format!("cpal ({:?})", self.host_id)
    }

    fn device_count(&self) -> Result<usize> {
        self.refresh()
    }

    fn device_info(&self, index: usize) -> Result<DeviceDescriptor> {
        self.descriptor(index)
    }

    fn init_device(&self, index: usize) -> Result<()> {
        let device = self.descriptor(index)?;
        if !device.is_enabled {
            return Err(AudioError::DeviceUnavailable {
                index,
                reason: "device is not available".to_string(),
            });
        }

        if index == NO_SOUND_DEVICE {
            self.output.close()?;
            return self.set_current(NO_SOUND_NAME);
        }

        let target = if index == DEFAULT_DEVICE {
            let state = self.lock()?;
            state
                .devices
                .iter()
                .skip(INTERNAL_DEVICE_COUNT)
                .find(|d| d.is_default && d.is_enabled)
                .map(|d| d.name.clone())
                .ok_or_else(|| AudioError::DeviceUnavailable {
                    index,
                    reason: "no default output device".to_string(),
                })?
        } else {
            device.name
        };

        self.output.open(&target)?;
        self.set_current(&target)
    }

    fn free_device(&self, index: usize) -> Result<()> {
        let device = self.descriptor(index)?;
        let mut state = self.lock()?;
        state.initialised.remove(&device.name);

        if state.current.as_deref() == Some(device.name.as_str()) {
            state.current = None;
            drop(state);
            self.output.close()?;
        }
        Ok(())
    }

    fn current_device(&self) -> Option<usize> {
        let state = self.lock().ok()?;
        let current = state.current.as_deref()?;
        if current == NO_SOUND_NAME {
            return Some(NO_SOUND_DEVICE);
        }
        state.index_of(current)
    }

    fn create_mixer(&self, decode_only: bool) -> Result<NativeHandle> {
        Ok(self.graph()?.create_mixer(decode_only))
    }

    fn attach(&self, parent: NativeHandle, child: NativeHandle) -> Result<()> {
        self.graph()?.attach(parent, child)
    }

    fn detach(&self, parent: NativeHandle, child: NativeHandle) -> Result<()> {
        self.graph()?.detach(parent, child);
        Ok(())
    }

    fn create_channel(&self, data: &[u8]) -> Result<NativeHandle> {
        if self.lock()?.current.is_none() {
            return Err(AudioError::Backend("no device initialised".to_string()));
        }
        Ok(self.graph()?.create_channel(decode_f32_le(data)))
    }

    fn play(&self, handle: NativeHandle) -> Result<()> {
        self.graph()?.play(handle)
    }

    fn stop(&self, handle: NativeHandle) -> Result<()> {
        self.graph()?.stop(handle);
        Ok(())
    }

    fn is_playing(&self, handle: NativeHandle) -> bool {
        self.graph().map(|g| g.is_playing(handle)).unwrap_or(false)
    }

    fn set_volume(&self, handle: NativeHandle, volume: f64) -> Result<()> {
        self.graph()?.set_volume(handle, volume)
    }

    fn free(&self, handle: NativeHandle) -> Result<()> {
        self.graph()?.free(handle);
        Ok(())
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        if let Err(e) = self.output.close() {
            warn!("Failed to close output stream: {}", e);
        }
    }
}

impl fmt::Debug for CpalBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpalBackend")
            .field("host", &self.host_id)
            .finish()
    }
}
