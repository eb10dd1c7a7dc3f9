//! Audio device abstractions and domain models
//!
//! This module defines the backend-facing interface the rest of the crate is
//! written against. Concrete backends (cpal, the in-memory virtual backend)
//! implement [`AudioBackend`]; everything above it only sees device
//! descriptors, topology snapshots and opaque native handles.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Index of the reserved "no sound" device.
pub const NO_SOUND_DEVICE: usize = 0;

/// Index of the reserved device denoting the OS default output.
pub const DEFAULT_DEVICE: usize = 1;

/// Number of reserved device slots preceding the first real device.
pub const INTERNAL_DEVICE_COUNT: usize = 2;

/// Errors that can occur in the audio subsystem
#[derive(Debug, Error)]
pub enum AudioError {
    /// Requested audio device was not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Device exists but cannot be used right now
    #[error("Device {index} unavailable: {reason}")]
    DeviceUnavailable { index: usize, reason: String },

    /// The native backend reported a failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Operation invoked on a component that was already disposed
    #[error("{0} has already been disposed")]
    Disposed(&'static str),

    /// A resource store had nothing under the requested name
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Invalid configuration for audio device
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Error in audio stream creation or processing
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Input/Output error at the OS level
    #[error("OS error: {0}")]
    OsError(String),
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Opaque handle to a backend object (mixer, channel or sink).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeHandle(u64);

impl NativeHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Immutable snapshot of one backend device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub index: usize,
    pub name: String,
    pub driver: String,
    pub is_enabled: bool,
    pub is_default: bool,
    pub is_initialized: bool,
}

impl DeviceDescriptor {
    pub fn new(index: usize, name: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            driver: driver.into(),
            is_enabled: true,
            is_default: false,
            is_initialized: false,
        }
    }

    /// Whether this slot is one of the reserved sentinel devices.
    pub fn is_sentinel(&self) -> bool {
        self.index < INTERNAL_DEVICE_COUNT
    }

    pub fn state(&self) -> DeviceState {
        DeviceState {
            is_enabled: self.is_enabled,
            is_default: self.is_default,
        }
    }
}

/// The subset of device flags used for cheap change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceState {
    pub is_enabled: bool,
    pub is_default: bool,
}

/// A whole-value snapshot of the backend's devices.
///
/// `enabled_names` is derived from `devices` on construction and never edited
/// separately, so the two can't disagree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceTopology {
    devices: Vec<DeviceDescriptor>,
    enabled_names: Vec<String>,
}

impl DeviceTopology {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        let enabled_names = devices
            .iter()
            .filter(|d| !d.is_sentinel() && d.is_enabled)
            .map(|d| d.name.clone())
            .collect();

        Self {
            devices,
            enabled_names,
        }
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    /// Names of enabled real devices, in enumeration order.
    pub fn enabled_names(&self) -> &[String] {
        &self.enabled_names
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DeviceDescriptor> {
        self.devices.get(index)
    }

    /// Find a real (non-sentinel) device by exact name.
    pub fn find_by_name(&self, name: &str) -> Option<&DeviceDescriptor> {
        self.devices
            .iter()
            .find(|d| !d.is_sentinel() && d.name == name)
    }
}

/// Native audio backend consumed by the core.
///
/// Device indices follow the sentinel layout described by [`NO_SOUND_DEVICE`]
/// and [`DEFAULT_DEVICE`]. All methods may be called from the audio thread;
/// the device query methods are also called from the monitor thread.
pub trait AudioBackend: Send + Sync {
    /// Human-readable backend version, logged on device selection
    fn version(&self) -> String;

    /// Number of device slots, sentinels included
    fn device_count(&self) -> Result<usize>;

    /// Full descriptor for one device slot
    fn device_info(&self, index: usize) -> Result<DeviceDescriptor>;

    /// Enabled/default flags only. Backends should override this when they can
    /// answer without building a full descriptor.
    fn device_state(&self, index: usize) -> Result<DeviceState> {
        self.device_info(index).map(|d| d.state())
    }

    /// Initialise output on the given device slot and make it current
    fn init_device(&self, index: usize) -> Result<()>;

    /// Release a previously initialised device
    fn free_device(&self, index: usize) -> Result<()>;

    /// Currently active device slot, if any device was initialised
    fn current_device(&self) -> Option<usize>;

    fn default_device(&self) -> usize {
        DEFAULT_DEVICE
    }

    fn no_sound_device(&self) -> usize {
        NO_SOUND_DEVICE
    }

    /// Create a mixer. Decode-only mixers don't output to hardware and must be
    /// attached to an enclosing sink to be heard.
    fn create_mixer(&self, decode_only: bool) -> Result<NativeHandle>;

    /// Route `child` (a mixer or channel) into `parent`
    fn attach(&self, parent: NativeHandle, child: NativeHandle) -> Result<()>;

    fn detach(&self, parent: NativeHandle, child: NativeHandle) -> Result<()>;

    /// Create a playable channel from raw audio bytes
    fn create_channel(&self, data: &[u8]) -> Result<NativeHandle>;

    fn play(&self, handle: NativeHandle) -> Result<()>;

    fn stop(&self, handle: NativeHandle) -> Result<()>;

    fn is_playing(&self, handle: NativeHandle) -> bool;

    fn set_volume(&self, handle: NativeHandle, volume: f64) -> Result<()>;

    /// Release any backend object
    fn free(&self, handle: NativeHandle) -> Result<()>;
}

/// Read every device slot into a fresh topology snapshot.
pub fn enumerate_topology(backend: &dyn AudioBackend) -> Result<DeviceTopology> {
    let count = backend.device_count()?;
    let mut devices = Vec::with_capacity(count);
    for index in 0..count {
        devices.push(backend.device_info(index)?);
    }

    if devices.len() < INTERNAL_DEVICE_COUNT {
        return Err(AudioError::Backend(format!(
            "backend reported {} devices, expected at least the {} sentinels",
            devices.len(),
            INTERNAL_DEVICE_COUNT
        )));
    }

    Ok(DeviceTopology::new(devices))
}
