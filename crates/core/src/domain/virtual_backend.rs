//! In-memory audio backend
//!
//! [`VirtualBackend`] keeps a scriptable device table and a registry of mixer
//! and channel objects without touching any hardware. It is what headless
//! hosts run on, and the test suites drive hot-plug scenarios through it.

use crate::domain::audio::{
    AudioBackend, AudioError, DeviceDescriptor, DeviceState, NativeHandle, Result,
    DEFAULT_DEVICE, INTERNAL_DEVICE_COUNT, NO_SOUND_DEVICE,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

const VIRTUAL_DRIVER: &str = "virtual";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectKind {
    Mixer { decode_only: bool },
    Channel,
}

#[derive(Debug)]
struct VirtualObject {
    kind: ObjectKind,
    children: Vec<NativeHandle>,
    playing: bool,
    volume: f64,
}

#[derive(Debug)]
struct VirtualState {
    devices: Vec<DeviceDescriptor>,
    current: Option<usize>,
    failing_inits: HashSet<usize>,
    failing_queries: bool,
    init_calls: usize,
    objects: HashMap<NativeHandle, VirtualObject>,
    next_handle: u64,
}

/// Scriptable backend with sentinel slots at the reserved indices.
#[derive(Debug)]
pub struct VirtualBackend {
    state: Mutex<VirtualState>,
}

impl VirtualBackend {
    /// A backend with only the two sentinel devices.
    pub fn new() -> Self {
        let mut no_sound = DeviceDescriptor::new(NO_SOUND_DEVICE, "No sound", VIRTUAL_DRIVER);
        no_sound.is_enabled = true;
        let default = DeviceDescriptor::new(DEFAULT_DEVICE, "Default", VIRTUAL_DRIVER);

        Self {
            state: Mutex::new(VirtualState {
                devices: vec![no_sound, default],
                current: None,
                failing_inits: HashSet::new(),
                failing_queries: false,
                init_calls: 0,
                objects: HashMap::new(),
                next_handle: 1,
            }),
        }
    }

    /// A backend with the given enabled devices; the first one is the OS default.
    pub fn with_devices(names: &[&str]) -> Self {
        let backend = Self::new();
        for (i, name) in names.iter().enumerate() {
            backend.add_device(name, true, i == 0);
        }
        backend
    }

    fn lock(&self) -> Result<MutexGuard<'_, VirtualState>> {
        self.state
            .lock()
            .map_err(|_| AudioError::Backend("virtual backend state poisoned".to_string()))
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut VirtualState) -> R) -> Option<R> {
        self.state.lock().ok().map(|mut s| f(&mut s))
    }

    /// Append a device slot and return its index.
    pub fn add_device(&self, name: &str, enabled: bool, default: bool) -> usize {
        self.with_state(|s| {
            let index = s.devices.len();
            if default {
                for d in s.devices.iter_mut() {
                    d.is_default = false;
                }
            }
            s.devices.push(DeviceDescriptor {
                is_enabled: enabled,
                is_default: default,
                ..DeviceDescriptor::new(index, name, VIRTUAL_DRIVER)
            });
            index
        })
        .unwrap_or(0)
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) {
        self.with_state(|s| {
            for d in s.devices.iter_mut().skip(INTERNAL_DEVICE_COUNT) {
                if d.name == name {
                    d.is_enabled = enabled;
                    if !enabled {
                        d.is_initialized = false;
                    }
                }
            }
        });
    }

    /// Make `name` the OS default output; `None` clears the default flag.
    pub fn set_default(&self, name: Option<&str>) {
        self.with_state(|s| {
            for d in s.devices.iter_mut().skip(INTERNAL_DEVICE_COUNT) {
                d.is_default = Some(d.name.as_str()) == name;
            }
        });
    }

    /// Rename a device in place, keeping its slot and flags.
    pub fn rename_device(&self, name: &str, new_name: &str) {
        self.with_state(|s| {
            for d in s.devices.iter_mut().skip(INTERNAL_DEVICE_COUNT) {
                if d.name == name {
                    d.name = new_name.to_string();
                }
            }
        });
    }

    pub fn set_sentinel_enabled(&self, index: usize, enabled: bool) {
        self.with_state(|s| {
            if let Some(d) = s.devices.get_mut(index).filter(|d| d.is_sentinel()) {
                d.is_enabled = enabled;
            }
        });
    }

    /// Make init calls for `index` fail until cleared.
    pub fn fail_init(&self, index: usize, fail: bool) {
        self.with_state(|s| {
            if fail {
                s.failing_inits.insert(index);
            } else {
                s.failing_inits.remove(&index);
            }
        });
    }

    /// Make every device query fail, as a flaky driver would.
    pub fn fail_queries(&self, fail: bool) {
        self.with_state(|s| s.failing_queries = fail);
    }

    pub fn init_calls(&self) -> usize {
        self.with_state(|s| s.init_calls).unwrap_or(0)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.with_state(|s| {
            s.devices
                .iter()
                .skip(INTERNAL_DEVICE_COUNT)
                .find(|d| d.name == name)
                .map(|d| d.index)
        })
        .flatten()
    }

    /// Name of the current device, if any.
    pub fn current_device_name(&self) -> Option<String> {
        self.with_state(|s| s.current.and_then(|i| s.devices.get(i)).map(|d| d.name.clone()))
            .flatten()
    }

    /// End playback of one channel, as if it reached the end of its data.
    pub fn finish(&self, handle: NativeHandle) {
        self.with_state(|s| {
            if let Some(obj) = s.objects.get_mut(&handle) {
                obj.playing = false;
            }
        });
    }

    pub fn finish_all(&self) {
        self.with_state(|s| {
            for obj in s.objects.values_mut() {
                if obj.kind == ObjectKind::Channel {
                    obj.playing = false;
                }
            }
        });
    }

    pub fn children(&self, parent: NativeHandle) -> Vec<NativeHandle> {
        self.with_state(|s| {
            s.objects
                .get(&parent)
                .map(|o| o.children.clone())
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    pub fn is_decode_only(&self, handle: NativeHandle) -> Option<bool> {
        self.with_state(|s| match s.objects.get(&handle).map(|o| o.kind) {
            Some(ObjectKind::Mixer { decode_only }) => Some(decode_only),
            _ => None,
        })
        .flatten()
    }

    pub fn volume(&self, handle: NativeHandle) -> Option<f64> {
        self.with_state(|s| s.objects.get(&handle).map(|o| o.volume))
            .flatten()
    }

    pub fn exists(&self, handle: NativeHandle) -> bool {
        self.with_state(|s| s.objects.contains_key(&handle))
            .unwrap_or(false)
    }

    pub fn object_count(&self) -> usize {
        self.with_state(|s| s.objects.len()).unwrap_or(0)
    }

    fn insert_object(s: &mut VirtualState, kind: ObjectKind) -> NativeHandle {
        let handle = NativeHandle::new(s.next_handle);
        s.next_handle += 1;
        s.objects.insert(
            handle,
            VirtualObject {
                kind,
                children: Vec::new(),
                playing: false,
                volume: 1.0,
            },
        );
        handle
    }
}

impl Default for VirtualBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for VirtualBackend {
    fn version(&self) -> String {
        format!("virtual {}", env!("CARGO_PKG_VERSION"))
    }

    fn device_count(&self) -> Result<usize> {
        let s = self.lock()?;
        if s.failing_queries {
            return Err(AudioError::OsError("device query failed".to_string()));
        }
        Ok(s.devices.len())
    }

    fn device_info(&self, index: usize) -> Result<DeviceDescriptor> {
        let s = self.lock()?;
        if s.failing_queries {
            return Err(AudioError::OsError("device query failed".to_string()));
        }
        s.devices
            .get(index)
            .cloned()
            .ok_or_else(|| AudioError::DeviceNotFound(format!("index {}", index)))
    }

    fn device_state(&self, index: usize) -> Result<DeviceState> {
        let s = self.lock()?;
        if s.failing_queries {
            return Err(AudioError::OsError("device query failed".to_string()));
        }
        s.devices
            .get(index)
            .map(|d| d.state())
            .ok_or_else(|| AudioError::DeviceNotFound(format!("index {}", index)))
    }

    fn init_device(&self, index: usize) -> Result<()> {
        let mut s = self.lock()?;
        s.init_calls += 1;

        if s.failing_inits.contains(&index) {
            return Err(AudioError::Backend(format!("init of device {} failed", index)));
        }

        let device = s
            .devices
            .get(index)
            .ok_or_else(|| AudioError::DeviceNotFound(format!("index {}", index)))?;
        if !device.is_enabled {
            return Err(AudioError::DeviceUnavailable {
                index,
                reason: "device is disabled".to_string(),
            });
        }

        let target = if index == DEFAULT_DEVICE {
            s.devices
                .iter()
                .skip(INTERNAL_DEVICE_COUNT)
                .find(|d| d.is_default && d.is_enabled)
                .map(|d| d.index)
                .ok_or_else(|| AudioError::DeviceUnavailable {
                    index,
                    reason: "no OS default output".to_string(),
                })?
        } else {
            index
        };

        if let Some(d) = s.devices.get_mut(target) {
            d.is_initialized = true;
        }
        s.current = Some(target);
        Ok(())
    }

    fn free_device(&self, index: usize) -> Result<()> {
        let mut s = self.lock()?;
        if let Some(d) = s.devices.get_mut(index) {
            d.is_initialized = false;
        }
        if s.current == Some(index) {
            s.current = None;
        }
        Ok(())
    }

    fn current_device(&self) -> Option<usize> {
        self.with_state(|s| s.current).flatten()
    }

    fn create_mixer(&self, decode_only: bool) -> Result<NativeHandle> {
        let mut s = self.lock()?;
        Ok(Self::insert_object(&mut s, ObjectKind::Mixer { decode_only }))
    }

    fn attach(&self, parent: NativeHandle, child: NativeHandle) -> Result<()> {
        let mut s = self.lock()?;
        if !s.objects.contains_key(&child) {
            return Err(AudioError::Backend(format!("unknown handle {}", child)));
        }
        for obj in s.objects.values_mut() {
            obj.children.retain(|c| *c != child);
        }
        let parent_obj = s
            .objects
            .get_mut(&parent)
            .ok_or_else(|| AudioError::Backend(format!("unknown handle {}", parent)))?;
        if !matches!(parent_obj.kind, ObjectKind::Mixer { .. }) {
            return Err(AudioError::Backend(format!("{} is not a mixer", parent)));
        }
        parent_obj.children.push(child);
        Ok(())
    }

    fn detach(&self, parent: NativeHandle, child: NativeHandle) -> Result<()> {
        let mut s = self.lock()?;
        if let Some(obj) = s.objects.get_mut(&parent) {
            obj.children.retain(|c| *c != child);
        }
        Ok(())
    }

    fn create_channel(&self, _data: &[u8]) -> Result<NativeHandle> {
        let mut s = self.lock()?;
        if s.current.is_none() {
            return Err(AudioError::Backend("no device initialised".to_string()));
        }
        Ok(Self::insert_object(&mut s, ObjectKind::Channel))
    }

    fn play(&self, handle: NativeHandle) -> Result<()> {
        let mut s = self.lock()?;
        let obj = s
            .objects
            .get_mut(&handle)
            .ok_or_else(|| AudioError::Backend(format!("unknown handle {}", handle)))?;
        obj.playing = true;
        Ok(())
    }

    fn stop(&self, handle: NativeHandle) -> Result<()> {
        let mut s = self.lock()?;
        if let Some(obj) = s.objects.get_mut(&handle) {
            obj.playing = false;
        }
        Ok(())
    }

    fn is_playing(&self, handle: NativeHandle) -> bool {
        self.with_state(|s| s.objects.get(&handle).is_some_and(|o| o.playing))
            .unwrap_or(false)
    }

    fn set_volume(&self, handle: NativeHandle, volume: f64) -> Result<()> {
        let mut s = self.lock()?;
        if let Some(obj) = s.objects.get_mut(&handle) {
            obj.volume = volume.clamp(0.0, 1.0);
        }
        Ok(())
    }

    fn free(&self, handle: NativeHandle) -> Result<()> {
        let mut s = self.lock()?;
        s.objects.remove(&handle);
        for obj in s.objects.values_mut() {
            obj.children.retain(|c| *c != handle);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_precede_devices() {
        let backend = VirtualBackend::with_devices(&["Speakers", "Headphones"]);
        assert_eq!(backend.device_count().unwrap(), 4);
        assert_eq!(backend.device_info(NO_SOUND_DEVICE).unwrap().name, "No sound");
        assert_eq!(backend.device_info(2).unwrap().name, "Speakers");
        assert!(backend.device_info(2).unwrap().is_default);
        assert!(!backend.device_info(3).unwrap().is_default);
    }

    #[test]
    fn test_default_sentinel_resolves_to_default_device() {
        let backend = VirtualBackend::with_devices(&["Speakers", "Headphones"]);
        backend.set_default(Some("Headphones"));
        backend.init_device(DEFAULT_DEVICE).unwrap();
        assert_eq!(backend.current_device(), Some(3));
        assert!(backend.device_info(3).unwrap().is_initialized);
    }

    #[test]
    fn test_disabled_device_cannot_init() {
        let backend = VirtualBackend::with_devices(&["Speakers"]);
        backend.set_enabled("Speakers", false);
        assert!(matches!(
            backend.init_device(2),
            Err(AudioError::DeviceUnavailable { index: 2, .. })
        ));
        assert_eq!(backend.current_device(), None);
    }

    #[test]
    fn test_attach_moves_child_between_parents() {
        let backend = VirtualBackend::with_devices(&["Speakers"]);
        backend.init_device(2).unwrap();
        let a = backend.create_mixer(false).unwrap();
        let b = backend.create_mixer(false).unwrap();
        let ch = backend.create_channel(&[]).unwrap();

        backend.attach(a, ch).unwrap();
        backend.attach(b, ch).unwrap();
        assert!(backend.children(a).is_empty());
        assert_eq!(backend.children(b), vec![ch]);

        backend.free(ch).unwrap();
        assert!(backend.children(b).is_empty());
    }

    #[test]
    fn test_channels_need_a_device() {
        let backend = VirtualBackend::new();
        assert!(backend.create_channel(&[]).is_err());
    }
}
