//! Software mix graph rendered by the output stream
//!
//! Mirrors the mixer/channel objects the core creates through the backend.
//! Channels hold interleaved `f32` PCM; rendering sums every playing channel
//! reachable from a root mixer into the output buffer.

use sonority_core::domain::audio::{AudioError, NativeHandle, Result};
use std::collections::{HashMap, HashSet};
use tracing::trace;

#[derive(Debug)]
enum MixObject {
    Mixer {
        decode_only: bool,
        children: Vec<NativeHandle>,
        volume: f32,
    },
    Channel {
        samples: Vec<f32>,
        position: usize,
        playing: bool,
        volume: f32,
    },
}

/// Decode raw bytes as interleaved little-endian `f32` samples. Trailing
/// bytes that don't form a full sample are ignored.
pub fn decode_f32_le(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[derive(Debug)]
pub struct MixGraph {
    objects: HashMap<NativeHandle, MixObject>,
    next_handle: u64,
}

impl MixGraph {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            next_handle: 1,
        }
    }

    fn insert(&mut self, object: MixObject) -> NativeHandle {
        let handle = NativeHandle::new(self.next_handle);
        self.next_handle += 1;
        self.objects.insert(handle, object);
        handle
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn create_mixer(&mut self, decode_only: bool) -> NativeHandle {
        self.insert(MixObject::Mixer {
            decode_only,
            children: Vec::new(),
            volume: 1.0,
        })
    }

    pub fn create_channel(&mut self, samples: Vec<f32>) -> NativeHandle {
        self.insert(MixObject::Channel {
            samples,
            position: 0,
            playing: false,
            volume: 1.0,
        })
    }

    fn unknown(handle: NativeHandle) -> AudioError {
        AudioError::Backend(format!("unknown handle {}", handle))
    }

    fn detach_everywhere(&mut self, child: NativeHandle) {
        for object in self.objects.values_mut() {
            if let MixObject::Mixer { children, .. } = object {
                children.retain(|c| *c != child);
            }
        }
    }

    pub fn attach(&mut self, parent: NativeHandle, child: NativeHandle) -> Result<()> {
        if parent == child {
            return Err(AudioError::Backend(format!("cannot attach {} to itself", parent)));
        }
        if !self.objects.contains_key(&child) {
            return Err(Self::unknown(child));
        }
        if !matches!(self.objects.get(&parent), Some(MixObject::Mixer { .. })) {
            return Err(AudioError::Backend(format!("{} is not a mixer", parent)));
        }

        self.detach_everywhere(child);
        if let Some(MixObject::Mixer { children, .. }) = self.objects.get_mut(&parent) {
            children.push(child);
        }
        Ok(())
    }

    pub fn detach(&mut self, parent: NativeHandle, child: NativeHandle) {
        if let Some(MixObject::Mixer { children, .. }) = self.objects.get_mut(&parent) {
            children.retain(|c| *c != child);
        }
    }

    pub fn play(&mut self, handle: NativeHandle) -> Result<()> {
        match self.objects.get_mut(&handle) {
            Some(MixObject::Channel {
                samples,
                position,
                playing,
                ..
            }) => {
                if *position >= samples.len() {
                    *position = 0;
                }
                *playing = true;
                Ok(())
            }
            Some(MixObject::Mixer { .. }) => Ok(()),
            None => Err(Self::unknown(handle)),
        }
    }

    pub fn stop(&mut self, handle: NativeHandle) {
        if let Some(MixObject::Channel { playing, .. }) = self.objects.get_mut(&handle) {
            *playing = false;
        }
    }

    pub fn is_playing(&self, handle: NativeHandle) -> bool {
        matches!(
            self.objects.get(&handle),
            Some(MixObject::Channel { playing: true, .. })
        )
    }

    pub fn set_volume(&mut self, handle: NativeHandle, value: f64) -> Result<()> {
        match self.objects.get_mut(&handle) {
            Some(MixObject::Channel { volume, .. }) | Some(MixObject::Mixer { volume, .. }) => {
                *volume = value.clamp(0.0, 1.0) as f32;
                Ok(())
            }
            None => Err(Self::unknown(handle)),
        }
    }

    pub fn free(&mut self, handle: NativeHandle) {
        self.objects.remove(&handle);
        self.detach_everywhere(handle);
    }

    /// Mixers that output straight to the device: not decode-only and not
    /// attached under another mixer.
    fn roots(&self) -> Vec<NativeHandle> {
        let attached: HashSet<NativeHandle> = self
            .objects
            .values()
            .filter_map(|o| match o {
                MixObject::Mixer { children, .. } => Some(children.iter().copied()),
                MixObject::Channel { .. } => None,
            })
            .flatten()
            .collect();

        let mut roots: Vec<NativeHandle> = self
            .objects
            .iter()
            .filter(|(handle, o)| {
                matches!(o, MixObject::Mixer { decode_only: false, .. }) && !attached.contains(*handle)
            })
            .map(|(handle, _)| *handle)
            .collect();
        roots.sort_by_key(NativeHandle::raw);
        roots
    }

    /// Render one buffer: silence, then every playing channel under a root
    /// mixer summed in and clamped to `-1.0..=1.0`.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);

        let mut visited = HashSet::new();
        let mut stack: Vec<(NativeHandle, f32)> =
            self.roots().into_iter().map(|h| (h, 1.0)).collect();

        while let Some((handle, gain)) = stack.pop() {
            if !visited.insert(handle) {
                continue;
            }
            match self.objects.get_mut(&handle) {
                Some(MixObject::Mixer {
                    children, volume, ..
                }) => {
                    let gain = gain * *volume;
                    stack.extend(children.iter().map(|c| (*c, gain)));
                }
                Some(MixObject::Channel {
                    samples,
                    position,
                    playing,
                    volume,
                }) => {
                    if !*playing {
                        continue;
                    }
                    let gain = gain * *volume;
                    let remaining = &samples[(*position).min(samples.len())..];
                    let count = remaining.len().min(out.len());
                    for (dst, src) in out.iter_mut().zip(remaining.iter()) {
                        *dst += src * gain;
                    }
                    *position += count;
                    if *position >= samples.len() {
                        *playing = false;
                        trace!("Channel {} finished", handle);
                    }
                }
                None => {}
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }
}

impl Default for MixGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut bytes = pcm(&[0.5, -0.25]);
        bytes.push(7);
        assert_eq!(decode_f32_le(&bytes), vec![0.5, -0.25]);
    }

    #[test]
    fn test_render_sums_playing_channels() {
        let mut graph = MixGraph::new();
        let mixer = graph.create_mixer(false);
        let a = graph.create_channel(vec![0.25; 4]);
        let b = graph.create_channel(vec![0.5; 2]);
        graph.attach(mixer, a).unwrap();
        graph.attach(mixer, b).unwrap();
        graph.play(a).unwrap();
        graph.play(b).unwrap();

        let mut out = [0.0f32; 4];
        graph.render(&mut out);
        assert_eq!(out, [0.75, 0.75, 0.25, 0.25]);
        assert!(!graph.is_playing(a));
        assert!(!graph.is_playing(b));
    }

    #[test]
    fn test_decode_only_mixer_needs_a_sink() {
        let mut graph = MixGraph::new();
        let decode = graph.create_mixer(true);
        let channel = graph.create_channel(vec![0.5; 2]);
        graph.attach(decode, channel).unwrap();
        graph.play(channel).unwrap();

        let mut out = [0.0f32; 2];
        graph.render(&mut out);
        assert_eq!(out, [0.0, 0.0]);

        let sink = graph.create_mixer(false);
        graph.attach(sink, decode).unwrap();
        graph.set_volume(sink, 0.5).unwrap();
        graph.render(&mut out);
        assert_eq!(out, [0.25, 0.25]);
    }

    #[test]
    fn test_free_detaches_child() {
        let mut graph = MixGraph::new();
        let mixer = graph.create_mixer(false);
        let channel = graph.create_channel(vec![1.0]);
        graph.attach(mixer, channel).unwrap();
        graph.free(channel);

        assert_eq!(graph.len(), 1);
        assert!(graph.play(channel).is_err());
    }
}
