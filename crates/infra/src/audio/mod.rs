//! Platform audio backend implemented on top of CPAL
//!
//! CPAL abstracts the platform APIs:
//! - Windows: WASAPI
//! - Linux: ALSA/PulseAudio
//! - macOS: CoreAudio

pub mod cpal_backend;
pub mod engine;
pub mod mix;
pub mod stream;

pub use cpal_backend::CpalBackend;
pub use engine::{AudioEngine, DEFAULT_TICK};
pub use mix::{decode_f32_le, MixGraph};
pub use stream::{OutputThread, StreamInfo};
