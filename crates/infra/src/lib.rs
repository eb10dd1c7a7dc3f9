//! Sonority infrastructure: the CPAL backend, the audio thread and
//! filesystem resource stores.

pub mod audio;
pub mod resources;

pub use audio::{AudioEngine, CpalBackend};
pub use resources::DirectoryResourceStore;
