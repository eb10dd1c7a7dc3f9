//! Shared volume values

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Linear volume in `0.0..=1.0`, shared between every clone.
///
/// Stores are handed a clone of the orchestrator's volume, so changing it from
/// the host is picked up by every channel on its next update.
#[derive(Clone)]
pub struct Volume(Arc<AtomicU64>);

impl Volume {
    pub fn new(value: f64) -> Self {
        Self(Arc::new(AtomicU64::new(Self::sanitize(value).to_bits())))
    }

    fn sanitize(value: f64) -> f64 {
        if value.is_nan() {
            0.0
        } else {
            value.clamp(0.0, 1.0)
        }
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, value: f64) {
        self.0
            .store(Self::sanitize(value).to_bits(), Ordering::Release);
    }

    /// Whether both values are the same shared cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl fmt::Debug for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Volume").field(&self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_value() {
        let volume = Volume::new(0.5);
        let other = volume.clone();
        other.set(0.25);
        assert_eq!(volume.get(), 0.25);
        assert!(volume.ptr_eq(&other));
    }

    #[test]
    fn test_values_are_clamped() {
        let volume = Volume::new(2.0);
        assert_eq!(volume.get(), 1.0);
        volume.set(-1.0);
        assert_eq!(volume.get(), 0.0);
        volume.set(f64::NAN);
        assert_eq!(volume.get(), 0.0);
    }
}
