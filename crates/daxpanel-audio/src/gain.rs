//! Gain shared between an endpoint handle and its audio pump.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use daxpanel_core::{AudioBuffer, Gain};

/// Linear gain factor readable from an audio thread without locking.
///
/// Stored as the bit pattern of an `f32`.
#[derive(Debug, Clone)]
pub struct SharedGain(Arc<AtomicU32>);

impl SharedGain {
    pub fn new(gain: Gain) -> Self {
        SharedGain(Arc::new(AtomicU32::new(gain.linear().to_bits())))
    }

    pub fn set(&self, gain: Gain) {
        self.0.store(gain.linear().to_bits(), Ordering::Relaxed);
    }

    pub fn factor(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Scale `buffer` in place. Unity gain leaves samples untouched.
    pub fn apply(&self, buffer: &mut AudioBuffer) {
        let factor = self.factor();
        if factor != 1.0 {
            buffer.scale(factor);
        }
    }

    /// Scale a raw sample slice in place.
    pub fn apply_samples(&self, samples: &mut [f32]) {
        let factor = self.factor();
        if factor != 1.0 {
            for s in samples {
                *s = (*s * factor).clamp(-1.0, 1.0);
            }
        }
    }
}
