//! Eviction quota strategies.

use std::fmt;

/// Decides how many evictions the registry can absorb right now.
pub trait EvictionStrategy: Send + Sync + fmt::Debug {
    /// Number of copies that may be evicted given the expected and actual
    /// registry sizes. Zero means self-preservation.
    ///
    /// Each admitted eviction must start from a size at or above the
    /// threshold, so the last one may leave the registry just below it.
    fn allowed_to_evict(&self, expected_size: usize, actual_size: usize) -> usize;
}

/// Keeps the registry at or above a fixed fraction of its expected size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentageDropStrategy {
    threshold: f64,
}

impl PercentageDropStrategy {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Smallest registry size that does not trigger self-preservation.
    pub fn minimum_size(&self, expected_size: usize) -> usize {
        (self.threshold * expected_size as f64).ceil() as usize
    }
}

impl Default for PercentageDropStrategy {
    fn default() -> Self {
        Self::new(0.85)
    }
}

impl EvictionStrategy for PercentageDropStrategy {
    fn allowed_to_evict(&self, expected_size: usize, actual_size: usize) -> usize {
        if expected_size == 0 {
            return actual_size;
        }
        if (actual_size as f64) < self.threshold * expected_size as f64 {
            return 0;
        }
        // Sizes minimum..=actual each admit one eviction.
        (actual_size + 1).saturating_sub(self.minimum_size(expected_size))
    }
}
