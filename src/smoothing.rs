//! Reading smoothing for a stable gauge

use crate::constants::smoothing::{DISPLAY_SMOOTHING_FACTOR, READING_SMOOTHING_FACTOR};

/// Applies two-stage exponential smoothing to decibel readings
#[derive(Debug, Clone)]
pub struct ReadingSmoother {
    smoothed_value: f64,
    display_value: f64,
}

impl ReadingSmoother {
    /// Create a new smoother initialized to the given value
    pub fn new(initial_value: f64) -> Self {
        Self {
            smoothed_value: initial_value,
            display_value: initial_value,
        }
    }

    /// Feed a raw reading, returning the display value after smoothing
    pub fn update(&mut self, reading: f64) -> f64 {
        self.smoothed_value = self.smoothed_value * (1.0 - READING_SMOOTHING_FACTOR)
            + reading * READING_SMOOTHING_FACTOR;
        self.display_value = self.display_value * (1.0 - DISPLAY_SMOOTHING_FACTOR)
            + self.smoothed_value * DISPLAY_SMOOTHING_FACTOR;
        self.display_value
    }

    /// Get the current display value
    pub fn display(&self) -> f64 {
        self.display_value
    }

    pub fn reset(&mut self, value: f64) {
        *self = Self::new(value);
    }
}
