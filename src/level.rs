//! Sample buffer to decibel conversion

use crate::constants::audio::{FULL_SCALE, REFERENCE_AMPLITUDE};

/// Root mean square of the buffer. An empty buffer yields 0.
pub fn rms(buffer: &[i16]) -> f64 {
    if buffer.is_empty() {
        return 0.0;
    }
    let energy: f64 = buffer
        .iter()
        .map(|&s| {
            let s = f64::from(s);
            s * s
        })
        .sum();
    (energy / buffer.len() as f64).sqrt()
}

/// Convert an amplitude to decibels relative to `reference`.
///
/// Non-positive amplitudes and results below 0 dB are reported as 0.
pub fn amplitude_to_decibel(amplitude: f64, reference: f64) -> f64 {
    if amplitude.is_nan() || amplitude <= 0.0 || reference.is_nan() || reference <= 0.0 {
        return 0.0;
    }
    let db = 20.0 * (amplitude / reference).log10();
    if db.is_finite() { db.max(0.0) } else { 0.0 }
}

/// Decibel level of the loudest sample, normalized to full scale.
pub fn peak_decibel(buffer: &[i16], reference: f64) -> f64 {
    let peak = buffer.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
    amplitude_to_decibel(f64::from(peak) / FULL_SCALE, reference)
}

/// Amplitude reduction used by the estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Method {
    /// Root mean square over the buffer
    #[default]
    Rms,
    /// Largest absolute sample
    Peak,
}

/// Stateless buffer to decibel transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelEstimator {
    method: Method,
    reference: f64,
}

impl LevelEstimator {
    pub fn new(method: Method, reference: f64) -> Self {
        Self { method, reference }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Reduce one acquisition window to a decibel reading.
    ///
    /// Both methods normalize by full scale so their readings share units.
    pub fn decibel(&self, buffer: &[i16]) -> f64 {
        match self.method {
            Method::Rms => amplitude_to_decibel(rms(buffer) / FULL_SCALE, self.reference),
            Method::Peak => peak_decibel(buffer, self.reference),
        }
    }
}

impl Default for LevelEstimator {
    fn default() -> Self {
        Self::new(Method::Rms, REFERENCE_AMPLITUDE)
    }
}
