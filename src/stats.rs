//! Running statistics and alert threshold

use crate::constants::meter::{MAX_DISPLAY_DB, NOISE_FLOOR_DB};

/// Min / max / average of readings since the last reset.
///
/// Readings below the noise floor are ignored so silence does not drag the
/// figures down.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningStats {
    min: Option<f64>,
    max: Option<f64>,
    sum: f64,
    count: u64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a reading in. Returns false when it fell below the noise floor.
    pub fn update(&mut self, reading: f64) -> bool {
        if reading.is_nan() || reading < NOISE_FLOOR_DB {
            return false;
        }
        self.min = Some(self.min.map_or(reading, |m| m.min(reading)));
        self.max = Some(self.max.map_or(reading, |m| m.max(reading)));
        self.sum += reading;
        self.count += 1;
        true
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Alert state of a single reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    Normal,
    Alert,
}

/// User-adjustable alert level, kept within the displayed range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold(f64);

impl Threshold {
    pub fn new(db: f64) -> Self {
        Self(db.clamp(0.0, MAX_DISPLAY_DB))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn adjust(&mut self, delta_db: f64) {
        *self = Self::new(self.0 + delta_db);
    }

    pub fn evaluate(&self, reading: f64) -> AlertState {
        if reading > self.0 {
            AlertState::Alert
        } else {
            AlertState::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stats_report_nothing() {
        let stats = RunningStats::new();
        assert_eq!(stats.min(), None);
        assert_eq!(stats.max(), None);
        assert_eq!(stats.average(), None);
    }

    #[test]
    fn tracks_min_max_average() {
        let mut stats = RunningStats::new();
        for reading in [40.0, 70.0, 55.0] {
            assert!(stats.update(reading));
        }
        assert_eq!(stats.min(), Some(40.0));
        assert_eq!(stats.max(), Some(70.0));
        assert_eq!(stats.average(), Some(55.0));
        assert_eq!(stats.count(), 3);
    }

    #[test]
    fn noise_floor_is_excluded() {
        let mut stats = RunningStats::new();
        assert!(!stats.update(0.0));
        assert!(!stats.update(9.99));
        assert!(stats.update(10.0));
        assert!(stats.update(30.0));
        assert_eq!(stats.min(), Some(10.0));
        assert_eq!(stats.average(), Some(20.0));
        assert_eq!(stats.count(), 2);
    }

    #[test]
    fn reset_clears_everything() {
        let mut stats = RunningStats::new();
        stats.update(50.0);
        stats.reset();
        assert_eq!(stats, RunningStats::new());
    }

    #[test]
    fn threshold_alerts_strictly_above() {
        let threshold = Threshold::new(80.0);
        assert_eq!(threshold.evaluate(79.9), AlertState::Normal);
        assert_eq!(threshold.evaluate(80.0), AlertState::Normal);
        assert_eq!(threshold.evaluate(80.1), AlertState::Alert);
    }

    #[test]
    fn threshold_stays_in_range() {
        let mut threshold = Threshold::new(118.0);
        threshold.adjust(5.0);
        assert_eq!(threshold.value(), MAX_DISPLAY_DB);
        threshold.adjust(-200.0);
        assert_eq!(threshold.value(), 0.0);
        assert_eq!(Threshold::new(-3.0).value(), 0.0);
    }
}
