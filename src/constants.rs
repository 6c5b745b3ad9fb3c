//! Application constants and configuration values

/// Audio capture constants
pub mod audio {
    /// Capture sample rate in Hz
    pub const SAMPLE_RATE: u32 = 44_100;
    /// Capture channel count (mono)
    pub const CHANNELS: u16 = 1;
    /// Full-scale value of a signed 16-bit sample
    pub const FULL_SCALE: f64 = 32_767.0;
    /// Reference amplitude for the decibel conversion. Uncalibrated.
    pub const REFERENCE_AMPLITUDE: f64 = 0.000_02;
    /// Multiplier applied to the device minimum buffer size
    pub const BUFFER_SCALE: usize = 2;
    /// Minimum buffer size used when the host does not report one
    pub const FALLBACK_MIN_BUFFER_FRAMES: usize = 2_048;
    /// Bounds applied to the device-reported minimum buffer size
    pub const MIN_BUFFER_FRAMES: usize = 256;
    pub const MAX_BUFFER_FRAMES: usize = 4_410;
    /// Longest a single read waits for the first frame before reporting 0 samples
    pub const READ_TIMEOUT_MS: u64 = 50;
    /// Chunks the capture callback may queue before dropping audio
    pub const CAPTURE_QUEUE_DEPTH: usize = 64;
}

/// Measurement loop and statistics constants
pub mod meter {
    /// Period between readings in milliseconds
    pub const MEASUREMENT_PERIOD_MS: u64 = 100;
    /// Readings below this level are excluded from running statistics
    pub const NOISE_FLOOR_DB: f64 = 10.0;
    /// Default alert threshold
    pub const DEFAULT_THRESHOLD_DB: f64 = 80.0;
    /// Top of the displayed range; also the highest accepted threshold
    pub const MAX_DISPLAY_DB: f64 = 120.0;
    /// Threshold step for arrow keys
    pub const THRESHOLD_STEP_DB: f64 = 1.0;
    /// Threshold step for page keys
    pub const THRESHOLD_COARSE_STEP_DB: f64 = 5.0;
}

/// UI display constants
pub mod ui {
    /// UI redraw interval in milliseconds
    pub const UPDATE_INTERVAL_MS: u64 = 50;
    /// Bar width calculation accounts for borders
    pub const BAR_BORDER_WIDTH: usize = 2;
}

/// Smoothing algorithm constants
pub mod smoothing {
    /// First stage smoothing factor (higher = more responsive)
    pub const READING_SMOOTHING_FACTOR: f64 = 0.6;
    /// Second stage display smoothing factor (lower = smoother)
    pub const DISPLAY_SMOOTHING_FACTOR: f64 = 0.35;
}
