//! Input level metering for visualization

/// Level that maps to 0.0
pub const MIN_DECIBELS: f32 = -100.0;

/// Level that maps to 1.0
pub const MAX_DECIBELS: f32 = -30.0;

const DEFAULT_SMOOTHING: f32 = 0.8;

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Map an RMS amplitude onto 0.0..=1.0 over the analyser decibel range
pub fn normalized_level(rms: f32) -> f32 {
    if rms <= 0.0 {
        return 0.0;
    }
    let db = 20.0 * rms.log10();
    ((db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS)).clamp(0.0, 1.0)
}

/// Smoothed 0..1 microphone level
#[derive(Debug, Clone, Copy)]
pub struct AudioLevelMeter {
    smoothing: f32,
    level: f32,
}

impl Default for AudioLevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioLevelMeter {
    /// Meter with the default smoothing time constant
    #[must_use]
    pub const fn new() -> Self {
        Self {
            smoothing: DEFAULT_SMOOTHING,
            level: 0.0,
        }
    }

    /// Meter with a custom smoothing constant (0 = no smoothing)
    #[must_use]
    pub const fn with_smoothing(smoothing: f32) -> Self {
        Self {
            smoothing: smoothing.clamp(0.0, 0.99),
            level: 0.0,
        }
    }

    /// Feed a frame and return the updated level
    pub fn process(&mut self, frame: &[f32]) -> f32 {
        let target = normalized_level(calculate_rms(frame));
        self.level = self.smoothing.mul_add(self.level, (1.0 - self.smoothing) * target);
        self.level
    }

    /// Current level
    #[must_use]
    pub const fn level(&self) -> f32 {
        self.level
    }

    /// Return to silence
    pub const fn reset(&mut self) {
        self.level = 0.0;
    }
}
