use crate::types::SensorSample;
use drumstick_config::DetectorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorPhase {
    Idle,
    /// Refractory window after a hit; holds the ticks left.
    Cooldown(u32),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HitDetectorState {
    pub cooldown_remaining: u32,
    /// Rotation rate above the gyro magnitude threshold on the last tick.
    pub swinging: bool,
}

/// Outcome of one detector tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub is_hit: bool,
    /// Whether the raw sample qualified, even if cooldown suppressed the hit.
    pub predicate: bool,
    pub swinging: bool,
}

/// Threshold-and-cooldown strike detector.
///
/// A strike needs the Z axis pushed past its threshold plus one of: a fast
/// swing on gyro Y, a large total acceleration, or a large total rotation.
/// After a hit, `cooldown_ticks` samples are ignored, so one physical strike
/// cannot fire twice.
pub struct HitDetector {
    config: DetectorConfig,
    state: HitDetectorState,
}

impl HitDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            state: HitDetectorState::default(),
        }
    }

    pub fn state(&self) -> &HitDetectorState {
        &self.state
    }

    pub fn phase(&self) -> DetectorPhase {
        match self.state.cooldown_remaining {
            0 => DetectorPhase::Idle,
            n => DetectorPhase::Cooldown(n),
        }
    }

    /// Strike predicate over a raw sample. Non-finite input never qualifies.
    pub fn predicate(&self, sample: &SensorSample) -> bool {
        if !sample.motion_is_finite() {
            return false;
        }
        let c = &self.config;
        if sample.az <= c.z_accel_threshold {
            return false;
        }
        sample.gy.abs() > c.gyro_y_threshold
            || sample.accel().length() > c.accel_magnitude_threshold
            || sample.gyro().length() > c.gyro_magnitude_threshold
    }

    pub fn process(&mut self, sample: &SensorSample) -> Verdict {
        let predicate = self.predicate(sample);
        let swinging = sample.motion_is_finite() && sample.gyro().length() > self.config.gyro_magnitude_threshold;

        let is_hit = if self.state.cooldown_remaining > 0 {
            self.state.cooldown_remaining -= 1;
            false
        } else {
            predicate
        };

        if is_hit {
            self.state = HitDetectorState {
                cooldown_remaining: self.config.cooldown_ticks,
                swinging: false,
            };
        } else {
            self.state.swinging = swinging;
        }

        Verdict {
            is_hit,
            predicate,
            swinging,
        }
    }
}
