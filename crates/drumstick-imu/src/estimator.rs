use crate::types::{Orientation, SensorSample};
use drumstick_config::EstimatorConfig;

/// Tilt from the accelerometer, heading from the integrated gyro, both run
/// through a single-pole low-pass. Pitch can optionally lean on the gyro Y
/// rate as well (`pitch_gyro_weight`), complementary-filter style.
///
/// Pitch and roll are accurate only while the stick is not accelerating hard;
/// during a swing they carry transient error. Yaw has no absolute reference
/// and drifts until [`OrientationEstimator::recenter`] is called.
pub struct OrientationEstimator {
    config: EstimatorConfig,
    state: OrientationState,
}

/// Filter internals for one stick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OrientationState {
    pub pitch: f64,
    pub roll: f64,
    /// Low-passed integrated yaw, before the recenter offset.
    pub yaw_filtered: f64,
    /// Raw gyro Z integral.
    pub yaw_integrated: f64,
    /// Subtracted from `yaw_filtered` when reporting.
    pub yaw_offset: f64,
    /// Newest timestamp seen, `None` until the first usable sample.
    pub prev_timestamp: Option<f64>,
}

impl OrientationEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        let defaults = EstimatorConfig::default();
        let config = EstimatorConfig {
            smoothing: valid_factor(config.smoothing).unwrap_or(defaults.smoothing),
            yaw_smoothing: valid_factor(config.yaw_smoothing).unwrap_or(defaults.yaw_smoothing),
            max_dt_s: if config.max_dt_s.is_finite() && config.max_dt_s >= 0.0 {
                config.max_dt_s
            } else {
                defaults.max_dt_s
            },
            pitch_gyro_weight: if (0.0..1.0).contains(&config.pitch_gyro_weight) {
                config.pitch_gyro_weight
            } else {
                defaults.pitch_gyro_weight
            },
        };
        Self {
            config,
            state: OrientationState::default(),
        }
    }

    pub fn state(&self) -> &OrientationState {
        &self.state
    }

    pub fn orientation(&self) -> Orientation {
        Orientation {
            pitch: self.state.pitch,
            roll: self.state.roll,
            yaw: self.state.yaw_filtered - self.state.yaw_offset,
        }
    }

    /// Fold one sample into the estimate. Never fails: a sample with unusable
    /// fields is ignored and the previous orientation is returned.
    pub fn update(&mut self, sample: &SensorSample) -> Orientation {
        if !sample.is_finite() {
            tracing::trace!(?sample, "Ignoring non-finite sample");
            return self.orientation();
        }

        let s = &mut self.state;
        // Duplicate or out-of-order stamps integrate nothing; gaps are capped.
        let dt = match s.prev_timestamp {
            None => 0.0,
            Some(prev) => (sample.timestamp - prev).clamp(0.0, self.config.max_dt_s),
        };
        let first = s.prev_timestamp.is_none();
        s.prev_timestamp = Some(s.prev_timestamp.map_or(sample.timestamp, |p| p.max(sample.timestamp)));

        let roll = sample.ay.atan2(sample.az).to_degrees();
        let pitch = (-sample.ax)
            .atan2((sample.ay * sample.ay + sample.az * sample.az).sqrt())
            .to_degrees();
        s.yaw_integrated += sample.gz * dt;

        if first {
            s.pitch = pitch;
            s.roll = roll;
            s.yaw_filtered = s.yaw_integrated;
        } else {
            let w = self.config.pitch_gyro_weight;
            let pitch = if w > 0.0 {
                w * (s.pitch + sample.gy * dt) + (1.0 - w) * pitch
            } else {
                pitch
            };
            s.pitch = low_pass(s.pitch, pitch, self.config.smoothing);
            s.roll = low_pass(s.roll, roll, self.config.smoothing);
            s.yaw_filtered = low_pass(s.yaw_filtered, s.yaw_integrated, self.config.yaw_smoothing);
        }

        self.orientation()
    }

    /// Zero the reported yaw at the current heading. Pitch and roll are untouched.
    pub fn recenter(&mut self) {
        self.state.yaw_offset = self.state.yaw_filtered;
    }
}

fn low_pass(prev: f64, raw: f64, factor: f64) -> f64 {
    prev + factor * (raw - prev)
}

fn valid_factor(factor: f64) -> Option<f64> {
    (factor.is_finite() && factor > 0.0 && factor <= 1.0).then_some(factor)
}
