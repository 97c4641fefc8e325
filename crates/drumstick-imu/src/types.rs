use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One raw reading from a stick-mounted MPU6050.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Linear acceleration (g).
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
    /// Angular rate (deg/s).
    pub gx: f64,
    pub gy: f64,
    pub gz: f64,
    /// Monotonic time (s).
    pub timestamp: f64,
}

impl SensorSample {
    /// Stick lying still: gravity on Z only.
    pub fn at_rest(timestamp: f64) -> Self {
        Self::from_vectors(DVec3::Z, DVec3::ZERO, timestamp)
    }

    pub fn from_vectors(accel: DVec3, gyro: DVec3, timestamp: f64) -> Self {
        Self {
            ax: accel.x,
            ay: accel.y,
            az: accel.z,
            gx: gyro.x,
            gy: gyro.y,
            gz: gyro.z,
            timestamp,
        }
    }

    pub fn accel(&self) -> DVec3 {
        DVec3::new(self.ax, self.ay, self.az)
    }

    pub fn gyro(&self) -> DVec3 {
        DVec3::new(self.gx, self.gy, self.gz)
    }

    /// True when every motion field is a usable number.
    pub fn motion_is_finite(&self) -> bool {
        self.accel().is_finite() && self.gyro().is_finite()
    }

    pub fn is_finite(&self) -> bool {
        self.motion_is_finite() && self.timestamp.is_finite()
    }
}

/// Smoothed stick orientation (degrees).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Orientation {
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
}

/// Record published once per sample tick. Field names are the polling
/// client's contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HitEvent {
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
    pub gx: f64,
    pub gy: f64,
    pub gz: f64,
    pub is_hit: bool,
    pub hit_drum: Option<Arc<str>>,
}

impl HitEvent {
    /// Compose an event. Unusable sample fields are published as 0.
    pub fn new(orientation: Orientation, sample: &SensorSample, hit_drum: Option<Arc<str>>) -> Self {
        let clean = |v: f64| if v.is_finite() { v } else { 0.0 };
        Self {
            pitch: orientation.pitch,
            roll: orientation.roll,
            yaw: orientation.yaw,
            ax: clean(sample.ax),
            ay: clean(sample.ay),
            az: clean(sample.az),
            gx: clean(sample.gx),
            gy: clean(sample.gy),
            gz: clean(sample.gz),
            is_hit: hit_drum.is_some(),
            hit_drum,
        }
    }
}
