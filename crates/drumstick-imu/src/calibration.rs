use crate::types::SensorSample;
use drumstick_config::CalibrationConfig;
use glam::DVec3;

/// Per-stick sample correction, plus on-demand gyro bias capture.
pub struct Calibration {
    params: CalibrationConfig,
    bias: BiasCapture,
}

enum BiasCapture {
    Collecting { sum: DVec3, count: u32, target: u32 },
    Idle,
}

impl Calibration {
    pub fn new(params: CalibrationConfig) -> Self {
        Self {
            params,
            bias: BiasCapture::Idle,
        }
    }

    pub fn params(&self) -> &CalibrationConfig {
        &self.params
    }

    pub fn is_collecting(&self) -> bool {
        matches!(self.bias, BiasCapture::Collecting { .. })
    }

    /// Average the next `samples` raw gyro readings into a new gyro offset.
    /// The stick must be held still meanwhile.
    pub fn recalibrate(&mut self, samples: u32) {
        if samples == 0 {
            return;
        }
        self.bias = BiasCapture::Collecting {
            sum: DVec3::ZERO,
            count: 0,
            target: samples,
        };
        tracing::info!(samples, "Gyro bias capture started");
    }

    /// Drop back to identity parameters, abandoning any bias capture.
    pub fn reset(&mut self) {
        self.params = CalibrationConfig::default();
        self.bias = BiasCapture::Idle;
        tracing::info!("Calibration reset");
    }

    /// Correct a raw sample: offset, scale, axis remap/invert, dead zone.
    pub fn apply(&mut self, raw: &SensorSample) -> SensorSample {
        self.observe(raw);

        let p = &self.params;
        let accel = self.remap((raw.accel() - p.accel_offset) * p.accel_scale);
        let gyro = self.remap((raw.gyro() - p.gyro_offset) * p.gyro_scale);
        SensorSample::from_vectors(accel, gyro, raw.timestamp)
    }

    fn observe(&mut self, raw: &SensorSample) {
        if let BiasCapture::Collecting { sum, count, target } = &mut self.bias {
            let gyro = raw.gyro();
            if !gyro.is_finite() {
                return;
            }
            *sum += gyro;
            *count += 1;
            if *count >= *target {
                let bias = *sum / *count as f64;
                self.params.gyro_offset = bias;
                self.bias = BiasCapture::Idle;
                tracing::info!(
                    bias_x = bias.x,
                    bias_y = bias.y,
                    bias_z = bias.z,
                    "Gyro bias capture complete"
                );
            }
        }
    }

    fn remap(&self, v: DVec3) -> DVec3 {
        let src = v.to_array();
        let mut out = [0.0; 3];
        for (axis, slot) in out.iter_mut().enumerate() {
            let mut value = src[self.params.axis_mapping[axis].index()];
            if self.params.axis_invert[axis] {
                value = -value;
            }
            if value.abs() < self.params.dead_zone {
                value = 0.0;
            }
            *slot = value;
        }
        DVec3::from_array(out)
    }
}
