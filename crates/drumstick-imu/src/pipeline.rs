use crate::calibration::Calibration;
use crate::detector::HitDetector;
use crate::estimator::OrientationEstimator;
use crate::types::{HitEvent, Orientation, SensorSample};
use drumstick_config::{AppConfig, CalibrationConfig, Hand};
use drumstick_zones::ZoneLayout;
use std::sync::Arc;

/// Everything one stick needs between a raw sample and a published event.
/// Owned by that hand's task; the two hands share only the zone layout.
pub struct HandPipeline {
    hand: Hand,
    calibration: Calibration,
    estimator: OrientationEstimator,
    detector: HitDetector,
    layout: Arc<ZoneLayout>,
}

impl HandPipeline {
    pub fn new(hand: Hand, config: &AppConfig, layout: Arc<ZoneLayout>) -> Self {
        Self {
            hand,
            calibration: Calibration::new(config.hand(hand).calibration.clone()),
            estimator: OrientationEstimator::new(config.estimator.clone()),
            detector: HitDetector::new(config.detector.clone()),
            layout,
        }
    }

    pub fn hand(&self) -> Hand {
        self.hand
    }

    pub fn orientation(&self) -> Orientation {
        self.estimator.orientation()
    }

    /// One synchronous pass: calibrate, estimate, detect, classify.
    pub fn process(&mut self, raw: &SensorSample) -> HitEvent {
        let sample = self.calibration.apply(raw);
        let orientation = self.estimator.update(&sample);
        let verdict = self.detector.process(&sample);

        let hit_drum = verdict.is_hit.then(|| {
            let zone = self.layout.classify(orientation.pitch, orientation.yaw, self.hand);
            tracing::debug!(
                hand = %self.hand,
                zone = %zone.name,
                pitch = orientation.pitch,
                yaw = orientation.yaw,
                "Hit"
            );
            Arc::clone(&zone.name)
        });

        HitEvent::new(orientation, &sample, hit_drum)
    }

    /// Zero yaw at the current heading and return the new orientation.
    pub fn recenter(&mut self) -> Orientation {
        self.estimator.recenter();
        tracing::info!(hand = %self.hand, "Recentered");
        self.estimator.orientation()
    }

    pub fn recalibrate(&mut self, samples: u32) {
        self.calibration.recalibrate(samples);
    }

    pub fn reset_calibration(&mut self) {
        self.calibration.reset();
    }

    pub fn calibration(&self) -> &CalibrationConfig {
        self.calibration.params()
    }

    /// True while a gyro bias capture is still collecting samples.
    pub fn is_calibrating(&self) -> bool {
        self.calibration.is_collecting()
    }
}
