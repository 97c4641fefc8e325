pub mod calibration;
pub mod detector;
pub mod estimator;
pub mod pipeline;
pub mod protocol;
pub mod source;
pub mod types;

use drumstick_config::{AppConfig, CalibrationConfig, Hand};
use drumstick_zones::ZoneLayout;
use pipeline::HandPipeline;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use types::{HitEvent, SensorSample};

/// Commands sent to a hand's processing task.
enum HandCommand {
    Recenter,
    Recalibrate(u32),
    ResetCalibration,
}

#[derive(Debug, Error, PartialEq)]
pub enum SnapshotError {
    #[error("No samples received yet for the {0} hand")]
    NoData(Hand),
}

/// What the hand task publishes after every sample.
#[derive(Debug, Clone)]
struct Published {
    latest: Option<(HitEvent, Instant)>,
    samples: u64,
    connected: bool,
}

/// A read of the newest event for one hand.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    #[serde(flatten)]
    pub event: HitEvent,
    /// Source gone, or the event is older than the staleness limit.
    pub stale: bool,
    #[serde(skip)]
    pub samples: u64,
    #[serde(skip)]
    pub age: Duration,
}

/// Health summary for one hand.
#[derive(Debug, Clone, Serialize)]
pub struct HandStatus {
    pub hand: Hand,
    pub connected: bool,
    pub has_data: bool,
    pub stale: bool,
    pub samples: u64,
}

/// Handle to one hand's running pipeline.
///
/// The pipeline runs on its own task, pulling samples FIFO from the source
/// queue. Reads go through a watch channel and never block that task.
pub struct HandClient {
    hand: Hand,
    stale_after: Duration,
    status_rx: watch::Receiver<Published>,
    calibration_rx: watch::Receiver<CalibrationConfig>,
    command_tx: mpsc::UnboundedSender<HandCommand>,
    _task: tokio::task::JoinHandle<()>,
}

impl HandClient {
    /// Start `hand`'s configured source and pipeline.
    pub fn start(hand: Hand, config: &AppConfig, layout: Arc<ZoneLayout>) -> Self {
        let samples_rx = source::spawn_source(hand, &config.hand(hand).source);
        let pipeline = HandPipeline::new(hand, config, layout);
        Self::spawn(pipeline, samples_rx, Duration::from_millis(config.stale_after_ms))
    }

    /// Run `pipeline` over everything arriving on `samples_rx`.
    pub fn spawn(
        pipeline: HandPipeline,
        samples_rx: mpsc::Receiver<SensorSample>,
        stale_after: Duration,
    ) -> Self {
        let hand = pipeline.hand();
        let (status_tx, status_rx) = watch::channel(Published {
            latest: None,
            samples: 0,
            connected: true,
        });
        let (calibration_tx, calibration_rx) = watch::channel(pipeline.calibration().clone());
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(hand_loop(pipeline, samples_rx, status_tx, calibration_tx, command_rx));

        Self {
            hand,
            stale_after,
            status_rx,
            calibration_rx,
            command_tx,
            _task: task,
        }
    }

    pub fn hand(&self) -> Hand {
        self.hand
    }

    /// Newest event for this hand (non-blocking).
    pub fn latest(&self) -> Result<Snapshot, SnapshotError> {
        let published = self.status_rx.borrow();
        let (event, at) = published.latest.as_ref().ok_or(SnapshotError::NoData(self.hand))?;
        let age = at.elapsed();
        Ok(Snapshot {
            event: event.clone(),
            stale: !published.connected || age > self.stale_after,
            samples: published.samples,
            age,
        })
    }

    /// Whether the sample source is still feeding this hand.
    pub fn is_connected(&self) -> bool {
        self.status_rx.borrow().connected
    }

    pub fn status(&self) -> HandStatus {
        let published = self.status_rx.borrow();
        let stale = match &published.latest {
            Some((_, at)) => !published.connected || at.elapsed() > self.stale_after,
            None => true,
        };
        HandStatus {
            hand: self.hand,
            connected: published.connected,
            has_data: published.latest.is_some(),
            stale,
            samples: published.samples,
        }
    }

    /// Zero this hand's yaw at its current heading.
    pub fn recenter(&self) {
        let _ = self.command_tx.send(HandCommand::Recenter);
    }

    /// Re-estimate the gyro bias over the next `samples` samples.
    pub fn recalibrate(&self, samples: u32) {
        let _ = self.command_tx.send(HandCommand::Recalibrate(samples));
    }

    /// Put this hand back on identity calibration.
    pub fn reset_calibration(&self) {
        let _ = self.command_tx.send(HandCommand::ResetCalibration);
    }

    /// Calibration the pipeline is applying right now.
    pub fn calibration(&self) -> CalibrationConfig {
        self.calibration_rx.borrow().clone()
    }

    /// Fires whenever a bias capture completes or calibration is reset.
    pub fn calibration_updates(&self) -> watch::Receiver<CalibrationConfig> {
        self.calibration_rx.clone()
    }
}

/// Background task: pull samples, run the pipeline, publish each event.
async fn hand_loop(
    mut pipeline: HandPipeline,
    mut samples_rx: mpsc::Receiver<SensorSample>,
    status_tx: watch::Sender<Published>,
    calibration_tx: watch::Sender<CalibrationConfig>,
    mut command_rx: mpsc::UnboundedReceiver<HandCommand>,
) {
    let hand = pipeline.hand();
    let mut sample_count: u64 = 0;

    loop {
        tokio::select! {
            sample = samples_rx.recv() => {
                let Some(raw) = sample else {
                    tracing::warn!(%hand, "Sample source closed");
                    status_tx.send_modify(|p| p.connected = false);
                    break;
                };
                let capturing = pipeline.is_calibrating();
                let event = pipeline.process(&raw);
                if capturing && !pipeline.is_calibrating() {
                    calibration_tx.send_replace(pipeline.calibration().clone());
                }
                sample_count += 1;
                status_tx.send_modify(|p| {
                    p.latest = Some((event, Instant::now()));
                    p.samples = sample_count;
                });
                if sample_count % 1000 == 0 {
                    tracing::debug!(%hand, sample_count, "Samples processed");
                }
            }
            Some(cmd) = command_rx.recv() => {
                match cmd {
                    HandCommand::Recenter => {
                        let orientation = pipeline.recenter();
                        status_tx.send_modify(|p| {
                            if let Some((event, _)) = &mut p.latest {
                                event.pitch = orientation.pitch;
                                event.roll = orientation.roll;
                                event.yaw = orientation.yaw;
                            }
                        });
                    }
                    HandCommand::Recalibrate(n) => pipeline.recalibrate(n),
                    HandCommand::ResetCalibration => {
                        pipeline.reset_calibration();
                        calibration_tx.send_replace(pipeline.calibration().clone());
                    }
                }
            }
            _ = status_tx.closed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    fn client(stale_after: Duration) -> (HandClient, mpsc::Sender<SensorSample>) {
        let config = AppConfig::default();
        let layout = Arc::new(ZoneLayout::from_config(&config.classifier).unwrap());
        let pipeline = HandPipeline::new(Hand::Right, &config, layout);
        let (tx, rx) = mpsc::channel(source::QUEUE_DEPTH);
        (HandClient::spawn(pipeline, rx, stale_after), tx)
    }

    async fn wait_until(client: &HandClient, done: impl Fn(&HandClient) -> bool) {
        for _ in 0..1000 {
            if done(client) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("condition not reached");
    }

    fn strike(t: f64) -> SensorSample {
        SensorSample::from_vectors(DVec3::new(0.0, 0.0, 12.0), DVec3::new(0.0, 70.0, 0.0), t)
    }

    #[tokio::test]
    async fn no_data_before_first_sample() {
        let (client, _tx) = client(Duration::from_secs(1));
        assert_eq!(client.latest().unwrap_err(), SnapshotError::NoData(Hand::Right));
        let status = client.status();
        assert!(!status.has_data);
        assert!(status.connected);
    }

    #[tokio::test]
    async fn publishes_latest_event() {
        let (client, tx) = client(Duration::from_secs(10));
        tx.send(strike(0.0)).await.unwrap();
        wait_until(&client, |c| c.latest().is_ok()).await;

        let snap = client.latest().unwrap();
        assert!(snap.event.is_hit);
        assert_eq!(snap.event.hit_drum.as_deref(), Some("Tom_mid"));
        assert!(!snap.stale);
        assert_eq!(snap.samples, 1);

        tx.send(strike(0.01)).await.unwrap();
        wait_until(&client, |c| c.latest().map(|s| s.samples == 2).unwrap_or(false)).await;
        assert!(!client.latest().unwrap().event.is_hit);
    }

    #[tokio::test]
    async fn recenter_zeroes_published_yaw() {
        let (client, tx) = client(Duration::from_secs(10));
        for tick in 0..=50 {
            let sample = SensorSample::from_vectors(DVec3::Z, DVec3::new(0.0, 0.0, 20.0), tick as f64 * 0.01);
            tx.send(sample).await.unwrap();
        }
        wait_until(&client, |c| c.latest().map(|s| s.samples == 51).unwrap_or(false)).await;
        assert!((client.latest().unwrap().event.yaw - 10.0).abs() < 1e-9);

        client.recenter();
        wait_until(&client, |c| c.latest().map(|s| s.event.yaw == 0.0).unwrap_or(false)).await;
        assert_eq!(client.latest().unwrap().samples, 51);
    }

    #[tokio::test]
    async fn captured_bias_is_published_and_reset() {
        let (client, tx) = client(Duration::from_secs(10));
        let mut updates = client.calibration_updates();
        assert_eq!(client.calibration(), CalibrationConfig::default());

        client.recalibrate(2);
        // Commands and samples race, so keep the stick still until the capture lands.
        for tick in 0..1000 {
            if updates.has_changed().unwrap() {
                break;
            }
            let sample = SensorSample::from_vectors(DVec3::Z, DVec3::new(1.0, 2.0, 3.0), tick as f64 * 0.01);
            tx.send(sample).await.unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(updates.borrow_and_update().gyro_offset, DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(client.calibration().gyro_offset, DVec3::new(1.0, 2.0, 3.0));

        client.reset_calibration();
        updates.changed().await.unwrap();
        assert_eq!(*updates.borrow_and_update(), CalibrationConfig::default());
    }

    #[tokio::test]
    async fn plain_samples_do_not_touch_calibration() {
        let (client, tx) = client(Duration::from_secs(10));
        let updates = client.calibration_updates();
        tx.send(SensorSample::at_rest(0.0)).await.unwrap();
        tx.send(SensorSample::at_rest(0.01)).await.unwrap();
        wait_until(&client, |c| c.latest().map(|s| s.samples == 2).unwrap_or(false)).await;
        assert!(!updates.has_changed().unwrap());
    }

    #[tokio::test]
    async fn closed_source_marks_stale() {
        let (client, tx) = client(Duration::from_secs(10));
        tx.send(SensorSample::at_rest(0.0)).await.unwrap();
        drop(tx);
        wait_until(&client, |c| !c.is_connected()).await;

        let snap = client.latest().unwrap();
        assert!(snap.stale);
        assert_eq!(snap.event.az, 1.0);
        assert!(!client.status().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn old_event_goes_stale() {
        let (client, tx) = client(Duration::from_millis(500));
        tx.send(SensorSample::at_rest(0.0)).await.unwrap();
        wait_until(&client, |c| c.latest().is_ok()).await;
        assert!(!client.latest().unwrap().stale);

        tokio::time::sleep(Duration::from_millis(600)).await;
        let snap = client.latest().unwrap();
        assert!(snap.stale);
        assert!(snap.age >= Duration::from_millis(600));
        assert!(client.status().stale);

        tx.send(SensorSample::at_rest(0.01)).await.unwrap();
        wait_until(&client, |c| c.latest().map(|s| s.samples == 2).unwrap_or(false)).await;
        assert!(!client.latest().unwrap().stale);
    }

    #[tokio::test]
    async fn snapshot_json_carries_event_and_stale() {
        let (client, tx) = client(Duration::from_secs(10));
        tx.send(strike(0.0)).await.unwrap();
        wait_until(&client, |c| c.latest().is_ok()).await;

        let json = serde_json::to_value(client.latest().unwrap()).unwrap();
        assert_eq!(json["hit_drum"], "Tom_mid");
        assert_eq!(json["is_hit"], true);
        assert_eq!(json["stale"], false);
        assert!(json.get("samples").is_none());
    }
}
