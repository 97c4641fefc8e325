//! Sample sources. Each runs as its own task and feeds one hand's queue;
//! the queue closing is how a hand learns its source is gone.

use crate::protocol::FrameParser;
use crate::types::SensorSample;
use anyhow::{Context, Result};
use drumstick_config::{Hand, SourceConfig};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Samples buffered per hand before the source is back-pressured.
pub const QUEUE_DEPTH: usize = 256;

/// Start the configured source for `hand` and return its sample queue.
pub fn spawn_source(hand: Hand, config: &SourceConfig) -> mpsc::Receiver<SensorSample> {
    let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
    match config.clone() {
        SourceConfig::Mock { rate_hz } => {
            tracing::info!(%hand, rate_hz, "Starting mock source");
            tokio::spawn(mock_loop(tx, rate_hz));
        }
        SourceConfig::Replay { path, realtime } => {
            tracing::info!(%hand, path = %path.display(), realtime, "Starting replay source");
            tokio::spawn(async move {
                if let Err(e) = replay_loop(tx, &path, realtime).await {
                    tracing::error!(%hand, ?e, "Replay source failed");
                }
            });
        }
        SourceConfig::Tcp { addr, reconnect_ms } => {
            tracing::info!(%hand, %addr, "Starting TCP source");
            tokio::spawn(tcp_loop(tx, hand, addr, Duration::from_millis(reconnect_ms)));
        }
    }
    rx
}

/// A stick lying still, sampled at `rate_hz`.
async fn mock_loop(tx: mpsc::Sender<SensorSample>, rate_hz: f64) {
    let rate_hz = if rate_hz.is_finite() && rate_hz > 0.0 { rate_hz } else { 100.0 };
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / rate_hz));
    let start = Instant::now();
    loop {
        ticker.tick().await;
        let t = start.elapsed().as_secs_f64();
        if tx.send(SensorSample::at_rest(t)).await.is_err() {
            break;
        }
    }
}

/// Play back a JSON-lines recording, one `SensorSample` per line.
async fn replay_loop(tx: mpsc::Sender<SensorSample>, path: &Path, realtime: bool) -> Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut line_no = 0usize;
    let mut sent = 0usize;
    let mut prev_timestamp: Option<f64> = None;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let sample: SensorSample = match serde_json::from_str(line) {
            Ok(sample) => sample,
            Err(e) => {
                tracing::warn!(line = line_no, %e, "Skipping malformed replay line");
                continue;
            }
        };

        if realtime {
            if let Some(prev) = prev_timestamp {
                let gap = sample.timestamp - prev;
                if gap.is_finite() && gap > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(gap)).await;
                }
            }
            prev_timestamp = Some(sample.timestamp);
        }

        if tx.send(sample).await.is_err() {
            return Ok(());
        }
        sent += 1;
    }

    tracing::info!(path = %path.display(), sent, "Replay finished");
    Ok(())
}

/// Connect to a sensor bridge, forwarding this hand's frames. Reconnects with
/// a fixed backoff until the hand stops listening.
async fn tcp_loop(tx: mpsc::Sender<SensorSample>, hand: Hand, addr: String, backoff: Duration) {
    loop {
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                tracing::info!(%hand, %addr, "Connected to sensor bridge");
                if !read_frames(stream, &tx, hand).await {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(%hand, %addr, ?e, "Sensor bridge connect failed");
            }
        }
        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(backoff).await;
    }
}

/// Pump one connection. Returns false once the receiving hand is gone.
async fn read_frames(mut stream: TcpStream, tx: &mpsc::Sender<SensorSample>, hand: Hand) -> bool {
    let mut parser = FrameParser::new();
    let mut buf = [0u8; 4096];
    let mut frame_count: u64 = 0;

    loop {
        match stream.read(&mut buf).await {
            Ok(0) => {
                tracing::warn!(%hand, "Sensor bridge connection closed");
                return true;
            }
            Ok(n) => {
                parser.push_data(&buf[..n]);
                while let Some(result) = parser.next_frame() {
                    match result {
                        Ok(frame) if frame.hand == hand => {
                            if tx.send(frame.sample).await.is_err() {
                                return false;
                            }
                            frame_count += 1;
                            if frame_count % 1000 == 0 {
                                tracing::debug!(%hand, frame_count, temperature_c = frame.temperature_c, "Frames received");
                            }
                        }
                        Ok(frame) => {
                            tracing::trace!(%hand, other = %frame.hand, "Skipping frame for other hand");
                        }
                        Err(e) => {
                            tracing::trace!(%hand, ?e, "Skipping bad frame");
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!(%hand, ?e, "Sensor bridge read error");
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::tests::make_test_frame;
    use std::path::PathBuf;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn replay_yields_samples_in_order_and_skips_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"ax":0.0,"ay":0.0,"az":1.0,"gx":0.0,"gy":0.0,"gz":1.0,"timestamp":0.0}"#, "\n",
                "not json\n",
                "\n",
                r#"{"ax":0.0,"ay":0.0,"az":1.0,"gx":0.0,"gy":0.0,"gz":2.0,"timestamp":0.01}"#, "\n",
            ),
        )
        .unwrap();

        let mut rx = spawn_source(Hand::Right, &SourceConfig::Replay { path, realtime: false });
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.gz, 1.0);
        assert_eq!(second.gz, 2.0);
        // File exhausted: queue closes.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn paced_replay_delivers_every_sample() {
        let dir = tempfile::tempdir().unwrap();
        let samples: Vec<SensorSample> = (0..5).map(|i| SensorSample::at_rest(i as f64 * 0.01)).collect();
        let path = dir.path().join("rest.jsonl");
        let lines: Vec<String> = samples.iter().map(|s| serde_json::to_string(s).unwrap()).collect();
        std::fs::write(&path, lines.join("\n")).unwrap();

        let mut rx = spawn_source(Hand::Left, &SourceConfig::Replay { path, realtime: true });
        let mut got = Vec::new();
        while let Some(sample) = rx.recv().await {
            got.push(sample);
        }
        assert_eq!(got, samples);
    }

    #[tokio::test]
    async fn missing_recording_closes_queue() {
        let mut rx = spawn_source(
            Hand::Right,
            &SourceConfig::Replay {
                path: PathBuf::from("/nonexistent/drumstick.jsonl"),
                realtime: false,
            },
        );
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn mock_produces_resting_samples() {
        let mut rx = spawn_source(Hand::Right, &SourceConfig::Mock { rate_hz: 1000.0 });
        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        assert_eq!(a.az, 1.0);
        assert_eq!(a.gyro(), glam::DVec3::ZERO);
        assert!(b.timestamp >= a.timestamp);
    }

    #[tokio::test]
    async fn tcp_forwards_only_this_hands_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut data = make_test_frame(1, [0, 0, 16384, 0, 0, 0, 131], 5);
            data.extend(make_test_frame(0, [0, 0, 16384, 0, 0, 0, 262], 10));
            let mut bad = make_test_frame(0, [0; 7], 15);
            bad[21] ^= 1;
            data.extend(bad);
            data.extend(make_test_frame(0, [0, 0, 16384, 0, 0, 0, 393], 20));
            socket.write_all(&data).await.unwrap();
            // Hold the connection open until the test is done reading.
            let mut sink = [0u8; 1];
            let _ = socket.read(&mut sink).await;
        });

        let mut rx = spawn_source(Hand::Right, &SourceConfig::Tcp { addr, reconnect_ms: 50 });
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!((first.gz - 2.0).abs() < 1e-12);
        assert!((first.timestamp - 0.01).abs() < 1e-12);
        assert!((second.gz - 3.0).abs() < 1e-12);
    }
}
