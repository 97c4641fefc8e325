//! Polling API. Plain HTTP/1.1, one request per connection, JSON bodies.

use anyhow::Result;
use drumstick_config::Hand;
use drumstick_imu::HandClient;
use drumstick_zones::ZoneLayout;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Samples averaged by `/recalibrate/{hand}` when no `samples` query is given.
pub const DEFAULT_RECALIBRATE_SAMPLES: u32 = 200;
/// Longest request head accepted.
const MAX_HEAD: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared by every connection.
pub struct AppState {
    pub right: HandClient,
    pub left: HandClient,
    pub layout: Arc<ZoneLayout>,
}

impl AppState {
    fn client(&self, hand: Hand) -> &HandClient {
        match hand {
            Hand::Right => &self.right,
            Hand::Left => &self.left,
        }
    }
}

#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "status": "error", "message": message.into() }),
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

/// Accept connections until the listener fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &state).await {
                tracing::debug!(%peer, ?e, "Connection error");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, state: &AppState) -> Result<()> {
    let head = match tokio::time::timeout(READ_TIMEOUT, read_head(&mut stream)).await {
        Ok(head) => head?,
        Err(_) => return Ok(()),
    };

    let (status, body) = match parse_request_line(&head) {
        Some(("OPTIONS", _)) => (204, None),
        Some((method, target)) => {
            let response = route(state, method, target);
            tracing::trace!(method, target, status = response.status, "Request");
            (response.status, Some(response.body))
        }
        None => {
            let response = Response::error(400, "malformed request");
            (response.status, Some(response.body))
        }
    };

    let payload = match body {
        Some(body) => serde_json::to_vec(&body)?,
        None => Vec::new(),
    };
    let header = format!(
        "HTTP/1.1 {status} {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Connection: close\r\n\r\n",
        reason(status),
        payload.len()
    );
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(&payload).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Read up to the blank line ending the request head. Any body is ignored.
async fn read_head(stream: &mut TcpStream) -> Result<String> {
    let mut head = Vec::with_capacity(512);
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") || head.len() >= MAX_HEAD {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

/// `(method, target)` from the first line of a request head.
fn parse_request_line(head: &str) -> Option<(&str, &str)> {
    let line = head.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    let version = parts.next()?;
    if !version.starts_with("HTTP/1.") || parts.next().is_some() || !target.starts_with('/') {
        return None;
    }
    Some((method, target))
}

/// Dispatch one request. Pure apart from the fire-and-forget hand commands.
pub fn route(state: &AppState, method: &str, target: &str) -> Response {
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match segments.as_slice() {
        ["right_data"] => get_only(method, || hand_data(state, Hand::Right)),
        ["left_data"] => get_only(method, || hand_data(state, Hand::Left)),
        ["data"] => get_only(method, || {
            let snap = |hand| {
                state
                    .client(hand)
                    .latest()
                    .ok()
                    .and_then(|s| serde_json::to_value(s).ok())
                    .unwrap_or(Value::Null)
            };
            Response::ok(json!({ "right": snap(Hand::Right), "left": snap(Hand::Left) }))
        }),
        ["recenter", name] => match method {
            "GET" | "POST" => with_hand(name, |hand| {
                state.client(hand).recenter();
                Response::ok(json!({ "status": "ok" }))
            }),
            _ => method_not_allowed(),
        },
        ["recalibrate", name] => match method {
            "POST" => with_hand(name, |hand| match samples_param(query) {
                Some(samples) => {
                    state.client(hand).recalibrate(samples);
                    Response::ok(json!({ "status": "ok", "samples": samples }))
                }
                None => Response::error(400, "samples must be a positive integer"),
            }),
            _ => method_not_allowed(),
        },
        ["calibration", name] => get_only(method, || {
            with_hand(name, |hand| {
                Response::ok(json!({
                    "hand": hand,
                    "calibration": state.client(hand).calibration(),
                }))
            })
        }),
        ["calibration", name, "reset"] => match method {
            "POST" => with_hand(name, |hand| {
                state.client(hand).reset_calibration();
                Response::ok(json!({ "status": "ok" }))
            }),
            _ => method_not_allowed(),
        },
        ["zones"] => get_only(method, || {
            Response::ok(json!({
                "mode": state.layout.mode(),
                "default": &*state.layout.default_zone().name,
                "zones": state.layout.zones(),
            }))
        }),
        ["api", "status"] => get_only(method, || {
            Response::ok(json!({
                "right": state.right.status(),
                "left": state.left.status(),
            }))
        }),
        _ => Response::error(404, format!("no route for {path}")),
    }
}

fn get_only(method: &str, handler: impl FnOnce() -> Response) -> Response {
    if method == "GET" {
        handler()
    } else {
        method_not_allowed()
    }
}

fn method_not_allowed() -> Response {
    Response::error(405, "method not allowed")
}

fn with_hand(name: &str, handler: impl FnOnce(Hand) -> Response) -> Response {
    match Hand::from_name(name) {
        Some(hand) => handler(hand),
        None => Response::error(404, format!("unknown hand {name:?}")),
    }
}

fn hand_data(state: &AppState, hand: Hand) -> Response {
    match state.client(hand).latest() {
        Ok(snapshot) => match serde_json::to_value(snapshot) {
            Ok(body) => Response::ok(body),
            Err(e) => Response::error(500, e.to_string()),
        },
        Err(e) => Response::error(503, e.to_string()),
    }
}

/// `samples=n` from the query string; the default when absent.
fn samples_param(query: &str) -> Option<u32> {
    let value = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "samples")
        .map(|(_, value)| value);
    match value {
        None => Some(DEFAULT_RECALIBRATE_SAMPLES),
        Some(v) => v.parse().ok().filter(|n| *n > 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drumstick_config::AppConfig;
    use drumstick_imu::pipeline::HandPipeline;
    use drumstick_imu::types::SensorSample;
    use glam::DVec3;
    use tokio::sync::mpsc;

    struct Harness {
        state: Arc<AppState>,
        right_tx: mpsc::Sender<SensorSample>,
        _left_tx: mpsc::Sender<SensorSample>,
    }

    fn harness() -> Harness {
        let config = AppConfig::default();
        let layout = Arc::new(ZoneLayout::from_config(&config.classifier).unwrap());
        let spawn = |hand| {
            let (tx, rx) = mpsc::channel(16);
            let pipeline = HandPipeline::new(hand, &config, Arc::clone(&layout));
            (HandClient::spawn(pipeline, rx, Duration::from_secs(10)), tx)
        };
        let (right, right_tx) = spawn(Hand::Right);
        let (left, left_tx) = spawn(Hand::Left);
        Harness {
            state: Arc::new(AppState { right, left, layout }),
            right_tx,
            _left_tx: left_tx,
        }
    }

    async fn feed_strike(h: &Harness) {
        let strike = SensorSample::from_vectors(DVec3::new(0.0, 0.0, 12.0), DVec3::new(0.0, 70.0, 0.0), 0.0);
        h.right_tx.send(strike).await.unwrap();
        for _ in 0..1000 {
            if h.state.right.latest().is_ok() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("sample never published");
    }

    #[tokio::test]
    async fn hand_data_before_and_after_samples() {
        let h = harness();
        let r = route(&h.state, "GET", "/right_data");
        assert_eq!(r.status, 503);
        assert_eq!(r.body["status"], "error");

        feed_strike(&h).await;
        let r = route(&h.state, "GET", "/right_data");
        assert_eq!(r.status, 200);
        assert_eq!(r.body["is_hit"], true);
        assert_eq!(r.body["hit_drum"], "Tom_mid");
        assert_eq!(r.body["stale"], false);

        assert_eq!(route(&h.state, "GET", "/left_data").status, 503);
    }

    #[tokio::test]
    async fn combined_data_nulls_missing_hands() {
        let h = harness();
        feed_strike(&h).await;
        let r = route(&h.state, "GET", "/data");
        assert_eq!(r.status, 200);
        assert_eq!(r.body["right"]["hit_drum"], "Tom_mid");
        assert!(r.body["left"].is_null());
    }

    #[tokio::test]
    async fn commands_validate_hand_and_method() {
        let h = harness();
        assert_eq!(route(&h.state, "POST", "/recenter/left").status, 200);
        assert_eq!(route(&h.state, "GET", "/recenter/right").status, 200);
        assert_eq!(route(&h.state, "POST", "/recenter/middle").status, 404);
        assert_eq!(route(&h.state, "DELETE", "/recenter/left").status, 405);

        let r = route(&h.state, "POST", "/recalibrate/right?samples=50");
        assert_eq!(r.body, json!({ "status": "ok", "samples": 50 }));
        let r = route(&h.state, "POST", "/recalibrate/left");
        assert_eq!(r.body["samples"], DEFAULT_RECALIBRATE_SAMPLES);
        assert_eq!(route(&h.state, "POST", "/recalibrate/left?samples=0").status, 400);
        assert_eq!(route(&h.state, "GET", "/recalibrate/left").status, 405);
    }

    #[tokio::test]
    async fn calibration_capture_shows_up_and_resets() {
        let h = harness();
        let offset = |h: &Harness| {
            route(&h.state, "GET", "/calibration/right").body["calibration"]["gyro_offset"].clone()
        };
        let r = route(&h.state, "GET", "/calibration/right");
        assert_eq!(r.status, 200);
        assert_eq!(r.body["hand"], "right");
        assert_eq!(r.body["calibration"]["gyro_scale"], json!([1.0, 1.0, 1.0]));
        assert_eq!(offset(&h), json!([0.0, 0.0, 0.0]));

        assert_eq!(route(&h.state, "POST", "/recalibrate/right?samples=2").status, 200);
        let still = SensorSample::from_vectors(DVec3::Z, DVec3::new(1.0, 2.0, 3.0), 0.0);
        for _ in 0..1000 {
            if offset(&h) == json!([1.0, 2.0, 3.0]) {
                break;
            }
            h.right_tx.send(still).await.unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(offset(&h), json!([1.0, 2.0, 3.0]));
        // The other hand keeps its own parameters.
        assert_eq!(
            route(&h.state, "GET", "/calibration/left").body["calibration"]["gyro_offset"],
            json!([0.0, 0.0, 0.0])
        );

        assert_eq!(route(&h.state, "POST", "/calibration/right/reset").body["status"], "ok");
        for _ in 0..1000 {
            if offset(&h) == json!([0.0, 0.0, 0.0]) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(offset(&h), json!([0.0, 0.0, 0.0]));
    }

    #[tokio::test]
    async fn calibration_routes_validate_hand_and_method() {
        let h = harness();
        assert_eq!(route(&h.state, "GET", "/calibration/middle").status, 404);
        assert_eq!(route(&h.state, "POST", "/calibration/left/reset").status, 200);
        assert_eq!(route(&h.state, "POST", "/calibration/middle/reset").status, 404);
        assert_eq!(route(&h.state, "POST", "/calibration/left").status, 405);
        assert_eq!(route(&h.state, "GET", "/calibration/left/reset").status, 405);
    }

    #[tokio::test]
    async fn zones_and_status() {
        let h = harness();
        let r = route(&h.state, "GET", "/zones");
        assert_eq!(r.body["mode"], "planar");
        assert_eq!(r.body["default"], "Snare");
        let zones = r.body["zones"].as_array().unwrap();
        assert_eq!(zones.len(), 8);
        assert_eq!(zones[0]["name"], "Symbal");
        assert_eq!(zones[0]["region"]["shape"], "rect");

        let r = route(&h.state, "GET", "/api/status");
        assert_eq!(r.body["right"]["has_data"], false);
        assert_eq!(r.body["left"]["connected"], true);
    }

    #[tokio::test]
    async fn unknown_paths_and_methods() {
        let h = harness();
        assert_eq!(route(&h.state, "GET", "/").status, 404);
        assert_eq!(route(&h.state, "GET", "/right_data/extra").status, 404);
        assert_eq!(route(&h.state, "POST", "/right_data").status, 405);
    }

    #[test]
    fn request_line_parsing() {
        assert_eq!(
            parse_request_line("GET /data HTTP/1.1\r\nHost: x\r\n\r\n"),
            Some(("GET", "/data"))
        );
        assert_eq!(parse_request_line("GET /data\r\n\r\n"), None);
        assert_eq!(parse_request_line("GET data HTTP/1.1\r\n\r\n"), None);
        assert_eq!(parse_request_line(""), None);
    }

    #[tokio::test]
    async fn serves_over_tcp() {
        let h = harness();
        feed_strike(&h).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, Arc::clone(&h.state)));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET /right_data HTTP/1.1\r\nHost: test\r\n\r\n").await.unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();

        assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(raw.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(raw.contains("Connection: close\r\n"));
        let (_, body) = raw.split_once("\r\n\r\n").unwrap();
        let json: Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["hit_drum"], "Tom_mid");

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"nonsense\r\n\r\n").await.unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();
        assert!(raw.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }
}
