use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP polling endpoint.
    pub server: ServerConfig,
    /// A hand whose newest event is older than this is reported stale.
    pub stale_after_ms: u64,
    /// Orientation filter tuning, shared by both hands.
    pub estimator: EstimatorConfig,
    /// Strike detection thresholds, shared by both hands.
    pub detector: DetectorConfig,
    /// Zone layout and classification mode.
    pub classifier: ClassifierConfig,
    pub right: HandConfig,
    pub left: HandConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            stale_after_ms: 500,
            estimator: EstimatorConfig::default(),
            detector: DetectorConfig::default(),
            classifier: ClassifierConfig::default(),
            right: HandConfig::default(),
            left: HandConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn hand(&self, hand: Hand) -> &HandConfig {
        match hand {
            Hand::Right => &self.right,
            Hand::Left => &self.left,
        }
    }
}

/// Which stick a pipeline belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hand {
    Right,
    Left,
}

impl Hand {
    pub const ALL: [Hand; 2] = [Hand::Right, Hand::Left];

    pub fn as_str(&self) -> &'static str {
        match self {
            Hand::Right => "right",
            Hand::Left => "left",
        }
    }

    pub fn from_name(name: &str) -> Option<Hand> {
        match name {
            "right" => Some(Hand::Right),
            "left" => Some(Hand::Left),
            _ => None,
        }
    }
}

impl fmt::Display for Hand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address for the polling API.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Low-pass factor for pitch and roll, in (0, 1]. Smaller = smoother, more latency.
    pub smoothing: f64,
    /// Low-pass factor for yaw. 1.0 passes the integrated yaw through unchanged.
    pub yaw_smoothing: f64,
    /// Upper bound on the elapsed time integrated in a single tick (seconds).
    pub max_dt_s: f64,
    /// Weight of the gyro-propagated pitch (`pitch + gy * dt`) against the
    /// accelerometer tilt, in [0, 1). 0 uses tilt alone.
    pub pitch_gyro_weight: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            smoothing: 0.5,
            yaw_smoothing: 1.0,
            max_dt_s: 0.5,
            pitch_gyro_weight: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// `az` must exceed this for any strike to register.
    pub z_accel_threshold: f64,
    /// Swing rate on the gyro Y axis (deg/s).
    pub gyro_y_threshold: f64,
    /// Total acceleration magnitude.
    pub accel_magnitude_threshold: f64,
    /// Total rotation rate magnitude (deg/s). Also marks the stick as swinging.
    pub gyro_magnitude_threshold: f64,
    /// Ticks after a hit during which no further hit is accepted.
    pub cooldown_ticks: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            z_accel_threshold: 9.5,
            gyro_y_threshold: 60.0,
            accel_magnitude_threshold: 11.0,
            gyro_magnitude_threshold: 65.0,
            // ~80ms at 100Hz
            cooldown_ticks: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierMode {
    /// Project (pitch, yaw) onto the 2D zone layout.
    Planar,
    /// Place the stick tip in 3D and test it against each zone's pose.
    StickTip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub mode: ClassifierMode,
    /// Zone returned when nothing else matches. Must name a configured zone.
    pub default_zone: String,
    pub planar: PlanarMapping,
    pub stick: StickGeometry,
    /// Ordered zone list. Earlier entries win where planar regions overlap.
    pub zones: Vec<ZoneConfig>,
    /// Order in which posed zones are tested in stick-tip mode. Low drums come
    /// before the tall cymbals so a tip resting on a tom is not claimed by a
    /// cymbal hanging above it. Posed zones left out are tested afterwards in
    /// declaration order.
    pub stick_order: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            mode: ClassifierMode::Planar,
            default_zone: "Snare".into(),
            planar: PlanarMapping::default(),
            stick: StickGeometry::default(),
            zones: ZoneConfig::drum_kit(),
            stick_order: ["Hihat", "Snare", "Tom_high", "Tom_mid", "Symbal", "Ride", "Tom_floor"]
                .map(String::from)
                .to_vec(),
        }
    }
}

/// Affine map from (pitch, yaw) to the 2D zone layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanarMapping {
    /// Yaw (deg) mapped to x = 0.
    pub yaw_center: f64,
    /// Yaw span (deg) across the full width.
    pub yaw_range: f64,
    pub pitch_offset: f64,
    /// Pitch span (deg) across the full height.
    pub pitch_range: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for PlanarMapping {
    fn default() -> Self {
        Self {
            yaw_center: 45.0,
            yaw_range: 90.0,
            pitch_offset: 10.0,
            pitch_range: 45.0,
            width: 900.0,
            height: 450.0,
        }
    }
}

/// Stick and grip geometry for the stick-tip classifier (scene units).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StickGeometry {
    pub length: f64,
    pub grip_height: f64,
    pub grip_depth: f64,
    /// Lateral grip travel across a 90 degree yaw sweep.
    pub yaw_travel: f64,
    /// Lateral offset of each grip from the kit center.
    pub hand_spread: f64,
    /// How far above a drum head the tip may be and still count as contact.
    pub surface_tolerance: f64,
}

impl Default for StickGeometry {
    fn default() -> Self {
        Self {
            length: 2.0,
            grip_height: 1.5,
            grip_depth: -0.5,
            yaw_travel: 3.0,
            hand_spread: 1.0,
            surface_tolerance: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    pub region: Region,
    /// Placement in the 3D kit. Zones without one are skipped in stick-tip mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<ZonePose>,
}

/// Planar region of a zone, in layout units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Region {
    Rect { x: f64, y: f64, w: f64, h: f64 },
    Circle { cx: f64, cy: f64, radius: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZonePose {
    /// Center of the drum head.
    #[serde(with = "dvec3_serde")]
    pub position: DVec3,
    pub radius: f64,
    /// Head tilt in degrees. Presentation only.
    #[serde(default)]
    pub tilt_deg: f64,
}

impl ZoneConfig {
    fn rect(name: &str, x: f64, y: f64, pose: Option<ZonePose>) -> ZoneConfig {
        ZoneConfig {
            name: name.into(),
            region: Region::Rect {
                x,
                y,
                w: 225.0,
                h: 225.0,
            },
            pose,
        }
    }

    fn pose(x: f64, y: f64, z: f64, radius: f64, tilt_deg: f64) -> Option<ZonePose> {
        Some(ZonePose {
            position: DVec3::new(x, y, z),
            radius,
            tilt_deg,
        })
    }

    /// Seven-piece kit: cymbals and toms on the top row, hi-hat, snare
    /// (two cells wide) and floor tom on the bottom row.
    pub fn drum_kit() -> Vec<ZoneConfig> {
        vec![
            Self::rect("Symbal", 0.0, 0.0, Self::pose(2.5, 2.5, 2.0, 1.5, -30.0)),
            Self::rect("Tom_high", 225.0, 0.0, Self::pose(1.0, 1.2, 1.5, 1.0, -26.0)),
            Self::rect("Tom_mid", 450.0, 0.0, Self::pose(-1.0, 1.2, 1.5, 1.0, -26.0)),
            Self::rect("Ride", 675.0, 0.0, Self::pose(-2.8, 2.5, 1.0, 1.5, -30.0)),
            Self::rect("Hihat", 0.0, 225.0, Self::pose(2.5, 1.0, -0.8, 1.0, -20.0)),
            Self::rect("Snare", 225.0, 225.0, Self::pose(1.0, 0.2, -0.8, 1.0, -15.0)),
            Self::rect("Snare", 450.0, 225.0, None),
            Self::rect("Tom_floor", 675.0, 225.0, Self::pose(-2.0, 0.3, -0.8, 1.2, -20.0)),
        ]
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HandConfig {
    pub source: SourceConfig,
    pub calibration: CalibrationConfig,
}

/// Where a hand's samples come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Synthetic stick at rest, for running without hardware.
    Mock {
        #[serde(default = "default_rate_hz")]
        rate_hz: f64,
    },
    /// Recorded JSON-lines session.
    Replay {
        path: PathBuf,
        /// Pace playback by the recorded timestamps.
        #[serde(default)]
        realtime: bool,
    },
    /// Framed register dumps from a sensor bridge.
    Tcp {
        addr: String,
        #[serde(default = "default_reconnect_ms")]
        reconnect_ms: u64,
    },
}

fn default_rate_hz() -> f64 {
    100.0
}

fn default_reconnect_ms() -> u64 {
    1000
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Mock {
            rate_hz: default_rate_hz(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(&self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Per-stick correction applied to raw samples before filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    #[serde(with = "dvec3_serde")]
    pub accel_offset: DVec3,
    #[serde(with = "dvec3_serde")]
    pub gyro_offset: DVec3,
    #[serde(with = "dvec3_serde")]
    pub accel_scale: DVec3,
    #[serde(with = "dvec3_serde")]
    pub gyro_scale: DVec3,
    /// Sensor axis read for each output axis (x, y, z).
    pub axis_mapping: [Axis; 3],
    /// Negate the output axis after mapping.
    pub axis_invert: [bool; 3],
    /// Components smaller than this in magnitude are zeroed.
    pub dead_zone: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            accel_offset: DVec3::ZERO,
            gyro_offset: DVec3::ZERO,
            accel_scale: DVec3::ONE,
            gyro_scale: DVec3::ONE,
            axis_mapping: [Axis::X, Axis::Y, Axis::Z],
            axis_invert: [false; 3],
            dead_zone: 0.0,
        }
    }
}

// glam vectors as plain `[x, y, z]` arrays in TOML.
mod dvec3_serde {
    use glam::DVec3;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &DVec3, s: S) -> Result<S::Ok, S::Error> {
        [v.x, v.y, v.z].serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DVec3, D::Error> {
        let [x, y, z] = <[f64; 3]>::deserialize(d)?;
        Ok(DVec3::new(x, y, z))
    }
}
