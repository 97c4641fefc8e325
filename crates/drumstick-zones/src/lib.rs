//! Drum zone layout and hit classification.
//!
//! A [`ZoneLayout`] is built once from the classifier config, validated, and
//! then shared read-only by both hand pipelines. Classification always yields
//! a zone: when nothing matches, the configured default zone is returned.

pub mod classifier;
pub mod stick;

use drumstick_config::{ClassifierConfig, ClassifierMode, Hand, PlanarMapping, Region, StickGeometry, ZonePose};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ZoneError {
    #[error("Zone list is empty")]
    Empty,
    #[error("Default zone {0:?} is not in the zone list")]
    UnknownDefault(String),
    #[error("Zone #{0} has an empty name")]
    UnnamedZone(usize),
    #[error("Zone {0:?} has a degenerate region")]
    DegenerateRegion(String),
    #[error("Zone {0:?} has an invalid 3D pose")]
    InvalidPose(String),
    #[error("Planar mapping needs positive, finite ranges and size")]
    InvalidMapping,
    #[error("Stick geometry needs a positive, finite length")]
    InvalidStick,
    #[error("Stick-tip mode needs at least one zone with a 3D pose")]
    NoPoses,
    #[error("Stick order names {0:?}, which is not a zone with a 3D pose")]
    UnknownStickZone(String),
}

/// One named target.
#[derive(Debug, Clone, Serialize)]
pub struct Zone {
    pub name: Arc<str>,
    pub region: Region,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pose: Option<ZonePose>,
}

/// Validated, immutable zone layout.
#[derive(Debug)]
pub struct ZoneLayout {
    zones: Vec<Zone>,
    default_index: usize,
    mode: ClassifierMode,
    planar: PlanarMapping,
    stick: StickGeometry,
    /// Indices of posed zones, in stick-tip test order.
    stick_order: Vec<usize>,
}

impl ZoneLayout {
    /// Validate the classifier config. Any error here is fatal at startup.
    pub fn from_config(config: &ClassifierConfig) -> Result<Self, ZoneError> {
        if config.zones.is_empty() {
            return Err(ZoneError::Empty);
        }

        let mut zones = Vec::with_capacity(config.zones.len());
        for (index, zone) in config.zones.iter().enumerate() {
            if zone.name.trim().is_empty() {
                return Err(ZoneError::UnnamedZone(index));
            }
            if !region_is_valid(&zone.region) {
                return Err(ZoneError::DegenerateRegion(zone.name.clone()));
            }
            if let Some(pose) = &zone.pose {
                if !pose.position.is_finite() || !(pose.radius.is_finite() && pose.radius > 0.0) {
                    return Err(ZoneError::InvalidPose(zone.name.clone()));
                }
            }
            zones.push(Zone {
                name: Arc::from(zone.name.as_str()),
                region: zone.region,
                pose: zone.pose,
            });
        }

        let default_index = zones
            .iter()
            .position(|z| *z.name == *config.default_zone)
            .ok_or_else(|| ZoneError::UnknownDefault(config.default_zone.clone()))?;

        let p = &config.planar;
        let mapping_ok = [p.yaw_range, p.pitch_range, p.width, p.height]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
            && p.yaw_center.is_finite()
            && p.pitch_offset.is_finite();
        if !mapping_ok {
            return Err(ZoneError::InvalidMapping);
        }

        let mut stick_order = Vec::new();
        if config.mode == ClassifierMode::StickTip {
            if !(config.stick.length.is_finite() && config.stick.length > 0.0) {
                return Err(ZoneError::InvalidStick);
            }
            if zones.iter().all(|z| z.pose.is_none()) {
                return Err(ZoneError::NoPoses);
            }
            stick_order = resolve_stick_order(&zones, &config.stick_order)?;
        }

        tracing::debug!(zones = zones.len(), mode = ?config.mode, "Zone layout validated");

        Ok(Self {
            zones,
            default_index,
            mode: config.mode,
            planar: config.planar.clone(),
            stick: config.stick.clone(),
            stick_order,
        })
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn default_zone(&self) -> &Zone {
        &self.zones[self.default_index]
    }

    pub fn mode(&self) -> ClassifierMode {
        self.mode
    }

    /// Posed zones in the order stick-tip mode tests them. Empty in planar mode.
    pub fn stick_zones(&self) -> impl Iterator<Item = &Zone> + '_ {
        self.stick_order.iter().map(|&i| &self.zones[i])
    }

    /// Pick the zone struck from the orientation at the moment of a hit.
    pub fn classify(&self, pitch: f64, yaw: f64, hand: Hand) -> &Zone {
        let found = match self.mode {
            ClassifierMode::Planar => {
                let point = classifier::map_to_plane(&self.planar, pitch, yaw);
                classifier::first_containing(&self.zones, point)
            }
            ClassifierMode::StickTip => {
                let tip = stick::tip_position(&self.stick, pitch, yaw, hand);
                stick::first_struck(self.stick_zones(), tip, self.stick.surface_tolerance)
            }
        };
        found.unwrap_or_else(|| {
            tracing::trace!(pitch, yaw, %hand, "No zone matched, using default");
            self.default_zone()
        })
    }
}

/// Named zones first, in the given order, then any remaining posed zones in
/// declaration order. A name matches its first posed zone.
fn resolve_stick_order(zones: &[Zone], names: &[String]) -> Result<Vec<usize>, ZoneError> {
    let mut order = Vec::with_capacity(zones.len());
    for name in names {
        let index = zones
            .iter()
            .position(|z| *z.name == **name && z.pose.is_some())
            .ok_or_else(|| ZoneError::UnknownStickZone(name.clone()))?;
        if !order.contains(&index) {
            order.push(index);
        }
    }
    for (index, zone) in zones.iter().enumerate() {
        if zone.pose.is_some() && !order.contains(&index) {
            order.push(index);
        }
    }
    Ok(order)
}

fn region_is_valid(region: &Region) -> bool {
    match *region {
        Region::Rect { x, y, w, h } => {
            x.is_finite() && y.is_finite() && w.is_finite() && h.is_finite() && w > 0.0 && h > 0.0
        }
        Region::Circle { cx, cy, radius } => {
            cx.is_finite() && cy.is_finite() && radius.is_finite() && radius > 0.0
        }
    }
}
