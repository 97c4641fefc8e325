//! Stick-tip classification for the 3D kit.
//!
//! The grip slides sideways with yaw, the stick pivots at the grip, and a hit
//! lands on the first posed zone, in stick order, whose head lies under the tip.

use crate::Zone;
use drumstick_config::{Hand, StickGeometry};
use glam::{DVec2, DVec3};
use std::f64::consts::PI;

/// Yaw at which the grip sits at its base lateral offset.
const YAW_REFERENCE_DEG: f64 = 45.0;
/// Yaw sweep that moves the grip by `StickGeometry::yaw_travel`.
const YAW_SWEEP_DEG: f64 = 90.0;

/// Where the hand holds the stick.
pub fn grip_position(stick: &StickGeometry, yaw: f64, hand: Hand) -> DVec3 {
    let side = match hand {
        Hand::Right => stick.hand_spread,
        Hand::Left => -stick.hand_spread,
    };
    let x = (yaw - YAW_REFERENCE_DEG) / YAW_SWEEP_DEG * stick.yaw_travel + side;
    DVec3::new(x, stick.grip_height, stick.grip_depth)
}

/// Position of the striking end. 45 degrees of pitch tilts the stick 60
/// degrees down; 45 degrees of yaw swings it 30 degrees sideways.
pub fn tip_position(stick: &StickGeometry, pitch: f64, yaw: f64, hand: Hand) -> DVec3 {
    let rx = pitch / 45.0 * (PI / 3.0);
    let ry = yaw / 45.0 * (PI / 6.0);
    let offset = DVec3::new(
        stick.length * ry.sin() * rx.cos(),
        -stick.length * rx.sin(),
        stick.length * ry.cos() * rx.cos(),
    );
    grip_position(stick, yaw, hand) + offset
}

/// First of `zones` whose head is under `tip`, within `tolerance` above it.
/// A cymbal's footprint covers the drums below it, so the caller's order decides
/// which one a tip inside both footprints strikes.
pub fn first_struck<'a>(
    zones: impl IntoIterator<Item = &'a Zone>,
    tip: DVec3,
    tolerance: f64,
) -> Option<&'a Zone> {
    if !tip.is_finite() {
        return None;
    }
    zones.into_iter().find(|zone| match &zone.pose {
        Some(pose) => {
            let horizontal = DVec2::new(tip.x - pose.position.x, tip.z - pose.position.z);
            horizontal.length() <= pose.radius && tip.y <= pose.position.y + tolerance
        }
        None => false,
    })
}
