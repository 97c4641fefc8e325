//! Planar classification: project (pitch, yaw) onto the 2D zone layout and
//! take the first region containing the point.

use crate::Zone;
use drumstick_config::{PlanarMapping, Region};
use glam::DVec2;

/// Map an orientation to layout coordinates, clamped to the layout bounds.
///
/// Yaw to the left (positive) moves the point toward x = 0; pitching down
/// (positive) moves it toward the bottom row.
pub fn map_to_plane(mapping: &PlanarMapping, pitch: f64, yaw: f64) -> DVec2 {
    let x = (mapping.yaw_center - yaw) / mapping.yaw_range * mapping.width;
    let y = (pitch + mapping.pitch_offset) / mapping.pitch_range * mapping.height;
    DVec2::new(clamp_or_zero(x, mapping.width), clamp_or_zero(y, mapping.height))
}

fn clamp_or_zero(v: f64, max: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, max)
    }
}

/// Whether `point` lies in `region`. Rectangles are half-open on their far
/// edges so adjacent cells never both claim a point.
pub fn region_contains(region: &Region, point: DVec2) -> bool {
    match *region {
        Region::Rect { x, y, w, h } => {
            point.x >= x && point.x < x + w && point.y >= y && point.y < y + h
        }
        Region::Circle { cx, cy, radius } => point.distance(DVec2::new(cx, cy)) <= radius,
    }
}

/// First zone in declaration order whose region contains `point`.
pub fn first_containing(zones: &[Zone], point: DVec2) -> Option<&Zone> {
    zones.iter().find(|z| region_contains(&z.region, point))
}
