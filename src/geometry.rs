//! Small 2D helpers shared by footprint geometry and motion prediction.

use glam::{DVec2, Vec2};

/// Check whether segments `p0->p1` and `p2->p3` intersect.
///
/// Parametric test: solves for (s, t) along the two segments and accepts
/// when both lie in [0, 1]. Parallel segments yield non-finite parameters
/// and are rejected, which is the wanted behavior for polygon-edge tests.
pub fn segments_intersect(p0: Vec2, p1: Vec2, p2: Vec2, p3: Vec2) -> bool {
    segment_intersection(p0, p1, p2, p3).is_some()
}

/// Like [`segments_intersect`], returning the intersection point.
pub fn segment_intersection(p0: Vec2, p1: Vec2, p2: Vec2, p3: Vec2) -> Option<Vec2> {
    let s1 = p1 - p0;
    let s2 = p3 - p2;

    let denom = -s2.x * s1.y + s1.x * s2.y;
    let s = (-s1.y * (p0.x - p2.x) + s1.x * (p0.y - p2.y)) / denom;
    let t = (s2.x * (p0.y - p2.y) - s2.y * (p0.x - p2.x)) / denom;

    if (0.0..=1.0).contains(&s) && (0.0..=1.0).contains(&t) {
        Some(p0 + t * s1)
    } else {
        None
    }
}

/// f64 variant used by the Monte-Carlo path-crossing search.
pub fn segments_intersect_f64(p0: DVec2, p1: DVec2, p2: DVec2, p3: DVec2) -> bool {
    let s1 = p1 - p0;
    let s2 = p3 - p2;

    let denom = -s2.x * s1.y + s1.x * s2.y;
    let s = (-s1.y * (p0.x - p2.x) + s1.x * (p0.y - p2.y)) / denom;
    let t = (s2.x * (p0.y - p2.y) - s2.y * (p0.x - p2.x)) / denom;

    (0.0..=1.0).contains(&s) && (0.0..=1.0).contains(&t)
}

/// Offset perpendicular to the line `p1->p2`, at distance `dist`.
///
/// The returned (dx, dy) lands on the right side of the direction p2->p1,
/// so adding it to p1 and subtracting it from p1 gives the two corners of
/// a bumper edge.
pub fn perp_offset(p1: Vec2, p2: Vec2, dist: f32) -> Vec2 {
    let mut dx;
    let mut dy;
    if p1.x == p2.x {
        dx = dist;
        dy = 0.0;
    } else if p1.y == p2.y {
        dx = 0.0;
        dy = dist;
    } else {
        let slope = (p2.y - p1.y) / (p2.x - p1.x);
        dx = dist * (1.0 / (1.0 + 1.0 / (slope * slope))).abs().sqrt();
        dy = (dx / slope).abs();
    }

    if p2.y > p1.y {
        dx = -dx;
    }
    if p2.x < p1.x {
        dy = -dy;
    }
    Vec2::new(dx, dy)
}
