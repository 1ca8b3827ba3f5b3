//! Geometry helpers shared by the classifier and the validator.

use glam::Vec3;

/// World-space distance covered by one unit of [`Link::traverse_dist`](crate::Link::traverse_dist).
pub const TRAVERSE_DIST_QUANT_FACTOR: f32 = 10.0;

/// The largest crossing distance a link can store without saturating. `[Units: wu]`
pub const TRAVERSE_DIST_MAX: f32 = u8::MAX as f32 * TRAVERSE_DIST_QUANT_FACTOR;

/// Returns the slope of the segment `from -> to` in degrees.
///
/// The angle is measured between the segment and the xy-plane, so a segment climbing
/// straight up yields `90.0` and a descending segment yields a negative angle.
#[inline]
pub fn slope_angle(from: Vec3, to: Vec3) -> f32 {
    let delta = to - from;
    let horizontal = delta.truncate().length();
    delta.z.atan2(horizontal).to_degrees()
}

/// Returns the steepest angle in degrees at which a ray can still pass over a ledge of
/// `ledge_span` world units that has been rasterized with voxels `object_height` units tall.
#[inline]
pub fn max_los_angle(ledge_span: f32, object_height: f32) -> f32 {
    object_height.atan2(ledge_span).to_degrees()
}

/// Scales `ledge_span` by how close `slope_angle` is to `max_angle`.
///
/// Flat crossings need no offset, crossings at or above `max_angle` need the full span.
#[inline]
pub fn ledge_span_offset(ledge_span: f32, slope_angle: f32, max_angle: f32) -> f32 {
    if max_angle <= 0.0 {
        return 0.0;
    }
    let clamped = slope_angle.clamp(0.0, max_angle);
    ledge_span * (clamped / max_angle)
}

/// Quantizes a crossing distance into the byte stored on a traverse link.
#[inline]
pub fn quantize_traverse_dist(dist: f32) -> u8 {
    (dist / TRAVERSE_DIST_QUANT_FACTOR).clamp(0.0, u8::MAX as f32) as u8
}

/// Intersects the segment `start -> end` with a triangle, ignoring winding.
///
/// Returns the parametric position of the hit along the segment in `[0, 1]`.
pub fn segment_triangle_intersection(start: Vec3, end: Vec3, triangle: [Vec3; 3]) -> Option<f32> {
    // Möller–Trumbore, restricted to the segment.
    let direction = end - start;
    let edge1 = triangle[1] - triangle[0];
    let edge2 = triangle[2] - triangle[0];

    let h = direction.cross(edge2);
    let a = edge1.dot(h);
    if a.abs() < f32::EPSILON {
        // Parallel to the triangle plane.
        return None;
    }

    let f = 1.0 / a;
    let s = start - triangle[0];
    let u = f * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = f * direction.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(q);
    (0.0..=1.0).contains(&t).then_some(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn slope_of_diagonal_is_45_degrees() {
        let angle = slope_angle(Vec3::ZERO, Vec3::new(10.0, 0.0, 10.0));
        assert_relative_eq!(angle, 45.0, epsilon = 1e-4);
        let angle = slope_angle(Vec3::new(10.0, 0.0, 10.0), Vec3::ZERO);
        assert_relative_eq!(angle, -45.0, epsilon = 1e-4);
    }

    #[test]
    fn ledge_offset_scales_with_slope() {
        let max_angle = max_los_angle(36.0, 4.0);
        assert_relative_eq!(ledge_span_offset(36.0, 0.0, max_angle), 0.0);
        assert_relative_eq!(ledge_span_offset(36.0, max_angle / 2.0, max_angle), 18.0);
        assert_relative_eq!(ledge_span_offset(36.0, 80.0, max_angle), 36.0);
        assert_eq!(ledge_span_offset(36.0, 10.0, 0.0), 0.0);
    }

    #[test]
    fn traverse_dist_saturates() {
        assert_eq!(quantize_traverse_dist(125.0), 12);
        assert_eq!(quantize_traverse_dist(TRAVERSE_DIST_MAX * 2.0), u8::MAX);
    }

    #[test]
    fn segment_hits_triangle_from_both_sides() {
        let triangle = [
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ];
        let down = segment_triangle_intersection(Vec3::Z, -Vec3::Z, triangle);
        assert_relative_eq!(down.unwrap(), 0.5);
        let up = segment_triangle_intersection(-Vec3::Z, Vec3::Z, triangle);
        assert_relative_eq!(up.unwrap(), 0.5);
        // Segment stops short of the plane.
        assert!(segment_triangle_intersection(Vec3::Z * 2.0, Vec3::Z, triangle).is_none());
    }
}
