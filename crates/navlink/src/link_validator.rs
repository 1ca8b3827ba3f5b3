//! Geometric feasibility tests for traverse links.

use glam::{Vec2, Vec3};

use crate::{
    config::TraverseLinkConfig,
    math::{ledge_span_offset, max_los_angle, slope_angle},
    traverse_type::TraverseQuery,
    world_geometry::{Raycast, TraceMask},
};

/// Links at least this long get probed for overhangs at three points instead of one. `[Units: wu]`
///
/// Short links are by far the most common, skipping the extra probes for them saves a lot of build time.
pub const TRAVERSE_LINK_TRIPLE_TRACE_THRESHOLD: f32 = 100.0;

/// The geometry of a candidate link, as measured by the connectivity builder.
///
/// `low` is the lower of the two ends, regardless of which polygon the link starts at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortalGeometry {
    /// The lower end of the link.
    pub low: Vec3,
    /// The upper end of the link.
    pub high: Vec3,
    /// The outward facing normal of the polygon edge at the lower end.
    pub low_normal: Vec3,
    /// The outward facing normal of the polygon edge at the upper end.
    pub high_normal: Vec3,
    /// The distance between both ends. `[Units: wu]`
    pub dist: f32,
    /// The height difference between both ends. `[Units: wu]`
    pub elevation: f32,
    /// The slope of the link. `[Units: degrees]`
    pub slope: f32,
    /// Whether the base end overlaps the landing polygon when seen from above.
    pub base_overlaps: bool,
    /// Whether the landing end overlaps the base polygon when seen from above.
    pub land_overlaps: bool,
}

impl PortalGeometry {
    /// Measures the link between the anchor points of the base and landing polygon.
    pub fn from_ends(
        base: Vec3,
        base_normal: Vec3,
        land: Vec3,
        land_normal: Vec3,
        base_overlaps: bool,
        land_overlaps: bool,
    ) -> Self {
        let ((low, low_normal), (high, high_normal)) = if base.z <= land.z {
            ((base, base_normal), (land, land_normal))
        } else {
            ((land, land_normal), (base, base_normal))
        };
        Self {
            low,
            high,
            low_normal,
            high_normal,
            dist: low.distance(high),
            elevation: high.z - low.z,
            slope: slope_angle(low, high),
            base_overlaps,
            land_overlaps,
        }
    }

    /// The measurements the classifier looks at.
    pub fn query(&self) -> TraverseQuery {
        TraverseQuery {
            dist: self.dist,
            elevation: self.elevation,
            slope: self.slope,
            base_overlaps: self.base_overlaps,
            land_overlaps: self.land_overlaps,
        }
    }
}

/// The hull dimensions of the tile a link starts in.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WalkableParams {
    /// The height of the hull. `[Units: wu]`
    pub height: f32,
    /// The radius of the hull. `[Units: wu]`
    pub radius: f32,
}

/// Rejects traverse links that would make agents clip through world geometry.
#[derive(Debug, Clone, Copy)]
pub struct LinkValidator<'a, G: ?Sized> {
    config: &'a TraverseLinkConfig,
    geometry: &'a G,
}

impl<'a, G: Raycast + ?Sized> LinkValidator<'a, G> {
    /// Creates a validator that casts rays against `geometry`.
    pub fn new(config: &'a TraverseLinkConfig, geometry: &'a G) -> Self {
        Self { config, geometry }
    }

    /// How far the upper end of a link is pushed away from its ledge before the
    /// line of sight test.
    pub fn offset_amount(&self, walkable_radius: f32, slope: f32) -> f32 {
        let extra_offset = self.config.traverse_ray_extra_offset;
        if !self.config.traverse_ray_dynamic_offset {
            return walkable_radius + extra_offset;
        }
        // The hull center sits two radii away from the polygon edge, the kink point
        // has to move over the ledge by that much.
        let ledge_span = walkable_radius * 2.0 + extra_offset;
        let max_angle = max_los_angle(ledge_span, self.config.cell_height);
        ledge_span_offset(ledge_span, slope, max_angle)
    }

    /// Returns `true` if an agent could perform the crossing without clipping geometry.
    ///
    /// The checks run from cheapest to most expensive and stop at the first failure.
    pub fn is_feasible(&self, portal: &PortalGeometry, walkable: WalkableParams) -> bool {
        let low = portal.low;
        let high = portal.high;

        // Ledges facing away from each other can't be linked.
        if !edges_face_each_other(low, high, portal.low_normal, portal.high_normal) {
            return false;
        }

        let offset = self.offset_amount(walkable.radius, portal.slope);
        let mut target = high;
        if offset > 0.0 {
            let offset_xy = high.truncate() + portal.high_normal.truncate() * offset;
            let offset_point = offset_xy.extend(high.z);
            // Leaking into a nested mesh through thin geometry.
            if self.raycast(high, offset_point) {
                return false;
            }
            target = offset_point;
        }

        if self.raycast(target, low) {
            return false;
        }

        // Only links that run over potentially walkable ground can pass under an overhang.
        if portal.slope < self.config.agent_max_slope
            && self.overhang_over_span(low, target, walkable.height)
        {
            return false;
        }

        // The upper end is more likely to clip, test it first.
        !(self.overhang_over_point(target, walkable.height)
            || self.overhang_over_point(low, walkable.height))
    }

    #[inline]
    fn raycast(&self, start: Vec3, end: Vec3) -> bool {
        self.geometry.raycast(start, end, TraceMask::TRAVERSE_LINK)
    }

    /// Probes upward along the link for geometry lower than the hull, e.g. a slightly
    /// lifted crate the link would otherwise pass right under.
    fn overhang_over_span(&self, low: Vec3, high: Vec3, walkable_height: f32) -> bool {
        let mid = low.lerp(high, 0.5);
        if self.probe_up(mid, walkable_height) {
            return true;
        }
        if low.distance(high) < TRAVERSE_LINK_TRIPLE_TRACE_THRESHOLD {
            return false;
        }
        self.probe_up(mid.lerp(low, 0.5), walkable_height)
            || self.probe_up(mid.lerp(high, 0.5), walkable_height)
    }

    #[inline]
    fn probe_up(&self, start: Vec3, height: f32) -> bool {
        self.raycast(start, start + Vec3::Z * height)
    }

    /// Probes down onto `point` for overhanging geometry at the kink of the link.
    /// Twice the hull height, since traverse animations swing well past it.
    fn overhang_over_point(&self, point: Vec3, walkable_height: f32) -> bool {
        self.raycast(point + Vec3::Z * (walkable_height * 2.0), point)
    }
}

/// The link has to leave the lower ledge through its outward normal and enter the upper
/// ledge against its outward normal.
fn edges_face_each_other(low: Vec3, high: Vec3, low_normal: Vec3, high_normal: Vec3) -> bool {
    let delta: Vec2 = high.truncate() - low.truncate();
    delta.dot(low_normal.truncate()) >= 0.0 && delta.dot(high_normal.truncate()) < 0.0
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::{config::TraverseLinkConfigBuilder, world_geometry::WorldGeometry};

    struct AlwaysHit;

    impl Raycast for AlwaysHit {
        fn raycast(&self, _: Vec3, _: Vec3, _: TraceMask) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct RecordingRaycast {
        rays: RefCell<Vec<(Vec3, Vec3)>>,
    }

    impl Raycast for RecordingRaycast {
        fn raycast(&self, start: Vec3, end: Vec3, _: TraceMask) -> bool {
            self.rays.borrow_mut().push((start, end));
            false
        }
    }

    const WALKABLE: WalkableParams = WalkableParams {
        height: 72.0,
        radius: 16.0,
    };

    fn fixed_offset_config() -> TraverseLinkConfig {
        TraverseLinkConfigBuilder {
            traverse_ray_dynamic_offset: false,
            ..Default::default()
        }
        .build()
    }

    /// A jump up a ledge along +x: the low poly's edge faces +x, the high poly's edge faces -x.
    fn ledge(dist_x: f32, height: f32) -> PortalGeometry {
        PortalGeometry::from_ends(
            Vec3::ZERO,
            Vec3::X,
            Vec3::new(dist_x, 0.0, height),
            -Vec3::X,
            true,
            true,
        )
    }

    #[test]
    fn from_ends_sorts_by_height() {
        let portal = PortalGeometry::from_ends(
            Vec3::new(0.0, 0.0, 50.0),
            -Vec3::X,
            Vec3::new(50.0, 0.0, 0.0),
            Vec3::X,
            false,
            true,
        );
        assert_eq!(portal.low, Vec3::new(50.0, 0.0, 0.0));
        assert_eq!(portal.high_normal, -Vec3::X);
        assert_eq!(portal.elevation, 50.0);
        assert!((portal.slope - 45.0).abs() < 1e-4);
        assert!(!portal.query().base_overlaps);
    }

    #[test]
    fn open_world_accepts_facing_ledges() {
        let config = fixed_offset_config();
        let world = WorldGeometry::default();
        let validator = LinkValidator::new(&config, &world);
        assert!(validator.is_feasible(&ledge(60.0, 40.0), WALKABLE));
    }

    #[test]
    fn ledges_facing_away_are_rejected() {
        let config = fixed_offset_config();
        let world = WorldGeometry::default();
        let validator = LinkValidator::new(&config, &world);
        let mut portal = ledge(60.0, 40.0);
        portal.high_normal = Vec3::X;
        assert!(!validator.is_feasible(&portal, WALKABLE));
        let mut portal = ledge(60.0, 40.0);
        portal.low_normal = -Vec3::X;
        assert!(!validator.is_feasible(&portal, WALKABLE));
    }

    #[test]
    fn blocked_world_rejects_everything() {
        for dynamic in [false, true] {
            let config = TraverseLinkConfigBuilder {
                traverse_ray_dynamic_offset: dynamic,
                ..Default::default()
            }
            .build();
            let validator = LinkValidator::new(&config, &AlwaysHit);
            for portal in [ledge(60.0, 40.0), ledge(300.0, 10.0), ledge(10.0, 200.0)] {
                assert!(!validator.is_feasible(&portal, WALKABLE));
            }
        }
    }

    #[test]
    fn wall_between_ends_blocks_line_of_sight() {
        let config = fixed_offset_config();
        let mut world = WorldGeometry::default();
        world.add_box(
            Vec3::new(20.0, -50.0, -10.0),
            Vec3::new(25.0, 50.0, 30.0),
            TraceMask::WORLD,
        );
        let validator = LinkValidator::new(&config, &world);
        assert!(!validator.is_feasible(&ledge(60.0, 40.0), WALKABLE));
    }

    #[test]
    fn low_ceiling_over_the_kink_is_rejected() {
        let config = fixed_offset_config();
        let mut world = WorldGeometry::default();
        // A slab 100 units above the upper end, within twice the hull height.
        world.add_box(
            Vec3::new(20.0, -50.0, 140.0),
            Vec3::new(120.0, 50.0, 150.0),
            TraceMask::WORLD,
        );
        let validator = LinkValidator::new(&config, &world);
        assert!(!validator.is_feasible(&ledge(60.0, 40.0), WALKABLE));

        // Far above, the link is fine.
        let mut world = WorldGeometry::default();
        world.add_box(
            Vec3::new(20.0, -50.0, 300.0),
            Vec3::new(120.0, 50.0, 310.0),
            TraceMask::WORLD,
        );
        let validator = LinkValidator::new(&config, &world);
        assert!(validator.is_feasible(&ledge(60.0, 40.0), WALKABLE));
    }

    #[test]
    fn long_flat_links_probe_three_points() {
        let config = fixed_offset_config();
        let rays = RecordingRaycast::default();
        let validator = LinkValidator::new(&config, &rays);
        assert!(validator.is_feasible(&ledge(200.0, 10.0), WALKABLE));
        // offset, line of sight, three span probes, two headroom probes
        assert_eq!(rays.rays.borrow().len(), 7);

        let rays = RecordingRaycast::default();
        let validator = LinkValidator::new(&config, &rays);
        assert!(validator.is_feasible(&ledge(40.0, 10.0), WALKABLE));
        assert_eq!(rays.rays.borrow().len(), 5);
    }

    #[test]
    fn steep_links_skip_the_span_probes() {
        let config = fixed_offset_config();
        let rays = RecordingRaycast::default();
        let validator = LinkValidator::new(&config, &rays);
        // Offset of 20 units pulls the target back to x = 0 and straight above `low`.
        assert!(validator.is_feasible(&ledge(20.0, 300.0), WALKABLE));
        assert_eq!(rays.rays.borrow().len(), 4);
    }

    #[test]
    fn span_gate_uses_the_slope_between_both_ends() {
        let config = fixed_offset_config();
        let mut world = WorldGeometry::default();
        // Hangs over the midpoint between `low` and the offset target.
        world.add_box(
            Vec3::new(18.0, -50.0, 60.0),
            Vec3::new(22.0, 50.0, 70.0),
            TraceMask::WORLD,
        );
        let validator = LinkValidator::new(&config, &world);
        let portal = ledge(60.0, 45.0);
        // The offset target lies steeper than the agent slope, the link itself doesn't.
        assert!(slope_angle(portal.low, Vec3::new(40.0, 0.0, 45.0)) > config.agent_max_slope);
        assert!(portal.slope < config.agent_max_slope);
        assert!(!validator.is_feasible(&portal, WALKABLE));
    }

    #[test]
    fn fixed_offset_moves_target_along_high_normal() {
        let config = fixed_offset_config();
        let rays = RecordingRaycast::default();
        let validator = LinkValidator::new(&config, &rays);
        validator.is_feasible(&ledge(60.0, 40.0), WALKABLE);
        let rays = rays.rays.borrow();
        let (start, end) = rays[0];
        assert_eq!(start, Vec3::new(60.0, 0.0, 40.0));
        // radius 16 + extra 4 along -x
        assert_eq!(end, Vec3::new(40.0, 0.0, 40.0));
        assert_eq!(rays[1], (end, Vec3::ZERO));
    }

    #[test]
    fn dynamic_offset_grows_with_slope() {
        let config = TraverseLinkConfigBuilder::default().build();
        let world = WorldGeometry::default();
        let validator = LinkValidator::new(&config, &world);
        let flat = validator.offset_amount(WALKABLE.radius, 0.0);
        let steep = validator.offset_amount(WALKABLE.radius, 80.0);
        assert_eq!(flat, 0.0);
        assert_eq!(steep, WALKABLE.radius * 2.0 + config.traverse_ray_extra_offset);
    }
}
