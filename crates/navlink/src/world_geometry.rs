//! The world geometry that traverse links are validated against.

use glam::{UVec3, Vec3};

use crate::math::segment_triangle_intersection;

bitflags::bitflags! {
    /// Categories of world geometry a ray can collide with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct TraceMask: u32 {
        /// Solid level geometry.
        const WORLD = 1;
        /// Player and NPC clip brushes.
        const CLIP = 1 << 1;
        /// Trigger volumes, e.g. door and action triggers.
        const TRIGGER = 1 << 2;

        /// What traverse link rays collide with.
        ///
        /// Triggers are included so no links get established between polygons under doors.
        const TRAVERSE_LINK = Self::WORLD.bits() | Self::CLIP.bits() | Self::TRIGGER.bits();
    }
}

/// Answers whether a segment is blocked by world geometry.
///
/// The geometry must not change while a rebuild runs.
pub trait Raycast {
    /// Returns `true` if the segment `start -> end` hits geometry whose contents intersect `mask`.
    fn raycast(&self, start: Vec3, end: Vec3, mask: TraceMask) -> bool;
}

impl<T: Raycast + ?Sized> Raycast for &T {
    fn raycast(&self, start: Vec3, end: Vec3, mask: TraceMask) -> bool {
        (**self).raycast(start, end, mask)
    }
}

/// A triangle soup with per-triangle contents, z-up.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct WorldGeometry {
    /// The vertices of the geometry.
    /// Follows the convention of a triangle list.
    pub vertices: Vec<Vec3>,

    /// The indices of the geometry.
    /// Follows the convention of a triangle list.
    pub indices: Vec<UVec3>,

    /// The contents of every triangle. Each index corresponds 1:1 to the [`WorldGeometry::indices`].
    pub contents: Vec<TraceMask>,
}

impl WorldGeometry {
    /// Extends the geometry with the triangles of another one.
    /// The indices of `other` will be offset by the number of vertices in `self`.
    pub fn extend(&mut self, other: WorldGeometry) {
        if self.vertices.len() > u32::MAX as usize {
            panic!("Cannot extend world geometry with more than 2^32 vertices");
        }
        let next_vertex_index = self.vertices.len() as u32;
        self.vertices.extend(other.vertices);
        self.indices
            .extend(other.indices.iter().map(|i| i + next_vertex_index));
        self.contents.extend(other.contents);
    }

    /// Adds an axis-aligned box made of 12 triangles.
    pub fn add_box(&mut self, min: Vec3, max: Vec3, contents: TraceMask) {
        let corners = [
            Vec3::new(min.x, min.y, min.z),
            Vec3::new(max.x, min.y, min.z),
            Vec3::new(max.x, max.y, min.z),
            Vec3::new(min.x, max.y, min.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(max.x, min.y, max.z),
            Vec3::new(max.x, max.y, max.z),
            Vec3::new(min.x, max.y, max.z),
        ];
        const FACES: [[u32; 3]; 12] = [
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [1, 2, 6],
            [1, 6, 5],
            [2, 3, 7],
            [2, 7, 6],
            [3, 0, 4],
            [3, 4, 7],
        ];
        self.extend(WorldGeometry {
            vertices: corners.to_vec(),
            indices: FACES.iter().map(|face| UVec3::from_array(*face)).collect(),
            contents: vec![contents; FACES.len()],
        });
    }

    #[inline]
    fn triangle(&self, indices: UVec3) -> [Vec3; 3] {
        [
            self.vertices[indices.x as usize],
            self.vertices[indices.y as usize],
            self.vertices[indices.z as usize],
        ]
    }
}

impl Raycast for WorldGeometry {
    fn raycast(&self, start: Vec3, end: Vec3, mask: TraceMask) -> bool {
        self.indices
            .iter()
            .zip(&self.contents)
            .filter(|(_, contents)| contents.intersects(mask))
            .any(|(indices, _)| {
                segment_triangle_intersection(start, end, self.triangle(*indices)).is_some()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ray_through_box_hits() {
        let mut geometry = WorldGeometry::default();
        geometry.add_box(Vec3::splat(-1.0), Vec3::splat(1.0), TraceMask::WORLD);
        assert_eq!(geometry.indices.len(), 12);
        assert!(geometry.raycast(
            Vec3::new(-5.0, 0.3, 0.2),
            Vec3::new(5.0, 0.3, 0.2),
            TraceMask::TRAVERSE_LINK
        ));
        assert!(!geometry.raycast(
            Vec3::new(-5.0, 0.0, 3.0),
            Vec3::new(5.0, 0.0, 3.0),
            TraceMask::TRAVERSE_LINK
        ));
    }

    #[test]
    fn contents_outside_the_mask_are_ignored() {
        let mut geometry = WorldGeometry::default();
        geometry.add_box(Vec3::splat(-1.0), Vec3::splat(1.0), TraceMask::TRIGGER);
        let start = Vec3::new(0.3, -0.2, 5.0);
        let end = Vec3::new(0.3, -0.2, -5.0);
        assert!(geometry.raycast(start, end, TraceMask::TRAVERSE_LINK));
        assert!(!geometry.raycast(start, end, TraceMask::WORLD | TraceMask::CLIP));
    }

    #[test]
    fn extend_offsets_indices() {
        let mut geometry = WorldGeometry::default();
        geometry.add_box(Vec3::ZERO, Vec3::ONE, TraceMask::WORLD);
        geometry.add_box(Vec3::ONE, Vec3::splat(2.0), TraceMask::CLIP);
        assert_eq!(geometry.vertices.len(), 16);
        assert!(geometry.indices[12..].iter().all(|i| i.min_element() >= 8));
        assert_eq!(geometry.contents[12], TraceMask::CLIP);
    }
}
