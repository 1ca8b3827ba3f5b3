//! Crossing types and the classifier that picks the best one for a candidate link.

use std::ops::{BitOr, BitOrAssign};

use crate::{
    config::{NavMeshType, TraverseAnimType},
    nav_mesh_set::LEGACY_NAVMESH_SET_VERSION,
};

/// The number of slots in a [`TraverseTypeCatalog`].
pub const NUM_TRAVERSE_TYPES: usize = 32;

/// The index of a slot in a [`TraverseTypeCatalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct TraverseTypeId(u8);

impl TraverseTypeId {
    /// Wraps a slot index. `None` if it is out of range.
    #[inline]
    pub const fn new(index: u8) -> Option<Self> {
        if (index as usize) < NUM_TRAVERSE_TYPES {
            Some(Self(index))
        } else {
            None
        }
    }

    /// The slot index.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The raw value stored in tile data.
    #[inline]
    pub fn get(self) -> u8 {
        self.0
    }

    /// The single-bit mask of this type.
    #[inline]
    pub fn bit(self) -> TraverseTypeMask {
        TraverseTypeMask(1 << self.0)
    }
}

/// A set of [`TraverseTypeId`]s, one bit per catalog slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct TraverseTypeMask(pub u32);

impl TraverseTypeMask {
    /// No types.
    pub const EMPTY: Self = Self(0);

    /// Whether `id` is part of the set.
    #[inline]
    pub fn contains(self, id: TraverseTypeId) -> bool {
        self.0 & id.bit().0 != 0
    }

    /// Whether the set is empty.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates the types in the set, lowest slot first.
    pub fn iter(self) -> impl Iterator<Item = TraverseTypeId> {
        (0..NUM_TRAVERSE_TYPES as u8)
            .filter_map(TraverseTypeId::new)
            .filter(move |id| self.contains(*id))
    }
}

impl BitOr for TraverseTypeMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for TraverseTypeMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl FromIterator<TraverseTypeId> for TraverseTypeMask {
    fn from_iter<T: IntoIterator<Item = TraverseTypeId>>(iter: T) -> Self {
        iter.into_iter()
            .fold(Self::EMPTY, |mask, id| mask | id.bit())
    }
}

/// The geometric envelope of one kind of crossing, e.g. a short jump or a tall climb.
///
/// All ranges are inclusive. Distances are in world units, slopes in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TraverseType {
    /// Minimum distance between the two ends of the link.
    pub min_dist: f32,
    /// Maximum distance between the two ends of the link.
    pub max_dist: f32,
    /// Minimum height difference between the two ends of the link.
    pub min_elev: f32,
    /// Maximum height difference between the two ends of the link.
    pub max_elev: f32,
    /// Minimum slope of the link.
    pub min_slope: f32,
    /// Maximum slope of the link.
    pub max_slope: f32,
    /// Elevation from which on the ends of the link have to overlap. Negative disables the check.
    pub overlap_trigger: f32,
    /// Once triggered, one overlapping end suffices instead of both.
    pub overlap_exclusive: bool,
}

impl TraverseType {
    /// A slot that never matches.
    pub const UNUSED: Self = Self::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -1.0, false);

    /// Creates a new crossing type.
    pub const fn new(
        min_dist: f32,
        max_dist: f32,
        min_elev: f32,
        max_elev: f32,
        min_slope: f32,
        max_slope: f32,
        overlap_trigger: f32,
        overlap_exclusive: bool,
    ) -> Self {
        Self {
            min_dist,
            max_dist,
            min_elev,
            max_elev,
            min_slope,
            max_slope,
            overlap_trigger,
            overlap_exclusive,
        }
    }

    /// Unused slots have empty distance and elevation ranges at zero.
    #[inline]
    pub fn is_unused(&self) -> bool {
        self.min_dist == 0.0 && self.max_dist == 0.0 && self.min_elev == 0.0 && self.max_elev == 0.0
    }

    /// Returns how far `query` lies from the center of this type's envelope,
    /// or `None` if it lies outside of it.
    pub fn score(&self, query: &TraverseQuery) -> Option<f32> {
        if !(self.min_dist..=self.max_dist).contains(&query.dist)
            || !(self.min_elev..=self.max_elev).contains(&query.elevation)
            || !(self.min_slope..=self.max_slope).contains(&query.slope)
        {
            return None;
        }

        if self.overlap_trigger >= 0.0 && query.elevation >= self.overlap_trigger {
            let overlaps = if self.overlap_exclusive {
                query.base_overlaps || query.land_overlaps
            } else {
                query.base_overlaps && query.land_overlaps
            };
            if !overlaps {
                return None;
            }
        }

        let mid_dist = (self.min_dist + self.max_dist) / 2.0;
        let mid_elev = (self.min_elev + self.max_elev) / 2.0;
        let mid_slope = (self.min_slope + self.max_slope) / 2.0;
        Some(
            (query.dist - mid_dist).abs()
                + (query.elevation - mid_elev).abs()
                + (query.slope - mid_slope).abs(),
        )
    }
}

/// The measurements of a candidate link that the classifier looks at.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TraverseQuery {
    /// Distance between the two ends. `[Units: wu]`
    pub dist: f32,
    /// Height difference between the two ends. `[Units: wu]`
    pub elevation: f32,
    /// Slope of the link. `[Units: degrees]`
    pub slope: f32,
    /// Whether the base end overlaps the landing polygon when seen from above.
    pub base_overlaps: bool,
    /// Whether the landing end overlaps the base polygon when seen from above.
    pub land_overlaps: bool,
}

/// The 32 crossing types links are classified against.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TraverseTypeCatalog {
    types: [TraverseType; NUM_TRAVERSE_TYPES],
}

impl Default for TraverseTypeCatalog {
    fn default() -> Self {
        Self::defaults_for(crate::nav_mesh_set::NAVMESH_SET_VERSION)
    }
}

impl TraverseTypeCatalog {
    /// A catalog where every slot is unused.
    pub fn empty() -> Self {
        Self {
            types: [TraverseType::UNUSED; NUM_TRAVERSE_TYPES],
        }
    }

    /// The catalog shipped with navmesh set `version`.
    pub fn defaults_for(version: u32) -> Self {
        let mut types = [TraverseType::UNUSED; NUM_TRAVERSE_TYPES];

        types[1] = TraverseType::new(0.0, 120.0, 0.0, 48.0, 0.0, 67.0, 0.0, false);
        types[2] = TraverseType::new(120.0, 160.0, 48.0, 96.0, 5.0, 78.0, 0.0, false);
        types[3] = TraverseType::new(160.0, 220.0, 0.0, 128.0, 0.0, 38.0, 0.0, false);

        types[7] = TraverseType::new(800.0, 1220.0, 0.0, 96.0, 0.0, 6.5, 0.0, true);
        types[8] = TraverseType::new(70.0, 220.0, 48.0, 220.0, 19.0, 84.0, 0.0, false);
        types[9] = TraverseType::new(210.0, 450.0, 168.0, 384.0, 27.0, 87.5, 0.0, false);
        types[10] = TraverseType::new(450.0, 950.0, 384.0, 950.0, 44.0, 89.5, 0.0, false);
        types[11] = TraverseType::new(410.0, 800.0, 0.0, 56.0, 0.0, 7.0, 0.0, true);
        types[12] = TraverseType::new(640.0, 930.0, 348.0, 640.0, 2.2, 47.0, 0.0, true);
        types[13] = TraverseType::new(810.0, 1220.0, 256.0, 640.0, 5.7, 58.5, 0.0, true);

        // 14 is unused, 15 and 18 are reserved for off-mesh links.
        types[16] = TraverseType::new(220.0, 410.0, 0.0, 104.0, 0.0, 12.5, 0.0, false);
        types[17] = TraverseType::new(210.0, 580.0, 104.0, 416.0, 4.6, 53.0, 0.0, true);

        // The two tallest climbs moved up one slot after the legacy set version.
        let tall_climbs = if version > LEGACY_NAVMESH_SET_VERSION {
            20
        } else {
            19
        };
        types[tall_climbs] = TraverseType::new(210.0, 450.0, 168.0, 384.0, 34.0, 89.0, 0.0, false);
        types[tall_climbs + 1] =
            TraverseType::new(450.0, 860.0, 340.0, 850.0, 46.0, 89.0, 0.0, false);

        Self { types }
    }

    /// Restores the shipped catalog of navmesh set `version`.
    pub fn reset(&mut self, version: u32) {
        *self = Self::defaults_for(version);
    }

    /// The type in slot `id`.
    #[inline]
    pub fn get(&self, id: TraverseTypeId) -> &TraverseType {
        &self.types[id.index()]
    }

    /// Replaces the type in slot `id`.
    #[inline]
    pub fn set(&mut self, id: TraverseTypeId, traverse_type: TraverseType) {
        self.types[id.index()] = traverse_type;
    }

    /// Iterates all slots, including unused ones.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (TraverseTypeId, &TraverseType)> {
        self.types
            .iter()
            .enumerate()
            .filter_map(|(i, ty)| TraverseTypeId::new(i as u8).map(|id| (id, ty)))
    }

    /// Picks the crossing type whose envelope center lies closest to `query`.
    ///
    /// Only used slots that are part of `mask` are considered. Slots are scanned from the
    /// highest index down and only a strictly better score replaces the current pick,
    /// so the higher slot wins a tie.
    ///
    /// Returns `None` if no slot accepts the query.
    pub fn classify(&self, query: &TraverseQuery, mask: TraverseTypeMask) -> Option<TraverseTypeId> {
        let mut best = None;
        let mut smallest_score = f32::MAX;

        for (id, traverse_type) in self.iter().rev() {
            if traverse_type.is_unused() || !mask.contains(id) {
                continue;
            }
            let Some(score) = traverse_type.score(query) else {
                continue;
            };
            if score < smallest_score {
                smallest_score = score;
                best = Some(id);
            }
        }

        best
    }
}

/// The crossing types every [`TraverseAnimType`] can perform.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct AnimTraverseMasks {
    masks: [TraverseTypeMask; TraverseAnimType::COUNT],
}

impl Default for AnimTraverseMasks {
    fn default() -> Self {
        Self::defaults_for(crate::nav_mesh_set::NAVMESH_SET_VERSION)
    }
}

impl AnimTraverseMasks {
    /// Masks where no category can perform any crossing.
    pub fn empty() -> Self {
        Self {
            masks: [TraverseTypeMask::EMPTY; TraverseAnimType::COUNT],
        }
    }

    /// The masks shipped with navmesh set `version`.
    pub fn defaults_for(version: u32) -> Self {
        use TraverseAnimType::*;

        let legacy = version == LEGACY_NAVMESH_SET_VERSION;
        let mut masks = Self::empty();
        masks.set(Human, TraverseTypeMask(0x0000_013F));
        if legacy {
            masks.set(Spectre, TraverseTypeMask(0x000B_FF7E));
            masks.set(Stalker, TraverseTypeMask(0x001B_DF7F));
            masks.set(FragDrone, TraverseTypeMask(0x001B_FFFF));
        } else {
            masks.set(Spectre, TraverseTypeMask(0x0013_FF7E));
            masks.set(Stalker, TraverseTypeMask(0x0033_DF7F));
            masks.set(FragDrone, TraverseTypeMask(0x0033_FFFF));
        }
        masks.set(Pilot, TraverseTypeMask(0x0008_013F));
        masks.set(Prowler, TraverseTypeMask(0x0003_3FB7));
        masks.set(SuperSpectre, TraverseTypeMask(0x0003_3FB2));
        masks.set(Titan, TraverseTypeMask(0x0000_0030));
        masks.set(Goliath, TraverseTypeMask(0x0000_0030));
        masks
    }

    /// Restores the shipped masks of navmesh set `version`.
    pub fn reset(&mut self, version: u32) {
        *self = Self::defaults_for(version);
    }

    /// The mask of `anim_type`.
    #[inline]
    pub fn get(&self, anim_type: TraverseAnimType) -> TraverseTypeMask {
        self.masks[anim_type.index()]
    }

    /// Replaces the mask of `anim_type`.
    #[inline]
    pub fn set(&mut self, anim_type: TraverseAnimType, mask: TraverseTypeMask) {
        self.masks[anim_type.index()] = mask;
    }

    /// Every crossing type at least one category of `nav_mesh_type` can perform.
    pub fn mask_for_nav_mesh(&self, nav_mesh_type: NavMeshType) -> TraverseTypeMask {
        (0..nav_mesh_type.traverse_table_count())
            .map(|table| self.mask_for_table(nav_mesh_type, table))
            .fold(TraverseTypeMask::EMPTY, BitOr::bitor)
    }

    /// The crossing types the category owning table `table_index` can perform.
    /// Empty if the mesh has no such table.
    pub fn mask_for_table(&self, nav_mesh_type: NavMeshType, table_index: usize) -> TraverseTypeMask {
        nav_mesh_type
            .anim_type_for_table(table_index)
            .map(|anim_type| self.get(anim_type))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(index: u8) -> TraverseTypeId {
        TraverseTypeId::new(index).unwrap()
    }

    fn catalog_with(slots: &[(u8, TraverseType)]) -> TraverseTypeCatalog {
        let mut catalog = TraverseTypeCatalog::empty();
        for (index, ty) in slots {
            catalog.set(id(*index), *ty);
        }
        catalog
    }

    const ALL: TraverseTypeMask = TraverseTypeMask(u32::MAX);

    fn query(dist: f32, elevation: f32, slope: f32) -> TraverseQuery {
        TraverseQuery {
            dist,
            elevation,
            slope,
            ..Default::default()
        }
    }

    #[test]
    fn picks_the_only_enclosing_slot() {
        let catalog = catalog_with(&[
            (3, TraverseType::new(0.0, 100.0, 0.0, 50.0, 0.0, 45.0, -1.0, false)),
            (9, TraverseType::new(200.0, 400.0, 100.0, 300.0, 30.0, 80.0, -1.0, false)),
        ]);
        assert_eq!(catalog.classify(&query(50.0, 25.0, 20.0), ALL), Some(id(3)));
        assert_eq!(catalog.classify(&query(300.0, 200.0, 50.0), ALL), Some(id(9)));
        assert_eq!(catalog.classify(&query(150.0, 25.0, 20.0), ALL), None);
    }

    #[test]
    fn ranges_are_inclusive() {
        let catalog = catalog_with(&[(
            1,
            TraverseType::new(10.0, 20.0, 0.0, 5.0, 0.0, 10.0, -1.0, false),
        )]);
        assert_eq!(catalog.classify(&query(10.0, 5.0, 10.0), ALL), Some(id(1)));
        assert_eq!(catalog.classify(&query(20.0, 0.0, 0.0), ALL), Some(id(1)));
        assert_eq!(catalog.classify(&query(20.01, 0.0, 0.0), ALL), None);
    }

    #[test]
    fn unused_and_masked_slots_never_match() {
        let mut catalog = catalog_with(&[(
            5,
            TraverseType::new(0.0, 100.0, 0.0, 50.0, 0.0, 45.0, -1.0, false),
        )]);
        assert_eq!(catalog.classify(&query(0.0, 0.0, 0.0), ALL), Some(id(5)));
        assert_eq!(catalog.classify(&query(0.0, 0.0, 0.0), TraverseTypeMask(!(1 << 5))), None);

        // Zeroed distances and elevations mark the slot unused even with a slope range.
        catalog.set(id(5), TraverseType::new(0.0, 0.0, 0.0, 0.0, 0.0, 45.0, -1.0, false));
        assert_eq!(catalog.classify(&query(0.0, 0.0, 0.0), ALL), None);
    }

    #[test]
    fn closest_center_wins() {
        let catalog = catalog_with(&[
            (2, TraverseType::new(0.0, 100.0, 0.0, 100.0, 0.0, 90.0, -1.0, false)),
            (6, TraverseType::new(60.0, 100.0, 0.0, 100.0, 0.0, 90.0, -1.0, false)),
        ]);
        assert_eq!(catalog.classify(&query(62.0, 50.0, 45.0), ALL), Some(id(2)));
        assert_eq!(catalog.classify(&query(75.0, 50.0, 45.0), ALL), Some(id(6)));
        assert_eq!(catalog.classify(&query(30.0, 50.0, 45.0), ALL), Some(id(2)));
    }

    #[test]
    fn exact_tie_goes_to_the_higher_slot() {
        let ty = TraverseType::new(0.0, 100.0, 0.0, 100.0, 0.0, 90.0, -1.0, false);
        let catalog = catalog_with(&[(4, ty), (12, ty), (7, ty)]);
        assert_eq!(catalog.classify(&query(13.0, 77.0, 3.0), ALL), Some(id(12)));
        let lower_only = TraverseTypeMask(1 << 4 | 1 << 7);
        assert_eq!(catalog.classify(&query(13.0, 77.0, 3.0), lower_only), Some(id(7)));
    }

    #[test]
    fn overlap_gating_at_the_trigger_elevation() {
        let exclusive = TraverseType::new(0.0, 100.0, 0.0, 100.0, 0.0, 90.0, 40.0, true);
        let inclusive = TraverseType {
            overlap_exclusive: false,
            ..exclusive
        };
        let one_end = TraverseQuery {
            dist: 50.0,
            elevation: 40.0,
            slope: 30.0,
            base_overlaps: true,
            land_overlaps: false,
        };

        let catalog = catalog_with(&[(8, exclusive)]);
        assert_eq!(catalog.classify(&one_end, ALL), Some(id(8)));
        let catalog = catalog_with(&[(8, inclusive)]);
        assert_eq!(catalog.classify(&one_end, ALL), None);

        let both_ends = TraverseQuery {
            land_overlaps: true,
            ..one_end
        };
        assert_eq!(catalog.classify(&both_ends, ALL), Some(id(8)));

        let below_trigger = TraverseQuery {
            elevation: 39.9,
            base_overlaps: false,
            ..one_end
        };
        assert_eq!(catalog.classify(&below_trigger, ALL), Some(id(8)));
    }

    #[test]
    fn default_catalog_classifies_a_short_hop() {
        let catalog = TraverseTypeCatalog::default();
        let masks = AnimTraverseMasks::default();
        let mask = masks.mask_for_nav_mesh(NavMeshType::Small);
        let short_hop = TraverseQuery {
            dist: 60.0,
            elevation: 24.0,
            slope: 20.0,
            base_overlaps: true,
            land_overlaps: true,
        };
        assert_eq!(catalog.classify(&short_hop, mask), Some(id(1)));

        // Titans can't do short hops.
        let titan = masks.mask_for_nav_mesh(NavMeshType::Large);
        assert_eq!(catalog.classify(&short_hop, titan), None);
    }

    #[test]
    fn tall_climbs_shift_with_the_set_version() {
        let legacy = TraverseTypeCatalog::defaults_for(LEGACY_NAVMESH_SET_VERSION);
        let current = TraverseTypeCatalog::defaults_for(8);
        assert!(!legacy.get(id(19)).is_unused());
        assert!(legacy.get(id(21)).is_unused());
        assert!(current.get(id(19)).is_unused());
        assert_eq!(legacy.get(id(19)), current.get(id(20)));
        assert_eq!(legacy.get(id(20)), current.get(id(21)));
    }

    #[test]
    fn small_mesh_mask_is_union_of_its_categories() {
        let masks = AnimTraverseMasks::defaults_for(8);
        let union = TraverseAnimType::SMALL_HULL_TYPES
            .iter()
            .fold(TraverseTypeMask::EMPTY, |acc, ty| acc | masks.get(*ty));
        assert_eq!(masks.mask_for_nav_mesh(NavMeshType::Small), union);
        assert_eq!(
            masks.mask_for_nav_mesh(NavMeshType::MedShort),
            masks.get(TraverseAnimType::Prowler)
        );
        assert_eq!(
            masks.mask_for_table(NavMeshType::Small, 2),
            masks.get(TraverseAnimType::Stalker)
        );
        assert_eq!(masks.mask_for_table(NavMeshType::Large, 1), TraverseTypeMask::EMPTY);
    }

    #[test]
    fn mask_iterates_its_types() {
        let mask: TraverseTypeMask = [id(1), id(5), id(31)].into_iter().collect();
        assert_eq!(mask.0, 1 << 1 | 1 << 5 | 1 << 31);
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![id(1), id(5), id(31)]);
    }
}
