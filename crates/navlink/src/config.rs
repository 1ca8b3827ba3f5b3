use crate::{
    nav_mesh_set::NAVMESH_SET_VERSION,
    traverse_type::{AnimTraverseMasks, TraverseTypeCatalog},
};
#[cfg(feature = "bevy_reflect")]
use bevy_reflect::prelude::*;

/// The size class of a navmesh. Every class is built for one family of hulls and
/// carries its own set of static traverse tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "snake_case"))]
#[cfg_attr(feature = "bevy_reflect", derive(Reflect))]
pub enum NavMeshType {
    /// Human sized hulls. The only class with more than one traverse table.
    #[default]
    Small,
    /// Short but wide hulls.
    MedShort,
    /// Medium hulls.
    Medium,
    /// Titan sized hulls.
    Large,
    /// The biggest hulls.
    ExtraLarge,
}

impl NavMeshType {
    /// All classes, in file order.
    pub const ALL: [Self; 5] = [
        Self::Small,
        Self::MedShort,
        Self::Medium,
        Self::Large,
        Self::ExtraLarge,
    ];

    /// The name used in navmesh file names, e.g. `mp_box_small.nm`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::MedShort => "med_short",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::ExtraLarge => "extra_large",
        }
    }

    /// Parses a name produced by [`Self::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.name() == name)
    }

    /// How many static traverse tables a mesh of this class stores.
    pub fn traverse_table_count(self) -> usize {
        match self {
            Self::Small => TraverseAnimType::SMALL_HULL_TYPES.len(),
            _ => 1,
        }
    }

    /// The movement category that owns the first (or only) traverse table.
    pub fn first_anim_type(self) -> TraverseAnimType {
        match self {
            Self::Small => TraverseAnimType::Human,
            Self::MedShort => TraverseAnimType::Prowler,
            Self::Medium => TraverseAnimType::SuperSpectre,
            Self::Large => TraverseAnimType::Titan,
            Self::ExtraLarge => TraverseAnimType::Goliath,
        }
    }

    /// The movement category that owns table `table_index`.
    /// `None` if the class has no such table.
    pub fn anim_type_for_table(self, table_index: usize) -> Option<TraverseAnimType> {
        match self {
            Self::Small => TraverseAnimType::SMALL_HULL_TYPES.get(table_index).copied(),
            _ => (table_index == 0).then(|| self.first_anim_type()),
        }
    }

    /// The voxel height the class is rasterized with. `[Units: wu]`
    pub fn cell_height(self) -> f32 {
        match self {
            Self::Small | Self::MedShort | Self::Medium => 4.0,
            Self::Large | Self::ExtraLarge => 7.5,
        }
    }
}

/// A movement category. Each category has its own mask of crossing types it can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "snake_case"))]
#[cfg_attr(feature = "bevy_reflect", derive(Reflect))]
pub enum TraverseAnimType {
    /// Humans, grunts and the like.
    Human,
    /// Spectres.
    Spectre,
    /// Stalkers.
    Stalker,
    /// Frag drones.
    FragDrone,
    /// Pilots.
    Pilot,
    /// Prowlers.
    Prowler,
    /// Super spectres.
    SuperSpectre,
    /// Titans.
    Titan,
    /// Goliaths.
    Goliath,
}

impl TraverseAnimType {
    /// The number of categories.
    pub const COUNT: usize = 9;

    /// All categories, in index order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Human,
        Self::Spectre,
        Self::Stalker,
        Self::FragDrone,
        Self::Pilot,
        Self::Prowler,
        Self::SuperSpectre,
        Self::Titan,
        Self::Goliath,
    ];

    /// The categories of [`NavMeshType::Small`], in table order.
    pub const SMALL_HULL_TYPES: [Self; 5] = [
        Self::Human,
        Self::Spectre,
        Self::Stalker,
        Self::FragDrone,
        Self::Pilot,
    ];

    /// The index of the category.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Everything the traverse link and static pathing builds need to know.
///
/// Built once, usually with [`TraverseLinkConfigBuilder`], and passed by reference to
/// [`rebuild_traverse_links`](crate::rebuild_traverse_links) and
/// [`create_static_pathing_data`](crate::create_static_pathing_data).
/// The catalog and masks may be replaced between builds, never during one.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TraverseLinkConfig {
    /// The size class of the mesh being built.
    pub nav_mesh_type: NavMeshType,

    /// The crossing types links are classified against.
    pub catalog: TraverseTypeCatalog,

    /// The crossing types every movement category may use.
    pub masks: AnimTraverseMasks,

    /// The voxel height the mesh was rasterized with. `[Units: wu]`
    ///
    /// Only used to derive the dynamic ray offset, see [`Self::traverse_ray_dynamic_offset`].
    pub cell_height: f32,

    /// The maximum slope an agent can walk on. `[Units: degrees]`
    ///
    /// Links flatter than this run over potentially walkable ground and get checked for
    /// overhanging geometry along their span.
    pub agent_max_slope: f32,

    /// Extra distance added on top of the ledge span when offsetting the high end of a link
    /// away from its ledge. `[Units: wu]`
    ///
    /// Ledge spans are rarely perfectly regular. A small extra offset keeps rays from clipping
    /// geometry the agent would clear in practice. Values above 40 start to cause flat links
    /// to clip into geometry.
    pub traverse_ray_extra_offset: f32,

    /// Scale the ledge offset with the slope of the link instead of using a fixed
    /// `walkable_radius + extra_offset`.
    pub traverse_ray_dynamic_offset: bool,

    /// Minimum fraction two polygon edges have to overlap to form a portal. `[Limit: >= 0]`
    pub traverse_edge_min_overlap: f32,

    /// Maximum deviation allowed between the directions of the two edges of a portal. `[Limit: 0..=1]`
    pub traverse_portal_max_align: f32,

    /// Accept at most one link per polygon pair, no matter how many portals connect them.
    pub single_portal_per_poly_pair: bool,

    /// Merge polygon groups that are only connected through traverse links.
    pub collapse_linked_poly_groups: bool,
}

impl Default for TraverseLinkConfig {
    fn default() -> Self {
        TraverseLinkConfigBuilder::default().build()
    }
}

/// A builder for [`TraverseLinkConfig`].
/// The defaults are the values the shipped navmeshes are built with.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(default))]
#[cfg_attr(feature = "bevy_reflect", derive(Reflect))]
pub struct TraverseLinkConfigBuilder {
    /// The size class of the mesh being built.
    pub nav_mesh_type: NavMeshType,
    /// The navmesh set version whose default catalog and masks should be used.
    pub set_version: u32,
    /// Overrides the class' default cell height. `[Units: wu]`
    pub cell_height: Option<f32>,
    /// See [`TraverseLinkConfig::agent_max_slope`].
    pub agent_max_slope: f32,
    /// See [`TraverseLinkConfig::traverse_ray_extra_offset`].
    pub traverse_ray_extra_offset: f32,
    /// See [`TraverseLinkConfig::traverse_ray_dynamic_offset`].
    pub traverse_ray_dynamic_offset: bool,
    /// See [`TraverseLinkConfig::traverse_edge_min_overlap`].
    pub traverse_edge_min_overlap: f32,
    /// See [`TraverseLinkConfig::traverse_portal_max_align`].
    pub traverse_portal_max_align: f32,
    /// See [`TraverseLinkConfig::single_portal_per_poly_pair`].
    pub single_portal_per_poly_pair: bool,
    /// See [`TraverseLinkConfig::collapse_linked_poly_groups`].
    pub collapse_linked_poly_groups: bool,
}

impl Default for TraverseLinkConfigBuilder {
    fn default() -> Self {
        Self {
            nav_mesh_type: NavMeshType::Small,
            set_version: NAVMESH_SET_VERSION,
            cell_height: None,
            // Player collision hull slope; yields slopes very close to the in-game ones.
            agent_max_slope: 45.573,
            traverse_ray_extra_offset: 4.0,
            traverse_ray_dynamic_offset: true,
            traverse_edge_min_overlap: 1.0e-4,
            traverse_portal_max_align: 0.5,
            single_portal_per_poly_pair: false,
            collapse_linked_poly_groups: false,
        }
    }
}

impl TraverseLinkConfigBuilder {
    /// Builds a [`TraverseLinkConfig`] with the default catalog and masks of [`Self::set_version`].
    pub fn build(self) -> TraverseLinkConfig {
        TraverseLinkConfig {
            nav_mesh_type: self.nav_mesh_type,
            catalog: TraverseTypeCatalog::defaults_for(self.set_version),
            masks: AnimTraverseMasks::defaults_for(self.set_version),
            cell_height: self
                .cell_height
                .unwrap_or_else(|| self.nav_mesh_type.cell_height()),
            agent_max_slope: self.agent_max_slope,
            traverse_ray_extra_offset: self.traverse_ray_extra_offset,
            traverse_ray_dynamic_offset: self.traverse_ray_dynamic_offset,
            traverse_edge_min_overlap: self.traverse_edge_min_overlap,
            traverse_portal_max_align: self.traverse_portal_max_align,
            single_portal_per_poly_pair: self.single_portal_per_poly_pair,
            collapse_linked_poly_groups: self.collapse_linked_poly_groups,
        }
    }
}
