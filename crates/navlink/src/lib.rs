#![doc = include_str!("../../../readme.md")]

mod config;
mod link_registry;
mod link_validator;
pub mod math;
mod nav_mesh;
mod nav_mesh_set;
mod poly_groups;
mod poly_ref;
mod tile_data;
mod traverse_links;
mod traverse_type;
mod world_geometry;

pub use config::{NavMeshType, TraverseAnimType, TraverseLinkConfig, TraverseLinkConfigBuilder};
pub use link_registry::{LinkRegistry, PolyPairKey, RegistryError};
pub use link_validator::{
    LinkValidator, PortalGeometry, TRAVERSE_LINK_TRIPLE_TRACE_THRESHOLD, WalkableParams,
};
pub use nav_mesh::{LinkSnapshot, NavMesh, NavMeshError, NavMeshParams};
pub use nav_mesh_set::{
    LEGACY_NAVMESH_SET_VERSION, NAVMESH_SET_MAGIC, NAVMESH_SET_VERSION, NavMeshSetCodec,
    NavMeshSetError, NavMeshSetHeader, nav_mesh_file_name,
};
pub use poly_groups::{
    FIRST_USABLE_POLY_GROUP, MIN_POLY_GROUP_COUNT, NULL_POLY_GROUP, PolyGroupError,
    StaticPathingParams, TraverseTable, UNLINKED_POLY_GROUP, create_disjoint_poly_groups,
    create_static_pathing_data, create_traverse_table_data,
};
pub use poly_ref::{PolyRef, RefEncoding, RefEncodingError, TileRef};
pub use tile_data::{
    Link, Poly, PolyFlags, PolyType, TILE_DATA_MAGIC, TILE_DATA_VERSION, TileData,
    TileDataError, TileHeader,
};
pub use traverse_links::{
    ConnectError, PortalCandidate, PortalListConnector, RebuildError, TraverseLinkBuilder,
    TraverseLinkConnectParams, TraverseLinkConnector, TraverseLinkPolicy,
    rebuild_traverse_links,
};
pub use traverse_type::{
    AnimTraverseMasks, NUM_TRAVERSE_TYPES, TraverseQuery, TraverseType, TraverseTypeCatalog,
    TraverseTypeId, TraverseTypeMask,
};
pub use world_geometry::{Raycast, TraceMask, WorldGeometry};
