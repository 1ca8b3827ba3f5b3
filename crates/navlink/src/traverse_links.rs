//! Builds the traverse links of a whole mesh, one tile at a time.
//!
//! Finding the polygon edges that could form a portal is the job of a
//! [`TraverseLinkConnector`]. Everything the connector needs to decide whether a portal
//! becomes a link is bundled behind [`TraverseLinkPolicy`], which [`TraverseLinkBuilder`]
//! implements on top of the classifier, the validator and a [`LinkRegistry`].

use glam::Vec3;
use thiserror::Error;

use crate::{
    config::TraverseLinkConfig,
    link_registry::{LinkRegistry, RegistryError},
    link_validator::{LinkValidator, PortalGeometry, WalkableParams},
    math::quantize_traverse_dist,
    nav_mesh::{NavMesh, NavMeshError},
    poly_ref::{PolyRef, TileRef},
    tile_data::Link,
    traverse_type::{TraverseTypeId, TraverseTypeMask},
    world_geometry::Raycast,
};

/// The decisions a connector delegates while linking a tile.
pub trait TraverseLinkPolicy {
    /// Picks the crossing type of a portal. `None` if no type fits.
    fn classify(&self, portal: &PortalGeometry) -> Option<TraverseTypeId>;

    /// Whether an agent could cross the portal without clipping world geometry.
    fn is_feasible(&self, portal: &PortalGeometry, walkable: WalkableParams) -> bool;

    /// The type bits already recorded for the polygon pair.
    fn find_link(&self, base: PolyRef, land: PolyRef) -> Option<TraverseTypeMask>;

    /// Registers a new polygon pair.
    fn add_link(
        &mut self,
        base: PolyRef,
        land: PolyRef,
        type_bit: TraverseTypeMask,
    ) -> Result<(), RegistryError>;

    /// Records a further type for a pair registered with [`Self::add_link`].
    fn mark_link(&mut self, base: PolyRef, land: PolyRef, type_bit: TraverseTypeMask);
}

/// Parameters of one connector invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraverseLinkConnectParams {
    /// Minimum overlap of the two edges of a portal. `[Limit: >= 0]`
    pub min_edge_overlap: f32,
    /// Maximum misalignment of the two edges of a portal. `[Limit: 0..=1]`
    pub max_portal_align: f32,
    /// Accept at most one link per polygon pair.
    pub single_portal_per_pair: bool,
    /// `false` links polygons within the tile, `true` links them to neighbouring tiles.
    pub link_to_neighbor: bool,
}

impl TraverseLinkConnectParams {
    /// Takes the thresholds from `config`.
    pub fn from_config(config: &TraverseLinkConfig, link_to_neighbor: bool) -> Self {
        Self {
            min_edge_overlap: config.traverse_edge_min_overlap,
            max_portal_align: config.traverse_portal_max_align,
            single_portal_per_pair: config.single_portal_per_poly_pair,
            link_to_neighbor,
        }
    }
}

/// Finds portals between the polygons of a tile and turns the ones the policy accepts into
/// traverse links.
pub trait TraverseLinkConnector {
    /// Links the polygons of `tile`, either among themselves or to neighbouring tiles,
    /// depending on [`TraverseLinkConnectParams::link_to_neighbor`].
    ///
    /// Returns the number of links added.
    fn connect_traverse_links(
        &self,
        mesh: &mut NavMesh,
        tile: TileRef,
        params: &TraverseLinkConnectParams,
        policy: &mut dyn TraverseLinkPolicy,
    ) -> Result<usize, ConnectError>;
}

/// The policy used for rebuilds: the configured classifier, a raycasting validator and a
/// registry that is filled as links get accepted.
#[derive(Debug)]
pub struct TraverseLinkBuilder<'a, G: ?Sized> {
    config: &'a TraverseLinkConfig,
    validator: LinkValidator<'a, G>,
    mask: TraverseTypeMask,
    registry: LinkRegistry,
}

impl<'a, G: Raycast + ?Sized> TraverseLinkBuilder<'a, G> {
    /// Creates a builder with an empty registry.
    pub fn new(config: &'a TraverseLinkConfig, geometry: &'a G) -> Self {
        Self {
            config,
            validator: LinkValidator::new(config, geometry),
            mask: config.masks.mask_for_nav_mesh(config.nav_mesh_type),
            registry: LinkRegistry::new(),
        }
    }

    /// The registry filled so far.
    pub fn registry(&self) -> &LinkRegistry {
        &self.registry
    }

    /// Consumes the builder and returns its registry.
    pub fn into_registry(self) -> LinkRegistry {
        self.registry
    }
}

impl<G: Raycast + ?Sized> TraverseLinkPolicy for TraverseLinkBuilder<'_, G> {
    fn classify(&self, portal: &PortalGeometry) -> Option<TraverseTypeId> {
        self.config.catalog.classify(&portal.query(), self.mask)
    }

    fn is_feasible(&self, portal: &PortalGeometry, walkable: WalkableParams) -> bool {
        self.validator.is_feasible(portal, walkable)
    }

    fn find_link(&self, base: PolyRef, land: PolyRef) -> Option<TraverseTypeMask> {
        self.registry.find(base, land)
    }

    fn add_link(
        &mut self,
        base: PolyRef,
        land: PolyRef,
        type_bit: TraverseTypeMask,
    ) -> Result<(), RegistryError> {
        self.registry.add(base, land, type_bit)
    }

    fn mark_link(&mut self, base: PolyRef, land: PolyRef, type_bit: TraverseTypeMask) {
        self.registry.mark(base, land, type_bit);
    }
}

/// A pair of polygon edges that could form a portal, as found by an edge search.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PortalCandidate {
    /// The polygon the link would start at.
    pub base: PolyRef,
    /// The polygon the link would land on.
    pub land: PolyRef,
    /// The edge of the base polygon the link would leave through.
    pub base_edge: u8,
    /// The tile border the link crosses, or [`Link::INTERNAL`].
    pub side: u8,
    /// The anchor point on the base edge.
    pub base_pos: Vec3,
    /// The outward facing normal of the base edge.
    pub base_normal: Vec3,
    /// The anchor point on the landing edge.
    pub land_pos: Vec3,
    /// The outward facing normal of the landing edge.
    pub land_normal: Vec3,
    /// How much the two edges overlap. `[Limit: 0..=1]`
    pub edge_overlap: f32,
    /// How far the two edges deviate from being parallel. `[Limit: 0..=1]`
    pub portal_align: f32,
    /// Whether the base edge overlaps the landing polygon when seen from above.
    pub base_overlaps: bool,
    /// Whether the landing edge overlaps the base polygon when seen from above.
    pub land_overlaps: bool,
}

impl PortalCandidate {
    /// The geometry the policy judges the candidate by.
    pub fn geometry(&self) -> PortalGeometry {
        PortalGeometry::from_ends(
            self.base_pos,
            self.base_normal,
            self.land_pos,
            self.land_normal,
            self.base_overlaps,
            self.land_overlaps,
        )
    }
}

/// A connector over portal candidates found ahead of time.
///
/// Candidates are tried in list order, so the same list always yields the same links.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PortalListConnector {
    /// The candidates, in the order they are tried.
    pub candidates: Vec<PortalCandidate>,
}

impl PortalListConnector {
    /// Creates a connector over `candidates`.
    pub fn new(candidates: Vec<PortalCandidate>) -> Self {
        Self { candidates }
    }
}

impl TraverseLinkConnector for PortalListConnector {
    fn connect_traverse_links(
        &self,
        mesh: &mut NavMesh,
        tile: TileRef,
        params: &TraverseLinkConnectParams,
        policy: &mut dyn TraverseLinkPolicy,
    ) -> Result<usize, ConnectError> {
        let header = &mesh.tile(tile).ok_or(ConnectError::InvalidTile(tile))?.header;
        let walkable = WalkableParams {
            height: header.walkable_height,
            radius: header.walkable_radius,
        };
        let encoding = *mesh.encoding();

        let mut added = 0;
        for candidate in &self.candidates {
            if encoding.tile_of(candidate.base) != tile {
                continue;
            }
            let same_tile = encoding.tile_of(candidate.land) == tile;
            if same_tile == params.link_to_neighbor {
                continue;
            }
            if !mesh.is_valid_poly_ref(candidate.base) || !mesh.is_valid_poly_ref(candidate.land) {
                tracing::warn!(
                    "Skipping portal candidate {:?} -> {:?}, a polygon is not loaded",
                    candidate.base,
                    candidate.land
                );
                continue;
            }
            if candidate.edge_overlap < params.min_edge_overlap
                || candidate.portal_align > params.max_portal_align
            {
                continue;
            }

            let portal = candidate.geometry();
            let Some(traverse_type) = policy.classify(&portal) else {
                continue;
            };
            let existing = policy.find_link(candidate.base, candidate.land);
            if let Some(existing) = existing {
                if params.single_portal_per_pair || existing.contains(traverse_type) {
                    continue;
                }
            }
            if !policy.is_feasible(&portal, walkable) {
                continue;
            }

            if existing.is_some() {
                policy.mark_link(candidate.base, candidate.land, traverse_type.bit());
            } else {
                match policy.add_link(candidate.base, candidate.land, traverse_type.bit()) {
                    Ok(()) => {}
                    Err(RegistryError::AllocationFailure) => return Err(ConnectError::OutOfMemory),
                    Err(err @ RegistryError::Conflict { .. }) => {
                        tracing::warn!("Dropping traverse link: {err}");
                        continue;
                    }
                }
            }

            let link = Link {
                reference: candidate.land,
                edge: candidate.base_edge,
                side: candidate.side,
                traverse_type: Some(traverse_type),
                traverse_dist: quantize_traverse_dist(portal.dist),
            };
            match mesh.add_traverse_link(candidate.base, link) {
                Ok(()) => added += 1,
                Err(NavMeshError::LinkPoolExhausted(tile)) => {
                    return Err(ConnectError::OutOfLinks(tile));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(added)
    }
}

/// Replaces every traverse link of `mesh` with freshly built ones.
///
/// Tiles are processed in slot order, each one first among its own polygons and then
/// towards its neighbours. On failure the traverse links the mesh had before the call are
/// restored. On success the registry of all linked polygon pairs is returned.
pub fn rebuild_traverse_links<C, G>(
    mesh: &mut NavMesh,
    config: &TraverseLinkConfig,
    connector: &C,
    geometry: &G,
) -> Result<LinkRegistry, RebuildError>
where
    C: TraverseLinkConnector + ?Sized,
    G: Raycast + ?Sized,
{
    let snapshot = mesh.snapshot_links();
    let removed = mesh.remove_traverse_links();
    if removed > 0 {
        tracing::debug!("Removed {removed} existing traverse links");
    }

    let mut builder = TraverseLinkBuilder::new(config, geometry);
    match connect_all_tiles(mesh, config, connector, &mut builder) {
        Ok(added) => {
            tracing::info!(
                "Created {added} traverse links between {} polygon pairs",
                builder.registry().len()
            );
            Ok(builder.into_registry())
        }
        Err(err) => {
            tracing::error!("Failed to build traverse links: {err}");
            mesh.restore_links(snapshot);
            Err(err)
        }
    }
}

fn connect_all_tiles<C, G>(
    mesh: &mut NavMesh,
    config: &TraverseLinkConfig,
    connector: &C,
    builder: &mut TraverseLinkBuilder<'_, G>,
) -> Result<usize, RebuildError>
where
    C: TraverseLinkConnector + ?Sized,
    G: Raycast + ?Sized,
{
    let mut added = 0;
    for index in 0..mesh.max_tiles() {
        let Some(tile) = mesh.tile_ref_at(index) else {
            continue;
        };
        for link_to_neighbor in [false, true] {
            let params = TraverseLinkConnectParams::from_config(config, link_to_neighbor);
            let count = connector
                .connect_traverse_links(mesh, tile, &params, &mut *builder)
                .map_err(|source| RebuildError { tile, source })?;
            tracing::debug!(
                "Tile {index}: added {count} {} traverse links",
                if link_to_neighbor { "neighbour" } else { "internal" }
            );
            added += count;
        }
    }
    Ok(added)
}

/// Errors a connector can fail with.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectError {
    /// The tile isn't loaded.
    #[error("Tile {0:?} is not loaded")]
    InvalidTile(TileRef),
    /// A tile ran out of links.
    #[error("Tile {0:?} ran out of links")]
    OutOfLinks(TileRef),
    /// The link registry could not grow.
    #[error("Out of memory while registering traverse links")]
    OutOfMemory,
    /// The mesh rejected a link.
    #[error(transparent)]
    NavMesh(#[from] NavMeshError),
}

/// A rebuild failed. The mesh has been restored to its previous links.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Failed to link tile {tile:?}")]
pub struct RebuildError {
    /// The tile being linked when the failure occurred.
    pub tile: TileRef,
    /// What went wrong.
    #[source]
    pub source: ConnectError,
}
