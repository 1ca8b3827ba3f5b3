//! Disjoint poly groups and the static traverse tables built on top of them.
//!
//! Polygons that can reach each other by walking share a group. The static traverse tables
//! then record, per movement category, which groups can reach each other once the traverse
//! links that category can use are taken into account. Path queries use them to reject
//! unreachable goals without searching.

use std::collections::HashMap;

use thiserror::Error;

use crate::{
    config::NavMeshType,
    nav_mesh::{NavMesh, NavMeshError},
    poly_ref::PolyRef,
    tile_data::PolyType,
    traverse_type::{AnimTraverseMasks, TraverseTypeMask},
};

/// The group of polygons that haven't been assigned one.
pub const NULL_POLY_GROUP: u16 = 0;
/// The group of off-mesh polygons without a walkable neighbour.
pub const UNLINKED_POLY_GROUP: u16 = 1;
/// The first group id handed out to real groups.
pub const FIRST_USABLE_POLY_GROUP: u16 = 2;
/// Static traverse tables only carry information with at least one real group.
pub const MIN_POLY_GROUP_COUNT: u32 = 3;

/// What the group and table builders need to know.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticPathingParams {
    /// Decides the number of tables and the category each one belongs to.
    pub nav_mesh_type: NavMeshType,
    /// The crossing types every category may use.
    pub masks: AnimTraverseMasks,
    /// Merge groups that are only connected through traverse links.
    pub collapse_linked_poly_groups: bool,
}

impl From<&crate::config::TraverseLinkConfig> for StaticPathingParams {
    fn from(config: &crate::config::TraverseLinkConfig) -> Self {
        Self {
            nav_mesh_type: config.nav_mesh_type,
            masks: config.masks.clone(),
            collapse_linked_poly_groups: config.collapse_linked_poly_groups,
        }
    }
}

/// A square bit matrix over poly groups.
///
/// Row `a` has one bit per group, padded to whole 32-bit words. Bit `b` of row `a` is set
/// when group `b` can be reached from group `a`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraverseTable {
    group_count: usize,
    words: Vec<u32>,
}

impl TraverseTable {
    /// The number of 32-bit words per row.
    #[inline]
    pub fn words_per_row(group_count: usize) -> usize {
        group_count.div_ceil(32)
    }

    /// The size of a table over `group_count` groups. `[Units: bytes]`
    #[inline]
    pub fn byte_size(group_count: usize) -> usize {
        4 * group_count * Self::words_per_row(group_count)
    }

    /// Creates a table where no group reaches any other.
    pub fn new(group_count: usize) -> Result<Self, PolyGroupError> {
        let len = group_count * Self::words_per_row(group_count);
        let mut words = Vec::new();
        words
            .try_reserve_exact(len)
            .map_err(|_| PolyGroupError::OutOfMemory)?;
        words.resize(len, 0);
        Ok(Self { group_count, words })
    }

    /// Wraps the raw words of a table over `group_count` groups.
    /// `None` if the length doesn't match.
    pub fn from_words(group_count: usize, words: Vec<u32>) -> Option<Self> {
        (words.len() == group_count * Self::words_per_row(group_count))
            .then_some(Self { group_count, words })
    }

    /// The number of groups the table covers.
    #[inline]
    pub fn group_count(&self) -> usize {
        self.group_count
    }

    /// The raw words, row after row.
    #[inline]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Whether group `to` can be reached from group `from`. `false` if either is out of range.
    pub fn is_reachable(&self, from: usize, to: usize) -> bool {
        if from >= self.group_count || to >= self.group_count {
            return false;
        }
        let word = self.words[from * Self::words_per_row(self.group_count) + to / 32];
        word & (1 << (to % 32)) != 0
    }

    fn set_reachable(&mut self, from: usize, to: usize) {
        let index = from * Self::words_per_row(self.group_count) + to / 32;
        self.words[index] |= 1 << (to % 32);
    }
}

/// Union-find with path halving and union by rank.
#[derive(Debug, Clone)]
pub(crate) struct UnionFind {
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub(crate) fn new(len: usize) -> Result<Self, PolyGroupError> {
        let mut parent = Vec::new();
        let mut rank = Vec::new();
        parent
            .try_reserve_exact(len)
            .and_then(|_| rank.try_reserve_exact(len))
            .map_err(|_| PolyGroupError::OutOfMemory)?;
        parent.extend(0..len as u32);
        rank.resize(len, 0);
        Ok(Self { parent, rank })
    }

    pub(crate) fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] as usize != x {
            let grandparent = self.parent[self.parent[x] as usize];
            self.parent[x] = grandparent;
            x = grandparent as usize;
        }
        x
    }

    pub(crate) fn union(&mut self, a: usize, b: usize) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return;
        }
        match self.rank[root_a].cmp(&self.rank[root_b]) {
            std::cmp::Ordering::Less => self.parent[root_a] = root_b as u32,
            std::cmp::Ordering::Greater => self.parent[root_b] = root_a as u32,
            std::cmp::Ordering::Equal => {
                self.parent[root_b] = root_a as u32;
                self.rank[root_a] = self.rank[root_a].saturating_add(1);
            }
        }
    }
}

/// Maps poly references to dense indices over all loaded tiles, in slot order.
struct PolyIndex {
    /// The index of the first polygon of every tile slot, `None` for empty slots.
    offsets: Vec<Option<usize>>,
    len: usize,
}

impl PolyIndex {
    fn new(mesh: &NavMesh) -> Self {
        let mut offsets = vec![None; mesh.max_tiles()];
        let mut len = 0;
        for (tile_ref, data) in mesh.tiles() {
            let (_, tile) = mesh.encoding().decode_tile(tile_ref);
            offsets[tile as usize] = Some(len);
            len += data.polys.len();
        }
        Self { offsets, len }
    }

    fn get(&self, mesh: &NavMesh, poly_ref: PolyRef) -> Option<usize> {
        if !mesh.is_valid_poly_ref(poly_ref) {
            return None;
        }
        let (_, tile, poly) = mesh.encoding().decode_poly(poly_ref);
        self.offsets
            .get(tile as usize)
            .copied()
            .flatten()
            .map(|offset| offset + poly as usize)
    }
}

/// Group ids for every loaded polygon, not yet written to the mesh.
#[derive(Debug, Clone)]
struct PolyGroups {
    /// One entry per loaded polygon, tiles in slot order.
    ids: Vec<u16>,
    /// Includes the reserved groups.
    count: u32,
}

impl PolyGroups {
    /// Splits the flat id list into one list per loaded tile.
    fn per_tile(&self, mesh: &NavMesh) -> Vec<Vec<u16>> {
        let mut ids = self.ids.iter().copied();
        mesh.tiles()
            .map(|(_, data)| ids.by_ref().take(data.polys.len()).collect())
            .collect()
    }
}

/// Iterates `(index, poly_ref, poly)` for every loaded polygon, in [`PolyIndex`] order.
fn indexed_polys(
    mesh: &NavMesh,
) -> impl Iterator<Item = (usize, PolyRef, &crate::tile_data::Poly)> + '_ {
    mesh.tiles()
        .flat_map(move |(tile_ref, data)| {
            data.polys
                .iter()
                .enumerate()
                .map(move |(i, poly)| (mesh.poly_ref(tile_ref, i as u32), poly))
        })
        .enumerate()
        .map(|(index, (poly_ref, poly))| (index, poly_ref, poly))
}

fn compute_poly_groups(mesh: &NavMesh, collapse: bool) -> Result<PolyGroups, PolyGroupError> {
    let index = PolyIndex::new(mesh);
    let mut uf = UnionFind::new(index.len)?;

    for (i, from, poly) in indexed_polys(mesh) {
        if poly.poly_type == PolyType::OffMeshConnection {
            continue;
        }
        for link in poly.walkable_links() {
            let j = index
                .get(mesh, link.reference)
                .ok_or(PolyGroupError::DanglingLink {
                    from,
                    to: link.reference,
                })?;
            if is_ground(mesh, link.reference) {
                uf.union(i, j);
            }
        }
    }

    let mut ids = vec![NULL_POLY_GROUP; index.len];
    let mut root_ids = HashMap::new();
    let mut next_id = FIRST_USABLE_POLY_GROUP as u32;
    for (i, _, poly) in indexed_polys(mesh) {
        if poly.poly_type == PolyType::OffMeshConnection {
            continue;
        }
        let root = uf.find(i);
        let id = match root_ids.get(&root) {
            Some(id) => *id,
            None => {
                let id = group_id(next_id)?;
                next_id += 1;
                root_ids.insert(root, id);
                id
            }
        };
        ids[i] = id;
    }

    // Off-mesh connections join the group of the ground they start on.
    for (i, _, poly) in indexed_polys(mesh) {
        if poly.poly_type != PolyType::OffMeshConnection {
            continue;
        }
        ids[i] = poly
            .walkable_links()
            .filter(|link| is_ground(mesh, link.reference))
            .find_map(|link| index.get(mesh, link.reference))
            .map_or(UNLINKED_POLY_GROUP, |j| ids[j]);
    }

    let mut groups = PolyGroups { ids, count: next_id };
    if collapse {
        collapse_linked_groups(mesh, &index, &mut groups, TraverseTypeMask(u32::MAX))?;
    }
    Ok(groups)
}

/// Merges groups connected by traverse links whose type is part of `mask`, then hands out
/// contiguous ids again.
fn collapse_linked_groups(
    mesh: &NavMesh,
    index: &PolyIndex,
    groups: &mut PolyGroups,
    mask: TraverseTypeMask,
) -> Result<(), PolyGroupError> {
    let mut uf = union_linked_groups(mesh, index, &groups.ids, groups.count as usize, mask)?;

    let mut remap = HashMap::new();
    let mut next_id = FIRST_USABLE_POLY_GROUP as u32;
    for id in groups.ids.iter_mut() {
        if *id < FIRST_USABLE_POLY_GROUP {
            continue;
        }
        let root = uf.find(*id as usize);
        *id = match remap.get(&root) {
            Some(id) => *id,
            None => {
                let new_id = group_id(next_id)?;
                next_id += 1;
                remap.insert(root, new_id);
                new_id
            }
        };
    }
    groups.count = next_id;
    Ok(())
}

/// A union-find over group ids where groups joined by a permitted traverse link are united.
fn union_linked_groups(
    mesh: &NavMesh,
    index: &PolyIndex,
    ids: &[u16],
    group_count: usize,
    mask: TraverseTypeMask,
) -> Result<UnionFind, PolyGroupError> {
    let mut uf = UnionFind::new(group_count)?;
    for (i, from, poly) in indexed_polys(mesh) {
        for link in poly.traverse_links() {
            let Some(traverse_type) = link.traverse_type else {
                continue;
            };
            let j = index
                .get(mesh, link.reference)
                .ok_or(PolyGroupError::DanglingLink {
                    from,
                    to: link.reference,
                })?;
            if !mask.contains(traverse_type) {
                continue;
            }
            let (a, b) = (ids[i], ids[j]);
            if a < FIRST_USABLE_POLY_GROUP || b < FIRST_USABLE_POLY_GROUP {
                continue;
            }
            uf.union(a as usize, b as usize);
        }
    }
    Ok(uf)
}

fn is_ground(mesh: &NavMesh, poly_ref: PolyRef) -> bool {
    mesh.get_tile_and_poly_by_ref(poly_ref)
        .is_some_and(|(_, poly)| poly.poly_type == PolyType::Ground)
}

fn group_id(id: u32) -> Result<u16, PolyGroupError> {
    u16::try_from(id).map_err(|_| PolyGroupError::TooManyGroups)
}

fn compute_traverse_tables(
    mesh: &NavMesh,
    groups: &PolyGroups,
    params: &StaticPathingParams,
) -> Result<Vec<TraverseTable>, PolyGroupError> {
    if groups.count < MIN_POLY_GROUP_COUNT {
        return Ok(Vec::new());
    }
    let index = PolyIndex::new(mesh);
    let group_count = groups.count as usize;
    let table_count = params.nav_mesh_type.traverse_table_count();

    let mut tables = Vec::with_capacity(table_count);
    for table_index in 0..table_count {
        let mask = params
            .masks
            .mask_for_table(params.nav_mesh_type, table_index);
        let mut uf = union_linked_groups(mesh, &index, &groups.ids, group_count, mask)?;

        let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
        for group in 0..group_count {
            members.entry(uf.find(group)).or_default().push(group);
        }
        let mut table = TraverseTable::new(group_count)?;
        for members in members.values() {
            for &a in members {
                for &b in members {
                    table.set_reachable(a, b);
                }
            }
        }
        tables.push(table);
    }
    Ok(tables)
}

fn groups_from_mesh(mesh: &NavMesh) -> PolyGroups {
    PolyGroups {
        ids: indexed_polys(mesh).map(|(_, _, poly)| poly.group_id).collect(),
        count: mesh.params().poly_group_count,
    }
}

/// Partitions the polygons of `mesh` into disjoint groups and writes the group ids back.
///
/// Existing static traverse tables no longer match the new groups and are dropped.
/// Returns the number of groups, including the reserved ones.
pub fn create_disjoint_poly_groups(
    mesh: &mut NavMesh,
    params: &StaticPathingParams,
) -> Result<u32, PolyGroupError> {
    let groups = compute_poly_groups(mesh, params.collapse_linked_poly_groups)?;
    mesh.assign_poly_groups(&groups.per_tile(mesh));
    mesh.set_traverse_tables(groups.count, Vec::new())?;
    tracing::debug!("Created {} disjoint poly groups", groups.count);
    Ok(groups.count)
}

/// Builds the static traverse tables from the group ids currently stored in `mesh`.
///
/// Meshes with fewer than [`MIN_POLY_GROUP_COUNT`] groups get no tables.
pub fn create_traverse_table_data(
    mesh: &mut NavMesh,
    params: &StaticPathingParams,
) -> Result<(), PolyGroupError> {
    let groups = groups_from_mesh(mesh);
    if groups.count >= MIN_POLY_GROUP_COUNT {
        if let Some(&id) = groups.ids.iter().find(|id| u32::from(**id) >= groups.count) {
            return Err(PolyGroupError::GroupOutOfRange {
                group: id,
                group_count: groups.count,
            });
        }
    }
    let tables = compute_traverse_tables(mesh, &groups, params)?;
    tracing::debug!(
        "Created {} traverse tables over {} poly groups",
        tables.len(),
        groups.count
    );
    mesh.set_traverse_tables(groups.count, tables)?;
    Ok(())
}

/// Builds poly groups and static traverse tables in one go.
///
/// Nothing is written to `mesh` unless both succeed.
pub fn create_static_pathing_data(
    mesh: &mut NavMesh,
    params: &StaticPathingParams,
) -> Result<(), PolyGroupError> {
    let groups = compute_poly_groups(mesh, params.collapse_linked_poly_groups)?;
    let tables = compute_traverse_tables(mesh, &groups, params)?;
    if tables.is_empty() {
        tracing::warn!(
            "Only {} poly groups, skipping static traverse tables",
            groups.count
        );
    }
    tracing::info!(
        "Created {} poly groups and {} traverse tables",
        groups.count,
        tables.len()
    );
    mesh.assign_poly_groups(&groups.per_tile(mesh));
    mesh.set_traverse_tables(groups.count, tables)?;
    Ok(())
}

/// Errors that can occur while building poly groups or traverse tables.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolyGroupError {
    /// More groups than a polygon can store an id for.
    #[error("Too many disjoint poly groups, at most {} are supported", u16::MAX)]
    TooManyGroups,
    /// A link leads to a polygon that isn't loaded.
    #[error("Link from {from:?} leads to invalid polygon {to:?}")]
    DanglingLink {
        /// The polygon owning the link.
        from: PolyRef,
        /// Where the link leads.
        to: PolyRef,
    },
    /// A polygon carries a group id the mesh doesn't know about.
    #[error("Poly group {group} is out of range, the mesh has {group_count} groups")]
    GroupOutOfRange {
        /// The offending group id.
        group: u16,
        /// The group count of the mesh.
        group_count: u32,
    },
    /// Scratch data could not be allocated.
    #[error("Failed to allocate poly group scratch data")]
    OutOfMemory,
    /// The mesh rejected the result.
    #[error(transparent)]
    NavMesh(#[from] NavMeshError),
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::{
        nav_mesh::NavMeshParams,
        poly_ref::TileRef,
        tile_data::{Link, Poly, TileData, TileHeader},
        traverse_type::TraverseTypeId,
    };

    #[test]
    fn table_size_rounds_rows_to_words() {
        assert_eq!(TraverseTable::byte_size(3), 12);
        assert_eq!(TraverseTable::byte_size(32), 4 * 32);
        assert_eq!(TraverseTable::byte_size(33), 4 * 33 * 2);
    }

    #[test]
    fn union_find_merges_transitively() {
        let mut uf = UnionFind::new(5).unwrap();
        uf.union(0, 1);
        uf.union(3, 4);
        uf.union(1, 4);
        assert_eq!(uf.find(0), uf.find(3));
        assert_ne!(uf.find(0), uf.find(2));
    }

    /// One tile with `count` ground polys, each walkably linked to the next one within its chain.
    fn chained_mesh(chains: &[usize]) -> (NavMesh, TileRef) {
        let mut mesh = NavMesh::new(NavMeshParams {
            max_tiles: 2,
            max_polys: 16,
            ..Default::default()
        })
        .unwrap();
        let count: usize = chains.iter().sum();
        let tile = TileData {
            header: TileHeader {
                max_link_count: 64,
                ..Default::default()
            },
            vertices: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            polys: (0..count)
                .map(|_| Poly {
                    vertices: vec![0, 1, 2],
                    ..Default::default()
                })
                .collect(),
        };
        let tile_ref = mesh.add_tile(tile).unwrap();
        let mut start = 0;
        for &len in chains {
            for i in start..start + len - 1 {
                let a = mesh.poly_ref(tile_ref, i as u32);
                let b = mesh.poly_ref(tile_ref, i as u32 + 1);
                let data = mesh.tile_mut(tile_ref).unwrap();
                data.polys[i].links.push(Link::walkable(b, 0, Link::INTERNAL));
                data.polys[i + 1].links.push(Link::walkable(a, 1, Link::INTERNAL));
            }
            start += len;
        }
        (mesh, tile_ref)
    }

    fn traverse(mesh: &mut NavMesh, tile_ref: TileRef, from: u32, to: u32, ty: u8) {
        let link = Link {
            reference: mesh.poly_ref(tile_ref, to),
            edge: 0,
            side: Link::INTERNAL,
            traverse_type: TraverseTypeId::new(ty),
            traverse_dist: 1,
        };
        mesh.add_traverse_link(mesh.poly_ref(tile_ref, from), link)
            .unwrap();
    }

    fn params(collapse: bool) -> StaticPathingParams {
        StaticPathingParams {
            nav_mesh_type: NavMeshType::Small,
            masks: AnimTraverseMasks::default(),
            collapse_linked_poly_groups: collapse,
        }
    }

    #[test]
    fn walkable_islands_form_groups() {
        let (mut mesh, tile_ref) = chained_mesh(&[2, 3, 1]);
        let count = create_disjoint_poly_groups(&mut mesh, &params(false)).unwrap();
        assert_eq!(count, 5);
        let groups: Vec<_> = mesh
            .tile(tile_ref)
            .unwrap()
            .polys
            .iter()
            .map(|poly| poly.group_id)
            .collect();
        assert_eq!(groups, vec![2, 2, 3, 3, 3, 4]);
    }

    #[test]
    fn traverse_links_split_groups_unless_collapsed() {
        let (mut mesh, tile_ref) = chained_mesh(&[1, 1]);
        traverse(&mut mesh, tile_ref, 0, 1, 1);
        assert_eq!(
            create_disjoint_poly_groups(&mut mesh, &params(false)).unwrap(),
            4
        );
        assert_eq!(
            create_disjoint_poly_groups(&mut mesh, &params(true)).unwrap(),
            3
        );
    }

    #[test]
    fn tables_follow_category_masks() {
        let (mut mesh, tile_ref) = chained_mesh(&[1, 1, 1]);
        // Type 1 is a short hop every small hull can do, type 17 is spectre and up only.
        traverse(&mut mesh, tile_ref, 0, 1, 1);
        traverse(&mut mesh, tile_ref, 1, 2, 17);
        create_static_pathing_data(&mut mesh, &params(false)).unwrap();
        assert_eq!(mesh.params().poly_group_count, 5);
        assert_eq!(mesh.traverse_tables().len(), 5);
        assert_eq!(mesh.params().traverse_table_size, 20);

        let a = mesh.poly_ref(tile_ref, 0);
        let b = mesh.poly_ref(tile_ref, 1);
        let c = mesh.poly_ref(tile_ref, 2);
        // Human
        assert!(mesh.is_goal_poly_reachable(a, b, 0));
        assert!(mesh.is_goal_poly_reachable(b, a, 0));
        assert!(!mesh.is_goal_poly_reachable(a, c, 0));
        // Spectre
        assert!(mesh.is_goal_poly_reachable(a, c, 1));
        // Every group reaches itself.
        assert!(mesh.is_goal_poly_reachable(c, c, 0));
    }

    #[test]
    fn tables_are_skipped_without_real_groups() {
        let mut mesh = NavMesh::new(NavMeshParams::default()).unwrap();
        create_static_pathing_data(&mut mesh, &params(false)).unwrap();
        assert_eq!(mesh.params().poly_group_count, 2);
        assert!(mesh.traverse_tables().is_empty());
        assert_eq!(mesh.params().traverse_table_size, 0);
    }

    #[test]
    fn off_mesh_polys_join_their_neighbour() {
        let (mut mesh, tile_ref) = chained_mesh(&[2, 1]);
        let ground = mesh.poly_ref(tile_ref, 1);
        let data = mesh.tile_mut(tile_ref).unwrap();
        data.polys[2].poly_type = PolyType::OffMeshConnection;
        data.polys[2]
            .links
            .push(Link::walkable(ground, 0, Link::INTERNAL));
        create_disjoint_poly_groups(&mut mesh, &params(false)).unwrap();
        let data = mesh.tile(tile_ref).unwrap();
        assert_eq!(data.polys[2].group_id, data.polys[1].group_id);

        let data = mesh.tile_mut(tile_ref).unwrap();
        data.polys[2].links.clear();
        create_disjoint_poly_groups(&mut mesh, &params(false)).unwrap();
        assert_eq!(
            mesh.tile(tile_ref).unwrap().polys[2].group_id,
            UNLINKED_POLY_GROUP
        );
    }

    #[test]
    fn dangling_links_fail_without_touching_the_mesh() {
        let (mut mesh, tile_ref) = chained_mesh(&[1, 1]);
        create_static_pathing_data(&mut mesh, &params(false)).unwrap();
        let before = mesh.tile(tile_ref).cloned();
        let stale = mesh.encoding().encode_poly(7, 1, 0);
        mesh.tile_mut(tile_ref).unwrap().polys[0]
            .links
            .push(Link::walkable(stale, 0, 0));
        let expected = mesh.tile(tile_ref).cloned();
        assert!(matches!(
            create_static_pathing_data(&mut mesh, &params(false)),
            Err(PolyGroupError::DanglingLink { .. })
        ));
        assert_eq!(mesh.tile(tile_ref).cloned(), expected);
        assert_ne!(before, expected);
        assert_eq!(mesh.traverse_tables().len(), 5);
    }
}
