use glam::Vec3;
use thiserror::Error;

use crate::{
    poly_groups::{MIN_POLY_GROUP_COUNT, TraverseTable},
    poly_ref::{PolyRef, RefEncoding, RefEncodingError, TileRef},
    tile_data::{Link, Poly, TileData},
};

/// The parameters a [`NavMesh`] is initialized with. Stored verbatim in navmesh set files.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavMeshParams {
    /// The world space origin of the tile grid.
    pub origin: Vec3,
    /// The width of a tile along the x-axis. `[Units: wu]`
    pub tile_width: f32,
    /// The height of a tile along the y-axis. `[Units: wu]`
    pub tile_height: f32,
    /// The maximum number of tiles the mesh can hold.
    pub max_tiles: u32,
    /// The maximum number of polygons per tile.
    pub max_polys: u32,
    /// The number of disjoint poly groups, including the two reserved ones.
    pub poly_group_count: u32,
    /// The size of every static traverse table. `[Units: bytes]`
    pub traverse_table_size: u32,
    /// The number of static traverse tables.
    pub traverse_table_count: u32,
}

impl Default for NavMeshParams {
    fn default() -> Self {
        Self {
            origin: Vec3::ZERO,
            tile_width: 1024.0,
            tile_height: 1024.0,
            max_tiles: 256,
            max_polys: 2048,
            poly_group_count: 0,
            traverse_table_size: 0,
            traverse_table_count: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct TileSlot {
    salt: u32,
    data: Option<TileData>,
    /// Links stored in `data`. Cleared whenever the links may have changed behind our back.
    link_count: Option<usize>,
}

impl TileSlot {
    fn set_data(&mut self, data: Option<TileData>) -> Option<TileData> {
        self.link_count = None;
        std::mem::replace(&mut self.data, data)
    }

    fn data_mut(&mut self) -> Option<&mut TileData> {
        self.link_count = None;
        self.data.as_mut()
    }
}

/// A tiled polygon mesh together with the static pathing data built on top of it.
///
/// Tiles live in a fixed arena of [`NavMeshParams::max_tiles`] slots. Every slot carries a
/// salt that is bumped when its tile is removed, so references to removed tiles go stale
/// instead of silently pointing at whatever tile moves in next.
#[derive(Debug, Clone)]
pub struct NavMesh {
    params: NavMeshParams,
    encoding: RefEncoding,
    slots: Vec<TileSlot>,
    traverse_tables: Vec<TraverseTable>,
}

impl NavMesh {
    /// Creates an empty mesh.
    pub fn new(params: NavMeshParams) -> Result<Self, NavMeshError> {
        let encoding = RefEncoding::new(params.max_tiles, params.max_polys)?;
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(params.max_tiles as usize)
            .map_err(|_| NavMeshError::OutOfMemory)?;
        slots.resize_with(params.max_tiles as usize, || TileSlot {
            salt: 1,
            data: None,
            link_count: None,
        });
        Ok(Self {
            params,
            encoding,
            slots,
            traverse_tables: Vec::new(),
        })
    }

    /// The parameters of the mesh.
    #[inline]
    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    /// The reference layout of the mesh.
    #[inline]
    pub fn encoding(&self) -> &RefEncoding {
        &self.encoding
    }

    /// The number of tile slots, loaded or not.
    #[inline]
    pub fn max_tiles(&self) -> usize {
        self.slots.len()
    }

    /// The number of loaded tiles.
    pub fn tile_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.data.is_some()).count()
    }

    /// Adds a tile to the first free slot.
    pub fn add_tile(&mut self, data: TileData) -> Result<TileRef, NavMeshError> {
        self.check_tile(&data)?;
        let Some(index) = self.slots.iter().position(|slot| slot.data.is_none()) else {
            return Err(NavMeshError::OutOfTiles);
        };
        let slot = &mut self.slots[index];
        slot.set_data(Some(data));
        Ok(self.encoding.encode_tile(slot.salt, index as u32))
    }

    /// Adds a tile at the slot and with the salt encoded in `tile_ref`.
    ///
    /// Used when loading saved meshes, so the poly references stored in tile data stay valid.
    pub fn add_tile_at(&mut self, tile_ref: TileRef, data: TileData) -> Result<(), NavMeshError> {
        let (salt, index) = self.encoding.decode_tile(tile_ref);
        if tile_ref.is_null() || salt == 0 || index as usize >= self.slots.len() {
            return Err(NavMeshError::InvalidTileRef(tile_ref));
        }
        if self.slots[index as usize].data.is_some() {
            return Err(NavMeshError::SlotOccupied(tile_ref));
        }
        self.check_tile(&data)?;
        let slot = &mut self.slots[index as usize];
        slot.salt = salt;
        slot.set_data(Some(data));
        Ok(())
    }

    fn check_tile(&self, data: &TileData) -> Result<(), NavMeshError> {
        if data.polys.len() > self.params.max_polys as usize {
            return Err(NavMeshError::TooManyPolys {
                poly_count: data.polys.len(),
                max_polys: self.params.max_polys,
            });
        }
        let header = &data.header;
        if self.tile_at(header.x, header.y, header.layer).is_some() {
            return Err(NavMeshError::TileAlreadyLoaded {
                x: header.x,
                y: header.y,
                layer: header.layer,
            });
        }
        Ok(())
    }

    /// Removes a tile and returns its data.
    ///
    /// Links of other tiles that lead into the removed tile are removed as well.
    pub fn remove_tile(&mut self, tile_ref: TileRef) -> Result<TileData, NavMeshError> {
        let index = self
            .tile_index(tile_ref)
            .ok_or(NavMeshError::InvalidTileRef(tile_ref))?;
        let slot = &mut self.slots[index];
        let Some(data) = slot.set_data(None) else {
            return Err(NavMeshError::InvalidTileRef(tile_ref));
        };
        slot.salt = (slot.salt + 1) & self.encoding.salt_mask();
        if slot.salt == 0 {
            slot.salt = 1;
        }

        let encoding = self.encoding;
        for poly in self.polys_mut() {
            poly.links
                .retain(|link| encoding.tile_of(link.reference) != tile_ref);
        }
        Ok(data)
    }

    fn tile_index(&self, tile_ref: TileRef) -> Option<usize> {
        if tile_ref.is_null() {
            return None;
        }
        let (salt, index) = self.encoding.decode_tile(tile_ref);
        let slot = self.slots.get(index as usize)?;
        (slot.salt == salt && slot.data.is_some()).then_some(index as usize)
    }

    /// The reference of the tile in slot `index`, if one is loaded.
    pub fn tile_ref_at(&self, index: usize) -> Option<TileRef> {
        let slot = self.slots.get(index)?;
        slot.data
            .as_ref()
            .map(|_| self.encoding.encode_tile(slot.salt, index as u32))
    }

    /// The reference of the tile at a grid position.
    pub fn tile_at(&self, x: i32, y: i32, layer: i32) -> Option<TileRef> {
        self.tiles()
            .find(|(_, data)| {
                data.header.x == x && data.header.y == y && data.header.layer == layer
            })
            .map(|(tile_ref, _)| tile_ref)
    }

    /// Iterates the loaded tiles in slot order.
    pub fn tiles(&self) -> impl Iterator<Item = (TileRef, &TileData)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.data
                .as_ref()
                .map(|data| (self.encoding.encode_tile(slot.salt, index as u32), data))
        })
    }

    /// The data of a loaded tile.
    pub fn tile(&self, tile_ref: TileRef) -> Option<&TileData> {
        let index = self.tile_index(tile_ref)?;
        self.slots[index].data.as_ref()
    }

    /// The data of a loaded tile.
    pub fn tile_mut(&mut self, tile_ref: TileRef) -> Option<&mut TileData> {
        let index = self.tile_index(tile_ref)?;
        self.slots[index].data_mut()
    }

    /// The reference of polygon `poly` of `tile_ref`.
    #[inline]
    pub fn poly_ref(&self, tile_ref: TileRef, poly: u32) -> PolyRef {
        let (salt, tile) = self.encoding.decode_tile(tile_ref);
        self.encoding.encode_poly(salt, tile, poly)
    }

    /// Iterates the references of all polygons of a tile.
    pub fn poly_refs(&self, tile_ref: TileRef) -> impl Iterator<Item = PolyRef> + '_ {
        let poly_count = self.tile(tile_ref).map_or(0, |data| data.polys.len());
        (0..poly_count as u32).map(move |poly| self.poly_ref(tile_ref, poly))
    }

    /// Resolves a polygon reference. `None` if it is null, stale or out of range.
    pub fn get_tile_and_poly_by_ref(&self, poly_ref: PolyRef) -> Option<(&TileData, &Poly)> {
        let (tile, poly) = self.resolve(poly_ref)?;
        let data = self.slots[tile].data.as_ref()?;
        Some((data, &data.polys[poly]))
    }

    /// Whether `poly_ref` refers to a loaded polygon.
    #[inline]
    pub fn is_valid_poly_ref(&self, poly_ref: PolyRef) -> bool {
        self.resolve(poly_ref).is_some()
    }

    fn resolve(&self, poly_ref: PolyRef) -> Option<(usize, usize)> {
        if poly_ref.is_null() {
            return None;
        }
        let (salt, tile, poly) = self.encoding.decode_poly(poly_ref);
        let slot = self.slots.get(tile as usize)?;
        if slot.salt != salt {
            return None;
        }
        let data = slot.data.as_ref()?;
        ((poly as usize) < data.polys.len()).then_some((tile as usize, poly as usize))
    }

    /// Appends a traverse link to polygon `from`.
    ///
    /// Fails with [`NavMeshError::LinkPoolExhausted`] if the tile of `from` has no free link left.
    pub fn add_traverse_link(&mut self, from: PolyRef, link: Link) -> Result<(), NavMeshError> {
        debug_assert!(link.is_traverse_link());
        let (tile, poly) = self
            .resolve(from)
            .ok_or(NavMeshError::InvalidPolyRef(from))?;
        let tile_ref = self.encoding.tile_of(from);
        let TileSlot {
            data: Some(data),
            link_count,
            ..
        } = &mut self.slots[tile]
        else {
            return Err(NavMeshError::InvalidPolyRef(from));
        };
        let count = link_count.get_or_insert_with(|| data.link_count());
        if *count >= data.header.max_link_count as usize {
            return Err(NavMeshError::LinkPoolExhausted(tile_ref));
        }
        data.polys[poly].links.push(link);
        *count += 1;
        Ok(())
    }

    /// Removes every traverse link and returns how many were removed.
    pub fn remove_traverse_links(&mut self) -> usize {
        let mut removed = 0;
        for poly in self.polys_mut() {
            let before = poly.links.len();
            poly.links.retain(|link| !link.is_traverse_link());
            removed += before - poly.links.len();
        }
        removed
    }

    /// Captures the links of every polygon, see [`NavMesh::restore_links`].
    pub fn snapshot_links(&self) -> LinkSnapshot {
        LinkSnapshot {
            tiles: self
                .tiles()
                .map(|(tile_ref, data)| {
                    let links = data.polys.iter().map(|poly| poly.links.clone()).collect();
                    (tile_ref, links)
                })
                .collect(),
        }
    }

    /// Puts back the links captured by [`NavMesh::snapshot_links`].
    /// Tiles that were removed or replaced since are skipped.
    pub fn restore_links(&mut self, snapshot: LinkSnapshot) {
        for (tile_ref, links) in snapshot.tiles {
            let Some(data) = self.tile_mut(tile_ref) else {
                continue;
            };
            if data.polys.len() != links.len() {
                continue;
            }
            for (poly, links) in data.polys.iter_mut().zip(links) {
                poly.links = links;
            }
        }
    }

    fn polys_mut(&mut self) -> impl Iterator<Item = &mut Poly> {
        self.slots
            .iter_mut()
            .filter_map(TileSlot::data_mut)
            .flat_map(|data| data.polys.iter_mut())
    }

    /// The static traverse tables, one per movement category of the mesh.
    #[inline]
    pub fn traverse_tables(&self) -> &[TraverseTable] {
        &self.traverse_tables
    }

    /// Replaces the poly group count and the static traverse tables.
    ///
    /// All tables must cover `poly_group_count` groups.
    pub fn set_traverse_tables(
        &mut self,
        poly_group_count: u32,
        tables: Vec<TraverseTable>,
    ) -> Result<(), NavMeshError> {
        if let Some(table) = tables
            .iter()
            .find(|table| table.group_count() != poly_group_count as usize)
        {
            return Err(NavMeshError::TableSizeMismatch {
                poly_group_count,
                table_group_count: table.group_count(),
            });
        }
        self.params.poly_group_count = poly_group_count;
        self.params.traverse_table_count = tables.len() as u32;
        self.params.traverse_table_size = if tables.is_empty() {
            0
        } else {
            TraverseTable::byte_size(poly_group_count as usize) as u32
        };
        self.traverse_tables = tables;
        Ok(())
    }

    /// Writes the group ids computed by the group builder, in tile slot and polygon order.
    pub(crate) fn assign_poly_groups(&mut self, group_ids: &[Vec<u16>]) {
        let tiles = self.slots.iter_mut().filter_map(|slot| slot.data.as_mut());
        for (data, ids) in tiles.zip(group_ids) {
            for (poly, id) in data.polys.iter_mut().zip(ids) {
                poly.group_id = *id;
            }
        }
    }

    /// The disjoint poly group of a polygon. `None` if the reference is invalid.
    pub fn poly_group(&self, poly_ref: PolyRef) -> Option<u16> {
        self.get_tile_and_poly_by_ref(poly_ref)
            .map(|(_, poly)| poly.group_id)
    }

    /// Whether the movement category owning table `table_index` can get from `from` to `to`.
    ///
    /// Falls back to `true` when there is no static pathing data to decide with, the path
    /// query will find out the hard way.
    pub fn is_goal_poly_reachable(&self, from: PolyRef, to: PolyRef, table_index: usize) -> bool {
        if self.params.poly_group_count < MIN_POLY_GROUP_COUNT {
            return true;
        }
        let (Some(from_group), Some(to_group)) = (self.poly_group(from), self.poly_group(to))
        else {
            return false;
        };
        let Some(table) = self.traverse_tables.get(table_index) else {
            return true;
        };
        table.is_reachable(from_group as usize, to_group as usize)
    }
}

/// The links of every polygon at one point in time.
#[derive(Debug, Clone, Default)]
pub struct LinkSnapshot {
    tiles: Vec<(TileRef, Vec<Vec<Link>>)>,
}

/// Errors that can occur when editing a [`NavMesh`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NavMeshError {
    /// The parameters yield an unusable reference layout.
    #[error("Invalid navmesh parameters: {0}")]
    Params(#[from] RefEncodingError),
    /// The tile arena could not be allocated.
    #[error("Failed to allocate the tile arena")]
    OutOfMemory,
    /// Every tile slot is taken.
    #[error("All tile slots are taken")]
    OutOfTiles,
    /// The tile reference is null, stale or out of range.
    #[error("Invalid tile reference {0:?}")]
    InvalidTileRef(TileRef),
    /// The slot the tile reference points at is taken.
    #[error("Tile slot of {0:?} is already taken")]
    SlotOccupied(TileRef),
    /// The polygon reference is null, stale or out of range.
    #[error("Invalid polygon reference {0:?}")]
    InvalidPolyRef(PolyRef),
    /// A tile is already loaded at the same grid position.
    #[error("A tile is already loaded at ({x}, {y}, layer {layer})")]
    TileAlreadyLoaded {
        /// The x position in the tile grid.
        x: i32,
        /// The y position in the tile grid.
        y: i32,
        /// The layer.
        layer: i32,
    },
    /// The tile has more polygons than the mesh allows.
    #[error("Tile has {poly_count} polygons, but at most {max_polys} are allowed")]
    TooManyPolys {
        /// The number of polygons of the tile.
        poly_count: usize,
        /// [`NavMeshParams::max_polys`]
        max_polys: u32,
    },
    /// The link pool of a tile is full.
    #[error("Tile {0:?} has no free links left")]
    LinkPoolExhausted(TileRef),
    /// A traverse table doesn't match the poly group count.
    #[error("Traverse table covers {table_group_count} groups, but the mesh has {poly_group_count}")]
    TableSizeMismatch {
        /// The poly group count of the mesh.
        poly_group_count: u32,
        /// The group count of the table.
        table_group_count: usize,
    },
}
