//! The contents of one navmesh tile and their byte encoding.
//!
//! Tiles are stored as opaque blobs inside a navmesh set file. The encoding is
//! deterministic, decoding a blob and encoding it again yields the same bytes.

use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use thiserror::Error;

use crate::{poly_ref::PolyRef, traverse_type::TraverseTypeId};

/// Magic number of tile data blobs (`'DNAV'`).
pub const TILE_DATA_MAGIC: u32 = u32::from_be_bytes(*b"DNAV");

/// Current tile data version.
pub const TILE_DATA_VERSION: u32 = 1;

/// Stored in place of a traverse type for ordinary links.
const NO_TRAVERSE_TYPE: u8 = 0xff;

bitflags::bitflags! {
    /// Flags of a polygon, used by path queries to filter polygons.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct PolyFlags: u16 {
        /// Ground polygons.
        const WALK = 1;
        /// Polygons that are too small to stand on.
        const TOO_SMALL = 1 << 1;
        /// Polygons connected through an off-mesh link.
        const HAS_NEIGHBOUR = 1 << 2;
        /// Polygons that are excluded from path queries.
        const DISABLED = 1 << 3;

        // Keep unknown bits, tiles built by other tools may use them.
        const _ = !0;
    }
}

impl Default for PolyFlags {
    fn default() -> Self {
        Self::WALK
    }
}

/// How a polygon is traversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum PolyType {
    /// A polygon on the walkable surface.
    #[default]
    Ground = 0,
    /// A two-vertex polygon representing an off-mesh connection.
    OffMeshConnection = 1,
}

impl TryFrom<u8> for PolyType {
    type Error = TileDataError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ground),
            1 => Ok(Self::OffMeshConnection),
            _ => Err(TileDataError::InvalidPolyType(value)),
        }
    }
}

/// A directed connection from one polygon to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Link {
    /// The polygon the link leads to.
    pub reference: PolyRef,
    /// The index of the polygon edge the link leaves through.
    pub edge: u8,
    /// The tile border the link crosses, or [`Link::INTERNAL`].
    pub side: u8,
    /// The crossing type of a traverse link. `None` for ordinary links.
    pub traverse_type: Option<TraverseTypeId>,
    /// The crossing distance, quantized. See [`quantize_traverse_dist`](crate::math::quantize_traverse_dist).
    pub traverse_dist: u8,
}

impl Link {
    /// The [`Link::side`] of links that stay inside their tile.
    pub const INTERNAL: u8 = 0xff;

    /// Creates an ordinary walkable link.
    pub fn walkable(reference: PolyRef, edge: u8, side: u8) -> Self {
        Self {
            reference,
            edge,
            side,
            traverse_type: None,
            traverse_dist: 0,
        }
    }

    /// Whether this is a traverse link.
    #[inline]
    pub fn is_traverse_link(&self) -> bool {
        self.traverse_type.is_some()
    }
}

/// A convex polygon of a tile.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Poly {
    /// Indices into [`TileData::vertices`], counter-clockwise seen from above.
    pub vertices: Vec<u16>,
    /// Filter flags.
    pub flags: PolyFlags,
    /// The area id.
    pub area: u8,
    /// How the polygon is traversed.
    pub poly_type: PolyType,
    /// The disjoint group the polygon belongs to.
    pub group_id: u16,
    /// Outgoing links.
    pub links: Vec<Link>,
}

impl Poly {
    /// Outgoing links that are not traverse links.
    pub fn walkable_links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(|link| !link.is_traverse_link())
    }

    /// Outgoing traverse links.
    pub fn traverse_links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(|link| link.is_traverse_link())
    }
}

/// Tile metadata.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TileHeader {
    /// The x position of the tile in the tile grid.
    pub x: i32,
    /// The y position of the tile in the tile grid.
    pub y: i32,
    /// The layer of the tile.
    pub layer: i32,
    /// User defined id.
    pub user_id: u32,
    /// The height of the hull the tile was built for. `[Units: wu]`
    pub walkable_height: f32,
    /// The radius of the hull the tile was built for. `[Units: wu]`
    pub walkable_radius: f32,
    /// The maximum ledge the hull can step up. `[Units: wu]`
    pub walkable_climb: f32,
    /// The minimum bounds of the tile.
    pub bmin: Vec3,
    /// The maximum bounds of the tile.
    pub bmax: Vec3,
    /// The number of links the tile can hold across all of its polygons.
    pub max_link_count: u32,
}

/// The contents of one tile.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TileData {
    /// Tile metadata.
    pub header: TileHeader,
    /// The polygon vertices.
    pub vertices: Vec<Vec3>,
    /// The polygons.
    pub polys: Vec<Poly>,
}

impl TileData {
    /// The number of links over all polygons.
    pub fn link_count(&self) -> usize {
        self.polys.iter().map(|poly| poly.links.len()).sum()
    }

    /// Decodes a blob produced by [`TileData::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TileDataError> {
        let mut reader = Cursor::new(bytes);
        let data = Self::read_from(&mut reader)?;
        let trailing = bytes.len() - reader.position() as usize;
        if trailing != 0 {
            return Err(TileDataError::TrailingBytes(trailing));
        }
        Ok(data)
    }

    /// Encodes the tile into a blob.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TileDataError> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self, TileDataError> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != TILE_DATA_MAGIC {
            return Err(TileDataError::WrongMagic(magic));
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != TILE_DATA_VERSION {
            return Err(TileDataError::WrongVersion(version));
        }

        let x = reader.read_i32::<LittleEndian>()?;
        let y = reader.read_i32::<LittleEndian>()?;
        let layer = reader.read_i32::<LittleEndian>()?;
        let user_id = reader.read_u32::<LittleEndian>()?;
        let vert_count = reader.read_u32::<LittleEndian>()?;
        let poly_count = reader.read_u32::<LittleEndian>()?;
        let header = TileHeader {
            x,
            y,
            layer,
            user_id,
            walkable_height: reader.read_f32::<LittleEndian>()?,
            walkable_radius: reader.read_f32::<LittleEndian>()?,
            walkable_climb: reader.read_f32::<LittleEndian>()?,
            bmin: read_vec3(reader)?,
            bmax: read_vec3(reader)?,
            max_link_count: reader.read_u32::<LittleEndian>()?,
        };

        // Counts come from untrusted data, let the reads fail instead of preallocating.
        let vertices = (0..vert_count)
            .map(|_| read_vec3(reader))
            .collect::<io::Result<Vec<_>>>()?;

        let mut polys = Vec::new();
        let mut link_count = 0_usize;
        for poly_index in 0..poly_count as usize {
            let poly = read_poly(reader)?;
            if let Some(&vertex) = poly
                .vertices
                .iter()
                .find(|i| **i as usize >= vertices.len())
            {
                return Err(TileDataError::VertexOutOfBounds {
                    poly: poly_index,
                    vertex,
                });
            }
            link_count += poly.links.len();
            polys.push(poly);
        }
        if link_count > header.max_link_count as usize {
            return Err(TileDataError::TooManyLinks {
                link_count,
                max_link_count: header.max_link_count,
            });
        }

        Ok(Self {
            header,
            vertices,
            polys,
        })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), TileDataError> {
        let header = &self.header;
        writer.write_u32::<LittleEndian>(TILE_DATA_MAGIC)?;
        writer.write_u32::<LittleEndian>(TILE_DATA_VERSION)?;
        writer.write_i32::<LittleEndian>(header.x)?;
        writer.write_i32::<LittleEndian>(header.y)?;
        writer.write_i32::<LittleEndian>(header.layer)?;
        writer.write_u32::<LittleEndian>(header.user_id)?;
        writer.write_u32::<LittleEndian>(count::<u32>(self.vertices.len(), "vertices")?)?;
        writer.write_u32::<LittleEndian>(count::<u32>(self.polys.len(), "polygons")?)?;
        writer.write_f32::<LittleEndian>(header.walkable_height)?;
        writer.write_f32::<LittleEndian>(header.walkable_radius)?;
        writer.write_f32::<LittleEndian>(header.walkable_climb)?;
        write_vec3(writer, header.bmin)?;
        write_vec3(writer, header.bmax)?;
        writer.write_u32::<LittleEndian>(header.max_link_count)?;

        for vertex in &self.vertices {
            write_vec3(writer, *vertex)?;
        }
        for poly in &self.polys {
            write_poly(writer, poly)?;
        }
        Ok(())
    }
}

fn read_vec3<R: Read>(reader: &mut R) -> io::Result<Vec3> {
    Ok(Vec3::new(
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
    ))
}

fn write_vec3<W: Write>(writer: &mut W, v: Vec3) -> io::Result<()> {
    writer.write_f32::<LittleEndian>(v.x)?;
    writer.write_f32::<LittleEndian>(v.y)?;
    writer.write_f32::<LittleEndian>(v.z)
}

fn read_poly<R: Read>(reader: &mut R) -> Result<Poly, TileDataError> {
    let vert_count = reader.read_u8()?;
    let poly_type = PolyType::try_from(reader.read_u8()?)?;
    let area = reader.read_u8()?;
    let flags = PolyFlags::from_bits_retain(reader.read_u16::<LittleEndian>()?);
    let group_id = reader.read_u16::<LittleEndian>()?;
    let link_count = reader.read_u16::<LittleEndian>()?;
    let vertices = (0..vert_count)
        .map(|_| reader.read_u16::<LittleEndian>())
        .collect::<io::Result<Vec<_>>>()?;
    let links = (0..link_count)
        .map(|_| read_link(reader))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Poly {
        vertices,
        flags,
        area,
        poly_type,
        group_id,
        links,
    })
}

fn write_poly<W: Write>(writer: &mut W, poly: &Poly) -> Result<(), TileDataError> {
    writer.write_u8(count::<u8>(poly.vertices.len(), "polygon vertices")?)?;
    writer.write_u8(poly.poly_type as u8)?;
    writer.write_u8(poly.area)?;
    writer.write_u16::<LittleEndian>(poly.flags.bits())?;
    writer.write_u16::<LittleEndian>(poly.group_id)?;
    writer.write_u16::<LittleEndian>(count::<u16>(poly.links.len(), "polygon links")?)?;
    for vertex in &poly.vertices {
        writer.write_u16::<LittleEndian>(*vertex)?;
    }
    for link in &poly.links {
        writer.write_u64::<LittleEndian>(link.reference.0)?;
        writer.write_u8(link.edge)?;
        writer.write_u8(link.side)?;
        writer.write_u8(link.traverse_type.map_or(NO_TRAVERSE_TYPE, TraverseTypeId::get))?;
        writer.write_u8(link.traverse_dist)?;
    }
    Ok(())
}

fn read_link<R: Read>(reader: &mut R) -> Result<Link, TileDataError> {
    let reference = PolyRef(reader.read_u64::<LittleEndian>()?);
    let edge = reader.read_u8()?;
    let side = reader.read_u8()?;
    let traverse_type = match reader.read_u8()? {
        NO_TRAVERSE_TYPE => None,
        raw => Some(TraverseTypeId::new(raw).ok_or(TileDataError::InvalidTraverseType(raw))?),
    };
    let traverse_dist = reader.read_u8()?;
    Ok(Link {
        reference,
        edge,
        side,
        traverse_type,
        traverse_dist,
    })
}

fn count<T: TryFrom<usize>>(len: usize, what: &'static str) -> Result<T, TileDataError> {
    T::try_from(len).map_err(|_| TileDataError::TooLarge { what, len })
}

/// Errors that can occur when encoding or decoding tile data.
#[derive(Debug, Error)]
pub enum TileDataError {
    /// The blob ended early.
    #[error("Tile data ended unexpectedly")]
    UnexpectedEof,
    /// Any other IO error.
    #[error("Failed to access tile data: {0}")]
    Io(io::Error),
    /// The blob doesn't start with [`TILE_DATA_MAGIC`].
    #[error("Tile data has wrong magic {0:#010x}")]
    WrongMagic(u32),
    /// The blob was written with an unsupported version.
    #[error("Tile data has unsupported version {0}, expected {TILE_DATA_VERSION}")]
    WrongVersion(u32),
    /// A polygon has an unknown type.
    #[error("Unknown polygon type {0}")]
    InvalidPolyType(u8),
    /// A link has a traverse type outside the catalog.
    #[error("Traverse type {0} is outside the catalog")]
    InvalidTraverseType(u8),
    /// A polygon references a vertex that doesn't exist.
    #[error("Polygon {poly} references missing vertex {vertex}")]
    VertexOutOfBounds {
        /// The polygon index.
        poly: usize,
        /// The vertex index.
        vertex: u16,
    },
    /// The tile holds more links than its link pool allows.
    #[error("Tile holds {link_count} links, but only has room for {max_link_count}")]
    TooManyLinks {
        /// The number of links in the tile.
        link_count: usize,
        /// The size of the link pool.
        max_link_count: u32,
    },
    /// A collection is too large for its count field.
    #[error("Too many {what} to encode: {len}")]
    TooLarge {
        /// What was counted.
        what: &'static str,
        /// The offending length.
        len: usize,
    },
    /// Bytes were left over after the tile.
    #[error("{0} bytes left over after tile data")]
    TrailingBytes(usize),
}

impl From<io::Error> for TileDataError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::UnexpectedEof
        } else {
            Self::Io(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_tile() -> TileData {
        TileData {
            header: TileHeader {
                x: 2,
                y: -1,
                layer: 0,
                user_id: 7,
                walkable_height: 72.0,
                walkable_radius: 16.0,
                walkable_climb: 18.0,
                bmin: Vec3::new(0.0, 0.0, -5.0),
                bmax: Vec3::new(100.0, 100.0, 5.0),
                max_link_count: 8,
            },
            vertices: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(100.0, 0.0, 0.0),
                Vec3::new(100.0, 100.0, 0.0),
                Vec3::new(0.0, 100.0, 0.0),
            ],
            polys: vec![Poly {
                vertices: vec![0, 1, 2, 3],
                flags: PolyFlags::WALK | PolyFlags::from_bits_retain(1 << 9),
                area: 1,
                poly_type: PolyType::Ground,
                group_id: 4,
                links: vec![
                    Link::walkable(PolyRef(0x1_0001), 1, Link::INTERNAL),
                    Link {
                        reference: PolyRef(0xdead_beef),
                        edge: 2,
                        side: 0,
                        traverse_type: TraverseTypeId::new(17),
                        traverse_dist: 31,
                    },
                ],
            }],
        }
    }

    #[test]
    fn decode_encode_is_identity() {
        let bytes = quad_tile().to_bytes().unwrap();
        let decoded = TileData::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, quad_tile());
        assert_eq!(decoded.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let bytes = quad_tile().to_bytes().unwrap();
        assert!(matches!(
            TileData::from_bytes(&bytes[..bytes.len() - 1]),
            Err(TileDataError::UnexpectedEof)
        ));
        let mut padded = bytes.clone();
        padded.push(0);
        assert!(matches!(
            TileData::from_bytes(&padded),
            Err(TileDataError::TrailingBytes(1))
        ));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut bytes = quad_tile().to_bytes().unwrap();
        bytes[0] ^= 0xff;
        assert!(matches!(
            TileData::from_bytes(&bytes),
            Err(TileDataError::WrongMagic(_))
        ));
    }

    #[test]
    fn link_pool_is_enforced_on_decode() {
        let mut tile = quad_tile();
        tile.header.max_link_count = 1;
        let bytes = tile.to_bytes().unwrap();
        assert!(matches!(
            TileData::from_bytes(&bytes),
            Err(TileDataError::TooManyLinks { link_count: 2, .. })
        ));
    }

    #[test]
    fn links_split_by_kind() {
        let tile = quad_tile();
        assert_eq!(tile.polys[0].walkable_links().count(), 1);
        assert_eq!(tile.polys[0].traverse_links().count(), 1);
        assert_eq!(tile.link_count(), 2);
    }
}
