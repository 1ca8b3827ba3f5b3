//! Loading and saving whole navmeshes as navmesh set (`.nm`) files.
//!
//! A set file is a header carrying the [`NavMeshParams`], followed by every tile prefixed
//! with its [`TileRef`] and size, followed by the static traverse tables.
//! All values are little-endian.

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use thiserror::Error;

use crate::{
    config::NavMeshType,
    nav_mesh::{NavMesh, NavMeshError, NavMeshParams},
    poly_groups::{MIN_POLY_GROUP_COUNT, TraverseTable},
    poly_ref::TileRef,
    tile_data::{TileData, TileDataError},
};

/// Magic number of navmesh set files (`'MSET'`).
pub const NAVMESH_SET_MAGIC: u32 = u32::from_be_bytes(*b"MSET");

/// The navmesh set version written by default.
pub const NAVMESH_SET_VERSION: u32 = 8;

/// The oldest supported navmesh set version. Carries an extra block of one zeroed `u32`
/// per poly group between the tiles and the traverse tables.
pub const LEGACY_NAVMESH_SET_VERSION: u32 = 5;

/// Returns the file name of a navmesh, e.g. `mp_rr_box_small.nm`.
pub fn nav_mesh_file_name(map: &str, nav_mesh_type: NavMeshType) -> String {
    format!("{map}_{}.nm", nav_mesh_type.name())
}

/// The header of a navmesh set file.
#[derive(Debug, Clone, PartialEq)]
pub struct NavMeshSetHeader {
    /// Always [`NAVMESH_SET_MAGIC`] for valid files.
    pub magic: u32,
    /// The set version.
    pub version: u32,
    /// The number of tiles stored in the file.
    pub tile_count: i32,
    /// The parameters of the mesh.
    pub params: NavMeshParams,
}

impl NavMeshSetHeader {
    /// Reads everything after magic and version.
    fn read_from<R: Read>(
        reader: &mut R,
        magic: u32,
        version: u32,
    ) -> Result<Self, NavMeshSetError> {
        let tile_count = reader.read_i32::<LittleEndian>()?;
        let origin = Vec3::new(
            reader.read_f32::<LittleEndian>()?,
            reader.read_f32::<LittleEndian>()?,
            reader.read_f32::<LittleEndian>()?,
        );
        let tile_width = reader.read_f32::<LittleEndian>()?;
        let tile_height = reader.read_f32::<LittleEndian>()?;
        let params = NavMeshParams {
            origin,
            tile_width,
            tile_height,
            max_tiles: read_count(reader, "max_tiles")?,
            max_polys: read_count(reader, "max_polys")?,
            poly_group_count: read_count(reader, "poly_group_count")?,
            traverse_table_size: read_count(reader, "traverse_table_size")?,
            traverse_table_count: read_count(reader, "traverse_table_count")?,
        };
        Ok(Self {
            magic,
            version,
            tile_count,
            params,
        })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), NavMeshSetError> {
        let params = &self.params;
        writer.write_u32::<LittleEndian>(self.magic)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_i32::<LittleEndian>(self.tile_count)?;
        writer.write_f32::<LittleEndian>(params.origin.x)?;
        writer.write_f32::<LittleEndian>(params.origin.y)?;
        writer.write_f32::<LittleEndian>(params.origin.z)?;
        writer.write_f32::<LittleEndian>(params.tile_width)?;
        writer.write_f32::<LittleEndian>(params.tile_height)?;
        write_count(writer, params.max_tiles, "max_tiles")?;
        write_count(writer, params.max_polys, "max_polys")?;
        write_count(writer, params.poly_group_count, "poly_group_count")?;
        write_count(writer, params.traverse_table_size, "traverse_table_size")?;
        write_count(writer, params.traverse_table_count, "traverse_table_count")?;
        Ok(())
    }
}

fn read_count<R: Read>(reader: &mut R, field: &'static str) -> Result<u32, NavMeshSetError> {
    let value = reader.read_i32::<LittleEndian>()?;
    u32::try_from(value).map_err(|_| NavMeshSetError::InvalidParams(field))
}

fn write_count<W: Write>(
    writer: &mut W,
    value: u32,
    field: &'static str,
) -> Result<(), NavMeshSetError> {
    let value = i32::try_from(value).map_err(|_| NavMeshSetError::InvalidParams(field))?;
    writer.write_i32::<LittleEndian>(value)?;
    Ok(())
}

/// Reads and writes navmesh set files of one version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavMeshSetCodec {
    /// The set version files are expected to have and are written with.
    pub version: u32,
}

impl Default for NavMeshSetCodec {
    fn default() -> Self {
        Self {
            version: NAVMESH_SET_VERSION,
        }
    }
}

impl NavMeshSetCodec {
    /// Creates a codec for set `version`.
    pub fn new(version: u32) -> Self {
        Self { version }
    }

    /// Loads a navmesh from a set file.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<NavMesh, NavMeshSetError> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);
        let mesh = self.read(&mut reader)?;
        tracing::info!(
            "Loaded {} tiles and {} traverse tables from {}",
            mesh.tile_count(),
            mesh.traverse_tables().len(),
            path.display()
        );
        Ok(mesh)
    }

    /// Saves a navmesh to a set file, replacing the file if it exists.
    pub fn save(&self, path: impl AsRef<Path>, mesh: &NavMesh) -> Result<(), NavMeshSetError> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        self.write(&mut writer, mesh)?;
        writer.flush()?;
        tracing::info!("Saved {} tiles to {}", mesh.tile_count(), path.display());
        Ok(())
    }

    /// Reads only the header. Magic and version are checked before anything else is read.
    pub fn read_header<R: Read>(&self, reader: &mut R) -> Result<NavMeshSetHeader, NavMeshSetError> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != NAVMESH_SET_MAGIC {
            return Err(NavMeshSetError::WrongMagic(magic));
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != self.version {
            return Err(NavMeshSetError::WrongVersion {
                found: version,
                expected: self.version,
            });
        }
        NavMeshSetHeader::read_from(reader, magic, version)
    }

    /// Reads a whole navmesh. Nothing is returned unless the whole file could be read.
    pub fn read<R: Read>(&self, reader: &mut R) -> Result<NavMesh, NavMeshSetError> {
        let header = self.read_header(reader)?;
        let params = header.params.clone();
        let mut mesh = NavMesh::new(params.clone()).map_err(|err| match err {
            NavMeshError::OutOfMemory => NavMeshSetError::OutOfMemory,
            _ => NavMeshSetError::InvalidParams("max_tiles/max_polys"),
        })?;

        for i in 0..header.tile_count.max(0) {
            let tile_ref = TileRef(reader.read_u64::<LittleEndian>()?);
            let data_size = reader.read_i32::<LittleEndian>()?;
            if tile_ref.is_null() || data_size <= 0 {
                tracing::warn!(
                    "Tile list ended after {i} of {} tiles",
                    header.tile_count
                );
                break;
            }
            let bytes = read_bytes(reader, data_size as usize)?;
            let data = TileData::from_bytes(&bytes)?;
            mesh.add_tile_at(tile_ref, data)
                .map_err(|source| NavMeshSetError::Tile { tile_ref, source })?;
        }

        if header.version == LEGACY_NAVMESH_SET_VERSION {
            let skip = u64::from(params.poly_group_count) * 4;
            let skipped = io::copy(&mut reader.by_ref().take(skip), &mut io::sink())?;
            if skipped != skip {
                return Err(NavMeshSetError::UnexpectedEof);
            }
        }

        if params.poly_group_count >= MIN_POLY_GROUP_COUNT && params.traverse_table_count > 0 {
            let group_count = params.poly_group_count as usize;
            if params.traverse_table_size as usize != TraverseTable::byte_size(group_count) {
                return Err(NavMeshSetError::InvalidParams("traverse_table_size"));
            }
            let mut tables = Vec::new();
            tables
                .try_reserve_exact(params.traverse_table_count as usize)
                .map_err(|_| NavMeshSetError::OutOfMemory)?;
            for _ in 0..params.traverse_table_count {
                let bytes = read_bytes(reader, params.traverse_table_size as usize)?;
                let words = bytes
                    .chunks_exact(4)
                    .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                    .collect();
                let table = TraverseTable::from_words(group_count, words)
                    .ok_or(NavMeshSetError::InvalidParams("traverse_table_size"))?;
                tables.push(table);
            }
            mesh.set_traverse_tables(params.poly_group_count, tables)
                .map_err(|_| NavMeshSetError::InvalidParams("traverse_table_size"))?;
        }

        Ok(mesh)
    }

    /// Writes a whole navmesh.
    pub fn write<W: Write>(&self, writer: &mut W, mesh: &NavMesh) -> Result<(), NavMeshSetError> {
        let params = mesh.params();
        let tiles = mesh
            .tiles()
            .map(|(tile_ref, data)| Ok((tile_ref, data.to_bytes()?)))
            .collect::<Result<Vec<_>, NavMeshSetError>>()?;

        let header = NavMeshSetHeader {
            magic: NAVMESH_SET_MAGIC,
            version: self.version,
            tile_count: i32::try_from(tiles.len())
                .map_err(|_| NavMeshSetError::InvalidParams("tile_count"))?,
            params: params.clone(),
        };
        header.write_to(writer)?;

        for (tile_ref, bytes) in &tiles {
            let data_size =
                i32::try_from(bytes.len()).map_err(|_| NavMeshSetError::InvalidParams("data_size"))?;
            writer.write_u64::<LittleEndian>(tile_ref.0)?;
            writer.write_i32::<LittleEndian>(data_size)?;
            writer.write_all(bytes)?;
        }

        if self.version == LEGACY_NAVMESH_SET_VERSION {
            for _ in 0..params.poly_group_count {
                writer.write_u32::<LittleEndian>(0)?;
            }
        }

        if params.poly_group_count >= MIN_POLY_GROUP_COUNT {
            if mesh.traverse_tables().len() != params.traverse_table_count as usize {
                return Err(NavMeshSetError::InvalidParams("traverse_table_count"));
            }
            for table in mesh.traverse_tables() {
                for word in table.words() {
                    writer.write_u32::<LittleEndian>(*word)?;
                }
            }
        }
        Ok(())
    }
}

fn read_bytes<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>, NavMeshSetError> {
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(len)
        .map_err(|_| NavMeshSetError::OutOfMemory)?;
    bytes.resize(len, 0);
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Errors that can occur when loading or saving a navmesh set.
#[derive(Debug, Error)]
pub enum NavMeshSetError {
    /// The file could not be accessed.
    #[error("Failed to access navmesh set: {0}")]
    Io(io::Error),
    /// The file doesn't start with [`NAVMESH_SET_MAGIC`].
    #[error("Not a navmesh set, wrong magic {0:#010x}")]
    WrongMagic(u32),
    /// The file has a different version than the codec.
    #[error("Navmesh set has version {found}, expected {expected}")]
    WrongVersion {
        /// The version in the file.
        found: u32,
        /// The version of the codec.
        expected: u32,
    },
    /// The file ended early.
    #[error("Navmesh set ended unexpectedly")]
    UnexpectedEof,
    /// A parameter is out of range or inconsistent with the others.
    #[error("Invalid navmesh parameter: {0}")]
    InvalidParams(&'static str),
    /// A tile blob could not be decoded.
    #[error("Invalid tile data: {0}")]
    TileData(#[from] TileDataError),
    /// A tile could not be added to the mesh.
    #[error("Failed to add tile {tile_ref:?}")]
    Tile {
        /// The stored reference of the tile.
        tile_ref: TileRef,
        /// Why the mesh rejected it.
        #[source]
        source: NavMeshError,
    },
    /// The mesh could not be allocated.
    #[error("Out of memory while loading navmesh set")]
    OutOfMemory,
}

impl From<io::Error> for NavMeshSetError {
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

    #[test]
    fn magic_spells_mset() {
        assert_eq!(NAVMESH_SET_MAGIC, 0x4d53_4554);
        assert_eq!(&NAVMESH_SET_MAGIC.to_le_bytes(), b"TESM");
    }

    #[test]
    fn file_name_includes_the_size_class() {
        assert_eq!(
            nav_mesh_file_name("mp_rr_box", NavMeshType::ExtraLarge),
            "mp_rr_box_extra_large.nm"
        );
    }

    #[test]
    fn header_round_trips() {
        let header = NavMeshSetHeader {
            magic: NAVMESH_SET_MAGIC,
            version: NAVMESH_SET_VERSION,
            tile_count: 3,
            params: NavMeshParams {
                origin: Vec3::new(1.0, 2.0, 3.0),
                poly_group_count: 7,
                traverse_table_size: 28,
                traverse_table_count: 5,
                ..Default::default()
            },
        };
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 52);
        let read = NavMeshSetCodec::default()
            .read_header(&mut bytes.as_slice())
            .unwrap();
        assert_eq!(read, header);
    }

    #[test]
    fn negative_params_are_rejected() {
        let mut bytes = Vec::new();
        NavMeshSetHeader {
            magic: NAVMESH_SET_MAGIC,
            version: NAVMESH_SET_VERSION,
            tile_count: 0,
            params: NavMeshParams::default(),
        }
        .write_to(&mut bytes)
        .unwrap();
        // max_polys
        bytes[36..40].copy_from_slice(&(-1_i32).to_le_bytes());
        assert!(matches!(
            NavMeshSetCodec::default().read(&mut bytes.as_slice()),
            Err(NavMeshSetError::InvalidParams("max_polys"))
        ));
    }

    #[test]
    fn magic_and_version_are_checked_first() {
        let mut foreign = b"OBJ!".to_vec();
        foreign.extend_from_slice(&[0xff; 8]);
        assert!(matches!(
            NavMeshSetCodec::default().read_header(&mut foreign.as_slice()),
            Err(NavMeshSetError::WrongMagic(_))
        ));

        // Cut off right after the version, with garbage where the params would be.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&NAVMESH_SET_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&LEGACY_NAVMESH_SET_VERSION.to_le_bytes());
        assert!(matches!(
            NavMeshSetCodec::default().read_header(&mut bytes.as_slice()),
            Err(NavMeshSetError::WrongVersion {
                found: LEGACY_NAVMESH_SET_VERSION,
                expected: NAVMESH_SET_VERSION,
            })
        ));
        bytes.extend_from_slice(&[0xff; 44]);
        assert!(matches!(
            NavMeshSetCodec::default().read_header(&mut bytes.as_slice()),
            Err(NavMeshSetError::WrongVersion { .. })
        ));
    }

    #[test]
    fn empty_mesh_round_trips() {
        let mesh = NavMesh::new(NavMeshParams::default()).unwrap();
        let codec = NavMeshSetCodec::default();
        let mut bytes = Vec::new();
        codec.write(&mut bytes, &mesh).unwrap();
        let loaded = codec.read(&mut bytes.as_slice()).unwrap();
        assert_eq!(loaded.params(), mesh.params());
        assert_eq!(loaded.tile_count(), 0);
    }
}
