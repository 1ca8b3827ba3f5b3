//! Stable references to polygons and tiles.
//!
//! A reference packs three fields into a `u64`, from most to least significant:
//! the salt of the tile slot, the tile slot index and the polygon index within the tile.
//! The field widths depend on the [`NavMeshParams`](crate::NavMeshParams) the mesh was
//! initialized with, so references are only meaningful for the mesh that produced them.
//! Saved files keep the tile references verbatim, which keeps every poly reference stored
//! inside tile data valid across a save/load round trip.

use thiserror::Error;

/// A reference to a polygon inside a [`NavMesh`](crate::NavMesh).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct PolyRef(pub u64);

impl PolyRef {
    /// The null reference. Never refers to a polygon.
    pub const NULL: Self = Self(0);

    /// Whether this is the null reference.
    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// A reference to a tile inside a [`NavMesh`](crate::NavMesh).
/// Encoded like a [`PolyRef`] whose polygon index is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct TileRef(pub u64);

impl TileRef {
    /// The null reference. Never refers to a tile.
    pub const NULL: Self = Self(0);

    /// Whether this is the null reference.
    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Bit layout of the references of one mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefEncoding {
    salt_bits: u32,
    tile_bits: u32,
    poly_bits: u32,
}

impl RefEncoding {
    /// The smallest salt width that still detects stale references reliably.
    pub const MIN_SALT_BITS: u32 = 10;
    /// The widest salt that is used, even if more bits are available.
    pub const MAX_SALT_BITS: u32 = 31;

    /// Derives the layout from the maximum tile and per-tile polygon counts.
    pub fn new(max_tiles: u32, max_polys: u32) -> Result<Self, RefEncodingError> {
        if max_tiles == 0 || max_polys == 0 {
            return Err(RefEncodingError::Empty {
                max_tiles,
                max_polys,
            });
        }
        let tile_bits = max_tiles.next_power_of_two().ilog2();
        let poly_bits = max_polys.next_power_of_two().ilog2();
        let available = u64::BITS - tile_bits - poly_bits;
        let salt_bits = available.min(Self::MAX_SALT_BITS);
        if salt_bits < Self::MIN_SALT_BITS {
            return Err(RefEncodingError::NotEnoughSaltBits { salt_bits });
        }
        Ok(Self {
            salt_bits,
            tile_bits,
            poly_bits,
        })
    }

    /// Number of bits used for the salt.
    #[inline]
    pub fn salt_bits(&self) -> u32 {
        self.salt_bits
    }

    /// Number of bits used for the tile index.
    #[inline]
    pub fn tile_bits(&self) -> u32 {
        self.tile_bits
    }

    /// Number of bits used for the polygon index.
    #[inline]
    pub fn poly_bits(&self) -> u32 {
        self.poly_bits
    }

    /// Mask that wraps a salt into its field.
    #[inline]
    pub fn salt_mask(&self) -> u32 {
        ((1_u64 << self.salt_bits) - 1) as u32
    }

    /// Packs a polygon reference.
    #[inline]
    pub fn encode_poly(&self, salt: u32, tile: u32, poly: u32) -> PolyRef {
        let salt = (salt & self.salt_mask()) as u64;
        let tile = tile as u64 & ((1 << self.tile_bits) - 1);
        let poly = poly as u64 & ((1 << self.poly_bits) - 1);
        PolyRef((salt << (self.poly_bits + self.tile_bits)) | (tile << self.poly_bits) | poly)
    }

    /// Unpacks a polygon reference into `(salt, tile, poly)`.
    #[inline]
    pub fn decode_poly(&self, reference: PolyRef) -> (u32, u32, u32) {
        let raw = reference.0;
        let salt = (raw >> (self.poly_bits + self.tile_bits)) & self.salt_mask() as u64;
        let tile = (raw >> self.poly_bits) & ((1 << self.tile_bits) - 1);
        let poly = raw & ((1 << self.poly_bits) - 1);
        (salt as u32, tile as u32, poly as u32)
    }

    /// Packs a tile reference.
    #[inline]
    pub fn encode_tile(&self, salt: u32, tile: u32) -> TileRef {
        TileRef(self.encode_poly(salt, tile, 0).0)
    }

    /// Unpacks a tile reference into `(salt, tile)`.
    #[inline]
    pub fn decode_tile(&self, reference: TileRef) -> (u32, u32) {
        let (salt, tile, _) = self.decode_poly(PolyRef(reference.0));
        (salt, tile)
    }

    /// The tile reference of the tile that owns `reference`.
    #[inline]
    pub fn tile_of(&self, reference: PolyRef) -> TileRef {
        let (salt, tile, _) = self.decode_poly(reference);
        self.encode_tile(salt, tile)
    }
}

/// Errors that can occur when deriving a [`RefEncoding`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RefEncodingError {
    /// Either limit is zero.
    #[error("A navmesh needs at least one tile and one polygon, got {max_tiles} tiles and {max_polys} polygons")]
    Empty {
        /// The requested tile count.
        max_tiles: u32,
        /// The requested per-tile polygon count.
        max_polys: u32,
    },
    /// The tile and polygon fields leave too little room for the salt.
    #[error("Only {salt_bits} bits are left for the salt, need at least {}", RefEncoding::MIN_SALT_BITS)]
    NotEnoughSaltBits {
        /// The bits that would be left for the salt.
        salt_bits: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_follows_limits() {
        let encoding = RefEncoding::new(300, 1000).unwrap();
        assert_eq!(encoding.tile_bits(), 9);
        assert_eq!(encoding.poly_bits(), 10);
        assert_eq!(encoding.salt_bits(), 31);
    }

    #[test]
    fn poly_ref_round_trip() {
        let encoding = RefEncoding::new(64, 256).unwrap();
        let reference = encoding.encode_poly(5, 17, 200);
        assert_eq!(encoding.decode_poly(reference), (5, 17, 200));
        assert_eq!(encoding.tile_of(reference), encoding.encode_tile(5, 17));
        assert_eq!(encoding.decode_tile(encoding.encode_tile(5, 17)), (5, 17));
    }

    #[test]
    fn salt_wraps_into_its_field() {
        let encoding = RefEncoding::new(1 << 20, 1 << 24).unwrap();
        assert_eq!(encoding.salt_bits(), 20);
        let reference = encoding.encode_poly(encoding.salt_mask() + 2, 3, 4);
        assert_eq!(encoding.decode_poly(reference), (1, 3, 4));
    }

    #[test]
    fn rejects_layouts_without_salt_room() {
        assert_eq!(
            RefEncoding::new(1 << 28, 1 << 28),
            Err(RefEncodingError::NotEnoughSaltBits { salt_bits: 8 })
        );
        assert!(matches!(
            RefEncoding::new(0, 1),
            Err(RefEncodingError::Empty { .. })
        ));
    }
}
