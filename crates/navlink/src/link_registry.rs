use std::collections::HashMap;

use thiserror::Error;

use crate::{poly_ref::PolyRef, traverse_type::TraverseTypeMask};

/// The ordered pair of polygons a traverse link connects.
///
/// `(a, b)` and `(b, a)` are different keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolyPairKey {
    /// The polygon the link starts at.
    pub base: PolyRef,
    /// The polygon the link lands on.
    pub land: PolyRef,
}

impl PolyPairKey {
    /// Creates a new key.
    #[inline]
    pub fn new(base: PolyRef, land: PolyRef) -> Self {
        Self { base, land }
    }
}

/// Remembers which polygon pairs already received a traverse link during a rebuild,
/// and with which types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkRegistry {
    links: HashMap<PolyPairKey, TraverseTypeMask>,
}

impl LinkRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the type bits recorded for the pair, if any.
    pub fn find(&self, base: PolyRef, land: PolyRef) -> Option<TraverseTypeMask> {
        self.links.get(&PolyPairKey::new(base, land)).copied()
    }

    /// Registers `type_bit` for the pair.
    ///
    /// A pair can only be registered once. Registering it again leaves the existing entry
    /// untouched and returns [`RegistryError::Conflict`].
    pub fn add(
        &mut self,
        base: PolyRef,
        land: PolyRef,
        type_bit: TraverseTypeMask,
    ) -> Result<(), RegistryError> {
        let result = self.insert_new(PolyPairKey::new(base, land), type_bit);
        if let Err(RegistryError::Conflict { existing, .. }) = &result {
            debug_assert!(
                false,
                "Poly pair {base:?} -> {land:?} registered twice ({existing:?}, {type_bit:?})"
            );
        }
        result
    }

    fn insert_new(
        &mut self,
        key: PolyPairKey,
        type_bit: TraverseTypeMask,
    ) -> Result<(), RegistryError> {
        if let Some(existing) = self.links.get(&key) {
            return Err(RegistryError::Conflict {
                key,
                existing: *existing,
            });
        }
        self.links
            .try_reserve(1)
            .map_err(|_| RegistryError::AllocationFailure)?;
        self.links.insert(key, type_bit);
        Ok(())
    }

    /// Records another type for a registered pair.
    ///
    /// Returns `false` if the pair isn't registered.
    pub fn mark(&mut self, base: PolyRef, land: PolyRef, type_bit: TraverseTypeMask) -> bool {
        match self.links.get_mut(&PolyPairKey::new(base, land)) {
            Some(mask) => {
                *mask |= type_bit;
                true
            }
            None => false,
        }
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.links.clear();
    }

    /// The number of registered pairs.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether no pair is registered.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Iterates all registered pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (PolyPairKey, TraverseTypeMask)> + '_ {
        self.links.iter().map(|(key, bit)| (*key, *bit))
    }
}

/// Errors that can occur when registering a traverse link.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The pair is already registered.
    #[error("Poly pair {key:?} is already registered with {existing:?}")]
    Conflict {
        /// The pair that was registered twice.
        key: PolyPairKey,
        /// The type bits recorded for it so far.
        existing: TraverseTypeMask,
    },
    /// The registry could not grow.
    #[error("Failed to grow the link registry")]
    AllocationFailure,
}
