//! 128-bit identifiers for modules, asset types, assets and entities.
//!
//! Every name that crosses the data pipeline (module names, asset and
//! component type names, asset paths) is reduced to a [`HashId`]: the first
//! 16 bytes of its BLAKE3 digest. Built data stores the raw 16 bytes; file
//! names use the 32-digit upper-case hex form.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// HashId
// ---------------------------------------------------------------------------

/// A 128-bit content-derived identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct HashId(pub [u8; 16]);

impl HashId {
    /// Length of the identifier in bytes.
    pub const LEN: usize = 16;

    /// The all-zero identifier.
    pub const ZERO: HashId = HashId([0; 16]);

    /// Hash a name into an identifier.
    pub fn from_name(name: &str) -> Self {
        let digest = blake3::hash(name.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest.as_bytes()[..16]);
        Self(bytes)
    }

    /// Parse a 32-digit hex string (either case).
    ///
    /// Returns `None` if the string has the wrong length or contains a
    /// non-hex character.
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    /// Upper-case hex representation, as used for on-disk file names.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    /// The raw bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for HashId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashId({})", self.to_hex())
    }
}

impl fmt::Display for HashId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// GroupId
// ---------------------------------------------------------------------------

/// The owning type of an asset or component group: which module owns it and
/// which of that module's types it is.
///
/// Ordering is lexicographic on `(owner, kind)`, so sorting a request list
/// clusters every request of one owning type together.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId {
    /// Hash of the owning module's name.
    pub owner: HashId,
    /// Hash of the asset or component type name within that module.
    pub kind: HashId,
}

impl GroupId {
    pub fn new(owner: HashId, kind: HashId) -> Self {
        Self { owner, kind }
    }

    /// Build a group id by hashing a module name and a type name.
    pub fn from_names(module: &str, kind: &str) -> Self {
        Self::new(HashId::from_name(module), HashId::from_name(kind))
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({}:{})", self.owner, self.kind)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner, self.kind)
    }
}

// ---------------------------------------------------------------------------
// NamePair
// ---------------------------------------------------------------------------

/// A human-readable name together with its hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamePair {
    pub display_name: String,
    pub hash: HashId,
}

impl NamePair {
    pub fn new(display_name: &str) -> Self {
        Self {
            display_name: display_name.to_owned(),
            hash: HashId::from_name(display_name),
        }
    }
}

impl fmt::Display for NamePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.display_name, self.hash)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_name_is_stable_and_distinct() {
        assert_eq!(HashId::from_name("renderer"), HashId::from_name("renderer"));
        assert_ne!(HashId::from_name("renderer"), HashId::from_name("input"));
    }

    #[test]
    fn hex_roundtrip() {
        let id = HashId::from_name("meshes/crate.gltf");
        let hex = id.to_hex();
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        assert_eq!(HashId::from_hex(&hex), Some(id));
        assert_eq!(HashId::from_hex(&hex.to_lowercase()), Some(id));
    }

    #[test]
    fn from_hex_rejects_malformed_input() {
        assert_eq!(HashId::from_hex(""), None);
        assert_eq!(HashId::from_hex("ABC"), None);
        assert_eq!(HashId::from_hex(&"G".repeat(32)), None);
        assert_eq!(HashId::from_hex(&"A".repeat(34)), None);
        assert_eq!(HashId::from_hex(&"A".repeat(31)), None);
    }

    #[test]
    fn known_hex_layout() {
        let mut bytes = [0u8; 16];
        bytes[0] = 0xCD;
        bytes[15] = 0x06;
        assert_eq!(
            HashId(bytes).to_hex(),
            "CD000000000000000000000000000006"
        );
    }

    #[test]
    fn group_ordering_clusters_by_owner_first() {
        let a = GroupId::new(HashId([1; 16]), HashId([9; 16]));
        let b = GroupId::new(HashId([2; 16]), HashId([0; 16]));
        assert!(a < b);
    }

    #[test]
    fn name_pair_hashes_display_name() {
        let pair = NamePair::new("shader");
        assert_eq!(pair.hash, HashId::from_name("shader"));
        assert_eq!(pair.display_name, "shader");
    }

    #[test]
    fn serde_roundtrip() {
        let group = GroupId::from_names("renderer", "mesh");
        let json = serde_json::to_string(&group).unwrap();
        let back: GroupId = serde_json::from_str(&json).unwrap();
        assert_eq!(group, back);
    }
}
