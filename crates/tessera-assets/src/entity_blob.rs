//! Entity blob codec.
//!
//! An entity blob is a self-contained little-endian record with three
//! sections, each opened by a magic word:
//!
//! ```text
//! u32 0xCCBBFFF1
//! i32 asset_group_count
//!   repeat: owner_id[16] type_id[16]
//!           i32 group_size
//!             repeat: asset_id[16] u64 size
//! u32 0xCCBBFFF2
//! i32 entity_count
//!   repeat: i32 id  i32 parent          (-1 = root)
//! u32 0xCCBBFFF3
//! i32 component_group_count
//!   repeat: owner_id[16] type_id[16]
//!           i32 component_count
//!           u64 byte_offset
//! component storage, at each byte_offset:
//!   u64 payload_len  payload[payload_len]
//! ```
//!
//! Component groups are located through their stored offsets (seek, read,
//! restore), so storage may be laid out in any order.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use tessera_core::id::{GroupId, HashId};
use tessera_core::world::{Entity, EntityId};

pub const ASSET_REFS_MAGIC: u32 = 0xCCBB_FFF1;
pub const ENTITY_TABLE_MAGIC: u32 = 0xCCBB_FFF2;
pub const COMPONENT_GROUPS_MAGIC: u32 = 0xCCBB_FFF3;

const ROOT_PARENT: i32 = -1;

// ---------------------------------------------------------------------------
// Blob model
// ---------------------------------------------------------------------------

/// One asset referenced by an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetRef {
    pub asset_id: HashId,
    pub size: u64,
}

/// Assets of one owning type referenced by an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetGroupRefs {
    pub group: GroupId,
    pub assets: Vec<AssetRef>,
}

/// `count` components of one owning type, serialized back to back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentGroup {
    pub group: GroupId,
    pub count: usize,
    pub payload: Vec<u8>,
}

/// A decoded entity blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityBlob {
    pub asset_groups: Vec<AssetGroupRefs>,
    pub entities: Vec<Entity>,
    /// In header order, independent of storage order.
    pub component_groups: Vec<ComponentGroup>,
}

// ---------------------------------------------------------------------------
// BlobError
// ---------------------------------------------------------------------------

/// Section of a blob, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobSection {
    AssetGroupRefs,
    EntityTable,
    ComponentGroups,
    ComponentStorage,
}

impl std::fmt::Display for BlobSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BlobSection::AssetGroupRefs => "asset group references",
            BlobSection::EntityTable => "entity table",
            BlobSection::ComponentGroups => "component groups",
            BlobSection::ComponentStorage => "component storage",
        };
        f.write_str(name)
    }
}

/// Why a blob could not be decoded or encoded.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("bad magic word for {section}: expected {expected:#010X}, found {found:#010X}")]
    MagicMismatch {
        section: BlobSection,
        expected: u32,
        found: u32,
    },

    #[error("blob truncated in {section}")]
    Truncated { section: BlobSection },

    #[error("negative count {count} in {section}")]
    NegativeCount { section: BlobSection, count: i32 },

    /// A component group's storage lies outside the blob.
    #[error("component group {group} at offset {offset} lies outside the {blob_len}-byte blob")]
    ComponentOutOfBounds {
        group: GroupId,
        offset: u64,
        blob_len: usize,
    },

    /// An asset size that does not fit this platform's address space.
    #[error("asset {asset_id} declares size {size}, too large to load")]
    AssetTooLarge { asset_id: HashId, size: u64 },

    /// The storage order given to the writer is not a permutation of the
    /// component groups.
    #[error("storage order is not a permutation of {groups} component groups")]
    InvalidStorageOrder { groups: usize },

    #[error("I/O error writing entity blob: {0}")]
    Io(#[from] io::Error),
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

enum DecodeState {
    Start,
    ReadAssetGroupRefs,
    ReadEntityTable,
    ReadComponentGroups,
    Done,
}

struct BlobReader<'a> {
    cursor: Cursor<&'a [u8]>,
    section: BlobSection,
}

impl<'a> BlobReader<'a> {
    fn truncated(&self) -> BlobError {
        BlobError::Truncated {
            section: self.section,
        }
    }

    fn u32(&mut self) -> Result<u32, BlobError> {
        self.cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| self.truncated())
    }

    fn i32(&mut self) -> Result<i32, BlobError> {
        self.cursor
            .read_i32::<LittleEndian>()
            .map_err(|_| self.truncated())
    }

    fn u64(&mut self) -> Result<u64, BlobError> {
        self.cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| self.truncated())
    }

    fn hash_id(&mut self) -> Result<HashId, BlobError> {
        let mut bytes = [0u8; HashId::LEN];
        self.cursor
            .read_exact(&mut bytes)
            .map_err(|_| self.truncated())?;
        Ok(HashId(bytes))
    }

    fn group_id(&mut self) -> Result<GroupId, BlobError> {
        let owner = self.hash_id()?;
        let kind = self.hash_id()?;
        Ok(GroupId::new(owner, kind))
    }

    fn count(&mut self) -> Result<usize, BlobError> {
        let count = self.i32()?;
        usize::try_from(count).map_err(|_| BlobError::NegativeCount {
            section: self.section,
            count,
        })
    }

    fn expect_magic(&mut self, section: BlobSection, expected: u32) -> Result<(), BlobError> {
        self.section = section;
        let found = self.u32()?;
        if found != expected {
            return Err(BlobError::MagicMismatch {
                section,
                expected,
                found,
            });
        }
        Ok(())
    }

    fn asset_group_refs(&mut self) -> Result<Vec<AssetGroupRefs>, BlobError> {
        let group_count = self.count()?;
        let mut groups = Vec::new();
        for _ in 0..group_count {
            let group = self.group_id()?;
            let size = self.count()?;
            let mut assets = Vec::new();
            for _ in 0..size {
                let asset_id = self.hash_id()?;
                let size = self.u64()?;
                assets.push(AssetRef { asset_id, size });
            }
            groups.push(AssetGroupRefs { group, assets });
        }
        Ok(groups)
    }

    fn entity_table(&mut self) -> Result<Vec<Entity>, BlobError> {
        let entity_count = self.count()?;
        let mut entities = Vec::new();
        for _ in 0..entity_count {
            let id = self.i32()?;
            let parent = self.i32()?;
            entities.push(Entity {
                id: EntityId(id),
                parent: (parent != ROOT_PARENT).then_some(EntityId(parent)),
            });
        }
        Ok(entities)
    }

    fn component_groups(&mut self) -> Result<Vec<ComponentGroup>, BlobError> {
        let group_count = self.count()?;
        let mut groups = Vec::new();
        for _ in 0..group_count {
            let group = self.group_id()?;
            let count = self.count()?;
            let offset = self.u64()?;

            let header_end = self.cursor.position();
            let payload = self.component_payload(group, offset)?;
            self.cursor.set_position(header_end);
            self.section = BlobSection::ComponentGroups;

            groups.push(ComponentGroup {
                group,
                count,
                payload,
            });
        }
        Ok(groups)
    }

    fn component_payload(&mut self, group: GroupId, offset: u64) -> Result<Vec<u8>, BlobError> {
        let blob_len = self.cursor.get_ref().len();
        let out_of_bounds = BlobError::ComponentOutOfBounds {
            group,
            offset,
            blob_len,
        };
        if offset >= blob_len as u64 {
            return Err(out_of_bounds);
        }

        self.section = BlobSection::ComponentStorage;
        self.cursor.set_position(offset);
        let len = self.u64()?;
        let remaining = blob_len as u64 - self.cursor.position();
        if len > remaining {
            return Err(out_of_bounds);
        }
        let mut payload = vec![0u8; len as usize];
        self.cursor
            .read_exact(&mut payload)
            .map_err(|_| self.truncated())?;
        Ok(payload)
    }
}

/// Decode and validate a complete entity blob.
///
/// # Errors
///
/// Any [`BlobError`] from a section. Nothing is returned for a blob that
/// fails anywhere.
pub fn decode(bytes: &[u8]) -> Result<EntityBlob, BlobError> {
    let mut reader = BlobReader {
        cursor: Cursor::new(bytes),
        section: BlobSection::AssetGroupRefs,
    };
    let mut blob = EntityBlob::default();
    let mut state = DecodeState::Start;

    loop {
        state = match state {
            DecodeState::Start => {
                reader.expect_magic(BlobSection::AssetGroupRefs, ASSET_REFS_MAGIC)?;
                DecodeState::ReadAssetGroupRefs
            }
            DecodeState::ReadAssetGroupRefs => {
                blob.asset_groups = reader.asset_group_refs()?;
                reader.expect_magic(BlobSection::EntityTable, ENTITY_TABLE_MAGIC)?;
                DecodeState::ReadEntityTable
            }
            DecodeState::ReadEntityTable => {
                blob.entities = reader.entity_table()?;
                reader.expect_magic(BlobSection::ComponentGroups, COMPONENT_GROUPS_MAGIC)?;
                DecodeState::ReadComponentGroups
            }
            DecodeState::ReadComponentGroups => {
                blob.component_groups = reader.component_groups()?;
                DecodeState::Done
            }
            DecodeState::Done => break,
        };
    }

    Ok(blob)
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Builds entity blobs.
///
/// Headers are written first with placeholder offsets; the component storage
/// is appended afterwards in the requested order and the offsets are patched
/// in place.
#[derive(Debug, Clone, Default)]
pub struct EntityBlobWriter {
    blob: EntityBlob,
}

impl EntityBlobWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asset_group(mut self, group: GroupId, assets: Vec<AssetRef>) -> Self {
        self.blob.asset_groups.push(AssetGroupRefs { group, assets });
        self
    }

    pub fn entity(mut self, entity: Entity) -> Self {
        self.blob.entities.push(entity);
        self
    }

    pub fn component_group(mut self, group: GroupId, count: usize, payload: Vec<u8>) -> Self {
        self.blob.component_groups.push(ComponentGroup {
            group,
            count,
            payload,
        });
        self
    }

    /// The blob as it will decode.
    pub fn blob(&self) -> &EntityBlob {
        &self.blob
    }

    /// Encode with component storage in header order.
    pub fn encode(&self) -> Result<Vec<u8>, BlobError> {
        let order: Vec<usize> = (0..self.blob.component_groups.len()).collect();
        self.encode_with_order(&order)
    }

    /// Encode with component storage laid out in `storage_order`, a
    /// permutation of the component group indices.
    pub fn encode_with_order(&self, storage_order: &[usize]) -> Result<Vec<u8>, BlobError> {
        let mut out = Cursor::new(Vec::new());
        self.write_to(&mut out, storage_order)?;
        Ok(out.into_inner())
    }

    /// Write the blob to `out`, starting at its current position.
    pub fn write_to<W: Write + Seek>(
        &self,
        out: &mut W,
        storage_order: &[usize],
    ) -> Result<(), BlobError> {
        let groups = &self.blob.component_groups;
        let mut seen = vec![false; groups.len()];
        for &index in storage_order {
            match seen.get_mut(index) {
                Some(slot) if !*slot => *slot = true,
                _ => return Err(BlobError::InvalidStorageOrder { groups: groups.len() }),
            }
        }
        if storage_order.len() != groups.len() {
            return Err(BlobError::InvalidStorageOrder { groups: groups.len() });
        }

        let start = out.stream_position()?;

        out.write_u32::<LittleEndian>(ASSET_REFS_MAGIC)?;
        write_count(out, self.blob.asset_groups.len())?;
        for refs in &self.blob.asset_groups {
            write_group(out, refs.group)?;
            write_count(out, refs.assets.len())?;
            for asset in &refs.assets {
                out.write_all(asset.asset_id.as_bytes())?;
                out.write_u64::<LittleEndian>(asset.size)?;
            }
        }

        out.write_u32::<LittleEndian>(ENTITY_TABLE_MAGIC)?;
        write_count(out, self.blob.entities.len())?;
        for entity in &self.blob.entities {
            out.write_i32::<LittleEndian>(entity.id.0)?;
            out.write_i32::<LittleEndian>(entity.parent.map_or(ROOT_PARENT, |p| p.0))?;
        }

        out.write_u32::<LittleEndian>(COMPONENT_GROUPS_MAGIC)?;
        write_count(out, groups.len())?;
        let mut offset_slots = Vec::with_capacity(groups.len());
        for group in groups {
            write_group(out, group.group)?;
            write_count(out, group.count)?;
            offset_slots.push(out.stream_position()?);
            out.write_u64::<LittleEndian>(0)?;
        }

        let mut offsets = vec![0u64; groups.len()];
        for &index in storage_order {
            offsets[index] = out.stream_position()? - start;
            let payload = &groups[index].payload;
            out.write_u64::<LittleEndian>(payload.len() as u64)?;
            out.write_all(payload)?;
        }
        let end = out.stream_position()?;

        for (slot, offset) in offset_slots.into_iter().zip(offsets) {
            out.seek(SeekFrom::Start(slot))?;
            out.write_u64::<LittleEndian>(offset)?;
        }
        out.seek(SeekFrom::Start(end))?;
        Ok(())
    }
}

fn write_group<W: Write>(out: &mut W, group: GroupId) -> io::Result<()> {
    out.write_all(group.owner.as_bytes())?;
    out.write_all(group.kind.as_bytes())
}

fn write_count<W: Write>(out: &mut W, count: usize) -> io::Result<()> {
    let count = i32::try_from(count)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "count exceeds i32::MAX"))?;
    out.write_i32::<LittleEndian>(count)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EntityBlobWriter {
        EntityBlobWriter::new()
            .asset_group(
                GroupId::from_names("renderer", "mesh"),
                vec![
                    AssetRef {
                        asset_id: HashId::from_name("crate.mesh"),
                        size: 96,
                    },
                    AssetRef {
                        asset_id: HashId::from_name("barrel.mesh"),
                        size: 128,
                    },
                ],
            )
            .entity(Entity::root(1))
            .entity(Entity::child(2, 1))
            .component_group(GroupId::from_names("renderer", "mesh_renderer"), 2, b"mr-data".to_vec())
            .component_group(GroupId::from_names("physics", "body"), 1, b"body".to_vec())
    }

    #[test]
    fn decode_recovers_written_blob() {
        let writer = sample();
        let bytes = writer.encode().unwrap();
        assert_eq!(&bytes[..4], &ASSET_REFS_MAGIC.to_le_bytes());
        assert_eq!(&decode(&bytes).unwrap(), writer.blob());
    }

    #[test]
    fn storage_order_does_not_change_decoded_groups() {
        let writer = sample();
        let forward = writer.encode_with_order(&[0, 1]).unwrap();
        let reversed = writer.encode_with_order(&[1, 0]).unwrap();
        assert_ne!(forward, reversed);
        assert_eq!(decode(&forward).unwrap(), decode(&reversed).unwrap());
    }

    #[test]
    fn root_parent_is_minus_one() {
        let bytes = EntityBlobWriter::new()
            .entity(Entity::root(7))
            .encode()
            .unwrap();
        // magic + asset group count + magic + entity count
        let table = 4 + 4 + 4 + 4;
        assert_eq!(&bytes[table..table + 4], &7i32.to_le_bytes());
        assert_eq!(&bytes[table + 4..table + 8], &(-1i32).to_le_bytes());
    }

    #[test]
    fn magic_mismatch_names_the_section() {
        let mut bytes = sample().encode().unwrap();
        bytes[0] ^= 0xFF;
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(
            err,
            BlobError::MagicMismatch {
                section: BlobSection::AssetGroupRefs,
                ..
            }
        ));

        let mut bytes = EntityBlobWriter::new().encode().unwrap();
        // Second magic word follows the first magic and an empty group count.
        bytes[8] = 0;
        assert!(matches!(
            decode(&bytes).unwrap_err(),
            BlobError::MagicMismatch {
                section: BlobSection::EntityTable,
                ..
            }
        ));
    }

    #[test]
    fn truncation_is_reported() {
        let bytes = sample().encode().unwrap();
        for cut in [2, 10, 60] {
            assert!(
                decode(&bytes[..cut]).is_err(),
                "blob cut at {cut} bytes decoded"
            );
        }
    }

    #[test]
    fn negative_count_rejected() {
        let mut bytes = EntityBlobWriter::new().encode().unwrap();
        bytes[4..8].copy_from_slice(&(-3i32).to_le_bytes());
        assert!(matches!(
            decode(&bytes).unwrap_err(),
            BlobError::NegativeCount { count: -3, .. }
        ));
    }

    #[test]
    fn component_offset_past_end_rejected() {
        let writer = EntityBlobWriter::new().component_group(
            GroupId::from_names("physics", "body"),
            1,
            vec![1, 2, 3],
        );
        let mut bytes = writer.encode().unwrap();
        // Header: 3 magics, 3 counts, group ids, component count, offset.
        let offset_at = 4 + 4 + 4 + 4 + 4 + 4 + 32 + 4;
        bytes[offset_at..offset_at + 8].copy_from_slice(&10_000u64.to_le_bytes());
        assert!(matches!(
            decode(&bytes).unwrap_err(),
            BlobError::ComponentOutOfBounds { offset: 10_000, .. }
        ));
    }

    #[test]
    fn invalid_storage_order_rejected() {
        let writer = sample();
        assert!(matches!(
            writer.encode_with_order(&[0, 0]),
            Err(BlobError::InvalidStorageOrder { groups: 2 })
        ));
        assert!(matches!(
            writer.encode_with_order(&[0]),
            Err(BlobError::InvalidStorageOrder { groups: 2 })
        ));
    }
}
