//! Per-asset loading records.
//!
//! An [`AssetRequest`] is what callers queue. The contextualize stage turns
//! each request into a [`LoadingContext`], which the owning module fills in
//! with a [`LoadBuffer`] describing where the bytes should land:
//!
//! ```text
//! Invalid ──contextualize──▶ Transient(Requested) ──allocate──▶ Transient(Allocated) ─┐
//!    │                                                                                 ├─index─▶ Consumed
//!    └─────contextualize──▶ Module(Vec<u8>) ──────────────────────────────────────────┘
//! ```
//!
//! A context left `Invalid` after contextualize is skipped. A consumed
//! context is never reused for another asset.

use std::fmt;

use tessera_core::id::{GroupId, HashId};

use crate::transient::TransientBufferId;

// ---------------------------------------------------------------------------
// AssetRequest
// ---------------------------------------------------------------------------

/// A pending request to load one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
    /// The owning `(module, asset type)`.
    pub group_id: GroupId,
    pub asset_id: HashId,
    /// Declared size of the asset file in bytes.
    pub source_size: usize,
    /// Load even if the asset is already indexed or in flight.
    pub replace_existing: bool,
    /// Opaque value handed back to the module with the context.
    pub user_data: u64,
}

impl AssetRequest {
    pub fn new(group_id: GroupId, asset_id: HashId, source_size: usize) -> Self {
        Self {
            group_id,
            asset_id,
            source_size,
            replace_existing: false,
            user_data: 0,
        }
    }

    pub fn replacing(mut self) -> Self {
        self.replace_existing = true;
        self
    }

    pub fn with_user_data(mut self, user_data: u64) -> Self {
        self.user_data = user_data;
        self
    }
}

// ---------------------------------------------------------------------------
// LoadBuffer
// ---------------------------------------------------------------------------

/// Where a transient asset's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientLocation {
    /// Set by the module: this many bytes of scratch memory are needed.
    Requested(usize),
    /// Set by the pipeline once the batch's shared group is allocated.
    Allocated {
        id: TransientBufferId,
        size: usize,
    },
}

/// Destination of an asset's bytes.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum LoadBuffer {
    /// Skip this asset (duplicate, unsupported, or allocation failure).
    #[default]
    Invalid,
    /// Scratch memory, reclaimed once the asset is indexed.
    Transient(TransientLocation),
    /// Memory allocated by the module. Ownership goes back to the module at
    /// index time; the pipeline never frees it.
    Module(Vec<u8>),
    /// Handed to the module's index callback.
    Consumed,
}

impl LoadBuffer {
    pub fn kind(&self) -> BufferKind {
        match self {
            LoadBuffer::Invalid => BufferKind::Invalid,
            LoadBuffer::Transient(_) => BufferKind::Transient,
            LoadBuffer::Module(_) => BufferKind::Module,
            LoadBuffer::Consumed => BufferKind::Consumed,
        }
    }

    /// The allocated transient id, if any.
    pub fn transient_id(&self) -> Option<TransientBufferId> {
        match self {
            LoadBuffer::Transient(TransientLocation::Allocated { id, .. }) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Debug for LoadBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadBuffer::Invalid => f.write_str("Invalid"),
            LoadBuffer::Transient(location) => write!(f, "Transient({location:?})"),
            LoadBuffer::Module(bytes) => write!(f, "Module({} bytes)", bytes.len()),
            LoadBuffer::Consumed => f.write_str("Consumed"),
        }
    }
}

/// Discriminant of a [`LoadBuffer`], for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Invalid,
    Transient,
    Module,
    Consumed,
}

// ---------------------------------------------------------------------------
// LoadingContext
// ---------------------------------------------------------------------------

/// One asset's journey through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadingContext {
    pub replace_existing: bool,
    pub source_size: usize,
    pub group_id: GroupId,
    pub asset_id: HashId,
    pub buffer: LoadBuffer,
    pub user_data: u64,
}

impl LoadingContext {
    /// A fresh context for `request`, with an `Invalid` buffer.
    pub fn from_request(request: &AssetRequest) -> Self {
        Self {
            replace_existing: request.replace_existing,
            source_size: request.source_size,
            group_id: request.group_id,
            asset_id: request.asset_id,
            buffer: LoadBuffer::Invalid,
            user_data: request.user_data,
        }
    }

    /// Ask for `size` bytes of transient memory.
    pub fn request_transient(&mut self, size: usize) {
        self.buffer = LoadBuffer::Transient(TransientLocation::Requested(size));
    }

    /// Ask for a transient buffer exactly the size of the source file.
    pub fn request_transient_source(&mut self) {
        self.request_transient(self.source_size);
    }

    /// Provide module-owned memory for the read. It comes back to the module
    /// at index time.
    pub fn provide_module_buffer(&mut self, buffer: Vec<u8>) {
        self.buffer = LoadBuffer::Module(buffer);
    }

    /// Skip this asset.
    pub fn reject(&mut self) {
        self.buffer = LoadBuffer::Invalid;
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self.buffer, LoadBuffer::Invalid)
    }

    /// Capacity of the destination buffer, if one has been chosen.
    pub fn destination_capacity(&self) -> Option<usize> {
        match &self.buffer {
            LoadBuffer::Transient(TransientLocation::Requested(size)) => Some(*size),
            LoadBuffer::Transient(TransientLocation::Allocated { size, .. }) => Some(*size),
            LoadBuffer::Module(bytes) => Some(bytes.len()),
            LoadBuffer::Invalid | LoadBuffer::Consumed => None,
        }
    }

    /// Take the buffer out, leaving [`LoadBuffer::Consumed`] behind.
    pub fn consume_buffer(&mut self) -> LoadBuffer {
        std::mem::replace(&mut self.buffer, LoadBuffer::Consumed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AssetRequest {
        AssetRequest::new(
            GroupId::from_names("renderer", "mesh"),
            HashId::from_name("crate.mesh"),
            128,
        )
        .with_user_data(7)
    }

    #[test]
    fn context_starts_invalid() {
        let ctx = LoadingContext::from_request(&request());
        assert!(ctx.is_invalid());
        assert_eq!(ctx.user_data, 7);
        assert_eq!(ctx.source_size, 128);
        assert!(!ctx.replace_existing);
        assert_eq!(ctx.destination_capacity(), None);
    }

    #[test]
    fn buffer_transitions() {
        let mut ctx = LoadingContext::from_request(&request());
        ctx.request_transient_source();
        assert_eq!(ctx.buffer.kind(), BufferKind::Transient);
        assert_eq!(ctx.destination_capacity(), Some(128));

        ctx.provide_module_buffer(vec![0; 256]);
        assert_eq!(ctx.buffer.kind(), BufferKind::Module);
        assert_eq!(ctx.destination_capacity(), Some(256));

        let taken = ctx.consume_buffer();
        assert_eq!(taken.kind(), BufferKind::Module);
        assert_eq!(ctx.buffer.kind(), BufferKind::Consumed);
    }

    #[test]
    fn transient_id_only_after_allocation() {
        let requested = LoadBuffer::Transient(TransientLocation::Requested(4));
        assert_eq!(requested.transient_id(), None);

        let id = TransientBufferId::new(2, 16);
        let allocated = LoadBuffer::Transient(TransientLocation::Allocated { id, size: 4 });
        assert_eq!(allocated.transient_id(), Some(id));
    }

    #[test]
    fn replacing_sets_flag() {
        assert!(request().replacing().replace_existing);
    }
}
