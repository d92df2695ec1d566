//! Tessera Assets -- non-blocking asset loading and indexing pipeline.
//!
//! Assets are opaque byte files owned by engine modules. Loading one takes
//! three stages, all driven from [`AssetManager::tick`](manager::AssetManager::tick):
//!
//! - **Contextualize**: the owning [`Module`](registry::Module) decides where
//!   the bytes go: scratch memory from the
//!   [`TransientAllocator`](transient::TransientAllocator), or a buffer the
//!   module owns.
//! - **Read**: the read is submitted to an [`AsyncIo`](io::AsyncIo) backend
//!   and polled for completion once per tick.
//! - **Index**: the module interprets the bytes. Indexing follows scheduling
//!   order even when reads complete out of order.
//!
//! Entity blobs ([`entity_blob`]) feed the same pipeline: their asset
//! references become requests and their component groups go to the modules
//! that own each component type.
//!
//! # Quick Start
//!
//! ```
//! use tessera_assets::prelude::*;
//! use tessera_core::prelude::*;
//!
//! struct Text(Vec<String>);
//!
//! impl Module for Text {
//!     fn definition(&self) -> ModuleDefinition {
//!         ModuleDefinition::new("text").with_asset("string")
//!     }
//!
//!     fn contextualize(
//!         &mut self,
//!         _asset_type: &NamePair,
//!         _services: &mut ServiceTable<'_>,
//!         batch: &mut [LoadingContext],
//!     ) -> CallbackResult {
//!         batch.iter_mut().for_each(LoadingContext::request_transient_source);
//!         Ok(())
//!     }
//!
//!     fn index(
//!         &mut self,
//!         _asset_type: &NamePair,
//!         _services: &mut ServiceTable<'_>,
//!         asset: LoadedAsset<'_>,
//!     ) -> CallbackResult {
//!         self.0.push(String::from_utf8_lossy(asset.bytes()).into_owned());
//!         Ok(())
//!     }
//! }
//!
//! let io = MemoryIo::new();
//! let mut registry = ModuleRegistry::new();
//! registry.register(Text(Vec::new())).unwrap();
//! let mut manager = AssetManager::new(PipelineConfig::default(), registry, Box::new(io.clone()));
//!
//! let id = HashId::from_name("greeting");
//! io.insert_file(manager.config().asset_path(id), b"hello".to_vec());
//! manager.request_asset(AssetRequest::new(GroupId::from_names("text", "string"), id, 5));
//!
//! let mut world = WorldState::new();
//! while !manager.is_idle() {
//!     manager.tick(&mut world).unwrap();
//! }
//! assert!(manager.catalog().is_indexed(GroupId::from_names("text", "string"), id));
//! ```

#![deny(unsafe_code)]

pub mod catalog;
pub mod config;
pub mod context;
pub mod entity_blob;
pub mod event;
pub mod index_queue;
pub mod io;
pub mod manager;
pub mod registry;
pub mod transient;

pub use entity_blob::BlobError;
pub use io::IoSubmitError;
pub use manager::EntityLoadError;
pub use registry::RegistryError;
pub use transient::TransientError;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::catalog::{AssetCatalog, AssetStatus};
    pub use crate::config::PipelineConfig;
    pub use crate::context::{AssetRequest, BufferKind, LoadBuffer, LoadingContext, TransientLocation};
    pub use crate::entity_blob::{AssetRef, EntityBlob, EntityBlobWriter};
    pub use crate::event::{AsyncAssetEvent, EventState, IoTag};
    pub use crate::index_queue::{FlushStats, IndexQueue};
    pub use crate::io::{AsyncIo, MemoryIo, ThreadedFileIo};
    pub use crate::manager::{AssetManager, EntityLoadSummary, PipelineStage, PipelineTickReport};
    pub use crate::registry::{
        ComponentStream, LoadedAsset, Module, ModuleDefinition, ModuleRegistry, ServiceTable,
    };
    pub use crate::transient::{TransientAllocator, TransientBufferId};
    pub use crate::{BlobError, EntityLoadError, RegistryError};
}
