//! Pipeline configuration.

use std::num::NonZeroU64;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tessera_core::id::HashId;

/// Settings for an [`AssetManager`](crate::manager::AssetManager).
///
/// Missing fields take their defaults when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding asset and entity files.
    pub asset_root: PathBuf,
    /// Extension of asset files, without the dot.
    pub asset_extension: String,
    /// Extension of entity blob files, without the dot.
    pub entity_extension: String,
    /// Slots the transient allocator starts with.
    pub initial_transient_slots: usize,
    /// Cap on live transient bytes. `None` is unbounded.
    pub transient_budget_bytes: Option<usize>,
    /// Ticks an asset read may stay unresolved before it is marked broken.
    /// `None` waits forever. Zero is refused when deserializing, since it
    /// would expire every read in the tick that scheduled it.
    pub max_pending_ticks: Option<NonZeroU64>,
    /// Worker threads for [`ThreadedFileIo`](crate::io::ThreadedFileIo).
    pub io_workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            asset_root: PathBuf::from("."),
            asset_extension: "bse_asset".to_owned(),
            entity_extension: "bse_entity".to_owned(),
            initial_transient_slots: 16,
            transient_budget_bytes: None,
            max_pending_ticks: None,
            io_workers: 2,
        }
    }
}

impl PipelineConfig {
    /// `<asset_root>/<HEX>.<asset_extension>`
    pub fn asset_path(&self, asset_id: HashId) -> PathBuf {
        self.asset_root
            .join(format!("{}.{}", asset_id.to_hex(), self.asset_extension))
    }

    /// `<asset_root>/<HEX>.<entity_extension>`
    pub fn entity_path(&self, entity_id: HashId) -> PathBuf {
        self.asset_root
            .join(format!("{}.{}", entity_id.to_hex(), self.entity_extension))
    }
}
