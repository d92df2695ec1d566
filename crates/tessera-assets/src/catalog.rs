//! Which assets the pipeline has scheduled or indexed.
//!
//! The contextualize stage consults the catalog to suppress duplicate loads:
//! a request for an asset that is already indexed, or already in flight, is
//! dropped unless it asks to replace the existing copy.
//!
//! A replacement read for an indexed asset does not hide the installed copy:
//! the asset stays [`AssetStatus::Replacing`] until the new copy is indexed,
//! and falls back to [`AssetStatus::Indexed`] if the replacement never is.

use std::collections::HashMap;

use tessera_core::id::{GroupId, HashId};

/// Lifecycle state of a known asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetStatus {
    /// Read submitted, not indexed yet.
    Scheduled,
    /// Installed by its module.
    Indexed,
    /// Installed, with a replacement read in flight.
    Replacing,
}

/// Known assets, keyed by owning group and asset id.
#[derive(Debug, Default)]
pub struct AssetCatalog {
    entries: HashMap<(GroupId, HashId), AssetStatus>,
}

impl AssetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, group: GroupId, asset_id: HashId) -> Option<AssetStatus> {
        self.entries.get(&(group, asset_id)).copied()
    }

    /// A copy is installed in its module, whether or not a replacement is
    /// in flight.
    pub fn is_indexed(&self, group: GroupId, asset_id: HashId) -> bool {
        matches!(
            self.status(group, asset_id),
            Some(AssetStatus::Indexed | AssetStatus::Replacing)
        )
    }

    /// Scheduled or indexed.
    pub fn is_known(&self, group: GroupId, asset_id: HashId) -> bool {
        self.entries.contains_key(&(group, asset_id))
    }

    pub(crate) fn mark_scheduled(&mut self, group: GroupId, asset_id: HashId) {
        let status = match self.status(group, asset_id) {
            Some(AssetStatus::Indexed | AssetStatus::Replacing) => AssetStatus::Replacing,
            _ => AssetStatus::Scheduled,
        };
        self.entries.insert((group, asset_id), status);
    }

    pub(crate) fn mark_indexed(&mut self, group: GroupId, asset_id: HashId) {
        self.entries.insert((group, asset_id), AssetStatus::Indexed);
    }

    /// A scheduled read will never be indexed. A replaced asset keeps its
    /// installed copy; anything else is forgotten.
    pub(crate) fn abandon(&mut self, group: GroupId, asset_id: HashId) {
        match self.status(group, asset_id) {
            Some(AssetStatus::Replacing) => {
                tracing::debug!(asset_id = %asset_id, %group, "replacement abandoned, keeping indexed copy");
                self.entries.insert((group, asset_id), AssetStatus::Indexed);
            }
            Some(AssetStatus::Scheduled) => {
                self.entries.remove(&(group, asset_id));
            }
            Some(AssetStatus::Indexed) | None => {}
        }
    }

    /// Drop an asset so it can be requested again.
    pub(crate) fn forget(&mut self, group: GroupId, asset_id: HashId) -> Option<AssetStatus> {
        self.entries.remove(&(group, asset_id))
    }

    /// Indexed assets of one group, sorted by id.
    pub fn indexed_in(&self, group: GroupId) -> Vec<HashId> {
        let mut ids: Vec<HashId> = self
            .entries
            .iter()
            .filter(|((g, _), status)| {
                *g == group && matches!(status, AssetStatus::Indexed | AssetStatus::Replacing)
            })
            .map(|((_, id), _)| *id)
            .collect();
        ids.sort();
        ids
    }

    pub fn indexed_count(&self) -> usize {
        self.count(AssetStatus::Indexed) + self.count(AssetStatus::Replacing)
    }

    pub fn scheduled_count(&self) -> usize {
        self.count(AssetStatus::Scheduled)
    }

    fn count(&self, status: AssetStatus) -> usize {
        self.entries.values().filter(|s| **s == status).count()
    }
}
