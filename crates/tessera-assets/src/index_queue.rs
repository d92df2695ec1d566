//! FIFO of scheduled batches awaiting the index step.
//!
//! Every contextualize pass that schedules at least one read pushes one
//! [`IndexBatch`]. Reads complete in any order, but [`IndexQueue::flush`]
//! indexes strictly in scheduling order: it walks the queue from the head and
//! stops at the first event that has not resolved yet.
//!
//! Batches carry a monotonically increasing id. A completion tagged with an
//! id older than the head batch belongs to a batch that has already been
//! flushed and is ignored.

use std::collections::VecDeque;

use tessera_core::world::WorldState;
use tessera_core::Crash;

use crate::catalog::AssetCatalog;
use crate::context::{LoadBuffer, LoadingContext, TransientLocation};
use crate::event::AsyncAssetEvent;
use crate::registry::{LoadedAsset, ModuleRegistry, ServiceTable};
use crate::transient::{TransientAllocator, TransientBufferId};

// ---------------------------------------------------------------------------
// IndexBatch
// ---------------------------------------------------------------------------

/// One scheduling pass worth of events.
#[derive(Debug)]
pub struct IndexBatch {
    batch_id: u64,
    /// Shared transient group of the batch, if it requested any.
    buffer_id: Option<TransientBufferId>,
    events: Vec<AsyncAssetEvent>,
    /// Index of the first event not yet flushed.
    pending_position: usize,
}

impl IndexBatch {
    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    pub fn buffer_id(&self) -> Option<TransientBufferId> {
        self.buffer_id
    }

    pub fn events(&self) -> &[AsyncAssetEvent] {
        &self.events
    }

    pub fn pending_position(&self) -> usize {
        self.pending_position
    }

    pub fn is_complete(&self) -> bool {
        self.pending_position >= self.events.len()
    }
}

// ---------------------------------------------------------------------------
// FlushEnv / FlushStats
// ---------------------------------------------------------------------------

/// Pipeline state the flush needs besides the queue itself.
pub struct FlushEnv<'a> {
    pub registry: &'a mut ModuleRegistry,
    pub transient: &'a mut TransientAllocator,
    pub catalog: &'a mut AssetCatalog,
    pub world: &'a mut WorldState,
    pub tick: u64,
}

/// What one flush did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub indexed: usize,
    /// Broken events skipped.
    pub broken: usize,
    /// Resolved events skipped because no handler or buffer was available.
    pub skipped: usize,
}

enum IndexOutcome {
    Indexed,
    Skipped,
}

// ---------------------------------------------------------------------------
// IndexQueue
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct IndexQueue {
    batches: VecDeque<IndexBatch>,
    next_batch_id: u64,
}

impl IndexQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch and return its id.
    pub fn push(
        &mut self,
        buffer_id: Option<TransientBufferId>,
        events: Vec<AsyncAssetEvent>,
    ) -> u64 {
        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;
        self.batches.push_back(IndexBatch {
            batch_id,
            buffer_id,
            events,
            pending_position: 0,
        });
        batch_id
    }

    /// The event at `slot` of batch `batch`, if that batch is still queued.
    pub fn event_mut(&mut self, batch: u64, slot: usize) -> Option<&mut AsyncAssetEvent> {
        let index = self
            .batches
            .binary_search_by_key(&batch, |b| b.batch_id)
            .ok()?;
        self.batches[index].events.get_mut(slot)
    }

    pub fn batches(&self) -> impl Iterator<Item = &IndexBatch> {
        self.batches.iter()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Events not yet flushed, across all batches.
    pub fn pending_events(&self) -> usize {
        self.batches
            .iter()
            .map(|b| b.events.len() - b.pending_position.min(b.events.len()))
            .sum()
    }

    /// Mark broken every unresolved event scheduled at least `max_pending`
    /// ticks before `current_tick`. Returns how many were expired.
    pub fn expire_stalled(&mut self, current_tick: u64, max_pending: u64) -> usize {
        let mut expired = 0;
        for batch in &mut self.batches {
            let batch_id = batch.batch_id;
            for (slot, event) in batch.events.iter_mut().enumerate().skip(batch.pending_position) {
                if event.is_resolved()
                    || current_tick.saturating_sub(event.scheduled_tick()) < max_pending
                {
                    continue;
                }
                tracing::warn!(
                    batch = batch_id,
                    slot,
                    asset_id = ?event.context().map(|c| c.asset_id),
                    scheduled_tick = event.scheduled_tick(),
                    current_tick,
                    "asset read stalled, marking broken"
                );
                if event.mark_broken() {
                    expired += 1;
                }
            }
        }
        expired
    }

    /// Index every resolved event from the head of the queue, stopping at
    /// the first unresolved one, and drop the batches that are finished.
    ///
    /// # Errors
    ///
    /// Returns the [`Crash`] of the first `index` callback that fails. The
    /// failing event is consumed first, so it is never indexed again.
    pub fn flush(&mut self, env: &mut FlushEnv<'_>) -> Result<FlushStats, Crash> {
        let mut stats = FlushStats::default();

        'batches: while let Some(batch) = self.batches.front_mut() {
            while let Some(event) = batch.events.get_mut(batch.pending_position) {
                if !event.is_resolved() {
                    break 'batches;
                }
                batch.pending_position += 1;

                let broken = event.is_broken();
                let Some(context) = event.take_context() else {
                    continue;
                };

                if broken {
                    tracing::warn!(
                        asset_id = %context.asset_id,
                        group = %context.group_id,
                        "skipping broken asset"
                    );
                    release_unindexed(env, &context);
                    stats.broken += 1;
                    continue;
                }

                match index_one(env, context)? {
                    IndexOutcome::Indexed => stats.indexed += 1,
                    IndexOutcome::Skipped => stats.skipped += 1,
                }
            }

            if batch.is_complete() {
                tracing::debug!(batch = batch.batch_id, "index batch complete");
                self.batches.pop_front();
            } else {
                break;
            }
        }

        Ok(stats)
    }
}

/// Give back what a context that will never be indexed still holds.
fn release_unindexed(env: &mut FlushEnv<'_>, context: &LoadingContext) {
    if let Some(id) = context.buffer.transient_id() {
        env.transient.return_child(id);
    }
    env.catalog.abandon(context.group_id, context.asset_id);
}

fn index_one(env: &mut FlushEnv<'_>, mut context: LoadingContext) -> Result<IndexOutcome, Crash> {
    let Some((definition, module)) = env.registry.resolve_asset(context.group_id) else {
        tracing::warn!(
            asset_id = %context.asset_id,
            group = %context.group_id,
            "no handler for asset, skipping index"
        );
        release_unindexed(env, &context);
        return Ok(IndexOutcome::Skipped);
    };

    let mut services = ServiceTable {
        world: &mut *env.world,
        catalog: &*env.catalog,
        tick: env.tick,
    };

    tracing::debug!(
        asset_id = %context.asset_id,
        group = %context.group_id,
        "indexing asset"
    );

    let result = match context.consume_buffer() {
        LoadBuffer::Transient(TransientLocation::Allocated { id, size }) => {
            let result = match env.transient.get_buffer(id) {
                Some(bytes) => {
                    let bytes = &bytes[..size.min(bytes.len())];
                    module
                        .index(
                            &definition.asset_type,
                            &mut services,
                            LoadedAsset::transient(&context, bytes),
                        )
                        .map(|()| IndexOutcome::Indexed)
                }
                None => Ok(IndexOutcome::Skipped),
            };
            env.transient.return_child(id);
            result
        }
        LoadBuffer::Module(buffer) => module
            .index(
                &definition.asset_type,
                &mut services,
                LoadedAsset::module(&context, buffer),
            )
            .map(|()| IndexOutcome::Indexed),
        other => {
            tracing::warn!(
                asset_id = %context.asset_id,
                buffer = ?other,
                "asset has no readable buffer, skipping index"
            );
            Ok(IndexOutcome::Skipped)
        }
    };

    match result {
        Ok(IndexOutcome::Indexed) => {
            env.catalog.mark_indexed(context.group_id, context.asset_id);
            Ok(IndexOutcome::Indexed)
        }
        Ok(IndexOutcome::Skipped) => {
            env.catalog.abandon(context.group_id, context.asset_id);
            Ok(IndexOutcome::Skipped)
        }
        Err(crash) => {
            tracing::error!(
                asset_id = %context.asset_id,
                group = %context.group_id,
                error = %crash,
                "index callback failed"
            );
            env.catalog.abandon(context.group_id, context.asset_id);
            Err(crash)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
