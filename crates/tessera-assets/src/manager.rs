//! The asset pipeline orchestrator.
//!
//! [`AssetManager`] runs one pipeline tick at a time, never blocking:
//!
//! 1. **Entity reads** -- queued entity blobs are submitted to the I/O
//!    backend as whole-file reads.
//! 2. **Poll** -- every completion that is ready is matched back to its event
//!    through its [`IoTag`]. Asset bytes are copied into their destination
//!    buffer and the event is marked available (or broken). Entity blobs are
//!    decoded and committed, which may queue more asset requests.
//! 3. **Contextualize** -- pending requests are sorted by owning type and
//!    handed to the owning module batch by batch. The module picks a
//!    destination buffer per asset; the batch's transient requests share one
//!    allocation; every accepted asset is scheduled as one event of a new
//!    index batch.
//! 4. **Expire** -- with `max_pending_ticks` set, reads stuck for too long are
//!    marked broken so they stop blocking the queue.
//! 5. **Flush** -- resolved events are indexed from the head of the queue.
//!
//! Per-asset and per-entity problems are logged and skipped. A [`Crash`] from
//! a module callback aborts the tick and is returned to the caller.

use std::collections::HashSet;
use std::io::Cursor;

use tessera_core::id::{GroupId, HashId};
use tessera_core::world::{WorldError, WorldState};
use tessera_core::{CallbackResult, Crash};

use crate::catalog::AssetCatalog;
use crate::config::PipelineConfig;
use crate::context::{AssetRequest, LoadBuffer, LoadingContext, TransientLocation};
use crate::entity_blob::{self, BlobError};
use crate::event::{AsyncAssetEvent, IoTag};
use crate::index_queue::{FlushEnv, FlushStats, IndexQueue};
use crate::io::{AsyncIo, IoCompletion, ReadRequest};
use crate::registry::{ModuleRegistry, ServiceTable};
use crate::transient::TransientAllocator;

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// One step of a pipeline tick. [`PipelineStage::ALL`] is the order every
/// tick runs them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    EntityReads,
    Poll,
    Contextualize,
    Expire,
    Flush,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 5] = [
        PipelineStage::EntityReads,
        PipelineStage::Poll,
        PipelineStage::Contextualize,
        PipelineStage::Expire,
        PipelineStage::Flush,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PipelineStage::EntityReads => "entity_reads",
            PipelineStage::Poll => "poll",
            PipelineStage::Contextualize => "contextualize",
            PipelineStage::Expire => "expire",
            PipelineStage::Flush => "flush",
        }
    }
}

// ---------------------------------------------------------------------------
// Stage reports
// ---------------------------------------------------------------------------

/// What the poll stage saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Asset reads that completed and were copied into place.
    pub available: usize,
    /// Asset reads that failed or did not fit their destination.
    pub broken: usize,
    /// Completions for events that were already resolved or flushed.
    pub ignored: usize,
    pub entities_loaded: usize,
    pub entities_rejected: usize,
}

/// What the contextualize stage did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextualizeStats {
    /// Requests taken from the pending list.
    pub requests: usize,
    /// Reads submitted.
    pub scheduled: usize,
    /// Requests dropped because the asset is already known.
    pub duplicates: usize,
    /// Requests dropped because their owning type did not resolve.
    pub unresolved: usize,
    /// Requests left invalid by the module or by transient exhaustion.
    pub rejected: usize,
}

/// Everything one [`AssetManager::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineTickReport {
    pub tick: u64,
    pub entity_reads: usize,
    pub poll: PollStats,
    pub contextualize: ContextualizeStats,
    pub expired: usize,
    pub flush: FlushStats,
}

// ---------------------------------------------------------------------------
// Entity loading
// ---------------------------------------------------------------------------

/// Why an entity blob was not loaded.
#[derive(Debug, thiserror::Error)]
pub enum EntityLoadError {
    #[error("invalid entity blob: {0}")]
    Blob(#[from] BlobError),

    #[error("entity table rejected: {0}")]
    World(#[from] WorldError),

    /// A component callback failed. Fatal.
    #[error("component callback failed: {0}")]
    Callback(#[from] Crash),
}

impl EntityLoadError {
    /// Whether the failure must abort the pipeline rather than just the
    /// entity.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EntityLoadError::Callback(_))
    }
}

/// What loading one entity blob committed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityLoadSummary {
    pub entities: usize,
    /// Asset requests added to the contextualize queue.
    pub asset_requests: usize,
    pub component_groups: usize,
    /// Component groups whose type is not registered.
    pub skipped_component_groups: usize,
}

// ---------------------------------------------------------------------------
// AssetManager
// ---------------------------------------------------------------------------

/// Drives the load → contextualize → read → index pipeline.
pub struct AssetManager {
    config: PipelineConfig,
    registry: ModuleRegistry,
    io: Box<dyn AsyncIo>,
    transient: TransientAllocator,
    catalog: AssetCatalog,
    index_queue: IndexQueue,
    /// Requests awaiting the next contextualize stage.
    pending_requests: Vec<AssetRequest>,
    /// Entity blobs awaiting submission.
    queued_entities: Vec<HashId>,
    entity_reads_in_flight: usize,
    /// Reused between polls.
    completions: Vec<IoCompletion>,
    tick: u64,
}

impl AssetManager {
    pub fn new(config: PipelineConfig, registry: ModuleRegistry, io: Box<dyn AsyncIo>) -> Self {
        let transient = TransientAllocator::with_budget(
            config.initial_transient_slots,
            config.transient_budget_bytes,
        );
        tracing::info!(
            asset_root = %config.asset_root.display(),
            modules = registry.module_count(),
            max_pending_ticks = ?config.max_pending_ticks,
            "asset manager created"
        );
        Self {
            config,
            registry,
            io,
            transient,
            catalog: AssetCatalog::new(),
            index_queue: IndexQueue::new(),
            pending_requests: Vec::new(),
            queued_entities: Vec::new(),
            entity_reads_in_flight: 0,
            completions: Vec::new(),
            tick: 0,
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ModuleRegistry {
        &mut self.registry
    }

    pub fn catalog(&self) -> &AssetCatalog {
        &self.catalog
    }

    pub fn transient(&self) -> &TransientAllocator {
        &self.transient
    }

    pub fn index_queue(&self) -> &IndexQueue {
        &self.index_queue
    }

    pub fn pending_requests(&self) -> &[AssetRequest] {
        &self.pending_requests
    }

    /// Pipeline ticks started so far.
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// No requests, reads or unflushed events remain.
    pub fn is_idle(&self) -> bool {
        self.pending_requests.is_empty()
            && self.queued_entities.is_empty()
            && self.entity_reads_in_flight == 0
            && self.index_queue.is_empty()
    }

    // -- intake -------------------------------------------------------------

    /// Queue one asset for the next contextualize stage.
    pub fn request_asset(&mut self, request: AssetRequest) {
        self.pending_requests.push(request);
    }

    pub fn request_assets(&mut self, requests: impl IntoIterator<Item = AssetRequest>) {
        self.pending_requests.extend(requests);
    }

    /// Queue an entity blob; its read is submitted on the next tick.
    pub fn queue_entity(&mut self, entity_id: HashId) {
        tracing::debug!(entity = %entity_id, "entity queued");
        self.queued_entities.push(entity_id);
    }

    // -- tick ---------------------------------------------------------------

    /// Run every stage once.
    ///
    /// # Errors
    ///
    /// The first [`Crash`] raised by a module callback. Stages after the
    /// failing one do not run this tick.
    pub fn tick(&mut self, world: &mut WorldState) -> Result<PipelineTickReport, Crash> {
        let mut report = self.begin_tick();
        for stage in PipelineStage::ALL {
            self.run_stage(stage, world, &mut report)?;
        }
        Ok(report)
    }

    /// Advance the tick counter and return an empty report for the new tick.
    /// Callers that time or observe stages run [`PipelineStage::ALL`]
    /// through [`run_stage`](Self::run_stage) themselves.
    pub fn begin_tick(&mut self) -> PipelineTickReport {
        PipelineTickReport {
            tick: self.advance_tick(),
            ..PipelineTickReport::default()
        }
    }

    /// Run one stage and record its outcome in `report`.
    ///
    /// # Errors
    ///
    /// A [`Crash`] from a module callback run by the stage.
    pub fn run_stage(
        &mut self,
        stage: PipelineStage,
        world: &mut WorldState,
        report: &mut PipelineTickReport,
    ) -> Result<(), Crash> {
        match stage {
            PipelineStage::EntityReads => report.entity_reads = self.submit_entity_reads(),
            PipelineStage::Poll => report.poll = self.poll_events(world)?,
            PipelineStage::Contextualize => report.contextualize = self.contextualize(world)?,
            PipelineStage::Expire => report.expired = self.expire_stalled(),
            PipelineStage::Flush => report.flush = self.flush_index_queue(world)?,
        }
        Ok(())
    }

    /// Start a new pipeline tick. Events scheduled from now on carry the new
    /// tick number.
    pub fn advance_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Submit whole-file reads for every queued entity.
    pub fn submit_entity_reads(&mut self) -> usize {
        let mut submitted = 0;
        for entity_id in std::mem::take(&mut self.queued_entities) {
            let request = ReadRequest {
                path: self.config.entity_path(entity_id),
                len: None,
                tag: IoTag::Entity { entity_id },
            };
            match self.io.submit(request) {
                Ok(()) => {
                    self.entity_reads_in_flight += 1;
                    submitted += 1;
                }
                Err(err) => {
                    tracing::error!(entity = %entity_id, error = %err, "failed to schedule entity read");
                }
            }
        }
        submitted
    }

    // -- poll ---------------------------------------------------------------

    /// Drain ready completions.
    ///
    /// # Errors
    ///
    /// The first [`Crash`] from a component callback while committing an
    /// entity. Every other completion of the poll is still routed before it
    /// is returned.
    pub fn poll_events(&mut self, world: &mut WorldState) -> Result<PollStats, Crash> {
        let mut stats = PollStats::default();
        let mut first_crash = None;
        let mut completions = std::mem::take(&mut self.completions);
        self.io.poll(&mut completions);

        for completion in completions.drain(..) {
            match completion.tag {
                IoTag::Asset { batch, slot } => {
                    self.complete_asset(batch, slot, completion.result, &mut stats);
                }
                IoTag::Entity { entity_id } => {
                    self.entity_reads_in_flight = self.entity_reads_in_flight.saturating_sub(1);
                    let loaded = match completion.result {
                        Ok(bytes) => self.load_entity_blob(entity_id, &bytes, world),
                        Err(err) => {
                            tracing::error!(entity = %entity_id, error = %err, "entity read failed");
                            stats.entities_rejected += 1;
                            continue;
                        }
                    };
                    match loaded {
                        Ok(_) => stats.entities_loaded += 1,
                        Err(EntityLoadError::Callback(crash)) => {
                            tracing::error!(entity = %entity_id, error = %crash, "component callback crashed");
                            stats.entities_rejected += 1;
                            first_crash.get_or_insert(crash);
                        }
                        Err(err) => {
                            tracing::error!(entity = %entity_id, error = %err, "entity load aborted");
                            stats.entities_rejected += 1;
                        }
                    }
                }
            }
        }

        self.completions = completions;
        match first_crash {
            Some(crash) => Err(crash),
            None => Ok(stats),
        }
    }

    fn complete_asset(
        &mut self,
        batch: u64,
        slot: usize,
        result: std::io::Result<Vec<u8>>,
        stats: &mut PollStats,
    ) {
        let Some(event) = self.index_queue.event_mut(batch, slot) else {
            tracing::warn!(batch, slot, "completion for a flushed batch ignored");
            stats.ignored += 1;
            return;
        };
        if event.is_resolved() {
            tracing::warn!(batch, slot, state = ?event.state(), "late completion ignored");
            stats.ignored += 1;
            return;
        }
        let Some(context) = event.context_mut() else {
            stats.ignored += 1;
            return;
        };
        let asset_id = context.asset_id;
        let group = context.group_id;

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(asset_id = %asset_id, %group, error = %err, "asset read failed");
                event.mark_broken();
                stats.broken += 1;
                return;
            }
        };

        let copied = match &mut context.buffer {
            LoadBuffer::Transient(TransientLocation::Allocated { id, size }) => {
                bytes.len() <= *size
                    && match self.transient.get_buffer_mut(*id) {
                        Some(dest) if dest.len() >= bytes.len() => {
                            dest[..bytes.len()].copy_from_slice(&bytes);
                            true
                        }
                        _ => false,
                    }
            }
            LoadBuffer::Module(dest) if dest.len() >= bytes.len() => {
                dest[..bytes.len()].copy_from_slice(&bytes);
                true
            }
            _ => false,
        };

        if copied {
            tracing::debug!(asset_id = %asset_id, %group, bytes = bytes.len(), "asset read complete");
            event.mark_available();
            stats.available += 1;
        } else {
            tracing::warn!(
                asset_id = %asset_id,
                %group,
                bytes = bytes.len(),
                "asset does not fit its destination buffer"
            );
            event.mark_broken();
            stats.broken += 1;
        }
    }

    // -- contextualize -------------------------------------------------------

    /// Contextualize and schedule every pending request.
    ///
    /// # Errors
    ///
    /// A [`Crash`] from a module's `contextualize` callback. Requests of
    /// later batches are dropped.
    pub fn contextualize(&mut self, world: &mut WorldState) -> Result<ContextualizeStats, Crash> {
        let mut stats = ContextualizeStats::default();
        let mut requests = std::mem::take(&mut self.pending_requests);
        if requests.is_empty() {
            return Ok(stats);
        }
        stats.requests = requests.len();

        // Stable: requests of one type keep their arrival order.
        requests.sort_by_key(|r| r.group_id);

        let mut start = 0;
        while start < requests.len() {
            let group = requests[start].group_id;
            let end = requests[start..]
                .iter()
                .position(|r| r.group_id != group)
                .map_or(requests.len(), |len| start + len);
            self.contextualize_batch(&requests[start..end], world, &mut stats)?;
            start = end;
        }

        Ok(stats)
    }

    fn contextualize_batch(
        &mut self,
        requests: &[AssetRequest],
        world: &mut WorldState,
        stats: &mut ContextualizeStats,
    ) -> Result<(), Crash> {
        let group = requests[0].group_id;
        let Some((definition, module)) = self.registry.resolve_asset(group) else {
            tracing::warn!(%group, requests = requests.len(), "skipping batch, owning type not resolvable");
            stats.unresolved += requests.len();
            return Ok(());
        };

        let mut seen = HashSet::new();
        let mut contexts = Vec::with_capacity(requests.len());
        for request in requests {
            let known = self.catalog.is_known(group, request.asset_id)
                || seen.contains(&request.asset_id);
            if known && !request.replace_existing {
                tracing::debug!(asset_id = %request.asset_id, %group, "duplicate asset request dropped");
                stats.duplicates += 1;
                continue;
            }
            seen.insert(request.asset_id);
            contexts.push(LoadingContext::from_request(request));
        }
        if contexts.is_empty() {
            return Ok(());
        }

        let mut services = ServiceTable {
            world,
            catalog: &self.catalog,
            tick: self.tick,
        };
        module.contextualize(&definition.asset_type, &mut services, &mut contexts)?;

        // Only the pipeline allocates transient memory and consumes buffers.
        for ctx in &mut contexts {
            if let LoadBuffer::Transient(TransientLocation::Allocated { .. }) | LoadBuffer::Consumed =
                ctx.buffer
            {
                tracing::warn!(
                    asset_id = %ctx.asset_id,
                    %group,
                    buffer = ?ctx.buffer,
                    "module chose a pipeline-owned buffer state, rejecting asset"
                );
                ctx.reject();
            }
        }

        // -- shared transient allocation -------------------------------------
        let mut transient_total = Some(0usize);
        let mut transient_children = 0;
        for ctx in &contexts {
            if let LoadBuffer::Transient(TransientLocation::Requested(size)) = ctx.buffer {
                transient_total = transient_total.and_then(|total| total.checked_add(size));
                transient_children += 1;
            }
        }

        let mut buffer_id = None;
        if transient_children > 0 {
            let allocated = match transient_total {
                Some(total) => self
                    .transient
                    .create_buffer_group(total, transient_children)
                    .map_err(|err| err.to_string()),
                None => Err("transient sizes overflow".to_owned()),
            };
            match allocated {
                Ok(id) => {
                    let mut offset = 0;
                    for ctx in &mut contexts {
                        if let LoadBuffer::Transient(TransientLocation::Requested(size)) = ctx.buffer {
                            ctx.buffer = LoadBuffer::Transient(TransientLocation::Allocated {
                                id: id.with_child(offset),
                                size,
                            });
                            offset += size;
                        }
                    }
                    buffer_id = Some(id);
                }
                Err(reason) => {
                    tracing::warn!(
                        %group,
                        assets = transient_children,
                        error = %reason,
                        "transient allocation failed, skipping the batch's transient assets"
                    );
                    for ctx in &mut contexts {
                        if matches!(ctx.buffer, LoadBuffer::Transient(_)) {
                            ctx.reject();
                        }
                    }
                }
            }
        }

        // -- schedule ---------------------------------------------------------
        let mut events = Vec::with_capacity(contexts.len());
        for ctx in contexts {
            match ctx.buffer {
                LoadBuffer::Transient(TransientLocation::Allocated { .. }) | LoadBuffer::Module(_) => {
                    events.push(AsyncAssetEvent::new(ctx, self.tick));
                }
                _ => {
                    tracing::debug!(asset_id = %ctx.asset_id, %group, "asset rejected during contextualize");
                    stats.rejected += 1;
                }
            }
        }
        if events.is_empty() {
            return Ok(());
        }

        let slots = events.len();
        let batch = self.index_queue.push(buffer_id, events);
        for slot in 0..slots {
            let Some(event) = self.index_queue.event_mut(batch, slot) else {
                continue;
            };
            let Some(ctx) = event.context() else {
                continue;
            };
            let asset_id = ctx.asset_id;
            let request = ReadRequest {
                path: self.config.asset_path(asset_id),
                len: Some(ctx.source_size),
                tag: IoTag::Asset { batch, slot },
            };
            self.catalog.mark_scheduled(group, asset_id);
            match self.io.submit(request) {
                Ok(()) => {
                    tracing::debug!(asset_id = %asset_id, %group, batch, slot, "asset read scheduled");
                    stats.scheduled += 1;
                }
                Err(err) => {
                    tracing::warn!(asset_id = %asset_id, %group, error = %err, "failed to schedule asset read");
                    event.mark_broken();
                }
            }
        }

        Ok(())
    }

    // -- expire / flush ------------------------------------------------------

    /// Mark reads pending for `max_pending_ticks` or more as broken. Does
    /// nothing when no deadline is configured.
    pub fn expire_stalled(&mut self) -> usize {
        match self.config.max_pending_ticks {
            Some(max) => self.index_queue.expire_stalled(self.tick, max.get()),
            None => 0,
        }
    }

    /// Index resolved events from the head of the queue.
    ///
    /// # Errors
    ///
    /// The first [`Crash`] from an `index` callback.
    pub fn flush_index_queue(&mut self, world: &mut WorldState) -> Result<FlushStats, Crash> {
        self.index_queue.flush(&mut FlushEnv {
            registry: &mut self.registry,
            transient: &mut self.transient,
            catalog: &mut self.catalog,
            world,
            tick: self.tick,
        })
    }

    // -- entities -------------------------------------------------------------

    /// Decode `bytes` as entity `entity_id` and commit it.
    ///
    /// The blob is validated completely first. Then the entity table goes to
    /// `world`, the referenced assets are queued for contextualization, and
    /// the component groups are handed to their modules.
    ///
    /// # Errors
    ///
    /// - [`EntityLoadError::Blob`] / [`EntityLoadError::World`]: nothing was
    ///   committed.
    /// - [`EntityLoadError::Callback`]: a component callback crashed; the
    ///   entity table and asset requests are already committed.
    pub fn load_entity_blob(
        &mut self,
        entity_id: HashId,
        bytes: &[u8],
        world: &mut WorldState,
    ) -> Result<EntityLoadSummary, EntityLoadError> {
        let blob = entity_blob::decode(bytes)?;

        let mut requests = Vec::new();
        for refs in &blob.asset_groups {
            for asset in &refs.assets {
                let size = usize::try_from(asset.size).map_err(|_| BlobError::AssetTooLarge {
                    asset_id: asset.asset_id,
                    size: asset.size,
                })?;
                requests.push(AssetRequest::new(refs.group, asset.asset_id, size));
            }
        }

        world.load_entities(&blob.entities)?;

        let mut summary = EntityLoadSummary {
            entities: blob.entities.len(),
            asset_requests: requests.len(),
            ..EntityLoadSummary::default()
        };
        self.pending_requests.extend(requests);

        for group in &blob.component_groups {
            let Some((definition, module)) = self.registry.resolve_component(group.group) else {
                tracing::warn!(entity = %entity_id, group = %group.group, "skipping unregistered component group");
                summary.skipped_component_groups += 1;
                continue;
            };
            let mut services = ServiceTable {
                world: &mut *world,
                catalog: &self.catalog,
                tick: self.tick,
            };
            let mut stream = Cursor::new(group.payload.as_slice());
            module.load_component_group(
                &definition.component_type,
                &mut services,
                group.count,
                &mut stream,
            )?;
            summary.component_groups += 1;
        }

        tracing::info!(
            entity = %entity_id,
            entities = summary.entities,
            asset_requests = summary.asset_requests,
            component_groups = summary.component_groups,
            "entity loaded"
        );
        Ok(summary)
    }

    // -- unload ---------------------------------------------------------------

    /// Destroy an indexed asset through its module and forget it.
    ///
    /// Unknown or not yet indexed assets are logged and ignored.
    ///
    /// # Errors
    ///
    /// A [`Crash`] from the module's `destroy` callback.
    pub fn unload(
        &mut self,
        group: GroupId,
        asset_id: HashId,
        world: &mut WorldState,
    ) -> CallbackResult {
        if !self.catalog.is_indexed(group, asset_id) {
            tracing::warn!(asset_id = %asset_id, %group, "unload of an asset that is not indexed");
            return Ok(());
        }
        let Some((definition, module)) = self.registry.resolve_asset(group) else {
            return Ok(());
        };
        let mut services = ServiceTable {
            world,
            catalog: &self.catalog,
            tick: self.tick,
        };
        module.destroy(&definition.asset_type, &mut services, asset_id)?;
        self.catalog.forget(group, asset_id);
        tracing::info!(asset_id = %asset_id, %group, "asset unloaded");
        Ok(())
    }

    /// Dispose every module. The manager accepts no further work afterwards
    /// that needs a module.
    pub fn shutdown(&mut self) {
        if !self.is_idle() {
            tracing::warn!(
                pending_requests = self.pending_requests.len(),
                pending_events = self.index_queue.pending_events(),
                "shutting down with work in flight"
            );
        }
        self.registry.unload_all();
    }
}

impl std::fmt::Debug for AssetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetManager")
            .field("tick", &self.tick)
            .field("registry", &self.registry)
            .field("pending_requests", &self.pending_requests.len())
            .field("pending_events", &self.index_queue.pending_events())
            .field("io_in_flight", &self.io.in_flight())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
