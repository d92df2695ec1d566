//! The frame loop.
//!
//! A [`FrameLoop`] owns the [`WorldState`] and the [`AssetManager`] and runs
//! one pipeline tick per frame:
//!
//! 1. The world's frame counter advances.
//! 2. Queued entity reads are submitted.
//! 3. Ready completions are polled.
//! 4. Pending asset requests are contextualized and scheduled.
//! 5. Stalled reads are expired (if a deadline is configured).
//! 6. The index queue is flushed.
//!
//! Each stage is timed and the timings, together with the pipeline's own
//! counts, are kept as the frame's [`FrameDiagnostics`].
//!
//! # Example
//!
//! ```
//! use tessera_assets::prelude::*;
//! use tessera_engine::config::EngineConfig;
//! use tessera_engine::frame::FrameLoop;
//!
//! let io = MemoryIo::new();
//! let mut frames = FrameLoop::new(&EngineConfig::default(), ModuleRegistry::new(), Box::new(io));
//!
//! frames.tick().unwrap();
//! assert_eq!(frames.frame_count(), 1);
//! assert!(frames.assets().is_idle());
//! ```

use std::time::{Duration, Instant};

use tessera_assets::context::AssetRequest;
use tessera_assets::io::{AsyncIo, ThreadedFileIo};
use tessera_assets::manager::{AssetManager, PipelineStage, PipelineTickReport};
use tessera_assets::registry::ModuleRegistry;
use tessera_core::id::{GroupId, HashId};
use tessera_core::world::WorldState;
use tessera_core::{CallbackResult, Crash};

use crate::config::EngineConfig;

// ---------------------------------------------------------------------------
// FrameDiagnostics
// ---------------------------------------------------------------------------

/// Timings and counts for the last frame.
#[derive(Debug, Clone, Default)]
pub struct FrameDiagnostics {
    pub frame: u64,
    /// Wall-clock time per pipeline stage, in execution order.
    pub stage_times: Vec<(&'static str, Duration)>,
    pub total_time: Duration,
    pub report: PipelineTickReport,
}

/// Counts accumulated over every frame run so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineTotals {
    pub frames: u64,
    pub scheduled: usize,
    pub indexed: usize,
    pub broken: usize,
    pub entities_loaded: usize,
    pub entities_rejected: usize,
}

impl PipelineTotals {
    fn record(&mut self, report: &PipelineTickReport) {
        self.frames += 1;
        self.scheduled += report.contextualize.scheduled;
        self.indexed += report.flush.indexed;
        self.broken += report.flush.broken;
        self.entities_loaded += report.poll.entities_loaded;
        self.entities_rejected += report.poll.entities_rejected;
    }
}

/// Outcome of [`FrameLoop::run_until_idle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Frames run by this call.
    pub frames: u64,
    /// Whether the pipeline went idle before the frame cap.
    pub idle: bool,
}

// ---------------------------------------------------------------------------
// FrameLoop
// ---------------------------------------------------------------------------

pub struct FrameLoop {
    world: WorldState,
    assets: AssetManager,
    /// Minimum wall-clock time per frame in `run_until_idle`.
    frame_interval: Duration,
    frame_count: u64,
    totals: PipelineTotals,
    last_diagnostics: FrameDiagnostics,
}

impl FrameLoop {
    pub fn new(config: &EngineConfig, registry: ModuleRegistry, io: Box<dyn AsyncIo>) -> Self {
        Self {
            world: WorldState::new(),
            assets: AssetManager::new(config.pipeline.clone(), registry, io),
            frame_interval: Duration::from_millis(config.frame_interval_ms),
            frame_count: 0,
            totals: PipelineTotals::default(),
            last_diagnostics: FrameDiagnostics::default(),
        }
    }

    /// A frame loop reading from the filesystem with
    /// `config.pipeline.io_workers` reader threads.
    pub fn with_file_io(config: &EngineConfig, registry: ModuleRegistry) -> Self {
        let io = ThreadedFileIo::new(config.pipeline.io_workers);
        Self::new(config, registry, Box::new(io))
    }

    /// Run one frame.
    ///
    /// # Errors
    ///
    /// A [`Crash`] from a module callback. The frame's later stages do not
    /// run and its diagnostics are not recorded.
    pub fn tick(&mut self) -> Result<&FrameDiagnostics, Crash> {
        let frame_start = Instant::now();
        let mut stage_times = Vec::with_capacity(PipelineStage::ALL.len());

        let frame = self.world.advance_tick();
        let mut report = self.assets.begin_tick();
        for stage in PipelineStage::ALL {
            let start = Instant::now();
            self.assets.run_stage(stage, &mut self.world, &mut report)?;
            stage_times.push((stage.name(), start.elapsed()));
        }

        self.frame_count += 1;
        self.totals.record(&report);
        self.last_diagnostics = FrameDiagnostics {
            frame,
            stage_times,
            total_time: frame_start.elapsed(),
            report,
        };
        Ok(&self.last_diagnostics)
    }

    /// Tick until the pipeline is idle or `max_frames` frames have run.
    pub fn run_until_idle(&mut self, max_frames: u64) -> Result<RunSummary, Crash> {
        let mut frames = 0;
        while !self.assets.is_idle() {
            if frames == max_frames {
                tracing::warn!(
                    max_frames,
                    pending_events = self.assets.index_queue().pending_events(),
                    "frame cap reached before the pipeline went idle"
                );
                return Ok(RunSummary {
                    frames,
                    idle: false,
                });
            }
            let elapsed = self.tick()?.total_time;
            frames += 1;
            if let Some(rest) = self.frame_interval.checked_sub(elapsed) {
                std::thread::sleep(rest);
            }
        }
        Ok(RunSummary { frames, idle: true })
    }

    // -- forwarding ---------------------------------------------------------

    pub fn load_entity(&mut self, entity_id: HashId) {
        self.assets.queue_entity(entity_id);
    }

    pub fn request_asset(&mut self, request: AssetRequest) {
        self.assets.request_asset(request);
    }

    pub fn unload(&mut self, group: GroupId, asset_id: HashId) -> CallbackResult {
        self.assets.unload(group, asset_id, &mut self.world)
    }

    /// Dispose every module.
    pub fn shutdown(&mut self) {
        tracing::info!(frames = self.frame_count, "frame loop shutting down");
        self.assets.shutdown();
    }

    // -- accessors ----------------------------------------------------------

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn assets(&self) -> &AssetManager {
        &self.assets
    }

    pub fn assets_mut(&mut self) -> &mut AssetManager {
        &mut self.assets
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn totals(&self) -> PipelineTotals {
        self.totals
    }

    pub fn last_diagnostics(&self) -> &FrameDiagnostics {
        &self.last_diagnostics
    }
}

impl std::fmt::Debug for FrameLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLoop")
            .field("frame_count", &self.frame_count)
            .field("entities", &self.world.entity_count())
            .field("assets", &self.assets)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_assets::io::MemoryIo;

    fn frames() -> FrameLoop {
        FrameLoop::new(
            &EngineConfig::default(),
            ModuleRegistry::new(),
            Box::new(MemoryIo::new()),
        )
    }

    #[test]
    fn tick_records_every_stage() {
        let mut frames = frames();
        let diag = frames.tick().unwrap();
        let names: Vec<&str> = diag.stage_times.iter().map(|(n, _)| *n).collect();
        let expected: Vec<&str> = PipelineStage::ALL.iter().map(|s| s.name()).collect();
        assert_eq!(names, expected);
        assert_eq!(names[0], "entity_reads");
        assert_eq!(diag.frame, 1);
        assert_eq!(diag.report.tick, 1);
        assert_eq!(frames.world().tick(), 1);
    }

    #[test]
    fn run_until_idle_on_idle_pipeline_runs_nothing() {
        let mut frames = frames();
        assert_eq!(
            frames.run_until_idle(10).unwrap(),
            RunSummary {
                frames: 0,
                idle: true
            }
        );
        assert_eq!(frames.totals(), PipelineTotals::default());
    }
}
