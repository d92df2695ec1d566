//! Tessera Engine -- frame loop, configuration and logging around the asset pipeline.
//!
//! This crate builds on [`tessera_assets`] to provide the runtime driver: a
//! [`FrameLoop`](frame::FrameLoop) that owns the world and the
//! [`AssetManager`](tessera_assets::manager::AssetManager), runs one pipeline
//! tick per frame and times each stage.
//!
//! # Quick Start
//!
//! ```
//! use tessera_engine::prelude::*;
//!
//! let config = EngineConfig::from_json_str(r#"{ "max_frames": 10 }"#).unwrap();
//! let mut frames = FrameLoop::new(&config, ModuleRegistry::new(), Box::new(MemoryIo::new()));
//!
//! let summary = frames.run_until_idle(config.max_frames).unwrap();
//! assert!(summary.idle);
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod frame;
pub mod logging;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the core crate for convenience.
pub use tessera_core;

/// Re-export the asset pipeline crate for convenience.
pub use tessera_assets;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use tessera_assets::prelude::*;
    pub use tessera_core::prelude::*;

    // Engine-specific exports.
    pub use crate::config::{entity_id_from_str, EngineConfig};
    pub use crate::frame::{FrameDiagnostics, FrameLoop, PipelineTotals, RunSummary};
}
