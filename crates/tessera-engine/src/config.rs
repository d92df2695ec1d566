//! Engine configuration, loaded from JSON.
//!
//! ```
//! use tessera_engine::config::EngineConfig;
//!
//! let config = EngineConfig::from_json_str(r#"{
//!     "log_filter": "tessera_assets=debug",
//!     "pipeline": { "asset_root": "data", "max_pending_ticks": 120 }
//! }"#).unwrap();
//!
//! assert_eq!(config.pipeline.max_pending_ticks.map(|t| t.get()), Some(120));
//! assert_eq!(config.max_frames, 600);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tessera_assets::config::PipelineConfig;
use tessera_core::id::HashId;

/// Top-level engine settings. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pipeline: PipelineConfig,
    /// `tracing` filter directive; `RUST_LOG` overrides it.
    pub log_filter: String,
    /// Frame cap for [`FrameLoop::run_until_idle`](crate::frame::FrameLoop::run_until_idle).
    pub max_frames: u64,
    /// Minimum wall-clock milliseconds per frame; 0 runs frames back to back.
    pub frame_interval_ms: u64,
    /// Entity to load at startup: 32 hex digits, or a name to hash.
    pub initial_entity: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            log_filter: "info".to_owned(),
            max_frames: 600,
            frame_interval_ms: 0,
            initial_entity: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, anyhow::Error> {
        serde_json::from_str(json).map_err(|e| anyhow::anyhow!("invalid engine config: {e}"))
    }

    /// Read and parse a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
        let config = Self::from_json_str(&json)?;
        tracing::info!(path = %path.display(), "engine config loaded");
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String, anyhow::Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The startup entity id, if one is configured.
    pub fn initial_entity_id(&self) -> Option<HashId> {
        self.initial_entity.as_deref().map(entity_id_from_str)
    }
}

/// Interpret `s` as 32 hex digits, falling back to hashing it as a name.
pub fn entity_id_from_str(s: &str) -> HashId {
    HashId::from_hex(s).unwrap_or_else(|| HashId::from_name(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_default() {
        assert_eq!(EngineConfig::from_json_str("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn invalid_json_is_an_error() {
        let err = EngineConfig::from_json_str("{ \"max_frames\": \"many\" }").unwrap_err();
        assert!(err.to_string().contains("invalid engine config"));
    }

    #[test]
    fn zero_pending_deadline_is_an_error() {
        let json = r#"{ "pipeline": { "max_pending_ticks": 0 } }"#;
        assert!(EngineConfig::from_json_str(json).is_err());
    }

    #[test]
    fn json_round_trip() {
        let mut config = EngineConfig::default();
        config.initial_entity = Some("level-1".to_owned());
        config.pipeline.transient_budget_bytes = Some(1 << 20);
        let json = config.to_json_pretty().unwrap();
        assert_eq!(EngineConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn initial_entity_accepts_hex_or_name() {
        let id = HashId::from_name("level-1");
        let mut config = EngineConfig {
            initial_entity: Some(id.to_hex()),
            ..EngineConfig::default()
        };
        assert_eq!(config.initial_entity_id(), Some(id));

        config.initial_entity = Some("level-1".to_owned());
        assert_eq!(config.initial_entity_id(), Some(id));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::load(dir.path().join("missing.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }
}
