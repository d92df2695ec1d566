//! Headless entity loading demo -- writes a small level to a temporary
//! directory, then loads it through the threaded file backend.
//!
//! Run with:
//!   cargo run --example load_entity -p tessera-engine
//!
//! Pass a JSON config path to load `initial_entity` from your own asset root
//! instead:
//!   cargo run --example load_entity -p tessera-engine -- engine.json

use std::collections::HashMap;
use std::io::Read;

use tessera_engine::logging;
use tessera_engine::prelude::*;

// ---------------------------------------------------------------------------
// Demo module
// ---------------------------------------------------------------------------

/// Text assets land in scratch memory and are copied out; palettes are read
/// straight into buffers the module keeps.
#[derive(Default)]
struct Catalogue {
    texts: HashMap<HashId, String>,
    palettes: HashMap<HashId, Vec<u8>>,
    names: Vec<String>,
}

impl Module for Catalogue {
    fn definition(&self) -> ModuleDefinition {
        ModuleDefinition::new("demo")
            .with_asset("text")
            .with_asset("palette")
            .with_component("name")
    }

    fn contextualize(
        &mut self,
        asset_type: &NamePair,
        _services: &mut ServiceTable<'_>,
        batch: &mut [LoadingContext],
    ) -> CallbackResult {
        let owned = asset_type.display_name == "palette";
        for ctx in batch {
            if owned {
                ctx.provide_module_buffer(vec![0; ctx.source_size]);
            } else {
                ctx.request_transient_source();
            }
        }
        Ok(())
    }

    fn index(
        &mut self,
        asset_type: &NamePair,
        services: &mut ServiceTable<'_>,
        asset: LoadedAsset<'_>,
    ) -> CallbackResult {
        tracing::info!(
            asset_type = %asset_type,
            asset_id = %asset.asset_id,
            bytes = asset.bytes().len(),
            tick = services.tick,
            "indexed"
        );
        let asset_id = asset.asset_id;
        if asset.is_transient() {
            self.texts
                .insert(asset_id, String::from_utf8_lossy(asset.bytes()).into_owned());
        } else if let Some(buffer) = asset.into_module_buffer() {
            self.palettes.insert(asset_id, buffer);
        }
        Ok(())
    }

    fn load_component_group(
        &mut self,
        _component_type: &NamePair,
        _services: &mut ServiceTable<'_>,
        count: usize,
        stream: &mut ComponentStream<'_>,
    ) -> CallbackResult {
        let mut payload = String::new();
        stream
            .read_to_string(&mut payload)
            .map_err(|err| Crash::from_error("reading names", err))?;
        self.names
            .extend(payload.split(',').take(count).map(str::to_owned));
        Ok(())
    }

    fn dispose(&mut self) {
        tracing::info!(
            texts = self.texts.len(),
            palettes = self.palettes.len(),
            names = ?self.names,
            "demo module disposed"
        );
    }
}

// ---------------------------------------------------------------------------
// Demo data
// ---------------------------------------------------------------------------

/// Write a level with three entities, two text assets and one palette.
fn write_demo_level(config: &PipelineConfig) -> Result<HashId, anyhow::Error> {
    let texts = [("title", "Tessera"), ("hint", "Press any key")];
    let palette: Vec<u8> = (0..48).collect();

    for (name, text) in texts {
        std::fs::write(config.asset_path(HashId::from_name(name)), text)?;
    }
    std::fs::write(config.asset_path(HashId::from_name("palette")), &palette)?;

    let text_refs = texts
        .iter()
        .map(|(name, text)| AssetRef {
            asset_id: HashId::from_name(name),
            size: text.len() as u64,
        })
        .collect();
    let writer = EntityBlobWriter::new()
        .asset_group(GroupId::from_names("demo", "text"), text_refs)
        .asset_group(
            GroupId::from_names("demo", "palette"),
            vec![AssetRef {
                asset_id: HashId::from_name("palette"),
                size: palette.len() as u64,
            }],
        )
        .entity(Entity::root(1))
        .entity(Entity::child(2, 1))
        .entity(Entity::child(3, 1))
        .component_group(
            GroupId::from_names("demo", "name"),
            3,
            b"menu,title,hint".to_vec(),
        );

    let level = HashId::from_name("menu-level");
    let bytes = writer
        .encode()
        .map_err(|e| anyhow::anyhow!("failed to encode level: {e}"))?;
    std::fs::write(config.entity_path(level), bytes)?;
    Ok(level)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<(), anyhow::Error> {
    // Keeps the demo directory alive until the end of main.
    let mut scratch = None;

    let (config, level) = match std::env::args().nth(1) {
        Some(path) => {
            let config = EngineConfig::load(&path)?;
            let level = config
                .initial_entity_id()
                .ok_or_else(|| anyhow::anyhow!("{path} names no initial_entity"))?;
            (config, level)
        }
        None => {
            let dir = tempfile::tempdir()?;
            let mut config = EngineConfig {
                frame_interval_ms: 1,
                ..EngineConfig::default()
            };
            config.pipeline.asset_root = dir.path().to_path_buf();
            let level = write_demo_level(&config.pipeline)?;
            scratch = Some(dir);
            (config, level)
        }
    };
    logging::init(&config.log_filter);

    let mut registry = ModuleRegistry::new();
    registry
        .register(Catalogue::default())
        .map_err(|e| anyhow::anyhow!("module registration failed: {e}"))?;

    let mut frames = FrameLoop::with_file_io(&config, registry);
    frames.load_entity(level);

    let summary = frames
        .run_until_idle(config.max_frames)
        .map_err(|crash| anyhow::anyhow!("pipeline crashed: {crash}"))?;
    let totals = frames.totals();
    let diag = frames.last_diagnostics();

    println!(
        "{} after {} frames: {} entities, {} assets indexed, {} broken",
        if summary.idle { "idle" } else { "still busy" },
        summary.frames,
        frames.world().entity_count(),
        totals.indexed,
        totals.broken,
    );
    for (stage, time) in &diag.stage_times {
        println!("  last frame {stage:<14} {time:?}");
    }

    frames.shutdown();
    drop(scratch);
    Ok(())
}
