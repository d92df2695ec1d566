//! Modules, their callbacks, and the registry that routes work to them.
//!
//! A [`Module`] owns runtime state and declares, through its
//! [`ModuleDefinition`], the asset types and component types it handles.
//! Registering a module fills two routing tables keyed by [`GroupId`]:
//! `(module, asset type) -> AssetDefinition` and
//! `(module, component type) -> ComponentDefinition`.
//!
//! Dispatch always resolves two things: the definition for the group (is
//! this type declared at all?) and the module state for the group's owner.
//! If either is missing the work is skipped.

use std::collections::HashMap;
use std::io::Cursor;

use tessera_core::id::{GroupId, HashId, NamePair};
use tessera_core::world::WorldState;
use tessera_core::{CallbackResult, Crash};

use crate::catalog::AssetCatalog;
use crate::context::LoadingContext;

/// Cursor over one component group's payload.
pub type ComponentStream<'a> = Cursor<&'a [u8]>;

// ---------------------------------------------------------------------------
// ServiceTable
// ---------------------------------------------------------------------------

/// Engine services handed to every module callback.
pub struct ServiceTable<'a> {
    pub world: &'a mut WorldState,
    /// Assets known to the pipeline.
    pub catalog: &'a AssetCatalog,
    /// Pipeline tick during which the callback runs.
    pub tick: u64,
}

// ---------------------------------------------------------------------------
// LoadedAsset
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Payload<'a> {
    Transient(&'a [u8]),
    Module(Vec<u8>),
}

/// An asset whose bytes have been read, as handed to [`Module::index`].
///
/// Transient bytes are borrowed for the duration of the call only; they are
/// reclaimed as soon as `index` returns. A module buffer is handed back by
/// value and belongs to the module again.
#[derive(Debug)]
pub struct LoadedAsset<'a> {
    pub group_id: GroupId,
    pub asset_id: HashId,
    pub source_size: usize,
    pub replace_existing: bool,
    pub user_data: u64,
    payload: Payload<'a>,
}

impl<'a> LoadedAsset<'a> {
    pub(crate) fn transient(context: &LoadingContext, bytes: &'a [u8]) -> Self {
        Self::with_payload(context, Payload::Transient(bytes))
    }

    pub(crate) fn module(context: &LoadingContext, buffer: Vec<u8>) -> Self {
        Self::with_payload(context, Payload::Module(buffer))
    }

    fn with_payload(context: &LoadingContext, payload: Payload<'a>) -> Self {
        Self {
            group_id: context.group_id,
            asset_id: context.asset_id,
            source_size: context.source_size,
            replace_existing: context.replace_existing,
            user_data: context.user_data,
            payload,
        }
    }

    /// The `source_size` bytes read from the asset file.
    pub fn bytes(&self) -> &[u8] {
        let bytes = match &self.payload {
            Payload::Transient(bytes) => bytes,
            Payload::Module(buffer) => buffer.as_slice(),
        };
        &bytes[..self.source_size.min(bytes.len())]
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.payload, Payload::Transient(_))
    }

    /// Take back the module-owned buffer, if this asset was read into one.
    pub fn into_module_buffer(self) -> Option<Vec<u8>> {
        match self.payload {
            Payload::Module(buffer) => Some(buffer),
            Payload::Transient(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// What a module declares about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDefinition {
    pub name: NamePair,
    pub assets: Vec<NamePair>,
    pub components: Vec<NamePair>,
}

impl ModuleDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: NamePair::new(name),
            assets: Vec::new(),
            components: Vec::new(),
        }
    }

    /// Declare an asset type handled by this module.
    pub fn with_asset(mut self, asset_type: &str) -> Self {
        self.assets.push(NamePair::new(asset_type));
        self
    }

    /// Declare a component type handled by this module.
    pub fn with_component(mut self, component_type: &str) -> Self {
        self.components.push(NamePair::new(component_type));
        self
    }
}

/// Routing entry for one `(module, asset type)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDefinition {
    pub module: NamePair,
    pub asset_type: NamePair,
}

/// Routing entry for one `(module, component type)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentDefinition {
    pub module: NamePair,
    pub component_type: NamePair,
}

// ---------------------------------------------------------------------------
// Module
// ---------------------------------------------------------------------------

/// An engine module that owns asset and component state.
///
/// Callbacks for types the module declares must be implemented; the default
/// bodies crash, since a declared type without a handler is a build error in
/// the module, not a data error.
pub trait Module {
    fn definition(&self) -> ModuleDefinition;

    /// Choose a destination buffer for every context in `batch`.
    ///
    /// Every context starts [`Invalid`](crate::context::LoadBuffer::Invalid);
    /// leaving it so rejects the asset.
    fn contextualize(
        &mut self,
        asset_type: &NamePair,
        services: &mut ServiceTable<'_>,
        batch: &mut [LoadingContext],
    ) -> CallbackResult {
        let _ = (services, batch);
        Err(Crash::new(format!(
            "module '{}' does not contextualize asset type {asset_type}",
            self.definition().name.display_name
        )))
    }

    /// Interpret an asset's bytes and install the result.
    fn index(
        &mut self,
        asset_type: &NamePair,
        services: &mut ServiceTable<'_>,
        asset: LoadedAsset<'_>,
    ) -> CallbackResult {
        let _ = (services, asset);
        Err(Crash::new(format!(
            "module '{}' does not index asset type {asset_type}",
            self.definition().name.display_name
        )))
    }

    /// Tear down an indexed asset.
    fn destroy(
        &mut self,
        asset_type: &NamePair,
        services: &mut ServiceTable<'_>,
        asset_id: HashId,
    ) -> CallbackResult {
        let _ = (asset_type, services, asset_id);
        Ok(())
    }

    /// Read `count` components of `component_type` from `stream`.
    fn load_component_group(
        &mut self,
        component_type: &NamePair,
        services: &mut ServiceTable<'_>,
        count: usize,
        stream: &mut ComponentStream<'_>,
    ) -> CallbackResult {
        let _ = (services, count, stream);
        Err(Crash::new(format!(
            "module '{}' does not load component type {component_type}",
            self.definition().name.display_name
        )))
    }

    /// Called once when the registry unloads the module.
    fn dispose(&mut self) {}
}

// ---------------------------------------------------------------------------
// RegistryError
// ---------------------------------------------------------------------------

/// Errors raised while registering modules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Two modules hash to the same name.
    #[error("module name collision: '{name}' ({hash})")]
    NameCollision { name: String, hash: HashId },

    /// A module declares the same asset or component type twice.
    #[error("module '{module}' declares type '{type_name}' twice")]
    DuplicateType { module: String, type_name: String },
}

// ---------------------------------------------------------------------------
// ModuleRegistry
// ---------------------------------------------------------------------------

struct RegisteredModule {
    name: NamePair,
    state: Box<dyn Module>,
}

/// Registered modules and the routing tables built from their definitions.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<HashId, RegisteredModule>,
    /// Registration order, for deterministic disposal.
    order: Vec<HashId>,
    assets: HashMap<GroupId, AssetDefinition>,
    components: HashMap<GroupId, ComponentDefinition>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module and its declared types.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::NameCollision`] if a module with the same name hash
    ///   is registered.
    /// - [`RegistryError::DuplicateType`] if the definition repeats a type.
    ///
    /// Nothing is registered on error.
    pub fn register(&mut self, module: impl Module + 'static) -> Result<(), RegistryError> {
        self.register_boxed(Box::new(module))
    }

    pub fn register_boxed(&mut self, module: Box<dyn Module>) -> Result<(), RegistryError> {
        let definition = module.definition();
        let owner = definition.name.hash;

        if self.modules.contains_key(&owner) {
            return Err(RegistryError::NameCollision {
                name: definition.name.display_name,
                hash: owner,
            });
        }

        let mut asset_entries = Vec::with_capacity(definition.assets.len());
        for asset_type in &definition.assets {
            let group = GroupId::new(owner, asset_type.hash);
            if asset_entries.iter().any(|(g, _)| *g == group) {
                return Err(RegistryError::DuplicateType {
                    module: definition.name.display_name.clone(),
                    type_name: asset_type.display_name.clone(),
                });
            }
            asset_entries.push((
                group,
                AssetDefinition {
                    module: definition.name.clone(),
                    asset_type: asset_type.clone(),
                },
            ));
        }

        let mut component_entries = Vec::with_capacity(definition.components.len());
        for component_type in &definition.components {
            let group = GroupId::new(owner, component_type.hash);
            if component_entries.iter().any(|(g, _)| *g == group) {
                return Err(RegistryError::DuplicateType {
                    module: definition.name.display_name.clone(),
                    type_name: component_type.display_name.clone(),
                });
            }
            component_entries.push((
                group,
                ComponentDefinition {
                    module: definition.name.clone(),
                    component_type: component_type.clone(),
                },
            ));
        }

        self.assets.extend(asset_entries);
        self.components.extend(component_entries);
        self.modules.insert(
            owner,
            RegisteredModule {
                name: definition.name.clone(),
                state: module,
            },
        );
        self.order.push(owner);

        tracing::info!(
            module = %definition.name.display_name,
            hash = %owner,
            assets = definition.assets.len(),
            components = definition.components.len(),
            "module registered"
        );
        Ok(())
    }

    /// Mutable module state for `owner`.
    pub fn find_module_state(&mut self, owner: HashId) -> Option<&mut (dyn Module + 'static)> {
        self.modules.get_mut(&owner).map(|m| m.state.as_mut())
    }

    pub fn module_name(&self, owner: HashId) -> Option<&NamePair> {
        self.modules.get(&owner).map(|m| &m.name)
    }

    pub fn asset_definition(&self, group: GroupId) -> Option<&AssetDefinition> {
        self.assets.get(&group)
    }

    pub fn component_definition(&self, group: GroupId) -> Option<&ComponentDefinition> {
        self.components.get(&group)
    }

    /// Definition and module state for an asset group, if both exist.
    pub fn resolve_asset(
        &mut self,
        group: GroupId,
    ) -> Option<(&AssetDefinition, &mut (dyn Module + 'static))> {
        let Some(definition) = self.assets.get(&group) else {
            tracing::warn!(%group, "asset type not registered");
            return None;
        };
        let Some(module) = self.modules.get_mut(&group.owner) else {
            tracing::warn!(%group, module = %definition.module.display_name, "module state not found");
            return None;
        };
        Some((definition, module.state.as_mut()))
    }

    /// Definition and module state for a component group, if both exist.
    pub fn resolve_component(
        &mut self,
        group: GroupId,
    ) -> Option<(&ComponentDefinition, &mut (dyn Module + 'static))> {
        let Some(definition) = self.components.get(&group) else {
            tracing::warn!(%group, "component type not registered");
            return None;
        };
        let Some(module) = self.modules.get_mut(&group.owner) else {
            tracing::warn!(%group, module = %definition.module.display_name, "module state not found");
            return None;
        };
        Some((definition, module.state.as_mut()))
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Dispose and drop every module, in registration order.
    pub fn unload_all(&mut self) {
        for owner in self.order.drain(..) {
            if let Some(mut module) = self.modules.remove(&owner) {
                module.state.dispose();
                tracing::info!(module = %module.name.display_name, "module unloaded");
            }
        }
        self.assets.clear();
        self.components.clear();
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.order.len())
            .field("assets", &self.assets.len())
            .field("components", &self.components.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Stub {
        definition: ModuleDefinition,
        disposed: Rc<Cell<bool>>,
    }

    impl Stub {
        fn new(definition: ModuleDefinition) -> Self {
            Self {
                definition,
                disposed: Rc::new(Cell::new(false)),
            }
        }
    }

    impl Module for Stub {
        fn definition(&self) -> ModuleDefinition {
            self.definition.clone()
        }

        fn dispose(&mut self) {
            self.disposed.set(true);
        }
    }

    #[test]
    fn register_builds_routing_tables() {
        let mut registry = ModuleRegistry::new();
        registry
            .register(Stub::new(
                ModuleDefinition::new("renderer")
                    .with_asset("mesh")
                    .with_asset("shader")
                    .with_component("mesh_renderer"),
            ))
            .unwrap();

        let mesh = GroupId::from_names("renderer", "mesh");
        let renderer = GroupId::from_names("renderer", "mesh_renderer");
        assert_eq!(
            registry.asset_definition(mesh).unwrap().asset_type.display_name,
            "mesh"
        );
        assert!(registry.component_definition(renderer).is_some());
        assert!(registry.asset_definition(renderer).is_none());
        assert!(registry.find_module_state(mesh.owner).is_some());
        assert_eq!(registry.module_count(), 1);
    }

    #[test]
    fn resolve_requires_both_definition_and_state() {
        let mut registry = ModuleRegistry::new();
        registry
            .register(Stub::new(ModuleDefinition::new("input").with_asset("action")))
            .unwrap();

        assert!(registry
            .resolve_asset(GroupId::from_names("input", "action"))
            .is_some());
        assert!(registry
            .resolve_asset(GroupId::from_names("input", "axis"))
            .is_none());
        assert!(registry
            .resolve_asset(GroupId::from_names("audio", "action"))
            .is_none());
    }

    #[test]
    fn name_collision_rejected() {
        let mut registry = ModuleRegistry::new();
        registry
            .register(Stub::new(ModuleDefinition::new("audio")))
            .unwrap();
        let err = registry
            .register(Stub::new(ModuleDefinition::new("audio").with_asset("clip")))
            .unwrap_err();
        assert!(matches!(err, RegistryError::NameCollision { .. }));
        assert!(registry
            .asset_definition(GroupId::from_names("audio", "clip"))
            .is_none());
    }

    #[test]
    fn duplicate_type_rejected_without_partial_registration() {
        let mut registry = ModuleRegistry::new();
        let err = registry
            .register(Stub::new(
                ModuleDefinition::new("audio")
                    .with_asset("clip")
                    .with_asset("clip"),
            ))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateType {
                module: "audio".to_owned(),
                type_name: "clip".to_owned()
            }
        );
        assert_eq!(registry.module_count(), 0);
    }

    #[test]
    fn unload_all_disposes_modules() {
        let stub = Stub::new(ModuleDefinition::new("audio").with_asset("clip"));
        let disposed = Rc::clone(&stub.disposed);
        let mut registry = ModuleRegistry::new();
        registry.register(stub).unwrap();

        registry.unload_all();
        assert!(disposed.get());
        assert_eq!(registry.module_count(), 0);
        assert!(registry
            .asset_definition(GroupId::from_names("audio", "clip"))
            .is_none());
    }

    #[test]
    fn default_callbacks_crash() {
        let mut stub = Stub::new(ModuleDefinition::new("audio").with_asset("clip"));
        let mut world = WorldState::new();
        let catalog = AssetCatalog::new();
        let mut services = ServiceTable {
            world: &mut world,
            catalog: &catalog,
            tick: 0,
        };
        let clip = NamePair::new("clip");
        let crash = stub
            .contextualize(&clip, &mut services, &mut [])
            .unwrap_err();
        assert!(crash.message().contains("does not contextualize"));
        assert!(stub
            .destroy(&clip, &mut services, HashId::ZERO)
            .is_ok());
    }

    #[test]
    fn loaded_asset_bytes_are_clamped_to_source_size() {
        let request = crate::context::AssetRequest::new(
            GroupId::from_names("audio", "clip"),
            HashId::from_name("a"),
            3,
        );
        let ctx = LoadingContext::from_request(&request);

        let asset = LoadedAsset::module(&ctx, b"abcdef".to_vec());
        assert_eq!(asset.bytes(), b"abc");
        assert!(!asset.is_transient());
        assert_eq!(asset.into_module_buffer().unwrap(), b"abcdef");

        let scratch = *b"xyz123";
        let asset = LoadedAsset::transient(&ctx, &scratch);
        assert_eq!(asset.bytes(), b"xyz");
        assert!(asset.into_module_buffer().is_none());
    }
}
