//! Engine-side entity table.
//!
//! [`WorldState`] holds the entities registered by loaded entity blobs. An
//! entity is just an id and an optional parent; component data lives in the
//! modules that own each component type.
//!
//! Tables are registered all-or-nothing: [`WorldState::load_entities`]
//! validates the complete table before inserting a single entity.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EntityId / Entity
// ---------------------------------------------------------------------------

/// Identifier of an entity, as written by the entity builder.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub i32);

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of the entity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    /// `None` for root entities.
    pub parent: Option<EntityId>,
}

impl Entity {
    pub fn root(id: i32) -> Self {
        Self {
            id: EntityId(id),
            parent: None,
        }
    }

    pub fn child(id: i32, parent: i32) -> Self {
        Self {
            id: EntityId(id),
            parent: Some(EntityId(parent)),
        }
    }
}

// ---------------------------------------------------------------------------
// WorldError
// ---------------------------------------------------------------------------

/// Reasons the world rejects an entity table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    /// The id is already registered, or appears twice in the table.
    #[error("entity {id} is already registered")]
    DuplicateEntity { id: EntityId },

    /// The parent is neither in the table nor in the world.
    #[error("entity {id} references unknown parent {parent}")]
    UnknownParent { id: EntityId, parent: EntityId },
}

// ---------------------------------------------------------------------------
// WorldState
// ---------------------------------------------------------------------------

/// Registered entities plus the frame counter.
#[derive(Debug, Default)]
pub struct WorldState {
    /// Keyed by id; `BTreeMap` keeps iteration deterministic.
    entities: BTreeMap<EntityId, Entity>,
    tick: u64,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a whole entity table.
    ///
    /// # Errors
    ///
    /// - [`WorldError::DuplicateEntity`] if any id is already registered or
    ///   repeated within `entities`.
    /// - [`WorldError::UnknownParent`] if a parent resolves neither inside
    ///   `entities` nor in the world.
    ///
    /// On error the world is left untouched.
    pub fn load_entities(&mut self, entities: &[Entity]) -> Result<(), WorldError> {
        let mut incoming: HashSet<EntityId> = HashSet::with_capacity(entities.len());
        for entity in entities {
            if self.entities.contains_key(&entity.id) || !incoming.insert(entity.id) {
                return Err(WorldError::DuplicateEntity { id: entity.id });
            }
        }

        for entity in entities {
            if let Some(parent) = entity.parent {
                if !incoming.contains(&parent) && !self.entities.contains_key(&parent) {
                    return Err(WorldError::UnknownParent {
                        id: entity.id,
                        parent,
                    });
                }
            }
        }

        for entity in entities {
            self.entities.insert(entity.id, *entity);
        }

        tracing::debug!(count = entities.len(), total = self.entities.len(), "entities registered");
        Ok(())
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Direct children of `parent`, in id order.
    pub fn children_of(&self, parent: EntityId) -> Vec<EntityId> {
        self.entities
            .values()
            .filter(|e| e.parent == Some(parent))
            .map(|e| e.id)
            .collect()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    // -- frame counter ------------------------------------------------------

    /// Advance the frame counter by one and return the new value.
    pub fn advance_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
