//! Property tests for entity table registration.
//!
//! A table either registers completely or leaves the world exactly as it
//! was, whatever mix of duplicate ids and dangling parents it carries.

use proptest::prelude::*;
use tessera_core::world::{Entity, EntityId, WorldError, WorldState};

/// Small ids so duplicates and dangling parents are common.
fn table() -> impl Strategy<Value = Vec<Entity>> {
    prop::collection::vec(
        (0..12i32, prop::option::weighted(0.6, 0..12i32)).prop_map(|(id, parent)| Entity {
            id: EntityId(id),
            parent: parent.map(EntityId),
        }),
        0..10,
    )
}

fn snapshot(world: &WorldState) -> Vec<Entity> {
    world.entities().copied().collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1_000))]

    #[test]
    fn load_is_all_or_nothing(first in table(), second in table()) {
        let mut world = WorldState::new();
        let _ = world.load_entities(&first);
        let before = snapshot(&world);

        match world.load_entities(&second) {
            Ok(()) => {
                prop_assert_eq!(world.entity_count(), before.len() + second.len());
                for entity in &second {
                    prop_assert_eq!(world.entity(entity.id), Some(entity));
                }
            }
            Err(WorldError::DuplicateEntity { id }) => {
                prop_assert!(second.iter().any(|e| e.id == id));
                prop_assert_eq!(snapshot(&world), before);
            }
            Err(WorldError::UnknownParent { parent, .. }) => {
                prop_assert!(!world.contains(parent));
                prop_assert_eq!(snapshot(&world), before);
            }
        }
    }

    #[test]
    fn every_parent_is_registered(tables in prop::collection::vec(table(), 1..4)) {
        let mut world = WorldState::new();
        for table in &tables {
            let _ = world.load_entities(table);
        }
        for entity in world.entities() {
            if let Some(parent) = entity.parent {
                prop_assert!(world.contains(parent));
            }
        }
    }
}
