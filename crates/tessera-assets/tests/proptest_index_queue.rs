//! Property tests for index ordering.
//!
//! Whatever order reads resolve in, flushing after every resolution must
//! index a prefix of the scheduling order (minus broken events), and never
//! hand a broken event to the module.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use tessera_assets::catalog::AssetCatalog;
use tessera_assets::index_queue::{FlushEnv, IndexQueue};
use tessera_assets::prelude::*;
use tessera_core::prelude::*;

struct Sink(Rc<RefCell<Vec<HashId>>>);

impl Module for Sink {
    fn definition(&self) -> ModuleDefinition {
        ModuleDefinition::new("sink").with_asset("item")
    }

    fn index(
        &mut self,
        _asset_type: &NamePair,
        _services: &mut ServiceTable<'_>,
        asset: LoadedAsset<'_>,
    ) -> CallbackResult {
        self.0.borrow_mut().push(asset.asset_id);
        Ok(())
    }
}

fn item(n: usize) -> HashId {
    HashId::from_name(&format!("item-{n}"))
}

/// Batch sizes, a resolution order over all events, and which are broken.
fn scenario() -> impl Strategy<Value = (Vec<usize>, Vec<usize>, Vec<bool>)> {
    prop::collection::vec(1..5usize, 1..5).prop_flat_map(|sizes| {
        let total: usize = sizes.iter().sum();
        let order: Vec<usize> = (0..total).collect();
        (
            Just(sizes),
            Just(order).prop_shuffle(),
            prop::collection::vec(prop::bool::weighted(0.2), total),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1_000))]

    #[test]
    fn flush_indexes_in_scheduling_order((sizes, order, broken) in scenario()) {
        let indexed = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ModuleRegistry::new();
        registry.register(Sink(Rc::clone(&indexed))).unwrap();
        let mut transient = TransientAllocator::default();
        let mut catalog = AssetCatalog::new();
        let mut world = WorldState::new();
        let group = GroupId::from_names("sink", "item");

        // -- schedule ------------------------------------------------------
        let mut queue = IndexQueue::new();
        let mut locations = Vec::new();
        let mut next = 0;
        for &size in &sizes {
            let events = (next..next + size)
                .map(|n| {
                    let mut ctx = LoadingContext::from_request(&AssetRequest::new(group, item(n), 1));
                    ctx.provide_module_buffer(vec![0]);
                    AsyncAssetEvent::new(ctx, 0)
                })
                .collect();
            let batch = queue.push(None, events);
            locations.extend((0..size).map(|slot| (batch, slot)));
            next += size;
        }

        let expected: Vec<HashId> = (0..next).filter(|&n| !broken[n]).map(item).collect();

        // -- resolve in shuffled order, flushing each time -----------------
        for &n in &order {
            let (batch, slot) = locations[n];
            let event = queue.event_mut(batch, slot).unwrap();
            if broken[n] {
                event.mark_broken();
            } else {
                event.mark_available();
            }

            queue
                .flush(&mut FlushEnv {
                    registry: &mut registry,
                    transient: &mut transient,
                    catalog: &mut catalog,
                    world: &mut world,
                    tick: 1,
                })
                .unwrap();

            let so_far = indexed.borrow();
            prop_assert!(expected.starts_with(&so_far));
        }

        prop_assert_eq!(&*indexed.borrow(), &expected);
        prop_assert!(queue.is_empty());
    }
}
