//! Property tests for the transient buffer pool.
//!
//! A group created for `n` children must stay allocated through the first
//! `n - 1` returns, in any order, and be freed by the `n`-th. Extra returns
//! after that must change nothing.

use proptest::prelude::*;
use tessera_assets::transient::{TransientAllocator, TransientBufferId};

/// Sizes of the children of one group plus a permutation of return order.
fn group_strategy() -> impl Strategy<Value = (Vec<usize>, Vec<usize>)> {
    prop::collection::vec(0..64usize, 1..12).prop_flat_map(|sizes| {
        let order: Vec<usize> = (0..sizes.len()).collect();
        (Just(sizes), Just(order).prop_shuffle())
    })
}

fn child_ids(base: TransientBufferId, sizes: &[usize]) -> Vec<TransientBufferId> {
    let mut offset = 0;
    sizes
        .iter()
        .map(|size| {
            let id = base.with_child(offset);
            offset += size;
            id
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2_000))]

    #[test]
    fn slot_freed_exactly_after_last_return((sizes, order) in group_strategy()) {
        let mut alloc = TransientAllocator::new(2);
        let total: usize = sizes.iter().sum();
        let base = alloc.create_buffer_group(total, sizes.len()).unwrap();
        let ids = child_ids(base, &sizes);

        for (returned, &index) in order.iter().enumerate() {
            prop_assert!(alloc.is_live(base.parent));
            alloc.return_child(ids[index]);
            let remaining = sizes.len() - returned - 1;
            prop_assert_eq!(alloc.live_children(base.parent), remaining);
            prop_assert_eq!(alloc.is_live(base.parent), remaining > 0);
        }

        prop_assert!(alloc.get_buffer(base).is_none());
        prop_assert_eq!(alloc.live_bytes(), 0);
    }

    #[test]
    fn extra_returns_never_touch_a_reused_slot(
        (sizes, order) in group_strategy(),
        extra in 1..5usize,
    ) {
        let mut alloc = TransientAllocator::new(1);
        let total: usize = sizes.iter().sum();
        let base = alloc.create_buffer_group(total, sizes.len()).unwrap();
        let ids = child_ids(base, &sizes);
        for &index in &order {
            alloc.return_child(ids[index]);
        }

        for _ in 0..extra {
            alloc.return_child(base);
        }
        prop_assert_eq!(alloc.live_slot_count(), 0);

        // The freed slot is reused; stale returns must not reach it.
        let fresh = alloc.create_buffer_group(8, 2).unwrap();
        prop_assert_eq!(fresh.parent, base.parent);
        prop_assert_eq!(alloc.live_children(fresh.parent), 2);
        prop_assert_eq!(alloc.slot_count(), 1);
    }

    #[test]
    fn interleaved_groups_are_independent(
        (sizes_a, order_a) in group_strategy(),
        (sizes_b, order_b) in group_strategy(),
    ) {
        let mut alloc = TransientAllocator::default();
        let a = alloc.create_buffer_group(sizes_a.iter().sum(), sizes_a.len()).unwrap();
        let b = alloc.create_buffer_group(sizes_b.iter().sum(), sizes_b.len()).unwrap();
        prop_assert_ne!(a.parent, b.parent);
        let ids_a = child_ids(a, &sizes_a);
        let ids_b = child_ids(b, &sizes_b);

        for &index in &order_a {
            prop_assert!(alloc.is_live(b.parent));
            alloc.return_child(ids_a[index]);
        }
        prop_assert!(!alloc.is_live(a.parent));
        prop_assert_eq!(alloc.live_children(b.parent), sizes_b.len());

        for &index in &order_b {
            alloc.return_child(ids_b[index]);
        }
        prop_assert_eq!(alloc.live_slot_count(), 0);
    }
}
