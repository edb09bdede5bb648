// `derive(Arbitrary)` expands into a const-scoped impl.
#![allow(non_local_definitions)]

use super::*;

use crate::node::{Node, MAX_INDEX_NODE, MIN_ARRAY_NODE, SHIFT};
use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::HashMap;

fn low_bits(shift: u32) -> u32 {
    if shift >= 32 {
        u32::MAX
    } else {
        (1u32 << shift) - 1
    }
}

fn validate_tree<K: ValueHash + ValueEq, V>(map: &PersistentMap<K, V>) {
    let Some(root) = &map.root else {
        assert_eq!(map.size, 0, "empty root must mean an empty map");
        return;
    };
    assert!(
        matches!(**root, Node::Index { .. } | Node::Array { .. }),
        "root must be a branch node"
    );
    let count = validate_node(root, 0, 0);
    assert_eq!(count, map.size, "reachable entry count must match len");
}

/// Checks `node` and returns the number of entries below it. `prefix` holds
/// the hash bits consumed on the way down.
fn validate_node<K: ValueHash + ValueEq, V>(node: &Node<K, V>, shift: u32, prefix: u32) -> usize {
    let check_hash = |hash: i32| {
        assert_eq!(
            hash as u32 & low_bits(shift),
            prefix,
            "entry stored under the wrong path"
        );
    };

    match node {
        Node::Entry { hash, key, .. } => {
            assert_eq!(key.value_hash(), *hash, "stored hash must match key");
            check_hash(*hash);
            1
        }
        Node::Index { bitmap, children } => {
            assert_eq!(bitmap.count_ones() as usize, children.len());
            assert!(
                children.len() <= MAX_INDEX_NODE,
                "index node over capacity: {}",
                children.len()
            );
            let mut bits = *bitmap;
            let mut count = 0;
            for child in children {
                let slot = bits.trailing_zeros();
                bits &= bits - 1;
                count += validate_node(child, shift + SHIFT, prefix | (slot << shift));
            }
            count
        }
        Node::Array { count, children } => {
            let occupied = children.iter().filter(|child| child.is_some()).count();
            assert_eq!(*count, occupied, "array count must match occupied slots");
            assert!(
                occupied > MIN_ARRAY_NODE,
                "array node should have been demoted: {occupied}"
            );
            children
                .iter()
                .enumerate()
                .filter_map(|(slot, child)| Some((slot as u32, child.as_deref()?)))
                .map(|(slot, child)| validate_node(child, shift + SHIFT, prefix | (slot << shift)))
                .sum()
        }
        Node::Collision { hash, entries } => {
            assert!(entries.len() >= 2, "collision bucket with a single entry");
            check_hash(*hash);
            for (i, (key, _)) in entries.iter().enumerate() {
                assert_eq!(key.value_hash(), *hash, "bucket entry with foreign hash");
                for (other, _) in &entries[i + 1..] {
                    assert!(!key.value_eq(other), "duplicate key in bucket");
                }
            }
            entries.len()
        }
    }
}

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    Insert {
        #[proptest(strategy = "0u16..512")]
        key: u16,
        value: u32,
    },
    Remove {
        #[proptest(strategy = "0u16..512")]
        key: u16,
    },
    Get {
        #[proptest(strategy = "0u16..512")]
        key: u16,
    },
}

fn colliding_key() -> impl Strategy<Value = String> + Clone {
    // "Aa" and "BB" share a hash, so same-length concatenations all collide.
    prop::collection::vec(prop_oneof![Just("Aa"), Just("BB"), Just("c")], 0..=4)
        .prop_map(|parts| parts.concat())
}

fn colliding_ops() -> impl Strategy<Value = Vec<(bool, String, u32)>> {
    prop::collection::vec((any::<bool>(), colliding_key(), any::<u32>()), 0..=400)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence(ops in prop::collection::vec(any::<Op>(), 0..=2000)) {
        let mut map: PersistentMap<u16, u32> = PersistentMap::new();
        let mut model: HashMap<u16, u32> = HashMap::new();

        for op in ops {
            match op {
                Op::Insert { key, value } => {
                    map = map.insert(key, value);
                    model.insert(key, value);
                }
                Op::Remove { key } => {
                    map = map.remove(&key);
                    model.remove(&key);
                }
                Op::Get { key } => {
                    prop_assert_eq!(map.get(&key), model.get(&key));
                }
            }

            prop_assert_eq!(map.len(), model.len());
        }

        validate_tree(&map);
        let mut got: Vec<(u16, u32)> = map.entries();
        got.sort_unstable();
        let mut expected: Vec<(u16, u32)> = model.into_iter().collect();
        expected.sort_unstable();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_equivalence_colliding(ops in colliding_ops()) {
        let mut map: PersistentMap<String, u32> = PersistentMap::new();
        let mut model: HashMap<String, u32> = HashMap::new();

        for (insert, key, value) in ops {
            if insert {
                map = map.insert(key.clone(), value);
                model.insert(key, value);
            } else {
                map = map.remove(&key);
                model.remove(&key);
            }
            prop_assert_eq!(map.len(), model.len());
        }

        validate_tree(&map);
        for (key, value) in &model {
            prop_assert_eq!(map.get(key), Some(value));
        }
    }

    #[test]
    fn prop_round_trip(keys in prop::collection::hash_set(any::<i64>(), 0..=500)) {
        let map = PersistentMap::from_pairs(keys.iter().map(|&k| (k, k.wrapping_mul(3))));
        validate_tree(&map);
        prop_assert_eq!(map.len(), keys.len());
        for k in &keys {
            prop_assert_eq!(map.get(k), Some(&k.wrapping_mul(3)));
        }
    }

    #[test]
    fn prop_insert_idempotent(
        pairs in prop::collection::vec((0i64..300, any::<i64>()), 0..=300),
        key in 0i64..300,
        value: i64,
    ) {
        let once = PersistentMap::from_pairs(pairs).insert(key, value);
        let twice = once.insert(key, value);
        prop_assert!(once.ptr_eq(&twice));
    }

    #[test]
    fn prop_remove_undoes_insert(
        keys in prop::collection::hash_set(0i64..1000, 0..=300),
        key in 1000i64..2000,
        value: i64,
    ) {
        let base = PersistentMap::from_pairs(keys.iter().map(|&k| (k, k)));
        let round_trip = base.insert(key, value).remove(&key);
        validate_tree(&round_trip);
        prop_assert_eq!(round_trip.len(), base.len());
        prop_assert_eq!(&round_trip, &base);
        prop_assert!(base.remove(&key).ptr_eq(&base));
    }

    #[test]
    fn prop_old_versions_unchanged(
        keys in prop::collection::hash_set(0i64..500, 0..=200),
        edits in prop::collection::vec((any::<bool>(), 0i64..500), 0..=200),
    ) {
        let base = PersistentMap::from_pairs(keys.iter().map(|&k| (k, k)));
        let mut snapshot = base.entries();
        snapshot.sort_unstable();

        let mut derived = base.clone();
        for (insert, key) in edits {
            derived = if insert { derived.insert(key, -key) } else { derived.remove(&key) };
        }

        let mut after = base.entries();
        after.sort_unstable();
        prop_assert_eq!(after, snapshot);
        validate_tree(&base);
        validate_tree(&derived);
    }

    #[test]
    fn prop_order_independent(
        pairs in prop::collection::hash_map(any::<i32>(), any::<i32>(), 0..=200)
            .prop_map(|m| m.into_iter().collect::<Vec<_>>())
            .prop_flat_map(|pairs| (Just(pairs.clone()), Just(pairs).prop_shuffle())),
    ) {
        let (ordered, shuffled) = pairs;
        let a = PersistentMap::from_pairs(ordered);
        let b = PersistentMap::from_pairs(shuffled);
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.hash_code(), b.hash_code());
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

fn small_keys() -> Vec<Value> {
    vec![
        Value::from("Aa"),
        Value::from("BB"),
        Value::from("c"),
        Value::Int(1),
        Value::Float(1.0),
        Value::list([Value::Nil, Value::Undefined]),
    ]
}

#[test]
fn exhaustive_insert_order_small_set() {
    let keys = small_keys();
    let reference = PersistentMap::from_pairs(keys.iter().cloned().map(|k| (k.clone(), k)));

    for_each_permutation(&keys, |perm| {
        let map = PersistentMap::from_pairs(perm.into_iter().map(|k| (k.clone(), k)));
        validate_tree(&map);
        assert_eq!(map.len(), keys.len());
        assert_eq!(map, reference);
        assert_eq!(map.hash_code(), reference.hash_code());
        for key in &keys {
            assert_eq!(map.get(key), Some(key));
        }
    });
}

#[test]
fn exhaustive_remove_order_small_set() {
    let keys = small_keys();
    let base = PersistentMap::from_pairs(keys.iter().cloned().map(|k| (k, Value::Nil)));

    for_each_permutation(&keys, |perm| {
        let mut map = base.clone();
        let mut expected = keys.len();

        for key in perm {
            map = map.remove(&key);
            expected -= 1;
            assert_eq!(map.len(), expected);
            assert!(!map.contains_key(&key));
            validate_tree(&map);
        }
        assert!(map.is_empty());
        assert!(map.root.is_none());
    });
    assert_eq!(base.len(), keys.len());
}
