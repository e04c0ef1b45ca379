//! Runs random single-threaded operation sequences against a `VMap` and a
//! `std::collections::HashMap` and checks that they always agree.

use std::collections::HashMap;

use rand::{rngs::StdRng, Rng, SeedableRng};
use vmap::{CasResult, VMap, VMapBuilder};

fn run_ops(map: &VMap<u64, u64>, num_ops: usize, key_space: u64) {
    let seed: u64 = rand::random();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut model = HashMap::new();

    for i in 0..num_ops {
        let key = rng.gen_range(0..key_space);
        let value = rng.gen::<u64>();

        match rng.gen_range(0..8) {
            0 => assert_eq!(
                map.store(key, value),
                model.insert(key, value).is_none(),
                "store, op {i}, seed {seed:#x}"
            ),
            1 => assert_eq!(
                map.swap(key, value),
                model.insert(key, value),
                "swap, op {i}, seed {seed:#x}"
            ),
            2 => {
                let expected = model.get(&key).copied();
                if expected.is_none() {
                    model.insert(key, value);
                }
                assert_eq!(
                    map.load_or_store(key, value),
                    expected,
                    "load_or_store, op {i}, seed {seed:#x}"
                );
            }
            3 => assert_eq!(
                map.delete(&key),
                model.remove(&key).is_some(),
                "delete, op {i}, seed {seed:#x}"
            ),
            4 => assert_eq!(
                map.load_and_delete(&key),
                model.remove(&key),
                "load_and_delete, op {i}, seed {seed:#x}"
            ),
            5 => {
                let current = model.get(&key).copied();
                // Guess right half of the time.
                let expected = match current {
                    Some(v) if rng.gen_bool(0.5) => v,
                    _ => value.wrapping_add(1),
                };
                let outcome = match current {
                    None => CasResult::NoSuchKey,
                    Some(v) if v == expected => {
                        model.insert(key, value);
                        CasResult::Succeeded
                    }
                    Some(_) => CasResult::ConditionFailed,
                };
                assert_eq!(
                    map.compare_and_swap(&key, &expected, value),
                    outcome,
                    "compare_and_swap, op {i}, seed {seed:#x}"
                );
            }
            6 => assert_eq!(
                map.has(&key),
                model.contains_key(&key),
                "has, op {i}, seed {seed:#x}"
            ),
            _ => assert_eq!(
                map.load(&key),
                model.get(&key).copied(),
                "load, op {i}, seed {seed:#x}"
            ),
        }

        assert_eq!(map.len(), model.len(), "len, op {i}, seed {seed:#x}");
    }

    let mut visited = HashMap::new();
    map.range(|k, v| {
        assert!(visited.insert(*k, *v).is_none(), "duplicate key {k}");
        true
    });
    assert_eq!(visited, model, "seed {seed:#x}");
}

#[test]
fn random_ops_default_map() {
    run_ops(&VMap::new(), 20_000, 512);
}

#[test]
fn random_ops_with_frequent_resizes() {
    let map = VMapBuilder::new()
        .min_avg_bucket_len(1)
        .max_avg_bucket_len(2)
        .build();
    run_ops(&map, 20_000, 64);
}

#[test]
fn random_ops_with_many_initial_chunks() {
    let map = VMapBuilder::new().initial_chunks(1024).build();
    run_ops(&map, 20_000, 4096);
}
