use std::{
    collections::hash_map::RandomState,
    hash::{BuildHasherDefault, Hasher},
    sync::{Arc, Barrier},
    thread,
};

use paste::paste;
use vmap::{CasResult, VMap};

const NUM_KEYS: u64 = 1000;

fn spawn_disjoint<S, F>(map: &Arc<VMap<u64, u64, S>>, num_threads: u64, op: F)
where
    S: std::hash::BuildHasher + Send + Sync + 'static,
    F: Fn(&VMap<u64, u64, S>, u64) + Send + Sync + Copy + 'static,
{
    let barrier = Arc::new(Barrier::new(num_threads as usize));
    let per_thread = NUM_KEYS / num_threads;

    let threads: Vec<_> = (0..num_threads)
        .map(|t| {
            let map = Arc::clone(map);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();

                let end = if t == num_threads - 1 {
                    NUM_KEYS
                } else {
                    (t + 1) * per_thread
                };
                for key in (t * per_thread)..end {
                    op(&map, key);
                }
            })
        })
        .collect();

    threads
        .into_iter()
        .for_each(|t| t.join().expect("Thread failed"));
}

macro_rules! generate_scenarios {
    ($name:ident, $hasher:expr) => {
        paste! {
            #[test]
            fn [<$name _disjoint_store_then_delete>]() {
                let map = Arc::new(VMap::with_hasher($hasher));

                spawn_disjoint(&map, 8, |map, key| assert!(map.store(key, key * 10)));

                assert_eq!(map.len(), NUM_KEYS as usize);
                for key in 0..NUM_KEYS {
                    assert!(map.has(&key));
                    assert_eq!(map.load(&key), Some(key * 10));
                }

                spawn_disjoint(&map, 8, |map, key| assert!(map.delete(&key)));

                assert_eq!(map.len(), 0);
                assert!(map.is_empty());
                for key in 0..NUM_KEYS {
                    assert!(!map.has(&key));
                    assert!(!map.delete(&key));
                }
            }

            #[test]
            fn [<$name _load_or_store_race>]() {
                const NUM_THREADS: usize = 12;

                let map = Arc::new(VMap::with_hasher($hasher));
                let barrier = Arc::new(Barrier::new(NUM_THREADS));

                let threads: Vec<_> = (0..NUM_THREADS)
                    .map(|i| {
                        let map = Arc::clone(&map);
                        let barrier = Arc::clone(&barrier);
                        thread::spawn(move || {
                            barrier.wait();
                            (i, map.load_or_store("key", i))
                        })
                    })
                    .collect();

                let results: Vec<_> = threads
                    .into_iter()
                    .map(|t| t.join().expect("Thread failed"))
                    .collect();

                let winners: Vec<_> = results.iter().filter(|(_, prior)| prior.is_none()).collect();
                assert_eq!(winners.len(), 1);

                let winner = winners[0].0;
                for (_, prior) in results.iter().filter(|(_, prior)| prior.is_some()) {
                    assert_eq!(*prior, Some(winner));
                }
                assert_eq!(map.load("key"), Some(winner));
                assert_eq!(map.len(), 1);
            }

            #[test]
            fn [<$name _compare_and_swap_race>]() {
                for _ in 0..100 {
                    let map = Arc::new(VMap::with_hasher($hasher));
                    map.store("k", 'A');

                    let barrier = Arc::new(Barrier::new(2));
                    let threads: Vec<_> = ['B', 'C']
                        .into_iter()
                        .map(|new| {
                            let map = Arc::clone(&map);
                            let barrier = Arc::clone(&barrier);
                            thread::spawn(move || {
                                barrier.wait();
                                (new, map.compare_and_swap("k", &'A', new))
                            })
                        })
                        .collect();

                    let results: Vec<_> = threads
                        .into_iter()
                        .map(|t| t.join().expect("Thread failed"))
                        .collect();

                    let succeeded: Vec<_> = results
                        .iter()
                        .filter(|(_, r)| *r == CasResult::Succeeded)
                        .collect();
                    assert_eq!(succeeded.len(), 1);
                    assert!(results
                        .iter()
                        .any(|(_, r)| *r == CasResult::ConditionFailed));

                    assert_eq!(map.load("k"), Some(succeeded[0].0));
                }
            }

            #[test]
            fn [<$name _split_keeps_every_key>]() {
                let map = VMap::with_config(1, 4, u64::MAX, $hasher);
                assert_eq!(map.num_chunks(), 1);

                let mut key = 0u64;
                while map.num_chunks() == 1 {
                    assert!(map.store(key, key + 1));
                    key += 1;
                }

                assert_eq!(map.num_chunks(), 2);
                assert_eq!(map.len(), key as usize);
                for k in 0..key {
                    assert_eq!(map.load(&k), Some(k + 1));
                }
            }
        }
    };
}

generate_scenarios!(std_hasher, RandomState::new());
generate_scenarios!(ahash, ahash::RandomState::new());

/// Hashes a `u64` key to itself.
#[derive(Default)]
struct IdentityHasher(u64);

impl Hasher for IdentityHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, _bytes: &[u8]) {
        unimplemented!("only u64 keys are hashed")
    }

    fn write_u64(&mut self, n: u64) {
        self.0 = n;
    }
}

#[test]
fn hashes_beyond_max_hash_value() {
    let map: VMap<u64, u64, BuildHasherDefault<IdentityHasher>> =
        VMap::with_config(1, 8, 3, Default::default());
    let keys: Vec<u64> = (0..40).map(|i| 1000 + i * 7).collect();

    for &key in &keys {
        assert!(map.store(key, key));
    }
    assert_eq!(map.len(), 40);
    assert!(map.num_chunks() <= 4);

    for &key in &keys {
        assert_eq!(map.load(&key), Some(key));
    }

    for &key in keys.iter().step_by(2) {
        assert!(map.delete(&key));
    }
    assert_eq!(map.len(), 20);

    let mut seen = 0;
    map.range(|k, v| {
        assert_eq!(k, v);
        assert_eq!((k - 1000) / 7 % 2, 1);
        seen += 1;
        true
    });
    assert_eq!(seen, 20);

    for &key in keys.iter().skip(1).step_by(2) {
        assert_eq!(map.load_and_delete(&key), Some(key));
    }
    assert!(map.is_empty());
    assert_eq!(map.take(), None);
}

#[test]
fn copy_round_trip() {
    let map = VMap::new();
    for i in 0..500u64 {
        map.store(i, i.to_string());
    }
    for i in (0..500).step_by(3) {
        map.delete(&i);
    }

    let copy = map.copy();
    assert_eq!(copy.len(), map.len());

    let mut visited = 0;
    map.range(|k, v| {
        assert_eq!(copy.load(k).as_ref(), Some(v));
        visited += 1;
        true
    });
    assert_eq!(visited, map.len());

    let cloned = copy.clone();
    assert_eq!(cloned.len(), copy.len());
}

#[test]
fn failed_compare_and_swap_changes_nothing() {
    let map = VMap::new();
    map.store(1u64, 10u64);
    map.store(2, 20);

    assert_eq!(map.compare_and_swap(&1, &11, 12), CasResult::ConditionFailed);
    assert_eq!(map.compare_and_swap(&3, &30, 31), CasResult::NoSuchKey);

    assert_eq!(map.len(), 2);
    assert_eq!(map.load(&1), Some(10));
    assert_eq!(map.load(&2), Some(20));
    assert!(!map.has(&3));
}
