//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check store invariants over arbitrary operation sequences.

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheStore, ManualClock};

// == Strategies ==
/// Generates cache keys from a small alphabet so operations collide
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-e]{1,2}".prop_map(|s| s)
}

#[derive(Debug, Clone)]
enum StoreOp {
    Set { key: String, value: u32, ttl_ms: u64 },
    Invalidate { keys: Vec<String> },
    Advance { ms: u64 },
}

fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        (key_strategy(), any::<u32>(), 1u64..500)
            .prop_map(|(key, value, ttl_ms)| StoreOp::Set { key, value, ttl_ms }),
        prop::collection::vec(key_strategy(), 0..4).prop_map(|keys| StoreOp::Invalidate { keys }),
        (0u64..300).prop_map(|ms| StoreOp::Advance { ms }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // The store agrees with a simple model: one entry per key, last write wins,
    // invalidation removes, validity follows `age < ttl`.
    #[test]
    fn prop_store_matches_model(ops in prop::collection::vec(store_op_strategy(), 1..60)) {
        let clock = Arc::new(ManualClock::new());
        let mut store: CacheStore<u32> = CacheStore::new(clock.clone());
        // key -> (value, age_ms, ttl_ms)
        let mut model: HashMap<String, (u32, u64, u64)> = HashMap::new();

        for op in ops {
            match op {
                StoreOp::Set { key, value, ttl_ms } => {
                    store.set(key.clone(), value, Duration::from_millis(ttl_ms));
                    model.insert(key, (value, 0, ttl_ms));
                }
                StoreOp::Invalidate { keys } => {
                    let removed = store.invalidate(&keys);
                    let mut expected = 0;
                    for key in &keys {
                        if model.remove(key).is_some() {
                            expected += 1;
                        }
                    }
                    prop_assert_eq!(removed, expected);
                }
                StoreOp::Advance { ms } => {
                    clock.advance(Duration::from_millis(ms));
                    for entry in model.values_mut() {
                        entry.1 += ms;
                    }
                }
            }

            prop_assert_eq!(store.len(), model.len());
            for (key, (value, age, ttl)) in &model {
                prop_assert_eq!(store.get(key).map(|e| e.value), Some(*value));
                prop_assert_eq!(store.is_valid(key), age < ttl, "validity mismatch for {}", key);
            }
        }
    }

    // Invalidating one key never disturbs any other key.
    #[test]
    fn prop_invalidate_is_targeted(
        keys in prop::collection::hash_set(key_strategy(), 2..8),
        pick in any::<prop::sample::Index>()
    ) {
        let clock = Arc::new(ManualClock::new());
        let mut store: CacheStore<u32> = CacheStore::new(clock);
        let keys: Vec<String> = keys.into_iter().collect();
        for (i, key) in keys.iter().enumerate() {
            store.set(key.clone(), i as u32, Duration::from_secs(60));
        }

        let victim = pick.get(&keys).clone();
        prop_assert_eq!(store.invalidate([victim.as_str()]), 1);

        for key in &keys {
            prop_assert_eq!(store.is_valid(key), key != &victim);
        }
    }
}
