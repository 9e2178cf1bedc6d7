//! Property-Based Tests for the Counter Cache
//!
//! # Test Properties
//!
//! 1. **Net Count**: seed + increments - decrements, regardless of order
//! 2. **Single Entry**: every touched key appears exactly once
//! 3. **Safe Put**: never replaces an existing value
//! 4. **Snapshot**: matches per-key reads when the cache is quiescent

#![cfg(test)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use proptest::prelude::*;

use super::CounterCache;
use crate::adapters::InMemoryCountStore;
use crate::domain::{CounterKind, PostCounts, PostId};

// =============================================================================
// Property Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Get(i64),
    Increment(i64),
    Decrement(i64),
    SafePut(i64, i64),
}

/// Operations over a small key space so keys collide often.
fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0i64..8).prop_map(Op::Get),
        (0i64..8).prop_map(Op::Increment),
        (0i64..8).prop_map(Op::Decrement),
        (0i64..8, -50i64..50).prop_map(|(k, v)| Op::SafePut(k, v)),
    ]
}

fn seeds_strategy() -> impl Strategy<Value = HashMap<i64, i64>> {
    prop::collection::hash_map(0i64..8, 0i64..1000, 0..8)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn cache_over(seeds: &HashMap<i64, i64>) -> CounterCache {
    let store = InMemoryCountStore::with_rows(
        seeds
            .iter()
            .map(|(&k, &v)| (PostId(k), PostCounts::new(0, v))),
    );
    CounterCache::new(CounterKind::Like, Arc::new(store))
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Net count equals seed plus increments minus decrements
    #[test]
    fn prop_net_count(
        seed in 0i64..10_000,
        ups in 0usize..64,
        downs in 0usize..64,
    ) {
        let rt = runtime();
        let seeds: HashMap<i64, i64> = [(1, seed)].into_iter().collect();
        let cache = cache_over(&seeds);

        let value = rt.block_on(async {
            for _ in 0..ups {
                cache.increment(PostId(1)).await;
            }
            for _ in 0..downs {
                cache.decrement(PostId(1)).await;
            }
            cache.get(PostId(1)).await
        });

        prop_assert_eq!(value, seed + ups as i64 - downs as i64);
    }

    /// Touched keys are cached once; untouched keys never are
    #[test]
    fn prop_single_entry_per_touched_key(
        seeds in seeds_strategy(),
        ops in prop::collection::vec(op_strategy(), 0..100),
    ) {
        let rt = runtime();
        let cache = cache_over(&seeds);
        let mut touched = HashSet::new();

        rt.block_on(async {
            for op in &ops {
                match *op {
                    Op::Get(k) => { cache.get(PostId(k)).await; touched.insert(k); }
                    Op::Increment(k) => { cache.increment(PostId(k)).await; touched.insert(k); }
                    Op::Decrement(k) => { cache.decrement(PostId(k)).await; touched.insert(k); }
                    Op::SafePut(k, v) => { cache.safe_put(PostId(k), v); touched.insert(k); }
                }
            }
        });

        prop_assert_eq!(cache.len(), touched.len());
        for k in 0i64..8 {
            prop_assert_eq!(cache.contains(PostId(k)), touched.contains(&k));
        }
    }

    /// Replaying the ops against a plain model gives the same values
    #[test]
    fn prop_matches_model(
        seeds in seeds_strategy(),
        ops in prop::collection::vec(op_strategy(), 0..100),
    ) {
        let rt = runtime();
        let cache = cache_over(&seeds);
        let mut model: HashMap<i64, i64> = HashMap::new();

        rt.block_on(async {
            for op in &ops {
                match *op {
                    Op::Get(k) => {
                        let expected = *model
                            .entry(k)
                            .or_insert_with(|| seeds.get(&k).copied().unwrap_or(0));
                        assert_eq!(cache.get(PostId(k)).await, expected);
                    }
                    Op::Increment(k) => {
                        *model.entry(k).or_insert_with(|| seeds.get(&k).copied().unwrap_or(0)) += 1;
                        cache.increment(PostId(k)).await;
                    }
                    Op::Decrement(k) => {
                        *model.entry(k).or_insert_with(|| seeds.get(&k).copied().unwrap_or(0)) -= 1;
                        cache.decrement(PostId(k)).await;
                    }
                    Op::SafePut(k, v) => {
                        model.entry(k).or_insert(v);
                        cache.safe_put(PostId(k), v);
                    }
                }
            }
        });

        let snapshot: HashMap<i64, i64> = cache
            .snapshot()
            .into_iter()
            .map(|(id, v)| (id.get(), v))
            .collect();
        prop_assert_eq!(snapshot, model);
    }
}
