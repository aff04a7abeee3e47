//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check round-trips, bounds and eviction choices.

use proptest::prelude::*;
use serde_json::Value;

use crate::cache::{
    CacheEntry, CacheManager, EntryStore, MemoryStore, QuotaStore, SetOptions, StorageArea,
    StorageKind,
};
use crate::config::Config;

// == Test Configuration ==
const PREFIX: &str = "app_cache_";

// == Strategies ==
/// Generates valid cache keys
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_:]{1,32}"
}

/// Generates JSON payloads without floats so equality is exact
fn json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,24}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String },
    Get { key: String },
    Delete { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    // A small key space so gets hit often enough to matter
    let key = "[a-e]";
    prop_oneof![
        key.prop_map(|key| CacheOp::Set { key }),
        key.prop_map(|key| CacheOp::Get { key }),
        key.prop_map(|key| CacheOp::Delete { key }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Storing a payload and reading it back returns the same payload in
    // both synchronous backend kinds.
    #[test]
    fn prop_roundtrip_sync_backends(key in valid_key_strategy(), value in json_strategy()) {
        let ns = format!("{PREFIX}{key}");
        let mut memory = MemoryStore::new(10);
        let mut local = QuotaStore::new(StorageArea::new(1024 * 1024), PREFIX);

        prop_assert!(memory.set(&ns, CacheEntry::new(value.clone(), None, 1)).is_ok());
        prop_assert!(local.set(&ns, CacheEntry::new(value.clone(), None, 1)).is_ok());

        prop_assert_eq!(&memory.get(&ns).unwrap().data, &value);
        prop_assert_eq!(&local.get(&ns).unwrap().data, &value);
    }

    // The memory backend never exceeds its bound, and each eviction takes
    // the entry with the smallest last_accessed.
    #[test]
    fn prop_memory_capacity_and_victim(
        accesses in prop::collection::hash_set(0u64..1_000_000, 1..60),
        max_entries in 1usize..20
    ) {
        let mut store = MemoryStore::new(max_entries);

        for (i, last_accessed) in accesses.into_iter().enumerate() {
            let key = format!("{PREFIX}{i}");
            let mut entry = CacheEntry::new(Value::from(i as u64), None, 1);
            entry.last_accessed = last_accessed;

            let expected_victim = if store.len() >= max_entries {
                store
                    .keys()
                    .into_iter()
                    .min_by_key(|k| store.get(k).unwrap().last_accessed)
            } else {
                None
            };
            let before: Vec<String> = store.keys();

            prop_assert!(store.set(&key, entry).is_ok());
            prop_assert!(
                store.len() <= max_entries,
                "size {} exceeds {}",
                store.len(),
                max_entries
            );

            if let Some(victim) = expected_victim {
                prop_assert!(before.contains(&victim));
                prop_assert!(store.get(&victim).is_none(), "expected {} to be evicted", victim);
            }
        }
    }

    // Entries without a TTL never expire by time; entries with one expire
    // exactly when more than ttl milliseconds have elapsed.
    #[test]
    fn prop_ttl_boundary(ttl in 1u64..1_000_000, elapsed in 0u64..2_000_000) {
        let mut timed = CacheEntry::new(Value::Null, Some(ttl), 1);
        timed.timestamp = 1_000;
        let mut forever = CacheEntry::new(Value::Null, None, 1);
        forever.timestamp = 1_000;

        prop_assert_eq!(timed.is_expired_at(1_000 + elapsed), elapsed > ttl);
        prop_assert!(!forever.is_expired_at(1_000 + elapsed));
    }

    // Overflowing a full quota store drops ceil(n/4) oldest entries and
    // the triggering write lands.
    #[test]
    fn prop_quota_eviction_drops_oldest_quarter(n in 4usize..40) {
        // Fixed-width keys and timestamps keep every record the same size
        let record = |i: usize| {
            let mut entry = CacheEntry::new(Value::from("payload"), None, 1);
            entry.timestamp = 1_000_000 + i as u64;
            (format!("{PREFIX}{i:03}"), entry)
        };
        let (k0, e0) = record(0);
        let per_record = k0.len() + serde_json::to_string(&e0).unwrap().len();
        let mut store = QuotaStore::new(StorageArea::new(per_record * n), PREFIX);

        for i in 0..n {
            let (key, entry) = record(i);
            prop_assert!(store.set(&key, entry).is_ok());
        }

        let (key, entry) = record(n);
        prop_assert!(store.set(&key, entry).is_ok());

        let evicted = (n + 3) / 4;
        prop_assert_eq!(store.keys().len(), n - evicted + 1);
        for i in 0..evicted {
            let evicted_key = format!("{PREFIX}{i:03}");
            prop_assert!(store.get(&evicted_key).is_none());
        }
        prop_assert!(store.get(&key).is_some());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(25))]

    // For any op sequence, the manager's hit rate is hits / (hits + misses) * 100.
    #[test]
    fn prop_statistics_accuracy(ops in prop::collection::vec(cache_op_strategy(), 1..50)) {
        let cache = CacheManager::new(&Config::default());
        let mut expected_hits = 0u64;
        let mut expected_misses = 0u64;

        tokio_test::block_on(async {
            for op in ops {
                match op {
                    CacheOp::Set { key } => {
                        cache.set(&key, &key, SetOptions::default()).await;
                    }
                    CacheOp::Get { key } => {
                        match cache.get::<String>(&key, None).await {
                            Some(_) => expected_hits += 1,
                            None => expected_misses += 1,
                        }
                    }
                    CacheOp::Delete { key } => {
                        cache.delete(&key, None).await;
                    }
                }
            }
        });

        let stats = cache.stats();
        prop_assert_eq!(stats.hits, expected_hits);
        prop_assert_eq!(stats.misses, expected_misses);
        let total = expected_hits + expected_misses;
        let expected_rate = if total == 0 {
            0.0
        } else {
            expected_hits as f64 / total as f64 * 100.0
        };
        prop_assert!((stats.hit_rate - expected_rate).abs() < 1e-9);
    }

    // The façade round-trips any JSON payload through every backend.
    #[test]
    fn prop_roundtrip_manager(key in valid_key_strategy(), value in json_strategy()) {
        let cache = CacheManager::new(&Config::default());

        let results: Vec<Option<Value>> = tokio_test::block_on(async {
            let mut results = Vec::new();
            for kind in StorageKind::ALL {
                cache.set(&key, &value, SetOptions::default().storage(kind)).await;
                results.push(cache.get::<Value>(&key, Some(kind)).await);
            }
            results
        });

        for result in results {
            prop_assert_eq!(result.as_ref(), Some(&value));
        }
    }
}
