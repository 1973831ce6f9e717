//! Property-based tests for bloomcount.
//!
//! These tests verify invariants that should hold regardless of input:
//! - A filter never forgets an inserted key, however far it grows
//! - Removing one key never hides another
//! - Filters of different collections never share state

use bloomcount::counter::MemoryCounterStore;
use bloomcount::filter::{BloomPage, ScalingBloomFilter};
use bloomcount::storage::{BackingFile, SequentialNames};
use bloomcount::{BloomCounter, Options};
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::TempDir;

fn arb_keys(max: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..24), 1..max)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn scaling_filter_has_no_false_negatives(
        keys in arb_keys(400),
        capacity in 1u64..60,
        error_rate in 0.001f64..0.2,
    ) {
        let dir = TempDir::new().unwrap();
        let names = SequentialNames::with_tag("prop");
        let file = BackingFile::create_unique(dir.path(), "p_", &names, 4).unwrap();
        let mut filter = ScalingBloomFilter::create(file, capacity, error_rate).unwrap();

        for (id, key) in keys.iter().enumerate() {
            filter.insert(key, id as u64).unwrap();
        }

        let expected_pages = (keys.len() as u64).div_ceil(capacity) as usize;
        prop_assert_eq!(filter.num_pages(), expected_pages.max(1));
        for key in &keys {
            prop_assert!(filter.check(key));
        }
    }

    #[test]
    fn page_remove_keeps_other_keys(keys in arb_keys(200), victim in any::<prop::sample::Index>()) {
        let mut page = BloomPage::new(keys.len() as u64, 0.01).unwrap();
        for (id, key) in keys.iter().enumerate() {
            page.insert(key, id as u64);
        }

        let victim = victim.index(keys.len());
        prop_assert!(page.remove(&keys[victim]));

        for (i, key) in keys.iter().enumerate() {
            if i != victim && keys[i] != keys[victim] {
                prop_assert!(page.contains(key));
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn collections_are_isolated(
        a_keys in prop::collection::hash_set("[a-z]{1,12}", 1..60),
        b_keys in prop::collection::hash_set("[A-Z]{1,12}", 1..60),
    ) {
        let dir = TempDir::new().unwrap();
        let options = Options::default().filter_dir(dir.path()).capacity(10_000);
        let counter = BloomCounter::open(options, Arc::new(MemoryCounterStore::new())).unwrap();

        for key in &a_keys {
            prop_assert_eq!(counter.check_and_count(b"a", key.as_bytes()).unwrap(), 0);
        }

        // Keys only ever recorded under "a" are new to "b".
        let b = counter.registry().resolve_or_create(b"b").unwrap();
        for key in &a_keys {
            prop_assert!(!b.check(key.as_bytes()));
        }

        for key in &b_keys {
            counter.check_and_count(b"b", key.as_bytes()).unwrap();
        }
        prop_assert_eq!(b.stats().count, b.next_id());
        prop_assert!(b.next_id() as usize <= b_keys.len());

        let a = counter.registry().get(b"a").unwrap();
        prop_assert_eq!(a.next_id() as usize, a_keys.len());
    }
}
