//! Property-based test generators using proptest.
//!
//! Strategies produce ids, snake_case keys, scalar values, records and
//! record batches that share a key sequence.

use entisync_core::{HydrationFlags, KeyMapper, MapperFlags, Record, Value};
use proptest::prelude::*;

/// Strategy for backend ids: positive integers or short slugs.
pub fn id_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        (1i64..1_000_000).prop_map(Value::Integer),
        prop::string::string_regex("[a-z][a-z0-9-]{0,11}")
            .expect("Invalid regex")
            .prop_map(Value::Text),
    ]
}

/// Strategy for snake_case field names.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9]{0,7}(_[a-z0-9]{1,5}){0,2}").expect("Invalid regex")
}

/// Strategy for scalar field values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        prop::string::string_regex("[ -~]{0,16}")
            .expect("Invalid regex")
            .prop_map(Value::Text),
    ]
}

/// Strategy for flat records with distinct keys.
pub fn record_strategy(max_fields: usize) -> impl Strategy<Value = Record> {
    prop::collection::btree_map(key_strategy(), scalar_strategy(), 0..=max_fields)
        .prop_map(|fields| fields.into_iter().collect())
}

/// Strategy for batches whose records share one key sequence.
pub fn conforming_batch_strategy(
    max_fields: usize,
    max_records: usize,
) -> impl Strategy<Value = Vec<Record>> {
    prop::collection::btree_set(key_strategy(), 1..=max_fields.max(1)).prop_flat_map(
        move |keys| {
            let keys: Vec<String> = keys.into_iter().collect();
            let width = keys.len();
            prop::collection::vec(
                prop::collection::vec(scalar_strategy(), width),
                1..=max_records.max(1),
            )
            .prop_map(move |rows| {
                rows.into_iter()
                    .map(|values| keys.iter().cloned().zip(values).collect())
                    .collect()
            })
        },
    )
}

/// Strategy for one-to-one key maps (`input -> output`, outputs distinct).
pub fn key_map_strategy(max_keys: usize) -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::btree_map(key_strategy(), key_strategy(), 0..=max_keys).prop_map(|map| {
        let mut seen = std::collections::BTreeSet::new();
        map.into_iter()
            .filter(|(_, output)| seen.insert(output.clone()))
            .collect()
    })
}

/// Builds a mapper from pairs produced by [`key_map_strategy`].
pub fn mapper_from_pairs(pairs: &[(String, String)], flags: MapperFlags) -> KeyMapper {
    pairs
        .iter()
        .fold(KeyMapper::new(flags), |mapper, (input, output)| {
            mapper.key(input.clone(), output.clone())
        })
}

/// Strategy for valid hydration flags: one mode, optionally `NO_FILTER`.
pub fn hydration_flags_strategy() -> impl Strategy<Value = HydrationFlags> {
    (
        prop_oneof![
            Just(HydrationFlags::SUPPRESS),
            Just(HydrationFlags::LAZY),
            Just(HydrationFlags::DEFER),
            Just(HydrationFlags::EAGER),
        ],
        any::<bool>(),
    )
        .prop_map(|(mode, no_filter)| {
            if no_filter {
                mode | HydrationFlags::NO_FILTER
            } else {
                mode
            }
        })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
