//! Property tests for fingerprint stability and separation.

use std::collections::BTreeMap;

use proptest::prelude::*;
use serde_json::Value;

use agenttrail::fingerprint::fingerprint;
use agenttrail::types::{Phase, StepArgs};

fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z0-9]{0,8}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn equal_inputs_hash_equal(value in value_strategy()) {
        let a = StepArgs::positional([value.clone()]);
        let b = StepArgs::positional([value]);
        prop_assert_eq!(
            fingerprint("step", &a, Phase::Forward),
            fingerprint("step", &b, Phase::Forward)
        );
    }

    #[test]
    fn numbers_and_their_string_forms_never_collide(n in any::<i64>()) {
        let as_int = StepArgs::positional([Value::from(n)]);
        let as_str = StepArgs::positional([Value::from(n.to_string())]);
        prop_assert_ne!(
            fingerprint("step", &as_int, Phase::Forward),
            fingerprint("step", &as_str, Phase::Forward)
        );
    }

    #[test]
    fn kwarg_insertion_order_is_irrelevant(
        entries in prop::collection::btree_map("[a-z]{1,6}", any::<i64>(), 1..6)
    ) {
        let forward = entries
            .iter()
            .fold(StepArgs::new(), |args, (k, v)| args.kwarg(k.clone(), *v));
        let reverse = entries
            .iter()
            .rev()
            .fold(StepArgs::new(), |args, (k, v)| args.kwarg(k.clone(), *v));
        prop_assert_eq!(
            fingerprint("step", &forward, Phase::Forward),
            fingerprint("step", &reverse, Phase::Forward)
        );
    }

    #[test]
    fn step_name_separates_otherwise_equal_calls(value in value_strategy()) {
        let args = StepArgs::positional([value]);
        prop_assert_ne!(
            fingerprint("step_a", &args, Phase::Forward),
            fingerprint("step_b", &args, Phase::Forward)
        );
    }

    #[test]
    fn phases_separate_otherwise_equal_calls(value in value_strategy()) {
        let args = StepArgs::positional([value]);
        prop_assert_ne!(
            fingerprint("step", &args, Phase::Forward),
            fingerprint("step", &args, Phase::Compensation)
        );
    }

    #[test]
    fn output_is_always_64_hex(value in value_strategy()) {
        let args = StepArgs::positional([value]);
        let key = fingerprint("step", &args, Phase::Forward);
        prop_assert_eq!(key.len(), 64);
        prop_assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

#[test]
fn fingerprints_are_stable_across_map_implementations() {
    // The same logical mapping built through different intermediate
    // containers must canonicalize identically.
    let mut tree = BTreeMap::new();
    tree.insert("b".to_string(), 2);
    tree.insert("a".to_string(), 1);
    let via_tree = StepArgs::new().kwarg("m", tree);
    let via_json = StepArgs::new().kwarg("m", serde_json::json!({"a": 1, "b": 2}));
    assert_eq!(
        fingerprint("step", &via_tree, Phase::Forward),
        fingerprint("step", &via_json, Phase::Forward)
    );
}
