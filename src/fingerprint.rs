//! Content-addressed call fingerprints.
//!
//! A fingerprint is the SHA-256 of a canonical, type-tagged JSON rendering of
//! `(step_name, phase, args, kwargs)`. Type tags keep `1` and `"1"` from
//! colliding; sorted object keys keep insertion order out of the hash;
//! sequences keep their order. The same inputs hash identically across
//! processes, which is what makes the idempotency claim portable between
//! workers.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::types::{OPAQUE_REPR_KEY, OPAQUE_TYPE_KEY, Phase, StepArgs};

fn tag(type_name: &str, value: Value) -> Value {
    let mut leaf = Map::new();
    leaf.insert("__type__".to_string(), Value::String(type_name.to_string()));
    leaf.insert("value".to_string(), value);
    Value::Object(leaf)
}

/// Recursively wrap a JSON value so every leaf carries its type tag.
///
/// Objects carrying the reserved opaque marker (produced by
/// [`StepArgs::opaque_arg`]) collapse into a `{__type__, value}` leaf with
/// the caller-supplied type name, so non-JSON values stay deterministic.
#[must_use]
pub fn tagged(value: &Value) -> Value {
    match value {
        Value::Null => tag("null", Value::Null),
        Value::Bool(b) => tag("bool", Value::Bool(*b)),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                tag("int", Value::Number(n.clone()))
            } else {
                tag("float", Value::Number(n.clone()))
            }
        }
        Value::String(s) => tag("str", Value::String(s.clone())),
        Value::Array(items) => tag("list", Value::Array(items.iter().map(tagged).collect())),
        Value::Object(map) => {
            if map.len() == 2 {
                if let (Some(Value::String(type_name)), Some(repr)) =
                    (map.get(OPAQUE_TYPE_KEY), map.get(OPAQUE_REPR_KEY))
                {
                    return tag(type_name, repr.clone());
                }
            }
            let mut inner = Map::new();
            for (key, val) in map {
                inner.insert(key.clone(), tagged(val));
            }
            tag("dict", Value::Object(inner))
        }
    }
}

/// Serialize to canonical JSON: object keys sorted, compact separators,
/// array order preserved.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => serde_json::to_string(s).unwrap_or_default(),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", inner.join(","))
        }
    }
}

/// Compute the 64-hex idempotency key for one step call.
///
/// Pure and stable: equal canonical tagged forms produce equal keys.
#[must_use]
pub fn fingerprint(step_name: &str, args: &StepArgs, phase: Phase) -> String {
    let mut payload = Map::new();
    payload.insert("step".to_string(), Value::String(step_name.to_string()));
    payload.insert("phase".to_string(), Value::String(phase.as_str().to_string()));
    payload.insert(
        "args".to_string(),
        tagged(&Value::Array(args.positional.clone())),
    );
    payload.insert(
        "kwargs".to_string(),
        tagged(&Value::Object(args.named.clone())),
    );

    let canonical = canonical_json(&Value::Object(payload));
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_tags_keep_int_and_str_apart() {
        let as_int = StepArgs::new().arg(1);
        let as_str = StepArgs::new().arg("1");
        assert_ne!(
            fingerprint("step", &as_int, Phase::Forward),
            fingerprint("step", &as_str, Phase::Forward)
        );
    }

    #[test]
    fn key_order_does_not_matter() {
        let ab = StepArgs::new().kwarg("a", 1).kwarg("b", 2);
        let ba = StepArgs::new().kwarg("b", 2).kwarg("a", 1);
        assert_eq!(
            fingerprint("step", &ab, Phase::Forward),
            fingerprint("step", &ba, Phase::Forward)
        );
    }

    #[test]
    fn sequence_order_matters() {
        let ab = StepArgs::new().arg(1).arg(2);
        let ba = StepArgs::new().arg(2).arg(1);
        assert_ne!(
            fingerprint("step", &ab, Phase::Forward),
            fingerprint("step", &ba, Phase::Forward)
        );
    }

    #[test]
    fn phase_is_part_of_the_key() {
        let args = StepArgs::new().arg("x");
        assert_ne!(
            fingerprint("step", &args, Phase::Forward),
            fingerprint("step", &args, Phase::Compensation)
        );
    }

    #[test]
    fn output_is_64_hex() {
        let key = fingerprint("reserve", &StepArgs::new(), Phase::Forward);
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = json!({"z": [{"y": "yes"}, null], "a": {"x": 10}});
        assert_eq!(
            canonical_json(&value),
            "{\"a\":{\"x\":10},\"z\":[{\"y\":\"yes\"},null]}"
        );
    }

    #[test]
    fn opaque_leaves_hash_by_type_and_repr() {
        let a = StepArgs::new().opaque_arg("Handle", "h-1");
        let b = StepArgs::new().opaque_arg("Handle", "h-1");
        let c = StepArgs::new().opaque_arg("Handle", "h-2");
        assert_eq!(
            fingerprint("step", &a, Phase::Forward),
            fingerprint("step", &b, Phase::Forward)
        );
        assert_ne!(
            fingerprint("step", &a, Phase::Forward),
            fingerprint("step", &c, Phase::Forward)
        );
    }
}
