//! Stable hashing for set elements.
//!
//! Set membership is decided by hashing a canonical serialization of each
//! element, so the result never depends on map iteration order or on how a
//! number happened to be encoded.

use crate::value::Value;

/// Hash a string to a stable 64-bit code.
pub fn hash_string(s: &str) -> u64 {
    let digest = blake3::hash(s.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// Hash a value through its canonical serialization.
pub fn hash_value(value: &Value) -> u64 {
    hash_string(&value.canonical_string())
}

/// Hash each element of a set and return the sorted hash multiset.
pub fn set_codes(items: &[Value], hash: impl Fn(&Value) -> u64) -> Vec<u64> {
    let mut codes: Vec<u64> = items.iter().map(hash).collect();
    codes.sort_unstable();
    codes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_is_stable_across_key_order() {
        let a = Value::from_json(&json!({"port": 80, "cidr": "10.0.0.0/16"}));
        let b = Value::from_json(&json!({"cidr": "10.0.0.0/16", "port": 80}));
        assert_eq!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn test_hash_distinguishes_values() {
        assert_ne!(hash_value(&Value::from("a")), hash_value(&Value::from("b")));
        assert_ne!(hash_value(&Value::Int(1)), hash_value(&Value::from("1")));
    }

    #[test]
    fn test_set_codes_are_order_independent() {
        let left = vec![Value::from("x"), Value::from("y"), Value::from("x")];
        let right = vec![Value::from("y"), Value::from("x"), Value::from("x")];
        assert_eq!(set_codes(&left, hash_value), set_codes(&right, hash_value));
        assert_ne!(
            set_codes(&left, hash_value),
            set_codes(&[Value::from("x"), Value::from("y")], hash_value)
        );
    }
}
