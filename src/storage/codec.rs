//! Byte encoding for backends that store serialized keys and values.
//!
//! Keys are encoded as JSON text so they can be used as SQLite keys and
//! Redis hash fields; values are JSON blobs.

use serde::{de::DeserializeOwned, Serialize};

pub(crate) fn encode_key<K: Serialize>(key: &K) -> Result<String, serde_json::Error> {
  serde_json::to_string(key)
}

pub(crate) fn decode_key<K: DeserializeOwned>(raw: &str) -> Result<K, serde_json::Error> {
  serde_json::from_str(raw)
}

pub(crate) fn encode_value<V: Serialize>(value: &V) -> Result<Vec<u8>, serde_json::Error> {
  serde_json::to_vec(value)
}

pub(crate) fn decode_value<V: DeserializeOwned>(raw: &[u8]) -> Result<V, serde_json::Error> {
  serde_json::from_slice(raw)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;

  #[test]
  fn test_string_keys_keep_quotes() {
    // Distinguishes the string "1" from the integer 1.
    assert_eq!(encode_key(&"1").unwrap(), "\"1\"");
    assert_eq!(encode_key(&1u32).unwrap(), "1");
  }

  #[test]
  fn test_composite_key() {
    let key = ("tenant-a".to_string(), 42u64);
    let raw = encode_key(&key).unwrap();
    let back: (String, u64) = decode_key(&raw).unwrap();
    assert_eq!(back, key);
  }

  #[test]
  fn test_unit_key() {
    let raw = encode_key(&()).unwrap();
    assert_eq!(raw, "null");
    let _: () = decode_key(&raw).unwrap();
  }

  #[test]
  fn test_nested_value() {
    let mut value = BTreeMap::new();
    value.insert("scopes".to_string(), vec!["read".to_string(), "write".to_string()]);
    let raw = encode_value(&value).unwrap();
    let back: BTreeMap<String, Vec<String>> = decode_value(&raw).unwrap();
    assert_eq!(back, value);
  }

  #[test]
  fn test_decode_garbage_fails() {
    assert!(decode_value::<u32>(b"not json").is_err());
    assert!(decode_key::<u32>("\"text\"").is_err());
  }
}
