// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! Stable structural hashing over trees of primitives.
//!
//! Every identity computation in Bob (Variant-Id, Build-Id, SCM state
//! digests) bottoms out in the single fixed function [`hash`]. Its byte
//! serialization is frozen: callers must not depend on map iteration order,
//! only on the sorted order this module imposes.

use std::collections::BTreeMap;
use std::fmt;

use sha2::{Digest as _, Sha256};

/// A 32-byte structural digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    pub const ZERO: Digest = Digest([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First two hex characters, used as the top-level fan-out directory in
    /// content-addressed layouts.
    pub fn hex_prefix(&self, chars: usize) -> String {
        let hex = self.to_hex();
        hex[..chars.min(hex.len())].to_string()
    }

    /// Parses a 64-character lowercase hex digest, the inverse of
    /// [`Digest::to_hex`]. Used to reconstruct a Build-Id from a `--build-id`
    /// CLI argument or a content-addressed archive path.
    pub fn from_hex(hex: &str) -> Option<Digest> {
        let bytes = hex::decode(hex).ok()?;
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Digest(array))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A canonicalized tree of primitives fed to [`hash`].
///
/// Construction is the caller's job: every identity-relevant type in the
/// engine (steps, tools, SCM declarations, ...) implements [`ToValue`] to
/// produce one of these.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Bytes(Vec<u8>),
    Int(i64),
    List(Vec<Value>),
    /// Sorted by byte-lexicographic key at construction time via
    /// [`Value::map`] — never construct a `Map` variant directly with
    /// unsorted keys.
    Map(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Value {
        Value::Bytes(s.as_ref().as_bytes().to_vec())
    }

    pub fn bytes(b: impl Into<Vec<u8>>) -> Value {
        Value::Bytes(b.into())
    }

    pub fn int(i: impl Into<i64>) -> Value {
        Value::Int(i.into())
    }

    pub fn list<I: IntoIterator<Item = Value>>(items: I) -> Value {
        Value::List(items.into_iter().collect())
    }

    /// Build a sorted map from `(key, value)` pairs. Byte-lex order on the
    /// key is enforced by `BTreeMap<Vec<u8>, _>` regardless of insertion
    /// order, which is what makes [`hash`] order-independent for maps.
    pub fn map<K: AsRef<str>, I: IntoIterator<Item = (K, Value)>>(entries: I) -> Value {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.as_ref().as_bytes().to_vec(), v))
            .collect();
        Value::Map(map)
    }

    pub fn opt(value: Option<Value>) -> Value {
        match value {
            Some(v) => Value::List(vec![Value::Int(1), v]),
            None => Value::List(vec![Value::Int(0)]),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Value::Bytes(b) => {
                out.push(0x00);
                out.extend_from_slice(&(b.len() as u64).to_le_bytes());
                out.extend_from_slice(b);
            }
            Value::Int(i) => {
                out.push(0x01);
                out.extend_from_slice(&i.to_le_bytes());
            }
            Value::List(items) => {
                out.push(0x02);
                out.extend_from_slice(&(items.len() as u64).to_le_bytes());
                for item in items {
                    item.encode(out);
                }
            }
            Value::Map(entries) => {
                out.push(0x03);
                out.extend_from_slice(&(entries.len() as u64).to_le_bytes());
                // BTreeMap iteration is already byte-lex sorted by key.
                for (key, value) in entries {
                    out.extend_from_slice(&(key.len() as u64).to_le_bytes());
                    out.extend_from_slice(key);
                    value.encode(out);
                }
            }
        }
    }
}

/// Anything that can be canonicalized into a [`Value`] for hashing.
pub trait ToValue {
    fn to_value(&self) -> Value;
}

/// Compute the structural digest of `value`.
///
/// Permuting the insertion order of a [`Value::Map`]'s entries never changes
/// the result; permuting a [`Value::List`]'s order always can.
pub fn hash(value: &Value) -> Digest {
    let mut buf = Vec::new();
    value.encode(&mut buf);

    let mut hasher = Sha256::new();
    hasher.update(&buf);
    let result = hasher.finalize();

    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Digest(bytes)
}

/// Convenience for hashing anything implementing [`ToValue`].
pub fn hash_of(item: &impl ToValue) -> Digest {
    hash(&item.to_value())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hex_round_trips() {
        let digest = hash(&Value::str("round-trip"));
        assert_eq!(Digest::from_hex(&digest.to_hex()), Some(digest));
    }

    #[test]
    fn from_hex_rejects_wrong_length_or_bad_chars() {
        assert_eq!(Digest::from_hex("abcd"), None);
        assert_eq!(Digest::from_hex(&"zz".repeat(32)), None);
    }

    #[test]
    fn map_order_independent() {
        let a = Value::map([("a", Value::int(1)), ("b", Value::int(2))]);
        let b = Value::map([("b", Value::int(2)), ("a", Value::int(1))]);
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn list_order_dependent() {
        let a = Value::list([Value::int(1), Value::int(2)]);
        let b = Value::list([Value::int(2), Value::int(1)]);
        assert_ne!(hash(&a), hash(&b));
    }

    #[test]
    fn distinct_shapes_distinct_digests() {
        let a = Value::str("1");
        let b = Value::int(1);
        assert_ne!(hash(&a), hash(&b));
    }

    #[test]
    fn deterministic_across_calls() {
        // Re-evaluating H over the same tree must always yield the same
        // bytes (spec.md invariant 2's precondition).
        let v = Value::map([
            ("name", Value::str("gcc")),
            ("deps", Value::list([Value::str("glibc"), Value::str("binutils")])),
        ]);
        assert_eq!(hash(&v), hash(&v));
        assert_eq!(hash(&v).to_hex().len(), 64);
    }

    #[test]
    fn empty_map_and_empty_list_differ() {
        assert_ne!(hash(&Value::Map(BTreeMap::new())), hash(&Value::List(vec![])));
    }

    #[test]
    fn hex_prefix_splits() {
        let d = hash(&Value::str("x"));
        assert_eq!(d.hex_prefix(2).len(), 2);
        assert_eq!(d.to_hex().len(), 64);
    }
}
