// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! Immutable environment maps with scope-propagation rules, plus the small
//! expression language used to evaluate `if:` conditions and perform
//! `${VAR}` substitution.

use std::collections::BTreeSet;
use std::fmt;

use bob_hash::{ToValue, Value};
use thiserror::Error;

mod expr;

pub use expr::{Expr, ExprError};

/// An ordered map of environment variables.
///
/// Order is preserved as declared (YAML input order), because the expander
/// needs "load order, child after parents" for list-like semantics even
/// though the *hash* of an [`EnvMap`] is order-independent (it is hashed as
/// a sorted map, per spec.md §4.3).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvMap(Vec<(String, String)>);

impl EnvMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Append-with-override: if `key` already exists its value is replaced
    /// in place (keeping its original position); otherwise it is appended.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    /// Merge `other` on top of `self` using append-with-override, per
    /// spec.md §4.1 ("Environment maps use append-with-override").
    pub fn merged_with(&self, other: &EnvMap) -> EnvMap {
        let mut result = self.clone();
        for (k, v) in &other.0 {
            result.set(k, v);
        }
        result
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep only the entries whose key is in `mask`. Used when a dependency
    /// edge narrows the environment visible to a child (the "environment
    /// mask" of spec.md §4.2).
    pub fn filtered(&self, mask: &BTreeSet<String>) -> EnvMap {
        EnvMap(self.0.iter().filter(|(k, _)| mask.contains(k)).cloned().collect())
    }
}

impl FromIterator<(String, String)> for EnvMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut map = EnvMap::new();
        for (k, v) in iter {
            map.set(k, v);
        }
        map
    }
}

impl ToValue for EnvMap {
    fn to_value(&self) -> Value {
        // Sorted by key: the hash of an EnvMap must not depend on
        // declaration order (spec.md invariant 1).
        Value::map(self.0.iter().map(|(k, v)| (k.as_str(), Value::str(v))))
    }
}

/// The whitelist of variable names a scope is permitted to reference via
/// `${VAR}` substitution (spec.md's `whitelist` config key and the
/// per-recipe "consumed" environment set).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist(BTreeSet<String>);

impl Whitelist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_names(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(names.into_iter().map(Into::into).collect())
    }

    pub fn allows(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn merged_with(&self, other: &Whitelist) -> Whitelist {
        Whitelist(self.0.union(&other.0).cloned().collect())
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.0.insert(name.into());
    }
}

/// A fully-resolved environment visible at one point of the expansion: the
/// variable values plus which of them may legally be substituted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub values: EnvMap,
    pub whitelist: Whitelist,
}

impl Environment {
    pub fn new(values: EnvMap, whitelist: Whitelist) -> Self {
        Self { values, whitelist }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name)
    }

    /// Merge `child` on top of `self`: values append-with-override, the
    /// whitelist is the union (a child may reference anything either scope
    /// whitelists).
    pub fn merged_with(&self, child: &Environment) -> Environment {
        Environment {
            values: self.values.merged_with(&child.values),
            whitelist: self.whitelist.merged_with(&child.whitelist),
        }
    }

    /// Replace every `${VAR}` occurrence in `input`. Fails closed: a
    /// reference to a variable outside the whitelist is a fatal expansion
    /// error (spec.md §4.2 fail modes), not a silent empty substitution.
    pub fn substitute(&self, input: &str) -> Result<String, SubstituteError> {
        let mut out = String::with_capacity(input.len());
        let mut chars = input.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '$' && input[i + 1..].starts_with('{') {
                let Some(end) = input[i + 2..].find('}') else {
                    return Err(SubstituteError::UnterminatedReference(input.to_string()));
                };
                let name = &input[i + 2..i + 2 + end];
                if !self.whitelist.allows(name) {
                    return Err(SubstituteError::NotWhitelisted(name.to_string()));
                }
                let value = self.get(name).unwrap_or_default();
                out.push_str(value);
                let skip_to = i + 2 + end + 1;
                while matches!(chars.peek(), Some(&(ni, _)) if ni < skip_to) {
                    chars.next();
                }
            } else {
                out.push(c);
            }
        }
        Ok(out)
    }

    /// Evaluate an `if:` condition against this environment.
    pub fn eval_condition(&self, condition: &str) -> Result<bool, ExprError> {
        expr::parse(condition)?.eval(self)
    }
}

#[derive(Debug, Error)]
pub enum SubstituteError {
    #[error("environment variable `{0}` used but not whitelisted")]
    NotWhitelisted(String),
    #[error("unterminated ${{...}} reference in {0:?}")]
    UnterminatedReference(String),
}

impl fmt::Display for EnvMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn env(pairs: &[(&str, &str)], whitelist: &[&str]) -> Environment {
        Environment::new(
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            Whitelist::from_names(whitelist.iter().copied()),
        )
    }

    #[test]
    fn append_with_override_keeps_position() {
        let mut map = EnvMap::new();
        map.set("a", "1");
        map.set("b", "2");
        map.set("a", "3");
        let pairs: Vec<_> = map.iter().collect();
        assert_eq!(pairs, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn substitution_requires_whitelist() {
        let e = env(&[("ARCH", "x86_64")], &["ARCH"]);
        assert_eq!(e.substitute("gcc-${ARCH}").unwrap(), "gcc-x86_64");

        let e2 = env(&[("SECRET", "x")], &[]);
        assert!(matches!(
            e2.substitute("${SECRET}"),
            Err(SubstituteError::NotWhitelisted(_))
        ));
    }

    #[test]
    fn substitution_preserves_multibyte_text() {
        let e = env(&[("ARCH", "x86_64")], &["ARCH"]);
        assert_eq!(e.substitute("Build für ${ARCH} 完了").unwrap(), "Build für x86_64 完了");
    }

    #[test]
    fn hash_ignores_declaration_order() {
        let mut a = EnvMap::new();
        a.set("x", "1");
        a.set("y", "2");
        let mut b = EnvMap::new();
        b.set("y", "2");
        b.set("x", "1");
        assert_eq!(bob_hash::hash_of(&a), bob_hash::hash_of(&b));
    }

    #[test]
    fn masking_filters_entries() {
        let mut map = EnvMap::new();
        map.set("a", "1");
        map.set("b", "2");
        let mask: BTreeSet<String> = ["a".to_string()].into_iter().collect();
        let filtered = map.filtered(&mask);
        assert_eq!(filtered.get("a"), Some("1"));
        assert_eq!(filtered.get("b"), None);
    }
}
