// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! The normalized recipe model: what a fully merged, multiPackage-split
//! recipe document resolves to once class inheritance and field merging
//! have been applied. This is the shape the expander and the rest of the
//! engine actually consume.

use std::collections::BTreeMap;

use bob_env::{EnvMap, Whitelist};
use bob_hash::{ToValue, Value};
use thiserror::Error;

use crate::raw::{RawDependency, RawEntity, RawFingerprint, RawProvides, RawScm, RawScripts};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("dependency `{0}` declares unknown use kind `{1}`")]
    UnknownUseKind(String, String),
    #[error("scm entry for `{0}` declares unknown kind `{1}`")]
    UnknownScmKind(String, String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tools {
    pub strong: Vec<String>,
    pub weak: Vec<String>,
}

impl ToValue for Tools {
    fn to_value(&self) -> Value {
        Value::map([
            ("strong", Value::list(self.strong.iter().map(Value::str))),
            ("weak", Value::list(self.weak.iter().map(Value::str))),
        ])
    }
}

/// What a dependency edge contributes to its consumer once resolved
/// (spec.md §4.2's `use:` list).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UseKind {
    Results,
    Environment,
    Tools,
    Sandbox,
    Dependencies,
}

impl UseKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "results" => Some(Self::Results),
            "environment" => Some(Self::Environment),
            "tools" => Some(Self::Tools),
            "sandbox" => Some(Self::Sandbox),
            "dependencies" => Some(Self::Dependencies),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Results => "results",
            Self::Environment => "environment",
            Self::Tools => "tools",
            Self::Sandbox => "sandbox",
            Self::Dependencies => "dependencies",
        }
    }

    /// The default contribution set when a dependency declares no `use:`
    /// list at all (spec.md §4.2): everything except forwarding sandbox
    /// policy, which must be opted into explicitly.
    pub fn default_set() -> Vec<Self> {
        vec![Self::Results, Self::Environment, Self::Tools, Self::Dependencies]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub if_condition: Option<String>,
    pub use_kinds: Vec<UseKind>,
    pub tools: BTreeMap<String, String>,
    pub forward: bool,
    pub checkout_dep: bool,
}

impl ToValue for Dependency {
    fn to_value(&self) -> Value {
        Value::map([
            ("name", Value::str(&self.name)),
            ("use", Value::list(self.use_kinds.iter().map(|k| Value::str(k.as_str())))),
            (
                "tools",
                Value::map(self.tools.iter().map(|(k, v)| (k.as_str(), Value::str(v)))),
            ),
            ("forward", Value::int(self.forward as i64)),
            ("checkoutDep", Value::int(self.checkout_dep as i64)),
        ])
    }
}

impl Dependency {
    fn from_raw(raw: &RawDependency) -> Result<Self, ModelError> {
        let use_kinds = if raw.use_kinds.is_empty() {
            UseKind::default_set()
        } else {
            raw.use_kinds
                .iter()
                .map(|s| UseKind::parse(s).ok_or_else(|| ModelError::UnknownUseKind(raw.name.clone(), s.clone())))
                .collect::<Result<_, _>>()?
        };
        Ok(Dependency {
            name: raw.name.clone(),
            if_condition: raw.if_condition.clone(),
            use_kinds,
            tools: raw.tools.iter().map(|kv| (kv.key.clone(), kv.value.clone())).collect(),
            forward: raw.forward,
            checkout_dep: raw.checkout_dep,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provides {
    pub tools: BTreeMap<String, String>,
    pub dependencies: Vec<String>,
    pub sandbox: Option<String>,
    pub vars: EnvMap,
}

impl ToValue for Provides {
    fn to_value(&self) -> Value {
        Value::map([
            (
                "tools",
                Value::map(self.tools.iter().map(|(k, v)| (k.as_str(), Value::str(v)))),
            ),
            ("dependencies", Value::list(self.dependencies.iter().map(Value::str))),
            ("sandbox", Value::opt(self.sandbox.as_deref().map(Value::str))),
            ("vars", self.vars.to_value()),
        ])
    }
}

impl From<&RawProvides> for Provides {
    fn from(raw: &RawProvides) -> Self {
        Provides {
            tools: raw.tools.iter().map(|kv| (kv.key.clone(), kv.value.clone())).collect(),
            dependencies: raw.dependencies.clone(),
            sandbox: raw.sandbox.clone(),
            vars: raw.vars.iter().map(|kv| (kv.key.clone(), kv.value.clone())).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scripts {
    pub checkout: Option<String>,
    pub build: Option<String>,
    pub package: Option<String>,
}

impl ToValue for Scripts {
    fn to_value(&self) -> Value {
        Value::map([
            ("checkout", Value::opt(self.checkout.as_deref().map(Value::str))),
            ("build", Value::opt(self.build.as_deref().map(Value::str))),
            ("package", Value::opt(self.package.as_deref().map(Value::str))),
        ])
    }
}

impl From<&RawScripts> for Scripts {
    fn from(raw: &RawScripts) -> Self {
        Scripts {
            checkout: raw.checkout.clone(),
            build: raw.build.clone(),
            package: raw.package.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScmKind {
    Git,
    Svn,
    Url,
    Cvs,
    Import,
}

impl ScmKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "git" => Some(Self::Git),
            "svn" => Some(Self::Svn),
            "url" => Some(Self::Url),
            "cvs" => Some(Self::Cvs),
            "import" => Some(Self::Import),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Svn => "svn",
            Self::Url => "url",
            Self::Cvs => "cvs",
            Self::Import => "import",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scm {
    pub kind: ScmKind,
    pub url: String,
    pub scm_ref: Option<String>,
    pub tag: Option<String>,
    pub commit: Option<String>,
    pub submodules: bool,
    pub dir: Option<String>,
    pub if_condition: Option<String>,
}

impl ToValue for Scm {
    fn to_value(&self) -> Value {
        Value::map([
            ("kind", Value::str(self.kind.as_str())),
            ("url", Value::str(&self.url)),
            ("ref", Value::opt(self.scm_ref.as_deref().map(Value::str))),
            ("tag", Value::opt(self.tag.as_deref().map(Value::str))),
            ("commit", Value::opt(self.commit.as_deref().map(Value::str))),
            ("submodules", Value::int(self.submodules as i64)),
            ("dir", Value::opt(self.dir.as_deref().map(Value::str))),
        ])
    }
}

impl Scm {
    fn from_raw(raw: &RawScm) -> Result<Self, ModelError> {
        Ok(Scm {
            kind: ScmKind::parse(&raw.kind).ok_or_else(|| ModelError::UnknownScmKind(raw.url.clone(), raw.kind.clone()))?,
            url: raw.url.clone(),
            scm_ref: raw.scm_ref.clone(),
            tag: raw.tag.clone(),
            commit: raw.commit.clone(),
            submodules: raw.submodules,
            dir: raw.dir.clone(),
            if_condition: raw.if_condition.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub predicate: Option<String>,
    pub script: String,
}

impl ToValue for Fingerprint {
    fn to_value(&self) -> Value {
        Value::map([
            ("predicate", Value::opt(self.predicate.as_deref().map(Value::str))),
            ("script", Value::str(&self.script)),
        ])
    }
}

impl From<&RawFingerprint> for Fingerprint {
    fn from(raw: &RawFingerprint) -> Self {
        Fingerprint {
            predicate: raw.predicate.clone(),
            script: raw.script.clone(),
        }
    }
}

/// The environment section of a normalized recipe: what it may read from
/// its context (`consumed`), and what it exposes at three different
/// scopes (spec.md §4.2's provided/private/meta distinction).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub consumed: Whitelist,
    pub provided: EnvMap,
    pub private: EnvMap,
    pub meta: EnvMap,
}

impl ToValue for Environment {
    fn to_value(&self) -> Value {
        Value::map([
            ("provided", self.provided.to_value()),
            ("private", self.private.to_value()),
            ("meta", self.meta.to_value()),
        ])
    }
}

/// A single package: either the whole of a plain recipe, or one entry of a
/// `multiPackage` recipe's merged base + override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    pub name: String,
    pub root: bool,
    pub relocatable: bool,
    pub environment: Environment,
    pub tools: Tools,
    pub dependencies: Vec<Dependency>,
    pub provides: Provides,
    pub sandbox: Option<String>,
    pub scripts: Scripts,
    pub scm: Vec<Scm>,
    pub fingerprint: Option<Fingerprint>,
    pub no_undefined_tools: bool,
    /// Audit/display metadata only (mirrors `moss::package::meta::Meta`'s
    /// release counters); never folded into any hash input.
    pub source_release: u64,
    pub build_release: u64,
}

impl ToValue for Recipe {
    fn to_value(&self) -> Value {
        Value::map([
            ("name", Value::str(&self.name)),
            ("root", Value::int(self.root as i64)),
            ("relocatable", Value::int(self.relocatable as i64)),
            ("environment", self.environment.to_value()),
            ("tools", self.tools.to_value()),
            ("dependencies", Value::list(self.dependencies.iter().map(ToValue::to_value))),
            ("provides", self.provides.to_value()),
            ("sandbox", Value::opt(self.sandbox.as_deref().map(Value::str))),
            ("scripts", self.scripts.to_value()),
            ("scm", Value::list(self.scm.iter().map(ToValue::to_value))),
            (
                "fingerprint",
                Value::opt(self.fingerprint.as_ref().map(ToValue::to_value)),
            ),
            ("noUndefinedTools", Value::int(self.no_undefined_tools as i64)),
        ])
    }
}

impl Recipe {
    pub fn from_merged(name: impl Into<String>, entity: &RawEntity) -> Result<Self, ModelError> {
        let dependencies = entity
            .dependencies
            .iter()
            .map(Dependency::from_raw)
            .collect::<Result<_, _>>()?;
        let scm = entity.scm.iter().map(Scm::from_raw).collect::<Result<_, _>>()?;

        Ok(Recipe {
            name: name.into(),
            root: entity.root.unwrap_or(false),
            relocatable: entity.relocatable.unwrap_or(true),
            environment: Environment {
                consumed: Whitelist::from_names(entity.environment.consumed.iter().cloned()),
                provided: entity.environment.provided.iter().map(|kv| (kv.key.clone(), kv.value.clone())).collect(),
                private: entity.environment.private.iter().map(|kv| (kv.key.clone(), kv.value.clone())).collect(),
                meta: entity.environment.meta.iter().map(|kv| (kv.key.clone(), kv.value.clone())).collect(),
            },
            tools: Tools {
                strong: entity.tools.strong.clone(),
                weak: entity.tools.weak.clone(),
            },
            dependencies,
            provides: Provides::from(&entity.provides),
            sandbox: entity.sandbox.clone(),
            scripts: Scripts::from(&entity.scripts),
            scm,
            fingerprint: entity.fingerprint.as_ref().map(Fingerprint::from),
            no_undefined_tools: entity.no_undefined_tools.unwrap_or(false),
            source_release: entity.source_release.unwrap_or(0),
            build_release: entity.build_release.unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::raw::KeyValue;

    #[test]
    fn defaults_applied() {
        let entity = RawEntity::default();
        let recipe = Recipe::from_merged("pkg", &entity).unwrap();
        assert!(!recipe.root);
        assert!(recipe.relocatable);
        assert!(!recipe.no_undefined_tools);
    }

    #[test]
    fn dependency_defaults_to_full_use_set() {
        let mut entity = RawEntity::default();
        entity.dependencies.push(RawDependency {
            name: "libfoo".to_string(),
            if_condition: None,
            use_kinds: vec![],
            tools: vec![],
            forward: false,
            checkout_dep: false,
        });
        let recipe = Recipe::from_merged("pkg", &entity).unwrap();
        assert_eq!(recipe.dependencies[0].use_kinds, UseKind::default_set());
    }

    #[test]
    fn unknown_use_kind_rejected() {
        let mut entity = RawEntity::default();
        entity.dependencies.push(RawDependency {
            name: "libfoo".to_string(),
            if_condition: None,
            use_kinds: vec!["bogus".to_string()],
            tools: vec![],
            forward: false,
            checkout_dep: false,
        });
        assert!(matches!(
            Recipe::from_merged("pkg", &entity),
            Err(ModelError::UnknownUseKind(_, _))
        ));
    }

    #[test]
    fn release_counters_default_to_zero_and_carry_through() {
        let entity = RawEntity::default();
        let recipe = Recipe::from_merged("pkg", &entity).unwrap();
        assert_eq!(recipe.source_release, 0);
        assert_eq!(recipe.build_release, 0);

        let entity = RawEntity {
            source_release: Some(2),
            build_release: Some(5),
            ..Default::default()
        };
        let recipe = Recipe::from_merged("pkg", &entity).unwrap();
        assert_eq!(recipe.source_release, 2);
        assert_eq!(recipe.build_release, 5);
    }

    #[test]
    fn provides_vars_preserve_entries() {
        let mut entity = RawEntity::default();
        entity.provides.vars.push(KeyValue {
            key: "PREFIX".to_string(),
            value: "/usr".to_string(),
        });
        let recipe = Recipe::from_merged("pkg", &entity).unwrap();
        assert_eq!(recipe.provides.vars.get("PREFIX"), Some("/usr"));
    }
}
