// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! The YAML-facing shape recipes and classes parse into, before class
//! merging and multiPackage splitting produce a normalized [`crate::Recipe`].

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct KeyValue<T> {
    pub key: String,
    pub value: T,
}

fn default_true() -> bool {
    true
}

/// One YAML document: a recipe or class body plus, for `multiPackage`
/// recipes, the list of sub-package overrides.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawDocument {
    #[serde(flatten)]
    pub base: RawEntity,
    #[serde(default, rename = "packages")]
    pub sub_packages: Vec<RawPackageOverride>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPackageOverride {
    pub name: String,
    #[serde(flatten)]
    pub entity: RawEntity,
}

/// Recipe and class bodies are syntactically identical (spec.md §3); only
/// the loader's treatment of `root` differs (classes may never set it).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawEntity {
    #[serde(default)]
    pub inherit: Vec<String>,
    #[serde(default)]
    pub root: Option<bool>,
    #[serde(default)]
    pub relocatable: Option<bool>,
    #[serde(default)]
    pub environment: RawEnvironment,
    #[serde(default)]
    pub tools: RawTools,
    #[serde(default)]
    pub dependencies: Vec<RawDependency>,
    #[serde(default)]
    pub provides: RawProvides,
    #[serde(default)]
    pub sandbox: Option<String>,
    #[serde(default)]
    pub scripts: RawScripts,
    #[serde(default)]
    pub scm: Vec<RawScm>,
    #[serde(default)]
    pub fingerprint: Option<RawFingerprint>,
    #[serde(default, rename = "noUndefinedTools")]
    pub no_undefined_tools: Option<bool>,
    /// Monotonic counters bumped when the recipe's source or build
    /// behavior changes without the upstream version changing (mirrors
    /// `moss::package::meta::Meta`'s release fields). Human-facing and
    /// audit metadata only; never a hash input.
    #[serde(default, rename = "sourceRelease")]
    pub source_release: Option<u64>,
    #[serde(default, rename = "buildRelease")]
    pub build_release: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawEnvironment {
    #[serde(default)]
    pub consumed: Vec<String>,
    #[serde(default)]
    pub provided: Vec<KeyValue<String>>,
    #[serde(default)]
    pub private: Vec<KeyValue<String>>,
    #[serde(default)]
    pub meta: Vec<KeyValue<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawTools {
    #[serde(default)]
    pub strong: Vec<String>,
    #[serde(default)]
    pub weak: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDependency {
    pub name: String,
    #[serde(default, rename = "if")]
    pub if_condition: Option<String>,
    #[serde(default, rename = "use")]
    pub use_kinds: Vec<String>,
    #[serde(default)]
    pub tools: Vec<KeyValue<String>>,
    #[serde(default)]
    pub forward: bool,
    #[serde(default, rename = "checkoutDep")]
    pub checkout_dep: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawProvides {
    #[serde(default)]
    pub tools: Vec<KeyValue<String>>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub sandbox: Option<String>,
    #[serde(default)]
    pub vars: Vec<KeyValue<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawScripts {
    pub checkout: Option<String>,
    pub build: Option<String>,
    pub package: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawScm {
    pub kind: String,
    pub url: String,
    #[serde(default, rename = "ref")]
    pub scm_ref: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default = "default_true")]
    pub submodules: bool,
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default, rename = "if")]
    pub if_condition: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFingerprint {
    #[serde(default)]
    pub predicate: Option<String>,
    pub script: String,
}

pub fn from_str(input: &str) -> Result<RawDocument, serde_yaml::Error> {
    serde_yaml::from_str(input)
}
