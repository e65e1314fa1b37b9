// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! Layered configuration (spec.md §6): a system-wide vendor default, a
//! project `default.yaml`, `-c <file>` overrides in the order given, and
//! `-D VAR=VALUE` overrides, merged in that increasing-precedence order.
//! Mirrors the teacher's `Manager`/`Scope` split between vendor and admin
//! search paths, generalized to project-local and explicit file paths.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0:?}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("failed to parse config file {0:?}: {1}")]
    Yaml(PathBuf, serde_yaml::Error),
    #[error("invalid -D override `{0}`: expected VAR=VALUE")]
    InvalidDefine(String),
    #[error("recipe requires bob >= {required}, this is bob {actual}")]
    MinimumVersionNotMet { required: String, actual: String },
}

/// Anything that can be merged across configuration layers, one layer
/// taking precedence over the previous (matching the teacher's `Config`
/// trait, generalized from a single `merge` to the full four-layer stack).
pub trait Config: Sized {
    /// Merge `other` (a higher-precedence layer) onto `self`.
    fn merge(self, other: Self) -> Self;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    File,
    Http,
    Azure,
    S3,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ArchiveBackendConfig {
    pub name: String,
    pub backend: BackendKind,
    #[serde(rename = "path", alias = "url")]
    pub location: String,
    #[serde(default)]
    pub flags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ShareConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub quota: Option<u64>,
    #[serde(default, rename = "autoClean")]
    pub auto_clean: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScmOverride {
    #[serde(rename = "match")]
    pub match_glob: String,
    #[serde(flatten)]
    pub settings: BTreeMap<String, String>,
}

/// The full set of recognized top-level configuration keys (spec.md §6).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BobConfig {
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub archive: Vec<ArchiveBackendConfig>,
    #[serde(default)]
    pub share: Option<ShareConfig>,
    #[serde(default, rename = "scmOverrides")]
    pub scm_overrides: Vec<ScmOverride>,
    #[serde(default, rename = "scmDefaults")]
    pub scm_defaults: BTreeMap<String, String>,
    #[serde(default, rename = "rootFilter")]
    pub root_filter: Vec<String>,
    #[serde(default)]
    pub hooks: BTreeMap<String, String>,
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub policies: BTreeMap<String, bool>,
    #[serde(default, rename = "bobMinimumVersion")]
    pub bob_minimum_version: Option<String>,
    #[serde(default)]
    pub layers: Vec<String>,
    #[serde(default, rename = "layersScmOverrides")]
    pub layers_scm_overrides: Vec<ScmOverride>,
}

impl Config for BobConfig {
    fn merge(self, other: Self) -> Self {
        BobConfig {
            environment: merge_map(self.environment, other.environment),
            whitelist: concat(self.whitelist, other.whitelist),
            archive: concat(self.archive, other.archive),
            share: other.share.or(self.share),
            scm_overrides: concat(self.scm_overrides, other.scm_overrides),
            scm_defaults: merge_map(self.scm_defaults, other.scm_defaults),
            root_filter: concat(self.root_filter, other.root_filter),
            hooks: merge_map(self.hooks, other.hooks),
            plugins: concat(self.plugins, other.plugins),
            policies: merge_map(self.policies, other.policies),
            bob_minimum_version: other.bob_minimum_version.or(self.bob_minimum_version),
            layers: concat(self.layers, other.layers),
            layers_scm_overrides: concat(self.layers_scm_overrides, other.layers_scm_overrides),
        }
    }
}

fn concat<T>(mut base: Vec<T>, extra: Vec<T>) -> Vec<T> {
    base.extend(extra);
    base
}

fn merge_map<K: Ord, V>(mut base: BTreeMap<K, V>, extra: BTreeMap<K, V>) -> BTreeMap<K, V> {
    base.extend(extra);
    base
}

/// Loads and merges the four configuration layers in increasing precedence.
pub struct Manager {
    program: String,
}

impl Manager {
    pub fn new(program: impl ToString) -> Self {
        Self { program: program.to_string() }
    }

    /// `vendor_root` is typically `/usr/share`, `project_root` the directory
    /// holding `default.yaml`. `cli_overrides` are `-c <file>` arguments in
    /// the order given; `defines` are `-D VAR=VALUE` pairs, applied last
    /// (highest precedence, as direct `environment` entries).
    pub async fn load(
        &self,
        vendor_root: &Path,
        project_root: &Path,
        cli_overrides: &[PathBuf],
        defines: &[String],
    ) -> Result<BobConfig, ConfigError> {
        let mut config = BobConfig::default();

        let vendor_file = vendor_root.join(&self.program).join("default.yaml");
        if let Some(layer) = read_layer(&vendor_file).await? {
            config = config.merge(layer);
        }

        let project_file = project_root.join("default.yaml");
        if let Some(layer) = read_layer(&project_file).await? {
            config = config.merge(layer);
        }

        for path in cli_overrides {
            if let Some(layer) = read_layer(path).await? {
                config = config.merge(layer);
            } else {
                return Err(ConfigError::Io(path.clone(), std::io::Error::from(std::io::ErrorKind::NotFound)));
            }
        }

        for define in defines {
            let (key, value) = define.split_once('=').ok_or_else(|| ConfigError::InvalidDefine(define.clone()))?;
            config.environment.insert(key.to_string(), value.to_string());
        }

        Ok(config)
    }

    /// Verify `bobMinimumVersion`, if the merged config declares one,
    /// against the running binary's own version.
    pub fn check_minimum_version(config: &BobConfig, actual_version: &str) -> Result<(), ConfigError> {
        let Some(required) = &config.bob_minimum_version else {
            return Ok(());
        };
        if version_at_least(actual_version, required) {
            Ok(())
        } else {
            Err(ConfigError::MinimumVersionNotMet {
                required: required.clone(),
                actual: actual_version.to_string(),
            })
        }
    }
}

async fn read_layer(path: &Path) -> Result<Option<BobConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = tokio::fs::read(path).await.map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    let config = serde_yaml::from_slice(&bytes).map_err(|e| ConfigError::Yaml(path.to_path_buf(), e))?;
    Ok(Some(config))
}

fn version_parts(version: &str) -> Vec<u64> {
    version.split('.').map(|part| part.parse().unwrap_or(0)).collect()
}

fn version_at_least(actual: &str, required: &str) -> bool {
    let actual_parts = version_parts(actual);
    let required_parts = version_parts(required);
    for i in 0..actual_parts.len().max(required_parts.len()) {
        let a = actual_parts.get(i).copied().unwrap_or(0);
        let r = required_parts.get(i).copied().unwrap_or(0);
        if a != r {
            return a > r;
        }
    }
    true
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn merge_prefers_higher_precedence_scalars() {
        let base = BobConfig {
            bob_minimum_version: Some("1.0.0".to_string()),
            ..Default::default()
        };
        let override_layer = BobConfig {
            bob_minimum_version: Some("2.0.0".to_string()),
            ..Default::default()
        };
        let merged = base.merge(override_layer);
        assert_eq!(merged.bob_minimum_version, Some("2.0.0".to_string()));
    }

    #[test]
    fn merge_concatenates_lists_and_overrides_maps() {
        let mut base = BobConfig::default();
        base.whitelist.push("ARCH".to_string());
        base.environment.insert("ARCH".to_string(), "x86_64".to_string());

        let mut override_layer = BobConfig::default();
        override_layer.whitelist.push("PREFIX".to_string());
        override_layer.environment.insert("ARCH".to_string(), "aarch64".to_string());

        let merged = base.merge(override_layer);
        assert_eq!(merged.whitelist, vec!["ARCH".to_string(), "PREFIX".to_string()]);
        assert_eq!(merged.environment.get("ARCH"), Some(&"aarch64".to_string()));
    }

    #[tokio::test]
    async fn layered_load_applies_precedence_in_order() {
        let dir = std::env::temp_dir().join("bob-config-test-layers");
        let _ = fs_err::remove_dir_all(&dir);
        let vendor = dir.join("vendor");
        let project = dir.join("project");
        fs_err::create_dir_all(vendor.join("bob")).unwrap();
        fs_err::create_dir_all(&project).unwrap();

        fs_err::write(vendor.join("bob").join("default.yaml"), "environment:\n  ARCH: x86_64\n").unwrap();
        fs_err::write(project.join("default.yaml"), "environment:\n  PREFIX: /usr\n").unwrap();

        let manager = Manager::new("bob");
        let config = manager.load(&vendor, &project, &[], &["ARCH=aarch64".to_string()]).await.unwrap();

        assert_eq!(config.environment.get("PREFIX"), Some(&"/usr".to_string()));
        assert_eq!(config.environment.get("ARCH"), Some(&"aarch64".to_string()));

        fs_err::remove_dir_all(&dir).ok();
    }

    #[test]
    fn minimum_version_check_rejects_older_binary() {
        let config = BobConfig {
            bob_minimum_version: Some("2.1.0".to_string()),
            ..Default::default()
        };
        assert!(Manager::check_minimum_version(&config, "2.0.0").is_err());
        assert!(Manager::check_minimum_version(&config, "2.1.0").is_ok());
        assert!(Manager::check_minimum_version(&config, "3.0.0").is_ok());
    }
}
