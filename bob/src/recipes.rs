// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! Loads every recipe under a directory tree into a [`bob_expand::Registry`],
//! resolving any shared classes found under a `classes/` subdirectory first.

use std::path::Path;

use bob_expand::Registry;
use bob_recipe::RecipeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {0:?}: {1}")]
    Io(std::path::PathBuf, std::io::Error),
    #[error("failed to glob {0:?}: {1}")]
    Glob(std::path::PathBuf, glob::PatternError),
    #[error("recipe {0:?}: {1}")]
    Recipe(std::path::PathBuf, RecipeError),
    #[error("recipe file {0:?} has no usable file stem")]
    NoRecipeName(std::path::PathBuf),
    #[error("recipe directory {0:?} does not exist")]
    MissingDir(std::path::PathBuf),
}

/// Walks `dir` for `*.yml`/`*.yaml` recipe files (excluding `classes/`),
/// resolving class inheritance from `dir/classes/*.yml` first.
pub fn load_registry(dir: &Path) -> Result<Registry, LoadError> {
    if !dir.is_dir() {
        return Err(LoadError::MissingDir(dir.to_path_buf()));
    }

    let classes_dir = dir.join("classes");
    let mut class_sources = std::collections::BTreeMap::new();
    if classes_dir.is_dir() {
        for path in glob_yaml(&classes_dir)? {
            let name = recipe_name(&path)?;
            let source = fs_err::read_to_string(&path).map_err(|e| LoadError::Io(path.clone(), e.into()))?;
            class_sources.insert(name, source);
        }
    }
    let resolved_classes = bob_recipe::resolve_class_sources(&class_sources).map_err(|e| LoadError::Recipe(classes_dir.clone(), e))?;

    let mut registry = Registry::new();
    for path in glob_yaml(dir)? {
        if path.starts_with(&classes_dir) {
            continue;
        }
        let name = recipe_name(&path)?;
        let source = fs_err::read_to_string(&path).map_err(|e| LoadError::Io(path.clone(), e.into()))?;
        let loaded = bob_recipe::load_recipe(&source, &resolved_classes, &name).map_err(|e| LoadError::Recipe(path.clone(), e))?;
        for package in loaded.packages {
            registry.insert(package);
        }
    }

    Ok(registry)
}

fn glob_yaml(dir: &Path) -> Result<Vec<std::path::PathBuf>, LoadError> {
    let mut found = Vec::new();
    for pattern in ["*.yml", "*.yaml"] {
        let full = dir.join("**").join(pattern);
        let full = full.to_string_lossy().into_owned();
        for entry in glob::glob(&full).map_err(|e| LoadError::Glob(dir.to_path_buf(), e))? {
            if let Ok(path) = entry {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

fn recipe_name(path: &Path) -> Result<String, LoadError> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| LoadError::NoRecipeName(path.to_path_buf()))
}
