// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! Recipe parsing: turns YAML text into the normalized [`Recipe`] model,
//! applying class inheritance and multiPackage splitting along the way
//! (spec.md §3-4).

use std::collections::BTreeMap;

use thiserror::Error;

mod classes;
mod merge;
mod model;
mod raw;

pub use classes::ClassError;
pub use model::{Dependency, Environment, Fingerprint, ModelError, Provides, Recipe, Scm, ScmKind, Scripts, Tools, UseKind};
pub use raw::{KeyValue, RawDocument, RawEntity};

#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("failed to parse recipe YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Class(#[from] ClassError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("multiPackage recipe declares sub-package `{0}` more than once")]
    DuplicatePackageName(String),
}

/// The fully loaded set of packages a single recipe document expands to: one
/// entry for a plain recipe, several for a `multiPackage` recipe (spec.md
/// §3's "one recipe file may describe more than one package").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedRecipe {
    pub packages: Vec<Recipe>,
}

/// Parse one recipe document and resolve it against an already-resolved set
/// of named classes (produced by [`resolve_class_sources`]).
pub fn load_recipe(
    source: &str,
    resolved_classes: &BTreeMap<String, RawEntity>,
    recipe_name: &str,
) -> Result<LoadedRecipe, RecipeError> {
    let document = raw::from_str(source)?;

    let base = classes::apply_inherited_classes(&document.base, resolved_classes, recipe_name)?;

    if document.sub_packages.is_empty() {
        let recipe = Recipe::from_merged(recipe_name, &base)?;
        return Ok(LoadedRecipe {
            packages: vec![recipe],
        });
    }

    let mut seen = std::collections::BTreeSet::new();
    let mut packages = Vec::with_capacity(document.sub_packages.len());
    for sub in &document.sub_packages {
        if !seen.insert(sub.name.clone()) {
            return Err(RecipeError::DuplicatePackageName(sub.name.clone()));
        }
        let context = format!("{recipe_name}/{}", sub.name);
        // The sub-package's own classes and fields resolve on top of the
        // already-resolved base, not independently of it (spec.md §4.1):
        // a class the sub-package inherits must outrank the base's own
        // fields, the same way the sub-package's own fields do.
        let resolved = classes::apply_inherited_classes_onto(base.clone(), &sub.entity, resolved_classes, &context)?;
        packages.push(Recipe::from_merged(sub.name.clone(), &resolved)?);
    }

    Ok(LoadedRecipe { packages })
}

/// Parse a set of class source YAML documents (keyed by class name) and
/// resolve their inheritance into a flat, ready-to-use map.
pub fn resolve_class_sources(sources: &BTreeMap<String, String>) -> Result<BTreeMap<String, RawEntity>, RecipeError> {
    let mut parsed = BTreeMap::new();
    for (name, source) in sources {
        let document = raw::from_str(source)?;
        parsed.insert(name.clone(), document.base);
    }
    Ok(classes::resolve_classes(&parsed)?)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn plain_recipe_loads_single_package() {
        let yaml = r#"
tools:
  strong: [gcc]
"#;
        let classes = BTreeMap::new();
        let loaded = load_recipe(yaml, &classes, "hello").unwrap();
        assert_eq!(loaded.packages.len(), 1);
        assert_eq!(loaded.packages[0].name, "hello");
        assert_eq!(loaded.packages[0].tools.strong, vec!["gcc"]);
    }

    #[test]
    fn multi_package_splits_and_merges_base() {
        let yaml = r#"
tools:
  strong: [gcc]
packages:
  - name: hello-bin
    tools:
      strong: [strip]
  - name: hello-devel
"#;
        let classes = BTreeMap::new();
        let loaded = load_recipe(yaml, &classes, "hello").unwrap();
        assert_eq!(loaded.packages.len(), 2);
        assert_eq!(loaded.packages[0].name, "hello-bin");
        assert_eq!(loaded.packages[0].tools.strong, vec!["gcc", "strip"]);
        assert_eq!(loaded.packages[1].name, "hello-devel");
        assert_eq!(loaded.packages[1].tools.strong, vec!["gcc"]);
    }

    #[test]
    fn duplicate_sub_package_names_rejected() {
        let yaml = r#"
packages:
  - name: dup
  - name: dup
"#;
        let classes = BTreeMap::new();
        assert!(matches!(
            load_recipe(yaml, &classes, "hello"),
            Err(RecipeError::DuplicatePackageName(_))
        ));
    }

    #[test]
    fn recipe_inherits_resolved_class() {
        let mut class_sources = BTreeMap::new();
        class_sources.insert(
            "cmake".to_string(),
            "tools:\n  strong: [cmake, ninja]\n".to_string(),
        );
        let classes = resolve_class_sources(&class_sources).unwrap();

        let yaml = "inherit: [cmake]\n";
        let loaded = load_recipe(yaml, &classes, "widget").unwrap();
        assert_eq!(loaded.packages[0].tools.strong, vec!["cmake", "ninja"]);
    }

    #[test]
    fn sub_package_inherit_list_is_independent_of_base() {
        let mut class_sources = BTreeMap::new();
        class_sources.insert("toolchain".to_string(), "tools:\n  strong: [gcc]\n".to_string());
        class_sources.insert("strip-tool".to_string(), "tools:\n  strong: [strip]\n".to_string());
        let classes = resolve_class_sources(&class_sources).unwrap();

        let yaml = r#"
inherit: [toolchain]
packages:
  - name: hello-bin
    inherit: [strip-tool]
    tools:
      strong: [ld]
  - name: hello-devel
"#;
        let loaded = load_recipe(yaml, &classes, "hello").unwrap();
        assert_eq!(loaded.packages.len(), 2);
        // classA(toolchain), base_own(none), classB(strip-tool), sub_own(ld)
        assert_eq!(loaded.packages[0].name, "hello-bin");
        assert_eq!(loaded.packages[0].tools.strong, vec!["gcc", "strip", "ld"]);
        // hello-devel declares no inherit of its own, so only the base's class applies.
        assert_eq!(loaded.packages[1].name, "hello-devel");
        assert_eq!(loaded.packages[1].tools.strong, vec!["gcc"]);
    }
}
