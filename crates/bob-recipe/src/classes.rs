// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! Class inheritance resolution (spec.md §4.1): a recipe or another class
//! may `inherit:` one or more named classes. Classes are resolved in
//! dependency order so that parents are fully merged before any child that
//! inherits them, and two cycle shapes are rejected up front: a class
//! inheriting itself directly, and two or more classes inheriting each
//! other transitively.

use std::collections::BTreeMap;

use bob_graph::Dag;
use thiserror::Error;

use crate::merge::merge_entity;
use crate::raw::RawEntity;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassError {
    #[error("class `{0}` inherits itself")]
    SelfInheritance(String),
    #[error("mutual inheritance cycle among classes: {}", .0.join(" -> "))]
    MutualInheritance(Vec<String>),
    #[error("unknown class `{0}` referenced by `{1}`")]
    UnknownClass(String, String),
}

/// Resolve a set of named class bodies into their fully-merged form, each
/// one folding in every class (transitively) it inherits.
pub fn resolve_classes(classes: &BTreeMap<String, RawEntity>) -> Result<BTreeMap<String, RawEntity>, ClassError> {
    let mut dag: Dag<String> = Dag::new();
    for name in classes.keys() {
        dag.add_node_or_get_index(name.clone());
    }

    for (name, entity) in classes {
        for parent in &entity.inherit {
            if parent == name {
                return Err(ClassError::SelfInheritance(name.clone()));
            }
            if !classes.contains_key(parent) {
                return Err(ClassError::UnknownClass(parent.clone(), name.clone()));
            }
            let a = dag.add_node_or_get_index(parent.clone());
            let b = dag.add_node_or_get_index(name.clone());
            // Edge parent -> child, so a topological walk resolves parents
            // before children.
            if !dag.add_edge(a, b) {
                return Err(mutual_cycle(&dag, parent, name));
            }
        }
    }

    let order: Vec<String> = dag.topo().cloned().collect();
    let mut resolved: BTreeMap<String, RawEntity> = BTreeMap::new();
    for name in order {
        let Some(raw) = classes.get(&name) else { continue };

        let mut accumulator = RawEntity::default();
        for parent_name in &raw.inherit {
            let parent_resolved = resolved
                .get(parent_name)
                .cloned()
                .ok_or_else(|| ClassError::UnknownClass(parent_name.clone(), name.clone()))?;
            accumulator = merge_entity(&accumulator, &parent_resolved);
        }
        accumulator = merge_entity(&accumulator, raw);
        resolved.insert(name, accumulator);
    }

    Ok(resolved)
}

/// `child` already has a path back to `parent` (that's why adding the edge
/// `parent -> child` would close a cycle); walk forward from `child` to
/// find and report the loop.
fn mutual_cycle(dag: &Dag<String>, parent: &str, child: &str) -> ClassError {
    let mut path = vec![child.to_string()];
    let mut frontier = vec![child.to_string()];
    let mut guard = 0;
    while let Some(current) = frontier.pop() {
        guard += 1;
        if guard > dag.node_count() + 1 {
            break;
        }
        if current == parent {
            path.push(parent.to_string());
            return ClassError::MutualInheritance(path);
        }
        for succ in dag.successors(&current) {
            if !path.contains(succ) {
                path.push(succ.clone());
                frontier.push(succ.clone());
            }
        }
    }
    path.push(parent.to_string());
    ClassError::MutualInheritance(path)
}

/// Fold a node's own direct `inherit:` list into its final body, on top of
/// whatever its classes already resolved to. Used both for top-level recipe
/// documents and for multiPackage sub-package overrides.
pub fn apply_inherited_classes(
    entity: &RawEntity,
    resolved_classes: &BTreeMap<String, RawEntity>,
    context: &str,
) -> Result<RawEntity, ClassError> {
    apply_inherited_classes_onto(RawEntity::default(), entity, resolved_classes, context)
}

/// Like [`apply_inherited_classes`], but folds the entity's own classes and
/// fields on top of an already-resolved `base` rather than starting empty
/// (spec.md §4.1): a multiPackage sub-package's `inherit:` classes and own
/// fields must merge in ahead of the document's `base:`, not alongside it.
pub fn apply_inherited_classes_onto(
    base: RawEntity,
    entity: &RawEntity,
    resolved_classes: &BTreeMap<String, RawEntity>,
    context: &str,
) -> Result<RawEntity, ClassError> {
    let mut accumulator = base;
    for class_name in &entity.inherit {
        let class_body = resolved_classes
            .get(class_name)
            .ok_or_else(|| ClassError::UnknownClass(class_name.clone(), context.to_string()))?;
        accumulator = merge_entity(&accumulator, class_body);
    }
    Ok(merge_entity(&accumulator, entity))
}

#[cfg(test)]
mod test {
    use super::*;

    fn class(inherit: &[&str]) -> RawEntity {
        RawEntity {
            inherit: inherit.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn rejects_self_inheritance() {
        let mut classes = BTreeMap::new();
        classes.insert("cmake".to_string(), class(&["cmake"]));
        assert_eq!(
            resolve_classes(&classes),
            Err(ClassError::SelfInheritance("cmake".to_string()))
        );
    }

    #[test]
    fn rejects_mutual_inheritance() {
        let mut classes = BTreeMap::new();
        classes.insert("a".to_string(), class(&["b"]));
        classes.insert("b".to_string(), class(&["a"]));
        assert!(matches!(resolve_classes(&classes), Err(ClassError::MutualInheritance(_))));
    }

    #[test]
    fn resolves_linear_chain() {
        let mut base = class(&[]);
        base.tools.strong.push("gcc".to_string());
        let mut mid = class(&["base"]);
        mid.tools.strong.push("cmake".to_string());
        let mut top = class(&["mid"]);
        top.tools.strong.push("ninja".to_string());

        let mut classes = BTreeMap::new();
        classes.insert("base".to_string(), base);
        classes.insert("mid".to_string(), mid);
        classes.insert("top".to_string(), top);

        let resolved = resolve_classes(&classes).unwrap();
        assert_eq!(resolved["top"].tools.strong, vec!["gcc", "cmake", "ninja"]);
    }

    #[test]
    fn unknown_class_reference_errors() {
        let mut classes = BTreeMap::new();
        classes.insert("a".to_string(), class(&["missing"]));
        assert!(matches!(resolve_classes(&classes), Err(ClassError::UnknownClass(_, _))));
    }

    #[test]
    fn onto_base_lets_variant_classes_outrank_base_own_fields() {
        let mut class_a = RawEntity::default();
        class_a.tools.strong.push("classA".to_string());
        let mut class_b = RawEntity::default();
        class_b.tools.strong.push("classB".to_string());
        let resolved_classes: BTreeMap<String, RawEntity> =
            [("classA".to_string(), class_a), ("classB".to_string(), class_b)].into_iter().collect();

        let mut base_entity = class(&["classA"]);
        base_entity.tools.strong.push("base_own".to_string());
        let base_resolved = apply_inherited_classes(&base_entity, &resolved_classes, "base").unwrap();

        let mut variant = class(&["classB"]);
        variant.tools.strong.push("sub_own".to_string());
        let resolved = apply_inherited_classes_onto(base_resolved, &variant, &resolved_classes, "base/sub").unwrap();

        assert_eq!(resolved.tools.strong, vec!["classA", "base_own", "classB", "sub_own"]);
    }
}
