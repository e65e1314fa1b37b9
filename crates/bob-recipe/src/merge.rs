// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! Field-wise merge rules for class inheritance and multiPackage base
//! merging (spec.md §4.1): scalars — child wins; lists — concatenate child
//! after parents in declaration order; maps — recursively merge
//! (append-with-override).

use crate::raw::{KeyValue, RawEntity, RawEnvironment, RawProvides, RawScripts, RawTools};

/// Merge `child` over `parent`. `parent` supplies defaults and the head of
/// every concatenated list; `child` wins every scalar conflict.
pub fn merge_entity(parent: &RawEntity, child: &RawEntity) -> RawEntity {
    RawEntity {
        // `inherit` is consumed during class resolution and must not
        // itself propagate into the merged result.
        inherit: Vec::new(),
        root: child.root.or(parent.root),
        relocatable: child.relocatable.or(parent.relocatable),
        environment: merge_environment(&parent.environment, &child.environment),
        tools: merge_tools(&parent.tools, &child.tools),
        dependencies: concat(&parent.dependencies, &child.dependencies),
        provides: merge_provides(&parent.provides, &child.provides),
        sandbox: child.sandbox.clone().or_else(|| parent.sandbox.clone()),
        scripts: merge_scripts(&parent.scripts, &child.scripts),
        scm: concat(&parent.scm, &child.scm),
        fingerprint: child.fingerprint.clone().or_else(|| parent.fingerprint.clone()),
        no_undefined_tools: child.no_undefined_tools.or(parent.no_undefined_tools),
        source_release: child.source_release.or(parent.source_release),
        build_release: child.build_release.or(parent.build_release),
    }
}

fn concat<T: Clone>(parent: &[T], child: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(parent.len() + child.len());
    out.extend_from_slice(parent);
    out.extend_from_slice(child);
    out
}

fn merge_kv_list(parent: &[KeyValue<String>], child: &[KeyValue<String>]) -> Vec<KeyValue<String>> {
    // append-with-override: child entries replace a parent entry with the
    // same key in place; new keys are appended.
    let mut out: Vec<KeyValue<String>> = parent.to_vec();
    for entry in child {
        if let Some(slot) = out.iter_mut().find(|kv| kv.key == entry.key) {
            slot.value = entry.value.clone();
        } else {
            out.push(entry.clone());
        }
    }
    out
}

fn merge_environment(parent: &RawEnvironment, child: &RawEnvironment) -> RawEnvironment {
    RawEnvironment {
        consumed: {
            let mut out = parent.consumed.clone();
            for name in &child.consumed {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            out
        },
        provided: merge_kv_list(&parent.provided, &child.provided),
        private: merge_kv_list(&parent.private, &child.private),
        meta: merge_kv_list(&parent.meta, &child.meta),
    }
}

fn merge_tools(parent: &RawTools, child: &RawTools) -> RawTools {
    RawTools {
        strong: concat(&parent.strong, &child.strong),
        weak: concat(&parent.weak, &child.weak),
    }
}

fn merge_provides(parent: &RawProvides, child: &RawProvides) -> RawProvides {
    RawProvides {
        tools: merge_kv_list(&parent.tools, &child.tools),
        dependencies: concat(&parent.dependencies, &child.dependencies),
        sandbox: child.sandbox.clone().or_else(|| parent.sandbox.clone()),
        vars: merge_kv_list(&parent.vars, &child.vars),
    }
}

fn merge_scripts(parent: &RawScripts, child: &RawScripts) -> RawScripts {
    RawScripts {
        checkout: child.checkout.clone().or_else(|| parent.checkout.clone()),
        build: child.build.clone().or_else(|| parent.build.clone()),
        package: child.package.clone().or_else(|| parent.package.clone()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn env_with(provided: &[(&str, &str)]) -> RawEnvironment {
        RawEnvironment {
            consumed: vec![],
            provided: provided
                .iter()
                .map(|(k, v)| KeyValue {
                    key: k.to_string(),
                    value: v.to_string(),
                })
                .collect(),
            private: vec![],
            meta: vec![],
        }
    }

    #[test]
    fn scalar_child_wins() {
        let parent = RawEntity {
            root: Some(true),
            ..Default::default()
        };
        let child = RawEntity {
            root: Some(false),
            ..Default::default()
        };
        assert_eq!(merge_entity(&parent, &child).root, Some(false));
    }

    #[test]
    fn scalar_falls_back_to_parent() {
        let parent = RawEntity {
            relocatable: Some(false),
            ..Default::default()
        };
        let child = RawEntity::default();
        assert_eq!(merge_entity(&parent, &child).relocatable, Some(false));
    }

    #[test]
    fn lists_concat_parent_then_child() {
        let parent = RawEntity {
            tools: RawTools {
                strong: vec!["gcc".into()],
                weak: vec![],
            },
            ..Default::default()
        };
        let child = RawEntity {
            tools: RawTools {
                strong: vec!["clang".into()],
                weak: vec![],
            },
            ..Default::default()
        };
        assert_eq!(merge_entity(&parent, &child).tools.strong, vec!["gcc", "clang"]);
    }

    #[test]
    fn env_maps_append_with_override() {
        let parent = RawEntity {
            environment: env_with(&[("A", "1"), ("B", "2")]),
            ..Default::default()
        };
        let child = RawEntity {
            environment: env_with(&[("B", "3"), ("C", "4")]),
            ..Default::default()
        };
        let merged = merge_entity(&parent, &child).environment.provided;
        let values: Vec<_> = merged.iter().map(|kv| (kv.key.as_str(), kv.value.as_str())).collect();
        assert_eq!(values, vec![("A", "1"), ("B", "3"), ("C", "4")]);
    }
}
