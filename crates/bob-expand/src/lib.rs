// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! The package expander (spec.md §4.2): walks a root recipe's dependency
//! graph left-to-right and depth-first, threading inherited environment,
//! tools, and sandbox policy down each edge, pulling contributions back up
//! per the edge's `use:` list, forwarding a child's provides to later
//! siblings, and deduplicating the resulting packages by a structural
//! identity digest.

use std::collections::{BTreeMap, HashSet, VecDeque};

use bob_env::{EnvMap, Environment};
use bob_hash::{Digest, ToValue, Value};
use bob_recipe::{Recipe, UseKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExpandError {
    #[error("recipe `{0}` not found")]
    UnknownRecipe(String),
    #[error("recipe `{0}` declares a dependency on unknown recipe `{1}`")]
    UnknownDependency(String, String),
    #[error("cyclic dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),
    #[error("recipe `{0}` declares noUndefinedTools but tool `{1}` is never resolved")]
    UndefinedTool(String, String),
    #[error(transparent)]
    Substitute(#[from] bob_env::SubstituteError),
    #[error(transparent)]
    Expr(#[from] bob_env::ExprError),
}

/// A set of recipes the expander can resolve dependency names against.
#[derive(Debug, Default)]
pub struct Registry {
    recipes: BTreeMap<String, Recipe>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, recipe: Recipe) {
        self.recipes.insert(recipe.name.clone(), recipe);
    }

    pub fn get(&self, name: &str) -> Option<&Recipe> {
        self.recipes.get(name)
    }
}

/// One resolved dependency edge in the expanded tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedEdge {
    pub recipe_name: String,
    pub package_id: Digest,
    pub use_kinds: Vec<UseKind>,
}

/// A resolved tool path plus, when traceable to a dependency edge's
/// `provides.tools`, the package that provides it. A tool supplied directly
/// by an edge's `tools:` remap names no package in the graph, so its
/// `provider_package_id` is `None` — there is no build to strongly depend on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSource {
    pub tool_path: String,
    pub provider_package_id: Option<Digest>,
}

impl ToValue for ToolSource {
    fn to_value(&self) -> Value {
        Value::map([
            ("path", Value::str(&self.tool_path)),
            (
                "provider",
                Value::opt(self.provider_package_id.map(|d| Value::bytes(d.as_bytes().to_vec()))),
            ),
        ])
    }
}

/// A single concrete package produced by expansion: one recipe instantiated
/// with a specific resolved environment, tool map, and sandbox policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedPackage {
    pub recipe_name: String,
    /// Structural identity used for deduplication (spec.md §4.2's ambiguity
    /// resolution): two instantiations with the same digest are the same
    /// package, even if reached via different root recipes.
    pub package_id: Digest,
    pub environment: Environment,
    pub tools: BTreeMap<String, ToolSource>,
    pub sandbox: Option<String>,
    pub dependencies: Vec<ExpandedEdge>,
    /// Display/audit metadata carried straight from the recipe (never part
    /// of `package_id`'s hash input).
    pub source_release: u64,
    pub build_release: u64,
}

/// The full output of expanding one root recipe: every distinct package
/// reached, in first-visited (depth-first, declaration) order, plus the
/// root's own id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedTree {
    pub packages: Vec<ExpandedPackage>,
    pub root_id: Digest,
}

fn use_kind_str(kind: UseKind) -> &'static str {
    match kind {
        UseKind::Results => "results",
        UseKind::Environment => "environment",
        UseKind::Tools => "tools",
        UseKind::Sandbox => "sandbox",
        UseKind::Dependencies => "dependencies",
    }
}

struct PendingDep {
    name: String,
    if_condition: Option<String>,
    use_kinds: Vec<UseKind>,
    tools_remap: BTreeMap<String, String>,
    forward: bool,
}

pub fn expand_root(registry: &Registry, root_name: &str, base_environment: Environment) -> Result<ExpandedTree, ExpandError> {
    let mut active = Vec::new();
    let mut seen = HashSet::new();
    let mut packages = Vec::new();

    let root = expand_node(registry, root_name, base_environment, BTreeMap::new(), None, &mut active, &mut seen, &mut packages)?;

    Ok(ExpandedTree {
        root_id: root.package_id,
        packages,
    })
}

#[allow(clippy::too_many_arguments)]
fn expand_node(
    registry: &Registry,
    name: &str,
    inherited_env: Environment,
    inherited_tools: BTreeMap<String, ToolSource>,
    inherited_sandbox: Option<String>,
    active: &mut Vec<String>,
    seen: &mut HashSet<Digest>,
    packages: &mut Vec<ExpandedPackage>,
) -> Result<ExpandedPackage, ExpandError> {
    if active.iter().any(|n| n == name) {
        let mut chain = active.clone();
        chain.push(name.to_string());
        return Err(ExpandError::CyclicDependency(chain));
    }
    let recipe = registry.get(name).ok_or_else(|| ExpandError::UnknownRecipe(name.to_string()))?;
    active.push(name.to_string());

    let masked_inherited: EnvMap = inherited_env
        .values
        .iter()
        .filter(|(k, _)| recipe.environment.consumed.allows(k))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let mut self_values = masked_inherited.merged_with(&recipe.environment.provided).merged_with(&recipe.environment.private);

    let mut self_whitelist = recipe.environment.consumed.clone();
    for (k, _) in recipe.environment.provided.iter() {
        self_whitelist.insert(k);
    }
    for (k, _) in recipe.environment.private.iter() {
        self_whitelist.insert(k);
    }

    let mut self_sandbox = inherited_sandbox;
    let mut self_tools = inherited_tools;

    let mut pending: VecDeque<PendingDep> = recipe
        .dependencies
        .iter()
        .map(|dep| PendingDep {
            name: dep.name.clone(),
            if_condition: dep.if_condition.clone(),
            use_kinds: dep.use_kinds.clone(),
            tools_remap: dep.tools.clone(),
            forward: dep.forward,
        })
        .collect();

    let mut forwarded_tools: BTreeMap<String, ToolSource> = BTreeMap::new();
    let mut forwarded_env = EnvMap::new();
    let mut forwarded_sandbox: Option<String> = None;

    let mut edges = Vec::new();

    while let Some(dep) = pending.pop_front() {
        let self_env_snapshot = Environment::new(self_values.clone(), self_whitelist.clone());
        if let Some(cond) = &dep.if_condition {
            if !self_env_snapshot.eval_condition(cond)? {
                continue;
            }
        }

        let child_recipe = registry.get(&dep.name).ok_or_else(|| ExpandError::UnknownDependency(name.to_string(), dep.name.clone()))?;

        // Tool remaps declared on the edge apply before forwarding reaches
        // this child (the legacy-compatible ordering spec.md §9 assumes).
        // A remap names a literal path, not a package, so it carries no
        // provider identity.
        let mut child_tools = self_tools.clone();
        for (k, v) in &forwarded_tools {
            child_tools.insert(k.clone(), v.clone());
        }
        for (k, v) in &dep.tools_remap {
            child_tools.insert(
                k.clone(),
                ToolSource {
                    tool_path: v.clone(),
                    provider_package_id: None,
                },
            );
        }

        let child_inherited_values = self_values.merged_with(&forwarded_env);
        let child_inherited_env = Environment::new(child_inherited_values, self_whitelist.clone());
        let child_inherited_sandbox = forwarded_sandbox.clone().or_else(|| self_sandbox.clone());

        let child_package = expand_node(registry, &dep.name, child_inherited_env, child_tools, child_inherited_sandbox, active, seen, packages)?;

        if dep.forward {
            for (k, v) in child_recipe.provides.tools.iter() {
                forwarded_tools.insert(
                    k.clone(),
                    ToolSource {
                        tool_path: v.clone(),
                        provider_package_id: Some(child_package.package_id),
                    },
                );
            }
            for (k, v) in child_recipe.provides.vars.iter() {
                forwarded_env.set(k, v);
            }
            if let Some(sandbox) = &child_recipe.provides.sandbox {
                forwarded_sandbox = Some(sandbox.clone());
            }
        }

        if dep.use_kinds.contains(&UseKind::Environment) {
            for (k, v) in child_recipe.provides.vars.iter() {
                self_values.set(k, v);
                self_whitelist.insert(k);
            }
        }
        if dep.use_kinds.contains(&UseKind::Tools) {
            for (k, v) in child_recipe.provides.tools.iter() {
                self_tools.insert(
                    k.clone(),
                    ToolSource {
                        tool_path: v.clone(),
                        provider_package_id: Some(child_package.package_id),
                    },
                );
            }
        }
        if dep.use_kinds.contains(&UseKind::Sandbox) {
            if let Some(sandbox) = &child_recipe.provides.sandbox {
                self_sandbox = Some(sandbox.clone());
            }
        }
        if dep.use_kinds.contains(&UseKind::Dependencies) {
            for extra in &child_recipe.provides.dependencies {
                pending.push_back(PendingDep {
                    name: extra.clone(),
                    if_condition: None,
                    use_kinds: UseKind::default_set(),
                    tools_remap: BTreeMap::new(),
                    forward: false,
                });
            }
        }

        edges.push(ExpandedEdge {
            recipe_name: dep.name.clone(),
            package_id: child_package.package_id,
            use_kinds: dep.use_kinds.clone(),
        });
    }

    if recipe.no_undefined_tools {
        for tool_name in recipe.tools.strong.iter().chain(recipe.tools.weak.iter()) {
            if !self_tools.contains_key(tool_name) {
                return Err(ExpandError::UndefinedTool(name.to_string(), tool_name.clone()));
            }
        }
    }

    active.pop();

    let package_id = bob_hash::hash(&Value::map([
        ("recipe", Value::str(name)),
        ("environment", self_values.to_value()),
        ("tools", Value::map(self_tools.iter().map(|(k, v)| (k.as_str(), v.to_value())))),
        ("sandbox", Value::opt(self_sandbox.as_deref().map(Value::str))),
        (
            "dependencies",
            Value::list(edges.iter().map(|e| {
                Value::map([
                    ("recipe", Value::str(&e.recipe_name)),
                    ("packageId", Value::bytes(e.package_id.as_bytes().to_vec())),
                    ("use", Value::list(e.use_kinds.iter().map(|k| Value::str(use_kind_str(*k))))),
                ])
            })),
        ),
    ]));

    let package = ExpandedPackage {
        recipe_name: name.to_string(),
        package_id,
        environment: Environment::new(self_values, self_whitelist),
        tools: self_tools,
        sandbox: self_sandbox,
        dependencies: edges,
        source_release: recipe.source_release,
        build_release: recipe.build_release,
    };

    if seen.insert(package_id) {
        packages.push(package.clone());
    }

    Ok(package)
}

#[cfg(test)]
mod test {
    use super::*;
    use bob_env::Whitelist;
    use bob_recipe::{Dependency, Provides, Scripts, Tools};

    fn bare_recipe(name: &str) -> Recipe {
        Recipe {
            name: name.to_string(),
            root: false,
            relocatable: true,
            environment: bob_recipe::Environment::default(),
            tools: Tools::default(),
            dependencies: vec![],
            provides: Provides::default(),
            sandbox: None,
            scripts: Scripts::default(),
            scm: vec![],
            fingerprint: None,
            no_undefined_tools: false,
            source_release: 0,
            build_release: 0,
        }
    }

    fn dep(name: &str, use_kinds: Vec<UseKind>, forward: bool) -> Dependency {
        Dependency {
            name: name.to_string(),
            if_condition: None,
            use_kinds,
            tools: BTreeMap::new(),
            forward,
            checkout_dep: false,
        }
    }

    fn empty_env() -> Environment {
        Environment::new(EnvMap::new(), Whitelist::new())
    }

    #[test]
    fn unknown_dependency_is_fatal() {
        let mut registry = Registry::new();
        let mut root = bare_recipe("root");
        root.dependencies.push(dep("missing", UseKind::default_set(), false));
        registry.insert(root);

        let err = expand_root(&registry, "root", empty_env()).unwrap_err();
        assert!(matches!(err, ExpandError::UnknownDependency(_, _)));
    }

    #[test]
    fn self_inheritance_style_cycle_is_rejected() {
        let mut registry = Registry::new();
        let mut a = bare_recipe("a");
        a.dependencies.push(dep("b", UseKind::default_set(), false));
        let mut b = bare_recipe("b");
        b.dependencies.push(dep("a", UseKind::default_set(), false));
        registry.insert(a);
        registry.insert(b);

        let err = expand_root(&registry, "a", empty_env()).unwrap_err();
        assert!(matches!(err, ExpandError::CyclicDependency(_)));
    }

    #[test]
    fn use_tools_pulls_provided_tool_upward() {
        let mut registry = Registry::new();
        let mut root = bare_recipe("root");
        root.dependencies.push(dep("toolchain", vec![UseKind::Tools], false));
        let mut toolchain = bare_recipe("toolchain");
        toolchain.provides.tools.insert("cc".to_string(), "clang".to_string());
        registry.insert(root);
        registry.insert(toolchain);

        let tree = expand_root(&registry, "root", empty_env()).unwrap();
        let root_pkg = tree.packages.iter().find(|p| p.recipe_name == "root").unwrap();
        let toolchain_pkg = tree.packages.iter().find(|p| p.recipe_name == "toolchain").unwrap();
        let cc = root_pkg.tools.get("cc").unwrap();
        assert_eq!(cc.tool_path, "clang");
        assert_eq!(cc.provider_package_id, Some(toolchain_pkg.package_id));
    }

    #[test]
    fn forward_propagates_to_later_siblings_not_to_self() {
        let mut registry = Registry::new();
        let mut root = bare_recipe("root");
        root.dependencies.push(dep("gen", vec![UseKind::Results], true));
        root.dependencies.push(dep("consumer", vec![UseKind::Results], false));
        let mut gen = bare_recipe("gen");
        gen.provides.tools.insert("codegen".to_string(), "protoc".to_string());
        let consumer = bare_recipe("consumer");
        registry.insert(root);
        registry.insert(gen);
        registry.insert(consumer);

        let tree = expand_root(&registry, "root", empty_env()).unwrap();
        let root_pkg = tree.packages.iter().find(|p| p.recipe_name == "root").unwrap();
        // root itself never opted into use:tools, so it never receives "codegen".
        assert!(!root_pkg.tools.contains_key("codegen"));
    }

    #[test]
    fn two_instantiations_with_different_tools_are_distinct_packages() {
        let mut registry = Registry::new();
        let mut root_a = bare_recipe("root-a");
        root_a.dependencies.push(dep("shared", vec![UseKind::Results], false));
        root_a.dependencies[0].tools.insert("cc".to_string(), "gcc".to_string());

        let mut root_b = bare_recipe("root-b");
        root_b.dependencies.push(dep("shared", vec![UseKind::Results], false));
        root_b.dependencies[0].tools.insert("cc".to_string(), "clang".to_string());

        let mut shared = bare_recipe("shared");
        shared.tools.strong.push("cc".to_string());

        registry.insert(root_a);
        registry.insert(root_b);
        registry.insert(shared);

        let tree_a = expand_root(&registry, "root-a", empty_env()).unwrap();
        let tree_b = expand_root(&registry, "root-b", empty_env()).unwrap();

        let shared_a = tree_a.packages.iter().find(|p| p.recipe_name == "shared").unwrap();
        let shared_b = tree_b.packages.iter().find(|p| p.recipe_name == "shared").unwrap();
        assert_ne!(shared_a.package_id, shared_b.package_id);
    }

    #[test]
    fn edge_remapped_tool_carries_no_provider() {
        let mut registry = Registry::new();
        let mut root = bare_recipe("root");
        let mut remapped = dep("shared", vec![UseKind::Results], false);
        remapped.tools.insert("cc".to_string(), "/opt/cross/bin/cc".to_string());
        root.dependencies.push(remapped);
        let shared = bare_recipe("shared");
        registry.insert(root);
        registry.insert(shared);

        let tree = expand_root(&registry, "root", empty_env()).unwrap();
        let shared_pkg = tree.packages.iter().find(|p| p.recipe_name == "shared").unwrap();
        let cc = shared_pkg.tools.get("cc").unwrap();
        assert_eq!(cc.tool_path, "/opt/cross/bin/cc");
        assert_eq!(cc.provider_package_id, None);
    }

    #[test]
    fn no_undefined_tools_rejects_unresolved_tool() {
        let mut registry = Registry::new();
        let mut root = bare_recipe("root");
        root.no_undefined_tools = true;
        root.tools.strong.push("cc".to_string());
        registry.insert(root);

        let err = expand_root(&registry, "root", empty_env()).unwrap_err();
        assert!(matches!(err, ExpandError::UndefinedTool(_, _)));
    }

    #[test]
    fn identical_instantiations_dedup_to_one_package() {
        let mut registry = Registry::new();
        let mut root = bare_recipe("root");
        root.dependencies.push(dep("leaf", vec![UseKind::Results], false));
        root.dependencies.push(dep("leaf", vec![UseKind::Results], false));
        let leaf = bare_recipe("leaf");
        registry.insert(root);
        registry.insert(leaf);

        let tree = expand_root(&registry, "root", empty_env()).unwrap();
        assert_eq!(tree.packages.iter().filter(|p| p.recipe_name == "leaf").count(), 1);
    }

    #[test]
    fn if_condition_skips_dependency_when_false() {
        let mut registry = Registry::new();
        let mut root = bare_recipe("root");
        root.environment.provided.set("WANT_DEBUG", "false");
        let mut conditional = dep("debug-tools", UseKind::default_set(), false);
        conditional.if_condition = Some("WANT_DEBUG".to_string());
        root.dependencies.push(conditional);
        let debug_tools = bare_recipe("debug-tools");
        registry.insert(root);
        registry.insert(debug_tools);

        let tree = expand_root(&registry, "root", empty_env()).unwrap();
        assert!(!tree.packages.iter().any(|p| p.recipe_name == "debug-tools"));
    }
}
