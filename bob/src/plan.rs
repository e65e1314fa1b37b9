// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! Translates an expanded package tree (`bob-expand`) into the flat,
//! Variant-Id-addressed step graph the engine schedules (spec.md §4.3-4.4).

use std::collections::HashMap;

use bob_expand::{ExpandedTree, Registry, ToolSource};
use bob_hash::Digest;
use bob_identity::{compute_variant_id, StepKind, StepVariantInput, ToolContribution};
use bob_recipe::{Recipe, Scm, ScmKind};
use thiserror::Error;

use bob_engine::ScheduledStep;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("expanded package `{0}` has no matching recipe in the registry")]
    UnknownRecipe(String),
    #[error("root package produces no checkout, build, or package step")]
    RootProducesNoStep,
}

/// What a planned step actually runs, looked up by the runner at execution
/// time. Kept separate from `ScheduledStep` so the engine's scheduling
/// logic never has to know about recipe script text.
#[derive(Debug, Clone)]
pub enum PlannedScript {
    Checkout { scm: Vec<Scm> },
    Shell(String),
}

pub struct Plan {
    pub steps: Vec<ScheduledStep>,
    pub scripts: HashMap<Digest, PlannedScript>,
    pub root_step: Digest,
}

/// A git checkout with no fixed ref settles to whatever the remote's
/// default branch happens to point at right now (spec.md §4.4's
/// "Indeterministic checkouts" paragraph).
fn is_indeterministic(scm: &Scm) -> bool {
    matches!(scm.kind, ScmKind::Git) && scm.commit.is_none() && scm.tag.is_none() && scm.scm_ref.is_none()
}

/// Packages `recipe.dependencies` into a lookup table from a dependency's
/// recipe name to whether the edge was declared `checkoutDep: true`.
/// `ExpandedEdge` doesn't itself carry this flag, so it's re-derived here
/// against the original recipe rather than widening bob-expand's already
/// dedup-keyed edge type for a planning-only concern.
fn checkout_dep_names(recipe: &Recipe) -> std::collections::HashSet<&str> {
    recipe
        .dependencies
        .iter()
        .filter(|d| d.checkout_dep)
        .map(|d| d.name.as_str())
        .collect()
}

/// Builds one dependency's `ToolContribution`: strong when the owning recipe
/// declares it so (spec.md §4.3), and its provider's final step has already
/// settled a Variant-Id to fold in; weak otherwise — including a strong
/// declaration whose provider produced no step, or whose path came from an
/// edge `tools:` remap rather than a package in the graph.
fn tool_contribution(name: &str, source: &ToolSource, recipe: &Recipe, package_result: &HashMap<Digest, Digest>) -> ToolContribution {
    let is_strong = recipe.tools.strong.iter().any(|s| s == name);
    let provider_variant_id = source.provider_package_id.and_then(|pid| package_result.get(&pid).copied());

    match (is_strong, provider_variant_id) {
        (true, Some(tool_variant_id)) => ToolContribution::Strong {
            name: name.to_string(),
            tool_path: source.tool_path.clone(),
            tool_variant_id,
            library_paths: vec![],
            provided_env: vec![],
        },
        _ => ToolContribution::Weak {
            name: name.to_string(),
            tool_path: source.tool_path.clone(),
            library_paths: vec![],
        },
    }
}

fn extend_with_tool_inputs(mut inputs: Vec<Digest>, tool_inputs: &[(String, Digest)]) -> Vec<Digest> {
    for (_, id) in tool_inputs {
        if !inputs.contains(id) {
            inputs.push(*id);
        }
    }
    inputs
}

pub fn build_plan(registry: &Registry, tree: &ExpandedTree) -> Result<Plan, PlanError> {
    let mut steps = Vec::new();
    let mut scripts = HashMap::new();
    // The final (most-downstream) step a package produces — what its
    // consumers depend on by default.
    let mut package_result: HashMap<Digest, Digest> = HashMap::new();
    // The checkout-only step a package produces, for consumers that
    // declared `checkoutDep: true` and want just the fetched sources.
    let mut package_checkout: HashMap<Digest, Digest> = HashMap::new();

    for pkg in &tree.packages {
        let recipe = registry.get(&pkg.recipe_name).ok_or_else(|| PlanError::UnknownRecipe(pkg.recipe_name.clone()))?;
        let env_pairs: Vec<(String, String)> = pkg.environment.values.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        // Dependencies are visited depth-first and pushed to `tree.packages`
        // after their own dependencies, so any tool provider's result is
        // already in `package_result` by the time its consumer is planned.
        let tools: Vec<ToolContribution> = pkg.tools.iter().map(|(name, source)| tool_contribution(name, source, recipe, &package_result)).collect();
        let tool_inputs: Vec<(String, Digest)> = tools
            .iter()
            .filter_map(|t| match t {
                ToolContribution::Strong { name, tool_variant_id, .. } => Some((name.clone(), *tool_variant_id)),
                ToolContribution::Weak { .. } => None,
            })
            .collect();
        let checkout_deps = checkout_dep_names(recipe);

        let mut checkout_inputs = Vec::new();
        let mut result_inputs = Vec::new();
        for edge in &pkg.dependencies {
            let dep_result = package_result.get(&edge.package_id).copied();
            if checkout_deps.contains(edge.recipe_name.as_str()) {
                if let Some(id) = package_checkout.get(&edge.package_id).copied().or(dep_result) {
                    checkout_inputs.push(id);
                    continue;
                }
            }
            if let Some(id) = dep_result {
                result_inputs.push(id);
            }
        }

        let mut last_step: Option<Digest> = None;
        let is_leaf = pkg.package_id == tree.root_id;
        let has_own_checkout = !recipe.scm.is_empty() || recipe.scripts.checkout.is_some();

        // Feeds the build/package chain directly when this package has no
        // checkout step of its own to attach `checkoutDep` inputs to.
        let mut chain_inputs = result_inputs.clone();
        if !has_own_checkout {
            chain_inputs.extend(checkout_inputs.clone());
        }

        if has_own_checkout {
            let script = recipe.scripts.checkout.clone().unwrap_or_default();
            let variant_id = compute_variant_id(&StepVariantInput {
                kind: StepKind::Checkout,
                script: script.clone(),
                tools: tools.clone(),
                environment: env_pairs.clone(),
                sandbox_variant_id: None,
                input_variant_ids: checkout_inputs.clone(),
            });
            let indeterministic = recipe.scm.iter().any(is_indeterministic);
            steps.push(ScheduledStep {
                variant_id,
                recipe_name: pkg.recipe_name.clone(),
                kind: StepKind::Checkout,
                inputs: checkout_inputs.clone(),
                tool_inputs: vec![],
                indeterministic_checkout: indeterministic,
                relocatable: recipe.relocatable,
                is_leaf,
            });
            scripts.insert(variant_id, PlannedScript::Checkout { scm: recipe.scm.clone() });
            package_checkout.insert(pkg.package_id, variant_id);
            last_step = Some(variant_id);
            chain_inputs.push(variant_id);
        }

        if let Some(script) = &recipe.scripts.build {
            let variant_id = compute_variant_id(&StepVariantInput {
                kind: StepKind::Build,
                script: script.clone(),
                tools: tools.clone(),
                environment: env_pairs.clone(),
                sandbox_variant_id: None,
                input_variant_ids: chain_inputs.clone(),
            });
            steps.push(ScheduledStep {
                variant_id,
                recipe_name: pkg.recipe_name.clone(),
                kind: StepKind::Build,
                inputs: extend_with_tool_inputs(chain_inputs.clone(), &tool_inputs),
                tool_inputs: tool_inputs.clone(),
                indeterministic_checkout: false,
                relocatable: recipe.relocatable,
                is_leaf,
            });
            scripts.insert(variant_id, PlannedScript::Shell(script.clone()));
            last_step = Some(variant_id);
            chain_inputs = vec![variant_id];
        }

        if let Some(script) = &recipe.scripts.package {
            let variant_id = compute_variant_id(&StepVariantInput {
                kind: StepKind::Package,
                script: script.clone(),
                tools: tools.clone(),
                environment: env_pairs.clone(),
                sandbox_variant_id: None,
                input_variant_ids: chain_inputs.clone(),
            });
            steps.push(ScheduledStep {
                variant_id,
                recipe_name: pkg.recipe_name.clone(),
                kind: StepKind::Package,
                inputs: extend_with_tool_inputs(chain_inputs, &tool_inputs),
                tool_inputs: tool_inputs.clone(),
                indeterministic_checkout: false,
                relocatable: recipe.relocatable,
                is_leaf,
            });
            scripts.insert(variant_id, PlannedScript::Shell(script.clone()));
            last_step = Some(variant_id);
        }

        if let Some(id) = last_step {
            package_result.insert(pkg.package_id, id);
        }
    }

    let root_step = package_result.get(&tree.root_id).copied().ok_or(PlanError::RootProducesNoStep)?;

    Ok(Plan { steps, scripts, root_step })
}
