// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! Step identity: Variant-Id (how a step is built) and Build-Id (what it
//! produces), plus the live-build-id prediction cache used by the scheduler
//! to detect indeterministic checkouts (spec.md §4.3, §4.4).

use std::collections::HashMap;

use bob_hash::{hash, Digest, ToValue, Value};
use thiserror::Error;

/// One of a package's three phases. Named `Checkout` rather than `Source`
/// to match the vocabulary the rest of the engine (SCM, scheduler) uses for
/// the same phase; the glossary's "source" step is this variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Checkout,
    Build,
    Package,
}

impl StepKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Checkout => "checkout",
            Self::Build => "build",
            Self::Package => "package",
        }
    }
}

/// How a tool input contributes to a step's Variant-Id (spec.md §4.3).
/// Strong tools fold in their own Variant-Id; weak tools contribute only
/// their declared path identity, so rebuilding a weak tool with different
/// content never perturbs consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolContribution {
    Strong {
        name: String,
        tool_path: String,
        tool_variant_id: Digest,
        library_paths: Vec<String>,
        provided_env: Vec<(String, String)>,
    },
    Weak {
        name: String,
        tool_path: String,
        library_paths: Vec<String>,
    },
}

impl ToValue for ToolContribution {
    fn to_value(&self) -> Value {
        match self {
            ToolContribution::Strong {
                name,
                tool_path,
                tool_variant_id,
                library_paths,
                provided_env,
            } => Value::map([
                ("kind", Value::str("strong")),
                ("name", Value::str(name)),
                ("toolPath", Value::str(tool_path)),
                ("toolVariantId", Value::bytes(tool_variant_id.as_bytes().to_vec())),
                ("libraryPaths", Value::list(library_paths.iter().map(Value::str))),
                (
                    "providedEnv",
                    Value::map(provided_env.iter().map(|(k, v)| (k.as_str(), Value::str(v)))),
                ),
            ]),
            ToolContribution::Weak {
                name,
                tool_path,
                library_paths,
            } => Value::map([
                ("kind", Value::str("weak")),
                ("name", Value::str(name)),
                ("toolPath", Value::str(tool_path)),
                ("libraryPaths", Value::list(library_paths.iter().map(Value::str))),
            ]),
        }
    }
}

/// Everything a step's Variant-Id is a structural hash of (spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepVariantInput {
    pub kind: StepKind,
    pub script: String,
    pub tools: Vec<ToolContribution>,
    /// Declared environment variables visible to the step. Hashed as a
    /// sorted map: declaration order in the recipe must not affect
    /// identity (invariant 1).
    pub environment: Vec<(String, String)>,
    pub sandbox_variant_id: Option<Digest>,
    /// Variant-Ids of this step's direct input steps, in declaration order.
    pub input_variant_ids: Vec<Digest>,
}

impl ToValue for StepVariantInput {
    fn to_value(&self) -> Value {
        Value::map([
            ("kind", Value::str(self.kind.as_str())),
            ("script", Value::str(&self.script)),
            ("tools", Value::list(self.tools.iter().map(ToValue::to_value))),
            (
                "environment",
                Value::map(self.environment.iter().map(|(k, v)| (k.as_str(), Value::str(v)))),
            ),
            (
                "sandbox",
                Value::opt(
                    self.sandbox_variant_id
                        .map(|d| Value::bytes(d.as_bytes().to_vec())),
                ),
            ),
            (
                "inputs",
                Value::list(self.input_variant_ids.iter().map(|d| Value::bytes(d.as_bytes().to_vec()))),
            ),
        ])
    }
}

pub fn compute_variant_id(input: &StepVariantInput) -> Digest {
    hash(&input.to_value())
}

/// What a checkout step's Build-Id is a hash of: the fully-resolved SCM
/// state digests plus the checkout script text (spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutBuildInput {
    pub scm_digests: Vec<Digest>,
    pub script: String,
}

impl ToValue for CheckoutBuildInput {
    fn to_value(&self) -> Value {
        Value::map([
            (
                "scm",
                Value::list(self.scm_digests.iter().map(|d| Value::bytes(d.as_bytes().to_vec()))),
            ),
            ("script", Value::str(&self.script)),
        ])
    }
}

pub fn compute_checkout_build_id(input: &CheckoutBuildInput) -> Digest {
    hash(&input.to_value())
}

/// What a build or package step's Build-Id is a hash of: the script, the
/// tools' Build-Ids, the Build-Ids of input steps, and — when present — the
/// fingerprint script's captured output (spec.md §4.3's "augmented by the
/// fingerprint").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepBuildInput {
    pub script: String,
    pub tool_build_ids: Vec<(String, Digest)>,
    pub input_build_ids: Vec<Digest>,
    pub fingerprint_output: Option<Vec<u8>>,
}

impl ToValue for StepBuildInput {
    fn to_value(&self) -> Value {
        Value::map([
            ("script", Value::str(&self.script)),
            (
                "tools",
                Value::map(
                    self.tool_build_ids
                        .iter()
                        .map(|(name, id)| (name.as_str(), Value::bytes(id.as_bytes().to_vec()))),
                ),
            ),
            (
                "inputs",
                Value::list(self.input_build_ids.iter().map(|d| Value::bytes(d.as_bytes().to_vec()))),
            ),
            (
                "fingerprint",
                Value::opt(self.fingerprint_output.clone().map(Value::bytes)),
            ),
        ])
    }
}

pub fn compute_step_build_id(input: &StepBuildInput) -> Digest {
    hash(&input.to_value())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PredictionError {
    #[error("predicted build id {predicted} does not match settled build id {settled} after an indeterministic checkout")]
    Mismatch { predicted: Digest, settled: Digest },
}

/// Caches the Build-Id predicted for a step (keyed by its Variant-Id) before
/// execution settles it, so the scheduler can decide whether a download
/// made on the basis of a prediction must be distrusted (spec.md §4.4's
/// indeterministic-checkout handling).
///
/// Deliberately not internally synchronized: per the "no singletons" design
/// note, the owning `Engine` context is responsible for any locking needed
/// across concurrent workers.
#[derive(Debug, Default)]
pub struct PredictionCache {
    predictions: HashMap<Digest, Digest>,
}

impl PredictionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, variant_id: Digest, predicted_build_id: Digest) {
        self.predictions.insert(variant_id, predicted_build_id);
    }

    pub fn predicted(&self, variant_id: &Digest) -> Option<Digest> {
        self.predictions.get(variant_id).copied()
    }

    pub fn invalidate(&mut self, variant_id: &Digest) {
        self.predictions.remove(variant_id);
    }

    /// Check a settled Build-Id (computed after an indeterministic checkout
    /// actually ran) against whatever was predicted for `variant_id`. `Ok`
    /// when there was no prediction to check, or it matches.
    pub fn check_settled(&self, variant_id: &Digest, settled: Digest) -> Result<(), PredictionError> {
        match self.predicted(variant_id) {
            Some(predicted) if predicted != settled => Err(PredictionError::Mismatch { predicted, settled }),
            _ => Ok(()),
        }
    }
}
