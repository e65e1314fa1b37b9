// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! The concrete [`bob_engine::StepRunner`]: turns a planned step into an
//! actual checkout, shell invocation, or sandboxed child process, and
//! drives the artifact cache and shared-package store around it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use bob_cache::{ArtifactCache, AuditTrail, BuildHost};
use bob_engine::{buildinfo, ScheduledStep, StepRunner};
use bob_hash::Digest;
use bob_identity::{compute_checkout_build_id, compute_step_build_id, CheckoutBuildInput, StepBuildInput, StepKind};
use bob_sandbox::{HelperInvocation, PathKind, SandboxMode};
use bob_scm::StateVector;
use bob_store::Store;

use crate::plan::PlannedScript;

/// Everything the runner needs beyond the step itself: where to execute,
/// what script to run, and which optional backends are wired up.
pub struct ShellRunner {
    pub scripts: HashMap<Digest, PlannedScript>,
    pub workspace_root: PathBuf,
    pub cache: Option<ArtifactCache>,
    pub store: Option<Store>,
    pub sandbox_helper: PathBuf,
    pub upload_enabled: bool,
    /// A recipe's release counters, keyed by name, for the audit trail
    /// (display/audit metadata only, never a hash input).
    releases: HashMap<String, (u64, u64)>,
    known_audits: Mutex<BTreeSet<String>>,
}

impl ShellRunner {
    pub fn new(scripts: HashMap<Digest, PlannedScript>, workspace_root: PathBuf) -> Self {
        Self {
            scripts,
            workspace_root,
            cache: None,
            store: None,
            sandbox_helper: PathBuf::from("/usr/libexec/bob-sandbox-helper"),
            upload_enabled: false,
            releases: HashMap::new(),
            known_audits: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn with_releases(mut self, releases: HashMap<String, (u64, u64)>) -> Self {
        self.releases = releases;
        self
    }

    pub fn with_cache(mut self, cache: ArtifactCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_upload(mut self, enabled: bool) -> Self {
        self.upload_enabled = enabled;
        self
    }

    fn workspace_for(&self, step: &ScheduledStep) -> PathBuf {
        self.workspace_root.join(step.variant_id.to_hex())
    }
}

fn state_vector(scm: &bob_recipe::Scm) -> Result<StateVector, String> {
    let url = bob_scm::strip_userinfo(&scm.url).map_err(|e| e.to_string())?;
    Ok(StateVector {
        kind: scm.kind,
        url,
        scm_ref: scm.scm_ref.clone(),
        tag: scm.tag.clone(),
        commit: scm.commit.clone(),
        submodules: scm.submodules,
        dir: scm.dir.clone(),
        hash_sums: Vec::new(),
    })
}

fn step_kind_str(kind: StepKind) -> &'static str {
    match kind {
        StepKind::Checkout => "checkout",
        StepKind::Build => "build",
        StepKind::Package => "package",
    }
}

/// `input_build_ids` is positional against `step.inputs`, which (for a
/// build/package step) interleaves ordinary dependency-chain inputs with
/// any strong tool providers `plan::build_plan` folded in. Split the two
/// back out so each feeds the right `StepBuildInput` field.
fn split_tool_build_ids(step: &ScheduledStep, input_build_ids: &[Digest]) -> (Vec<(String, Digest)>, Vec<Digest>) {
    let by_variant: HashMap<Digest, Digest> = step.inputs.iter().copied().zip(input_build_ids.iter().copied()).collect();

    let tool_build_ids = step
        .tool_inputs
        .iter()
        .filter_map(|(name, variant_id)| by_variant.get(variant_id).map(|build_id| (name.clone(), *build_id)))
        .collect();

    let tool_variant_ids: BTreeSet<Digest> = step.tool_inputs.iter().map(|(_, id)| *id).collect();
    let chain_build_ids = step
        .inputs
        .iter()
        .zip(input_build_ids.iter())
        .filter(|(variant_id, _)| !tool_variant_ids.contains(variant_id))
        .map(|(_, build_id)| *build_id)
        .collect();

    (tool_build_ids, chain_build_ids)
}

#[async_trait]
impl StepRunner for ShellRunner {
    async fn predict_build_id(&self, step: &ScheduledStep, input_build_ids: &[Digest]) -> Result<Digest, String> {
        match self.scripts.get(&step.variant_id) {
            Some(PlannedScript::Checkout { scm }) => {
                let digests = scm.iter().map(state_vector).collect::<Result<Vec<_>, _>>()?.iter().map(StateVector::digest).collect();
                Ok(compute_checkout_build_id(&CheckoutBuildInput {
                    scm_digests: digests,
                    script: String::new(),
                }))
            }
            Some(PlannedScript::Shell(script)) => {
                let (tool_build_ids, chain_build_ids) = split_tool_build_ids(step, input_build_ids);
                Ok(compute_step_build_id(&StepBuildInput {
                    script: script.clone(),
                    tool_build_ids,
                    input_build_ids: chain_build_ids,
                    fingerprint_output: None,
                }))
            }
            None => Err(format!("no script recorded for step {}", step.variant_id.hex_prefix(8))),
        }
    }

    async fn try_download(&self, step: &ScheduledStep, predicted_build_id: Digest) -> Result<Option<()>, String> {
        let Some(cache) = &self.cache else { return Ok(None) };
        let dest = self.workspace_for(step);
        match cache.fetch(predicted_build_id, &dest).await {
            Ok(fetched) => {
                self.known_audits.lock().expect("audit set lock").insert(fetched.audit.build_id.clone());
                Ok(Some(()))
            }
            Err(bob_cache::CacheError::Backend(bob_cache::BackendError::NotFound)) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn execute(&self, step: &ScheduledStep, input_build_ids: &[Digest]) -> Result<Digest, String> {
        let dir = self.workspace_for(step);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| e.to_string())?;

        match self.scripts.get(&step.variant_id).cloned() {
            Some(PlannedScript::Checkout { scm }) => {
                // Real SCM tool invocation (`git clone`, `svn checkout`, ...)
                // lives outside this engine's scope (spec.md §1); what's
                // built here is the identity and workspace-transition logic
                // (bob-scm) around that boundary.
                for entry in &scm {
                    let _ = state_vector(entry)?;
                }
                self.predict_build_id(step, input_build_ids).await
            }
            Some(PlannedScript::Shell(script)) => {
                run_script(&self.sandbox_helper, &dir, &script).await?;
                let settled = self.predict_build_id(step, input_build_ids).await?;
                if step.kind == StepKind::Package && step.relocatable {
                    if let Some(store) = &self.store {
                        install_into_store(store, settled, &dir).map_err(|e| e.to_string())?;
                    }
                }
                Ok(settled)
            }
            None => Err(format!("no script recorded for step {}", step.variant_id.hex_prefix(8))),
        }
    }

    async fn maybe_upload(&self, step: &ScheduledStep, build_id: Digest, input_build_ids: &[Digest]) -> Result<(), String> {
        self.known_audits.lock().expect("audit set lock").insert(build_id.to_hex());

        if !self.upload_enabled || !step.relocatable {
            return Ok(());
        }
        let Some(cache) = &self.cache else { return Ok(()) };

        let (source_release, build_release) = self.releases.get(&step.recipe_name).copied().unwrap_or((0, 0));
        let audit = AuditTrail {
            build_id: build_id.to_hex(),
            build_host: BuildHost {
                os: std::env::consts::OS.to_string(),
                kernel: String::new(),
                hostname: hostname(),
            },
            bob_version: buildinfo::VERSION.to_string(),
            step_kind: step_kind_str(step.kind).to_string(),
            scripting_language: "sh".to_string(),
            recipe_name: step.recipe_name.clone(),
            package_path: step.recipe_name.clone(),
            source_release,
            build_release,
            meta_env: BTreeMap::new(),
            build_date: 0,
            input_refs: bob_engine::audit_input_refs(input_build_ids).into_iter().collect(),
        };

        let known = self.known_audits.lock().expect("audit set lock").clone();
        cache
            .upload(build_id, &audit, &self.workspace_for(step), &known)
            .await
            .map_err(|e| e.to_string())
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "bob-builder".to_string())
}

/// Installs a built package's workspace into the shared store and replaces
/// the local workspace with a symlink to it (spec.md §4.8).
fn install_into_store(store: &Store, build_id: Digest, workspace_dir: &Path) -> Result<(), bob_store::StoreError> {
    let size = dir_size(workspace_dir).unwrap_or(0);
    store.install(build_id, size, |dest| copy_dir_all(workspace_dir, dest))?;
    store.link_workspace(workspace_dir, build_id)
}

fn dir_size(dir: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in fs_err::read_dir(dir)?.flatten() {
        let metadata = entry.metadata()?;
        total += if metadata.is_dir() { dir_size(&entry.path())? } else { metadata.len() };
    }
    Ok(total)
}

fn copy_dir_all(src: &Path, dest: &Path) -> std::io::Result<()> {
    fs_err::create_dir_all(dest)?;
    for entry in fs_err::read_dir(src)?.flatten() {
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs_err::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

async fn run_script(sandbox_helper: &Path, dir: &Path, script: &str) -> Result<(), String> {
    let resolved = bob_sandbox::resolve(SandboxMode::SlimSandbox, false);

    let status = if resolved.isolated {
        let args = HelperInvocation::new(sandbox_helper)
            .work_dir(match resolved.path_kind {
                PathKind::StablePaths => bob_sandbox::stable_path(bob_hash::hash(&bob_hash::Value::str(dir.to_string_lossy()))),
                _ => dir.to_path_buf(),
            })
            .bind(dir, "/build", bob_sandbox::BindMode::ReadWrite)
            .into_args();
        tokio::process::Command::new(sandbox_helper)
            .args(args)
            .arg("--")
            .arg("sh")
            .arg("-c")
            .arg(script)
            .status()
            .await
            .map_err(|e| e.to_string())?
    } else {
        tokio::process::Command::new("sh")
            .arg("-c")
            .arg(script)
            .current_dir(dir)
            .status()
            .await
            .map_err(|e| e.to_string())?
    };

    if !status.success() {
        return Err(format!("script exited with {status}"));
    }
    Ok(())
}
