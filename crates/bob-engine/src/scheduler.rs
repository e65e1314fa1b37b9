// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! The build scheduler (spec.md §4.4): readiness tracking over the step
//! graph, bounded concurrency, download-before-build, keep-going poisoning
//! of downstream steps, and indeterministic-checkout detection.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bob_graph::Dag;
use bob_hash::Digest;
use bob_identity::{PredictionCache, PredictionError, StepKind};
use log::{debug, warn};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::download::{self, Attempt, DownloadPolicy, LayerOverride};
use crate::status::{StatusStore, StepStatus};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Prediction(#[from] PredictionError),
    #[error("step `{0}` failed")]
    StepFailed(String),
    #[error("download required for `{0}` but the artifact was not found")]
    ForcedDownloadMissing(String),
    #[error("runner error for `{0}`: {1}")]
    Runner(String, String),
}

/// One step in the expanded build graph, as the scheduler sees it. The
/// identity fields (`variant_id`, `inputs`) come from `bob-identity` /
/// `bob-expand`; everything else is scheduling metadata.
#[derive(Debug, Clone)]
pub struct ScheduledStep {
    pub variant_id: Digest,
    pub recipe_name: String,
    pub kind: StepKind,
    pub inputs: Vec<Digest>,
    /// Strong tool contributions among `inputs`: the tool's declared name
    /// paired with the Variant-Id of the step that produces it, so a runner
    /// can recover each tool's settled Build-Id from the `input_build_ids`
    /// the scheduler already threads through by `inputs` position.
    pub tool_inputs: Vec<(String, Digest)>,
    /// A checkout step with no fixed ref/commit: its predicted Build-Id may
    /// not match what settles after the checkout actually runs.
    pub indeterministic_checkout: bool,
    /// Whether the package this step belongs to may be relocated into the
    /// shared-package store after a successful build (spec.md §4.8).
    pub relocatable: bool,
    /// The bottom of the dependency chain for this build invocation (no
    /// consumers requested beyond it) — used by `DownloadPolicy::Deps`/`ForcedDeps`.
    pub is_leaf: bool,
}

pub enum StepOutcome {
    Downloaded,
    Built,
}

/// What actually runs a step's script, checks out its SCM, or fetches its
/// artifact. Abstracted behind a trait so the scheduler itself stays free
/// of process-spawning and sandbox concerns, which live in the `bob`
/// binary and `bob-sandbox`.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Pure prediction: source steps from recorded SCM digests, build/package
    /// steps recursively over input Build-Ids (spec.md §4.4 step 3).
    async fn predict_build_id(&self, step: &ScheduledStep, input_build_ids: &[Digest]) -> Result<Digest, String>;

    /// Attempt to satisfy `step` from the artifact cache. `Ok(None)` is a
    /// clean miss; `Err` is a transfer/verification failure.
    async fn try_download(&self, step: &ScheduledStep, predicted_build_id: Digest) -> Result<Option<()>, String>;

    /// Execute the step's script or checkout in its workspace, returning
    /// the settled Build-Id.
    async fn execute(&self, step: &ScheduledStep, input_build_ids: &[Digest]) -> Result<Digest, String>;

    /// Pack and upload, if the engine's configuration allows it. A no-op
    /// default lets runners without an archive configured skip this.
    /// `input_build_ids` are the settled Build-Ids of `step`'s inputs, for
    /// populating the audit trail's `input_refs`.
    async fn maybe_upload(&self, _step: &ScheduledStep, _build_id: Digest, _input_build_ids: &[Digest]) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct EngineConfig {
    pub concurrency: usize,
    pub keep_going: bool,
    pub resume: bool,
    pub download_policy: DownloadPolicy,
    pub layer_overrides: Vec<LayerOverride>,
    /// Legacy policy: restart the build once after an indeterministic
    /// checkout settles to an unexpected Build-Id, rather than failing.
    pub allow_unexpected_indeterminism: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus(),
            keep_going: false,
            resume: false,
            download_policy: DownloadPolicy::No,
            layer_overrides: Vec::new(),
            allow_unexpected_indeterminism: false,
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Ties the step graph, the configured concurrency/download policy, and a
/// `StepRunner` together into one `run` call. Owns its own prediction cache
/// and cancellation token — no module-level singletons (spec.md §9).
pub struct Engine<R: StepRunner> {
    runner: Arc<R>,
    config: EngineConfig,
    prediction_cache: Arc<Mutex<PredictionCache>>,
    cancel: CancellationToken,
}

impl<R: StepRunner + 'static> Engine<R> {
    pub fn new(runner: R, config: EngineConfig) -> Self {
        Self {
            runner: Arc::new(runner),
            config,
            prediction_cache: Arc::new(Mutex::new(PredictionCache::new())),
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run every step in `steps` to completion (or failure), respecting
    /// dependency order. Returns the final status of every step.
    pub async fn run(&self, steps: Vec<ScheduledStep>, status: &mut StatusStore) -> HashMap<Digest, StepStatus> {
        let mut graph: Dag<Digest> = Dag::new();
        let mut by_id: HashMap<Digest, ScheduledStep> = HashMap::new();

        for step in &steps {
            graph.add_node_or_get_index(step.variant_id);
        }
        for step in &steps {
            for input in &step.inputs {
                let from = graph.add_node_or_get_index(*input);
                let to = graph.add_node_or_get_index(step.variant_id);
                graph.add_edge(from, to);
            }
        }
        for step in steps {
            by_id.insert(step.variant_id, step);
        }

        let mut result: HashMap<Digest, StepStatus> = HashMap::new();
        let mut build_ids: HashMap<Digest, Digest> = HashMap::new();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut join_set = tokio::task::JoinSet::new();
        let mut scheduled: HashSet<Digest> = HashSet::new();

        let mut ready: Vec<Digest> = graph
            .iter_nodes()
            .filter(|id| graph.predecessors(*id).is_empty())
            .copied()
            .collect();

        loop {
            while let Some(id) = ready.pop() {
                if scheduled.contains(&id) {
                    continue;
                }
                scheduled.insert(id);

                if status.is_resumable_complete(id, self.config.resume) {
                    result.insert(id, StepStatus::Complete);
                    continue;
                }

                let Some(step) = by_id.get(&id).cloned() else { continue };

                if self.cancel.is_cancelled() {
                    result.insert(id, StepStatus::Failed);
                    status.set(id, StepStatus::Failed);
                    continue;
                }

                let input_build_ids: Vec<Digest> = step
                    .inputs
                    .iter()
                    .filter_map(|input| build_ids.get(input).copied())
                    .collect();

                status.set(id, StepStatus::Running);
                debug!("scheduling step `{}` ({})", step.recipe_name, id.hex_prefix(8));

                let runner = Arc::clone(&self.runner);
                let prediction_cache = Arc::clone(&self.prediction_cache);
                let config = self.config.clone();
                let cancel = self.cancel.clone();
                let semaphore = Arc::clone(&semaphore);

                join_set.spawn(async move {
                    let permit = semaphore.acquire_owned().await.expect("engine semaphore is never closed");
                    let outcome = tokio::select! {
                        _ = cancel.cancelled() => Err(EngineError::StepFailed(step.recipe_name.clone())),
                        result = execute_step(runner.as_ref(), &prediction_cache, &config, &step, &input_build_ids) => result,
                    };
                    drop(permit);
                    (id, outcome)
                });
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let (id, outcome) = joined.expect("step task panicked");

            match outcome {
                Ok((build_id, _)) => {
                    build_ids.insert(id, build_id);
                    result.insert(id, StepStatus::Complete);
                    status.set(id, StepStatus::Complete);

                    for successor in graph.successors(&id) {
                        if graph.predecessors(successor).iter().all(|p| result.contains_key(*p)) {
                            ready.push(*successor);
                        }
                    }
                }
                Err(e) => {
                    warn!("step `{}` failed: {e}", id.hex_prefix(8));
                    result.insert(id, StepStatus::Failed);
                    status.set(id, StepStatus::Failed);

                    if self.config.keep_going {
                        poison_downstream(&graph, id, &mut result, status);
                    } else {
                        self.cancel.cancel();
                    }
                }
            }
        }

        result
    }
}

fn poison_downstream(
    graph: &Dag<Digest>,
    failed: Digest,
    result: &mut HashMap<Digest, StepStatus>,
    status: &mut StatusStore,
) {
    let mut stack: Vec<Digest> = graph.successors(&failed).into_iter().copied().collect();
    while let Some(id) = stack.pop() {
        if result.insert(id, StepStatus::Failed).is_some() {
            continue;
        }
        status.set(id, StepStatus::Failed);
        stack.extend(graph.successors(&id).into_iter().copied());
    }
}

async fn execute_step<R: StepRunner>(
    runner: &R,
    prediction_cache: &Mutex<PredictionCache>,
    config: &EngineConfig,
    step: &ScheduledStep,
    input_build_ids: &[Digest],
) -> Result<(Digest, StepOutcome), EngineError> {
    let predicted = runner
        .predict_build_id(step, input_build_ids)
        .await
        .map_err(|e| EngineError::Runner(step.recipe_name.clone(), e))?;

    {
        let mut cache = prediction_cache.lock().await;
        cache.record(step.variant_id, predicted);
    }

    let attempt = download::resolve(&config.download_policy, &config.layer_overrides, &step.recipe_name, step.is_leaf);

    if !matches!(attempt, Attempt::SkipBuild) {
        match runner.try_download(step, predicted).await {
            Ok(Some(())) => return Ok((predicted, StepOutcome::Downloaded)),
            Ok(None) => {
                if matches!(attempt, Attempt::TryOrFail) {
                    return Err(EngineError::ForcedDownloadMissing(step.recipe_name.clone()));
                }
            }
            Err(e) => {
                if matches!(attempt, Attempt::TryOrFail) {
                    return Err(EngineError::Runner(step.recipe_name.clone(), e));
                }
                // TryThenBuild: a transfer error falls through to building.
            }
        }
    }

    let settled = runner
        .execute(step, input_build_ids)
        .await
        .map_err(|e| EngineError::Runner(step.recipe_name.clone(), e))?;

    if step.indeterministic_checkout {
        let check = {
            let cache = prediction_cache.lock().await;
            cache.check_settled(&step.variant_id, settled)
        };
        if let Err(err) = check {
            if config.allow_unexpected_indeterminism {
                let mut cache = prediction_cache.lock().await;
                cache.record(step.variant_id, settled);
            } else {
                return Err(EngineError::Prediction(err));
            }
        }
    }

    runner
        .maybe_upload(step, settled, input_build_ids)
        .await
        .map_err(|e| EngineError::Runner(step.recipe_name.clone(), e))?;

    Ok((settled, StepOutcome::Built))
}

/// Build-Id audit references for an `upload`: the settled Build-Ids of
/// every completed input step, as hex strings (matches `AuditTrail::input_refs`).
pub fn audit_input_refs(input_build_ids: &[Digest]) -> BTreeSet<String> {
    input_build_ids.iter().map(|d| d.to_hex()).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRunner {
        executions: AtomicUsize,
        fail_recipe: Option<String>,
    }

    #[async_trait]
    impl StepRunner for CountingRunner {
        async fn predict_build_id(&self, step: &ScheduledStep, inputs: &[Digest]) -> Result<Digest, String> {
            let mut bytes = step.variant_id.as_bytes().to_vec();
            for i in inputs {
                bytes.extend_from_slice(i.as_bytes());
            }
            Ok(bob_hash::hash(&bob_hash::Value::bytes(bytes)))
        }

        async fn try_download(&self, _step: &ScheduledStep, _predicted: Digest) -> Result<Option<()>, String> {
            Ok(None)
        }

        async fn execute(&self, step: &ScheduledStep, inputs: &[Digest]) -> Result<Digest, String> {
            if self.fail_recipe.as_deref() == Some(step.recipe_name.as_str()) {
                return Err("boom".to_string());
            }
            self.executions.fetch_add(1, Ordering::SeqCst);
            self.predict_build_id(step, inputs).await
        }
    }

    fn step(name: &str, variant_id: Digest, inputs: Vec<Digest>) -> ScheduledStep {
        ScheduledStep {
            variant_id,
            recipe_name: name.to_string(),
            kind: StepKind::Build,
            inputs,
            tool_inputs: vec![],
            indeterministic_checkout: false,
            relocatable: false,
            is_leaf: true,
        }
    }

    fn id(label: &str) -> Digest {
        bob_hash::hash(&bob_hash::Value::str(label))
    }

    #[tokio::test]
    async fn runs_steps_in_dependency_order() {
        let a = id("a");
        let b = id("b");
        let runner = CountingRunner {
            executions: AtomicUsize::new(0),
            fail_recipe: None,
        };
        let engine = Engine::new(runner, EngineConfig::default());
        let mut status = StatusStore::new();

        let result = engine
            .run(vec![step("a", a, vec![]), step("b", b, vec![a])], &mut status)
            .await;

        assert_eq!(result.get(&a), Some(&StepStatus::Complete));
        assert_eq!(result.get(&b), Some(&StepStatus::Complete));
        assert_eq!(engine.runner.executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn keep_going_poisons_only_downstream_siblings_continue() {
        let a = id("a");
        let b = id("b");
        let c = id("c");
        let runner = CountingRunner {
            executions: AtomicUsize::new(0),
            fail_recipe: Some("a".to_string()),
        };
        let engine = Engine::new(
            runner,
            EngineConfig {
                keep_going: true,
                ..EngineConfig::default()
            },
        );
        let mut status = StatusStore::new();

        let result = engine
            .run(
                vec![step("a", a, vec![]), step("b", b, vec![a]), step("c", c, vec![])],
                &mut status,
            )
            .await;

        assert_eq!(result.get(&a), Some(&StepStatus::Failed));
        assert_eq!(result.get(&b), Some(&StepStatus::Failed));
        assert_eq!(result.get(&c), Some(&StepStatus::Complete));
    }

    #[tokio::test]
    async fn resume_skips_previously_complete_steps() {
        let a = id("a");
        let runner = CountingRunner {
            executions: AtomicUsize::new(0),
            fail_recipe: None,
        };
        let engine = Engine::new(
            runner,
            EngineConfig {
                resume: true,
                ..EngineConfig::default()
            },
        );
        let mut status = StatusStore::new();
        status.set(a, StepStatus::Complete);

        let result = engine.run(vec![step("a", a, vec![])], &mut status).await;

        assert_eq!(result.get(&a), Some(&StepStatus::Complete));
        assert_eq!(engine.runner.executions.load(Ordering::SeqCst), 0);
    }
}
