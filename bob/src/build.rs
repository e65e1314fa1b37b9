// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! Orchestrates one `build`/`dev` invocation: load recipes, expand the
//! requested package, plan its step graph, and drive the engine.

use std::path::{Path, PathBuf};

use bob_cache::{ArchiveBackend, ArtifactCache, BackendChain, FileBackend, Gating, HttpBackend};
use bob_config::{BackendKind, BobConfig};
use bob_engine::{DownloadPolicy, Engine, EngineConfig, StatusStore};
use bob_env::{EnvMap, Environment, Whitelist};
use bob_store::Store;
use thiserror::Error;

use crate::plan;
use crate::recipes;
use crate::run::ShellRunner;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Load(#[from] recipes::LoadError),
    #[error(transparent)]
    Expand(#[from] bob_expand::ExpandError),
    #[error(transparent)]
    Plan(#[from] plan::PlanError),
    #[error(transparent)]
    Status(#[from] bob_engine::StatusError),
    #[error("one or more steps failed")]
    StepsFailed,
}

pub struct BuildOptions {
    pub recipe_dir: PathBuf,
    pub target: String,
    pub state_dir: PathBuf,
    pub workspace_dir: PathBuf,
    pub jobs: usize,
    pub keep_going: bool,
    pub resume: bool,
    pub download_policy: DownloadPolicy,
    pub upload: bool,
}

fn base_environment(config: &BobConfig) -> Environment {
    let mut values = EnvMap::new();
    for (k, v) in &config.environment {
        values.set(k, v);
    }
    let whitelist = Whitelist::from_names(config.whitelist.iter().cloned());
    Environment::new(values, whitelist)
}

fn build_cache(config: &BobConfig) -> Option<ArtifactCache> {
    if config.archive.is_empty() {
        return None;
    }
    let backends: Vec<Box<dyn ArchiveBackend>> = config
        .archive
        .iter()
        .filter_map(|entry| -> Option<Box<dyn ArchiveBackend>> {
            match entry.backend {
                BackendKind::File => Some(Box::new(FileBackend::new(entry.name.clone(), PathBuf::from(&entry.location), Gating::all()))),
                BackendKind::Http => Some(Box::new(HttpBackend::new(entry.name.clone(), entry.location.clone(), Gating::all()))),
                BackendKind::Azure | BackendKind::S3 => None,
            }
        })
        .collect();
    if backends.is_empty() {
        None
    } else {
        Some(ArtifactCache::new(BackendChain::new(backends)))
    }
}

pub async fn run(options: BuildOptions, config: &BobConfig) -> Result<(), BuildError> {
    let registry = recipes::load_registry(&options.recipe_dir)?;
    let tree = bob_expand::expand_root(&registry, &options.target, base_environment(config))?;
    let built_plan = plan::build_plan(&registry, &tree)?;

    let releases = tree.packages.iter().map(|p| (p.recipe_name.clone(), (p.source_release, p.build_release))).collect();
    let runner = ShellRunner::new(built_plan.scripts, options.workspace_dir)
        .with_upload(options.upload)
        .with_releases(releases);
    let runner = match build_cache(config) {
        Some(cache) => runner.with_cache(cache),
        None => runner,
    };
    let runner = match &config.share {
        Some(share) => runner.with_store(Store::new(&share.path)),
        None => runner,
    };

    let engine = Engine::new(
        runner,
        EngineConfig {
            concurrency: options.jobs,
            keep_going: options.keep_going,
            resume: options.resume,
            download_policy: options.download_policy,
            layer_overrides: vec![],
            allow_unexpected_indeterminism: false,
        },
    );

    let status_path = options.state_dir.join("status.json");
    let mut status = StatusStore::load(&status_path)?;

    let ctrl_c = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let result = engine.run(built_plan.steps, &mut status).await;
    status.save(&status_path)?;

    let failed = result.values().any(|s| *s == bob_engine::StepStatus::Failed);
    let root_ok = result.get(&built_plan.root_step).copied() == Some(bob_engine::StepStatus::Complete);

    if failed || !root_ok {
        return Err(BuildError::StepsFailed);
    }
    Ok(())
}

pub fn default_state_dir() -> PathBuf {
    dirs::cache_dir().unwrap_or_else(std::env::temp_dir).join("bob")
}

pub fn default_workspace_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("workspace")
}
