// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;

use bob_config::Manager;
use bob_engine::DownloadPolicy;
use clap::{Args, Parser};
use thiserror::Error;

use crate::{archive, build};

#[derive(Debug, Parser)]
#[command(name = "bob", about = "Recipe-driven build automation")]
pub struct Command {
    #[command(flatten)]
    pub global: Global,
    #[command(subcommand)]
    pub subcommand: Subcommand,
}

#[derive(Debug, Args)]
pub struct Global {
    /// Directory holding `<name>.yml` recipe files.
    #[arg(long, global = true, default_value = ".")]
    pub recipe_dir: PathBuf,
    /// Directory holding the project's `default.yaml`.
    #[arg(long, global = true, default_value = ".")]
    pub project_dir: PathBuf,
    /// Root under which vendor-supplied defaults live (`<root>/bob/default.yaml`).
    #[arg(long, global = true, default_value = "/usr/share")]
    pub vendor_dir: PathBuf,
    /// Directory bob keeps its own state (status index, workspaces) under.
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,
    /// `-c <file>`: an additional configuration layer, in precedence order.
    #[arg(short = 'c', long = "config", global = true)]
    pub config_files: Vec<PathBuf>,
    /// `-D VAR=VALUE`: the highest-precedence environment override.
    #[arg(short = 'D', long = "define", global = true)]
    pub defines: Vec<String>,
    #[arg(short = 'j', long, global = true)]
    pub jobs: Option<usize>,
    #[arg(short = 'k', long, global = true)]
    pub keep_going: bool,
    #[arg(long, global = true)]
    pub resume: bool,
}

#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    /// Full release build: fresh workspace, uploads to archive if configured.
    Build(TargetArgs),
    /// Developer build: reuses the prior workspace and resumes completed steps.
    Dev(TargetArgs),
    /// Remove a target's workspace and status entries.
    Clean(TargetArgs),
    /// List the packages a target expands to, dependency-first.
    Ls(TargetArgs),
    /// Show the recorded status of every step a target expands to.
    Status(TargetArgs),
    /// Print one package's resolved environment, tools, and scripts.
    Show(TargetArgs),
    #[command(subcommand)]
    Archive(ArchiveCommand),
    #[command(external_subcommand)]
    Unsupported(Vec<String>),
}

#[derive(Debug, Args)]
pub struct TargetArgs {
    pub target: String,
    #[arg(long, default_value = "no")]
    pub download: DownloadArg,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum DownloadArg {
    No,
    Yes,
    Deps,
    Forced,
    ForcedDeps,
}

impl From<DownloadArg> for DownloadPolicy {
    fn from(value: DownloadArg) -> Self {
        match value {
            DownloadArg::No => DownloadPolicy::No,
            DownloadArg::Yes => DownloadPolicy::Yes,
            DownloadArg::Deps => DownloadPolicy::Deps,
            DownloadArg::Forced => DownloadPolicy::Forced,
            DownloadArg::ForcedDeps => DownloadPolicy::ForcedDeps,
        }
    }
}

#[derive(Debug, clap::Subcommand)]
pub enum ArchiveCommand {
    /// List every artifact under a local file-backed archive root.
    Scan { root: PathBuf },
    /// Delete every artifact a retention expression doesn't keep.
    Clean { root: PathBuf, query: String },
    /// Print every artifact a retention expression would keep.
    Find { root: PathBuf, query: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] bob_config::ConfigError),
    #[error(transparent)]
    Build(#[from] build::BuildError),
    #[error(transparent)]
    Archive(#[from] archive::ArchiveError),
    #[error("`{0}` is not implemented by this build engine")]
    Unsupported(String),
}

pub async fn process() -> Result<(), Error> {
    let Command { global, subcommand } = Command::parse();

    match subcommand {
        Subcommand::Build(args) => run_build(&global, args, false).await,
        Subcommand::Dev(args) => run_build(&global, args, true).await,
        Subcommand::Clean(args) => run_clean(&global, args).await,
        Subcommand::Ls(args) => run_ls(&global, args).await,
        Subcommand::Status(args) => run_status(&global, args).await,
        Subcommand::Show(args) => run_show(&global, args).await,
        Subcommand::Archive(cmd) => run_archive(cmd),
        Subcommand::Unsupported(words) => Err(Error::Unsupported(words.first().cloned().unwrap_or_default())),
    }
}

async fn load_config(global: &Global) -> Result<bob_config::BobConfig, Error> {
    let manager = Manager::new("bob");
    let config = manager.load(&global.vendor_dir, &global.project_dir, &global.config_files, &global.defines).await?;
    Manager::check_minimum_version(&config, bob_engine::buildinfo::VERSION)?;
    Ok(config)
}

fn state_dir(global: &Global) -> PathBuf {
    global.state_dir.clone().unwrap_or_else(build::default_state_dir)
}

async fn run_build(global: &Global, args: TargetArgs, dev: bool) -> Result<(), Error> {
    let config = load_config(global).await?;
    let state_dir = state_dir(global);
    let workspace_dir = build::default_workspace_dir(&state_dir);
    if !dev && workspace_dir.join(&args.target).exists() {
        let _ = fs_err::remove_dir_all(workspace_dir.join(&args.target));
    }

    let options = build::BuildOptions {
        recipe_dir: global.recipe_dir.clone(),
        target: args.target,
        state_dir,
        workspace_dir,
        jobs: global.jobs.unwrap_or_else(num_cpus),
        keep_going: global.keep_going,
        resume: dev || global.resume,
        download_policy: args.download.into(),
        upload: !dev,
    };

    build::run(options, &config).await?;
    Ok(())
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

async fn run_clean(global: &Global, args: TargetArgs) -> Result<(), Error> {
    let state_dir = state_dir(global);
    let workspace = build::default_workspace_dir(&state_dir).join(&args.target);
    if workspace.exists() {
        fs_err::remove_dir_all(&workspace).map_err(|e| Error::Build(build::BuildError::Load(crate::recipes::LoadError::Io(workspace, e.into()))))?;
    }
    Ok(())
}

async fn run_ls(global: &Global, args: TargetArgs) -> Result<(), Error> {
    let config = load_config(global).await?;
    let registry = crate::recipes::load_registry(&global.recipe_dir).map_err(|e| Error::Build(e.into()))?;
    let tree = bob_expand::expand_root(&registry, &args.target, base_environment(&config))
        .map_err(|e| Error::Build(build::BuildError::Expand(e)))?;
    for pkg in &tree.packages {
        println!("{} sourceRelease={} buildRelease={}", pkg.recipe_name, pkg.source_release, pkg.build_release);
    }
    Ok(())
}

async fn run_status(global: &Global, args: TargetArgs) -> Result<(), Error> {
    let config = load_config(global).await?;
    let registry = crate::recipes::load_registry(&global.recipe_dir).map_err(|e| Error::Build(e.into()))?;
    let tree = bob_expand::expand_root(&registry, &args.target, base_environment(&config))
        .map_err(|e| Error::Build(build::BuildError::Expand(e)))?;
    let built_plan = crate::plan::build_plan(&registry, &tree).map_err(|e| Error::Build(build::BuildError::Plan(e)))?;

    let status_path = state_dir(global).join("status.json");
    let status = bob_engine::StatusStore::load(&status_path).map_err(|e| Error::Build(build::BuildError::Status(e)))?;
    for step in &built_plan.steps {
        println!("{} {} {:?}", step.variant_id.hex_prefix(12), step.recipe_name, status.get(step.variant_id));
    }
    Ok(())
}

async fn run_show(global: &Global, args: TargetArgs) -> Result<(), Error> {
    let config = load_config(global).await?;
    let registry = crate::recipes::load_registry(&global.recipe_dir).map_err(|e| Error::Build(e.into()))?;
    let tree = bob_expand::expand_root(&registry, &args.target, base_environment(&config))
        .map_err(|e| Error::Build(build::BuildError::Expand(e)))?;
    if let Some(pkg) = tree.packages.iter().find(|p| p.recipe_name == args.target) {
        println!("recipe: {}", pkg.recipe_name);
        println!("sourceRelease: {}", pkg.source_release);
        println!("buildRelease: {}", pkg.build_release);
        for (k, v) in pkg.environment.values.iter() {
            println!("env {k}={v}");
        }
        for (k, v) in &pkg.tools {
            println!("tool {k}={}", v.tool_path);
        }
    }
    Ok(())
}

fn run_archive(cmd: ArchiveCommand) -> Result<(), Error> {
    match cmd {
        ArchiveCommand::Scan { root } => {
            for line in archive::run_scan(&root)? {
                println!("{line}");
            }
        }
        ArchiveCommand::Clean { root, query } => {
            for build_id in archive::run_clean(&root, &query)? {
                println!("removed {build_id}");
            }
        }
        ArchiveCommand::Find { root, query } => {
            for build_id in archive::run_find(&root, &query)? {
                println!("{build_id}");
            }
        }
    }
    Ok(())
}

fn base_environment(config: &bob_config::BobConfig) -> bob_env::Environment {
    let mut values = bob_env::EnvMap::new();
    for (k, v) in &config.environment {
        values.set(k, v);
    }
    bob_env::Environment::new(values, bob_env::Whitelist::from_names(config.whitelist.iter().cloned()))
}
