// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! Sandbox mode policy (spec.md §4.7): which of the five modes isolates a
//! step, whether it uses a configured image, and whether it runs at a
//! deterministic "stable path" derived from the step's Variant-Id. Building
//! the actual namespace isolation is out of scope — we only build the fixed
//! argument dialect for the external helper binary that does it.

use std::path::PathBuf;

use bob_hash::Digest;

/// The five sandbox modes a step may declare (spec.md §4.7's table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxMode {
    NoSandbox,
    Sandbox,
    SlimSandbox,
    DevSandbox,
    StrictSandbox,
}

/// Whether the step's workspace paths are the real host paths, the
/// per-build workspace paths (isolated but not reproducible across
/// workspaces), or the deterministic `/bob/...` stable paths required for
/// bit-exact artifact reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Host,
    WorkspacePaths,
    StablePaths,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSandbox {
    pub isolated: bool,
    pub path_kind: PathKind,
    pub image_used: bool,
}

/// Resolve a mode against whether a sandbox image is configured, per the
/// table in spec.md §4.7.
pub fn resolve(mode: SandboxMode, has_image: bool) -> ResolvedSandbox {
    match mode {
        SandboxMode::NoSandbox => ResolvedSandbox {
            isolated: false,
            path_kind: PathKind::Host,
            image_used: false,
        },
        SandboxMode::Sandbox => {
            if has_image {
                ResolvedSandbox {
                    isolated: true,
                    path_kind: PathKind::StablePaths,
                    image_used: true,
                }
            } else {
                ResolvedSandbox {
                    isolated: false,
                    path_kind: PathKind::Host,
                    image_used: false,
                }
            }
        }
        SandboxMode::SlimSandbox => ResolvedSandbox {
            isolated: true,
            path_kind: PathKind::WorkspacePaths,
            image_used: false,
        },
        SandboxMode::DevSandbox => ResolvedSandbox {
            isolated: true,
            path_kind: PathKind::WorkspacePaths,
            image_used: has_image,
        },
        SandboxMode::StrictSandbox => ResolvedSandbox {
            isolated: true,
            path_kind: if has_image { PathKind::StablePaths } else { PathKind::WorkspacePaths },
            image_used: has_image,
        },
    }
}

/// The deterministic `/bob/...` path a stable-path step executes at.
pub fn stable_path(variant_id: Digest) -> PathBuf {
    PathBuf::from(format!("/bob/{}", variant_id.to_hex()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    ReadWrite,
    ReadOnly,
}

/// Builds the fixed argument list passed to the external namespace-sandbox
/// helper binary. Method-chained the way the teacher's own container
/// builder is, but the result here is an argument vector for a child
/// process rather than a direct `clone(2)` call — Bob does not implement
/// namespace isolation itself (spec.md §1's out-of-scope list).
#[derive(Debug, Clone)]
pub struct HelperInvocation {
    binary: PathBuf,
    root: Option<PathBuf>,
    hostname: Option<String>,
    work_dir: Option<PathBuf>,
    binds: Vec<(PathBuf, PathBuf, BindMode)>,
    uid_map: Option<(u32, u32, u32)>,
}

impl HelperInvocation {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            root: None,
            hostname: None,
            work_dir: None,
            binds: vec![],
            uid_map: None,
        }
    }

    pub fn root(self, root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..self
        }
    }

    pub fn hostname(self, hostname: impl ToString) -> Self {
        Self {
            hostname: Some(hostname.to_string()),
            ..self
        }
    }

    pub fn work_dir(self, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: Some(work_dir.into()),
            ..self
        }
    }

    pub fn bind(mut self, host: impl Into<PathBuf>, guest: impl Into<PathBuf>, mode: BindMode) -> Self {
        self.binds.push((host.into(), guest.into(), mode));
        self
    }

    /// `host_uid:container_uid:count`, mirroring the rootless UID mapping
    /// the teacher's own container setup writes into `/proc/<pid>/uid_map`.
    pub fn uid_map(self, host_uid: u32, container_uid: u32, count: u32) -> Self {
        Self {
            uid_map: Some((host_uid, container_uid, count)),
            ..self
        }
    }

    pub fn program(&self) -> &std::path::Path {
        &self.binary
    }

    /// The fixed CLI dialect: `--root`, `--hostname`, `--workdir`, one
    /// `--bind host:guest:rw|ro` per bind, `--uid-map h:c:n`.
    pub fn into_args(self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(root) = self.root {
            args.push("--root".to_string());
            args.push(root.display().to_string());
        }
        if let Some(hostname) = self.hostname {
            args.push("--hostname".to_string());
            args.push(hostname);
        }
        if let Some(work_dir) = self.work_dir {
            args.push("--workdir".to_string());
            args.push(work_dir.display().to_string());
        }
        for (host, guest, mode) in self.binds {
            let mode_str = match mode {
                BindMode::ReadWrite => "rw",
                BindMode::ReadOnly => "ro",
            };
            args.push("--bind".to_string());
            args.push(format!("{}:{}:{mode_str}", host.display(), guest.display()));
        }
        if let Some((host_uid, container_uid, count)) = self.uid_map {
            args.push("--uid-map".to_string());
            args.push(format!("{host_uid}:{container_uid}:{count}"));
        }
        args
    }
}
