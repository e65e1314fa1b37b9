// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-step execution status, persisted to the build index so `--resume`
//! can skip prior `Complete` steps regardless of source changes (spec.md
//! §4.4's Resume paragraph).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bob_hash::Digest;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("failed to read status file {0:?}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to write status file {0:?}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("corrupt status file {0:?}: {1}")]
    Corrupt(PathBuf, serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum StepStatus {
    NotStarted,
    Running,
    Complete,
    Failed,
}

/// Keyed by Variant-Id hex so it round-trips through JSON as a plain
/// string-keyed map.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StatusStore {
    entries: BTreeMap<String, StepStatus>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, StatusError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let bytes = fs_err::read(path).map_err(|e| StatusError::Read(path.to_path_buf(), e.into()))?;
        serde_json::from_slice(&bytes).map_err(|e| StatusError::Corrupt(path.to_path_buf(), e))
    }

    pub fn save(&self, path: &Path) -> Result<(), StatusError> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent).map_err(|e| StatusError::Write(path.to_path_buf(), e.into()))?;
        }
        let bytes = serde_json::to_vec_pretty(self).expect("status store serialization cannot fail");
        fs_err::write(path, bytes).map_err(|e| StatusError::Write(path.to_path_buf(), e.into()))
    }

    pub fn get(&self, variant_id: Digest) -> StepStatus {
        self.entries.get(&variant_id.to_hex()).copied().unwrap_or(StepStatus::NotStarted)
    }

    pub fn set(&mut self, variant_id: Digest, status: StepStatus) {
        self.entries.insert(variant_id.to_hex(), status);
    }

    /// Whether `--resume` may skip this step outright.
    pub fn is_resumable_complete(&self, variant_id: Digest, resume: bool) -> bool {
        resume && self.get(variant_id) == StepStatus::Complete
    }
}
