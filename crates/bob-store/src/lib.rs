// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! The shared-package store (spec.md §4.8): content-addressed installation
//! of built artifacts, deduplicated across projects, with an LRU quota and
//! `clean --shared [--all-unused]` reclamation.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bob_hash::Digest;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("store descriptor error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("installation at {0:?} is missing its pkg.json descriptor")]
    MissingDescriptor(PathBuf),
    #[error("installation at {0:?} has a descriptor that doesn't match its own path")]
    InvalidDescriptor(PathBuf),
    #[error("no installation found for build-id {0}")]
    NotFound(String),
}

/// The fixed two-field descriptor written alongside every installation
/// (spec.md §4.8). Nothing else is stored in it — LRU ordering is read off
/// the descriptor file's own mtime, not a field in this struct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageDescriptor {
    pub hash: String,
    pub size: u64,
}

/// One discovered installation under the store root.
#[derive(Debug, Clone)]
pub struct Entry {
    pub hash: String,
    pub instance: u32,
    pub size: u64,
    pub installed_at: SystemTime,
}

impl Entry {
    fn instance_dir(&self, store: &Store) -> PathBuf {
        store.instance_dir(&self.hash, self.instance)
    }
}

pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn instance_dir(&self, hex: &str, instance: u32) -> PathBuf {
        self.root.join(&hex[0..2]).join(&hex[2..4]).join(format!("{}-{instance}", &hex[4..]))
    }

    fn workspace_dir(&self, hex: &str, instance: u32) -> PathBuf {
        self.instance_dir(hex, instance).join("workspace")
    }

    fn descriptor_path(&self, hex: &str, instance: u32) -> PathBuf {
        self.instance_dir(hex, instance).join("pkg.json")
    }

    /// Every already-present instance number for `build_id`, ascending.
    fn existing_instances(&self, hex: &str) -> Result<Vec<u32>, StoreError> {
        let parent = self.root.join(&hex[0..2]).join(&hex[2..4]);
        if !parent.exists() {
            return Ok(vec![]);
        }
        let prefix = format!("{}-", &hex[4..]);
        let mut instances = Vec::new();
        for entry in fs_err::read_dir(&parent)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(suffix) = name.strip_prefix(&prefix) {
                if let Ok(n) = suffix.parse::<u32>() {
                    instances.push(n);
                }
            }
        }
        instances.sort_unstable();
        Ok(instances)
    }

    fn read_descriptor(&self, hex: &str, instance: u32) -> Result<PackageDescriptor, StoreError> {
        let path = self.descriptor_path(hex, instance);
        if !path.exists() {
            return Err(StoreError::MissingDescriptor(path));
        }
        let bytes = fs_err::read(&path)?;
        let descriptor: PackageDescriptor = serde_json::from_slice(&bytes).map_err(|_| StoreError::InvalidDescriptor(path.clone()))?;
        if descriptor.hash != hex {
            return Err(StoreError::InvalidDescriptor(path));
        }
        Ok(descriptor)
    }

    /// Install a new artifact. `populate` fills the `workspace/` directory
    /// with the artifact's content; its result is checked before the
    /// descriptor is committed, so a failure mid-populate never leaves a
    /// store entry with a descriptor pointing at incomplete content.
    ///
    /// If an instance with this exact `(build_id, size)` already exists, its
    /// existing path is returned instead of installing a duplicate.
    pub fn install(&self, build_id: Digest, size: u64, populate: impl FnOnce(&Path) -> io::Result<()>) -> Result<PathBuf, StoreError> {
        let hex = build_id.to_hex();

        for instance in self.existing_instances(&hex)? {
            if let Ok(descriptor) = self.read_descriptor(&hex, instance) {
                if descriptor.size == size {
                    return Ok(self.workspace_dir(&hex, instance));
                }
            }
        }

        let next_instance = self.existing_instances(&hex)?.into_iter().max().map(|n| n + 1).unwrap_or(0);
        let instance_dir = self.instance_dir(&hex, next_instance);
        let workspace_dir = instance_dir.join("workspace");
        fs_err::create_dir_all(&workspace_dir)?;

        if let Err(e) = populate(&workspace_dir) {
            let _ = fs_err::remove_dir_all(&instance_dir);
            return Err(StoreError::Io(e));
        }

        let descriptor = PackageDescriptor { hash: hex.clone(), size };
        let descriptor_path = self.descriptor_path(&hex, next_instance);
        let tmp_path = descriptor_path.with_extension("json.tmp");
        if let Err(e) = fs_err::write(&tmp_path, serde_json::to_vec(&descriptor)?) {
            let _ = fs_err::remove_dir_all(&instance_dir);
            return Err(StoreError::Io(e));
        }
        if let Err(e) = fs_err::rename(&tmp_path, &descriptor_path) {
            let _ = fs_err::remove_dir_all(&instance_dir);
            return Err(StoreError::Io(e));
        }

        Ok(workspace_dir)
    }

    /// Find the first valid installation for a build-id.
    pub fn fetch(&self, build_id: Digest) -> Result<PathBuf, StoreError> {
        let hex = build_id.to_hex();
        for instance in self.existing_instances(&hex)? {
            if self.read_descriptor(&hex, instance).is_ok() {
                return Ok(self.workspace_dir(&hex, instance));
            }
        }
        Err(StoreError::NotFound(hex))
    }

    /// Symlink `local_path` to the shared workspace, per spec.md §4.8 ("the
    /// local workspace becomes a symbolic link to the shared directory").
    pub fn link_workspace(&self, local_path: &Path, build_id: Digest) -> Result<(), StoreError> {
        let target = self.fetch(build_id)?;
        if local_path.exists() || local_path.symlink_metadata().is_ok() {
            fs_err::remove_file(local_path).or_else(|_| fs_err::remove_dir_all(local_path))?;
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, local_path)?;
        #[cfg(not(unix))]
        fs_err::copy(&target, local_path).map(|_| ())?;
        Ok(())
    }

    /// Every installation in the store, valid or not counted separately —
    /// entries with an unreadable descriptor are skipped (they don't
    /// participate in quota accounting, matching "does not corrupt the
    /// store": a broken install is invisible to reclamation, not fatal to it).
    pub fn list_entries(&self) -> Result<Vec<Entry>, StoreError> {
        let mut entries = Vec::new();
        if !self.root.exists() {
            return Ok(entries);
        }
        for l1 in fs_err::read_dir(&self.root)? {
            let l1 = l1?;
            if !l1.file_type()?.is_dir() {
                continue;
            }
            for l2 in fs_err::read_dir(l1.path())? {
                let l2 = l2?;
                if !l2.file_type()?.is_dir() {
                    continue;
                }
                for instance_entry in fs_err::read_dir(l2.path())? {
                    let instance_entry = instance_entry?;
                    let name = instance_entry.file_name();
                    let name = name.to_string_lossy();
                    let Some((suffix, instance_str)) = name.rsplit_once('-') else {
                        continue;
                    };
                    let Ok(instance) = instance_str.parse::<u32>() else {
                        continue;
                    };
                    let hex = format!(
                        "{}{}{}",
                        l1.file_name().to_string_lossy(),
                        l2.file_name().to_string_lossy(),
                        suffix
                    );
                    let Ok(descriptor) = self.read_descriptor(&hex, instance) else {
                        continue;
                    };
                    let descriptor_path = self.descriptor_path(&hex, instance);
                    let installed_at = fs_err::metadata(&descriptor_path)?.modified()?;
                    entries.push(Entry {
                        hash: hex,
                        instance,
                        size: descriptor.size,
                        installed_at,
                    });
                }
            }
        }
        Ok(entries)
    }

    pub fn total_size(&self) -> Result<u64, StoreError> {
        Ok(self.list_entries()?.iter().map(|e| e.size).sum())
    }

    /// Remove the oldest (by installation time) unreferenced entries until
    /// total size is at or under `quota`, or nothing reclaimable remains.
    /// Returns the removed build-ids.
    pub fn reclaim_to_quota(&self, quota: u64, referenced: &BTreeSet<String>) -> Result<Vec<String>, StoreError> {
        let mut entries = self.list_entries()?;
        entries.sort_by_key(|e| e.installed_at);

        let mut total: u64 = entries.iter().map(|e| e.size).sum();
        let mut removed = Vec::new();
        for entry in entries {
            if total <= quota {
                break;
            }
            if referenced.contains(&entry.hash) {
                continue;
            }
            let dir = entry.instance_dir(self);
            fs_err::remove_dir_all(&dir)?;
            total = total.saturating_sub(entry.size);
            removed.push(entry.hash.clone());
        }
        Ok(removed)
    }

    /// `clean --shared --all-unused`: reclaim every entry not in
    /// `referenced`, regardless of quota.
    pub fn clean_all_unused(&self, referenced: &BTreeSet<String>) -> Result<Vec<String>, StoreError> {
        let mut removed = Vec::new();
        for entry in self.list_entries()? {
            if referenced.contains(&entry.hash) {
                continue;
            }
            fs_err::remove_dir_all(entry.instance_dir(self))?;
            removed.push(entry.hash.clone());
        }
        Ok(removed)
    }
}
