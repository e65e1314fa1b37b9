// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! `bob archive scan|clean|find`: walks a local file-backed archive root,
//! collects every artifact's audit trail, and applies the retention
//! language (spec.md §4.6) to decide what survives.

use std::path::{Path, PathBuf};

use bob_cache::{parse_retention, AuditTrail};
use bob_hash::Digest;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to read {0:?}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error(transparent)]
    Pack(#[from] bob_cache::PackError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Retention(#[from] bob_cache::RetentionError),
}

struct Entry {
    build_id: Digest,
    path: PathBuf,
    audit: AuditTrail,
}

/// Walks `root/<h0:2>/<h2:4>/<h4:>-<ver>.tgz`, unpacking each artifact's
/// `meta` entry only (into a throwaway scratch directory; the pack format
/// has no meta-only read path) to recover its audit trail.
fn scan(root: &Path) -> Result<Vec<Entry>, ArchiveError> {
    let mut entries = Vec::new();
    if !root.is_dir() {
        return Ok(entries);
    }

    for top in fs_err::read_dir(root).map_err(|e| ArchiveError::Io(root.to_path_buf(), e.into()))? {
        let top = top.map_err(|e| ArchiveError::Io(root.to_path_buf(), e.into()))?;
        if !top.path().is_dir() {
            continue;
        }
        for mid in fs_err::read_dir(top.path()).map_err(|e| ArchiveError::Io(top.path(), e.into()))? {
            let mid = mid.map_err(|e| ArchiveError::Io(top.path(), e.into()))?;
            if !mid.path().is_dir() {
                continue;
            }
            for file in fs_err::read_dir(mid.path()).map_err(|e| ArchiveError::Io(mid.path(), e.into()))? {
                let file = file.map_err(|e| ArchiveError::Io(mid.path(), e.into()))?;
                let path = file.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
                let Some(rest) = name.strip_suffix(".tgz") else { continue };
                let Some((hex_tail, _version)) = rest.rsplit_once('-') else { continue };
                let hex = format!(
                    "{}{}{hex_tail}",
                    top.path().file_name().and_then(|n| n.to_str()).unwrap_or_default(),
                    mid.path().file_name().and_then(|n| n.to_str()).unwrap_or_default(),
                );
                let Some(build_id) = Digest::from_hex(&hex) else { continue };

                let scratch = std::env::temp_dir().join(format!("bob-archive-scan-{hex}"));
                let bytes = fs_err::read(&path).map_err(|e| ArchiveError::Io(path.clone(), e.into()))?;
                let unpacked = bob_cache::pack::unpack(std::io::Cursor::new(bytes), &scratch)?;
                let audit: AuditTrail = serde_json::from_slice(&unpacked.meta_json)?;
                fs_err::remove_dir_all(&scratch).ok();

                entries.push(Entry { build_id, path, audit });
            }
        }
    }

    Ok(entries)
}

/// `archive scan`: print every artifact's Build-Id and recipe name.
pub fn run_scan(root: &Path) -> Result<Vec<String>, ArchiveError> {
    let entries = scan(root)?;
    Ok(entries
        .iter()
        .map(|e| format!("{} {} ({})", e.build_id.to_hex(), e.audit.recipe_name, e.audit.step_kind))
        .collect())
}

/// `archive find <query>`: print every artifact the retention expression
/// would keep, without deleting anything.
pub fn run_find(root: &Path, query: &str) -> Result<Vec<String>, ArchiveError> {
    let entries = scan(root)?;
    let parsed = parse_retention(query)?;
    let audits: Vec<AuditTrail> = entries.iter().map(|e| e.audit.clone()).collect();
    let kept = bob_cache::compute_kept(&audits, &parsed);
    Ok(entries.iter().filter(|e| kept.contains(&e.build_id.to_hex())).map(|e| e.build_id.to_hex()).collect())
}

/// `archive clean <query>`: delete every artifact the retention expression
/// does not keep, returning the Build-Ids removed.
pub fn run_clean(root: &Path, query: &str) -> Result<Vec<String>, ArchiveError> {
    let entries = scan(root)?;
    let parsed = parse_retention(query)?;
    let audits: Vec<AuditTrail> = entries.iter().map(|e| e.audit.clone()).collect();
    let kept = bob_cache::compute_kept(&audits, &parsed);

    let mut removed = Vec::new();
    for entry in &entries {
        let hex = entry.build_id.to_hex();
        if !kept.contains(&hex) {
            fs_err::remove_file(&entry.path).map_err(|e| ArchiveError::Io(entry.path.clone(), e.into()))?;
            removed.push(hex);
        }
    }
    Ok(removed)
}
