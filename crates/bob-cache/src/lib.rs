// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! Content-addressed artifact cache client (spec.md §4.6): lookup,
//! pack/unpack, multi-backend transfer, and the retention-expression
//! language used by `archive scan/clean/find`.

pub mod audit;
pub mod backend;
pub mod layout;
pub mod pack;
pub mod retention;

use std::io::Cursor;
use std::path::Path;

use bob_hash::Digest;
use thiserror::Error;

pub use audit::{AuditTrail, BuildHost};
pub use backend::{ArchiveBackend, BackendChain, BackendError, FileBackend, Gating, HttpBackend};
pub use pack::{PackError, ARCHIVE_VERSION};
pub use retention::{compute_kept, parse as parse_retention, CmpOp, Expr, FieldValue, Limit, Record, RetentionError, RetentionQuery, SortDir};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Pack(#[from] PackError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("refusing to upload an artifact without a complete audit trail")]
    IncompleteAuditTrail,
    #[error("refusing to upload: input `{0}` is missing its audit trail")]
    DependencyMissingAuditTrail(String),
}

/// The result of a successful cache lookup: the audit trail and the path
/// the artifact's `content/` tree was unpacked to.
pub struct Fetched {
    pub audit: AuditTrail,
    pub content_dir: std::path::PathBuf,
}

/// Ties together backend transfer and pack/unpack into the operations the
/// engine actually calls: has/download/upload/garbage-collect.
pub struct ArtifactCache {
    chain: BackendChain,
}

impl ArtifactCache {
    pub fn new(chain: BackendChain) -> Self {
        Self { chain }
    }

    pub async fn fetch(&self, build_id: Digest, unpack_to: &Path) -> Result<Fetched, CacheError> {
        let bytes = self.chain.fetch_artifact(build_id, ARCHIVE_VERSION).await?;
        let unpacked = pack::unpack(Cursor::new(bytes), unpack_to)?;
        let audit: AuditTrail = serde_json::from_slice(&unpacked.meta_json)?;
        Ok(Fetched {
            audit,
            content_dir: unpack_to.to_path_buf(),
        })
    }

    pub async fn has(&self, build_id: Digest) -> bool {
        self.chain.fetch_artifact(build_id, ARCHIVE_VERSION).await.is_ok()
    }

    /// Pack and upload an artifact. Refuses (spec.md invariant 6 / scenario
    /// F) unless `audit` itself is complete and every input it references
    /// is present in `known_audits` — an artifact can never be shared
    /// without the full provenance chain behind it also being available.
    pub async fn upload(
        &self,
        build_id: Digest,
        audit: &AuditTrail,
        content_dir: &Path,
        known_audits: &std::collections::BTreeSet<String>,
    ) -> Result<(), CacheError> {
        if audit.build_id.is_empty() || audit.bob_version.is_empty() {
            return Err(CacheError::IncompleteAuditTrail);
        }
        for input in &audit.input_refs {
            if !known_audits.contains(input) {
                return Err(CacheError::DependencyMissingAuditTrail(input.clone()));
            }
        }

        let meta_json = serde_json::to_vec(audit)?;
        let mut buf = Vec::new();
        pack::pack(&mut buf, &meta_json, content_dir)?;
        self.chain.upload_artifact(build_id, ARCHIVE_VERSION, &buf).await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_audit(build_id: &str, input_refs: Vec<String>) -> AuditTrail {
        AuditTrail {
            build_id: build_id.to_string(),
            build_host: BuildHost {
                os: "linux".to_string(),
                kernel: "6.1".to_string(),
                hostname: "builder1".to_string(),
            },
            bob_version: "0.1.0".to_string(),
            step_kind: "package".to_string(),
            scripting_language: "sh".to_string(),
            recipe_name: "many".to_string(),
            package_path: "many".to_string(),
            meta_env: std::collections::BTreeMap::new(),
            build_date: 1_700_000_000,
            input_refs,
        }
    }

    #[tokio::test]
    async fn upload_refused_without_complete_audit_trail() {
        let dir = std::env::temp_dir().join("bob-cache-lib-test-incomplete");
        fs_err::create_dir_all(&dir).unwrap();
        let cache = ArtifactCache::new(BackendChain::new(vec![Box::new(FileBackend::new("local", &dir, Gating::all()))]));

        let mut audit = sample_audit("abc", vec![]);
        audit.bob_version.clear();
        let content = dir.join("content-src");
        fs_err::create_dir_all(&content).unwrap();

        let id = bob_hash::hash(&bob_hash::Value::str("abc"));
        let err = cache.upload(id, &audit, &content, &Default::default()).await.unwrap_err();
        assert!(matches!(err, CacheError::IncompleteAuditTrail));

        fs_err::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn upload_refused_when_dependency_audit_missing() {
        let dir = std::env::temp_dir().join("bob-cache-lib-test-dep-missing");
        fs_err::create_dir_all(&dir).unwrap();
        let cache = ArtifactCache::new(BackendChain::new(vec![Box::new(FileBackend::new("local", &dir, Gating::all()))]));

        let audit = sample_audit("abc", vec!["missing-dep".to_string()]);
        let content = dir.join("content-src");
        fs_err::create_dir_all(&content).unwrap();

        let id = bob_hash::hash(&bob_hash::Value::str("abc"));
        let err = cache.upload(id, &audit, &content, &Default::default()).await.unwrap_err();
        assert!(matches!(err, CacheError::DependencyMissingAuditTrail(_)));

        fs_err::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn upload_then_fetch_round_trips_through_a_backend() {
        let dir = std::env::temp_dir().join("bob-cache-lib-test-roundtrip");
        fs_err::create_dir_all(&dir).unwrap();
        let cache = ArtifactCache::new(BackendChain::new(vec![Box::new(FileBackend::new("local", &dir, Gating::all()))]));

        let audit = sample_audit("abc", vec![]);
        let content = dir.join("content-src");
        fs_err::create_dir_all(content.join("bin")).unwrap();
        fs_err::write(content.join("bin").join("tool"), b"hello").unwrap();

        let id = bob_hash::hash(&bob_hash::Value::str("abc"));
        let mut known = std::collections::BTreeSet::new();
        known.insert("abc".to_string());
        cache.upload(id, &audit, &content, &known).await.unwrap();

        assert!(cache.has(id).await);

        let unpack_dir = dir.join("unpacked");
        let fetched = cache.fetch(id, &unpack_dir).await.unwrap();
        assert_eq!(fetched.audit.build_id, "abc");
        assert_eq!(fs_err::read(unpack_dir.join("bin").join("tool")).unwrap(), b"hello");

        fs_err::remove_dir_all(&dir).ok();
    }
}
