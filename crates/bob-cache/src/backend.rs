// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! Transfer backends for packed artifacts (spec.md §4.6): a priority-ordered
//! list of stores, each independently gated on whether it participates in
//! source downloads/uploads and artifact downloads/uploads.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::layout;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("artifact not found")]
    NotFound,
    #[error("backend I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("backend request error: {0}")]
    Request(String),
}

/// Which transfer kinds a backend participates in. A read-only mirror might
/// set every upload flag to `false`; a private scratch cache might disable
/// `src_upload`/`src_download` while still serving built artifacts.
#[derive(Debug, Clone, Copy)]
pub struct Gating {
    pub src_download: bool,
    pub src_upload: bool,
    pub download: bool,
    pub upload: bool,
}

impl Gating {
    pub fn all() -> Self {
        Gating {
            src_download: true,
            src_upload: true,
            download: true,
            upload: true,
        }
    }

    pub fn read_only() -> Self {
        Gating {
            src_download: true,
            src_upload: false,
            download: true,
            upload: false,
        }
    }
}

/// A single store an artifact can be fetched from or pushed to.
#[async_trait]
pub trait ArchiveBackend: Send + Sync {
    fn name(&self) -> &str;
    fn gating(&self) -> Gating;

    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError>;
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), BackendError>;
    async fn exists(&self, key: &str) -> Result<bool, BackendError>;
}

/// A backend rooted at a local directory, using the same fan-out layout
/// [`crate::layout`] describes.
pub struct FileBackend {
    name: String,
    root: PathBuf,
    gating: Gating,
}

impl FileBackend {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>, gating: Gating) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            gating,
        }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ArchiveBackend for FileBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn gating(&self) -> Gating {
        self.gating
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        let path = self.resolve(key);
        fs_err::tokio::read(&path).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                BackendError::NotFound
            } else {
                BackendError::Io(e.into())
            }
        })
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), BackendError> {
        let path = self.resolve(key);
        if let Some(parent) = path.parent() {
            fs_err::tokio::create_dir_all(parent).await?;
        }
        fs_err::tokio::write(&path, bytes).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        Ok(fs_err::tokio::metadata(self.resolve(key)).await.is_ok())
    }
}

/// A backend served over HTTP, keyed by `{base_url}/{key}`.
pub struct HttpBackend {
    name: String,
    base_url: String,
    client: reqwest::Client,
    gating: Gating,
}

impl HttpBackend {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, gating: Gating) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            gating,
        }
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{key}", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ArchiveBackend for HttpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn gating(&self) -> Gating {
        self.gating
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        let response = self.client.get(self.url(key)).send().await.map_err(|e| BackendError::Request(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound);
        }
        let response = response.error_for_status().map_err(|e| BackendError::Request(e.to_string()))?;
        Ok(response.bytes().await.map_err(|e| BackendError::Request(e.to_string()))?.to_vec())
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), BackendError> {
        self.client
            .put(self.url(key))
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| BackendError::Request(e.to_string()))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        let response = self.client.head(self.url(key)).send().await.map_err(|e| BackendError::Request(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

/// Priority-ordered composition of backends: lookups try each backend in
/// order until one has the artifact; uploads go to every backend whose
/// gating allows it.
pub struct BackendChain {
    backends: Vec<Box<dyn ArchiveBackend>>,
}

impl BackendChain {
    pub fn new(backends: Vec<Box<dyn ArchiveBackend>>) -> Self {
        Self { backends }
    }

    pub async fn fetch_artifact(&self, build_id: bob_hash::Digest, version: u32) -> Result<Vec<u8>, BackendError> {
        let key = layout::archive_key(build_id, version);
        for backend in &self.backends {
            if !backend.gating().download {
                continue;
            }
            match backend.get(&key).await {
                Ok(bytes) => return Ok(bytes),
                Err(BackendError::NotFound) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(BackendError::NotFound)
    }

    /// Upload to every backend that allows artifact uploads, stopping at
    /// the first hard error (not counting backends skipped by gating).
    pub async fn upload_artifact(&self, build_id: bob_hash::Digest, version: u32, bytes: &[u8]) -> Result<(), BackendError> {
        let key = layout::archive_key(build_id, version);
        for backend in &self.backends {
            if !backend.gating().upload {
                continue;
            }
            backend.put(&key, bytes).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn file_backend_round_trips() {
        let dir = std::env::temp_dir().join("bob-cache-backend-test");
        fs_err::create_dir_all(&dir).unwrap();
        let backend = FileBackend::new("local", &dir, Gating::all());

        backend.put("ab/cd/ef-1.tgz", b"payload").await.unwrap();
        assert!(backend.exists("ab/cd/ef-1.tgz").await.unwrap());
        assert_eq!(backend.get("ab/cd/ef-1.tgz").await.unwrap(), b"payload");

        fs_err::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn read_only_backend_is_not_a_fetch_target_violation() {
        let dir = std::env::temp_dir().join("bob-cache-backend-readonly-test");
        fs_err::create_dir_all(&dir).unwrap();
        let backend = FileBackend::new("mirror", &dir, Gating::read_only());
        assert!(!backend.gating().upload);

        fs_err::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn chain_tries_backends_in_priority_order() {
        let primary_dir = std::env::temp_dir().join("bob-cache-chain-primary");
        let secondary_dir = std::env::temp_dir().join("bob-cache-chain-secondary");
        fs_err::create_dir_all(&primary_dir).unwrap();
        fs_err::create_dir_all(&secondary_dir).unwrap();

        let id = bob_hash::hash(&bob_hash::Value::str("artifact"));
        let key = layout::archive_key(id, 1);
        fs_err::create_dir_all(secondary_dir.join(&key[..key.rfind('/').unwrap()])).unwrap();
        fs_err::write(secondary_dir.join(&key), b"from-secondary").unwrap();

        let chain = BackendChain::new(vec![
            Box::new(FileBackend::new("primary", &primary_dir, Gating::all())),
            Box::new(FileBackend::new("secondary", &secondary_dir, Gating::all())),
        ]);

        let bytes = chain.fetch_artifact(id, 1).await.unwrap();
        assert_eq!(bytes, b"from-secondary");

        fs_err::remove_dir_all(&primary_dir).ok();
        fs_err::remove_dir_all(&secondary_dir).ok();
    }
}
