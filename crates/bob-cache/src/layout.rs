// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! Content-addressed path layout for packed artifacts (spec.md §4.6):
//! `<root>/<h[0:2]>/<h[2:4]>/<h[4:]>-<ver>.tgz`, fanned out two levels deep
//! so no directory accumulates one entry per artifact in the store.

use std::path::{Path, PathBuf};

use bob_hash::Digest;

/// The on-disk (or backend-relative) path for a Build-Id at a given pack
/// format version.
pub fn archive_path(root: &Path, build_id: Digest, version: u32) -> PathBuf {
    let hex = build_id.to_hex();
    root.join(&hex[0..2]).join(&hex[2..4]).join(format!("{}-{version}.tgz", &hex[4..]))
}

/// The backend-relative key (no root), used by HTTP/S3-like backends that
/// address objects by key rather than filesystem path.
pub fn archive_key(build_id: Digest, version: u32) -> String {
    let hex = build_id.to_hex();
    format!("{}/{}/{}-{version}.tgz", &hex[0..2], &hex[2..4], &hex[4..])
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn path_fans_out_two_levels() {
        let id = bob_hash::hash(&bob_hash::Value::str("artifact"));
        let path = archive_path(Path::new("/cache"), id, 1);
        let hex = id.to_hex();
        assert_eq!(path, Path::new("/cache").join(&hex[0..2]).join(&hex[2..4]).join(format!("{}-1.tgz", &hex[4..])));
    }

    #[test]
    fn key_matches_path_tail() {
        let id = bob_hash::hash(&bob_hash::Value::str("artifact"));
        let path = archive_path(Path::new("/cache"), id, 2);
        let key = archive_key(id, 2);
        assert!(path.to_string_lossy().ends_with(&key));
    }
}
