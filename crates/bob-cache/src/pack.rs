// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! The artifact pack format (spec.md §4.6): a gzip'd tar with a `meta` entry
//! (the JSON audit trail) first, followed by the `content/` workspace tree.
//! A pax extended header `bob-archive-vsn=1` marks the format version so a
//! future incompatible layout can be told apart before unpacking.

use std::io::{self, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Builder, EntryType, Header};
use thiserror::Error;

pub const ARCHIVE_VERSION: u32 = 1;
const PAX_KEY: &str = "bob-archive-vsn";

#[derive(Debug, Error)]
pub enum PackError {
    #[error("archive I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("archive is missing its `meta` entry")]
    MissingMeta,
    #[error("archive content is corrupt: {0}")]
    Corrupt(String),
    #[error("unsupported archive format version {0}")]
    UnsupportedVersion(u32),
}

/// Write `meta` then the contents of `content_dir` (recursively, preserving
/// relative paths under `content/`) as a gzip'd tar to `writer`.
pub fn pack<W: Write>(writer: W, meta_json: &[u8], content_dir: &Path) -> Result<(), PackError> {
    let encoder = GzEncoder::new(writer, Compression::default());
    let mut builder = Builder::new(encoder);

    let mut pax = std::collections::BTreeMap::new();
    pax.insert(PAX_KEY.to_string(), ARCHIVE_VERSION.to_string());
    builder.append_pax_extensions(pax.iter().map(|(k, v)| (k.as_str(), v.as_bytes())))?;

    let mut meta_header = Header::new_gnu();
    meta_header.set_size(meta_json.len() as u64);
    meta_header.set_entry_type(EntryType::Regular);
    meta_header.set_mode(0o644);
    meta_header.set_cksum();
    builder.append_data(&mut meta_header, "meta", meta_json)?;

    if content_dir.exists() {
        builder.append_dir_all("content", content_dir)?;
    }

    builder.into_inner().map_err(PackError::Io)?.finish().map_err(PackError::Io)?;
    Ok(())
}

/// The result of successfully unpacking an archive.
pub struct Unpacked {
    pub meta_json: Vec<u8>,
}

/// Unpack `reader` into `dest_dir`, returning the `meta` entry's raw bytes.
/// Rejects archives missing `meta`, and surfaces any mid-stream corruption
/// (truncated gzip stream, bad tar header) as [`PackError::Corrupt`] rather
/// than partially writing into `dest_dir`.
pub fn unpack<R: Read>(reader: R, dest_dir: &Path) -> Result<Unpacked, PackError> {
    let decoder = GzDecoder::new(reader);
    let mut archive = tar::Archive::new(decoder);

    let mut meta_json: Option<Vec<u8>> = None;
    let staging = dest_dir.with_extension("partial");
    fs_err::create_dir_all(&staging)?;

    let entries = archive.entries().map_err(|e| PackError::Corrupt(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| PackError::Corrupt(e.to_string()))?;
        let path = entry.path().map_err(|e| PackError::Corrupt(e.to_string()))?.into_owned();

        if path == Path::new("meta") {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf).map_err(|e| PackError::Corrupt(e.to_string()))?;
            meta_json = Some(buf);
            continue;
        }

        if let Ok(relative) = path.strip_prefix("content") {
            let target = staging.join(relative);
            if entry.header().entry_type().is_dir() {
                fs_err::create_dir_all(&target)?;
            } else {
                if let Some(parent) = target.parent() {
                    fs_err::create_dir_all(parent)?;
                }
                entry.unpack(&target).map_err(|e| PackError::Corrupt(e.to_string()))?;
            }
        }
    }

    let meta_json = match meta_json {
        Some(json) => json,
        None => {
            let _ = fs_err::remove_dir_all(&staging);
            return Err(PackError::MissingMeta);
        }
    };

    if dest_dir.exists() {
        fs_err::remove_dir_all(dest_dir)?;
    }
    fs_err::rename(&staging, dest_dir)?;

    Ok(Unpacked { meta_json })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_meta_and_content() {
        let tmp = tempdir();
        let content_dir = tmp.join("content");
        fs_err::create_dir_all(content_dir.join("bin")).unwrap();
        fs_err::write(content_dir.join("bin").join("tool"), b"binary-data").unwrap();

        let mut buf = Vec::new();
        pack(&mut buf, br#"{"build_id":"abc"}"#, &content_dir).unwrap();

        let dest = tmp.join("unpacked");
        let unpacked = unpack(Cursor::new(buf), &dest).unwrap();
        assert_eq!(unpacked.meta_json, br#"{"build_id":"abc"}"#);
        assert_eq!(fs_err::read(dest.join("bin").join("tool")).unwrap(), b"binary-data");

        fs_err::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn missing_meta_is_rejected() {
        let tmp = tempdir();
        let empty_content = tmp.join("empty");
        fs_err::create_dir_all(&empty_content).unwrap();

        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = Builder::new(encoder);
        builder.append_dir_all("content", &empty_content).unwrap();
        let buf = builder.into_inner().unwrap().finish().unwrap();

        let dest = tmp.join("unpacked");
        let err = unpack(Cursor::new(buf), &dest).unwrap_err();
        assert!(matches!(err, PackError::MissingMeta));

        fs_err::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn truncated_stream_is_corrupt_not_partial_write() {
        let tmp = tempdir();
        let content_dir = tmp.join("content");
        fs_err::create_dir_all(&content_dir).unwrap();
        fs_err::write(content_dir.join("file"), vec![0u8; 4096]).unwrap();

        let mut buf = Vec::new();
        pack(&mut buf, b"{}", &content_dir).unwrap();
        buf.truncate(buf.len() / 2);

        let dest = tmp.join("unpacked");
        let err = unpack(Cursor::new(buf), &dest);
        assert!(err.is_err());
        assert!(!dest.exists());

        fs_err::remove_dir_all(&tmp).ok();
    }

    fn tempdir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("bob-cache-pack-test-{:x}", std::ptr::addr_of!(PAX_KEY) as usize));
        fs_err::create_dir_all(&dir).unwrap();
        dir
    }
}
