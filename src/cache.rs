// Copyright (c) 2016-2018 The http-serve developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE.txt or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT.txt or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The on-disk compressed-body cache.
//!
//! The cache path itself is the only coordination primitive between workers: exclusive create
//! (`O_CREAT|O_EXCL`) grants single-writer status, and a zero-size file is the "in progress"
//! marker a loser of the race (or a fresh reader who arrived mid-write) recognizes and skips.

use crate::error::CompressError;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Result of probing the cache for a given key.
pub enum Lookup {
    /// A complete entry exists; `size` is its byte length (used for the ratio calculation).
    Hit { path: PathBuf, size: u64 },
    /// A zero-size entry exists: another worker currently owns writing it.
    InProgress,
    /// No entry exists; the caller may attempt to become the writer.
    Miss { path: PathBuf },
}

/// Computes the cache key path: `<cache_dir>/<relpath>-<encoding_tag>-<base_etag>`.
///
/// `base_etag` is stripped of surrounding quotes and any `W/` weak marker so the path stays a
/// plain, filesystem-safe string.
pub fn cache_path(cache_dir: &Path, relpath: &str, encoding_tag: &str, base_etag: &str) -> PathBuf {
    let relpath = relpath.trim_start_matches('/');
    let etag = base_etag
        .trim_start_matches("W/")
        .trim_matches('"');
    cache_dir.join(format!("{}-{}-{}", relpath, encoding_tag, etag))
}

/// Probes the cache for `path`, distinguishing hit / in-progress / miss.
pub fn lookup(path: PathBuf) -> Lookup {
    match std::fs::metadata(&path) {
        Ok(meta) if meta.len() > 0 => Lookup::Hit { size: meta.len(), path },
        Ok(_) => Lookup::InProgress,
        Err(_) => Lookup::Miss { path },
    }
}

/// A single-writer handle on a cache entry, obtained by [`become_writer`]. Dropping it without
/// calling [`Writer::finish`] leaves a zero-size in-progress marker behind for the next reader to
/// treat as [`Lookup::InProgress`] until the process that created it finishes or is restarted;
/// callers MUST call [`Writer::finish`] or [`Writer::abandon`] to uphold invariant I2.
pub struct Writer {
    path: PathBuf,
    file: File,
}

/// Attempts to become the exclusive writer for `path`. Parent directories are created with mode
/// 0700 first (ignoring "already exists"). Returns `Err(CacheInProgress)` if the file already
/// exists (another worker raced us here), matching the source's single-writer protocol.
pub fn become_writer(path: PathBuf) -> Result<Writer, CompressError> {
    if let Some(parent) = path.parent() {
        create_dir_0700(parent).map_err(|source| CompressError::CacheCreate {
            path: path.clone(),
            source,
        })?;
    }

    let file = open_exclusive_0600(&path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::AlreadyExists {
            CompressError::CacheInProgress { path: path.clone() }
        } else {
            CompressError::CacheCreate {
                path: path.clone(),
                source,
            }
        }
    })?;

    Ok(Writer { path, file })
}

impl Writer {
    /// Writes `body` to the cache file and closes it, leaving a complete, nonzero-size entry
    /// behind. On any failure, unlinks the partial file before returning.
    pub fn finish(mut self, body: &[u8]) -> Result<PathBuf, CompressError> {
        let result = self
            .file
            .write_all(body)
            .and_then(|()| self.file.flush());
        match result {
            Ok(()) => Ok(self.path),
            Err(source) => {
                let _ = std::fs::remove_file(&self.path);
                Err(CompressError::CacheWrite {
                    path: self.path,
                    source,
                })
            }
        }
    }

    /// Unlinks the in-progress marker without writing a body, e.g. when loading or compressing
    /// the source failed after we'd already claimed the cache slot.
    pub fn abandon(self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
fn create_dir_0700(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true).mode(0o700);
    match builder.create(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn create_dir_0700(dir: &Path) -> std::io::Result<()> {
    match std::fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn open_exclusive_0600(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_exclusive_0600(path: &Path) -> std::io::Result<File> {
    std::fs::OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_path_strips_quotes_and_weak_marker() {
        let dir = Path::new("/cache");
        let p = cache_path(dir, "/a/b.txt", "gzip", "W/\"abc\"");
        assert_eq!(p, Path::new("/cache/a/b.txt-gzip-abc"));
    }

    #[test]
    fn miss_then_write_then_hit() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sub/dir/entry-gzip-abc");

        assert!(matches!(lookup(path.clone()), Lookup::Miss { .. }));

        let writer = become_writer(path.clone()).unwrap();
        writer.finish(b"compressed bytes").unwrap();

        match lookup(path.clone()) {
            Lookup::Hit { size, .. } => assert_eq!(size, 17),
            _ => panic!("expected hit"),
        }
    }

    #[test]
    fn second_writer_sees_in_progress() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("entry-gzip-abc");

        let _writer = become_writer(path.clone()).unwrap();
        assert!(matches!(lookup(path.clone()), Lookup::InProgress));

        let err = become_writer(path).unwrap_err();
        assert!(matches!(err, CompressError::CacheInProgress { .. }));
    }

    #[test]
    fn failed_write_unlinks_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("entry-gzip-abc");
        let writer = become_writer(path.clone()).unwrap();
        writer.abandon();
        assert!(!path.exists());
    }
}
