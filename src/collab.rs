// Copyright (c) 2016-2018 The http-serve developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE.txt or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT.txt or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Collaborator contracts this crate expects from its host, expressed as traits so a server can
//! substitute its own stat cache, symlink policy, or load sampler. Each trait ships a default
//! implementation usable as-is by a small standalone server.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// What the pipeline needs to know about a file on disk.
#[derive(Clone, Debug)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub size: u64,
    pub mtime: Option<SystemTime>,
    pub etag: String,
    pub content_type: String,
    /// Whether the stat-ed path is a regular file. A `StatCache` may still return `Some` for a
    /// directory or other special file so the pipeline can distinguish "not found" (403) from
    /// "found but ineligible" (skip) per the eligibility gate.
    pub is_file: bool,
}

/// Resolves a physical path to file metadata, an etag, and a content type.
pub trait StatCache {
    fn stat(&self, path: &Path) -> Option<FileDescriptor>;
}

/// A `stat(2)`-backed [`StatCache`] with a small built-in extension-to-MIME table. Real
/// deployments with a richer MIME database should implement [`StatCache`] themselves and delegate
/// to their existing stat/MIME infrastructure; this exists so the crate is useful standalone.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultStatCache;

impl StatCache for DefaultStatCache {
    fn stat(&self, path: &Path) -> Option<FileDescriptor> {
        let meta = std::fs::metadata(path).ok()?;
        let mtime = meta.modified().ok();
        let etag = format!("\"{:x}-{:x}\"", meta.len(), mtime_secs(mtime));
        let content_type = guess_content_type(path).to_string();
        Some(FileDescriptor {
            path: path.to_path_buf(),
            size: meta.len(),
            mtime,
            etag,
            content_type,
            is_file: meta.is_file(),
        })
    }
}

fn mtime_secs(mtime: Option<SystemTime>) -> u64 {
    mtime
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn guess_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("svg") => "image/svg+xml",
        Some("txt") => "text/plain",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}

/// Samples the system's 1-minute load average for admission control.
pub trait LoadAverage {
    fn one_minute(&self) -> f64;
}

/// The POSIX `getloadavg(3)` sample on Unix; returns `0.0` (never throttling) elsewhere.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemLoadAverage;

impl LoadAverage for SystemLoadAverage {
    #[cfg(unix)]
    fn one_minute(&self) -> f64 {
        let mut samples: [f64; 3] = [0.0; 3];
        // SAFETY: `samples` has room for the 3 values getloadavg may write; a negative return
        // means the call failed and no elements were written, which the 0.0 initializer covers.
        let n = unsafe { libc::getloadavg(samples.as_mut_ptr(), samples.len() as i32) };
        if n <= 0 {
            0.0
        } else {
            samples[0]
        }
    }

    #[cfg(not(unix))]
    fn one_minute(&self) -> f64 {
        0.0
    }
}

/// Opens a source file, optionally rejecting paths with a symlink component.
pub trait FdOpener {
    fn open(&self, path: &Path, follow_symlinks: bool) -> io::Result<File>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultFdOpener;

impl FdOpener for DefaultFdOpener {
    fn open(&self, path: &Path, follow_symlinks: bool) -> io::Result<File> {
        if !follow_symlinks {
            let meta = std::fs::symlink_metadata(path)?;
            if meta.file_type().is_symlink() {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "symlinks are not followed by this configuration",
                ));
            }
        }
        File::open(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stat_cache_reports_size_and_type() {
        let mut f = tempfile::Builder::new().suffix(".html").tempfile().unwrap();
        use std::io::Write;
        f.write_all(b"<html></html>").unwrap();
        f.flush().unwrap();
        let fd = DefaultStatCache.stat(f.path()).unwrap();
        assert_eq!(fd.size, 14);
        assert_eq!(fd.content_type, "text/html");
    }

    #[test]
    fn default_fd_opener_rejects_symlink_when_not_following() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.txt");
        std::fs::write(&target, b"x").unwrap();
        let link = dir.path().join("link.txt");
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(&target, &link).unwrap();
            let err = DefaultFdOpener.open(&link, false).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
            assert!(DefaultFdOpener.open(&link, true).is_ok());
        }
    }
}
