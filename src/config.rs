// Copyright (c) 2016-2018 The http-serve developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE.txt or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT.txt or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Configuration surface: `compress.*` directives, `serde`-deserializable so a host server can
//! load them from whatever file format it prefers, validated once at startup via [`RawCompressConfig::finish`].

use crate::error::CompressError;
use crate::negotiate::EncodingSet;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// The directives as they come off the wire (a config file, environment, etc.), before validation.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawCompressConfig {
    /// `compress.filetype`
    pub filetype: Vec<String>,
    /// `compress.allowed-encodings`
    pub allowed_encodings: Vec<String>,
    /// `compress.cache-dir`; empty means buffer-only mode (no on-disk cache).
    pub cache_dir: Option<PathBuf>,
    /// `compress.max-filesize`, in KiB; 0 means unlimited.
    pub max_filesize_kb: u32,
    /// `compress.max-loadavg`, parsed from a string in the original config surface; 0 disables
    /// load-based admission control.
    pub max_loadavg: f64,
}

/// The validated, immutable configuration used at merge/request time.
#[derive(Clone, Debug)]
pub struct CompressConfig {
    pub compressible_types: Vec<String>,
    pub allowed_encodings: EncodingSet,
    pub cache_dir: Option<PathBuf>,
    pub max_filesize: u64,
    pub max_loadavg: f64,
}

impl RawCompressConfig {
    /// Validates and normalises the raw directives. This is the only place a `ConfigInvalid`
    /// error can originate: once it returns `Ok`, every subsequent per-request use of the
    /// resulting [`CompressConfig`] is infallible with respect to configuration.
    pub fn finish(self) -> Result<CompressConfig, CompressError> {
        let cache_dir = match self.cache_dir {
            Some(dir) => {
                ensure_cache_dir(&dir)?;
                Some(dir)
            }
            None => None,
        };

        let allowed_encodings = if self.allowed_encodings.is_empty() {
            EncodingSet::all_compiled_in()
        } else {
            EncodingSet::from_config_tokens(self.allowed_encodings.iter().map(String::as_str))
        };

        Ok(CompressConfig {
            compressible_types: self.filetype,
            allowed_encodings,
            cache_dir,
            max_filesize: u64::from(self.max_filesize_kb) << 10,
            max_loadavg: self.max_loadavg,
        })
    }
}

impl CompressConfig {
    /// Merges a more specific scope's raw directives on top of `self`, the way a server-level
    /// `compress.*` block is overridden by a per-directory one: an empty/zero field in `over`
    /// means "inherit the broader scope", a non-empty one means "replace it". Validation is
    /// re-run for any field `over` actually sets (e.g. a directory-level `cache-dir`), matching
    /// the startup-fatal contract of [`RawCompressConfig::finish`].
    pub fn merge(&self, over: &RawCompressConfig) -> Result<CompressConfig, CompressError> {
        let compressible_types = if over.filetype.is_empty() {
            self.compressible_types.clone()
        } else {
            over.filetype.clone()
        };

        let allowed_encodings = if over.allowed_encodings.is_empty() {
            self.allowed_encodings
        } else {
            EncodingSet::from_config_tokens(over.allowed_encodings.iter().map(String::as_str))
        };

        let cache_dir = match &over.cache_dir {
            Some(dir) => {
                ensure_cache_dir(dir)?;
                Some(dir.clone())
            }
            None => self.cache_dir.clone(),
        };

        let max_filesize = if over.max_filesize_kb > 0 {
            u64::from(over.max_filesize_kb) << 10
        } else {
            self.max_filesize
        };

        let max_loadavg = if over.max_loadavg != 0.0 {
            over.max_loadavg
        } else {
            self.max_loadavg
        };

        Ok(CompressConfig {
            compressible_types,
            allowed_encodings,
            cache_dir,
            max_filesize,
            max_loadavg,
        })
    }
}

/// Creates `dir` (and its parents) with mode 0700 if it doesn't exist, then confirms it is
/// stat-able. Mirrors the "config load fails if stat fails" contract: an unusable cache
/// directory is a startup-time error, never a per-request one.
fn ensure_cache_dir(dir: &Path) -> Result<(), CompressError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true).mode(0o700);
        if let Err(source) = builder.create(dir) {
            if source.kind() != std::io::ErrorKind::AlreadyExists {
                return Err(CompressError::ConfigInvalid {
                    path: dir.to_path_buf(),
                    source,
                });
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(source) = std::fs::create_dir_all(dir) {
            if source.kind() != std::io::ErrorKind::AlreadyExists {
                return Err(CompressError::ConfigInvalid {
                    path: dir.to_path_buf(),
                    source,
                });
            }
        }
    }

    std::fs::metadata(dir).map_err(|source| CompressError::ConfigInvalid {
        path: dir.to_path_buf(),
        source,
    })?;
    Ok(())
}
