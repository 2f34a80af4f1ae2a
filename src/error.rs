// Copyright (c) 2016-2018 The http-serve developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE.txt or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT.txt or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::path::PathBuf;

/// Failure kinds [`crate::CompressModule::process`] can report.
///
/// Every variant here corresponds to a row of the error-disposition table: the pipeline itself
/// decides whether a given error means "skip to the next handler" or "this request is finished",
/// but callers that want to distinguish *why* can match on this enum rather than on a message.
#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    #[error("cache directory {path:?} is not usable: {source}")]
    ConfigInvalid {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stat of {path:?} failed: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("open of {path:?} failed: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reading source bytes failed: {source}")]
    Load {
        #[source]
        source: std::io::Error,
    },

    #[error("{encoding} codec failed: {message}")]
    Codec {
        encoding: &'static str,
        message: String,
    },

    #[error("cache entry {path:?} is owned by another worker")]
    CacheInProgress { path: PathBuf },

    #[error("creating cache entry {path:?} failed: {source}")]
    CacheCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("writing cache entry {path:?} failed: {source}")]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CompressError>;
