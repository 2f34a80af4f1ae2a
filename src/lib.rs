// Copyright (c) 2016-2018 The http-serve developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE.txt or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT.txt or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Content-negotiated response compression for static-file HTTP/1.x serving.
//!
//! For an eligible static-file response this crate picks a content encoding the client accepts
//! (gzip, raw deflate, or bzip2), compresses the file's bytes, and either attaches the result
//! directly to the response or materialises it into a persistent on-disk cache so later requests
//! reuse the work. It also negotiates `ETag`/`If-None-Match` per encoding and maintains the
//! `Vary: Accept-Encoding` contract.
//!
//! The crate does not dispatch requests, parse a host server's own configuration format, or
//! serve the compressed bytes itself — those are collaborator concerns (see [`collab`]). What it
//! owns is the decision of *whether* and *how* to compress, described end to end in
//! [`pipeline::CompressModule::process`].
//!
//! # Example
//!
//! ```no_run
//! use http_compress::{CompressModule, CompressRequest, CompressResponse, RawCompressConfig};
//!
//! let config = RawCompressConfig {
//!     filetype: vec!["text/plain".to_string(), "text/html".to_string()],
//!     cache_dir: Some("/var/cache/compress".into()),
//!     ..Default::default()
//! }
//! .finish()
//! .expect("cache dir must be usable");
//!
//! let mut module = CompressModule::new(config);
//!
//! // Per request, constructed from whatever the host server already knows:
//! # let method = http::Method::GET;
//! # let headers = http::HeaderMap::new();
//! let req = CompressRequest {
//!     method: &method,
//!     uri_path: "/index.html",
//!     physical_path: Some("/var/www/index.html".as_ref()),
//!     document_root: Some("/var/www".as_ref()),
//!     headers: &headers,
//!     response_already_owned: false,
//! };
//! let mut resp = CompressResponse::default();
//! module.process(&req, &mut resp).expect("stat/codec failures are reported, not panics");
//! ```

mod cache;
mod codec;
mod collab;
mod config;
mod error;
mod etag;
mod negotiate;
mod pipeline;
mod source;

pub use crate::collab::{
    DefaultFdOpener, DefaultStatCache, FdOpener, FileDescriptor, LoadAverage, StatCache,
    SystemLoadAverage,
};
pub use crate::config::{CompressConfig, RawCompressConfig};
pub use crate::error::{CompressError, Result};
pub use crate::etag::ConditionalOutcome;
pub use crate::negotiate::{Encoding, EncodingSet};
pub use crate::pipeline::{CompressModule, CompressRequest, CompressResponse, PipelineOutcome};
