// Copyright (c) 2016-2018 The http-serve developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE.txt or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT.txt or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The request-time state machine: gate, stat, eligibility, negotiation, conditional GET, and
//! materialisation (on-disk cache or in-memory buffer), in the order a request actually flows
//! through them.

use crate::cache;
use crate::codec;
use crate::collab::{
    DefaultFdOpener, DefaultStatCache, FdOpener, LoadAverage, StatCache, SystemLoadAverage,
};
use crate::config::CompressConfig;
use crate::error::CompressError;
use crate::etag::{self, ConditionalOutcome};
use crate::negotiate::{Encoding, EncodingSet};
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use std::path::{Path, PathBuf};

/// Priority order used to pick among encodings the negotiator and config both accept.
/// `Identity` is deliberately absent: it is tracked only so future policies could prefer it, but
/// this pipeline never selects it as an output encoding.
const PRIORITY: [Encoding; 5] = [
    Encoding::Bzip2,
    Encoding::XBzip2,
    Encoding::Gzip,
    Encoding::XGzip,
    Encoding::Deflate,
];

const MIN_COMPRESSIBLE_SIZE: u64 = 128;

/// The request-side facts this module reads. Everything else (method dispatch, TLS, the
/// downstream static-file handler) is the host's concern.
pub struct CompressRequest<'a> {
    pub method: &'a Method,
    /// The request's URI path, used for the cache key when `physical_path` isn't under
    /// `document_root`.
    pub uri_path: &'a str,
    /// The resolved on-disk path this request would serve, if any.
    pub physical_path: Option<&'a Path>,
    /// The document root `physical_path` is expected to live under, if known.
    pub document_root: Option<&'a Path>,
    pub headers: &'a HeaderMap,
    /// Set by an earlier handler that has already decided the response; when true this module
    /// is a pure no-op (Gate, state 1).
    pub response_already_owned: bool,
}

/// The response-side mutations this module makes. The host applies these to its own response
/// type however it sees fit.
#[derive(Debug, Default)]
pub struct CompressResponse {
    pub headers: HeaderMap,
    /// Set only when the pipeline finishes the request itself (304/403/412).
    pub status: Option<StatusCode>,
    /// Set when a cache hit or a fresh cache write means the downstream static-file handler
    /// should serve a different file than the one originally requested.
    pub rewritten_path: Option<PathBuf>,
    /// Set when the module attaches a compressed body directly, bypassing the on-disk cache.
    pub body: Option<Vec<u8>>,
    /// `ratio = round(cached_size * 100 / source_size)`, recorded for on-disk cache
    /// materialisations per §4.4.
    pub ratio: Option<u32>,
}

impl CompressResponse {
    fn append_vary_accept_encoding(&mut self) {
        self.headers
            .append(header::VARY, HeaderValue::from_static("Accept-Encoding"));
    }
}

/// What the pipeline decided to do with this request.
#[derive(Debug, Eq, PartialEq)]
pub enum PipelineOutcome {
    /// Declined to act; the next handler (typically plain static-file serving) runs unchanged.
    Skip,
    /// The module supplied the final response itself (304, 403, or 412); `status` on
    /// [`CompressResponse`] is set.
    Finished,
    /// `rewritten_path` now points at the compressed representation; the downstream static-file
    /// handler should serve its bytes.
    Rewritten,
    /// `body` now holds the complete compressed representation.
    BufferAttached,
}

/// Ties together the negotiator, conditional-GET handler, cache director, source loader, and
/// codecs into the per-request decision described in §4.1. One instance is meant to be owned by
/// a single worker thread: its reusable output buffer is not synchronized.
pub struct CompressModule {
    config: CompressConfig,
    stat_cache: Box<dyn StatCache + Send>,
    load_average: Box<dyn LoadAverage + Send>,
    fd_opener: Box<dyn FdOpener + Send>,
    follow_symlinks: bool,
    body_buf: Vec<u8>,
}

impl CompressModule {
    pub fn new(config: CompressConfig) -> Self {
        CompressModule {
            config,
            stat_cache: Box::new(DefaultStatCache),
            load_average: Box::new(SystemLoadAverage),
            fd_opener: Box::new(DefaultFdOpener),
            follow_symlinks: true,
            body_buf: Vec::new(),
        }
    }

    pub fn with_stat_cache(mut self, stat_cache: impl StatCache + Send + 'static) -> Self {
        self.stat_cache = Box::new(stat_cache);
        self
    }

    pub fn with_load_average(mut self, load_average: impl LoadAverage + Send + 'static) -> Self {
        self.load_average = Box::new(load_average);
        self
    }

    pub fn with_fd_opener(mut self, fd_opener: impl FdOpener + Send + 'static) -> Self {
        self.fd_opener = Box::new(fd_opener);
        self
    }

    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn config(&self) -> &CompressConfig {
        &self.config
    }

    /// Runs the full pipeline for one request.
    pub fn process(
        &mut self,
        req: &CompressRequest<'_>,
        resp: &mut CompressResponse,
    ) -> Result<PipelineOutcome, CompressError> {
        // 1. Gate.
        if req.response_already_owned {
            log::trace!("compress: response already owned, skip");
            return Ok(PipelineOutcome::Skip);
        }
        if *req.method != Method::GET && *req.method != Method::POST {
            log::trace!("compress: method {} ineligible, skip", req.method);
            return Ok(PipelineOutcome::Skip);
        }
        let physical_path = match req.physical_path {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => {
                log::trace!("compress: no physical path, skip");
                return Ok(PipelineOutcome::Skip);
            }
        };
        if self.config.compressible_types.is_empty() {
            log::trace!("compress: no compressible types configured, skip");
            return Ok(PipelineOutcome::Skip);
        }

        // 2. Stat.
        let fd = match self.stat_cache.stat(physical_path) {
            Some(fd) => fd,
            None => {
                log::debug!("compress: stat of {} failed, 403", physical_path.display());
                resp.status = Some(StatusCode::FORBIDDEN);
                return Ok(PipelineOutcome::Finished);
            }
        };

        // 3. Eligibility.
        if !fd.is_file {
            log::trace!("compress: {} is not a regular file, skip", physical_path.display());
            return Ok(PipelineOutcome::Skip);
        }
        if self.config.max_filesize != 0 && fd.size > self.config.max_filesize {
            log::trace!("compress: {} exceeds max_filesize, skip", physical_path.display());
            return Ok(PipelineOutcome::Skip);
        }
        if fd.size < MIN_COMPRESSIBLE_SIZE {
            log::trace!("compress: {} below minimum compressible size, skip", physical_path.display());
            return Ok(PipelineOutcome::Skip);
        }
        if codec::would_overflow_scaling(fd.size) {
            log::trace!("compress: {} too large to size output buffer, skip", physical_path.display());
            return Ok(PipelineOutcome::Skip);
        }

        // 4. MIME match.
        if !mime_matches(&fd.content_type, &self.config.compressible_types) {
            log::trace!("compress: content type {} not compressible, skip", fd.content_type);
            return Ok(PipelineOutcome::Skip);
        }

        // 5. Vary (appended even if we later skip).
        resp.append_vary_accept_encoding();

        // 6. Read Accept-Encoding.
        let accept_encoding = match req.headers.get(header::ACCEPT_ENCODING) {
            Some(v) => match v.to_str() {
                Ok(s) => s,
                Err(_) => {
                    log::debug!("compress: unparseable Accept-Encoding, skip");
                    return Ok(PipelineOutcome::Skip);
                }
            },
            None => {
                log::trace!("compress: no Accept-Encoding, skip");
                return Ok(PipelineOutcome::Skip);
            }
        };

        // 7. Negotiate.
        let client_set = EncodingSet::from_accept_encoding(accept_encoding);
        let matched = client_set.intersect(self.config.allowed_encodings);
        if matched.is_empty() {
            log::debug!("compress: no encoding overlap for {}, skip", physical_path.display());
            return Ok(PipelineOutcome::Skip);
        }

        // 8. Load.
        if self.config.max_loadavg > 0.0 {
            let load = self.load_average.one_minute();
            if load > self.config.max_loadavg {
                log::debug!("compress: load {} exceeds max_loadavg {}, skip", load, self.config.max_loadavg);
                return Ok(PipelineOutcome::Skip);
            }
        }

        // 9. Open source file.
        let file = match self.fd_opener.open(physical_path, self.follow_symlinks) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("compress: open of {} failed: {}", physical_path.display(), e);
                return Ok(PipelineOutcome::Skip);
            }
        };

        // 10. Conditional GET, base.
        match etag::evaluate(Some(&fd.etag), fd.mtime, req.headers)
            .unwrap_or(ConditionalOutcome::Continue)
        {
            ConditionalOutcome::NotModified => {
                log::trace!("compress: base etag matches If-None-Match, 304");
                finish_conditional(resp, StatusCode::NOT_MODIFIED, &fd, None);
                resp.headers.insert(header::ETAG, header_value(&fd.etag));
                return Ok(PipelineOutcome::Finished);
            }
            ConditionalOutcome::PreconditionFailed => {
                log::trace!("compress: base etag fails If-Match, 412");
                finish_conditional(resp, StatusCode::PRECONDITION_FAILED, &fd, None);
                resp.headers.insert(header::ETAG, header_value(&fd.etag));
                return Ok(PipelineOutcome::Finished);
            }
            ConditionalOutcome::Continue => {}
        }

        // 11. Pick encoding.
        let encoding = match PRIORITY.iter().copied().find(|e| matched.contains(*e)) {
            Some(e) => e,
            None => {
                log::debug!("compress: matched set carries no output encoding, skip");
                return Ok(PipelineOutcome::Skip);
            }
        };
        let tag = encoding.tag();
        let compressed_etag = etag::mutate(&fd.etag, tag);

        // 12. Conditional GET, compressed.
        match etag::evaluate(Some(&compressed_etag), fd.mtime, req.headers)
            .unwrap_or(ConditionalOutcome::Continue)
        {
            ConditionalOutcome::NotModified => {
                log::trace!("compress: compressed etag matches If-None-Match, 304");
                finish_conditional(resp, StatusCode::NOT_MODIFIED, &fd, Some(tag));
                resp.headers.insert(header::ETAG, header_value(&compressed_etag));
                return Ok(PipelineOutcome::Finished);
            }
            ConditionalOutcome::PreconditionFailed => {
                log::trace!("compress: compressed etag fails If-Match, 412");
                finish_conditional(resp, StatusCode::PRECONDITION_FAILED, &fd, Some(tag));
                resp.headers.insert(header::ETAG, header_value(&compressed_etag));
                return Ok(PipelineOutcome::Finished);
            }
            ConditionalOutcome::Continue => {}
        }

        // 13. Materialise. On-disk cache mode requires both a configured cache_dir and a
        // non-empty base ETag (an empty ETag would otherwise produce a cache key ending
        // `-<tag>-`, indistinguishable across unrelated files); fall back to buffer mode when
        // either is missing.
        let outcome = match &self.config.cache_dir {
            Some(cache_dir) if !fd.etag.is_empty() => {
                self.materialise_cached(req, &fd, physical_path, file, encoding, tag, cache_dir, resp)?
            }
            _ => self.materialise_buffered(&fd, physical_path, file, encoding, resp)?,
        };

        if let Some(outcome) = outcome {
            // 14. Emit headers.
            resp.headers.insert(header::CONTENT_ENCODING, header_value(tag));
            resp.headers.insert(header::CONTENT_TYPE, header_value(&fd.content_type));
            if let Some(mtime) = fd.mtime {
                resp.headers.insert(header::LAST_MODIFIED, header_value(&httpdate::fmt_http_date(mtime)));
            }
            resp.headers.insert(header::ETAG, header_value(&compressed_etag));
            Ok(outcome)
        } else {
            Ok(PipelineOutcome::Skip)
        }
    }

    fn materialise_cached(
        &mut self,
        req: &CompressRequest<'_>,
        fd: &crate::collab::FileDescriptor,
        physical_path: &Path,
        file: std::fs::File,
        encoding: Encoding,
        tag: &str,
        cache_dir: &Path,
        resp: &mut CompressResponse,
    ) -> Result<Option<PipelineOutcome>, CompressError> {
        let relpath = relative_path(physical_path, req.document_root, req.uri_path);
        let path = cache::cache_path(cache_dir, &relpath, tag, &fd.etag);

        match cache::lookup(path) {
            cache::Lookup::Hit { path, size } => {
                log::trace!("compress: cache hit {}", path.display());
                resp.ratio = Some(ratio(size, fd.size));
                resp.rewritten_path = Some(path);
                Ok(Some(PipelineOutcome::Rewritten))
            }
            cache::Lookup::InProgress => {
                log::debug!("compress: cache entry for {} in progress elsewhere, skip", physical_path.display());
                Ok(None)
            }
            cache::Lookup::Miss { path } => {
                let writer = match cache::become_writer(path) {
                    Ok(w) => w,
                    Err(CompressError::CacheInProgress { path }) => {
                        log::debug!("compress: lost cache-create race for {}, skip", path.display());
                        return Ok(None);
                    }
                    Err(e) => {
                        log::warn!("compress: creating cache entry failed: {}", e);
                        return Ok(None);
                    }
                };

                match self.compress_source(physical_path, file, fd, encoding) {
                    Ok(()) => match writer.finish(&self.body_buf) {
                        Ok(path) => {
                            let size = self.body_buf.len() as u64;
                            log::trace!("compress: wrote cache entry {}", path.display());
                            resp.ratio = Some(ratio(size, fd.size));
                            resp.rewritten_path = Some(path);
                            Ok(Some(PipelineOutcome::Rewritten))
                        }
                        Err(e) => {
                            log::warn!("compress: {}", e);
                            Ok(None)
                        }
                    },
                    Err(e) => {
                        log::warn!("compress: {}", e);
                        writer.abandon();
                        Ok(None)
                    }
                }
            }
        }
    }

    fn materialise_buffered(
        &mut self,
        fd: &crate::collab::FileDescriptor,
        physical_path: &Path,
        file: std::fs::File,
        encoding: Encoding,
        resp: &mut CompressResponse,
    ) -> Result<Option<PipelineOutcome>, CompressError> {
        match self.compress_source(physical_path, file, fd, encoding) {
            Ok(()) => {
                resp.body = Some(self.body_buf.clone());
                Ok(Some(PipelineOutcome::BufferAttached))
            }
            Err(e) => {
                log::warn!("compress: {}", e);
                Ok(None)
            }
        }
    }

    fn compress_source(
        &mut self,
        physical_path: &Path,
        file: std::fs::File,
        fd: &crate::collab::FileDescriptor,
        encoding: Encoding,
    ) -> Result<(), CompressError> {
        let source = crate::source::load(physical_path, file, fd.size, fd.mtime)?;
        codec::compress(encoding, source.as_slice(), source.mtime, &mut self.body_buf)
    }
}

fn finish_conditional(
    resp: &mut CompressResponse,
    status: StatusCode,
    fd: &crate::collab::FileDescriptor,
    content_encoding_tag: Option<&str>,
) {
    resp.status = Some(status);
    resp.headers.insert(header::CONTENT_TYPE, header_value(&fd.content_type));
    if let Some(mtime) = fd.mtime {
        resp.headers.insert(header::LAST_MODIFIED, header_value(&httpdate::fmt_http_date(mtime)));
    }
    if let Some(tag) = content_encoding_tag {
        resp.headers.insert(header::CONTENT_ENCODING, header_value(tag));
    }
}

fn header_value(s: &str) -> HeaderValue {
    HeaderValue::from_str(s).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// `relpath` for the cache key: the physical path with the document-root prefix stripped, or the
/// request URI path if the physical path isn't under the document root.
fn relative_path(physical_path: &Path, document_root: Option<&Path>, uri_path: &str) -> String {
    if let Some(root) = document_root {
        if let Ok(rel) = physical_path.strip_prefix(root) {
            return rel.to_string_lossy().into_owned();
        }
    }
    uri_path.to_string()
}

fn ratio(compressed_size: u64, source_size: u64) -> u32 {
    if source_size == 0 {
        return 0;
    }
    (((compressed_size * 200) + source_size) / (source_size * 2)) as u32
}

/// Matches a content type against the configured compressible set. If `content_type` carries a
/// `;` parameter, both the full string and the truncated `type/subtype` are checked.
fn mime_matches(content_type: &str, compressible_types: &[String]) -> bool {
    if compressible_types.iter().any(|t| t == content_type) {
        return true;
    }
    if let Some(idx) = content_type.find(';') {
        let truncated = content_type[..idx].trim();
        return compressible_types.iter().any(|t| t == truncated);
    }
    false
}
