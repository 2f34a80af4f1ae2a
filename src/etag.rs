// Copyright (c) 2016-2018 The http-serve developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE.txt or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT.txt or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! ETag mutation and conditional-GET evaluation.

use http::header::{self, HeaderMap, HeaderValue};
use httpdate::parse_http_date;
use std::time::SystemTime;

/// Appends `-<suffix>` to the interior of a (possibly weak) quoted etag, per the rule that a
/// compressed representation's etag is `<base>-<encoding_tag>`.
///
/// `"abc"` + `gzip` -> `"abc-gzip"`; `W/"abc"` + `gzip` -> `W/"abc-gzip"`.
pub fn mutate(base: &str, suffix: &str) -> String {
    match base.rfind('"') {
        Some(idx) => {
            let mut out = String::with_capacity(base.len() + suffix.len() + 1);
            out.push_str(&base[..idx]);
            out.push('-');
            out.push_str(suffix);
            out.push('"');
            out
        }
        None => format!("{}-{}", base, suffix),
    }
}

/// Returns the etag's "opaque-tag" payload, stripping a leading `W/` and surrounding quotes.
fn opaque(tag: &str) -> &str {
    let tag = tag.strip_prefix("W/").unwrap_or(tag);
    tag.trim_matches('"')
}

/// Strong comparison per RFC 7232 section 2.3.2: weak tags never match, even each other.
fn strong_eq(a: &str, b: &str) -> bool {
    !a.starts_with("W/") && !b.starts_with("W/") && opaque(a) == opaque(b)
}

/// Weak comparison: opaque payloads equal regardless of weak/strong markers.
fn weak_eq(a: &str, b: &str) -> bool {
    opaque(a) == opaque(b)
}

fn header_etags(value: &HeaderValue) -> impl Iterator<Item = &str> {
    value
        .to_str()
        .unwrap_or("")
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

/// Evaluates `If-Match` against `etag`: true if no `If-Match` header is present, or if it's `*`,
/// or if any listed tag strongly matches.
fn if_match_satisfied(etag: Option<&str>, req_hdrs: &HeaderMap) -> bool {
    let header = match req_hdrs.get(header::IF_MATCH) {
        None => return true,
        Some(h) => h,
    };
    if header.as_bytes() == b"*" {
        return etag.is_some();
    }
    let etag = match etag {
        None => return false,
        Some(e) => e,
    };
    header_etags(header).any(|candidate| strong_eq(candidate, etag))
}

/// Evaluates `If-None-Match` against `etag`: true if a listed tag (weakly) matches, or the header
/// is `*` and an etag exists.
fn if_none_match_hit(etag: Option<&str>, req_hdrs: &HeaderMap) -> bool {
    let header = match req_hdrs.get(header::IF_NONE_MATCH) {
        None => return false,
        Some(h) => h,
    };
    if header.as_bytes() == b"*" {
        return etag.is_some();
    }
    let etag = match etag {
        None => return false,
        Some(e) => e,
    };
    header_etags(header).any(|candidate| weak_eq(candidate, etag))
}

/// Outcome of evaluating a conditional-GET request against an (etag, last-modified) pair.
#[derive(Debug, Eq, PartialEq)]
pub enum ConditionalOutcome {
    /// Neither precondition matched; proceed with the normal response.
    Continue,
    /// `If-None-Match` or `If-Modified-Since` matched: respond `304 Not Modified`.
    NotModified,
    /// `If-Match` or `If-Unmodified-Since` failed: respond `412 Precondition Failed`.
    PreconditionFailed,
}

/// Evaluates conditional-GET headers against `etag`/`last_modified`, following RFC 7232's
/// precedence: `If-Match`/`If-Unmodified-Since` are checked first (a failure is always
/// `412`, overriding a `304` that `If-None-Match`/`If-Modified-Since` might otherwise produce).
pub fn evaluate(
    etag: Option<&str>,
    last_modified: Option<SystemTime>,
    req_hdrs: &HeaderMap,
) -> Result<ConditionalOutcome, &'static str> {
    if !if_match_satisfied(etag, req_hdrs) {
        return Ok(ConditionalOutcome::PreconditionFailed);
    }
    if let (Some(m), Some(since)) = (last_modified, req_hdrs.get(header::IF_UNMODIFIED_SINCE)) {
        let since = parse_http_date(since.to_str().map_err(|_| "unparseable If-Unmodified-Since")?)
            .map_err(|_| "unparseable If-Unmodified-Since")?;
        if m > since {
            return Ok(ConditionalOutcome::PreconditionFailed);
        }
    }

    if if_none_match_hit(etag, req_hdrs) {
        return Ok(ConditionalOutcome::NotModified);
    }
    if req_hdrs.get(header::IF_NONE_MATCH).is_none() {
        if let (Some(m), Some(since)) = (last_modified, req_hdrs.get(header::IF_MODIFIED_SINCE)) {
            let since = parse_http_date(since.to_str().map_err(|_| "unparseable If-Modified-Since")?)
                .map_err(|_| "unparseable If-Modified-Since")?;
            if m <= since {
                return Ok(ConditionalOutcome::NotModified);
            }
        }
    }

    Ok(ConditionalOutcome::Continue)
}
