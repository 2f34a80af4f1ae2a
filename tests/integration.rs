// Copyright (c) 2016-2018 The http-serve developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE.txt or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT.txt or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! End-to-end scenarios against the public API, exercised the way a host server would: build a
//! `CompressConfig`, drive `CompressModule::process` with a `CompressRequest`, and inspect the
//! resulting `CompressResponse`.

use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use http_compress::{CompressModule, CompressRequest, CompressResponse, PipelineOutcome, RawCompressConfig};
use once_cell::sync::Lazy;
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::Barrier;

static INIT_LOGGER: Lazy<()> = Lazy::new(|| {
    let _ = env_logger::builder().is_test(true).try_init();
});

fn init() {
    Lazy::force(&INIT_LOGGER);
}

fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
    let mut h = HeaderMap::new();
    for (name, value) in pairs {
        h.insert(name.clone(), HeaderValue::from_str(value).unwrap());
    }
    h
}

/// Scenario 1: gzip hit with the exact header bytes a conforming decoder (and the test's own
/// gzip crate) agree on, gunzipping back to the original bytes.
#[test]
fn gzip_hit_round_trips() {
    init();
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(&b"A".repeat(1024)).unwrap();
    f.flush().unwrap();

    let config = RawCompressConfig {
        filetype: vec!["text/plain".into()],
        ..Default::default()
    }
    .finish()
    .unwrap();
    let mut module = CompressModule::new(config);

    let req = CompressRequest {
        method: &Method::GET,
        uri_path: "/hello.txt",
        physical_path: Some(f.path()),
        document_root: None,
        headers: &headers(&[(header::ACCEPT_ENCODING, "gzip")]),
        response_already_owned: false,
    };
    let mut resp = CompressResponse::default();
    let outcome = module.process(&req, &mut resp).unwrap();
    assert_eq!(outcome, PipelineOutcome::BufferAttached);

    let body = resp.body.unwrap();
    assert_eq!(&body[0..3], &[0x1f, 0x8b, 0x08]);

    let mut decoder = flate2::read::GzDecoder::new(&body[..]);
    let mut roundtripped = Vec::new();
    decoder.read_to_end(&mut roundtripped).unwrap();
    assert_eq!(roundtripped, b"A".repeat(1024));
}

/// Scenario 5: two concurrent requests racing to populate the same cache entry. Exactly one
/// becomes the writer and leaves a nonzero-size file behind; the other observes the race and
/// skips, leaving no zero-size leftovers once both have finished.
#[test]
fn single_writer_race_leaves_no_partial_entries() {
    init();
    let tmp = tempfile::tempdir().unwrap();
    let cache_dir = tmp.path().join("cache");

    let mut source = tempfile::NamedTempFile::new().unwrap();
    source.write_all(&b"B".repeat(8192)).unwrap();
    source.flush().unwrap();
    let source_path = source.into_temp_path();

    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for _ in 0..2 {
        let cache_dir = cache_dir.clone();
        let source_path = source_path.to_path_buf();
        let barrier = barrier.clone();
        handles.push(std::thread::spawn(move || {
            let config = RawCompressConfig {
                filetype: vec!["text/plain".into()],
                cache_dir: Some(cache_dir),
                ..Default::default()
            }
            .finish()
            .unwrap();
            let mut module = CompressModule::new(config);
            let req_headers = headers(&[(header::ACCEPT_ENCODING, "gzip")]);
            let req = CompressRequest {
                method: &Method::GET,
                uri_path: "/race.txt",
                physical_path: Some(source_path.as_path()),
                document_root: None,
                headers: &req_headers,
                response_already_owned: false,
            };
            let mut resp = CompressResponse::default();
            barrier.wait();
            let outcome = module.process(&req, &mut resp).unwrap();
            (outcome, resp.rewritten_path)
        }));
    }

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let rewrites = results
        .iter()
        .filter(|(o, _)| *o == PipelineOutcome::Rewritten)
        .count();
    assert!(rewrites >= 1, "at least one racer must materialise the cache entry");

    // Whatever is left on disk must be either absent or a complete, nonzero-size entry; no
    // zero-size in-progress markers may survive once every racer has returned.
    if cache_dir.is_dir() {
        for entry in walk(&cache_dir) {
            let meta = std::fs::metadata(&entry).unwrap();
            assert!(meta.len() > 0, "leftover in-progress entry at {:?}", entry);
        }
    }
}

fn walk(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let path = entry.path();
        if path.is_dir() {
            out.extend(walk(&path));
        } else {
            out.push(path);
        }
    }
    out
}

/// Scenario 6: a file just under the minimum compressible size is skipped, not served gzipped.
#[test]
fn file_below_minimum_size_is_skipped() {
    init();
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(&b"C".repeat(127)).unwrap();
    f.flush().unwrap();

    let config = RawCompressConfig {
        filetype: vec!["text/plain".into()],
        ..Default::default()
    }
    .finish()
    .unwrap();
    let mut module = CompressModule::new(config);
    let req = CompressRequest {
        method: &Method::GET,
        uri_path: "/tiny.txt",
        physical_path: Some(f.path()),
        document_root: None,
        headers: &headers(&[(header::ACCEPT_ENCODING, "gzip")]),
        response_already_owned: false,
    };
    let mut resp = CompressResponse::default();
    let outcome = module.process(&req, &mut resp).unwrap();
    assert_eq!(outcome, PipelineOutcome::Skip);
    assert!(resp.body.is_none());
}

/// A stat failure (file unexpectedly absent) is a 403, not a silent skip.
#[test]
fn missing_file_is_403() {
    init();
    let config = RawCompressConfig {
        filetype: vec!["text/plain".into()],
        ..Default::default()
    }
    .finish()
    .unwrap();
    let mut module = CompressModule::new(config);
    let req = CompressRequest {
        method: &Method::GET,
        uri_path: "/nope.txt",
        physical_path: Some(std::path::Path::new("/nonexistent/path/nope.txt")),
        document_root: None,
        headers: &headers(&[(header::ACCEPT_ENCODING, "gzip")]),
        response_already_owned: false,
    };
    let mut resp = CompressResponse::default();
    let outcome = module.process(&req, &mut resp).unwrap();
    assert_eq!(outcome, PipelineOutcome::Finished);
    assert_eq!(resp.status, Some(StatusCode::FORBIDDEN));
}
