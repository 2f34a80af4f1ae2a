// Copyright (c) 2016-2018 The http-serve developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE.txt or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT.txt or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Benchmarks of the one-shot codec layer against a representative text payload, independent of
//! any particular HTTP server's request machinery.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use http_compress::{CompressModule, CompressRequest, CompressResponse, RawCompressConfig};
use std::io::Write;

static SAMPLE: &[u8] = include_bytes!("sample.txt");

fn bench_pipeline(c: &mut Criterion) {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(SAMPLE).unwrap();
    f.flush().unwrap();

    let mut group = c.benchmark_group("compress_pipeline");
    group.throughput(Throughput::Bytes(SAMPLE.len() as u64));

    for accept in ["gzip", "deflate", "bzip2"] {
        group.bench_function(accept, |b| {
            let config = RawCompressConfig {
                filetype: vec!["text/plain".to_string()],
                ..Default::default()
            }
            .finish()
            .unwrap();
            let mut module = CompressModule::new(config);
            let mut headers = http::HeaderMap::new();
            headers.insert(
                http::header::ACCEPT_ENCODING,
                http::HeaderValue::from_str(accept).unwrap(),
            );
            let req = CompressRequest {
                method: &http::Method::GET,
                uri_path: "/sample.txt",
                physical_path: Some(f.path()),
                document_root: None,
                headers: &headers,
                response_already_owned: false,
            };
            b.iter(|| {
                let mut resp = CompressResponse::default();
                black_box(module.process(&req, &mut resp).unwrap());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
