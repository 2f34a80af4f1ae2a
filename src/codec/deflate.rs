// Copyright (c) 2016-2018 The http-serve developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE.txt or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT.txt or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::error::CompressError;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::Write;

/// Appends a raw deflate stream (no zlib or gzip framing) for `input` to `out`.
pub fn compress(input: &[u8], out: &mut Vec<u8>) -> Result<(), CompressError> {
    let estimate = super::scaled_by_1_1(input.len()).ok_or_else(|| CompressError::Codec {
        encoding: "deflate",
        message: "input too large to size output buffer".into(),
    })?;

    let mut encoder = DeflateEncoder::new(
        Vec::with_capacity(estimate + 12),
        Compression::default(),
    );
    encoder.write_all(input).map_err(|e| CompressError::Codec {
        encoding: "deflate",
        message: e.to_string(),
    })?;
    let body = encoder.finish().map_err(|e| CompressError::Codec {
        encoding: "deflate",
        message: e.to_string(),
    })?;
    out.extend_from_slice(&body);
    Ok(())
}
