// Copyright (c) 2016-2018 The http-serve developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE.txt or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT.txt or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::error::CompressError;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use std::convert::TryFrom;
use std::io::Write;

/// Appends a bzip2 stream for `input` to `out`, using blockSize100k = 9 (the largest block size,
/// matching `bzip2::Compression::best()`).
pub fn compress(input: &[u8], out: &mut Vec<u8>) -> Result<(), CompressError> {
    let estimate = super::scaled_by_1_1(input.len()).ok_or_else(|| CompressError::Codec {
        encoding: "bzip2",
        message: "input too large to size output buffer".into(),
    })?;

    let mut encoder = BzEncoder::new(Vec::with_capacity(estimate + 12), Compression::best());
    encoder.write_all(input).map_err(|e| CompressError::Codec {
        encoding: "bzip2",
        message: e.to_string(),
    })?;
    let body = encoder.finish().map_err(|e| CompressError::Codec {
        encoding: "bzip2",
        message: e.to_string(),
    })?;

    if u32::try_from(body.len()).is_err() {
        return Err(CompressError::Codec {
            encoding: "bzip2",
            message: "compressed output exceeds 32-bit size".into(),
        });
    }

    out.extend_from_slice(&body);
    Ok(())
}
