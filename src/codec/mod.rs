// Copyright (c) 2016-2018 The http-serve developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE.txt or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT.txt or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! One-shot, in-memory codecs. Each takes a contiguous input slice and appends its compressed
//! form to a caller-supplied output buffer, which the caller is expected to reuse across calls.

mod bzip2;
mod deflate;
mod gzip;

pub use self::bzip2::compress as bzip2_compress;
pub use self::deflate::compress as deflate_compress;
pub use self::gzip::compress as gzip_compress;

use crate::error::CompressError;
use crate::negotiate::Encoding;
use std::convert::TryFrom;

/// Bounds enforced before any codec runs: beyond this, `size * 11 / 10` used to pre-size output
/// buffers could wrap, and the bzip2/gzip formats are not attempting to bound memory use above
/// this point anyway.
pub const MAX_SOURCE_SIZE: u64 = 128 * 1024 * 1024;

/// Returns `ceil(input_size * 1.1)`, using integer arithmetic, or `None` on overflow.
pub(crate) fn scaled_by_1_1(input_size: usize) -> Option<usize> {
    input_size.checked_mul(11)?.checked_div(10).map(|v| {
        if v * 10 < input_size * 11 {
            v + 1
        } else {
            v
        }
    })
}

/// Returns true iff `ceil(size * 1.1)` would overflow `usize` on this platform. The pipeline
/// checks this ahead of the codec call so an oversized file is a clean eligibility skip rather
/// than a codec error.
pub(crate) fn would_overflow_scaling(size: u64) -> bool {
    match usize::try_from(size) {
        Ok(size) => scaled_by_1_1(size).is_none(),
        Err(_) => true,
    }
}

/// Compresses `input` with `encoding`, appending the result to `out` (which is cleared first).
/// `mtime` is the source file's modification time, used only by the gzip header.
pub fn compress(
    encoding: Encoding,
    input: &[u8],
    mtime: Option<std::time::SystemTime>,
    out: &mut Vec<u8>,
) -> Result<(), CompressError> {
    out.clear();
    match encoding {
        Encoding::Gzip | Encoding::XGzip => gzip::compress(input, mtime, out),
        Encoding::Deflate => deflate::compress(input, out),
        Encoding::Bzip2 | Encoding::XBzip2 => bzip2::compress(input, out),
        Encoding::Identity => {
            out.extend_from_slice(input);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaling_rounds_up() {
        assert_eq!(scaled_by_1_1(10), Some(11));
        assert_eq!(scaled_by_1_1(100), Some(110));
        assert_eq!(scaled_by_1_1(1), Some(2));
    }

    #[test]
    fn overflow_detected() {
        assert!(!would_overflow_scaling(128 * 1024 * 1024));
        assert!(would_overflow_scaling(u64::MAX));
    }

    #[test]
    fn identity_passthrough() {
        let mut out = Vec::new();
        compress(Encoding::Identity, b"hello", None, &mut out).unwrap();
        assert_eq!(out, b"hello");
    }
}
