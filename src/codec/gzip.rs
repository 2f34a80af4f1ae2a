// Copyright (c) 2016-2018 The http-serve developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE.txt or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT.txt or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::error::CompressError;
use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};
use std::convert::TryFrom;
use std::io::Write;
use std::time::SystemTime;

const GZIP_HEADER_LEN: usize = 10;
const GZIP_TRAILER_LEN: usize = 8;

/// Appends a complete RFC 1952 gzip stream for `input` to `out`.
///
/// The trailer CRC is the RFC 1952 / ISO 3309 CRC32 (the same one used by zip and PNG), produced
/// by [`flate2::Crc`]. Earlier revisions of this kind of module are known to have used a CRC32C
/// (Castagnoli) trailer by mistake; that is non-conformant and not reproduced here.
pub fn compress(
    input: &[u8],
    mtime: Option<SystemTime>,
    out: &mut Vec<u8>,
) -> Result<(), CompressError> {
    let estimate = super::scaled_by_1_1(input.len()).ok_or_else(|| CompressError::Codec {
        encoding: "gzip",
        message: "input too large to size output buffer".into(),
    })?;
    out.reserve(estimate + GZIP_HEADER_LEN + GZIP_TRAILER_LEN);

    write_header(input.len(), mtime, out);

    let mut encoder = DeflateEncoder::new(Vec::with_capacity(estimate), Compression::default());
    encoder.write_all(input).map_err(|e| CompressError::Codec {
        encoding: "gzip",
        message: e.to_string(),
    })?;
    let body = encoder.finish().map_err(|e| CompressError::Codec {
        encoding: "gzip",
        message: e.to_string(),
    })?;
    out.extend_from_slice(&body);

    let mut crc = Crc::new();
    crc.update(input);
    out.extend_from_slice(&crc.sum().to_le_bytes());
    out.extend_from_slice(&(input.len() as u32).to_le_bytes());

    Ok(())
}

fn write_header(_input_len: usize, mtime: Option<SystemTime>, out: &mut Vec<u8>) {
    out.extend_from_slice(&[0x1f, 0x8b, 0x08, 0x00]);
    let mtime32 = mtime
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .and_then(|d| u32::try_from(d.as_secs()).ok())
        .unwrap_or(0);
    out.extend_from_slice(&mtime32.to_le_bytes());
    out.extend_from_slice(&[0x00, 0x03]); // extra flags, OS = Unix
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn header_bytes() {
        let mut out = Vec::new();
        compress(b"hello world", None, &mut out).unwrap();
        assert_eq!(&out[0..4], &[0x1f, 0x8b, 0x08, 0x00]);
        assert_eq!(&out[8..10], &[0x00, 0x03]);
    }

    #[test]
    fn round_trips() {
        let input = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let mut out = Vec::new();
        compress(&input, None, &mut out).unwrap();

        let mut decoder = flate2::read::GzDecoder::new(&out[..]);
        let mut roundtripped = Vec::new();
        decoder.read_to_end(&mut roundtripped).unwrap();
        assert_eq!(roundtripped, input);
    }

    #[test]
    fn mtime_truncated_to_zero_when_out_of_range() {
        let far_future = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1 << 40);
        let mut out = Vec::new();
        compress(b"x", Some(far_future), &mut out).unwrap();
        assert_eq!(&out[4..8], &[0, 0, 0, 0]);
    }
}
