// Copyright (c) 2016-2018 The http-serve developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE.txt or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT.txt or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Presents a source file's bytes to a codec.
//!
//! Memory-mapping a file that another process can truncate underneath the mapping is only safe
//! to recover from, without risking undefined behaviour, through OS-specific signal-driven
//! non-local control transfer (`sigsetjmp`/`siglongjmp` in C). That technique has no sound
//! general translation into safe Rust: a signal handler cannot simply "return" past the faulting
//! instruction, and unwinding across stack frames that may hold `Drop` types via a non-local jump
//! is unsound. This module therefore always reads the file into a heap buffer by default, and
//! only maps it (without any fault recovery) when the crate is built with the `mmap-source`
//! feature, which shifts responsibility for avoiding concurrent truncation to the operator.

use crate::codec::MAX_SOURCE_SIZE;
use crate::error::CompressError;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Bytes read from a source file, along with its modification time.
pub struct Source {
    bytes: SourceBytes,
    pub mtime: Option<std::time::SystemTime>,
}

enum SourceBytes {
    Buffer(Vec<u8>),
    #[cfg(feature = "mmap-source")]
    Mapped(memmap2::Mmap),
}

impl Source {
    pub fn as_slice(&self) -> &[u8] {
        match &self.bytes {
            SourceBytes::Buffer(v) => v.as_slice(),
            #[cfg(feature = "mmap-source")]
            SourceBytes::Mapped(m) => &m[..],
        }
    }
}

/// Loads `size` bytes from `file`, failing if `size` exceeds [`MAX_SOURCE_SIZE`] or the file is
/// shorter than expected.
pub fn load(path: &Path, mut file: File, size: u64, mtime: Option<std::time::SystemTime>) -> Result<Source, CompressError> {
    if size > MAX_SOURCE_SIZE {
        return Err(CompressError::Load {
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("source file {} exceeds {} byte ceiling", path.display(), MAX_SOURCE_SIZE),
            ),
        });
    }

    #[cfg(feature = "mmap-source")]
    {
        if size > 0 {
            // SAFETY: the caller accepts the documented risk that a concurrent truncation of
            // `path` while this mapping is alive is undefined behaviour; this feature is opt-in
            // for exactly that reason (see the module doc comment).
            if let Ok(mmap) = unsafe { memmap2::Mmap::map(&file) } {
                if mmap.len() as u64 == size {
                    return Ok(Source {
                        bytes: SourceBytes::Mapped(mmap),
                        mtime,
                    });
                }
            }
        }
    }

    let mut buf = Vec::with_capacity(size as usize);
    file.read_to_end(&mut buf)
        .map_err(|source| CompressError::Load { source })?;
    if buf.len() as u64 != size {
        return Err(CompressError::Load {
            source: std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "short read of {}: expected {} bytes, got {}",
                    path.display(),
                    size,
                    buf.len()
                ),
            ),
        });
    }
    Ok(Source {
        bytes: SourceBytes::Buffer(buf),
        mtime,
    })
}
