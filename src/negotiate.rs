// Copyright (c) 2016-2018 The http-serve developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE.txt or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT.txt or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Content-coding negotiation.
//!
//! Unlike [RFC 7231 section 5.3.4](https://tools.ietf.org/html/rfc7231#section-5.3.4), this
//! module does not interpret `q` values: a coding present in `Accept-Encoding` is acceptable
//! regardless of its quality, including `q=0`. This is a deliberate simplification; hosts that
//! need full q-value semantics should negotiate elsewhere before reaching this module.

use std::fmt;

/// A content-coding this module knows how to produce, plus `Identity` so the negotiator can track
/// that the client also declared acceptance of an uncompressed body.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Encoding {
    Identity,
    Gzip,
    XGzip,
    Deflate,
    Bzip2,
    XBzip2,
}

impl Encoding {
    const ALL: [Encoding; 6] = [
        Encoding::Identity,
        Encoding::Gzip,
        Encoding::XGzip,
        Encoding::Deflate,
        Encoding::Bzip2,
        Encoding::XBzip2,
    ];

    fn token(self) -> &'static str {
        match self {
            Encoding::Identity => "identity",
            Encoding::Gzip => "gzip",
            Encoding::XGzip => "x-gzip",
            Encoding::Deflate => "deflate",
            Encoding::Bzip2 => "bzip2",
            Encoding::XBzip2 => "x-bzip2",
        }
    }

    /// The cache-key / `Content-Encoding` tag for this coding. `x-gzip` and `x-bzip2` collapse to
    /// their canonical form's tag as required by the cache key rules.
    pub fn tag(self) -> &'static str {
        match self {
            Encoding::Identity => "identity",
            Encoding::Gzip | Encoding::XGzip => "gzip",
            Encoding::Deflate => "deflate",
            Encoding::Bzip2 | Encoding::XBzip2 => "bzip2",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Encoding::Identity => 1 << 0,
            Encoding::Gzip => 1 << 1,
            Encoding::XGzip => 1 << 2,
            Encoding::Deflate => 1 << 3,
            Encoding::Bzip2 => 1 << 4,
            Encoding::XBzip2 => 1 << 5,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A set of [`Encoding`]s, cheap to copy and intersect.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EncodingSet(u8);

impl EncodingSet {
    pub const EMPTY: EncodingSet = EncodingSet(0);

    /// The set of encodings this crate can actually produce: `gzip`, `x-gzip`, `deflate`,
    /// `bzip2`, `x-bzip2`. `Identity` is deliberately excluded here — it is tracked through
    /// negotiation only so future policies could prefer it, never selected as an output encoding,
    /// so an `Accept-Encoding: identity`-only request must fail to match at the negotiation gate
    /// rather than proceed as if a real coding were configured.
    pub fn all_compiled_in() -> EncodingSet {
        Encoding::ALL
            .iter()
            .filter(|&&e| e != Encoding::Identity)
            .fold(EncodingSet::EMPTY, |s, &e| s.with(e))
    }

    pub fn with(self, e: Encoding) -> EncodingSet {
        EncodingSet(self.0 | e.bit())
    }

    pub fn contains(self, e: Encoding) -> bool {
        self.0 & e.bit() != 0
    }

    pub fn intersect(self, other: EncodingSet) -> EncodingSet {
        EncodingSet(self.0 & other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Parses a config token list (see `compress.allowed-encodings`). Each token is matched as a
    /// *substring* of each candidate encoding's name, so a token of `"gzip"` also authorises
    /// `x-gzip`. This mirrors the source behaviour and is intentional, not a bug: it lets an
    /// operator write one token to cover a canonical coding and its legacy alias.
    pub fn from_config_tokens<'a>(tokens: impl IntoIterator<Item = &'a str>) -> EncodingSet {
        let mut set = EncodingSet::EMPTY;
        for token in tokens {
            let token = token.trim().to_ascii_lowercase();
            if token.is_empty() {
                continue;
            }
            for &e in Encoding::ALL.iter() {
                if e.token().contains(token.as_str()) {
                    set = set.with(e);
                }
            }
        }
        set
    }

    /// Parses an `Accept-Encoding` header value into the set of encodings the client declared
    /// acceptable, ignoring quality values entirely.
    pub fn from_accept_encoding(value: &str) -> EncodingSet {
        let mut set = EncodingSet::EMPTY;
        for raw_token in value.split(',') {
            let token = raw_token.trim_start_matches([' ', '\t']);
            for &e in Encoding::ALL.iter() {
                if token_matches(token, e.token()) {
                    set = set.with(e);
                }
            }
        }
        set
    }
}

/// Returns true iff `candidate` is a case-insensitive prefix of `token` and the byte following it
/// is a token boundary (end of string, `,`, `;`, space, or tab). This is what keeps `gzipfoo` from
/// matching `gzip` while still accepting `gzip;q=0.1`.
fn token_matches(token: &str, candidate: &str) -> bool {
    let tb = token.as_bytes();
    let cb = candidate.as_bytes();
    if tb.len() < cb.len() {
        return false;
    }
    if !tb[..cb.len()].eq_ignore_ascii_case(cb) {
        return false;
    }
    match tb.get(cb.len()) {
        None => true,
        Some(b',') | Some(b';') | Some(b' ') | Some(b'\t') => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_boundary() {
        let set = EncodingSet::from_accept_encoding("gzipfoo");
        assert!(!set.contains(Encoding::Gzip));

        let set = EncodingSet::from_accept_encoding("gzip;q=0.1");
        assert!(set.contains(Encoding::Gzip));

        let set = EncodingSet::from_accept_encoding("gzip");
        assert!(set.contains(Encoding::Gzip));
        assert!(!set.contains(Encoding::Bzip2));
    }

    #[test]
    fn q_zero_still_accepted() {
        // Deliberate deviation from RFC 7231: q=0 is not "not acceptable" here.
        let set = EncodingSet::from_accept_encoding("gzip;q=0");
        assert!(set.contains(Encoding::Gzip));
    }

    #[test]
    fn multiple_codings() {
        let set = EncodingSet::from_accept_encoding("gzip, bzip2, deflate;q=0.5");
        assert!(set.contains(Encoding::Gzip));
        assert!(set.contains(Encoding::Bzip2));
        assert!(set.contains(Encoding::Deflate));
        assert!(!set.contains(Encoding::XGzip));
    }

    #[test]
    fn config_token_substring_matches_alias() {
        let set = EncodingSet::from_config_tokens(["gzip"]);
        assert!(set.contains(Encoding::Gzip));
        assert!(set.contains(Encoding::XGzip));
        assert!(!set.contains(Encoding::Bzip2));
    }

    #[test]
    fn empty_config_tokens_allow_all() {
        let set = EncodingSet::all_compiled_in();
        assert!(set.contains(Encoding::Gzip));
        assert!(set.contains(Encoding::XGzip));
        assert!(set.contains(Encoding::Bzip2));
        assert!(set.contains(Encoding::XBzip2));
        assert!(set.contains(Encoding::Deflate));
        assert!(!set.contains(Encoding::Identity));
    }

    #[test]
    fn intersect_narrows() {
        let client = EncodingSet::from_accept_encoding("gzip, bzip2");
        let allowed = EncodingSet::from_config_tokens(["gzip"]);
        let picked = client.intersect(allowed);
        assert!(picked.contains(Encoding::Gzip));
        assert!(!picked.contains(Encoding::Bzip2));
    }
}
