#![warn(missing_docs)]
/*! Key recovery for contactless smartcard research.

This crate implements the offline attack core of an RFID research
toolkit: given protocol traces captured from MIFARE Classic, MIFARE
Ultralight-C, DESFire, or Hitag2 transponders, it reconstructs the
secret keys involved.

It is a library plus a set of small command line tools
(`mf_nonce_brute`, `mf_trace_brute`, `staticnested_2nt`, `mfkey`,
`mfd_aes_brute`, `mfulc_des_brute`). Capturing the traces is someone
else's job; everything here is pure computation.

# Components

* [`crypto1`] — the MIFARE Classic stream cipher as a forward and
  backward steppable state machine, plus the card's weak 16-bit
  nonce PRNG.
* [`recovery`] — inversion of Crypto1: enumerate the cipher states
  consistent with 32 or 64 bits of observed keystream, and the
  common-prefix ("darkside") variant.
* [`nested`] / [`staticnested`] — key recovery from nested
  authentication nonce/keystream samples.
* [`nonce_brute`], [`trace_brute`], [`timestamp_brute`],
  [`ulc_brute`] — multi-threaded brute-force completers for the
  scenarios where part of the search space has to be walked.
* [`hitag2`] — the Hitag2 cipher core. Unrelated to Crypto1 despite
  the similar register size.

# Example

Recover a key from a full first-authentication trace:

```
use tagcrack::crypto1::prng_successor;
use tagcrack::recovery::lfsr_recovery64;

let (uid, nt) = (0x4c2b1aa9_u32, 0x2b7f3d68_u32);
let (nr_enc, ar_enc, at_enc) = (0xaf999e1e_u32, 0x681d87bc_u32, 0x393d1504_u32);

let ks2 = ar_enc ^ prng_successor(nt, 64);
let ks3 = at_enc ^ prng_successor(nt, 96);
let mut s = lfsr_recovery64(ks2, ks3).pop().expect("consistent trace");
s.rollback_word(0, false);
s.rollback_word(0, false);
s.rollback_word(nr_enc, true);
s.rollback_word(uid ^ nt, false);
assert_eq!(s.lfsr(), 0xa0b1c2d3e4f5);
```
*/

pub mod bits;
pub mod crypto1;
pub mod hitag2;
pub mod iso14443;
pub mod mfkey;
pub mod nested;
pub mod nonce_brute;
pub mod recovery;
pub mod staticnested;
pub mod timestamp_brute;
pub mod trace_brute;
pub mod ulc_brute;

/// Crate error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed hex argument, wrong length, or out-of-range index.
    #[error("parse error: {0}")]
    Parse(String),

    /// The search completed without any candidate surviving the
    /// verification constraints.
    #[error("no key found")]
    NoKeyFound,
}

impl Error {
    /// Shorthand for an [`Error::Parse`] with a formatted message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }
}

/// Crate result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Parse a 32-bit hex argument as found on the tool command lines.
///
/// Accepts an optional `0x` prefix. Wrong length or stray characters
/// are an [`Error::Parse`].
pub fn parse_hex_u32(s: &str) -> Result<u32> {
    let t = s.strip_prefix("0x").unwrap_or(s);
    if t.is_empty() || t.len() > 8 {
        return Err(Error::parse(format!("bad 32-bit hex value {s:?}")));
    }
    u32::from_str_radix(t, 16).map_err(|_| Error::parse(format!("bad 32-bit hex value {s:?}")))
}

/// Parse a 48-bit hex key.
pub fn parse_hex_key(s: &str) -> Result<u64> {
    let t = s.strip_prefix("0x").unwrap_or(s);
    if t.is_empty() || t.len() > 12 {
        return Err(Error::parse(format!("bad 48-bit hex key {s:?}")));
    }
    u64::from_str_radix(t, 16).map_err(|_| Error::parse(format!("bad 48-bit hex key {s:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_args() {
        assert_eq!(parse_hex_u32("461dce03").unwrap(), 0x461dce03);
        assert_eq!(parse_hex_u32("0x1f").unwrap(), 0x1f);
        assert!(parse_hex_u32("123456789").is_err());
        assert!(parse_hex_u32("nope").is_err());
        assert_eq!(parse_hex_key("ffffffffffff").unwrap(), 0xffffffffffff);
        assert!(parse_hex_key("1ffffffffffff").is_err());
    }
}
