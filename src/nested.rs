/*! Nested-authentication key recovery.

A nested authentication leaks the tag nonce encrypted under the
target sector's key, i.e. 32 bits of keystream per sample. Each
sample is inverted with [`lfsr_recovery32`], the candidate states
are rolled back to keys, and the keys that show up for at least two
independent samples are ranked by how often they recur. With a
handful of samples the real key is almost always the top candidate —
and wrong candidates essentially never repeat.

Samples should be parity-screened with [`valid_nonce`] before being
fed in; a sample with inconsistent parity only adds noise.
 */
use itertools::Itertools;
use log::warn;
use rayon::prelude::*;

use crate::bits::{bit, oddparity8};
use crate::recovery::lfsr_recovery32;

/// Upper bound on worker threads for the sample fan-out.
pub const THREAD_MAX: usize = 4;
/// Candidate buffers grow in reservations of this many keys.
pub const MEM_CHUNK: usize = 10_000;
/// At most this many ranked candidates are returned.
pub const TRY_KEYS: usize = 50;

/// One nested-authentication sample: the tag nonce and the 32
/// keystream bits observed with it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NtpKs1 {
    /// Tag nonce.
    pub ntp: u32,
    /// Keystream observed immediately after it.
    pub ks1: u32,
}

/// Check a recovered nonce candidate against the three transmitted
/// parity bits of the encrypted nonce.
///
/// Rejects the sample when the parity implied by
/// `(nt, nt_enc, ks1)` contradicts what was actually on the wire.
/// Apply before admitting a sample into [`nested`].
pub fn valid_nonce(nt: u32, nt_enc: u32, ks1: u32, parity: &[u8; 3]) -> bool {
    oddparity8((nt >> 24) as u8) == parity[0] ^ oddparity8((nt_enc >> 24) as u8) ^ bit(ks1, 16)
        && oddparity8((nt >> 16) as u8)
            == parity[1] ^ oddparity8((nt_enc >> 16) as u8) ^ bit(ks1, 8)
        && oddparity8((nt >> 8) as u8) == parity[2] ^ oddparity8((nt_enc >> 8) as u8) ^ bit(ks1, 0)
}

/// Recover candidate keys for one slice of the sample list.
///
/// The buffer grows in [`MEM_CHUNK`] reservations; if a reservation
/// fails this worker's partial output is dropped and the other
/// workers continue.
fn recover_slice(samples: &[NtpKs1], uid: u32) -> Vec<u64> {
    let mut keys: Vec<u64> = Vec::new();
    for sample in samples {
        let probe = sample.ntp ^ uid;
        for mut state in lfsr_recovery32(sample.ks1, probe) {
            state.rollback_word(probe, false);
            if keys.len() == keys.capacity() {
                if let Err(e) = keys.try_reserve_exact(MEM_CHUNK) {
                    warn!("nested worker: candidate buffer allocation failed ({e}); dropping");
                    return Vec::new();
                }
            }
            keys.push(state.lfsr());
        }
    }
    keys
}

/// Recover candidate keys from nested-authentication samples.
///
/// Returns up to [`TRY_KEYS`] candidates, most frequently recovered
/// first. A key must be produced by at least two samples to appear
/// at all, so a single sample always yields an empty list.
pub fn nested(samples: &[NtpKs1], uid: u32) -> Vec<u64> {
    if samples.is_empty() {
        return Vec::new();
    }
    let workers = THREAD_MAX.min(samples.len());
    let per_worker = samples.len().div_ceil(workers);

    let mut all: Vec<u64> = samples
        .par_chunks(per_worker)
        .flat_map_iter(|slice| recover_slice(slice, uid))
        .collect();
    if all.is_empty() {
        warn!("nested: no candidate keys recovered");
        return Vec::new();
    }

    all.sort_unstable_by(|a, b| b.cmp(a));
    let mut counted: Vec<(usize, u64)> = all
        .iter()
        .copied()
        .dedup_with_count()
        .filter(|&(n, _)| n >= 2)
        .collect();
    counted.sort_by_key(|&(n, _)| std::cmp::Reverse(n));
    counted.into_iter().take(TRY_KEYS).map(|(_, k)| k).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto1::Crypto1;

    #[test]
    fn two_static_samples_yield_the_key() {
        // Static-nested dump from a card with key ffffffffff01.
        let samples = [
            NtpKs1 {
                ntp: 0x7eef3586,
                ks1: 0xffb02eda,
            },
            NtpKs1 {
                ntp: 0x322bc14d,
                ks1: 0xffc875ca,
            },
        ];
        assert_eq!(nested(&samples, 0x461dce03), vec![0xffffffffff01]);
    }

    #[test]
    fn single_sample_is_never_enough() {
        let samples = [NtpKs1 {
            ntp: 0x7eef3586,
            ks1: 0xffb02eda,
        }];
        assert!(nested(&samples, 0x461dce03).is_empty());
    }

    #[test]
    fn nonce_parity_screen() {
        // Build a consistent (nt, nt_enc, ks1, parity) tuple from a
        // simulated nested auth, then check the ladder accepts it
        // and rejects any single-bit parity flip.
        let key = 0x112233445566u64;
        let (uid, nt) = (0xdeadbeefu32, 0x01200145u32);
        let mut c = Crypto1::new(key);
        let ks0 = c.word(uid ^ nt, false);
        let nt_enc = nt ^ ks0;
        let ks1 = c.word(0, false);
        let par = [
            oddparity8((nt >> 24) as u8) ^ oddparity8((nt_enc >> 24) as u8) ^ bit(ks1, 16),
            oddparity8((nt >> 16) as u8) ^ oddparity8((nt_enc >> 16) as u8) ^ bit(ks1, 8),
            oddparity8((nt >> 8) as u8) ^ oddparity8((nt_enc >> 8) as u8) ^ bit(ks1, 0),
        ];
        assert!(valid_nonce(nt, nt_enc, ks1, &par));
        for i in 0..3 {
            let mut bad = par;
            bad[i] ^= 1;
            assert!(!valid_nonce(nt, nt_enc, ks1, &bad));
        }
    }
}
