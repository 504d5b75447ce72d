/*! Key recovery from reader-side authentication traces.

The classic `mfkey` attacks: a reader that talks to a card (or to an
emulator that logs the exchange) reveals enough keystream to compute
the sector key directly, no brute force involved.

* [`mfkey64`] — one complete authentication: the tag and reader
  responses give 64 bits of input-free keystream, which
  [`lfsr_recovery64`] inverts to a single state.
* [`mfkey32_moebius`] — two partial authentications against an
  emulated card (no tag response needed): candidates recovered from
  the first attempt are verified against the second.
 */
use crate::crypto1::{Crypto1, prng_successor};
use crate::recovery::{lfsr_recovery32, lfsr_recovery64};

/// Recover the key from one full authentication.
///
/// `nt` is the plaintext tag nonce; the other values are as
/// captured on the wire. Returns `None` when the trace is not a
/// consistent Crypto1 authentication.
pub fn mfkey64(uid: u32, nt: u32, nr_enc: u32, ar_enc: u32, at_enc: u32) -> Option<u64> {
    let ks2 = ar_enc ^ prng_successor(nt, 64);
    let ks3 = at_enc ^ prng_successor(nt, 96);
    let mut state = lfsr_recovery64(ks2, ks3).into_iter().next()?;
    state.rollback_word(0, false);
    state.rollback_word(0, false);
    state.rollback_word(nr_enc, true);
    state.rollback_word(uid ^ nt, false);
    Some(state.lfsr())
}

/// Recover the key from two reader authentication attempts against
/// the same sector (the "moebius" variant).
///
/// Every state consistent with the first attempt's `ar` keystream
/// is rolled back to a key and replayed against the second attempt;
/// the key that predicts the second `ar` is returned.
pub fn mfkey32_moebius(
    uid: u32,
    attempt0: (u32, u32, u32),
    attempt1: (u32, u32, u32),
) -> Option<u64> {
    let (nt0, nr0_enc, ar0_enc) = attempt0;
    let (nt1, nr1_enc, ar1_enc) = attempt1;

    let ks2 = ar0_enc ^ prng_successor(nt0, 64);
    for mut state in lfsr_recovery32(ks2, 0) {
        state.rollback_word(0, false);
        state.rollback_word(nr0_enc, true);
        state.rollback_word(uid ^ nt0, false);
        let key = state.lfsr();

        let mut check = Crypto1::new(key);
        check.word(uid ^ nt1, false);
        check.word(nr1_enc, true);
        if check.word(0, false) == ar1_enc ^ prng_successor(nt1, 64) {
            return Some(key);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mfkey64_known_trace() {
        assert_eq!(
            mfkey64(0x4c2b1aa9, 0x2b7f3d68, 0xaf999e1e, 0x681d87bc, 0x393d1504),
            Some(0xa0b1c2d3e4f5)
        );
    }

    #[test]
    fn mfkey64_inconsistent_trace() {
        assert_eq!(mfkey64(0x4c2b1aa9, 0x2b7f3d68, 0xaf999e1e, 0x681d87bc, 0x393d1505), None);
    }

    #[test]
    fn moebius_two_attempts() {
        assert_eq!(
            mfkey32_moebius(
                0x52c6129b,
                (0x7d15e439, 0xa5d4b07e, 0xd6734513),
                (0x9e3c714b, 0x80a93266, 0x4b01885d),
            ),
            Some(0x97a1c2d3e4f5)
        );
    }
}
