/*! Inverting Crypto1: from observed keystream back to cipher states.

Three related attacks live here, all meet-in-the-middle searches over
the odd/even halves of the 48-bit state:

* [`lfsr_recovery32`] — 32 bits of keystream plus the word that was
  fed into the LFSR while it was produced. Yields every consistent
  state, typically tens of thousands; callers narrow the list with
  further constraints.
* [`lfsr_recovery64`] — 64 bits of keystream across two consecutive
  input-free words. Almost always yields exactly one state.
* [`lfsr_common_prefix`] — the "darkside" variant: eight keystream
  nibbles observed while varying the last three bits of the reader
  nonce, plus the transmitted parity bits.

The half-state tables the search walks are plain `Vec<u32>`s.
Entries carry the partial state in their low 24 bits; the mutual
extension phase additionally keeps a 5-bit linear-feedback
contribution tag in the top byte, which is what the sort-and-
intersect recursion groups on.
 */
use std::sync::OnceLock;

use crate::bits::{bebit, bit, parity32};
use crate::crypto1::{Crypto1, LF_POLY_EVEN, LF_POLY_ODD, filter};

static FILTER_LUT: OnceLock<Vec<u8>> = OnceLock::new();

/// The output filter over all 2^20 tap combinations, built once.
fn filter_lut() -> &'static [u8] {
    FILTER_LUT.get_or_init(|| (0..1u32 << 20).map(filter).collect())
}

#[inline]
fn flt(lut: &[u8], x: u32) -> u8 {
    lut[(x & 0xfffff) as usize]
}

/// Append the two newest linear-feedback contribution bits to the
/// tag in an entry's top byte.
#[inline]
fn update_contribution(item: u32, m1: u32, m2: u32) -> u32 {
    let mut p = item >> 25;
    p = p << 1 | u32::from(parity32(item & m1));
    p = p << 1 | u32::from(parity32(item & m2));
    p << 24 | (item & 0xffffff)
}

/// Extend every half-state in `tbl` by one keystream bit, keeping
/// the continuations whose filter output matches `bit`.
///
/// Each entry forks into zero, one or two successors depending on
/// whether the filter disambiguates the new low bit.
fn extend_table_simple(tbl: &mut Vec<u32>, scratch: &mut Vec<u32>, bit: u8, lut: &[u8]) {
    scratch.clear();
    for &e0 in tbl.iter() {
        let e = e0 << 1;
        let f0 = flt(lut, e);
        if f0 != flt(lut, e | 1) {
            scratch.push(e | u32::from(f0 ^ bit));
        } else if f0 == bit {
            scratch.push(e);
            scratch.push(e | 1);
        }
    }
    std::mem::swap(tbl, scratch);
}

/// One keystream bit of mutual extension: like
/// [`extend_table_simple`], but also folds the LFSR input bits for
/// this step into the tag byte and records the feedback
/// contributions used by the intersection sort.
fn extend_table(tbl: Vec<u32>, bit: u32, m1: u32, m2: u32, input: u32, lut: &[u8]) -> Vec<u32> {
    let input = input << 24;
    let mut out = Vec::with_capacity(tbl.len() + tbl.len() / 2);
    for e0 in tbl {
        let e = e0 << 1;
        let f0 = u32::from(flt(lut, e));
        if f0 != u32::from(flt(lut, e | 1)) {
            let e = e | (f0 ^ bit);
            out.push(update_contribution(e, m1, m2) ^ input);
        } else if f0 == bit {
            out.push(update_contribution(e, m1, m2) ^ input);
            out.push(update_contribution(e | 1, m1, m2) ^ input);
        }
    }
    out
}

/// Recursively narrow the odd/even tables four keystream bits at a
/// time, intersecting on the contribution tags, and emit the
/// surviving cross products.
fn recover(
    mut odds: Vec<u32>,
    mut evens: Vec<u32>,
    mut oks: u32,
    mut eks: u32,
    mut rem: i32,
    mut input: u32,
    out: &mut Vec<Crypto1>,
    lut: &[u8],
) {
    if rem == -1 {
        for &e0 in &evens {
            let e =
                e0 << 1 ^ u32::from(parity32(e0 & LF_POLY_EVEN)) ^ u32::from(input & 4 != 0);
            for &o in &odds {
                out.push(Crypto1 {
                    odd: e ^ u32::from(parity32(o & LF_POLY_ODD)),
                    even: o,
                });
            }
        }
        return;
    }

    let mut i = 0;
    while i < 4 {
        let last = rem;
        rem -= 1;
        if last == 0 {
            break;
        }
        oks >>= 1;
        eks >>= 1;
        input >>= 2;
        odds = extend_table(odds, oks & 1, LF_POLY_EVEN << 1 | 1, LF_POLY_ODD << 1, 0, lut);
        if odds.is_empty() {
            return;
        }
        evens = extend_table(evens, eks & 1, LF_POLY_ODD, LF_POLY_EVEN << 1 | 1, input & 3, lut);
        if evens.is_empty() {
            return;
        }
        i += 1;
    }

    odds.sort_unstable();
    evens.sort_unstable();

    let (mut io, mut ie) = (0, 0);
    while io < odds.len() && ie < evens.len() {
        let to = odds[io] >> 24;
        let te = evens[ie] >> 24;
        if to == te {
            let jo = odds[io..].partition_point(|&x| x >> 24 == to) + io;
            let je = evens[ie..].partition_point(|&x| x >> 24 == te) + ie;
            recover(
                odds[io..jo].to_vec(),
                evens[ie..je].to_vec(),
                oks,
                eks,
                rem,
                input,
                out,
                lut,
            );
            io = jo;
            ie = je;
        } else if to > te {
            ie += 1;
        } else {
            io += 1;
        }
    }
}

/// Recover every cipher state consistent with 32 bits of keystream.
///
/// `ks` is the keystream word; `input` is the word that was being
/// fed into the LFSR while it was produced (typically
/// `uid ^ nt`). Returned states are positioned just *after* the
/// 32-bit window: rolling each back one word with `input` lands on
/// the state the window started from.
///
/// Inconsistent inputs yield an empty list; this function does not
/// fail.
pub fn lfsr_recovery32(ks: u32, input: u32) -> Vec<Crypto1> {
    let lut = filter_lut();
    let mut oks = 0u32;
    let mut i = 31i32;
    while i >= 0 {
        oks = oks << 1 | u32::from(bebit(ks, i as u32));
        i -= 2;
    }
    let mut eks = 0u32;
    let mut i = 30i32;
    while i >= 0 {
        eks = eks << 1 | u32::from(bebit(ks, i as u32));
        i -= 2;
    }

    let mut odds = Vec::with_capacity(1 << 20);
    let mut evens = Vec::with_capacity(1 << 20);
    for s in (0..=0xfffffu32).rev() {
        let f = flt(lut, s);
        if u32::from(f) == oks & 1 {
            odds.push(s);
        }
        if u32::from(f) == eks & 1 {
            evens.push(s);
        }
    }

    let mut scratch = Vec::with_capacity(1 << 20);
    for _ in 0..4 {
        oks >>= 1;
        extend_table_simple(&mut odds, &mut scratch, (oks & 1) as u8, lut);
        eks >>= 1;
        extend_table_simple(&mut evens, &mut scratch, (eks & 1) as u8, lut);
    }

    let input = (input >> 16 & 0xff) | (input << 16) | (input & 0xff00);
    let mut out = Vec::new();
    recover(odds, evens, oks, eks, 11, input << 1, &mut out, lut);
    out
}

const S1: [u32; 19] = [
    0x62141, 0x310A0, 0x18850, 0x0C428, 0x06214, 0x0310A, 0x85E30, 0xC69AD, 0x634D6, 0xB5CDE,
    0xDE8DA, 0x6F46D, 0xB3C83, 0x59E41, 0xA8995, 0xD027F, 0x6813F, 0x3409F, 0x9E6FA,
];
const S2: [u32; 19] = [
    0x3A557B00, 0x5D2ABD80, 0x2E955EC0, 0x174AAF60, 0x0BA557B0, 0x05D2ABD8, 0x0449DE68,
    0x048464B0, 0x42423258, 0x278192A8, 0x156042D0, 0x0AB02168, 0x43F89B30, 0x61FC4D98,
    0x765EAD48, 0x7D8FDD20, 0x7EC7EE90, 0x7F63F748, 0x79117020,
];
const T1: [u32; 32] = [
    0x4F37D, 0x279BE, 0x97A6A, 0x4BD35, 0x25E9A, 0x12F4D, 0x097A6, 0x80D66, 0xC4006, 0x62003,
    0xB56B4, 0x5AB5A, 0xA9318, 0xD0F39, 0x6879C, 0xB057B, 0x582BD, 0x2C15E, 0x160AF, 0x8F6E2,
    0xC3DC4, 0xE5857, 0x72C2B, 0x39615, 0x98DBF, 0xC806A, 0xE0680, 0x70340, 0x381A0, 0x98665,
    0x4C332, 0xA272C,
];
const T2: [u32; 32] = [
    0x3C88B810, 0x5E445C08, 0x2982A580, 0x14C152C0, 0x4A60A960, 0x253054B0, 0x52982A58,
    0x2FEC9EA8, 0x1156C4D0, 0x08AB6268, 0x42F53AB0, 0x217A9D58, 0x161DC528, 0x0DAE6910,
    0x46D73488, 0x25CB11C0, 0x52E588E0, 0x6972C470, 0x34B96238, 0x5CFC3A98, 0x28DE96C8,
    0x12CFC0E0, 0x4967E070, 0x64B3F038, 0x74F97398, 0x7CDC3248, 0x38CE92A0, 0x1C674950,
    0x0E33A4A8, 0x01B959D0, 0x40DCACE8, 0x26CEDDF0,
];
const C1: [u32; 3] = [0x846B5, 0x4235A, 0x211AD];
const C2: [u32; 3] = [0x1A822E0, 0x21A822E0, 0x21A822E0];

/// Recover cipher states from 64 bits of keystream across two
/// consecutive input-free words.
///
/// The linear relations between the two 32-bit windows (the
/// `S`/`T`/`C` tables) pin the even half directly from each odd
/// candidate, so the result is unique for almost every input.
/// Returned states sit just after the second window.
pub fn lfsr_recovery64(ks2: u32, ks3: u32) -> Vec<Crypto1> {
    let lut = filter_lut();
    let mut oks = [0u8; 32];
    let mut eks = [0u8; 32];
    let mut i = 30i32;
    while i >= 0 {
        oks[(i >> 1) as usize] = bebit(ks2, i as u32);
        oks[16 + (i >> 1) as usize] = bebit(ks3, i as u32);
        i -= 2;
    }
    let mut i = 31i32;
    while i >= 0 {
        eks[(i >> 1) as usize] = bebit(ks2, i as u32);
        eks[16 + (i >> 1) as usize] = bebit(ks3, i as u32);
        i -= 2;
    }

    let mut states = Vec::new();
    let mut table: Vec<u32> = Vec::with_capacity(64);
    let mut scratch: Vec<u32> = Vec::with_capacity(64);

    for s in (0..=0xfffffu32).rev() {
        if lut[s as usize] != oks[0] {
            continue;
        }
        table.clear();
        table.push(s);
        let mut j = 1;
        while !table.is_empty() && j < 29 {
            extend_table_simple(&mut table, &mut scratch, oks[j], lut);
            j += 1;
        }
        if table.is_empty() {
            continue;
        }

        let mut low = 0u32;
        for &m in &S1 {
            low = low << 1 | u32::from(parity32(s & m));
        }
        let mut hi = [0u8; 32];
        for (h, &m) in hi.iter_mut().zip(&T1) {
            *h = parity32(s & m);
        }

        'candidate: for &t0 in &table {
            let mut t = t0;
            for j in 0..3 {
                t <<= 1;
                t |= u32::from(parity32((s & C1[j]) ^ (t & C2[j])));
                if flt(lut, t) != oks[29 + j] {
                    continue 'candidate;
                }
            }

            let mut win = 0u32;
            for &m in &S2 {
                win = win << 1 | u32::from(parity32(t & m));
            }
            win ^= low;
            for j in 0..32 {
                win = win << 1 ^ u32::from(hi[j]) ^ u32::from(parity32(t & T2[j]));
                if flt(lut, win) != eks[j] {
                    continue 'candidate;
                }
            }

            let t = t << 1 | u32::from(parity32(LF_POLY_EVEN & t));
            states.push(Crypto1 {
                odd: t ^ u32::from(parity32(LF_POLY_ODD & win)),
                even: win,
            });
        }
    }
    states
}

/// Fast-forward deltas of the even (index 0) and odd (index 1) half
/// states for the eight variants of the last three reader-nonce
/// bits.
const FASTFWD: [[u32; 8]; 2] = [
    [0, 0x4BC53, 0x0ECB1, 0x450E2, 0x25E29, 0x6E27A, 0x2B298, 0x60ECB],
    [0, 0x1D962, 0x4BC53, 0x56531, 0x0ECB1, 0x135D3, 0x450E2, 0x58980],
];

/// Enumerate the 21-bit partial half-states consistent with the
/// keystream observed while varying the last three bits of `Nr`.
///
/// `ks[c]` holds the four keystream bits that encrypted the NACK of
/// variant `c`; the odd half accounts for bits 1 and 3, the even
/// half for bits 0 and 2.
pub fn lfsr_prefix_ks(ks: &[u8; 8], isodd: bool) -> Vec<u32> {
    let lut = filter_lut();
    let off = usize::from(isodd);
    let mut out = Vec::new();
    for i in 0..1u32 << 21 {
        let good = (0..8).all(|c| {
            let entry = i ^ FASTFWD[off][c];
            (ks[c] >> off) & 1 == flt(lut, entry >> 1)
                && (ks[c] >> (off + 2)) & 1 == flt(lut, entry)
        });
        if good {
            out.push(i);
        }
    }
    out
}

/// Verify one (odd, even) candidate pair against all eight variants'
/// parity bits, rolling each variant back through the transcript.
///
/// On success the returned state is the last variant's, rolled back
/// to just after the `uid ^ nt` word.
fn check_pfx_parity(
    prefix: u32,
    rresp: u32,
    par: &[[u8; 8]; 8],
    odd: u32,
    even: u32,
) -> Option<Crypto1> {
    let mut s = Crypto1::default();
    for c in 0..8u32 {
        s.odd = odd ^ FASTFWD[1][c as usize];
        s.even = even ^ FASTFWD[0][c as usize];

        s.rollback_bit(0, false);
        s.rollback_bit(0, false);
        let ks3 = s.rollback_bit(0, false);
        let ks2 = s.rollback_word(0, false);
        let ks1 = s.rollback_word(prefix | c << 5, true);

        let nr = ks1 ^ (prefix | c << 5);
        let rr = ks2 ^ rresp;
        let p = &par[c as usize];

        let mut good = parity32(nr & 0x000000ff) ^ p[3] ^ bit(ks2, 24);
        good &= parity32(rr & 0xff000000) ^ p[4] ^ bit(ks2, 16);
        good &= parity32(rr & 0x00ff0000) ^ p[5] ^ bit(ks2, 8);
        good &= parity32(rr & 0x0000ff00) ^ p[6] ^ bit(ks2, 0);
        good &= parity32(rr & 0x000000ff) ^ p[7] ^ ks3;
        if good == 0 {
            return None;
        }
    }
    Some(s)
}

/// The common-prefix ("darkside") attack.
///
/// `pfx` is the constant encrypted reader-nonce prefix (last three
/// bits zero), `rresp` the constant encrypted reader response,
/// `ks` the per-variant NACK keystream nibbles and `par` the eight
/// transmitted parity bits per variant. Returns candidate states
/// positioned just after the `uid ^ nt` word; rolling one back
/// through `uid ^ nt` yields the key.
pub fn lfsr_common_prefix(
    pfx: u32,
    rresp: u32,
    ks: &[u8; 8],
    par: &[[u8; 8]; 8],
) -> Vec<Crypto1> {
    let odds = lfsr_prefix_ks(ks, true);
    let evens = lfsr_prefix_ks(ks, false);

    // The 21-bit partial states leave three top bits of each half
    // unknown; try all 64 combinations.
    let mut out = Vec::new();
    for &o in &odds {
        for &e in &evens {
            for top in 0..64u32 {
                let cand =
                    check_pfx_parity(pfx, rresp, par, o | (top & 7) << 21, e | (top >> 3) << 21);
                out.extend(cand);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn recovery32_finds_true_state() {
        let mut rng = rand::rng();
        for _ in 0..2 {
            let key = rng.random::<u64>() & 0xffff_ffff_ffff;
            let input = rng.random::<u32>();
            let mut s = Crypto1::new(key);
            let ks = s.word(input, false);

            let cands = lfsr_recovery32(ks, input);
            assert!(!cands.is_empty());
            let mut found = false;
            for c in &cands {
                let mut c = *c;
                c.rollback_word(input, false);
                if c.lfsr() == key {
                    found = true;
                }
                // Every candidate must reproduce the keystream.
                assert_eq!(c.word(input, false), ks);
            }
            assert!(found, "true state missing for key {key:012x}");
        }
    }

    #[test]
    fn recovery32_zero_keystream() {
        let cands = lfsr_recovery32(0, 0);
        assert!(!cands.is_empty());
    }

    #[test]
    fn recovery64_unique() {
        let mut rng = rand::rng();
        for _ in 0..4 {
            let key = rng.random::<u64>() & 0xffff_ffff_ffff;
            let input = rng.random::<u32>();
            let mut s = Crypto1::new(key);
            s.word(input, false);
            let ks2 = s.word(0, false);
            let ks3 = s.word(0, false);

            let cands = lfsr_recovery64(ks2, ks3);
            assert!(!cands.is_empty());
            let keys: Vec<u64> = cands
                .into_iter()
                .map(|mut c| {
                    c.rollback_word(0, false);
                    c.rollback_word(0, false);
                    c.rollback_word(input, false);
                    c.lfsr()
                })
                .collect();
            assert!(keys.contains(&key), "key {key:012x} not in {keys:x?}");
        }
    }

    #[test]
    fn recovery64_known_trace() {
        // First-auth trace for key a0b1c2d3e4f5.
        let (uid, nt) = (0x4c2b1aa9u32, 0x2b7f3d68u32);
        let (nr_enc, ar_enc, at_enc) = (0xaf999e1eu32, 0x681d87bcu32, 0x393d1504u32);
        let ks2 = ar_enc ^ crate::crypto1::prng_successor(nt, 64);
        let ks3 = at_enc ^ crate::crypto1::prng_successor(nt, 96);
        let cands = lfsr_recovery64(ks2, ks3);
        assert_eq!(cands.len(), 1);
        let mut s = cands[0];
        s.rollback_word(0, false);
        s.rollback_word(0, false);
        s.rollback_word(nr_enc, true);
        s.rollback_word(uid ^ nt, false);
        assert_eq!(s.lfsr(), 0xa0b1c2d3e4f5);
    }
}
