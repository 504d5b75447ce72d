/*! Static-nested key recovery from exactly two samples.

Some cards always serve the same tag nonce ("static nested"), so
collecting many independent samples for [`crate::nested`] is not
possible. With two samples from the same card a finer
meet-in-the-middle works instead: 16 bits of each recovered cipher
state (bits 16..23 of both halves) are already key material, so the
two candidate lists can be pre-intersected on that window before
rolling anything back. What survives both windows *and* the final
full-key intersection is the key, usually uniquely.
 */
use crate::crypto1::Crypto1;
use crate::recovery::lfsr_recovery32;

/// Bits 16..23 of both state halves, the window the pre-intersection
/// groups on.
#[inline]
fn window(s: &Crypto1) -> u64 {
    (u64::from(s.even) << 32 | u64::from(s.odd)) & 0x00ff_0000_00ff_0000
}

fn recover_sorted(uid: u32, nt_enc: u32, ks: u32) -> Vec<Crypto1> {
    let mut list = lfsr_recovery32(ks, nt_enc ^ uid);
    list.sort_unstable_by_key(window);
    list
}

/// Recover candidate keys from two static-nested samples.
///
/// Returns the sorted candidate keys present in both samples'
/// recovered state lists; for real traces this is almost always a
/// single key.
pub fn staticnested_2nt(uid: u32, nt1: u32, ks1: u32, nt2: u32, ks2: u32) -> Vec<u64> {
    let (a, b) = std::thread::scope(|s| {
        let ha = s.spawn(|| recover_sorted(uid, nt1, ks1));
        let b = recover_sorted(uid, nt2, ks2);
        (ha.join().expect("recovery worker panicked"), b)
    });

    // Walk both window-sorted lists in lockstep; only states whose
    // 16-bit window appears on both sides can hold the key, and only
    // those get rolled back.
    let mut keys_a: Vec<u64> = Vec::new();
    let mut keys_b: Vec<u64> = Vec::new();
    let (mut ia, mut ib) = (0, 0);
    while ia < a.len() && ib < b.len() {
        let wa = window(&a[ia]);
        let wb = window(&b[ib]);
        if wa == wb {
            let ja = ia + a[ia..].partition_point(|s| window(s) == wa);
            let jb = ib + b[ib..].partition_point(|s| window(s) == wb);
            for st in &a[ia..ja] {
                let mut st = *st;
                st.rollback_word(nt1 ^ uid, false);
                keys_a.push(st.lfsr());
            }
            for st in &b[ib..jb] {
                let mut st = *st;
                st.rollback_word(nt2 ^ uid, false);
                keys_b.push(st.lfsr());
            }
            ia = ja;
            ib = jb;
        } else if wa < wb {
            ia += 1;
        } else {
            ib += 1;
        }
    }

    keys_a.sort_unstable();
    keys_b.sort_unstable();

    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < keys_a.len() && j < keys_b.len() {
        match keys_a[i].cmp(&keys_b[j]) {
            std::cmp::Ordering::Equal => {
                out.push(keys_a[i]);
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
        }
    }
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_card_first_window() {
        let keys = staticnested_2nt(0x461dce03, 0x7eef3586, 0xffb02eda, 0x322bc14d, 0xffc875ca);
        assert_eq!(keys, vec![0xffffffffff01]);
    }

    #[test]
    fn known_card_second_window() {
        let keys = staticnested_2nt(0x461dce03, 0x7eef3586, 0x1fb6b496, 0x322bc14d, 0x1f4eebdd);
        assert_eq!(keys, vec![0xffffffffff30]);
    }

    #[test]
    fn sorted_intersection_equals_set_intersection() {
        // The two-pointer merge must agree with a naive set
        // intersection for arbitrary sorted inputs, duplicates
        // included.
        use rand::Rng;
        use std::collections::BTreeSet;
        let mut rng = rand::rng();
        for _ in 0..200 {
            let mut a: Vec<u64> = (0..rng.random_range(0..40))
                .map(|_| rng.random_range(0..30))
                .collect();
            let mut b: Vec<u64> = (0..rng.random_range(0..40))
                .map(|_| rng.random_range(0..30))
                .collect();
            a.sort_unstable();
            b.sort_unstable();
            let naive: Vec<u64> = a
                .iter()
                .copied()
                .collect::<BTreeSet<_>>()
                .intersection(&b.iter().copied().collect())
                .copied()
                .collect();
            let mut out = Vec::new();
            let (mut i, mut j) = (0, 0);
            while i < a.len() && j < b.len() {
                match a[i].cmp(&b[j]) {
                    std::cmp::Ordering::Equal => {
                        out.push(a[i]);
                        i += 1;
                        j += 1;
                    }
                    std::cmp::Ordering::Less => i += 1,
                    std::cmp::Ordering::Greater => j += 1,
                }
            }
            out.dedup();
            assert_eq!(out, naive, "a={a:?} b={b:?}");
        }
    }
}
