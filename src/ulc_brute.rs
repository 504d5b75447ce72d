/*! Segment-wise brute force of MIFARE Ultralight-C 2TDEA keys.

Some Ultralight-C personalizations only randomize four bytes of the
16-byte 2TDEA key at a time, and DES ignores the low (parity) bit of
every key byte. That leaves 2^28 candidates per segment — small
enough to walk offline against a single captured `E(RndB)` block.

Two verification modes, matching how the material was captured:

* **Counterfeit**: the same challenge from a genuine card and from
  an all-zero-key counterfeit. Cheap clones derive `RndB` from a
  16-bit LFSR; which of the two known LFSR layouts applies is
  auto-detected from the null-key ciphertext, and candidate keys
  must decrypt the genuine ciphertext to a plaintext satisfying the
  same relation.
* **Reader**: `E(RndB)` plus the reader's `E(RndA ‖ RndB′)` from a
  live exchange. The second reader block, CBC-unchained, must equal
  `RndB` rotated left one byte.

Unlike the striped workers elsewhere, this search hands each thread
one contiguous range, as the keyspace has no cheap pre-filter to
skew the distribution.
 */
use std::ops::Range;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, KeyInit};
use des::{Des, TdesEde2};
use log::info;

/// The whole 28-bit candidate space of one key segment.
pub const SEGMENT_SPACE: Range<u32> = 0..1 << 28;

/// Which 16-bit LFSR generated a counterfeit card's `RndB`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LfsrKind {
    /// The "ULCG" clone family layout.
    Ulcg,
    /// The "USCUID-UL" clone family layout.
    Uscuidul,
}

/// How candidates are verified.
#[derive(Clone, Copy, Debug)]
pub enum Mode {
    /// Null-key and genuine-card ciphertexts of the same challenge.
    Counterfeit {
        /// `E(RndB)` from the all-zero-key counterfeit.
        null_ct: [u8; 8],
        /// `E(RndB)` from the genuine card.
        target_ct: [u8; 8],
    },
    /// A live reader exchange.
    Reader {
        /// `E(RndB)` sent by the card.
        erndb: [u8; 8],
        /// `E(RndA ‖ RndB′)` sent by the reader.
        ernda_rndb: [u8; 16],
    },
}

/// One segment search.
#[derive(Clone, Copy, Debug)]
pub struct UlcBruteJob {
    /// Capture and verification mode.
    pub mode: Mode,
    /// The known 16-byte 2TDEA base key.
    pub base_key: [u8; 16],
    /// Which 4-byte segment (1..=4) to brute force.
    pub segment: u8,
    /// Keep scanning after a hit (full-keyspace benchmarking).
    pub benchmark: bool,
}

fn lfsr_step_ulcg(g: u16) -> u16 {
    let fb = (g >> 3 ^ g >> 4 ^ g >> 6) & 1;
    (g & 1) << 15 | (g >> 1 ^ fb)
}

fn valid_lfsr_ulcg(block: &[u8; 8]) -> bool {
    let x = u64::from_be_bytes(*block);
    let mut g = (x >> 48) as u16;
    for i in [2u32, 1, 0] {
        g = lfsr_step_ulcg(g);
        if g != (x >> (16 * i)) as u16 {
            return false;
        }
    }
    true
}

fn lfsr_step_uscuidul(mut g: u16) -> u16 {
    for _ in 0..16 {
        g = g >> 1 | (g ^ g >> 2 ^ g >> 3 ^ g >> 5) << 15;
    }
    g
}

fn valid_lfsr_uscuidul(block: &[u8; 8]) -> bool {
    let x = u64::from_be_bytes(*block);
    let mut g = x as u16;
    for i in [1u32, 2, 3] {
        g = lfsr_step_uscuidul(g);
        if g != (x >> (16 * i)) as u16 {
            return false;
        }
    }
    true
}

fn valid_lfsr(block: &[u8; 8], kind: LfsrKind) -> bool {
    match kind {
        LfsrKind::Ulcg => valid_lfsr_ulcg(block),
        LfsrKind::Uscuidul => valid_lfsr_uscuidul(block),
    }
}

/// Work out a counterfeit card's LFSR layout from its null-key
/// ciphertext.
///
/// Counterfeits with an all-zero key encrypt with plain DES, so one
/// decryption exposes the plaintext; `None` means the card matches
/// neither known layout and the counterfeit mode cannot run.
pub fn detect_lfsr(null_ct: &[u8; 8]) -> Option<LfsrKind> {
    let des = Des::new(&GenericArray::from([0u8; 8]));
    let mut block = GenericArray::from(*null_ct);
    des.decrypt_block(&mut block);
    let plain: [u8; 8] = block.into();
    if valid_lfsr_ulcg(&plain) {
        Some(LfsrKind::Ulcg)
    } else if valid_lfsr_uscuidul(&plain) {
        Some(LfsrKind::Uscuidul)
    } else {
        None
    }
}

/// Spread a 28-bit candidate into four DES key bytes, seven bits
/// per byte with the parity bit cleared.
#[inline]
fn candidate_bytes(idx: u32) -> [u8; 4] {
    [
        ((idx & 0x7f) << 1) as u8,
        ((idx >> 7 & 0x7f) << 1) as u8,
        ((idx >> 14 & 0x7f) << 1) as u8,
        ((idx >> 21 & 0x7f) << 1) as u8,
    ]
}

fn scan(
    job: &UlcBruteJob,
    kind: Option<LfsrKind>,
    range: Range<u32>,
    found: &AtomicU32,
    results: &Mutex<Vec<[u8; 16]>>,
) {
    let key_mode = usize::from(job.segment - 1);
    let candidate_in_k1 = key_mode < 2;
    let var_offset = (key_mode % 2) * 4;

    // The half not being brute forced, straight from the base key.
    let fixed_half: [u8; 8] = if candidate_in_k1 {
        job.base_key[8..16].try_into().expect("key half")
    } else {
        job.base_key[0..8].try_into().expect("key half")
    };
    let base_half: [u8; 8] = if candidate_in_k1 {
        job.base_key[0..8].try_into().expect("key half")
    } else {
        job.base_key[8..16].try_into().expect("key half")
    };

    for idx in range {
        if !job.benchmark && found.load(Ordering::Acquire) != 0 {
            return;
        }
        let mut candidate_half = base_half;
        candidate_half[var_offset..var_offset + 4].copy_from_slice(&candidate_bytes(idx));

        let mut k2 = [0u8; 16];
        if candidate_in_k1 {
            k2[..8].copy_from_slice(&candidate_half);
            k2[8..].copy_from_slice(&fixed_half);
        } else {
            k2[..8].copy_from_slice(&fixed_half);
            k2[8..].copy_from_slice(&candidate_half);
        }
        let tdes = TdesEde2::new(&GenericArray::from(k2));

        let hit = match job.mode {
            Mode::Counterfeit { target_ct, .. } => {
                let mut block = GenericArray::from(target_ct);
                tdes.decrypt_block(&mut block);
                let plain: [u8; 8] = block.into();
                kind.map(|k| valid_lfsr(&plain, k)).unwrap_or(false)
            }
            Mode::Reader { erndb, ernda_rndb } => {
                let mut rndb = GenericArray::from(erndb);
                tdes.decrypt_block(&mut rndb);
                let mut second: [u8; 8] = ernda_rndb[8..16].try_into().expect("block");
                let mut block = GenericArray::from(second);
                tdes.decrypt_block(&mut block);
                second = block.into();
                for (b, c) in second.iter_mut().zip(&ernda_rndb[..8]) {
                    *b ^= c;
                }
                let mut rotated: [u8; 8] = rndb.into();
                rotated.rotate_left(1);
                second == rotated
            }
        };

        if hit {
            let mut full_key = job.base_key;
            full_key[key_mode * 4..key_mode * 4 + 4].copy_from_slice(&candidate_bytes(idx));
            info!("candidate index {idx:07x} yields key {}", hex::encode_upper(full_key));
            results.lock().expect("result lock").push(full_key);
            found.fetch_add(1, Ordering::AcqRel);
            if !job.benchmark {
                return;
            }
        }
    }
}

/// Search `range` of the 28-bit space, split contiguously across
/// `threads` OS threads.
///
/// Returns every full key found (normal mode stops after the
/// first). Fails on an out-of-range segment, or in counterfeit
/// mode when the null-key ciphertext matches no known LFSR.
pub fn run(job: &UlcBruteJob, threads: usize, range: Range<u32>) -> crate::Result<Vec<[u8; 16]>> {
    if !(1..=4).contains(&job.segment) {
        return Err(crate::Error::parse(format!(
            "key segment must be 1..4, got {}",
            job.segment
        )));
    }
    let kind = match job.mode {
        Mode::Counterfeit { null_ct, .. } => {
            let k = detect_lfsr(&null_ct);
            if k.is_none() {
                return Err(crate::Error::parse(
                    "null-key ciphertext matches no known LFSR layout".to_string(),
                ));
            }
            k
        }
        Mode::Reader { .. } => None,
    };

    let threads = threads.max(1) as u32;
    let total = range.end - range.start;
    let chunk = total / threads;
    let found = AtomicU32::new(0);
    let results = Mutex::new(Vec::new());

    std::thread::scope(|s| {
        for i in 0..threads {
            let lo = range.start + i * chunk;
            let hi = if i == threads - 1 {
                range.end
            } else {
                lo + chunk
            };
            let (found, results) = (&found, &results);
            s.spawn(move || scan(job, kind, lo..hi, found, results));
        }
    });

    Ok(results.into_inner().expect("result lock"))
}
