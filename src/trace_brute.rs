/*! Completing a partially recovered key from an encrypted trace.

The nested-nonce completer sometimes leaves only the low 32 bits of
a key established. When the trace also contains a command exchanged
after the authentication — a read or write with its 16-byte payload
and CRCs — the missing 16 bits can be brute forced offline: for each
candidate top half, replay the authentication feed, XOR-decrypt the
captured bytes and keep the candidate whose plaintext parses as a
plausible MIFARE frame.
 */
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use log::info;

use crate::crypto1::Crypto1;
use crate::iso14443::{
    CMD_AUTH_KEYA, CMD_AUTH_KEYB, CMD_DEC, CMD_INC, CMD_READBLOCK, CMD_RESTORE, CMD_TRANSFER,
    CMD_WRITEBLOCK, check_crc_a,
};

/// Longest supported capture: command + CRC + one full block + CRC.
pub const ENC_MAX: usize = 4 + 16 + 2;

/// Commands the decrypted capture may start with, and the length of
/// the payload-with-CRC that follows the 4-byte header when the
/// command carries one.
const CMDS: [(u8, usize); 8] = [
    (CMD_READBLOCK, 18),
    (CMD_WRITEBLOCK, 18),
    (CMD_AUTH_KEYA, 0),
    (CMD_AUTH_KEYB, 0),
    (CMD_DEC, 6),
    (CMD_INC, 6),
    (CMD_RESTORE, 6),
    (CMD_TRANSFER, 0),
];

/// A trace-completion job.
#[derive(Clone, Debug)]
pub struct TraceBruteJob {
    /// Card UID.
    pub uid: u32,
    /// The known low 32 bits of the key.
    pub part_key: u32,
    /// Encrypted tag nonce of the nested authentication.
    pub nt_enc: u32,
    /// Encrypted reader challenge.
    pub nr_enc: u32,
    /// Captured encrypted bytes following the authentication, at
    /// most [`ENC_MAX`] of them.
    pub enc: Vec<u8>,
}

/// Does the decrypted capture look like a real frame?
///
/// The first byte must be a known command; the 4-byte header must
/// pass CRC-A; and where the command carries a payload, the payload
/// (with its own CRC) must check out too.
fn valid_frame(dec: &[u8]) -> bool {
    let Some(&cmd) = dec.first() else {
        return false;
    };
    for &(known, payload_len) in &CMDS {
        if cmd != known {
            continue;
        }
        let mut ok = dec.len() >= 4 && check_crc_a(&dec[..4]);
        if payload_len > 0 && dec.len() >= 4 + payload_len {
            ok = check_crc_a(&dec[4..4 + payload_len]);
        }
        if ok {
            return true;
        }
    }
    false
}

/// One recovered key with the decrypted capture that validated it.
#[derive(Clone, Debug)]
pub struct Recovered {
    /// The full 48-bit key.
    pub key: u64,
    /// The capture, decrypted under that key.
    pub dec: Vec<u8>,
}

fn scan(
    job: &TraceBruteJob,
    start: u64,
    stride: u64,
    found: &AtomicU32,
    result: &Mutex<Option<Recovered>>,
) {
    let mut count = start;
    while count < 0xffff {
        if found.load(Ordering::Acquire) != 0 {
            return;
        }
        let key = count << 32 | u64::from(job.part_key);
        count += stride;

        let mut cipher = Crypto1::new(key);
        cipher.word(job.nt_enc ^ job.uid, true);
        cipher.word(job.nr_enc, true);
        cipher.word(0, false);
        cipher.word(0, false);

        let dec: Vec<u8> = job.enc.iter().map(|&b| cipher.byte(0, false) ^ b).collect();
        if !valid_frame(&dec) {
            continue;
        }

        found.fetch_add(1, Ordering::AcqRel);
        info!("valid key found [{key:012X}]");
        let mut guard = result.lock().expect("result lock");
        guard.get_or_insert(Recovered { key, dec });
        return;
    }
}

/// Brute force the top 16 key bits across `threads` OS threads.
///
/// Returns the first candidate whose decryption validates, or
/// `None` when the whole space fails.
pub fn run(job: &TraceBruteJob, threads: usize) -> Option<Recovered> {
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
    use crate::iso14443::crc_a;

    #[test]
    fn frame_validation() {
        // 30 04 + CRC alone.
        let hdr = [0x30, 0x04, 0x26, 0xee];
        assert!(valid_frame(&hdr));
        // Unknown command byte.
        assert!(!valid_frame(&[0x31, 0x04, 0x26, 0xee]));
        // Bad header CRC.
        assert!(!valid_frame(&[0x30, 0x04, 0x26, 0xef]));
        // Full read response: payload CRC decides.
        let payload: Vec<u8> = (0xd0..0xe0).collect();
        let mut frame = hdr.to_vec();
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&crc_a(&payload));
        assert!(valid_frame(&frame));
        *frame.last_mut().unwrap() ^= 1;
        assert!(!valid_frame(&frame));
    }

    #[test]
    fn completes_partial_key() {
        // Synthetic capture encrypted under key 5a17cafebabe.
        let job = TraceBruteJob {
            uid: 0x1b6b2d1a,
            part_key: 0xcafebabe,
            nt_enc: 0x91d2c32f,
            nr_enc: 0x4a8b1e77,
            enc: hex::decode("1462eac7fa7c8b972745ad2afe20d169259b3ea323a5").unwrap(),
        };
        let hit = run(&job, 4).expect("key in space");
        assert_eq!(hit.key, 0x5a17cafebabe);
        assert_eq!(hit.dec[0], 0x30);
    }

    #[test]
    fn reports_failure() {
        let job = TraceBruteJob {
            uid: 0x1b6b2d1a,
            part_key: 0xdeadbeef,
            nt_enc: 0x91d2c32f,
            nr_enc: 0x4a8b1e77,
            enc: vec![0u8; 22],
        };
        assert!(run(&job, 4).is_none());
    }
}
