/*! ISO 14443 CRCs and the MIFARE command bytes the brute-forcers
validate decrypted frames against.
 */
use crc::{CRC_16_IBM_SDLC, CRC_16_ISO_IEC_14443_3_A, Crc};

/// CRC-A: init 0x6363, ITU-V.41 polynomial, transmitted low byte
/// first.
pub const CRC_A: Crc<u16> = Crc::<u16>::new(&CRC_16_ISO_IEC_14443_3_A);

/// CRC-B: init 0xFFFF, complemented result.
pub const CRC_B: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

/// Compute CRC-A over `data`, returned in transmit order.
pub fn crc_a(data: &[u8]) -> [u8; 2] {
    CRC_A.checksum(data).to_le_bytes()
}

/// Compute CRC-B over `data`, returned in transmit order.
pub fn crc_b(data: &[u8]) -> [u8; 2] {
    CRC_B.checksum(data).to_le_bytes()
}

/// True if `frame` ends in a correct CRC-A over the preceding bytes.
pub fn check_crc_a(frame: &[u8]) -> bool {
    if frame.len() < 3 {
        return false;
    }
    let (data, tail) = frame.split_at(frame.len() - 2);
    crc_a(data) == [tail[0], tail[1]]
}

/// Read block.
pub const CMD_READBLOCK: u8 = 0x30;
/// Write block.
pub const CMD_WRITEBLOCK: u8 = 0xA0;
/// Authenticate with key A.
pub const CMD_AUTH_KEYA: u8 = 0x60;
/// Authenticate with key B.
pub const CMD_AUTH_KEYB: u8 = 0x61;
/// Value block decrement.
pub const CMD_DEC: u8 = 0xC0;
/// Value block increment.
pub const CMD_INC: u8 = 0xC1;
/// Value block restore.
pub const CMD_RESTORE: u8 = 0xC2;
/// Value block transfer.
pub const CMD_TRANSFER: u8 = 0xB0;

/// The commands that can legitimately follow a sector
/// authentication; used to sanity check decryption candidates.
pub const CMDS: [u8; 8] = [
    CMD_READBLOCK,
    CMD_WRITEBLOCK,
    CMD_AUTH_KEYA,
    CMD_AUTH_KEYB,
    CMD_DEC,
    CMD_INC,
    CMD_RESTORE,
    CMD_TRANSFER,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_check_values() {
        // Standard check inputs pin the catalog algorithms to the
        // legacy 0x6363 / 0xFFFF nibble-swap implementations.
        assert_eq!(CRC_A.checksum(b"123456789"), 0xbf05);
        assert_eq!(CRC_B.checksum(b"123456789"), 0x906e);
    }

    #[test]
    fn crc_a_frame() {
        assert_eq!(crc_a(&[0x30, 0x04]), [0x26, 0xee]);
        assert!(check_crc_a(&[0x30, 0x04, 0x26, 0xee]));
        assert!(!check_crc_a(&[0x30, 0x04, 0x26, 0xef]));
        assert!(!check_crc_a(&[0x30, 0x04]));
    }
}
