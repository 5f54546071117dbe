/// EMS checksum.
///
/// The bus uses a custom 8-bit CRC driven by a fixed lookup table. The table has no known
/// generator polynomial that reproduces it, so it is kept byte for byte.
#[rustfmt::skip]
pub const CRC_TABLE: [u8; 256] = [
    0x00, 0x02, 0x04, 0x06, 0x08, 0x0A, 0x0C, 0x0E, 0x10, 0x12, 0x14, 0x16, 0x18, 0x1A, 0x1C, 0x1E,
    0x20, 0x22, 0x24, 0x26, 0x28, 0x2A, 0x2C, 0x2E, 0x30, 0x32, 0x34, 0x36, 0x38, 0x3A, 0x3C, 0x3E,
    0x40, 0x42, 0x44, 0x46, 0x48, 0x4A, 0x4C, 0x4E, 0x50, 0x52, 0x54, 0x56, 0x58, 0x5A, 0x5C, 0x5E,
    0x60, 0x62, 0x64, 0x66, 0x68, 0x6A, 0x6C, 0x6E, 0x70, 0x72, 0x74, 0x76, 0x78, 0x7A, 0x7C, 0x7E,
    0x80, 0x82, 0x84, 0x86, 0x88, 0x8A, 0x8C, 0x8E, 0x90, 0x92, 0x94, 0x96, 0x98, 0x9A, 0x9C, 0x9E,
    0xA0, 0xA2, 0xA4, 0xA6, 0xA8, 0xAA, 0xAC, 0xAE, 0xB0, 0xB2, 0xB4, 0xB6, 0xB8, 0xBA, 0xBC, 0xBE,
    0xC0, 0xC2, 0xC4, 0xC6, 0xC8, 0xCA, 0xCC, 0xCE, 0xD0, 0xD2, 0xD4, 0xD6, 0xD8, 0xDA, 0xDC, 0xDE,
    0xE0, 0xE2, 0xE4, 0xE6, 0xE8, 0xEA, 0xEC, 0xEE, 0xF0, 0xF2, 0xF4, 0xF6, 0xF8, 0xFA, 0xFC, 0xFE,
    0x19, 0x1B, 0x1D, 0x1F, 0x11, 0x13, 0x15, 0x17, 0x09, 0x0B, 0x0D, 0x0F, 0x01, 0x03, 0x05, 0x07,
    0x39, 0x3B, 0x3D, 0x3F, 0x31, 0x33, 0x35, 0x37, 0x29, 0x2B, 0x2D, 0x2F, 0x21, 0x23, 0x25, 0x27,
    0x59, 0x5B, 0x5D, 0x5F, 0x51, 0x53, 0x55, 0x57, 0x49, 0x4B, 0x4D, 0x4F, 0x41, 0x43, 0x45, 0x47,
    0x79, 0x7B, 0x7D, 0x7F, 0x71, 0x73, 0x75, 0x77, 0x69, 0x6B, 0x6D, 0x6F, 0x61, 0x63, 0x65, 0x67,
    0x99, 0x9B, 0x9D, 0x9F, 0x91, 0x93, 0x95, 0x97, 0x89, 0x8B, 0x8D, 0x8F, 0x81, 0x83, 0x85, 0x87,
    0xB9, 0xBB, 0xBD, 0xBF, 0xB1, 0xB3, 0xB5, 0xB7, 0xA9, 0xAB, 0xAD, 0xAF, 0xA1, 0xA3, 0xA5, 0xA7,
    0xD9, 0xDB, 0xDD, 0xDF, 0xD1, 0xD3, 0xD5, 0xD7, 0xC9, 0xCB, 0xCD, 0xCF, 0xC1, 0xC3, 0xC5, 0xC7,
    0xF9, 0xFB, 0xFD, 0xFF, 0xF1, 0xF3, 0xF5, 0xF7, 0xE9, 0xEB, 0xED, 0xEF, 0xE1, 0xE3, 0xE5, 0xE7,
];

/// Fold `bytes` through [`CRC_TABLE`].
///
/// Callers pass the telegram without its trailing checksum byte.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |crc, &byte| CRC_TABLE[crc as usize] ^ byte)
}

/// Append the checksum of `bytes` to it, producing a complete frame.
pub fn seal(bytes: &mut Vec<u8>) {
    let crc = checksum(bytes);
    bytes.push(crc);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verify(frame: &[u8]) -> bool {
        match frame.split_last() {
            Some((&crc, body)) if !body.is_empty() => checksum(body) == crc,
            _ => false,
        }
    }

    const REFERENCE_FRAMES: &[&[u8]] = &[
        &[0x0B, 0x88, 0x02, 0x00, 0x4E],
        &[0x08, 0x0B, 0x02, 0x00, 0x48, 0x01, 0x03, 0x53],
        &[0x0B, 0x88, 0x18, 0x00, 0x20, 0xD4],
        &[0x08, 0x0B, 0x18, 0x00, 0x2D, 0x01, 0xC2, 0x64, 0x00, 0x62],
        &[0x08, 0x00, 0x18, 0x00, 0x2D, 0x01, 0xC2, 0x64, 0x00, 0x00, 0x27],
        &[0x0B, 0x08, 0x33, 0x02, 0x3C, 0x04],
        &[0x10, 0x0B, 0xFF, 0x00, 0x01, 0xA5, 0x11, 0x22, 0x7A],
    ];

    #[test]
    fn test_reference_frames_carry_their_checksum() {
        for frame in REFERENCE_FRAMES {
            let (last, body) = frame.split_last().unwrap();
            assert_eq!(checksum(body), *last, "frame {:02X?}", frame);
            assert!(verify(frame));
        }
    }

    #[test]
    fn test_table_upper_half_is_not_a_plain_shift() {
        assert_eq!(CRC_TABLE[0x7F], 0xFE);
        assert_eq!(CRC_TABLE[0x80], 0x19);
        assert_eq!(CRC_TABLE[0xFF], 0xE7);
    }

    #[test]
    fn test_any_perturbed_byte_fails_verification() {
        let good = [0x0B, 0x88, 0x02, 0x00, 0x4E];
        for i in 0..good.len() {
            let mut bad = good;
            bad[i] ^= 0x01;
            assert!(!verify(&bad), "flip at {} went unnoticed", i);
        }
    }

    #[test]
    fn test_seal_appends_checksum() {
        let mut frame = vec![0x0B, 0x88, 0x02, 0x00];
        seal(&mut frame);
        assert_eq!(frame, vec![0x0B, 0x88, 0x02, 0x00, 0x4E]);
    }

    #[test]
    fn test_verify_rejects_degenerate_frames() {
        assert!(!verify(&[]));
        assert!(!verify(&[0x00]));
    }
}
