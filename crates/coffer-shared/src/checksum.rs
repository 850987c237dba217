//! POSIX `cksum` CRC-32.
//!
//! Clients compute this over the plaintext before encrypting an upload and
//! compare it with the value the server reports after decrypting. This is
//! not the zlib CRC-32: the polynomial is processed MSB first, the message
//! length is folded in after the data and the result is inverted.

const POLYNOMIAL: u32 = 0x04C1_1DB7;

const TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

#[inline]
fn step(crc: u32, byte: u8) -> u32 {
    (crc << 8) ^ TABLE[((crc >> 24) as u8 ^ byte) as usize]
}

/// Compute the `cksum` value of `data`.
pub fn checksum(data: &[u8]) -> u32 {
    let mut crc = data.iter().fold(0u32, |crc, &b| step(crc, b));

    // length, least significant byte first, no trailing zero bytes
    let mut len = data.len() as u64;
    while len != 0 {
        crc = step(crc, (len & 0xFF) as u8);
        len >>= 8;
    }

    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        assert_eq!(checksum(b"hello there"), 3_141_126_258);
    }

    #[test]
    fn test_long_input() {
        let data = vec![b'a'; 500];
        assert_eq!(checksum(&data), 134_456_518);
    }

    #[test]
    fn test_hello() {
        assert_eq!(checksum(b"hello"), 3_287_646_509);
    }

    #[test]
    fn test_empty() {
        assert_eq!(checksum(b""), 0xFFFF_FFFF);
    }

    #[test]
    fn test_deterministic() {
        let data = b"backup me twice";
        assert_eq!(checksum(data), checksum(data));
        assert_ne!(checksum(data), checksum(b"backup me thrice"));
    }

    #[test]
    fn test_table_entries() {
        assert_eq!(TABLE[0], 0);
        assert_eq!(TABLE[1], POLYNOMIAL);
        assert_eq!(TABLE[255], 0xB1F7_40B4);
    }
}
