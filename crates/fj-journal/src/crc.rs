//! Journal checksum: IEEE 802.3 CRC-32, reflected, seed `0xFFFF_FFFF`,
//! taken without the final complement. That is the bitwise NOT of the
//! standard CRC-32 digest, which lets the table-driven `crc32fast` kernel
//! do the work.

/// Checksum of `bytes` in the on-disk journal convention.
#[must_use]
pub fn crc32_journal(bytes: &[u8]) -> u32 {
    !crc32fast::hash(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_answer_check_string() {
        // Standard CRC-32 of "123456789" is 0xCBF4_3926; the journal
        // variant drops the final complement.
        assert_eq!(crc32_journal(b"123456789"), 0x340B_C6D9);
    }

    #[test]
    fn empty_input_yields_seed() {
        assert_eq!(crc32_journal(b""), 0xFFFF_FFFF);
    }

    #[test]
    fn single_bit_flip_changes_digest() {
        let a = vec![0_u8; 4096];
        let mut b = a.clone();
        b[1000] ^= 1;
        assert_ne!(crc32_journal(&a), crc32_journal(&b));
    }
}
