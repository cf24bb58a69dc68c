//! Operation entry header: one intercepted block write, stored as a header
//! sector followed by `sector_count` data sectors.

use crate::codec::{read_le_u32, write_le_u32};
use crate::crc::crc32_journal;
use fj_error::{JrnlError, Result};
use fj_types::SectorIndex;

/// Encoded size of the header payload; the rest of the sector is zero
/// padding.
pub const OP_HEADER_BYTES: usize = 16;

/// Header fields of one journaled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpHeader {
    /// First target sector of the sequence, in the file-system area.
    pub target_sector: SectorIndex,
    /// Number of contiguous target sectors.
    pub sector_count: u32,
    /// Checksum of the full data payload.
    pub crc32_data: u32,
}

impl OpHeader {
    /// Store sectors the whole entry occupies: header plus data.
    #[must_use]
    pub fn entry_sectors(&self) -> u32 {
        1 + self.sector_count
    }

    /// Checksum over the three encoded header fields.
    #[must_use]
    pub fn header_crc(&self) -> u32 {
        let mut fields = [0_u8; 12];
        write_le_u32(&mut fields, 0, self.target_sector.0);
        write_le_u32(&mut fields, 4, self.sector_count);
        write_le_u32(&mut fields, 8, self.crc32_data);
        crc32_journal(&fields)
    }

    /// Encode into a header sector: four little-endian words, the rest
    /// zeroed.
    pub fn encode_sector(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < OP_HEADER_BYTES {
            return Err(JrnlError::InvalidArgument(format!(
                "header sector buffer too small: {} bytes",
                buf.len()
            )));
        }
        buf.fill(0);
        write_le_u32(buf, 0, self.target_sector.0);
        write_le_u32(buf, 4, self.sector_count);
        write_le_u32(buf, 8, self.crc32_data);
        write_le_u32(buf, 12, self.header_crc());
        Ok(())
    }

    /// Decode a header sector, returning the fields and the stored header
    /// checksum. The caller compares against [`OpHeader::header_crc`];
    /// decoding itself does not validate.
    pub fn decode_sector(bytes: &[u8]) -> Result<(Self, u32)> {
        if bytes.len() < OP_HEADER_BYTES {
            return Err(JrnlError::InvalidArgument(format!(
                "header sector buffer too small: {} bytes",
                bytes.len()
            )));
        }
        let word = |offset| read_le_u32(bytes, offset).unwrap_or(0);
        let header = Self {
            target_sector: SectorIndex(word(0)),
            sector_count: word(4),
            crc32_data: word(8),
        };
        Ok((header, word(12)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let header = OpHeader {
            target_sector: SectorIndex(20),
            sector_count: 3,
            crc32_data: 0xDEAD_BEEF,
        };
        let mut buf = vec![0xAA_u8; 4096];
        header.encode_sector(&mut buf).expect("encode");
        assert!(buf[OP_HEADER_BYTES..].iter().all(|b| *b == 0));

        let (decoded, stored_crc) = OpHeader::decode_sector(&buf).expect("decode");
        assert_eq!(decoded, header);
        assert_eq!(stored_crc, header.header_crc());
        assert_eq!(decoded.entry_sectors(), 4);
    }

    #[test]
    fn header_crc_covers_every_field() {
        let base = OpHeader {
            target_sector: SectorIndex(20),
            sector_count: 1,
            crc32_data: 0,
        };
        let crc = base.header_crc();
        assert_ne!(
            crc,
            OpHeader {
                target_sector: SectorIndex(21),
                ..base
            }
            .header_crc()
        );
        assert_ne!(
            crc,
            OpHeader {
                sector_count: 2,
                ..base
            }
            .header_crc()
        );
        assert_ne!(
            crc,
            OpHeader {
                crc32_data: 1,
                ..base
            }
            .header_crc()
        );
    }

    #[test]
    fn tampered_header_fails_crc_comparison() {
        let header = OpHeader {
            target_sector: SectorIndex(7),
            sector_count: 2,
            crc32_data: 0x1234_5678,
        };
        let mut buf = vec![0_u8; 512];
        header.encode_sector(&mut buf).expect("encode");
        buf[4] ^= 0x01;
        let (decoded, stored_crc) = OpHeader::decode_sector(&buf).expect("decode");
        assert_ne!(decoded.header_crc(), stored_crc);
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(matches!(
            OpHeader::decode_sector(&[0_u8; 8]),
            Err(JrnlError::InvalidArgument(_))
        ));
    }
}
