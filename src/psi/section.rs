// psi/section.rs
//! PSI section reassembly and the generic section reader with CRC-32
//! (MPEG-2) validation.

use crc::{CRC_32_MPEG_2, Crc};

use crate::constants::MAX_SECTION_LENGTH;
use crate::error::{Error, Result};

/// Returned by [`SectionReader::new`].
pub struct SectionReader<'a> {
    pub table_id:       u8,
    pub version:        u8,
    pub current_next:   bool,
    pub section_number: u8,
    pub last_section:   u8,
    /// transport_stream_id for PAT, program_number for PMT
    pub table_id_ext:   u16,
    pub body:           &'a [u8],   // bytes between fixed header & CRC
}

const CRC_MPEG: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

impl<'a> SectionReader<'a> {
    /// Validates length and CRC-32 of one complete long-form section
    /// starting at `table_id`.
    pub fn new(section: &'a [u8]) -> Result<Self> {
        if section.len() < 3 {
            return Err(Error::Truncation { what: "PSI section header", need: 3, have: section.len() });
        }
        let table_id = section[0];
        let sec_len  = section_length(section);
        if !(9..=MAX_SECTION_LENGTH).contains(&sec_len) {
            return Err(Error::format(format!("invalid section_length {sec_len}")));
        }
        let end = 3 + sec_len;
        if end > section.len() {
            return Err(Error::Truncation { what: "PSI section", need: end, have: section.len() });
        }

        let crc_calc = CRC_MPEG.checksum(&section[..end - 4]);
        let crc_pkt  = u32::from_be_bytes([section[end - 4], section[end - 3], section[end - 2], section[end - 1]]);
        if crc_calc != crc_pkt {
            return Err(Error::format(format!("CRC-32 mismatch in table {table_id:#04x}")));
        }

        Ok(Self {
            table_id,
            version:        (section[5] & 0x3E) >> 1,
            current_next:   section[5] & 0x01 != 0,
            section_number: section[6],
            last_section:   section[7],
            table_id_ext:   u16::from_be_bytes([section[3], section[4]]),
            body:           &section[8..end - 4],
        })
    }
}

fn section_length(section: &[u8]) -> usize {
    ((section[1] & 0x0F) as usize) << 8 | section[2] as usize
}

/// Collects one section for a PID across TS packets.
///
/// The packet with `payload_unit_start_indicator` set carries the pointer
/// field; the declared `section_length` is accumulated from it and the
/// following packets of the same PID.
#[derive(Debug, Default)]
pub struct SectionAssembler {
    buf:    Vec<u8>,
    active: bool,
}

impl SectionAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one TS payload. Returns the complete section once all of its
    /// bytes have arrived.
    pub fn push(&mut self, pusi: bool, payload: &[u8]) -> Result<Option<Vec<u8>>> {
        if pusi {
            let pointer = *payload.first().ok_or_else(|| Error::format("empty PSI payload"))? as usize;
            let start = 1 + pointer;
            if start > payload.len() {
                return Err(Error::Truncation { what: "PSI pointer field", need: start, have: payload.len() });
            }
            self.buf.clear();
            self.buf.extend_from_slice(&payload[start..]);
            self.active = true;
        } else if self.active {
            self.buf.extend_from_slice(payload);
        } else {
            return Ok(None);
        }
        self.take_complete()
    }

    fn take_complete(&mut self) -> Result<Option<Vec<u8>>> {
        if self.buf.len() < 3 {
            return Ok(None);
        }
        let end = 3 + section_length(&self.buf);
        if end > 3 + MAX_SECTION_LENGTH {
            self.reset();
            return Err(Error::format(format!("section_length {} exceeds limit", end - 3)));
        }
        if self.buf.len() < end {
            return Ok(None);
        }
        self.active = false;
        let mut section = std::mem::take(&mut self.buf);
        section.truncate(end);
        Ok(Some(section))
    }

    /// Called at end of data: a started section that never completed is
    /// a truncation.
    pub fn finish(&self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        let have = self.buf.len();
        let need = if have >= 3 { 3 + section_length(&self.buf) } else { 3 };
        Err(Error::Truncation { what: "PSI section", need, have })
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.active = false;
    }
}

#[cfg(test)]
pub(crate) fn seal_section(mut section: Vec<u8>) -> Vec<u8> {
    let crc = CRC_MPEG.checksum(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    section
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pat_section() -> Vec<u8> {
        // table_id, length 13, tsid 1, version 0 current, sec 0/0, program 1 -> PID 0x100
        seal_section(vec![0x00, 0xB0, 0x0D, 0x00, 0x01, 0xC1, 0x00, 0x00, 0x00, 0x01, 0xE1, 0x00])
    }

    #[test]
    fn test_reader_validates_crc() {
        let mut sec = pat_section();
        let rd = SectionReader::new(&sec).unwrap();
        assert_eq!(rd.table_id, 0);
        assert_eq!(rd.body, &[0x00, 0x01, 0xE1, 0x00]);
        sec[9] ^= 1;
        assert!(matches!(SectionReader::new(&sec), Err(Error::Format(_))));
    }

    #[test]
    fn test_assembles_across_packets() {
        let sec = pat_section();
        let mut first = vec![0u8];
        first.extend_from_slice(&sec[..5]);
        let mut asm = SectionAssembler::new();
        assert!(asm.push(true, &first).unwrap().is_none());
        assert!(asm.finish().is_err());
        let mut rest = sec[5..].to_vec();
        rest.extend_from_slice(&[0xFF; 20]);
        let got = asm.push(false, &rest).unwrap().unwrap();
        assert_eq!(got, sec);
        assert!(asm.finish().is_ok());
    }

    #[test]
    fn test_incomplete_section_is_truncation() {
        let sec = pat_section();
        let mut asm = SectionAssembler::new();
        let mut first = vec![0u8];
        first.extend_from_slice(&sec[..10]);
        asm.push(true, &first).unwrap();
        assert!(matches!(asm.finish(), Err(Error::Truncation { need: 16, have: 10, .. })));
    }

    #[test]
    fn test_continuation_without_start_is_ignored() {
        let mut asm = SectionAssembler::new();
        assert!(asm.push(false, &[1, 2, 3, 4]).unwrap().is_none());
        assert!(asm.finish().is_ok());
    }
}
