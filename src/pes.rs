//! PES header parsing shared by the program-stream and transport-stream
//! demuxers.

use crate::constants::{
    PADDING_STREAM, PES_FIXED_HEADER, PES_MPEG2_HEADER, PES_START_CODE, PRIVATE_STREAM_2,
    PROGRAM_STREAM_MAP,
};
use crate::error::{Error, Result};

/// MPEG-1 allows at most 16 stuffing bytes
const MPEG1_MAX_STUFFING: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PesHeader {
    pub stream_id: u8,
    /// PES_packet_length; 0 means unbounded (video in TS)
    pub packet_length: u16,
    /// Bytes from the start code to the first payload byte
    pub header_len: usize,
}

impl PesHeader {
    /// Payload bytes declared by the packet, if bounded
    pub fn payload_len(&self) -> Option<usize> {
        (self.packet_length != 0)
            .then(|| (PES_FIXED_HEADER + self.packet_length as usize).saturating_sub(self.header_len))
    }

    /// Total packet size including the 6-byte prefix, if bounded
    pub fn total_len(&self) -> Option<usize> {
        (self.packet_length != 0).then(|| PES_FIXED_HEADER + self.packet_length as usize)
    }
}

/// Stream ids whose packets carry no optional header fields
pub fn has_no_header_fields(stream_id: u8) -> bool {
    matches!(stream_id, PROGRAM_STREAM_MAP | PADDING_STREAM | PRIVATE_STREAM_2 | 0xF0 | 0xF1 | 0xF2 | 0xF8 | 0xFF)
}

/// Length of the PES header at `data[0]`, or `None` when more bytes are
/// needed to tell. Both MPEG-2 (`10` marker) and MPEG-1 headers are accepted.
pub fn header_len(data: &[u8]) -> Result<Option<usize>> {
    if data.len() < PES_FIXED_HEADER {
        return Ok(None);
    }
    if data[..3] != PES_START_CODE {
        return Err(Error::format("missing PES start code"));
    }
    if has_no_header_fields(data[3]) {
        return Ok(Some(PES_FIXED_HEADER));
    }
    let Some(&first) = data.get(PES_FIXED_HEADER) else {
        return Ok(None);
    };
    if first & 0xC0 == 0x80 {
        return Ok(data.get(8).map(|&n| PES_MPEG2_HEADER + n as usize));
    }
    mpeg1_header_len(data)
}

fn mpeg1_header_len(data: &[u8]) -> Result<Option<usize>> {
    let mut pos = PES_FIXED_HEADER;
    let mut stuffing = 0;
    loop {
        let Some(&b) = data.get(pos) else { return Ok(None) };
        if b != 0xFF {
            break;
        }
        stuffing += 1;
        if stuffing > MPEG1_MAX_STUFFING {
            return Err(Error::format("too much MPEG-1 PES stuffing"));
        }
        pos += 1;
    }
    // STD buffer scale/size
    if data[pos] & 0xC0 == 0x40 {
        pos += 2;
    }
    let Some(&b) = data.get(pos) else { return Ok(None) };
    let len = match b >> 4 {
        0x2 => pos + 5,
        0x3 => pos + 10,
        _ if b == 0x0F => pos + 1,
        _ => return Err(Error::format(format!("invalid MPEG-1 PES header byte {b:#04x}"))),
    };
    Ok(Some(len))
}

/// Parses a complete PES header. Fails with `Truncation` when `data` ends
/// inside it.
pub fn parse_header(data: &[u8]) -> Result<PesHeader> {
    let header_len = header_len(data)?
        .ok_or(Error::Truncation { what: "PES header", need: PES_MPEG2_HEADER, have: data.len() })?;
    if header_len > data.len() {
        return Err(Error::Truncation { what: "PES header", need: header_len, have: data.len() });
    }
    let packet_length = u16::from_be_bytes([data[4], data[5]]);
    if packet_length != 0 && PES_FIXED_HEADER + (packet_length as usize) < header_len {
        return Err(Error::format("PES packet shorter than its header"));
    }
    Ok(PesHeader { stream_id: data[3], packet_length, header_len })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mpeg2_header_with_pts() {
        let data = [0, 0, 1, 0xE0, 0x00, 0x20, 0x80, 0x80, 0x05, 0x21, 0, 1, 0, 1, 0xAA];
        let h = parse_header(&data).unwrap();
        assert_eq!(h.header_len, 14);
        assert_eq!(h.payload_len(), Some(0x20 + 6 - 14));
    }

    #[test]
    fn test_needs_more_bytes() {
        assert_eq!(header_len(&[0, 0, 1, 0xE0, 0, 0]).unwrap(), None);
        assert_eq!(header_len(&[0, 0, 1, 0xE0, 0, 0, 0x80, 0x80]).unwrap(), None);
        assert_eq!(header_len(&[0, 0, 1, 0xE0, 0, 0, 0x80, 0x80, 5]).unwrap(), Some(14));
        assert!(matches!(
            parse_header(&[0, 0, 1, 0xE0, 0, 0, 0x80, 0x80, 5, 0]),
            Err(Error::Truncation { .. })
        ));
    }

    #[test]
    fn test_mpeg1_header_variants() {
        // stuffing, STD buffer, PTS only
        let data = [0, 0, 1, 0xC0, 0, 20, 0xFF, 0xFF, 0x40, 0x20, 0x21, 0, 1, 0, 1, 0x55];
        assert_eq!(header_len(&data).unwrap(), Some(15));
        // no timestamps
        assert_eq!(header_len(&[0, 0, 1, 0xE0, 0, 8, 0x0F, 0x55]).unwrap(), Some(7));
        assert!(header_len(&[0, 0, 1, 0xE0, 0, 8, 0x10, 0x55]).is_err());
    }

    #[test]
    fn test_padding_has_fixed_header() {
        let h = parse_header(&[0, 0, 1, PADDING_STREAM, 0, 4, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
        assert_eq!(h.header_len, 6);
        assert_eq!(h.total_len(), Some(10));
    }
}
