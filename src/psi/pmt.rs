use crate::constants::TABLE_ID_PMT;
use crate::error::{Error, Result};
use crate::psi::section::SectionReader;
use crate::types::Codec;

const DESC_AC3: u8 = 0x6A;
const DESC_EAC3: u8 = 0x7A;
const DESC_DTS: u8 = 0x7B;
const DESC_REGISTRATION: u8 = 0x05;

/// ─────────── PMT ───────────
#[derive(Debug, Clone)]
pub struct PmtSection {
    pub version:        u8,
    pub program_number: u16,
    pub pcr_pid:        u16,
    pub streams:        Vec<StreamInfo>,
}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub stream_type:    u8,
    pub elementary_pid: u16,
    /// Resolved from the stream type, or from descriptors for type 0x06
    pub codec:          Option<Codec>,
}

pub fn parse_pmt(section: &[u8]) -> Result<PmtSection> {
    let sec = SectionReader::new(section)?;
    if sec.table_id != TABLE_ID_PMT {
        return Err(Error::format(format!("expected PMT, got table {:#04x}", sec.table_id)));
    }
    let b = sec.body;
    if b.len() < 4 {
        return Err(Error::Truncation { what: "PMT header", need: 4, have: b.len() });
    }

    /* ── fixed header inside the body ── */
    let pcr_pid       = (((b[0] & 0x1F) as u16) << 8) | (b[1] as u16);
    let prog_info_len = (((b[2] & 0x0F) as usize) << 8) | (b[3] as usize);
    let mut idx       = 4 + prog_info_len;          // skip program descriptors

    /* ── ES loop ── */
    let mut streams = Vec::new();
    while idx + 5 <= b.len() {
        let stype = b[idx];
        let pid   = (((b[idx+1] & 0x1F) as u16) << 8) | (b[idx+2] as u16);
        let eslen = (((b[idx+3] & 0x0F) as usize) << 8) | (b[idx+4] as usize);
        let desc_end = idx + 5 + eslen;
        if desc_end > b.len() {
            return Err(Error::Truncation { what: "PMT ES descriptors", need: desc_end, have: b.len() });
        }
        let descriptors = &b[idx + 5..desc_end];
        streams.push(StreamInfo {
            stream_type:    stype,
            elementary_pid: pid,
            codec:          codec_for_stream(stype, descriptors),
        });
        idx = desc_end;
    }

    Ok(PmtSection { version: sec.version, program_number: sec.table_id_ext, pcr_pid, streams })
}

/// Maps a PMT stream type to a codec. Private data (0x06) is resolved by
/// its DVB descriptors or a registration descriptor.
pub fn codec_for_stream(stream_type: u8, descriptors: &[u8]) -> Option<Codec> {
    let codec = match stream_type {
        0x01 => Codec::Mpeg1Video,
        0x02 => Codec::Mpeg2Video,
        0x1B => Codec::H264,
        0x24 => Codec::Hevc,
        0xEA => Codec::Vc1,
        0x03 | 0x04 => Codec::MpegAudio,
        0x0F => Codec::Aac,
        0x80 => Codec::Lpcm,
        0x81 => Codec::Ac3,
        0x82 => Codec::Dts,
        0x83 => Codec::TrueHd,
        0x84 | 0xA1 => Codec::Eac3,
        0x85 | 0x86 | 0xA2 => Codec::DtsHd,
        0x90 => Codec::Pgs,
        0x06 => return codec_from_descriptors(descriptors),
        _ => return None,
    };
    Some(codec)
}

fn codec_from_descriptors(mut d: &[u8]) -> Option<Codec> {
    while d.len() >= 2 {
        let (tag, len) = (d[0], d[1] as usize);
        let body = d.get(2..2 + len)?;
        match tag {
            DESC_AC3 => return Some(Codec::Ac3),
            DESC_EAC3 => return Some(Codec::Eac3),
            DESC_DTS => return Some(Codec::Dts),
            DESC_REGISTRATION => match body.get(..4) {
                Some(b"AC-3") => return Some(Codec::Ac3),
                Some(b"EAC3") => return Some(Codec::Eac3),
                Some(b"DTS1" | b"DTS2" | b"DTS3") => return Some(Codec::Dts),
                _ => {}
            },
            _ => {}
        }
        d = &d[2 + len..];
    }
    None
}
