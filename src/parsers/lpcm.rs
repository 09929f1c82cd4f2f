//! LPCM layouts as stored on disc and their little-endian interleaved form.
//!
//! Blu-ray stores big-endian samples, 20-bit samples left-justified in 3
//! bytes. DVD stores 16-bit samples big-endian; 20/24-bit samples are split
//! into groups of up to four samples: the high 16 bits of each sample first,
//! then the low bits (one byte per sample for 24-bit, one nibble per sample,
//! high nibble first, for 20-bit).

use bitstream_io::{BigEndian, BitRead, BitReader};
use serde::Serialize;

use crate::constants::LPCM_SYNC_INTERVAL;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LpcmLayout {
    Dvd,
    BluRay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LpcmFormat {
    pub layout: LpcmLayout,
    pub bits: u8,
    /// Channels as coded in the stream (Blu-ray pads odd counts to even)
    pub channels: u8,
    pub sample_rate: u32,
}

impl LpcmFormat {
    pub fn new(layout: LpcmLayout, bits: u8, channels: u8, sample_rate: u32) -> Result<Self> {
        if !matches!(bits, 16 | 20 | 24) {
            return Err(Error::format(format!("unsupported LPCM depth {bits}")));
        }
        if channels == 0 || channels > 8 {
            return Err(Error::format(format!("unsupported LPCM channel count {channels}")));
        }
        Ok(Self { layout, bits, channels, sample_rate })
    }

    /// Bytes per sample in the little-endian form
    pub fn pcm_sample_bytes(&self) -> usize {
        if self.bits == 16 { 2 } else { 3 }
    }

    /// Smallest unit both layouts can be converted in, as disc bytes
    pub fn disc_block_size(&self) -> usize {
        let ch = self.channels as usize;
        match (self.layout, self.bits) {
            (_, 16) => ch * 2,
            (LpcmLayout::BluRay, _) => ch * 3,
            (LpcmLayout::Dvd, 20) => ch * 5,
            (LpcmLayout::Dvd, _) => ch * 6,
        }
    }

    /// Size of the same block in the little-endian form
    pub fn pcm_block_size(&self) -> usize {
        let ch = self.channels as usize;
        match (self.layout, self.bits) {
            (_, 16) => ch * 2,
            (LpcmLayout::BluRay, _) => ch * 3,
            (LpcmLayout::Dvd, _) => ch * 6,
        }
    }

    /// Distance between consecutive hashing anchors
    pub fn sync_interval(&self) -> usize {
        let block = self.disc_block_size();
        (LPCM_SYNC_INTERVAL / block).max(1) * block
    }

    fn dvd_group(&self) -> usize {
        (self.channels as usize * 2).min(4)
    }
}

/// Parses the 4-byte header Blu-ray puts in front of every LPCM PES payload.
pub fn parse_bd_lpcm_header(data: &[u8]) -> Option<LpcmFormat> {
    let mut br = BitReader::endian(data.get(..4)?, BigEndian);
    br.skip(16).ok()?; // audio_data_payload_size
    let assignment = br.read::<4, u8>().ok()?;
    let rate = br.read::<4, u8>().ok()?;
    let bits = br.read::<2, u8>().ok()?;

    let channels = match assignment {
        1 => 1,
        3 => 2,
        4 | 5 => 3,
        6 | 7 => 4,
        8 => 5,
        9 => 6,
        10 => 7,
        11 => 8,
        _ => return None,
    };
    let sample_rate = match rate {
        1 => 48_000,
        4 => 96_000,
        5 => 192_000,
        _ => return None,
    };
    let bits = match bits {
        1 => 16,
        2 => 20,
        3 => 24,
        _ => return None,
    };
    // odd channel counts are padded with a silent channel
    let coded = channels + (channels & 1);
    LpcmFormat::new(LpcmLayout::BluRay, bits, coded, sample_rate).ok()
}

/// Parses the 3-byte DVD LPCM header that follows the Private Stream 1
/// sub-stream header.
pub fn parse_dvd_lpcm_header(data: &[u8]) -> Option<LpcmFormat> {
    let mut br = BitReader::endian(data.get(..3)?, BigEndian);
    br.skip(8).ok()?; // emphasis, mute, frame number
    let quant = br.read::<2, u8>().ok()?;
    let rate = br.read::<2, u8>().ok()?;
    br.skip(1).ok()?;
    let channels = br.read::<3, u8>().ok()? + 1;

    let bits = match quant {
        0 => 16,
        1 => 20,
        2 => 24,
        _ => return None,
    };
    let sample_rate = if rate == 1 { 96_000 } else { 48_000 };
    LpcmFormat::new(LpcmLayout::Dvd, bits, channels, sample_rate).ok()
}

/// Converts disc-layout LPCM to little-endian interleaved samples.
pub fn to_little_endian(format: &LpcmFormat, disc: &[u8]) -> Result<Vec<u8>> {
    let block = format.disc_block_size();
    if disc.len() % block != 0 {
        return Err(Error::Truncation { what: "LPCM block", need: block, have: disc.len() % block });
    }
    let mut out = Vec::with_capacity(disc.len() / block * format.pcm_block_size());

    match (format.layout, format.bits) {
        (_, 16) => {
            for s in disc.chunks_exact(2) {
                out.extend_from_slice(&[s[1], s[0]]);
            }
        }
        (LpcmLayout::BluRay, _) => {
            for s in disc.chunks_exact(3) {
                out.extend_from_slice(&[s[2], s[1], s[0]]);
            }
        }
        (LpcmLayout::Dvd, bits) => {
            let g = format.dvd_group();
            let low_len = if bits == 24 { g } else { g / 2 };
            for group in disc.chunks_exact(g * 2 + low_len) {
                let (high, low) = group.split_at(g * 2);
                for i in 0..g {
                    let lsb = if bits == 24 {
                        low[i]
                    } else {
                        let nib = low[i / 2];
                        (if i % 2 == 0 { nib & 0xF0 } else { nib << 4 }) & 0xF0
                    };
                    out.extend_from_slice(&[lsb, high[i * 2 + 1], high[i * 2]]);
                }
            }
        }
    }
    Ok(out)
}

/// Inverse of [`to_little_endian`].
pub fn from_little_endian(format: &LpcmFormat, pcm: &[u8]) -> Result<Vec<u8>> {
    let block = format.pcm_block_size();
    if pcm.len() % block != 0 {
        return Err(Error::Truncation { what: "PCM block", need: block, have: pcm.len() % block });
    }
    let mut out = Vec::with_capacity(pcm.len() / block * format.disc_block_size());

    match (format.layout, format.bits) {
        (_, 16) => {
            for s in pcm.chunks_exact(2) {
                out.extend_from_slice(&[s[1], s[0]]);
            }
        }
        (LpcmLayout::BluRay, _) => {
            for s in pcm.chunks_exact(3) {
                out.extend_from_slice(&[s[2], s[1], s[0]]);
            }
        }
        (LpcmLayout::Dvd, bits) => {
            let g = format.dvd_group();
            for group in pcm.chunks_exact(g * 3) {
                for s in group.chunks_exact(3) {
                    out.extend_from_slice(&[s[2], s[1]]);
                }
                if bits == 24 {
                    out.extend(group.chunks_exact(3).map(|s| s[0]));
                } else {
                    for pair in group.chunks_exact(6) {
                        out.push((pair[0] & 0xF0) | (pair[3] >> 4));
                    }
                }
            }
        }
    }
    Ok(out)
}
