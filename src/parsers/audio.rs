//! Audio sync-point detectors and frame header helpers

use bitstream_io::{BigEndian, BitRead, BitReader};

use super::utils::signature_positions;
use crate::constants::{AC3_SYNC, DTS_CORE_SYNC, DTS_EXSS_SYNC, TRUEHD_MAJOR_SYNC};

/// AC-3 words per syncframe (ATSC A/52 table 5.18), indexed by
/// `frmsizecod / 2`, for 48 kHz, 44.1 kHz and 32 kHz.
const AC3_WORDS_48K: [u16; 19] = [
    64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 448, 512, 640, 768, 896, 1024, 1152, 1280,
];
const AC3_WORDS_44K: [u16; 19] = [
    69, 87, 104, 121, 139, 174, 208, 243, 278, 348, 417, 487, 557, 696, 835, 975, 1114, 1253, 1393,
];
const AC3_WORDS_32K: [u16; 19] = [
    96, 120, 144, 168, 192, 240, 288, 336, 384, 480, 576, 672, 768, 960, 1152, 1344, 1536, 1728,
    1920,
];

/// AC-3 frame size in bytes, 0 for reserved codes
pub fn ac3_frame_size(fscod: u8, frmsizecod: u8) -> u32 {
    if frmsizecod >= 38 {
        return 0;
    }
    let idx = (frmsizecod / 2) as usize;
    let words = match fscod {
        0 => AC3_WORDS_48K[idx],
        // 44.1 kHz frames alternate between two sizes
        1 => AC3_WORDS_44K[idx] + (frmsizecod & 1) as u16,
        2 => AC3_WORDS_32K[idx],
        _ => return 0,
    };
    words as u32 * 2
}

/// Frame size of the AC-3 or E-AC-3 frame starting at `data[0]`, if the
/// header is valid. Needs 6 bytes.
pub fn ac3_family_frame_size(data: &[u8]) -> Option<u32> {
    if data.len() < 6 || data[..2] != AC3_SYNC {
        return None;
    }
    let bsid = data[5] >> 3;
    match bsid {
        0..=10 => {
            let size = ac3_frame_size(data[4] >> 6, data[4] & 0x3F);
            (size != 0).then_some(size)
        }
        11..=16 => {
            let strmtyp = data[2] >> 6;
            let frmsiz = (((data[2] & 0x07) as u32) << 8) | data[3] as u32;
            let fscod = data[4] >> 6;
            if strmtyp == 3 || (fscod == 3 && (data[4] >> 4) & 0x03 == 3) {
                return None;
            }
            Some((frmsiz + 1) * 2)
        }
        _ => None,
    }
}

/// AC-3 / E-AC-3 sync points
pub fn ac3_sync_points(data: &[u8]) -> Vec<usize> {
    signature_positions(data, &AC3_SYNC)
        .filter(|&pos| ac3_family_frame_size(&data[pos..]).is_some())
        .collect()
}

/// Fields of a DTS core frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtsCoreHeader {
    pub nblks: u8,
    /// FSIZE + 1. On Blu-ray DTS-HD this is not always the core-only size.
    pub frame_size: u32,
    pub amode: u8,
    pub sfreq: u8,
}

/// Parses the core header at `data[0]`. Needs 9 bytes.
pub fn parse_dts_core_header(data: &[u8]) -> Option<DtsCoreHeader> {
    if data.get(..4)? != DTS_CORE_SYNC {
        return None;
    }
    let mut br = BitReader::endian(data.get(4..9)?, BigEndian);
    br.skip(1 + 5 + 1).ok()?; // FTYPE, SHORT, CPF
    let nblks = br.read::<7, u8>().ok()?;
    let fsize = br.read::<14, u16>().ok()?;
    let amode = br.read::<6, u8>().ok()?;
    let sfreq = br.read::<4, u8>().ok()?;

    // sample blocks 6..=127, FSIZE 95..=16383
    if nblks < 5 || fsize < 95 {
        return None;
    }
    if !matches!(sfreq, 1 | 2 | 3 | 6 | 7 | 8 | 11 | 12 | 13) {
        return None;
    }
    Some(DtsCoreHeader { nblks, frame_size: fsize as u32 + 1, amode, sfreq })
}

/// DTS core sync points; with `include_exss` DTS-HD extension substream
/// headers are anchors too.
pub fn dts_sync_points(data: &[u8], include_exss: bool) -> Vec<usize> {
    let mut points: Vec<usize> = signature_positions(data, &DTS_CORE_SYNC)
        .filter(|&pos| parse_dts_core_header(&data[pos..]).is_some())
        .collect();
    if include_exss {
        points.extend(signature_positions(data, &DTS_EXSS_SYNC).filter(|&pos| pos + 8 <= data.len()));
        points.sort_unstable();
    }
    points
}

/// TrueHD access units start 4 bytes before the major sync
pub fn truehd_sync_points(data: &[u8]) -> Vec<usize> {
    signature_positions(data, &TRUEHD_MAJOR_SYNC)
        .filter(|&pos| pos >= 4)
        .map(|pos| pos - 4)
        .collect()
}

/// Checks an MPEG audio (Layer I/II/III) frame header at `h[0]`.
pub fn is_mpeg_audio_header(h: &[u8]) -> bool {
    if h.len() < 4 || h[0] != 0xFF || h[1] & 0xE0 != 0xE0 {
        return false;
    }
    let version = (h[1] >> 3) & 0x03;
    let layer = (h[1] >> 1) & 0x03;
    let bitrate_index = h[2] >> 4;
    let sample_rate_index = (h[2] >> 2) & 0x03;
    version != 0x01 && layer != 0x00 && bitrate_index != 0x00 && bitrate_index != 0x0F && sample_rate_index != 0x03
}

/// MPEG audio sync points
pub fn mpeg_audio_sync_points(data: &[u8]) -> Vec<usize> {
    memchr::memchr_iter(0xFF, data)
        .filter(|&pos| is_mpeg_audio_header(&data[pos..]))
        .collect()
}

/// AAC ADTS sync points
pub fn adts_sync_points(data: &[u8]) -> Vec<usize> {
    memchr::memchr_iter(0xFF, data)
        .filter(|&pos| {
            let h = &data[pos..];
            h.len() >= 7 && (h[1] & 0xF6) == 0xF0 && (h[2] & 0x3C) >> 2 < 12 && {
                let frame_len = (((h[3] & 0x03) as usize) << 11) | ((h[4] as usize) << 3) | (h[5] as usize >> 5);
                frame_len >= 7
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ac3_frame_size_table() {
        assert_eq!(ac3_frame_size(0, 4), 192);
        assert_eq!(ac3_frame_size(1, 0), 138);
        assert_eq!(ac3_frame_size(1, 1), 140);
        assert_eq!(ac3_frame_size(2, 37), 3840);
        for fscod in 0..3u8 {
            for code in 0..38u8 {
                let size = ac3_frame_size(fscod, code);
                assert!(size > 0 && size % 2 == 0, "fscod {fscod} code {code}");
            }
        }
        assert_eq!(ac3_frame_size(3, 4), 0);
        assert_eq!(ac3_frame_size(0, 38), 0);
    }

    #[test]
    fn test_ac3_detector_ignores_ts_padding() {
        let data = [0xFFu8; 256];
        assert!(ac3_sync_points(&data).is_empty());
        assert!(mpeg_audio_sync_points(&data).is_empty());
        assert!(adts_sync_points(&data).is_empty());
    }

    #[test]
    fn test_ac3_detector_finds_valid_frames() {
        let mut data = vec![0u8; 400];
        // valid: 48 kHz, frmsizecod 4, bsid 8
        data[10..16].copy_from_slice(&[0x0B, 0x77, 0, 0, 0x04, 8 << 3]);
        // invalid frmsizecod 60
        data[100..106].copy_from_slice(&[0x0B, 0x77, 0, 0, 60, 8 << 3]);
        // E-AC-3: strmtyp 0, frmsiz 0x0FF, bsid 16
        data[200..206].copy_from_slice(&[0x0B, 0x77, 0x00, 0xFF, 0x3F, 16 << 3]);
        // truncated header at the tail
        data[396..398].copy_from_slice(&[0x0B, 0x77]);
        assert_eq!(ac3_sync_points(&data), vec![10, 200]);
        assert_eq!(ac3_family_frame_size(&data[200..]), Some(512));
    }

    #[test]
    fn test_dts_core_header() {
        // FTYPE 1, SHORT 31, CPF 0, NBLKS 15, FSIZE 2012, AMODE 9, SFREQ 13
        let mut h = DTS_CORE_SYNC.to_vec();
        h.extend_from_slice(&[0xFC, 0x3C, 0x7D, 0xC2, 0x74]);
        let hdr = parse_dts_core_header(&h).unwrap();
        assert_eq!(hdr.nblks, 15);
        assert_eq!(hdr.frame_size, 2013);
        assert_eq!(hdr.sfreq, 13);
        assert!(parse_dts_core_header(&h[..8]).is_none());
    }

    #[test]
    fn test_truehd_anchor_precedes_major_sync() {
        let mut data = vec![0u8; 64];
        data[2..6].copy_from_slice(&TRUEHD_MAJOR_SYNC);
        data[20..24].copy_from_slice(&TRUEHD_MAJOR_SYNC);
        assert_eq!(truehd_sync_points(&data), vec![16]);
    }

    #[test]
    fn test_mpeg_audio_header() {
        // MPEG-1 Layer II, 192 kbps, 48 kHz
        assert!(is_mpeg_audio_header(&[0xFF, 0xFD, 0xA4, 0x00]));
        // bitrate index 15 is invalid
        assert!(!is_mpeg_audio_header(&[0xFF, 0xFD, 0xF4, 0x00]));
    }
}
