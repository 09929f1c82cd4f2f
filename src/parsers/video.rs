//! Video sync-point detectors

use super::utils::start_codes;

const MPEG_PICTURE: u8 = 0x00;
const MPEG_SEQUENCE_HEADER: u8 = 0xB3;
const MPEG_GOP: u8 = 0xB8;

/// MPEG-1/2 video: sequence headers, GOP headers and pictures. Anchors sit
/// on the start code, which remuxers keep for these codecs.
pub fn mpeg_video_sync_points(data: &[u8]) -> Vec<usize> {
    start_codes(data)
        .filter(|&(_, code)| matches!(code, MPEG_PICTURE | MPEG_SEQUENCE_HEADER | MPEG_GOP))
        .map(|(pos, _)| pos)
        .collect()
}

/// H.264: slices, IDR slices, SPS and PPS. Anchors sit on the NAL header
/// byte because Matroska stores NAL units length-prefixed.
pub fn h264_sync_points(data: &[u8]) -> Vec<usize> {
    start_codes(data)
        .filter(|&(_, hdr)| {
            let forbidden = hdr & 0x80;
            let nal_type = hdr & 0x1F;
            forbidden == 0 && matches!(nal_type, 1 | 5 | 7 | 8)
        })
        .map(|(pos, _)| pos + 3)
        .collect()
}

/// HEVC: VCL NAL units plus VPS/SPS/PPS, anchored on the 2-byte NAL header
pub fn hevc_sync_points(data: &[u8]) -> Vec<usize> {
    start_codes(data)
        .filter(|&(pos, hdr)| {
            let nal_type = (hdr >> 1) & 0x3F;
            hdr & 0x80 == 0 && pos + 4 < data.len() && matches!(nal_type, 0..=21 | 32..=34)
        })
        .map(|(pos, _)| pos + 3)
        .collect()
}

/// VC-1 advanced profile: sequence header, entry point and frame start codes
pub fn vc1_sync_points(data: &[u8]) -> Vec<usize> {
    start_codes(data)
        .filter(|&(_, code)| matches!(code, 0x0D | 0x0E | 0x0F))
        .map(|(pos, _)| pos)
        .collect()
}
