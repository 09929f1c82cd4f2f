//! Codec sync-point detectors
//!
//! A sync point is an ES offset where a remuxer starts a frame, NAL unit or
//! segment, so the bytes from there on are likely copied unchanged into the
//! output file. Each detector returns the offsets found in one buffer.

mod audio;
pub mod lpcm;
mod subtitle;
mod utils;
mod video;

pub use audio::{
    ac3_family_frame_size, ac3_frame_size, adts_sync_points, ac3_sync_points, dts_sync_points,
    is_mpeg_audio_header, mpeg_audio_sync_points, parse_dts_core_header, truehd_sync_points,
    DtsCoreHeader,
};
pub use subtitle::pgs_sync_points;
pub use utils::{be_u16, contains_signature, le_u16, le_u32, le_u64, signature_positions, start_codes};
pub use video::{h264_sync_points, hevc_sync_points, mpeg_video_sync_points, vc1_sync_points};

use crate::types::Codec;

/// Runs the detector for `codec` over `data`. LPCM has no sync words; its
/// anchors come from [`fixed_interval_points`].
pub fn find_sync_points(codec: Codec, data: &[u8]) -> Vec<usize> {
    match codec {
        Codec::Mpeg1Video | Codec::Mpeg2Video => mpeg_video_sync_points(data),
        Codec::H264 => h264_sync_points(data),
        Codec::Hevc => hevc_sync_points(data),
        Codec::Vc1 => vc1_sync_points(data),
        Codec::MpegAudio => mpeg_audio_sync_points(data),
        Codec::Aac => adts_sync_points(data),
        Codec::Ac3 | Codec::Eac3 => ac3_sync_points(data),
        Codec::Dts => dts_sync_points(data, false),
        Codec::DtsHd => dts_sync_points(data, true),
        Codec::TrueHd => truehd_sync_points(data),
        Codec::Pgs => pgs_sync_points(data),
        Codec::Lpcm => Vec::new(),
    }
}

/// PGS segments are walked from the stream start, so the detector needs the
/// whole stream rather than overlapping chunks.
pub fn scans_whole_stream(codec: Codec) -> bool {
    codec == Codec::Pgs
}

/// Anchors every `interval` bytes in `[start, end)`, aligned to multiples of
/// `interval` from ES offset 0.
pub fn fixed_interval_points(start: u64, end: u64, interval: u64) -> Vec<u64> {
    if interval == 0 || start >= end {
        return Vec::new();
    }
    let first = start.div_ceil(interval) * interval;
    (first..end).step_by(interval as usize).collect()
}
