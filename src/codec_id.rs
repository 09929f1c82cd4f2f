//! Matroska codec ids and which disc codecs can have produced them.

use serde::Serialize;

use crate::types::Codec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CodecFamily {
    MpegVideo,
    H264,
    Hevc,
    Vc1,
    MpegAudio,
    Aac,
    Ac3,
    Eac3,
    Dts,
    TrueHd,
    Pcm,
    Pgs,
}

/// Exact ids first, then prefixes
const EXACT: &[(&str, CodecFamily)] = &[
    ("V_MPEG1", CodecFamily::MpegVideo),
    ("V_MPEG2", CodecFamily::MpegVideo),
    ("V_MPEG4/ISO/AVC", CodecFamily::H264),
    ("V_MPEGH/ISO/HEVC", CodecFamily::Hevc),
    ("V_MS/VFW/FOURCC", CodecFamily::Vc1),
    ("A_AC3", CodecFamily::Ac3),
    ("A_EAC3", CodecFamily::Eac3),
    ("A_TRUEHD", CodecFamily::TrueHd),
    ("A_MLP", CodecFamily::TrueHd),
    ("S_HDMV/PGS", CodecFamily::Pgs),
];

const PREFIXES: &[(&str, CodecFamily)] = &[
    ("A_MPEG/L", CodecFamily::MpegAudio),
    ("A_AAC", CodecFamily::Aac),
    ("A_AC3/", CodecFamily::Ac3),
    ("A_DTS", CodecFamily::Dts),
    ("A_PCM/INT/", CodecFamily::Pcm),
];

/// Family of a Matroska codec id such as `V_MPEG4/ISO/AVC` or `A_DTS/LOSSLESS`
pub fn family_for_codec_id(codec_id: &str) -> Option<CodecFamily> {
    EXACT
        .iter()
        .find(|(id, _)| *id == codec_id)
        .or_else(|| PREFIXES.iter().find(|(prefix, _)| codec_id.starts_with(prefix)))
        .map(|&(_, family)| family)
}

pub fn family_of(codec: Codec) -> CodecFamily {
    match codec {
        Codec::Mpeg1Video | Codec::Mpeg2Video => CodecFamily::MpegVideo,
        Codec::H264 => CodecFamily::H264,
        Codec::Hevc => CodecFamily::Hevc,
        Codec::Vc1 => CodecFamily::Vc1,
        Codec::MpegAudio => CodecFamily::MpegAudio,
        Codec::Aac => CodecFamily::Aac,
        Codec::Ac3 => CodecFamily::Ac3,
        Codec::Eac3 => CodecFamily::Eac3,
        Codec::Dts | Codec::DtsHd => CodecFamily::Dts,
        Codec::TrueHd => CodecFamily::TrueHd,
        Codec::Lpcm => CodecFamily::Pcm,
        Codec::Pgs => CodecFamily::Pgs,
    }
}

/// Whether a track tagged `codec_id` can carry bytes of a disc stream of `codec`
pub fn is_compatible(codec_id: &str, codec: Codec) -> bool {
    family_for_codec_id(codec_id) == Some(family_of(codec))
}
