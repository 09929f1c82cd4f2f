use serde::Serialize;

use crate::parsers::lpcm::LpcmFormat;

/// Codec carried by an elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Codec {
    Mpeg1Video,
    Mpeg2Video,
    H264,
    Hevc,
    Vc1,
    MpegAudio,
    Aac,
    Ac3,
    Eac3,
    Dts,
    DtsHd,
    TrueHd,
    Lpcm,
    Pgs,
}

impl Codec {
    pub fn is_video(self) -> bool {
        matches!(
            self,
            Codec::Mpeg1Video | Codec::Mpeg2Video | Codec::H264 | Codec::Hevc | Codec::Vc1
        )
    }

    pub fn is_subtitle(self) -> bool {
        matches!(self, Codec::Pgs)
    }

    /// MPEG-1/2 video carries user_data that remuxers drop
    pub fn has_user_data(self) -> bool {
        matches!(self, Codec::Mpeg1Video | Codec::Mpeg2Video)
    }

    pub fn name(self) -> &'static str {
        match self {
            Codec::Mpeg1Video => "MPEG-1",
            Codec::Mpeg2Video => "MPEG-2",
            Codec::H264 => "H.264",
            Codec::Hevc => "HEVC",
            Codec::Vc1 => "VC-1",
            Codec::MpegAudio => "MPEG Audio",
            Codec::Aac => "AAC",
            Codec::Ac3 => "AC-3",
            Codec::Eac3 => "E-AC-3",
            Codec::Dts => "DTS",
            Codec::DtsHd => "DTS-HD",
            Codec::TrueHd => "TrueHD",
            Codec::Lpcm => "LPCM",
            Codec::Pgs => "PGS",
        }
    }
}

/// Where a sub-stream came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubStreamOrigin {
    /// Declared by the container (PMT entry or PS stream id)
    Container,
    /// AC3 frames carved out of a TrueHD stream
    SplitFromTrueHd(u8),
    /// DTS core extracted from a DTS-HD stream
    ExtractedDtsCore(u8),
}

/// One independently addressable audio or subtitle stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubStream {
    pub id: u8,
    pub codec: Codec,
    pub origin: SubStreamOrigin,
    /// Container-level identifier (PID for TS, stream/sub-stream id for PS)
    pub container_id: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lpcm: Option<LpcmFormat>,
}

/// Kind of source container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContainerKind {
    /// Blu-ray transport stream (.m2ts)
    TransportStream,
    /// DVD program stream (.vob)
    ProgramStream,
}

/// Disc family a source file belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiscKind {
    BluRay,
    Dvd,
}
