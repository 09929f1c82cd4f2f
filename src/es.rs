//! The capability every demuxed source exposes to the indexer and the
//! matcher: ES reads, ES-to-file offset translation and sub-stream listing.

use std::borrow::Cow;

use crate::error::{Error, Result};
use crate::ranges::{self, PesPayloadRange, RangeData};
use crate::types::{Codec, SubStream};

/// Video elementary stream of a source
#[derive(Debug, Clone)]
pub struct VideoTrack {
    pub codec: Codec,
    /// PID or stream id the data came from
    pub container_id: u16,
    pub ranges: Vec<PesPayloadRange>,
}

/// One audio or subtitle sub-stream with its range table
#[derive(Debug, Clone)]
pub struct AudioTrack {
    pub info: SubStream,
    pub ranges: Vec<PesPayloadRange>,
}

/// Range tables produced by a demuxer
#[derive(Debug, Clone, Default)]
pub struct StreamTables {
    pub video: Option<VideoTrack>,
    pub audio: Vec<AudioTrack>,
}

impl StreamTables {
    pub fn video_ranges(&self) -> &[PesPayloadRange] {
        self.video.as_ref().map(|v| v.ranges.as_slice()).unwrap_or_default()
    }

    pub fn audio_track(&self, id: u8) -> Result<&AudioTrack> {
        self.audio
            .iter()
            .find(|t| t.info.id == id)
            .ok_or_else(|| Error::format(format!("no audio sub-stream {id}")))
    }

    /// Ranges for the video stream or, when `is_video` is false, the first
    /// audio sub-stream
    pub fn ranges_for(&self, is_video: bool) -> &[PesPayloadRange] {
        if is_video {
            self.video_ranges()
        } else {
            self.audio.first().map(|t| t.ranges.as_slice()).unwrap_or_default()
        }
    }

    pub fn sub_streams(&self) -> Vec<SubStream> {
        self.audio.iter().map(|t| t.info.clone()).collect()
    }

    /// Id for a newly appended sub-stream; `None` once id 255 is taken
    pub fn next_sub_stream_id(&self) -> Option<u8> {
        match self.audio.iter().map(|t| t.info.id).max() {
            Some(id) => id.checked_add(1),
            None => Some(0),
        }
    }
}

/// Read access to the elementary streams of one source file.
///
/// File offsets are relative to the file the index records for the source:
/// the stream file itself, or the disc image for streams inside an ISO.
pub trait EsReader: Send + Sync {
    /// Range tables in the reader's own offset space
    fn tables(&self) -> &StreamTables;

    /// Bytes the range tables point into
    fn data(&self) -> &dyn RangeData;

    fn video_codec(&self) -> Option<Codec> {
        self.tables().video.as_ref().map(|v| v.codec)
    }

    fn read_es_data(&self, es_offset: u64, size: usize, is_video: bool) -> Result<Cow<'_, [u8]>> {
        ranges::read_from_ranges(self.data(), self.tables().ranges_for(is_video), es_offset, size)
    }

    fn es_offset_to_file_offset(&self, es_offset: u64, is_video: bool) -> Result<u64> {
        ranges::es_offset_to_file_offset(self.tables().ranges_for(is_video), es_offset)
    }

    fn total_es_size(&self, is_video: bool) -> u64 {
        ranges::total_size(self.tables().ranges_for(is_video))
    }

    fn audio_sub_streams(&self) -> Vec<SubStream> {
        self.tables().sub_streams()
    }

    fn audio_sub_stream_es_size(&self, id: u8) -> Result<u64> {
        Ok(ranges::total_size(&self.tables().audio_track(id)?.ranges))
    }

    fn read_audio_substream_data(&self, id: u8, es_offset: u64, size: usize) -> Result<Cow<'_, [u8]>> {
        let track = self.tables().audio_track(id)?;
        ranges::read_from_ranges(self.data(), &track.ranges, es_offset, size)
    }

    fn audio_substream_es_to_file_offset(&self, id: u8, es_offset: u64) -> Result<u64> {
        ranges::es_offset_to_file_offset(&self.tables().audio_track(id)?.ranges, es_offset)
    }

    /// `(file_offset, size)` fragments behind an ES span. `sub_stream` selects
    /// an audio sub-stream; `None` means video.
    fn raw_ranges_for_region(
        &self,
        sub_stream: Option<u8>,
        es_offset: u64,
        size: u64,
    ) -> Result<Vec<(u64, u64)>> {
        let table = match sub_stream {
            Some(id) => &self.tables().audio_track(id)?.ranges[..],
            None => self.tables().video_ranges(),
        };
        ranges::raw_ranges_for_region(table, es_offset, size)
    }

    /// Whole-file CRC-64 computed while demuxing, if the demuxer did so
    fn checksum(&self) -> Option<u64> {
        None
    }
}
