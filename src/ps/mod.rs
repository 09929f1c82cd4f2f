//! MPEG program stream demuxer (DVD `.vob`)
//!
//! Walks pack, system and PES headers by their start codes and records the
//! payload ranges of the first video stream and of every audio sub-stream.
//! DVD audio other than MPEG audio lives in Private Stream 1 behind a
//! sub-stream id byte, which is stripped along with the rest of the DVD
//! audio header.

use std::collections::HashMap;

use memchr::memmem;
use tracing::{debug, info, warn};

use crate::constants::{
    PACK_HEADER, PADDING_STREAM, PES_START_CODE, PRIVATE_STREAM_1, PRIVATE_STREAM_2, PROGRAM_END,
    PROGRAM_STREAM_MAP, SYSTEM_HEADER,
};
use crate::es::{AudioTrack, EsReader, StreamTables, VideoTrack};
use crate::error::{Error, Result};
use crate::parsers::be_u16;
use crate::parsers::lpcm::{parse_dvd_lpcm_header, LpcmFormat};
use crate::pes;
use crate::ranges::{RangeBuilder, RangeData};
use crate::source::SourceView;
use crate::split::filter_user_data;
use crate::types::{Codec, SubStream, SubStreamOrigin};

/// Bytes searched per step for the next start code
const SCAN_WINDOW: usize = 64 * 1024;
/// Enough for any PES header plus the DVD audio header
const HEADER_PEEK: usize = 6 + 3 + 255 + 7;
/// MPEG-2 pack header without stuffing
const PACK_HEADER_MPEG2: usize = 14;
const PACK_HEADER_MPEG1: usize = 12;
/// Sub-stream id byte, frame count and first access unit pointer
const DVD_AUDIO_HEADER: usize = 4;
const DVD_LPCM_HEADER: usize = 3;

/// Classifies a Private Stream 1 sub-stream id. Returns the codec and the
/// header bytes to strip, or `None` for sub-pictures and unknown ids.
fn private_sub_stream(sub_id: u8) -> Option<(Codec, usize)> {
    match sub_id {
        0x80..=0x87 => Some((Codec::Ac3, DVD_AUDIO_HEADER)),
        0x88..=0x8F => Some((Codec::Dts, DVD_AUDIO_HEADER)),
        0xA0..=0xA7 => Some((Codec::Lpcm, DVD_AUDIO_HEADER + DVD_LPCM_HEADER)),
        _ => None,
    }
}

/// Stream ids skipped by their length field
fn is_length_prefixed(stream_id: u8) -> bool {
    matches!(stream_id, SYSTEM_HEADER | PROGRAM_STREAM_MAP | PADDING_STREAM | PRIVATE_STREAM_2 | 0xF0..=0xFF)
}

struct AudioBuilder {
    info: SubStream,
    ranges: RangeBuilder,
}

#[derive(Default)]
struct Collector {
    video_id: Option<u8>,
    video: RangeBuilder,
    mpeg1: bool,
    audio: Vec<AudioBuilder>,
    /// container id -> index into `audio`
    by_id: HashMap<u16, usize>,
}

impl Collector {
    fn audio_stream(&mut self, container_id: u16, codec: Codec, lpcm: Option<LpcmFormat>) -> Result<&mut AudioBuilder> {
        let idx = match self.by_id.get(&container_id) {
            Some(&idx) => idx,
            None => {
                let id = u8::try_from(self.audio.len()).map_err(|_| Error::format("too many sub-streams"))?;
                debug!(sub_stream = id, container_id, codec = codec.name(), "new audio sub-stream");
                self.audio.push(AudioBuilder {
                    info: SubStream { id, codec, origin: SubStreamOrigin::Container, container_id, lpcm },
                    ranges: RangeBuilder::new(),
                });
                self.by_id.insert(container_id, self.audio.len() - 1);
                self.audio.len() - 1
            }
        };
        Ok(&mut self.audio[idx])
    }

    /// Records the payload of one PES packet starting at `pos`
    fn pes(&mut self, head: &[u8], pos: u64, data_end: u64) -> Result<u64> {
        let hdr = pes::parse_header(head)?;
        let total = hdr.total_len().ok_or_else(|| Error::format("unbounded PES packet in program stream"))?;
        let end = (pos + total as u64).min(data_end);
        if end < pos + total as u64 {
            warn!(offset = pos, "PES packet truncated at end of data");
        }
        let payload_start = pos + hdr.header_len as u64;
        let payload = |skip: usize| -> (u64, u64) {
            let start = (payload_start + skip as u64).min(end);
            (start, end - start)
        };

        match hdr.stream_id {
            id @ 0xE0..=0xEF => {
                if *self.video_id.get_or_insert(id) == id {
                    let (start, len) = payload(0);
                    self.video.push(start, len);
                }
            }
            id @ 0xC0..=0xDF => {
                let (start, len) = payload(0);
                self.audio_stream(id as u16, Codec::MpegAudio, None)?.ranges.push(start, len);
            }
            PRIVATE_STREAM_1 => {
                let Some(&sub_id) = head.get(hdr.header_len) else { return Ok(end) };
                let Some((codec, strip)) = private_sub_stream(sub_id) else {
                    return Ok(end);
                };
                let lpcm = if codec == Codec::Lpcm {
                    let fmt = head.get(hdr.header_len + DVD_AUDIO_HEADER..).and_then(parse_dvd_lpcm_header);
                    if fmt.is_none() {
                        warn!(offset = pos, sub_id, "unrecognised DVD LPCM header");
                    }
                    fmt
                } else {
                    None
                };
                let (start, len) = payload(strip);
                let container_id = ((PRIVATE_STREAM_1 as u16) << 8) | sub_id as u16;
                let stream = self.audio_stream(container_id, codec, lpcm)?;
                if stream.info.lpcm.is_none() {
                    stream.info.lpcm = lpcm;
                }
                stream.ranges.push(start, len);
            }
            _ => {}
        }
        Ok(end)
    }
}

/// Demuxed program stream
pub struct PsDemuxer {
    view: SourceView,
    tables: StreamTables,
    checksum: u64,
}

impl PsDemuxer {
    pub fn open(view: SourceView) -> Result<Self> {
        let total = view.len();
        let finder = memmem::Finder::new(&PES_START_CODE);
        let mut c = Collector::default();
        let mut packs = 0u64;
        let mut pos = 0u64;

        while pos + 4 <= total {
            let window = view.read_upto(pos, SCAN_WINDOW).ok_or_else(|| Error::bounds(pos, total))?;
            let Some(hit) = finder.find(&window) else {
                pos += window.len().saturating_sub(3).max(1) as u64;
                continue;
            };
            pos += hit as u64;
            let head = view.read_upto(pos, HEADER_PEEK).ok_or_else(|| Error::bounds(pos, total))?;
            if head.len() < 4 {
                break;
            }
            let code = head[3];
            pos = match code {
                PACK_HEADER => {
                    packs += 1;
                    let Some(&marker) = head.get(4) else { break };
                    if marker & 0xC0 == 0x40 {
                        let Some(&stuffing) = head.get(13) else { break };
                        pos + (PACK_HEADER_MPEG2 + (stuffing & 0x07) as usize) as u64
                    } else {
                        c.mpeg1 = true;
                        pos + PACK_HEADER_MPEG1 as u64
                    }
                }
                PROGRAM_END => pos + 4,
                c_id if is_length_prefixed(c_id) => {
                    let Some(len) = be_u16(&head, 4) else { break };
                    pos + 6 + len as u64
                }
                0xC0..=0xEF | PRIVATE_STREAM_1 => match c.pes(&head, pos, total) {
                    Ok(next) => next,
                    Err(Error::Truncation { .. }) => {
                        warn!(offset = pos, "PES header truncated at end of data");
                        break;
                    }
                    Err(e) => {
                        warn!(offset = pos, error = %e, "skipping malformed PES packet");
                        pos + 1
                    }
                },
                _ => pos + 1,
            };
        }
        if packs == 0 {
            return Err(Error::format("no MPEG-PS pack header found"));
        }

        let mut tables = StreamTables::default();
        if let Some(id) = c.video_id {
            let codec = if c.mpeg1 { Codec::Mpeg1Video } else { Codec::Mpeg2Video };
            let raw = c.video.finish();
            let ranges = filter_user_data(&view, &raw)?;
            tables.video = Some(VideoTrack { codec, container_id: id as u16, ranges });
        }
        tables.audio = c
            .audio
            .into_iter()
            .map(|a| AudioTrack { info: a.info, ranges: a.ranges.finish() })
            .collect();
        let checksum = view.checksum();

        info!(
            packs,
            video = ?tables.video.as_ref().map(|v| v.codec.name()),
            sub_streams = tables.audio.len(),
            "demuxed program stream"
        );
        Ok(Self { view, tables, checksum })
    }
}

impl EsReader for PsDemuxer {
    fn tables(&self) -> &StreamTables {
        &self.tables
    }

    fn data(&self) -> &dyn RangeData {
        &self.view
    }

    fn checksum(&self) -> Option<u64> {
        Some(self.checksum)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::parsers::lpcm::LpcmLayout;
    use crate::ranges::is_well_formed;
    use bytes::Bytes;

    pub(crate) fn pack() -> Vec<u8> {
        vec![0x00, 0x00, 0x01, 0xBA, 0x44, 0x00, 0x04, 0x00, 0x04, 0x01, 0x01, 0x89, 0xC3, 0xF8]
    }

    pub(crate) fn pes(stream_id: u8, payload: &[u8]) -> Vec<u8> {
        let mut p = vec![0x00, 0x00, 0x01, stream_id];
        p.extend_from_slice(&((3 + payload.len()) as u16).to_be_bytes());
        p.extend_from_slice(&[0x81, 0x00, 0x00]);
        p.extend_from_slice(payload);
        p
    }

    fn length_prefixed(stream_id: u8, len: usize) -> Vec<u8> {
        let mut p = vec![0x00, 0x00, 0x01, stream_id];
        p.extend_from_slice(&(len as u16).to_be_bytes());
        p.extend(std::iter::repeat_n(0xFF, len));
        p
    }

    /// One pack per video/audio packet, with navigation, padding and an
    /// LPCM stream; video carries a user_data block
    pub(crate) fn build_vob() -> Vec<u8> {
        let mut v = Vec::new();
        v.extend(pack());
        v.extend(length_prefixed(SYSTEM_HEADER, 12));
        v.extend(length_prefixed(PRIVATE_STREAM_2, 20));

        v.extend(pack());
        let mut video = vec![0x00, 0x00, 0x01, 0xB3, 0x10, 0x20];
        video.extend_from_slice(&[0x00, 0x00, 0x01, 0xB2, 0xAA, 0xAA, 0xAA]);
        video.extend_from_slice(&[0x00, 0x00, 0x01, 0xB8, 0x30]);
        v.extend(pes(0xE0, &video));

        v.extend(pack());
        v.extend(pes(0xBD, &[0x80, 0x01, 0x00, 0x01, 0x0B, 0x77, 0x01, 0x02]));
        v.extend(pes(0xBD, &[0xA0, 0x01, 0x00, 0x01, 0x00, 0x01, 0x80, 0x11, 0x22, 0x33, 0x44]));
        v.extend(pes(0xBD, &[0x21, 0x00, 0x00, 0x00]));
        v.extend(pes(0xC0, &[0xFF, 0xFD, 0xA4, 0x00]));
        v.extend(length_prefixed(PADDING_STREAM, 30));

        v.extend(pack());
        v.extend(pes(0xE0, &[0x00, 0x00, 0x01, 0x00, 0x40, 0x41]));
        v.extend(pes(0xE1, &[0x99; 8]));
        v.extend(pes(0xBD, &[0x80, 0x01, 0x00, 0x01, 0x03, 0x04]));
        v.extend_from_slice(&[0x00, 0x00, 0x01, PROGRAM_END]);
        v
    }

    fn demux(data: Vec<u8>) -> PsDemuxer {
        PsDemuxer::open(SourceView::Contiguous(Bytes::from(data))).unwrap()
    }

    #[test]
    fn test_vob_streams() {
        let d = demux(build_vob());
        assert_eq!(d.video_codec(), Some(Codec::Mpeg2Video));
        // 18 video bytes minus the 7-byte user_data block
        assert_eq!(d.total_es_size(true), 17);
        assert_eq!(
            &d.read_es_data(0, 11, true).unwrap()[..],
            &[0x00, 0x00, 0x01, 0xB3, 0x10, 0x20, 0x00, 0x00, 0x01, 0xB8, 0x30]
        );
        assert!(is_well_formed(d.tables().video_ranges()));

        let subs = d.audio_sub_streams();
        let codecs: Vec<_> = subs.iter().map(|s| s.codec).collect();
        assert_eq!(codecs, vec![Codec::Ac3, Codec::Lpcm, Codec::MpegAudio]);
        assert_eq!(subs[0].container_id, 0xBD80);
        assert_eq!(subs[2].container_id, 0xC0);

        assert_eq!(d.audio_sub_stream_es_size(0).unwrap(), 6);
        assert_eq!(&d.read_audio_substream_data(0, 0, 6).unwrap()[..], &[0x0B, 0x77, 0x01, 0x02, 0x03, 0x04]);

        let lpcm = subs[1].lpcm.unwrap();
        assert_eq!((lpcm.layout, lpcm.bits, lpcm.channels), (LpcmLayout::Dvd, 16, 2));
        assert_eq!(&d.read_audio_substream_data(1, 0, 4).unwrap()[..], &[0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn test_truncated_final_packet_is_clamped() {
        let mut data = build_vob();
        data.truncate(data.len() - 4);
        data.extend(pack());
        let mut last = pes(0xC0, &[0xFF, 0xFD, 0xA4, 0x00, 1, 2, 3, 4]);
        last.truncate(last.len() - 3);
        data.extend(last);
        let d = demux(data);
        assert_eq!(d.audio_sub_stream_es_size(2).unwrap(), 4 + 5);
    }

    #[test]
    fn test_not_a_program_stream() {
        assert!(PsDemuxer::open(SourceView::Contiguous(Bytes::from(vec![0u8; 1000]))).is_err());
    }
}
