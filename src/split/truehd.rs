//! Blu-ray TrueHD streams interleave a compatibility AC-3 stream in the
//! same PID. Matroska stores them as two tracks, so the table is split.

use tracing::{debug, info, warn};

use super::{select_es_intervals, walk_frames};
use crate::constants::{AC3_SYNC, TRUEHD_MAJOR_SYNC, TRUEHD_PRESENCE_SCAN};
use crate::es::{AudioTrack, StreamTables};
use crate::error::Result;
use crate::parsers::{ac3_frame_size, contains_signature};
use crate::ranges::{self, PesPayloadRange, RangeData};
use crate::types::{Codec, SubStream, SubStreamOrigin};

/// `0B 77 crc1 crc2 fscod|frmsizecod`
const AC3_HEADER_PREFIX: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrueHdSplit {
    pub truehd: Vec<PesPayloadRange>,
    pub ac3: Vec<PesPayloadRange>,
}

fn ac3_frame_at(h: &[u8]) -> Option<u64> {
    let b = *h.get(4)?;
    let size = ac3_frame_size(b >> 6, b & 0x3F);
    (size != 0).then_some(size as u64)
}

/// Splits one TrueHD table. Returns `None` when the start of the stream
/// does not carry both sync words.
pub fn split_truehd_ac3<D: RangeData + ?Sized>(data: &D, table: &[PesPayloadRange]) -> Result<Option<TrueHdSplit>> {
    let total = ranges::total_size(table);
    let scan_len = total.min(TRUEHD_PRESENCE_SCAN as u64) as usize;
    let head = ranges::read_from_ranges(data, table, 0, scan_len)?;
    if !contains_signature(&head, &AC3_SYNC) || !contains_signature(&head, &TRUEHD_MAJOR_SYNC) {
        return Ok(None);
    }

    let ac3_frames = walk_frames(data, table, &AC3_SYNC, AC3_HEADER_PREFIX, ac3_frame_at)?;
    if ac3_frames.is_empty() {
        return Ok(None);
    }
    let ac3 = select_es_intervals(table, &ac3_frames)?;
    let truehd = ranges::subtract_es_intervals(table, &ac3_frames);
    Ok(Some(TrueHdSplit { truehd, ac3 }))
}

/// Replaces every TrueHD sub-stream that carries AC-3 with its TrueHD part
/// and appends the AC-3 part as a new sub-stream.
pub fn split_truehd_ac3_streams<D: RangeData + ?Sized>(data: &D, tables: &mut StreamTables) -> Result<()> {
    let mut added = Vec::new();
    let mut next_id = tables.next_sub_stream_id();
    for track in tables.audio.iter_mut().filter(|t| t.info.codec == Codec::TrueHd) {
        let Some(split) = split_truehd_ac3(data, &track.ranges)? else {
            debug!(sub_stream = track.info.id, "TrueHD stream carries no AC-3");
            continue;
        };
        let Some(id) = next_id else {
            warn!(sub_stream = track.info.id, "no free sub-stream id for the AC-3 part");
            break;
        };
        info!(
            sub_stream = track.info.id,
            truehd = ranges::total_size(&split.truehd),
            ac3 = ranges::total_size(&split.ac3),
            "split TrueHD/AC-3"
        );
        track.ranges = split.truehd;
        added.push(AudioTrack {
            info: SubStream {
                id,
                codec: Codec::Ac3,
                origin: SubStreamOrigin::SplitFromTrueHd(track.info.id),
                container_id: track.info.container_id,
                lpcm: None,
            },
            ranges: split.ac3,
        });
        next_id = id.checked_add(1);
    }
    tables.audio.extend(added);
    Ok(())
}
