//! Post-demux refinement of range tables: compound audio splitting and
//! MPEG video user_data removal.

mod dts;
mod truehd;

pub use dts::{extract_dts_core, split_dts_hd_core_streams, DtsCoreSplit};
pub use truehd::{split_truehd_ac3, split_truehd_ac3_streams, TrueHdSplit};

use memchr::memmem;

use crate::constants::{PES_START_CODE, USER_DATA_START};
use crate::error::Result;
use crate::ranges::{self, PesPayloadRange, RangeBuilder, RangeData};

/// ES bytes read per step while walking a stream
const WALK_CHUNK: usize = 1024 * 1024;

/// Walks a stream looking for `sig`. At each hit `classify` sees the bytes
/// starting there (at least `lookahead` of them unless the stream ends) and
/// returns the frame length to claim, or `None` to move on by one byte.
///
/// Chunks overlap by `lookahead - 1` bytes so a header that straddles a
/// chunk or range boundary is fully buffered before it is classified.
pub(crate) fn walk_frames<D, F>(
    data: &D,
    table: &[PesPayloadRange],
    sig: &[u8],
    lookahead: usize,
    mut classify: F,
) -> Result<Vec<(u64, u64)>>
where
    D: RangeData + ?Sized,
    F: FnMut(&[u8]) -> Option<u64>,
{
    let total = ranges::total_size(table);
    let finder = memmem::Finder::new(sig);
    let mut frames = Vec::new();
    let mut pos = 0u64;
    while pos < total {
        let len = (total - pos).min((WALK_CHUNK + lookahead) as u64) as usize;
        let window = ranges::read_from_ranges(data, table, pos, len)?;
        let last = pos + len as u64 == total;
        // hits at or past this index are re-examined in the next window
        let limit = if last { window.len() } else { window.len() - lookahead + 1 };

        let mut i = 0usize;
        let mut next_pos = pos + limit as u64;
        while i < limit {
            let Some(hit) = finder.find(&window[i..]).map(|h| h + i) else { break };
            if hit >= limit {
                break;
            }
            match classify(&window[hit..]).filter(|&n| n > 0) {
                Some(frame) => {
                    let start = pos + hit as u64;
                    let end = (start + frame).min(total);
                    frames.push((start, end));
                    if hit as u64 + frame >= limit as u64 {
                        next_pos = end;
                        break;
                    }
                    i = hit + frame as usize;
                }
                None => i = hit + 1,
            }
        }
        pos = next_pos.max(pos + 1);
    }
    Ok(frames)
}

/// Builds a table for the given ES intervals of `table`, renumbered from 0.
pub(crate) fn select_es_intervals(
    table: &[PesPayloadRange],
    intervals: &[(u64, u64)],
) -> Result<Vec<PesPayloadRange>> {
    let mut out = RangeBuilder::with_capacity(intervals.len());
    for &(start, end) in intervals {
        for (file_offset, size) in ranges::raw_ranges_for_region(table, start, end - start)? {
            out.push_unmerged(file_offset, size);
        }
    }
    Ok(ranges::merge_adjacent_ranges(&out.finish()))
}

/// ES spans of MPEG-1/2 `user_data` (start code `00 00 01 B2` up to the
/// next start code). Remuxers drop these, so they are removed from video
/// tables before hashing.
pub fn user_data_intervals<D: RangeData + ?Sized>(data: &D, table: &[PesPayloadRange]) -> Result<Vec<(u64, u64)>> {
    let total = ranges::total_size(table);
    let finder = memmem::Finder::new(&PES_START_CODE);
    let mut spans = Vec::new();
    let mut open: Option<u64> = None;
    let mut pos = 0u64;
    while pos < total {
        let len = (total - pos).min(WALK_CHUNK as u64 + 3) as usize;
        let window = ranges::read_from_ranges(data, table, pos, len)?;
        let last = pos + len as u64 == total;
        let limit = if last { window.len() } else { window.len() - 3 };
        for hit in finder.find_iter(&window).filter(|&h| h < limit) {
            let Some(&code) = window.get(hit + 3) else { continue };
            let at = pos + hit as u64;
            if let Some(start) = open.take() {
                spans.push((start, at));
            }
            if code == USER_DATA_START {
                open = Some(at);
            }
        }
        pos += limit.max(1) as u64;
    }
    if let Some(start) = open {
        spans.push((start, total));
    }
    Ok(spans)
}

/// Removes user_data from a video table
pub fn filter_user_data<D: RangeData + ?Sized>(data: &D, table: &[PesPayloadRange]) -> Result<Vec<PesPayloadRange>> {
    let spans = user_data_intervals(data, table)?;
    if spans.is_empty() {
        return Ok(table.to_vec());
    }
    Ok(ranges::subtract_es_intervals(table, &spans))
}
