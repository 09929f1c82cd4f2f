//! DTS-HD streams start every frame with a DTS core followed by extension
//! substream data. Remuxers often extract the core as its own track.

use tracing::{debug, info, warn};

use super::{select_es_intervals, walk_frames};
use crate::constants::{DTS_CORE_SIZE_SCAN, DTS_CORE_SYNC, DTS_EXSS_SYNC, DTS_PRESENCE_SCAN};
use crate::es::{AudioTrack, StreamTables};
use crate::error::{Error, Result};
use crate::parsers::{contains_signature, parse_dts_core_header, signature_positions};
use crate::ranges::{self, PesPayloadRange, RangeData};
use crate::types::{Codec, SubStream, SubStreamOrigin};

/// Core header bytes [`parse_dts_core_header`] needs
const DTS_CORE_HEADER: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtsCoreSplit {
    pub core: Vec<PesPayloadRange>,
    /// Everything that is not core: extension substreams
    pub remainder: Vec<PesPayloadRange>,
}

/// Core frame size from the distance between each core sync and the next
/// sync of either kind. Every frame seen must agree and at least two must
/// be seen.
fn core_frame_size(head: &[u8]) -> Result<u64> {
    let mut syncs: Vec<usize> = signature_positions(head, &DTS_CORE_SYNC)
        .filter(|&p| parse_dts_core_header(&head[p..]).is_some())
        .collect();
    let cores = syncs.clone();
    syncs.extend(signature_positions(head, &DTS_EXSS_SYNC));
    syncs.sort_unstable();

    let mut size = None;
    let mut frames = 0;
    for c in cores {
        let Some(&next) = syncs.iter().find(|&&s| s > c) else { break };
        let d = (next - c) as u64;
        match size {
            None => size = Some(d),
            Some(s) if s != d => {
                return Err(Error::integrity(format!("DTS core sizes differ: {s} vs {d}")));
            }
            Some(_) => {}
        }
        frames += 1;
    }
    match size {
        Some(s) if frames >= 2 => Ok(s),
        _ => Err(Error::integrity(format!("only {frames} DTS core frames measured"))),
    }
}

/// Separates the DTS core of one DTS-HD table from the rest. `Ok(None)`
/// when the stream is not DTS-HD with a core; an `Integrity` error when the
/// frame spacing is not constant.
pub fn extract_dts_core<D: RangeData + ?Sized>(data: &D, table: &[PesPayloadRange]) -> Result<Option<DtsCoreSplit>> {
    let total = ranges::total_size(table);
    let scan_len = total.min(DTS_PRESENCE_SCAN as u64) as usize;
    let head = ranges::read_from_ranges(data, table, 0, scan_len)?;
    if !contains_signature(&head, &DTS_CORE_SYNC) || !contains_signature(&head, &DTS_EXSS_SYNC) {
        return Ok(None);
    }

    let size_scan_len = total.min(DTS_CORE_SIZE_SCAN as u64) as usize;
    let size_scan = ranges::read_from_ranges(data, table, 0, size_scan_len)?;
    let core_size = core_frame_size(&size_scan)?;

    let cores = walk_frames(data, table, &DTS_CORE_SYNC, DTS_CORE_HEADER, |h| {
        parse_dts_core_header(h).map(|_| core_size)
    })?;
    let core = select_es_intervals(table, &cores)?;
    let remainder = ranges::subtract_es_intervals(table, &cores);
    Ok(Some(DtsCoreSplit { core, remainder }))
}

/// Appends the DTS core of every DTS-HD sub-stream as a new sub-stream.
/// The original is kept; streams with irregular framing are skipped.
pub fn split_dts_hd_core_streams<D: RangeData + ?Sized>(data: &D, tables: &mut StreamTables) -> Result<()> {
    let mut added = Vec::new();
    let mut next_id = tables.next_sub_stream_id();
    for track in tables.audio.iter().filter(|t| t.info.codec == Codec::DtsHd) {
        let split = match extract_dts_core(data, &track.ranges) {
            Ok(Some(split)) => split,
            Ok(None) => {
                debug!(sub_stream = track.info.id, "no DTS core found");
                continue;
            }
            Err(e @ Error::Integrity(_)) => {
                warn!(sub_stream = track.info.id, error = %e, "skipping DTS core extraction");
                continue;
            }
            Err(e) => return Err(e),
        };
        let Some(id) = next_id else {
            warn!(sub_stream = track.info.id, "no free sub-stream id for the DTS core");
            break;
        };
        info!(sub_stream = track.info.id, core = ranges::total_size(&split.core), "extracted DTS core");
        added.push(AudioTrack {
            info: SubStream {
                id,
                codec: Codec::Dts,
                origin: SubStreamOrigin::ExtractedDtsCore(track.info.id),
                container_id: track.info.container_id,
                lpcm: None,
            },
            ranges: split.core,
        });
        next_id = id.checked_add(1);
    }
    tables.audio.extend(added);
    Ok(())
}
