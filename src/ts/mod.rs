//! MPEG transport stream demuxer (Blu-ray `.m2ts`)
//!
//! Two passes over the packets: PAT and PMT first, then the PES payloads of
//! the selected PIDs. Every payload byte is recorded as a file range, so the
//! ES is never copied.

pub mod packet;

pub use packet::{detect_layout, parse_packet, PacketLayout, TsPacket};

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::constants::{CRC64, M2TS_PACKET_SIZE, PAT_PID, PES_START_CODE, TS_SYNC_BYTE, TS_SYNC_PACKETS};
use crate::es::{AudioTrack, EsReader, StreamTables, VideoTrack};
use crate::error::{Error, Result};
use crate::parsers::lpcm::{parse_bd_lpcm_header, LpcmFormat};
use crate::pes;
use crate::psi::{parse_pat, parse_pmt, PmtSection, SectionAssembler};
use crate::ranges::{RangeBuilder, RangeData};
use crate::source::SourceView;
use crate::split::{filter_user_data, split_dts_hd_core_streams, split_truehd_ac3_streams};
use crate::types::{Codec, SubStream, SubStreamOrigin};

/// Packets read per step
const PACKETS_PER_READ: usize = 4096;
/// Blu-ray LPCM PES payloads start with this many header bytes
const BD_LPCM_HEADER: usize = 4;

/// Walks whole packets of `view`, reading it front to back in large steps.
/// `on_chunk` sees every byte of the view exactly once, in order;
/// `on_packet` gets the view offset of each sync byte and the packet.
fn scan_packets<C, P>(view: &SourceView, layout: PacketLayout, mut on_chunk: C, mut on_packet: P) -> Result<()>
where
    C: FnMut(&[u8]),
    P: FnMut(u64, &[u8]) -> Result<bool>,
{
    let step = layout.size * PACKETS_PER_READ;
    let total = view.len();
    let mut pos = 0u64;
    let mut next_packet = layout.start;
    let mut lost_sync = 0u64;
    while pos < total {
        let want = if pos == 0 { layout.start as usize + step } else { step };
        let chunk = view.read_upto(pos, want).ok_or_else(|| Error::bounds(pos, total))?;
        on_chunk(&chunk);
        let chunk_end = pos + chunk.len() as u64;
        while next_packet + layout.size as u64 <= chunk_end {
            let at = (next_packet - pos) as usize;
            let pkt = &chunk[at + layout.prefix..at + layout.size];
            let sync_offset = next_packet + layout.prefix as u64;
            next_packet += layout.size as u64;
            if pkt[0] != TS_SYNC_BYTE {
                lost_sync += 1;
                continue;
            }
            if !on_packet(sync_offset, pkt)? {
                return Ok(());
            }
        }
        pos = chunk_end;
    }
    if lost_sync > 0 {
        warn!(packets = lost_sync, "skipped packets without sync byte");
    }
    Ok(())
}

/// PAT then PMT of the first program
fn read_pmt(view: &SourceView, layout: PacketLayout) -> Result<PmtSection> {
    let mut pat_asm = SectionAssembler::new();
    let mut pmt_asm = SectionAssembler::new();
    let mut pmt_pid: Option<u16> = None;
    let mut pmt: Option<PmtSection> = None;

    scan_packets(view, layout, |_| {}, |_, raw| {
        let Some(pkt) = parse_packet(raw) else { return Ok(true) };
        if pkt.pid == PAT_PID && pmt_pid.is_none() {
            if let Some(section) = pat_asm.push(pkt.pusi, pkt.payload)? {
                let pat = parse_pat(&section)?;
                let program = pat.first_program().ok_or_else(|| Error::format("PAT lists no program"))?;
                debug!(program = program.program_number, pmt_pid = program.pmt_pid, "PAT");
                pmt_pid = Some(program.pmt_pid);
            }
        } else if Some(pkt.pid) == pmt_pid {
            if let Some(section) = pmt_asm.push(pkt.pusi, pkt.payload)? {
                pmt = Some(parse_pmt(&section)?);
                return Ok(false);
            }
        }
        Ok(true)
    })?;

    if let Some(pmt) = pmt {
        return Ok(pmt);
    }
    pat_asm.finish()?;
    pmt_asm.finish()?;
    Err(Error::format(if pmt_pid.is_some() { "no PMT found" } else { "no PAT found" }))
}

/// Where a PID's payload goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Video,
    Audio(usize),
}

/// Position inside the PES packet currently being received on a PID
#[derive(Debug)]
enum PesState {
    /// No PES start seen yet
    Idle,
    /// PES start seen; header bytes buffered until its length is known
    AwaitingHeader(Vec<u8>),
    /// Header bytes still to skip in following packets
    SkippingHeader(usize),
    Payload,
}

struct PidStream {
    target: Target,
    codec: Codec,
    state: PesState,
    ranges: RangeBuilder,
    lpcm: Option<LpcmFormat>,
}

impl PidStream {
    fn new(target: Target, codec: Codec) -> Self {
        Self { target, codec, state: PesState::Idle, ranges: RangeBuilder::new(), lpcm: None }
    }

    /// Bytes after the PES header that are not ES payload
    fn extra_header(&self) -> usize {
        if self.codec == Codec::Lpcm { BD_LPCM_HEADER } else { 0 }
    }

    /// The LPCM header is buffered until the first one has been parsed
    fn needs_header_bytes(&self) -> bool {
        self.codec == Codec::Lpcm && self.lpcm.is_none()
    }

    fn feed(&mut self, pusi: bool, payload: &[u8], file_offset: u64) -> Result<()> {
        if pusi {
            if !payload.starts_with(&PES_START_CODE) {
                warn!(offset = file_offset, "payload unit start without PES start code");
                self.state = PesState::Idle;
                return Ok(());
            }
            self.state = PesState::AwaitingHeader(Vec::new());
        }
        let extra = self.extra_header();
        let keep_header = self.needs_header_bytes();
        let mut data = payload;
        let mut offset = file_offset;
        loop {
            match &mut self.state {
                PesState::Idle => return Ok(()),
                PesState::AwaitingHeader(buf) => {
                    let before = buf.len();
                    buf.extend_from_slice(data);
                    let n = match pes::header_len(buf) {
                        Ok(Some(n)) => n,
                        Ok(None) => return Ok(()),
                        Err(e) => {
                            warn!(offset, error = %e, "dropping PES packet");
                            self.state = PesState::Idle;
                            return Ok(());
                        }
                    };
                    let need = n + extra;
                    if buf.len() < need {
                        if !keep_header {
                            self.state = PesState::SkippingHeader(need - buf.len());
                        }
                        return Ok(());
                    }
                    if keep_header {
                        self.lpcm = parse_bd_lpcm_header(&buf[n..need]);
                        if self.lpcm.is_none() {
                            warn!(offset, "unrecognised Blu-ray LPCM header");
                        }
                    }
                    let used = need.saturating_sub(before);
                    data = &data[used..];
                    offset += used as u64;
                    self.state = PesState::Payload;
                }
                PesState::SkippingHeader(left) => {
                    if data.len() <= *left {
                        *left -= data.len();
                        return Ok(());
                    }
                    data = &data[*left..];
                    offset += *left as u64;
                    self.state = PesState::Payload;
                }
                PesState::Payload => {
                    self.ranges.push(offset, data.len() as u64);
                    return Ok(());
                }
            }
        }
    }
}

/// Demuxed transport stream
pub struct TsDemuxer {
    view: SourceView,
    layout: PacketLayout,
    tables: StreamTables,
    checksum: u64,
}

impl TsDemuxer {
    pub fn open(view: SourceView) -> Result<Self> {
        let head = view
            .read_upto(0, M2TS_PACKET_SIZE * (TS_SYNC_PACKETS + 1))
            .ok_or_else(|| Error::format("empty transport stream"))?;
        let layout = detect_layout(&head)?;
        drop(head);
        debug!(packet_size = layout.size, start = layout.start, "TS layout");

        let pmt = read_pmt(&view, layout)?;
        let mut streams: HashMap<u16, PidStream> = HashMap::new();
        let mut video: Option<(u16, Codec)> = None;
        let mut audio: Vec<SubStream> = Vec::new();
        for s in &pmt.streams {
            let Some(codec) = s.codec else {
                debug!(pid = s.elementary_pid, stream_type = s.stream_type, "ignoring unknown stream type");
                continue;
            };
            if streams.contains_key(&s.elementary_pid) {
                continue;
            }
            let target = if codec.is_video() {
                if video.is_some() {
                    debug!(pid = s.elementary_pid, "ignoring additional video stream");
                    continue;
                }
                video = Some((s.elementary_pid, codec));
                Target::Video
            } else {
                let id = u8::try_from(audio.len()).map_err(|_| Error::format("too many sub-streams"))?;
                audio.push(SubStream {
                    id,
                    codec,
                    origin: SubStreamOrigin::Container,
                    container_id: s.elementary_pid,
                    lpcm: None,
                });
                Target::Audio(audio.len() - 1)
            };
            streams.insert(s.elementary_pid, PidStream::new(target, codec));
        }

        let mut digest = CRC64.digest();
        scan_packets(&view, layout, |chunk| digest.update(chunk), |sync_offset, raw| {
            let Some(pkt) = parse_packet(raw) else { return Ok(true) };
            if let Some(stream) = streams.get_mut(&pkt.pid) {
                stream.feed(pkt.pusi, pkt.payload, sync_offset + pkt.payload_offset as u64)?;
            }
            Ok(true)
        })?;
        let checksum = digest.finalize();

        let mut tables = StreamTables::default();
        let mut audio_ranges: Vec<_> = audio.iter().map(|_| Vec::new()).collect();
        for (pid, stream) in streams {
            match stream.target {
                Target::Video => {
                    tables.video = Some(VideoTrack { codec: stream.codec, container_id: pid, ranges: stream.ranges.finish() });
                }
                Target::Audio(i) => {
                    audio[i].lpcm = stream.lpcm;
                    audio_ranges[i] = stream.ranges.finish();
                }
            }
        }
        tables.audio = audio
            .into_iter()
            .zip(audio_ranges)
            .map(|(info, ranges)| AudioTrack { info, ranges })
            .collect();

        if let Some(v) = tables.video.as_mut().filter(|v| v.codec.has_user_data()) {
            v.ranges = filter_user_data(&view, &v.ranges)?;
        }
        split_truehd_ac3_streams(&view, &mut tables)?;
        split_dts_hd_core_streams(&view, &mut tables)?;

        info!(
            packet_size = layout.size,
            video = ?tables.video.as_ref().map(|v| v.codec.name()),
            sub_streams = tables.audio.len(),
            "demuxed transport stream"
        );
        Ok(Self { view, layout, tables, checksum })
    }

    pub fn packet_size(&self) -> usize {
        self.layout.size
    }
}

impl EsReader for TsDemuxer {
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
