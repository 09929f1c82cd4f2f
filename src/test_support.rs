//! Synthetic transport streams for unit tests

use std::collections::HashMap;

use crate::constants::{TS_PACKET_SIZE, TS_SYNC_BYTE};
use crate::psi::section::seal_section;

pub(crate) const PMT_PID: u16 = 0x0100;
pub(crate) const VIDEO_PID: u16 = 0x1011;
pub(crate) const AUDIO_PID: u16 = 0x1100;

const PAYLOAD_MAX: usize = TS_PACKET_SIZE - 4;

/// Video ES bytes count up from 0
pub(crate) fn video_es(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}

pub(crate) fn audio_byte(i: usize) -> u8 {
    (i as u8).wrapping_mul(3).wrapping_add(0x40)
}

pub(crate) fn audio_es(len: usize) -> Vec<u8> {
    (0..len).map(audio_byte).collect()
}

/// Packetizer writing 188-byte packets, or 192-byte ones with a 4-byte
/// timestamp prefix
pub(crate) struct TsWriter {
    out: Vec<u8>,
    m2ts: bool,
    cc: HashMap<u16, u8>,
}

impl TsWriter {
    pub(crate) fn new(m2ts: bool) -> Self {
        Self { out: Vec::new(), m2ts, cc: HashMap::new() }
    }

    /// One packet; payloads shorter than 184 bytes are padded with
    /// adaptation field stuffing
    pub(crate) fn packet(&mut self, pid: u16, pusi: bool, payload: &[u8]) {
        assert!(payload.len() <= PAYLOAD_MAX);
        if self.m2ts {
            self.out.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        }
        let cc = self.cc.entry(pid).or_insert(0);
        let stuffed = payload.len() < PAYLOAD_MAX;
        let afc = if stuffed { 0x30 } else { 0x10 };
        self.out.extend_from_slice(&[
            TS_SYNC_BYTE,
            (u8::from(pusi) << 6) | (pid >> 8) as u8,
            pid as u8,
            afc | *cc,
        ]);
        *cc = (*cc + 1) & 0x0F;
        if stuffed {
            let af_len = PAYLOAD_MAX - 1 - payload.len();
            self.out.push(af_len as u8);
            if af_len > 0 {
                self.out.push(0x00);
                self.out.extend(std::iter::repeat_n(0xFF, af_len - 1));
            }
        }
        self.out.extend_from_slice(payload);
    }

    /// A PSI section after a zero pointer field, cut into packets of at
    /// most `first` then 184 bytes
    pub(crate) fn section(&mut self, pid: u16, section: &[u8], first: usize) {
        let mut body = vec![0u8];
        body.extend_from_slice(section);
        let head = first.min(body.len());
        self.packet(pid, true, &body[..head]);
        for chunk in body[head..].chunks(PAYLOAD_MAX) {
            self.packet(pid, false, chunk);
        }
    }

    /// Raw PES bytes cut into payloads of the given sizes
    pub(crate) fn pes(&mut self, pid: u16, pes: &[u8], sizes: &[usize]) {
        assert_eq!(sizes.iter().sum::<usize>(), pes.len());
        let mut pos = 0;
        for (i, &n) in sizes.iter().enumerate() {
            self.packet(pid, i == 0, &pes[pos..pos + n]);
            pos += n;
        }
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.out
    }
}

/// 14-byte MPEG-2 PES header with a PTS, followed by `es`
pub(crate) fn pes_packet(stream_id: u8, es: &[u8], bounded: bool) -> Vec<u8> {
    let len = if bounded { (8 + es.len()) as u16 } else { 0 };
    let mut p = vec![0x00, 0x00, 0x01, stream_id];
    p.extend_from_slice(&len.to_be_bytes());
    p.extend_from_slice(&[0x80, 0x80, 0x05, 0x21, 0x00, 0x01, 0x00, 0x01]);
    p.extend_from_slice(es);
    p
}

pub(crate) fn pat_section() -> Vec<u8> {
    seal_section(vec![
        0x00, 0xB0, 0x0D, 0x00, 0x01, 0xC1, 0x00, 0x00,
        0x00, 0x01, 0xE0 | (PMT_PID >> 8) as u8, PMT_PID as u8,
    ])
}

/// PMT of program 1 with the given `(stream_type, pid, descriptors)` list
pub(crate) fn pmt_section(streams: &[(u8, u16, &[u8])]) -> Vec<u8> {
    let mut body = vec![0xE0 | (VIDEO_PID >> 8) as u8, VIDEO_PID as u8, 0xF0, 0x00];
    for &(stream_type, pid, desc) in streams {
        body.extend_from_slice(&[stream_type, 0xE0 | (pid >> 8) as u8, pid as u8]);
        body.extend_from_slice(&(0xF000 | desc.len() as u16).to_be_bytes());
        body.extend_from_slice(desc);
    }
    let section_length = 5 + body.len() + 4;
    let mut s = vec![0x02, 0xB0 | (section_length >> 8) as u8, section_length as u8, 0x00, 0x01, 0xC1, 0x00, 0x00];
    s.extend(body);
    seal_section(s)
}

fn basic_pmt() -> Vec<u8> {
    pmt_section(&[(0x1B, VIDEO_PID, &[]), (0x81, AUDIO_PID, &[])])
}

/// H.264 video (534 ES bytes in payloads of 170, 184 and 180) and one AC-3
/// stream (175 ES bytes as 100 + 75)
fn write_basic_streams(w: &mut TsWriter, video_sizes: &[usize]) {
    w.pes(VIDEO_PID, &pes_packet(0xE0, &video_es(534), false), video_sizes);
    w.pes(AUDIO_PID, &pes_packet(0xBD, &audio_es(175), true), &[114, 75]);
}

pub(crate) fn build_ts_data(m2ts: bool) -> Vec<u8> {
    let mut w = TsWriter::new(m2ts);
    w.section(0, &pat_section(), PAYLOAD_MAX);
    w.section(PMT_PID, &basic_pmt(), PAYLOAD_MAX);
    write_basic_streams(&mut w, &[184, 184, 180]);
    w.finish()
}

pub(crate) fn build_basic_m2ts_data() -> Vec<u8> {
    build_ts_data(true)
}

pub(crate) fn build_m2ts_with_split_pmt() -> Vec<u8> {
    let mut w = TsWriter::new(true);
    w.section(0, &pat_section(), PAYLOAD_MAX);
    w.section(PMT_PID, &basic_pmt(), 12);
    write_basic_streams(&mut w, &[184, 184, 180]);
    w.finish()
}

pub(crate) fn build_m2ts_with_truncated_pmt() -> Vec<u8> {
    let mut w = TsWriter::new(true);
    w.section(0, &pat_section(), PAYLOAD_MAX);
    let pmt = basic_pmt();
    let mut head = vec![0u8];
    head.extend_from_slice(&pmt[..12]);
    w.packet(PMT_PID, true, &head);
    write_basic_streams(&mut w, &[184, 184, 180]);
    w.finish()
}

/// The first video packet carries only 5 bytes of the 14-byte PES header
pub(crate) fn build_m2ts_with_straddling_pes_header() -> Vec<u8> {
    let mut w = TsWriter::new(true);
    w.section(0, &pat_section(), PAYLOAD_MAX);
    w.section(PMT_PID, &basic_pmt(), PAYLOAD_MAX);
    write_basic_streams(&mut w, &[5, 184, 184, 175]);
    w.finish()
}

/// Single-program M2TS with caller-provided video and audio ES
pub(crate) fn build_m2ts(video_type: u8, video: &[u8], audio_type: u8, audio: &[u8]) -> Vec<u8> {
    let mut w = TsWriter::new(true);
    w.section(0, &pat_section(), PAYLOAD_MAX);
    w.section(PMT_PID, &pmt_section(&[(video_type, VIDEO_PID, &[]), (audio_type, AUDIO_PID, &[])]), PAYLOAD_MAX);
    for (pid, stream_id, es) in [(VIDEO_PID, 0xE0, video), (AUDIO_PID, 0xBD, audio)] {
        let pes = pes_packet(stream_id, es, false);
        let mut sizes = vec![PAYLOAD_MAX; pes.len() / PAYLOAD_MAX];
        if pes.len() % PAYLOAD_MAX != 0 {
            sizes.push(pes.len() % PAYLOAD_MAX);
        }
        w.pes(pid, &pes, &sizes);
    }
    w.finish()
}
