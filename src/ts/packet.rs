//! TS packet framing: stride detection and header decoding

use crate::constants::{M2TS_PACKET_SIZE, TS_PACKET_SIZE, TS_SYNC_BYTE, TS_SYNC_PACKETS};
use crate::error::{Error, Result};

/// Packet stride of a transport stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketLayout {
    /// 188, or 192 when every packet has a 4-byte timestamp prefix
    pub size: usize,
    /// Bytes in front of the sync byte
    pub prefix: usize,
    /// Offset of the first packet (including its prefix)
    pub start: u64,
}

/// Finds the first alignment where `TS_SYNC_PACKETS` sync bytes occur at a
/// 192- or 188-byte stride. Short files need only as many as they hold.
pub fn detect_layout(head: &[u8]) -> Result<PacketLayout> {
    for start in 0..M2TS_PACKET_SIZE {
        for (size, prefix) in [(M2TS_PACKET_SIZE, 4), (TS_PACKET_SIZE, 0)] {
            if start + size > head.len() {
                continue;
            }
            let available = (head.len() - start) / size;
            let need = available.min(TS_SYNC_PACKETS);
            if (0..need).all(|k| head[start + k * size + prefix] == TS_SYNC_BYTE) {
                return Ok(PacketLayout { size, prefix, start: start as u64 });
            }
        }
    }
    Err(Error::format("no TS sync pattern found"))
}

/// Decoded 4-byte TS header plus the payload location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsPacket<'a> {
    pub pid: u16,
    pub pusi: bool,
    /// Offset of `payload` from the sync byte
    pub payload_offset: usize,
    pub payload: &'a [u8],
}

/// Decodes one 188-byte packet starting at the sync byte. `None` for
/// packets without payload: adaptation-only, reserved control 0, or an
/// adaptation field that fills the packet.
pub fn parse_packet(pkt: &[u8]) -> Option<TsPacket<'_>> {
    if pkt.len() < TS_PACKET_SIZE || pkt[0] != TS_SYNC_BYTE {
        return None;
    }
    let pid = (((pkt[1] & 0x1F) as u16) << 8) | pkt[2] as u16;
    let pusi = pkt[1] & 0x40 != 0;
    let adaptation_field_ctrl = (pkt[3] & 0x30) >> 4;
    let mut payload_offset = 4usize;
    if adaptation_field_ctrl == 2 || adaptation_field_ctrl == 0 {
        return None;
    }
    if adaptation_field_ctrl == 3 {
        payload_offset += 1 + pkt[4] as usize;
        if payload_offset >= TS_PACKET_SIZE {
            return None;
        }
    }
    Some(TsPacket { pid, pusi, payload_offset, payload: &pkt[payload_offset..TS_PACKET_SIZE] })
}
