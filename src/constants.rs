//! Constants for disc, container and codec processing

use crc::{CRC_64_XZ, Crc};

/// MPEG-TS packet constants
pub const TS_PACKET_SIZE: usize = 188;
pub const M2TS_PACKET_SIZE: usize = 192;
pub const TS_SYNC_BYTE: u8 = 0x47;
/// Consecutive sync bytes required to lock onto a packet stride
pub const TS_SYNC_PACKETS: usize = 4;

/// PES packet constants
pub const PES_START_CODE: [u8; 3] = [0x00, 0x00, 0x01];
pub const PES_FIXED_HEADER: usize = 6;
pub const PES_MPEG2_HEADER: usize = 9;

/// Program stream start codes
pub const PACK_HEADER: u8 = 0xBA;
pub const SYSTEM_HEADER: u8 = 0xBB;
pub const PROGRAM_STREAM_MAP: u8 = 0xBC;
pub const PROGRAM_END: u8 = 0xB9;
pub const PRIVATE_STREAM_1: u8 = 0xBD;
pub const PADDING_STREAM: u8 = 0xBE;
pub const PRIVATE_STREAM_2: u8 = 0xBF;
pub const USER_DATA_START: u8 = 0xB2;

/// PSI
pub const PAT_PID: u16 = 0x0000;
pub const NULL_PID: u16 = 0x1FFF;
pub const TABLE_ID_PAT: u8 = 0x00;
pub const TABLE_ID_PMT: u8 = 0x02;
/// section_length is a 12-bit field but PAT/PMT are capped at 1021
pub const MAX_SECTION_LENGTH: usize = 1021;

/// Codec sync words
pub const AC3_SYNC: [u8; 2] = [0x0B, 0x77];
pub const TRUEHD_MAJOR_SYNC: [u8; 4] = [0xF8, 0x72, 0x6F, 0xBA];
pub const DTS_CORE_SYNC: [u8; 4] = [0x7F, 0xFE, 0x80, 0x01];
pub const DTS_EXSS_SYNC: [u8; 4] = [0x64, 0x58, 0x20, 0x25];

/// Splitter scan limits
pub const TRUEHD_PRESENCE_SCAN: usize = 16 * 1024;
pub const DTS_PRESENCE_SCAN: usize = 16 * 1024;
pub const DTS_CORE_SIZE_SCAN: usize = 32 * 1024;

/// Disc filesystem constants
pub const SECTOR_SIZE: usize = 2048;
pub const ISO_PVD_SECTOR: usize = 16;
pub const ISO_MAX_DIR_READ: usize = 256 * 1024;
pub const UDF_AVDP_SECTOR: usize = 256;
pub const UDF_MAX_DIR_READ: usize = 1024 * 1024;

/// Indexer defaults
pub const DEFAULT_WINDOW_SIZE: usize = 4096;
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;
/// Longest signature any detector needs to validate a sync point
pub const MAX_SYNC_HEADER: usize = 16;
/// Spacing of LPCM anchors, rounded down to whole sample groups
pub const LPCM_SYNC_INTERVAL: usize = 4096;

/// Window hash and whole-file checksum
pub const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);
