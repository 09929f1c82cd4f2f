use crate::constants::TABLE_ID_PAT;
use crate::error::{Error, Result};
use crate::psi::section::SectionReader;

/// ─────────── PAT ───────────
#[derive(Debug, Clone)]
pub struct PatSection {
    pub transport_stream_id: u16,
    pub version:             u8,
    pub programs:            Vec<PatEntry>,
}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    pub program_number: u16,
    pub pmt_pid:        u16,
}

impl PatSection {
    /// The first program (Blu-ray carries exactly one)
    pub fn first_program(&self) -> Option<PatEntry> {
        self.programs.first().copied()
    }
}

pub fn parse_pat(section: &[u8]) -> Result<PatSection> {
    let sec = SectionReader::new(section)?;
    if sec.table_id != TABLE_ID_PAT {
        return Err(Error::format(format!("expected PAT, got table {:#04x}", sec.table_id)));
    }

    let programs = sec
        .body
        .chunks_exact(4)
        .filter_map(|e| {
            let pn  = u16::from_be_bytes([e[0], e[1]]);
            let pid = (((e[2] & 0x1F) as u16) << 8) | (e[3] as u16);
            // program 0 points at the NIT
            (pn != 0).then_some(PatEntry { program_number: pn, pmt_pid: pid })
        })
        .collect();
    Ok(PatSection { transport_stream_id: sec.table_id_ext, version: sec.version, programs })
}
