pub mod section;
pub mod pat;
pub mod pmt;

pub use section::{SectionAssembler, SectionReader};
pub use pat::{parse_pat, PatEntry, PatSection};
pub use pmt::{codec_for_stream, parse_pmt, PmtSection, StreamInfo};
