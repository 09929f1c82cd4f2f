//! Demuxes DVD and Blu-ray sources and indexes their elementary streams by
//! the CRC-64 of fixed-size windows taken at codec sync points.

pub mod codec_id;
pub mod constants;
pub mod disc;
pub mod error;
pub mod es;
pub mod index;
pub mod parsers;
pub mod pes;
pub mod ps;
pub mod psi;
pub mod ranges;
pub mod report;
pub mod source;
pub mod split;
pub mod stats;
pub mod ts;
pub mod types;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
pub use es::EsReader;
pub use index::{hash_window, Index, IndexOptions, Location, SourceFile};
pub use report::Reporter;
pub use types::{Codec, ContainerKind, SubStream};
