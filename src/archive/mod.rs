//! ZIP-derived container framing
//!
//! [`ZipWriter`] formats records for a forward-only stream; the engine keeps
//! the running offsets and CRCs. [`ZipReader`] locates entries from the tail
//! of any [`Chunker`] and reads only the windows it is asked for.

use serde::{Deserialize, Serialize};

pub mod chunker;
pub mod reader;
pub mod writer;

pub use chunker::{BufferChunker, ByteRange, Chunker, ChunkerError, FileChunker, UrlChunker};
pub use reader::{ZipEntry, ZipReader};
pub use writer::{WrittenEntry, ZipWriter};

/// When the writer uses Zip64 records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zip64Mode {
    /// Only records whose values overflow their classic fields
    #[default]
    Auto,
    /// Every record, including the end of central directory triple
    Always,
}

impl std::str::FromStr for Zip64Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Zip64Mode::Auto),
            "always" => Ok(Zip64Mode::Always),
            other => Err(format!("unknown zip64 mode '{}'", other)),
        }
    }
}
