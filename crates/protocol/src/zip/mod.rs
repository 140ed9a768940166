//! ZIP framing records used by the TDF3 container
//!
//! TDF3 uses a minimal subset of ZIP: stored (uncompressed) entries, sizes
//! carried in trailing data descriptors, and the Zip64 extensions when an
//! entry, offset or directory outgrows its 32-bit field.

use chrono::{Datelike, NaiveDateTime, Timelike};
use thiserror::Error;

pub mod records;

pub use records::{
    local_header_length, parse_extra_fields, CentralDirectoryRecord, DataDescriptor,
    EndOfCentralDirectory, LocalFileHeader, Zip64EndOfCentralDirectory, Zip64ExtraField,
    Zip64Locator,
};

pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x02014b50;
pub const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06054b50;
pub const ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06064b50;
pub const ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE: u32 = 0x07064b50;

pub const LOCAL_FILE_HEADER_FIXED_SIZE: usize = 30;
pub const CENTRAL_DIRECTORY_RECORD_FIXED_SIZE: usize = 46;
pub const DATA_DESCRIPTOR_SIZE: usize = 16;
pub const ZIP64_DATA_DESCRIPTOR_SIZE: usize = 24;
pub const END_OF_CENTRAL_DIRECTORY_SIZE: usize = 22;
pub const ZIP64_END_OF_CENTRAL_DIRECTORY_SIZE: usize = 56;
pub const ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIZE: usize = 20;

/// Zip64 extended information extra field header id
pub const ZIP64_EXTRA_FIELD_TAG: u16 = 0x0001;
/// Tag + size + three 8-byte values
pub const ZIP64_EXTRA_FIELD_SIZE: usize = 28;

pub const VERSION_NEEDED_UTF8: u16 = 20;
pub const VERSION_NEEDED_ZIP64: u16 = 45;
/// Host system 3 (unix), specification version 6.3
pub const VERSION_MADE_BY: u16 = (3 << 8) | 63;

pub const FLAG_FILE_NAME_IS_UTF8: u16 = 1 << 11;
pub const FLAG_SIZES_IN_DATA_DESCRIPTOR: u16 = 1 << 3;
pub const COMPRESSION_STORED: u16 = 0;

/// External attributes of every TDF3 entry: `0o100644 << 16`, a regular
/// file readable by all and writable by the owner.
pub const DEFAULT_EXTERNAL_ATTRIBUTES: u32 = 2_175_008_768;

/// Sentinel stored in a 32-bit field whose value lives in a Zip64 record
pub const ZIP64_SENTINEL_U32: u32 = 0xFFFF_FFFF;
/// Sentinel stored in a 16-bit entry count whose value lives in a Zip64 record
pub const ZIP64_SENTINEL_U16: u16 = 0xFFFF;

/// Container framing errors
///
/// Every variant is fatal: a container that fails to frame is rejected
/// outright and never retried.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Invalid {structure} signature: expected {expected:#010x}, found {found:#010x}")]
    InvalidSignature {
        structure: &'static str,
        expected: u32,
        found: u32,
    },

    #[error("Truncated {structure}: needed {needed} bytes, only {available} available")]
    Truncated {
        structure: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("End of central directory record not found")]
    EndOfCentralDirectoryNotFound,

    #[error("Central directory not found")]
    CentralDirectoryNotFound,

    #[error("Central directory lists {expected} entries but {found} were found")]
    EntryCountMismatch { expected: u64, found: u64 },

    #[error("Entry '{name}' not found in central directory")]
    EntryNotFound { name: String },

    #[error("Conflicting extra field {tag:#06x} for entry '{entry}'")]
    ConflictingExtraField { tag: u16, entry: String },

    #[error("Extra field length exceeds extra field buffer for entry '{entry}'")]
    ExtraFieldOverflow { entry: String },

    #[error("Zip64 extended information extra field does not include {field}")]
    MissingZip64Field { field: &'static str },

    #[error("Value of {field} overflows the addressable range")]
    ValueOverflow { field: &'static str },

    #[error("Source answered {found} bytes for {structure}, expected {expected}")]
    LengthMismatch {
        structure: &'static str,
        expected: usize,
        found: usize,
    },
}

impl FormatError {
    /// Returns an error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            FormatError::InvalidSignature { .. } => "INVALID_SIGNATURE",
            FormatError::Truncated { .. } => "TRUNCATED",
            FormatError::EndOfCentralDirectoryNotFound => "EOCD_NOT_FOUND",
            FormatError::CentralDirectoryNotFound => "CENTRAL_DIRECTORY_NOT_FOUND",
            FormatError::EntryCountMismatch { .. } => "ENTRY_COUNT_MISMATCH",
            FormatError::EntryNotFound { .. } => "ENTRY_NOT_FOUND",
            FormatError::ConflictingExtraField { .. } => "CONFLICTING_EXTRA_FIELD",
            FormatError::ExtraFieldOverflow { .. } => "EXTRA_FIELD_OVERFLOW",
            FormatError::MissingZip64Field { .. } => "MISSING_ZIP64_FIELD",
            FormatError::ValueOverflow { .. } => "VALUE_OVERFLOW",
            FormatError::LengthMismatch { .. } => "LENGTH_MISMATCH",
        }
    }
}

/// MS-DOS packed date and time, as found in FAT file systems
///
/// Date bits: 0-4 day (1-31), 5-8 month (1-12), 9-15 years since 1980.
/// Time bits: 0-4 seconds / 2, 5-10 minutes, 11-15 hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DosDateTime {
    pub date: u16,
    pub time: u16,
}

impl DosDateTime {
    /// Pack a calendar timestamp; years outside 1980..=2107 are clamped
    pub fn from_datetime(dt: &NaiveDateTime) -> Self {
        let year = dt.year().clamp(1980, 2107) - 1980;
        let date = (dt.day() as u16 & 0x1f)
            | ((dt.month() as u16 & 0xf) << 5)
            | ((year as u16 & 0x7f) << 9);
        let time = ((dt.second() / 2) as u16)
            | ((dt.minute() as u16 & 0x3f) << 5)
            | ((dt.hour() as u16 & 0x1f) << 11);
        DosDateTime { date, time }
    }
}

const CP437: [char; 256] = [
    '\u{0}', '☺', '☻', '♥', '♦', '♣', '♠', '•', '◘', '○', '◙', '♂', '♀', '♪', '♫', '☼', //
    '►', '◄', '↕', '‼', '¶', '§', '▬', '↨', '↑', '↓', '→', '←', '∟', '↔', '▲', '▼', //
    ' ', '!', '"', '#', '$', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/', //
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ':', ';', '<', '=', '>', '?', //
    '@', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', //
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', '[', '\\', ']', '^', '_', //
    '`', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', //
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', '{', '|', '}', '~', '⌂', //
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', //
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', //
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', //
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', //
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', //
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀', //
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩', //
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{a0}', //
];

/// Decode an entry name, honoring the UTF-8 general-purpose flag
///
/// Names without the flag are code page 437.
pub fn decode_file_name(bytes: &[u8], is_utf8: bool) -> String {
    if is_utf8 {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        bytes.iter().map(|b| CP437[*b as usize]).collect()
    }
}
