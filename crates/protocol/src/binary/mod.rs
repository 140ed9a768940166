//! Little-endian binary helpers for the ZIP container framing
//!
//! Every multi-byte integer in a ZIP structure is little-endian. 64-bit
//! fields are carried as two 32-bit words (low word first) and are combined
//! with native `u64` arithmetic, never through a lossy intermediate type.

use std::io::{self, Read, Write};

pub mod traits;

pub use traits::{BinaryRead, BinaryWrite};

/// Read a u16 (little-endian) from a reader
pub fn read_u16_le<R: Read>(reader: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

/// Read a u32 (little-endian) from a reader
pub fn read_u32_le<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read a u64 stored as two little-endian 32-bit words
pub fn read_u64_le<R: Read>(reader: &mut R) -> io::Result<u64> {
    let low = read_u32_le(reader)?;
    let high = read_u32_le(reader)?;
    Ok(combine_u64(low, high))
}

/// Read exactly n bytes from a reader
pub fn read_bytes<R: Read>(reader: &mut R, n: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Write a u16 (little-endian) to a writer
pub fn write_u16_le<W: Write>(writer: &mut W, value: u16) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a u32 (little-endian) to a writer
pub fn write_u32_le<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a u64 as two little-endian 32-bit words, low word first
pub fn write_u64_le<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    let (low, high) = split_u64(value);
    write_u32_le(writer, low)?;
    write_u32_le(writer, high)
}

/// Write bytes to a writer
pub fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes)
}

/// Split a u64 into its `(low, high)` 32-bit words
pub fn split_u64(value: u64) -> (u32, u32) {
    (value as u32, (value >> 32) as u32)
}

/// Combine `(low, high)` 32-bit words into a u64
pub fn combine_u64(low: u32, high: u32) -> u64 {
    (u64::from(high) << 32) | u64::from(low)
}

/// Narrow a u64 to usize, failing instead of truncating on 32-bit targets
pub fn to_usize(value: u64) -> io::Result<usize> {
    usize::try_from(value).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("value {value} does not fit in usize"),
        )
    })
}

/// Narrow a u64 into a 32-bit field, returning `None` when it needs Zip64
pub fn fits_u32(value: u64) -> Option<u32> {
    u32::try_from(value).ok().filter(|v| *v != u32::MAX)
}
