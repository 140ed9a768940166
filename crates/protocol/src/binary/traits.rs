//! Traits for ZIP record serialization and deserialization

use std::io::{self, Read, Write};

/// Records that can be decoded from their little-endian wire form
pub trait BinaryRead: Sized {
    /// Read this record, starting at its signature
    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self>;
}

/// Records that can be encoded to their little-endian wire form
pub trait BinaryWrite {
    /// Write this record to a binary writer
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()>;

    /// Get the size in bytes when serialized
    fn serialized_size(&self) -> usize;

    /// Serialize into a freshly allocated buffer
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        // Writing into a Vec cannot fail
        let _ = self.write_to(&mut buf);
        buf
    }
}
