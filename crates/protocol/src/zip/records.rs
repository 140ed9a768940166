//! Fixed-layout ZIP records
//!
//! Writers build these structs and serialize them with [`BinaryWrite`];
//! the central directory and end records are parsed back from slices with
//! explicit bounds checks so that malformed input surfaces as a
//! [`FormatError`] rather than a panic.

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};

use super::*;
use crate::binary::{
    fits_u32, read_u16_le, read_u32_le, read_u64_le, write_bytes, write_u16_le,
    write_u32_le, write_u64_le, BinaryRead, BinaryWrite,
};

fn truncated(structure: &'static str, needed: usize, available: usize) -> FormatError {
    FormatError::Truncated {
        structure,
        needed,
        available,
    }
}

fn io_to_format(structure: &'static str, available: usize) -> impl Fn(io::Error) -> FormatError {
    move |_| truncated(structure, available + 1, available)
}

fn expect_signature(structure: &'static str, expected: u32, found: u32) -> Result<(), FormatError> {
    if expected == found {
        Ok(())
    } else {
        Err(FormatError::InvalidSignature {
            structure,
            expected,
            found,
        })
    }
}

/// Zip64 extended information extra field: three 8-byte values
///
/// In a local file header the values are (compressed, uncompressed, 0); in
/// a central directory record they are (uncompressed, compressed, offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zip64ExtraField(pub [u64; 3]);

impl Zip64ExtraField {
    pub fn for_local_header(compressed: u64, uncompressed: u64) -> Self {
        Zip64ExtraField([compressed, uncompressed, 0])
    }

    pub fn for_central_directory(uncompressed: u64, compressed: u64, offset: u64) -> Self {
        Zip64ExtraField([uncompressed, compressed, offset])
    }
}

impl BinaryWrite for Zip64ExtraField {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_u16_le(writer, ZIP64_EXTRA_FIELD_TAG)?;
        write_u16_le(writer, (ZIP64_EXTRA_FIELD_SIZE - 4) as u16)?;
        for value in self.0 {
            write_u64_le(writer, value)?;
        }
        Ok(())
    }

    fn serialized_size(&self) -> usize {
        ZIP64_EXTRA_FIELD_SIZE
    }
}

/// Split an extra-field block into its tagged records
///
/// Duplicate tags and records that overrun the block are format errors.
pub fn parse_extra_fields<'a>(
    block: &'a [u8],
    entry: &str,
) -> Result<BTreeMap<u16, &'a [u8]>, FormatError> {
    let mut fields = BTreeMap::new();
    let mut i = 0usize;
    while i + 4 <= block.len() {
        let tag = u16::from_le_bytes([block[i], block[i + 1]]);
        let size = u16::from_le_bytes([block[i + 2], block[i + 3]]) as usize;
        let start = i + 4;
        let end = start + size;
        if end > block.len() {
            return Err(FormatError::ExtraFieldOverflow {
                entry: entry.to_string(),
            });
        }
        if fields.insert(tag, &block[start..end]).is_some() {
            return Err(FormatError::ConflictingExtraField {
                tag,
                entry: entry.to_string(),
            });
        }
        i = end;
    }
    Ok(fields)
}

/// Local file header preceding each entry's data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression: u16,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name: String,
    pub zip64: Option<Zip64ExtraField>,
}

impl LocalFileHeader {
    /// Header for a streamed entry whose CRC and sizes follow in a data descriptor
    pub fn streaming(file_name: &str, modified: DosDateTime, zip64: bool) -> Self {
        LocalFileHeader {
            version_needed: VERSION_NEEDED_UTF8,
            flags: FLAG_FILE_NAME_IS_UTF8 | FLAG_SIZES_IN_DATA_DESCRIPTOR,
            compression: COMPRESSION_STORED,
            modified,
            crc32: 0,
            compressed_size: if zip64 { ZIP64_SENTINEL_U32 } else { 0 },
            uncompressed_size: if zip64 { ZIP64_SENTINEL_U32 } else { 0 },
            file_name: file_name.to_string(),
            zip64: zip64.then(|| Zip64ExtraField::for_local_header(0, 0)),
        }
    }

    fn extra_len(&self) -> usize {
        self.zip64.map_or(0, |f| f.serialized_size())
    }
}

impl BinaryWrite for LocalFileHeader {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_u32_le(writer, LOCAL_FILE_HEADER_SIGNATURE)?;
        write_u16_le(writer, self.version_needed)?;
        write_u16_le(writer, self.flags)?;
        write_u16_le(writer, self.compression)?;
        write_u16_le(writer, self.modified.time)?;
        write_u16_le(writer, self.modified.date)?;
        write_u32_le(writer, self.crc32)?;
        write_u32_le(writer, self.compressed_size)?;
        write_u32_le(writer, self.uncompressed_size)?;
        write_u16_le(writer, self.file_name.len() as u16)?;
        write_u16_le(writer, self.extra_len() as u16)?;
        write_bytes(writer, self.file_name.as_bytes())?;
        if let Some(extra) = &self.zip64 {
            extra.write_to(writer)?;
        }
        Ok(())
    }

    fn serialized_size(&self) -> usize {
        LOCAL_FILE_HEADER_FIXED_SIZE + self.file_name.len() + self.extra_len()
    }
}

/// Compute the true length of a local file header from its fixed prefix
pub fn local_header_length(prefix: &[u8]) -> Result<u64, FormatError> {
    if prefix.len() < LOCAL_FILE_HEADER_FIXED_SIZE {
        return Err(truncated(
            "local file header",
            LOCAL_FILE_HEADER_FIXED_SIZE,
            prefix.len(),
        ));
    }
    let signature = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
    expect_signature(
        "local file header",
        LOCAL_FILE_HEADER_SIGNATURE,
        signature,
    )?;
    let name_len = u16::from_le_bytes([prefix[26], prefix[27]]);
    let extra_len = u16::from_le_bytes([prefix[28], prefix[29]]);
    Ok(LOCAL_FILE_HEADER_FIXED_SIZE as u64 + u64::from(name_len) + u64::from(extra_len))
}

/// Trailing record carrying CRC-32 and size of a streamed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub size: u64,
    pub zip64: bool,
}

impl BinaryWrite for DataDescriptor {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_u32_le(writer, DATA_DESCRIPTOR_SIGNATURE)?;
        write_u32_le(writer, self.crc32)?;
        if self.zip64 {
            // Stored entries: compressed and uncompressed sizes are equal
            write_u64_le(writer, self.size)?;
            write_u64_le(writer, self.size)
        } else {
            write_u32_le(writer, self.size as u32)?;
            write_u32_le(writer, self.size as u32)
        }
    }

    fn serialized_size(&self) -> usize {
        if self.zip64 {
            ZIP64_DATA_DESCRIPTOR_SIZE
        } else {
            DATA_DESCRIPTOR_SIZE
        }
    }
}

/// Central directory file header
///
/// Sizes and offset are held at full 64-bit width; [`BinaryWrite`] decides
/// whether they fit the classic fields or move into a Zip64 extra field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryRecord {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression: u16,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub file_name: String,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    pub local_header_offset: u64,
    /// Header length implied by this record (30 + name + extra). Readers
    /// must not trust it for locating data.
    pub header_length_hint: u64,
    /// Force the Zip64 layout even when every value fits
    pub force_zip64: bool,
}

impl CentralDirectoryRecord {
    pub fn new(
        file_name: &str,
        size: u64,
        local_header_offset: u64,
        crc32: u32,
        external_attributes: u32,
        modified: DosDateTime,
    ) -> Self {
        CentralDirectoryRecord {
            version_made_by: VERSION_MADE_BY,
            version_needed: VERSION_NEEDED_UTF8,
            flags: FLAG_FILE_NAME_IS_UTF8 | FLAG_SIZES_IN_DATA_DESCRIPTOR,
            compression: COMPRESSION_STORED,
            modified,
            crc32,
            compressed_size: size,
            uncompressed_size: size,
            file_name: file_name.to_string(),
            internal_attributes: 0,
            external_attributes,
            local_header_offset,
            header_length_hint: (LOCAL_FILE_HEADER_FIXED_SIZE + file_name.len()) as u64,
            force_zip64: false,
        }
    }

    /// Whether this record must be written in Zip64 form
    pub fn is_zip64(&self) -> bool {
        self.force_zip64
            || fits_u32(self.uncompressed_size).is_none()
            || fits_u32(self.compressed_size).is_none()
            || fits_u32(self.local_header_offset).is_none()
    }

    /// Parse a central directory record from the start of `buf`
    ///
    /// Zip64 values are only read for fields holding the `0xFFFFFFFF`
    /// sentinel, in the order uncompressed size, compressed size, offset.
    pub fn parse(buf: &[u8]) -> Result<Self, FormatError> {
        const STRUCTURE: &str = "central directory record";
        if buf.len() < CENTRAL_DIRECTORY_RECORD_FIXED_SIZE {
            return Err(truncated(
                STRUCTURE,
                CENTRAL_DIRECTORY_RECORD_FIXED_SIZE,
                buf.len(),
            ));
        }
        let eof = io_to_format(STRUCTURE, buf.len());
        let mut cursor = Cursor::new(buf);
        let signature = read_u32_le(&mut cursor).map_err(&eof)?;
        expect_signature(STRUCTURE, CENTRAL_DIRECTORY_SIGNATURE, signature)?;

        let version_made_by = read_u16_le(&mut cursor).map_err(&eof)?;
        let version_needed = read_u16_le(&mut cursor).map_err(&eof)?;
        let flags = read_u16_le(&mut cursor).map_err(&eof)?;
        let compression = read_u16_le(&mut cursor).map_err(&eof)?;
        let time = read_u16_le(&mut cursor).map_err(&eof)?;
        let date = read_u16_le(&mut cursor).map_err(&eof)?;
        let crc32 = read_u32_le(&mut cursor).map_err(&eof)?;
        let compressed_size = read_u32_le(&mut cursor).map_err(&eof)?;
        let uncompressed_size = read_u32_le(&mut cursor).map_err(&eof)?;
        let name_len = read_u16_le(&mut cursor).map_err(&eof)? as usize;
        let extra_len = read_u16_le(&mut cursor).map_err(&eof)? as usize;
        let _comment_len = read_u16_le(&mut cursor).map_err(&eof)?;
        let _disk_start = read_u16_le(&mut cursor).map_err(&eof)?;
        let internal_attributes = read_u16_le(&mut cursor).map_err(&eof)?;
        let external_attributes = read_u32_le(&mut cursor).map_err(&eof)?;
        let local_header_offset = read_u32_le(&mut cursor).map_err(&eof)?;

        let name_end = CENTRAL_DIRECTORY_RECORD_FIXED_SIZE + name_len;
        let extra_end = name_end + extra_len;
        if buf.len() < extra_end {
            return Err(truncated(STRUCTURE, extra_end, buf.len()));
        }
        let file_name = decode_file_name(
            &buf[CENTRAL_DIRECTORY_RECORD_FIXED_SIZE..name_end],
            flags & FLAG_FILE_NAME_IS_UTF8 != 0,
        );

        let mut record = CentralDirectoryRecord {
            version_made_by,
            version_needed,
            flags,
            compression,
            modified: DosDateTime { date, time },
            crc32,
            compressed_size: u64::from(compressed_size),
            uncompressed_size: u64::from(uncompressed_size),
            header_length_hint: (LOCAL_FILE_HEADER_FIXED_SIZE + name_len + extra_len) as u64,
            file_name,
            internal_attributes,
            external_attributes,
            local_header_offset: u64::from(local_header_offset),
            force_zip64: false,
        };

        // Zip64 was introduced in PKZIP 4.5
        if version_needed < VERSION_NEEDED_ZIP64 || extra_len == 0 {
            return Ok(record);
        }

        let fields = parse_extra_fields(&buf[name_end..extra_end], &record.file_name)?;
        if let Some(zip64) = fields.get(&ZIP64_EXTRA_FIELD_TAG) {
            record.force_zip64 = true;
            let mut cursor = Cursor::new(*zip64);
            if uncompressed_size == ZIP64_SENTINEL_U32 {
                record.uncompressed_size = read_u64_le(&mut cursor).map_err(|_| {
                    FormatError::MissingZip64Field {
                        field: "uncompressed size",
                    }
                })?;
            }
            if compressed_size == ZIP64_SENTINEL_U32 {
                record.compressed_size = read_u64_le(&mut cursor).map_err(|_| {
                    FormatError::MissingZip64Field {
                        field: "compressed size",
                    }
                })?;
            }
            if local_header_offset == ZIP64_SENTINEL_U32 {
                record.local_header_offset = read_u64_le(&mut cursor).map_err(|_| {
                    FormatError::MissingZip64Field {
                        field: "relative header offset",
                    }
                })?;
            }
        }
        Ok(record)
    }
}

impl BinaryWrite for CentralDirectoryRecord {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let zip64 = self.is_zip64();
        let (version_needed, compressed, uncompressed, offset) = if zip64 {
            (
                VERSION_NEEDED_ZIP64,
                ZIP64_SENTINEL_U32,
                ZIP64_SENTINEL_U32,
                ZIP64_SENTINEL_U32,
            )
        } else {
            (
                self.version_needed,
                self.compressed_size as u32,
                self.uncompressed_size as u32,
                self.local_header_offset as u32,
            )
        };
        let extra_len = if zip64 { ZIP64_EXTRA_FIELD_SIZE } else { 0 };

        write_u32_le(writer, CENTRAL_DIRECTORY_SIGNATURE)?;
        write_u16_le(writer, self.version_made_by)?;
        write_u16_le(writer, version_needed)?;
        write_u16_le(writer, self.flags)?;
        write_u16_le(writer, self.compression)?;
        write_u16_le(writer, self.modified.time)?;
        write_u16_le(writer, self.modified.date)?;
        write_u32_le(writer, self.crc32)?;
        write_u32_le(writer, compressed)?;
        write_u32_le(writer, uncompressed)?;
        write_u16_le(writer, self.file_name.len() as u16)?;
        write_u16_le(writer, extra_len as u16)?;
        // comment length, disk number start
        write_u16_le(writer, 0)?;
        write_u16_le(writer, 0)?;
        write_u16_le(writer, self.internal_attributes)?;
        write_u32_le(writer, self.external_attributes)?;
        write_u32_le(writer, offset)?;
        write_bytes(writer, self.file_name.as_bytes())?;
        if zip64 {
            Zip64ExtraField::for_central_directory(
                self.uncompressed_size,
                self.compressed_size,
                self.local_header_offset,
            )
            .write_to(writer)?;
        }
        Ok(())
    }

    fn serialized_size(&self) -> usize {
        let extra = if self.is_zip64() {
            ZIP64_EXTRA_FIELD_SIZE
        } else {
            0
        };
        CENTRAL_DIRECTORY_RECORD_FIXED_SIZE + self.file_name.len() + extra
    }
}

/// Classic end of central directory record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub comment_length: u16,
}

impl EndOfCentralDirectory {
    /// True when the real values live in a Zip64 end record
    pub fn is_zip64(&self) -> bool {
        self.entries == ZIP64_SENTINEL_U16
            || self.central_directory_size == ZIP64_SENTINEL_U32
            || self.central_directory_offset == ZIP64_SENTINEL_U32
    }
}

impl BinaryRead for EndOfCentralDirectory {
    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let signature = read_u32_le(reader)?;
        if signature != END_OF_CENTRAL_DIRECTORY_SIGNATURE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid end of central directory signature",
            ));
        }
        let _disk = read_u16_le(reader)?;
        let _cd_disk = read_u16_le(reader)?;
        let _entries_on_disk = read_u16_le(reader)?;
        let entries = read_u16_le(reader)?;
        let central_directory_size = read_u32_le(reader)?;
        let central_directory_offset = read_u32_le(reader)?;
        let comment_length = read_u16_le(reader)?;
        Ok(EndOfCentralDirectory {
            entries,
            central_directory_size,
            central_directory_offset,
            comment_length,
        })
    }
}

impl BinaryWrite for EndOfCentralDirectory {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_u32_le(writer, END_OF_CENTRAL_DIRECTORY_SIGNATURE)?;
        // this disk, disk with the central directory
        write_u16_le(writer, 0)?;
        write_u16_le(writer, 0)?;
        write_u16_le(writer, self.entries)?;
        write_u16_le(writer, self.entries)?;
        write_u32_le(writer, self.central_directory_size)?;
        write_u32_le(writer, self.central_directory_offset)?;
        write_u16_le(writer, self.comment_length)
    }

    fn serialized_size(&self) -> usize {
        END_OF_CENTRAL_DIRECTORY_SIZE
    }
}

/// Zip64 end of central directory record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zip64EndOfCentralDirectory {
    pub entries: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
}

impl BinaryRead for Zip64EndOfCentralDirectory {
    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let signature = read_u32_le(reader)?;
        if signature != ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid zip64 end of central directory signature",
            ));
        }
        let _record_size = read_u64_le(reader)?;
        let _version_made_by = read_u16_le(reader)?;
        let _version_needed = read_u16_le(reader)?;
        let _disk = read_u32_le(reader)?;
        let _cd_disk = read_u32_le(reader)?;
        let _entries_on_disk = read_u64_le(reader)?;
        let entries = read_u64_le(reader)?;
        let central_directory_size = read_u64_le(reader)?;
        let central_directory_offset = read_u64_le(reader)?;
        Ok(Zip64EndOfCentralDirectory {
            entries,
            central_directory_size,
            central_directory_offset,
        })
    }
}

impl BinaryWrite for Zip64EndOfCentralDirectory {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_u32_le(writer, ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE)?;
        // size of the record that follows this field
        write_u64_le(writer, (ZIP64_END_OF_CENTRAL_DIRECTORY_SIZE - 12) as u64)?;
        write_u16_le(writer, VERSION_MADE_BY)?;
        write_u16_le(writer, VERSION_NEEDED_ZIP64)?;
        write_u32_le(writer, 0)?;
        write_u32_le(writer, 0)?;
        write_u64_le(writer, self.entries)?;
        write_u64_le(writer, self.entries)?;
        write_u64_le(writer, self.central_directory_size)?;
        write_u64_le(writer, self.central_directory_offset)
    }

    fn serialized_size(&self) -> usize {
        ZIP64_END_OF_CENTRAL_DIRECTORY_SIZE
    }
}

/// Zip64 end of central directory locator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zip64Locator {
    pub end_record_offset: u64,
    pub total_disks: u32,
}

impl BinaryRead for Zip64Locator {
    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let signature = read_u32_le(reader)?;
        if signature != ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid zip64 locator signature",
            ));
        }
        let _disk = read_u32_le(reader)?;
        let end_record_offset = read_u64_le(reader)?;
        let total_disks = read_u32_le(reader)?;
        Ok(Zip64Locator {
            end_record_offset,
            total_disks,
        })
    }
}

impl BinaryWrite for Zip64Locator {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_u32_le(writer, ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE)?;
        write_u32_le(writer, 0)?;
        write_u64_le(writer, self.end_record_offset)?;
        write_u32_le(writer, self.total_disks)
    }

    fn serialized_size(&self) -> usize {
        ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIZE
    }
}
