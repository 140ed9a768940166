//! Range-reading container parser
//!
//! Only the tail window is read up front. The central directory normally
//! sits inside it; when it does not, one more range read fetches it. Local
//! headers are re-read for every entry so that data offsets never depend on
//! lengths recorded elsewhere.

use bytes::Bytes;
use tdf3_protocol::binary::BinaryRead;
use tdf3_protocol::zip::{
    local_header_length, CentralDirectoryRecord, EndOfCentralDirectory,
    Zip64EndOfCentralDirectory, Zip64Locator, CENTRAL_DIRECTORY_RECORD_FIXED_SIZE,
    CENTRAL_DIRECTORY_SIGNATURE, END_OF_CENTRAL_DIRECTORY_SIGNATURE,
    END_OF_CENTRAL_DIRECTORY_SIZE, LOCAL_FILE_HEADER_FIXED_SIZE,
    ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE, ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIZE,
    ZIP64_END_OF_CENTRAL_DIRECTORY_SIZE,
};
use tdf3_protocol::{FormatError, ManifestError, TdfManifest};

use super::chunker::{ByteRange, Chunker};
use crate::config::DEFAULT_TAIL_WINDOW;
use crate::error::TdfError;

/// One resolved container entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    pub name: String,
    /// Offset of the local header
    pub offset: u64,
    /// Length of the local header as found on disk
    pub header_length: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub external_attributes: u32,
}

impl ZipEntry {
    /// Offset of the first data byte
    pub fn data_offset(&self) -> Result<u64, FormatError> {
        self.offset
            .checked_add(self.header_length)
            .ok_or(FormatError::ValueOverflow {
                field: "entry data offset",
            })
    }
}

/// Look up an entry by name
pub fn find_entry<'e>(entries: &'e [ZipEntry], name: &str) -> Result<&'e ZipEntry, FormatError> {
    entries
        .iter()
        .find(|e| e.name == name)
        .ok_or_else(|| FormatError::EntryNotFound {
            name: name.to_string(),
        })
}

fn read_u32_at(buf: &[u8], pos: usize) -> Option<u32> {
    let bytes = buf.get(pos..pos + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_u16_at(buf: &[u8], pos: usize) -> Option<usize> {
    let bytes = buf.get(pos..pos + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]) as usize)
}

/// `46 + name + extra + comment` as declared by a record's fixed part
fn declared_record_length(buf: &[u8]) -> Option<usize> {
    Some(
        CENTRAL_DIRECTORY_RECORD_FIXED_SIZE
            + read_u16_at(buf, 28)?
            + read_u16_at(buf, 30)?
            + read_u16_at(buf, 32)?,
    )
}

/// Split a central directory region into records by scanning backward
///
/// A signature match only counts when the record it starts ends exactly
/// where the previously accepted record begins, so signature bytes inside a
/// file name are skipped.
fn scan_central_directory(region: &[u8]) -> Result<Vec<CentralDirectoryRecord>, FormatError> {
    let mut records = Vec::new();
    let mut end = region.len();
    let mut pos = region.len().checked_sub(CENTRAL_DIRECTORY_RECORD_FIXED_SIZE);

    while let Some(p) = pos {
        if read_u32_at(region, p) == Some(CENTRAL_DIRECTORY_SIGNATURE)
            && declared_record_length(&region[p..]) == Some(end - p)
        {
            records.push(CentralDirectoryRecord::parse(&region[p..end])?);
            end = p;
        }
        pos = p.checked_sub(1);
    }
    if end != 0 {
        return Err(FormatError::CentralDirectoryNotFound);
    }
    records.reverse();
    Ok(records)
}

/// Container reader over any byte-range source
pub struct ZipReader<'a> {
    chunker: &'a dyn Chunker,
    tail_window: u64,
}

impl<'a> ZipReader<'a> {
    pub fn new(chunker: &'a dyn Chunker) -> Self {
        ZipReader {
            chunker,
            tail_window: DEFAULT_TAIL_WINDOW,
        }
    }

    /// Bytes read from the end of the source to find the directory
    pub fn with_tail_window(mut self, tail_window: u64) -> Self {
        self.tail_window = tail_window.max(END_OF_CENTRAL_DIRECTORY_SIZE as u64);
        self
    }

    async fn read_exact(
        &self,
        structure: &'static str,
        start: u64,
        len: u64,
    ) -> Result<Bytes, TdfError> {
        let end = start
            .checked_add(len)
            .ok_or(FormatError::ValueOverflow { field: structure })?;
        let bytes = self
            .chunker
            .read_range(ByteRange::Bounded { start, end })
            .await?;
        if (bytes.len() as u64) < len {
            return Err(FormatError::Truncated {
                structure,
                needed: len as usize,
                available: bytes.len(),
            }
            .into());
        }
        if bytes.len() as u64 > len {
            return Err(FormatError::LengthMismatch {
                structure,
                expected: len as usize,
                found: bytes.len(),
            }
            .into());
        }
        Ok(bytes)
    }

    /// `[start, start + len)` from the tail buffer when it is there, else
    /// from the source
    async fn read_near_tail(
        &self,
        tail: &Bytes,
        tail_start: u64,
        structure: &'static str,
        start: u64,
        len: u64,
    ) -> Result<Bytes, TdfError> {
        if start >= tail_start {
            let from = (start - tail_start) as usize;
            let to = from.saturating_add(len as usize);
            if to <= tail.len() {
                return Ok(tail.slice(from..to));
            }
        }
        self.read_exact(structure, start, len).await
    }

    /// Resolve every entry of the container
    pub async fn central_directory(&self) -> Result<Vec<ZipEntry>, TdfError> {
        let source_len = self.chunker.size().await?;
        let tail = self
            .chunker
            .read_range(ByteRange::Suffix(self.tail_window))
            .await?;
        let tail_start = source_len.saturating_sub(tail.len() as u64);

        let eocd_pos = tail
            .len()
            .checked_sub(END_OF_CENTRAL_DIRECTORY_SIZE)
            .and_then(|last| {
                (0..=last)
                    .rev()
                    .find(|p| read_u32_at(&tail, *p) == Some(END_OF_CENTRAL_DIRECTORY_SIGNATURE))
            })
            .ok_or(FormatError::EndOfCentralDirectoryNotFound)?;
        let end = EndOfCentralDirectory::read_from(&mut &tail[eocd_pos..]).map_err(|_| {
            FormatError::Truncated {
                structure: "end of central directory",
                needed: END_OF_CENTRAL_DIRECTORY_SIZE,
                available: tail.len() - eocd_pos,
            }
        })?;
        let eocd_offset = tail_start + eocd_pos as u64;

        let (entry_count, cd_size, cd_offset, cd_limit) =
            match self.zip64_end(&tail, tail_start, eocd_offset).await? {
                Some((record, record_offset)) => (
                    record.entries,
                    record.central_directory_size,
                    record.central_directory_offset,
                    record_offset,
                ),
                None if end.is_zip64() => {
                    return Err(FormatError::MissingZip64Field {
                        field: "end of central directory locator",
                    }
                    .into())
                }
                None => (
                    u64::from(end.entries),
                    u64::from(end.central_directory_size),
                    u64::from(end.central_directory_offset),
                    eocd_offset,
                ),
            };

        let cd_end = cd_offset
            .checked_add(cd_size)
            .ok_or(FormatError::ValueOverflow {
                field: "central directory end",
            })?;
        if cd_end > cd_limit {
            return Err(FormatError::CentralDirectoryNotFound.into());
        }
        let region = self
            .read_near_tail(&tail, tail_start, "central directory", cd_offset, cd_size)
            .await?;
        let records = scan_central_directory(&region)?;
        if records.len() as u64 != entry_count {
            return Err(FormatError::EntryCountMismatch {
                expected: entry_count,
                found: records.len() as u64,
            }
            .into());
        }

        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let prefix = self
                .read_exact(
                    "local file header",
                    record.local_header_offset,
                    LOCAL_FILE_HEADER_FIXED_SIZE as u64,
                )
                .await?;
            let header_length = local_header_length(&prefix)?;
            if header_length != record.header_length_hint {
                tracing::debug!(
                    entry = %record.file_name,
                    recorded = record.header_length_hint,
                    actual = header_length,
                    "local header length differs from central directory"
                );
            }
            entries.push(ZipEntry {
                name: record.file_name,
                offset: record.local_header_offset,
                header_length,
                compressed_size: record.compressed_size,
                uncompressed_size: record.uncompressed_size,
                crc32: record.crc32,
                external_attributes: record.external_attributes,
            });
        }
        tracing::debug!(entries = entries.len(), cd_offset, "central directory parsed");
        Ok(entries)
    }

    /// Zip64 end record and its offset, when a locator precedes the EOCD
    async fn zip64_end(
        &self,
        tail: &Bytes,
        tail_start: u64,
        eocd_offset: u64,
    ) -> Result<Option<(Zip64EndOfCentralDirectory, u64)>, TdfError> {
        let locator_len = ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIZE as u64;
        let Some(locator_offset) = eocd_offset.checked_sub(locator_len) else {
            return Ok(None);
        };
        let bytes = self
            .read_near_tail(tail, tail_start, "zip64 locator", locator_offset, locator_len)
            .await?;
        if read_u32_at(&bytes, 0) != Some(ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE) {
            return Ok(None);
        }
        let locator = Zip64Locator::read_from(&mut &bytes[..]).map_err(|_| FormatError::Truncated {
            structure: "zip64 locator",
            needed: ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIZE,
            available: bytes.len(),
        })?;
        let record_offset = locator.end_record_offset;
        if record_offset > locator_offset {
            return Err(FormatError::CentralDirectoryNotFound.into());
        }
        let bytes = self
            .read_near_tail(
                tail,
                tail_start,
                "zip64 end of central directory",
                record_offset,
                ZIP64_END_OF_CENTRAL_DIRECTORY_SIZE as u64,
            )
            .await?;
        let record = Zip64EndOfCentralDirectory::read_from(&mut &bytes[..]).map_err(|_| {
            FormatError::InvalidSignature {
                structure: "zip64 end of central directory",
                expected: tdf3_protocol::zip::ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE,
                found: read_u32_at(&bytes, 0).unwrap_or(0),
            }
        })?;
        Ok(Some((record, record_offset)))
    }

    /// Deserialize a JSON manifest entry
    pub async fn manifest(&self, entries: &[ZipEntry], name: &str) -> Result<TdfManifest, TdfError> {
        let bytes = self.entry_bytes(entries, name).await?;
        let json = String::from_utf8(bytes.to_vec()).map_err(ManifestError::from)?;
        Ok(TdfManifest::from_json(&json)?)
    }

    /// `length` bytes starting `offset` bytes into an entry's data
    pub async fn payload_segment(
        &self,
        entries: &[ZipEntry],
        name: &str,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, TdfError> {
        let entry = find_entry(entries, name)?;
        let end = offset
            .checked_add(length)
            .ok_or(FormatError::ValueOverflow {
                field: "segment end",
            })?;
        if end > entry.compressed_size {
            return Err(FormatError::Truncated {
                structure: "payload segment",
                needed: end as usize,
                available: entry.compressed_size as usize,
            }
            .into());
        }
        let start = entry
            .data_offset()?
            .checked_add(offset)
            .ok_or(FormatError::ValueOverflow {
                field: "segment offset",
            })?;
        tracing::trace!(entry = name, offset, length, "reading payload window");
        self.read_exact("payload segment", start, length).await
    }

    /// Whole data of an entry
    pub async fn entry_bytes(&self, entries: &[ZipEntry], name: &str) -> Result<Bytes, TdfError> {
        let entry = find_entry(entries, name)?;
        self.read_exact("entry data", entry.data_offset()?, entry.compressed_size)
            .await
    }
}
