//! Record formatter for a forward-only container stream

use chrono::{Local, NaiveDateTime};
use tdf3_protocol::binary::{fits_u32, BinaryWrite};
use tdf3_protocol::zip::{
    CentralDirectoryRecord, DataDescriptor, EndOfCentralDirectory, LocalFileHeader,
    Zip64EndOfCentralDirectory, Zip64Locator, VERSION_NEEDED_ZIP64, ZIP64_SENTINEL_U16,
    ZIP64_SENTINEL_U32,
};
use tdf3_protocol::DosDateTime;

use super::Zip64Mode;

/// Bookkeeping the caller keeps for each entry it streamed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenEntry {
    pub name: String,
    /// Offset of the entry's local header
    pub offset: u64,
    pub size: u64,
    pub crc32: u32,
    pub external_attributes: u32,
}

/// Formats ZIP records as bytes
///
/// The writer holds no stream state. Offsets, sizes and CRCs are supplied by
/// the caller, which owns the sink.
///
/// # Example
///
/// ```
/// use tdf3::archive::{Zip64Mode, ZipWriter};
///
/// let writer = ZipWriter::new(Zip64Mode::Auto);
/// let header = writer.write_local_header("0.payload");
/// assert_eq!(header.len(), 30 + "0.payload".len());
/// ```
#[derive(Debug, Clone)]
pub struct ZipWriter {
    mode: Zip64Mode,
    modified: DosDateTime,
}

impl ZipWriter {
    /// Writer stamped with the local clock
    pub fn new(mode: Zip64Mode) -> Self {
        Self::with_timestamp(mode, Local::now().naive_local())
    }

    /// Writer stamped with a fixed time, for reproducible output
    pub fn with_timestamp(mode: Zip64Mode, modified: NaiveDateTime) -> Self {
        ZipWriter {
            mode,
            modified: DosDateTime::from_datetime(&modified),
        }
    }

    pub fn mode(&self) -> Zip64Mode {
        self.mode
    }

    fn always(&self) -> bool {
        self.mode == Zip64Mode::Always
    }

    /// Local header with the sizes-follow flag set
    ///
    /// Sizes are unknown at this point, so `Auto` never emits the Zip64
    /// extra field here; the data descriptor and central directory carry
    /// the real values.
    pub fn write_local_header(&self, name: &str) -> Vec<u8> {
        let mut header = LocalFileHeader::streaming(name, self.modified, self.always());
        if self.always() {
            header.version_needed = VERSION_NEEDED_ZIP64;
        }
        header.to_bytes()
    }

    /// Trailing CRC and size of an entry
    pub fn write_data_descriptor(&self, crc32: u32, size: u64) -> Vec<u8> {
        DataDescriptor {
            crc32,
            size,
            zip64: self.always() || fits_u32(size).is_none(),
        }
        .to_bytes()
    }

    pub fn write_central_directory_record(
        &self,
        size: u64,
        name: &str,
        offset: u64,
        crc32: u32,
        external_attributes: u32,
    ) -> Vec<u8> {
        let mut record = CentralDirectoryRecord::new(
            name,
            size,
            offset,
            crc32,
            external_attributes,
            self.modified,
        );
        record.force_zip64 = self.always();
        record.to_bytes()
    }

    /// End of central directory, preceded by the Zip64 end record and
    /// locator when any value overflows or the mode demands it
    ///
    /// `cd_offset + cd_size` must be the stream position where these bytes
    /// begin.
    pub fn write_end_of_central_directory(
        &self,
        entry_count: u64,
        cd_size: u64,
        cd_offset: u64,
    ) -> Vec<u8> {
        let entries = u16::try_from(entry_count)
            .ok()
            .filter(|n| *n != ZIP64_SENTINEL_U16);
        let size = fits_u32(cd_size);
        let offset = fits_u32(cd_offset);
        let zip64 = self.always() || entries.is_none() || size.is_none() || offset.is_none();

        let mut out = Vec::new();
        if zip64 {
            let end_record_offset = cd_offset.saturating_add(cd_size);
            out.extend(
                Zip64EndOfCentralDirectory {
                    entries: entry_count,
                    central_directory_size: cd_size,
                    central_directory_offset: cd_offset,
                }
                .to_bytes(),
            );
            out.extend(
                Zip64Locator {
                    end_record_offset,
                    total_disks: 1,
                }
                .to_bytes(),
            );
        }
        let end = if zip64 {
            EndOfCentralDirectory {
                entries: ZIP64_SENTINEL_U16,
                central_directory_size: ZIP64_SENTINEL_U32,
                central_directory_offset: ZIP64_SENTINEL_U32,
                comment_length: 0,
            }
        } else {
            EndOfCentralDirectory {
                entries: entries.unwrap_or(ZIP64_SENTINEL_U16),
                central_directory_size: size.unwrap_or(ZIP64_SENTINEL_U32),
                central_directory_offset: offset.unwrap_or(ZIP64_SENTINEL_U32),
                comment_length: 0,
            }
        };
        out.extend(end.to_bytes());
        out
    }

    /// Central directory for `entries` followed by the end records
    pub fn write_central_directory(&self, entries: &[WrittenEntry], cd_offset: u64) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in entries {
            out.extend(self.write_central_directory_record(
                entry.size,
                &entry.name,
                entry.offset,
                entry.crc32,
                entry.external_attributes,
            ));
        }
        let cd_size = out.len() as u64;
        out.extend(self.write_end_of_central_directory(entries.len() as u64, cd_size, cd_offset));
        out
    }
}
