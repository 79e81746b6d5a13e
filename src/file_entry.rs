//! `FileEntry`: a facade over one base MFT entry, presenting file and
//! directory semantics built from its attributes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::trace;
use uuid::Uuid;

use crate::cluster_stream::ClusterStream;
use crate::compressed_stream::CompressedBlockStream;
use crate::compression::CompressionUnitPlan;
use crate::constants::*;
use crate::error::{NtfsError, Result};
use crate::filesystem::FileSystem;
use crate::index::{IndexEntry, IndexEngine, Lookup};
use crate::mft_entry::{FileReference, MftEntry};
use crate::wof::{self, WofStream};

/// Windows FILETIME epoch (1601-01-01) to Unix epoch (1970-01-01), in
/// seconds; FILETIME itself counts 100ns ticks.
const WINDOWS_EPOCH_DIFF_SECONDS: i64 = 11_644_473_600;
const FILETIME_TICKS_PER_SECOND: i64 = 10_000_000;

fn filetime_to_utc(filetime: u64) -> Option<DateTime<Utc>> {
    let ticks = filetime as i64;
    let seconds = ticks / FILETIME_TICKS_PER_SECOND - WINDOWS_EPOCH_DIFF_SECONDS;
    let nanos = ((ticks % FILETIME_TICKS_PER_SECOND) * 100) as u32;
    DateTime::<Utc>::from_timestamp(seconds, nanos)
}

/// `$STANDARD_INFORMATION`'s fixed fields. The owner/security id tail only exists on
/// NTFS 3.0+ volumes; pre-3.0 records are 48 bytes and leave both at 0.
struct StandardInformation {
    creation_time: u64,
    modification_time: u64,
    mft_modification_time: u64,
    access_time: u64,
    file_attribute_flags: u32,
    security_id: u32,
}

impl StandardInformation {
    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 48 {
            return None;
        }
        let security_id = if data.len() >= 72 {
            u32::from_le_bytes(data[52..56].try_into().unwrap())
        } else {
            0
        };
        Some(Self {
            creation_time: u64::from_le_bytes(data[0..8].try_into().unwrap()),
            modification_time: u64::from_le_bytes(data[8..16].try_into().unwrap()),
            mft_modification_time: u64::from_le_bytes(data[16..24].try_into().unwrap()),
            access_time: u64::from_le_bytes(data[24..32].try_into().unwrap()),
            file_attribute_flags: u32::from_le_bytes(data[32..36].try_into().unwrap()),
            security_id,
        })
    }
}

/// One data stream reachable from a `FileEntry`: resident bytes, a plain
/// `ClusterStream`, an LZNT1-compressed `CompressedBlockStream`, or a
/// WOF-decorated stream.
pub enum DataStream {
    Resident(Vec<u8>),
    Cluster(ClusterStream),
    Compressed(CompressedBlockStream),
    Wof(WofStream),
}

impl DataStream {
    pub fn size(&self) -> u64 {
        match self {
            DataStream::Resident(data) => data.len() as u64,
            DataStream::Cluster(stream) => stream.size(),
            DataStream::Compressed(stream) => stream.size(),
            DataStream::Wof(stream) => stream.size(),
        }
    }

    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        match self {
            DataStream::Resident(data) => {
                let start = (offset.min(data.len() as u64)) as usize;
                let end = (start + len).min(data.len());
                Ok(data[start..end].to_vec())
            }
            DataStream::Cluster(stream) => stream.read_at(offset, len),
            DataStream::Compressed(stream) => stream.read_at(offset, len),
            DataStream::Wof(stream) => stream.read_at(offset, len),
        }
    }

    pub fn read_to_end(&self) -> Result<Vec<u8>> {
        self.read_at(0, self.size() as usize)
    }
}

/// A navigable file or directory, constructed from a `(FileSystem,
/// MftEntry)` pair. Rejects extension MFT records at construction.
pub struct FileEntry {
    fs: FileSystem,
    entry: Arc<MftEntry>,
}

impl FileEntry {
    pub(crate) fn new(fs: FileSystem, entry: Arc<MftEntry>) -> Result<Self> {
        if entry.is_extension_record() {
            return Err(NtfsError::invalid_record(format!(
                "MFT entry {} is an extension record, not a base file entry",
                entry.mft_index()
            )));
        }
        Ok(Self { fs, entry })
    }

    pub fn file_reference(&self) -> FileReference {
        self.entry.file_reference()
    }

    pub fn parent_file_reference(&self) -> Option<FileReference> {
        let attr = self.entry.preferred_file_name()?;
        let data = attr.resident_data().ok()?;
        let bytes: [u8; 8] = data.get(0..8)?.try_into().ok()?;
        Some(FileReference(u64::from_le_bytes(bytes)))
    }

    pub fn is_directory(&self) -> bool {
        self.entry.is_directory()
    }

    pub fn is_allocated(&self) -> bool {
        self.entry.is_allocated()
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_empty()
    }

    pub fn has_default_data_stream(&self) -> bool {
        self.entry.find_unnamed_data().is_some()
    }

    /// Preferred display name, per the namespace precedence `preferred_file_name`
    /// already applies (Win32&DOS, else Win32, else POSIX).
    pub fn name(&self) -> Option<String> {
        let attr = self.entry.preferred_file_name()?;
        let data = attr.resident_data().ok()?;
        if data.len() < 0x42 {
            return None;
        }
        let name_length = data[0x40] as usize;
        let start = 0x42;
        let end = start + name_length * 2;
        let bytes = data.get(start..end)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Some(String::from_utf16_lossy(&units))
    }

    pub fn name_utf16(&self) -> Option<Vec<u16>> {
        self.name().map(|name| name.encode_utf16().collect())
    }

    fn standard_information(&self) -> Option<StandardInformation> {
        let attr = self.entry.standard_information()?;
        StandardInformation::parse(attr.resident_data().ok()?)
    }

    /// `$FILE_NAME`'s own embedded timestamps, used when
    /// `$STANDARD_INFORMATION` is absent. Layout: parent_ref(8) creation(8) modification(8)
    /// mft_modification(8) access(8), starting right after the 8-byte
    /// parent reference.
    fn file_name_timestamps(&self) -> Option<[u64; 4]> {
        let attr = self.entry.preferred_file_name()?;
        let data = attr.resident_data().ok()?;
        if data.len() < 40 {
            return None;
        }
        Some([
            u64::from_le_bytes(data[8..16].try_into().unwrap()),
            u64::from_le_bytes(data[16..24].try_into().unwrap()),
            u64::from_le_bytes(data[24..32].try_into().unwrap()),
            u64::from_le_bytes(data[32..40].try_into().unwrap()),
        ])
    }

    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        let raw = self
            .standard_information()
            .map(|si| si.creation_time)
            .or_else(|| self.file_name_timestamps().map(|t| t[0]))?;
        filetime_to_utc(raw)
    }

    pub fn modification_time(&self) -> Option<DateTime<Utc>> {
        let raw = self
            .standard_information()
            .map(|si| si.modification_time)
            .or_else(|| self.file_name_timestamps().map(|t| t[1]))?;
        filetime_to_utc(raw)
    }

    pub fn entry_modification_time(&self) -> Option<DateTime<Utc>> {
        let raw = self
            .standard_information()
            .map(|si| si.mft_modification_time)
            .or_else(|| self.file_name_timestamps().map(|t| t[2]))?;
        filetime_to_utc(raw)
    }

    pub fn access_time(&self) -> Option<DateTime<Utc>> {
        let raw = self
            .standard_information()
            .map(|si| si.access_time)
            .or_else(|| self.file_name_timestamps().map(|t| t[3]))?;
        filetime_to_utc(raw)
    }

    pub fn file_attribute_flags(&self) -> u32 {
        self.standard_information()
            .map(|si| si.file_attribute_flags)
            .unwrap_or(0)
    }

    /// Resolves this entry's security descriptor via its
    /// `$STANDARD_INFORMATION.security_id` and the volume's
    /// `SecurityDescriptorStore`.
    pub fn security_descriptor(&self) -> Result<Option<Vec<u8>>> {
        let Some(si) = self.standard_information() else {
            return Ok(None);
        };
        let Some(store) = self.fs.security() else {
            return Ok(None);
        };
        store.get(si.security_id)
    }

    pub fn size(&self) -> u64 {
        self.entry
            .find_unnamed_data()
            .map(|attr| attr.data_size())
            .unwrap_or(0)
    }

    /// The default `$DATA` stream, transparently decompressed (LZNT1) or
    /// WOF-redirected as needed.
    pub fn data_stream(&self) -> Result<DataStream> {
        self.named_data_stream(None)
    }

    pub fn alternate_data_streams(&self) -> Result<Vec<(String, DataStream)>> {
        let mut out = Vec::new();
        for attr in self.entry.alternate_data_attributes() {
            let name = attr.name().expect("alternate $DATA is always named").to_string();
            let stream = self.named_data_stream(Some(&name))?;
            out.push((name, stream));
        }
        Ok(out)
    }

    fn named_data_stream(&self, name: Option<&str>) -> Result<DataStream> {
        if name.is_none() && self.reparse_point_tag() == Some(IO_REPARSE_TAG_WOF) {
            return self.wof_data_stream();
        }

        let attr = self
            .entry
            .find_attribute(ATTR_TYPE_DATA, name)
            .ok_or_else(|| NtfsError::NotFound(format!("no $DATA stream named {:?}", name)))?;

        if attr.is_encrypted() {
            return Err(NtfsError::Unsupported(
                "encrypted $DATA streams are not supported".into(),
            ));
        }

        if attr.is_resident() {
            return Ok(DataStream::Resident(attr.resident_data()?.to_vec()));
        }

        let stream = self
            .fs
            .mft()
            .named_stream(&self.entry, ATTR_TYPE_DATA, name)
            .expect("non-resident $DATA attribute just matched above");

        if attr.is_compressed() && attr.compression_unit_exponent() > 0 {
            let cluster_size = self.fs.volume().geometry().cluster_size;
            let decompressor = self
                .fs
                .options()
                .lznt1_decompressor
                .clone()
                .ok_or_else(|| NtfsError::Unsupported("no LZNT1 decompressor configured".into()))?;
            let allocated_clusters = attr.allocated_size() / cluster_size as u64;
            let unit_size_clusters = 1u64 << attr.compression_unit_exponent();
            let plan =
                CompressionUnitPlan::build(&attr.merged_runs(), allocated_clusters, unit_size_clusters);
            let reader = self.fs.volume().reader().clone();
            return Ok(DataStream::Compressed(CompressedBlockStream::new(
                reader,
                plan,
                decompressor,
                cluster_size,
                attr.data_size(),
                attr.valid_data_size(),
                self.fs.options().compressed_unit_cache_capacity,
            )));
        }

        Ok(DataStream::Cluster(stream))
    }

    /// Builds the decorator stream for a WOF-tagged file: reads the whole
    /// `WofCompressedData` alternate stream and wraps it for lazy
    /// LZXPRESS-Huffman decompression.
    fn wof_data_stream(&self) -> Result<DataStream> {
        let reparse_attr = self
            .entry
            .reparse_point()
            .ok_or_else(|| NtfsError::invalid_record("WOF tag without $REPARSE_POINT attribute"))?;
        let body = reparse_attr.resident_data()?;
        if body.len() < 8 {
            return Err(NtfsError::invalid_record(
                "$REPARSE_POINT shorter than the common reparse header",
            ));
        }
        let config = wof::parse_wof_configuration(&body[8..])?;
        trace!("WOF stream compression format {:?}", config.compression_format);

        let compressed_attr = self
            .entry
            .find_alternate_data_attribute(WOF_COMPRESSED_DATA_STREAM_NAME)
            .ok_or_else(|| {
                NtfsError::invalid_record("WOF-tagged file has no WofCompressedData stream")
            })?;
        let compressed = if compressed_attr.is_resident() {
            compressed_attr.resident_data()?.to_vec()
        } else {
            self.fs
                .mft()
                .named_stream(&self.entry, ATTR_TYPE_DATA, Some(WOF_COMPRESSED_DATA_STREAM_NAME))
                .ok_or_else(|| NtfsError::invalid_record("WofCompressedData stream unavailable"))?
                .read_to_end()?
        };

        let decompressor = self
            .fs
            .options()
            .lzxpress_huffman_decompressor
            .clone()
            .ok_or_else(|| {
                NtfsError::Unsupported("no LZXPRESS-Huffman decompressor configured".into())
            })?;

        Ok(DataStream::Wof(WofStream::new(
            compressed,
            self.size(),
            decompressor,
        )))
    }

    fn directory_index(&self) -> Result<IndexEngine> {
        if !self.is_directory() {
            return Err(NtfsError::invalid_record(format!(
                "MFT entry {} is not a directory",
                self.entry.mft_index()
            )));
        }
        let root_attr = self
            .entry
            .index_root("$I30")
            .ok_or_else(|| NtfsError::invalid_record("directory has no $I30 index root"))?;
        let root_data = root_attr.resident_data()?.to_vec();
        let child_stream = self
            .fs
            .mft()
            .named_stream(&self.entry, ATTR_TYPE_INDEX_ALLOCATION, Some("$I30"));
        let bitmap = self
            .fs
            .mft()
            .named_stream(&self.entry, ATTR_TYPE_BITMAP, Some("$I30"))
            .map(|s| s.read_to_end())
            .transpose()?;
        IndexEngine::with_limits(
            &root_data,
            child_stream,
            bitmap,
            self.fs.volume().geometry().index_entry_size,
            self.fs.abort_flag(),
            self.fs.options().index_recursion_limit,
            self.fs.options().index_node_cache_capacity,
        )
    }

    /// Directory enumeration using the `$I30` `IndexEngine`. Entries whose
    /// target is unallocated or whose sequence number no longer matches
    /// are silently skipped.
    pub fn children(&self) -> Result<Vec<FileEntry>> {
        let index = self.directory_index()?;
        let mut children = Vec::new();
        index.walk(&mut |entry| {
            if let Some(child) = self.resolve_index_child(entry)? {
                children.push(child);
            }
            Ok(())
        })?;
        Ok(children)
    }

    pub fn child_by_name(&self, name: &str) -> Result<Option<FileEntry>> {
        let index = self.directory_index()?;
        match index.find(&Lookup::FileName(name))? {
            Some(entry) => self.resolve_index_child(&entry),
            None => Ok(None),
        }
    }

    fn resolve_index_child(&self, entry: &IndexEntry) -> Result<Option<FileEntry>> {
        let reference = entry.file_reference;
        let mft_entry = match self.fs.mft().entry(reference.mft_index()) {
            Ok(e) => e,
            Err(NtfsError::OutOfBounds { .. }) => return Ok(None),
            Err(other) => return Err(other),
        };
        if !mft_entry.is_allocated() || mft_entry.sequence_number() != reference.sequence_number() {
            return Ok(None);
        }
        Ok(Some(FileEntry::new(self.fs.clone(), mft_entry)?))
    }

    pub fn reparse_point_tag(&self) -> Option<u32> {
        let attr = self.entry.reparse_point()?;
        let data = attr.resident_data().ok()?;
        let bytes: [u8; 4] = data.get(0..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    /// Parses a `$REPARSE_POINT`'s substitute/print name pair for the two
    /// generic reparse types this engine understands (mount points,
    /// symlinks); WOF reparse points carry no such names.
    fn reparse_names(&self) -> Option<(String, String)> {
        let attr = self.entry.reparse_point()?;
        let data = attr.resident_data().ok()?;
        if data.len() < 8 {
            return None;
        }
        let tag = u32::from_le_bytes(data.get(0..4)?.try_into().ok()?);
        if tag != IO_REPARSE_TAG_MOUNT_POINT && tag != IO_REPARSE_TAG_SYMLINK {
            return None;
        }
        // Common header (8 bytes) then, for both mount points and
        // symlinks: substitute_name_offset/length, print_name_offset/length
        // (8 bytes); symlinks additionally carry a 4-byte flags field
        // before the path buffer.
        let fields_start = 8;
        let path_buffer_start = if tag == IO_REPARSE_TAG_SYMLINK { 8 + 8 + 4 } else { 8 + 8 };
        if data.len() < path_buffer_start {
            return None;
        }
        let sub_offset =
            u16::from_le_bytes(data.get(fields_start..fields_start + 2)?.try_into().ok()?) as usize;
        let sub_length =
            u16::from_le_bytes(data.get(fields_start + 2..fields_start + 4)?.try_into().ok()?) as usize;
        let print_offset =
            u16::from_le_bytes(data.get(fields_start + 4..fields_start + 6)?.try_into().ok()?) as usize;
        let print_length =
            u16::from_le_bytes(data.get(fields_start + 6..fields_start + 8)?.try_into().ok()?) as usize;

        let substitute = decode_reparse_path(data, path_buffer_start, sub_offset, sub_length)?;
        let print = decode_reparse_path(data, path_buffer_start, print_offset, print_length)?;
        Some((substitute, print))
    }

    pub fn reparse_substitute_name(&self) -> Option<String> {
        self.reparse_names().map(|(substitute, _)| substitute)
    }

    pub fn reparse_print_name(&self) -> Option<String> {
        self.reparse_names().map(|(_, print)| print)
    }

    /// `$OBJECT_ID`'s object GUID.
    /// Windows GUIDs are mixed-endian on disk; `Uuid::from_bytes_le`
    /// decodes them the way Windows itself displays them.
    pub fn object_id(&self) -> Option<Uuid> {
        let attr = self.entry.find_attribute(ATTR_TYPE_OBJECT_ID, None)?;
        let data = attr.resident_data().ok()?;
        let bytes: [u8; 16] = data.get(0..16)?.try_into().ok()?;
        Some(Uuid::from_bytes_le(bytes))
    }
}

fn decode_reparse_path(data: &[u8], path_buffer_start: usize, offset: usize, length: usize) -> Option<String> {
    let start = path_buffer_start.checked_add(offset)?;
    let end = start.checked_add(length)?;
    let bytes = data.get(start..end)?;
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    Some(String::from_utf16_lossy(&units))
}
