//! `FileSystem`: the top-level facade over an open NTFS volume. Bootstraps
//! the `Mft`, the optional `$Bitmap` diagnostic, the
//! `SecurityDescriptorStore`, and the path-hint cache in one open call.

use std::sync::Arc;

use log::{debug, warn};

use crate::block::{AbortFlag, BlockReader, CancellableReader};
use crate::compressed_stream::Decompressor;
use crate::constants::*;
use crate::error::{NtfsError, Result};
use crate::file_entry::FileEntry;
use crate::index::IndexEngine;
use crate::mft::Mft;
use crate::mft_entry::{FileReference, MftEntry};
use crate::path_resolver::PathHintCache;
use crate::security::SecurityDescriptorStore;
use crate::volume::Volume;

/// Construction-time tuning knobs: every field bounds a cache or a
/// recursion depth, plus two injection points for the decompression
/// algorithms this crate treats as external collaborators.
#[derive(Clone)]
pub struct FileSystemOptions {
    pub mft_cache_capacity: usize,
    pub index_node_cache_capacity: usize,
    pub compressed_unit_cache_capacity: usize,
    pub path_hint_recursion_limit: usize,
    pub index_recursion_limit: u32,
    /// Decodes LZNT1-compressed `$DATA` compression units.
    pub lznt1_decompressor: Option<Arc<dyn Decompressor>>,
    /// Decodes LZXPRESS-Huffman WOF payloads.
    pub lzxpress_huffman_decompressor: Option<Arc<dyn Decompressor>>,
}

impl Default for FileSystemOptions {
    fn default() -> Self {
        Self {
            mft_cache_capacity: 64,
            index_node_cache_capacity: 64,
            compressed_unit_cache_capacity: 4,
            path_hint_recursion_limit: 256,
            index_recursion_limit: crate::index::DEFAULT_INDEX_RECURSION_DEPTH,
            lznt1_decompressor: None,
            lzxpress_huffman_decompressor: None,
        }
    }
}

struct FileSystemInner {
    volume: Arc<Volume>,
    mft: Mft,
    security: Option<SecurityDescriptorStore>,
    path_hints: PathHintCache,
    abort: AbortFlag,
    options: FileSystemOptions,
}

/// Top-level, cheaply-`Clone`able handle onto an open NTFS volume. All
/// clones share one `Mft`, one cache set, and one abort flag.
#[derive(Clone)]
pub struct FileSystem(Arc<FileSystemInner>);

impl FileSystem {
    pub fn open(reader: Arc<dyn BlockReader>) -> Result<Self> {
        Self::open_with_options(reader, FileSystemOptions::default())
    }

    /// Construction sequence: volume, MFT bootstrap,
    /// optional `$Bitmap` diagnostic, optional `$Secure` store, empty
    /// path-hint cache.
    pub fn open_with_options(reader: Arc<dyn BlockReader>, options: FileSystemOptions) -> Result<Self> {
        let abort = AbortFlag::new();
        let cancellable: Arc<dyn BlockReader> =
            Arc::new(CancellableReader::new(reader, abort.clone()));
        let volume = Arc::new(Volume::open(cancellable)?);
        let mft = Mft::bootstrap(volume.clone(), options.mft_cache_capacity)?;

        Self::diagnose_bitmap(&mft);

        let security = match mft.entry(MFT_RECORD_SECURE) {
            Ok(secure_entry) if secure_entry.is_allocated() => {
                match Self::build_security_store(&mft, &secure_entry, &volume, &options, abort.clone()) {
                    Ok(store) => Some(store),
                    Err(err) => {
                        warn!("failed to build $Secure security-descriptor store: {}", err);
                        None
                    }
                }
            }
            Ok(_) => None,
            Err(err) => {
                warn!("MFT entry #{} ($Secure) unreadable: {}", MFT_RECORD_SECURE, err);
                None
            }
        };

        let path_hints = PathHintCache::new(options.path_hint_recursion_limit);

        Ok(Self(Arc::new(FileSystemInner {
            volume,
            mft,
            security,
            path_hints,
            abort,
            options,
        })))
    }

    /// Parses `$Bitmap` (MFT entry #6) purely as a diagnostic: confirms the
    /// stream is readable and logs its size, rather than inventing a
    /// cluster-allocation API nothing else in this crate consumes.
    fn diagnose_bitmap(mft: &Mft) {
        let Ok(bitmap_entry) = mft.entry(MFT_RECORD_BITMAP) else {
            return;
        };
        if !bitmap_entry.is_allocated() {
            return;
        }
        let Some(stream) = mft.unnamed_data_stream(&bitmap_entry) else {
            return;
        };
        match stream.read_to_end() {
            Ok(bits) => debug!("parsed $Bitmap diagnostic: {} bytes", bits.len()),
            Err(err) => warn!("failed to read $Bitmap diagnostic stream: {}", err),
        }
    }

    fn build_security_store(
        mft: &Mft,
        secure_entry: &MftEntry,
        volume: &Arc<Volume>,
        options: &FileSystemOptions,
        abort: AbortFlag,
    ) -> Result<SecurityDescriptorStore> {
        let sii_root = secure_entry
            .index_root("$SII")
            .ok_or_else(|| NtfsError::invalid_record("$Secure has no $SII index root"))?
            .resident_data()?
            .to_vec();
        let sii_child_stream = mft.named_stream(secure_entry, ATTR_TYPE_INDEX_ALLOCATION, Some("$SII"));
        let sii_bitmap = mft
            .named_stream(secure_entry, ATTR_TYPE_BITMAP, Some("$SII"))
            .map(|s| s.read_to_end())
            .transpose()?;

        let sii = IndexEngine::with_limits(
            &sii_root,
            sii_child_stream,
            sii_bitmap,
            volume.geometry().index_entry_size,
            abort,
            options.index_recursion_limit,
            options.index_node_cache_capacity,
        )?;

        let sds_stream = mft
            .named_stream(secure_entry, ATTR_TYPE_DATA, Some("$SDS"))
            .ok_or_else(|| NtfsError::invalid_record("$Secure has no $SDS data stream"))?;

        Ok(SecurityDescriptorStore::new(sii, sds_stream))
    }

    pub fn root(&self) -> Result<FileEntry> {
        self.file_entry_by_mft_index(MFT_RECORD_ROOT)
    }

    pub fn file_entry_by_mft_index(&self, index: u64) -> Result<FileEntry> {
        let entry = self.0.mft.entry(index)?;
        FileEntry::new(self.clone(), entry)
    }

    /// Resolves a `FileReference`, validating its sequence number against
    /// the on-disk entry. A stale reference surfaces as `NotFound` at this
    /// facade; `Mft::entry_by_reference` itself still
    /// reports the more specific `StaleReference` to lower-level callers.
    pub fn file_entry_by_reference(&self, reference: FileReference) -> Result<FileEntry> {
        let entry = match self.0.mft.entry_by_reference(reference) {
            Ok(entry) => entry,
            Err(NtfsError::StaleReference { .. }) => {
                return Err(NtfsError::NotFound(format!(
                    "file reference {} is stale",
                    reference
                )))
            }
            Err(other) => return Err(other),
        };
        FileEntry::new(self.clone(), entry)
    }

    /// Resolves a `\`-separated path from the root, walking `child_by_name`
    /// one segment at a time.
    pub fn file_entry_by_utf16_path(&self, path: &str) -> Result<FileEntry> {
        let mut current = self.root()?;
        for segment in path.split('\\').filter(|s| !s.is_empty()) {
            current = current
                .child_by_name(segment)?
                .ok_or_else(|| NtfsError::NotFound(format!("path component {:?} not found", segment)))?;
        }
        Ok(current)
    }

    pub fn path_hint_for(&self, reference: FileReference) -> Result<String> {
        self.0.path_hints.path_hint_for(&self.0.mft, reference)
    }

    pub fn abort_flag(&self) -> AbortFlag {
        self.0.abort.clone()
    }

    /// Requests cancellation; in-flight and future reads through this
    /// `FileSystem` return `Cancelled` promptly.
    pub fn abort(&self) {
        self.0.abort.set();
    }

    pub(crate) fn mft(&self) -> &Mft {
        &self.0.mft
    }

    pub(crate) fn volume(&self) -> &Arc<Volume> {
        &self.0.volume
    }

    pub(crate) fn security(&self) -> Option<&SecurityDescriptorStore> {
        self.0.security.as_ref()
    }

    pub(crate) fn options(&self) -> &FileSystemOptions {
        &self.0.options
    }
}
