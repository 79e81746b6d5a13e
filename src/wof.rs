//! WOF (Windows Overlay Filesystem) reparse-point decoding.
//!
//! A WOF-compressed file keeps a sparse, zero-length-looking default
//! $DATA and stashes its real payload, LZXPRESS-Huffman compressed, in
//! an alternate stream named `"WofCompressedData"`. This module parses
//! the $REPARSE_POINT configuration record and provides a stream
//! decorator that decompresses that alternate stream on first read.

use std::sync::OnceLock;

use crate::compressed_stream::Decompressor;
use crate::error::{NtfsError, Result};

/// WOF's declared compression algorithm for a file (distinct from the
/// unrelated `ATTR_DATA_FLAG_COMPRESSION_MASK`/LZNT1 scheme).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WofCompressionFormat {
    Xpress4K,
    Lzx,
    Xpress8K,
    Xpress16K,
}

impl WofCompressionFormat {
    fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::Xpress4K),
            1 => Ok(Self::Lzx),
            2 => Ok(Self::Xpress8K),
            3 => Ok(Self::Xpress16K),
            other => Err(NtfsError::Unsupported(format!(
                "WOF compression format {}",
                other
            ))),
        }
    }
}

/// The parsed `$REPARSE_POINT` payload for an `IO_REPARSE_TAG_WOF` entry:
/// a `WOF_EXTERNAL_INFO` header followed by a `FILE_PROVIDER_EXTERNAL_INFO`
/// block. `uncompressed_size` is not carried in the reparse record itself;
/// it is the WOF-compressed file's default $DATA `data_size`.
#[derive(Debug, Clone, Copy)]
pub struct WofConfiguration {
    pub compression_format: WofCompressionFormat,
}

/// Parses the WOF-specific body of a `$REPARSE_POINT` attribute, i.e. the
/// bytes following the common 8-byte reparse header (tag, data_length,
/// reserved).
pub fn parse_wof_configuration(body: &[u8]) -> Result<WofConfiguration> {
    // WOF_EXTERNAL_INFO: version(4) provider(4); FILE_PROVIDER_EXTERNAL_INFO:
    // version(4) compression_format(4). 16 bytes total.
    if body.len() < 16 {
        return Err(NtfsError::invalid_record(
            "WOF reparse configuration shorter than 16 bytes",
        ));
    }
    let compression_format =
        WofCompressionFormat::from_u32(u32::from_le_bytes(body[12..16].try_into().unwrap()))?;
    Ok(WofConfiguration { compression_format })
}

/// A `FileEntry::data_stream()` decorator for WOF-compressed files: reads
/// the whole `WofCompressedData` alternate stream once, decompresses it
/// through the caller-supplied LZXPRESS-Huffman `Decompressor`, and serves
/// reads out of the resulting buffer.
pub struct WofStream {
    compressed: Vec<u8>,
    uncompressed_size: u64,
    decompressor: std::sync::Arc<dyn Decompressor>,
    decoded: OnceLock<Vec<u8>>,
}

impl WofStream {
    pub fn new(
        compressed: Vec<u8>,
        uncompressed_size: u64,
        decompressor: std::sync::Arc<dyn Decompressor>,
    ) -> Self {
        Self {
            compressed,
            uncompressed_size,
            decompressor,
            decoded: OnceLock::new(),
        }
    }

    pub fn size(&self) -> u64 {
        self.uncompressed_size
    }

    fn materialize(&self) -> Result<&Vec<u8>> {
        if let Some(buf) = self.decoded.get() {
            return Ok(buf);
        }
        let mut dst = vec![0u8; self.uncompressed_size as usize];
        let written = self.decompressor.decompress(&self.compressed, &mut dst)?;
        if written < dst.len() {
            dst[written..].fill(0);
        }
        // Another thread may have raced us; OnceLock keeps only the first.
        let _ = self.decoded.set(dst);
        Ok(self.decoded.get().expect("just set"))
    }

    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let buf = self.materialize()?;
        let start = (offset.min(buf.len() as u64)) as usize;
        let end = (start + len).min(buf.len());
        Ok(buf[start..end].to_vec())
    }

    pub fn read_to_end(&self) -> Result<Vec<u8>> {
        self.read_at(0, self.uncompressed_size as usize)
    }
}
