//! A read-only access engine for the NTFS on-disk file system: parses a
//! volume's boot sector, Master File Table, attribute model, compressed
//! data streams, B+tree indices, and `$Secure` security-descriptor store
//! well enough to enumerate directories and read file contents, without
//! requiring write or mount support from the host OS.
//!
//! Block I/O and the LZNT1 / LZXPRESS-Huffman decompression algorithms
//! are treated as external collaborators: callers supply a [`BlockReader`]
//! and, if they need compressed or WOF-redirected data, a [`Decompressor`]
//! for each scheme they care about.

pub mod attribute;
pub mod attribute_list;
pub mod block;
pub mod cluster_stream;
pub mod compressed_stream;
pub mod compression;
pub mod constants;
pub mod data_runs;
pub mod error;
pub mod file_entry;
pub mod filesystem;
pub mod fixup;
pub mod index;
pub mod mft;
pub mod mft_entry;
pub mod path_resolver;
pub mod security;
pub mod volume;
pub mod wof;

#[cfg(test)]
mod testutil;

pub use block::{AbortFlag, BlockReader, CancellableReader, FileBlockReader, InMemoryBlockReader};
pub use compressed_stream::Decompressor;
pub use error::{NtfsError, Result};
pub use file_entry::{DataStream, FileEntry};
pub use filesystem::{FileSystem, FileSystemOptions};
pub use mft_entry::FileReference;
