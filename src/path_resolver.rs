//! `PathHintCache`: resolves an MFT entry's canonical path by walking its
//! `$FILE_NAME` parent chain up to the root, memoizing every file
//! reference it passes through.

use std::collections::HashMap;
use std::sync::RwLock;

use log::{debug, trace};

use crate::constants::{ATTR_TYPE_FILE_NAME, FILE_NAME_NAMESPACE_DOS, MFT_RECORD_ROOT};
use crate::error::Result;
use crate::mft::Mft;
use crate::mft_entry::FileReference;

/// Sentinel path for an entry whose parent chain cannot be resolved,
/// either because a parent entry is missing/stale or because the chain
/// is longer than the configured recursion cap.
pub const ORPHAN_PATH: &str = "\\$Orphan";

/// Caches `file_reference -> canonical path` mappings, built lazily on
/// first lookup.
pub struct PathHintCache {
    cache: RwLock<HashMap<FileReference, String>>,
    recursion_limit: usize,
}

impl PathHintCache {
    pub fn new(recursion_limit: usize) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            recursion_limit,
        }
    }

    /// Resolves `reference` to its path, consulting and then populating
    /// the cache. Root (MFT #5) always resolves to `\` without touching
    /// the MFT.
    pub fn path_hint_for(&self, mft: &Mft, reference: FileReference) -> Result<String> {
        self.resolve(mft, reference, 0)
    }

    fn resolve(&self, mft: &Mft, reference: FileReference, depth: usize) -> Result<String> {
        if reference.mft_index() == MFT_RECORD_ROOT {
            return Ok("\\".to_string());
        }
        if depth > self.recursion_limit {
            trace!(
                "path hint recursion cap ({}) reached at {}, treating as orphan",
                self.recursion_limit,
                reference
            );
            return Ok(ORPHAN_PATH.to_string());
        }
        if let Some(cached) = self.cache.read().expect("path hint cache poisoned").get(&reference) {
            return Ok(cached.clone());
        }

        let path = match self.resolve_uncached(mft, reference, depth) {
            Ok(path) => path,
            Err(_) => ORPHAN_PATH.to_string(),
        };

        self.cache
            .write()
            .expect("path hint cache poisoned")
            .insert(reference, path.clone());
        Ok(path)
    }

    fn resolve_uncached(&self, mft: &Mft, reference: FileReference, depth: usize) -> Result<String> {
        let entry = mft.entry_by_reference(reference)?;

        let Some(attr) = entry.attributes().iter().find(|a| {
            a.type_code() == ATTR_TYPE_FILE_NAME
                && a.resident_data()
                    .ok()
                    .and_then(|d| d.get(0x41).copied())
                    .is_some_and(|ns| ns != FILE_NAME_NAMESPACE_DOS)
        }) else {
            debug!("entry {} has no non-DOS $FILE_NAME, treating as orphan", reference);
            return Ok(ORPHAN_PATH.to_string());
        };

        let data = attr.resident_data()?;
        let (parent_reference, name) = parse_file_name(data)?;

        let parent_path = self.resolve(mft, parent_reference, depth + 1)?;
        Ok(if parent_path == "\\" {
            format!("\\{}", name)
        } else {
            format!("{}\\{}", parent_path, name)
        })
    }

    pub fn clear(&self) {
        self.cache.write().expect("path hint cache poisoned").clear();
    }
}

/// Parses a `$FILE_NAME` attribute's resident body into its parent
/// reference and display name.
fn parse_file_name(data: &[u8]) -> Result<(FileReference, String)> {
    if data.len() < 0x42 {
        return Err(crate::error::NtfsError::invalid_record(
            "$FILE_NAME attribute shorter than its fixed header",
        ));
    }
    let parent_reference = FileReference(u64::from_le_bytes(data[0..8].try_into().unwrap()));
    let name_length = data[0x40] as usize;
    let start = 0x42;
    let end = start + name_length * 2;
    if end > data.len() {
        return Err(crate::error::NtfsError::invalid_record(
            "$FILE_NAME name extends beyond attribute data",
        ));
    }
    let units: Vec<u16> = data[start..end]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    Ok((parent_reference, String::from_utf16_lossy(&units)))
}
