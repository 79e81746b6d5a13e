//! `MftEntry`: parses one MFT record — header, fixups, attribute
//! sequence, and classification of the canonical attributes.

use crate::attribute::{MftAttribute, ParsedAttribute};
use crate::constants::*;
use crate::error::{NtfsError, Result};
use crate::fixup;

/// A 64-bit MFT file reference: `(mft_index: 48, sequence_number: 16)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileReference(pub u64);

static_assertions::assert_eq_size!(FileReference, u64);

impl FileReference {
    pub fn new(mft_index: u64, sequence_number: u16) -> Self {
        Self((mft_index & 0x0000_FFFF_FFFF_FFFF) | ((sequence_number as u64) << 48))
    }

    pub fn mft_index(&self) -> u64 {
        self.0 & 0x0000_FFFF_FFFF_FFFF
    }

    pub fn sequence_number(&self) -> u16 {
        (self.0 >> 48) as u16
    }
}

impl std::fmt::Display for FileReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.mft_index(), self.sequence_number())
    }
}

/// One parsed MFT entry: header fields plus its attributes.
#[derive(Debug, Clone)]
pub struct MftEntry {
    mft_index: u64,
    sequence_number: u16,
    base_record_reference: FileReference,
    flags: u16,
    used_size: u32,
    total_size: u32,
    attributes: Vec<MftAttribute>,
}

impl MftEntry {
    /// Parses one MFT entry from a buffer already fixed up by
    /// `fixup::read_fixed_up`. `mft_index` is the slot this entry was
    /// read from (used to build its own file reference).
    pub fn parse(mft_index: u64, entry_size: u32, raw: &[u8]) -> Result<Self> {
        if raw.iter().all(|&b| b == 0) || &raw[0..4] != b"FILE" {
            return Ok(Self::empty(mft_index, entry_size));
        }

        let sequence_number = u16::from_le_bytes(raw[0x10..0x12].try_into().unwrap());
        let attributes_offset = u16::from_le_bytes(raw[0x14..0x16].try_into().unwrap()) as usize;
        let flags = u16::from_le_bytes(raw[0x16..0x18].try_into().unwrap());
        let used_size = u32::from_le_bytes(raw[0x18..0x1C].try_into().unwrap());
        let total_size = u32::from_le_bytes(raw[0x1C..0x20].try_into().unwrap());
        let base_record_reference = FileReference(u64::from_le_bytes(
            raw[0x20..0x28].try_into().unwrap(),
        ));

        if used_size > total_size || total_size > entry_size {
            return Err(NtfsError::invalid_record(format!(
                "entry {}: used_size {} > total_size {} > configured size {}",
                mft_index, used_size, total_size, entry_size
            )));
        }

        let mut attributes = Vec::new();
        let mut offset = attributes_offset;
        while offset < used_size as usize && offset < raw.len() {
            match MftAttribute::parse(&raw[offset..])? {
                ParsedAttribute::EndSentinel => break,
                ParsedAttribute::Attribute { attribute, size } => {
                    offset += size;
                    attributes.push(attribute);
                }
            }
        }

        Ok(Self {
            mft_index,
            sequence_number,
            base_record_reference,
            flags,
            used_size,
            total_size,
            attributes,
        })
    }

    fn empty(mft_index: u64, entry_size: u32) -> Self {
        Self {
            mft_index,
            sequence_number: 0,
            base_record_reference: FileReference(0),
            flags: 0,
            used_size: 0,
            total_size: entry_size,
            attributes: Vec::new(),
        }
    }

    /// Reads and fixes up the entry at `mft_index` directly through a
    /// cluster-addressable reader, for callers that do not go through
    /// `Mft`'s cache.
    pub fn read_at(
        read_bytes: impl FnOnce(u64, usize) -> Result<Vec<u8>>,
        mft_index: u64,
        byte_offset: u64,
        entry_size: u32,
        sector_size: u32,
    ) -> Result<Self> {
        let raw = read_bytes(byte_offset, entry_size as usize)?;
        let fixed = fixup::read_fixed_up(raw, byte_offset, sector_size)?;
        Self::parse(mft_index, entry_size, &fixed)
    }

    pub fn file_reference(&self) -> FileReference {
        FileReference::new(self.mft_index, self.sequence_number)
    }

    pub fn mft_index(&self) -> u64 {
        self.mft_index
    }

    pub fn sequence_number(&self) -> u16 {
        self.sequence_number
    }

    pub fn base_record_reference(&self) -> FileReference {
        self.base_record_reference
    }

    /// True if this entry is an extension record (its base reference
    /// points elsewhere); such entries are not surfaced as files.
    pub fn is_extension_record(&self) -> bool {
        self.base_record_reference.0 != 0
            && self.base_record_reference.mft_index() != self.mft_index
    }

    pub fn is_allocated(&self) -> bool {
        self.flags & MFT_RECORD_IN_USE != 0
    }

    pub fn is_directory(&self) -> bool {
        self.flags & MFT_RECORD_IS_DIRECTORY != 0
    }

    pub fn is_empty(&self) -> bool {
        self.used_size == 0
    }

    pub fn used_size(&self) -> u32 {
        self.used_size
    }

    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    pub fn attributes(&self) -> &[MftAttribute] {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Vec<MftAttribute> {
        &mut self.attributes
    }

    pub fn find_attribute(&self, type_code: u32, name: Option<&str>) -> Option<&MftAttribute> {
        self.attributes
            .iter()
            .find(|a| a.type_code() == type_code && a.name() == name)
    }

    pub fn find_attribute_mut(
        &mut self,
        type_code: u32,
        name: Option<&str>,
    ) -> Option<&mut MftAttribute> {
        self.attributes
            .iter_mut()
            .find(|a| a.type_code() == type_code && a.name() == name)
    }

    pub fn find_unnamed_data(&self) -> Option<&MftAttribute> {
        self.find_attribute(ATTR_TYPE_DATA, None)
    }

    pub fn find_alternate_data_attribute(&self, name: &str) -> Option<&MftAttribute> {
        self.find_attribute(ATTR_TYPE_DATA, Some(name))
    }

    pub fn alternate_data_attributes(&self) -> impl Iterator<Item = &MftAttribute> {
        self.attributes
            .iter()
            .filter(|a| a.type_code() == ATTR_TYPE_DATA && a.name().is_some())
    }

    pub fn standard_information(&self) -> Option<&MftAttribute> {
        self.find_attribute(ATTR_TYPE_STANDARD_INFORMATION, None)
    }

    /// Returns the preferred $FILE_NAME attribute: Win32&DOS, else Win32,
    /// else POSIX; a pure-DOS name is only used when nothing else exists.
    pub fn preferred_file_name(&self) -> Option<&MftAttribute> {
        let file_names: Vec<&MftAttribute> = self
            .attributes
            .iter()
            .filter(|a| a.type_code() == ATTR_TYPE_FILE_NAME)
            .collect();
        if file_names.is_empty() {
            return None;
        }
        let namespace_of = |a: &&MftAttribute| -> u8 {
            a.resident_data()
                .ok()
                .and_then(|d| d.get(0x41).copied())
                .unwrap_or(FILE_NAME_NAMESPACE_DOS)
        };
        for preferred in [
            FILE_NAME_NAMESPACE_WIN32_AND_DOS,
            FILE_NAME_NAMESPACE_WIN32,
            FILE_NAME_NAMESPACE_POSIX,
        ] {
            if let Some(found) = file_names.iter().find(|a| namespace_of(a) == preferred) {
                return Some(found);
            }
        }
        file_names.into_iter().next()
    }

    pub fn attribute_list(&self) -> Option<&MftAttribute> {
        self.find_attribute(ATTR_TYPE_ATTRIBUTE_LIST, None)
    }

    pub fn index_root(&self, name: &str) -> Option<&MftAttribute> {
        self.find_attribute(ATTR_TYPE_INDEX_ROOT, Some(name))
    }

    pub fn index_allocation(&self, name: &str) -> Option<&MftAttribute> {
        self.find_attribute(ATTR_TYPE_INDEX_ALLOCATION, Some(name))
    }

    pub fn index_bitmap(&self, name: &str) -> Option<&MftAttribute> {
        self.find_attribute(ATTR_TYPE_BITMAP, Some(name))
    }

    pub fn reparse_point(&self) -> Option<&MftAttribute> {
        self.find_attribute(ATTR_TYPE_REPARSE_POINT, None)
    }
}
