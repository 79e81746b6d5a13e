//! `AttributeList`: decodes an $ATTRIBUTE_LIST attribute into descriptor
//! entries pointing at extension MFT entries.

use crate::error::{NtfsError, Result};
use crate::mft_entry::FileReference;

/// One externalised attribute descriptor.
#[derive(Debug, Clone)]
pub struct AttributeListEntry {
    pub type_code: u32,
    pub name: Option<String>,
    pub first_vcn: u64,
    pub base_file_reference: FileReference,
    pub attribute_identifier: u16,
}

/// Decodes the bytes of an $ATTRIBUTE_LIST attribute (already gathered
/// from resident storage or a `ClusterStream`) into its entries, sorted
/// by `(type, name, first_vcn)` the way they are stored on disk.
pub fn decode(data: &[u8]) -> Result<Vec<AttributeListEntry>> {
    let mut entries = Vec::new();
    let mut offset = 0usize;

    while offset + 26 <= data.len() {
        let type_code = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap());
        let record_length = u16::from_le_bytes(data[offset + 4..offset + 6].try_into().unwrap());
        if record_length == 0 {
            break;
        }
        let name_length = data[offset + 6];
        let name_offset = data[offset + 7];
        let first_vcn = u64::from_le_bytes(data[offset + 8..offset + 16].try_into().unwrap());
        let base_file_reference =
            FileReference(u64::from_le_bytes(data[offset + 16..offset + 24].try_into().unwrap()));
        let attribute_identifier =
            u16::from_le_bytes(data[offset + 24..offset + 26].try_into().unwrap());

        let name = if name_length > 0 {
            let name_start = offset + name_offset as usize;
            let name_end = name_start + name_length as usize * 2;
            if name_end > data.len() || name_end > offset + record_length as usize {
                return Err(NtfsError::invalid_record(
                    "attribute list entry name extends beyond record",
                ));
            }
            let units: Vec<u16> = data[name_start..name_end]
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            Some(String::from_utf16_lossy(&units))
        } else {
            None
        };

        entries.push(AttributeListEntry {
            type_code,
            name,
            first_vcn,
            base_file_reference,
            attribute_identifier,
        });

        let next = offset
            .checked_add(record_length as usize)
            .ok_or_else(|| NtfsError::invalid_record("attribute list record length overflow"))?;
        if next <= offset {
            return Err(NtfsError::invalid_record(
                "attribute list record length did not advance",
            ));
        }
        offset = next;
    }

    entries.sort_by(|a, b| {
        (a.type_code, &a.name, a.first_vcn).cmp(&(b.type_code, &b.name, b.first_vcn))
    });
    Ok(entries)
}
