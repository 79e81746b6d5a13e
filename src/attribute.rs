//! `MftAttribute`: parses one attribute header + body inside an MFT entry.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::constants::*;
use crate::data_runs::DataRunList;
use crate::error::{NtfsError, Result};

/// The two attribute body shapes.
#[derive(Debug, Clone)]
pub enum AttributeBody {
    Resident { data: Vec<u8> },
    NonResident {
        first_vcn: u64,
        last_vcn: u64,
        compression_unit_exponent: u8,
        allocated_size: u64,
        data_size: u64,
        valid_data_size: u64,
        runs: DataRunList,
    },
}

/// One parsed attribute record. A logical attribute whose data spans more
/// than one physical record (via $ATTRIBUTE_LIST) is represented as a
/// `chain` of these, head-first, sorted by VCN.
#[derive(Debug, Clone)]
pub struct MftAttribute {
    type_code: u32,
    name: Option<String>,
    data_flags: u16,
    identifier: u16,
    body: AttributeBody,
    chain: Vec<MftAttribute>,
}

/// Result of parsing one attribute slot: either a parsed attribute and
/// the byte length it occupied, or the end-of-attributes sentinel.
pub enum ParsedAttribute {
    Attribute { attribute: MftAttribute, size: usize },
    EndSentinel,
}

impl MftAttribute {
    /// Parses one attribute at `data[0..]`. `data` should be the tail of
    /// the containing MFT entry's buffer starting at the attribute's
    /// offset; the caller is responsible for stopping at `used_size`.
    pub fn parse(data: &[u8]) -> Result<ParsedAttribute> {
        if data.len() < 4 {
            return Err(NtfsError::invalid_record("attribute header truncated"));
        }
        let mut cursor = Cursor::new(data);
        let type_code = cursor.read_u32::<LittleEndian>()?;
        if type_code == ATTR_TYPE_END {
            return Ok(ParsedAttribute::EndSentinel);
        }
        if data.len() < 16 {
            return Err(NtfsError::invalid_record("attribute header truncated"));
        }

        let size = cursor.read_u32::<LittleEndian>()? as usize;
        if size < 16 || size % 8 != 0 || size > data.len() {
            return Err(NtfsError::invalid_record(format!(
                "attribute size {} invalid for buffer of {} bytes",
                size,
                data.len()
            )));
        }
        let non_resident_flag = data[8];
        let name_size = data[9];
        let name_offset = cursor_u16_at(data, 10)?;
        let data_flags = cursor_u16_at(data, 12)?;
        let identifier = cursor_u16_at(data, 14)?;

        let name = if name_size > 0 {
            let start = name_offset as usize;
            let end = start + name_size as usize * 2;
            if end > size {
                return Err(NtfsError::invalid_record("attribute name extends beyond attribute"));
            }
            Some(decode_utf16le(&data[start..end]))
        } else {
            None
        };

        let body = if non_resident_flag == 0 {
            parse_resident_body(data, size)?
        } else {
            parse_non_resident_body(data, size)?
        };

        Ok(ParsedAttribute::Attribute {
            attribute: MftAttribute {
                type_code,
                name,
                data_flags,
                identifier,
                body,
                chain: Vec::new(),
            },
            size,
        })
    }

    pub fn type_code(&self) -> u32 {
        self.type_code
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn data_flags(&self) -> u16 {
        self.data_flags
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.body, AttributeBody::Resident { .. })
    }

    pub fn is_compressed(&self) -> bool {
        self.data_flags & ATTR_DATA_FLAG_COMPRESSION_MASK != 0
    }

    pub fn is_sparse(&self) -> bool {
        self.data_flags & ATTR_DATA_FLAG_SPARSE != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.data_flags & ATTR_DATA_FLAG_ENCRYPTED != 0
    }

    pub fn body(&self) -> &AttributeBody {
        &self.body
    }

    pub fn resident_data(&self) -> Result<&[u8]> {
        match &self.body {
            AttributeBody::Resident { data } => Ok(data),
            AttributeBody::NonResident { .. } => {
                Err(NtfsError::invalid_record("attribute is non-resident"))
            }
        }
    }

    pub fn data_size(&self) -> u64 {
        match &self.body {
            AttributeBody::Resident { data } => data.len() as u64,
            AttributeBody::NonResident { data_size, .. } => *data_size,
        }
    }

    pub fn valid_data_size(&self) -> u64 {
        match &self.body {
            AttributeBody::Resident { data } => data.len() as u64,
            AttributeBody::NonResident {
                valid_data_size, ..
            } => *valid_data_size,
        }
    }

    pub fn allocated_size(&self) -> u64 {
        match &self.body {
            AttributeBody::Resident { data } => data.len() as u64,
            AttributeBody::NonResident { allocated_size, .. } => *allocated_size,
        }
    }

    pub fn compression_unit_exponent(&self) -> u8 {
        match &self.body {
            AttributeBody::NonResident {
                compression_unit_exponent,
                ..
            } => *compression_unit_exponent,
            AttributeBody::Resident { .. } => 0,
        }
    }

    pub fn vcn_range(&self) -> Option<(u64, u64)> {
        match &self.body {
            AttributeBody::NonResident {
                first_vcn,
                last_vcn,
                ..
            } => Some((*first_vcn, *last_vcn)),
            AttributeBody::Resident { .. } => None,
        }
    }

    /// Merged data-run list across the whole chain, ordered by VCN. Only
    /// meaningful for non-resident attributes.
    pub fn merged_runs(&self) -> DataRunList {
        let mut merged = match &self.body {
            AttributeBody::NonResident { runs, .. } => runs.clone(),
            AttributeBody::Resident { .. } => DataRunList::default(),
        };
        for link in &self.chain {
            if let AttributeBody::NonResident { runs, .. } = &link.body {
                merged.merge(runs.clone());
            }
        }
        merged
    }

    /// Inserts `other` into this attribute's chain of continuations,
    /// keeping the chain sorted by first VCN.
    /// `other` must share this attribute's `(type, name)` pair.
    pub fn append_to_chain(&mut self, other: MftAttribute) -> Result<()> {
        if other.type_code != self.type_code || other.name != self.name {
            return Err(NtfsError::invalid_record(
                "attribute chain continuation has mismatched (type, name)",
            ));
        }
        self.chain.push(other);
        self.chain.sort_by_key(|a| a.vcn_range().map(|(first, _)| first).unwrap_or(0));
        Ok(())
    }

    pub fn chain(&self) -> &[MftAttribute] {
        &self.chain
    }
}

fn cursor_u16_at(data: &[u8], offset: usize) -> Result<u16> {
    data.get(offset..offset + 2)
        .map(|s| u16::from_le_bytes([s[0], s[1]]))
        .ok_or_else(|| NtfsError::invalid_record("attribute header truncated"))
}

fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

fn parse_resident_body(data: &[u8], size: usize) -> Result<AttributeBody> {
    // Resident-specific fields start at offset 16: content_size (u32),
    // content_offset (u16), indexed_flag (u8), padding (u8).
    if size < 24 {
        return Err(NtfsError::invalid_record("resident attribute header truncated"));
    }
    let content_size = u32::from_le_bytes(data[16..20].try_into().unwrap()) as usize;
    let content_offset = u16::from_le_bytes(data[20..22].try_into().unwrap()) as usize;
    let end = content_offset
        .checked_add(content_size)
        .ok_or_else(|| NtfsError::invalid_record("resident content size overflow"))?;
    if end > size {
        return Err(NtfsError::invalid_record(format!(
            "resident content [{}, {}) exceeds attribute size {}",
            content_offset, end, size
        )));
    }
    Ok(AttributeBody::Resident {
        data: data[content_offset..end].to_vec(),
    })
}

fn parse_non_resident_body(data: &[u8], size: usize) -> Result<AttributeBody> {
    // Non-resident fields start at offset 16:
    // first_vcn(u64) last_vcn(u64) data_runs_offset(u16) compression_unit(u8)
    // reserved(4) allocated_size(u64) data_size(u64) valid_data_size(u64)
    // [+ total_allocated_size(u64) if compressed]
    if size < 64 {
        return Err(NtfsError::invalid_record(
            "non-resident attribute header truncated",
        ));
    }
    let first_vcn = u64::from_le_bytes(data[16..24].try_into().unwrap());
    let last_vcn = u64::from_le_bytes(data[24..32].try_into().unwrap());
    let data_runs_offset = u16::from_le_bytes(data[32..34].try_into().unwrap()) as usize;
    let compression_unit_exponent = data[34];
    let allocated_size = u64::from_le_bytes(data[40..48].try_into().unwrap());
    let data_size = u64::from_le_bytes(data[48..56].try_into().unwrap());
    let valid_data_size = u64::from_le_bytes(data[56..64].try_into().unwrap());

    if first_vcn > last_vcn && !(first_vcn == 0 && last_vcn == 0 && allocated_size == 0) {
        return Err(NtfsError::invalid_record(format!(
            "first_vcn {} > last_vcn {}",
            first_vcn, last_vcn
        )));
    }
    if valid_data_size > data_size {
        return Err(NtfsError::invalid_record(
            "valid_data_size exceeds data_size",
        ));
    }

    if data_runs_offset > size {
        return Err(NtfsError::invalid_record("data runs offset beyond attribute"));
    }
    let runs = DataRunList::decode(&data[data_runs_offset..size], first_vcn)?;

    Ok(AttributeBody::NonResident {
        first_vcn,
        last_vcn,
        compression_unit_exponent,
        allocated_size,
        data_size,
        valid_data_size,
        runs,
    })
}
