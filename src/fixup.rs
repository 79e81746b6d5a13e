//! `FixupReader`: reads multi-sector transfer records (MFT entries, index
//! nodes) and applies the per-sector update-sequence fixup.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{NtfsError, Result};

/// Offsets of the fixup-array descriptor, common to "FILE" and "INDX"
/// records: a u16 offset to the array followed by a u16 entry count.
const FIXUP_OFFSET_FIELD: usize = 0x04;
const FIXUP_COUNT_FIELD: usize = 0x06;

/// Reads a record of `record_size` bytes at `offset` via `reader`,
/// verifies its signature and per-sector update sequence, and returns the
/// record with the original sector-tail bytes restored.
///
/// A fully-zeroed record (no signature, every byte zero) is tolerated and
/// returned unfixed-up; callers treat it as an empty/unallocated entry.
pub fn read_fixed_up(
    raw: Vec<u8>,
    offset: u64,
    sector_size: u32,
) -> Result<Vec<u8>> {
    if raw.iter().all(|&b| b == 0) {
        return Ok(raw);
    }

    let signature = &raw[0..4];
    if signature != b"FILE" && signature != b"INDX" {
        return Err(NtfsError::InvalidSignature {
            offset,
            expected: b"FILE\" or \"INDX",
            found: signature.to_vec(),
        });
    }

    let mut cursor = Cursor::new(&raw[..]);
    cursor.set_position(FIXUP_OFFSET_FIELD as u64);
    let fixup_array_offset = cursor.read_u16::<LittleEndian>()? as usize;
    cursor.set_position(FIXUP_COUNT_FIELD as u64);
    let fixup_count = cursor.read_u16::<LittleEndian>()? as usize;

    let sector_size = sector_size as usize;
    if sector_size == 0 {
        return Err(NtfsError::invalid_record("sector_size is zero"));
    }
    let expected_count = raw.len() / sector_size + 1;
    if fixup_count != expected_count {
        return Err(NtfsError::invalid_record(format!(
            "fixup count {} does not match expected {} for a {}-byte record",
            fixup_count,
            expected_count,
            raw.len()
        )));
    }

    let fixup_array_end = fixup_array_offset + fixup_count * 2;
    if fixup_array_end > raw.len() {
        return Err(NtfsError::invalid_record(
            "fixup array extends beyond record",
        ));
    }

    let update_sequence_number = u16::from_le_bytes([
        raw[fixup_array_offset],
        raw[fixup_array_offset + 1],
    ]);

    let mut fixed = raw.clone();
    let sector_count = raw.len() / sector_size;
    for sector_index in 0..sector_count {
        let tail = sector_index * sector_size + sector_size - 2;
        let stored = u16::from_le_bytes([raw[tail], raw[tail + 1]]);
        if stored != update_sequence_number {
            return Err(NtfsError::TornWrite {
                offset,
                sector_index,
            });
        }

        let fixup_entry_offset = fixup_array_offset + 2 + sector_index * 2;
        let original = [raw[fixup_entry_offset], raw[fixup_entry_offset + 1]];
        fixed[tail] = original[0];
        fixed[tail + 1] = original[1];
    }

    Ok(fixed)
}
