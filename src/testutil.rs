//! Test-only byte-buffer builders shared across unit and integration
//! tests: a fixup-protected MFT record writer, attribute encoders, and a
//! minimal bootstrap-able synthetic `$MFT` image.

#![cfg(test)]

use std::sync::Arc;

use crate::block::{BlockReader, InMemoryBlockReader};
use crate::constants::*;
use crate::mft::Mft;
use crate::volume::Volume;

/// Builds a resident attribute record matching `parse_resident_body`'s
/// layout: generic header (16 bytes) then content_size(4)
/// content_offset(2) indexed(1) pad(1), then the content itself at
/// `content_offset`.
pub fn resident_attribute(type_code: u32, name: Option<&str>, content: &[u8]) -> Vec<u8> {
    let name_units: Vec<u16> = name.map(|n| n.encode_utf16().collect()).unwrap_or_default();
    let header_len = 24usize;
    let name_len_bytes = name_units.len() * 2;
    let content_offset = header_len + name_len_bytes;
    let total = (content_offset + content.len()).next_multiple_of(8);
    let mut out = vec![0u8; total];
    out[0..4].copy_from_slice(&type_code.to_le_bytes());
    out[4..8].copy_from_slice(&(total as u32).to_le_bytes());
    out[8] = 0; // resident
    out[9] = name_units.len() as u8;
    out[10..12].copy_from_slice(&(header_len as u16).to_le_bytes());
    out[16..20].copy_from_slice(&(content.len() as u32).to_le_bytes());
    out[20..22].copy_from_slice(&(content_offset as u16).to_le_bytes());
    for (i, unit) in name_units.iter().enumerate() {
        out[header_len + i * 2..header_len + i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
    out[content_offset..content_offset + content.len()].copy_from_slice(content);
    out
}

/// Builds a non-resident attribute record matching
/// `parse_non_resident_body`'s layout (header fields at offsets 16..64,
/// data runs appended right after, at offset 64).
pub fn non_resident_attribute(
    type_code: u32,
    name: Option<&str>,
    runs: &[u8],
    allocated_size: u64,
    data_size: u64,
    valid_data_size: u64,
    data_flags: u16,
) -> Vec<u8> {
    let name_units: Vec<u16> = name.map(|n| n.encode_utf16().collect()).unwrap_or_default();
    let header_len = 64usize;
    let name_len_bytes = name_units.len() * 2;
    // Names on non-resident attributes sit between the 16-byte generic
    // header and the type-specific fields in real NTFS; this engine only
    // ever reads `name()`, so placing it right after the fixed header and
    // before the run list (both at fixed offsets) is sufficient here.
    let runs_offset = header_len + name_len_bytes;
    let total = (runs_offset + runs.len()).next_multiple_of(8);
    let mut out = vec![0u8; total];
    out[0..4].copy_from_slice(&type_code.to_le_bytes());
    out[4..8].copy_from_slice(&(total as u32).to_le_bytes());
    out[8] = 1; // non-resident
    out[9] = name_units.len() as u8;
    out[10..12].copy_from_slice(&(header_len as u16).to_le_bytes());
    out[12..14].copy_from_slice(&data_flags.to_le_bytes());
    out[32..34].copy_from_slice(&(runs_offset as u16).to_le_bytes()); // data_runs_offset
    out[40..48].copy_from_slice(&allocated_size.to_le_bytes());
    out[48..56].copy_from_slice(&data_size.to_le_bytes());
    out[56..64].copy_from_slice(&valid_data_size.to_le_bytes());
    for (i, unit) in name_units.iter().enumerate() {
        out[header_len + i * 2..header_len + i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
    out[runs_offset..runs_offset + runs.len()].copy_from_slice(runs);
    out
}

/// Encodes a single-run data-run-list byte sequence: `lcn`, `length`
/// clusters, relative to the previous run's LCN of zero.
pub fn encode_single_run(lcn: u64, length: u64) -> Vec<u8> {
    fn packed_le(value: u64) -> Vec<u8> {
        let bytes = value.to_le_bytes();
        let mut len = 8;
        while len > 1 && bytes[len - 1] == 0 {
            len -= 1;
        }
        bytes[..len].to_vec()
    }
    let length_bytes = packed_le(length);
    let lcn_bytes = packed_le(lcn);
    let header = (length_bytes.len() as u8) | ((lcn_bytes.len() as u8) << 4);
    let mut out = vec![header];
    out.extend(length_bytes);
    out.extend(lcn_bytes);
    out.push(0x00);
    out
}

/// Builds one fixup-protected MFT record of `entry_size` bytes (sector
/// size fixed at 512, matching every synthetic image this module builds).
pub fn mft_record(entry_size: usize, sequence_number: u16, attrs: &[Vec<u8>]) -> Vec<u8> {
    let mut body = Vec::new();
    for a in attrs {
        body.extend(a);
    }
    body.extend(ATTR_TYPE_END.to_le_bytes());

    let attrs_offset = 0x38usize;
    let used_size = attrs_offset + body.len();
    assert!(used_size <= entry_size, "attribute body too large for entry_size");

    let mut data = vec![0u8; entry_size];
    data[0..4].copy_from_slice(b"FILE");
    data[0x10..0x12].copy_from_slice(&sequence_number.to_le_bytes());
    data[0x14..0x16].copy_from_slice(&(attrs_offset as u16).to_le_bytes());
    data[0x16..0x18].copy_from_slice(&MFT_RECORD_IN_USE.to_le_bytes());
    data[0x18..0x1C].copy_from_slice(&(used_size as u32).to_le_bytes());
    data[0x1C..0x20].copy_from_slice(&(entry_size as u32).to_le_bytes());
    data[attrs_offset..attrs_offset + body.len()].copy_from_slice(&body);

    let sector_size = 512usize;
    let sectors = entry_size / sector_size;
    let fixup_count = sectors + 1;
    let fixup_array_offset = 0x30usize;
    let usn: u16 = 1;
    data[4..6].copy_from_slice(&(fixup_array_offset as u16).to_le_bytes());
    data[6..8].copy_from_slice(&(fixup_count as u16).to_le_bytes());
    data[fixup_array_offset..fixup_array_offset + 2].copy_from_slice(&usn.to_le_bytes());
    for sector_index in 0..sectors {
        let tail = sector_index * sector_size + sector_size - 2;
        data[tail..tail + 2].copy_from_slice(&usn.to_le_bytes());
    }
    data
}

/// A directory/$DIRECTORY-flagged variant of [`mft_record`].
pub fn mft_directory_record(entry_size: usize, sequence_number: u16, attrs: &[Vec<u8>]) -> Vec<u8> {
    let mut data = mft_record(entry_size, sequence_number, attrs);
    let flags = u16::from_le_bytes(data[0x16..0x18].try_into().unwrap()) | MFT_RECORD_IS_DIRECTORY;
    data[0x16..0x18].copy_from_slice(&flags.to_le_bytes());
    data
}

/// Assembles a synthetic NTFS image (boot sector, `$MFT` entry #0 backed
/// by a single contiguous data run, then `entries` placed at indices
/// 1, 2, ...) and bootstraps a real `Mft` over it. `entry_size` and
/// `cluster_size` are both expressed in bytes; `cluster_size` must be a
/// multiple of the fixed 512-byte sector size `mft_record` assumes.
pub fn bootstrap_mft(entry_size: usize, cluster_size: u64, entries: Vec<Vec<u8>>) -> Mft {
    let mft_start_lcn = (512u64).div_ceil(cluster_size).max(1);

    let mut trailing_bytes = Vec::new();
    for e in &entries {
        trailing_bytes.extend(e);
    }
    let total_data_size = entry_size as u64 + trailing_bytes.len() as u64;
    let mft_clusters = total_data_size.div_ceil(cluster_size);

    let run = encode_single_run(mft_start_lcn, mft_clusters);
    let data_attr = non_resident_attribute(
        ATTR_TYPE_DATA,
        None,
        &run,
        mft_clusters * cluster_size,
        total_data_size,
        total_data_size,
        0,
    );
    let entry0 = mft_record(entry_size, 1, &[data_attr]);

    let mut boot = vec![0u8; 512];
    boot[3..11].copy_from_slice(b"NTFS    ");
    boot[0x0B..0x0D].copy_from_slice(&512u16.to_le_bytes());
    boot[0x0D] = (cluster_size / 512) as u8;
    boot[0x28..0x30].copy_from_slice(&1_000_000u64.to_le_bytes());
    boot[0x30..0x38].copy_from_slice(&mft_start_lcn.to_le_bytes());
    boot[0x38..0x40].copy_from_slice(&0u64.to_le_bytes());
    boot[0x40] = (entry_size as u64 / cluster_size) as i8 as u8;
    boot[0x44] = 1;

    let mft_region_start = (mft_start_lcn * cluster_size) as usize;
    let mut image = boot;
    image.resize(mft_region_start, 0);
    image.extend(entry0);
    image.extend(trailing_bytes);

    let reader: Arc<dyn BlockReader> = Arc::new(InMemoryBlockReader::new(image));
    let volume = Arc::new(Volume::open(reader).unwrap());
    Mft::bootstrap(volume, 16).unwrap()
}

/// Convenience wrapper over [`bootstrap_mft`] using the common 512-byte
/// cluster/sector size.
pub fn bootstrap_mft_512(entry_size: usize, entries: Vec<Vec<u8>>) -> Mft {
    bootstrap_mft(entry_size, 512, entries)
}
