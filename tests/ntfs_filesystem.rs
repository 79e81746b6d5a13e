//! End-to-end tests over synthetic NTFS volume images built directly from
//! the public API, exercising `FileSystem` the way a caller would: open an
//! image, walk the root directory, read resident and non-resident data,
//! resolve a security descriptor, and observe stale-reference handling.

use std::collections::BTreeMap;
use std::sync::Arc;

use ntfs_core::constants::*;
use ntfs_core::{
    AbortFlag, BlockReader, Decompressor, FileReference, FileSystem, FileSystemOptions,
    InMemoryBlockReader, NtfsError, Result,
};

const SECTOR_SIZE: u64 = 512;

fn resident_attribute(type_code: u32, name: Option<&str>, content: &[u8]) -> Vec<u8> {
    let name_units: Vec<u16> = name.map(|n| n.encode_utf16().collect()).unwrap_or_default();
    let header_len = 24usize;
    let content_offset = header_len + name_units.len() * 2;
    let total = (content_offset + content.len()).next_multiple_of(8);
    let mut out = vec![0u8; total];
    out[0..4].copy_from_slice(&type_code.to_le_bytes());
    out[4..8].copy_from_slice(&(total as u32).to_le_bytes());
    out[8] = 0;
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

fn non_resident_attribute(
    type_code: u32,
    name: Option<&str>,
    runs: &[u8],
    allocated_size: u64,
    data_size: u64,
    valid_data_size: u64,
    data_flags: u16,
    compression_unit_exponent: u8,
) -> Vec<u8> {
    let name_units: Vec<u16> = name.map(|n| n.encode_utf16().collect()).unwrap_or_default();
    let header_len = 64usize;
    let runs_offset = header_len + name_units.len() * 2;
    let total = (runs_offset + runs.len()).next_multiple_of(8);
    let mut out = vec![0u8; total];
    out[0..4].copy_from_slice(&type_code.to_le_bytes());
    out[4..8].copy_from_slice(&(total as u32).to_le_bytes());
    out[8] = 1;
    out[9] = name_units.len() as u8;
    out[10..12].copy_from_slice(&(header_len as u16).to_le_bytes());
    out[12..14].copy_from_slice(&data_flags.to_le_bytes());
    out[32..34].copy_from_slice(&(runs_offset as u16).to_le_bytes());
    out[34] = compression_unit_exponent;
    out[40..48].copy_from_slice(&allocated_size.to_le_bytes());
    out[48..56].copy_from_slice(&data_size.to_le_bytes());
    out[56..64].copy_from_slice(&valid_data_size.to_le_bytes());
    for (i, unit) in name_units.iter().enumerate() {
        out[header_len + i * 2..header_len + i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
    out[runs_offset..runs_offset + runs.len()].copy_from_slice(runs);
    out
}

fn packed_le(value: u64) -> Vec<u8> {
    let bytes = value.to_le_bytes();
    let mut len = 8;
    while len > 1 && bytes[len - 1] == 0 {
        len -= 1;
    }
    bytes[..len].to_vec()
}

/// Encodes a run list. `None` for a run's LCN produces a sparse run (no
/// LCN field,data-run encoding).
fn encode_runs(runs: &[(Option<u64>, u64)]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut previous_lcn: i64 = 0;
    for (lcn, length) in runs {
        let length_bytes = packed_le(*length);
        match lcn {
            Some(lcn) => {
                // LCN deltas are signed and minimally two's-complement
                // packed: keep dropping a trailing 0x00/0xFF byte as long
                // as the next byte's sign bit already implies it.
                let delta = *lcn as i64 - previous_lcn;
                let full = delta.to_le_bytes();
                let mut lcn_bytes: Vec<u8> = full.to_vec();
                while lcn_bytes.len() > 1 {
                    let top = lcn_bytes[lcn_bytes.len() - 1];
                    let next = lcn_bytes[lcn_bytes.len() - 2];
                    let sign_ok = (top == 0x00 && next & 0x80 == 0) || (top == 0xFF && next & 0x80 != 0);
                    if sign_ok {
                        lcn_bytes.pop();
                    } else {
                        break;
                    }
                }
                let header = (length_bytes.len() as u8) | ((lcn_bytes.len() as u8) << 4);
                out.push(header);
                out.extend(&length_bytes);
                out.extend(&lcn_bytes);
                previous_lcn = *lcn as i64;
            }
            None => {
                let header = length_bytes.len() as u8;
                out.push(header);
                out.extend(&length_bytes);
            }
        }
    }
    out.push(0x00);
    out
}

fn encode_single_run(lcn: u64, length: u64) -> Vec<u8> {
    encode_runs(&[(Some(lcn), length)])
}

/// $FILE_NAME resident content and index-key layout (identical):
/// parent_reference(8) four FILETIMEs(32) allocated_size(8)
/// data_size(8) file_attribute_flags(4) reparse/ea(4) name_length(1)
/// namespace(1) name (UTF-16).
fn file_name_content(parent: FileReference, name: &str, flags: u32) -> Vec<u8> {
    let name_units: Vec<u16> = name.encode_utf16().collect();
    let mut out = vec![0u8; 0x42 + name_units.len() * 2];
    out[0..8].copy_from_slice(&parent.0.to_le_bytes());
    out[56..60].copy_from_slice(&flags.to_le_bytes());
    out[0x40] = name_units.len() as u8;
    out[0x41] = FILE_NAME_NAMESPACE_WIN32;
    for (i, unit) in name_units.iter().enumerate() {
        out[0x42 + i * 2..0x42 + i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
    out
}

fn standard_information_content(flags: u32, security_id: u32) -> Vec<u8> {
    let mut out = vec![0u8; 72];
    out[32..36].copy_from_slice(&flags.to_le_bytes());
    out[52..56].copy_from_slice(&security_id.to_le_bytes());
    out
}

fn push_index_entry(buf: &mut Vec<u8>, file_reference: FileReference, key: &[u8], is_last: bool) {
    let mut flags = 0u16;
    if is_last {
        flags |= INDEX_ENTRY_IS_LAST;
    }
    let key_len = if is_last { 0 } else { key.len() };
    let mut entry = vec![0u8; 16 + key_len];
    entry[0..8].copy_from_slice(&file_reference.0.to_le_bytes());
    entry[10..12].copy_from_slice(&(key_len as u16).to_le_bytes());
    entry[12..14].copy_from_slice(&flags.to_le_bytes());
    if !is_last {
        entry[16..16 + key_len].copy_from_slice(key);
    }
    let length = entry.len() as u16;
    entry[8..10].copy_from_slice(&length.to_le_bytes());
    buf.extend(entry);
}

/// A flat (single-leaf, no `$INDEX_ALLOCATION`) `$INDEX_ROOT` over the
/// given `(name, file_reference)` pairs, collated by filename.
fn index_root(entries: &[(&str, FileReference)]) -> Vec<u8> {
    let mut entries_area = Vec::new();
    for (name, reference) in entries {
        let key = file_name_content(FileReference::new(0, 0), name, 0);
        push_index_entry(&mut entries_area, *reference, &key, false);
    }
    push_index_entry(&mut entries_area, FileReference(0), &[], true);

    let mut node_header = vec![0u8; 16];
    node_header[0..4].copy_from_slice(&16u32.to_le_bytes());
    node_header[4..8].copy_from_slice(&(16 + entries_area.len() as u32).to_le_bytes());
    node_header[8..12].copy_from_slice(&(16 + entries_area.len() as u32).to_le_bytes());

    let mut root = vec![0u8; 16];
    root[4..8].copy_from_slice(&COLLATION_FILENAME.to_le_bytes());
    root[8..12].copy_from_slice(&4096u32.to_le_bytes());
    root.extend(node_header);
    root.extend(entries_area);
    root
}

/// A flat `$SII` index root (collation ULONG) holding one `security_id ->
/// (hash, id, sds_offset, sds_size)` mapping, as `$Secure` keeps it.
fn sii_index_root(security_id: u32, sds_offset: u64, sds_size: u32) -> Vec<u8> {
    let key = security_id.to_le_bytes();
    let mut value = vec![0u8; 20];
    value[4..8].copy_from_slice(&security_id.to_le_bytes());
    value[8..16].copy_from_slice(&sds_offset.to_le_bytes());
    value[16..20].copy_from_slice(&sds_size.to_le_bytes());

    let payload_len = key.len() + value.len();
    let mut entries_area = vec![0u8; 16 + payload_len];
    entries_area[10..12].copy_from_slice(&(key.len() as u16).to_le_bytes());
    entries_area[16..16 + key.len()].copy_from_slice(&key);
    entries_area[16 + key.len()..16 + payload_len].copy_from_slice(&value);
    let len = entries_area.len() as u16;
    entries_area[8..10].copy_from_slice(&len.to_le_bytes());

    let mut sentinel = vec![0u8; 16];
    sentinel[12..14].copy_from_slice(&INDEX_ENTRY_IS_LAST.to_le_bytes());
    let sentinel_len = sentinel.len() as u16;
    sentinel[8..10].copy_from_slice(&sentinel_len.to_le_bytes());
    entries_area.extend(sentinel);

    let mut node_header = vec![0u8; 16];
    node_header[0..4].copy_from_slice(&16u32.to_le_bytes());
    node_header[4..8].copy_from_slice(&(16 + entries_area.len() as u32).to_le_bytes());
    node_header[8..12].copy_from_slice(&(16 + entries_area.len() as u32).to_le_bytes());

    let mut root = vec![0u8; 16];
    root[4..8].copy_from_slice(&COLLATION_ULONG.to_le_bytes());
    root[8..12].copy_from_slice(&4096u32.to_le_bytes());
    root.extend(node_header);
    root.extend(entries_area);
    root
}

/// A `$SDS` record: hash(4) id(4) offset(8) size(4) header followed by the
/// raw security descriptor payload.
fn sds_record(security_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut record = vec![0u8; 20];
    let size = 20 + payload.len();
    record[4..8].copy_from_slice(&security_id.to_le_bytes());
    record[12..16].copy_from_slice(&(size as u32).to_le_bytes());
    record.extend(payload);
    record
}

fn mft_record(entry_size: usize, sequence_number: u16, directory: bool, attrs: &[Vec<u8>]) -> Vec<u8> {
    let mut body = Vec::new();
    for a in attrs {
        body.extend(a);
    }
    body.extend(ATTR_TYPE_END.to_le_bytes());

    let attrs_offset = 0x38usize;
    let used_size = attrs_offset + body.len();
    assert!(used_size <= entry_size, "attribute body too large for entry_size");

    let mut flags = MFT_RECORD_IN_USE;
    if directory {
        flags |= MFT_RECORD_IS_DIRECTORY;
    }

    let mut data = vec![0u8; entry_size];
    data[0..4].copy_from_slice(b"FILE");
    data[0x10..0x12].copy_from_slice(&sequence_number.to_le_bytes());
    data[0x14..0x16].copy_from_slice(&(attrs_offset as u16).to_le_bytes());
    data[0x16..0x18].copy_from_slice(&flags.to_le_bytes());
    data[0x18..0x1C].copy_from_slice(&(used_size as u32).to_le_bytes());
    data[0x1C..0x20].copy_from_slice(&(entry_size as u32).to_le_bytes());
    data[attrs_offset..attrs_offset + body.len()].copy_from_slice(&body);

    let sector_size = SECTOR_SIZE as usize;
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

/// Assembles a full volume image: boot sector, `$MFT` (entry #0) whose
/// `$DATA` covers every entry up to the highest index supplied, and the
/// given entries placed at their explicit MFT indices. Gaps are filled
/// with zeroed (unallocated) records.
fn build_volume(entry_size: usize, cluster_size: u64, entries: BTreeMap<u64, Vec<u8>>) -> Vec<u8> {
    let mft_start_lcn = SECTOR_SIZE.div_ceil(cluster_size).max(1);
    let highest_index = entries.keys().copied().max().unwrap_or(0);
    assert!(highest_index >= 1, "entry 0 is reserved for $MFT itself");
    // `trailing` follows entry0 in the $MFT's own data stream, so its local
    // offset 0 is MFT index 1, not index 0: shift every placement back by
    // one entry_size to land each record at its intended absolute index.
    let entry_count = highest_index;

    let mut trailing = vec![0u8; entry_size * entry_count as usize];
    for (index, record) in &entries {
        let start = (*index as usize - 1) * entry_size;
        trailing[start..start + entry_size].copy_from_slice(record);
    }

    let total_data_size = entry_size as u64 + trailing.len() as u64;
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
        0,
    );
    let entry0 = mft_record(entry_size, 1, false, &[data_attr]);

    let mut boot = vec![0u8; 512];
    boot[3..11].copy_from_slice(b"NTFS    ");
    boot[0x0B..0x0D].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
    boot[0x0D] = (cluster_size / SECTOR_SIZE) as u8;
    boot[0x28..0x30].copy_from_slice(&1_000_000u64.to_le_bytes());
    boot[0x30..0x38].copy_from_slice(&mft_start_lcn.to_le_bytes());
    boot[0x38..0x40].copy_from_slice(&0u64.to_le_bytes());
    boot[0x40] = (entry_size as u64 / cluster_size) as i8 as u8;
    boot[0x44] = 1;

    let mft_region_start = (mft_start_lcn * cluster_size) as usize;
    let mut image = boot;
    image.resize(mft_region_start, 0);
    image.extend(entry0);
    image.extend(trailing);
    // pad a generous data region after the MFT for file content clusters.
    image.resize(image.len() + 64 * cluster_size as usize, 0);
    image
}

fn open_volume(entry_size: usize, cluster_size: u64, entries: BTreeMap<u64, Vec<u8>>) -> FileSystem {
    let image = build_volume(entry_size, cluster_size, entries);
    let reader: Arc<dyn BlockReader> = Arc::new(InMemoryBlockReader::new(image));
    FileSystem::open(reader).expect("volume should open")
}

const ENTRY_SIZE: usize = 1024;
const CLUSTER_SIZE: u64 = 512;

/// S1: open a volume and enumerate the root directory's children.
#[test]
fn opens_volume_and_enumerates_root_directory() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut entries = BTreeMap::new();

    let file_name = file_name_content(FileReference::new(MFT_RECORD_ROOT, 5), "hello.txt", 0);
    let std_info = standard_information_content(FILE_ATTRIBUTE_ARCHIVE, 0);
    let data = resident_attribute(ATTR_TYPE_DATA, None, b"hi");
    entries.insert(
        20,
        mft_record(
            ENTRY_SIZE,
            3,
            false,
            &[
                resident_attribute(ATTR_TYPE_STANDARD_INFORMATION, None, &std_info),
                resident_attribute(ATTR_TYPE_FILE_NAME, None, &file_name),
                data,
            ],
        ),
    );

    let root_index = index_root(&[("hello.txt", FileReference::new(20, 3))]);
    entries.insert(
        MFT_RECORD_ROOT,
        mft_record(
            ENTRY_SIZE,
            5,
            true,
            &[resident_attribute(ATTR_TYPE_INDEX_ROOT, Some("$I30"), &root_index)],
        ),
    );

    let fs = open_volume(ENTRY_SIZE, CLUSTER_SIZE, entries);
    let root = fs.root().unwrap();
    assert!(root.is_directory());

    let children = root.children().unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name().as_deref(), Some("hello.txt"));

    let found = root.child_by_name("hello.txt").unwrap().unwrap();
    assert_eq!(found.size(), 2);
    assert!(root.child_by_name("missing.txt").unwrap().is_none());
}

/// S2: a file whose default `$DATA` is resident reads back exactly as written.
#[test]
fn reads_resident_data_stream() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut entries = BTreeMap::new();
    let file_name = file_name_content(FileReference::new(MFT_RECORD_ROOT, 5), "note.txt", 0);
    entries.insert(
        20,
        mft_record(
            ENTRY_SIZE,
            1,
            false,
            &[
                resident_attribute(ATTR_TYPE_FILE_NAME, None, &file_name),
                resident_attribute(ATTR_TYPE_DATA, None, b"resident payload"),
            ],
        ),
    );
    let root_index = index_root(&[("note.txt", FileReference::new(20, 1))]);
    entries.insert(
        MFT_RECORD_ROOT,
        mft_record(
            ENTRY_SIZE,
            5,
            true,
            &[resident_attribute(ATTR_TYPE_INDEX_ROOT, Some("$I30"), &root_index)],
        ),
    );

    let fs = open_volume(ENTRY_SIZE, CLUSTER_SIZE, entries);
    let file = fs.file_entry_by_utf16_path("note.txt").unwrap();
    let stream = file.data_stream().unwrap();
    assert_eq!(stream.read_to_end().unwrap(), b"resident payload");
}

/// S3: a fragmented non-resident `$DATA` with a sparse middle run reads
/// back real bytes around a zero-filled gap.
#[test]
fn reads_fragmented_sparse_data_stream() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut entries = BTreeMap::new();

    // Two one-cluster extents of real data separated by one sparse cluster.
    let first_cluster_lcn = 80u64;
    let third_cluster_lcn = 82u64;
    let runs = encode_runs(&[
        (Some(first_cluster_lcn), 1),
        (None, 1),
        (Some(third_cluster_lcn), 1),
    ]);
    let data_size = CLUSTER_SIZE * 3;
    let data_attr = non_resident_attribute(
        ATTR_TYPE_DATA,
        None,
        &runs,
        data_size,
        data_size,
        data_size,
        0,
        0,
    );
    let file_name = file_name_content(FileReference::new(MFT_RECORD_ROOT, 5), "frag.bin", 0);
    entries.insert(
        20,
        mft_record(
            ENTRY_SIZE,
            1,
            false,
            &[
                resident_attribute(ATTR_TYPE_FILE_NAME, None, &file_name),
                data_attr,
            ],
        ),
    );
    let root_index = index_root(&[("frag.bin", FileReference::new(20, 1))]);
    entries.insert(
        MFT_RECORD_ROOT,
        mft_record(
            ENTRY_SIZE,
            5,
            true,
            &[resident_attribute(ATTR_TYPE_INDEX_ROOT, Some("$I30"), &root_index)],
        ),
    );

    let mut image = build_volume(ENTRY_SIZE, CLUSTER_SIZE, entries);
    let pattern_a = vec![0xAAu8; CLUSTER_SIZE as usize];
    let pattern_b = vec![0xBBu8; CLUSTER_SIZE as usize];
    let offset_a = (first_cluster_lcn * CLUSTER_SIZE) as usize;
    let offset_b = (third_cluster_lcn * CLUSTER_SIZE) as usize;
    image[offset_a..offset_a + CLUSTER_SIZE as usize].copy_from_slice(&pattern_a);
    image[offset_b..offset_b + CLUSTER_SIZE as usize].copy_from_slice(&pattern_b);

    let reader: Arc<dyn BlockReader> = Arc::new(InMemoryBlockReader::new(image));
    let fs = FileSystem::open(reader).unwrap();
    let file = fs.file_entry_by_utf16_path("frag.bin").unwrap();
    let stream = file.data_stream().unwrap();
    assert_eq!(stream.size(), data_size);
    let content = stream.read_to_end().unwrap();
    assert_eq!(&content[0..CLUSTER_SIZE as usize], &pattern_a[..]);
    assert!(content[CLUSTER_SIZE as usize..2 * CLUSTER_SIZE as usize]
        .iter()
        .all(|&b| b == 0));
    assert_eq!(&content[2 * CLUSTER_SIZE as usize..], &pattern_b[..]);
}

/// A `Decompressor` standing in for LZNT1: the tests only need to verify
/// that `FileSystem` routes compressed reads through the configured
/// decompressor, not that it implements the real algorithm.
struct EchoDecompressor;

impl Decompressor for EchoDecompressor {
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        Ok(dst.len())
    }
}

/// S4: a compressed `$DATA` attribute is read through the configured
/// LZNT1 decompressor, one compression unit at a time.
#[test]
fn reads_compressed_data_stream_via_configured_decompressor() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut entries = BTreeMap::new();

    // One compression unit of 4 clusters: 2 present (the real LZNT1
    // payload in this scenario, stood in for by the echo decompressor)
    // then a 2-cluster sparse tail, matching how NTFS marks a unit that
    // compressed below its nominal size.
    let unit_size_clusters = 1u64 << 2; // compression_unit_exponent = 2
    let present_clusters = 2u64;
    let lcn = 90u64;
    let runs = encode_runs(&[(Some(lcn), present_clusters), (None, unit_size_clusters - present_clusters)]);
    let nominal_size = CLUSTER_SIZE * unit_size_clusters;
    let allocated_size = nominal_size;
    let data_attr = non_resident_attribute(
        ATTR_TYPE_DATA,
        None,
        &runs,
        allocated_size,
        nominal_size,
        nominal_size,
        ATTR_DATA_FLAG_COMPRESSION_MASK,
        2,
    );
    let file_name = file_name_content(FileReference::new(MFT_RECORD_ROOT, 5), "compressed.bin", 0);
    entries.insert(
        20,
        mft_record(
            ENTRY_SIZE,
            1,
            false,
            &[
                resident_attribute(ATTR_TYPE_FILE_NAME, None, &file_name),
                data_attr,
            ],
        ),
    );
    let root_index = index_root(&[("compressed.bin", FileReference::new(20, 1))]);
    entries.insert(
        MFT_RECORD_ROOT,
        mft_record(
            ENTRY_SIZE,
            5,
            true,
            &[resident_attribute(ATTR_TYPE_INDEX_ROOT, Some("$I30"), &root_index)],
        ),
    );

    let mut image = build_volume(ENTRY_SIZE, CLUSTER_SIZE, entries);
    let present_len = (present_clusters * CLUSTER_SIZE) as usize;
    let pattern: Vec<u8> = (0..present_len).map(|i| (i % 251) as u8).collect();
    let offset = (lcn * CLUSTER_SIZE) as usize;
    image[offset..offset + present_len].copy_from_slice(&pattern);

    let reader: Arc<dyn BlockReader> = Arc::new(InMemoryBlockReader::new(image));
    let options = FileSystemOptions {
        lznt1_decompressor: Some(Arc::new(EchoDecompressor)),
        ..FileSystemOptions::default()
    };
    let fs = FileSystem::open_with_options(reader, options).unwrap();
    let file = fs.file_entry_by_utf16_path("compressed.bin").unwrap();
    let stream = file.data_stream().unwrap();
    let content = stream.read_to_end().unwrap();

    // The echo decompressor only fills as many bytes as the present
    // payload carries; the rest of the expanded unit stays zeroed.
    assert_eq!(content.len(), nominal_size as usize);
    assert_eq!(&content[..present_len], &pattern[..]);
    assert!(content[present_len..].iter().all(|&b| b == 0));
}

/// S6: a stale `FileReference` (wrong sequence number) surfaces as
/// `NotFound` at the `FileSystem` facade, and a directory entry pointing
/// at a now-unallocated MFT slot is skipped during enumeration.
#[test]
fn stale_reference_is_not_found_and_skipped_in_directory_listing() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut entries = BTreeMap::new();

    // entry 20 is unallocated (zeroed record occupies the slot by default);
    // the root index still references it at sequence 1.
    let root_index = index_root(&[
        ("gone.txt", FileReference::new(20, 1)),
        ("here.txt", FileReference::new(21, 1)),
    ]);
    entries.insert(
        MFT_RECORD_ROOT,
        mft_record(
            ENTRY_SIZE,
            5,
            true,
            &[resident_attribute(ATTR_TYPE_INDEX_ROOT, Some("$I30"), &root_index)],
        ),
    );
    let file_name = file_name_content(FileReference::new(MFT_RECORD_ROOT, 5), "here.txt", 0);
    entries.insert(
        21,
        mft_record(
            ENTRY_SIZE,
            1,
            false,
            &[
                resident_attribute(ATTR_TYPE_FILE_NAME, None, &file_name),
                resident_attribute(ATTR_TYPE_DATA, None, b"present"),
            ],
        ),
    );

    let fs = open_volume(ENTRY_SIZE, CLUSTER_SIZE, entries);

    let root = fs.root().unwrap();
    let children = root.children().unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name().as_deref(), Some("here.txt"));

    let err = fs
        .file_entry_by_reference(FileReference::new(21, 9))
        .unwrap_err();
    assert!(matches!(err, NtfsError::NotFound(_)));
}

/// S5: a file's `$STANDARD_INFORMATION.security_id` resolves through
/// `$Secure`'s `$SII` index and `$SDS` stream to its descriptor bytes.
#[test]
fn resolves_security_descriptor_via_secure_store() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut entries = BTreeMap::new();

    let security_id = 0x103u32;
    let payload: Vec<u8> = (0..60u32).map(|i| i as u8).collect();
    let record = sds_record(security_id, &payload);
    let sds_lcn = 100u64;

    let sii_root = sii_index_root(security_id, 0, record.len() as u32);
    let sds_run = encode_single_run(sds_lcn, 1);
    let sds_attr = non_resident_attribute(
        ATTR_TYPE_DATA,
        Some("$SDS"),
        &sds_run,
        CLUSTER_SIZE,
        record.len() as u64,
        record.len() as u64,
        0,
        0,
    );
    entries.insert(
        MFT_RECORD_SECURE,
        mft_record(
            ENTRY_SIZE,
            1,
            false,
            &[
                resident_attribute(ATTR_TYPE_INDEX_ROOT, Some("$SII"), &sii_root),
                sds_attr,
            ],
        ),
    );

    let file_name = file_name_content(FileReference::new(MFT_RECORD_ROOT, 5), "secure.txt", 0);
    let std_info = standard_information_content(FILE_ATTRIBUTE_ARCHIVE, security_id);
    entries.insert(
        20,
        mft_record(
            ENTRY_SIZE,
            1,
            false,
            &[
                resident_attribute(ATTR_TYPE_STANDARD_INFORMATION, None, &std_info),
                resident_attribute(ATTR_TYPE_FILE_NAME, None, &file_name),
                resident_attribute(ATTR_TYPE_DATA, None, b"secret"),
            ],
        ),
    );
    let root_index = index_root(&[("secure.txt", FileReference::new(20, 1))]);
    entries.insert(
        MFT_RECORD_ROOT,
        mft_record(
            ENTRY_SIZE,
            5,
            true,
            &[resident_attribute(ATTR_TYPE_INDEX_ROOT, Some("$I30"), &root_index)],
        ),
    );

    let mut image = build_volume(ENTRY_SIZE, CLUSTER_SIZE, entries);
    let offset = (sds_lcn * CLUSTER_SIZE) as usize;
    image[offset..offset + record.len()].copy_from_slice(&record);

    let reader: Arc<dyn BlockReader> = Arc::new(InMemoryBlockReader::new(image));
    let fs = FileSystem::open(reader).unwrap();
    let file = fs.file_entry_by_utf16_path("secure.txt").unwrap();
    let descriptor = file.security_descriptor().unwrap();
    assert_eq!(descriptor, Some(payload));
}
