//! `Volume`: binds a `BlockReader`, parses the boot sector, and exposes
//! cluster/sector geometry.

use std::io::Cursor;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;

use crate::block::BlockReader;
use crate::error::{NtfsError, Result};

const BOOT_SECTOR_SIZE: usize = 512;
const OEM_ID_OFFSET: usize = 0x03;
const OEM_ID: &[u8; 8] = b"NTFS    ";

/// Volume geometry decoded once from the boot sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeGeometry {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub cluster_size: u32,
    pub total_sectors: u64,
    pub mft_start_lcn: u64,
    pub mft_mirror_start_lcn: u64,
    pub mft_entry_size: u32,
    pub index_entry_size: u32,
    pub serial_number: u64,
}

impl VolumeGeometry {
    pub fn total_size(&self) -> u64 {
        self.total_sectors * self.bytes_per_sector as u64
    }

    pub fn cluster_to_offset(&self, lcn: u64) -> u64 {
        lcn * self.cluster_size as u64
    }
}

/// Decodes the signed-exponent "clusters or bytes" convention NTFS uses
/// for MFT/index record sizes: positive = that many clusters; negative =
/// `2^|x|` bytes.
fn decode_record_size(indicator: i8, cluster_size: u32) -> Result<u32> {
    if indicator > 0 {
        Ok(indicator as u32 * cluster_size)
    } else if indicator < 0 {
        let shift = indicator.unsigned_abs();
        if shift >= 32 {
            return Err(NtfsError::invalid_record(format!(
                "record size exponent {} out of range",
                indicator
            )));
        }
        Ok(1u32 << shift)
    } else {
        Err(NtfsError::invalid_record("record size indicator is zero"))
    }
}

/// An open NTFS volume: the block reader plus decoded geometry.
pub struct Volume {
    reader: Arc<dyn BlockReader>,
    geometry: VolumeGeometry,
}

impl Volume {
    /// Opens a volume, parsing and validating its boot sector. This is
    /// one of the two fatal-on-open checks (the other is MFT entry #0's
    /// readability, checked by `Mft::bootstrap`).
    pub fn open(reader: Arc<dyn BlockReader>) -> Result<Self> {
        let sector = reader.read_at(0, BOOT_SECTOR_SIZE)?;

        if &sector[OEM_ID_OFFSET..OEM_ID_OFFSET + 8] != OEM_ID {
            return Err(NtfsError::InvalidSignature {
                offset: OEM_ID_OFFSET as u64,
                expected: b"NTFS    ",
                found: sector[OEM_ID_OFFSET..OEM_ID_OFFSET + 8].to_vec(),
            });
        }

        let mut cursor = Cursor::new(&sector[..]);
        cursor.set_position(0x0B);
        let bytes_per_sector = cursor.read_u16::<LittleEndian>()? as u32;
        let sectors_per_cluster_raw = sector[0x0D];

        cursor.set_position(0x28);
        let total_sectors = cursor.read_u64::<LittleEndian>()?;
        cursor.set_position(0x30);
        let mft_start_lcn = cursor.read_u64::<LittleEndian>()?;
        cursor.set_position(0x38);
        let mft_mirror_start_lcn = cursor.read_u64::<LittleEndian>()?;
        let mft_record_indicator = sector[0x40] as i8;
        let index_record_indicator = sector[0x44] as i8;
        cursor.set_position(0x48);
        let serial_number = cursor.read_u64::<LittleEndian>()?;

        if bytes_per_sector == 0 || !bytes_per_sector.is_power_of_two() {
            return Err(NtfsError::invalid_record(format!(
                "bytes_per_sector {} is not a power of two",
                bytes_per_sector
            )));
        }

        // sectors_per_cluster is either a direct count (1..=128) or, like
        // the record-size fields, a negative byte-shift for sub-sector
        // clusters; NTFS only uses the positive form in practice but we
        // decode defensively.
        let sectors_per_cluster = if sectors_per_cluster_raw < 0x80 {
            sectors_per_cluster_raw as u32
        } else {
            let shift = (0x100 - sectors_per_cluster_raw as u32) as u32;
            return Err(NtfsError::invalid_record(format!(
                "unsupported negative sectors_per_cluster exponent {}",
                shift
            )));
        };

        if sectors_per_cluster == 0 {
            return Err(NtfsError::invalid_record("sectors_per_cluster is zero"));
        }

        let cluster_size = bytes_per_sector
            .checked_mul(sectors_per_cluster)
            .ok_or_else(|| NtfsError::invalid_record("cluster_size overflow"))?;
        if !cluster_size.is_power_of_two() || cluster_size < bytes_per_sector {
            return Err(NtfsError::invalid_record(format!(
                "cluster_size {} is not a power-of-two multiple of sector size {}",
                cluster_size, bytes_per_sector
            )));
        }

        let mft_entry_size = decode_record_size(mft_record_indicator, cluster_size)?;
        if mft_entry_size % bytes_per_sector != 0 {
            return Err(NtfsError::invalid_record(format!(
                "mft_entry_size {} is not a multiple of sector size {}",
                mft_entry_size, bytes_per_sector
            )));
        }
        let index_entry_size = decode_record_size(index_record_indicator, cluster_size)?;

        let geometry = VolumeGeometry {
            bytes_per_sector,
            sectors_per_cluster,
            cluster_size,
            total_sectors,
            mft_start_lcn,
            mft_mirror_start_lcn,
            mft_entry_size,
            index_entry_size,
            serial_number,
        };

        debug!(
            "opened NTFS volume: cluster_size={} mft_entry_size={} mft_start_lcn={}",
            geometry.cluster_size, geometry.mft_entry_size, geometry.mft_start_lcn
        );

        Ok(Self { reader, geometry })
    }

    pub fn geometry(&self) -> VolumeGeometry {
        self.geometry
    }

    pub fn reader(&self) -> &Arc<dyn BlockReader> {
        &self.reader
    }

    pub fn read_cluster_range(&self, lcn: u64, cluster_count: u64) -> Result<Vec<u8>> {
        let offset = self.geometry.cluster_to_offset(lcn);
        let len = cluster_count * self.geometry.cluster_size as u64;
        self.reader.read_at(offset, len as usize)
    }
}
