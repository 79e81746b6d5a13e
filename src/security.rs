//! `SecurityDescriptorStore`: resolves a $STANDARD_INFORMATION security id
//! to its descriptor bytes via $Secure's $SII index and $SDS stream.

use log::trace;

use crate::cluster_stream::ClusterStream;
use crate::error::{NtfsError, Result};
use crate::index::{IndexEngine, Lookup};

const SDS_RECORD_HEADER_SIZE: u64 = 20;

/// Built over MFT entry #9 ($Secure)'s `$SII` index (collation ULONG) and
/// named `$SDS` data stream.
pub struct SecurityDescriptorStore {
    sii: IndexEngine,
    sds: ClusterStream,
}

impl SecurityDescriptorStore {
    pub fn new(sii: IndexEngine, sds: ClusterStream) -> Self {
        Self { sii, sds }
    }

    /// Resolves `security_id` to its descriptor payload, the $SDS record
    /// with its 20-byte header stripped. Returns `Ok(None)` rather than an
    /// error when the id is simply absent.
    pub fn get(&self, security_id: u32) -> Result<Option<Vec<u8>>> {
        let Some(entry) = self.sii.find(&Lookup::Ulong(security_id))? else {
            return Ok(None);
        };

        // $SII index value: (hash: u32, id: u32, sds_offset: u64, sds_size: u32) — 20 bytes.
        if entry.value.len() < 20 {
            return Err(NtfsError::invalid_record(
                "$SII index entry value shorter than 20 bytes",
            ));
        }
        let id = u32::from_le_bytes(entry.value[4..8].try_into().unwrap());
        let sds_offset = u64::from_le_bytes(entry.value[8..16].try_into().unwrap());
        let sds_size = u32::from_le_bytes(entry.value[16..20].try_into().unwrap()) as u64;

        if id != security_id {
            return Err(NtfsError::invalid_record(format!(
                "$SII entry id {} does not match looked-up security id {}",
                id, security_id
            )));
        }
        if sds_size < SDS_RECORD_HEADER_SIZE {
            return Err(NtfsError::invalid_record(
                "$SDS record smaller than its own header",
            ));
        }

        let record = self.sds.read_at(sds_offset, sds_size as usize)?;
        if (record.len() as u64) < sds_size {
            return Err(NtfsError::invalid_record("$SDS record truncated"));
        }

        let header_id = u32::from_le_bytes(record[4..8].try_into().unwrap());
        let header_size = u32::from_le_bytes(record[12..16].try_into().unwrap()) as u64;
        if header_id != security_id {
            return Err(NtfsError::invalid_record(format!(
                "$SDS record header id {} does not match security id {}",
                header_id, security_id
            )));
        }
        if header_size != sds_size {
            return Err(NtfsError::invalid_record(format!(
                "$SDS record header size {} does not match $SII size {}",
                header_size, sds_size
            )));
        }

        let payload = record[SDS_RECORD_HEADER_SIZE as usize..].to_vec();
        trace!(
            "resolved security id {} to descriptor bytes {}",
            security_id,
            hex::encode(&payload)
        );
        Ok(Some(payload))
    }
}
