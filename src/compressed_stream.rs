//! `CompressedBlockStream`: a byte stream over a compressed non-resident
//! attribute, decompressing one unit at a time through an external
//! decompressor and caching the results.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use log::trace;

use crate::block::BlockReader;
use crate::compression::{CompressionUnitPlan, UnitKind};
use crate::error::{NtfsError, Result};

/// The decompression algorithm itself is an external collaborator: this crate only fixes its contract. `decompress` must write
/// the fully expanded unit into `dst` and return the number of bytes
/// written, which is always `dst.len()` on success.
pub trait Decompressor: Send + Sync {
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize>;
}

struct UnitCache {
    buffers: HashMap<u64, Arc<Vec<u8>>>,
    order: VecDeque<u64>,
    capacity: usize,
}

impl UnitCache {
    fn new(capacity: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, unit_index: u64) -> Option<Arc<Vec<u8>>> {
        self.buffers.get(&unit_index).cloned()
    }

    fn insert(&mut self, unit_index: u64, buf: Arc<Vec<u8>>) {
        if !self.buffers.contains_key(&unit_index) {
            self.order.push_back(unit_index);
            while self.order.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.buffers.remove(&evicted);
                    trace!("evicted compression unit {} from cache", evicted);
                }
            }
        }
        self.buffers.insert(unit_index, buf);
    }
}

/// A read-only byte stream over a compressed attribute. Each compression
/// unit is decompressed at most once per cache window; sparse and
/// uncompressed units bypass the decompressor entirely.
pub struct CompressedBlockStream {
    reader: Arc<dyn BlockReader>,
    plan: Arc<CompressionUnitPlan>,
    decompressor: Arc<dyn Decompressor>,
    cluster_size: u32,
    data_size: u64,
    valid_data_size: u64,
    cache: Mutex<UnitCache>,
}

impl CompressedBlockStream {
    pub fn new(
        reader: Arc<dyn BlockReader>,
        plan: CompressionUnitPlan,
        decompressor: Arc<dyn Decompressor>,
        cluster_size: u32,
        data_size: u64,
        valid_data_size: u64,
        cache_capacity: usize,
    ) -> Self {
        Self {
            reader,
            plan: Arc::new(plan),
            decompressor,
            cluster_size,
            data_size,
            valid_data_size,
            cache: Mutex::new(UnitCache::new(cache_capacity)),
        }
    }

    pub fn size(&self) -> u64 {
        self.data_size
    }

    fn unit_byte_len(&self, unit_index: u64) -> usize {
        let unit = &self.plan.units()[unit_index as usize];
        (unit.nominal_cluster_count * self.cluster_size as u64) as usize
    }

    /// Produces the fully expanded bytes of one compression unit, reading
    /// from cache when present.
    fn materialize_unit(&self, unit_index: u64) -> Result<Arc<Vec<u8>>> {
        if let Some(cached) = self.cache.lock().expect("unit cache poisoned").get(unit_index) {
            return Ok(cached);
        }

        let unit = self
            .plan
            .units()
            .get(unit_index as usize)
            .ok_or_else(|| NtfsError::out_of_bounds("compression unit", format!("{}", unit_index)))?;
        let unit_len = self.unit_byte_len(unit_index);

        let buf = match &unit.kind {
            UnitKind::Sparse => Arc::new(vec![0u8; unit_len]),
            UnitKind::Uncompressed { present_extents } => {
                let mut out = Vec::with_capacity(unit_len);
                for extent in present_extents {
                    let byte_offset = extent.lcn * self.cluster_size as u64;
                    let byte_len = (extent.length * self.cluster_size as u64) as usize;
                    out.extend(self.reader.read_at(byte_offset, byte_len)?);
                }
                Arc::new(out)
            }
            UnitKind::Compressed {
                present_extents,
                present_clusters,
            } => {
                let src_len = (*present_clusters * self.cluster_size as u64) as usize;
                let mut src = Vec::with_capacity(src_len);
                for extent in present_extents {
                    let byte_offset = extent.lcn * self.cluster_size as u64;
                    let byte_len = (extent.length * self.cluster_size as u64) as usize;
                    src.extend(self.reader.read_at(byte_offset, byte_len)?);
                }
                let mut dst = vec![0u8; unit_len];
                let written = self.decompressor.decompress(&src, &mut dst)?;
                if written != unit_len {
                    return Err(NtfsError::DecompressionFailed(format!(
                        "unit {} expanded to {} bytes, expected {}",
                        unit_index, written, unit_len
                    )));
                }
                Arc::new(dst)
            }
        };

        self.cache
            .lock()
            .expect("unit cache poisoned")
            .insert(unit_index, buf.clone());
        Ok(buf)
    }

    /// Stateless read at an arbitrary byte offset, safe to call
    /// concurrently across threads sharing this stream.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let mut cursor = offset;
        let end = offset.saturating_add(len as u64).min(self.data_size);

        while cursor < end {
            let unit_size_bytes = self.plan.unit_size_clusters() * self.cluster_size as u64;
            let unit_index = cursor / unit_size_bytes;
            let unit_start_byte = unit_index * unit_size_bytes;
            let offset_in_unit = (cursor - unit_start_byte) as usize;

            let buf = self.materialize_unit(unit_index)?;
            let available = buf.len().saturating_sub(offset_in_unit);
            if available == 0 {
                break;
            }
            let want = ((end - cursor) as usize).min(available);

            if cursor + want as u64 > self.valid_data_size {
                let valid_want = self.valid_data_size.saturating_sub(cursor).min(want as u64) as usize;
                out.extend(&buf[offset_in_unit..offset_in_unit + valid_want]);
                out.extend(std::iter::repeat(0u8).take(want - valid_want));
            } else {
                out.extend(&buf[offset_in_unit..offset_in_unit + want]);
            }
            cursor += want as u64;
        }

        Ok(out)
    }

    pub fn read_to_end(&self) -> Result<Vec<u8>> {
        self.read_at(0, self.data_size as usize)
    }
}
