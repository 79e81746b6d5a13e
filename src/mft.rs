//! `Mft`: a logical vector-of-records abstraction over the $MFT itself,
//! with an entry cache and attribute-list resolution.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use log::{debug, trace, warn};

use crate::attribute_list::{self, AttributeListEntry};
use crate::cluster_stream::ClusterStream;
use crate::error::{NtfsError, Result};
use crate::fixup;
use crate::mft_entry::{FileReference, MftEntry};
use crate::volume::Volume;

struct EntryCache {
    entries: HashMap<u64, Arc<MftEntry>>,
    order: VecDeque<u64>,
    capacity: usize,
}

impl EntryCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, index: u64) -> Option<Arc<MftEntry>> {
        self.entries.get(&index).cloned()
    }

    fn insert(&mut self, index: u64, entry: Arc<MftEntry>) {
        if !self.entries.contains_key(&index) {
            self.order.push_back(index);
            while self.order.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.entries.remove(&evicted);
                    trace!("evicted MFT entry {} from cache", evicted);
                }
            }
        }
        self.entries.insert(index, entry);
    }
}

/// The Master File Table, addressable by entry index.
pub struct Mft {
    volume: Arc<Volume>,
    data_stream: ClusterStream,
    entry_size: u32,
    cache: RwLock<EntryCache>,
}

impl Mft {
    /// Bootstraps the MFT: reads entry #0 directly via the boot sector's
    /// absolute MFT start LCN (it has no other description of its own
    /// layout yet), then builds a `ClusterStream` from its own $DATA
    /// attribute's data runs for every subsequent read.
    pub fn bootstrap(volume: Arc<Volume>, cache_capacity: usize) -> Result<Self> {
        let geometry = volume.geometry();
        let bootstrap_offset = geometry.cluster_to_offset(geometry.mft_start_lcn);
        let raw = volume
            .reader()
            .read_at(bootstrap_offset, geometry.mft_entry_size as usize)?;
        let fixed = fixup::read_fixed_up(raw, bootstrap_offset, geometry.bytes_per_sector)?;
        let entry0 = MftEntry::parse(0, geometry.mft_entry_size, &fixed)?;

        let data_attr = entry0
            .find_unnamed_data()
            .ok_or_else(|| NtfsError::invalid_record("MFT entry #0 has no $DATA attribute"))?;

        let data_stream = ClusterStream::new(
            volume.reader().clone(),
            data_attr.merged_runs(),
            geometry.cluster_size,
            data_attr.data_size(),
            data_attr.valid_data_size(),
        );

        debug!(
            "bootstrapped $MFT: {} bytes of entry data, entry_size={}",
            data_stream.size(),
            geometry.mft_entry_size
        );

        let mft = Self {
            volume,
            data_stream,
            entry_size: geometry.mft_entry_size,
            cache: RwLock::new(EntryCache::new(cache_capacity)),
        };
        mft.cache
            .write()
            .expect("mft cache lock poisoned")
            .insert(0, Arc::new(entry0));
        Ok(mft)
    }

    pub fn number_of_entries(&self) -> u64 {
        self.data_stream.size() / self.entry_size as u64
    }

    fn byte_range_of(&self, index: u64) -> Result<(u64, usize)> {
        if index >= self.number_of_entries() {
            return Err(NtfsError::out_of_bounds(
                "mft index",
                format!("{} >= {} entries", index, self.number_of_entries()),
            ));
        }
        Ok((index * self.entry_size as u64, self.entry_size as usize))
    }

    /// Reads and parses entry `index` fresh, bypassing the cache.
    pub fn entry_uncached(&self, index: u64) -> Result<MftEntry> {
        let (offset, len) = self.byte_range_of(index)?;
        let raw = self.data_stream.read_at(offset, len)?;
        let fixed = fixup::read_fixed_up(raw, offset, self.volume.geometry().bytes_per_sector)?;
        let mut entry = MftEntry::parse(index, self.entry_size, &fixed)?;
        self.resolve_attribute_list(&mut entry)?;
        Ok(entry)
    }

    /// Reads entry `index`, serving from the cache when present.
    pub fn entry(&self, index: u64) -> Result<Arc<MftEntry>> {
        if let Some(cached) = self.cache.read().expect("mft cache lock poisoned").get(index) {
            return Ok(cached);
        }
        let entry = Arc::new(self.entry_uncached(index)?);
        self.cache
            .write()
            .expect("mft cache lock poisoned")
            .insert(index, entry.clone());
        Ok(entry)
    }

    /// Resolves the entry a `FileReference` points to, validating that
    /// its sequence number matches.
    pub fn entry_by_reference(&self, reference: FileReference) -> Result<Arc<MftEntry>> {
        let entry = self.entry(reference.mft_index())?;
        if entry.sequence_number() != reference.sequence_number() {
            return Err(NtfsError::StaleReference {
                expected: reference.sequence_number(),
                found: entry.sequence_number(),
            });
        }
        Ok(entry)
    }

    /// If `entry` carries a non-empty $ATTRIBUTE_LIST, loads every
    /// referenced extension MFT entry and merges matching attributes
    /// into `entry`'s chains.
    fn resolve_attribute_list(&self, entry: &mut MftEntry) -> Result<()> {
        let Some(list_attr) = entry.attribute_list() else {
            return Ok(());
        };

        let list_bytes = if list_attr.is_resident() {
            list_attr.resident_data()?.to_vec()
        } else {
            let stream = ClusterStream::new(
                self.volume.reader().clone(),
                list_attr.merged_runs(),
                self.volume.geometry().cluster_size,
                list_attr.data_size(),
                list_attr.valid_data_size(),
            );
            stream.read_to_end()?
        };

        let descriptors = attribute_list::decode(&list_bytes)?;
        let base_index = entry.mft_index();

        for descriptor in &descriptors {
            if descriptor.base_file_reference.mft_index() == base_index {
                // Already present in the base record itself.
                continue;
            }
            self.merge_extension_attribute(entry, descriptor)?;
        }

        let declared_total = entry.total_size() as u64;
        let consumed: u64 = entry.attributes().iter().map(|a| a.allocated_size()).sum();
        if consumed > declared_total {
            return Err(NtfsError::invalid_record(format!(
                "attribute list merge for MFT entry {} exceeds declared total size: {} > {}",
                base_index, consumed, declared_total
            )));
        }
        Ok(())
    }

    fn merge_extension_attribute(
        &self,
        entry: &mut MftEntry,
        descriptor: &AttributeListEntry,
    ) -> Result<()> {
        let extension_index = descriptor.base_file_reference.mft_index();
        let extension = match self.entry(extension_index) {
            Ok(e) => e,
            Err(NtfsError::OutOfBounds { .. }) => {
                return Err(NtfsError::invalid_record(format!(
                    "attribute list references out-of-range MFT entry {}",
                    extension_index
                )))
            }
            Err(other) => return Err(other),
        };

        if extension.sequence_number() != descriptor.base_file_reference.sequence_number() {
            warn!(
                "attribute list entry for extension {} has stale sequence number; treating attribute as absent",
                extension_index
            );
            return Ok(());
        }

        let Some(found) = extension
            .attributes()
            .iter()
            .find(|a| a.type_code() == descriptor.type_code && a.name() == descriptor.name.as_deref())
            .cloned()
        else {
            return Ok(());
        };

        match entry.find_attribute_mut(descriptor.type_code, descriptor.name.as_deref()) {
            Some(head) => {
                head.append_to_chain(found)?;
            }
            None => {
                entry.attributes_mut().push(found);
            }
        }
        Ok(())
    }

    pub fn unnamed_data_stream(&self, entry: &MftEntry) -> Option<ClusterStream> {
        let attr = entry.find_unnamed_data()?;
        if attr.is_resident() {
            return None;
        }
        Some(ClusterStream::new(
            self.volume.reader().clone(),
            attr.merged_runs(),
            self.volume.geometry().cluster_size,
            attr.data_size(),
            attr.valid_data_size(),
        ))
    }

    pub fn named_stream(&self, entry: &MftEntry, type_code: u32, name: Option<&str>) -> Option<ClusterStream> {
        let attr = entry.find_attribute(type_code, name)?;
        if attr.is_resident() {
            return None;
        }
        Some(ClusterStream::new(
            self.volume.reader().clone(),
            attr.merged_runs(),
            self.volume.geometry().cluster_size,
            attr.data_size(),
            attr.valid_data_size(),
        ))
    }

    pub fn volume(&self) -> &Arc<Volume> {
        &self.volume
    }
}
