//! `ClusterStream`: a byte-addressable stream over a non-resident
//! attribute's data runs, with sparse-region support.

use std::sync::{Arc, Mutex};

use crate::block::BlockReader;
use crate::data_runs::DataRunList;
use crate::error::Result;

/// A read-only, seekable byte stream over one non-resident attribute
/// chain's logical data. Cheap to clone: the data-run list and reader
/// handle are shared.
#[derive(Clone)]
pub struct ClusterStream {
    reader: Arc<dyn BlockReader>,
    runs: Arc<DataRunList>,
    cluster_size: u32,
    data_size: u64,
    valid_data_size: u64,
    position: Arc<Mutex<u64>>,
}

impl ClusterStream {
    pub fn new(
        reader: Arc<dyn BlockReader>,
        runs: DataRunList,
        cluster_size: u32,
        data_size: u64,
        valid_data_size: u64,
    ) -> Self {
        Self {
            reader,
            runs: Arc::new(runs),
            cluster_size,
            data_size,
            valid_data_size,
            position: Arc::new(Mutex::new(0)),
        }
    }

    pub fn size(&self) -> u64 {
        self.data_size
    }

    pub fn seek(&self, offset: u64) {
        *self.position.lock().expect("cluster stream mutex poisoned") = offset;
    }

    pub fn position(&self) -> u64 {
        *self.position.lock().expect("cluster stream mutex poisoned")
    }

    /// Reads `len` bytes at the current position and advances it. This is
    /// the stateful half of the stream; it is not safe to call
    /// concurrently from multiple threads sharing one `ClusterStream`
    /// handle — use `read_at` for that.
    pub fn read(&self, len: usize) -> Result<Vec<u8>> {
        let pos = self.position();
        let data = self.read_at(pos, len)?;
        self.seek(pos + data.len() as u64);
        Ok(data)
    }

    /// Stateless read: never touches `position`, safe to call from
    /// multiple threads concurrently over the same stream.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        let mut produced = 0usize;
        let mut cursor = offset;

        while produced < len {
            if cursor >= self.data_size {
                break;
            }
            let remaining_in_stream = (self.data_size - cursor) as usize;
            let want = (len - produced).min(remaining_in_stream);

            let vcn = cursor / self.cluster_size as u64;
            let in_cluster_offset = cursor % self.cluster_size as u64;

            let chunk = match self.runs.locate(vcn) {
                None => {
                    // Beyond the last run: treated as implicit sparse so
                    // long as it is still inside data_size (can legally
                    // happen when allocated_size rounds up past data_size
                    // is not representable here; defensive only).
                    let take = want.min(self.cluster_size as usize);
                    vec![0u8; take]
                }
                Some((run, offset_in_run)) => {
                    let bytes_left_in_run =
                        (run.length - offset_in_run) * self.cluster_size as u64 - in_cluster_offset;
                    let take = want.min(bytes_left_in_run as usize);

                    if cursor >= self.valid_data_size || run.is_sparse() {
                        vec![0u8; take]
                    } else {
                        let lcn = run.lcn.expect("checked not sparse above");
                        let byte_offset = lcn * self.cluster_size as u64
                            + offset_in_run * self.cluster_size as u64
                            + in_cluster_offset;
                        let valid_take = if cursor + take as u64 > self.valid_data_size {
                            (self.valid_data_size - cursor) as usize
                        } else {
                            take
                        };
                        let mut bytes = self.reader.read_at(byte_offset, valid_take)?;
                        if valid_take < take {
                            bytes.resize(take, 0);
                        }
                        bytes
                    }
                }
            };

            let n = chunk.len();
            out[produced..produced + n].copy_from_slice(&chunk);
            produced += n;
            cursor += n as u64;
            if n == 0 {
                break;
            }
        }

        out.truncate(produced);
        Ok(out)
    }

    pub fn read_to_end(&self) -> Result<Vec<u8>> {
        self.read_at(0, self.data_size as usize)
    }
}
