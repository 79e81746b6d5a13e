//! `CompressionUnitPlan`: groups consecutive data runs into compression
//! units and classifies each.

use crate::data_runs::DataRunList;

/// One contiguous run of present clusters backing part of a compressed
/// unit's on-disk payload.
#[derive(Debug, Clone, Copy)]
pub struct PresentExtent {
    pub lcn: u64,
    pub length: u64,
}

/// Classification of one compression unit's on-disk layout.
#[derive(Debug, Clone)]
pub enum UnitKind {
    /// Every cluster in the unit is present; `present_extents` covers the
    /// whole nominal range and can be read directly, no decompression.
    Uncompressed { present_extents: Vec<PresentExtent> },
    /// The whole unit is sparse; reads yield zero bytes.
    Sparse,
    /// A present prefix (the listed extents, in on-disk order) holds an
    /// LZNT1 payload that expands to exactly
    /// `nominal_cluster_count * cluster_size` bytes.
    Compressed {
        present_extents: Vec<PresentExtent>,
        present_clusters: u64,
    },
}

/// One fixed-size (except possibly the last) group of clusters over
/// which LZNT1 compression is applied as a unit.
#[derive(Debug, Clone)]
pub struct CompressionUnit {
    pub unit_index: u64,
    pub first_vcn: u64,
    pub nominal_cluster_count: u64,
    pub kind: UnitKind,
}

/// The full plan for a non-resident, compressed attribute: every
/// compression unit covering `[0, allocated_size)`.
#[derive(Debug, Clone)]
pub struct CompressionUnitPlan {
    units: Vec<CompressionUnit>,
    unit_size_clusters: u64,
}

impl CompressionUnitPlan {
    pub fn build(runs: &DataRunList, allocated_clusters: u64, unit_size_clusters: u64) -> Self {
        let mut units = Vec::new();
        let mut unit_start = 0u64;
        let mut unit_index = 0u64;

        while unit_start < allocated_clusters {
            let unit_end = (unit_start + unit_size_clusters).min(allocated_clusters);
            let mut present_clusters = 0u64;
            let mut sparse_clusters = 0u64;
            let mut present_extents = Vec::new();
            let mut vcn = unit_start;

            while vcn < unit_end {
                match runs.locate(vcn) {
                    Some((run, offset_in_run)) => {
                        let available = (run.length - offset_in_run).min(unit_end - vcn);
                        if run.is_sparse() {
                            sparse_clusters += available;
                        } else {
                            let lcn = run.lcn.expect("checked not sparse") + offset_in_run;
                            present_clusters += available;
                            present_extents.push(PresentExtent {
                                lcn,
                                length: available,
                            });
                        }
                        vcn += available;
                    }
                    None => {
                        // Beyond the declared run list: implicit sparse
                        // shortfall for a trailing short unit.
                        sparse_clusters += unit_end - vcn;
                        vcn = unit_end;
                    }
                }
            }

            let kind = if sparse_clusters == 0 {
                UnitKind::Uncompressed { present_extents }
            } else if present_clusters == 0 {
                UnitKind::Sparse
            } else {
                UnitKind::Compressed {
                    present_extents,
                    present_clusters,
                }
            };

            units.push(CompressionUnit {
                unit_index,
                first_vcn: unit_start,
                nominal_cluster_count: unit_end - unit_start,
                kind,
            });

            unit_start = unit_end;
            unit_index += 1;
        }

        Self {
            units,
            unit_size_clusters,
        }
    }

    pub fn units(&self) -> &[CompressionUnit] {
        &self.units
    }

    pub fn unit_size_clusters(&self) -> u64 {
        self.unit_size_clusters
    }

    pub fn unit_containing_vcn(&self, vcn: u64) -> Option<&CompressionUnit> {
        let index = (vcn / self.unit_size_clusters) as usize;
        self.units.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_uncompressed_unit() {
        let data = vec![0x21, 0x10, 0x00, 0x01, 0x00]; // 16 clusters at LCN 256
        let runs = DataRunList::decode(&data, 0).unwrap();
        let plan = CompressionUnitPlan::build(&runs, 16, 16);
        assert_eq!(plan.units().len(), 1);
        assert!(matches!(plan.units()[0].kind, UnitKind::Uncompressed { .. }));
    }

    #[test]
    fn classifies_sparse_unit() {
        let data = vec![0x01, 0x10, 0x00]; // sparse, 16 clusters
        let runs = DataRunList::decode(&data, 0).unwrap();
        let plan = CompressionUnitPlan::build(&runs, 16, 16);
        assert!(matches!(plan.units()[0].kind, UnitKind::Sparse));
    }

    #[test]
    fn classifies_compressed_unit_with_trailing_sparse() {
        // S4 scenario: 5 present clusters then 11 sparse, unit size 16.
        let mut data = vec![0x21, 0x05, 0xF4, 0x01]; // 5 clusters at LCN 500
        data.extend([0x01, 0x0B]); // sparse, 11 clusters
        data.push(0x00);
        let runs = DataRunList::decode(&data, 0).unwrap();
        let plan = CompressionUnitPlan::build(&runs, 16, 16);
        assert_eq!(plan.units().len(), 1);
        match &plan.units()[0].kind {
            UnitKind::Compressed {
                present_clusters, ..
            } => assert_eq!(*present_clusters, 5),
            other => panic!("expected compressed, got {:?}", other),
        }
    }

    #[test]
    fn shortens_trailing_unit_when_allocation_not_a_multiple() {
        let data = vec![0x21, 0x15, 0x00, 0x01, 0x00]; // 21 clusters present
        let runs = DataRunList::decode(&data, 0).unwrap();
        let plan = CompressionUnitPlan::build(&runs, 21, 16);
        assert_eq!(plan.units().len(), 2);
        assert_eq!(plan.units()[1].nominal_cluster_count, 5);
        assert!(matches!(plan.units()[1].kind, UnitKind::Uncompressed { .. }));
    }
}
