//! Shape partitioning of heterogeneous record batches.
//!
//! Records are grouped by their field-name set so every group renders as one
//! multi-row statement. Partition order is first-occurrence order of each
//! shape and records keep their input order inside a partition.

use std::collections::HashMap;

use crate::error::BatchError;
use crate::record::{Record, ShapeKey};
use crate::transport::TableRef;

/// Records sharing one shape, borrowed from the caller's batch.
#[derive(Debug, Clone)]
pub struct Partition<'a> {
    shape: ShapeKey,
    columns: Vec<String>,
    records: Vec<&'a Record>,
    positions: Vec<usize>,
}

impl<'a> Partition<'a> {
    fn seed(position: usize, record: &'a Record, shape: ShapeKey) -> Self {
        Self {
            shape,
            columns: record.field_names().map(str::to_string).collect(),
            records: vec![record],
            positions: vec![position],
        }
    }

    /// Column order, taken from the record that opened the partition.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[&'a Record] {
        &self.records
    }

    /// Input positions of the partition's records, in partition order.
    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    pub fn shape(&self) -> &ShapeKey {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Groups `records` into shape-homogeneous partitions.
///
/// Fails with [`BatchError::NoRecords`] on an empty batch.
pub fn partition_records<'a>(
    table: &TableRef,
    records: &'a [Record],
) -> Result<Vec<Partition<'a>>, BatchError> {
    if records.is_empty() {
        return Err(BatchError::NoRecords {
            table: table.to_string(),
        });
    }

    let mut partitions: Vec<Partition<'a>> = Vec::new();
    let mut by_shape: HashMap<ShapeKey, usize> = HashMap::new();
    for (position, record) in records.iter().enumerate() {
        let shape = record.shape_key();
        match by_shape.get(&shape) {
            Some(&slot) => {
                let partition = &mut partitions[slot];
                partition.records.push(record);
                partition.positions.push(position);
            }
            None => {
                by_shape.insert(shape.clone(), partitions.len());
                partitions.push(Partition::seed(position, record, shape));
            }
        }
    }
    Ok(partitions)
}
