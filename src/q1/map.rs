//! The map phase: partial aggregation of one shard.

use crate::error::Result;
use crate::partition::{NumPartitions, PartitionedRows};
use crate::q1::PartialTable;
use crate::reader;
use crate::Record;
use arrow::record_batch::RecordBatch;
use tracing::{debug, warn};

/// Streams records of a single shard into a [`PartialTable`].
///
/// Only sums and counts are kept; averages are left to the reducer.
#[derive(Debug, Default)]
pub struct PartialAggregator {
    table: PartialTable,
    records: u64,
}

impl PartialAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rec: &Record) {
        self.table.update(rec);
        self.records += 1;
    }

    /// Decodes `batch` as `lineitem` rows and folds them in.
    pub fn push_batch(&mut self, batch: &RecordBatch) -> Result<()> {
        for rec in reader::records_from_batch(batch)? {
            self.push(&rec);
        }
        Ok(())
    }

    /// Number of records seen so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn finish(self) -> PartialTable {
        debug!(
            records = self.records,
            groups = self.table.len(),
            "partial aggregation finished"
        );
        self.table
    }
}

/// Aggregates a whole shard at once.
pub fn aggregate_shard<'a, I>(records: I) -> PartialTable
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut agg = PartialAggregator::new();
    for rec in records {
        agg.push(rec);
    }
    agg.finish()
}

/// The result of mapping one shard: its partial table and the same rows
/// laid out by output partition.
#[derive(Clone, Debug, PartialEq)]
pub struct ShardOutput {
    pub table: PartialTable,
    pub partitions: PartitionedRows,
}

impl ShardOutput {
    pub fn new(table: PartialTable, n: NumPartitions) -> Self {
        let partitions = PartitionedRows::new(&table, n);
        Self { table, partitions }
    }

    /// True when the shard produced no groups at all. Every row group of
    /// such an output is [`crate::RowGroup::Empty`].
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Aggregates a shard and assigns output partitions to its groups.
pub fn map_shard<'a, I>(records: I, n: NumPartitions) -> ShardOutput
where
    I: IntoIterator<Item = &'a Record>,
{
    let out = ShardOutput::new(aggregate_shard(records), n);
    if out.is_empty() {
        warn!("shard produced no groups");
    }
    out
}
