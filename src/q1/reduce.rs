//! The reduce phase: merging partial tables into the final report.
//!
//! Merging is an element-wise sum per group key, so it is associative and
//! commutative. The three entry points below differ only in how they
//! schedule the merges; for the same inputs they build the same report
//! (up to floating point summation order).

use crate::error::{Error, Result};
use crate::partition::{partition_of, NumPartitions, PartitionedRow, PartitionedRows};
use crate::q1::{PartialRow, PartialTable, Report};
use dashmap::DashMap;
use rayon::prelude::*;
use tracing::debug;

type BucketIndex = u32;
type Buckets = DashMap<BucketIndex, Vec<PartialRow>>;

/// Derives averages for every group of a fully merged table.
pub fn finalize(table: PartialTable) -> Result<Report> {
    let rows = table
        .into_iter()
        .map(|row| row.agg.finalize(row.key))
        .collect::<Result<Vec<_>>>()?;
    Ok(Report::new(rows))
}

/// Folds a flat sequence of partial rows into one table.
pub fn merge_rows<I>(rows: I) -> PartialTable
where
    I: IntoIterator<Item = PartialRow>,
{
    rows.into_iter().collect()
}

/// Collect-then-reduce: every partial table of the job is folded into one
/// accumulator per key before averages are derived.
pub fn reduce<I>(tables: I) -> Result<Report>
where
    I: IntoIterator<Item = PartialTable>,
{
    let mut n_tables = 0usize;
    let merged = merge_rows(tables.into_iter().flat_map(|t| {
        n_tables += 1;
        t.into_iter()
    }));
    debug!(tables = n_tables, groups = merged.len(), "merged partial tables");
    finalize(merged)
}

/// Merges tables pairwise, level by level, until one remains.
pub fn tree_merge(mut tables: Vec<PartialTable>) -> PartialTable {
    while tables.len() > 1 {
        let mut next = Vec::with_capacity(tables.len().div_ceil(2));
        let mut level = tables.into_iter();
        while let Some(mut left) = level.next() {
            if let Some(right) = level.next() {
                left.merge(&right);
            }
            next.push(left);
        }
        tables = next;
    }
    tables.pop().unwrap_or_default()
}

/// Tree reduction followed by averaging.
pub fn tree_reduce(tables: Vec<PartialTable>) -> Result<Report> {
    finalize(tree_merge(tables))
}

/// Adds tagged rows to the bucket of the partition their key hashes to.
/// The stored tag is ignored.
fn fill_buckets<I>(buckets: &Buckets, rows: I, n: NumPartitions)
where
    I: IntoIterator<Item = PartitionedRow>,
{
    for tagged in rows {
        #[allow(clippy::unwrap_or_default)]
        buckets
            .entry(partition_of(&tagged.row.key, n))
            .or_insert(Vec::new())
            .push(tagged.row);
    }
}

/// Partition-scoped reduce. Rows are bucketed by their output partition;
/// since a key always maps to the same partition, each bucket is merged
/// and finalized on its own, in parallel, and the results concatenated.
///
/// All inputs must have been partitioned with the same partition count.
pub fn reduce_by_partition<I>(outputs: I) -> Result<Report>
where
    I: IntoIterator<Item = PartitionedRows>,
{
    let buckets = Buckets::new();
    let mut expected = None;
    for parts in outputs {
        let n = parts.num_partitions();
        match expected {
            None => expected = Some(n),
            Some(e) if e != n => {
                return Err(Error::PartitionMismatch {
                    expected: e.get(),
                    found: n.get(),
                })
            }
            Some(_) => {}
        }
        fill_buckets(&buckets, parts.into_rows(), n);
    }
    reduce_buckets(buckets)
}

fn reduce_buckets(buckets: Buckets) -> Result<Report> {
    let reduced = buckets
        .into_par_iter()
        .map(|(partition, bucket)| {
            let merged = merge_rows(bucket);
            debug!(partition, groups = merged.len(), "reduced partition");
            finalize(merged).map(|report| report.rows().to_vec())
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Report::new(reduced.concat()))
}
