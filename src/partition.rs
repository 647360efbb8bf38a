//! Output partitioning of partial tables.
//!
//! Every group key is assigned to one of `n` output partitions by a fixed
//! hash, so the same key lands in the same partition no matter which shard
//! produced it. Rows of a partial table are then laid out in partition
//! order, one contiguous range (row group) per partition.

use crate::error::{Error, Result};
use crate::q1::{PartialRow, PartialTable};
use crate::GroupKey;
use std::hash::Hasher;
use std::ops::Range;

/// A validated number of output partitions, in `1..=u32::MAX`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NumPartitions(u32);

impl NumPartitions {
    pub fn new(n: usize) -> Result<Self> {
        match u32::try_from(n) {
            Ok(n) if n > 0 => Ok(Self(n)),
            _ => Err(Error::InvalidPartitionCount(n)),
        }
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Partition ids, in order.
    pub fn ids(self) -> Range<u32> {
        0..self.0
    }
}

impl TryFrom<usize> for NumPartitions {
    type Error = Error;

    fn try_from(n: usize) -> Result<Self> {
        Self::new(n)
    }
}

/// Hashes a group key with 64-bit FNV-1a (standard offset basis) over the
/// UTF-8 bytes of `returnflag` then `linestatus`, keeping the low 31 bits.
/// The value depends only on the key.
pub fn key_hash(key: &GroupKey) -> u32 {
    let mut buf = [0u8; 8];
    let mut hasher = fnv::FnvHasher::default();
    let (flag, rest) = buf.split_at_mut(4);
    hasher.write(key.returnflag.encode_utf8(flag).as_bytes());
    hasher.write(key.linestatus.encode_utf8(rest).as_bytes());
    (hasher.finish() & 0x7fff_ffff) as u32
}

/// The output partition of `key`.
#[inline]
pub fn partition_of(key: &GroupKey, n: NumPartitions) -> u32 {
    key_hash(key) % n.get()
}

/// Like [`partition_of`], validating the partition count first.
pub fn partition_for(key: &GroupKey, n: usize) -> Result<u32> {
    Ok(partition_of(key, NumPartitions::new(n)?))
}

/// A partial row tagged with its output partition.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PartitionedRow {
    pub partition: u32,
    pub row: PartialRow,
}

/// The contiguous range of rows belonging to one partition.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RowGroup<'a> {
    /// No rows for this partition. `offset` is where the partition would
    /// start, which coincides with the start of the next non-empty one.
    Empty { offset: usize },
    Rows(&'a [PartitionedRow]),
}

impl<'a> RowGroup<'a> {
    pub fn is_empty(&self) -> bool {
        matches!(self, RowGroup::Empty { .. })
    }

    /// The rows of this group; empty for [`RowGroup::Empty`].
    pub fn rows(&self) -> &'a [PartitionedRow] {
        match *self {
            RowGroup::Empty { .. } => &[],
            RowGroup::Rows(rows) => rows,
        }
    }
}

/// Partial rows sorted by partition id, with the start offset of every
/// partition.
#[derive(Clone, Debug, PartialEq)]
pub struct PartitionedRows {
    num_partitions: NumPartitions,
    rows: Vec<PartitionedRow>,
    offsets: Vec<usize>,
}

impl PartitionedRows {
    /// Tags every row of `table` with its partition and sorts by partition.
    /// The sort is stable, so rows within a partition keep key order.
    pub fn new(table: &PartialTable, n: NumPartitions) -> Self {
        let mut rows = table
            .rows()
            .map(|row| PartitionedRow {
                partition: partition_of(&row.key, n),
                row,
            })
            .collect::<Vec<_>>();
        rows.sort_by_key(|r| r.partition);
        Self::with_offsets(rows, n)
    }

    /// Wraps rows that are already sorted by partition, computing offsets.
    ///
    /// Every row must carry the partition its key hashes to under `n`,
    /// otherwise a key could be reduced in two places.
    pub fn from_sorted(rows: Vec<PartitionedRow>, n: NumPartitions) -> Result<Self> {
        for tagged in &rows {
            let expected = partition_of(&tagged.row.key, n);
            if tagged.partition != expected {
                return Err(Error::MisplacedRow {
                    key: tagged.row.key,
                    found: tagged.partition,
                    expected,
                });
            }
        }
        if !rows.windows(2).all(|w| w[0].partition <= w[1].partition) {
            return Err(Error::UnsortedPartitions);
        }
        Ok(Self::with_offsets(rows, n))
    }

    fn with_offsets(rows: Vec<PartitionedRow>, n: NumPartitions) -> Self {
        let offsets = partition_offsets(&rows, n);
        Self {
            num_partitions: n,
            rows,
            offsets,
        }
    }

    pub fn num_partitions(&self) -> NumPartitions {
        self.num_partitions
    }

    pub fn rows(&self) -> &[PartitionedRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<PartitionedRow> {
        self.rows
    }

    /// Start offset of each partition id, `offsets()[p]` for `p` in `0..n`.
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row range of partition `p`; empty if the partition holds no rows or
    /// `p` is out of range.
    pub fn range(&self, p: u32) -> Range<usize> {
        let p = p as usize;
        match self.offsets.get(p) {
            Some(&start) => {
                let end = self.offsets.get(p + 1).copied().unwrap_or(self.rows.len());
                start..end
            }
            None => self.rows.len()..self.rows.len(),
        }
    }

    /// The row group of partition `p`.
    pub fn row_group(&self, p: u32) -> RowGroup<'_> {
        let range = self.range(p);
        if range.is_empty() {
            RowGroup::Empty {
                offset: range.start,
            }
        } else {
            RowGroup::Rows(&self.rows[range])
        }
    }

    /// Non-empty row groups in partition order, paired with their id.
    pub fn row_groups(&self) -> impl Iterator<Item = (u32, &[PartitionedRow])> + '_ {
        self.rows
            .chunk_by(|a, b| a.partition == b.partition)
            .map(|rows| (rows[0].partition, rows))
    }
}

/// Leftmost insertion point of every partition id in `rows`.
fn partition_offsets(rows: &[PartitionedRow], n: NumPartitions) -> Vec<usize> {
    n.ids()
        .map(|p| rows.partition_point(|r| r.partition < p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Record;

    fn table(keys: &[(char, char)]) -> PartialTable {
        let mut table = PartialTable::new();
        for &(r, l) in keys {
            table.update(&Record::new(r, l, 1.0, 1.0, 0.0, 0.0));
        }
        table
    }

    #[test]
    fn zero_partitions_rejected() {
        assert!(matches!(
            NumPartitions::new(0),
            Err(Error::InvalidPartitionCount(0))
        ));
        assert!(partition_for(&GroupKey::new('A', 'F'), 0).is_err());
        assert!(NumPartitions::new(usize::MAX).is_err());
    }

    #[test]
    fn partition_is_stable_and_in_range() {
        let key = GroupKey::new('N', 'O');
        let n = NumPartitions::new(7).unwrap();
        let p = partition_of(&key, n);
        assert!(p < 7);
        assert_eq!(p, partition_of(&key, n));
        assert_eq!(p, partition_for(&key, 7).unwrap());
        assert_eq!(partition_for(&key, 1).unwrap(), 0);
    }

    #[test]
    fn known_hash_value() {
        // FNV-1a of b"AF"
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for b in b"AF" {
            h ^= u64::from(*b);
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
        }
        assert_eq!(key_hash(&GroupKey::new('A', 'F')), (h & 0x7fff_ffff) as u32);
    }

    #[test]
    fn rows_sorted_by_partition_with_offsets() {
        let n = NumPartitions::new(3).unwrap();
        let parts = PartitionedRows::new(&table(&[('A', 'F'), ('N', 'F'), ('N', 'O'), ('R', 'F')]), n);

        assert_eq!(parts.rows().len(), 4);
        assert_eq!(parts.offsets().len(), 3);
        assert!(parts
            .rows()
            .windows(2)
            .all(|w| w[0].partition < w[1].partition
                || (w[0].partition == w[1].partition && w[0].row.key < w[1].row.key)));

        let mut seen = 0;
        for p in n.ids() {
            for r in parts.row_group(p).rows() {
                assert_eq!(r.partition, p);
                seen += 1;
            }
        }
        assert_eq!(seen, 4);
    }

    #[test]
    fn empty_partitions_are_explicit() {
        // One key can fill at most one of many partitions.
        let n = NumPartitions::new(16).unwrap();
        let parts = PartitionedRows::new(&table(&[('R', 'F')]), n);
        let target = partition_of(&GroupKey::new('R', 'F'), n);

        for p in n.ids() {
            let group = parts.row_group(p);
            if p == target {
                assert_eq!(group.rows().len(), 1);
            } else {
                assert!(group.is_empty());
                let RowGroup::Empty { offset } = group else {
                    unreachable!()
                };
                assert_eq!(offset, if p < target { 0 } else { 1 });
            }
        }
        assert_eq!(parts.row_groups().count(), 1);
        assert!(parts.row_group(99).is_empty());
    }

    #[test]
    fn empty_table_has_all_degenerate_offsets() {
        let n = NumPartitions::new(4).unwrap();
        let parts = PartitionedRows::new(&PartialTable::new(), n);
        assert!(parts.is_empty());
        assert_eq!(parts.offsets(), &[0, 0, 0, 0]);
        assert!(n.ids().all(|p| parts.row_group(p).is_empty()));
    }

    #[test]
    fn offsets_are_idempotent() {
        let n = NumPartitions::new(5).unwrap();
        let parts = PartitionedRows::new(&table(&[('A', 'F'), ('N', 'F'), ('N', 'O'), ('R', 'F')]), n);
        let again = PartitionedRows::from_sorted(parts.rows().to_vec(), n).unwrap();
        assert_eq!(again.offsets(), parts.offsets());
        assert_eq!(again, parts);
    }

    fn tagged(r: char, l: char, partition: u32) -> PartitionedRow {
        let rec = Record::new(r, l, 1.0, 1.0, 0.0, 0.0);
        let mut agg = crate::q1::PartialAggregate::zero();
        agg.update(&rec);
        PartitionedRow {
            partition,
            row: PartialRow { key: rec.key(), agg },
        }
    }

    #[test]
    fn out_of_range_tag_rejected() {
        let n = NumPartitions::new(2).unwrap();
        let af = partition_of(&GroupKey::new('A', 'F'), n);
        let rows = vec![tagged('A', 'F', af), tagged('N', 'O', 5)];
        assert!(matches!(
            PartitionedRows::from_sorted(rows, n),
            Err(Error::MisplacedRow { found: 5, .. })
        ));
    }

    #[test]
    fn tag_must_match_key_hash() {
        let n = NumPartitions::new(2).unwrap();
        let key = GroupKey::new('A', 'F');
        let right = partition_of(&key, n);
        let wrong = 1 - right;

        assert!(PartitionedRows::from_sorted(vec![tagged('A', 'F', right)], n).is_ok());
        let err = PartitionedRows::from_sorted(vec![tagged('A', 'F', wrong)], n).unwrap_err();
        assert!(matches!(
            err,
            Error::MisplacedRow { key: k, found, expected } if k == key && found == wrong && expected == right
        ));
    }

    #[test]
    fn unsorted_rows_rejected() {
        // find two keys in different partitions
        let n = NumPartitions::new(4).unwrap();
        let keys = [('A', 'F'), ('N', 'F'), ('N', 'O'), ('R', 'F'), ('A', 'O'), ('R', 'O')];
        let mut rows = keys
            .iter()
            .map(|&(r, l)| tagged(r, l, partition_of(&GroupKey::new(r, l), n)))
            .collect::<Vec<_>>();
        rows.sort_by_key(|r| std::cmp::Reverse(r.partition));
        assert_ne!(rows.first().unwrap().partition, rows.last().unwrap().partition);
        assert!(matches!(
            PartitionedRows::from_sorted(rows, n),
            Err(Error::UnsortedPartitions)
        ));
    }
}
