//! Aggregate types for the pricing summary report.
//!
//! A [`PartialAggregate`] carries only sums and a count, so that any number
//! of them can be merged in any order. Averages exist only on
//! [`MergedAggregate`], which is produced once every partial has been
//! folded in.

use crate::error::{Error, Result};
use crate::{GroupKey, Record};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod map;
pub mod reduce;

/////////////////////////////////////////////////////////////////////////////
// Accumulator
/////////////////////////////////////////////////////////////////////////////

/// Running sums and count for one group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialAggregate {
    pub sum_qty: f64,
    pub sum_base_price: f64,
    pub sum_disc_price: f64,
    pub sum_charge: f64,
    pub sum_discount: f64,
    pub count: u64,
}

impl PartialAggregate {
    /// The identity of [`PartialAggregate::merge`].
    pub const fn zero() -> Self {
        Self {
            sum_qty: 0.0,
            sum_base_price: 0.0,
            sum_disc_price: 0.0,
            sum_charge: 0.0,
            sum_discount: 0.0,
            count: 0,
        }
    }

    /// Fold a single record into the sums.
    #[inline]
    pub fn update(&mut self, rec: &Record) {
        let disc_price = rec.disc_price();
        self.sum_qty += rec.quantity;
        self.sum_base_price += rec.extended_price;
        self.sum_disc_price += disc_price;
        self.sum_charge += rec.charge();
        self.sum_discount += rec.discount;
        self.count += 1;
    }

    /// Element-wise sum of two partials for the same group.
    #[inline]
    pub fn merge(&mut self, other: &PartialAggregate) {
        self.sum_qty += other.sum_qty;
        self.sum_base_price += other.sum_base_price;
        self.sum_disc_price += other.sum_disc_price;
        self.sum_charge += other.sum_charge;
        self.sum_discount += other.sum_discount;
        self.count += other.count;
    }

    /// Derive the averages for `key` from the merged totals.
    pub fn finalize(self, key: GroupKey) -> Result<MergedAggregate> {
        if self.count == 0 {
            return Err(Error::DegenerateDivision { key });
        }
        let n = self.count as f64;
        Ok(MergedAggregate {
            key,
            sum_qty: self.sum_qty,
            sum_base_price: self.sum_base_price,
            sum_disc_price: self.sum_disc_price,
            sum_charge: self.sum_charge,
            sum_discount: self.sum_discount,
            count: self.count,
            avg_qty: self.sum_qty / n,
            avg_price: self.sum_base_price / n,
            avg_discount: self.sum_discount / n,
        })
    }
}

/// A partial aggregate together with its group key; the unit that travels
/// from mappers to the reducer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartialRow {
    pub key: GroupKey,
    pub agg: PartialAggregate,
}

/////////////////////////////////////////////////////////////////////////////
// Partial tables
/////////////////////////////////////////////////////////////////////////////

/// One partial aggregate per group observed, kept in ascending key order.
///
/// An empty table is the valid result of a shard with no records.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartialTable {
    groups: BTreeMap<GroupKey, PartialAggregate>,
}

impl PartialTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of groups in the table.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, key: &GroupKey) -> Option<&PartialAggregate> {
        self.groups.get(key)
    }

    /// Add one record to its group, creating the group at zero if needed.
    pub fn update(&mut self, rec: &Record) {
        self.groups
            .entry(rec.key())
            .or_insert_with(PartialAggregate::zero)
            .update(rec);
    }

    /// Fold one partial row into the table.
    pub fn insert_row(&mut self, row: &PartialRow) {
        self.groups
            .entry(row.key)
            .or_insert_with(PartialAggregate::zero)
            .merge(&row.agg);
    }

    /// Fold every group of `other` into `self`.
    pub fn merge(&mut self, other: &PartialTable) {
        for row in other.rows() {
            self.insert_row(&row);
        }
    }

    /// Rows in ascending key order.
    pub fn rows(&self) -> impl Iterator<Item = PartialRow> + '_ {
        self.groups
            .iter()
            .map(|(key, agg)| PartialRow { key: *key, agg: *agg })
    }
}

impl FromIterator<PartialRow> for PartialTable {
    fn from_iter<I: IntoIterator<Item = PartialRow>>(iter: I) -> Self {
        let mut table = PartialTable::new();
        for row in iter {
            table.insert_row(&row);
        }
        table
    }
}

impl IntoIterator for PartialTable {
    type Item = PartialRow;
    type IntoIter = Box<dyn Iterator<Item = PartialRow>>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(
            self.groups
                .into_iter()
                .map(|(key, agg)| PartialRow { key, agg }),
        )
    }
}

/////////////////////////////////////////////////////////////////////////////
// Final report
/////////////////////////////////////////////////////////////////////////////

/// One row of the final report.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergedAggregate {
    pub key: GroupKey,
    pub sum_qty: f64,
    pub sum_base_price: f64,
    pub sum_disc_price: f64,
    pub sum_charge: f64,
    pub sum_discount: f64,
    pub count: u64,
    pub avg_qty: f64,
    pub avg_price: f64,
    pub avg_discount: f64,
}

/// The merged report, sorted by group key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    rows: Vec<MergedAggregate>,
}

impl Report {
    /// Builds a report, sorting the rows by key.
    pub fn new(mut rows: Vec<MergedAggregate>) -> Self {
        rows.sort_by_key(|row| row.key);
        Self { rows }
    }

    pub fn rows(&self) -> &[MergedAggregate] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &GroupKey) -> Option<&MergedAggregate> {
        self.rows
            .binary_search_by_key(key, |row| row.key)
            .ok()
            .map(|i| &self.rows[i])
    }
}

const REPORT_HEADER: [&str; 10] = [
    "l_returnflag",
    "l_linestatus",
    "sum_qty",
    "sum_base_price",
    "sum_disc_price",
    "sum_charge",
    "avg_qty",
    "avg_price",
    "avg_disc",
    "count_order",
];

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}",
            REPORT_HEADER.iter().map(|h| format!("{h:>16}")).join(" ")
        )?;
        for row in &self.rows {
            writeln!(
                f,
                "{:>16} {:>16} {:>16.2} {:>16.2} {:>16.2} {:>16.2} {:>16.4} {:>16.4} {:>16.4} {:>16}",
                row.key.returnflag,
                row.key.linestatus,
                row.sum_qty,
                row.sum_base_price,
                row.sum_disc_price,
                row.sum_charge,
                row.avg_qty,
                row.avg_price,
                row.avg_discount,
                row.count,
            )?;
        }
        Ok(())
    }
}
