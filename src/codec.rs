//! Columnar encoding of partial tables and reports.
//!
//! A mapper's output is written as one Parquet file with one row group per
//! non-empty output partition, in partition order. Empty partitions get no
//! row group at all; the file metadata lists which partition each row group
//! holds, so a reducer can fetch exactly the partition it owns.

use crate::error::{Error, Result};
use crate::partition::{PartitionedRow, PartitionedRows};
use crate::q1::{PartialAggregate, PartialRow, PartialTable, Report};
use crate::reader::{code_at, column_as, measure_at, LINESTATUS, RETURNFLAG};
use crate::GroupKey;
use arrow::array::{Array, ArrayRef, AsArray, Float64Array, StringArray, UInt32Array, UInt64Array};
use arrow::datatypes::{DataType, Field, Float64Type, Schema, SchemaRef, UInt64Type};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use parquet::file::reader::ChunkReader;
use parquet::format::KeyValue;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

pub const SUM_QTY: &str = "sum_qty";
pub const SUM_BASE_PRICE: &str = "sum_base_price";
pub const SUM_DISC_PRICE: &str = "sum_disc_price";
pub const SUM_CHARGE: &str = "sum_charge";
pub const SUM_DISCOUNT: &str = "sum_discount";
pub const COUNT_ORDER: &str = "count_order";
pub const PARTITION: &str = "partition";
pub const AVG_QTY: &str = "avg_qty";
pub const AVG_PRICE: &str = "avg_price";
pub const AVG_DISC: &str = "avg_disc";

const META_NUM_PARTITIONS: &str = "q1lite.num_partitions";
const META_ROW_GROUPS: &str = "q1lite.row_groups";

fn key_fields() -> Vec<Field> {
    vec![
        Field::new(RETURNFLAG, DataType::Utf8, false),
        Field::new(LINESTATUS, DataType::Utf8, false),
    ]
}

fn sum_fields() -> Vec<Field> {
    [SUM_QTY, SUM_BASE_PRICE, SUM_DISC_PRICE, SUM_CHARGE, SUM_DISCOUNT]
        .into_iter()
        .map(|name| Field::new(name, DataType::Float64, false))
        .collect()
}

/// Schema of a mapper's partial table.
pub fn partial_schema() -> SchemaRef {
    let mut fields = key_fields();
    fields.extend(sum_fields());
    fields.push(Field::new(COUNT_ORDER, DataType::UInt64, false));
    fields.push(Field::new(PARTITION, DataType::UInt32, false));
    Arc::new(Schema::new(fields))
}

/// Schema of the final report.
pub fn report_schema() -> SchemaRef {
    let mut fields = key_fields();
    fields.extend(sum_fields());
    fields.extend(
        [AVG_QTY, AVG_PRICE, AVG_DISC]
            .into_iter()
            .map(|name| Field::new(name, DataType::Float64, false)),
    );
    fields.push(Field::new(COUNT_ORDER, DataType::UInt64, false));
    Arc::new(Schema::new(fields))
}

fn writer_props(metadata: Option<Vec<KeyValue>>) -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_key_value_metadata(metadata)
        .build()
}

fn f64_column<T>(rows: &[T], f: impl Fn(&T) -> f64) -> ArrayRef {
    Arc::new(Float64Array::from_iter_values(rows.iter().map(f)))
}

/////////////////////////////////////////////////////////////////////////////
// Partial tables
/////////////////////////////////////////////////////////////////////////////

/// Build a record batch from partition-tagged rows.
pub fn partial_batch(rows: &[PartitionedRow]) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.row.key.returnflag.to_string()),
        )),
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.row.key.linestatus.to_string()),
        )),
        f64_column(rows, |r| r.row.agg.sum_qty),
        f64_column(rows, |r| r.row.agg.sum_base_price),
        f64_column(rows, |r| r.row.agg.sum_disc_price),
        f64_column(rows, |r| r.row.agg.sum_charge),
        f64_column(rows, |r| r.row.agg.sum_discount),
        Arc::new(UInt64Array::from_iter_values(rows.iter().map(|r| r.row.agg.count))),
        Arc::new(UInt32Array::from_iter_values(rows.iter().map(|r| r.partition))),
    ];
    Ok(RecordBatch::try_new(partial_schema(), columns)?)
}

/// Decode partial rows from a batch. The partition column is not needed
/// and is ignored if present.
pub fn rows_from_batch(batch: &RecordBatch) -> Result<Vec<PartialRow>> {
    let flags = column_as(batch, RETURNFLAG, &DataType::Utf8)?;
    let statuses = column_as(batch, LINESTATUS, &DataType::Utf8)?;
    let sums = [SUM_QTY, SUM_BASE_PRICE, SUM_DISC_PRICE, SUM_CHARGE, SUM_DISCOUNT]
        .into_iter()
        .map(|name| column_as(batch, name, &DataType::Float64).map(|col| (name, col)))
        .collect::<Result<Vec<_>>>()?;
    let counts = column_as(batch, COUNT_ORDER, &DataType::UInt64)?;

    let flags = flags.as_string::<i32>();
    let statuses = statuses.as_string::<i32>();
    let counts = counts.as_primitive::<UInt64Type>();
    let sums = sums
        .iter()
        .map(|(name, col)| (*name, col.as_primitive::<Float64Type>()))
        .collect::<Vec<_>>();
    let sum_at = |idx: usize, row: usize| measure_at(sums[idx].1, sums[idx].0, row);

    (0..batch.num_rows())
        .map(|i| {
            if counts.is_null(i) {
                return Err(Error::NullValue {
                    column: COUNT_ORDER,
                    row: i,
                });
            }
            Ok(PartialRow {
                key: GroupKey::new(
                    code_at(flags, RETURNFLAG, i)?,
                    code_at(statuses, LINESTATUS, i)?,
                ),
                agg: PartialAggregate {
                    sum_qty: sum_at(0, i)?,
                    sum_base_price: sum_at(1, i)?,
                    sum_disc_price: sum_at(2, i)?,
                    sum_charge: sum_at(3, i)?,
                    sum_discount: sum_at(4, i)?,
                    count: counts.value(i),
                },
            })
        })
        .collect()
}

/// Write a mapper's output as Parquet, one row group per non-empty
/// partition. A shard without groups still produces a valid file, with the
/// schema and no row groups.
pub fn write_partitioned<W: Write + Send>(w: W, parts: &PartitionedRows) -> Result<()> {
    let groups = parts.row_groups().collect::<Vec<_>>();
    let ids = groups.iter().map(|(p, _)| *p).collect::<Vec<_>>();
    let metadata = vec![
        KeyValue::new(
            META_NUM_PARTITIONS.to_string(),
            parts.num_partitions().get().to_string(),
        ),
        KeyValue::new(META_ROW_GROUPS.to_string(), serde_json::to_string(&ids)?),
    ];

    let mut writer = ArrowWriter::try_new(w, partial_schema(), Some(writer_props(Some(metadata))))?;
    for (_, rows) in groups {
        writer.write(&partial_batch(rows)?)?;
        // close the row group so partitions never share one
        writer.flush()?;
    }
    writer.close()?;
    Ok(())
}

/// Encode a mapper's output in memory, for shipping to a reducer.
pub fn encode(parts: &PartitionedRows) -> Result<Bytes> {
    let mut buf = Vec::new();
    write_partitioned(&mut buf, parts)?;
    Ok(Bytes::from(buf))
}

/// Layout information stored alongside a partial table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartialLayout {
    pub num_partitions: u32,
    /// Partition id held by each row group, in row group order.
    pub row_groups: Vec<u32>,
}

impl PartialLayout {
    /// Index of the row group holding partition `p`, if it is non-empty.
    pub fn row_group_of(&self, p: u32) -> Option<usize> {
        self.row_groups.iter().position(|&id| id == p)
    }
}

fn lookup<'a>(kvs: Option<&'a Vec<KeyValue>>, key: &str) -> Result<&'a str> {
    kvs.into_iter()
        .flatten()
        .find(|kv| kv.key == key)
        .and_then(|kv| kv.value.as_deref())
        .ok_or_else(|| Error::Metadata(format!("missing key `{key}`")))
}

fn layout_of(kvs: Option<&Vec<KeyValue>>) -> Result<PartialLayout> {
    let num_partitions = lookup(kvs, META_NUM_PARTITIONS)?
        .parse::<u32>()
        .map_err(|e| Error::Metadata(format!("`{META_NUM_PARTITIONS}`: {e}")))?;
    let row_groups: Vec<u32> = serde_json::from_str(lookup(kvs, META_ROW_GROUPS)?)?;
    if row_groups.iter().any(|&p| p >= num_partitions) {
        return Err(Error::Metadata(format!(
            "row group partition ids {row_groups:?} exceed {num_partitions} partitions"
        )));
    }
    Ok(PartialLayout {
        num_partitions,
        row_groups,
    })
}

fn read_rows<R: ChunkReader + 'static>(input: R, partition: Option<u32>) -> Result<Vec<PartialRow>> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(input)?;
    let builder = match partition {
        None => builder,
        Some(p) => {
            let layout = layout_of(builder.metadata().file_metadata().key_value_metadata())?;
            match layout.row_group_of(p) {
                Some(idx) => builder.with_row_groups(vec![idx]),
                // nothing was written for this partition
                None => return Ok(Vec::new()),
            }
        }
    };
    let mut rows = Vec::new();
    for batch in builder.build()? {
        rows.extend(rows_from_batch(&batch?)?);
    }
    Ok(rows)
}

/// Read the layout metadata of an encoded partial table.
pub fn layout<R: ChunkReader + 'static>(input: R) -> Result<PartialLayout> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(input)?;
    layout_of(builder.metadata().file_metadata().key_value_metadata())
}

/// Decode a whole encoded partial table.
pub fn decode(bytes: Bytes) -> Result<PartialTable> {
    Ok(read_rows(bytes, None)?.into_iter().collect())
}

/// Decode only partition `p` of an encoded partial table. An empty
/// partition yields no rows.
pub fn decode_partition(bytes: Bytes, p: u32) -> Result<Vec<PartialRow>> {
    read_rows(bytes, Some(p))
}

/// Read a partial table written by [`write_partitioned`].
pub fn read_partial_file(path: &Path) -> Result<PartialTable> {
    Ok(read_rows(File::open(path)?, None)?.into_iter().collect())
}

/// Read partition `p` of a partial table file.
pub fn read_partition_file(path: &Path, p: u32) -> Result<Vec<PartialRow>> {
    read_rows(File::open(path)?, Some(p))
}

/////////////////////////////////////////////////////////////////////////////
// Reports
/////////////////////////////////////////////////////////////////////////////

pub fn report_batch(report: &Report) -> Result<RecordBatch> {
    let rows = report.rows();
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.key.returnflag.to_string()),
        )),
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.key.linestatus.to_string()),
        )),
        f64_column(rows, |r| r.sum_qty),
        f64_column(rows, |r| r.sum_base_price),
        f64_column(rows, |r| r.sum_disc_price),
        f64_column(rows, |r| r.sum_charge),
        f64_column(rows, |r| r.sum_discount),
        f64_column(rows, |r| r.avg_qty),
        f64_column(rows, |r| r.avg_price),
        f64_column(rows, |r| r.avg_discount),
        Arc::new(UInt64Array::from_iter_values(rows.iter().map(|r| r.count))),
    ];
    Ok(RecordBatch::try_new(report_schema(), columns)?)
}

pub fn write_report<W: Write + Send>(w: W, report: &Report) -> Result<()> {
    let mut writer = ArrowWriter::try_new(w, report_schema(), Some(writer_props(None)))?;
    writer.write(&report_batch(report)?)?;
    writer.close()?;
    Ok(())
}
