use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::partition::NumPartitions;
use crate::q1::map::ShardOutput;
use crate::q1::reduce::{finalize, merge_rows, reduce};
use crate::q1::{MergedAggregate, Report};
use crate::standalone::Job;
use crate::{codec, reader, utils};

pub const REPORT_PARQUET: &str = "report.parquet";
pub const REPORT_JSON: &str = "report.json";

/// Aggregate one shard file and write its partitioned partial table.
fn map_file(shard: usize, input: &Path, dir: &Path, n: NumPartitions) -> Result<PathBuf> {
    let table = reader::aggregate_file(input)
        .with_context(|| format!("failed to aggregate {}", input.display()))?;
    let out = ShardOutput::new(table, n);
    if out.is_empty() {
        warn!(shard, input = %input.display(), "shard has no groups; writing an empty partial");
    }

    let path = dir.join(format!("part-{shard:05}.parquet"));
    let file = File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
    codec::write_partitioned(BufWriter::new(file), &out.partitions)?;
    debug!(
        shard,
        groups = out.table.len(),
        row_groups = out.partitions.row_groups().count(),
        "wrote partial"
    );
    Ok(path)
}

/// Map every input shard on a blocking task, at most `job.workers` at a
/// time. Returns once all shards are done, with the partial files in shard
/// order.
pub async fn perform_map(job: &Job, inputs: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    let n = job.num_partitions()?;
    let dir = job.partials_dir();
    fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let limit = Arc::new(Semaphore::new(job.workers.max(1)));
    let mut tasks = JoinSet::new();
    for (shard, input) in inputs.into_iter().enumerate() {
        let permit = limit.clone().acquire_owned().await?;
        let dir = dir.clone();
        tasks.spawn_blocking(move || {
            let _permit = permit;
            map_file(shard, &input, &dir, n)
        });
    }

    let mut partials = Vec::new();
    let mut failure = None;
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(path)) => partials.push(path),
            Ok(Err(e)) => {
                tasks.abort_all();
                failure.get_or_insert(e);
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                tasks.abort_all();
                failure.get_or_insert(e.into());
            }
        }
    }
    // every task has finished, so nothing writes into `dir` any more
    if let Some(e) = failure {
        if let Err(cleanup) = remove_partials(&dir) {
            warn!(dir = %dir.display(), error = %cleanup, "failed to remove partials");
        }
        return Err(e);
    }
    partials.sort();
    info!(shards = partials.len(), "map phase complete");
    Ok(partials)
}

/// Reduce all partial files into the final report.
///
/// With `job.scoped_reduce`, each output partition is read (one row group
/// per file) and reduced on its own task.
pub async fn perform_reduce(job: &Job, partials: Vec<PathBuf>) -> Result<Report> {
    let report = if job.scoped_reduce {
        reduce_partitions(job.num_partitions()?, Arc::new(partials)).await?
    } else {
        let tables = partials
            .iter()
            .map(|path| {
                codec::read_partial_file(path)
                    .with_context(|| format!("failed to read {}", path.display()))
            })
            .collect::<Result<Vec<_>>>()?;
        reduce(tables)?
    };
    info!(groups = report.len(), "reduce phase complete");
    Ok(report)
}

fn reduce_partition(p: u32, partials: &[PathBuf]) -> Result<Vec<MergedAggregate>> {
    let mut rows = Vec::new();
    for path in partials {
        rows.extend(
            codec::read_partition_file(path, p)
                .with_context(|| format!("failed to read partition {p} of {}", path.display()))?,
        );
    }
    let report = finalize(merge_rows(rows))?;
    debug!(partition = p, groups = report.len(), "reduced partition");
    Ok(report.rows().to_vec())
}

/// Reduce only the partitions some partial file holds rows for; the others
/// are empty everywhere.
async fn reduce_partitions(n: NumPartitions, partials: Arc<Vec<PathBuf>>) -> Result<Report> {
    let mut present = BTreeSet::new();
    for path in partials.iter() {
        let layout = codec::layout(File::open(path)?)
            .with_context(|| format!("failed to read layout of {}", path.display()))?;
        if layout.num_partitions != n.get() {
            bail!(
                "{} was written with {} partitions, expected {}",
                path.display(),
                layout.num_partitions,
                n.get()
            );
        }
        present.extend(layout.row_groups);
    }
    debug!(partitions = present.len(), "non-empty partitions");

    let mut tasks = JoinSet::new();
    for p in present {
        let partials = partials.clone();
        tasks.spawn_blocking(move || reduce_partition(p, &partials));
    }
    let mut rows = Vec::new();
    while let Some(res) = tasks.join_next().await {
        rows.extend(res??);
    }
    Ok(Report::new(rows))
}

/// Write `report.parquet` and `report.json` into the output directory.
pub fn write_outputs(job: &Job, report: &Report) -> Result<()> {
    let parquet = job.output.join(REPORT_PARQUET);
    codec::write_report(BufWriter::new(File::create(&parquet)?), report)
        .with_context(|| format!("failed to write {}", parquet.display()))?;

    let json = job.output.join(REPORT_JSON);
    serde_json::to_writer_pretty(BufWriter::new(File::create(&json)?), report)
        .with_context(|| format!("failed to write {}", json.display()))?;
    Ok(())
}

/// Run a whole job: map, barrier, reduce, write the report.
pub async fn run(job: &Job) -> Result<Report> {
    // validate before any work is scheduled
    job.num_partitions()?;

    let inputs = utils::expand_inputs(&job.input)?;
    if inputs.is_empty() {
        warn!(input = %job.input, "no input files matched");
    }
    info!(id = %job.id, shards = inputs.len(), "starting job");

    let partials = perform_map(job, inputs).await?;
    let report = perform_reduce(job, partials).await?;
    write_outputs(job, &report)?;

    if !job.keep_partials {
        let dir = job.partials_dir();
        remove_partials(&dir).with_context(|| format!("failed to remove {}", dir.display()))?;
    }
    Ok(report)
}

fn remove_partials(dir: &Path) -> std::io::Result<()> {
    fs::remove_dir_all(dir)?;
    if let Some(parent) = dir.parent() {
        // only succeeds once no other job's partials remain
        let _ = fs::remove_dir(parent);
    }
    Ok(())
}
