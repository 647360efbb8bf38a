use crate::partition::NumPartitions;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

pub mod engine;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pricing summary report over a set of shard files
    Submit {
        /// Glob pattern for the input shards (.csv or .parquet)
        #[arg(short, long)]
        input: String,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Number of output partitions for the intermediate files
        #[arg(short, long, default_value_t = 4)]
        partitions: usize,

        /// Maximum number of shards mapped concurrently
        #[arg(short, long, default_value_t = 4)]
        workers: usize,

        /// Reduce each output partition separately instead of all at once
        #[arg(long)]
        scoped_reduce: bool,

        /// Keep the intermediate partial files after the reduce
        #[arg(long)]
        keep_partials: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub input: String,
    pub output: PathBuf,
    pub partitions: usize,
    pub workers: usize,
    pub scoped_reduce: bool,
    pub keep_partials: bool,
}

impl Job {
    /// A job with a fresh id and default tuning.
    pub fn new(input: impl ToString, output: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            input: input.to_string(),
            output: output.into(),
            partitions: 4,
            workers: 4,
            scoped_reduce: false,
            keep_partials: false,
        }
    }

    pub fn num_partitions(&self) -> crate::Result<NumPartitions> {
        NumPartitions::new(self.partitions)
    }

    /// Directory holding this job's intermediate files.
    pub fn partials_dir(&self) -> PathBuf {
        self.output.join("partials").join(self.id.to_string())
    }
}

impl From<Args> for Job {
    fn from(args: Args) -> Self {
        match args.command {
            Commands::Submit {
                input,
                output,
                partitions,
                workers,
                scoped_reduce,
                keep_partials,
            } => Job {
                partitions,
                workers,
                scoped_reduce,
                keep_partials,
                ..Job::new(input, output)
            },
        }
    }
}
