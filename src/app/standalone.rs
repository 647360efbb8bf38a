use anyhow::*;
use clap::Parser;
use q1lite::standalone::{engine, Args, Job};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn parse_args() -> Job {
    Job::from(Args::parse())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let job = parse_args();
    info!(job = %serde_json::to_string(&job)?, "submitted");

    let report = engine::run(&job).await?;
    print!("{report}");
    Ok(())
}
