//! WiBed command executor
//!
//! Long-running sidecar started by the node agent. Reads `<id> <command>`
//! lines from a named pipe, runs each command with `sh -c` and stores its
//! output under `<results-dir>/<id>/` for the agent to report.

mod executor;
mod fifo;
mod runner;

use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use executor::Executor;

/// Command executor for the WiBed node agent
#[derive(Parser, Debug)]
#[command(name = "wibed-executor", version)]
struct Args {
    /// Named pipe to create and read commands from
    #[arg(long, env = "WIBED_PIPE")]
    pipe: PathBuf,

    /// Directory receiving one result directory per command
    #[arg(long, env = "WIBED_RESULTS_DIR")]
    results_dir: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    info!(
        "Executor starting: pipe {}, results in {}",
        args.pipe.display(),
        args.results_dir.display()
    );

    Executor::new(args.pipe, args.results_dir).run().await?;

    info!("Executor exiting");
    Ok(())
}
