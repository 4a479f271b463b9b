// hp4
// Runs a pipeline of external programs and streams per-link byte counts
// as JSON lines on stdout

use clap::Parser;
use hp4_core::{PipelineRun, RunError, RunOutcome, SpecParser};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "hp4",
    version,
    about = "Pipe-pipeline progress monitor: run a chain of programs and stream per-link byte counts"
)]
struct Args {
    /// Pipeline specification file (JSON)
    #[arg(short = 'f', long = "file", value_name = "SPEC")]
    file: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    // Diagnostics go to stderr; stdout belongs to the telemetry records.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    match run(&args).await {
        Ok(outcome) => {
            tracing::info!(stages = outcome.stages.len(), "pipeline succeeded");
            Ok(())
        }
        Err(err) => {
            eprintln!("hp4: {err}");
            std::process::exit(err.exit_code());
        }
    }
}

async fn run(args: &Args) -> Result<RunOutcome, RunError> {
    let spec = SpecParser::from_file(&args.file)?;
    if let Some(name) = &spec.pipeline {
        tracing::info!(pipeline = %name, stages = spec.stages.len(), "starting pipeline");
    }
    PipelineRun::new(spec).execute(tokio::io::stdout()).await
}
