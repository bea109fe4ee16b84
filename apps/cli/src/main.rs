//! Verdant CLI - dataset conversion and train/eval/export pipeline driver
//!
//! Provides the `verdant` command, which prepares image datasets for an
//! external training framework and supervises its training scripts.

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{convert, pipeline};

/// Verdant - plant image classifier training driver
#[derive(Parser, Debug)]
#[command(name = "verdant", author, version, about = "Verdant - image classifier training driver")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a labeled image folder tree into sharded record files
    ///
    /// Reads `<dataset-dir>/result.csv` (rows of `class_folder,class_name`),
    /// splits folders into training and validation sets and writes the shards,
    /// `labels.txt`, `dataset_info.json` and `filenames_by_split.json`.
    ConvertDataset(convert::ConvertDatasetArgs),

    /// Run the train/eval loop, or export models and charts, for a pipeline config
    Pipeline(pipeline::PipelineArgs),
}

fn log_level(name: &str) -> Level {
    match name {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level(&args.log_level))
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::ConvertDataset(args) => convert::execute(args).await,
        Command::Pipeline(args) => pipeline::execute(args).await,
    }
}
