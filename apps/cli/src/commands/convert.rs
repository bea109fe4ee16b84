//! Dataset conversion command.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use verdant_training::convert::{DEFAULT_DATASET_NAME, DEFAULT_NUM_SHARDS};
use verdant_training::labels::DEFAULT_OTHERS_CLASS;
use verdant_training::split::{DEFAULT_SPLIT_SEED, DEFAULT_VALIDATION_RATIO};
use verdant_training::{convert_dataset, ConvertOptions, ProgressEvent, ProgressSink, SplitName};

#[derive(Args, Debug)]
pub struct ConvertDatasetArgs {
    /// Dataset directory containing result.csv and the class folders
    #[arg(long)]
    pub dataset_dir: PathBuf,

    /// Shards per split
    #[arg(long, default_value_t = DEFAULT_NUM_SHARDS)]
    pub num_shards: usize,

    /// Fraction of each class's folders held out for validation
    #[arg(long, default_value_t = DEFAULT_VALIDATION_RATIO)]
    pub validation_ratio: f64,

    /// Shuffle seed for the folder split
    #[arg(long, default_value_t = DEFAULT_SPLIT_SEED)]
    pub seed: u64,

    /// Prefix of the shard file names
    #[arg(long, default_value = DEFAULT_DATASET_NAME)]
    pub dataset_name: String,

    /// Class always assigned label 0
    #[arg(long, default_value = DEFAULT_OTHERS_CLASS, conflicts_with = "no_others_class")]
    pub others_class: String,

    /// Do not reserve label 0 for an "others" class
    #[arg(long)]
    pub no_others_class: bool,

    /// Keep existing shards instead of converting again
    #[arg(long)]
    pub skip_existing: bool,
}

impl ConvertDatasetArgs {
    fn options(&self) -> ConvertOptions {
        ConvertOptions {
            num_shards: self.num_shards,
            validation_ratio: self.validation_ratio,
            seed: self.seed,
            dataset_name: self.dataset_name.clone(),
            others_class: (!self.no_others_class).then(|| self.others_class.clone()),
            skip_existing: self.skip_existing,
        }
    }
}

/// Draws one progress bar per split.
struct ConvertProgress {
    bar: Mutex<Option<(SplitName, ProgressBar)>>,
}

impl ConvertProgress {
    fn new() -> Self {
        Self { bar: Mutex::new(None) }
    }

    fn start_bar(split: SplitName, total: usize) -> ProgressBar {
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar().template("{prefix:>10.cyan} [{bar:40}] {pos}/{len} {msg}") {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_prefix(split.to_string());
        bar
    }

    fn finish(&self) {
        if let Ok(mut current) = self.bar.lock() {
            if let Some((_, bar)) = current.take() {
                bar.finish();
            }
        }
    }
}

impl ProgressSink for ConvertProgress {
    fn on_event(&self, event: ProgressEvent) {
        let Ok(mut current) = self.bar.lock() else {
            return;
        };
        match event {
            ProgressEvent::Converted { split, index, total, shard } => {
                if current.as_ref().is_none_or(|(s, _)| *s != split) {
                    if let Some((_, bar)) = current.take() {
                        bar.finish();
                    }
                    *current = Some((split, Self::start_bar(split, total)));
                }
                if let Some((_, bar)) = current.as_ref() {
                    bar.set_position(index as u64 + 1);
                    bar.set_message(format!("shard {shard}"));
                }
            }
            ProgressEvent::Message { message } => match current.as_ref() {
                Some((_, bar)) => bar.suspend(|| println!("{message}")),
                None => println!("{message}"),
            },
            ProgressEvent::Output { .. } | ProgressEvent::Round { .. } => {}
        }
    }
}

pub async fn execute(args: ConvertDatasetArgs) -> Result<()> {
    let options = args.options();
    let dataset_dir = args.dataset_dir.clone();
    let progress = Arc::new(ConvertProgress::new());

    let sink = Arc::clone(&progress);
    let report = tokio::task::spawn_blocking(move || convert_dataset(&dataset_dir, &options, sink.as_ref()))
        .await
        .context("Conversion task panicked")?
        .with_context(|| format!("Failed to convert dataset in {}", args.dataset_dir.display()))?;
    progress.finish();

    println!();
    if report.skipped {
        println!("{}", "Dataset files already exist. Skipping conversion.".yellow());
        return Ok(());
    }
    println!("{}", "Dataset converted".bold().green());
    println!("  Classes:    {}", report.num_classes.to_string().cyan());
    println!("  Train:      {}", report.train.to_string().cyan());
    println!(
        "  Validation: {} ({} classes)",
        report.validation.to_string().cyan(),
        report.validation_classes
    );
    println!("  Shards:     {}", report.shards.len().to_string().dimmed());
    println!();
    Ok(())
}
