//! Train/eval loop, export and chart commands for a pipeline config.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use verdant_training::{
    export_models, open_in_viewer, render_chart_from_log, ExportOptions, LoopOutcome, PipelineConfig,
    ProcessRunner, ProgressSink, StdoutProgressSink, TrainEvalLoop,
};

#[derive(Args, Debug)]
pub struct PipelineArgs {
    /// Pipeline YAML config
    pub config: PathBuf,

    /// Export the latest checkpoint (frozen graph, CoreML, TFLite) and exit
    #[arg(long)]
    pub export_models: bool,

    /// Render the accuracy chart and open it in the default viewer
    #[arg(long)]
    pub show_plot: bool,

    /// Render the accuracy chart next to the checkpoints
    #[arg(long)]
    pub export_plot: bool,

    /// Include the saliency-map gradient node in exported models
    #[arg(long)]
    pub enable_saliency_maps: bool,
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            tracing::warn!("interrupted; stopping");
            token.cancel();
        }
    });
}

pub async fn execute(args: PipelineArgs) -> Result<()> {
    let config = PipelineConfig::load(&args.config)
        .with_context(|| format!("Failed to load pipeline config {}", args.config.display()))?;
    let layout = config.layout();

    if args.show_plot {
        let path = render_chart_from_log(&layout).context("Failed to render accuracy chart")?;
        open_in_viewer(&path).context("Failed to open accuracy chart")?;
        return Ok(());
    }

    if args.export_plot {
        let path = render_chart_from_log(&layout).context("Failed to render accuracy chart")?;
        println!("{} {}", "Chart written to".green(), path.display().to_string().cyan());
        return Ok(());
    }

    let sink: Arc<dyn ProgressSink> = Arc::new(StdoutProgressSink);
    let runner = ProcessRunner::new(Arc::clone(&sink));
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    if args.export_models {
        let options = ExportOptions { enable_saliency_maps: args.enable_saliency_maps };
        let manifest =
            export_models(&config, &runner, &cancel, options).await.context("Failed to export models")?;

        println!();
        println!("{}", "Models exported".bold().green());
        for artifact in &manifest.artifacts {
            println!(
                "  {:<16} {}  {}",
                format!("{:?}", artifact.kind),
                artifact.path.display().to_string().cyan(),
                artifact.sha256[..12].dimmed()
            );
        }
        println!("  Manifest: {}", layout.export_manifest_path().display().to_string().dimmed());
        println!();
        return Ok(());
    }

    let mut train_eval = TrainEvalLoop::new(&config, &runner, sink.as_ref(), cancel);
    let outcome = train_eval.run().await.context("Train/eval loop failed")?;

    println!();
    match outcome {
        LoopOutcome::BudgetReached { step } => {
            println!("{} at step {}", "Step budget reached".bold().green(), step.to_string().cyan());
        }
        LoopOutcome::EarlyStopped(best) => {
            println!(
                "{}: best validation accuracy {} at step {}",
                "Stopped early".bold().green(),
                format!("{:.4}", best.accuracy).cyan(),
                best.step
            );
        }
        LoopOutcome::Cancelled => println!("{}", "Cancelled".yellow()),
    }
    println!("  Accuracy log: {}", layout.accuracy_log_path().display().to_string().dimmed());
    println!("  Chart:        {}", layout.chart_path().display().to_string().dimmed());
    Ok(())
}
