//! Accuracy chart rendering.

use crate::error::{TrainingError, TrainingResult};
use crate::layout::CheckpointLayout;
use crate::metrics::{dedup_by_step, read_records, AccuracyRecord};
use plotters::prelude::*;
use plotters::series::DashedLineSeries;
use std::path::{Path, PathBuf};

const CHART_SIZE: (u32, u32) = (1024, 640);

fn plot_error(e: impl std::fmt::Display) -> TrainingError {
    TrainingError::Plot(e.to_string())
}

struct Series {
    label: &'static str,
    color: RGBColor,
    dashed: bool,
    value: fn(&AccuracyRecord) -> Option<f32>,
}

const SERIES: [Series; 4] = [
    Series { label: "Training", color: RED, dashed: false, value: AccuracyRecord::training_accuracy },
    Series { label: "Validation", color: BLUE, dashed: false, value: |r| r.accuracy },
    Series { label: "Training Top-5", color: RED, dashed: true, value: AccuracyRecord::training_recall_5 },
    Series { label: "Validation Top-5", color: BLUE, dashed: true, value: |r| r.recall_5 },
];

/// Draw accuracy against step for both splits, top-1 solid and top-5 dashed.
pub fn render_chart(records: &[AccuracyRecord], path: &Path) -> TrainingResult<()> {
    let x_min = records.iter().map(|r| r.step).min().unwrap_or(0);
    let x_max = records.iter().map(|r| r.step).max().unwrap_or(0).max(x_min + 1);
    let y_max = records
        .iter()
        .flat_map(|r| SERIES.iter().filter_map(|s| (s.value)(r)))
        .fold(1.0_f32, f32::max);

    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Accuracy", ("sans-serif", 24))
        .margin(16)
        .x_label_area_size(40)
        .y_label_area_size(56)
        .build_cartesian_2d(x_min..x_max, 0.0_f32..y_max)
        .map_err(plot_error)?;

    chart.configure_mesh().x_desc("Step").y_desc("Accuracy").draw().map_err(plot_error)?;

    for series in &SERIES {
        let points: Vec<(u64, f32)> =
            records.iter().filter_map(|r| (series.value)(r).map(|v| (r.step, v))).collect();
        let style = series.color.stroke_width(2);
        let drawn = if series.dashed {
            chart.draw_series(DashedLineSeries::new(points, 8, 6, style))
        } else {
            chart.draw_series(LineSeries::new(points, style))
        };
        drawn
            .map_err(plot_error)?
            .label(series.label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 24, y)], style));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::LowerRight)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(plot_error)?;

    root.present().map_err(plot_error)?;
    tracing::debug!(path = %path.display(), records = records.len(), "rendered accuracy chart");
    Ok(())
}

/// Render the chart for the accuracy log under `layout`, one point per step.
pub fn render_chart_from_log(layout: &CheckpointLayout) -> TrainingResult<PathBuf> {
    let records = dedup_by_step(read_records(&layout.accuracy_log_path())?);
    let path = layout.chart_path();
    render_chart(&records, &path)?;
    Ok(path)
}

/// Open `path` with the platform's default viewer.
pub fn open_in_viewer(path: &Path) -> TrainingResult<()> {
    let mut command = if cfg!(target_os = "macos") {
        std::process::Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut command = std::process::Command::new("cmd");
        command.args(["/C", "start", ""]);
        command
    } else {
        std::process::Command::new("xdg-open")
    };
    let program = command.get_program().to_string_lossy().into_owned();
    command.arg(path).spawn().map_err(|source| TrainingError::Spawn { program, source })?;
    Ok(())
}
