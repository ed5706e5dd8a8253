//! Diagnostic plots rendered as SVG files.
//!
//! SVG keeps text rendering independent of system fonts, which the bitmap
//! backends would otherwise need.

use crate::error::{AutoencoderError, Result};
use crate::models::trainer::TrainingHistory;
use ndarray::{ArrayView2, ArrayView3, Axis};
use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

const CHART_SIZE: (u32, u32) = (960, 720);
const LINEAR_BINS: usize = 100;
const LOG_BINS: usize = 500;
/// Colour levels used when rendering an event plane.
const LEVELS: usize = 64;
const PANEL_WIDTH: u32 = 160;
const CAPTION_HEIGHT: u32 = 40;

/// Viridis anchor colours, evenly spaced over [0, 1].
const VIRIDIS: [(u8, u8, u8); 5] = [(68, 1, 84), (59, 82, 139), (33, 145, 140), (94, 201, 98), (253, 231, 37)];

fn plot_err<E: std::fmt::Display>(err: E) -> AutoencoderError {
    AutoencoderError::Plot(err.to_string())
}

fn svg_path(dir: &Path, title: &str) -> PathBuf {
    dir.join(format!("{title}.svg"))
}

/// Train/validation loss and accuracy curves, one file each.
pub fn plot_loss_accuracy(history: &TrainingHistory, dir: &Path) -> Result<Vec<PathBuf>> {
    let cost = svg_path(dir, "cost function");
    draw_curves(&cost, "cost function", "cost", &history.loss, &history.val_loss)?;
    let accuracy = svg_path(dir, "model accuracy");
    draw_curves(&accuracy, "model accuracy", "accuracy", &history.accuracy, &history.val_accuracy)?;
    Ok(vec![cost, accuracy])
}

fn draw_curves(path: &Path, title: &str, y_desc: &str, train: &[f64], validate: &[f64]) -> Result<()> {
    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let epochs = train.len().max(validate.len()).max(2);
    let (lo, hi) = value_range(train.iter().chain(validate.iter()).copied());
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 28))
        .margin(16)
        .x_label_area_size(48)
        .y_label_area_size(72)
        .build_cartesian_2d(0f64..(epochs - 1) as f64, lo..hi)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc("epoch")
        .y_desc(y_desc)
        .draw()
        .map_err(plot_err)?;

    for (label, series, color) in [("train", train, BLUE), ("validation", validate, RED)] {
        chart
            .draw_series(LineSeries::new(
                series.iter().enumerate().map(|(i, &v)| (i as f64, v)),
                color.stroke_width(2),
            ))
            .map_err(plot_err)?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }
    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;
    debug!(path = %path.display(), "wrote plot");
    Ok(())
}

fn value_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return (0.0, 1.0);
    }
    let pad = ((hi - lo) * 0.05).max(1e-6);
    (lo - pad, hi + pad)
}

/// Equal-width bin counts over `[min, max]`, the last bin closed on both ends.
///
/// Returns `(left edge, bin width, counts)`. A degenerate range is widened by
/// 0.5 on either side.
pub fn histogram(values: &[f64], bins: usize) -> (f64, f64, Vec<usize>) {
    let (mut lo, mut hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        (lo, hi) = (0.0, 1.0);
    } else if lo == hi {
        (lo, hi) = (lo - 0.5, hi + 0.5);
    }
    let bins = bins.max(1);
    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0; bins];
    for &v in values {
        let index = (((v - lo) / width) as usize).min(bins - 1);
        counts[index] += 1;
    }
    (lo, width, counts)
}

/// Reconstruction error histograms with the threshold marked: linear counts
/// over 100 bins and log counts over 500 bins.
pub fn plot_error_histograms(errors: &[f64], threshold: f64, dir: &Path) -> Result<Vec<PathBuf>> {
    let linear = svg_path(dir, "MSE loss histogram");
    draw_linear_histogram(&linear, errors, threshold)?;
    let log = svg_path(dir, "MSE loss histogram (log scale)");
    draw_log_histogram(&log, errors, threshold)?;
    Ok(vec![linear, log])
}

fn histogram_x_range(lo: f64, width: f64, bins: usize, threshold: f64) -> std::ops::Range<f64> {
    let hi = lo + width * bins as f64;
    let (lo, hi) = (lo.min(threshold), hi.max(threshold));
    let pad = (hi - lo) * 0.02;
    (lo - pad)..(hi + pad)
}

/// Short segments along `x = threshold`; `lerp` maps a fraction of the plot
/// height to a y coordinate.
fn dashed_vertical(threshold: f64, lerp: impl Fn(f64) -> f64) -> Vec<PathElement<(f64, f64)>> {
    const DASHES: usize = 30;
    (0..DASHES)
        .map(|i| {
            let start = i as f64 / DASHES as f64;
            let end = start + 0.6 / DASHES as f64;
            PathElement::new(vec![(threshold, lerp(start)), (threshold, lerp(end))], BLACK.stroke_width(1))
        })
        .collect()
}

fn draw_linear_histogram(path: &Path, errors: &[f64], threshold: f64) -> Result<()> {
    let (lo, width, counts) = histogram(errors, LINEAR_BINS);
    let top = counts.iter().copied().max().unwrap_or(1).max(1) as f64 * 1.05;

    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("MSE loss histogram", ("sans-serif", 28))
        .margin(16)
        .x_label_area_size(48)
        .y_label_area_size(72)
        .build_cartesian_2d(histogram_x_range(lo, width, LINEAR_BINS, threshold), 0f64..top)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc("MSE loss")
        .y_desc("Number of samples")
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(counts.iter().enumerate().filter(|(_, c)| **c > 0).map(|(i, &c)| {
            let x0 = lo + width * i as f64;
            Rectangle::new([(x0, 0.0), (x0 + width, c as f64)], BLUE.mix(0.8).filled())
        }))
        .map_err(plot_err)?;
    chart
        .draw_series(dashed_vertical(threshold, |t| t * top))
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;
    debug!(path = %path.display(), "wrote plot");
    Ok(())
}

fn draw_log_histogram(path: &Path, errors: &[f64], threshold: f64) -> Result<()> {
    let (lo, width, counts) = histogram(errors, LOG_BINS);
    let base = 0.5;
    let top = counts.iter().copied().max().unwrap_or(1).max(1) as f64 * 2.0;

    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("MSE loss histogram (log scale)", ("sans-serif", 28))
        .margin(16)
        .x_label_area_size(48)
        .y_label_area_size(72)
        .build_cartesian_2d(histogram_x_range(lo, width, LOG_BINS, threshold), (base..top).log_scale())
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc("MSE loss")
        .y_desc("Number of samples (log)")
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(counts.iter().enumerate().filter(|(_, c)| **c > 0).map(|(i, &c)| {
            let x0 = lo + width * i as f64;
            Rectangle::new([(x0, base), (x0 + width, c as f64)], BLUE.mix(0.8).filled())
        }))
        .map_err(plot_err)?;
    chart
        .draw_series(dashed_vertical(threshold, |t| base * (top / base).powf(t)))
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;
    debug!(path = %path.display(), "wrote plot");
    Ok(())
}

fn colormap(level: usize) -> RGBColor {
    let t = level as f64 / (LEVELS - 1) as f64 * (VIRIDIS.len() - 1) as f64;
    let i = (t.floor() as usize).min(VIRIDIS.len() - 2);
    let f = t - i as f64;
    let (a, b) = (VIRIDIS[i], VIRIDIS[i + 1]);
    let mix = |p: u8, q: u8| (p as f64 + (q as f64 - p as f64) * f).round() as u8;
    RGBColor(mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
}

/// Quantise a plane to colour levels, normalised to its own min/max.
fn quantise(plane: ArrayView2<'_, f32>) -> Vec<Vec<usize>> {
    let (lo, hi) = plane
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let span = hi - lo;
    plane
        .outer_iter()
        .map(|row| {
            row.iter()
                .map(|&v| {
                    if span > 0.0 {
                        (((v - lo) / span) * (LEVELS - 1) as f32).round() as usize
                    } else {
                        0
                    }
                })
                .collect()
        })
        .collect()
}

fn draw_plane(area: &DrawingArea<SVGBackend<'_>, Shift>, plane: ArrayView2<'_, f32>) -> Result<()> {
    area.fill(&colormap(0)).map_err(plot_err)?;
    let (width, height) = area.dim_in_pixel();
    let levels = quantise(plane);
    let rows = levels.len().max(1);
    let cols = levels.first().map_or(1, Vec::len).max(1);
    let cell_w = width as f64 / cols as f64;
    let cell_h = height as f64 / rows as f64;

    // Runs of equal level along a row become one rectangle; level 0 is the background.
    for (r, row) in levels.iter().enumerate() {
        let mut start = 0;
        while start < row.len() {
            let level = row[start];
            let mut end = start + 1;
            while end < row.len() && row[end] == level {
                end += 1;
            }
            if level > 0 {
                let x0 = (start as f64 * cell_w).round() as i32;
                let x1 = (end as f64 * cell_w).round() as i32;
                let y0 = (r as f64 * cell_h).round() as i32;
                let y1 = ((r + 1) as f64 * cell_h).round() as i32;
                area.draw(&Rectangle::new([(x0, y0), (x1, y1)], colormap(level).filled()))
                    .map_err(plot_err)?;
            }
            start = end;
        }
    }
    Ok(())
}

/// Side-by-side planes of one event: originals on top, reconstructions below,
/// captioned with the reconstruction error (red when anomalous).
///
/// Both arrays are `x × y × channels`; the file is named after the 1-based
/// event number.
pub fn plot_reconstruction<'a>(
    event: usize,
    original: ArrayView3<'a, f32>,
    reconstructed: ArrayView3<'a, f32>,
    error: f64,
    threshold: f64,
    dir: &Path,
) -> Result<PathBuf> {
    if original.shape() != reconstructed.shape() {
        return Err(AutoencoderError::shape_mismatch(original.shape(), reconstructed.shape()));
    }
    let (x, y, channels) = original.dim();
    let panel_height = (PANEL_WIDTH as f64 * x as f64 / y.max(1) as f64).round() as u32;
    let size = (PANEL_WIDTH * channels.max(1) as u32, 2 * panel_height + CAPTION_HEIGHT);

    let path = svg_path(dir, &format!("reconstructed_event_number_{}", event + 1));
    {
        let root = SVGBackend::new(&path, size).into_drawing_area();
        root.fill(&WHITE).map_err(plot_err)?;

        let color = if error < threshold { BLACK } else { RED };
        let caption = format!("Reconstruction error: {error}");
        let body = root
            .titled(&caption, ("sans-serif", 16).into_font().color(&color))
            .map_err(plot_err)?;

        let panels = body.split_evenly((2, channels.max(1)));
        for (plane, panel) in panels.iter().enumerate() {
            let channel = plane % channels.max(1);
            let source = if plane < channels { &original } else { &reconstructed };
            draw_plane(panel, source.index_axis(Axis(2), channel))?;
        }
        root.present().map_err(plot_err)?;
    }
    debug!(path = %path.display(), event, error, "wrote reconstruction plot");
    Ok(path)
}
