//! Loss curves drawn with plotters.

use std::path::Path;

use anyhow::{bail, Result};
use plotters::prelude::*;

/// Finite `(epoch, loss)` points, epochs counted from 1.
fn points(losses: &[f32]) -> Vec<(f32, f32)> {
    losses
        .iter()
        .enumerate()
        .filter(|(_, loss)| loss.is_finite())
        .map(|(epoch, &loss)| ((epoch + 1) as f32, loss))
        .collect()
}

/// Draw training and validation losses per epoch into a PNG file.
///
/// Non-finite losses are left out of the lines. Axis labels and the legend
/// need a system font; without one the lines are still drawn.
///
/// # Errors
///
/// Fails when no loss is finite or the file cannot be written.
pub fn plot_losses(train: &[f32], valid: &[f32], path: &Path, size: (u32, u32)) -> Result<()> {
    let train_points = points(train);
    let valid_points = points(valid);
    let (lo, hi) = train_points
        .iter()
        .chain(&valid_points)
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &(_, v)| {
            (lo.min(v), hi.max(v))
        });
    if !lo.is_finite() {
        bail!("No finite losses to plot");
    }
    let pad = if hi > lo { (hi - lo) * 0.05 } else { 0.5 };
    let n_epochs = train.len().max(valid.len()).max(2) as f32;

    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(12)
        .x_label_area_size(36)
        .y_label_area_size(56)
        .build_cartesian_2d(1f32..n_epochs, (lo - pad)..(hi + pad))?;

    if let Err(e) = chart
        .configure_mesh()
        .x_desc("epoch")
        .y_desc("loss")
        .draw()
    {
        tracing::warn!(error = %e, "Loss plot axes drawn without labels");
    }

    chart
        .draw_series(LineSeries::new(train_points, BLUE.stroke_width(2)))?
        .label("train")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));
    chart
        .draw_series(LineSeries::new(valid_points, RED.stroke_width(2)))?
        .label("valid")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));

    if let Err(e) = chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
    {
        tracing::warn!(error = %e, "Loss plot legend skipped");
    }

    root.present()?;
    Ok(())
}
