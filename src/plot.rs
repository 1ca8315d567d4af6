//! Training-curve plot

use plotters::prelude::*;
use std::path::Path;
use tracing::info;

use crate::error::{Result, TunerError};
use crate::training::History;

const SIZE: (u32, u32) = (640, 480);

fn plot_err(e: impl std::fmt::Display) -> TunerError {
    TunerError::PlotError(e.to_string())
}

/// Plot train/validation loss and accuracy per epoch to a PNG at `path`
pub fn save_plot(history: &History, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if history.is_empty() {
        return Err(TunerError::PlotError("history has no epochs".to_string()));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let series = [
        ("train_loss", &history.loss, RED),
        ("val_loss", &history.val_loss, BLUE),
        ("train_acc", &history.accuracy, MAGENTA),
        ("val_acc", &history.val_accuracy, GREEN),
    ];
    let y_max = series
        .iter()
        .flat_map(|(_, values, _)| values.iter().copied())
        .filter(|v| v.is_finite())
        .fold(1.0f64, f64::max);
    let x_min = history.epochs.first().copied().unwrap_or(0) as f64;
    let x_max = (history.epochs.last().copied().unwrap_or(0) as f64).max(x_min + 1.0);

    let root = BitMapBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Training Loss and Accuracy", ("sans-serif", 22))
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_min..x_max, 0f64..y_max * 1.05)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc("Epoch #")
        .y_desc("Loss/Accuracy")
        .draw()
        .map_err(plot_err)?;

    for (label, values, color) in series {
        let points = history
            .epochs
            .iter()
            .zip(values.iter())
            .filter(|(_, v)| v.is_finite())
            .map(|(&epoch, &v)| (epoch as f64, v));
        chart
            .draw_series(LineSeries::new(points, &color))
            .map_err(plot_err)?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &color));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::LowerLeft)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    info!(path = %path.display(), "Saved training plot");
    Ok(())
}
