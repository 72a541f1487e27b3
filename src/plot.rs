//! Chart rendering. Writes SVG artifacts into the fixed `plots/` directory
//! and returns the artifact path; the active table is never touched.

use std::path::{Path, PathBuf};

use plotters::prelude::*;

use crate::error::AppError;
use crate::registry::params::{PlotKind, PlotTableParams};
use crate::table::{Cell, Table};

/// Fixed output subdirectory for plot artifacts.
pub const PLOTS_DIR: &str = "plots";

const WIDTH: u32 = 1000;
const HEIGHT: u32 = 600;
const HISTOGRAM_BINS: usize = 10;

fn draw_err(e: impl std::fmt::Display) -> AppError {
    AppError::ArtifactWrite {
        message: format!("Chart rendering failed: {e}"),
    }
}

fn column_values(table: &Table, name: &str) -> Result<Vec<f64>, AppError> {
    let idx = table
        .column_index(name)
        .ok_or_else(|| AppError::UnknownColumn {
            columns: vec![name.to_string()],
        })?;
    Ok(table
        .column_cells(idx)
        .into_iter()
        .filter_map(Cell::as_number)
        .collect())
}

fn column_labels(table: &Table, name: &str) -> Result<Vec<String>, AppError> {
    let idx = table
        .column_index(name)
        .ok_or_else(|| AppError::UnknownColumn {
            columns: vec![name.to_string()],
        })?;
    Ok(table
        .column_cells(idx)
        .into_iter()
        .map(ToString::to_string)
        .collect())
}

/// Numeric (x, y) pairs for rows where both cells are numeric.
fn xy_pairs(table: &Table, x: &str, y: &str) -> Result<Vec<(f64, f64)>, AppError> {
    let xi = table.column_index(x).ok_or_else(|| AppError::UnknownColumn {
        columns: vec![x.to_string()],
    })?;
    let yi = table.column_index(y).ok_or_else(|| AppError::UnknownColumn {
        columns: vec![y.to_string()],
    })?;
    let pairs: Vec<(f64, f64)> = table
        .rows()
        .iter()
        .filter_map(|row| {
            let xv = row.get(xi).and_then(Cell::as_number)?;
            let yv = row.get(yi).and_then(Cell::as_number)?;
            Some((xv, yv))
        })
        .collect();
    if pairs.is_empty() {
        return Err(AppError::Transform {
            message: format!("No numeric ({x}, {y}) pairs to plot"),
        });
    }
    Ok(pairs)
}

/// Pad a degenerate range so plotters always gets a non-empty axis.
fn padded(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        min = min.min(v);
        max = max.max(v);
    }
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    if (max - min).abs() < f64::EPSILON {
        (min - 1.0, max + 1.0)
    } else {
        (min, max)
    }
}

fn require(column: Option<&String>, what: &str, kind: PlotKind) -> Result<String, AppError> {
    column.cloned().ok_or_else(|| AppError::InvalidArgument {
        message: format!("{what} is required for {} plots", kind.slug()),
    })
}

/// Render `table` per the plot parameters and return the written path.
pub fn render(table: &Table, p: &PlotTableParams) -> Result<PathBuf, AppError> {
    if table.is_empty() {
        return Err(AppError::Transform {
            message: "The active table has no rows to plot".to_string(),
        });
    }
    std::fs::create_dir_all(PLOTS_DIR).map_err(|e| AppError::ArtifactWrite {
        message: format!("{PLOTS_DIR}: {e}"),
    })?;
    let path = Path::new(PLOTS_DIR).join(&p.output_filename);

    match p.plot_kind {
        PlotKind::Line => render_line(table, p, &path, false)?,
        PlotKind::Scatter => render_line(table, p, &path, true)?,
        PlotKind::Bar => render_bar(table, p, &path)?,
        PlotKind::Histogram => render_histogram(table, p, &path)?,
    }
    Ok(path)
}

fn render_line(
    table: &Table,
    p: &PlotTableParams,
    path: &Path,
    points_only: bool,
) -> Result<(), AppError> {
    let x_name = require(p.x_column.as_ref(), "x_column", p.plot_kind)?;
    let y_name = require(p.y_column.as_ref(), "y_column", p.plot_kind)?;
    let pairs = xy_pairs(table, &x_name, &y_name)?;
    let (x_min, x_max) = padded(pairs.iter().map(|(x, _)| *x));
    let (y_min, y_max) = padded(pairs.iter().map(|(_, y)| *y));
    let title = p.title.clone().unwrap_or_else(|| format!("{y_name} by {x_name}"));

    let root = SVGBackend::new(path, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(draw_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(&title, ("sans-serif", 30))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(draw_err)?;
    chart
        .configure_mesh()
        .x_desc(&x_name)
        .y_desc(&y_name)
        .draw()
        .map_err(draw_err)?;

    if points_only {
        chart
            .draw_series(
                pairs
                    .iter()
                    .map(|&(x, y)| Circle::new((x, y), 4, BLUE.filled())),
            )
            .map_err(draw_err)?;
    } else {
        chart
            .draw_series(LineSeries::new(pairs.iter().copied(), &BLUE))
            .map_err(draw_err)?;
    }
    root.present().map_err(draw_err)?;
    Ok(())
}

fn render_bar(table: &Table, p: &PlotTableParams, path: &Path) -> Result<(), AppError> {
    let x_name = require(p.x_column.as_ref(), "x_column", p.plot_kind)?;
    let y_name = require(p.y_column.as_ref(), "y_column", p.plot_kind)?;
    let labels = column_labels(table, &x_name)?;
    let values = column_values(table, &y_name)?;
    if values.is_empty() {
        return Err(AppError::Transform {
            message: format!("Column '{y_name}' has no numeric values to plot"),
        });
    }
    let (_, y_max) = padded(values.iter().copied());
    let y_floor = values.iter().copied().fold(0.0f64, f64::min);
    let title = p.title.clone().unwrap_or_else(|| format!("{y_name} by {x_name}"));

    let root = SVGBackend::new(path, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(draw_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(&title, ("sans-serif", 30))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..values.len() as f64, y_floor..y_max * 1.1)
        .map_err(draw_err)?;
    chart
        .configure_mesh()
        .x_desc(&x_name)
        .y_desc(&y_name)
        .x_labels(labels.len().min(20))
        .x_label_formatter(&|x| {
            let idx = *x as usize;
            labels.get(idx).cloned().unwrap_or_default()
        })
        .draw()
        .map_err(draw_err)?;
    chart
        .draw_series(values.iter().enumerate().map(|(i, &v)| {
            Rectangle::new([(i as f64 + 0.1, 0.0), (i as f64 + 0.9, v)], BLUE.filled())
        }))
        .map_err(draw_err)?;
    root.present().map_err(draw_err)?;
    Ok(())
}

fn render_histogram(table: &Table, p: &PlotTableParams, path: &Path) -> Result<(), AppError> {
    let x_name = require(p.x_column.as_ref(), "x_column", p.plot_kind)?;
    let values = column_values(table, &x_name)?;
    if values.is_empty() {
        return Err(AppError::Transform {
            message: format!("Column '{x_name}' has no numeric values to plot"),
        });
    }
    let (min, max) = padded(values.iter().copied());
    let bin_width = (max - min) / HISTOGRAM_BINS as f64;
    let mut counts = vec![0usize; HISTOGRAM_BINS];
    for &v in &values {
        let bin = (((v - min) / bin_width) as usize).min(HISTOGRAM_BINS - 1);
        if let Some(slot) = counts.get_mut(bin) {
            *slot += 1;
        }
    }
    let count_max = counts.iter().copied().max().unwrap_or(1) as f64;
    let title = p
        .title
        .clone()
        .unwrap_or_else(|| format!("Distribution of {x_name}"));

    let root = SVGBackend::new(path, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(draw_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(&title, ("sans-serif", 30))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(min..max, 0f64..count_max * 1.1)
        .map_err(draw_err)?;
    chart
        .configure_mesh()
        .x_desc(&x_name)
        .y_desc("Count")
        .draw()
        .map_err(draw_err)?;
    chart
        .draw_series(counts.iter().enumerate().map(|(i, &c)| {
            let x0 = min + i as f64 * bin_width;
            Rectangle::new([(x0, 0.0), (x0 + bin_width, c as f64)], BLUE.filled())
        }))
        .map_err(draw_err)?;
    root.present().map_err(draw_err)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::registry::params::PlotKind;

    // The plots directory is resolved against the working directory, so
    // tests that change it must not run concurrently.
    static CWD_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn grouped_sales() -> Table {
        let mut t = Table::new(vec!["Product".into(), "Sales_sum".into()]);
        t.push_row(vec![Cell::Text("Gadget".into()), Cell::Number(120.0)]);
        t.push_row(vec![Cell::Text("Widget".into()), Cell::Number(80.0)]);
        t
    }

    #[test]
    fn test_bar_chart_writes_svg_under_plots_dir() {
        let _guard = CWD_LOCK.lock().unwrap();
        let cwd = std::env::temp_dir().join("tabula_plot_bar");
        let _ = std::fs::remove_dir_all(&cwd);
        std::fs::create_dir_all(&cwd).unwrap();
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(&cwd).unwrap();

        let params = PlotTableParams {
            plot_kind: PlotKind::Bar,
            output_filename: "sales.svg".into(),
            x_column: Some("Product".into()),
            y_column: Some("Sales_sum".into()),
            title: Some("Total Sales by Product".into()),
        };
        let path = render(&grouped_sales(), &params).unwrap();
        assert_eq!(path, Path::new(PLOTS_DIR).join("sales.svg"));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("<svg"));

        std::env::set_current_dir(original).unwrap();
        let _ = std::fs::remove_dir_all(&cwd);
    }

    #[test]
    fn test_line_requires_columns() {
        let params = PlotTableParams {
            plot_kind: PlotKind::Line,
            output_filename: "line.svg".into(),
            x_column: None,
            y_column: None,
            title: None,
        };
        let err = render(&grouped_sales(), &params).unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument { .. }));
    }

    #[test]
    fn test_histogram_bins_cover_all_values() {
        let _guard = CWD_LOCK.lock().unwrap();
        let cwd = std::env::temp_dir().join("tabula_plot_hist");
        let _ = std::fs::remove_dir_all(&cwd);
        std::fs::create_dir_all(&cwd).unwrap();
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(&cwd).unwrap();

        let mut t = Table::new(vec!["Units".into()]);
        for v in [1.0, 2.0, 2.0, 3.0, 10.0] {
            t.push_row(vec![Cell::Number(v)]);
        }
        let params = PlotTableParams {
            plot_kind: PlotKind::Histogram,
            output_filename: "units.svg".into(),
            x_column: Some("Units".into()),
            y_column: None,
            title: None,
        };
        let path = render(&t, &params).unwrap();
        assert!(path.exists());

        std::env::set_current_dir(original).unwrap();
        let _ = std::fs::remove_dir_all(&cwd);
    }
}
