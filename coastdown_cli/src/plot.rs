use std::panic;
use std::path::Path;

use anyhow::{anyhow, Result};
use coastdown::surface::{Point3, ScatterColor, SurfaceFrame};
use coastdown::Colormap;
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};

const SPEED_FORCE_SIZE: (u32, u32) = (800, 500);
const LINE_SIZE: (u32, u32) = (1000, 500);
const SURFACE_SIZE: (u32, u32) = (900, 760);

/// Run a renderer, turning backend panics (missing fonts and the like) into
/// an error string so callers can log and carry on.
pub fn render_guard<F>(render: F) -> Result<(), String>
where
    F: FnOnce() -> Result<()>,
{
    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
        .map_err(|err| format!("plotting error: {}", err))
}

fn font(size: f64) -> FontDesc<'static> {
    FontDesc::new(FontFamily::SansSerif, size, FontStyle::Normal)
}

fn finite_pairs(x: &[f64], y: &[f64]) -> Vec<(f64, f64)> {
    x.iter()
        .copied()
        .zip(y.iter().copied())
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .collect()
}

/// Axis span with a little headroom; degenerate spans are widened to one unit.
fn padded(lo: f64, hi: f64) -> std::ops::Range<f64> {
    if !(hi > lo) {
        return (lo - 0.5)..(lo + 0.5);
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad)..(hi + pad)
}

fn span(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values.filter(|v| v.is_finite()).fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Modelled road-load force over the observed speed span.
pub fn speed_force_chart(path: &Path, curve: &[(f64, f64)]) -> Result<()> {
    let (x_lo, x_hi) = span(curve.iter().map(|p| p.0)).ok_or_else(|| anyhow!("empty curve"))?;
    let (y_lo, y_hi) = span(curve.iter().map(|p| p.1)).ok_or_else(|| anyhow!("empty curve"))?;

    let root = BitMapBackend::new(path, SPEED_FORCE_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Speed vs Force Curve", font(22.0))
        .margin(20)
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 45)
        .build_cartesian_2d(padded(x_lo, x_hi), padded(y_lo, y_hi))?;
    chart
        .configure_mesh()
        .x_desc("Speed (km/h)")
        .y_desc("Force (N)")
        .label_style(font(15.0))
        .draw()?;
    chart.draw_series(LineSeries::new(
        curve.iter().copied(),
        BLUE.stroke_width(2),
    ))?;
    root.present()?;
    Ok(())
}

/// `y` against `x` for any two table columns.
pub fn line_chart(path: &Path, x: &[f64], y: &[f64], x_label: &str, y_label: &str) -> Result<()> {
    let points = finite_pairs(x, y);
    let (x_lo, x_hi) =
        span(points.iter().map(|p| p.0)).ok_or_else(|| anyhow!("no plottable rows"))?;
    let (y_lo, y_hi) =
        span(points.iter().map(|p| p.1)).ok_or_else(|| anyhow!("no plottable rows"))?;
    let title = format!("{} vs {}", y_label, x_label);

    let root = BitMapBackend::new(path, LINE_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(&title, font(22.0))
        .margin(20)
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 45)
        .build_cartesian_2d(padded(x_lo, x_hi), padded(y_lo, y_hi))?;
    chart
        .configure_mesh()
        .x_desc(x_label)
        .y_desc(y_label)
        .label_style(font(15.0))
        .draw()?;
    let color = RGBColor(31, 119, 180);
    chart
        .draw_series(LineSeries::new(points, &color))?
        .label(title.clone())
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], color));
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.7))
        .border_style(&BLACK.mix(0.3))
        .label_font(font(15.0))
        .position(SeriesLabelPosition::UpperRight)
        .draw()?;
    root.present()?;
    Ok(())
}

/// Speed over row index with the two selection markers and their readout.
pub fn speed_selector_chart(
    path: &Path,
    speed: &[f64],
    markers: (f64, f64),
    readout: &str,
) -> Result<()> {
    let index: Vec<f64> = (0..speed.len()).map(|i| i as f64).collect();
    let points = finite_pairs(&index, speed);
    let (y_lo, y_hi) =
        span(points.iter().map(|p| p.1)).ok_or_else(|| anyhow!("speed column is empty"))?;
    let x_hi = span(index.iter().copied().chain([markers.0, markers.1]))
        .map_or(1.0, |(_, hi)| hi);
    let y_range = padded(y_lo, y_hi);

    let root = BitMapBackend::new(path, LINE_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Speed vs Time", font(22.0))
        .margin(20)
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 45)
        .build_cartesian_2d(0.0..x_hi.max(1.0), y_range.clone())?;
    chart
        .configure_mesh()
        .x_desc("Time index")
        .y_desc("Speed (km/h)")
        .label_style(font(15.0))
        .draw()?;

    let speed_color = RGBColor(31, 119, 180);
    chart
        .draw_series(LineSeries::new(points, &speed_color))?
        .label("Speed (km/h)")
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], speed_color));
    for (label, x, color) in [("Point 1", markers.0, RED), ("Point 2", markers.1, BLUE)] {
        chart
            .draw_series(LineSeries::new(
                vec![(x, y_range.start), (x, y_range.end)],
                color.stroke_width(2),
            ))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], color));
    }
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.7))
        .border_style(&BLACK.mix(0.3))
        .label_font(font(15.0))
        .position(SeriesLabelPosition::UpperRight)
        .draw()?;

    for (i, line) in readout.lines().enumerate() {
        root.draw(&Text::new(
            line.to_string(),
            (90, 50 + 20 * i as i32),
            font(16.0).color(&BLACK),
        ))?;
    }
    root.present()?;
    Ok(())
}

pub struct AxisLabels<'a> {
    pub x: &'a str,
    pub y: &'a str,
    pub z: &'a str,
}

/// One surface frame: a colour-mapped surface, a scatter fallback, or just the
/// title when the window held too few points. Z is drawn upwards.
pub fn surface_chart(
    path: &Path,
    frame: &SurfaceFrame,
    colormap: Colormap,
    labels: &AxisLabels,
) -> Result<()> {
    let root = BitMapBackend::new(path, SURFACE_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let points = frame.points();
    if points.is_empty() {
        root.draw(&Text::new(
            frame.title(),
            (SURFACE_SIZE.0 as i32 / 2 - 90, SURFACE_SIZE.1 as i32 / 2),
            font(24.0).color(&BLACK),
        ))?;
        root.present()?;
        return Ok(());
    }

    let (x_lo, x_hi) = span(points.iter().map(|p| p.x)).unwrap_or((0.0, 1.0));
    let (y_lo, y_hi) = span(points.iter().map(|p| p.y)).unwrap_or((0.0, 1.0));
    let (z_lo, z_hi) = match frame {
        SurfaceFrame::Surface { grid, .. } => grid
            .z_range()
            .into_iter()
            .chain(span(points.iter().map(|p| p.z)))
            .reduce(|a, b| (a.0.min(b.0), a.1.max(b.1)))
            .unwrap_or((0.0, 1.0)),
        _ => span(points.iter().map(|p| p.z)).unwrap_or((0.0, 1.0)),
    };

    let mut chart = ChartBuilder::on(&root)
        .caption(frame.title(), font(22.0))
        .margin(20)
        .build_cartesian_3d(padded(x_lo, x_hi), padded(z_lo, z_hi), padded(y_lo, y_hi))?;
    chart.with_projection(|mut pb| {
        pb.yaw = 0.6;
        pb.pitch = 0.35;
        pb.scale = 0.85;
        pb.into_matrix()
    });
    chart
        .configure_axes()
        .light_grid_style(BLACK.mix(0.1))
        .max_light_lines(3)
        .draw()?;

    let shade = |z: f64| {
        let (r, g, b) = colormap.map(z, z_lo, z_hi);
        RGBColor(r, g, b)
    };

    match frame {
        SurfaceFrame::Surface { grid, .. } => {
            let (rows, cols) = grid.z.dim();
            let mut cells = Vec::new();
            for j in 0..rows.saturating_sub(1) {
                for i in 0..cols.saturating_sub(1) {
                    let corners = [
                        (i, j),
                        (i + 1, j),
                        (i + 1, j + 1),
                        (i, j + 1),
                    ]
                    .map(|(ci, cj)| (grid.xs[ci], grid.z[[cj, ci]], grid.ys[cj]));
                    if corners.iter().any(|c| !c.1.is_finite()) {
                        continue;
                    }
                    let mean = corners.iter().map(|c| c.1).sum::<f64>() / 4.0;
                    cells.push((corners.to_vec(), shade(mean)));
                }
            }
            chart.draw_series(
                cells
                    .into_iter()
                    .map(|(corners, color)| Polygon::new(corners, color.filled())),
            )?;
        }
        SurfaceFrame::Scatter { color, .. } => {
            let style_for = |p: &Point3| match color {
                ScatterColor::ByZ => shade(p.z).filled(),
                ScatterColor::Uniform => BLUE.filled(),
            };
            chart.draw_series(
                points
                    .iter()
                    .map(|p| Circle::new((p.x, p.z, p.y), 4, style_for(p))),
            )?;
        }
        SurfaceFrame::TooFew { .. } => {}
    }

    let footer_y = SURFACE_SIZE.1 as i32 - 50;
    root.draw(&Text::new(
        format!("x: {}   y: {}   z: {}", labels.x, labels.y, labels.z),
        (20, footer_y),
        font(15.0).color(&BLACK),
    ))?;
    if let Some(note) = frame.note() {
        root.draw(&Text::new(
            note.to_string(),
            (20, footer_y + 22),
            font(15.0).color(&RED),
        ))?;
    }
    root.present()?;
    Ok(())
}
