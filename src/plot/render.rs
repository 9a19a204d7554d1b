//! PNG rendering with the plotters bitmap backend.

use super::geometry::{bracket_y, dash_segments, jitter_offsets, lighten, y_range, BoxStats};
use super::{build_panels, Bracket, FigureSpec, Panel, Palette};
use crate::data::AggregatedTable;
use crate::error::{AnalysisError, Result};
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::path::Path;
use tracing::info;

const BOX_HALF_WIDTH: f64 = 0.3;
const JITTER_WIDTH: f64 = 0.3;
/// Box fills are lightened so the strip points drawn over them stand out.
const BOX_LIGHTEN: f64 = 0.55;

fn plot_err<E: std::fmt::Display>(e: E) -> AnalysisError {
    AnalysisError::Plot(e.to_string())
}

/// Draw a figure of aggregated data to `path` as PNG.
///
/// All panels share one y range. The first panel carries the y axis and
/// label; later panels hide their y axis.
pub fn draw_figure(
    path: &Path,
    table: &AggregatedTable,
    spec: &FigureSpec,
    brackets: &[Bracket],
) -> Result<()> {
    let panels = build_panels(table, spec, brackets)?;
    let all_values: Vec<f64> = panels.iter().flat_map(|p| p.values()).collect();
    let n_levels = panels
        .iter()
        .map(|p| p.brackets(brackets).len())
        .max()
        .unwrap_or(0);
    let (y_lo, y_hi) = y_range(&all_values, n_levels);
    let data_max = all_values.iter().copied().filter(|v| v.is_finite()).fold(f64::NEG_INFINITY, f64::max);
    let data_min = all_values.iter().copied().filter(|v| v.is_finite()).fold(f64::INFINITY, f64::min);

    let root = BitMapBackend::new(path, (spec.width, spec.height)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let areas = root.split_evenly((1, panels.len().max(1)));

    for (i, (panel, area)) in panels.iter().zip(areas.iter()).enumerate() {
        let x_desc = panel.title.clone().unwrap_or_else(|| spec.x.clone());
        draw_panel(
            area,
            panel,
            spec,
            &panel.brackets(brackets),
            (y_lo, y_hi),
            (data_min, data_max),
            &x_desc,
            i == 0,
            spec.seed.wrapping_add(i as u64),
        )?;
    }

    root.present().map_err(plot_err)?;
    info!("Wrote figure {}", path.display());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn draw_panel<DB: DrawingBackend>(
    area: &DrawingArea<DB, plotters::coord::Shift>,
    panel: &Panel,
    spec: &FigureSpec,
    brackets: &[&Bracket],
    (y_lo, y_hi): (f64, f64),
    (data_min, data_max): (f64, f64),
    x_desc: &str,
    show_y: bool,
    seed: u64,
) -> Result<()> {
    let k = panel.categories.len();
    let names: Vec<String> = panel.categories.iter().map(|c| c.name.clone()).collect();

    let mut chart = ChartBuilder::on(area)
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(if show_y { 80 } else { 0 })
        .build_cartesian_2d(-0.5..(k as f64 - 0.5), y_lo..y_hi)
        .map_err(plot_err)?;

    let label_at = |v: &f64| {
        let idx = v.round();
        if (v - idx).abs() < 1e-6 && idx >= 0.0 && (idx as usize) < names.len() {
            names[idx as usize].clone()
        } else {
            String::new()
        }
    };

    {
        let mut mesh = chart.configure_mesh();
        mesh.disable_mesh()
            .x_labels(k.max(1))
            .x_label_formatter(&label_at)
            .x_desc(x_desc)
            .axis_desc_style(("sans-serif", 20))
            .label_style(("sans-serif", 16));
        if show_y {
            mesh.y_desc(spec.y_label.as_str());
        } else {
            mesh.disable_y_axis();
        }
        mesh.draw().map_err(plot_err)?;
    }

    let palette: Palette = spec.palette;
    let mut points = Vec::with_capacity(k);
    for (j, category) in panel.categories.iter().enumerate() {
        let x = j as f64;
        let (r, g, b) = palette.color(j);
        let fill = RGBColor(r, g, b);
        let (br, bg, bb) = lighten((r, g, b), BOX_LIGHTEN);
        let box_fill = RGBColor(br, bg, bb);

        if let Some(stats) = BoxStats::from_values(&category.values) {
            chart
                .draw_series(std::iter::once(Rectangle::new(
                    [(x - BOX_HALF_WIDTH, stats.q1), (x + BOX_HALF_WIDTH, stats.q3)],
                    box_fill.filled(),
                )))
                .map_err(plot_err)?;
            chart
                .draw_series(std::iter::once(Rectangle::new(
                    [(x - BOX_HALF_WIDTH, stats.q1), (x + BOX_HALF_WIDTH, stats.q3)],
                    BLACK.stroke_width(1),
                )))
                .map_err(plot_err)?;
            chart
                .draw_series(std::iter::once(PathElement::new(
                    vec![(x - BOX_HALF_WIDTH, stats.median), (x + BOX_HALF_WIDTH, stats.median)],
                    BLACK.stroke_width(1),
                )))
                .map_err(plot_err)?;
        }

        let jitter = jitter_offsets(
            category.values.len(),
            JITTER_WIDTH,
            seed.wrapping_mul(31).wrapping_add(j as u64),
        );
        let finite = category
            .values
            .iter()
            .zip(&jitter)
            .filter(|(v, _)| v.is_finite());
        for (&v, &dx) in finite {
            chart
                .draw_series(std::iter::once(Circle::new((x + dx, v), 5, fill.mix(0.9).filled())))
                .map_err(plot_err)?;
            chart
                .draw_series(std::iter::once(Circle::new(
                    (x + dx, v),
                    5,
                    BLACK.mix(0.6).stroke_width(1),
                )))
                .map_err(plot_err)?;
        }

        let estimate = spec.estimator.estimate(&category.values);
        if estimate.is_finite() {
            points.push((x, estimate));
        }
    }

    for dash in dash_segments(&points, 6) {
        chart
            .draw_series(std::iter::once(PathElement::new(dash.to_vec(), BLACK.stroke_width(2))))
            .map_err(plot_err)?;
    }
    chart
        .draw_series(points.iter().map(|&p| Circle::new(p, 6, BLACK.filled())))
        .map_err(plot_err)?;

    let span = if data_max > data_min { data_max - data_min } else { 1.0 };
    let text_style = TextStyle::from(("sans-serif", 22).into_font())
        .pos(Pos::new(HPos::Center, VPos::Bottom));
    for (level, bracket) in brackets.iter().enumerate() {
        let (Some(a), Some(b)) = (panel.position(&bracket.first), panel.position(&bracket.second))
        else {
            continue;
        };
        let (x1, x2) = (a.min(b) as f64, a.max(b) as f64);
        let (bar, leg) = bracket_y(data_max, span, level);
        chart
            .draw_series(std::iter::once(PathElement::new(
                vec![(x1, leg), (x1, bar), (x2, bar), (x2, leg)],
                BLACK.stroke_width(1),
            )))
            .map_err(plot_err)?;
        chart
            .draw_series(std::iter::once(Text::new(
                bracket.label.clone(),
                ((x1 + x2) / 2.0, bar),
                text_style.clone(),
            )))
            .map_err(plot_err)?;
    }

    Ok(())
}
