//! Loss curve rendered as a standalone SVG file.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use tracing::info;


const WIDTH: f64 = 800.0;
const HEIGHT: f64 = 500.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 80.0;
const MARGIN_LEFT: f64 = 80.0;
const Y_TICKS: usize = 5;

const LINE_COLOR: &str = "#1f77b4";
const GRID_COLOR: &str = "#e5e5e5";
const AXIS_COLOR: &str = "#333333";
const FONT: &str = "font-family=\"sans-serif\"";


pub struct LineChart<'a> {
    pub title: &'a str,
    pub x_label: &'a str,
    pub y_label: &'a str,
    pub legend: &'a str,
}

pub const LOSS_CHART: LineChart<'static> = LineChart {
    title: "Training Loss Curve",
    x_label: "Epoch",
    y_label: "Loss",
    legend: "Training Loss",
};


/// Writes the per-epoch losses as a line chart to `path`.
pub fn plot_training_curve(losses: &[f64], path: &Path) -> Result<()> {
    ensure!(!losses.is_empty(), "no losses to plot");

    let svg = render_line_chart(&LOSS_CHART, losses);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, svg)
        .with_context(|| format!("writing loss curve to {}", path.display()))?;

    info!(path = %path.display(), epochs = losses.len(), "loss curve written");
    Ok(())
}


/// Point `i` of `ys` is drawn at x = i. The y axis starts at 0.
pub fn render_line_chart(chart: &LineChart, ys: &[f64]) -> String {
    let plot_w = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_h = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    let x_max = ys.len().saturating_sub(1).max(1) as f64;
    let y_top = ys.iter().cloned().filter(|y| y.is_finite()).fold(0.0f64, f64::max);
    let y_max = if y_top > 0.0 { y_top * 1.1 } else { 1.0 };

    let to_x = |i: usize| MARGIN_LEFT + (i as f64 / x_max) * plot_w;
    let to_y = |y: f64| MARGIN_TOP + plot_h - (y / y_max) * plot_h;

    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}">"#,
        w = WIDTH,
        h = HEIGHT
    );
    let _ = write!(svg, r#"<rect width="{}" height="{}" fill="white"/>"#, WIDTH, HEIGHT);
    let _ = write!(
        svg,
        r#"<text x="{}" y="35" text-anchor="middle" {} font-size="18" font-weight="bold">{}</text>"#,
        WIDTH / 2.0, FONT, escape_xml(chart.title)
    );

    for tick in 0..=Y_TICKS {
        let value = y_max * tick as f64 / Y_TICKS as f64;
        let y = to_y(value);
        let _ = write!(
            svg,
            r#"<line x1="{}" y1="{y}" x2="{}" y2="{y}" stroke="{}" stroke-width="1"/>"#,
            MARGIN_LEFT, MARGIN_LEFT + plot_w, GRID_COLOR, y = y
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="end" {} font-size="12">{:.3}</text>"#,
            MARGIN_LEFT - 10.0, y + 4.0, FONT, value
        );
    }

    // axes
    let _ = write!(
        svg,
        r#"<line x1="{l}" y1="{b}" x2="{r}" y2="{b}" stroke="{c}" stroke-width="2"/><line x1="{l}" y1="{t}" x2="{l}" y2="{b}" stroke="{c}" stroke-width="2"/>"#,
        l = MARGIN_LEFT, r = MARGIN_LEFT + plot_w, t = MARGIN_TOP, b = MARGIN_TOP + plot_h, c = AXIS_COLOR
    );
    let _ = write!(
        svg,
        r#"<text x="{}" y="{}" text-anchor="middle" {} font-size="14">{}</text>"#,
        MARGIN_LEFT + plot_w / 2.0, HEIGHT - 20.0, FONT, escape_xml(chart.x_label)
    );
    let _ = write!(
        svg,
        r#"<text x="20" y="{y}" text-anchor="middle" {} font-size="14" transform="rotate(-90 20 {y})">{}</text>"#,
        FONT, escape_xml(chart.y_label), y = HEIGHT / 2.0
    );

    for i in 0..ys.len() {
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="middle" {} font-size="11">{}</text>"#,
            to_x(i), MARGIN_TOP + plot_h + 20.0, FONT, i
        );
    }

    let points: Vec<String> = ys
        .iter()
        .enumerate()
        .map(|(i, &y)| format!("{:.2},{:.2}", to_x(i), to_y(y)))
        .collect();
    let _ = write!(
        svg,
        r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="2"/>"#,
        points.join(" "), LINE_COLOR
    );

    // legend
    let legend_x = WIDTH - MARGIN_RIGHT - 140.0;
    let _ = write!(
        svg,
        r#"<line x1="{}" y1="{y}" x2="{}" y2="{y}" stroke="{}" stroke-width="2"/><text x="{}" y="{}" {} font-size="12">{}</text>"#,
        legend_x, legend_x + 20.0, LINE_COLOR, legend_x + 28.0, MARGIN_TOP + 14.0, FONT, escape_xml(chart.legend),
        y = MARGIN_TOP + 10.0
    );

    svg.push_str("</svg>");
    svg
}


fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
