use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use plotters::coord::types::RangedCoordf64;
use plotters::coord::Shift;
use plotters::prelude::*;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};

use crate::artifact::ErrorRecord;
use crate::atmos;
use crate::codec::{self, VariableSchema, HUMIDITY, TEMPERATURE};
use crate::config::PlotConfig;
use crate::data::Predictions;
use crate::eps::EpsBackend;
use crate::error::{ensure_same_shape, DiagnosticsError, Result};
use crate::latlev::{self, LatLevStats};
use crate::stats::{self, StatKind};

type LineChart<'a, DB> = ChartContext<'a, DB, Cartesian2d<RangedCoordf64, RangedCoordf64>>;

/// Viridis colormap - maps value in [0, 1] to RGB
fn viridis_color(t: f64) -> RGBColor {
    // Viridis colormap approximation (purple → cyan → yellow)
    let r = (0.267 + t * (0.329 - 0.267 + t * (0.984 - 0.329))) * 255.0;
    let g = (0.005 + t * (0.569 - 0.005 + t * (0.906 - 0.569))) * 255.0;
    let b = (0.329 + t * (0.758 - 0.329 - t * (0.758 - 0.121))) * 255.0;

    RGBColor(
        r.min(255.0).max(0.0) as u8,
        g.min(255.0).max(0.0) as u8,
        b.min(255.0).max(0.0) as u8,
    )
}

/// Index of the colour band `v` falls in, out of `bands` equal bands over [lo, hi].
fn band_index(v: f64, lo: f64, hi: f64, bands: usize) -> usize {
    if hi <= lo || bands <= 1 {
        return 0;
    }
    let idx = ((v - lo) / (hi - lo) * bands as f64).floor();
    (idx.max(0.0) as usize).min(bands - 1)
}

fn band_color(idx: usize, bands: usize) -> RGBColor {
    if bands <= 1 {
        return viridis_color(0.5);
    }
    viridis_color(idx as f64 / (bands - 1) as f64)
}

/// Widen a range by 5% on each side; a degenerate range gets a fixed pad.
fn padded((lo, hi): (f64, f64)) -> (f64, f64) {
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    let span = hi - lo;
    let pad = if span.abs() < 1e-12 {
        lo.abs().max(1.0) * 0.05
    } else {
        span * 0.05
    };
    (lo - pad, hi + pad)
}

/// Cell boundaries around each centre: midpoints between neighbours, with the
/// outer cells as wide as their inner neighbour.
fn cell_edges(centers: &[f64]) -> Vec<f64> {
    match centers.len() {
        0 => Vec::new(),
        1 => {
            let half = centers[0].abs().max(1.0) * 0.05;
            vec![centers[0] - half, centers[0] + half]
        }
        n => {
            let mut edges = Vec::with_capacity(n + 1);
            edges.push(centers[0] - 0.5 * (centers[1] - centers[0]));
            for pair in centers.windows(2) {
                edges.push(0.5 * (pair[0] + pair[1]));
            }
            edges.push(centers[n - 1] + 0.5 * (centers[n - 1] - centers[n - 2]));
            edges
        }
    }
}

/// Split a series into runs of consecutive points whose coordinates are
/// finite and whose y passes `keep`.
fn finite_runs(points: impl IntoIterator<Item = (f64, f64)>, keep: impl Fn(f64) -> bool) -> Vec<Vec<(f64, f64)>> {
    let mut runs = Vec::new();
    let mut current = Vec::new();
    for (x, y) in points {
        if x.is_finite() && y.is_finite() && keep(y) {
            current.push((x, y));
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

/// Shared bounds of two series, used for both axes of a scatter.
pub fn joint_limits(a: &[f64], b: &[f64]) -> Option<(f64, f64)> {
    stats::finite_bounds(a.iter().chain(b.iter()))
}

fn tick_label(v: f64) -> String {
    if v != 0.0 && (v.abs() < 0.01 || v.abs() >= 1e4) {
        format!("{:.1e}", v)
    } else {
        format!("{:.2}", v)
    }
}

/// Draw a figure into a PNG at `path`.
///
/// The drawing root only lives for the duration of `draw`, so nothing leaks
/// between figures.
pub fn render_png<F>(path: &Path, size: (u32, u32), draw: F) -> Result<()>
where
    F: FnOnce(&DrawingArea<BitMapBackend<'_>, Shift>) -> Result<()>,
{
    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    draw(&root)?;
    root.present()?;
    log::info!("📊 Figure saved to: {}", path.display());
    Ok(())
}

/// Draw a figure into an Encapsulated PostScript file at `path`.
pub fn render_eps<F>(path: &Path, size: (u32, u32), draw: F) -> Result<()>
where
    F: FnOnce(&DrawingArea<EpsBackend<'_>, Shift>) -> Result<()>,
{
    let root = EpsBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    draw(&root)?;
    root.present()?;
    log::info!("📊 Figure saved to: {}", path.display());
    Ok(())
}

/// Output directory and drawing settings of one diagnostics run.
#[derive(Debug, Clone, Copy)]
pub struct FigureDir<'a> {
    pub dir: &'a Path,
    pub config: &'a PlotConfig,
}

impl<'a> FigureDir<'a> {
    pub fn new(dir: &'a Path, config: &'a PlotConfig) -> Self {
        Self { dir, config }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Subdirectory for per-level or per-example figures, created on demand.
    fn subdir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.dir.join(name);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn size(&self) -> (u32, u32) {
        self.config.figure_size
    }
}

/// Vertical coordinate of a profile panel, drawn with its largest value at
/// the bottom.
struct VerticalAxis<'a> {
    coords: &'a [f64],
    range: (f64, f64),
    desc: &'a str,
    decimals: usize,
}

impl<'a> VerticalAxis<'a> {
    fn sigma(lev: &'a [f64]) -> Self {
        let bounds = stats::finite_bounds(lev.iter()).unwrap_or((0.0, 1.0));
        Self {
            coords: lev,
            range: padded(bounds),
            desc: "σ",
            decimals: 2,
        }
    }

    fn pressure(hpa: &'a [f64]) -> Self {
        Self {
            coords: hpa,
            range: (250.0, 1000.0),
            desc: "Pressure [hPa]",
            decimals: 0,
        }
    }
}

/// One curve of a profile panel.
struct Curve<'a> {
    label: Option<&'a str>,
    values: Vec<f64>,
    color: RGBColor,
    alpha: f64,
}

impl<'a> Curve<'a> {
    fn new(label: &'a str, values: impl IntoIterator<Item = f64>, color: RGBColor) -> Self {
        Self {
            label: Some(label),
            values: values.into_iter().collect(),
            color,
            alpha: 1.0,
        }
    }

    fn unlabelled(values: impl IntoIterator<Item = f64>, color: RGBColor) -> Self {
        Self {
            label: None,
            values: values.into_iter().collect(),
            color,
            alpha: 1.0,
        }
    }

    fn faded(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }
}

/// Draw a line through `points`, skipping non-finite points. Only the first
/// segment gets the legend entry.
fn draw_line<'a, DB: DrawingBackend + 'a>(
    chart: &mut LineChart<'a, DB>,
    points: impl IntoIterator<Item = (f64, f64)>,
    label: Option<&str>,
    color: RGBColor,
    alpha: f64,
) -> Result<()> {
    let mut pending_label = label;
    for run in finite_runs(points, |_| true) {
        let anno = chart.draw_series(LineSeries::new(run, color.mix(alpha).stroke_width(2)))?;
        if let Some(text) = pending_label.take() {
            anno.label(text)
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.mix(alpha).stroke_width(2)));
        }
    }
    Ok(())
}

fn draw_legend<'a, DB: DrawingBackend + 'a>(chart: &mut LineChart<'a, DB>) -> Result<()> {
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .position(SeriesLabelPosition::UpperLeft)
        .draw()?;
    Ok(())
}

/// Curves against a vertical coordinate, e.g. per-level statistics.
fn draw_profile_panel<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    title: &str,
    x_desc: &str,
    axis: &VerticalAxis<'_>,
    x_range: Option<(f64, f64)>,
    curves: &[Curve<'_>],
) -> Result<()> {
    let (x_lo, x_hi) = x_range.unwrap_or_else(|| {
        let bounds = stats::finite_bounds(curves.iter().flat_map(|c| c.values.iter()));
        padded(bounds.unwrap_or((0.0, 1.0)))
    });
    let (y_lo, y_hi) = axis.range;
    let decimals = axis.decimals;

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 22).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(55)
        .build_cartesian_2d(x_lo..x_hi, -y_hi..-y_lo)?;

    chart
        .configure_mesh()
        .x_desc(x_desc)
        .y_desc(axis.desc)
        .x_label_formatter(&|v| tick_label(*v))
        .y_label_formatter(&|v| format!("{:.*}", decimals, -v))
        .draw()?;

    for curve in curves {
        let points = curve.values.iter().zip(axis.coords).map(|(&x, &y)| (x, -y));
        draw_line(&mut chart, points, curve.label, curve.color, curve.alpha)?;
    }
    if curves.iter().any(|c| c.label.is_some()) {
        draw_legend(&mut chart)?;
    }
    Ok(())
}

/// A field on a (x, level) grid drawn as colour bands.
pub struct GridPanel<'a> {
    pub title: &'a str,
    pub x_desc: &'a str,
    /// Cell centres along x.
    pub x: &'a [f64],
    pub lev: &'a [f64],
    /// Values shaped [levels, x]; non-finite cells are left blank.
    pub z: ArrayView2<'a, f64>,
    pub x_limits: Option<(f64, f64)>,
    pub bands: usize,
}

/// Filled banded field plus a colorbar on the right. Returns the x limits
/// the panel was drawn with.
pub fn draw_filled_grid<DB: DrawingBackend>(area: &DrawingArea<DB, Shift>, panel: &GridPanel<'_>) -> Result<(f64, f64)> {
    if panel.z.dim() != (panel.lev.len(), panel.x.len()) {
        return Err(DiagnosticsError::ShapeMismatch(format!(
            "grid panel '{}': field {:?} vs {} levels × {} columns",
            panel.title,
            panel.z.dim(),
            panel.lev.len(),
            panel.x.len()
        )));
    }

    let bands = panel.bands.max(1);
    let (value_lo, value_hi) = match stats::finite_bounds(panel.z.iter()) {
        Some(bounds) => bounds,
        None => {
            log::warn!("⚠️  '{}' has no finite values, drawing an empty panel", panel.title);
            (0.0, 1.0)
        }
    };
    let (value_lo, value_hi) = if value_hi > value_lo {
        (value_lo, value_hi)
    } else {
        padded((value_lo, value_hi))
    };

    let x_edges = cell_edges(panel.x);
    let y_edges = cell_edges(panel.lev);
    let (x_lo, x_hi) = match panel.x_limits {
        Some(limits) => limits,
        None => stats::finite_bounds(x_edges.iter()).unwrap_or((0.0, 1.0)),
    };
    let (x_lo, x_hi) = if x_hi > x_lo { (x_lo, x_hi) } else { padded((x_lo, x_hi)) };
    let (y_lo, y_hi) = stats::finite_bounds(y_edges.iter()).unwrap_or((0.0, 1.0));

    let (width, _) = area.dim_in_pixel();
    let (plot_area, bar_area) = area.split_horizontally((width as i32 - 110).max(1));

    let mut chart = ChartBuilder::on(&plot_area)
        .caption(panel.title, ("sans-serif", 22).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(55)
        .build_cartesian_2d(x_lo..x_hi, -y_hi..-y_lo)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc(panel.x_desc)
        .y_desc("σ")
        .x_label_formatter(&|v| tick_label(*v))
        .y_label_formatter(&|v| format!("{:.2}", -v))
        .draw()?;

    let mut cells = Vec::new();
    for (k, row) in panel.z.outer_iter().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            if !v.is_finite() {
                continue;
            }
            let left = x_edges[j].min(x_edges[j + 1]).max(x_lo);
            let right = x_edges[j].max(x_edges[j + 1]).min(x_hi);
            if right <= left {
                continue;
            }
            let color = band_color(band_index(v, value_lo, value_hi, bands), bands);
            cells.push(Rectangle::new(
                [(left, -y_edges[k]), (right, -y_edges[k + 1])],
                color.filled(),
            ));
        }
    }
    chart.draw_series(cells)?;

    draw_colorbar(&bar_area, value_lo, value_hi, bands)?;
    Ok((x_lo, x_hi))
}

fn draw_colorbar<DB: DrawingBackend>(area: &DrawingArea<DB, Shift>, lo: f64, hi: f64, bands: usize) -> Result<()> {
    let mut bar = ChartBuilder::on(area)
        .margin(10)
        .margin_top(40)
        .margin_bottom(50)
        .set_label_area_size(LabelAreaPosition::Right, 60)
        .build_cartesian_2d(0.0..1.0, lo..hi)?;

    bar.configure_mesh()
        .disable_mesh()
        .disable_x_axis()
        .y_labels(6)
        .y_label_formatter(&|v| tick_label(*v))
        .draw()?;

    let step = (hi - lo) / bands as f64;
    bar.draw_series((0..bands).map(|b| {
        let bottom = lo + step * b as f64;
        Rectangle::new([(0.0, bottom), (1.0, bottom + step)], band_color(b, bands).filled())
    }))?;
    Ok(())
}

/// Points of one variable against another with the 1:1 line, both axes on
/// the joint range of the two series. `note` is written in the top-left.
pub fn draw_scatter<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    truth: &[f64],
    pred: &[f64],
    title: &str,
    note: &str,
) -> Result<()> {
    if truth.len() != pred.len() {
        return Err(DiagnosticsError::ShapeMismatch(format!(
            "scatter '{}': {} true vs {} predicted values",
            title,
            truth.len(),
            pred.len()
        )));
    }
    let (lo, hi) = match joint_limits(truth, pred) {
        Some((lo, hi)) if hi > lo => (lo, hi),
        Some(bounds) => padded(bounds),
        None => (0.0, 1.0),
    };
    let span = hi - lo;

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 22).into_font())
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(lo..hi, lo..hi)?;

    chart
        .configure_mesh()
        .x_desc("True")
        .y_desc("Predicted")
        .x_label_formatter(&|v| tick_label(*v))
        .y_label_formatter(&|v| tick_label(*v))
        .draw()?;

    chart.draw_series(
        truth
            .iter()
            .zip(pred)
            .filter(|(t, p)| t.is_finite() && p.is_finite())
            .map(|(&t, &p)| Circle::new((t, p), 2, BLUE.mix(0.25).filled())),
    )?;
    chart.draw_series(LineSeries::new(vec![(lo, lo), (hi, hi)], BLACK.stroke_width(1)))?;
    chart.draw_series(std::iter::once(Text::new(
        note.to_string(),
        (lo + 0.01 * span, hi - 0.04 * span),
        ("sans-serif", 16).into_font().color(&BLACK),
    )))?;
    Ok(())
}

/// Histogram bars of `values` over `bins` equal bins spanning their range.
fn draw_histogram<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    values: &[f64],
    bins: usize,
    title: &str,
    x_desc: &str,
    label: &str,
    color: RGBColor,
) -> Result<()> {
    let (lo, hi) = match stats::finite_bounds(values.iter()) {
        Some((lo, hi)) if hi > lo => (lo, hi),
        Some(bounds) => padded(bounds),
        None => (0.0, 1.0),
    };
    let edges = stats::linspace(lo, hi, bins.max(1) + 1);
    let counts = stats::histogram(values.iter(), &edges);
    let top = counts.iter().copied().max().unwrap_or(0).max(1) as f64 * 1.1;

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 22).into_font())
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(lo..hi, 0.0..top)?;

    chart
        .configure_mesh()
        .x_desc(x_desc)
        .y_desc("Count")
        .x_label_formatter(&|v| tick_label(*v))
        .y_label_formatter(&|v| format!("{:.0}", v))
        .draw()?;

    chart
        .draw_series(counts.iter().enumerate().map(|(i, &c)| {
            Rectangle::new([(edges[i], 0.0), (edges[i + 1], c as f64)], color.mix(0.5).filled())
        }))?
        .label(label)
        .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 15, y + 5)], color.mix(0.5).filled()));

    draw_legend(&mut chart)?;
    Ok(())
}

/// Settings of one distribution heat map.
#[derive(Debug, Clone)]
pub struct DistributionOptions {
    pub bins: usize,
    /// Percentiles bounding the default bins.
    pub percentile_range: (f64, f64),
    /// Reuse these bin edges instead of deriving them from the data.
    pub bin_edges: Option<Vec<f64>>,
    pub x_limits: Option<(f64, f64)>,
    pub bands: usize,
}

impl DistributionOptions {
    pub fn from_config(config: &PlotConfig) -> Self {
        Self {
            bins: config.distribution_bins,
            percentile_range: config.percentile_range,
            bin_edges: None,
            x_limits: None,
            bands: config.contour_bands,
        }
    }

    /// Same settings, drawn on the bins and x limits of an earlier panel.
    pub fn reusing(&self, outcome: &DistributionOutcome) -> Self {
        Self {
            bin_edges: Some(outcome.bin_edges.clone()),
            x_limits: Some((outcome.x_lower, outcome.x_upper)),
            ..self.clone()
        }
    }
}

/// What a distribution panel was drawn with, so a second panel can match it.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionOutcome {
    pub x_lower: f64,
    pub x_upper: f64,
    pub bin_edges: Vec<f64>,
}

/// Per-level histogram counts and their base-10 logarithm.
#[derive(Debug, Clone)]
pub struct LogHistogram {
    pub bin_edges: Vec<f64>,
    /// [levels, bins]
    pub counts: Array2<usize>,
    /// log10 of `counts`; empty bins hold the smallest finite value (or 0).
    pub log_counts: Array2<f64>,
}

/// Histogram every level (column) of `data` on one set of bins.
pub fn distribution_histogram(data: ArrayView2<'_, f64>, lev: &[f64], options: &DistributionOptions) -> Result<LogHistogram> {
    if data.ncols() != lev.len() {
        return Err(DiagnosticsError::ShapeMismatch(format!(
            "distribution over {} columns but {} levels",
            data.ncols(),
            lev.len()
        )));
    }

    let bin_edges = match &options.bin_edges {
        Some(edges) => edges.clone(),
        None => {
            let (p_lo, p_hi) = options.percentile_range;
            let lo = stats::percentile(data.iter(), p_lo);
            let hi = stats::percentile(data.iter(), p_hi);
            let (lo, hi) = match (lo, hi) {
                (Some(lo), Some(hi)) if hi > lo => (lo, hi),
                (Some(lo), Some(hi)) => padded((lo, hi)),
                _ => {
                    return Err(DiagnosticsError::EmptyInput(
                        "no finite values to bin".to_string(),
                    ))
                }
            };
            stats::linspace(lo, hi, options.bins + 1)
        }
    };
    if bin_edges.len() < 2 {
        return Err(DiagnosticsError::InvalidConfig(format!(
            "need at least two bin edges, got {}",
            bin_edges.len()
        )));
    }

    let bins = bin_edges.len() - 1;
    let mut counts = Array2::zeros((lev.len(), bins));
    for (k, column) in data.columns().into_iter().enumerate() {
        for (b, c) in stats::histogram(column.iter(), &bin_edges).into_iter().enumerate() {
            counts[[k, b]] = c;
        }
    }

    let mut log_counts = counts.mapv(|c| (c as f64).log10());
    let floor = log_counts
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::INFINITY, f64::min);
    let floor = if floor.is_finite() { floor } else { 0.0 };
    log_counts.mapv_inplace(|v| if v.is_finite() { v } else { floor });

    Ok(LogHistogram {
        bin_edges,
        counts,
        log_counts,
    })
}

/// Heat map of log10 histogram counts per level.
///
/// Bins sit at their left edges, so the default x limits run from the first
/// to the last left edge.
pub fn plot_distribution<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    data: ArrayView2<'_, f64>,
    lev: &[f64],
    title: &str,
    xlabel: &str,
    options: &DistributionOptions,
) -> Result<DistributionOutcome> {
    let hist = distribution_histogram(data, lev, options)?;
    let bins = hist.bin_edges.len() - 1;
    let left_edges = &hist.bin_edges[..bins];
    let x_limits = options.x_limits.unwrap_or((left_edges[0], left_edges[bins - 1]));

    let (x_lower, x_upper) = draw_filled_grid(
        area,
        &GridPanel {
            title,
            x_desc: xlabel,
            x: left_edges,
            lev,
            z: hist.log_counts.view(),
            x_limits: Some(x_limits),
            bands: options.bands,
        },
    )?;

    Ok(DistributionOutcome {
        x_lower,
        x_upper,
        bin_edges: hist.bin_edges,
    })
}

/// Two stacked lat × level panels (temperature above humidity) sharing the
/// latitude axis.
#[allow(clippy::too_many_arguments)]
pub fn plot_contour<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    a: ArrayView2<'_, f64>,
    b: ArrayView2<'_, f64>,
    lat: &[f64],
    lev: &[f64],
    average_hemispheres: bool,
    titles: (&str, &str),
    bands: usize,
) -> Result<()> {
    let (a, b, lat): (Array2<f64>, Array2<f64>, Vec<f64>) = if average_hemispheres {
        let (a, _) = latlev::average_hemispheres(a, lat)?;
        let (b, folded) = latlev::average_hemispheres(b, lat)?;
        (a, b, folded)
    } else {
        (a.to_owned(), b.to_owned(), lat.to_vec())
    };

    let panels = area.split_evenly((2, 1));
    let limits = draw_filled_grid(
        &panels[0],
        &GridPanel {
            title: titles.0,
            x_desc: "",
            x: &lat,
            lev,
            z: a.view(),
            x_limits: None,
            bands,
        },
    )?;
    draw_filled_grid(
        &panels[1],
        &GridPanel {
            title: titles.1,
            x_desc: "Latitude",
            x: &lat,
            lev,
            z: b.view(),
            x_limits: Some(limits),
            bands,
        },
    )?;
    Ok(())
}

/// Training errors against iteration number on a log scale: cost-function
/// errors in blue, other training errors in red, cross-validation in green.
pub fn plot_error_history(errors: &[ErrorRecord], label: &str, fig: FigureDir<'_>) -> Result<PathBuf> {
    let path = fig.path("error_history.png");
    let columns: Vec<[f64; 6]> = errors.iter().map(ErrorRecord::as_array).collect();

    let positive = columns.iter().flatten().copied().filter(|v| v.is_finite() && *v > 0.0);
    let (y_lo, y_hi) = match stats::finite_bounds(positive.collect::<Vec<_>>().iter()) {
        Some((lo, hi)) if hi > lo => (lo, hi),
        Some((lo, hi)) => (lo * 0.5, hi * 2.0),
        None => {
            log::warn!("⚠️  No positive errors recorded for {label}");
            (1e-3, 1.0)
        }
    };
    let x_max = (columns.len().saturating_sub(1)).max(1) as f64;

    let groups: [([usize; 2], RGBColor, &str); 3] = [
        ([0, 1], BLUE, "Training (cost function)"),
        ([4, 5], RED, "Training"),
        ([2, 3], GREEN, "Cross-Val"),
    ];

    render_png(&path, fig.size(), |root| {
        let mut chart = ChartBuilder::on(root)
            .caption(format!("Error for {label}"), ("sans-serif", 40).into_font())
            .margin(20)
            .x_label_area_size(50)
            .y_label_area_size(80)
            .build_cartesian_2d(0f64..x_max, (y_lo..y_hi).log_scale())?;

        chart
            .configure_mesh()
            .x_desc("Iteration Number")
            .y_desc("Error")
            .y_label_formatter(&|v| tick_label(*v))
            .draw()?;

        for (cols, color, name) in groups {
            let mut pending_label = Some(name);
            for col in cols {
                let points = columns.iter().enumerate().map(|(i, row)| (i as f64, row[col]));
                for run in finite_runs(points, |y| y > 0.0) {
                    let anno = chart.draw_series(LineSeries::new(run, color.mix(0.5).stroke_width(2)))?;
                    if let Some(text) = pending_label.take() {
                        anno.label(text).legend(move |(x, y)| {
                            PathElement::new(vec![(x, y), (x + 20, y)], color.mix(0.5).stroke_width(2))
                        });
                    }
                }
            }
        }

        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .position(SeriesLabelPosition::UpperRight)
            .draw()?;
        Ok(())
    })?;
    Ok(path)
}

/// 2×2 distribution grid: T and q, each before and after scaling.
fn scaling_grid(
    path: &Path,
    fig: FigureDir<'_>,
    schema: &VariableSchema,
    unscaled: ArrayView2<'_, f64>,
    scaled: ArrayView2<'_, f64>,
    lev: &[f64],
    titles: [&str; 4],
) -> Result<()> {
    let options = DistributionOptions::from_config(fig.config);
    let t_unscaled = codec::unpack(schema, unscaled, TEMPERATURE)?;
    let t_scaled = codec::unpack(schema, scaled, TEMPERATURE)?;
    let q_unscaled = codec::unpack(schema, unscaled, HUMIDITY)?;
    let q_scaled = codec::unpack(schema, scaled, HUMIDITY)?;

    render_png(path, fig.size(), |root| {
        let panels = root.split_evenly((2, 2));
        let fields = [&t_unscaled, &t_scaled, &q_unscaled, &q_scaled];
        for ((panel, field), title) in panels.iter().zip(fields).zip(titles) {
            plot_distribution(panel, field.view(), lev, title, "", &options)?;
        }
        Ok(())
    })
}

/// How scaling changed the character of the inputs and the outputs.
pub fn check_scaling_distribution(
    fig: FigureDir<'_>,
    schema: &VariableSchema,
    predictions: &Predictions,
    lev: &[f64],
) -> Result<()> {
    scaling_grid(
        &fig.path("input_scaling_check.png"),
        fig,
        schema,
        predictions.x_unscaled.view(),
        predictions.x_scaled.view(),
        lev,
        ["T (unscaled) [K]", "T (scaled) []", "q (unscaled) [g/kg]", "q (scaled) []"],
    )?;
    scaling_grid(
        &fig.path("output_scaling_check.png"),
        fig,
        schema,
        predictions.y_true_unscaled.view(),
        predictions.y_true_scaled.view(),
        lev,
        [
            "T tend (unscaled) [K/day]",
            "T tend (scaled) []",
            "q tend (unscaled) [g/kg/day]",
            "q tend (scaled) []",
        ],
    )
}

/// 2×2 grid of true (left) vs predicted (right) distributions; each
/// predicted panel reuses the bins and x limits of its true panel.
#[allow(clippy::too_many_arguments)]
fn compare_grid(
    path: &Path,
    fig: FigureDir<'_>,
    schema: &VariableSchema,
    truth: ArrayView2<'_, f64>,
    pred: ArrayView2<'_, f64>,
    lev: &[f64],
    suffix: &str,
    units: (&str, &str),
) -> Result<()> {
    let options = DistributionOptions::from_config(fig.config);
    let mut rows = Vec::with_capacity(2);
    for (name, unit) in [(TEMPERATURE, units.0), (HUMIDITY, units.1)] {
        rows.push((
            name,
            unit,
            codec::unpack(schema, truth, name)?,
            codec::unpack(schema, pred, name)?,
        ));
    }

    render_png(path, fig.size(), |root| {
        let panels = root.split_evenly((2, 2));
        for (row, (name, unit, t, p)) in rows.iter().enumerate() {
            let true_title = format!("Δ{name} true{suffix} [{unit}]");
            let pred_title = format!("Δ{name} pred{suffix} [{unit}]");
            let outcome = plot_distribution(&panels[2 * row], t.view(), lev, &true_title, "", &options)?;
            plot_distribution(
                &panels[2 * row + 1],
                p.view(),
                lev,
                &pred_title,
                "",
                &options.reusing(&outcome),
            )?;
        }
        Ok(())
    })
}

/// How well the distributions of true and predicted outputs match, in
/// physical units and on the network's scale.
pub fn check_output_distribution(
    fig: FigureDir<'_>,
    schema: &VariableSchema,
    predictions: &Predictions,
    lev: &[f64],
) -> Result<()> {
    compare_grid(
        &fig.path("output_compare_true_pred_unscaled.png"),
        fig,
        schema,
        predictions.y_true_unscaled.view(),
        predictions.y_pred_unscaled.view(),
        lev,
        "",
        ("K/day", "g/kg/day"),
    )?;
    compare_grid(
        &fig.path("output_compare_true_pred_scaled.png"),
        fig,
        schema,
        predictions.y_true_scaled.view(),
        predictions.y_pred_scaled.view(),
        lev,
        " (scld)",
        ("", ""),
    )
}

fn units_of(variable: &str) -> &'static str {
    if variable == TEMPERATURE {
        "K/day"
    } else {
        "g/kg/day"
    }
}

/// Per-level means (top) and standard deviations (bottom) of the true and
/// predicted tendencies.
pub fn plot_means_stds(
    fig: FigureDir<'_>,
    schema: &VariableSchema,
    y_true: ArrayView2<'_, f64>,
    y_pred: ArrayView2<'_, f64>,
    lev: &[f64],
) -> Result<()> {
    let mut panels = Vec::with_capacity(4);
    for kind in [StatKind::Mean, StatKind::Std] {
        for variable in [TEMPERATURE, HUMIDITY] {
            let (t, p) = stats::mean_or_std(schema, kind, variable, y_true, y_pred)?;
            log::debug!("{} {variable}: true {t:?}, pred {p:?}", kind.title());
            panels.push((kind, variable, t, p));
        }
    }

    render_png(&fig.path("regress_means_stds.png"), fig.size(), |root| {
        let areas = root.split_evenly((2, 2));
        let axis = VerticalAxis::sigma(lev);
        for (area, (kind, variable, t, p)) in areas.iter().zip(&panels) {
            let title = format!("Δ{variable} {}", kind.title());
            let x_desc = if *kind == StatKind::Std { units_of(variable) } else { "" };
            let curves = [
                Curve::new("true", t.iter().copied(), BLUE),
                Curve::new("pred", p.iter().copied(), RED),
            ];
            draw_profile_panel(area, &title, x_desc, &axis, None, &curves)?;
        }
        Ok(())
    })
}

/// Correlation, explained variance and normalised RMSE per level.
pub fn plot_error_stats(
    fig: FigureDir<'_>,
    schema: &VariableSchema,
    y_true: ArrayView2<'_, f64>,
    y_pred: ArrayView2<'_, f64>,
    lev: &[f64],
) -> Result<()> {
    let r = stats::pearson_correlation(y_true, y_pred)?;
    let expl = stats::explained_variance(y_true, y_pred)?;
    let rmse = stats::rmse(y_true, y_pred)?;
    let per_var = |values: &Array1<f64>, name: &str| codec::unpack_row(schema, values.view(), name);

    let r_t = per_var(&r, TEMPERATURE)?;
    let r_q = per_var(&r, HUMIDITY)?;
    let e_t = per_var(&expl, TEMPERATURE)?;
    let e_q = per_var(&expl, HUMIDITY)?;
    let m_t = per_var(&rmse, TEMPERATURE)?;
    let m_q = per_var(&rmse, HUMIDITY)?;

    render_png(&fig.path("regress_stats.png"), fig.size(), |root| {
        let areas = root.split_evenly((2, 2));
        let axis = VerticalAxis::sigma(lev);
        draw_profile_panel(
            &areas[0],
            "Correlation Coefficient",
            "",
            &axis,
            None,
            &[
                Curve::new("T", r_t.iter().copied(), BLUE),
                Curve::new("q", r_q.iter().copied(), RED),
            ],
        )?;
        draw_profile_panel(
            &areas[1],
            "Explained Variance Regression Score",
            "",
            &axis,
            None,
            &[
                Curve::unlabelled(e_t.iter().copied(), BLUE),
                Curve::unlabelled(e_q.iter().copied(), RED),
            ],
        )?;
        draw_profile_panel(
            &areas[2],
            "Root Mean Squared Error/mean",
            units_of(TEMPERATURE),
            &axis,
            None,
            &[Curve::unlabelled(m_t.iter().copied(), BLUE)],
        )?;
        draw_profile_panel(
            &areas[3],
            "Root Mean Squared Error/mean",
            units_of(HUMIDITY),
            &axis,
            None,
            &[Curve::unlabelled(m_q.iter().copied(), RED)],
        )?;
        Ok(())
    })
}

fn precip_pair(
    schema: &VariableSchema,
    y_true: ArrayView2<'_, f64>,
    y_pred: ArrayView2<'_, f64>,
    dlev: &[f64],
) -> Result<(Array1<f64>, Array1<f64>)> {
    ensure_same_shape("precipitation", y_true.shape(), y_pred.shape())?;
    let p_true = atmos::calc_precip(codec::unpack(schema, y_true, HUMIDITY)?.view(), dlev)?;
    let p_pred = atmos::calc_precip(codec::unpack(schema, y_pred, HUMIDITY)?.view(), dlev)?;
    Ok((p_true, p_pred))
}

/// True and predicted precipitation of every example, sorted by the true rate.
pub fn plot_precip(
    fig: FigureDir<'_>,
    schema: &VariableSchema,
    y_true: ArrayView2<'_, f64>,
    y_pred: ArrayView2<'_, f64>,
    dlev: &[f64],
) -> Result<()> {
    let (p_true, p_pred) = precip_pair(schema, y_true, y_pred, dlev)?;
    let mut order: Vec<usize> = (0..p_true.len()).collect();
    order.sort_by(|&a, &b| p_true[a].total_cmp(&p_true[b]));

    let x_max = order.len().saturating_sub(1).max(1) as f64;
    let (y_lo, y_hi) = padded(stats::finite_bounds(p_true.iter().chain(p_pred.iter())).unwrap_or((0.0, 1.0)));

    render_png(&fig.path("regress_P_rate.png"), fig.size(), |root| {
        let mut chart = ChartBuilder::on(root)
            .caption("Precipitation Rate [mm/day]", ("sans-serif", 40).into_font())
            .margin(20)
            .x_label_area_size(50)
            .y_label_area_size(70)
            .build_cartesian_2d(0f64..x_max, y_lo..y_hi)?;

        chart
            .configure_mesh()
            .x_desc("Sorted by actual rate")
            .y_desc("mm/day")
            .draw()?;

        let sorted = |values: &Array1<f64>| -> Vec<(f64, f64)> {
            order.iter().enumerate().map(|(i, &idx)| (i as f64, values[idx])).collect()
        };
        draw_line(&mut chart, sorted(&p_true), Some("actual"), BLUE, 1.0)?;
        draw_line(&mut chart, sorted(&p_pred), Some("predict"), RED, 0.6)?;
        draw_legend(&mut chart)
    })
}

fn percent_where(values: ArrayView1<'_, f64>, pred: impl Fn(f64) -> bool) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let hits = values.iter().filter(|&&v| pred(v)).count();
    100.0 * hits as f64 / values.len() as f64
}

/// Precipitation scatter plus a T/q scatter pair per level in `scatters/`.
pub fn plot_scatter(
    fig: FigureDir<'_>,
    schema: &VariableSchema,
    y_true: ArrayView2<'_, f64>,
    y_pred: ArrayView2<'_, f64>,
    lev: &[f64],
    dlev: &[f64],
) -> Result<()> {
    let (p_true, p_pred) = precip_pair(schema, y_true, y_pred, dlev)?;
    let negative = percent_where(p_pred.view(), |v| v < 0.0);
    let (p_true, p_pred) = (p_true.to_vec(), p_pred.to_vec());
    render_png(&fig.path("P_scatter.png"), fig.size(), |root| {
        draw_scatter(
            root,
            &p_true,
            &p_pred,
            "Precipitation Rate [mm/day]",
            &format!("Pred. P<0 {negative:.1}% of time"),
        )
    })?;

    let scatter_dir = fig.subdir("scatters")?;
    let t_true = codec::unpack(schema, y_true, TEMPERATURE)?;
    let t_pred = codec::unpack(schema, y_pred, TEMPERATURE)?;
    let q_true = codec::unpack(schema, y_true, HUMIDITY)?;
    let q_pred = codec::unpack(schema, y_pred, HUMIDITY)?;

    for (i, level) in lev.iter().enumerate() {
        let lev_str = format!("σ = {level:.2}");
        let path = scatter_dir.join(format!("Tq_scatter_sigma{level:.2}.png"));
        let t_zero = percent_where(t_true.column(i), |v| v == 0.0);
        let q_zero = percent_where(q_true.column(i), |v| v == 0.0);
        render_png(&path, fig.size(), |root| {
            let halves = root.split_evenly((1, 2));
            draw_scatter(
                &halves[0],
                &t_true.column(i).to_vec(),
                &t_pred.column(i).to_vec(),
                &format!("T [K/day] at {lev_str}"),
                &format!("True T=0 {t_zero:.1}% of time"),
            )?;
            draw_scatter(
                &halves[1],
                &q_true.column(i).to_vec(),
                &q_pred.column(i).to_vec(),
                &format!("q [g/kg/day] at {lev_str}"),
                &format!("True q=0 {q_zero:.1}% of time"),
            )
        })?;
    }
    Ok(())
}

/// Histograms of the column heating needed to conserve moist enthalpy.
pub fn plot_enthalpy(
    fig: FigureDir<'_>,
    schema: &VariableSchema,
    y_true: ArrayView2<'_, f64>,
    y_pred: ArrayView2<'_, f64>,
    dlev: &[f64],
) -> Result<()> {
    let enthalpy = |y: ArrayView2<'_, f64>| -> Result<Vec<f64>> {
        let dt = codec::unpack(schema, y, TEMPERATURE)?;
        let dq = codec::unpack(schema, y, HUMIDITY)?;
        Ok(atmos::calc_enthalpy(dt.view(), dq.view(), dlev)?.to_vec())
    };
    let k_true = enthalpy(y_true)?;
    let k_pred = enthalpy(y_pred)?;
    let bins = fig.config.enthalpy_bins;
    let title = "Heating rate needed to conserve column enthalpy";

    render_png(&fig.path("regress_enthalpy.png"), fig.size(), |root| {
        let halves = root.split_evenly((2, 1));
        draw_histogram(&halves[0], &k_true, bins, title, "K/day over column", "true", BLUE)?;
        draw_histogram(&halves[1], &k_pred, bins, title, "K/day over column", "predict", RED)
    })
}

/// Scale factors (kJ/kg per K and per g/kg) for the tendency panel.
const CP_KJ: f64 = 1.005;
const L_KJ: f64 = 2.5;

/// Input θ/θe profiles and true vs predicted tendencies of one example,
/// against pressure.
pub fn plot_sample_profile(
    path: &Path,
    size: (u32, u32),
    schema: &VariableSchema,
    x: ArrayView1<'_, f64>,
    y_true: ArrayView1<'_, f64>,
    y_pred: ArrayView1<'_, f64>,
    lev: &[f64],
) -> Result<()> {
    let t = codec::unpack_row(schema, x, TEMPERATURE)?;
    let q = codec::unpack_row(schema, x, HUMIDITY)?;
    let theta = atmos::calc_theta(t.view(), lev)?;
    let theta_e = atmos::calc_theta_e(t.view(), theta.view(), q.view())?;
    // Second-lowest level stands in for the near-surface value.
    let near_surface = theta_e[theta_e.len().saturating_sub(2)];

    let dt_true = codec::unpack_row(schema, y_true, TEMPERATURE)?;
    let dt_pred = codec::unpack_row(schema, y_pred, TEMPERATURE)?;
    let dq_true = codec::unpack_row(schema, y_true, HUMIDITY)?;
    let dq_pred = codec::unpack_row(schema, y_pred, HUMIDITY)?;

    let pressure: Vec<f64> = lev.iter().map(|s| s * 1000.0).collect();

    render_eps(path, size, |root| {
        let halves = root.split_evenly((1, 2));
        let axis = VerticalAxis::pressure(&pressure);
        draw_profile_panel(
            &halves[0],
            "Input Profiles",
            "θ [K]",
            &axis,
            Some((270.0, 370.0)),
            &[
                Curve::new("θ", theta.iter().copied(), BLUE),
                Curve::new("θe", theta_e.iter().copied(), RED),
                Curve::unlabelled(std::iter::repeat(near_surface).take(lev.len()), GREEN),
            ],
        )?;
        draw_profile_panel(
            &halves[1],
            "Output Tendencies",
            "Cp*T or L*q [kJ/day/kg]",
            &axis,
            None,
            &[
                Curve::new("ΔT true", dt_true.iter().map(|v| CP_KJ * v), RED),
                Curve::new("ΔT pred", dt_pred.iter().map(|v| CP_KJ * v), RED).faded(0.45),
                Curve::new("Δq true", dq_true.iter().map(|v| L_KJ * v), BLUE),
                Curve::new("Δq pred", dq_pred.iter().map(|v| L_KJ * v), BLUE).faded(0.45),
            ],
        )
    })
}

/// Draw `count` randomly chosen examples into `samples/<index>.eps`.
/// Returns the chosen indices; the same example may be drawn twice.
#[allow(clippy::too_many_arguments)]
pub fn plot_sample_profiles<R: Rng>(
    count: usize,
    fig: FigureDir<'_>,
    schema: &VariableSchema,
    x: ArrayView2<'_, f64>,
    y_true: ArrayView2<'_, f64>,
    y_pred: ArrayView2<'_, f64>,
    lev: &[f64],
    rng: &mut R,
) -> Result<Vec<usize>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    if x.nrows() == 0 {
        return Err(DiagnosticsError::EmptyInput("no examples to draw profiles from".to_string()));
    }
    ensure_same_shape("sample profiles", y_true.shape(), y_pred.shape())?;

    let samples_dir = fig.subdir("samples")?;
    let size = (900, 600);
    let mut chosen = Vec::with_capacity(count);
    for _ in 0..count {
        let idx = rng.gen_range(0..x.nrows());
        plot_sample_profile(
            &samples_dir.join(format!("{idx}.eps")),
            size,
            schema,
            x.row(idx),
            y_true.row(idx),
            y_pred.row(idx),
            lev,
        )?;
        chosen.push(idx);
    }
    Ok(chosen)
}

/// True mean, bias, RMSE and correlation maps over latitude and level.
pub fn make_contour_plots(fig: FigureDir<'_>, stats: &LatLevStats, lat: &[f64], lev: &[f64]) -> Result<()> {
    let t = &stats.temperature;
    let q = &stats.humidity;
    let figures = [
        (
            "latlev_truemean.png",
            &t.true_mean,
            &q.true_mean,
            ("ΔTemp True Mean [K/day]", "ΔHumid True Mean [g/kg/day]"),
        ),
        (
            "latlev_bias.png",
            &t.bias,
            &q.bias,
            ("ΔTemp Mean Bias [K/day]", "ΔHumid Mean Bias [g/kg/day]"),
        ),
        (
            "latlev_rmse.png",
            &t.rmse,
            &q.rmse,
            ("ΔTemp RMSE [K/day]", "ΔHumid RMSE [g/kg/day]"),
        ),
        (
            "latlev_corrcoeff.png",
            &t.correlation,
            &q.correlation,
            ("ΔTemp Correlation Coefficient", "ΔHumid Correlation Coefficient"),
        ),
    ];

    for (name, a, b, titles) in figures {
        render_png(&fig.path(name), fig.size(), |root| {
            plot_contour(
                root,
                a.view(),
                b.view(),
                lat,
                lev,
                fig.config.average_hemispheres,
                titles,
                fig.config.contour_bands,
            )
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn options() -> DistributionOptions {
        DistributionOptions::from_config(&PlotConfig::default())
    }

    #[test]
    fn predicted_panel_reuses_true_bins() {
        let lev = [0.5];
        let truth = array![[1.0], [2.0], [2.0], [3.0], [4.0], [100.0]];
        let pred = array![[1.0], [1.0], [2.0], [3.0], [99.0]];

        let first = distribution_histogram(truth.view(), &lev, &options()).unwrap();
        assert_eq!(first.bin_edges.len(), 101);
        let outcome = DistributionOutcome {
            x_lower: first.bin_edges[0],
            x_upper: first.bin_edges[99],
            bin_edges: first.bin_edges.clone(),
        };

        let second = distribution_histogram(pred.view(), &lev, &options().reusing(&outcome)).unwrap();
        assert_eq!(second.bin_edges, first.bin_edges);
        // Both 1.0 values sit below the 0.02th percentile of the first data.
        assert_eq!(second.counts.sum(), 3);
        assert!(second.log_counts.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn empty_bins_take_smallest_log_count() {
        let lev = [0.3, 0.9];
        let data = array![[0.0, 0.0], [0.0, 0.0], [1.0, 0.0]];
        let opts = DistributionOptions {
            bin_edges: Some(vec![0.0, 0.5, 1.0]),
            ..options()
        };
        let hist = distribution_histogram(data.view(), &lev, &opts).unwrap();
        assert_eq!(hist.counts, array![[2usize, 1], [3, 0]]);
        // log10(1) = 0 is the smallest finite value.
        assert_eq!(hist.log_counts[[1, 1]], 0.0);
        assert!((hist.log_counts[[1, 0]] - 3f64.log10()).abs() < 1e-12);
    }

    #[test]
    fn histogram_needs_matching_levels() {
        let data = Array2::<f64>::zeros((3, 2));
        assert!(matches!(
            distribution_histogram(data.view(), &[0.5], &options()),
            Err(DiagnosticsError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn joint_limits_cover_both_series() {
        assert_eq!(joint_limits(&[1.0, 5.0], &[-2.0, 3.0, f64::NAN]), Some((-2.0, 5.0)));
        assert_eq!(joint_limits(&[], &[f64::NAN]), None);
    }

    #[test]
    fn runs_break_at_gaps() {
        let points = vec![(0.0, 1.0), (1.0, f64::NAN), (2.0, 2.0), (3.0, -1.0), (4.0, 3.0)];
        let runs = finite_runs(points, |y| y > 0.0);
        assert_eq!(runs, vec![vec![(0.0, 1.0)], vec![(2.0, 2.0)], vec![(4.0, 3.0)]]);
    }

    #[test]
    fn edges_surround_centres() {
        assert_eq!(cell_edges(&[0.0, 1.0, 3.0]), vec![-0.5, 0.5, 2.0, 4.0]);
        assert_eq!(cell_edges(&[]), Vec::<f64>::new());
        assert_eq!(cell_edges(&[2.0]).len(), 2);
    }

    #[test]
    fn bands_cover_the_range() {
        assert_eq!(band_index(0.0, 0.0, 1.0, 10), 0);
        assert_eq!(band_index(1.0, 0.0, 1.0, 10), 9);
        assert_eq!(band_index(0.55, 0.0, 1.0, 10), 5);
        assert_eq!(band_index(3.0, 1.0, 1.0, 10), 0);
    }
}
