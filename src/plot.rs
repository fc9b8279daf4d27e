//! Plot specifications
//!
//! Graph commands compute what to draw (points, bins, fitted lines,
//! coefficient intervals) into a `PlotSpec`; a `PlotBackend` turns the spec
//! into an artifact. The built-in backend writes the spec as JSON.

use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlotError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotKind {
    Scatter,
    Line,
    Histogram,
    Bar,
    Binscatter,
    Coefplot,
}

/// How a series is drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mark {
    Points,
    Line,
    Bars,
    /// Points with `lower`/`upper` interval whiskers
    Intervals,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub label: String,
    pub mark: Mark,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper: Option<Vec<f64>>,
}

impl Series {
    pub fn new(label: impl Into<String>, mark: Mark, x: Vec<f64>, y: Vec<f64>) -> Self {
        Series { label: label.into(), mark, x, y, lower: None, upper: None }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotSpec {
    pub kind: PlotKind,
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subtitle: String,
    pub xtitle: String,
    pub ytitle: String,
    pub series: Vec<Series>,
    /// Tick labels for categorical axes (bar charts, coefficient plots)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    /// `name()` / `saving()` target
    #[serde(skip)]
    pub name: Option<String>,
}

impl PlotSpec {
    pub fn new(kind: PlotKind, title: String, xtitle: String, ytitle: String) -> Self {
        PlotSpec {
            kind,
            title,
            subtitle: String::new(),
            xtitle,
            ytitle,
            series: Vec::new(),
            categories: Vec::new(),
            name: None,
        }
    }
}

/// What a backend produced
#[derive(Debug, Clone, PartialEq)]
pub struct PlotArtifact {
    pub path: Option<PathBuf>,
}

pub trait PlotBackend: Send {
    fn render(&mut self, spec: &PlotSpec) -> Result<PlotArtifact, PlotError>;
}

/// Writes each spec to `<dir>/<name>.json`, naming unnamed graphs
/// `Graph1`, `Graph2`, ...
pub struct JsonPlotBackend {
    dir: PathBuf,
    counter: usize,
}

impl JsonPlotBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JsonPlotBackend { dir: dir.into(), counter: 0 }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl PlotBackend for JsonPlotBackend {
    fn render(&mut self, spec: &PlotSpec) -> Result<PlotArtifact, PlotError> {
        let name = match &spec.name {
            Some(n) => n.clone(),
            None => {
                self.counter += 1;
                format!("Graph{}", self.counter)
            }
        };
        let mut path = self.dir.join(name);
        if path.extension().is_none() {
            path.set_extension("json");
        }
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(&path, serde_json::to_string_pretty(spec)?)?;
        tracing::info!(path = %path.display(), kind = ?spec.kind, "wrote graph");
        Ok(PlotArtifact { path: Some(path) })
    }
}

/// Discards every spec
pub struct NullPlotBackend;

impl PlotBackend for NullPlotBackend {
    fn render(&mut self, _spec: &PlotSpec) -> Result<PlotArtifact, PlotError> {
        Ok(PlotArtifact { path: None })
    }
}

/// Histogram bar heights
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistogramScale {
    Density,
    Fraction,
    Frequency,
    Percent,
}

impl HistogramScale {
    pub fn axis_title(self) -> &'static str {
        match self {
            HistogramScale::Density => "Density",
            HistogramScale::Fraction => "Fraction",
            HistogramScale::Frequency => "Frequency",
            HistogramScale::Percent => "Percent",
        }
    }
}

/// Default bin count: min(sqrt(N), 10 log10(N))
pub fn default_bins(n: usize) -> usize {
    if n < 2 {
        return 1;
    }
    let n = n as f64;
    n.sqrt().min(10.0 * n.log10()).floor().max(1.0) as usize
}

/// Equal-width bins from the minimum to the maximum; `x` holds bin midpoints
pub fn histogram(values: &[f64], bins: usize, scale: HistogramScale) -> Result<Series, PlotError> {
    if values.is_empty() {
        return Err(PlotError::Invalid("no observations".into()));
    }
    let bins = bins.max(1);
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let width = if hi > lo { (hi - lo) / bins as f64 } else { 1.0 };
    histogram_from(values, lo, width, bins, scale)
}

/// Bins of `width` starting at `lo`; values past the last bin land in it
pub fn histogram_from(values: &[f64], lo: f64, width: f64, bins: usize, scale: HistogramScale) -> Result<Series, PlotError> {
    if values.is_empty() {
        return Err(PlotError::Invalid("no observations".into()));
    }
    if !(width > 0.0) {
        return Err(PlotError::Invalid(format!("width({}) must be positive", width)));
    }
    if values.iter().any(|v| *v < lo) {
        return Err(PlotError::Invalid("start() must be less than or equal to the minimum".into()));
    }
    let bins = bins.max(1);
    let mut counts = vec![0.0; bins];
    for &v in values {
        let b = (((v - lo) / width).floor() as usize).min(bins - 1);
        counts[b] += 1.0;
    }
    let n = values.len() as f64;
    let heights = counts
        .iter()
        .map(|c| match scale {
            HistogramScale::Density => c / (n * width),
            HistogramScale::Fraction => c / n,
            HistogramScale::Frequency => *c,
            HistogramScale::Percent => 100.0 * c / n,
        })
        .collect();
    let mids = (0..bins).map(|b| lo + width * (b as f64 + 0.5)).collect();
    Ok(Series::new("", Mark::Bars, mids, heights))
}

/// Least-squares line through `(x, y)`, as `(intercept, slope)`
pub fn linear_fit(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    let n = x.len() as f64;
    if x.len() < 2 || x.len() != y.len() {
        return None;
    }
    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let sxx: f64 = x.iter().map(|v| (v - mx).powi(2)).sum();
    if sxx == 0.0 {
        return None;
    }
    let sxy: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
    let slope = sxy / sxx;
    Some((my - slope * mx, slope))
}

/// Fitted line evaluated at the extremes of `x`
pub fn fit_line(x: &[f64], y: &[f64]) -> Option<Series> {
    let (a, b) = linear_fit(x, y)?;
    let lo = x.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(Series::new("Fitted values", Mark::Line, vec![lo, hi], vec![a + b * lo, a + b * hi]))
}

/// Fitted line with a confidence band for the mean prediction, evaluated
/// at `points` evenly spaced values of `x`
pub fn fit_line_ci(x: &[f64], y: &[f64], level: f64, points: usize) -> Option<Series> {
    let (a, b) = linear_fit(x, y)?;
    if x.len() < 3 {
        return None;
    }
    let n = x.len() as f64;
    let mx = x.iter().sum::<f64>() / n;
    let sxx: f64 = x.iter().map(|v| (v - mx).powi(2)).sum();
    let sse: f64 = x.iter().zip(y).map(|(xi, yi)| (yi - a - b * xi).powi(2)).sum();
    let s = (sse / (n - 2.0)).sqrt();
    let crit = crate::backend::special::t_quantile(1.0 - (1.0 - level / 100.0) / 2.0, n - 2.0);

    let lo = x.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let points = points.max(2);
    let xs: Vec<f64> = (0..points).map(|i| lo + (hi - lo) * i as f64 / (points - 1) as f64).collect();
    let fitted: Vec<f64> = xs.iter().map(|v| a + b * v).collect();
    let half: Vec<f64> = xs.iter().map(|v| crit * s * (1.0 / n + (v - mx).powi(2) / sxx).sqrt()).collect();
    let mut series = Series::new("Fitted values", Mark::Line, xs, fitted.clone());
    series.lower = Some(fitted.iter().zip(&half).map(|(f, h)| f - h).collect());
    series.upper = Some(fitted.iter().zip(&half).map(|(f, h)| f + h).collect());
    Some(series)
}

/// Means of `x` and `y` within quantile bins of `x`. Ties never straddle a
/// bin edge, so fewer than `bins` points may come back.
pub fn binned_means(x: &[f64], y: &[f64], bins: usize) -> Series {
    let mut pairs: Vec<(f64, f64)> = x.iter().copied().zip(y.iter().copied()).collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    let n = pairs.len();
    let bins = bins.max(1).min(n.max(1));
    let (mut xs, mut ys) = (Vec::new(), Vec::new());
    let mut start = 0;
    for b in 1..=bins {
        let mut end = (n * b) / bins;
        while end < n && end > 0 && pairs[end].0 == pairs[end - 1].0 {
            end += 1;
        }
        if end <= start {
            continue;
        }
        let chunk = &pairs[start..end];
        let k = chunk.len() as f64;
        xs.push(chunk.iter().map(|p| p.0).sum::<f64>() / k);
        ys.push(chunk.iter().map(|p| p.1).sum::<f64>() / k);
        start = end;
    }
    Series::new("Binned means", Mark::Points, xs, ys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bins_follow_the_default_rule() {
        assert_eq!(default_bins(100), 10);
        assert_eq!(default_bins(10), 3);
        assert_eq!(default_bins(1), 1);
    }

    #[test]
    fn histogram_counts_every_value() {
        let values = [1.0, 2.0, 2.0, 3.0, 4.0];
        let s = histogram(&values, 3, HistogramScale::Frequency).unwrap();
        assert_eq!(s.y.iter().sum::<f64>(), 5.0);
        assert_eq!(s.y, vec![1.0, 2.0, 2.0]);
        let d = histogram(&values, 3, HistogramScale::Density).unwrap();
        let width = 1.0;
        assert!((d.y.iter().sum::<f64>() * width - 1.0).abs() < 1e-12);
    }

    #[test]
    fn fit_and_bins() {
        let x: Vec<f64> = (0..10).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|v| 1.0 + 2.0 * v).collect();
        assert_eq!(linear_fit(&x, &y), Some((1.0, 2.0)));
        let s = binned_means(&x, &y, 5);
        assert_eq!(s.x, vec![0.5, 2.5, 4.5, 6.5, 8.5]);
        assert_eq!(s.y, vec![2.0, 6.0, 10.0, 14.0, 18.0]);
    }

    #[test]
    fn explicit_start_and_width() {
        let values = [0.5, 1.5, 1.7, 3.9];
        let s = histogram_from(&values, 0.0, 1.0, 4, HistogramScale::Frequency).unwrap();
        assert_eq!(s.x, vec![0.5, 1.5, 2.5, 3.5]);
        assert_eq!(s.y, vec![1.0, 2.0, 0.0, 1.0]);
        assert!(histogram_from(&values, 1.0, 1.0, 4, HistogramScale::Frequency).is_err());
        assert!(histogram_from(&values, 0.0, 0.0, 4, HistogramScale::Frequency).is_err());
    }

    #[test]
    fn confidence_band_is_narrowest_at_the_mean() {
        let x: Vec<f64> = (0..11).map(f64::from).collect();
        let y: Vec<f64> = x.iter().enumerate().map(|(i, v)| 2.0 * v + if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let s = fit_line_ci(&x, &y, 95.0, 11).unwrap();
        let (lower, upper) = (s.lower.unwrap(), s.upper.unwrap());
        let widths: Vec<f64> = lower.iter().zip(&upper).map(|(l, u)| u - l).collect();
        assert!(widths[5] < widths[0] && widths[5] < widths[10]);
        assert!(lower.iter().zip(&s.y).all(|(l, f)| l < f));
    }

    #[test]
    fn json_backend_writes_numbered_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = JsonPlotBackend::new(dir.path());
        let mut spec = PlotSpec::new(PlotKind::Scatter, "t".into(), "x".into(), "y".into());
        spec.series.push(Series::new("y", Mark::Points, vec![1.0], vec![2.0]));
        let artifact = backend.render(&spec).unwrap();
        let path = artifact.path.unwrap();
        assert!(path.ends_with("Graph1.json"));
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("\"kind\": \"scatter\""));
        assert!(!text.contains("lower"));
    }
}
