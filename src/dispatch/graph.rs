//! Graph commands: build a `PlotSpec` and hand it to the plot backend

use super::estimation::confidence_level;
use super::{expand_varlist, first_word, numeric_column, sorted_levels, Invocation};
use crate::command::{unquote, Options};
use crate::dataset::{Dataset, Key};
use crate::display::Output;
use crate::error::{rc, CommandError, ErrorKind};
use crate::eval::Stat;
use crate::plot::{self, HistogramScale, Mark, PlotKind, PlotSpec, Series};
use crate::session::Session;
use glob::Pattern;
use std::path::Path;

/// One `twoway` layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layer {
    Scatter,
    Line,
    Connected,
    Lfit,
    Lfitci,
}

impl Layer {
    fn parse(word: &str) -> Option<Layer> {
        let layer = match word {
            "scatter" | "sc" => Layer::Scatter,
            "line" => Layer::Line,
            "connected" | "conn" => Layer::Connected,
            "lfit" => Layer::Lfit,
            "lfitci" => Layer::Lfitci,
            _ => return None,
        };
        Some(layer)
    }

    fn kind(self) -> PlotKind {
        match self {
            Layer::Scatter => PlotKind::Scatter,
            _ => PlotKind::Line,
        }
    }
}

/// Split `a y x || b y x` or `(a y x) (b y x)` into layers. `implied`
/// names the first layer's type when the command itself is one
/// (`scatter y x || lfit y x`).
fn split_layers(tokens: &[String], implied: Option<&str>) -> Result<Vec<(Layer, Vec<String>)>, CommandError> {
    let mut groups: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = implied.map(|k| vec![k.to_string()]).unwrap_or_default();
    for token in tokens {
        if token == "||" {
            groups.push(std::mem::take(&mut current));
        } else if let Some(inner) = token.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
            if !current.is_empty() {
                groups.push(std::mem::take(&mut current));
            }
            groups.push(inner.split_whitespace().map(String::from).collect());
        } else {
            current.push(token.clone());
        }
    }
    groups.push(current);

    let mut layers = Vec::new();
    for group in groups.into_iter().filter(|g| !g.is_empty()) {
        let (head, vars) = group.split_first().map(|(h, v)| (h.to_lowercase(), v.to_vec())).unwrap_or_default();
        let layer = Layer::parse(&head)
            .ok_or_else(|| CommandError::parse(format!("{} is not a twoway plot type", head)).with_fragment(head.clone()))?;
        if vars.len() < 2 {
            return Err(CommandError::new(ErrorKind::Parse, rc::TOO_FEW_VARIABLES, "too few variables specified")
                .with_fragment(group.join(" ")));
        }
        layers.push((layer, vars));
    }
    if layers.is_empty() {
        return Err(CommandError::new(ErrorKind::Parse, rc::VARLIST_REQUIRED, "varlist required"));
    }
    Ok(layers)
}

/// Columns of `vars` over the rows where none is missing
fn complete_cases(data: &Dataset, vars: &[String], rows: &[usize]) -> Result<Vec<Vec<f64>>, CommandError> {
    let columns: Vec<Vec<Option<f64>>> =
        vars.iter().map(|v| numeric_column(data, v, rows)).collect::<Result<_, _>>()?;
    let mut out = vec![Vec::new(); vars.len()];
    for i in 0..rows.len() {
        if let Some(values) = columns.iter().map(|c| c[i]).collect::<Option<Vec<f64>>>() {
            for (col, v) in out.iter_mut().zip(values) {
                col.push(v);
            }
        }
    }
    Ok(out)
}

fn axis_title(data: &Dataset, var: &str) -> String {
    data.variable(var)
        .and_then(|v| v.label.as_deref().filter(|l| !l.is_empty()))
        .unwrap_or(var)
        .to_string()
}

fn matches_any(patterns: &[String], name: &str) -> bool {
    patterns.iter().any(|p| Pattern::new(p).map_or(p == name, |pat| pat.matches(name)))
}

impl Session {
    /// Titles and target name from the shared graph options
    fn plot_spec(&self, kind: PlotKind, options: &Options, xtitle: String, ytitle: String) -> PlotSpec {
        let mut spec = PlotSpec::new(
            kind,
            options.text("title").unwrap_or_default(),
            options.text("xtitle").unwrap_or(xtitle),
            options.text("ytitle").unwrap_or(ytitle),
        );
        spec.subtitle = options.text("subtitle").unwrap_or_default();
        spec.name = options
            .value("saving")
            .or_else(|| options.value("name"))
            .map(first_word)
            .filter(|n| !n.is_empty());
        spec
    }

    fn draw(&mut self, spec: PlotSpec) -> Result<Output, CommandError> {
        if spec.series.iter().all(Series::is_empty) {
            return Err(CommandError::new(ErrorKind::Backend, rc::NO_OBSERVATIONS, "no observations"));
        }
        let artifact = self.plots.render(&spec)?;
        tracing::debug!(kind = ?spec.kind, series = spec.series.len(), "rendered graph");
        self.last_graph = Some(spec);
        Ok(match artifact.path {
            Some(path) => Output::text(format!("(graph written to {})", path.display())),
            None => Output::None,
        })
    }

    pub(super) fn cmd_scatter(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        self.twoway(inv, inv.tokens(), Some("scatter"))
    }

    pub(super) fn cmd_line(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        self.twoway(inv, inv.tokens(), Some("line"))
    }

    pub(super) fn cmd_twoway(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        self.twoway(inv, inv.tokens(), None)
    }

    fn twoway(&mut self, inv: &Invocation, tokens: &[String], implied: Option<&str>) -> Result<Output, CommandError> {
        let layers = split_layers(tokens, implied)?;
        let level = confidence_level(inv)?;
        let mut series = Vec::new();
        let (mut xtitle, mut ytitles) = (String::new(), Vec::new());
        for (layer, tokens) in &layers {
            let vars = expand_varlist(&self.data, tokens)?;
            if vars.len() < 2 {
                return Err(CommandError::new(ErrorKind::Parse, rc::TOO_FEW_VARIABLES, "too few variables specified"));
            }
            let (ys, x) = vars.split_at(vars.len() - 1);
            let x = &x[0];
            if xtitle.is_empty() {
                xtitle = axis_title(&self.data, x);
            }
            for y in ys {
                let cols = complete_cases(&self.data, &[y.clone(), x.clone()], &inv.rows)?;
                let (yv, xv) = (&cols[0], &cols[1]);
                let label = axis_title(&self.data, y);
                match layer {
                    Layer::Scatter => series.push(Series::new(label.clone(), Mark::Points, xv.clone(), yv.clone())),
                    Layer::Line | Layer::Connected => {
                        let mut pairs: Vec<(f64, f64)> = xv.iter().copied().zip(yv.iter().copied()).collect();
                        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
                        let (px, py) = pairs.into_iter().unzip();
                        series.push(Series::new(label.clone(), Mark::Line, px, py));
                    }
                    Layer::Lfit => series.extend(plot::fit_line(xv, yv)),
                    Layer::Lfitci => series.extend(plot::fit_line_ci(xv, yv, level, 50)),
                }
                if matches!(layer, Layer::Scatter | Layer::Line | Layer::Connected) && !ytitles.contains(&label) {
                    ytitles.push(label);
                }
            }
        }
        let ytitle = if ytitles.len() == 1 { ytitles.remove(0) } else { String::new() };
        let mut spec = self.plot_spec(layers[0].0.kind(), inv.options(), xtitle, ytitle);
        spec.series = series;
        self.draw(spec)
    }

    /// `graph twoway ...`, `graph bar|hbar [(stat)] vars, over(g)`,
    /// `graph export file.json [, replace]`
    pub(super) fn cmd_graph(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let Some((sub, rest)) = inv.tokens().split_first() else {
            return Err(CommandError::parse("graph subcommand required"));
        };
        match sub.to_lowercase().as_str() {
            "twoway" | "tw" => {
                self.check_graph_options(inv, &[])?;
                self.twoway(inv, rest, None)
            }
            "bar" | "hbar" => {
                self.check_graph_options(inv, &["over"])?;
                self.bar_chart(inv, rest)
            }
            "export" => {
                self.check_graph_options(inv, &["replace"])?;
                self.export_graph(inv, rest)
            }
            other => Err(CommandError::parse(format!("graph {} not supported", other)).with_fragment(other)),
        }
    }

    fn check_graph_options(&self, inv: &Invocation, extra: &[&str]) -> Result<(), CommandError> {
        const SHARED: &[&str] = &["title", "subtitle", "xtitle", "ytitle", "name", "saving", "level"];
        match inv.options().names().find(|n| !SHARED.contains(n) && !extra.contains(n)) {
            Some(bad) => Err(CommandError::option_not_allowed(bad)),
            None => Ok(()),
        }
    }

    fn bar_chart(&mut self, inv: &Invocation, tokens: &[String]) -> Result<Output, CommandError> {
        let (stat, tokens) = match tokens.split_first() {
            Some((first, rest)) if first.starts_with('(') => {
                let name = first.trim_matches(|c| c == '(' || c == ')').trim();
                let stat = Stat::parse(name)
                    .ok_or_else(|| CommandError::parse(format!("{} invalid statistic", name)).with_fragment(name))?;
                (stat, rest)
            }
            _ => (Stat::Mean, tokens),
        };
        let vars = expand_varlist(&self.data, tokens)?;
        if vars.is_empty() {
            return Err(CommandError::new(ErrorKind::Parse, rc::VARLIST_REQUIRED, "varlist required"));
        }
        let columns: Vec<Vec<Option<f64>>> =
            vars.iter().map(|v| numeric_column(&self.data, v, &inv.rows)).collect::<Result<_, _>>()?;

        let over = inv.options().value("over").map(first_word);
        let (categories, members): (Vec<String>, Vec<Vec<usize>>) = match &over {
            Some(g) => {
                let g = super::resolve_name(&self.data, g)?;
                let column = self.data.column(&g)?;
                let keys: Vec<Key> = inv.rows.iter().map(|&r| Key::from_value(column.get(r))).collect();
                let levels: Vec<Key> = sorted_levels(keys.iter().filter(|k| !k.is_missing()).cloned());
                let members = levels
                    .iter()
                    .map(|level| (0..keys.len()).filter(|&i| keys[i] == *level).collect())
                    .collect();
                let names = levels.iter().map(|k| self.display_value(&g, &k.to_value())).collect();
                (names, members)
            }
            None => (Vec::new(), vec![(0..inv.rows.len()).collect()]),
        };

        let mut spec = self.plot_spec(PlotKind::Bar, inv.options(), String::new(), format!("{} of {}", stat.name(), vars.join(", ")));
        for (name, column) in vars.iter().zip(&columns) {
            let heights: Vec<f64> = members
                .iter()
                .map(|idx| {
                    let values: Vec<Option<f64>> = idx.iter().map(|&i| column[i]).collect();
                    stat.apply(&values).unwrap_or(f64::NAN)
                })
                .collect();
            let positions = (0..heights.len()).map(|i| i as f64).collect();
            spec.series.push(Series::new(axis_title(&self.data, name), Mark::Bars, positions, heights));
        }
        spec.categories = categories;
        self.draw(spec)
    }

    /// Write the most recent graph's specification to a `.json` file
    fn export_graph(&mut self, inv: &Invocation, tokens: &[String]) -> Result<Output, CommandError> {
        let [file] = tokens else {
            return Err(CommandError::parse("graph export requires one file name"));
        };
        let spec = self
            .last_graph
            .as_ref()
            .ok_or_else(|| CommandError::state("no graph to export"))?;
        let file = unquote(file);
        let path = Path::new(file);
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
        if ext != "json" {
            return Err(CommandError::backend(format!("graph export to .{} needs a rendering backend", ext)).with_fragment(file));
        }
        if path.exists() && !inv.has("replace") {
            return Err(CommandError::new(ErrorKind::Io, rc::FILE_EXISTS, format!("file {} already exists", file))
                .with_fragment(file));
        }
        let text = serde_json::to_string_pretty(spec).map_err(|e| CommandError::backend(e.to_string()))?;
        std::fs::write(path, text)?;
        tracing::info!(path = %path.display(), "exported graph");
        Ok(Output::text(format!("(file {} written)", file)))
    }

    pub(super) fn cmd_histogram(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let var = &inv.vars[0];
        let raw = numeric_column(&self.data, var, &inv.rows)?;
        let weights = inv.selected_weights();
        let mut values = Vec::new();
        for (i, v) in raw.iter().enumerate() {
            let Some(v) = v else { continue };
            let times = match &weights {
                Some((_, w)) => w[i].map_or(0, |w| w.max(0.0) as usize),
                None => 1,
            };
            values.extend(std::iter::repeat(*v).take(times));
        }
        if values.is_empty() {
            return Err(CommandError::new(ErrorKind::Backend, rc::NO_OBSERVATIONS, "no observations"));
        }

        let options = inv.options();
        let mut scale = HistogramScale::Density;
        for name in options.names() {
            scale = match name {
                "density" => HistogramScale::Density,
                "fraction" => HistogramScale::Fraction,
                "frequency" => HistogramScale::Frequency,
                "percent" => HistogramScale::Percent,
                _ => scale,
            };
        }
        let number = |name: &str| options.number(name).transpose().map_err(CommandError::from);
        let (bin, width, start) = (number("bin")?, number("width")?, number("start")?);
        if bin.is_some() && width.is_some() {
            return Err(CommandError::parse("bin() and width() may not be combined"));
        }
        let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let start = start.unwrap_or(lo);
        let (bins, width) = match (bin, width) {
            (_, Some(w)) if w > 0.0 => (((hi - start) / w).floor() as usize + 1, w),
            (_, Some(w)) => return Err(CommandError::parse(format!("width({}) must be positive", w))),
            (Some(b), None) if b >= 1.0 && b.fract() == 0.0 => {
                let b = b as usize;
                (b, if hi > start { (hi - start) / b as f64 } else { 1.0 })
            }
            (Some(b), None) => return Err(CommandError::parse(format!("bin({}) must be a positive integer", b))),
            (None, None) => {
                let b = plot::default_bins(values.len());
                (b, if hi > start { (hi - start) / b as f64 } else { 1.0 })
            }
        };
        let bars = plot::histogram_from(&values, start, width, bins, scale)?;

        let mut spec = self.plot_spec(
            PlotKind::Histogram,
            options,
            axis_title(&self.data, var),
            scale.axis_title().to_string(),
        );
        spec.series.push(Series { label: var.clone(), ..bars });
        self.draw(spec)
    }

    pub(super) fn cmd_binscatter(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let (y, x) = (&inv.vars[0], &inv.vars[1]);
        let cols = complete_cases(&self.data, &inv.vars, &inv.rows)?;
        let options = inv.options();
        let bins = match options.number("nquantiles").transpose()? {
            Some(n) if n >= 2.0 && n.fract() == 0.0 => n as usize,
            Some(n) => return Err(CommandError::parse(format!("nquantiles({}) must be an integer above 1", n))),
            None => 20,
        };
        let linetype = options.value("linetype").map(first_word).unwrap_or_else(|| "lfit".to_string());

        let means = plot::binned_means(&cols[1], &cols[0], bins);
        let mut spec = self.plot_spec(PlotKind::Binscatter, options, axis_title(&self.data, x), axis_title(&self.data, y));
        match linetype.as_str() {
            "lfit" => spec.series.extend(plot::fit_line(&cols[1], &cols[0])),
            "connect" => spec.series.push(Series { label: String::new(), mark: Mark::Line, ..means.clone() }),
            "none" => {}
            other => {
                return Err(CommandError::parse(format!("linetype({}) invalid", other)).with_fragment(other.to_string()))
            }
        }
        spec.series.insert(0, means);
        self.draw(spec)
    }

    /// `lgraph yvar xvar [groupvar]`: a statistic of `yvar` (the mean unless
    /// `stat()` names another) at each value of `xvar`, one line per group
    pub(super) fn cmd_lgraph(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let (y, x) = (&inv.vars[0], &inv.vars[1]);
        let options = inv.options();
        let group = match (inv.vars.get(2), options.value("by").map(first_word)) {
            (Some(_), Some(_)) => {
                return Err(CommandError::parse("group variable specified twice").with_fragment("by()"));
            }
            (Some(g), None) => Some(g.clone()),
            (None, Some(g)) => Some(super::resolve_name(&self.data, &g)?),
            (None, None) => None,
        };
        let stat = match options.text("stat") {
            Some(name) => Stat::parse(&name)
                .ok_or_else(|| CommandError::parse(format!("{} invalid statistic", name)).with_fragment(name.clone()))?,
            None => Stat::Mean,
        };

        let yv = numeric_column(&self.data, y, &inv.rows)?;
        let xv = numeric_column(&self.data, x, &inv.rows)?;
        let keys: Option<Vec<Key>> = match &group {
            Some(g) => {
                let column = self.data.column(g)?;
                Some(inv.rows.iter().map(|&r| Key::from_value(column.get(r))).collect())
            }
            None => None,
        };
        let levels: Vec<Option<Key>> = match &keys {
            Some(keys) => sorted_levels(keys.iter().filter(|k| !k.is_missing()).cloned()).into_iter().map(Some).collect(),
            None => vec![None],
        };

        let mut spec = self.plot_spec(PlotKind::Line, options, axis_title(&self.data, x), axis_title(&self.data, y));
        for level in &levels {
            let mut points: Vec<(f64, Option<f64>)> = (0..inv.rows.len())
                .filter(|&i| match (level, &keys) {
                    (Some(level), Some(keys)) => keys[i] == *level,
                    _ => true,
                })
                .filter_map(|i| xv[i].map(|xi| (xi, yv[i])))
                .collect();
            points.sort_by(|a, b| a.0.total_cmp(&b.0));

            let (mut px, mut py) = (Vec::new(), Vec::new());
            for chunk in points.chunk_by(|a, b| a.0 == b.0) {
                let values: Vec<Option<f64>> = chunk.iter().map(|p| p.1).collect();
                if let Some(v) = stat.apply(&values) {
                    px.push(chunk[0].0);
                    py.push(v);
                }
            }
            let label = match (level, &group) {
                (Some(level), Some(g)) => self.display_value(g, &level.to_value()),
                _ => axis_title(&self.data, y),
            };
            spec.series.push(Series::new(label, Mark::Line, px, py));
        }
        self.draw(spec)
    }

    /// Point estimates with confidence intervals from the active result or
    /// named stored results. Horizontal by default: estimates on `x`,
    /// coefficient positions on `y`, intervals along `x`.
    pub(super) fn cmd_coefplot(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let level = confidence_level(inv)?;
        let options = inv.options();
        let (keep, drop) = (options.words("keep"), options.words("drop"));
        let vertical = inv.has("vertical");

        let models = match inv.tokens() {
            [] => vec![(
                ".".to_string(),
                self.results.last().ok_or(crate::results::ResultError::NoEstimates)?,
            )],
            names => self.results.select(names)?,
        };

        let mut categories: Vec<String> = Vec::new();
        for (_, result) in &models {
            for c in &result.coefficients {
                let shown = c.name != "_cons"
                    && c.std_err.is_some()
                    && (keep.is_empty() || matches_any(&keep, &c.name))
                    && !matches_any(&drop, &c.name);
                if shown && !categories.contains(&c.name) {
                    categories.push(c.name.clone());
                }
            }
        }

        let mut series = Vec::new();
        for (name, result) in &models {
            let crit = result.critical_value(level);
            let (mut pos, mut est, mut lower, mut upper) = (Vec::new(), Vec::new(), Vec::new(), Vec::new());
            for (i, category) in categories.iter().enumerate() {
                let Some(c) = result.coefficient(category) else { continue };
                let Some(se) = c.std_err else { continue };
                pos.push(i as f64);
                est.push(c.estimate);
                lower.push(c.estimate - crit * se);
                upper.push(c.estimate + crit * se);
            }
            let label = if name == "." { result.depvar.clone() } else { name.clone() };
            let (x, y) = if vertical { (pos, est) } else { (est, pos) };
            let mut s = Series::new(label, Mark::Intervals, x, y);
            s.lower = Some(lower);
            s.upper = Some(upper);
            series.push(s);
        }

        let (xtitle, ytitle) = if vertical { (String::new(), "Coefficient".to_string()) } else { ("Coefficient".to_string(), String::new()) };
        let mut spec = self.plot_spec(PlotKind::Coefplot, options, xtitle, ytitle);
        spec.series = series;
        spec.categories = categories;
        self.draw(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::split_top_level;
    use crate::dataset::Variable;
    use tempfile::TempDir;

    fn words(text: &str) -> Vec<String> {
        split_top_level(text, char::is_whitespace).into_iter().map(|(_, w)| w.to_string()).collect()
    }

    fn session() -> Session {
        let mut s = Session::new();
        let x: Vec<Option<f64>> = (1..=10).map(|i| Some(i as f64)).collect();
        let y: Vec<Option<f64>> = (1..=10).map(|i| if i == 4 { None } else { Some(2.0 * i as f64 + 1.0) }).collect();
        let g: Vec<Option<f64>> = (1..=10).map(|i| Some((i % 2) as f64)).collect();
        let mut data = Dataset::from_variables(vec![
            Variable::numeric("x", x),
            Variable::numeric("y", y),
            Variable::numeric("g", g),
        ])
        .unwrap();
        data.define_label("odd", vec![(0, "even".into()), (1, "odd".into())], false).unwrap();
        data.attach_label("g", Some("odd")).unwrap();
        s.set_data(data);
        s
    }

    fn graph(s: &Session) -> &PlotSpec {
        s.last_graph.as_ref().expect("a graph was drawn")
    }

    #[test]
    fn layers_split_on_bars_and_parens() {
        let layers = split_layers(&words("y x || lfit y x"), Some("scatter")).unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].0, Layer::Scatter);
        assert_eq!(layers[1], (Layer::Lfit, vec!["y".to_string(), "x".to_string()]));

        let layers = split_layers(&words("(scatter y x) (line y x)"), None).unwrap();
        assert_eq!(layers.iter().map(|l| l.0).collect::<Vec<_>>(), vec![Layer::Scatter, Layer::Line]);

        assert_eq!(split_layers(&words("bogus y x"), None).unwrap_err().code, 198);
        assert_eq!(split_layers(&words("y"), Some("scatter")).unwrap_err().code, 102);
    }

    #[test]
    fn scatter_drops_missing_pairs() {
        let mut s = session();
        s.execute("scatter y x, title(\"Fit\")").unwrap();
        let spec = graph(&s);
        assert_eq!(spec.kind, PlotKind::Scatter);
        assert_eq!(spec.title, "Fit");
        assert_eq!(spec.series[0].len(), 9);
        assert_eq!((spec.xtitle.as_str(), spec.ytitle.as_str()), ("x", "y"));
    }

    #[test]
    fn lgraph_draws_one_line_per_group() {
        let mut s = session();
        s.execute("lgraph y x g").unwrap();
        let spec = graph(&s);
        assert_eq!(spec.kind, PlotKind::Line);
        let labels: Vec<&str> = spec.series.iter().map(|l| l.label.as_str()).collect();
        assert_eq!(labels, vec!["even", "odd"]);
        assert_eq!(spec.series[0].x, vec![2.0, 6.0, 8.0, 10.0]);
        assert_eq!(spec.series[1].len(), 5);

        s.execute("lgraph y x, by(g) title(\"Trend\")").unwrap();
        assert_eq!(graph(&s).series.len(), 2);
        assert_eq!(graph(&s).title, "Trend");
        assert_eq!(s.execute("lgraph y x g, by(g)").unwrap_err().code, 198);
    }

    #[test]
    fn lgraph_averages_repeated_x_values() {
        let mut s = session();
        s.execute("lgraph y g").unwrap();
        let spec = graph(&s);
        assert_eq!(spec.series.len(), 1);
        assert_eq!(spec.series[0].x, vec![0.0, 1.0]);
        assert_eq!(spec.series[0].y, vec![14.0, 11.0]);
        assert_eq!((spec.xtitle.as_str(), spec.ytitle.as_str()), ("g", "y"));

        s.execute("lgraph y g, stat(max)").unwrap();
        assert_eq!(graph(&s).series[0].y, vec![21.0, 19.0]);
    }

    #[test]
    fn axis_titles_prefer_variable_labels() {
        let mut s = session();
        s.execute("label variable y \"Outcome\"").unwrap();
        s.execute("scatter y x").unwrap();
        let spec = graph(&s);
        assert_eq!((spec.xtitle.as_str(), spec.ytitle.as_str()), ("x", "Outcome"));
    }

    #[test]
    fn scatter_with_fitted_line() {
        let mut s = session();
        s.execute("scatter y x || lfit y x if x > 2").unwrap();
        let spec = graph(&s);
        assert_eq!(spec.series.len(), 2);
        assert_eq!(spec.series[1].mark, Mark::Line);
        assert_eq!(spec.series[1].x, vec![3.0, 10.0]);
        assert_eq!(spec.series[1].y, vec![7.0, 21.0]);
    }

    #[test]
    fn histogram_scales() {
        let mut s = session();
        s.execute("histogram x, bin(5) frequency").unwrap();
        let spec = graph(&s);
        assert_eq!(spec.ytitle, "Frequency");
        assert_eq!(spec.series[0].y, vec![2.0; 5]);

        s.execute("hist x, width(5) start(0) percent").unwrap();
        let spec = graph(&s);
        assert_eq!(spec.series[0].x, vec![2.5, 7.5, 12.5]);
        assert_eq!(spec.series[0].y, vec![40.0, 50.0, 10.0]);

        assert_eq!(s.execute("hist x, bin(3) width(2)").unwrap_err().code, 198);
        assert_eq!(graph(&s).ytitle, "Percent");
    }

    #[test]
    fn histogram_default_is_density() {
        let mut s = session();
        s.execute("hist x").unwrap();
        let spec = graph(&s);
        assert_eq!(spec.ytitle, "Density");
        let width = spec.series[0].x[1] - spec.series[0].x[0];
        let area: f64 = spec.series[0].y.iter().map(|h| h * width).sum();
        assert!((area - 1.0).abs() < 1e-9);
    }

    #[test]
    fn bar_chart_over_groups() {
        let mut s = session();
        s.execute("graph bar (sum) x, over(g)").unwrap();
        let spec = graph(&s);
        assert_eq!(spec.categories, vec!["even", "odd"]);
        assert_eq!(spec.series[0].y, vec![30.0, 25.0]);
        assert_eq!(s.execute("graph pie x").unwrap_err().code, 198);
    }

    #[test]
    fn binscatter_bins_and_fit() {
        let mut s = session();
        s.execute("binscatter y x, nquantiles(3)").unwrap();
        let spec = graph(&s);
        assert_eq!(spec.series[0].mark, Mark::Points);
        assert_eq!(spec.series[0].len(), 3);
        assert_eq!(spec.series[1].label, "Fitted values");
        s.execute("binscatter y x, linetype(none)").unwrap();
        assert_eq!(graph(&s).series.len(), 1);
    }

    #[test]
    fn coefplot_uses_the_active_result() {
        let mut s = session();
        assert_eq!(s.execute("coefplot").unwrap_err().code, 301);
        s.execute("quietly regress g x").unwrap();
        s.execute("coefplot, keep(x) level(90)").unwrap();
        let spec = graph(&s);
        assert_eq!(spec.categories, vec!["x"]);
        let series = &spec.series[0];
        assert_eq!(series.y, vec![0.0]);
        let (lo, hi) = (series.lower.as_ref().unwrap()[0], series.upper.as_ref().unwrap()[0]);
        assert!(lo <= series.x[0] && series.x[0] <= hi);
    }

    #[test]
    fn export_needs_a_graph_and_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("g.json");
        let mut s = session();
        let cmd = format!("graph export \"{}\"", path.display());
        assert_eq!(s.execute(&cmd).unwrap_err().code, 459);
        s.execute("line y x").unwrap();
        s.execute(&cmd).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("\"kind\": \"line\""));
        assert_eq!(s.execute(&cmd).unwrap_err().code, 602);
        s.execute(&format!("{}, replace", cmd)).unwrap();
        let png = format!("graph export \"{}\"", dir.path().join("g.png").display());
        assert!(s.execute(&png).is_err());
    }
}
