//! `esttab`/`estout` tables
//!
//! Stored results are first collected into a `ResultTable` (cells already
//! formatted, stars attached). Every output format renders from that table,
//! so the text on screen and the file on disk always agree.

use crate::command::Options;
use crate::results::{AuxValue, EstimationResult};
use glob::Pattern;
use std::fmt::Write as _;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("file format {0} not supported")]
    Unsupported(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
}

/// Statistic shown below each coefficient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Secondary {
    StdErr,
    TStat,
    PValue,
    ConfInt,
    Nothing,
}

impl Secondary {
    fn note(self) -> Option<&'static str> {
        match self {
            Secondary::StdErr => Some("Standard errors in parentheses"),
            Secondary::TStat => Some("t statistics in parentheses"),
            Secondary::PValue => Some("p-values in brackets"),
            Secondary::ConfInt => Some("95% confidence intervals in brackets"),
            Secondary::Nothing => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableOptions {
    pub secondary: Secondary,
    pub stars: bool,
    /// Statistic rows; `None` means `N` plus every `estadd` entry
    pub stats: Option<Vec<String>>,
    pub keep: Vec<String>,
    pub drop: Vec<String>,
    pub order: Vec<String>,
    pub title: Option<String>,
    /// LaTeX `\label`
    pub label: Option<String>,
    pub decimals: usize,
    /// Column titles instead of `(1)`, `(2)`, ...
    pub mtitles: Option<Vec<String>>,
    /// Number the columns and show dependent variables (esttab) rather
    /// than heading them with the stored names (estout)
    pub numbered: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        TableOptions {
            secondary: Secondary::TStat,
            stars: true,
            stats: None,
            keep: Vec::new(),
            drop: Vec::new(),
            order: Vec::new(),
            title: None,
            label: None,
            decimals: 3,
            mtitles: None,
            numbered: true,
        }
    }
}

impl TableOptions {
    /// Read `se t p ci not nostar star stats() scalars() keep() drop()
    /// order() title() label() b() mtitles()`
    pub fn from_options(options: &Options, numbered: bool) -> TableOptions {
        let mut t = TableOptions { numbered, ..TableOptions::default() };
        // later flags win, matching the option order on the line
        for name in options.names() {
            match name {
                "se" => t.secondary = Secondary::StdErr,
                "t" => t.secondary = Secondary::TStat,
                "p" => t.secondary = Secondary::PValue,
                "ci" => t.secondary = Secondary::ConfInt,
                "not" | "nose" => t.secondary = Secondary::Nothing,
                "nostar" | "nostars" => t.stars = false,
                "star" => t.stars = true,
                _ => {}
            }
        }
        for key in ["stats", "scalars"] {
            if options.has(key) {
                t.stats = Some(options.words(key));
            }
        }
        t.keep = options.words("keep");
        t.drop = options.words("drop");
        t.order = options.words("order");
        t.title = options.text("title");
        t.label = options.text("label");
        if let Some(b) = options.value("b") {
            let digits = b.trim_start_matches('%').trim_end_matches(|c: char| c.is_ascii_alphabetic());
            let digits = digits.rsplit('.').next().unwrap_or(digits);
            if let Ok(d) = digits.parse() {
                t.decimals = d;
            }
        }
        if options.has("mtitles") {
            t.mtitles = Some(options.words("mtitles"));
        }
        t
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Coefficient,
    Secondary,
    Stat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub label: String,
    pub kind: RowKind,
    /// One cell per model; `None` where the model has no such entry
    pub cells: Vec<Option<String>>,
}

/// Structured comparison table of one or more estimation results
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    pub title: Option<String>,
    pub label: Option<String>,
    /// Header lines, each with one entry per model
    pub headers: Vec<Vec<String>>,
    pub rows: Vec<TableRow>,
    pub notes: Vec<String>,
}

fn stars(p: Option<f64>) -> &'static str {
    match p {
        Some(p) if p < 0.001 => "***",
        Some(p) if p < 0.01 => "**",
        Some(p) if p < 0.05 => "*",
        _ => "",
    }
}

fn matches_any(patterns: &[String], name: &str) -> bool {
    patterns.iter().any(|p| match Pattern::new(p) {
        Ok(pattern) => pattern.matches(name),
        Err(_) => p == name,
    })
}

fn stat_label(name: &str) -> String {
    match name {
        "r2" => "R-sq".to_string(),
        "r2_a" => "adj. R-sq".to_string(),
        "r2_p" => "pseudo R-sq".to_string(),
        "rmse" => "RMSE".to_string(),
        other => other.to_string(),
    }
}

impl ResultTable {
    pub fn build(models: &[(String, &EstimationResult)], opts: &TableOptions) -> ResultTable {
        let d = opts.decimals;

        // coefficient names across models, first appearance order
        let mut names: Vec<String> = Vec::new();
        for (_, r) in models {
            for c in &r.coefficients {
                if !names.contains(&c.name) {
                    names.push(c.name.clone());
                }
            }
        }
        if !opts.keep.is_empty() {
            // keep() also sets the order
            let mut kept = Vec::new();
            for pattern in &opts.keep {
                for n in &names {
                    if matches_any(std::slice::from_ref(pattern), n) && !kept.contains(n) {
                        kept.push(n.clone());
                    }
                }
            }
            names = kept;
        }
        names.retain(|n| !matches_any(&opts.drop, n));
        if !opts.order.is_empty() {
            let mut ordered: Vec<String> = Vec::new();
            for pattern in &opts.order {
                for n in &names {
                    if matches_any(std::slice::from_ref(pattern), n) && !ordered.contains(n) {
                        ordered.push(n.clone());
                    }
                }
            }
            ordered.extend(names.iter().filter(|n| !ordered.contains(n)).cloned().collect::<Vec<_>>());
            names = ordered;
        }

        let mut rows = Vec::new();
        for name in &names {
            let mut coef = Vec::with_capacity(models.len());
            let mut second = Vec::with_capacity(models.len());
            for (_, r) in models {
                let Some(c) = r.coefficient(name) else {
                    coef.push(None);
                    second.push(None);
                    continue;
                };
                let star = if opts.stars { stars(c.p_value) } else { "" };
                coef.push(Some(format!("{:.*}{}", d, c.estimate, star)));
                let cell = match (opts.secondary, c.std_err) {
                    (Secondary::Nothing, _) => None,
                    (_, None) => Some("(.)".to_string()),
                    (Secondary::StdErr, Some(se)) => Some(format!("({:.*})", d, se)),
                    (Secondary::TStat, Some(_)) => {
                        Some(c.statistic().map_or("(.)".to_string(), |t| format!("({:.2})", t)))
                    }
                    (Secondary::PValue, Some(_)) => {
                        Some(c.p_value.map_or("[.]".to_string(), |p| format!("[{:.3}]", p)))
                    }
                    (Secondary::ConfInt, Some(se)) => {
                        let crit = r.critical_value(95.0);
                        Some(format!("[{:.*},{:.*}]", d, c.estimate - crit * se, d, c.estimate + crit * se))
                    }
                };
                second.push(cell);
            }
            rows.push(TableRow { label: name.clone(), kind: RowKind::Coefficient, cells: coef });
            if opts.secondary != Secondary::Nothing {
                rows.push(TableRow { label: String::new(), kind: RowKind::Secondary, cells: second });
            }
        }

        let stat_names = match &opts.stats {
            Some(s) => s.clone(),
            None => {
                let mut s = vec!["N".to_string()];
                for (_, r) in models {
                    for (n, _) in &r.aux {
                        if !s.contains(n) {
                            s.push(n.clone());
                        }
                    }
                }
                s
            }
        };
        for stat in &stat_names {
            let cells = models
                .iter()
                .map(|(_, r)| {
                    r.lookup(stat).map(|v| match v {
                        AuxValue::Scalar(x) if x.fract() == 0.0 && x.abs() < 1e15 => format!("{}", x as i64),
                        AuxValue::Scalar(x) => format!("{:.*}", d, x),
                        AuxValue::Local(s) => s,
                    })
                })
                .collect();
            rows.push(TableRow { label: stat_label(stat), kind: RowKind::Stat, cells });
        }

        let mut headers = Vec::new();
        if opts.numbered {
            headers.push(match &opts.mtitles {
                Some(t) => (0..models.len()).map(|i| t.get(i).cloned().unwrap_or_default()).collect(),
                None => (1..=models.len()).map(|i| format!("({})", i)).collect(),
            });
            headers.push(models.iter().map(|(_, r)| r.depvar.clone()).collect());
        } else {
            headers.push(models.iter().map(|(n, _)| n.clone()).collect());
        }

        let mut notes = Vec::new();
        if let Some(note) = opts.secondary.note() {
            notes.push(note.to_string());
        }
        if opts.stars {
            notes.push("* p<0.05, ** p<0.01, *** p<0.001".to_string());
        }

        ResultTable { title: opts.title.clone(), label: opts.label.clone(), headers, rows, notes }
    }

    pub fn ncols(&self) -> usize {
        self.headers.first().map_or(0, Vec::len)
    }
}

/// Output file format, chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Rtf,
    Csv,
    Html,
    Tex,
    Txt,
}

impl ExportFormat {
    pub fn from_path(path: &Path) -> Result<ExportFormat, ExportError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "rtf" => Ok(ExportFormat::Rtf),
            "csv" => Ok(ExportFormat::Csv),
            "html" | "htm" => Ok(ExportFormat::Html),
            "tex" => Ok(ExportFormat::Tex),
            "txt" | "" => Ok(ExportFormat::Txt),
            other => Err(ExportError::Unsupported(format!(".{}", other))),
        }
    }
}

pub fn render(table: &ResultTable, format: ExportFormat) -> Result<String, ExportError> {
    Ok(match format {
        ExportFormat::Rtf => render_rtf(table),
        ExportFormat::Csv => render_csv(table)?,
        ExportFormat::Html => render_html(table),
        ExportFormat::Tex => render_tex(table),
        ExportFormat::Txt => render_text(table),
    })
}

/// Write `table` to `path` in the format its extension names
pub fn write_table(table: &ResultTable, path: &Path) -> Result<(), ExportError> {
    let format = ExportFormat::from_path(path)?;
    let text = render(table, format)?;
    std::fs::write(path, text)?;
    tracing::info!(path = %path.display(), ?format, "wrote estimates table");
    Ok(())
}

pub fn render_text(table: &ResultTable) -> String {
    let label_width = table
        .rows
        .iter()
        .map(|r| r.label.chars().count())
        .max()
        .unwrap_or(0)
        .max(12);
    let cell_width = table
        .rows
        .iter()
        .flat_map(|r| r.cells.iter().flatten())
        .chain(table.headers.iter().flatten())
        .map(|c| c.chars().count())
        .max()
        .unwrap_or(0)
        .max(12);
    let width = label_width + (cell_width + 1) * table.ncols();

    let line = |label: &str, cells: &mut dyn Iterator<Item = &str>| {
        let mut s = format!("{:<w$}", label, w = label_width);
        for c in cells {
            let _ = write!(s, " {:>w$}", c, w = cell_width);
        }
        s.trim_end().to_string()
    };

    let mut out = Vec::new();
    if let Some(title) = &table.title {
        out.push(title.clone());
    }
    out.push("=".repeat(width));
    for header in &table.headers {
        out.push(line("", &mut header.iter().map(String::as_str)));
    }
    out.push("-".repeat(width));
    let mut in_stats = false;
    for row in &table.rows {
        if row.kind == RowKind::Stat && !in_stats {
            out.push("-".repeat(width));
            in_stats = true;
        }
        out.push(line(&row.label, &mut row.cells.iter().map(|c| c.as_deref().unwrap_or(""))));
        if row.kind == RowKind::Secondary {
            out.push(String::new());
        }
    }
    out.push("=".repeat(width));
    out.extend(table.notes.iter().cloned());
    out.join("\n")
}

fn render_csv(table: &ResultTable) -> Result<String, ExportError> {
    // Title and note rows are a single field wide
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());
    if let Some(title) = &table.title {
        writer.write_record([title.as_str()])?;
    }
    for header in &table.headers {
        writer.write_record(std::iter::once("").chain(header.iter().map(String::as_str)))?;
    }
    for row in &table.rows {
        writer.write_record(
            std::iter::once(row.label.as_str()).chain(row.cells.iter().map(|c| c.as_deref().unwrap_or(""))),
        )?;
    }
    for note in &table.notes {
        writer.write_record([note.as_str()])?;
    }
    let bytes = writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn render_html(table: &ResultTable) -> String {
    let cols = table.ncols() + 1;
    let mut s = String::from("<table border=\"0\" width=\"*\">\n");
    if let Some(title) = &table.title {
        let _ = writeln!(s, "<caption>{}</caption>", escape_html(title));
    }
    let _ = writeln!(s, "<tr><td colspan={}><hr></td></tr>", cols);
    for header in &table.headers {
        s.push_str("<tr><td></td>");
        for h in header {
            let _ = write!(s, "<td align=\"center\">{}</td>", escape_html(h));
        }
        s.push_str("</tr>\n");
    }
    let _ = writeln!(s, "<tr><td colspan={}><hr></td></tr>", cols);
    let mut in_stats = false;
    for row in &table.rows {
        if row.kind == RowKind::Stat && !in_stats {
            let _ = writeln!(s, "<tr><td colspan={}><hr></td></tr>", cols);
            in_stats = true;
        }
        let _ = write!(s, "<tr><td>{}</td>", escape_html(&row.label));
        for c in &row.cells {
            let _ = write!(s, "<td align=\"center\">{}</td>", escape_html(c.as_deref().unwrap_or("")));
        }
        s.push_str("</tr>\n");
    }
    let _ = writeln!(s, "<tr><td colspan={}><hr></td></tr>", cols);
    for note in &table.notes {
        let _ = writeln!(s, "<tr><td colspan={}>{}</td></tr>", cols, escape_html(note));
    }
    s.push_str("</table>\n");
    s
}

fn escape_tex(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Stars become superscripts
fn tex_cell(cell: &str) -> String {
    let plain = cell.trim_end_matches('*');
    let n = cell.len() - plain.len();
    if n == 0 {
        escape_tex(cell)
    } else {
        format!("{}\\sym{{{}}}", escape_tex(plain), "*".repeat(n))
    }
}

fn render_tex(table: &ResultTable) -> String {
    let n = table.ncols();
    let mut s = String::new();
    s.push_str("{\n\\def\\sym#1{\\ifmmode^{#1}\\else\\(^{#1}\\)\\fi}\n");
    if table.title.is_some() || table.label.is_some() {
        s.push_str("\\begin{table}[htbp]\\centering\n");
        if let Some(title) = &table.title {
            let _ = writeln!(s, "\\caption{{{}}}", escape_tex(title));
        }
        if let Some(label) = &table.label {
            let _ = writeln!(s, "\\label{{{}}}", label);
        }
    }
    let _ = writeln!(s, "\\begin{{tabular}}{{l*{{{}}}{{c}}}}", n);
    s.push_str("\\hline\\hline\n");
    for header in &table.headers {
        let cells: Vec<String> = header.iter().map(|h| escape_tex(h)).collect();
        let _ = writeln!(s, " & {}\\\\", cells.join(" & "));
    }
    s.push_str("\\hline\n");
    let mut in_stats = false;
    for row in &table.rows {
        if row.kind == RowKind::Stat && !in_stats {
            s.push_str("\\hline\n");
            in_stats = true;
        }
        let cells: Vec<String> = row.cells.iter().map(|c| tex_cell(c.as_deref().unwrap_or(""))).collect();
        let _ = writeln!(s, "{} & {}\\\\", escape_tex(&row.label), cells.join(" & "));
    }
    s.push_str("\\hline\\hline\n");
    for note in &table.notes {
        let _ = writeln!(s, "\\multicolumn{{{}}}{{l}}{{\\footnotesize {}}}\\\\", n + 1, escape_tex(note));
    }
    s.push_str("\\end{tabular}\n");
    if table.title.is_some() || table.label.is_some() {
        s.push_str("\\end{table}\n");
    }
    s.push_str("}\n");
    s
}

fn escape_rtf(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) > 127 => {
                let _ = write!(out, "\\u{}?", c as u32 as i16);
            }
            c => out.push(c),
        }
    }
    out
}

fn render_rtf(table: &ResultTable) -> String {
    let n = table.ncols();
    let row_def = {
        let mut d = String::from("\\trowd\\trgaph108\\trleft-108");
        for i in 1..=n + 1 {
            let _ = write!(d, "\\cellx{}", 2000 + (i - 1) * 1500);
        }
        d
    };
    let rtf_row = |label: &str, cells: &mut dyn Iterator<Item = &str>, align: &str| {
        let mut r = format!("{}\\pard\\intbl\\ql {{{}}}\\cell", row_def, escape_rtf(label));
        for c in cells {
            let _ = write!(r, "\\pard\\intbl\\q{} {{{}}}\\cell", align, escape_rtf(c));
        }
        r.push_str("\\row\n");
        r
    };

    let mut s = String::from("{\\rtf1\\ansi\\deff0 {\\fonttbl{\\f0\\fnil Times New Roman;}}\n");
    s.push_str("{\\info {\\author statash}}\n");
    if let Some(title) = &table.title {
        let _ = writeln!(s, "{{\\pard\\keepn\\ql {}\\par}}", escape_rtf(title));
    }
    for header in &table.headers {
        s.push_str(&rtf_row("", &mut header.iter().map(String::as_str), "c"));
    }
    for row in &table.rows {
        s.push_str(&rtf_row(&row.label, &mut row.cells.iter().map(|c| c.as_deref().unwrap_or("")), "c"));
    }
    for note in &table.notes {
        let _ = writeln!(s, "{{\\pard\\ql\\fs20 {}\\par}}", escape_rtf(note));
    }
    s.push_str("}\n");
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::Coefficient;

    fn model(depvar: &str, b: f64, p: f64) -> EstimationResult {
        let mut r = EstimationResult::new("regress", depvar);
        r.nobs = 10;
        r.df_resid = Some(8.0);
        r.coefficients = vec![
            Coefficient { name: "x".into(), estimate: b, std_err: Some(0.5), p_value: Some(p) },
            Coefficient { name: "_cons".into(), estimate: 1.0, std_err: Some(0.25), p_value: Some(0.2) },
        ];
        r
    }

    #[test]
    fn stars_follow_thresholds() {
        assert_eq!(stars(Some(0.0005)), "***");
        assert_eq!(stars(Some(0.005)), "**");
        assert_eq!(stars(Some(0.03)), "*");
        assert_eq!(stars(Some(0.05)), "");
        assert_eq!(stars(None), "");
    }

    #[test]
    fn estadd_entries_get_their_own_rows() {
        let mut r = model("y", 2.0, 0.001);
        r.add_aux("N2", AuxValue::Local("99".into()));
        let table = ResultTable::build(&[("m1".into(), &r)], &TableOptions::default());
        let n2 = table.rows.iter().find(|row| row.label == "N2").unwrap();
        assert_eq!(n2.cells, vec![Some("99".to_string())]);
        let n = table.rows.iter().find(|row| row.label == "N").unwrap();
        assert_eq!(n.cells, vec![Some("10".to_string())]);
        assert_eq!(table.rows[0].cells, vec![Some("2.000**".to_string())]);
        assert_eq!(table.rows[1].cells, vec![Some("(4.00)".to_string())]);
    }

    #[test]
    fn missing_coefficients_leave_blank_cells() {
        let a = model("y", 2.0, 0.5);
        let mut b = model("y", 1.0, 0.5);
        b.coefficients.insert(1, Coefficient { name: "z".into(), estimate: 3.0, std_err: Some(1.0), p_value: Some(0.5) });
        let opts = TableOptions { secondary: Secondary::StdErr, ..TableOptions::default() };
        let table = ResultTable::build(&[("a".into(), &a), ("b".into(), &b)], &opts);
        let labels: Vec<&str> = table.rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["x", "", "_cons", "", "z", "", "N"]);
        assert_eq!(table.rows[4].cells, vec![None, Some("3.000".to_string())]);
        assert_eq!(table.headers[0], vec!["(1)", "(2)"]);
    }

    #[test]
    fn keep_and_drop_select_rows() {
        let r = model("y", 2.0, 0.5);
        let opts = TableOptions { drop: vec!["_cons".into()], secondary: Secondary::Nothing, ..TableOptions::default() };
        let table = ResultTable::build(&[("m".into(), &r)], &opts);
        assert_eq!(table.rows.iter().filter(|r| r.kind == RowKind::Coefficient).count(), 1);
        let opts = TableOptions { keep: vec!["_c*".into()], ..TableOptions::default() };
        let table = ResultTable::build(&[("m".into(), &r)], &opts);
        assert_eq!(table.rows[0].label, "_cons");
    }

    #[test]
    fn option_flags_are_read() {
        let mut options = Options::new();
        options.insert("se", None);
        options.insert("nostar", None);
        options.insert("stats", Some("N r2".into()));
        let t = TableOptions::from_options(&options, false);
        assert_eq!(t.secondary, Secondary::StdErr);
        assert!(!t.stars);
        assert_eq!(t.stats, Some(vec!["N".to_string(), "r2".to_string()]));
    }

    #[test]
    fn formats_from_extension() {
        assert_eq!(ExportFormat::from_path(Path::new("a.RTF")).unwrap(), ExportFormat::Rtf);
        assert_eq!(ExportFormat::from_path(Path::new("a.tex")).unwrap(), ExportFormat::Tex);
        assert!(matches!(ExportFormat::from_path(Path::new("a.xlsx")), Err(ExportError::Unsupported(_))));
    }

    #[test]
    fn every_format_contains_the_cells() {
        let mut r = model("y", 2.0, 0.001);
        r.add_aux("N2", AuxValue::Scalar(99.0));
        let table = ResultTable::build(&[("m1".into(), &r)], &TableOptions::default());
        for format in [ExportFormat::Rtf, ExportFormat::Csv, ExportFormat::Html, ExportFormat::Tex, ExportFormat::Txt] {
            let text = render(&table, format).unwrap();
            assert!(text.contains("N2"), "{:?}", format);
            assert!(text.contains("99"), "{:?}", format);
            assert!(text.contains("2.000"), "{:?}", format);
        }
        assert!(render(&table, ExportFormat::Tex).unwrap().contains("\\_cons"));
    }
}
