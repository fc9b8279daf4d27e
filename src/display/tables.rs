//! Stata's fixed text layouts

use super::{abbreviate, format_fixed, format_g};
use crate::dataset::MergeReport;
use crate::eval::SummaryStats;
use crate::results::EstimationResult;

const RULE: usize = 78;

fn dashes(n: usize) -> String {
    "-".repeat(n)
}

/// `------------+----------` with the `+` after `left` dashes
fn split_rule(left: usize, right: usize) -> String {
    format!("{}+{}", dashes(left), dashes(right))
}

fn opt_g(v: Option<f64>, width: usize) -> String {
    v.map_or_else(String::new, |x| format_g(x, width))
}

// summarize

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub name: String,
    pub label: Option<String>,
    pub stats: SummaryStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryTable {
    pub rows: Vec<SummaryRow>,
    /// Show the sum of weights column
    pub weighted: bool,
    pub detail: bool,
}

pub(super) fn summary(t: &SummaryTable) -> String {
    if t.detail {
        return t.rows.iter().map(summary_detail).collect::<Vec<_>>().join("\n\n");
    }
    let mut lines = Vec::new();
    let weight_head = if t.weighted { format!("{:>11}", "Weight") } else { String::new() };
    lines.push(format!(
        "{:>12} |{:>11}{}{:>12}{:>13}{:>11}{:>11}",
        "Variable", "Obs", weight_head, "Mean", "Std. dev.", "Min", "Max"
    ));
    lines.push(split_rule(13, if t.weighted { 69 } else { 58 }));
    for row in &t.rows {
        let s = &row.stats;
        let weight = if t.weighted { format!("{:>11}", format_g(s.sum_weights, 10)) } else { String::new() };
        lines.push(
            format!(
                "{:>12} |{:>11}{}{:>12}{:>13}{:>11}{:>11}",
                abbreviate(&row.name, 12),
                format_g(s.n, 10),
                weight,
                opt_g(s.mean, 9),
                opt_g(s.sd, 9),
                opt_g(s.min, 9),
                opt_g(s.max, 9)
            )
            .trim_end()
            .to_string(),
        );
    }
    lines.join("\n")
}

fn summary_detail(row: &SummaryRow) -> String {
    let title = row.label.clone().unwrap_or_else(|| row.name.clone());
    let mut lines = vec![format!("{:^61}", title).trim_end().to_string(), dashes(61)];
    let s = &row.stats;
    let Some(d) = &s.detail else {
        lines.push(format!("{:>20}", "no observations"));
        return lines.join("\n");
    };
    let pct = |p: f64| d.percentiles.iter().find(|(q, _)| *q == p).map(|(_, v)| *v);
    let small = |i: usize| d.smallest.get(i).copied();
    // largest are stored in ascending order, the maximum last
    let large = |i: usize| {
        let offset = 4usize.saturating_sub(d.largest.len());
        i.checked_sub(offset).and_then(|j| d.largest.get(j)).copied()
    };
    let left = |label: &str, p: Option<f64>, extreme: Option<f64>| {
        format!("{:>3}  {:>11}    {:>11}", label, opt_g(p, 9), opt_g(extreme, 9))
    };
    let right = |label: &str, v: Option<f64>| format!("       {:<12}{:>13}", label, opt_g(v, 9));

    lines.push(format!("{:>16}{:>14}", "Percentiles", "Smallest"));
    lines.push(left("1%", pct(1.0), small(0)));
    lines.push(left("5%", pct(5.0), small(1)));
    lines.push(format!("{}{}", left("10%", pct(10.0), small(2)), right("Obs", Some(s.n))));
    lines.push(format!("{}{}", left("25%", pct(25.0), small(3)), right("Sum of wgt.", Some(s.sum_weights))));
    lines.push(String::new());
    lines.push(format!("{}{}", left("50%", pct(50.0), None), right("Mean", s.mean)));
    lines.push(format!("{:>30}{}", "Largest", right("Std. dev.", s.sd)));
    lines.push(left("75%", pct(75.0), large(0)));
    lines.push(format!("{}{}", left("90%", pct(90.0), large(1)), right("Variance", d.variance)));
    lines.push(format!("{}{}", left("95%", pct(95.0), large(2)), right("Skewness", d.skewness)));
    lines.push(format!("{}{}", left("99%", pct(99.0), large(3)), right("Kurtosis", d.kurtosis)));
    lines.iter().map(|l| l.trim_end().to_string()).collect::<Vec<_>>().join("\n")
}

// tabulate

#[derive(Debug, Clone, PartialEq)]
pub enum Tabulation {
    OneWay {
        var: String,
        rows: Vec<(String, f64)>,
    },
    TwoWay {
        row_var: String,
        col_var: String,
        row_labels: Vec<String>,
        col_labels: Vec<String>,
        counts: Vec<Vec<f64>>,
    },
}

pub(super) fn tabulation(t: &Tabulation, linesize: usize) -> String {
    match t {
        Tabulation::OneWay { var, rows } => one_way(var, rows),
        Tabulation::TwoWay { row_var, col_var, row_labels, col_labels, counts } => {
            two_way(row_var, col_var, row_labels, col_labels, counts, linesize)
        }
    }
}

fn label_width<'a>(name: &str, labels: impl Iterator<Item = &'a String>) -> usize {
    labels
        .map(|l| l.chars().count())
        .chain([name.chars().count(), 10])
        .max()
        .unwrap_or(10)
        .min(32)
}

fn one_way(var: &str, rows: &[(String, f64)]) -> String {
    let total: f64 = rows.iter().map(|(_, n)| n).sum();
    if total == 0.0 {
        return "no observations".to_string();
    }
    let w = label_width(var, rows.iter().map(|(l, _)| l));
    let mut lines = vec![
        format!("{:>w$} | {:>10} {:>11} {:>11}", abbreviate(var, w), "Freq.", "Percent", "Cum.", w = w),
        split_rule(w + 1, 35),
    ];
    let mut cumulative = 0.0;
    for (label, n) in rows {
        cumulative += n;
        lines.push(format!(
            "{:>w$} | {:>10} {:>11} {:>11}",
            label,
            format_g(*n, 10),
            format_fixed(100.0 * n / total, 2),
            format_fixed(100.0 * cumulative / total, 2),
            w = w
        ));
    }
    lines.push(split_rule(w + 1, 35));
    lines.push(format!("{:>w$} | {:>10} {:>11}", "Total", format_g(total, 10), "100.00", w = w));
    lines.join("\n")
}

fn two_way(
    row_var: &str,
    col_var: &str,
    row_labels: &[String],
    col_labels: &[String],
    counts: &[Vec<f64>],
    linesize: usize,
) -> String {
    let grand: f64 = counts.iter().flatten().sum();
    if grand == 0.0 {
        return "no observations".to_string();
    }
    let w = label_width(row_var, row_labels.iter());
    let row_totals: Vec<f64> = counts.iter().map(|r| r.iter().sum()).collect();
    let col_totals: Vec<f64> = (0..col_labels.len())
        .map(|j| counts.iter().map(|r| r.get(j).copied().unwrap_or(0.0)).sum())
        .collect();

    // columns per block so a block fits the line, leaving room for Total
    let per_block = (linesize.saturating_sub(w + 3 + 13) / 11).max(1);
    let mut blocks = Vec::new();
    let chunks: Vec<&[String]> = col_labels.chunks(per_block).collect();
    for (b, chunk) in chunks.iter().enumerate() {
        let start = b * per_block;
        let last = b + 1 == chunks.len();
        let inner = chunk.len() * 11;
        let mut lines = Vec::new();
        lines.push(format!("{:>w$} | {:^inner$}", "", abbreviate(col_var, inner), w = w, inner = inner).trim_end().to_string());
        let mut head = format!("{:>w$} |", abbreviate(row_var, w), w = w);
        for label in *chunk {
            head.push_str(&format!(" {:>10}", abbreviate(label, 10)));
        }
        if last {
            head.push_str(&format!(" | {:>10}", "Total"));
        }
        lines.push(head);
        let rule = if last {
            format!("{}+{}", split_rule(w + 1, inner + 1), dashes(11))
        } else {
            split_rule(w + 1, inner + 1)
        };
        lines.push(rule.clone());
        let row_line = |label: &str, values: Vec<f64>, total: f64| {
            let mut line = format!("{:>w$} |", label, w = w);
            for v in values {
                line.push_str(&format!(" {:>10}", format_g(v, 10)));
            }
            if last {
                line.push_str(&format!(" | {:>10}", format_g(total, 10)));
            }
            line
        };
        for (i, label) in row_labels.iter().enumerate() {
            let values = (start..start + chunk.len())
                .map(|j| counts[i].get(j).copied().unwrap_or(0.0))
                .collect();
            lines.push(row_line(label, values, row_totals[i]));
        }
        lines.push(rule);
        lines.push(row_line("Total", col_totals[start..start + chunk.len()].to_vec(), grand));
        blocks.push(lines.join("\n"));
    }
    blocks.join("\n\n")
}

// estimation

/// An estimation result as displayed after fitting or on replay
#[derive(Debug, Clone, PartialEq)]
pub struct EstimationView {
    pub result: EstimationResult,
    /// Confidence level in percent
    pub level: f64,
    /// Column title when coefficients are shown exponentiated
    pub eform: Option<String>,
    /// Log likelihood per iteration
    pub iterations: Vec<f64>,
}

fn stat_line(label: &str, value: String) -> String {
    format!("{:<16}= {:>10}", label, value)
}

fn header_stats(r: &EstimationResult) -> Vec<String> {
    let mut stats = vec![stat_line("Number of obs", r.nobs.to_string())];
    let get = |n: &str| r.fit_stat(n);
    if let Some(groups) = get("N_g") {
        stats.push(stat_line("Number of groups", format_g(groups, 10)));
    }
    let df_m = get("df_m").unwrap_or(0.0);
    if let (Some(f), Some(df_r)) = (get("F"), get("df_r")) {
        stats.push(stat_line(&format!("F({}, {})", format_g(df_m, 6), format_g(df_r, 9)), format_fixed(f, 2)));
        if let Some(p) = get("p") {
            stats.push(stat_line("Prob > F", format_fixed(p, 4)));
        }
    }
    if let Some(chi2) = get("chi2") {
        // panel-data models test with the Wald statistic
        let kind = if r.vce.is_some() || get("N_g").is_some() { "Wald" } else { "LR" };
        stats.push(stat_line(&format!("{} chi2({})", kind, format_g(df_m, 6)), format_fixed(chi2, 2)));
        if let Some(p) = get("p") {
            stats.push(stat_line("Prob > chi2", format_fixed(p, 4)));
        }
    }
    if let Some(r2) = get("r2") {
        stats.push(stat_line("R-squared", format_fixed(r2, 4)));
    }
    if let Some(r2a) = get("r2_a") {
        if r.vce.is_none() {
            stats.push(stat_line("Adj R-squared", format_fixed(r2a, 4)));
        }
    }
    if let Some(r2p) = get("r2_p") {
        stats.push(stat_line("Pseudo R2", format_fixed(r2p, 4)));
    }
    if let Some(rmse) = get("rmse") {
        stats.push(stat_line("Root MSE", format_g(rmse, 9)));
    }
    stats
}

/// Put `right` beside `left`, starting at column 49
fn beside(left: Vec<String>, right: Vec<String>) -> Vec<String> {
    let n = left.len().max(right.len());
    (0..n)
        .map(|i| {
            let l = left.get(i).map_or("", String::as_str);
            match right.get(i) {
                Some(r) => format!("{:<49}{}", l, r),
                None => l.to_string(),
            }
        })
        .collect()
}

pub(super) fn estimation(v: &EstimationView) -> String {
    let r = &v.result;
    let mut out = Vec::new();

    if !v.iterations.is_empty() {
        for (i, ll) in v.iterations.iter().enumerate() {
            out.push(format!("Iteration {}:{:>w$}Log likelihood = {}", i, "", format_fixed(*ll, 7), w = 3 - i.to_string().len().min(2)));
        }
        out.push(String::new());
    }

    let stats = header_stats(r);
    let anova = match (r.fit_stat("mss"), r.fit_stat("rss"), r.fit_stat("df_m"), r.fit_stat("df_r")) {
        (Some(mss), Some(rss), Some(df_m), Some(df_r)) if r.vce.is_none() => Some((mss, rss, df_m, df_r)),
        _ => None,
    };
    let left = match anova {
        Some((mss, rss, df_m, df_r)) => {
            let ms = |ss: f64, df: f64| if df > 0.0 { format_g(ss / df, 10) } else { ".".into() };
            let src = |name: &str, ss: f64, df: f64| {
                format!("{:>12} | {:>11} {:>10} {:>11}", name, format_g(ss, 10), format_g(df, 10), ms(ss, df))
            };
            vec![
                format!("{:>12} | {:>11} {:>10} {:>11}", "Source", "SS", "df", "MS"),
                split_rule(13, 35),
                src("Model", mss, df_m),
                src("Residual", rss, df_r),
                split_rule(13, 35),
                src("Total", mss + rss, df_m + df_r),
            ]
        }
        None => {
            let mut left = vec![if r.title.is_empty() { r.command.clone() } else { r.title.clone() }];
            left.resize(stats.len().saturating_sub(1), String::new());
            if let Some(ll) = r.fit_stat("ll") {
                left.push(format!("Log likelihood = {}", format_fixed(ll, 7)));
            }
            left
        }
    };
    out.extend(beside(left, stats).into_iter().map(|l| l.trim_end().to_string()));
    out.push(String::new());

    // coefficient table
    let stat = r.stat_label();
    out.push(dashes(RULE));
    if let Some(vce) = &r.vce {
        let kind = vce.split_whitespace().next().unwrap_or("");
        let mut title: Vec<char> = kind.chars().collect();
        if let Some(c) = title.first_mut() {
            *c = c.to_ascii_uppercase();
        }
        out.push(format!("{:>12} | {:>22}", "", title.into_iter().collect::<String>()));
    }
    let coef_head = v.eform.as_deref().unwrap_or("Coefficient");
    out.push(format!(
        "{:>12} | {:>11} {:>10} {:>8} {:>7}     [{}% conf. interval]",
        abbreviate(&r.depvar, 12),
        coef_head,
        "Std. err.",
        stat,
        format!("P>|{}|", stat),
        format_g(v.level, 4)
    ));
    out.push(split_rule(13, RULE - 14));
    let crit = r.critical_value(v.level);
    for c in &r.coefficients {
        let Some(se) = c.std_err else {
            out.push(format!("{:>12} | {:>11}  (omitted)", abbreviate(&c.name, 12), "0"));
            continue;
        };
        let (lo, hi) = (c.estimate - crit * se, c.estimate + crit * se);
        let (b, se, lo, hi) = if v.eform.is_some() {
            let e = c.estimate.exp();
            (e, e * se, lo.exp(), hi.exp())
        } else {
            (c.estimate, se, lo, hi)
        };
        out.push(format!(
            "{:>12} | {:>11} {:>10} {:>8} {:>7}    {:>10}  {:>10}",
            abbreviate(&c.name, 12),
            format_g(b, 9),
            format_g(se, 9),
            c.statistic().map_or(".".into(), |t| format_fixed(t, 2)),
            c.p_value.map_or(".".into(), |p| format_fixed(p, 3)),
            format_g(lo, 9),
            format_g(hi, 9)
        ));
    }
    let ancillary: Vec<String> = ["sigma_u", "rho", "alpha"]
        .iter()
        .filter_map(|name| r.fit_stat(name).map(|v| format!("{:>12} | {:>11}", name, format_g(v, 9))))
        .collect();
    if !ancillary.is_empty() {
        out.push(split_rule(13, RULE - 14));
        out.extend(ancillary);
    }
    out.push(dashes(RULE));
    out.join("\n")
}

// list

#[derive(Debug, Clone, PartialEq)]
pub struct ListTable {
    /// Column name and whether it is right-aligned (numeric)
    pub columns: Vec<(String, bool)>,
    /// Observation number (1-based) and formatted cells
    pub rows: Vec<(usize, Vec<String>)>,
    pub show_obs: bool,
}

pub(super) fn list(t: &ListTable, linesize: usize) -> String {
    if t.rows.is_empty() || t.columns.is_empty() {
        return String::new();
    }
    let obs_width = if t.show_obs {
        t.rows.iter().map(|(n, _)| n.to_string().len()).max().unwrap_or(1) + 1
    } else {
        0
    };
    let margin = obs_width + 2;
    let widths: Vec<usize> = t
        .columns
        .iter()
        .enumerate()
        .map(|(j, (name, _))| {
            t.rows
                .iter()
                .map(|(_, cells)| cells.get(j).map_or(0, |c| c.chars().count()))
                .chain([name.chars().count().min(12)])
                .max()
                .unwrap_or(1)
        })
        .collect();

    // split columns into blocks that fit the line
    let mut blocks: Vec<Vec<usize>> = vec![Vec::new()];
    let mut used = margin + 4;
    for (j, w) in widths.iter().enumerate() {
        let need = w + 2;
        let current = blocks.last_mut().map_or(0, |b| b.len());
        if current > 0 && used + need > linesize {
            blocks.push(Vec::new());
            used = margin + 4;
        }
        if let Some(b) = blocks.last_mut() {
            b.push(j);
        }
        used += need;
    }

    let pad = |text: &str, w: usize, right: bool| {
        if right {
            format!("{:>w$}", text, w = w)
        } else {
            format!("{:<w$}", text, w = w)
        }
    };
    let mut out = Vec::new();
    for block in &blocks {
        let inner: usize = block.iter().map(|&j| widths[j]).sum::<usize>() + 2 * block.len().saturating_sub(1) + 2;
        let indent = " ".repeat(margin);
        let border = format!("{}+{}+", indent, dashes(inner));
        out.push(border.clone());
        let head: Vec<String> = block
            .iter()
            .map(|&j| pad(&abbreviate(&t.columns[j].0, widths[j]), widths[j], t.columns[j].1))
            .collect();
        out.push(format!("{}| {} |", indent, head.join("  ")));
        out.push(format!("{}|{}|", indent, dashes(inner)));
        for (obs, cells) in &t.rows {
            let prefix = if t.show_obs {
                format!("{:>w$}. ", obs, w = obs_width)
            } else {
                indent.clone()
            };
            let row: Vec<String> = block
                .iter()
                .map(|&j| pad(cells.get(j).map_or("", String::as_str), widths[j], t.columns[j].1))
                .collect();
            out.push(format!("{}| {} |", prefix, row.join("  ")));
        }
        out.push(border);
    }
    out.join("\n")
}

// describe

#[derive(Debug, Clone, PartialEq)]
pub struct DescribeRow {
    pub name: String,
    pub storage: String,
    pub format: String,
    pub value_label: Option<String>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Description {
    pub source: Option<String>,
    pub nobs: usize,
    pub vars: Vec<DescribeRow>,
    pub sorted_by: Vec<String>,
    pub changed: bool,
}

pub(super) fn describe(d: &Description, linesize: usize) -> String {
    let rule = dashes(linesize.saturating_sub(1).min(79));
    let mut lines = vec![
        match &d.source {
            Some(s) => format!("Contains data from {}", s),
            None => "Contains data".to_string(),
        },
        format!(" Observations: {:>12}", d.nobs),
        format!("    Variables: {:>12}", d.vars.len()),
        rule.clone(),
        "Variable      Storage   Display    Value".to_string(),
        "    name         type    format    label      Variable label".to_string(),
        rule.clone(),
    ];
    for v in &d.vars {
        let line = format!(
            "{:<15}{:<8}{:<11}{:<11}{}",
            abbreviate(&v.name, 14),
            v.storage,
            v.format,
            abbreviate(v.value_label.as_deref().unwrap_or(""), 10),
            v.label.as_deref().unwrap_or("")
        );
        lines.push(line.trim_end().to_string());
    }
    lines.push(rule);
    if !d.sorted_by.is_empty() {
        lines.push(format!("Sorted by: {}", d.sorted_by.join("  ")));
    }
    if d.changed {
        lines.push("     Note: Dataset has changed since last saved.".to_string());
    }
    lines.join("\n")
}

// codebook

#[derive(Debug, Clone, PartialEq)]
pub struct CodebookEntry {
    pub name: String,
    pub label: Option<String>,
    pub storage: String,
    pub numeric: bool,
    pub value_label: Option<String>,
    pub nobs: usize,
    pub missing: usize,
    pub unique: usize,
    pub range: Option<(f64, f64)>,
    pub mean: Option<f64>,
    pub sd: Option<f64>,
    pub percentiles: Vec<(f64, f64)>,
    /// Frequency, value, value label; filled when there are few values
    pub frequencies: Vec<(usize, String, Option<String>)>,
    pub examples: Vec<String>,
}

pub(super) fn codebook(entries: &[CodebookEntry], linesize: usize) -> String {
    let width = linesize.saturating_sub(1).min(79);
    let field = |name: &str, value: String| format!("{:>22}: {}", name, value);
    let mut blocks = Vec::new();
    for e in entries {
        let label = e.label.clone().unwrap_or_else(|| "(unlabeled)".to_string());
        let gap = width.saturating_sub(e.name.len() + label.len()).max(1);
        let mut lines = vec![
            dashes(width),
            format!("{}{}{}", e.name, " ".repeat(gap), label),
            dashes(width),
            String::new(),
        ];
        let kind = if e.numeric { "Numeric" } else { "String" };
        lines.push(field("Type", format!("{} ({})", kind, e.storage)));
        if let Some(vl) = &e.value_label {
            lines.push(field("Label", vl.clone()));
        }
        lines.push(String::new());
        if let Some((lo, hi)) = e.range {
            lines.push(field("Range", format!("[{},{}]", format_g(lo, 9), format_g(hi, 9))));
        }
        let missing_tag = if e.numeric { "Missing ." } else { "Missing \"\"" };
        lines.push(format!(
            "{:<48}{:>12}: {}/{}",
            field("Unique values", e.unique.to_string()),
            missing_tag,
            e.missing,
            e.nobs
        ));
        lines.push(String::new());
        if !e.frequencies.is_empty() {
            lines.push(field("Tabulation", "Freq.   Value".to_string()));
            for (n, value, vl) in &e.frequencies {
                let shown = match vl {
                    Some(l) => format!("{}  {}", value, l),
                    None => value.clone(),
                };
                lines.push(format!("{:>24}{:>5}   {}", "", n, shown));
            }
        } else if e.numeric {
            lines.push(field("Mean", opt_g(e.mean, 9)));
            lines.push(field("Std. dev.", opt_g(e.sd, 9)));
            if !e.percentiles.is_empty() {
                let head: Vec<String> = e.percentiles.iter().map(|(p, _)| format!("{:>9}", format!("{}%", p))).collect();
                let vals: Vec<String> = e.percentiles.iter().map(|(_, v)| format!("{:>9}", format_g(*v, 9))).collect();
                lines.push(field("Percentiles", head.concat()));
                lines.push(format!("{:>24}{}", "", vals.concat()));
            }
        } else if !e.examples.is_empty() {
            lines.push(field("Examples", format!("\"{}\"", e.examples[0])));
            for ex in &e.examples[1..] {
                lines.push(format!("{:>24}\"{}\"", "", ex));
            }
        }
        blocks.push(lines.iter().map(|l| l.trim_end().to_string()).collect::<Vec<_>>().join("\n"));
    }
    blocks.join("\n\n")
}

// merge

pub(super) fn merge_report(r: &MergeReport) -> String {
    let tag = |code: u8| match &r.indicator {
        Some(name) => format!("  ({}=={})", name, code),
        None => String::new(),
    };
    let lines = vec![
        format!("{:<28}{:>17}", "    Result", "Number of obs"),
        format!("    {}", dashes(41)),
        format!("{:<36}{:>9}", "    Not matched", r.master_only + r.using_only),
        format!("{:<36}{:>9}{}", "        from master", r.master_only, tag(1)),
        format!("{:<36}{:>9}{}", "        from using", r.using_only, tag(2)),
        String::new(),
        format!("{:<36}{:>9}{}", "    Matched", r.matched, tag(3)),
        format!("    {}", dashes(41)),
    ];
    lines.join("\n")
}

// estimates dir

#[derive(Debug, Clone, PartialEq)]
pub struct EstimatesDir {
    /// Name, command, depvar, parameter count, observations
    pub rows: Vec<(String, String, String, usize, usize)>,
}

pub(super) fn estimates_dir(d: &EstimatesDir) -> String {
    if d.rows.is_empty() {
        return "no estimates stored".to_string();
    }
    let mut lines = vec![
        dashes(63),
        format!("{:>12} | {:<12} {:<12} {:>5} {:>10}", "Name", "Command", "Depvar", "npar", "N"),
        split_rule(13, 49),
    ];
    for (name, command, depvar, npar, n) in &d.rows {
        lines.push(format!(
            "{:>12} | {:<12} {:<12} {:>5} {:>10}",
            abbreviate(name, 12),
            abbreviate(command, 12),
            abbreviate(depvar, 12),
            npar,
            n
        ));
    }
    lines.push(dashes(63));
    lines.join("\n")
}
