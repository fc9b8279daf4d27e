//! Output formatting
//!
//! Handlers return an `Output`; `render` turns it into Stata's fixed-width
//! text layout. Number formatting helpers live here too since values,
//! expressions and tables all print numbers the same way.

mod tables;

pub use tables::{
    CodebookEntry, DescribeRow, Description, EstimatesDir, EstimationView, ListTable,
    SummaryRow, SummaryTable, Tabulation,
};

use crate::ast::Value;
use crate::dataset::MergeReport;
use crate::export::ResultTable;

/// Default line width
pub const DEFAULT_LINESIZE: usize = 80;

/// Result of one command, before formatting
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    None,
    Text(String),
    Summary(SummaryTable),
    Tabulation(Tabulation),
    Estimation(EstimationView),
    List(ListTable),
    Describe(Description),
    Codebook(Vec<CodebookEntry>),
    Merge(MergeReport),
    ResultTable(ResultTable),
    Estimates(EstimatesDir),
    Many(Vec<Output>),
}

impl Output {
    pub fn text(s: impl Into<String>) -> Output {
        Output::Text(s.into())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Output::None)
    }

    /// Combine two outputs, dropping empty ones
    pub fn then(self, next: Output) -> Output {
        match (self, next) {
            (Output::None, o) | (o, Output::None) => o,
            (Output::Many(mut items), o) => {
                items.push(o);
                Output::Many(items)
            }
            (a, b) => Output::Many(vec![a, b]),
        }
    }
}

/// Format an output block for a terminal `linesize` columns wide
pub fn render(output: &Output, linesize: usize) -> String {
    match output {
        Output::None => String::new(),
        Output::Text(s) => s.clone(),
        Output::Summary(t) => tables::summary(t),
        Output::Tabulation(t) => tables::tabulation(t, linesize),
        Output::Estimation(v) => tables::estimation(v),
        Output::List(t) => tables::list(t, linesize),
        Output::Describe(d) => tables::describe(d, linesize),
        Output::Codebook(entries) => tables::codebook(entries, linesize),
        Output::Merge(r) => tables::merge_report(r),
        Output::ResultTable(t) => crate::export::render_text(t),
        Output::Estimates(d) => tables::estimates_dir(d),
        Output::Many(items) => items
            .iter()
            .map(|o| render(o, linesize))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Shortest text that reads back as the same number. Integers print without
/// a decimal point; very large or small magnitudes use exponent notation.
pub fn format_number(n: f64) -> String {
    if n == 0.0 {
        return "0".to_string();
    }
    if !n.is_finite() {
        return ".".to_string();
    }
    let magnitude = n.abs();
    if n.fract() == 0.0 && magnitude < 1e15 {
        format!("{}", n as i64)
    } else if (1e-5..1e15).contains(&magnitude) {
        format!("{}", n)
    } else {
        format!("{:e}", n)
    }
}

/// Stata's `%W.0g`: as many significant digits as fit in `width`
/// (at most 7), dropping the leading zero of fractions
pub fn format_g(n: f64, width: usize) -> String {
    if !n.is_finite() {
        return ".".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        let s = format!("{}", n as i64);
        if s.len() <= width {
            return s;
        }
    }
    let exponent = n.abs().log10().floor() as i32;
    let max_digits = 7.min(width.saturating_sub(2)).max(1) as i32;
    if (-5..max_digits).contains(&exponent) {
        for digits in (1..=max_digits).rev() {
            let decimals = (digits - 1 - exponent).max(0) as usize;
            let s = trim_fraction(format!("{:.*}", decimals, n));
            let s = drop_leading_zero(s);
            if s.len() <= width {
                return s;
            }
        }
    }
    // scientific: mantissa shortened until it fits, one column kept for the sign
    for digits in (0..=max_digits.max(1) as usize).rev() {
        let s = format!("{:.*e}", digits, n);
        let s = stata_exponent(&s);
        if s.trim_start_matches('-').len() < width || digits == 0 {
            return s;
        }
    }
    format!("{:e}", n)
}

/// Fixed decimals, `.` for missing
pub fn format_fixed(n: f64, decimals: usize) -> String {
    if !n.is_finite() {
        return ".".to_string();
    }
    let s = format!("{:.*}", decimals, n);
    // -0.000 reads as 0.000
    if s.starts_with('-') && s[1..].chars().all(|c| c == '0' || c == '.') {
        s[1..].to_string()
    } else {
        s
    }
}

fn trim_fraction(s: String) -> String {
    if !s.contains('.') {
        return s;
    }
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn drop_leading_zero(s: String) -> String {
    if let Some(rest) = s.strip_prefix("0.") {
        format!(".{}", rest)
    } else if let Some(rest) = s.strip_prefix("-0.") {
        format!("-.{}", rest)
    } else {
        s
    }
}

/// `1.5e7` -> `1.5e+07`
fn stata_exponent(s: &str) -> String {
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let mantissa = trim_fraction(mantissa.to_string());
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => s.to_string(),
    }
}

/// Render a value through a display format such as `%9.2f`, `%10.0g`,
/// `%td` or `%20s`. Unknown formats fall back to `%9.0g`.
pub fn apply_format(format: &str, value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        Value::Missing => ".".to_string(),
        Value::Num(n) => {
            let spec = format.trim_start_matches('%').trim_start_matches('-');
            if spec.starts_with("td") || spec.starts_with('d') {
                return crate::eval::date_from_days(*n)
                    .map(|d| d.format("%d%b%Y").to_string().to_lowercase())
                    .unwrap_or_else(|| ".".to_string());
            }
            let comma = spec.ends_with("fc") || spec.ends_with("gc");
            let spec = spec.trim_end_matches('c');
            let (body, kind) = spec.split_at(spec.len().saturating_sub(1));
            let (width, decimals) = match body.split_once('.') {
                Some((w, d)) => (w.parse().unwrap_or(9), d.parse().unwrap_or(0)),
                None => (body.parse().unwrap_or(9), 0),
            };
            let text = match kind {
                "f" => format_fixed(*n, decimals),
                "e" => stata_exponent(&format!("{:.*e}", decimals, n)),
                _ => format_g(*n, width),
            };
            if comma {
                group_thousands(&text)
            } else {
                text
            }
        }
    }
}

fn group_thousands(text: &str) -> String {
    let (sign, rest) = match text.strip_prefix('-') {
        Some(r) => ("-", r),
        None => ("", text),
    };
    let (int, frac) = match rest.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (rest, None),
    };
    if !int.chars().all(|c| c.is_ascii_digit()) {
        return text.to_string();
    }
    let mut grouped = String::new();
    for (i, c) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    match frac {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }
}

/// Shorten a name to `width` the way Stata does: `longvariable` -> `longvar~e`
pub fn abbreviate(name: &str, width: usize) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() <= width || width < 3 {
        return name.to_string();
    }
    let mut out: String = chars[..width - 2].iter().collect();
    out.push('~');
    out.push(chars[chars.len() - 1]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_read_back() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.1), "0.1");
        assert_eq!(format_number(1e-7), "1e-7");
        assert_eq!(format_number(2.5e20), "2.5e20");
        assert_eq!(format_number(-12.25), "-12.25");
    }

    #[test]
    fn general_format() {
        assert_eq!(format_g(2.0, 9), "2");
        assert_eq!(format_g(2f64.sqrt(), 9), "1.414214");
        assert_eq!(format_g(100.0 / 3.0, 9), "33.33333");
        assert_eq!(format_g(1.0 / 3.0, 9), ".3333333");
        assert_eq!(format_g(-0.5, 9), "-.5");
        assert_eq!(format_g(12345678901.5, 9), "1.23e+10");
        assert_eq!(format_g(-12345678901.5, 9), "-1.23e+10");
        assert_eq!(format_g(2.5e-8, 9), "2.5e-08");
        assert_eq!(format_g(f64::NAN, 9), ".");
    }

    #[test]
    fn display_formats() {
        assert_eq!(apply_format("%9.2f", &Value::Num(3.14159)), "3.14");
        assert_eq!(apply_format("%10.0g", &Value::Num(0.25)), ".25");
        assert_eq!(apply_format("%td", &Value::Num(0.0)), "01jan1960");
        assert_eq!(apply_format("%12.0fc", &Value::Num(1234567.0)), "1,234,567");
        assert_eq!(apply_format("%9.0g", &Value::Missing), ".");
        assert_eq!(apply_format("%5s", &Value::Str("ab".into())), "ab");
    }

    #[test]
    fn abbreviations() {
        assert_eq!(abbreviate("price", 12), "price");
        assert_eq!(abbreviate("averylongvariablename", 12), "averylongv~e");
    }

    #[test]
    fn outputs_combine() {
        let o = Output::None.then(Output::text("a")).then(Output::text("b"));
        assert_eq!(render(&o, 80), "a\nb");
    }
}
