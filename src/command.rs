//! Command-line parser
//!
//! Turns one Stata command line into a structured `Command`:
//!
//! ```text
//! [prefix:] verb [varlist] [= exp] [using file] [if exp] [in range] [weight] [, options]
//! ```
//!
//! Splitting is quote-aware and tracks bracket depth, so commas, colons and
//! keywords inside `(...)`, `[...]` or `"..."` never split anything. The
//! varlist is left as raw tokens; wildcard expansion happens against the
//! live dataset at dispatch time.

use crate::ast::Expr;
use crate::parser::parse_expr;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// A malformed command line
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{reason}: {fragment}")]
pub struct SyntaxError {
    /// The offending part of the line
    pub fragment: String,
    pub reason: String,
}

impl SyntaxError {
    fn new(fragment: impl Into<String>, reason: impl Into<String>) -> Self {
        SyntaxError { fragment: fragment.into(), reason: reason.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightKind {
    Frequency,
    Analytic,
    Probability,
    Importance,
}

impl WeightKind {
    fn from_name(name: &str) -> Option<WeightKind> {
        match name {
            "fw" | "fweight" | "frequency" => Some(WeightKind::Frequency),
            "aw" | "aweight" | "cellsize" => Some(WeightKind::Analytic),
            "pw" | "pweight" => Some(WeightKind::Probability),
            "iw" | "iweight" => Some(WeightKind::Importance),
            _ => None,
        }
    }

    pub fn abbrev(self) -> &'static str {
        match self {
            WeightKind::Frequency => "fw",
            WeightKind::Analytic => "aw",
            WeightKind::Probability => "pw",
            WeightKind::Importance => "iw",
        }
    }
}

/// `[fw=exp]` and friends
#[derive(Debug, Clone, PartialEq)]
pub struct Weight {
    pub kind: WeightKind,
    pub expr: Expr,
}

/// One end of an `in` range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeBound {
    /// `f`
    First,
    /// `l`
    Last,
    /// 1-based position; negative counts back from the end (`-1` is last)
    Index(i64),
}

impl RangeBound {
    fn parse(text: &str) -> Option<RangeBound> {
        match text {
            "f" | "F" => Some(RangeBound::First),
            "l" | "L" => Some(RangeBound::Last),
            _ => match text.parse::<i64>() {
                Ok(0) | Err(_) => None,
                Ok(n) => Some(RangeBound::Index(n)),
            },
        }
    }

    /// 1-based position for a dataset of `nobs` rows
    fn position(self, nobs: usize) -> i64 {
        match self {
            RangeBound::First => 1,
            RangeBound::Last => nobs as i64,
            RangeBound::Index(n) if n > 0 => n,
            RangeBound::Index(n) => nobs as i64 + 1 + n,
        }
    }
}

impl fmt::Display for RangeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeBound::First => write!(f, "f"),
            RangeBound::Last => write!(f, "l"),
            RangeBound::Index(n) => write!(f, "{}", n),
        }
    }
}

/// An unresolved `in` qualifier, 1-based and inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InRange {
    pub start: RangeBound,
    pub end: RangeBound,
}

impl InRange {
    fn parse(text: &str) -> Result<InRange, SyntaxError> {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let malformed = || SyntaxError::new(text, "invalid in range");
        let mut parts = compact.splitn(2, '/');
        let first = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
        let start = RangeBound::parse(first).ok_or_else(malformed)?;
        let end = match parts.next() {
            Some(second) => RangeBound::parse(second).ok_or_else(malformed)?,
            None => start,
        };
        Ok(InRange { start, end })
    }

    /// Resolve against the live observation count into a 0-based half-open
    /// row range
    pub fn resolve(&self, nobs: usize) -> Result<std::ops::Range<usize>, String> {
        if nobs == 0 {
            return Ok(0..0);
        }
        let start = self.start.position(nobs);
        let end = self.end.position(nobs);
        if start < 1 || end > nobs as i64 || start > end {
            return Err(format!("Obs. nos. out of range: in {}", self));
        }
        Ok((start - 1) as usize..end as usize)
    }
}

impl fmt::Display for InRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}/{}", self.start, self.end)
        }
    }
}

/// Parsed option list. Names are lower-cased; a repeated name replaces the
/// earlier value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options {
    entries: BTreeMap<String, Option<String>>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an option, returning the value it replaced
    pub fn insert(&mut self, name: &str, value: Option<String>) -> Option<Option<String>> {
        let name = name.to_lowercase();
        let previous = self.entries.insert(name.clone(), value);
        if previous.is_some() {
            tracing::debug!(option = %name, "duplicate option, last one wins");
        }
        previous
    }

    pub fn remove(&mut self, name: &str) -> Option<Option<String>> {
        self.entries.remove(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Raw text inside the parentheses of `name(...)`
    pub fn value(&self, name: &str) -> Option<&str> {
        self.entries.get(name).and_then(|v| v.as_deref())
    }

    /// The value with one layer of surrounding quotes removed
    pub fn text(&self, name: &str) -> Option<String> {
        self.value(name).map(|v| unquote(v).to_string())
    }

    /// The value split into words, quotes removed
    pub fn words(&self, name: &str) -> Vec<String> {
        self.value(name)
            .map(|v| {
                split_top_level(v, |c| c.is_whitespace())
                    .into_iter()
                    .map(|(_, w)| unquote(w).to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// A numeric option value
    pub fn number(&self, name: &str) -> Option<Result<f64, SyntaxError>> {
        self.value(name).map(|v| {
            v.trim()
                .parse::<f64>()
                .map_err(|_| SyntaxError::new(format!("{}({})", name, v), "option expects a number"))
        })
    }

    /// Rename aliases (`gen` for `generate`) to their canonical name
    pub fn canonicalize(&mut self, aliases: &[(&str, &str)]) {
        for (alias, canonical) in aliases {
            if let Some(value) = self.entries.remove(*alias) {
                self.entries.insert((*canonical).to_string(), value);
            }
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            match value {
                Some(v) => write!(f, "{}({})", name, v)?,
                None => write!(f, "{}", name)?,
            }
        }
        Ok(())
    }
}

/// A parsed command line (without prefixes)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Command {
    /// Lower-cased command name, not yet resolved against the verb table
    pub verb: String,
    /// Raw varlist tokens; parenthesised groups and quoted strings are
    /// single tokens
    pub varlist: Vec<String>,
    /// Text after a top-level `=`, as in `generate y = exp`
    pub assignment: Option<String>,
    pub weight: Option<Weight>,
    pub if_expr: Option<Expr>,
    pub in_range: Option<InRange>,
    /// File name of the `using` clause, quotes removed
    pub using: Option<String>,
    pub options: Options,
}

impl Command {
    /// Parse one command line
    pub fn parse(line: &str) -> Result<Command, SyntaxError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(SyntaxError::new(line, "empty command"));
        }
        check_balance(line)?;

        let (body, options_text) = match find_top_level(line, |_, c| c == ',') {
            Some(i) => (line[..i].trim(), Some(&line[i + 1..])),
            None => (line, None),
        };
        let options = match options_text {
            Some(text) => parse_options(text)?,
            None => Options::new(),
        };

        let (body, weight) = extract_weight(body)?;
        let words = split_top_level(&body, char::is_whitespace);
        let (verb_offset, verb) = *words
            .first()
            .ok_or_else(|| SyntaxError::new(line, "missing command name"))?;
        if !is_name(verb) {
            return Err(SyntaxError::new(verb, "invalid command name"));
        }
        let head_start = verb_offset + verb.len();

        // Locate keyword clauses
        let mut keywords: Vec<(&str, usize)> = Vec::new();
        for &(offset, word) in &words[1..] {
            if matches!(word, "using" | "if" | "in") {
                if keywords.iter().any(|(k, _)| *k == word) {
                    return Err(SyntaxError::new(word, "keyword repeated"));
                }
                keywords.push((word, offset));
            }
        }

        let head_end = keywords.first().map(|(_, o)| *o).unwrap_or(body.len());
        let head = &body[head_start..head_end];

        let mut command = Command {
            verb: verb.to_lowercase(),
            weight,
            options,
            ..Command::default()
        };

        let varlist_text = match find_assignment(head) {
            Some(eq) => {
                let exp = head[eq + 1..].trim();
                if exp.is_empty() {
                    return Err(SyntaxError::new(head.trim(), "expression expected after ="));
                }
                command.assignment = Some(exp.to_string());
                &head[..eq]
            }
            None => head,
        };
        command.varlist = split_top_level(varlist_text, char::is_whitespace)
            .into_iter()
            .map(|(_, w)| w.to_string())
            .collect();

        for (i, (keyword, offset)) in keywords.iter().enumerate() {
            let clause_end = keywords.get(i + 1).map(|(_, o)| *o).unwrap_or(body.len());
            let clause = body[offset + keyword.len()..clause_end].trim();
            if clause.is_empty() {
                return Err(SyntaxError::new(*keyword, "nothing follows keyword"));
            }
            match *keyword {
                "if" => {
                    let expr = parse_expr(clause)
                        .map_err(|e| SyntaxError::new(clause, e.to_string()))?;
                    command.if_expr = Some(expr);
                }
                "in" => command.in_range = Some(InRange::parse(clause)?),
                _ => {
                    let parts = split_top_level(clause, char::is_whitespace);
                    if parts.len() != 1 {
                        return Err(SyntaxError::new(clause, "using takes a single file name"));
                    }
                    command.using = Some(unquote(parts[0].1).to_string());
                }
            }
        }

        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.verb)?;
        for token in &self.varlist {
            write!(f, " {}", token)?;
        }
        if let Some(exp) = &self.assignment {
            write!(f, " = {}", exp)?;
        }
        if let Some(path) = &self.using {
            if path.is_empty() || path.contains(|c: char| c.is_whitespace() || c == ',') {
                write!(f, " using \"{}\"", path)?;
            } else {
                write!(f, " using {}", path)?;
            }
        }
        if let Some(expr) = &self.if_expr {
            write!(f, " if {}", expr)?;
        }
        if let Some(range) = &self.in_range {
            write!(f, " in {}", range)?;
        }
        if let Some(weight) = &self.weight {
            write!(f, " [{}={}]", weight.kind.abbrev(), weight.expr)?;
        }
        if !self.options.is_empty() {
            write!(f, ", {}", self.options)?;
        }
        Ok(())
    }
}

/// Command prefixes that modify how the following command runs
#[derive(Debug, Clone, PartialEq)]
pub enum Prefix {
    /// `by vars:` / `bysort vars (within):`
    By { vars: Vec<String>, within: Vec<String>, sort: bool },
    /// `eststo [name]:`
    EstStore { name: Option<String> },
    Quietly,
    Capture,
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prefix::By { vars, within, sort } => {
                write!(f, "{} {}", if *sort { "bysort" } else { "by" }, vars.join(" "))?;
                if !within.is_empty() {
                    write!(f, " ({})", within.join(" "))?;
                }
                write!(f, ":")
            }
            Prefix::EstStore { name: Some(name) } => write!(f, "eststo {}:", name),
            Prefix::EstStore { name: None } => write!(f, "eststo:"),
            Prefix::Quietly => write!(f, "quietly"),
            Prefix::Capture => write!(f, "capture"),
        }
    }
}

/// A full input line: prefixes plus the command they apply to
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub prefixes: Vec<Prefix>,
    pub command: Command,
}

impl Line {
    /// Parse a line, peeling off any prefixes first
    pub fn parse(line: &str) -> Result<Line, SyntaxError> {
        let mut rest = line.trim();
        let mut prefixes = Vec::new();

        loop {
            let word_len = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            let word = rest[..word_len].to_lowercase();
            match word.as_str() {
                "quietly" | "qui" | "quiet" | "capture" | "cap" | "capt" => {
                    prefixes.push(if word.starts_with('q') {
                        Prefix::Quietly
                    } else {
                        Prefix::Capture
                    });
                    rest = rest[word_len..].trim_start();
                    rest = rest.strip_prefix(':').unwrap_or(rest).trim_start();
                }
                "by" | "bys" | "bysort" => {
                    let colon = find_top_level(rest, |_, c| c == ':')
                        .ok_or_else(|| SyntaxError::new(rest, "by requires a colon"))?;
                    prefixes.push(parse_by(&rest[word_len..colon], word != "by")?);
                    rest = rest[colon + 1..].trim_start();
                }
                "eststo" => {
                    let Some(colon) = find_top_level(rest, |_, c| c == ':') else {
                        break;
                    };
                    let between = rest[word_len..colon].trim();
                    let name = match between {
                        "" => None,
                        name if is_name(name) => Some(name.to_string()),
                        _ => break,
                    };
                    prefixes.push(Prefix::EstStore { name });
                    rest = rest[colon + 1..].trim_start();
                }
                _ => break,
            }
        }

        let command = Command::parse(rest)?;
        Ok(Line { prefixes, command })
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for prefix in &self.prefixes {
            write!(f, "{} ", prefix)?;
        }
        write!(f, "{}", self.command)
    }
}

/// Parse a command line with prefixes
pub fn parse_line(line: &str) -> Result<Line, SyntaxError> {
    Line::parse(line)
}

/// Parse a bare command
pub fn parse(line: &str) -> Result<Command, SyntaxError> {
    Command::parse(line)
}

fn parse_by(spec: &str, mut sort: bool) -> Result<Prefix, SyntaxError> {
    let mut spec = spec.trim();
    if let Some(comma) = find_top_level(spec, |_, c| c == ',') {
        let opts = spec[comma + 1..].trim();
        if opts != "sort" {
            return Err(SyntaxError::new(opts, "invalid by option"));
        }
        sort = true;
        spec = spec[..comma].trim();
    }
    let (vars_text, within) = match spec.find('(') {
        Some(open) => {
            let close = spec
                .rfind(')')
                .filter(|&c| c > open && spec[c + 1..].trim().is_empty())
                .ok_or_else(|| SyntaxError::new(spec, "invalid by sort variables"))?;
            let within = spec[open + 1..close].split_whitespace().map(String::from).collect();
            (&spec[..open], within)
        }
        None => (spec, Vec::new()),
    };
    let vars: Vec<String> = vars_text.split_whitespace().map(String::from).collect();
    if vars.is_empty() {
        return Err(SyntaxError::new(spec, "by requires a varlist"));
    }
    Ok(Prefix::By { vars, within, sort })
}

/// Remove a `[weight=exp]` token from the body
fn extract_weight(body: &str) -> Result<(String, Option<Weight>), SyntaxError> {
    let mut weight = None;
    let mut remaining = body.to_string();
    for (offset, word) in split_top_level(body, char::is_whitespace).into_iter().rev() {
        if !word.starts_with('[') {
            continue;
        }
        if weight.is_some() {
            return Err(SyntaxError::new(word, "weights may be specified only once"));
        }
        let inner = word
            .strip_prefix('[')
            .and_then(|w| w.strip_suffix(']'))
            .ok_or_else(|| SyntaxError::new(word, "invalid weight clause"))?;
        let (kind, exp) = inner
            .split_once('=')
            .ok_or_else(|| SyntaxError::new(word, "invalid weight clause"))?;
        let kind = WeightKind::from_name(kind.trim().to_lowercase().as_str())
            .ok_or_else(|| SyntaxError::new(kind.trim(), "unknown weight type"))?;
        let expr = parse_expr(exp).map_err(|e| SyntaxError::new(exp.trim(), e.to_string()))?;
        weight = Some(Weight { kind, expr });
        remaining.replace_range(offset..offset + word.len(), "");
    }
    Ok((remaining, weight))
}

fn parse_options(text: &str) -> Result<Options, SyntaxError> {
    // Merge a detached value `name (value)` onto its name
    let mut items: Vec<String> = Vec::new();
    for (_, item) in split_top_level(text, |c| c.is_whitespace() || c == ',') {
        match items.last_mut() {
            Some(last) if item.starts_with('(') && !last.contains('(') => last.push_str(item),
            _ => items.push(item.to_string()),
        }
    }

    let mut options = Options::new();
    for item in items {
        let (name, value) = match item.find('(') {
            Some(open) => {
                if closing_paren(&item, open) != Some(item.len() - 1) {
                    return Err(SyntaxError::new(item.as_str(), "invalid option"));
                }
                (&item[..open], Some(item[open + 1..item.len() - 1].trim().to_string()))
            }
            None => (item.as_str(), None),
        };
        if !is_name(name) {
            return Err(SyntaxError::new(item.as_str(), "invalid option"));
        }
        options.insert(name, value);
    }
    Ok(options)
}

/// Byte index of the parenthesis that closes the one at `open`
fn closing_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_quote = false;
    for (i, c) in text[open..].char_indices() {
        match c {
            '"' => in_quote = !in_quote,
            '(' | '[' if !in_quote => depth += 1,
            ')' | ']' if !in_quote => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Position of a lone `=` (not part of `==`, `!=`, `<=`, `>=`, `~=`)
fn find_assignment(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    find_top_level(text, |i, c| {
        c == '='
            && !(i > 0 && matches!(bytes[i - 1], b'=' | b'!' | b'<' | b'>' | b'~'))
            && bytes.get(i + 1) != Some(&b'=')
    })
}

/// Verify brackets nest and quotes close
fn check_balance(text: &str) -> Result<(), SyntaxError> {
    let mut stack = Vec::new();
    let mut in_quote = false;
    for c in text.chars() {
        match c {
            '"' => in_quote = !in_quote,
            '(' | '[' if !in_quote => stack.push(c),
            ')' | ']' if !in_quote => {
                let expected = if c == ')' { '(' } else { '[' };
                if stack.pop() != Some(expected) {
                    return Err(SyntaxError::new(text, "unbalanced brackets"));
                }
            }
            _ => {}
        }
    }
    if in_quote {
        return Err(SyntaxError::new(text, "unterminated quote"));
    }
    if !stack.is_empty() {
        return Err(SyntaxError::new(text, "unbalanced brackets"));
    }
    Ok(())
}

/// First character at bracket depth zero outside quotes accepted by `hit`
pub(crate) fn find_top_level(text: &str, mut hit: impl FnMut(usize, char) -> bool) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_quote = false;
    for (i, c) in text.char_indices() {
        match c {
            '"' => in_quote = !in_quote,
            '(' | '[' if !in_quote => depth += 1,
            ')' | ']' if !in_quote => depth = depth.saturating_sub(1),
            _ if !in_quote && depth == 0 && hit(i, c) => return Some(i),
            _ => {}
        }
    }
    None
}

/// Split at separators found at bracket depth zero outside quotes,
/// returning each piece with its byte offset
pub(crate) fn split_top_level(text: &str, is_sep: impl Fn(char) -> bool) -> Vec<(usize, &str)> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut start: Option<usize> = None;

    for (i, c) in text.char_indices() {
        if depth == 0 && !in_quote && is_sep(c) {
            if let Some(s) = start.take() {
                pieces.push((s, &text[s..i]));
            }
            continue;
        }
        if start.is_none() {
            start = Some(i);
        }
        match c {
            '"' => in_quote = !in_quote,
            '(' | '[' if !in_quote => depth += 1,
            ')' | ']' if !in_quote => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    if let Some(s) = start {
        pieces.push((s, &text[s..]));
    }
    pieces
}

/// Strip one layer of double quotes
pub fn unquote(text: &str) -> &str {
    let text = text.trim();
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_name(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinaryOp;

    #[test]
    fn parse_verb_and_varlist() {
        let cmd = parse("summarize price mpg weight").unwrap();
        assert_eq!(cmd.verb, "summarize");
        assert_eq!(cmd.varlist, vec!["price", "mpg", "weight"]);
        assert!(cmd.options.is_empty());
    }

    #[test]
    fn verb_is_lowercased() {
        assert_eq!(parse("REG y x").unwrap().verb, "reg");
    }

    #[test]
    fn parse_generate_with_if() {
        let cmd = parse("gen y = x + 1 if x > 0").unwrap();
        assert_eq!(cmd.varlist, vec!["y"]);
        assert_eq!(cmd.assignment.as_deref(), Some("x + 1"));
        assert!(matches!(cmd.if_expr, Some(Expr::Binary { op: BinaryOp::Gt, .. })));
    }

    #[test]
    fn equality_is_not_assignment() {
        let cmd = parse("count if x == 1").unwrap();
        assert!(cmd.assignment.is_none());
    }

    #[test]
    fn parse_options_with_values() {
        let cmd = parse("esttab m1 m2 using out.rtf, se stats(N r2) title(\"A, B\") replace").unwrap();
        assert_eq!(cmd.using.as_deref(), Some("out.rtf"));
        assert!(cmd.options.has("se"));
        assert!(cmd.options.has("replace"));
        assert_eq!(cmd.options.words("stats"), vec!["N", "r2"]);
        assert_eq!(cmd.options.text("title").as_deref(), Some("A, B"));
    }

    #[test]
    fn duplicate_option_last_wins() {
        let cmd = parse("merge 1:1 id using b, keep(match) keep(master)").unwrap();
        assert_eq!(cmd.options.value("keep"), Some("master"));
        assert_eq!(cmd.options.len(), 1);
    }

    #[test]
    fn option_names_are_case_insensitive() {
        let cmd = parse("reg y x, Robust").unwrap();
        assert!(cmd.options.has("robust"));
    }

    #[test]
    fn option_with_detached_value() {
        let cmd = parse("egen m = mean(x), by (g)").unwrap();
        assert_eq!(cmd.options.value("by"), Some("g"));
    }

    #[test]
    fn parse_in_ranges() {
        let cmd = parse("list in 1/5").unwrap();
        assert_eq!(cmd.in_range.unwrap().resolve(10).unwrap(), 0..5);

        let cmd = parse("list in -2/l").unwrap();
        assert_eq!(cmd.in_range.unwrap().resolve(10).unwrap(), 8..10);

        let cmd = parse("list in 3").unwrap();
        assert_eq!(cmd.in_range.unwrap().resolve(10).unwrap(), 2..3);

        let range = parse("list in 5/20").unwrap().in_range.unwrap();
        assert!(range.resolve(10).is_err());
    }

    #[test]
    fn malformed_in_range() {
        assert!(parse("list in 0/3").is_err());
        assert!(parse("list in a/b").is_err());
    }

    #[test]
    fn parse_weight() {
        let cmd = parse("reg y x if z > 0 [aw=pop], robust").unwrap();
        let weight = cmd.weight.unwrap();
        assert_eq!(weight.kind, WeightKind::Analytic);
        assert_eq!(weight.expr, Expr::Var("pop".into()));
        assert_eq!(cmd.varlist, vec!["y", "x"]);
    }

    #[test]
    fn unknown_weight_type() {
        let err = parse("summarize x [zw=w]").unwrap_err();
        assert_eq!(err.reason, "unknown weight type");
    }

    #[test]
    fn subscript_is_not_a_weight() {
        let cmd = parse("gen lagx = x[_n-1]").unwrap();
        assert!(cmd.weight.is_none());
        assert_eq!(cmd.assignment.as_deref(), Some("x[_n-1]"));
    }

    #[test]
    fn parenthesised_groups_are_single_tokens() {
        let cmd = parse("recode x (1 = 2) (3/5 = 9), generate(y)").unwrap();
        assert_eq!(cmd.varlist, vec!["x", "(1 = 2)", "(3/5 = 9)"]);
        assert!(cmd.assignment.is_none());
        assert_eq!(cmd.options.value("generate"), Some("y"));
    }

    #[test]
    fn quoted_keywords_do_not_split() {
        let cmd = parse("label define yn 1 \"in if using\" 0 \"no\"").unwrap();
        assert_eq!(cmd.varlist.len(), 6);
        assert_eq!(cmd.varlist[3], "\"in if using\"");
        assert!(cmd.if_expr.is_none());
    }

    #[test]
    fn repeated_keyword_is_an_error() {
        let err = parse("list if x > 1 if y > 2").unwrap_err();
        assert_eq!(err.reason, "keyword repeated");
    }

    #[test]
    fn unbalanced_brackets() {
        assert_eq!(parse("gen y = (x + 1").unwrap_err().reason, "unbalanced brackets");
        assert_eq!(parse("di \"abc").unwrap_err().reason, "unterminated quote");
    }

    #[test]
    fn empty_verb() {
        assert!(parse(", replace").is_err());
        assert!(parse("   ").is_err());
    }

    #[test]
    fn unknown_verbs_parse() {
        assert_eq!(parse("frobnicate x").unwrap().verb, "frobnicate");
    }

    #[test]
    fn using_with_quoted_path() {
        let cmd = parse("use \"my data.dta\", clear").unwrap();
        assert_eq!(cmd.using, None);
        assert_eq!(cmd.varlist, vec!["\"my data.dta\""]);

        let cmd = parse("append using \"my data.dta\"").unwrap();
        assert_eq!(cmd.using.as_deref(), Some("my data.dta"));
    }

    #[test]
    fn parse_prefixes() {
        let line = parse_line("bysort firm (year): gen growth = x - x[_n-1]").unwrap();
        assert_eq!(
            line.prefixes,
            vec![Prefix::By {
                vars: vec!["firm".into()],
                within: vec!["year".into()],
                sort: true
            }]
        );
        assert_eq!(line.command.verb, "gen");

        let line = parse_line("eststo m1: quietly regress y x").unwrap();
        assert_eq!(
            line.prefixes,
            vec![Prefix::EstStore { name: Some("m1".into()) }, Prefix::Quietly]
        );

        let line = parse_line("capture drop z").unwrap();
        assert_eq!(line.prefixes, vec![Prefix::Capture]);
    }

    #[test]
    fn colon_in_merge_is_not_a_prefix() {
        let line = parse_line("merge 1:1 id using other").unwrap();
        assert!(line.prefixes.is_empty());
        assert_eq!(line.command.varlist, vec!["1:1", "id"]);
    }

    #[test]
    fn eststo_without_colon_is_a_command() {
        let line = parse_line("eststo clear").unwrap();
        assert!(line.prefixes.is_empty());
        assert_eq!(line.command.verb, "eststo");
    }

    #[test]
    fn by_without_colon_fails() {
        assert!(parse_line("by g egen m = mean(x)").is_err());
    }

    #[test]
    fn reparse_is_idempotent() {
        let lines = [
            "gen y = x + 1 if x > 0 & !missing(z) in 2/-1",
            "reg y x1 x2 [pw=w] if year >= 2000, vce(robust) level(90)",
            "merge 1:m id using \"other file.dta\", keep(match master) nogenerate",
            "collapse (mean) x y (sum) z, by(g)",
            "list in f/l",
            "di \"hello\" + \"world\"",
        ];
        for src in lines {
            let cmd = parse(src).unwrap();
            let again = parse(&cmd.to_string()).unwrap();
            assert_eq!(cmd, again, "round trip of {}", src);
        }
        let line = parse_line("by g, sort: egen m = mean(x)").unwrap();
        assert_eq!(parse_line(&line.to_string()).unwrap(), line);
    }
}
