//! Loading, saving and inspecting the dataset

use super::{expand_varlist, Invocation};
use crate::ast::Value;
use crate::codec::{dataset_path, Codec, CodecError, CsvCodec};
use crate::command::{unquote, Command};
use crate::dataset::{Column, Dataset, Key, VarType, Variable};
use crate::display::{
    apply_format, format_g, format_number, CodebookEntry, DescribeRow, Description, ListTable, Output,
};
use crate::error::CommandError;
use crate::eval::{percentile, Evaluator};
use crate::session::Session;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Percentiles shown by `codebook`
const CODEBOOK_PERCENTILES: [f64; 5] = [10.0, 25.0, 50.0, 75.0, 90.0];

/// Up to this many distinct values, `codebook` tabulates them
const CODEBOOK_TABULATE: usize = 9;

/// Rows of a freshly loaded dataset picked by the command's `if`/`in`
fn filter_loaded(data: &Dataset, cmd: &Command) -> Result<Option<Vec<bool>>, CommandError> {
    if cmd.if_expr.is_none() && cmd.in_range.is_none() {
        return Ok(None);
    }
    let nobs = data.nobs();
    let range = match &cmd.in_range {
        Some(range) => range
            .resolve(nobs)
            .map_err(|reason| CommandError::parse(reason).with_fragment(range.to_string()))?,
        None => 0..nobs,
    };
    let mut mask: Vec<bool> = (0..nobs).map(|r| range.contains(&r)).collect();
    if let Some(cond) = &cmd.if_expr {
        let selected = Evaluator::new(data).select(cond)?;
        for (m, s) in mask.iter_mut().zip(selected) {
            *m = *m && s;
        }
    }
    Ok(Some(mask))
}

/// `delimiters(";")`, `delimiters(tab)` -> byte
fn delimiter_byte(raw: &str) -> Result<u8, CommandError> {
    match unquote(raw) {
        "tab" | "\\t" => Ok(b'\t'),
        "comma" => Ok(b','),
        "semicolon" => Ok(b';'),
        s if s.len() == 1 => Ok(s.as_bytes()[0]),
        s => Err(CommandError::parse(format!("invalid delimiter {}", s)).with_fragment(raw)),
    }
}

/// Copy of `vars` restricted to `rows`
fn subset(data: &Dataset, vars: &[String], rows: &[usize]) -> Result<Dataset, CommandError> {
    let mut out = Vec::with_capacity(vars.len());
    for name in vars {
        let var = data.require(name)?;
        out.push(Variable { data: var.data.select(rows), ..var.clone() });
    }
    let mut subset = Dataset::from_variables(out)?;
    for (name, set) in data.label_sets() {
        subset.insert_label_set(name.clone(), set.clone());
    }
    Ok(subset)
}

impl Session {
    /// Load the dataset named by a `using` clause (`.dta` when no extension)
    pub(super) fn read_using(&self, file: &str) -> Result<Dataset, CommandError> {
        let file = unquote(file);
        if file.is_empty() {
            return Err(CommandError::parse("using required"));
        }
        Ok(self.codecs.read(&dataset_path(file))?)
    }

    fn guard_changes(&self, inv: &Invocation) -> Result<(), CommandError> {
        if self.data.is_changed() && !inv.has("clear") {
            return Err(CommandError::data_changed());
        }
        Ok(())
    }

    /// Replace the live dataset with one just read from `path`
    fn install(&mut self, mut data: Dataset, path: &Path, mask: Option<Vec<bool>>) {
        data.mark_saved();
        if let Some(mask) = mask {
            data.retain_rows(&mask);
        }
        self.data = data;
        self.source = Some(path.display().to_string());
    }

    pub(super) fn cmd_use(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        self.guard_changes(inv)?;
        let (file, vars) = match (&inv.cmd.using, inv.tokens()) {
            (Some(file), vars) => (file.clone(), vars.to_vec()),
            (None, [file]) => (file.clone(), Vec::new()),
            (None, []) => return Err(CommandError::parse("file name required")),
            (None, _) => return Err(CommandError::parse("use varlist requires using")),
        };
        let path = dataset_path(unquote(&file));
        let mut data = self.codecs.read(&path)?;
        let mask = filter_loaded(&data, &inv.cmd)?;
        if !vars.is_empty() {
            let keep = expand_varlist(&data, &vars)?;
            data.keep_variables(&keep)?;
        }
        if inv.has("nolabel") {
            let names: Vec<String> = data.names().map(String::from).collect();
            for name in &names {
                data.attach_label(name, None)?;
            }
            data.drop_label("_all")?;
        }
        self.install(data, &path, mask);
        Ok(Output::None)
    }

    pub(super) fn cmd_save(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let path = match (inv.tokens(), &self.source) {
            ([file], _) => dataset_path(unquote(file)),
            ([], Some(source)) => PathBuf::from(source),
            ([], None) => return Err(CommandError::parse("file name required")),
            _ => return Err(CommandError::parse("save takes one file name")),
        };
        self.codecs.write(&self.data, &path, inv.has("replace"))?;
        self.data.mark_saved();
        self.source = Some(path.display().to_string());
        let msg = format!("file {} saved", path.display());
        Ok(Output::text(msg))
    }

    pub(super) fn cmd_import(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let Some((kind, rest)) = inv.tokens().split_first() else {
            return Err(CommandError::parse("import requires delimited or excel"));
        };
        let file = match (&inv.cmd.using, rest) {
            (Some(file), []) | (None, [file]) => unquote(file).to_string(),
            _ => return Err(CommandError::parse("import requires one file name")),
        };
        self.guard_changes(inv)?;
        let path = PathBuf::from(&file);
        let data = match kind.as_str() {
            "delimited" | "delim" | "delimit" | "delimite" => {
                let mut codec = CsvCodec::default();
                if let Some(d) = inv.options().value("delimiters") {
                    codec.delimiter = delimiter_byte(d)?;
                }
                if let Some(v) = inv.options().value("varnames") {
                    codec.header = v.trim() != "nonames";
                }
                if !path.exists() {
                    return Err(CodecError::NotFound(path).into());
                }
                codec.read(&path)?
            }
            "excel" => self.codecs.read(&path)?,
            other => {
                return Err(CommandError::parse(format!("import {} not supported", other)).with_fragment(other))
            }
        };
        let msg = format!("({} vars, {} obs)", data.nvars(), data.nobs());
        tracing::info!(path = %path.display(), "imported");
        self.install(data, &path, None);
        Ok(Output::text(msg))
    }

    pub(super) fn cmd_export(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let Some((kind, rest)) = inv.tokens().split_first() else {
            return Err(CommandError::parse("export requires delimited or excel"));
        };
        let (file, var_tokens) = match &inv.cmd.using {
            Some(file) => (unquote(file).to_string(), rest.to_vec()),
            None => match rest {
                [file] => (unquote(file).to_string(), Vec::new()),
                _ => return Err(CommandError::parse("using required")),
            },
        };
        let vars = if var_tokens.is_empty() {
            self.data.names().map(String::from).collect()
        } else {
            expand_varlist(&self.data, &var_tokens)?
        };
        let mut out = subset(&self.data, &vars, &inv.rows)?;
        let path = PathBuf::from(&file);

        match kind.as_str() {
            "delimited" | "delim" | "delimit" | "delimite" => {
                if !inv.has("nolabel") {
                    self.labels_as_text(&mut out)?;
                }
                let mut codec = CsvCodec::default();
                if let Some(d) = inv.options().value("delimiter") {
                    codec.delimiter = delimiter_byte(d)?;
                }
                codec.header = !inv.has("novarnames");
                if path.exists() && !inv.has("replace") {
                    return Err(CodecError::Exists(path).into());
                }
                codec.write(&out, &path)?;
            }
            "excel" => self.codecs.write(&out, &path, inv.has("replace"))?,
            other => {
                return Err(CommandError::parse(format!("export {} not supported", other)).with_fragment(other))
            }
        }
        tracing::info!(path = %path.display(), nobs = out.nobs(), "exported");
        Ok(Output::text(format!("file {} saved", path.display())))
    }

    /// Write value-labelled numeric variables as their label text
    fn labels_as_text(&self, data: &mut Dataset) -> Result<(), CommandError> {
        let labelled: Vec<String> = data
            .variables()
            .iter()
            .filter(|v| v.is_numeric() && v.value_label.as_ref().is_some_and(|l| data.label_set(l).is_some()))
            .map(|v| v.name.clone())
            .collect();
        for name in labelled {
            let var = data.require(&name)?;
            let text: Vec<String> = (0..data.nobs())
                .map(|r| match var.data.num(r) {
                    Some(n) => data.labelled(var, n).map_or_else(|| format_number(n), str::to_string),
                    None => String::new(),
                })
                .collect();
            data.replace_column(&name, Column::Str(text))?;
            if let Some(v) = data.variable_mut(&name) {
                v.value_label = None;
            }
        }
        Ok(())
    }

    pub(super) fn cmd_describe(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        if inv.has("simple") {
            return Ok(Output::text(inv.vars.join("  ")));
        }
        let mut vars = Vec::with_capacity(inv.vars.len());
        for name in &inv.vars {
            let var = self.data.require(name)?;
            vars.push(DescribeRow {
                name: var.name.clone(),
                storage: var.storage_type(),
                format: var.format.clone(),
                value_label: var.value_label.clone(),
                label: var.label.clone(),
            });
        }
        Ok(Output::Describe(Description {
            source: self.source.clone(),
            nobs: self.data.nobs(),
            vars,
            sorted_by: self.data.sorted_by().to_vec(),
            changed: self.data.is_changed(),
        }))
    }

    pub(super) fn cmd_codebook(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let mut entries = Vec::with_capacity(inv.vars.len());
        for name in &inv.vars {
            self.check_cancel()?;
            entries.push(self.codebook_entry(name, &inv.rows)?);
        }
        Ok(Output::Codebook(entries))
    }

    fn codebook_entry(&self, name: &str, rows: &[usize]) -> Result<CodebookEntry, CommandError> {
        let var = self.data.require(name)?;
        let mut entry = CodebookEntry {
            name: var.name.clone(),
            label: var.label.clone(),
            storage: var.storage_type(),
            numeric: var.is_numeric(),
            value_label: var.value_label.clone(),
            nobs: rows.len(),
            missing: 0,
            unique: 0,
            range: None,
            mean: None,
            sd: None,
            percentiles: Vec::new(),
            frequencies: Vec::new(),
            examples: Vec::new(),
        };

        let mut counts: BTreeMap<Key, usize> = BTreeMap::new();
        for &row in rows {
            let value = var.data.get(row);
            if value.is_missing() || matches!(&value, Value::Str(s) if s.is_empty()) {
                entry.missing += 1;
            } else {
                *counts.entry(Key::from_value(value)).or_default() += 1;
            }
        }
        entry.unique = counts.len();

        if counts.len() <= CODEBOOK_TABULATE {
            entry.frequencies = counts
                .iter()
                .map(|(key, &n)| match key.to_value() {
                    Value::Num(x) => (n, format_g(x, 9), self.data.labelled(var, x).map(String::from)),
                    other => (n, format!("\"{}\"", other), None),
                })
                .collect();
        }
        match var.var_type() {
            VarType::Numeric => {
                let mut present: Vec<f64> = rows.iter().filter_map(|&r| var.data.num(r)).collect();
                present.sort_by(f64::total_cmp);
                if let (Some(&lo), Some(&hi)) = (present.first(), present.last()) {
                    let n = present.len() as f64;
                    let mean = present.iter().sum::<f64>() / n;
                    entry.range = Some((lo, hi));
                    entry.mean = Some(mean);
                    if present.len() > 1 {
                        let ss: f64 = present.iter().map(|x| (x - mean).powi(2)).sum();
                        entry.sd = Some((ss / (n - 1.0)).sqrt());
                    }
                    entry.percentiles = CODEBOOK_PERCENTILES
                        .iter()
                        .filter_map(|&p| percentile(&present, p).map(|v| (p, v)))
                        .collect();
                }
            }
            VarType::Str => {
                entry.examples = counts.keys().take(4).map(|k| k.to_value().to_string()).collect();
            }
        }
        Ok(entry)
    }

    pub(super) fn cmd_list(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let use_labels = !inv.has("nolabel");
        let mut columns = Vec::with_capacity(inv.vars.len());
        let mut vars = Vec::with_capacity(inv.vars.len());
        for name in &inv.vars {
            let var = self.data.require(name)?;
            columns.push((var.name.clone(), var.is_numeric()));
            vars.push(var);
        }
        let rows = inv
            .rows
            .iter()
            .map(|&row| {
                let cells = vars
                    .iter()
                    .map(|var| {
                        let value = var.data.get(row);
                        if let (true, Value::Num(n)) = (use_labels, &value) {
                            if let Some(text) = self.data.labelled(var, *n) {
                                return text.to_string();
                            }
                        }
                        apply_format(&var.format, &value).trim().to_string()
                    })
                    .collect();
                (row + 1, cells)
            })
            .collect();
        Ok(Output::List(ListTable { columns, rows, show_obs: !inv.has("noobs") }))
    }

    pub(super) fn cmd_count(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        Ok(Output::text(format!("  {}", format_g(inv.rows.len() as f64, 12))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::render;
    use tempfile::TempDir;

    fn session() -> Session {
        let mut s = Session::new();
        let mut data = Dataset::from_variables(vec![
            Variable::numeric("x", vec![Some(1.0), None, Some(3.0)]),
            Variable::string("name", vec!["ann".into(), "bob".into(), "cy".into()]),
            Variable::numeric("grp", vec![Some(1.0), Some(2.0), Some(1.0)]),
        ])
        .unwrap();
        data.define_label("grp", vec![(1, "low".into()), (2, "high".into())], false).unwrap();
        data.attach_label("grp", Some("grp")).unwrap();
        s.set_data(data);
        s
    }

    fn run(s: &mut Session, line: &str) -> String {
        let out = s.execute(line).unwrap_or_else(|e| panic!("{}: {}", line, e.report()));
        render(&out, 80)
    }

    #[test]
    fn save_then_use_round_trips() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("d.dta");
        let mut s = session();
        let before = s.data().clone();
        run(&mut s, &format!("save \"{}\"", file.display()));
        assert!(!s.data().is_changed());
        run(&mut s, "clear");
        run(&mut s, &format!("use \"{}\"", file.display()));
        assert_eq!(s.data().names().collect::<Vec<_>>(), before.names().collect::<Vec<_>>());
        assert_eq!(s.data().require("grp").unwrap().value_label.as_deref(), Some("grp"));
        assert_eq!(s.data().value("x", 2).unwrap(), Value::Num(3.0));
    }

    #[test]
    fn save_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("d.dta");
        let mut s = session();
        run(&mut s, &format!("save \"{}\"", file.display()));
        let err = s.execute(&format!("save \"{}\"", file.display())).unwrap_err();
        assert_eq!(err.code, 602);
        run(&mut s, &format!("save \"{}\", replace", file.display()));
    }

    #[test]
    fn use_protects_changed_data() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("d.dta");
        let mut s = session();
        run(&mut s, &format!("save \"{}\"", file.display()));
        run(&mut s, "gen y = 1");
        let err = s.execute(&format!("use \"{}\"", file.display())).unwrap_err();
        assert_eq!(err.code, 4);
        run(&mut s, &format!("use \"{}\", clear", file.display()));
        assert!(s.data().position("y").is_none());
    }

    #[test]
    fn use_with_a_subset() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("d.dta");
        let mut s = session();
        run(&mut s, &format!("save \"{}\"", file.display()));
        run(&mut s, &format!("use x grp if grp == 1 using \"{}\", clear", file.display()));
        assert_eq!(s.data().nvars(), 2);
        assert_eq!(s.data().nobs(), 2);
    }

    #[test]
    fn export_and_import_delimited() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("d.csv");
        let mut s = session();
        run(&mut s, &format!("export delimited using \"{}\"", file.display()));
        let text = std::fs::read_to_string(&file).unwrap();
        assert!(text.starts_with("x,name,grp"));
        assert!(text.contains("low"));
        run(&mut s, &format!("import delimited \"{}\", clear", file.display()));
        assert_eq!(s.data().nobs(), 3);
        assert!(!s.data().require("grp").unwrap().is_numeric());
    }

    #[test]
    fn list_uses_value_labels() {
        let mut s = session();
        let out = run(&mut s, "list grp in 1/2");
        assert!(out.contains("low") && out.contains("high"), "{}", out);
        let out = run(&mut s, "list grp in 1, nolabel");
        assert!(out.contains(" 1 |"), "{}", out);
    }

    #[test]
    fn count_with_condition() {
        let mut s = session();
        assert_eq!(run(&mut s, "count if !missing(x)"), "  2");
    }

    #[test]
    fn codebook_tabulates_few_values() {
        let s = session();
        let entry = s.codebook_entry("grp", &[0, 1, 2]).unwrap();
        assert_eq!(entry.unique, 2);
        assert_eq!(entry.frequencies[0], (2, "1".to_string(), Some("low".to_string())));
        let entry = s.codebook_entry("x", &[0, 1, 2]).unwrap();
        assert_eq!((entry.missing, entry.mean), (1, Some(2.0)));
    }
}
