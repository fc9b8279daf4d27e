//! eststo, estadd, esttab/estout and estimates

use super::data::full_text;
use super::estimation::confidence_level;
use super::{parse_exp, Invocation};
use crate::ast::Value;
use crate::command::{find_top_level, unquote};
use crate::display::{format_g, EstimatesDir, EstimationView, Output};
use crate::error::{rc, CommandError, ErrorKind};
use crate::eval::Evaluator;
use crate::export::{self, ExportFormat, ResultTable, Secondary, TableOptions};
use crate::results::AuxValue;
use crate::session::Session;
use std::io::Write as _;
use std::path::Path;

/// `head : m1 m2` -> (`head`, [`m1`, `m2`])
fn split_targets(text: &str) -> (&str, Vec<String>) {
    match find_top_level(text, |_, c| c == ':') {
        Some(i) => {
            let targets = text[i + 1..].split_whitespace().map(String::from).collect();
            (text[..i].trim(), targets)
        }
        None => (text.trim(), Vec::new()),
    }
}

impl Session {
    /// `eststo [name] [, title()]`, `eststo clear`, `eststo drop names`.
    /// The `eststo name:` prefix is handled by the session.
    pub(super) fn cmd_eststo(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        match inv.tokens() {
            [sub] if sub == "clear" => {
                self.results.clear();
                Ok(Output::None)
            }
            [sub, names @ ..] if sub == "drop" => {
                let picked: Vec<String> = self.results.select(names)?.into_iter().map(|(n, _)| n).collect();
                for name in picked {
                    self.results.drop(&name)?;
                }
                Ok(Output::None)
            }
            [] | [_] => {
                let name = inv.tokens().first().map(String::as_str);
                let stored = self.results.store(name)?;
                if let Some(title) = inv.options().text("title") {
                    self.results.retitle(&stored, &title)?;
                }
                Ok(match name {
                    Some(_) => Output::None,
                    None => Output::text(format!("({} stored)", stored)),
                })
            }
            tokens => Err(CommandError::parse("eststo takes at most one name").with_fragment(tokens.join(" "))),
        }
    }

    /// `estadd scalar name = exp [: models]`, `estadd local name text [: models]`
    pub(super) fn cmd_estadd(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let text = full_text(inv);
        let (head, targets) = split_targets(&text);
        let (kind, rest) = head.split_once(char::is_whitespace).unwrap_or((head, ""));
        let rest = rest.trim();
        let (name, value_text) = rest
            .split_once(|c: char| c.is_whitespace() || c == '=')
            .map(|(n, v)| (n, v.trim()))
            .unwrap_or((rest, ""));
        if !crate::command::is_name(name) {
            return Err(CommandError::parse(format!("{} invalid name", name)).with_fragment(name));
        }

        let value = match kind {
            "scalar" => {
                let exp = value_text.trim_start_matches('=').trim();
                if exp.is_empty() {
                    return Err(CommandError::new(ErrorKind::Parse, rc::VARLIST_REQUIRED, "=exp required"));
                }
                let expr = parse_exp(exp)?;
                match Evaluator::new(&self.data).scalar(&expr)? {
                    Value::Num(n) => AuxValue::Scalar(n),
                    Value::Missing => AuxValue::Local(".".to_string()),
                    Value::Str(_) => {
                        return Err(CommandError::new(ErrorKind::Resolution, rc::TYPE_MISMATCH, "type mismatch"))
                    }
                }
            }
            "local" => AuxValue::Local(unquote(value_text).to_string()),
            other => {
                return Err(CommandError::parse(format!("estadd: {} not allowed", other)).with_fragment(other));
            }
        };

        if targets.is_empty() {
            self.results.add(name, value.clone())?;
        } else {
            self.results.add_to(&targets, name, value.clone())?;
        }
        tracing::debug!(name, kind, ?targets, "estadd");
        let shown = match &value {
            AuxValue::Scalar(x) => format_g(*x, 10),
            AuxValue::Local(s) => s.clone(),
        };
        Ok(Output::text(format!("added {}:\n{:>14} = {}", kind, format!("e({})", name), shown)))
    }

    pub(super) fn cmd_esttab(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let opts = TableOptions::from_options(inv.options(), true);
        self.result_table(inv, &opts)
    }

    /// Like esttab, but headed by the stored names and showing bare
    /// coefficients unless asked for more
    pub(super) fn cmd_estout(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        self.result_table(inv, &plain_table_options(inv))
    }

    fn result_table(&self, inv: &Invocation, opts: &TableOptions) -> Result<Output, CommandError> {
        let models = self.results.select(inv.tokens())?;
        let table = ResultTable::build(&models, opts);
        let Some(file) = &inv.cmd.using else {
            return Ok(Output::ResultTable(table));
        };
        let path = Path::new(file);
        let format = ExportFormat::from_path(path)?;
        if inv.has("append") {
            let text = export::render(&table, format)?;
            let mut f = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(f, "{}", text)?;
        } else {
            if path.exists() && !inv.has("replace") {
                return Err(CommandError::new(ErrorKind::Io, rc::FILE_EXISTS, format!("file {} already exists", file))
                    .with_fragment(file.clone()));
            }
            export::write_table(&table, path)?;
        }
        Ok(Output::text(format!("(output written to {})", file)))
    }

    /// `estimates store|restore|dir|drop|clear|replay|table`
    pub(super) fn cmd_estimates(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let Some((sub, args)) = inv.tokens().split_first() else {
            return Err(CommandError::parse("estimates subcommand required"));
        };
        let sub = sub.to_lowercase();
        let is = |full: &str, min: usize| sub.len() >= min && full.starts_with(sub.as_str());
        if is("store", 3) {
            let [name] = args else {
                return Err(CommandError::parse("estimates store requires a name"));
            };
            self.results.store(Some(name))?;
            Ok(Output::None)
        } else if is("restore", 3) {
            let [name] = args else {
                return Err(CommandError::parse("estimates restore requires a name"));
            };
            self.results.restore(name)?;
            Ok(Output::text(format!("(results {} are active now)", name)))
        } else if is("dir", 3) {
            let names: Vec<String> = if args.is_empty() {
                self.results.names().map(String::from).collect()
            } else {
                self.results.select(args)?.into_iter().map(|(n, _)| n).collect()
            };
            let rows = names
                .iter()
                .filter_map(|n| self.results.get(n).map(|r| (n, r)))
                .map(|(n, r)| (n.clone(), r.command.clone(), r.depvar.clone(), r.coefficients.len(), r.nobs))
                .collect();
            Ok(Output::Estimates(EstimatesDir { rows }))
        } else if is("drop", 4) {
            if args.is_empty() {
                return Err(CommandError::parse("estimates drop requires names"));
            }
            if args.iter().any(|a| a == "_all") {
                self.results.clear();
                return Ok(Output::None);
            }
            let picked: Vec<String> = self.results.select(args)?.into_iter().map(|(n, _)| n).collect();
            for name in picked {
                self.results.drop(&name)?;
            }
            Ok(Output::None)
        } else if is("clear", 5) {
            self.results.clear();
            Ok(Output::None)
        } else if is("replay", 3) {
            let level = confidence_level(inv)?;
            let models: Vec<(String, _)> = match args {
                [] => vec![(".".to_string(), self.results.last().ok_or(crate::results::ResultError::NoEstimates)?)],
                names => self.results.select(names)?,
            };
            let mut out = Output::None;
            for (name, result) in models {
                let eform = (result.command == "logistic").then(|| "Odds ratio".to_string());
                let view = EstimationView { result: result.clone(), level, eform, iterations: Vec::new() };
                if name != "." {
                    out = out.then(Output::text(format!("Model {}", name)));
                }
                out = out.then(Output::Estimation(view));
            }
            Ok(out)
        } else if is("table", 3) {
            let mut opts = plain_table_options(inv);
            opts.numbered = false;
            let models = self.results.select(args)?;
            Ok(Output::ResultTable(ResultTable::build(&models, &opts)))
        } else {
            Err(CommandError::parse(format!("invalid subcommand {}", sub)).with_fragment(sub.clone()))
        }
    }
}

/// Table options for estout and `estimates table`: no secondary row and no
/// stars unless the options ask for them
fn plain_table_options(inv: &Invocation) -> TableOptions {
    let options = inv.options();
    let mut opts = TableOptions::from_options(options, false);
    if !["se", "t", "p", "ci"].iter().any(|o| options.has(o)) {
        opts.secondary = Secondary::Nothing;
    }
    if !options.has("star") {
        opts.stars = false;
    }
    opts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Dataset, Variable};
    use crate::display::render;
    use tempfile::TempDir;

    fn session() -> Session {
        let mut s = Session::new();
        let x: Vec<Option<f64>> = (1..=8).map(|i| Some(i as f64)).collect();
        let y: Vec<Option<f64>> = [2.1, 3.9, 6.2, 7.8, 10.1, 12.2, 13.8, 16.1].iter().map(|v| Some(*v)).collect();
        s.set_data(Dataset::from_variables(vec![Variable::numeric("x", x), Variable::numeric("y", y)]).unwrap());
        s
    }

    fn table(out: Output) -> ResultTable {
        match out {
            Output::ResultTable(t) => t,
            other => panic!("expected a result table, got {:?}", other),
        }
    }

    #[test]
    fn targets_follow_the_colon() {
        assert_eq!(split_targets("local a 1 : m1 m2"), ("local a 1", vec!["m1".to_string(), "m2".to_string()]));
        assert_eq!(split_targets("local a \"x:y\""), ("local a \"x:y\"", vec![]));
    }

    #[test]
    fn eststo_names_default_results() {
        let mut s = session();
        s.execute("quietly regress y x").unwrap();
        let out = s.execute("eststo").unwrap();
        assert_eq!(render(&out, 80), "(est1 stored)");
        s.execute("eststo second, title(Baseline)").unwrap();
        assert_eq!(s.results().get("second").unwrap().title, "Baseline");
        s.execute("eststo clear").unwrap();
        assert!(s.results().is_empty());
        assert!(s.results().last().is_some());
    }

    #[test]
    fn eststo_without_estimates_fails() {
        let mut s = session();
        assert_eq!(s.execute("eststo m1").unwrap_err().code, 301);
    }

    #[test]
    fn estadd_local_shows_in_esttab_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.rtf");
        let mut s = session();
        s.execute("eststo m1: regress y x").unwrap();
        s.execute("estadd local N2 99").unwrap();
        let out = s.execute(&format!("esttab using \"{}\"", path.display())).unwrap();
        assert!(render(&out, 80).starts_with("(output written to"));
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("N2"), "{}", text);
        assert!(text.contains("99"), "{}", text);

        // a second write needs replace
        let err = s.execute(&format!("esttab using \"{}\"", path.display())).unwrap_err();
        assert_eq!(err.code, 602);
        s.execute(&format!("esttab using \"{}\", replace", path.display())).unwrap();
    }

    #[test]
    fn estadd_scalar_to_named_models() {
        let mut s = session();
        s.execute("eststo m1: regress y x").unwrap();
        s.execute("eststo m2: regress y x if x > 2").unwrap();
        s.execute("estadd scalar half = 1/2 : m1").unwrap();
        assert_eq!(s.results().get("m1").unwrap().lookup("half"), Some(AuxValue::Scalar(0.5)));
        assert_eq!(s.results().get("m2").unwrap().lookup("half"), None);
        assert_eq!(s.execute("estadd scalar z = 1 : nope").unwrap_err().code, 111);
        assert_eq!(s.execute("estadd matrix z = 1").unwrap_err().code, 198);
    }

    #[test]
    fn estadd_scalar_ignores_the_data() {
        let mut s = session();
        s.execute("eststo m1: regress y x").unwrap();
        s.execute("estadd scalar k = 2*3").unwrap();
        assert_eq!(s.results().get("m1").unwrap().lookup("k"), Some(AuxValue::Scalar(6.0)));
        s.execute("estadd scalar n = _N").unwrap();
        assert_eq!(s.results().get("m1").unwrap().lookup("n"), Some(AuxValue::Scalar(8.0)));

        assert_eq!(s.execute("estadd scalar bad = x + 1").unwrap_err().code, 198);
        assert_eq!(s.execute("estadd scalar bad = nosuch").unwrap_err().code, 111);
        assert_eq!(s.results().get("m1").unwrap().lookup("bad"), None);
    }

    #[test]
    fn esttab_on_screen() {
        let mut s = session();
        s.execute("eststo m1: regress y x").unwrap();
        s.execute("eststo m2: regress y x if x > 2").unwrap();
        let t = table(s.execute("esttab, se").unwrap());
        assert_eq!(t.headers[0], vec!["(1)", "(2)"]);
        assert_eq!(t.headers[1], vec!["y", "y"]);
        let n = t.rows.iter().find(|r| r.label == "N").unwrap();
        assert_eq!(n.cells, vec![Some("8".to_string()), Some("6".to_string())]);
        assert!(t.notes[0].starts_with("Standard errors"));
    }

    #[test]
    fn estout_is_plain_by_default() {
        let mut s = session();
        s.execute("eststo m1: regress y x").unwrap();
        let t = table(s.execute("estout").unwrap());
        assert_eq!(t.headers, vec![vec!["m1".to_string()]]);
        assert!(t.notes.is_empty());
        assert!(!t.rows.iter().any(|r| r.cells.iter().flatten().any(|c| c.contains('*'))));
    }

    #[test]
    fn estimates_store_restore_dir() {
        let mut s = session();
        s.execute("quietly regress y x").unwrap();
        s.execute("estimates store full").unwrap();
        s.execute("quietly regress y x if x < 5").unwrap();
        assert_eq!(s.results().last().unwrap().nobs, 4);
        s.execute("estimates restore full").unwrap();
        assert_eq!(s.results().last().unwrap().nobs, 8);

        match s.execute("estimates dir").unwrap() {
            Output::Estimates(dir) => {
                assert_eq!(dir.rows, vec![("full".into(), "regress".into(), "y".into(), 2, 8)]);
            }
            other => panic!("{:?}", other),
        }
        s.execute("estimates drop full").unwrap();
        assert_eq!(s.execute("estimates restore full").unwrap_err().code, 111);
        assert_eq!(s.execute("estimates frobnicate").unwrap_err().code, 198);
    }

    #[test]
    fn estimates_replay_uses_level() {
        let mut s = session();
        s.execute("quietly regress y x").unwrap();
        match s.execute("estimates replay, level(90)").unwrap() {
            Output::Estimation(view) => assert_eq!(view.level, 90.0),
            other => panic!("{:?}", other),
        }
    }
}
