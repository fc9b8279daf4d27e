//! Data management commands

use super::{
    expand_varlist, first_word, new_name, numeric_column, parse_exp, resolve_name, sorted_levels, Invocation,
};
use crate::ast::{Expr, Value};
use crate::command::{split_top_level, unquote};
use crate::dataset::{
    Column, Dataset, Key, MergeKind, MergeOptions, MergeOutcome, PanelSpec, ReshapeDirection, ReshapeSpec,
    VarType, Variable,
};
use crate::display::{apply_format, format_g, Output};
use crate::error::{rc, CommandError, ErrorKind};
use crate::eval::{Evaluator, Grouping, RecodeRule, Stat};
use crate::session::Session;
use std::collections::HashSet;

/// `3 observations` / `1 observation`
pub(super) fn plural(n: usize, word: &str) -> String {
    format!("{} {}{}", n, word, if n == 1 { "" } else { "s" })
}

/// Storage type keyword of `generate`; every numeric type is held as double
fn declared_type(token: &str) -> Result<VarType, CommandError> {
    match token {
        "byte" | "int" | "long" | "float" | "double" => Ok(VarType::Numeric),
        t if t == "strL" || t.strip_prefix("str").is_some_and(|n| n.parse::<usize>().is_ok()) => Ok(VarType::Str),
        t => Err(CommandError::parse(format!("{} invalid type", t)).with_fragment(t)),
    }
}

fn type_mismatch() -> CommandError {
    CommandError::new(ErrorKind::Resolution, rc::TYPE_MISMATCH, "type mismatch")
}

fn evaluator<'a>(data: &'a Dataset, groups: Option<&'a Grouping>) -> Evaluator<'a> {
    match groups {
        Some(g) => Evaluator::new(data).with_groups(g),
        None => Evaluator::new(data),
    }
}

/// True if evaluating at one row reads `name` at another (`x[_n-1]`,
/// `L.x`), so `replace` has to run observation by observation
fn reads_across_rows(expr: &Expr, name: &str) -> bool {
    match expr {
        Expr::Subscript { name: n, index } => n == name || reads_across_rows(index, name),
        Expr::TimeSeries { name: n, .. } => n == name,
        Expr::Unary { operand, .. } => reads_across_rows(operand, name),
        Expr::Binary { lhs, rhs, .. } => reads_across_rows(lhs, name) || reads_across_rows(rhs, name),
        Expr::Call { args, .. } => args.iter().any(|a| reads_across_rows(a, name)),
        _ => false,
    }
}

/// Remove blanks around `=` so `m = x` reads as one token
fn tighten_equals(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '=' {
            while out.ends_with(' ') {
                out.pop();
            }
            out.push('=');
            while chars.peek() == Some(&' ') {
                chars.next();
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Varlist tokens and the `= exp` tail glued back together
pub(super) fn full_text(inv: &Invocation) -> String {
    let mut text = inv.tokens().join(" ");
    if let Some(exp) = &inv.cmd.assignment {
        text.push_str(" = ");
        text.push_str(exp);
    }
    text
}

/// `fcn(args)` -> (`fcn`, `args`)
fn split_call(text: &str) -> Option<(&str, &str)> {
    let text = text.trim();
    let open = text.find('(')?;
    let inner = text[open + 1..].strip_suffix(')')?;
    Some((text[..open].trim(), inner.trim()))
}

impl Session {
    pub(super) fn cmd_generate(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let (declared, name) = match inv.tokens() {
            [name] => (None, name),
            [ty, name] => (Some(declared_type(ty)?), name),
            _ => return Err(CommandError::parse("generate requires [type] newvar = exp")),
        };
        let name = new_name(&self.data, name)?;
        let text = inv.cmd.assignment.as_deref().unwrap_or_default();
        let expr = parse_exp(text)?;

        let eval = evaluator(&self.data, inv.groups.as_ref());
        let inferred = eval.infer(&expr)?;
        if declared.is_some_and(|d| d != inferred) {
            return Err(type_mismatch());
        }
        let mut column = Column::missing(inferred, self.data.nobs());
        for &row in &inv.rows {
            column.set(row, eval.value_at(&expr, row)?)?;
        }
        let missing = match &column {
            Column::Numeric(values) => values.iter().filter(|v| v.is_none()).count(),
            Column::Str(_) => 0,
        };

        self.data.add_variable(Variable::new(name.clone(), column))?;
        if let Some(before) = inv.options().text("before") {
            let before = resolve_name(&self.data, &before)?;
            self.data.move_before(&name, &before)?;
        } else if let Some(after) = inv.options().text("after") {
            let after = resolve_name(&self.data, &after)?;
            self.data.move_after(&name, &after)?;
        }
        if missing > 0 {
            return Ok(Output::text(format!("({} generated)", plural(missing, "missing value"))));
        }
        Ok(Output::None)
    }

    pub(super) fn cmd_replace(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let name = inv.vars[0].clone();
        let text = inv.cmd.assignment.as_deref().unwrap_or_default();
        let expr = parse_exp(text)?;
        let var_type = self.data.require(&name)?.var_type();
        if evaluator(&self.data, inv.groups.as_ref()).infer(&expr)? != var_type {
            return Err(type_mismatch());
        }

        let old = self.data.column(&name)?.clone();
        let mut changes = 0;
        let mut to_missing = 0;
        let mut tally = |before: &Value, after: &Value| {
            if before != after {
                changes += 1;
                if after.is_missing() && !before.is_missing() {
                    to_missing += 1;
                }
            }
        };

        if reads_across_rows(&expr, &name) {
            // later observations see the values already replaced
            for &row in &inv.rows {
                let value = evaluator(&self.data, inv.groups.as_ref()).value_at(&expr, row)?;
                tally(&old.get(row), &value);
                self.data.set_value(&name, row, value)?;
            }
        } else {
            let eval = evaluator(&self.data, inv.groups.as_ref());
            let mut column = old.clone();
            for &row in &inv.rows {
                let value = eval.value_at(&expr, row)?;
                tally(&old.get(row), &value);
                column.set(row, value)?;
            }
            self.data.replace_column(&name, column)?;
        }
        tracing::debug!(var = %name, changes, "replaced values");

        let mut msg = format!("({} made", plural(changes, "real change"));
        if to_missing > 0 {
            msg.push_str(&format!(", {} to missing", to_missing));
        }
        msg.push(')');
        Ok(Output::text(msg))
    }

    pub(super) fn cmd_drop(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        self.drop_or_keep(inv, false)
    }

    pub(super) fn cmd_keep(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        self.drop_or_keep(inv, true)
    }

    fn drop_or_keep(&mut self, inv: &Invocation, keep: bool) -> Result<Output, CommandError> {
        let tokens = inv.tokens();
        match (tokens.is_empty(), inv.is_filtered()) {
            (true, false) => Err(CommandError::new(ErrorKind::Parse, rc::VARLIST_REQUIRED, "varlist required")),
            (false, true) => Err(CommandError::new(
                ErrorKind::Parse,
                rc::NOT_ALLOWED,
                "may not combine a varlist with if or in",
            )),
            (false, false) => {
                let vars = expand_varlist(&self.data, tokens)?;
                if keep {
                    self.data.keep_variables(&vars)?;
                } else {
                    self.data.drop_variables(&vars)?;
                }
                Ok(Output::None)
            }
            (true, true) => {
                let nobs = self.data.nobs();
                let selected = inv.mask(nobs);
                let mask: Vec<bool> = selected.iter().map(|&s| s == keep).collect();
                let deleted = mask.iter().filter(|&&m| !m).count();
                self.data.retain_rows(&mask);
                Ok(Output::text(format!("({} deleted)", plural(deleted, "observation"))))
            }
        }
    }

    pub(super) fn cmd_rename(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let (olds, news): (Vec<String>, Vec<String>) = match inv.tokens() {
            [old, new] if old.starts_with('(') && new.starts_with('(') => {
                let inner = |t: &str| -> Vec<String> {
                    t.trim_start_matches('(').trim_end_matches(')').split_whitespace().map(String::from).collect()
                };
                (expand_varlist(&self.data, &inner(old))?, inner(new))
            }
            [old, new] => (vec![resolve_name(&self.data, old)?], vec![new.clone()]),
            _ => return Err(CommandError::parse("rename requires old and new names")),
        };
        if olds.len() != news.len() {
            return Err(CommandError::parse("rename: old and new name lists differ in length"));
        }
        let unique: HashSet<&String> = news.iter().collect();
        if unique.len() != news.len() {
            return Err(CommandError::parse("rename: new names must be distinct"));
        }
        if let [old] = olds.as_slice() {
            self.data.rename(old, &news[0])?;
            return Ok(Output::None);
        }
        // two passes so `rename (a b) (b a)` swaps
        let temps: Vec<String> = (0..olds.len()).map(|i| format!("__rename{}", i)).collect();
        for (old, temp) in olds.iter().zip(&temps) {
            self.data.rename(old, temp)?;
        }
        for (temp, new) in temps.iter().zip(&news) {
            self.data.rename(temp, new)?;
        }
        Ok(Output::None)
    }

    pub(super) fn cmd_clonevar(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let [name] = inv.tokens() else {
            return Err(CommandError::parse("clonevar requires newvar = varname"));
        };
        let name = new_name(&self.data, name)?;
        let source = resolve_name(&self.data, inv.cmd.assignment.as_deref().unwrap_or_default().trim())?;
        let original = self.data.require(&source)?;
        let mut data = Column::missing(original.var_type(), self.data.nobs());
        for &row in &inv.rows {
            data.set(row, original.data.get(row))?;
        }
        let clone = Variable {
            name,
            label: original.label.clone(),
            value_label: original.value_label.clone(),
            format: original.format.clone(),
            data,
        };
        self.data.add_variable(clone)?;
        Ok(Output::None)
    }

    pub(super) fn cmd_recode(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let split = inv.tokens().iter().position(|t| t.starts_with('(')).unwrap_or(inv.tokens().len());
        let (var_tokens, rule_tokens) = inv.tokens().split_at(split);
        if var_tokens.is_empty() {
            return Err(CommandError::new(ErrorKind::Parse, rc::VARLIST_REQUIRED, "varlist required"));
        }
        let vars = expand_varlist(&self.data, var_tokens)?;
        let rules = RecodeRule::parse_all(rule_tokens)?;
        let targets: Option<Vec<String>> = inv.options().value("generate").map(|v| {
            v.split_whitespace().map(String::from).collect()
        });
        if let Some(targets) = &targets {
            if targets.len() != vars.len() {
                return Err(CommandError::parse("generate() must name one new variable per recoded variable"));
            }
            for t in targets {
                new_name(&self.data, t)?;
            }
        }

        let nobs = self.data.nobs();
        let mut lines = Vec::new();
        for (i, var) in vars.iter().enumerate() {
            let current = numeric_column(&self.data, var, &(0..nobs).collect::<Vec<_>>())?;
            let selected: Vec<Option<f64>> = inv.rows.iter().map(|&r| current[r]).collect();
            let (recoded, changed) = RecodeRule::apply_all(&rules, &selected);
            match &targets {
                Some(targets) => {
                    let mut values = vec![None; nobs];
                    for (&row, value) in inv.rows.iter().zip(recoded) {
                        values[row] = value;
                    }
                    let mut new = Variable::numeric(targets[i].clone(), values);
                    new.label = Some(format!("RECODE of {}", var));
                    self.data.add_variable(new)?;
                    self.data.move_after(&targets[i], var)?;
                    lines.push(format!("({}: {} made)", targets[i], plural(changed, "difference")));
                }
                None => {
                    let mut values = current;
                    for (&row, value) in inv.rows.iter().zip(recoded) {
                        values[row] = value;
                    }
                    self.data.replace_column(var, Column::Numeric(values))?;
                    lines.push(format!("({}: {} made)", var, plural(changed, "change")));
                }
            }
        }
        Ok(Output::text(lines.join("\n")))
    }

    pub(super) fn cmd_sort(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        self.data.sort_by(&inv.vars)?;
        Ok(Output::None)
    }

    pub(super) fn cmd_label(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let Some((sub, args)) = inv.tokens().split_first() else {
            return Err(CommandError::parse("label requires a subcommand"));
        };
        let sub = sub.to_lowercase();
        let is = |full: &str, min: usize| sub.len() >= min && full.starts_with(sub.as_str());
        if is("define", 3) {
            self.label_define(inv, args)
        } else if is("values", 3) {
            self.label_values(args)
        } else if is("variable", 3) {
            let [var, text] = args else {
                return Err(CommandError::parse("label variable requires varname \"label\""));
            };
            let var = resolve_name(&self.data, var)?;
            let text = unquote(text).to_string();
            if let Some(v) = self.data.variable_mut(&var) {
                v.label = (!text.is_empty()).then_some(text);
            }
            Ok(Output::None)
        } else if is("drop", 4) {
            if args.is_empty() {
                return Err(CommandError::parse("label drop requires a label name or _all"));
            }
            for name in args {
                self.data.drop_label(name)?;
            }
            Ok(Output::None)
        } else if is("list", 1) {
            self.label_list(args)
        } else {
            Err(CommandError::parse(format!("label {} is not a valid subcommand", sub)).with_fragment(sub))
        }
    }

    fn label_define(&mut self, inv: &Invocation, args: &[String]) -> Result<Output, CommandError> {
        let Some((name, pairs)) = args.split_first() else {
            return Err(CommandError::parse("label define requires a label name"));
        };
        if pairs.len() % 2 != 0 {
            return Err(CommandError::parse("label define requires # \"text\" pairs"));
        }
        let mut entries = Vec::with_capacity(pairs.len() / 2);
        for pair in pairs.chunks(2) {
            let code: i64 = pair[0]
                .parse()
                .map_err(|_| CommandError::parse(format!("{} is not an integer", pair[0])).with_fragment(pair[0].clone()))?;
            entries.push((code, unquote(&pair[1]).to_string()));
        }
        if inv.has("add") {
            if let Some(existing) = self.data.label_set(name) {
                if let Some((code, _)) = entries.iter().find(|(c, _)| existing.get(*c).is_some()) {
                    return Err(CommandError::new(
                        ErrorKind::State,
                        rc::STATE,
                        format!("{} already labeled in {}; use modify", code, name),
                    ));
                }
            }
        }
        if inv.has("replace") && self.data.label_set(name).is_some() {
            self.data.drop_label(name)?;
        }
        let modify = inv.has("modify") || inv.has("add");
        self.data.define_label(name, entries, modify)?;
        Ok(Output::None)
    }

    fn label_values(&mut self, args: &[String]) -> Result<Output, CommandError> {
        if args.is_empty() {
            return Err(CommandError::new(ErrorKind::Parse, rc::VARLIST_REQUIRED, "varlist required"));
        }
        // the last token names the set unless it is a variable
        let (var_tokens, set) = match args.split_last() {
            Some((last, rest)) if !rest.is_empty() && (last == "." || self.data.position(last).is_none()) => {
                (rest, (last != ".").then_some(last.as_str()))
            }
            _ => (args, None),
        };
        if let Some(set) = set {
            if self.data.label_set(set).is_none() {
                tracing::debug!(label = set, "attaching a label set that is not defined yet");
            }
        }
        let vars = expand_varlist(&self.data, var_tokens)?;
        for var in &vars {
            self.data.attach_label(var, set)?;
        }
        Ok(Output::None)
    }

    fn label_list(&self, names: &[String]) -> Result<Output, CommandError> {
        let names: Vec<String> = if names.is_empty() {
            self.data.label_sets().keys().cloned().collect()
        } else {
            names.to_vec()
        };
        let mut blocks = Vec::new();
        for name in names {
            let set = self
                .data
                .label_set(&name)
                .ok_or_else(|| CommandError::resolution(format!("value label {} not found", name)).with_fragment(name.clone()))?;
            let mut lines = vec![format!("{}:", name)];
            lines.extend(set.iter().map(|(code, text)| format!("{:>12} {}", code, text)));
            blocks.push(lines.join("\n"));
        }
        Ok(Output::text(blocks.join("\n")))
    }

    pub(super) fn cmd_append(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let using = self.read_using(inv.cmd.using.as_deref().unwrap_or_default())?;
        let indicator = inv
            .options()
            .text("generate")
            .map(|g| new_name(&self.data, &g))
            .transpose()?;
        let before = self.data.nobs();
        self.data.append(&using, inv.has("force"))?;
        if let Some(name) = indicator {
            let after = self.data.nobs();
            let flags = (0..after).map(|r| Some(if r < before { 0.0 } else { 1.0 })).collect();
            self.data.add_variable(Variable::numeric(name, flags))?;
        }
        Ok(Output::None)
    }

    pub(super) fn cmd_merge(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let Some((kind, keys)) = inv.tokens().split_first() else {
            return Err(CommandError::parse("merge requires 1:1, 1:m, m:1 or m:m and key variables"));
        };
        let kind = MergeKind::parse(kind).ok_or_else(|| {
            CommandError::parse(format!("{}: merge kind must be 1:1, 1:m, m:1 or m:m", kind)).with_fragment(kind.clone())
        })?;
        if keys.is_empty() {
            return Err(CommandError::new(ErrorKind::Parse, rc::VARLIST_REQUIRED, "key variables required"));
        }
        let keys = expand_varlist(&self.data, keys)?;
        let mut using = self.read_using(inv.cmd.using.as_deref().unwrap_or_default())?;
        if inv.has("keepusing") {
            let mut keep = keys.clone();
            for var in expand_varlist(&using, &inv.options().words("keepusing"))? {
                if !keep.contains(&var) {
                    keep.push(var);
                }
            }
            using.keep_variables(&keep)?;
        }

        let mut opts = MergeOptions::new(kind, keys);
        if inv.has("nogenerate") {
            opts.generate = None;
        } else if let Some(name) = inv.options().text("generate") {
            opts.generate = Some(name);
        }
        if let Some(name) = &opts.generate {
            if self.data.position(name).is_some() {
                return Err(CommandError::new(
                    ErrorKind::State,
                    rc::ALREADY_DEFINED,
                    format!("variable {} already defined", name),
                )
                .with_fragment(name.clone()));
            }
        }
        if inv.has("keep") {
            let outcomes = inv
                .options()
                .words("keep")
                .iter()
                .map(|w| {
                    MergeOutcome::parse(w)
                        .ok_or_else(|| CommandError::parse(format!("keep({}) invalid", w)).with_fragment(w.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            opts.keep = Some(outcomes);
        }
        let report = self.data.merge(&using, &opts)?;
        Ok(Output::Merge(report))
    }

    pub(super) fn cmd_cross(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let using = self.read_using(inv.cmd.using.as_deref().unwrap_or_default())?;
        self.data.cross(&using)?;
        Ok(Output::None)
    }

    pub(super) fn cmd_joinby(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let using = self.read_using(inv.cmd.using.as_deref().unwrap_or_default())?;
        self.data.joinby(&inv.vars, &using)?;
        Ok(Output::None)
    }

    pub(super) fn cmd_collapse(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let text = tighten_equals(&full_text(inv));
        let mut stat = Stat::Mean;
        let mut targets: Vec<(String, String, Stat)> = Vec::new();
        for (_, token) in split_top_level(&text, char::is_whitespace) {
            if let Some(inner) = token.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
                stat = Stat::parse(inner.trim())
                    .ok_or_else(|| CommandError::parse(format!("{} is not a collapse statistic", inner)).with_fragment(inner))?;
            } else if let Some((new, old)) = token.split_once('=') {
                targets.push((new.to_string(), resolve_name(&self.data, old)?, stat));
            } else {
                for var in expand_varlist(&self.data, &[token.to_string()])? {
                    targets.push((var.clone(), var, stat));
                }
            }
        }
        if targets.is_empty() {
            return Err(CommandError::new(ErrorKind::Parse, rc::VARLIST_REQUIRED, "varlist required"));
        }
        let by = expand_varlist(&self.data, &inv.options().words("by"))?;
        let mut seen: HashSet<&str> = by.iter().map(String::as_str).collect();
        for (new, _, _) in &targets {
            crate::dataset::validate_name(new)?;
            if !seen.insert(new.as_str()) {
                return Err(CommandError::new(ErrorKind::State, rc::ALREADY_DEFINED, format!("{} defined more than once", new))
                    .with_fragment(new.clone()));
            }
        }
        if inv.rows.is_empty() {
            return Err(CommandError::new(ErrorKind::Backend, rc::NO_OBSERVATIONS, "no observations"));
        }

        let mut groups = Grouping::by(&self.data, &by, &inv.rows)?;
        groups.sort_by_key();
        let mut out = Dataset::new();
        for (b, name) in by.iter().enumerate() {
            let source = self.data.require(name)?;
            let values = groups.iter().map(|(key, _)| key[b].to_value()).collect();
            let mut var = source.clone();
            var.data = Column::from_values(source.var_type(), values)?;
            out.add_variable(var)?;
        }
        for (new, old, stat) in &targets {
            self.check_cancel()?;
            let source = self.data.require(old)?;
            let column = numeric_column(&self.data, old, &(0..self.data.nobs()).collect::<Vec<_>>())?;
            let values = groups
                .iter()
                .map(|(_, rows)| stat.apply(&rows.iter().map(|&r| column[r]).collect::<Vec<_>>()))
                .collect();
            let mut var = Variable::numeric(new.clone(), values);
            var.label = Some(match &source.label {
                Some(label) if new == old => label.clone(),
                _ => format!("({}) {}", stat.name(), old),
            });
            if matches!(stat, Stat::Count) {
                var.value_label = None;
            } else if new == old {
                var.value_label = source.value_label.clone();
            }
            out.add_variable(var)?;
        }
        for (name, set) in self.data.label_sets() {
            out.insert_label_set(name.clone(), set.clone());
        }
        if !by.is_empty() {
            out.sort_by(&by)?;
        }
        tracing::debug!(groups = groups.len(), vars = targets.len(), "collapsed");
        self.data = out;
        Ok(Output::None)
    }

    pub(super) fn cmd_reshape(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let Some((direction, stubs)) = inv.tokens().split_first() else {
            return Err(CommandError::parse("reshape requires long or wide"));
        };
        let direction = match direction.to_lowercase().as_str() {
            "long" => ReshapeDirection::Long,
            "wide" => ReshapeDirection::Wide,
            other => return Err(CommandError::parse(format!("reshape {} not supported", other)).with_fragment(other)),
        };
        let spec = ReshapeSpec {
            direction,
            stubs: stubs.to_vec(),
            i: expand_varlist(&self.data, &inv.options().words("i"))?,
            j: first_word(inv.options().value("j").unwrap_or_default()),
            string_j: inv.has("string"),
        };
        let (nobs, nvars) = (self.data.nobs(), self.data.nvars());
        self.data.reshape(&spec)?;
        let (from, to) = match direction {
            ReshapeDirection::Long => ("Wide", "Long"),
            ReshapeDirection::Wide => ("Long", "Wide"),
        };
        let rule = "-".repeat(self.linesize().saturating_sub(3).min(77));
        let lines = [
            format!("{:<31}{:>8}   ->   {}", "Data", from, to),
            rule.clone(),
            format!("{:<31}{:>8}   ->   {}", "Number of observations", nobs, self.data.nobs()),
            format!("{:<31}{:>8}   ->   {}", "Number of variables", nvars, self.data.nvars()),
            format!("{:<31}{:>8}   ->   {}", "j variable", "", spec.j),
            rule,
        ];
        Ok(Output::text(lines.join("\n")))
    }

    pub(super) fn cmd_egen(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let name = match inv.tokens() {
            [name] => name,
            [ty, name] => {
                if declared_type(ty)? != VarType::Numeric {
                    return Err(type_mismatch());
                }
                name
            }
            _ => return Err(CommandError::parse("egen requires [type] newvar = fcn(arguments)")),
        };
        let name = new_name(&self.data, name)?;
        let call = inv.cmd.assignment.as_deref().unwrap_or_default();
        let (function, args) =
            split_call(call).ok_or_else(|| CommandError::parse(format!("{} is not an egen function", call)).with_fragment(call))?;
        let nobs = self.data.nobs();
        let selected = inv.mask(nobs);

        let values: Vec<Option<f64>> = match function {
            "group" | "tag" => {
                let vars = self.egen_varlist(args)?;
                let keys = self.data.row_keys(&vars)?;
                let usable = |r: usize| selected[r] && (inv.has("missing") || !keys[r].iter().any(Key::is_missing));
                if function == "group" {
                    let levels = sorted_levels((0..nobs).filter(|&r| usable(r)).map(|r| keys[r].clone()));
                    (0..nobs)
                        .map(|r| {
                            usable(r)
                                .then(|| levels.binary_search(&keys[r]).ok().map(|i| (i + 1) as f64))
                                .flatten()
                        })
                        .collect()
                } else {
                    let mut seen = HashSet::new();
                    (0..nobs)
                        .map(|r| Some(if usable(r) && seen.insert(keys[r].clone()) { 1.0 } else { 0.0 }))
                        .collect()
                }
            }
            "rowmean" | "rowtotal" | "rowmin" | "rowmax" | "rowmiss" | "rownonmiss" => {
                let vars = self.egen_varlist(args)?;
                let all: Vec<usize> = (0..nobs).collect();
                let columns = vars
                    .iter()
                    .map(|v| numeric_column(&self.data, v, &all))
                    .collect::<Result<Vec<_>, _>>()?;
                (0..nobs)
                    .map(|r| {
                        if !selected[r] {
                            return None;
                        }
                        let row: Vec<f64> = columns.iter().filter_map(|c| c[r]).collect();
                        match function {
                            "rowtotal" => Some(row.iter().sum()),
                            "rowmiss" => Some((columns.len() - row.len()) as f64),
                            "rownonmiss" => Some(row.len() as f64),
                            _ if row.is_empty() => None,
                            "rowmean" => Some(row.iter().sum::<f64>() / row.len() as f64),
                            "rowmin" => row.iter().copied().reduce(f64::min),
                            _ => row.iter().copied().reduce(f64::max),
                        }
                    })
                    .collect()
            }
            other => {
                let stat = Stat::parse(other).ok_or_else(|| {
                    CommandError::new(ErrorKind::Resolution, rc::UNRECOGNIZED, format!("unknown egen function {}()", other))
                        .with_fragment(other)
                })?;
                let expr = parse_exp(args)?;
                let eval = evaluator(&self.data, inv.groups.as_ref());
                if eval.infer(&expr)? != VarType::Numeric {
                    return Err(type_mismatch());
                }
                let source: Vec<Option<f64>> =
                    (0..nobs).map(|r| eval.value_at(&expr, r).map(|v| v.as_num())).collect::<Result<_, _>>()?;
                let by_option = expand_varlist(&self.data, &inv.options().words("by"))?;
                let groups = if !by_option.is_empty() {
                    Grouping::by(&self.data, &by_option, &inv.rows)?
                } else if let Some(g) = &inv.groups {
                    g.clone()
                } else {
                    Grouping::single(&inv.rows)
                };
                let mut out = vec![None; nobs];
                for (_, rows) in groups.iter() {
                    let rows: Vec<usize> = rows.iter().copied().filter(|&r| selected[r]).collect();
                    let value = stat.apply(&rows.iter().map(|&r| source[r]).collect::<Vec<_>>());
                    for r in rows {
                        out[r] = value;
                    }
                }
                out
            }
        };

        let missing = values.iter().filter(|v| v.is_none()).count();
        self.data.add_variable(Variable::numeric(name, values))?;
        if missing > 0 {
            return Ok(Output::text(format!("({} generated)", plural(missing, "missing value"))));
        }
        Ok(Output::None)
    }

    fn egen_varlist(&self, args: &str) -> Result<Vec<String>, CommandError> {
        let tokens: Vec<String> = args.split_whitespace().map(String::from).collect();
        if tokens.is_empty() {
            return Err(CommandError::new(ErrorKind::Parse, rc::VARLIST_REQUIRED, "varlist required"));
        }
        expand_varlist(&self.data, &tokens)
    }

    pub(super) fn cmd_xtset(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        self.set_panel(inv, true)
    }

    pub(super) fn cmd_tsset(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        self.set_panel(inv, false)
    }

    fn set_panel(&mut self, inv: &Invocation, panel_first: bool) -> Result<Output, CommandError> {
        if inv.has("clear") {
            self.data.clear_panel();
            return Ok(Output::None);
        }
        let spec = match (inv.vars.as_slice(), panel_first) {
            ([], _) => self.data.validated_panel()?.clone(),
            ([panel], true) => PanelSpec { panel: Some(panel.clone()), time: None },
            ([time], false) => PanelSpec { panel: None, time: Some(time.clone()) },
            ([panel, time], _) => PanelSpec { panel: Some(panel.clone()), time: Some(time.clone()) },
            _ => return Err(CommandError::new(ErrorKind::Parse, rc::TOO_MANY_VARIABLES, "too many variables specified")),
        };
        if !inv.vars.is_empty() {
            // xtset sorts by panel and time, then records the order
            let keys: Vec<String> = spec.panel.iter().chain(spec.time.iter()).cloned().collect();
            self.data.sort_by(&keys)?;
            self.data.set_panel(spec.clone())?;
            tracing::debug!(panel = ?spec.panel, time = ?spec.time, "panel metadata set");
        }
        Ok(Output::text(self.describe_panel(&spec)?))
    }

    fn describe_panel(&self, spec: &PanelSpec) -> Result<String, CommandError> {
        let nobs = self.data.nobs();
        let all: Vec<usize> = (0..nobs).collect();
        let mut lines = Vec::new();
        let times: Option<Vec<Option<f64>>> = spec.time.as_deref().map(|t| numeric_column(&self.data, t, &all)).transpose()?;

        if let Some(panel) = &spec.panel {
            let balance = match &times {
                Some(times) => {
                    let groups = Grouping::by(&self.data, std::slice::from_ref(panel), &all)?;
                    let sets: Vec<Vec<i64>> = groups
                        .iter()
                        .map(|(_, rows)| {
                            let mut t: Vec<i64> = rows.iter().filter_map(|&r| times[r]).map(|t| t as i64).collect();
                            t.sort_unstable();
                            t
                        })
                        .collect();
                    if sets.windows(2).all(|w| w[0] == w[1]) {
                        "strongly balanced"
                    } else {
                        "unbalanced"
                    }
                }
                None => "",
            };
            if balance.is_empty() {
                lines.push(format!("Panel variable: {}", panel));
            } else {
                lines.push(format!("Panel variable: {} ({})", panel, balance));
            }
        }
        if let (Some(time), Some(times)) = (&spec.time, &times) {
            let present: Vec<f64> = times.iter().flatten().copied().collect();
            let lo = present.iter().copied().reduce(f64::min);
            let hi = present.iter().copied().reduce(f64::max);
            let var = self.data.require(time)?;
            let show = |v: Option<f64>| apply_format(&var.format, &Value::from_opt(v)).trim().to_string();
            let mut line = format!(" Time variable: {}, {} to {}", time, show(lo), show(hi));
            if spec.panel.is_none() {
                let mut sorted = present.clone();
                sorted.sort_by(f64::total_cmp);
                if sorted.windows(2).any(|w| w[1] - w[0] > 1.0) {
                    line.push_str(", but with gaps");
                }
            }
            lines.push(line);
            lines.push("         Delta: 1 unit".to_string());
        }
        Ok(lines.join("\n"))
    }

    pub(super) fn cmd_clear(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        match inv.tokens() {
            [] => self.data = Dataset::new(),
            [what] if what == "all" || what == "*" => {
                self.data = Dataset::new();
                self.results = Default::default();
            }
            [what] if what == "results" => self.results = Default::default(),
            _ => return Err(CommandError::parse("clear takes nothing, all or results")),
        }
        self.source = None;
        Ok(Output::None)
    }

    pub(super) fn cmd_display(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let row = inv.rows.first().copied().unwrap_or(0);
        let eval = Evaluator::new(&self.data);
        let mut out = String::new();
        let mut format: Option<String> = None;
        let mut pending: Vec<String> = Vec::new();

        let flush = |pending: &mut Vec<String>, format: &mut Option<String>, out: &mut String| -> Result<(), CommandError> {
            if pending.is_empty() {
                return Ok(());
            }
            let text = pending.join(" ");
            pending.clear();
            let expr = parse_exp(&text)?;
            eval.infer(&expr)?;
            let value = eval.value_at(&expr, row)?;
            let shown = match (format.take(), &value) {
                (Some(f), _) => apply_format(&f, &value),
                (None, Value::Num(n)) => format_g(*n, 10),
                (None, other) => other.to_string(),
            };
            out.push_str(&shown);
            Ok(())
        };

        let text = full_text(inv);
        for (_, token) in split_top_level(&text, char::is_whitespace) {
            if token.starts_with('"') {
                flush(&mut pending, &mut format, &mut out)?;
                out.push_str(unquote(token));
            } else if token.starts_with('%') && pending.is_empty() {
                format = Some(token.to_string());
            } else if matches!(token, "_n" | "_newline") {
                flush(&mut pending, &mut format, &mut out)?;
                out.push('\n');
            } else if let Some((directive, arg)) = split_call(token).filter(|(d, _)| d.starts_with('_')) {
                flush(&mut pending, &mut format, &mut out)?;
                let n: usize = arg.parse().map_err(|_| CommandError::parse(format!("{} invalid", token)).with_fragment(token))?;
                match directive {
                    "_col" | "_column" => {
                        let width = out.rsplit('\n').next().map_or(0, |l| l.chars().count());
                        out.push_str(&" ".repeat((n.saturating_sub(1)).saturating_sub(width)));
                    }
                    "_skip" => out.push_str(&" ".repeat(n)),
                    "_n" | "_newline" => out.push_str(&"\n".repeat(n)),
                    _ => return Err(CommandError::parse(format!("{} invalid", token)).with_fragment(token)),
                }
            } else {
                pending.push(token.to_string());
            }
        }
        flush(&mut pending, &mut format, &mut out)?;
        Ok(Output::text(out))
    }

    pub(super) fn cmd_do(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let [file] = inv.tokens() else {
            return Err(CommandError::parse(format!("{} requires one file name", inv.verb.name())));
        };
        let mut path = std::path::PathBuf::from(unquote(file));
        if path.extension().is_none() {
            path.set_extension("do");
        }
        let output = self.run_file(&path, inv.has("nostop"))?;
        if inv.verb == super::Verb::Run {
            return Ok(Output::None);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::render;

    fn session() -> Session {
        let mut s = Session::new();
        let data = Dataset::from_variables(vec![
            Variable::numeric("id", vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]),
            Variable::numeric("g", vec![Some(1.0), Some(1.0), Some(2.0), Some(2.0)]),
            Variable::numeric("x", vec![Some(1.0), None, Some(3.0), Some(5.0)]),
            Variable::string("s", vec!["a".into(), "b".into(), "".into(), "d".into()]),
        ])
        .unwrap();
        s.set_data(data);
        s
    }

    fn run(s: &mut Session, line: &str) -> String {
        let out = s.execute(line).unwrap_or_else(|e| panic!("{}: {}", line, e.report()));
        render(&out, 80)
    }

    fn nums(s: &Session, name: &str) -> Vec<Option<f64>> {
        match &s.data().require(name).unwrap().data {
            Column::Numeric(v) => v.clone(),
            Column::Str(_) => panic!("{} is a string", name),
        }
    }

    #[test]
    fn generate_propagates_missing() {
        let mut s = session();
        assert_eq!(run(&mut s, "generate z = x + id"), "(1 missing value generated)");
        assert_eq!(nums(&s, "z"), vec![Some(2.0), None, Some(6.0), Some(9.0)]);
    }

    #[test]
    fn generate_leaves_unselected_rows_missing() {
        let mut s = session();
        run(&mut s, "gen double z = 1 if g == 2");
        assert_eq!(nums(&s, "z"), vec![None, None, Some(1.0), Some(1.0)]);
        let err = s.execute("gen str5 t = x").unwrap_err();
        assert_eq!(err.code, 109);
    }

    #[test]
    fn generate_places_the_variable() {
        let mut s = session();
        run(&mut s, "gen a = 1, before(g)");
        let names: Vec<&str> = s.data().names().collect();
        assert_eq!(names, vec!["id", "a", "g", "x", "s"]);
    }

    #[test]
    fn replace_counts_changes() {
        let mut s = session();
        assert_eq!(run(&mut s, "replace x = 0 if id > 2"), "(2 real changes made)");
        assert_eq!(run(&mut s, "replace x = . in 1"), "(1 real change made, 1 to missing)");
    }

    #[test]
    fn replace_carries_values_forward() {
        let mut s = session();
        run(&mut s, "replace x = x[_n-1] if missing(x)");
        assert_eq!(nums(&s, "x"), vec![Some(1.0), Some(1.0), Some(3.0), Some(5.0)]);
    }

    #[test]
    fn drop_if_keeps_order() {
        let mut s = session();
        assert_eq!(run(&mut s, "drop if g == 1"), "(2 observations deleted)");
        assert_eq!(nums(&s, "id"), vec![Some(3.0), Some(4.0)]);
        assert!(s.execute("drop x if g == 2").is_err());
        run(&mut s, "keep id x");
        assert_eq!(s.data().nvars(), 2);
    }

    #[test]
    fn rename_groups_swap() {
        let mut s = session();
        run(&mut s, "rename (id g) (g id)");
        assert_eq!(nums(&s, "g"), vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
    }

    #[test]
    fn recode_into_a_new_variable() {
        let mut s = session();
        assert_eq!(run(&mut s, "recode x (1 3 = 0) (else = 9), gen(y)"), "(y: 4 differences made)");
        assert_eq!(nums(&s, "y"), vec![Some(0.0), Some(9.0), Some(0.0), Some(9.0)]);
        assert_eq!(nums(&s, "x")[0], Some(1.0));
    }

    #[test]
    fn labels_define_attach_and_list() {
        let mut s = session();
        run(&mut s, "label define grp 1 \"One\" 2 \"Two\"");
        run(&mut s, "label values g grp");
        run(&mut s, "label variable g \"Group\"");
        assert_eq!(s.data().require("g").unwrap().label.as_deref(), Some("Group"));
        assert_eq!(run(&mut s, "label list grp"), "grp:\n           1 One\n           2 Two");
        assert!(s.execute("label define grp 3 \"Three\"").is_err());
        run(&mut s, "label define grp 3 \"Three\", add");
        assert!(s.execute("label define grp 3 \"Drei\", add").is_err());
    }

    #[test]
    fn collapse_by_group() {
        let mut s = session();
        run(&mut s, "collapse (mean) mx=x (count) n=x, by(g)");
        assert_eq!(nums(&s, "g"), vec![Some(1.0), Some(2.0)]);
        assert_eq!(nums(&s, "mx"), vec![Some(1.0), Some(4.0)]);
        assert_eq!(nums(&s, "n"), vec![Some(1.0), Some(2.0)]);
    }

    #[test]
    fn egen_group_statistics() {
        let mut s = session();
        run(&mut s, "egen m = mean(x), by(g)");
        assert_eq!(nums(&s, "m"), vec![Some(1.0), Some(1.0), Some(4.0), Some(4.0)]);
        run(&mut s, "bysort g: egen t = total(x)");
        assert_eq!(nums(&s, "t"), vec![Some(1.0), Some(1.0), Some(8.0), Some(8.0)]);
        run(&mut s, "egen k = group(g)");
        assert_eq!(nums(&s, "k"), vec![Some(1.0), Some(1.0), Some(2.0), Some(2.0)]);
        run(&mut s, "egen r = rowtotal(id x)");
        assert_eq!(nums(&s, "r"), vec![Some(2.0), Some(2.0), Some(6.0), Some(9.0)]);
    }

    #[test]
    fn xtset_reports_balance() {
        let mut s = session();
        run(&mut s, "gen t = id - 2*(g-1)");
        let out = run(&mut s, "xtset g t");
        assert!(out.starts_with("Panel variable: g (strongly balanced)"), "{}", out);
        assert!(out.contains("Time variable: t, 1 to 2"));
    }

    #[test]
    fn display_expressions_and_strings() {
        let mut s = session();
        assert_eq!(run(&mut s, "display \"sum: \" 2 + 3"), "sum: 5");
        assert_eq!(run(&mut s, "di %5.2f 1/3").trim(), "0.33");
        assert_eq!(run(&mut s, "di 1/0"), ".");
    }

    #[test]
    fn clear_empties_the_dataset() {
        let mut s = session();
        run(&mut s, "clear");
        assert_eq!(s.data().nvars(), 0);
    }
}
