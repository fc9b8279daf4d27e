//! Command dispatch
//!
//! Every command name resolves through one static table to a `Verb`, and
//! every `Verb` has a `HandlerSpec` saying what the command accepts. The
//! dispatcher checks the parsed command against the spec, expands the
//! varlist against the live dataset, selects observations from `if`/`in`,
//! evaluates weights, and only then runs the handler.
//!
//! Handlers are `Session` methods grouped by area:
//! - `data`: generate, replace, drop/keep, labels, merge and friends
//! - `io`: use, save, import/export, describe, codebook, list, count
//! - `summary`: summarize, tabulate
//! - `estimation`: model fitting
//! - `estimates`: eststo, estadd, esttab/estout, estimates
//! - `graph`: plot specifications

mod data;
mod estimates;
mod estimation;
mod graph;
mod io;
mod summary;

use crate::ast::{Expr, Value};
use crate::command::{Command, Options, Prefix, WeightKind};
use crate::dataset::{validate_name, Dataset, Key, VarType};
use crate::display::{format_g, Output};
use crate::error::{rc, CommandError, ErrorKind};
use crate::eval::{Evaluator, Grouping};
use crate::parser::parse_expr;
use crate::session::Session;
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Use,
    Save,
    Import,
    Export,
    Describe,
    Codebook,
    List,
    Count,
    Generate,
    Replace,
    Drop,
    Keep,
    Rename,
    Clonevar,
    Recode,
    Sort,
    Label,
    Append,
    Merge,
    Cross,
    Joinby,
    Collapse,
    Reshape,
    Egen,
    Xtset,
    Tsset,
    Clear,
    Display,
    Do,
    Run,
    Summarize,
    Tabulate,
    Regress,
    Reghdfe,
    Logit,
    Logistic,
    Probit,
    Poisson,
    Nbreg,
    Tobit,
    Intreg,
    Areg,
    Xtreg,
    Xtlogit,
    Xtprobit,
    Xtpoisson,
    Xtabond,
    Xtdpdsys,
    Anova,
    Newey,
    Arima,
    Arch,
    Var,
    Vec,
    Ivregress,
    Eststo,
    Estadd,
    Esttab,
    Estout,
    Estimates,
    Scatter,
    Histogram,
    Graph,
    Twoway,
    Line,
    Binscatter,
    Coefplot,
    Lgraph,
}

/// Command name, shortest accepted abbreviation, verb. The first entry for
/// a verb is its canonical name.
const VERBS: &[(&str, usize, Verb)] = &[
    ("use", 3, Verb::Use),
    ("save", 4, Verb::Save),
    ("import", 3, Verb::Import),
    ("export", 3, Verb::Export),
    ("describe", 1, Verb::Describe),
    ("codebook", 4, Verb::Codebook),
    ("list", 1, Verb::List),
    ("count", 3, Verb::Count),
    ("generate", 1, Verb::Generate),
    ("replace", 7, Verb::Replace),
    ("drop", 4, Verb::Drop),
    ("keep", 4, Verb::Keep),
    ("rename", 3, Verb::Rename),
    ("clonevar", 8, Verb::Clonevar),
    ("recode", 6, Verb::Recode),
    ("sort", 4, Verb::Sort),
    ("label", 2, Verb::Label),
    ("append", 3, Verb::Append),
    ("merge", 5, Verb::Merge),
    ("cross", 5, Verb::Cross),
    ("joinby", 6, Verb::Joinby),
    ("collapse", 8, Verb::Collapse),
    ("reshape", 7, Verb::Reshape),
    ("egen", 4, Verb::Egen),
    ("xtset", 5, Verb::Xtset),
    ("tsset", 5, Verb::Tsset),
    ("clear", 5, Verb::Clear),
    ("display", 2, Verb::Display),
    ("do", 2, Verb::Do),
    ("run", 3, Verb::Run),
    ("summarize", 2, Verb::Summarize),
    ("tabulate", 2, Verb::Tabulate),
    ("regress", 3, Verb::Regress),
    ("reghdfe", 7, Verb::Reghdfe),
    ("logit", 5, Verb::Logit),
    ("logistic", 8, Verb::Logistic),
    ("probit", 6, Verb::Probit),
    ("poisson", 7, Verb::Poisson),
    ("nbreg", 5, Verb::Nbreg),
    ("tobit", 5, Verb::Tobit),
    ("intreg", 6, Verb::Intreg),
    ("areg", 4, Verb::Areg),
    ("xtreg", 5, Verb::Xtreg),
    ("xtlogit", 7, Verb::Xtlogit),
    ("xtprobit", 8, Verb::Xtprobit),
    ("xtpoisson", 9, Verb::Xtpoisson),
    ("xtabond", 7, Verb::Xtabond),
    ("xtdpdsys", 8, Verb::Xtdpdsys),
    ("anova", 5, Verb::Anova),
    ("newey", 5, Verb::Newey),
    ("arima", 5, Verb::Arima),
    ("arch", 4, Verb::Arch),
    ("var", 3, Verb::Var),
    ("vec", 3, Verb::Vec),
    ("ivregress", 9, Verb::Ivregress),
    ("ivreg", 5, Verb::Ivregress),
    ("ivreg2", 6, Verb::Ivregress),
    ("eststo", 6, Verb::Eststo),
    ("estadd", 6, Verb::Estadd),
    ("esttab", 6, Verb::Esttab),
    ("estout", 6, Verb::Estout),
    ("estimates", 3, Verb::Estimates),
    ("scatter", 2, Verb::Scatter),
    ("histogram", 4, Verb::Histogram),
    ("graph", 2, Verb::Graph),
    ("twoway", 2, Verb::Twoway),
    ("line", 4, Verb::Line),
    ("binscatter", 10, Verb::Binscatter),
    ("coefplot", 8, Verb::Coefplot),
    ("lgraph", 6, Verb::Lgraph),
];

impl Verb {
    /// Look up a command name: exact names first, then abbreviations
    pub fn resolve(name: &str) -> Option<Verb> {
        let name = name.to_lowercase();
        VERBS
            .iter()
            .find(|(full, _, _)| *full == name)
            .or_else(|| {
                VERBS
                    .iter()
                    .find(|(full, min, _)| name.len() >= *min && full.starts_with(name.as_str()))
            })
            .map(|(_, _, verb)| *verb)
    }

    pub fn name(self) -> &'static str {
        VERBS
            .iter()
            .find(|(_, _, v)| *v == self)
            .map_or("", |(name, _, _)| name)
    }

    /// Every accepted command name, for completion
    pub fn all_names() -> impl Iterator<Item = &'static str> {
        VERBS.iter().map(|(name, _, _)| *name)
    }

    pub fn is_estimation(self) -> bool {
        crate::backend::ModelKind::from_verb(self.name()).is_some()
    }

    pub fn spec(self) -> &'static HandlerSpec {
        static TABLE: OnceLock<HashMap<Verb, HandlerSpec>> = OnceLock::new();
        let table = TABLE.get_or_init(build_table);
        &table[&self]
    }
}

/// What a command accepts before `if`, `in` and the options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Varlist {
    Empty,
    /// Existing variables, expanded; an empty list means every variable
    /// when `all_by_default` is set
    Existing { min: usize, max: Option<usize>, all_by_default: bool },
    /// Tokens the handler interprets itself
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clause {
    Forbidden,
    Optional,
    Required,
}

/// How a command combines with a `by` prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByMode {
    Never,
    /// One run; expressions see the groups (`_n`, `_N`, group statistics)
    Groups,
    /// One run per group
    Repeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionRule {
    Only(&'static [&'static str]),
    /// Anything goes; the backend decides
    Any,
}

type Handler = fn(&mut Session, &Invocation) -> Result<Output, CommandError>;

/// Contract of one command
#[derive(Debug, Clone, Copy)]
pub struct HandlerSpec {
    pub varlist: Varlist,
    pub assignment: Clause,
    pub if_in: bool,
    pub using: Clause,
    pub weights: &'static [WeightKind],
    pub by: ByMode,
    pub options: OptionRule,
    /// Abbreviation -> option name
    pub aliases: &'static [(&'static str, &'static str)],
    pub required: &'static [&'static str],
    /// Changes the dataset or result store
    pub mutates: bool,
    handler: Handler,
}

impl HandlerSpec {
    fn new(handler: Handler) -> Self {
        HandlerSpec {
            varlist: Varlist::Empty,
            assignment: Clause::Forbidden,
            if_in: false,
            using: Clause::Forbidden,
            weights: &[],
            by: ByMode::Never,
            options: OptionRule::Only(&[]),
            aliases: &[],
            required: &[],
            mutates: false,
            handler,
        }
    }

    fn vars(mut self, min: usize, max: Option<usize>) -> Self {
        self.varlist = Varlist::Existing { min, max, all_by_default: false };
        self
    }

    fn all_vars(mut self) -> Self {
        self.varlist = Varlist::Existing { min: 0, max: None, all_by_default: true };
        self
    }

    fn raw(mut self) -> Self {
        self.varlist = Varlist::Raw;
        self
    }

    fn assignment(mut self, clause: Clause) -> Self {
        self.assignment = clause;
        self
    }

    fn if_in(mut self) -> Self {
        self.if_in = true;
        self
    }

    fn using(mut self, clause: Clause) -> Self {
        self.using = clause;
        self
    }

    fn weights(mut self, kinds: &'static [WeightKind]) -> Self {
        self.weights = kinds;
        self
    }

    fn by(mut self, mode: ByMode) -> Self {
        self.by = mode;
        self
    }

    fn options(mut self, names: &'static [&'static str]) -> Self {
        self.options = OptionRule::Only(names);
        self
    }

    fn any_options(mut self) -> Self {
        self.options = OptionRule::Any;
        self
    }

    fn aliases(mut self, aliases: &'static [(&'static str, &'static str)]) -> Self {
        self.aliases = aliases;
        self
    }

    fn required(mut self, names: &'static [&'static str]) -> Self {
        self.required = names;
        self
    }

    fn mutates(mut self) -> Self {
        self.mutates = true;
        self
    }

    /// Check clauses and options; option aliases are renamed in place
    fn check(&self, verb: Verb, cmd: &mut Command) -> Result<(), CommandError> {
        let name = verb.name();
        let not_allowed = |what: &str| {
            CommandError::new(ErrorKind::Parse, rc::NOT_ALLOWED, format!("{} not allowed", what))
                .with_fragment(name)
        };
        if self.varlist == Varlist::Empty && !cmd.varlist.is_empty() {
            return Err(not_allowed("varlist").with_fragment(cmd.varlist.join(" ")));
        }
        match (self.assignment, &cmd.assignment) {
            (Clause::Forbidden, Some(exp)) => return Err(not_allowed("=exp").with_fragment(exp.clone())),
            (Clause::Required, None) => {
                return Err(CommandError::new(ErrorKind::Parse, rc::VARLIST_REQUIRED, "=exp required"));
            }
            _ => {}
        }
        if !self.if_in {
            if cmd.if_expr.is_some() {
                return Err(not_allowed("if"));
            }
            if cmd.in_range.is_some() {
                return Err(not_allowed("in"));
            }
        }
        match (self.using, &cmd.using) {
            (Clause::Forbidden, Some(file)) => return Err(not_allowed("using").with_fragment(file.clone())),
            (Clause::Required, None) => return Err(CommandError::parse("using required")),
            _ => {}
        }
        if let Some(weight) = &cmd.weight {
            if !self.weights.contains(&weight.kind) {
                return Err(not_allowed(&format!("{}weights", weight.kind.abbrev().trim_end_matches('w'))));
            }
        }

        cmd.options.canonicalize(self.aliases);
        if let OptionRule::Only(allowed) = self.options {
            if let Some(bad) = cmd.options.names().find(|n| !allowed.contains(n)) {
                return Err(CommandError::option_not_allowed(bad));
            }
        }
        for required in self.required {
            if !cmd.options.has(required) {
                return Err(CommandError::parse(format!("option {}() required", required)).with_fragment(*required));
            }
        }
        Ok(())
    }
}

const SUMMARY_WEIGHTS: &[WeightKind] = &[WeightKind::Frequency, WeightKind::Analytic, WeightKind::Importance];
const ALL_WEIGHTS: &[WeightKind] =
    &[WeightKind::Frequency, WeightKind::Analytic, WeightKind::Probability, WeightKind::Importance];
const GRAPH_OPTIONS: &[&str] = &["title", "subtitle", "xtitle", "ytitle", "name", "saving", "level"];
const TABLE_OPTIONS: &[&str] = &[
    "se", "t", "p", "ci", "not", "nose", "star", "nostar", "nostars", "stats", "scalars", "keep", "drop",
    "order", "title", "label", "b", "mtitles", "replace", "append",
];
const ESTIMATION_OPTIONS: &[&str] =
    &["robust", "vce", "cluster", "noconstant", "level", "or", "irr", "eform", "iterate"];
const PANEL_OPTIONS: &[&str] = &[
    "robust", "vce", "cluster", "noconstant", "level", "or", "irr", "eform", "iterate", "fe", "re", "intpoints",
];
const ESTIMATION_ALIASES: &[(&str, &str)] = &[
    ("r", "robust"),
    ("rob", "robust"),
    ("nocons", "noconstant"),
    ("cl", "cluster"),
    ("l", "level"),
    ("iter", "iterate"),
];

fn build_table() -> HashMap<Verb, HandlerSpec> {
    use Clause::{Optional, Required};
    let mut table = HashMap::new();
    let mut add = |verb: Verb, spec: HandlerSpec| {
        table.insert(verb, spec);
    };

    // data
    add(Verb::Use, HandlerSpec::new(Session::cmd_use).raw().if_in().using(Optional).options(&["clear", "nolabel"]).mutates());
    add(Verb::Save, HandlerSpec::new(Session::cmd_save).raw().options(&["replace"]).mutates());
    add(
        Verb::Import,
        HandlerSpec::new(Session::cmd_import)
            .raw()
            .using(Optional)
            .options(&["clear", "delimiters", "varnames", "sheet", "firstrow"])
            .aliases(&[("delimiter", "delimiters"), ("delim", "delimiters")])
            .mutates(),
    );
    add(
        Verb::Export,
        HandlerSpec::new(Session::cmd_export)
            .raw()
            .if_in()
            .using(Optional)
            .options(&["replace", "delimiter", "novarnames", "nolabel", "sheet", "firstrow"])
            .aliases(&[("delim", "delimiter")]),
    );
    add(Verb::Describe, HandlerSpec::new(Session::cmd_describe).all_vars().options(&["simple"]));
    add(Verb::Codebook, HandlerSpec::new(Session::cmd_codebook).all_vars().if_in());
    add(
        Verb::List,
        HandlerSpec::new(Session::cmd_list)
            .all_vars()
            .if_in()
            .by(ByMode::Repeat)
            .options(&["noobs", "nolabel"])
            .aliases(&[("noo", "noobs"), ("nol", "nolabel")]),
    );
    add(Verb::Count, HandlerSpec::new(Session::cmd_count).if_in().by(ByMode::Repeat));
    add(
        Verb::Generate,
        HandlerSpec::new(Session::cmd_generate)
            .raw()
            .assignment(Required)
            .if_in()
            .by(ByMode::Groups)
            .options(&["before", "after"])
            .mutates(),
    );
    add(
        Verb::Replace,
        HandlerSpec::new(Session::cmd_replace).vars(1, Some(1)).assignment(Required).if_in().by(ByMode::Groups).mutates(),
    );
    add(Verb::Drop, HandlerSpec::new(Session::cmd_drop).raw().if_in().by(ByMode::Groups).mutates());
    add(Verb::Keep, HandlerSpec::new(Session::cmd_keep).raw().if_in().by(ByMode::Groups).mutates());
    add(Verb::Rename, HandlerSpec::new(Session::cmd_rename).raw().mutates());
    add(Verb::Clonevar, HandlerSpec::new(Session::cmd_clonevar).raw().assignment(Required).if_in().mutates());
    add(
        Verb::Recode,
        HandlerSpec::new(Session::cmd_recode)
            .raw()
            .if_in()
            .options(&["generate"])
            .aliases(&[("gen", "generate"), ("g", "generate")])
            .mutates(),
    );
    add(Verb::Sort, HandlerSpec::new(Session::cmd_sort).vars(1, None).mutates());
    add(Verb::Label, HandlerSpec::new(Session::cmd_label).raw().options(&["modify", "add", "replace"]).mutates());
    add(
        Verb::Append,
        HandlerSpec::new(Session::cmd_append)
            .using(Required)
            .options(&["force", "generate"])
            .aliases(&[("gen", "generate")])
            .mutates(),
    );
    add(
        Verb::Merge,
        HandlerSpec::new(Session::cmd_merge)
            .raw()
            .using(Required)
            .options(&["keep", "generate", "nogenerate", "keepusing"])
            .aliases(&[("gen", "generate"), ("nogen", "nogenerate")])
            .mutates(),
    );
    add(Verb::Cross, HandlerSpec::new(Session::cmd_cross).using(Required).mutates());
    add(Verb::Joinby, HandlerSpec::new(Session::cmd_joinby).vars(1, None).using(Required).mutates());
    add(
        Verb::Collapse,
        HandlerSpec::new(Session::cmd_collapse).raw().assignment(Optional).if_in().options(&["by"]).mutates(),
    );
    add(
        Verb::Reshape,
        HandlerSpec::new(Session::cmd_reshape).raw().options(&["i", "j", "string"]).required(&["i", "j"]).mutates(),
    );
    add(
        Verb::Egen,
        HandlerSpec::new(Session::cmd_egen)
            .raw()
            .assignment(Required)
            .if_in()
            .by(ByMode::Groups)
            .options(&["by", "missing"])
            .mutates(),
    );
    add(Verb::Xtset, HandlerSpec::new(Session::cmd_xtset).vars(0, Some(2)).options(&["clear"]).mutates());
    add(Verb::Tsset, HandlerSpec::new(Session::cmd_tsset).vars(0, Some(2)).options(&["clear"]).mutates());
    add(Verb::Clear, HandlerSpec::new(Session::cmd_clear).raw().mutates());
    add(Verb::Display, HandlerSpec::new(Session::cmd_display).raw().assignment(Optional).by(ByMode::Repeat));
    // lines inside a do-file roll back one at a time
    add(Verb::Do, HandlerSpec::new(Session::cmd_do).raw().options(&["nostop"]));
    add(Verb::Run, HandlerSpec::new(Session::cmd_do).raw().options(&["nostop"]));

    // statistics
    add(
        Verb::Summarize,
        HandlerSpec::new(Session::cmd_summarize)
            .all_vars()
            .if_in()
            .weights(SUMMARY_WEIGHTS)
            .by(ByMode::Repeat)
            .options(&["detail", "meanonly"])
            .aliases(&[("d", "detail"), ("de", "detail"), ("det", "detail"), ("mean", "meanonly")]),
    );
    add(
        Verb::Tabulate,
        HandlerSpec::new(Session::cmd_tabulate)
            .vars(1, Some(2))
            .if_in()
            .weights(SUMMARY_WEIGHTS)
            .by(ByMode::Repeat)
            .options(&["missing", "nolabel"])
            .aliases(&[("m", "missing"), ("miss", "missing"), ("nol", "nolabel")]),
    );

    // estimation: the built-in models check their options, the rest pass
    // everything through to whichever backend is registered
    for (verb, builtin) in [
        (Verb::Regress, true),
        (Verb::Logit, true),
        (Verb::Logistic, true),
        (Verb::Probit, true),
        (Verb::Poisson, true),
        (Verb::Reghdfe, false),
        (Verb::Nbreg, false),
        (Verb::Tobit, false),
        (Verb::Intreg, false),
        (Verb::Areg, false),
        (Verb::Xtreg, false),
        (Verb::Xtabond, false),
        (Verb::Xtdpdsys, false),
        (Verb::Anova, false),
        (Verb::Newey, false),
        (Verb::Arima, false),
        (Verb::Arch, false),
        (Verb::Var, false),
        (Verb::Vec, false),
        (Verb::Ivregress, false),
    ] {
        let spec = HandlerSpec::new(Session::cmd_estimate)
            .raw()
            .if_in()
            .weights(ALL_WEIGHTS)
            .by(ByMode::Repeat)
            .aliases(ESTIMATION_ALIASES)
            .mutates();
        add(verb, if builtin { spec.options(ESTIMATION_OPTIONS) } else { spec.any_options() });
    }
    for verb in [Verb::Xtlogit, Verb::Xtprobit, Verb::Xtpoisson] {
        add(
            verb,
            HandlerSpec::new(Session::cmd_estimate)
                .raw()
                .if_in()
                .by(ByMode::Repeat)
                .options(PANEL_OPTIONS)
                .aliases(ESTIMATION_ALIASES)
                .mutates(),
        );
    }

    // stored results
    add(Verb::Eststo, HandlerSpec::new(Session::cmd_eststo).raw().options(&["title"]).mutates());
    add(Verb::Estadd, HandlerSpec::new(Session::cmd_estadd).raw().assignment(Optional).mutates());
    add(Verb::Esttab, HandlerSpec::new(Session::cmd_esttab).raw().using(Optional).options(TABLE_OPTIONS));
    add(Verb::Estout, HandlerSpec::new(Session::cmd_estout).raw().using(Optional).options(TABLE_OPTIONS));
    add(Verb::Estimates, HandlerSpec::new(Session::cmd_estimates).raw().options(&["level"]).mutates());

    // graphics
    add(Verb::Scatter, HandlerSpec::new(Session::cmd_scatter).raw().if_in().options(GRAPH_OPTIONS));
    add(Verb::Line, HandlerSpec::new(Session::cmd_line).raw().if_in().options(GRAPH_OPTIONS));
    add(Verb::Twoway, HandlerSpec::new(Session::cmd_twoway).raw().if_in().options(GRAPH_OPTIONS));
    add(Verb::Graph, HandlerSpec::new(Session::cmd_graph).raw().if_in().any_options());
    add(
        Verb::Histogram,
        HandlerSpec::new(Session::cmd_histogram)
            .vars(1, Some(1))
            .if_in()
            .weights(&[WeightKind::Frequency])
            .options(&[
                "title", "subtitle", "xtitle", "ytitle", "name", "saving", "bin", "width", "start", "density",
                "fraction", "frequency", "percent",
            ])
            .aliases(&[("freq", "frequency"), ("frac", "fraction"), ("percent", "percent")]),
    );
    add(
        Verb::Binscatter,
        HandlerSpec::new(Session::cmd_binscatter)
            .vars(2, Some(2))
            .if_in()
            .options(&["title", "subtitle", "xtitle", "ytitle", "name", "saving", "nquantiles", "linetype"])
            .aliases(&[("nq", "nquantiles"), ("bins", "nquantiles")]),
    );
    add(
        Verb::Coefplot,
        HandlerSpec::new(Session::cmd_coefplot)
            .raw()
            .options(&["title", "subtitle", "xtitle", "ytitle", "name", "saving", "keep", "drop", "level", "vertical"]),
    );
    add(
        Verb::Lgraph,
        HandlerSpec::new(Session::cmd_lgraph)
            .vars(2, Some(3))
            .if_in()
            .options(&["title", "subtitle", "xtitle", "ytitle", "name", "saving", "by", "stat"]),
    );
    table
}

/// A command after validation, ready for its handler
#[derive(Debug, Clone)]
pub struct Invocation {
    pub verb: Verb,
    pub cmd: Command,
    /// Expanded varlist for `Varlist::Existing` commands
    pub vars: Vec<String>,
    /// Observations selected by `if`/`in` (and the current by-group)
    pub rows: Vec<usize>,
    /// Weight of every observation
    pub weights: Option<(WeightKind, Vec<Option<f64>>)>,
    /// By-groups over the whole dataset, for `ByMode::Groups` commands
    pub groups: Option<Grouping>,
}

impl Invocation {
    pub fn options(&self) -> &Options {
        &self.cmd.options
    }

    pub fn has(&self, option: &str) -> bool {
        self.cmd.options.has(option)
    }

    /// Raw varlist tokens
    pub fn tokens(&self) -> &[String] {
        &self.cmd.varlist
    }

    /// True if `if` or `in` restricts the observations
    pub fn is_filtered(&self) -> bool {
        self.cmd.if_expr.is_some() || self.cmd.in_range.is_some()
    }

    /// Selected observations as a mask over `nobs` rows
    pub fn mask(&self, nobs: usize) -> Vec<bool> {
        let mut mask = vec![false; nobs];
        for &row in &self.rows {
            if row < nobs {
                mask[row] = true;
            }
        }
        mask
    }

    /// Weights of the selected rows, in `rows` order
    pub fn selected_weights(&self) -> Option<(WeightKind, Vec<Option<f64>>)> {
        self.weights
            .as_ref()
            .map(|(kind, w)| (*kind, self.rows.iter().map(|&r| w[r]).collect()))
    }
}

impl Session {
    /// Run one parsed command, with an optional `by` prefix
    pub(crate) fn dispatch(&mut self, cmd: &Command, by: Option<&Prefix>) -> Result<Output, CommandError> {
        let verb = Verb::resolve(&cmd.verb).ok_or_else(|| CommandError::unknown_command(&cmd.verb))?;
        let spec = verb.spec();
        let mut cmd = cmd.clone();
        spec.check(verb, &mut cmd)?;
        tracing::debug!(verb = verb.name(), "dispatching");

        let vars = match spec.varlist {
            Varlist::Existing { min, max, all_by_default } => {
                let vars = if cmd.varlist.is_empty() && all_by_default {
                    self.data.names().map(String::from).collect()
                } else {
                    expand_varlist(&self.data, &cmd.varlist)?
                };
                check_arity(&vars, min, max)?;
                vars
            }
            Varlist::Empty | Varlist::Raw => Vec::new(),
        };

        let Some(Prefix::By { vars: by_vars, within, sort }) = by else {
            let inv = self.invocation(verb, cmd, vars, None)?;
            return (spec.handler)(self, &inv);
        };

        if spec.by == ByMode::Never {
            return Err(CommandError::new(
                ErrorKind::Parse,
                rc::BY_NOT_ALLOWED,
                format!("{} may not be combined with by", verb.name()),
            ));
        }
        let by_vars = expand_varlist(&self.data, by_vars)?;
        let within = expand_varlist(&self.data, within)?;
        if *sort {
            let keys: Vec<String> = by_vars.iter().chain(within.iter()).cloned().collect();
            self.data.sort_by(&keys)?;
        } else if !self.data.is_sorted_by(&by_vars)? {
            return Err(CommandError::new(ErrorKind::State, rc::NOT_SORTED, "not sorted"));
        }
        let all: Vec<usize> = (0..self.data.nobs()).collect();
        let groups = Grouping::by(&self.data, &by_vars, &all)?;

        if spec.by == ByMode::Groups {
            let inv = self.invocation(verb, cmd, vars, Some(groups))?;
            return (spec.handler)(self, &inv);
        }

        let base = self.invocation(verb, cmd, vars, Some(groups.clone()))?;
        let rule = "-".repeat(self.linesize().saturating_sub(1));
        let mut out = Output::None;
        for (key, rows) in groups.iter() {
            self.check_cancel()?;
            let header = by_vars
                .iter()
                .zip(key)
                .map(|(name, k)| format!("{} = {}", name, self.display_value(name, &k.to_value())))
                .collect::<Vec<_>>()
                .join(", ");
            let mut inv = base.clone();
            inv.groups = None;
            inv.rows = base.rows.iter().copied().filter(|r| rows.contains(r)).collect();
            let block = (spec.handler)(self, &inv)?;
            out = out.then(Output::text(format!("{}\n-> {}", rule, header))).then(block);
        }
        Ok(out)
    }

    fn invocation(
        &self,
        verb: Verb,
        cmd: Command,
        vars: Vec<String>,
        groups: Option<Grouping>,
    ) -> Result<Invocation, CommandError> {
        // `use` applies if/in to the file it loads
        let rows = if verb == Verb::Use { Vec::new() } else { self.select_rows(&cmd, groups.as_ref())? };
        let weights = match &cmd.weight {
            Some(weight) => {
                let values = numeric_values_of(&Evaluator::new(&self.data), &weight.expr, "weight")?;
                if weight.kind == WeightKind::Frequency
                    && rows.iter().any(|&r| values[r].is_some_and(|w| w.fract() != 0.0))
                {
                    return Err(CommandError::new(
                        ErrorKind::Parse,
                        rc::NONINTEGER_WEIGHTS,
                        "may not use noninteger frequency weights",
                    ));
                }
                Some((weight.kind, values))
            }
            None => None,
        };
        Ok(Invocation { verb, cmd, vars, rows, weights, groups })
    }

    /// Observations picked by `in` and `if`, in dataset order
    pub(crate) fn select_rows(&self, cmd: &Command, groups: Option<&Grouping>) -> Result<Vec<usize>, CommandError> {
        let nobs = self.data.nobs();
        let range = match &cmd.in_range {
            Some(range) => range
                .resolve(nobs)
                .map_err(|reason| CommandError::parse(reason).with_fragment(range.to_string()))?,
            None => 0..nobs,
        };
        let mut rows: Vec<usize> = range.collect();
        if let Some(cond) = &cmd.if_expr {
            let evaluator = match groups {
                Some(g) => Evaluator::new(&self.data).with_groups(g),
                None => Evaluator::new(&self.data),
            };
            let mask = evaluator.select(cond)?;
            rows.retain(|&r| mask[r]);
        }
        Ok(rows)
    }

    /// A value as `list` and `tabulate` show it: through the value label
    /// when there is one
    pub(crate) fn display_value(&self, var: &str, value: &Value) -> String {
        if let (Some(v), Value::Num(n)) = (self.data.variable(var), value) {
            if let Some(text) = self.data.labelled(v, *n) {
                return text.to_string();
            }
        }
        match value {
            Value::Num(n) => format_g(*n, 9),
            other => other.to_string(),
        }
    }

    pub(crate) fn check_cancel(&self) -> Result<(), CommandError> {
        if self.cancel.is_cancelled() {
            Err(CommandError::interrupted())
        } else {
            Ok(())
        }
    }
}

fn check_arity(vars: &[String], min: usize, max: Option<usize>) -> Result<(), CommandError> {
    if vars.len() < min {
        let (code, msg) = if vars.is_empty() {
            (rc::VARLIST_REQUIRED, "varlist required")
        } else {
            (rc::TOO_FEW_VARIABLES, "too few variables specified")
        };
        return Err(CommandError::new(ErrorKind::Parse, code, msg));
    }
    if max.is_some_and(|m| vars.len() > m) {
        return Err(CommandError::new(ErrorKind::Parse, rc::TOO_MANY_VARIABLES, "too many variables specified")
            .with_fragment(vars.join(" ")));
    }
    Ok(())
}

/// Resolve one name: exact match, else a unique abbreviation
pub(crate) fn resolve_name(data: &Dataset, token: &str) -> Result<String, CommandError> {
    if data.position(token).is_some() {
        return Ok(token.to_string());
    }
    let candidates: Vec<&str> = data.names().filter(|n| n.starts_with(token)).collect();
    match candidates.as_slice() {
        [only] => Ok((*only).to_string()),
        [] => Err(CommandError::resolution(format!("variable {} not found", token)).with_fragment(token)),
        _ => Err(CommandError::resolution(format!("{} ambiguous abbreviation", token)).with_fragment(token)),
    }
}

/// Expand wildcards (`x*`, `x?`), ranges (`x1-x5`), `_all` and
/// abbreviations against the dataset. A token that matches nothing fails.
pub(crate) fn expand_varlist(data: &Dataset, tokens: &[String]) -> Result<Vec<String>, CommandError> {
    let mut out = Vec::new();
    for token in tokens {
        if token == "_all" {
            out.extend(data.names().map(String::from));
        } else if token.contains(['*', '?']) {
            let pattern = glob::Pattern::new(token)
                .map_err(|e| CommandError::parse(e.to_string()).with_fragment(token.clone()))?;
            let before = out.len();
            out.extend(data.names().filter(|n| pattern.matches(n)).map(String::from));
            if out.len() == before {
                return Err(CommandError::resolution(format!("variable {} not found", token)).with_fragment(token.clone()));
            }
        } else if let Some((from, to)) = token.split_once('-').filter(|(a, b)| !a.is_empty() && !b.is_empty()) {
            let (from, to) = (resolve_name(data, from)?, resolve_name(data, to)?);
            let (start, end) = (data.position(&from), data.position(&to));
            match (start, end) {
                (Some(s), Some(e)) if s <= e => {
                    out.extend(data.variables()[s..=e].iter().map(|v| v.name.clone()));
                }
                _ => {
                    return Err(CommandError::parse(format!("variable range {} invalid", token))
                        .with_fragment(token.clone()))
                }
            }
        } else {
            out.push(resolve_name(data, token)?);
        }
    }
    tracing::debug!(tokens = ?tokens, expanded = ?out, "expanded varlist");
    Ok(out)
}

/// A name for a variable about to be created
pub(crate) fn new_name(data: &Dataset, name: &str) -> Result<String, CommandError> {
    validate_name(name)?;
    if data.position(name).is_some() {
        return Err(CommandError::new(ErrorKind::State, rc::ALREADY_DEFINED, format!("variable {} already defined", name))
            .with_fragment(name));
    }
    Ok(name.to_string())
}

pub(crate) fn parse_exp(text: &str) -> Result<Expr, CommandError> {
    parse_expr(text).map_err(|e| CommandError::from(e).with_fragment(text))
}

/// Evaluate a numeric expression for every observation
pub(crate) fn numeric_values_of(
    evaluator: &Evaluator<'_>,
    expr: &Expr,
    what: &str,
) -> Result<Vec<Option<f64>>, CommandError> {
    if evaluator.infer(expr)? != VarType::Numeric {
        return Err(CommandError::new(ErrorKind::Resolution, rc::TYPE_MISMATCH, format!("{} must be numeric", what)));
    }
    Ok(evaluator.values(expr)?.iter().map(Value::as_num).collect())
}

/// Values of a numeric variable at the given rows
pub(crate) fn numeric_column(data: &Dataset, name: &str, rows: &[usize]) -> Result<Vec<Option<f64>>, CommandError> {
    let column = data.column(name)?;
    if column.var_type() != VarType::Numeric {
        return Err(CommandError::new(ErrorKind::Resolution, rc::TYPE_MISMATCH, format!("{} is a string variable", name))
            .with_fragment(name));
    }
    Ok(rows.iter().map(|&r| column.num(r)).collect())
}

/// Group keys in display order
pub(crate) fn sorted_levels<K: Ord + Clone>(keys: impl IntoIterator<Item = K>) -> Vec<K> {
    let mut levels: Vec<K> = keys.into_iter().collect();
    levels.sort();
    levels.dedup();
    levels
}

/// `name(g1, replace)` -> `g1`
pub(crate) fn first_word(value: &str) -> String {
    let head = value.split(',').next().unwrap_or("");
    crate::command::unquote(head).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Variable;

    fn data() -> Dataset {
        Dataset::from_variables(vec![
            Variable::numeric("x1", vec![Some(1.0)]),
            Variable::numeric("x2", vec![Some(2.0)]),
            Variable::numeric("x3", vec![Some(3.0)]),
            Variable::string("make", vec!["a".into()]),
            Variable::numeric("price", vec![Some(4.0)]),
        ])
        .unwrap()
    }

    fn expand(tokens: &[&str]) -> Result<Vec<String>, CommandError> {
        let tokens: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
        expand_varlist(&data(), &tokens)
    }

    #[test]
    fn verbs_resolve_with_abbreviations() {
        assert_eq!(Verb::resolve("reg"), Some(Verb::Regress));
        assert_eq!(Verb::resolve("su"), Some(Verb::Summarize));
        assert_eq!(Verb::resolve("sum"), Some(Verb::Summarize));
        assert_eq!(Verb::resolve("gen"), Some(Verb::Generate));
        assert_eq!(Verb::resolve("g"), Some(Verb::Generate));
        assert_eq!(Verb::resolve("d"), Some(Verb::Describe));
        assert_eq!(Verb::resolve("di"), Some(Verb::Display));
        assert_eq!(Verb::resolve("est"), Some(Verb::Estimates));
        assert_eq!(Verb::resolve("ivreg2"), Some(Verb::Ivregress));
        assert_eq!(Verb::resolve("var"), Some(Verb::Var));
        assert_eq!(Verb::resolve("hist"), Some(Verb::Histogram));
        assert_eq!(Verb::resolve("la"), Some(Verb::Label));
        assert_eq!(Verb::resolve("ta"), Some(Verb::Tabulate));
        assert_eq!(Verb::resolve("tab"), Some(Verb::Tabulate));
        assert_eq!(Verb::resolve("l"), Some(Verb::List));
        assert_eq!(Verb::resolve("t"), None);
        assert_eq!(Verb::resolve("xtlogit"), Some(Verb::Xtlogit));
        assert_eq!(Verb::resolve("lgraph"), Some(Verb::Lgraph));
        assert_eq!(Verb::resolve("rep"), None);
        assert_eq!(Verb::resolve("frobnicate"), None);
    }

    #[test]
    fn every_verb_has_a_spec() {
        for (_, _, verb) in VERBS {
            let _ = verb.spec();
        }
        assert!(Verb::Regress.is_estimation());
        assert!(!Verb::Summarize.is_estimation());
        assert!(Verb::Generate.spec().mutates);
        assert!(!Verb::List.spec().mutates);
    }

    #[test]
    fn wildcards_and_ranges_expand_in_dataset_order() {
        assert_eq!(expand(&["x*"]).unwrap(), vec!["x1", "x2", "x3"]);
        assert_eq!(expand(&["x?", "make"]).unwrap(), vec!["x1", "x2", "x3", "make"]);
        assert_eq!(expand(&["x2-price"]).unwrap(), vec!["x2", "x3", "make", "price"]);
        assert_eq!(expand(&["_all"]).unwrap().len(), 5);
    }

    #[test]
    fn unmatched_patterns_fail() {
        let err = expand(&["z*"]).unwrap_err();
        assert_eq!((err.kind, err.code), (ErrorKind::Resolution, 111));
        assert_eq!(expand(&["x3-x1"]).unwrap_err().code, 198);
    }

    #[test]
    fn abbreviations_must_be_unique() {
        assert_eq!(expand(&["pr"]).unwrap(), vec!["price"]);
        let err = expand(&["x"]).unwrap_err();
        assert!(err.message.contains("ambiguous"));
    }

    #[test]
    fn options_are_checked_against_the_spec() {
        let spec = Verb::Summarize.spec();
        let mut cmd = crate::command::parse("summarize x, det").unwrap();
        spec.check(Verb::Summarize, &mut cmd).unwrap();
        assert!(cmd.options.has("detail"));

        let mut cmd = crate::command::parse("summarize x, bogus").unwrap();
        let err = spec.check(Verb::Summarize, &mut cmd).unwrap_err();
        assert_eq!(err.code, 198);
        assert_eq!(err.fragment.as_deref(), Some("bogus"));

        let mut cmd = crate::command::parse("reshape long inc, i(id)").unwrap();
        assert!(Verb::Reshape.spec().check(Verb::Reshape, &mut cmd).is_err());

        let mut cmd = crate::command::parse("sort x using f").unwrap();
        assert_eq!(Verb::Sort.spec().check(Verb::Sort, &mut cmd).unwrap_err().code, 101);
    }
}
