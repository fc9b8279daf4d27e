//! Combining datasets: merge, append, cross, joinby
//!
//! Each operation builds the full result before touching `self`, so a
//! failure leaves the master data unchanged.

use super::{validate_name, Column, Dataset, DatasetError, Key, LabelSet, Variable};
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl MergeKind {
    pub fn parse(text: &str) -> Option<MergeKind> {
        match text.to_lowercase().as_str() {
            "1:1" => Some(MergeKind::OneToOne),
            "1:m" => Some(MergeKind::OneToMany),
            "m:1" => Some(MergeKind::ManyToOne),
            "m:m" => Some(MergeKind::ManyToMany),
            _ => None,
        }
    }

    fn master_unique(self) -> bool {
        matches!(self, MergeKind::OneToOne | MergeKind::OneToMany)
    }

    fn using_unique(self) -> bool {
        matches!(self, MergeKind::OneToOne | MergeKind::ManyToOne)
    }
}

impl fmt::Display for MergeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MergeKind::OneToOne => "1:1",
            MergeKind::OneToMany => "1:m",
            MergeKind::ManyToOne => "m:1",
            MergeKind::ManyToMany => "m:m",
        };
        write!(f, "{}", s)
    }
}

/// Classification of a merged row, stored in `_merge`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    MasterOnly,
    UsingOnly,
    Matched,
}

impl MergeOutcome {
    pub fn code(self) -> f64 {
        match self {
            MergeOutcome::MasterOnly => 1.0,
            MergeOutcome::UsingOnly => 2.0,
            MergeOutcome::Matched => 3.0,
        }
    }

    /// Words accepted by `keep()`
    pub fn parse(word: &str) -> Option<MergeOutcome> {
        match word {
            "master" | "1" => Some(MergeOutcome::MasterOnly),
            "using" | "2" => Some(MergeOutcome::UsingOnly),
            "match" | "matched" | "3" => Some(MergeOutcome::Matched),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOptions {
    pub kind: MergeKind,
    pub keys: Vec<String>,
    /// Outcomes to keep; `None` keeps all rows
    pub keep: Option<Vec<MergeOutcome>>,
    /// Name of the indicator variable; `None` means `nogenerate`
    pub generate: Option<String>,
}

impl MergeOptions {
    pub fn new(kind: MergeKind, keys: Vec<String>) -> Self {
        MergeOptions { kind, keys, keep: None, generate: Some("_merge".to_string()) }
    }
}

/// Row counts by outcome, before any `keep()` filtering
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub master_only: usize,
    pub using_only: usize,
    pub matched: usize,
    pub indicator: Option<String>,
}

type Pair = (Option<usize>, Option<usize>, MergeOutcome);

fn merge_labels() -> LabelSet {
    LabelSet::from_entries([
        (1, "Master only (1)".to_string()),
        (2, "Using only (2)".to_string()),
        (3, "Matched (3)".to_string()),
    ])
}

fn with_data(var: &Variable, data: Column) -> Variable {
    Variable {
        name: var.name.clone(),
        label: var.label.clone(),
        value_label: var.value_label.clone(),
        format: var.format.clone(),
        data,
    }
}

fn ensure_unique(keys: &[Vec<Key>], names: &[String], side: &'static str) -> Result<(), DatasetError> {
    let mut seen = HashSet::with_capacity(keys.len());
    for key in keys {
        if !seen.insert(key) {
            return Err(DatasetError::NotUnique { keys: names.join(" "), side });
        }
    }
    Ok(())
}

fn group_rows(keys: &[Vec<Key>]) -> HashMap<&[Key], Vec<usize>> {
    let mut groups: HashMap<&[Key], Vec<usize>> = HashMap::new();
    for (row, key) in keys.iter().enumerate() {
        groups.entry(key.as_slice()).or_default().push(row);
    }
    groups
}

impl Dataset {
    /// Key variables must exist on both sides with the same type
    fn check_keys(&self, using: &Dataset, keys: &[String]) -> Result<(), DatasetError> {
        if keys.is_empty() {
            return Err(DatasetError::Invalid("key variables required".into()));
        }
        for key in keys {
            let master = self.require(key)?;
            let other = using.variable(key).ok_or_else(|| {
                DatasetError::VariableNotFound(format!("{} in using data", key))
            })?;
            if master.var_type() != other.var_type() {
                return Err(DatasetError::TypeMismatch(format!(
                    "key variable {} is {} in master but {} in using data",
                    key,
                    master.var_type(),
                    other.var_type()
                )));
            }
        }
        Ok(())
    }

    fn merged_label_sets(&self, using: &Dataset) -> std::collections::BTreeMap<String, LabelSet> {
        let mut labels = self.labels.clone();
        for (name, set) in &using.labels {
            labels.entry(name.clone()).or_insert_with(|| set.clone());
        }
        labels
    }

    /// `merge kind keys using`: match observations on key variables
    pub fn merge(&mut self, using: &Dataset, opts: &MergeOptions) -> Result<MergeReport, DatasetError> {
        self.check_keys(using, &opts.keys)?;
        if let Some(name) = &opts.generate {
            validate_name(name)?;
            if self.position(name).is_some() || using.position(name).is_some() {
                return Err(DatasetError::VariableExists(name.clone()));
            }
        }

        let master_keys = self.row_keys(&opts.keys)?;
        let using_keys = using.row_keys(&opts.keys)?;
        if opts.kind.master_unique() {
            ensure_unique(&master_keys, &opts.keys, "master")?;
        }
        if opts.kind.using_unique() {
            ensure_unique(&using_keys, &opts.keys, "using")?;
        }

        let master_groups = group_rows(&master_keys);
        let using_groups = group_rows(&using_keys);

        let mut pairs: Vec<Pair> = Vec::with_capacity(self.nobs.max(using.nobs));
        let mut rank: HashMap<&[Key], usize> = HashMap::new();

        for (row, key) in master_keys.iter().enumerate() {
            let Some(urows) = using_groups.get(key.as_slice()) else {
                pairs.push((Some(row), None, MergeOutcome::MasterOnly));
                continue;
            };
            match opts.kind {
                MergeKind::OneToMany => {
                    for &u in urows {
                        pairs.push((Some(row), Some(u), MergeOutcome::Matched));
                    }
                }
                MergeKind::ManyToMany => {
                    // k-th master row pairs with k-th using row; the shorter
                    // group repeats its last row, and the longer using group's
                    // surplus follows the group's last master row
                    let k = rank.entry(key.as_slice()).or_insert(0);
                    pairs.push((Some(row), Some(urows[(*k).min(urows.len() - 1)]), MergeOutcome::Matched));
                    *k += 1;
                    let group_len = master_groups.get(key.as_slice()).map_or(0, Vec::len);
                    if *k == group_len && urows.len() > group_len {
                        for &u in &urows[group_len..] {
                            pairs.push((Some(row), Some(u), MergeOutcome::Matched));
                        }
                    }
                }
                MergeKind::OneToOne | MergeKind::ManyToOne => {
                    pairs.push((Some(row), Some(urows[0]), MergeOutcome::Matched));
                }
            }
        }
        for (row, key) in using_keys.iter().enumerate() {
            if !master_groups.contains_key(key.as_slice()) {
                pairs.push((None, Some(row), MergeOutcome::UsingOnly));
            }
        }

        let count = |outcome| pairs.iter().filter(|p| p.2 == outcome).count();
        let report = MergeReport {
            master_only: count(MergeOutcome::MasterOnly),
            using_only: count(MergeOutcome::UsingOnly),
            matched: count(MergeOutcome::Matched),
            indicator: opts.generate.clone(),
        };

        if let Some(keep) = &opts.keep {
            pairs.retain(|p| keep.contains(&p.2));
        }

        let master_rows: Vec<Option<usize>> = pairs.iter().map(|p| p.0).collect();
        let using_rows: Vec<Option<usize>> = pairs.iter().map(|p| p.1).collect();

        let mut vars = Vec::with_capacity(self.vars.len() + using.vars.len() + 1);
        for var in &self.vars {
            let mut data = var.data.gather(&master_rows);
            // overlapping variables keep master values; using fills the rest
            if let Some(other) = using.variable(&var.name) {
                if other.var_type() == var.var_type() {
                    for (i, pair) in pairs.iter().enumerate() {
                        if let (None, Some(u)) = (pair.0, pair.1) {
                            data.set(i, other.data.get(u))?;
                        }
                    }
                }
            }
            vars.push(with_data(var, data));
        }
        for other in using.vars.iter().filter(|v| self.position(&v.name).is_none()) {
            vars.push(with_data(other, other.data.gather(&using_rows)));
        }

        let mut labels = self.merged_label_sets(using);
        if let Some(name) = &opts.generate {
            let mut indicator = Variable::numeric(
                name.clone(),
                pairs.iter().map(|p| Some(p.2.code())).collect(),
            );
            indicator.format = "%12.0g".to_string();
            indicator.value_label = Some(name.clone());
            vars.push(indicator);
            labels.insert(name.clone(), merge_labels());
        }

        tracing::debug!(
            kind = %opts.kind,
            matched = report.matched,
            master_only = report.master_only,
            using_only = report.using_only,
            "merge"
        );

        self.nobs = pairs.len();
        self.vars = vars;
        self.labels = labels;
        self.sorted_by.clear();
        self.changed = true;
        Ok(report)
    }

    /// `append using`: stack observations, padding absent variables with
    /// missing. A variable stored with different types fails unless
    /// `force`, which turns the using values of that variable missing.
    pub fn append(&mut self, using: &Dataset, force: bool) -> Result<(), DatasetError> {
        for other in &using.vars {
            if let Some(var) = self.variable(&other.name) {
                if var.var_type() != other.var_type() && !force {
                    return Err(DatasetError::TypeMismatch(format!(
                        "variable {} is {} in master but {} in using data",
                        other.name,
                        var.var_type(),
                        other.var_type()
                    )));
                }
            }
        }

        let n_master = self.nobs;
        let n_using = using.nobs;
        let mut vars = Vec::with_capacity(self.vars.len() + using.vars.len());
        for var in &self.vars {
            let mut data = var.data.clone();
            match using.variable(&var.name) {
                Some(other) if other.var_type() == var.var_type() => data.extend(&other.data)?,
                _ => data.extend(&Column::missing(var.var_type(), n_using))?,
            }
            vars.push(with_data(var, data));
        }
        for other in using.vars.iter().filter(|v| self.position(&v.name).is_none()) {
            let mut data = Column::missing(other.var_type(), n_master);
            data.extend(&other.data)?;
            vars.push(with_data(other, data));
        }

        self.labels = self.merged_label_sets(using);
        self.vars = vars;
        self.nobs = n_master + n_using;
        self.sorted_by.clear();
        self.changed = true;
        Ok(())
    }

    /// `cross using`: every pairwise combination of observations
    pub fn cross(&mut self, using: &Dataset) -> Result<(), DatasetError> {
        if let Some(shared) = using.vars.iter().find(|v| self.position(&v.name).is_some()) {
            return Err(DatasetError::VariableExists(shared.name.clone()));
        }
        let mut master_rows = Vec::with_capacity(self.nobs * using.nobs);
        let mut using_rows = Vec::with_capacity(self.nobs * using.nobs);
        for m in 0..self.nobs {
            for u in 0..using.nobs {
                master_rows.push(m);
                using_rows.push(u);
            }
        }
        let mut vars: Vec<Variable> = self
            .vars
            .iter()
            .map(|v| with_data(v, v.data.select(&master_rows)))
            .collect();
        vars.extend(using.vars.iter().map(|v| with_data(v, v.data.select(&using_rows))));

        self.labels = self.merged_label_sets(using);
        self.vars = vars;
        self.nobs = master_rows.len();
        self.sorted_by.clear();
        self.changed = true;
        Ok(())
    }

    /// `joinby keys using`: all pairwise combinations within key groups;
    /// unmatched observations are dropped
    pub fn joinby(&mut self, keys: &[String], using: &Dataset) -> Result<(), DatasetError> {
        self.check_keys(using, keys)?;
        let master_keys = self.row_keys(keys)?;
        let using_keys = using.row_keys(keys)?;
        let using_groups = group_rows(&using_keys);

        let mut master_rows = Vec::new();
        let mut using_rows = Vec::new();
        for (row, key) in master_keys.iter().enumerate() {
            if let Some(urows) = using_groups.get(key.as_slice()) {
                for &u in urows {
                    master_rows.push(row);
                    using_rows.push(u);
                }
            }
        }

        let mut vars: Vec<Variable> = self
            .vars
            .iter()
            .map(|v| with_data(v, v.data.select(&master_rows)))
            .collect();
        vars.extend(
            using
                .vars
                .iter()
                .filter(|v| self.position(&v.name).is_none())
                .map(|v| with_data(v, v.data.select(&using_rows))),
        );

        self.labels = self.merged_label_sets(using);
        self.vars = vars;
        self.nobs = master_rows.len();
        self.sorted_by.clear();
        self.changed = true;
        Ok(())
    }
}
