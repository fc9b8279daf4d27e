//! The in-memory dataset
//!
//! A `Dataset` is an ordered list of equally long columns plus the label
//! sets and panel metadata that travel with it. Every mutating operation
//! either completes or leaves the dataset as it was.

mod combine;
mod labels;
mod reshape;

pub use combine::{MergeKind, MergeOptions, MergeOutcome, MergeReport};
pub use labels::LabelSet;
pub use reshape::{ReshapeDirection, ReshapeSpec};

use crate::ast::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Longest variable name Stata accepts
pub const MAX_NAME_LEN: usize = 32;

const RESERVED_NAMES: &[&str] = &[
    "_all", "_b", "_coef", "_cons", "_n", "_N", "_pi", "_pred", "_rc", "_se", "_skip", "byte",
    "double", "float", "if", "in", "int", "long", "using", "with",
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DatasetError {
    #[error("variable {0} not found")]
    VariableNotFound(String),
    #[error("variable {0} already defined")]
    VariableExists(String),
    #[error("{0} invalid name")]
    InvalidName(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("variable {name} has {got} observations, dataset has {expected}")]
    LengthMismatch { name: String, expected: usize, got: usize },
    #[error("value label {0} not found")]
    LabelNotFound(String),
    #[error("{keys} do not uniquely identify observations in the {side} data")]
    NotUnique { keys: String, side: &'static str },
    #[error("{0}")]
    Panel(String),
    #[error("{0}")]
    Reshape(String),
    #[error("{0}")]
    Invalid(String),
}

/// Declared storage type of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    Numeric,
    Str,
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarType::Numeric => write!(f, "numeric"),
            VarType::Str => write!(f, "string"),
        }
    }
}

/// Column storage. Numeric missing is `None`; string missing is `""`.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<Option<f64>>),
    Str(Vec<String>),
}

impl Column {
    /// A column of `n` missing values
    pub fn missing(var_type: VarType, n: usize) -> Column {
        match var_type {
            VarType::Numeric => Column::Numeric(vec![None; n]),
            VarType::Str => Column::Str(vec![String::new(); n]),
        }
    }

    /// Build a column from evaluated values; all must share one type
    pub fn from_values(var_type: VarType, values: Vec<Value>) -> Result<Column, DatasetError> {
        let mut column = Column::missing(var_type, 0);
        for value in values {
            column.push(value)?;
        }
        Ok(column)
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn var_type(&self) -> VarType {
        match self {
            Column::Numeric(_) => VarType::Numeric,
            Column::Str(_) => VarType::Str,
        }
    }

    pub fn get(&self, row: usize) -> Value {
        match self {
            Column::Numeric(v) => Value::from_opt(v.get(row).copied().flatten()),
            Column::Str(v) => Value::Str(v.get(row).cloned().unwrap_or_default()),
        }
    }

    /// The missing value of this column's type
    pub fn missing_value(&self) -> Value {
        match self {
            Column::Numeric(_) => Value::Missing,
            Column::Str(_) => Value::Str(String::new()),
        }
    }

    /// Numeric value at `row`; `None` for missing and for strings
    pub fn num(&self, row: usize) -> Option<f64> {
        match self {
            Column::Numeric(v) => v.get(row).copied().flatten(),
            Column::Str(_) => None,
        }
    }

    pub fn is_missing(&self, row: usize) -> bool {
        match self {
            Column::Numeric(v) => v.get(row).map_or(true, |x| x.is_none()),
            Column::Str(v) => v.get(row).map_or(true, |s| s.is_empty()),
        }
    }

    pub fn set(&mut self, row: usize, value: Value) -> Result<(), DatasetError> {
        match (self, value) {
            (Column::Numeric(v), Value::Num(n)) => v[row] = Some(n),
            (Column::Numeric(v), Value::Missing) => v[row] = None,
            (Column::Str(v), Value::Str(s)) => v[row] = s,
            (Column::Str(_), Value::Num(_) | Value::Missing) => {
                return Err(DatasetError::TypeMismatch("numeric value for string variable".into()))
            }
            (Column::Numeric(_), Value::Str(_)) => {
                return Err(DatasetError::TypeMismatch("string value for numeric variable".into()))
            }
        }
        Ok(())
    }

    pub fn push(&mut self, value: Value) -> Result<(), DatasetError> {
        match self {
            Column::Numeric(v) => v.push(None),
            Column::Str(v) => v.push(String::new()),
        }
        let row = self.len() - 1;
        self.set(row, value).map_err(|e| {
            self.truncate(row);
            e
        })
    }

    pub fn push_missing(&mut self) {
        match self {
            Column::Numeric(v) => v.push(None),
            Column::Str(v) => v.push(String::new()),
        }
    }

    fn truncate(&mut self, len: usize) {
        match self {
            Column::Numeric(v) => v.truncate(len),
            Column::Str(v) => v.truncate(len),
        }
    }

    /// Gather rows by index; `None` yields a missing value
    pub fn gather(&self, rows: &[Option<usize>]) -> Column {
        match self {
            Column::Numeric(v) => {
                Column::Numeric(rows.iter().map(|r| r.and_then(|i| v[i])).collect())
            }
            Column::Str(v) => Column::Str(
                rows.iter()
                    .map(|r| r.map(|i| v[i].clone()).unwrap_or_default())
                    .collect(),
            ),
        }
    }

    pub fn select(&self, rows: &[usize]) -> Column {
        match self {
            Column::Numeric(v) => Column::Numeric(rows.iter().map(|&i| v[i]).collect()),
            Column::Str(v) => Column::Str(rows.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    /// Append another column of the same type
    pub fn extend(&mut self, other: &Column) -> Result<(), DatasetError> {
        match (self, other) {
            (Column::Numeric(a), Column::Numeric(b)) => a.extend_from_slice(b),
            (Column::Str(a), Column::Str(b)) => a.extend(b.iter().cloned()),
            _ => return Err(DatasetError::TypeMismatch("cannot combine string and numeric".into())),
        }
        Ok(())
    }

    /// Longest string in the column (at least 1), used for `str#` types
    pub fn str_width(&self) -> usize {
        match self {
            Column::Str(v) => v.iter().map(|s| s.chars().count()).max().unwrap_or(0).max(1),
            Column::Numeric(_) => 0,
        }
    }
}

/// A named column with its metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub label: Option<String>,
    /// Name of the attached value-label set (need not be defined yet)
    pub value_label: Option<String>,
    /// Display format such as `%9.0g` or `%10s`
    pub format: String,
    pub data: Column,
}

impl Variable {
    pub fn new(name: impl Into<String>, data: Column) -> Self {
        let format = default_format(&data);
        Variable { name: name.into(), label: None, value_label: None, format, data }
    }

    pub fn numeric(name: impl Into<String>, data: Vec<Option<f64>>) -> Self {
        Variable::new(name, Column::Numeric(data))
    }

    pub fn string(name: impl Into<String>, data: Vec<String>) -> Self {
        Variable::new(name, Column::Str(data))
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn var_type(&self) -> VarType {
        self.data.var_type()
    }

    pub fn is_numeric(&self) -> bool {
        self.var_type() == VarType::Numeric
    }

    /// Stata storage type name: `double` or `str#`
    pub fn storage_type(&self) -> String {
        match &self.data {
            Column::Numeric(_) => "double".to_string(),
            Column::Str(_) => format!("str{}", self.data.str_width()),
        }
    }
}

/// Default display format for a column
pub fn default_format(data: &Column) -> String {
    match data {
        Column::Numeric(_) => "%10.0g".to_string(),
        Column::Str(_) => format!("%{}s", data.str_width().max(9)),
    }
}

/// Check a new variable name against Stata's rules
pub fn validate_name(name: &str) -> Result<(), DatasetError> {
    if !crate::command::is_name(name)
        || name.len() > MAX_NAME_LEN
        || RESERVED_NAMES.contains(&name)
    {
        return Err(DatasetError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// A totally ordered float for grouping keys
#[derive(Debug, Clone, Copy)]
pub struct OrdF64(pub f64);

impl PartialEq for OrdF64 {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrdF64 {}

impl PartialOrd for OrdF64 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdF64 {
    fn cmp(&self, other: &Self) -> Ordering {
        // normalise -0.0 so it groups with 0.0
        (self.0 + 0.0).total_cmp(&(other.0 + 0.0))
    }
}

impl Hash for OrdF64 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.0 + 0.0).to_bits().hash(state)
    }
}

/// One cell as a sort/group key. Numbers sort before missing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Num(OrdF64),
    Missing,
    Str(String),
}

impl Key {
    pub fn from_value(value: Value) -> Key {
        match value {
            Value::Num(n) => Key::Num(OrdF64(n)),
            Value::Missing => Key::Missing,
            Value::Str(s) => Key::Str(s),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Num(n) => Value::Num(n.0),
            Key::Missing => Value::Missing,
            Key::Str(s) => Value::Str(s.clone()),
        }
    }

    pub fn is_missing(&self) -> bool {
        match self {
            Key::Missing => true,
            Key::Str(s) => s.is_empty(),
            Key::Num(_) => false,
        }
    }
}

/// Panel/time-series settings from `xtset`/`tsset`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelSpec {
    pub panel: Option<String>,
    pub time: Option<String>,
}

/// The dataset: ordered variables of equal length
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    vars: Vec<Variable>,
    nobs: usize,
    labels: BTreeMap<String, LabelSet>,
    panel: Option<PanelSpec>,
    sorted_by: Vec<String>,
    changed: bool,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dataset from variables, checking names and lengths
    pub fn from_variables(vars: Vec<Variable>) -> Result<Dataset, DatasetError> {
        let mut ds = Dataset::new();
        if let Some(first) = vars.first() {
            ds.nobs = first.data.len();
        }
        for var in vars {
            ds.add_variable(var)?;
        }
        ds.changed = false;
        Ok(ds)
    }

    pub fn nobs(&self) -> usize {
        self.nobs
    }

    pub fn nvars(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty() && self.nobs == 0
    }

    pub fn variables(&self) -> &[Variable] {
        &self.vars
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(|v| v.name.as_str())
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.vars.iter().position(|v| v.name == name)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.vars.iter().find(|v| v.name == name)
    }

    pub fn variable_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.changed = true;
        self.vars.iter_mut().find(|v| v.name == name)
    }

    /// Look up a variable or fail with `VariableNotFound`
    pub fn require(&self, name: &str) -> Result<&Variable, DatasetError> {
        self.variable(name)
            .ok_or_else(|| DatasetError::VariableNotFound(name.to_string()))
    }

    pub fn column(&self, name: &str) -> Result<&Column, DatasetError> {
        self.require(name).map(|v| &v.data)
    }

    /// True if data changed since it was loaded or saved
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn mark_saved(&mut self) {
        self.changed = false;
    }

    pub fn sorted_by(&self) -> &[String] {
        &self.sorted_by
    }

    pub fn value(&self, name: &str, row: usize) -> Result<Value, DatasetError> {
        Ok(self.column(name)?.get(row))
    }

    pub fn set_value(&mut self, name: &str, row: usize, value: Value) -> Result<(), DatasetError> {
        let nobs = self.nobs;
        let var = self
            .variable_mut(name)
            .ok_or_else(|| DatasetError::VariableNotFound(name.to_string()))?;
        if row >= nobs {
            return Err(DatasetError::Invalid(format!("observation {} out of range", row + 1)));
        }
        var.data.set(row, value)?;
        self.sorted_by.retain(|s| s != name);
        Ok(())
    }

    /// Add a variable at the end
    pub fn add_variable(&mut self, var: Variable) -> Result<(), DatasetError> {
        validate_name(&var.name)?;
        if self.position(&var.name).is_some() {
            return Err(DatasetError::VariableExists(var.name));
        }
        if self.vars.is_empty() && self.nobs == 0 {
            self.nobs = var.data.len();
        }
        if var.data.len() != self.nobs {
            return Err(DatasetError::LengthMismatch {
                name: var.name,
                expected: self.nobs,
                got: var.data.len(),
            });
        }
        self.vars.push(var);
        self.changed = true;
        Ok(())
    }

    /// Replace the data of an existing variable, keeping its metadata
    pub fn replace_column(&mut self, name: &str, data: Column) -> Result<(), DatasetError> {
        let nobs = self.nobs;
        if data.len() != nobs {
            return Err(DatasetError::LengthMismatch {
                name: name.to_string(),
                expected: nobs,
                got: data.len(),
            });
        }
        let var = self
            .variable_mut(name)
            .ok_or_else(|| DatasetError::VariableNotFound(name.to_string()))?;
        if var.var_type() != data.var_type() {
            var.format = default_format(&data);
        }
        var.data = data;
        self.sorted_by.retain(|s| s != name);
        Ok(())
    }

    /// Move a variable to sit right after another
    pub fn move_after(&mut self, name: &str, after: &str) -> Result<(), DatasetError> {
        let from = self
            .position(name)
            .ok_or_else(|| DatasetError::VariableNotFound(name.to_string()))?;
        let var = self.vars.remove(from);
        let to = self.position(after).map(|p| p + 1).unwrap_or(self.vars.len());
        self.vars.insert(to, var);
        Ok(())
    }

    /// Move a variable to sit right before another
    pub fn move_before(&mut self, name: &str, before: &str) -> Result<(), DatasetError> {
        let from = self
            .position(name)
            .ok_or_else(|| DatasetError::VariableNotFound(name.to_string()))?;
        let var = self.vars.remove(from);
        let to = self.position(before).unwrap_or(0);
        self.vars.insert(to, var);
        Ok(())
    }

    /// Drop variables by name; fails without changes if any is unknown
    pub fn drop_variables(&mut self, names: &[String]) -> Result<(), DatasetError> {
        for name in names {
            self.require(name)?;
        }
        self.vars.retain(|v| !names.contains(&v.name));
        if self.vars.is_empty() {
            self.nobs = 0;
        }
        self.sorted_by.retain(|s| !names.contains(s));
        let refers = |v: &Option<String>| v.as_ref().is_some_and(|n| names.contains(n));
        let clears = self
            .panel
            .as_ref()
            .is_some_and(|spec| refers(&spec.panel) || refers(&spec.time));
        if clears {
            tracing::debug!("panel variable dropped, clearing xtset");
            self.panel = None;
        }
        self.changed = true;
        Ok(())
    }

    /// Keep only the named variables, in dataset order
    pub fn keep_variables(&mut self, names: &[String]) -> Result<(), DatasetError> {
        let dropped: Vec<String> = self
            .vars
            .iter()
            .filter(|v| !names.contains(&v.name))
            .map(|v| v.name.clone())
            .collect();
        for name in names {
            self.require(name)?;
        }
        self.drop_variables(&dropped)
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), DatasetError> {
        validate_name(new)?;
        if old == new {
            return self.require(old).map(|_| ());
        }
        if self.position(new).is_some() {
            return Err(DatasetError::VariableExists(new.to_string()));
        }
        let var = self
            .variable_mut(old)
            .ok_or_else(|| DatasetError::VariableNotFound(old.to_string()))?;
        var.name = new.to_string();

        for s in self.sorted_by.iter_mut().filter(|s| s.as_str() == old) {
            *s = new.to_string();
        }
        if let Some(spec) = &mut self.panel {
            for slot in [&mut spec.panel, &mut spec.time] {
                if slot.as_deref() == Some(old) {
                    *slot = Some(new.to_string());
                }
            }
        }
        Ok(())
    }

    /// Keep rows where `mask` is true, preserving order
    pub fn retain_rows(&mut self, mask: &[bool]) {
        let rows: Vec<usize> = (0..self.nobs).filter(|&i| mask.get(i).copied().unwrap_or(false)).collect();
        if rows.len() == self.nobs {
            return;
        }
        for var in &mut self.vars {
            var.data = var.data.select(&rows);
        }
        self.nobs = rows.len();
        self.changed = true;
    }

    /// Reorder rows: row `i` of the result is old row `order[i]`
    pub fn permute(&mut self, order: &[usize]) {
        for var in &mut self.vars {
            var.data = var.data.select(order);
        }
        self.nobs = order.len();
        self.changed = true;
    }

    /// Append `n` observations with missing values
    pub fn add_observations(&mut self, n: usize) {
        for var in &mut self.vars {
            for _ in 0..n {
                var.data.push_missing();
            }
        }
        self.nobs += n;
        self.changed = true;
    }

    /// Key tuple of one row over the given columns
    pub fn row_key(&self, columns: &[&Column], row: usize) -> Vec<Key> {
        columns.iter().map(|c| Key::from_value(c.get(row))).collect()
    }

    /// Key tuples for every row
    pub fn row_keys(&self, names: &[String]) -> Result<Vec<Vec<Key>>, DatasetError> {
        let columns = names
            .iter()
            .map(|n| self.column(n))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((0..self.nobs).map(|row| self.row_key(&columns, row)).collect())
    }

    /// Stable sort ascending; numeric missing sorts last
    pub fn sort_by(&mut self, names: &[String]) -> Result<(), DatasetError> {
        let keys = self.row_keys(names)?;
        let mut order: Vec<usize> = (0..self.nobs).collect();
        order.sort_by(|&a, &b| keys[a].cmp(&keys[b]));
        self.permute(&order);
        self.sorted_by = names.to_vec();
        Ok(())
    }

    /// True if rows are already ordered by `names`
    pub fn is_sorted_by(&self, names: &[String]) -> Result<bool, DatasetError> {
        let keys = self.row_keys(names)?;
        Ok(keys.windows(2).all(|w| w[0] <= w[1]))
    }

    /// Record a sort order read from a file; ignored unless the rows
    /// really are in that order
    pub fn restore_sort_marker(&mut self, names: Vec<String>) {
        if !names.is_empty() && self.is_sorted_by(&names).unwrap_or(false) {
            self.sorted_by = names;
        }
    }

    // Value labels

    pub fn label_sets(&self) -> &BTreeMap<String, LabelSet> {
        &self.labels
    }

    pub fn label_set(&self, name: &str) -> Option<&LabelSet> {
        self.labels.get(name)
    }

    /// `label define`: create a set, or extend one with `modify`/`add`
    pub fn define_label(
        &mut self,
        name: &str,
        entries: Vec<(i64, String)>,
        modify: bool,
    ) -> Result<(), DatasetError> {
        validate_name(name)?;
        if self.labels.contains_key(name) && !modify {
            return Err(DatasetError::Invalid(format!("label {} already defined", name)));
        }
        let set = self.labels.entry(name.to_string()).or_default();
        for (code, text) in entries {
            set.insert(code, text);
        }
        self.changed = true;
        Ok(())
    }

    pub fn drop_label(&mut self, name: &str) -> Result<(), DatasetError> {
        if name == "_all" {
            self.labels.clear();
        } else if self.labels.remove(name).is_none() {
            return Err(DatasetError::LabelNotFound(name.to_string()));
        }
        self.changed = true;
        Ok(())
    }

    pub fn insert_label_set(&mut self, name: String, set: LabelSet) {
        self.labels.insert(name, set);
    }

    /// Attach (or with `None`, detach) a value-label set
    pub fn attach_label(&mut self, var: &str, set: Option<&str>) -> Result<(), DatasetError> {
        let var = self
            .variable_mut(var)
            .ok_or_else(|| DatasetError::VariableNotFound(var.to_string()))?;
        if !var.is_numeric() && set.is_some() {
            return Err(DatasetError::TypeMismatch(format!(
                "may not label string variable {}",
                var.name
            )));
        }
        var.value_label = set.map(String::from);
        Ok(())
    }

    /// Display text of a numeric value through the variable's label set
    pub fn labelled(&self, var: &Variable, value: f64) -> Option<&str> {
        if value.fract() != 0.0 {
            return None;
        }
        var.value_label
            .as_deref()
            .and_then(|set| self.labels.get(set))
            .and_then(|set| set.get(value as i64))
    }

    // Panel metadata

    pub fn panel_spec(&self) -> Option<&PanelSpec> {
        self.panel.as_ref()
    }

    /// Set panel metadata after validating it against the data
    pub fn set_panel(&mut self, spec: PanelSpec) -> Result<(), DatasetError> {
        let previous = self.panel.replace(spec);
        if let Err(e) = self.validated_panel() {
            self.panel = previous;
            return Err(e);
        }
        Ok(())
    }

    pub fn clear_panel(&mut self) {
        self.panel = None;
    }

    /// Panel metadata, re-checked against the current data
    pub fn validated_panel(&self) -> Result<&PanelSpec, DatasetError> {
        let spec = self.panel.as_ref().ok_or_else(|| {
            DatasetError::Panel("panel variable not set; use xtset or tsset".into())
        })?;
        for name in spec.panel.iter().chain(spec.time.iter()) {
            let var = self.variable(name).ok_or_else(|| {
                DatasetError::Panel(format!("xtset variable {} no longer exists", name))
            })?;
            if !var.is_numeric() {
                return Err(DatasetError::Panel(format!("{} must be numeric", name)));
            }
        }

        if let Some(time) = &spec.time {
            let time = self.column(time)?;
            let panel = spec.panel.as_deref().map(|p| self.column(p)).transpose()?;
            let mut last: HashMap<Key, f64> = HashMap::new();
            for row in 0..self.nobs {
                let Some(t) = time.num(row) else { continue };
                let key = panel.map(|p| Key::from_value(p.get(row))).unwrap_or(Key::Missing);
                if let Some(&prev) = last.get(&key) {
                    if t <= prev {
                        return Err(DatasetError::Panel(format!(
                            "time values not strictly increasing within panel at observation {}; sort the data first",
                            row + 1
                        )));
                    }
                }
                last.insert(key, t);
            }
        }
        Ok(spec)
    }

    /// Time variable of validated metadata (for time-series operators)
    pub fn time_spec(&self) -> Result<(Option<&str>, &str), DatasetError> {
        let spec = self.validated_panel()?;
        let time = spec.time.as_deref().ok_or_else(|| {
            DatasetError::Panel("time variable not set; use tsset or xtset panelvar timevar".into())
        })?;
        Ok((spec.panel.as_deref(), time))
    }
}
