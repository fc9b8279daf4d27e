//! `reshape long` and `reshape wide`

use super::{validate_name, Column, Dataset, DatasetError, Key, VarType, Variable};
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReshapeDirection {
    Long,
    Wide,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReshapeSpec {
    pub direction: ReshapeDirection,
    /// Stub names: `inc` for `inc1990 inc1991 ...`
    pub stubs: Vec<String>,
    /// Variables identifying the wide-format unit
    pub i: Vec<String>,
    /// Variable holding the suffix in long format
    pub j: String,
    /// Suffixes are strings rather than integers
    pub string_j: bool,
}

/// Suffix value for `reshape long`, ordered numerically or lexically
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Suffix {
    Int(i64),
    Text(String),
}

impl Suffix {
    fn parse(text: &str, string_j: bool) -> Option<Suffix> {
        if text.is_empty() {
            None
        } else if string_j {
            Some(Suffix::Text(text.to_string()))
        } else {
            text.parse().ok().map(Suffix::Int)
        }
    }

    fn render(&self) -> String {
        match self {
            Suffix::Int(n) => n.to_string(),
            Suffix::Text(s) => s.clone(),
        }
    }
}

fn reshape_error(msg: impl Into<String>) -> DatasetError {
    DatasetError::Reshape(msg.into())
}

impl Dataset {
    pub fn reshape(&mut self, spec: &ReshapeSpec) -> Result<(), DatasetError> {
        if spec.stubs.is_empty() {
            return Err(reshape_error("no stub names specified"));
        }
        if spec.i.is_empty() {
            return Err(reshape_error("option i() required"));
        }
        for name in &spec.i {
            self.require(name)?;
        }
        let reshaped = match spec.direction {
            ReshapeDirection::Long => self.to_long(spec)?,
            ReshapeDirection::Wide => self.to_wide(spec)?,
        };
        tracing::debug!(nobs = reshaped.nobs, nvars = reshaped.vars.len(), "reshape");
        self.vars = reshaped.vars;
        self.nobs = reshaped.nobs;
        self.sorted_by.clear();
        self.panel = None;
        self.changed = true;
        Ok(())
    }

    fn ensure_unique_i(&self, i: &[String]) -> Result<(), DatasetError> {
        let keys = self.row_keys(i)?;
        let mut seen = HashSet::new();
        if keys.iter().any(|k| !seen.insert(k)) {
            return Err(reshape_error(format!(
                "variable id does not uniquely identify the observations: i({})",
                i.join(" ")
            )));
        }
        Ok(())
    }

    fn to_long(&self, spec: &ReshapeSpec) -> Result<Dataset, DatasetError> {
        if self.position(&spec.j).is_some() {
            return Err(DatasetError::VariableExists(spec.j.clone()));
        }
        validate_name(&spec.j)?;
        self.ensure_unique_i(&spec.i)?;

        // stub -> suffix -> variable position
        let mut members: Vec<HashMap<Suffix, usize>> = Vec::with_capacity(spec.stubs.len());
        let mut suffixes = BTreeSet::new();
        let mut stub_types = Vec::with_capacity(spec.stubs.len());
        for stub in &spec.stubs {
            let mut found = HashMap::new();
            let mut var_type: Option<VarType> = None;
            for (pos, var) in self.vars.iter().enumerate() {
                if spec.i.contains(&var.name) {
                    continue;
                }
                let Some(suffix) = var
                    .name
                    .strip_prefix(stub.as_str())
                    .and_then(|rest| Suffix::parse(rest, spec.string_j))
                else {
                    continue;
                };
                match var_type {
                    Some(t) if t != var.var_type() => {
                        return Err(reshape_error(format!(
                            "variables {}* are a mix of string and numeric",
                            stub
                        )))
                    }
                    _ => var_type = Some(var.var_type()),
                }
                suffixes.insert(suffix.clone());
                found.insert(suffix, pos);
            }
            let var_type = var_type
                .ok_or_else(|| reshape_error(format!("no xij variables found for stub {}", stub)))?;
            if self.position(stub).is_some() {
                return Err(DatasetError::VariableExists(stub.clone()));
            }
            stub_types.push(var_type);
            members.push(found);
        }
        let suffixes: Vec<Suffix> = suffixes.into_iter().collect();
        let stub_positions: HashSet<usize> =
            members.iter().flat_map(|m| m.values().copied()).collect();

        let n = self.nobs * suffixes.len();
        let source_rows: Vec<usize> = (0..self.nobs)
            .flat_map(|r| std::iter::repeat(r).take(suffixes.len()))
            .collect();

        let mut vars = Vec::new();
        for name in &spec.i {
            let var = self.require(name)?;
            vars.push(Variable { data: var.data.select(&source_rows), ..var.clone() });
        }

        let j_data = if spec.string_j {
            Column::Str((0..n).map(|k| suffixes[k % suffixes.len()].render()).collect())
        } else {
            Column::Numeric(
                (0..n)
                    .map(|k| match &suffixes[k % suffixes.len()] {
                        Suffix::Int(v) => Some(*v as f64),
                        Suffix::Text(_) => None,
                    })
                    .collect(),
            )
        };
        vars.push(Variable::new(spec.j.clone(), j_data));

        for ((stub, found), var_type) in spec.stubs.iter().zip(&members).zip(&stub_types) {
            let mut data = Column::missing(*var_type, 0);
            for row in 0..self.nobs {
                for suffix in &suffixes {
                    match found.get(suffix) {
                        Some(&pos) => data.push(self.vars[pos].data.get(row))?,
                        None => data.push_missing(),
                    }
                }
            }
            vars.push(Variable::new(stub.clone(), data));
        }

        for (pos, var) in self.vars.iter().enumerate() {
            if stub_positions.contains(&pos) || spec.i.contains(&var.name) {
                continue;
            }
            vars.push(Variable { data: var.data.select(&source_rows), ..var.clone() });
        }

        Ok(Dataset { vars, nobs: n, ..Dataset::default() })
    }

    fn to_wide(&self, spec: &ReshapeSpec) -> Result<Dataset, DatasetError> {
        let j_col = self.column(&spec.j)?;
        for stub in &spec.stubs {
            self.require(stub)?;
        }

        // distinct j values
        let mut j_values = BTreeSet::new();
        for row in 0..self.nobs {
            let key = Key::from_value(j_col.get(row));
            if key.is_missing() {
                return Err(reshape_error(format!("variable {} contains missing values", spec.j)));
            }
            if let Key::Num(n) = &key {
                if n.0.fract() != 0.0 {
                    return Err(reshape_error(format!(
                        "variable {} must contain integers",
                        spec.j
                    )));
                }
            }
            j_values.insert(key);
        }
        let j_values: Vec<Key> = j_values.into_iter().collect();
        let suffix = |key: &Key| match key {
            Key::Num(n) => format!("{}", n.0 as i64),
            Key::Str(s) => s.clone(),
            Key::Missing => String::new(),
        };

        // group rows by i in order of first appearance
        let i_keys = self.row_keys(&spec.i)?;
        let mut group_of: HashMap<&[Key], usize> = HashMap::new();
        let mut first_rows: Vec<usize> = Vec::new();
        let mut row_group = Vec::with_capacity(self.nobs);
        for (row, key) in i_keys.iter().enumerate() {
            let g = *group_of.entry(key.as_slice()).or_insert_with(|| {
                first_rows.push(row);
                first_rows.len() - 1
            });
            row_group.push(g);
        }

        let j_index: HashMap<&Key, usize> = j_values.iter().enumerate().map(|(i, k)| (k, i)).collect();
        let mut cell: HashMap<(usize, usize), usize> = HashMap::new();
        for row in 0..self.nobs {
            let key = Key::from_value(j_col.get(row));
            let j = j_index.get(&key).copied().unwrap_or(0);
            if cell.insert((row_group[row], j), row).is_some() {
                return Err(reshape_error(format!(
                    "values of variable {} not unique within {}",
                    spec.j,
                    spec.i.join(" ")
                )));
            }
        }

        let others: Vec<&Variable> = self
            .vars
            .iter()
            .filter(|v| {
                !spec.i.contains(&v.name) && v.name != spec.j && !spec.stubs.contains(&v.name)
            })
            .collect();
        for var in &others {
            for (row, &g) in row_group.iter().enumerate() {
                if var.data.get(row) != var.data.get(first_rows[g]) {
                    return Err(reshape_error(format!(
                        "variable {} not constant within {}",
                        var.name,
                        spec.i.join(" ")
                    )));
                }
            }
        }

        let mut vars = Vec::new();
        for name in &spec.i {
            let var = self.require(name)?;
            vars.push(Variable { data: var.data.select(&first_rows), ..var.clone() });
        }
        for stub in &spec.stubs {
            let source = self.require(stub)?;
            for (j, key) in j_values.iter().enumerate() {
                let name = format!("{}{}", stub, suffix(key));
                validate_name(&name)?;
                if others.iter().any(|v| v.name == name) {
                    return Err(DatasetError::VariableExists(name));
                }
                let rows: Vec<Option<usize>> =
                    (0..first_rows.len()).map(|g| cell.get(&(g, j)).copied()).collect();
                let mut var = Variable::new(name, source.data.gather(&rows));
                var.label = source.label.clone();
                var.value_label = source.value_label.clone();
                vars.push(var);
            }
        }
        for var in others {
            vars.push(Variable { data: var.data.select(&first_rows), ..var.clone() });
        }

        Ok(Dataset { vars, nobs: first_rows.len(), ..Dataset::default() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Value;

    fn wide() -> Dataset {
        Dataset::from_variables(vec![
            Variable::numeric("id", vec![Some(1.0), Some(2.0)]),
            Variable::numeric("sex", vec![Some(0.0), Some(1.0)]),
            Variable::numeric("inc80", vec![Some(10.0), Some(20.0)]),
            Variable::numeric("inc81", vec![Some(11.0), None]),
        ])
        .unwrap()
    }

    fn spec(direction: ReshapeDirection) -> ReshapeSpec {
        ReshapeSpec {
            direction,
            stubs: vec!["inc".into()],
            i: vec!["id".into()],
            j: "year".into(),
            string_j: false,
        }
    }

    #[test]
    fn wide_to_long() {
        let mut ds = wide();
        ds.reshape(&spec(ReshapeDirection::Long)).unwrap();
        assert_eq!(ds.nobs(), 4);
        let names: Vec<&str> = ds.names().collect();
        assert_eq!(names, vec!["id", "year", "inc", "sex"]);
        let inc: Vec<Value> = (0..4).map(|r| ds.value("inc", r).unwrap()).collect();
        assert_eq!(
            inc,
            vec![Value::Num(10.0), Value::Num(11.0), Value::Num(20.0), Value::Missing]
        );
        assert_eq!(ds.value("year", 3).unwrap(), Value::Num(81.0));
    }

    #[test]
    fn long_round_trips_to_wide() {
        let original = wide();
        let mut ds = original.clone();
        ds.reshape(&spec(ReshapeDirection::Long)).unwrap();
        ds.reshape(&spec(ReshapeDirection::Wide)).unwrap();
        let names: Vec<&str> = ds.names().collect();
        assert_eq!(names, vec!["id", "inc80", "inc81", "sex"]);
        for name in ["id", "sex", "inc80", "inc81"] {
            assert_eq!(ds.column(name).unwrap(), original.column(name).unwrap(), "{}", name);
        }
    }

    #[test]
    fn wide_requires_constant_other_variables() {
        let mut ds = wide();
        ds.reshape(&spec(ReshapeDirection::Long)).unwrap();
        ds.set_value("sex", 1, Value::Num(5.0)).unwrap();
        let before = ds.clone();
        let err = ds.reshape(&spec(ReshapeDirection::Wide)).unwrap_err();
        assert!(matches!(err, DatasetError::Reshape(_)));
        assert_eq!(ds, before);
    }

    #[test]
    fn long_requires_unique_i() {
        let mut ds = wide();
        ds.set_value("id", 1, Value::Num(1.0)).unwrap();
        assert!(ds.reshape(&spec(ReshapeDirection::Long)).is_err());
    }

    #[test]
    fn long_without_stub_variables_fails() {
        let mut ds = wide();
        let mut s = spec(ReshapeDirection::Long);
        s.stubs = vec!["wage".into()];
        assert!(matches!(ds.reshape(&s), Err(DatasetError::Reshape(_))));
    }
}
