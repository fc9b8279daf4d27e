//! Row-wise expression evaluation
//!
//! An `Evaluator` borrows the dataset (and optionally the current by-group
//! layout) and evaluates an `Expr` for one observation at a time.
//!
//! Missing values follow Stata with one tightening: any comparison
//! involving missing yields missing instead of treating missing as +inf, and
//! `&`/`|` use Kleene logic. Comparing against the literal `.` with
//! `==`/`!=` is an identity test, so `x == .` selects exactly the missing
//! observations.
//!
//! Helpers live in submodules:
//! - `functions`: the built-in function table
//! - `dates`: Stata daily dates (days since 1960-01-01)
//! - `aggregate`: by-groups and summary statistics
//! - `recode`: `recode` rule lists

mod aggregate;
mod dates;
mod functions;
mod recode;

pub use aggregate::{percentile, DetailStats, Grouping, Stat, SummaryStats, DETAIL_PERCENTILES};
pub use dates::{date_from_days, days_from_date};
pub use recode::{RecodeMatch, RecodeRule};

use crate::ast::{BinaryOp, Expr, SystemVar, Truth, TsOp, UnaryOp, Value};
use crate::dataset::{Dataset, DatasetError, Key, VarType};
use std::cell::OnceCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("variable {0} not found")]
    UnknownVariable(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("unknown function {0}()")]
    UnknownFunction(String),
    #[error("{name}() takes {expected} arguments, {got} given")]
    Arity { name: String, expected: String, got: usize },
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

fn mismatch(what: impl Into<String>) -> EvalError {
    EvalError::TypeMismatch(what.into())
}

/// Row lookup for time-series operators: (panel, time) -> observation
struct TsIndex {
    lookup: HashMap<(Key, i64), usize>,
    slots: Vec<Option<(Key, i64)>>,
}

impl TsIndex {
    fn build(data: &Dataset) -> Result<TsIndex, EvalError> {
        let (panel, time) = data.time_spec()?;
        let time = data.column(time)?;
        let panel = panel.map(|p| data.column(p)).transpose()?;

        let mut lookup = HashMap::with_capacity(data.nobs());
        let mut slots = Vec::with_capacity(data.nobs());
        for row in 0..data.nobs() {
            let slot = match time.num(row) {
                Some(t) if t.fract() != 0.0 => {
                    return Err(EvalError::Invalid("time variable must contain integers".into()))
                }
                Some(t) => {
                    let key = panel.map(|p| Key::from_value(p.get(row))).unwrap_or(Key::Missing);
                    lookup.insert((key.clone(), t as i64), row);
                    Some((key, t as i64))
                }
                None => None,
            };
            slots.push(slot);
        }
        Ok(TsIndex { lookup, slots })
    }

    /// Row with time `t + offset` in the same panel as `row`
    fn shift(&self, row: usize, offset: i64) -> Option<usize> {
        let (key, t) = self.slots.get(row)?.as_ref()?;
        self.lookup.get(&(key.clone(), t + offset)).copied()
    }
}

/// Evaluates expressions against one dataset
pub struct Evaluator<'a> {
    data: &'a Dataset,
    groups: Option<&'a Grouping>,
    ts: OnceCell<TsIndex>,
}

impl<'a> Evaluator<'a> {
    pub fn new(data: &'a Dataset) -> Self {
        Evaluator { data, groups: None, ts: OnceCell::new() }
    }

    /// Make `_n`, `_N` and subscripts relative to by-groups
    pub fn with_groups(mut self, groups: &'a Grouping) -> Self {
        self.groups = Some(groups);
        self
    }

    pub fn data(&self) -> &Dataset {
        self.data
    }

    fn ts_index(&self) -> Result<&TsIndex, EvalError> {
        if let Some(index) = self.ts.get() {
            return Ok(index);
        }
        let index = TsIndex::build(self.data)?;
        Ok(self.ts.get_or_init(|| index))
    }

    /// Check an expression before running it and infer its result type.
    /// Unknown variables and functions, arity and type errors surface here
    /// even when there are no observations.
    pub fn infer(&self, expr: &Expr) -> Result<VarType, EvalError> {
        match expr {
            Expr::Number(_) | Expr::Missing | Expr::System(_) => Ok(VarType::Numeric),
            Expr::Str(_) => Ok(VarType::Str),
            Expr::Var(name) => self.var_type(name),
            Expr::Subscript { name, index } => {
                if self.infer(index)? != VarType::Numeric {
                    return Err(mismatch("subscript must be numeric"));
                }
                self.var_type(name)
            }
            Expr::TimeSeries { name, op, .. } => {
                if self.var_type(name)? != VarType::Numeric {
                    return Err(mismatch(format!("{}. operator on string variable {}", op.prefix(), name)));
                }
                self.ts_index()?;
                Ok(VarType::Numeric)
            }
            Expr::Unary { operand, .. } => match self.infer(operand)? {
                VarType::Numeric => Ok(VarType::Numeric),
                VarType::Str => Err(mismatch(format!("{}", expr))),
            },
            Expr::Binary { op, lhs, rhs } => {
                let (l, r) = (self.infer(lhs)?, self.infer(rhs)?);
                match op {
                    BinaryOp::Add if l == r => Ok(l),
                    BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt
                    | BinaryOp::Ge
                        if l == r =>
                    {
                        Ok(VarType::Numeric)
                    }
                    _ if l == VarType::Numeric && r == VarType::Numeric => Ok(VarType::Numeric),
                    _ => Err(mismatch(format!("{}", expr))),
                }
            }
            Expr::Call { name, args } => self.infer_call(name, args),
        }
    }

    fn var_type(&self, name: &str) -> Result<VarType, EvalError> {
        self.data
            .variable(name)
            .map(|v| v.var_type())
            .ok_or_else(|| EvalError::UnknownVariable(name.to_string()))
    }

    /// Evaluate for one observation
    pub fn value_at(&self, expr: &Expr, row: usize) -> Result<Value, EvalError> {
        match expr {
            Expr::Number(n) => Ok(Value::from_f64(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Missing => Ok(Value::Missing),
            Expr::Var(name) => Ok(self.data.value(name, row)?),
            Expr::System(sv) => Ok(self.system_value(*sv, row)),
            Expr::Subscript { name, index } => self.subscript(name, index, row),
            Expr::TimeSeries { op, order, name } => self.time_series(*op, *order, name, row),
            Expr::Unary { op, operand } => {
                let value = self.value_at(operand, row)?;
                match (op, value) {
                    (UnaryOp::Neg, Value::Num(n)) => Ok(Value::Num(-n)),
                    (_, Value::Str(_)) => Err(mismatch(format!("{}", expr))),
                    (UnaryOp::Not, value) => Ok(truth_of(&value)?.not().to_value()),
                    (UnaryOp::Neg, _) => Ok(Value::Missing),
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.value_at(lhs, row)?;
                let r = self.value_at(rhs, row)?;
                // `x == .` and `x != .` test for missing
                let against_dot = matches!(**lhs, Expr::Missing) || matches!(**rhs, Expr::Missing);
                if against_dot && matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
                    let equal = identical(&l, &r)?;
                    return Ok(Truth::from(equal == (*op == BinaryOp::Eq)).to_value());
                }
                binary(*op, l, r)
            }
            Expr::Call { name, args } => self.call(name, args, row),
        }
    }

    /// Evaluate outside any observation; variable references are rejected
    pub fn scalar(&self, expr: &Expr) -> Result<Value, EvalError> {
        self.infer(expr)?;
        if let Some(name) = expr.variables().first() {
            return Err(EvalError::Invalid(format!("{} not allowed in a scalar expression", name)));
        }
        self.value_at(expr, 0)
    }

    /// Truth of a condition for one observation
    pub fn truth_at(&self, expr: &Expr, row: usize) -> Result<Truth, EvalError> {
        truth_of(&self.value_at(expr, row)?)
    }

    /// Evaluate for every observation
    pub fn values(&self, expr: &Expr) -> Result<Vec<Value>, EvalError> {
        self.infer(expr)?;
        (0..self.data.nobs()).map(|row| self.value_at(expr, row)).collect()
    }

    /// Mask of observations where the condition is true; false and missing
    /// both deselect
    pub fn select(&self, expr: &Expr) -> Result<Vec<bool>, EvalError> {
        if self.infer(expr)? == VarType::Str {
            return Err(mismatch(format!("condition {} is a string", expr)));
        }
        (0..self.data.nobs())
            .map(|row| self.truth_at(expr, row).map(Truth::is_true))
            .collect()
    }

    fn system_value(&self, sv: SystemVar, row: usize) -> Value {
        match sv {
            SystemVar::Pi => Value::Num(std::f64::consts::PI),
            SystemVar::ObsNumber => match self.groups.and_then(|g| g.locate(row)) {
                Some((_, index)) => Value::Num((index + 1) as f64),
                None => Value::Num((row + 1) as f64),
            },
            SystemVar::ObsCount => match self.groups.and_then(|g| g.locate(row)) {
                Some((group, _)) => Value::Num(self.groups.map_or(0, |g| g.rows(group).len()) as f64),
                None => Value::Num(self.data.nobs() as f64),
            },
        }
    }

    /// `x[exp]`: 1-based, within the by-group if there is one
    fn subscript(&self, name: &str, index: &Expr, row: usize) -> Result<Value, EvalError> {
        let column = self.data.column(name)?;
        let missing = column.missing_value();
        let position = match self.value_at(index, row)? {
            Value::Num(n) => n.trunc(),
            Value::Missing => return Ok(missing),
            Value::Str(_) => return Err(mismatch("subscript must be numeric")),
        };
        if position < 1.0 {
            return Ok(missing);
        }
        let position = position as usize - 1;
        let target = match self.groups.and_then(|g| g.locate(row).map(|(group, _)| g.rows(group))) {
            Some(rows) => rows.get(position).copied(),
            None => (position < self.data.nobs()).then_some(position),
        };
        Ok(target.map_or(missing, |r| column.get(r)))
    }

    fn time_series(&self, op: TsOp, order: u32, name: &str, row: usize) -> Result<Value, EvalError> {
        let index = self.ts_index()?;
        let column = self.data.column(name)?;
        let k = order as i64;
        Ok(match op {
            TsOp::Lag => index.shift(row, -k).map_or(Value::Missing, |r| column.get(r)),
            TsOp::Lead => index.shift(row, k).map_or(Value::Missing, |r| column.get(r)),
            TsOp::Diff => Value::from_opt(difference(index, column, order, row)),
        })
    }
}

/// `D#.x`: repeated first differences
fn difference(
    index: &TsIndex,
    column: &crate::dataset::Column,
    order: u32,
    row: usize,
) -> Option<f64> {
    if order == 0 {
        return column.num(row);
    }
    let current = difference(index, column, order - 1, row)?;
    let previous = difference(index, column, order - 1, index.shift(row, -1)?)?;
    Some(current - previous)
}

/// Truth value of a numeric result; strings have none
pub fn truth_of(value: &Value) -> Result<Truth, EvalError> {
    value
        .truth()
        .ok_or_else(|| mismatch("string used where a condition is expected"))
}

/// Equality where missing equals missing, for `x == .` and `inlist()`
pub fn identical(l: &Value, r: &Value) -> Result<bool, EvalError> {
    use Value::{Missing, Num, Str};

    match (l, r) {
        (Str(a), Str(b)) => Ok(a == b),
        (Str(_), _) | (_, Str(_)) => Err(mismatch("comparing string with number")),
        (Num(a), Num(b)) => Ok(a == b),
        (Missing, Missing) => Ok(true),
        _ => Ok(false),
    }
}

/// Apply a binary operator to two evaluated operands. Any comparison with
/// a missing operand is missing.
pub fn binary(op: BinaryOp, l: Value, r: Value) -> Result<Value, EvalError> {
    use Value::{Missing, Num, Str};

    match op {
        BinaryOp::And | BinaryOp::Or => {
            let (a, b) = (truth_of(&l)?, truth_of(&r)?);
            let t = if op == BinaryOp::And { a.and(b) } else { a.or(b) };
            return Ok(t.to_value());
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            let equal = identical(&l, &r)?;
            if matches!(l, Missing) || matches!(r, Missing) {
                return Ok(Missing);
            }
            return Ok(Truth::from(equal == (op == BinaryOp::Eq)).to_value());
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&l, &r) {
                (Str(a), Str(b)) => a.cmp(b),
                (Str(_), _) | (_, Str(_)) => return Err(mismatch("comparing string with number")),
                (Num(a), Num(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
                _ => return Ok(Missing),
            };
            let holds = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            return Ok(Truth::from(holds).to_value());
        }
        _ => {}
    }

    match (l, r) {
        (Str(a), Str(b)) if op == BinaryOp::Add => Ok(Str(a + &b)),
        (Str(_), _) | (_, Str(_)) => Err(mismatch(format!("string operand for {}", op.symbol()))),
        (Num(a), Num(b)) => Ok(match op {
            BinaryOp::Add => Value::from_f64(a + b),
            BinaryOp::Sub => Value::from_f64(a - b),
            BinaryOp::Mul => Value::from_f64(a * b),
            BinaryOp::Div if b == 0.0 => Missing,
            BinaryOp::Div => Value::from_f64(a / b),
            _ => Value::from_f64(a.powf(b)),
        }),
        _ => Ok(Missing),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{PanelSpec, Variable};
    use crate::parser::parse_expr;

    fn data() -> Dataset {
        Dataset::from_variables(vec![
            Variable::numeric("x", vec![Some(1.0), None, Some(3.0), Some(4.0)]),
            Variable::numeric("y", vec![Some(10.0), Some(20.0), Some(30.0), Some(0.0)]),
            Variable::string("s", vec!["a".into(), "".into(), "c".into(), "d".into()]),
            Variable::numeric("t", vec![Some(1.0), Some(2.0), Some(3.0), Some(5.0)]),
        ])
        .unwrap()
    }

    fn eval_all(ds: &Dataset, src: &str) -> Vec<Value> {
        Evaluator::new(ds).values(&parse_expr(src).unwrap()).unwrap()
    }

    #[test]
    fn missing_propagates_through_arithmetic() {
        let ds = data();
        assert_eq!(
            eval_all(&ds, "x + y"),
            vec![Value::Num(11.0), Value::Missing, Value::Num(33.0), Value::Num(4.0)]
        );
    }

    #[test]
    fn division_by_zero_is_missing() {
        let ds = data();
        assert_eq!(eval_all(&ds, "x / y")[3], Value::Missing);
    }

    #[test]
    fn equality_against_dot_tests_for_missing() {
        let ds = data();
        assert_eq!(
            Evaluator::new(&ds).select(&parse_expr("x == .").unwrap()).unwrap(),
            vec![false, true, false, false]
        );
        assert_eq!(
            Evaluator::new(&ds).select(&parse_expr("x != .").unwrap()).unwrap(),
            vec![true, false, true, true]
        );
        assert_eq!(eval_all(&ds, "inlist(x, ., 3)"), eval_all(&ds, "x == . | x == 3"));
    }

    #[test]
    fn scalar_expressions_have_no_observation() {
        let ds = data();
        let eval = Evaluator::new(&ds);
        assert_eq!(eval.scalar(&parse_expr("2 * 3 + _N").unwrap()).unwrap(), Value::Num(10.0));
        assert_eq!(eval.scalar(&parse_expr(". + 1").unwrap()).unwrap(), Value::Missing);
        assert!(matches!(eval.scalar(&parse_expr("y + 1").unwrap()), Err(EvalError::Invalid(_))));
        assert!(matches!(eval.scalar(&parse_expr("nosuch").unwrap()), Err(EvalError::UnknownVariable(_))));
    }

    #[test]
    fn equality_with_a_missing_variable_is_missing() {
        let ds = data();
        // row 1: x is missing
        assert_eq!(eval_all(&ds, "y == x")[1], Value::Missing);
        assert_eq!(eval_all(&ds, "y != x")[1], Value::Missing);
        assert_eq!(eval_all(&ds, "(y == x) | y > 5")[1], Value::Num(1.0));
        assert_eq!(eval_all(&ds, "(y == x) & y > 5")[1], Value::Missing);
        assert_eq!(eval_all(&ds, "(y == x) & y > 50")[1], Value::Num(0.0));
        assert_eq!(eval_all(&ds, "(y == x) | y > 50")[1], Value::Missing);
        // a missing condition does not select the row either way
        assert_eq!(
            Evaluator::new(&ds).select(&parse_expr("y != x").unwrap()).unwrap(),
            vec![true, false, true, true]
        );
    }

    #[test]
    fn ordered_comparison_with_missing_is_missing() {
        let ds = data();
        assert_eq!(eval_all(&ds, "x > 2")[1], Value::Missing);
        // and the missing row is not selected
        assert_eq!(
            Evaluator::new(&ds).select(&parse_expr("x > 2").unwrap()).unwrap(),
            vec![false, false, true, true]
        );
    }

    #[test]
    fn kleene_logic_in_conditions() {
        let ds = data();
        // row 1: x > 2 is missing, y > 5 is true
        assert_eq!(eval_all(&ds, "x > 2 | y > 5")[1], Value::Num(1.0));
        assert_eq!(eval_all(&ds, "x > 2 & y > 50")[1], Value::Num(0.0));
        assert_eq!(eval_all(&ds, "!(x > 2)")[1], Value::Missing);
    }

    #[test]
    fn string_concatenation_and_mismatch() {
        let ds = data();
        assert_eq!(eval_all(&ds, "s + \"z\"")[0], Value::Str("az".into()));
        let ev = Evaluator::new(&ds);
        assert!(matches!(
            ev.infer(&parse_expr("s + 1").unwrap()),
            Err(EvalError::TypeMismatch(_))
        ));
        assert!(matches!(
            ev.infer(&parse_expr("s == 1").unwrap()),
            Err(EvalError::TypeMismatch(_))
        ));
    }

    #[test]
    fn unknown_variable_detected_without_rows() {
        let ds = Dataset::new();
        assert!(matches!(
            Evaluator::new(&ds).infer(&parse_expr("nope + 1").unwrap()),
            Err(EvalError::UnknownVariable(_))
        ));
    }

    #[test]
    fn system_variables_and_subscripts() {
        let ds = data();
        assert_eq!(eval_all(&ds, "_n")[2], Value::Num(3.0));
        assert_eq!(eval_all(&ds, "_N")[0], Value::Num(4.0));
        let lagged = eval_all(&ds, "y[_n-1]");
        assert_eq!(lagged[0], Value::Missing);
        assert_eq!(lagged[1], Value::Num(10.0));
        assert_eq!(eval_all(&ds, "s[_n+1]")[3], Value::Str(String::new()));
    }

    #[test]
    fn subscripts_respect_groups() {
        let ds = Dataset::from_variables(vec![
            Variable::numeric("g", vec![Some(1.0), Some(1.0), Some(2.0), Some(2.0)]),
            Variable::numeric("v", vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]),
        ])
        .unwrap();
        let groups = Grouping::by(&ds, &["g".into()], &[0, 1, 2, 3]).unwrap();
        let ev = Evaluator::new(&ds).with_groups(&groups);
        let expr = parse_expr("v[_n-1]").unwrap();
        assert_eq!(ev.value_at(&expr, 2).unwrap(), Value::Missing);
        assert_eq!(ev.value_at(&expr, 3).unwrap(), Value::Num(3.0));
        assert_eq!(ev.value_at(&parse_expr("_N").unwrap(), 0).unwrap(), Value::Num(2.0));
    }

    #[test]
    fn time_series_operators_follow_time_not_rows() {
        let mut ds = data();
        ds.set_panel(PanelSpec { panel: None, time: Some("t".into()) }).unwrap();
        let lag = eval_all(&ds, "L.y");
        // t jumps from 3 to 5, so t=5 has no t=4 predecessor
        assert_eq!(lag, vec![Value::Missing, Value::Num(10.0), Value::Num(20.0), Value::Missing]);
        assert_eq!(eval_all(&ds, "D.y")[2], Value::Num(10.0));
        assert_eq!(eval_all(&ds, "F2.y")[0], Value::Num(30.0));
    }

    #[test]
    fn time_series_without_tsset_fails() {
        let ds = data();
        let err = Evaluator::new(&ds).infer(&parse_expr("L.y").unwrap()).unwrap_err();
        assert!(matches!(err, EvalError::Dataset(DatasetError::Panel(_))));
    }
}
