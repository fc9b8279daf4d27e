//! AST for Stata expressions
//!
//! Expressions are parsed once per command and then evaluated row by row
//! against the dataset. Every value may be Stata's missing sentinel, and
//! logical results are three-valued so that missing never silently turns
//! into false (or zero).

use std::fmt;

/// A scalar produced by evaluating an expression for one observation
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A non-missing number
    Num(f64),
    /// A string; the empty string is string-missing
    Str(String),
    /// Numeric missing (`.`)
    Missing,
}

impl Value {
    /// Wrap a float, mapping NaN and infinities to missing
    pub fn from_f64(n: f64) -> Value {
        if n.is_finite() {
            Value::Num(n)
        } else {
            Value::Missing
        }
    }

    pub fn from_opt(n: Option<f64>) -> Value {
        n.map(Value::from_f64).unwrap_or(Value::Missing)
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric missing, or the empty string
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Missing => true,
            Value::Str(s) => s.is_empty(),
            Value::Num(_) => false,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Num(_) | Value::Missing => "numeric",
        }
    }

    /// Truth of a numeric value: nonzero is true, missing stays missing.
    /// Strings have no truth value.
    pub fn truth(&self) -> Option<Truth> {
        match self {
            Value::Num(n) => Some(Truth::from(*n != 0.0)),
            Value::Missing => Some(Truth::Missing),
            Value::Str(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Num(n) => write!(f, "{}", crate::display::format_number(*n)),
            Value::Str(s) => write!(f, "{}", s),
            Value::Missing => write!(f, "."),
        }
    }
}

/// Three-valued truth (Kleene logic)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    Missing,
}

impl Truth {
    pub fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Missing,
        }
    }

    pub fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Missing,
        }
    }

    pub fn not(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Missing => Truth::Missing,
        }
    }

    /// Only `True` selects an observation
    pub fn is_true(self) -> bool {
        self == Truth::True
    }

    pub fn to_value(self) -> Value {
        match self {
            Truth::True => Value::Num(1.0),
            Truth::False => Value::Num(0.0),
            Truth::Missing => Value::Missing,
        }
    }
}

impl From<bool> for Truth {
    fn from(b: bool) -> Self {
        if b {
            Truth::True
        } else {
            Truth::False
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Time-series operators (`L.`, `F.`, `D.`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsOp {
    Lag,
    Lead,
    Diff,
}

impl TsOp {
    pub fn prefix(self) -> char {
        match self {
            TsOp::Lag => 'L',
            TsOp::Lead => 'F',
            TsOp::Diff => 'D',
        }
    }
}

/// Built-in system variables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemVar {
    /// `_n`: observation number within the current by-group
    ObsNumber,
    /// `_N`: number of observations in the current by-group
    ObsCount,
    /// `_pi`
    Pi,
}

impl SystemVar {
    pub fn from_name(name: &str) -> Option<SystemVar> {
        match name {
            "_n" => Some(SystemVar::ObsNumber),
            "_N" => Some(SystemVar::ObsCount),
            "_pi" => Some(SystemVar::Pi),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SystemVar::ObsNumber => "_n",
            SystemVar::ObsCount => "_N",
            SystemVar::Pi => "_pi",
        }
    }
}

/// An expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Missing,
    /// Reference to a variable in the dataset
    Var(String),
    System(SystemVar),
    /// Explicit subscript: `x[_n-1]`
    Subscript { name: String, index: Box<Expr> },
    /// `L2.x` and friends
    TimeSeries { op: TsOp, order: u32, name: String },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Call { name: String, args: Vec<Expr> },
}

impl Expr {
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
        Expr::Unary { op, operand: Box::new(operand) }
    }

    /// Variable names referenced by the expression, in first-use order
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        fn push<'a>(out: &mut Vec<&'a str>, name: &'a str) {
            if !out.contains(&name) {
                out.push(name);
            }
        }
        match self {
            Expr::Var(name) | Expr::TimeSeries { name, .. } => push(out, name),
            Expr::Subscript { name, index } => {
                push(out, name);
                index.collect_variables(out);
            }
            Expr::Unary { operand, .. } => operand.collect_variables(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_variables(out);
                rhs.collect_variables(out);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_variables(out);
                }
            }
            Expr::Number(_) | Expr::Str(_) | Expr::Missing | Expr::System(_) => {}
        }
    }

    /// True if any time-series operator appears in the tree
    pub fn uses_time_series(&self) -> bool {
        match self {
            Expr::TimeSeries { .. } => true,
            Expr::Subscript { index, .. } => index.uses_time_series(),
            Expr::Unary { operand, .. } => operand.uses_time_series(),
            Expr::Binary { lhs, rhs, .. } => lhs.uses_time_series() || rhs.uses_time_series(),
            Expr::Call { args, .. } => args.iter().any(Expr::uses_time_series),
            _ => false,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{}", crate::display::format_number(*n)),
            Expr::Str(s) => write!(f, "\"{}\"", s),
            Expr::Missing => write!(f, "."),
            Expr::Var(name) => write!(f, "{}", name),
            Expr::System(sv) => write!(f, "{}", sv.name()),
            Expr::Subscript { name, index } => write!(f, "{}[{}]", name, index),
            Expr::TimeSeries { op, order, name } => {
                if *order == 1 {
                    write!(f, "{}.{}", op.prefix(), name)
                } else {
                    write!(f, "{}{}.{}", op.prefix(), order, name)
                }
            }
            Expr::Unary { op: UnaryOp::Neg, operand } => write!(f, "-{}", operand),
            Expr::Unary { op: UnaryOp::Not, operand } => write!(f, "!{}", operand),
            Expr::Binary { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
            Expr::Call { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kleene_or_ignores_missing_when_true() {
        assert_eq!(Truth::True.or(Truth::Missing), Truth::True);
        assert_eq!(Truth::Missing.or(Truth::False), Truth::Missing);
    }

    #[test]
    fn kleene_and_is_false_when_either_false() {
        assert_eq!(Truth::Missing.and(Truth::False), Truth::False);
        assert_eq!(Truth::Missing.and(Truth::True), Truth::Missing);
    }

    #[test]
    fn non_finite_numbers_become_missing() {
        assert_eq!(Value::from_f64(f64::NAN), Value::Missing);
        assert_eq!(Value::from_f64(f64::INFINITY), Value::Missing);
        assert_eq!(Value::from_f64(2.0), Value::Num(2.0));
    }

    #[test]
    fn variables_are_collected_once_in_order() {
        let expr = Expr::binary(
            BinaryOp::Add,
            Expr::Var("b".into()),
            Expr::binary(BinaryOp::Mul, Expr::Var("a".into()), Expr::Var("b".into())),
        );
        assert_eq!(expr.variables(), vec!["b", "a"]);
    }
}
