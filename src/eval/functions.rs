//! Built-in expression functions
//!
//! Each function has a signature used by `Evaluator::infer` for arity and
//! type checks; `apply` does the per-row work on evaluated arguments.

use super::{binary, dates, identical, mismatch, truth_of, EvalError, Evaluator};
use crate::ast::{BinaryOp, Expr, Truth, Value};
use crate::dataset::VarType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Num,
    Str,
    Any,
}

#[derive(Debug, Clone, Copy)]
enum Returns {
    Num,
    Str,
    /// Type of the second argument (`cond`)
    Branch,
}

struct Signature {
    kinds: &'static [Kind],
    min: usize,
    /// Last kind repeats without limit
    variadic: bool,
    returns: Returns,
    /// All arguments must share one type (`inlist`, `inrange`)
    same_type: bool,
}

const fn sig(kinds: &'static [Kind], min: usize, returns: Returns) -> Signature {
    Signature { kinds, min, variadic: false, returns, same_type: false }
}

fn signature(name: &str) -> Option<Signature> {
    use Kind::{Any, Num, Str};
    let s = match name {
        "missing" | "mi" => Signature { variadic: true, ..sig(&[Any], 1, Returns::Num) },
        "abs" | "ceil" | "floor" | "int" | "exp" | "ln" | "log" | "log10" | "sqrt" | "sign"
        | "logit" | "invlogit" => sig(&[Num], 1, Returns::Num),
        "round" => sig(&[Num, Num], 1, Returns::Num),
        "mod" => sig(&[Num, Num], 2, Returns::Num),
        "min" | "max" => Signature { variadic: true, ..sig(&[Num], 1, Returns::Num) },
        "cond" => sig(&[Num, Any, Any, Any], 3, Returns::Branch),
        "inlist" => Signature { variadic: true, same_type: true, ..sig(&[Any, Any], 2, Returns::Num) },
        "inrange" => Signature { same_type: true, ..sig(&[Any, Any, Any], 3, Returns::Num) },
        "substr" => sig(&[Str, Num, Num], 2, Returns::Str),
        "strlen" | "length" => sig(&[Str], 1, Returns::Num),
        "upper" | "strupper" | "lower" | "strlower" | "trim" | "strtrim" | "ltrim" | "rtrim" => {
            sig(&[Str], 1, Returns::Str)
        }
        "strpos" => sig(&[Str, Str], 2, Returns::Num),
        "subinstr" => sig(&[Str, Str, Str, Num], 3, Returns::Str),
        "string" => sig(&[Num], 1, Returns::Str),
        "real" => sig(&[Str], 1, Returns::Num),
        "word" => sig(&[Str, Num], 2, Returns::Str),
        "mdy" => sig(&[Num, Num, Num], 3, Returns::Num),
        "date" => sig(&[Str, Str], 2, Returns::Num),
        "year" | "month" | "day" | "dow" | "doy" => sig(&[Num], 1, Returns::Num),
        "today" => sig(&[], 0, Returns::Num),
        _ => return None,
    };
    Some(s)
}

impl<'a> Evaluator<'a> {
    pub(super) fn infer_call(&self, name: &str, args: &[Expr]) -> Result<VarType, EvalError> {
        let sig = signature(name).ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;
        let max_ok = sig.variadic || args.len() <= sig.kinds.len();
        if args.len() < sig.min || !max_ok {
            let expected = if sig.variadic {
                format!("at least {}", sig.min)
            } else if sig.min == sig.kinds.len() {
                sig.min.to_string()
            } else {
                format!("{} to {}", sig.min, sig.kinds.len())
            };
            return Err(EvalError::Arity { name: name.to_string(), expected, got: args.len() });
        }

        let types = args
            .iter()
            .map(|a| self.infer(a))
            .collect::<Result<Vec<_>, _>>()?;
        for (i, t) in types.iter().enumerate() {
            let kind = sig.kinds.get(i).or(sig.kinds.last()).copied().unwrap_or(Kind::Any);
            let ok = match kind {
                Kind::Num => *t == VarType::Numeric,
                Kind::Str => *t == VarType::Str,
                Kind::Any => true,
            };
            if !ok {
                return Err(mismatch(format!("argument {} of {}()", i + 1, name)));
            }
        }
        if sig.same_type && types.windows(2).any(|w| w[0] != w[1]) {
            return Err(mismatch(format!("arguments of {}() mix strings and numbers", name)));
        }

        match sig.returns {
            Returns::Num => Ok(VarType::Numeric),
            Returns::Str => Ok(VarType::Str),
            Returns::Branch => {
                if types[1..].windows(2).any(|w| w[0] != w[1]) {
                    return Err(mismatch("branches of cond() differ in type"));
                }
                Ok(types[1])
            }
        }
    }

    pub(super) fn call(&self, name: &str, args: &[Expr], row: usize) -> Result<Value, EvalError> {
        let values = args
            .iter()
            .map(|a| self.value_at(a, row))
            .collect::<Result<Vec<_>, _>>()?;
        apply(name, &values)
    }
}

fn num(args: &[Value], i: usize) -> Result<Option<f64>, EvalError> {
    match args.get(i) {
        Some(Value::Num(n)) => Ok(Some(*n)),
        Some(Value::Missing) | None => Ok(None),
        Some(Value::Str(_)) => Err(mismatch(format!("argument {} must be numeric", i + 1))),
    }
}

fn text(args: &[Value], i: usize) -> Result<&str, EvalError> {
    match args.get(i) {
        Some(Value::Str(s)) => Ok(s),
        _ => Err(mismatch(format!("argument {} must be a string", i + 1))),
    }
}

fn unary(args: &[Value], f: impl Fn(f64) -> f64) -> Result<Value, EvalError> {
    Ok(Value::from_opt(num(args, 0)?.map(f)))
}

fn flag(b: bool) -> Value {
    Truth::from(b).to_value()
}

/// Round half away from zero, as Stata's `round()`
fn round_to(x: f64, unit: f64) -> f64 {
    (x / unit + 0.5).floor() * unit
}

/// Evaluate a function on already-evaluated arguments
pub(super) fn apply(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let sig = signature(name).ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;
    if args.len() < sig.min {
        return Err(EvalError::Arity {
            name: name.to_string(),
            expected: format!("at least {}", sig.min),
            got: args.len(),
        });
    }
    let value = match name {
        "missing" | "mi" => flag(args.iter().any(Value::is_missing)),
        "abs" => unary(args, f64::abs)?,
        "ceil" => unary(args, f64::ceil)?,
        "floor" => unary(args, f64::floor)?,
        "int" => unary(args, f64::trunc)?,
        "exp" => unary(args, f64::exp)?,
        "ln" | "log" => unary(args, f64::ln)?,
        "log10" => unary(args, f64::log10)?,
        "sqrt" => unary(args, f64::sqrt)?,
        "sign" => unary(args, |x| if x > 0.0 { 1.0 } else if x < 0.0 { -1.0 } else { 0.0 })?,
        "logit" => unary(args, |p| (p / (1.0 - p)).ln())?,
        "invlogit" => unary(args, |x| 1.0 / (1.0 + (-x).exp()))?,
        "round" => {
            let unit = if args.len() > 1 { num(args, 1)? } else { Some(1.0) };
            match (num(args, 0)?, unit) {
                (Some(x), Some(u)) if u != 0.0 => Value::from_f64(round_to(x, u)),
                _ => Value::Missing,
            }
        }
        "mod" => match (num(args, 0)?, num(args, 1)?) {
            (Some(x), Some(y)) if y != 0.0 => Value::from_f64(x - y * (x / y).floor()),
            _ => Value::Missing,
        },
        "min" | "max" => {
            let mut best: Option<f64> = None;
            for i in 0..args.len() {
                if let Some(x) = num(args, i)? {
                    best = Some(match best {
                        Some(b) if name == "min" => b.min(x),
                        Some(b) => b.max(x),
                        None => x,
                    });
                }
            }
            Value::from_opt(best)
        }
        "cond" => {
            let chosen = match truth_of(&args[0])? {
                Truth::True => 1,
                Truth::False => 2,
                Truth::Missing if args.len() > 3 => 3,
                Truth::Missing => 1,
            };
            args[chosen].clone()
        }
        "inlist" => {
            for candidate in &args[1..] {
                if identical(&args[0], candidate)? {
                    return Ok(Value::Num(1.0));
                }
            }
            Value::Num(0.0)
        }
        "inrange" => {
            // missing bounds are open
            let above = args[1].is_missing()
                || binary(BinaryOp::Ge, args[0].clone(), args[1].clone())? == Value::Num(1.0);
            let below = args[2].is_missing()
                || binary(BinaryOp::Le, args[0].clone(), args[2].clone())? == Value::Num(1.0);
            flag((!args[0].is_missing() && above && below) || (args[0].is_missing() && args[2].is_missing()))
        }
        "substr" => {
            let s = text(args, 0)?;
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as i64;
            let start = match num(args, 1)? {
                Some(n) if n >= 1.0 => n as i64 - 1,
                Some(n) if n < 0.0 => len + n as i64,
                _ => return Ok(Value::Str(String::new())),
            };
            let count = match num(args, 2)? {
                Some(n) if n >= 0.0 => n as i64,
                Some(_) => 0,
                None => len,
            };
            if start < 0 || start >= len {
                Value::Str(String::new())
            } else {
                let end = (start + count).min(len);
                Value::Str(chars[start as usize..end as usize].iter().collect())
            }
        }
        "strlen" | "length" => Value::Num(text(args, 0)?.chars().count() as f64),
        "upper" | "strupper" => Value::Str(text(args, 0)?.to_uppercase()),
        "lower" | "strlower" => Value::Str(text(args, 0)?.to_lowercase()),
        "trim" | "strtrim" => Value::Str(text(args, 0)?.trim().to_string()),
        "ltrim" => Value::Str(text(args, 0)?.trim_start().to_string()),
        "rtrim" => Value::Str(text(args, 0)?.trim_end().to_string()),
        "strpos" => {
            let (haystack, needle) = (text(args, 0)?, text(args, 1)?);
            let pos = haystack
                .find(needle)
                .map_or(0, |byte| haystack[..byte].chars().count() + 1);
            Value::Num(pos as f64)
        }
        "subinstr" => {
            let (s, from, to) = (text(args, 0)?, text(args, 1)?, text(args, 2)?);
            let limit = if args.len() > 3 { num(args, 3)? } else { None };
            if from.is_empty() {
                Value::Str(s.to_string())
            } else {
                match limit {
                    Some(n) => Value::Str(s.replacen(from, to, n.max(0.0) as usize)),
                    None => Value::Str(s.replace(from, to)),
                }
            }
        }
        "string" => Value::Str(match num(args, 0)? {
            Some(n) => crate::display::format_number(n),
            None => ".".to_string(),
        }),
        "real" => {
            let s = text(args, 0)?.trim();
            Value::from_opt(s.parse::<f64>().ok())
        }
        "word" => {
            let words: Vec<&str> = text(args, 0)?.split_whitespace().collect();
            let picked = match num(args, 1)? {
                Some(n) if n >= 1.0 => words.get(n as usize - 1),
                Some(n) if n <= -1.0 => words.len().checked_sub((-n) as usize).and_then(|i| words.get(i)),
                _ => None,
            };
            Value::Str(picked.map(|w| w.to_string()).unwrap_or_default())
        }
        "mdy" => match (num(args, 0)?, num(args, 1)?, num(args, 2)?) {
            (Some(m), Some(d), Some(y)) => Value::from_opt(dates::mdy(m, d, y)),
            _ => Value::Missing,
        },
        "date" => Value::from_opt(dates::parse_date(text(args, 0)?, text(args, 1)?)),
        "year" | "month" | "day" | "dow" | "doy" => {
            Value::from_opt(num(args, 0)?.and_then(|d| dates::component(name, d)))
        }
        "today" => Value::Num(dates::today()),
        _ => return Err(EvalError::UnknownFunction(name.to_string())),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(x: f64) -> Value {
        Value::Num(x)
    }

    fn s(x: &str) -> Value {
        Value::Str(x.to_string())
    }

    #[test]
    fn math_functions() {
        assert_eq!(apply("round", &[n(2.5)]).unwrap(), n(3.0));
        assert_eq!(apply("round", &[n(-2.5)]).unwrap(), n(-2.0));
        assert_eq!(apply("round", &[n(1.234), n(0.01)]).unwrap(), n(1.23));
        assert_eq!(apply("int", &[n(-1.7)]).unwrap(), n(-1.0));
        assert_eq!(apply("mod", &[n(-7.0), n(3.0)]).unwrap(), n(2.0));
        assert_eq!(apply("ln", &[n(0.0)]).unwrap(), Value::Missing);
        assert_eq!(apply("sqrt", &[n(-1.0)]).unwrap(), Value::Missing);
        assert_eq!(apply("max", &[n(1.0), Value::Missing, n(4.0)]).unwrap(), n(4.0));
        assert_eq!(apply("min", &[Value::Missing]).unwrap(), Value::Missing);
    }

    #[test]
    fn cond_with_missing_condition() {
        assert_eq!(apply("cond", &[Value::Missing, n(1.0), n(2.0)]).unwrap(), n(1.0));
        assert_eq!(apply("cond", &[Value::Missing, n(1.0), n(2.0), n(9.0)]).unwrap(), n(9.0));
        assert_eq!(apply("cond", &[n(0.0), s("a"), s("b")]).unwrap(), s("b"));
    }

    #[test]
    fn inlist_and_inrange() {
        assert_eq!(apply("inlist", &[n(2.0), n(1.0), n(2.0)]).unwrap(), n(1.0));
        assert_eq!(apply("inlist", &[s("x"), s("a"), s("b")]).unwrap(), n(0.0));
        assert_eq!(apply("inrange", &[n(5.0), n(1.0), n(10.0)]).unwrap(), n(1.0));
        assert_eq!(apply("inrange", &[n(5.0), Value::Missing, n(4.0)]).unwrap(), n(0.0));
        assert_eq!(apply("inrange", &[Value::Missing, n(1.0), n(4.0)]).unwrap(), n(0.0));
    }

    #[test]
    fn string_functions() {
        assert_eq!(apply("substr", &[s("abcdef"), n(2.0), n(3.0)]).unwrap(), s("bcd"));
        assert_eq!(apply("substr", &[s("abcdef"), n(-2.0), Value::Missing]).unwrap(), s("ef"));
        assert_eq!(apply("strpos", &[s("hello"), s("l")]).unwrap(), n(3.0));
        assert_eq!(apply("strpos", &[s("hello"), s("z")]).unwrap(), n(0.0));
        assert_eq!(apply("subinstr", &[s("a-b-c"), s("-"), s("+"), n(1.0)]).unwrap(), s("a+b-c"));
        assert_eq!(apply("subinstr", &[s("a-b-c"), s("-"), s(""), Value::Missing]).unwrap(), s("abc"));
        assert_eq!(apply("word", &[s("one two three"), n(-1.0)]).unwrap(), s("three"));
        assert_eq!(apply("real", &[s(" 2.5 ")]).unwrap(), n(2.5));
        assert_eq!(apply("real", &[s("abc")]).unwrap(), Value::Missing);
        assert_eq!(apply("string", &[n(1.5)]).unwrap(), s("1.5"));
        assert_eq!(apply("upper", &[s("ab")]).unwrap(), s("AB"));
    }

    #[test]
    fn missing_counts_empty_strings() {
        assert_eq!(apply("missing", &[s("")]).unwrap(), n(1.0));
        assert_eq!(apply("mi", &[n(1.0), s("a")]).unwrap(), n(0.0));
    }

    #[test]
    fn string_argument_to_numeric_function() {
        assert!(matches!(apply("abs", &[s("x")]), Err(EvalError::TypeMismatch(_))));
    }
}
