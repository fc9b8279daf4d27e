//! `recode` rule lists: `(1 2 = 0) (3/5 = 1) (missing = 9) (else = .)`
//!
//! Rules are tried in order and the first match wins. Values that match no
//! rule keep their value.

use super::EvalError;
use std::fmt;

/// End of an `a/b` range; `min` and `max` are the variable's extremes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    Min,
    Max,
    Value(f64),
}

impl Bound {
    fn parse(text: &str) -> Option<Bound> {
        match text {
            "min" => Some(Bound::Min),
            "max" => Some(Bound::Max),
            _ => text.parse().ok().map(Bound::Value),
        }
    }

    fn resolve(self, extremes: Option<(f64, f64)>) -> Option<f64> {
        match self {
            Bound::Value(v) => Some(v),
            Bound::Min => extremes.map(|e| e.0),
            Bound::Max => extremes.map(|e| e.1),
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Min => write!(f, "min"),
            Bound::Max => write!(f, "max"),
            Bound::Value(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecodeMatch {
    Value(f64),
    Range(Bound, Bound),
    Missing,
    NonMissing,
    Else,
}

impl RecodeMatch {
    fn parse(text: &str) -> Result<RecodeMatch, EvalError> {
        let m = match text {
            "missing" | "miss" | "." => RecodeMatch::Missing,
            "nonmissing" | "nonmiss" => RecodeMatch::NonMissing,
            "else" | "*" => RecodeMatch::Else,
            _ => match text.split_once('/') {
                Some((lo, hi)) => match (Bound::parse(lo), Bound::parse(hi)) {
                    (Some(lo), Some(hi)) => RecodeMatch::Range(lo, hi),
                    _ => return Err(invalid_rule(text)),
                },
                None => RecodeMatch::Value(text.parse().map_err(|_| invalid_rule(text))?),
            },
        };
        Ok(m)
    }

    fn matches(&self, value: Option<f64>, extremes: Option<(f64, f64)>) -> bool {
        match (self, value) {
            (RecodeMatch::Else, _) => true,
            (RecodeMatch::Missing, v) => v.is_none(),
            (RecodeMatch::NonMissing, v) => v.is_some(),
            (RecodeMatch::Value(a), Some(v)) => *a == v,
            (RecodeMatch::Range(lo, hi), Some(v)) => {
                match (lo.resolve(extremes), hi.resolve(extremes)) {
                    (Some(lo), Some(hi)) => lo <= v && v <= hi,
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

impl fmt::Display for RecodeMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecodeMatch::Value(v) => write!(f, "{}", v),
            RecodeMatch::Range(lo, hi) => write!(f, "{}/{}", lo, hi),
            RecodeMatch::Missing => write!(f, "missing"),
            RecodeMatch::NonMissing => write!(f, "nonmissing"),
            RecodeMatch::Else => write!(f, "else"),
        }
    }
}

fn invalid_rule(text: &str) -> EvalError {
    EvalError::Invalid(format!("invalid recode rule: {}", text))
}

/// One `(matches = replacement)` rule
#[derive(Debug, Clone, PartialEq)]
pub struct RecodeRule {
    pub matches: Vec<RecodeMatch>,
    pub replacement: Option<f64>,
}

impl RecodeRule {
    /// Parse one parenthesised rule such as `(3/5 = 9)`
    pub fn parse(token: &str) -> Result<RecodeRule, EvalError> {
        let inner = token
            .trim()
            .strip_prefix('(')
            .and_then(|t| t.strip_suffix(')'))
            .ok_or_else(|| invalid_rule(token))?;
        let (lhs, rhs) = inner.split_once('=').ok_or_else(|| invalid_rule(token))?;
        let matches = lhs
            .split_whitespace()
            .map(RecodeMatch::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if matches.is_empty() {
            return Err(invalid_rule(token));
        }
        let replacement = match rhs.trim() {
            "." => None,
            text => Some(text.parse().map_err(|_| invalid_rule(token))?),
        };
        Ok(RecodeRule { matches, replacement })
    }

    /// Parse a rule list; `else` may only appear in the last rule
    pub fn parse_all<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<RecodeRule>, EvalError> {
        let rules = tokens
            .iter()
            .map(|t| RecodeRule::parse(t.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if rules.is_empty() {
            return Err(EvalError::Invalid("no recode rules given".into()));
        }
        let last = rules.len() - 1;
        for (i, rule) in rules.iter().enumerate() {
            let has_else = rule.matches.contains(&RecodeMatch::Else);
            if has_else && (i != last || rule.matches.len() > 1) {
                return Err(EvalError::Invalid("else must be the only match of the last rule".into()));
            }
        }
        Ok(rules)
    }

    /// Apply a rule list to a column, returning new values and the number
    /// of observations that changed
    pub fn apply_all(rules: &[RecodeRule], values: &[Option<f64>]) -> (Vec<Option<f64>>, usize) {
        let present = values.iter().flatten().copied();
        let extremes = present.clone().reduce(f64::min).zip(present.reduce(f64::max));
        let mut changed = 0;
        let out = values
            .iter()
            .map(|&v| {
                let new = rules
                    .iter()
                    .find(|r| r.matches.iter().any(|m| m.matches(v, extremes)))
                    .map_or(v, |r| r.replacement);
                if new != v {
                    changed += 1;
                }
                new
            })
            .collect();
        (out, changed)
    }
}

impl fmt::Display for RecodeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lhs: Vec<String> = self.matches.iter().map(|m| m.to_string()).collect();
        match self.replacement {
            Some(v) => write!(f, "({} = {})", lhs.join(" "), v),
            None => write!(f, "({} = .)", lhs.join(" ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(tokens: &[&str]) -> Vec<RecodeRule> {
        RecodeRule::parse_all(tokens).unwrap()
    }

    #[test]
    fn first_match_wins_and_unmatched_keep() {
        let r = rules(&["(1 2 = 0)", "(2/5 = 1)"]);
        let (out, changed) = RecodeRule::apply_all(&r, &[Some(1.0), Some(2.0), Some(4.0), Some(9.0), None]);
        assert_eq!(out, vec![Some(0.0), Some(0.0), Some(1.0), Some(9.0), None]);
        assert_eq!(changed, 3);
    }

    #[test]
    fn min_max_and_missing() {
        let r = rules(&["(min/2 = 0)", "(3/max = 1)", "(missing = 9)"]);
        let (out, _) = RecodeRule::apply_all(&r, &[Some(-5.0), Some(3.5), None]);
        assert_eq!(out, vec![Some(0.0), Some(1.0), Some(9.0)]);
    }

    #[test]
    fn else_must_come_last() {
        assert!(RecodeRule::parse_all(&["(else = 0)", "(1 = 2)"]).is_err());
        let r = rules(&["(1 = 2)", "(else = .)"]);
        let (out, _) = RecodeRule::apply_all(&r, &[Some(1.0), Some(5.0)]);
        assert_eq!(out, vec![Some(2.0), None]);
    }

    #[test]
    fn malformed_rules() {
        assert!(RecodeRule::parse("1 = 2").is_err());
        assert!(RecodeRule::parse("(a = 2)").is_err());
        assert!(RecodeRule::parse("(1 = b)").is_err());
        assert!(RecodeRule::parse("( = 1)").is_err());
        assert_eq!(RecodeRule::parse("(3/5 = 9)").unwrap().to_string(), "(3/5 = 9)");
    }
}
