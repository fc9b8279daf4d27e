//! Tokenization for Stata expressions
//!
//! Tokens are the atoms of `generate`/`replace` right-hand sides and `if`
//! conditions: numbers, strings, names, time-series prefixes (`L2.`),
//! the missing literal and operators.

use crate::ast::TsOp;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit0, digit1, one_of, satisfy},
    combinator::{map, map_res, opt, peek, recognize, value},
    sequence::{pair, tuple},
    IResult,
};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    /// A lone `=`, only meaningful outside expressions
    Assign,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    /// A double-quoted string
    Str(String),
    /// A variable, function or system-variable name
    Ident(String),
    /// Time-series prefix such as `L.` or `D2.`
    TsPrefix { op: TsOp, order: u32 },
    /// The missing literal `.` (extended missing `.a`-`.z` lexes the same)
    Missing,
    Op(Operator),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Ident(s) => write!(f, "{}", s),
            Token::TsPrefix { op, order } => write!(f, "{}{}.", op.prefix(), order),
            Token::Missing => write!(f, "."),
            Token::Op(op) => write!(f, "{}", operator_symbol(*op)),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
        }
    }
}

fn operator_symbol(op: Operator) -> &'static str {
    match op {
        Operator::Plus => "+",
        Operator::Minus => "-",
        Operator::Star => "*",
        Operator::Slash => "/",
        Operator::Caret => "^",
        Operator::EqEq => "==",
        Operator::NotEq => "!=",
        Operator::Lt => "<",
        Operator::Le => "<=",
        Operator::Gt => ">",
        Operator::Ge => ">=",
        Operator::And => "&",
        Operator::Or => "|",
        Operator::Not => "!",
        Operator::Assign => "=",
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexError {
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),
    #[error("unterminated string starting at position {0}")]
    UnterminatedString(usize),
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Parse a double-quoted string (Stata strings have no escapes)
fn string(input: &str) -> IResult<&str, Token> {
    let (input, _) = char('"')(input)?;
    let (input, content) = take_while(|c| c != '"')(input)?;
    let (input, _) = char('"')(input)?;
    Ok((input, Token::Str(content.to_string())))
}

/// Parse a number: `12`, `1.5`, `.5`, `2e-3`
fn number(input: &str) -> IResult<&str, Token> {
    map_res(
        recognize(tuple((
            alt((
                recognize(pair(digit1, opt(pair(char('.'), digit0)))),
                recognize(pair(char('.'), digit1)),
            )),
            opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        ))),
        |s: &str| s.parse::<f64>().map(Token::Number),
    )(input)
}

/// Parse a time-series prefix: `L.`, `F3.`, `D.` (must precede a name)
fn ts_prefix(input: &str) -> IResult<&str, Token> {
    let (rest, (op, digits, _)) = tuple((one_of("LFDlfd"), digit0, char('.')))(input)?;
    let (_, _) = peek(satisfy(is_ident_start))(rest)?;
    let op = match op.to_ascii_uppercase() {
        'L' => TsOp::Lag,
        'F' => TsOp::Lead,
        _ => TsOp::Diff,
    };
    let order = if digits.is_empty() {
        1
    } else {
        digits.parse().unwrap_or(1)
    };
    Ok((rest, Token::TsPrefix { op, order }))
}

/// Parse a name
fn ident(input: &str) -> IResult<&str, Token> {
    map(
        recognize(pair(satisfy(is_ident_start), take_while(is_ident_char))),
        |s: &str| Token::Ident(s.to_string()),
    )(input)
}

/// Parse the missing literal, including extended missing `.a`-`.z`
fn missing(input: &str) -> IResult<&str, Token> {
    let (rest, _) = char('.')(input)?;
    let mut chars = rest.chars();
    if let Some(c) = chars.next() {
        if c.is_ascii_lowercase() && !chars.next().is_some_and(is_ident_char) {
            return Ok((&rest[1..], Token::Missing));
        }
    }
    Ok((rest, Token::Missing))
}

fn operator(input: &str) -> IResult<&str, Token> {
    alt((
        value(Token::Op(Operator::EqEq), tag("==")),
        value(Token::Op(Operator::NotEq), tag("!=")),
        value(Token::Op(Operator::NotEq), tag("~=")),
        value(Token::Op(Operator::Le), tag("<=")),
        value(Token::Op(Operator::Ge), tag(">=")),
        value(Token::Op(Operator::Lt), char('<')),
        value(Token::Op(Operator::Gt), char('>')),
        value(Token::Op(Operator::Assign), char('=')),
        value(Token::Op(Operator::And), char('&')),
        value(Token::Op(Operator::Or), char('|')),
        value(Token::Op(Operator::Not), char('!')),
        value(Token::Op(Operator::Not), char('~')),
        value(Token::Op(Operator::Plus), char('+')),
        value(Token::Op(Operator::Minus), char('-')),
        value(Token::Op(Operator::Star), char('*')),
        value(Token::Op(Operator::Slash), char('/')),
        value(Token::Op(Operator::Caret), char('^')),
    ))(input)
}

fn punctuation(input: &str) -> IResult<&str, Token> {
    alt((
        value(Token::LParen, char('(')),
        value(Token::RParen, char(')')),
        value(Token::LBracket, char('[')),
        value(Token::RBracket, char(']')),
        value(Token::Comma, char(',')),
    ))(input)
}

/// Parse any single token
fn token(input: &str) -> IResult<&str, Token> {
    alt((string, number, ts_prefix, ident, missing, operator, punctuation))(input)
}

/// Tokenize an expression
pub fn lex(input: &str) -> Result<Vec<Token>, LexError> {
    let mut tokens = Vec::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let pos = input.len() - rest.len();
        if rest.starts_with('"') && !rest[1..].contains('"') {
            return Err(LexError::UnterminatedString(pos));
        }
        match token(rest) {
            Ok((next, tok)) => {
                tokens.push(tok);
                rest = next;
            }
            Err(_) => {
                let c = rest.chars().next().unwrap_or(' ');
                return Err(LexError::UnexpectedChar(c, pos));
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lex_arithmetic() {
        let tokens = lex("x + 2.5*y").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("x".into()),
                Token::Op(Operator::Plus),
                Token::Number(2.5),
                Token::Op(Operator::Star),
                Token::Ident("y".into()),
            ]
        );
    }

    #[test]
    fn lex_missing_versus_decimal() {
        assert_eq!(lex(".").unwrap(), vec![Token::Missing]);
        assert_eq!(lex(".5").unwrap(), vec![Token::Number(0.5)]);
        assert_eq!(lex(".a").unwrap(), vec![Token::Missing]);
    }

    #[test]
    fn lex_time_series_prefix() {
        assert_eq!(
            lex("L2.gdp").unwrap(),
            vec![
                Token::TsPrefix { op: TsOp::Lag, order: 2 },
                Token::Ident("gdp".into()),
            ]
        );
        // A name starting with L is not a prefix
        assert_eq!(lex("Lx").unwrap(), vec![Token::Ident("Lx".into())]);
    }

    #[test]
    fn lex_comparison_operators() {
        let tokens = lex("a ~= b & c >= 1").unwrap();
        assert_eq!(tokens[1], Token::Op(Operator::NotEq));
        assert_eq!(tokens[3], Token::Op(Operator::And));
        assert_eq!(tokens[5], Token::Op(Operator::Ge));
    }

    #[test]
    fn lex_string() {
        assert_eq!(lex("\"a b\"").unwrap(), vec![Token::Str("a b".into())]);
    }

    #[test]
    fn lex_unterminated_string() {
        assert!(matches!(lex("\"abc"), Err(LexError::UnterminatedString(0))));
    }

    #[test]
    fn lex_unexpected_char() {
        assert!(matches!(lex("x # 2"), Err(LexError::UnexpectedChar('#', 2))));
    }
}
