//! Parser for Stata expressions
//!
//! Converts tokens into an `Expr` tree. Precedence, lowest first:
//! `|`, `&`, relational, `+ -`, `* /`, unary minus, `^`, `!`.
//! So `-2^2` is `-4` and `2^3^2` is `64` (left-associative), as in Stata.

use crate::ast::{BinaryOp, Expr, SystemVar, UnaryOp};
use crate::lexer::{lex, LexError, Operator, Token};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("unexpected end of expression")]
    UnexpectedEof,
    #[error("unexpected '{0}'")]
    UnexpectedToken(Token),
    #[error("'=' is not allowed in an expression; use '=='")]
    AssignInExpr,
    #[error("empty expression")]
    EmptyInput,
    #[error(transparent)]
    Lex(#[from] LexError),
}

/// Parser state
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Consume the next token if it is the given operator
    fn eat_op(&mut self, op: Operator) -> bool {
        if self.peek() == Some(&Token::Op(op)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        match self.advance() {
            Some(tok) if tok == expected => Ok(()),
            Some(tok) => Err(ParseError::UnexpectedToken(tok)),
            None => Err(ParseError::UnexpectedEof),
        }
    }

    /// Parse the whole token stream as one expression
    pub fn parse(&mut self) -> Result<Expr, ParseError> {
        if self.is_at_end() {
            return Err(ParseError::EmptyInput);
        }
        let expr = self.parse_or()?;
        match self.advance() {
            None => Ok(expr),
            Some(Token::Op(Operator::Assign)) => Err(ParseError::AssignInExpr),
            Some(tok) => Err(ParseError::UnexpectedToken(tok)),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.eat_op(Operator::Or) {
            let rhs = self.parse_and()?;
            lhs = Expr::binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_relational()?;
        while self.eat_op(Operator::And) {
            let rhs = self.parse_relational()?;
            lhs = Expr::binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(Operator::EqEq)) => BinaryOp::Eq,
                Some(Token::Op(Operator::NotEq)) => BinaryOp::Ne,
                Some(Token::Op(Operator::Lt)) => BinaryOp::Lt,
                Some(Token::Op(Operator::Le)) => BinaryOp::Le,
                Some(Token::Op(Operator::Gt)) => BinaryOp::Gt,
                Some(Token::Op(Operator::Ge)) => BinaryOp::Ge,
                Some(Token::Op(Operator::Assign)) => return Err(ParseError::AssignInExpr),
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_additive()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_op(Operator::Plus) {
                BinaryOp::Add
            } else if self.eat_op(Operator::Minus) {
                BinaryOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_negation()?;
        loop {
            let op = if self.eat_op(Operator::Star) {
                BinaryOp::Mul
            } else if self.eat_op(Operator::Slash) {
                BinaryOp::Div
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_negation()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    fn parse_negation(&mut self) -> Result<Expr, ParseError> {
        if self.eat_op(Operator::Minus) {
            let operand = self.parse_negation()?;
            return Ok(Expr::unary(UnaryOp::Neg, operand));
        }
        if self.eat_op(Operator::Plus) {
            return self.parse_negation();
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_not()?;
        while self.eat_op(Operator::Caret) {
            // allow a signed exponent: 2^-1
            let rhs = if self.eat_op(Operator::Minus) {
                Expr::unary(UnaryOp::Neg, self.parse_not()?)
            } else {
                self.parse_not()?
            };
            lhs = Expr::binary(BinaryOp::Pow, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.eat_op(Operator::Not) {
            let operand = self.parse_not()?;
            return Ok(Expr::unary(UnaryOp::Not, operand));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.advance().ok_or(ParseError::UnexpectedEof)?;

        match token {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Missing => Ok(Expr::Missing),
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::TsPrefix { op, order } => match self.advance() {
                Some(Token::Ident(name)) => Ok(Expr::TimeSeries { op, order, name }),
                Some(tok) => Err(ParseError::UnexpectedToken(tok)),
                None => Err(ParseError::UnexpectedEof),
            },
            Token::Ident(name) => self.parse_name(name),
            Token::Op(Operator::Assign) => Err(ParseError::AssignInExpr),
            other => Err(ParseError::UnexpectedToken(other)),
        }
    }

    /// A name is a function call, a subscripted variable, a system
    /// variable or a plain variable reference
    fn parse_name(&mut self, name: String) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                let mut args = Vec::new();
                if self.peek() == Some(&Token::RParen) {
                    self.pos += 1;
                    return Ok(Expr::Call { name: name.to_lowercase(), args });
                }
                loop {
                    args.push(self.parse_or()?);
                    match self.advance() {
                        Some(Token::Comma) => continue,
                        Some(Token::RParen) => break,
                        Some(tok) => return Err(ParseError::UnexpectedToken(tok)),
                        None => return Err(ParseError::UnexpectedEof),
                    }
                }
                Ok(Expr::Call { name: name.to_lowercase(), args })
            }
            Some(Token::LBracket) => {
                self.pos += 1;
                let index = self.parse_or()?;
                self.expect(Token::RBracket)?;
                Ok(Expr::Subscript { name, index: Box::new(index) })
            }
            _ => Ok(match SystemVar::from_name(&name) {
                Some(sv) => Expr::System(sv),
                None => Expr::Var(name),
            }),
        }
    }
}

/// Lex and parse an expression
pub fn parse_expr(input: &str) -> Result<Expr, ParseError> {
    let tokens = lex(input)?;
    Parser::new(tokens).parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::TsOp;

    fn var(name: &str) -> Expr {
        Expr::Var(name.into())
    }

    #[test]
    fn parse_precedence() {
        let expr = parse_expr("a + b * c").unwrap();
        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::Add,
                var("a"),
                Expr::binary(BinaryOp::Mul, var("b"), var("c"))
            )
        );
    }

    #[test]
    fn negation_binds_looser_than_power() {
        let expr = parse_expr("-2^2").unwrap();
        assert_eq!(
            expr,
            Expr::unary(
                UnaryOp::Neg,
                Expr::binary(BinaryOp::Pow, Expr::Number(2.0), Expr::Number(2.0))
            )
        );
    }

    #[test]
    fn power_is_left_associative() {
        let expr = parse_expr("2^3^2").unwrap();
        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::Pow,
                Expr::binary(BinaryOp::Pow, Expr::Number(2.0), Expr::Number(3.0)),
                Expr::Number(2.0)
            )
        );
    }

    #[test]
    fn logical_precedence() {
        // a | b & c  ==  a | (b & c)
        let expr = parse_expr("a | b & c").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Or, .. }));
    }

    #[test]
    fn parse_call_and_subscript() {
        let expr = parse_expr("max(x[_n-1], 0)").unwrap();
        match expr {
            Expr::Call { name, args } => {
                assert_eq!(name, "max");
                assert_eq!(args.len(), 2);
                assert!(matches!(args[0], Expr::Subscript { .. }));
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn parse_system_variables() {
        assert_eq!(parse_expr("_N").unwrap(), Expr::System(SystemVar::ObsCount));
        assert_eq!(parse_expr("_n").unwrap(), Expr::System(SystemVar::ObsNumber));
    }

    #[test]
    fn parse_time_series() {
        assert_eq!(
            parse_expr("D.y").unwrap(),
            Expr::TimeSeries { op: TsOp::Diff, order: 1, name: "y".into() }
        );
    }

    #[test]
    fn single_equals_is_rejected() {
        assert_eq!(parse_expr("x = 1"), Err(ParseError::AssignInExpr));
    }

    #[test]
    fn unbalanced_paren() {
        assert_eq!(parse_expr("(x + 1"), Err(ParseError::UnexpectedEof));
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        assert!(matches!(parse_expr("x y"), Err(ParseError::UnexpectedToken(_))));
    }

    #[test]
    fn display_reparses_to_same_tree() {
        for src in ["-x^2 + 3", "!(a & b) | c >= 2", "substr(s, 1, 3) + \"z\"", "L2.x - x[_n+1]"] {
            let expr = parse_expr(src).unwrap();
            let again = parse_expr(&expr.to_string()).unwrap();
            assert_eq!(expr, again, "round trip of {}", src);
        }
    }
}
