// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! A tiny expression language for `if:` conditions attached to dependencies,
//! SCMs, and overrides (spec.md §4.1). Conditions are evaluated against the
//! environment visible at expansion time, never at parse time.

use thiserror::Error;

use crate::Environment;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(String),
    Var(String),
    Truthy(Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Expr {
    pub fn eval(&self, env: &Environment) -> Result<bool, ExprError> {
        Ok(self.eval_value(env)? == "true")
    }

    fn eval_value(&self, env: &Environment) -> Result<String, ExprError> {
        match self {
            Expr::Literal(s) => Ok(s.clone()),
            Expr::Var(name) => Ok(env.get(name).unwrap_or_default().to_string()),
            Expr::Truthy(inner) => {
                let v = inner.eval_value(env)?;
                Ok(bool_str(!v.is_empty() && v != "false" && v != "0"))
            }
            Expr::Not(inner) => {
                let v = inner.eval_value(env)?;
                Ok(bool_str(v != "true"))
            }
            Expr::And(a, b) => {
                if !coerce_bool(a, env)? {
                    return Ok(bool_str(false));
                }
                Ok(bool_str(coerce_bool(b, env)?))
            }
            Expr::Or(a, b) => {
                if coerce_bool(a, env)? {
                    return Ok(bool_str(true));
                }
                Ok(bool_str(coerce_bool(b, env)?))
            }
            Expr::Cmp(op, a, b) => {
                let av = a.eval_value(env)?;
                let bv = b.eval_value(env)?;
                let result = match op {
                    CmpOp::Eq => av == bv,
                    CmpOp::Ne => av != bv,
                    CmpOp::Lt => cmp_numeric_or_lex(&av, &bv) == std::cmp::Ordering::Less,
                    CmpOp::Le => cmp_numeric_or_lex(&av, &bv) != std::cmp::Ordering::Greater,
                    CmpOp::Gt => cmp_numeric_or_lex(&av, &bv) == std::cmp::Ordering::Greater,
                    CmpOp::Ge => cmp_numeric_or_lex(&av, &bv) != std::cmp::Ordering::Less,
                };
                Ok(bool_str(result))
            }
        }
    }
}

fn coerce_bool(expr: &Expr, env: &Environment) -> Result<bool, ExprError> {
    match expr {
        Expr::Var(_) | Expr::Literal(_) => {
            let v = expr.eval_value(env)?;
            Ok(!v.is_empty() && v != "false" && v != "0")
        }
        other => other.eval(env),
    }
}

fn bool_str(b: bool) -> String {
    if b { "true" } else { "false" }.to_string()
}

fn cmp_numeric_or_lex(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.cmp(b),
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExprError {
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected character `{0}` at position {1}")]
    UnexpectedChar(char, usize),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("trailing input: {0:?}")]
    TrailingInput(String),
}

pub fn parse(input: &str) -> Result<Expr, ExprError> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
    };
    let expr = parser.parse_or()?;
    parser.skip_ws();
    if parser.pos != parser.chars.len() {
        return Err(ExprError::TrailingInput(
            parser.chars[parser.pos..].iter().collect(),
        ));
    }
    Ok(expr)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.chars.get(self.pos + i) == Some(&c))
    }

    fn consume(&mut self, s: &str) -> bool {
        self.skip_ws();
        if self.starts_with(s) {
            self.pos += s.chars().count();
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        loop {
            self.skip_ws();
            if self.consume("||") {
                let right = self.parse_and()?;
                left = Expr::Or(Box::new(left), Box::new(right));
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_ws();
            if self.consume("&&") {
                let right = self.parse_unary()?;
                left = Expr::And(Box::new(left), Box::new(right));
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        self.skip_ws();
        if self.consume("!") {
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(Expr::Truthy(Box::new(inner)))));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_atom()?;
        self.skip_ws();
        let op = if self.consume("==") {
            Some(CmpOp::Eq)
        } else if self.consume("!=") {
            Some(CmpOp::Ne)
        } else if self.consume("<=") {
            Some(CmpOp::Le)
        } else if self.consume(">=") {
            Some(CmpOp::Ge)
        } else if self.consume("<") {
            Some(CmpOp::Lt)
        } else if self.consume(">") {
            Some(CmpOp::Gt)
        } else {
            None
        };

        match op {
            Some(op) => {
                let right = self.parse_atom()?;
                Ok(Expr::Cmp(op, Box::new(left), Box::new(right)))
            }
            None => Ok(Expr::Truthy(Box::new(left))),
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, ExprError> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.skip_ws();
                if !self.consume(")") {
                    return Err(ExprError::UnexpectedEnd);
                }
                Ok(inner)
            }
            Some('"') => self.parse_string(),
            Some(c) if c.is_alphanumeric() || c == '_' || c == '.' => self.parse_ident(),
            Some(c) => Err(ExprError::UnexpectedChar(c, self.pos)),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn parse_string(&mut self) -> Result<Expr, ExprError> {
        self.pos += 1; // opening quote
        let mut s = String::new();
        loop {
            match self.peek() {
                Some('"') => {
                    self.pos += 1;
                    return Ok(Expr::Literal(s));
                }
                Some(c) => {
                    s.push(c);
                    self.pos += 1;
                }
                None => return Err(ExprError::UnterminatedString),
            }
        }
    }

    fn parse_ident(&mut self) -> Result<Expr, ExprError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '-')
        {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        Ok(Expr::Var(name))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{EnvMap, Whitelist};

    fn env(pairs: &[(&str, &str)]) -> Environment {
        Environment::new(
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<EnvMap>(),
            Whitelist::from_names(pairs.iter().map(|(k, _)| *k)),
        )
    }

    #[test]
    fn simple_equality() {
        let e = env(&[("ARCH", "x86_64")]);
        assert!(parse("ARCH == \"x86_64\"").unwrap().eval(&e).unwrap());
        assert!(!parse("ARCH == \"aarch64\"").unwrap().eval(&e).unwrap());
    }

    #[test]
    fn logical_combinators() {
        let e = env(&[("A", "1"), ("B", "")]);
        assert!(parse("A && !B").unwrap().eval(&e).unwrap());
        assert!(parse("A || B").unwrap().eval(&e).unwrap());
        assert!(!parse("!A").unwrap().eval(&e).unwrap());
    }

    #[test]
    fn parenthesized() {
        let e = env(&[("A", "1"), ("B", "0")]);
        assert!(parse("(A == \"1\") && !(B == \"1\")").unwrap().eval(&e).unwrap());
    }

    #[test]
    fn unknown_var_is_falsy_not_fatal() {
        let e = env(&[]);
        assert!(!parse("UNSET").unwrap().eval(&e).unwrap());
    }

    #[test]
    fn numeric_ordering() {
        let e = env(&[("N", "10")]);
        assert!(parse("N > \"9\"").unwrap().eval(&e).unwrap());
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse("A && B extra").is_err());
    }
}
