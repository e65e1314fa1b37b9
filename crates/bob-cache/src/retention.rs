// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! The retention-expression language used by `archive clean`/`find`
//! (spec.md §4.6): string literals, dotted field references, comparisons,
//! logical combinators, parentheses, and an optional `LIMIT n [ORDER BY
//! field [ASC|DESC]]` clause. An artifact is kept if it matches the
//! expression directly, or is transitively referenced by a kept artifact.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Str(String),
    /// A field with no value for this record. Comparable only via `==`/`!=`
    /// (spec.md §4.6); any other operator against it is simply false.
    Undefined,
}

/// Something the retention language can query: an audit trail, most often.
pub trait Record {
    fn id(&self) -> &str;
    fn field(&self, name: &str) -> FieldValue;
    /// Ids of other records this one references (its input artifacts).
    fn references(&self) -> &[String];
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

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(String),
    Field(String),
    Truthy(Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limit {
    pub count: usize,
    pub order_by: Option<(String, SortDir)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionQuery {
    pub expr: Expr,
    pub limit: Option<Limit>,
}

impl Expr {
    fn eval<R: Record>(&self, record: &R) -> bool {
        self.eval_value(record).truthy()
    }

    fn eval_value<R: Record>(&self, record: &R) -> EvalValue {
        match self {
            Expr::Literal(s) => EvalValue::Value(FieldValue::Str(s.clone())),
            Expr::Field(name) => EvalValue::Value(record.field(name)),
            Expr::Truthy(inner) => EvalValue::Bool(inner.eval_value(record).truthy()),
            Expr::Not(inner) => EvalValue::Bool(!inner.eval_value(record).truthy()),
            Expr::And(a, b) => EvalValue::Bool(a.eval(record) && b.eval(record)),
            Expr::Or(a, b) => EvalValue::Bool(a.eval(record) || b.eval(record)),
            Expr::Cmp(op, a, b) => {
                let av = a.eval_value(record).into_field();
                let bv = b.eval_value(record).into_field();
                EvalValue::Bool(compare(*op, &av, &bv))
            }
        }
    }
}

enum EvalValue {
    Value(FieldValue),
    Bool(bool),
}

impl EvalValue {
    fn truthy(&self) -> bool {
        match self {
            EvalValue::Bool(b) => *b,
            EvalValue::Value(FieldValue::Str(s)) => !s.is_empty() && s != "false" && s != "0",
            EvalValue::Value(FieldValue::Undefined) => false,
        }
    }

    fn into_field(self) -> FieldValue {
        match self {
            EvalValue::Value(v) => v,
            EvalValue::Bool(b) => FieldValue::Str(if b { "true".to_string() } else { "false".to_string() }),
        }
    }
}

fn compare(op: CmpOp, a: &FieldValue, b: &FieldValue) -> bool {
    if matches!(a, FieldValue::Undefined) || matches!(b, FieldValue::Undefined) {
        return match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            _ => false,
        };
    }
    let (FieldValue::Str(sa), FieldValue::Str(sb)) = (a, b);
    match op {
        CmpOp::Eq => sa == sb,
        CmpOp::Ne => sa != sb,
        CmpOp::Lt => cmp_numeric_or_lex(sa, sb) == std::cmp::Ordering::Less,
        CmpOp::Le => cmp_numeric_or_lex(sa, sb) != std::cmp::Ordering::Greater,
        CmpOp::Gt => cmp_numeric_or_lex(sa, sb) == std::cmp::Ordering::Greater,
        CmpOp::Ge => cmp_numeric_or_lex(sa, sb) != std::cmp::Ordering::Less,
    }
}

fn cmp_numeric_or_lex(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.cmp(b),
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetentionError {
    #[error("unexpected end of retention expression")]
    UnexpectedEnd,
    #[error("unexpected character `{0}` at position {1}")]
    UnexpectedChar(char, usize),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("expected a number after LIMIT")]
    ExpectedLimitCount,
    #[error("trailing input: {0:?}")]
    TrailingInput(String),
}

pub fn parse(input: &str) -> Result<RetentionQuery, RetentionError> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
    };
    let expr = parser.parse_or()?;
    parser.skip_ws();
    let limit = if parser.consume_keyword("LIMIT") {
        let count = parser.parse_number()?;
        let order_by = if parser.consume_keyword("ORDER") {
            if !parser.consume_keyword("BY") {
                return Err(RetentionError::UnexpectedEnd);
            }
            let field = parser.parse_dotted_ident()?;
            let dir = if parser.consume_keyword("DESC") {
                SortDir::Desc
            } else {
                parser.consume_keyword("ASC");
                SortDir::Asc
            };
            Some((field, dir))
        } else {
            None
        };
        Some(Limit { count, order_by })
    } else {
        None
    };

    parser.skip_ws();
    if parser.pos != parser.chars.len() {
        return Err(RetentionError::TrailingInput(parser.chars[parser.pos..].iter().collect()));
    }
    Ok(RetentionQuery { expr, limit })
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
        s.chars().enumerate().all(|(i, c)| self.chars.get(self.pos + i) == Some(&c))
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

    /// Consume a case-sensitive keyword, requiring a non-identifier
    /// boundary after it (so `ORDER` doesn't match a field named `ORDERING`).
    fn consume_keyword(&mut self, keyword: &str) -> bool {
        self.skip_ws();
        if !self.starts_with(keyword) {
            return false;
        }
        let after = self.pos + keyword.chars().count();
        if self.chars.get(after).is_some_and(|c| c.is_alphanumeric() || *c == '_') {
            return false;
        }
        self.pos = after;
        true
    }

    fn parse_or(&mut self) -> Result<Expr, RetentionError> {
        let mut left = self.parse_and()?;
        while self.consume("||") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, RetentionError> {
        let mut left = self.parse_unary()?;
        while self.consume("&&") {
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, RetentionError> {
        if self.consume("!") {
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(Expr::Truthy(Box::new(inner)))));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, RetentionError> {
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

    fn parse_atom(&mut self) -> Result<Expr, RetentionError> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.skip_ws();
                if !self.consume(")") {
                    return Err(RetentionError::UnexpectedEnd);
                }
                Ok(inner)
            }
            Some('"') => self.parse_string(),
            Some(c) if c.is_alphanumeric() || c == '_' || c == '.' => Ok(Expr::Field(self.parse_dotted_ident()?)),
            Some(c) => Err(RetentionError::UnexpectedChar(c, self.pos)),
            None => Err(RetentionError::UnexpectedEnd),
        }
    }

    fn parse_string(&mut self) -> Result<Expr, RetentionError> {
        self.pos += 1;
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
                None => return Err(RetentionError::UnterminatedString),
            }
        }
    }

    fn parse_dotted_ident(&mut self) -> Result<String, RetentionError> {
        self.skip_ws();
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '-') {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(RetentionError::UnexpectedEnd);
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn parse_number(&mut self) -> Result<usize, RetentionError> {
        self.skip_ws();
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(RetentionError::ExpectedLimitCount);
        }
        self.chars[start..self.pos]
            .iter()
            .collect::<String>()
            .parse()
            .map_err(|_| RetentionError::ExpectedLimitCount)
    }
}

/// Apply a retention query to a record set, returning the ids kept: direct
/// matches (after LIMIT/ORDER BY truncation) plus anything they
/// transitively reference.
pub fn compute_kept<R: Record>(records: &[R], query: &RetentionQuery) -> BTreeSet<String> {
    let mut matched: Vec<&R> = records.iter().filter(|r| query.expr.eval(*r)).collect();

    if let Some(limit) = &query.limit {
        match &limit.order_by {
            Some((field, dir)) => {
                matched.sort_by(|a, b| {
                    let ordering = cmp_field_value(&a.field(field), &b.field(field));
                    match dir {
                        SortDir::Asc => ordering,
                        SortDir::Desc => ordering.reverse(),
                    }
                });
            }
            // No explicit ORDER BY: default to newest-first by build date,
            // matching the common "keep the N most recent" use of LIMIT.
            None => {
                matched.sort_by(|a, b| cmp_field_value(&b.field("build.date"), &a.field("build.date")));
            }
        }
        matched.truncate(limit.count);
    }

    let mut kept: BTreeSet<String> = matched.iter().map(|r| r.id().to_string()).collect();

    let index: HashMap<&str, &R> = records.iter().map(|r| (r.id(), r)).collect();
    let mut frontier: Vec<String> = kept.iter().cloned().collect();
    while let Some(id) = frontier.pop() {
        if let Some(record) = index.get(id.as_str()) {
            for reference in record.references() {
                if kept.insert(reference.clone()) {
                    frontier.push(reference.clone());
                }
            }
        }
    }
    kept
}

fn cmp_field_value(a: &FieldValue, b: &FieldValue) -> std::cmp::Ordering {
    match (a, b) {
        (FieldValue::Str(x), FieldValue::Str(y)) => cmp_numeric_or_lex(x, y),
        (FieldValue::Undefined, FieldValue::Undefined) => std::cmp::Ordering::Equal,
        (FieldValue::Undefined, _) => std::cmp::Ordering::Less,
        (_, FieldValue::Undefined) => std::cmp::Ordering::Greater,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Rec {
        id: String,
        recipe: String,
        date: i64,
        refs: Vec<String>,
    }

    impl Record for Rec {
        fn id(&self) -> &str {
            &self.id
        }

        fn references(&self) -> &[String] {
            &self.refs
        }

        fn field(&self, name: &str) -> FieldValue {
            match name {
                "meta.recipe" => FieldValue::Str(self.recipe.clone()),
                "build.date" => FieldValue::Str(format!("{:020}", self.date)),
                _ => FieldValue::Undefined,
            }
        }
    }

    fn rec(id: &str, recipe: &str, date: i64) -> Rec {
        Rec {
            id: id.to_string(),
            recipe: recipe.to_string(),
            date,
            refs: vec![],
        }
    }

    #[test]
    fn simple_equality_with_limit() {
        let records: Vec<Rec> = (0..7).map(|i| rec(&format!("r{i}"), "many", 1000 + i)).collect();
        let query = parse(r#"meta.recipe == "many" LIMIT 3"#).unwrap();
        let kept = compute_kept(&records, &query);
        assert_eq!(kept.len(), 3);
        assert!(kept.contains("r6"));
        assert!(kept.contains("r5"));
        assert!(kept.contains("r4"));
    }

    #[test]
    fn transitive_reference_is_kept() {
        let leaf = Rec {
            id: "leaf".to_string(),
            recipe: "dep".to_string(),
            date: 1,
            refs: vec![],
        };
        let root = Rec {
            id: "root".to_string(),
            recipe: "many".to_string(),
            date: 2,
            refs: vec!["leaf".to_string()],
        };
        let records = vec![leaf, root];
        let query = parse(r#"meta.recipe == "many""#).unwrap();
        let kept = compute_kept(&records, &query);
        assert!(kept.contains("root"));
        assert!(kept.contains("leaf"));
    }

    #[test]
    fn unknown_field_is_undefined_and_only_eq_ne_meaningful() {
        let records = vec![rec("a", "many", 1)];
        let query = parse(r#"missing.field == "x""#).unwrap();
        assert!(compute_kept(&records, &query).is_empty());

        let query2 = parse(r#"missing.field != "x""#).unwrap();
        assert_eq!(compute_kept(&records, &query2).len(), 1);
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse(r#"meta.recipe == "x" extra"#).is_err());
    }
}
