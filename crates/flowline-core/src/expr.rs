//! Filter expressions used by `where` and by predicate pushdown.
//!
//! Only what the optimizer needs: conjunction with trivially-true
//! simplification, row evaluation, and a tiny `field op literal` parser.
//! A missing field or a null value makes a comparison false; evaluation never
//! fails.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::ConstructionError;
use crate::types::{EventBatch, Scalar};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "==" | "=" => Some(CmpOp::Eq),
            "!=" => Some(CmpOp::Ne),
            "<" => Some(CmpOp::Lt),
            "<=" => Some(CmpOp::Le),
            ">" => Some(CmpOp::Gt),
            ">=" => Some(CmpOp::Ge),
            _ => None,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    fn holds(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    True,
    Compare {
        field: String,
        op: CmpOp,
        value: Scalar,
    },
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
}

impl Default for Expression {
    fn default() -> Self {
        Expression::True
    }
}

impl Expression {
    pub fn compare(field: impl Into<String>, op: CmpOp, value: Scalar) -> Self {
        Expression::Compare {
            field: field.into(),
            op,
            value,
        }
    }

    pub fn is_trivially_true(&self) -> bool {
        match self {
            Expression::True => true,
            Expression::And(terms) => terms.iter().all(Expression::is_trivially_true),
            _ => false,
        }
    }

    /// `self && other`, dropping trivially-true operands and flattening
    /// nested conjunctions.
    pub fn conjoin(self, other: Expression) -> Expression {
        let mut terms = Vec::new();
        for expr in [self, other] {
            match expr {
                e if e.is_trivially_true() => {}
                Expression::And(inner) => terms.extend(inner),
                e => terms.push(e),
            }
        }
        match terms.len() {
            0 => Expression::True,
            1 => terms.pop().unwrap_or(Expression::True),
            _ => Expression::And(terms),
        }
    }

    /// Field names referenced by the expression.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expression::True => {}
            Expression::Compare { field, .. } => {
                if !out.contains(&field.as_str()) {
                    out.push(field);
                }
            }
            Expression::And(terms) | Expression::Or(terms) => {
                for t in terms {
                    t.collect_fields(out);
                }
            }
            Expression::Not(inner) => inner.collect_fields(out),
        }
    }

    /// One boolean per row of `batch`.
    pub fn eval_rows(&self, batch: &EventBatch) -> Vec<bool> {
        (0..batch.rows()).map(|i| self.eval_row(batch, i)).collect()
    }

    fn eval_row(&self, batch: &EventBatch, row: usize) -> bool {
        match self {
            Expression::True => true,
            Expression::Compare { field, op, value } => batch
                .column(field)
                .and_then(|c| c.values.get(row))
                .and_then(|v| v.compare(value))
                .map(|ord| op.holds(ord))
                .unwrap_or(false),
            Expression::And(terms) => terms.iter().all(|t| t.eval_row(batch, row)),
            Expression::Or(terms) => terms.iter().any(|t| t.eval_row(batch, row)),
            Expression::Not(inner) => !inner.eval_row(batch, row),
        }
    }

    /// Parse `field op literal [and field op literal ...]`, or `true`.
    pub fn parse(src: &str) -> Result<Self, ConstructionError> {
        let src = src.trim();
        if src.is_empty() || src == "true" {
            return Ok(Expression::True);
        }
        let mut expr = Expression::True;
        for clause in split_and(src) {
            expr = expr.conjoin(parse_comparison(clause)?);
        }
        Ok(expr)
    }
}

fn split_and(src: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = src;
    while let Some(pos) = rest.find(" and ") {
        out.push(rest[..pos].trim());
        rest = &rest[pos + 5..];
    }
    out.push(rest.trim());
    out
}

fn parse_comparison(clause: &str) -> Result<Expression, ConstructionError> {
    // Two-character operators first so `<=` does not match as `<`.
    const OPS: [&str; 7] = ["==", "!=", "<=", ">=", "<", ">", "="];
    for op in OPS {
        if let Some(pos) = clause.find(op) {
            let field = clause[..pos].trim();
            let literal = clause[pos + op.len()..].trim();
            if field.is_empty() || literal.is_empty() {
                break;
            }
            let op = CmpOp::parse(op).ok_or_else(|| invalid(clause))?;
            return Ok(Expression::compare(field, op, parse_literal(literal)));
        }
    }
    Err(invalid(clause))
}

fn invalid(clause: &str) -> ConstructionError {
    ConstructionError::InvalidArgument {
        operator: "where".into(),
        message: format!("unparseable predicate `{clause}`"),
    }
}

fn parse_literal(literal: &str) -> Scalar {
    if literal == "null" {
        return Scalar::Null;
    }
    if let Ok(b) = literal.parse::<bool>() {
        return Scalar::Bool(b);
    }
    if let Ok(i) = literal.parse::<i64>() {
        return Scalar::I64(i);
    }
    if let Ok(f) = literal.parse::<f64>() {
        return Scalar::F64(f);
    }
    let unquoted = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| literal.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(literal);
    Scalar::Str(unquoted.to_string())
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::True => write!(f, "true"),
            Expression::Compare { field, op, value } => {
                write!(f, "{field} {} {value}", op.symbol())
            }
            Expression::And(terms) => write_joined(f, terms, " and "),
            Expression::Or(terms) => {
                write!(f, "(")?;
                write_joined(f, terms, " or ")?;
                write!(f, ")")
            }
            Expression::Not(inner) => write!(f, "not ({inner})"),
        }
    }
}

fn write_joined(
    f: &mut std::fmt::Formatter<'_>,
    terms: &[Expression],
    sep: &str,
) -> std::fmt::Result {
    for (i, t) in terms.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{t}")?;
    }
    Ok(())
}
