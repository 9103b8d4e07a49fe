//! Row predicates used by filters and compliance analyzers.
//!
//! Supported forms: `a AND b`, `col IS NULL OR <expr>`, `col IS [NOT] NULL`,
//! `col IN (...)`, `col = ANY(ARRAY[...])`, `col BETWEEN x AND y` and binary
//! comparisons against a literal or another column. Expressions are parsed
//! once per scan; evaluation never fails, rows the predicate cannot judge
//! are reported as [`PredicateOutcome::Unsupported`].

use std::collections::HashMap;

use regex::Regex;

use dataproof_core::Value;

use crate::error::ExecutionError;

/// Result of evaluating a predicate against one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateOutcome {
    Passed,
    Failed,
    Unsupported,
}

impl PredicateOutcome {
    fn from_bool(pass: bool) -> Self {
        if pass {
            PredicateOutcome::Passed
        } else {
            PredicateOutcome::Failed
        }
    }
}

/// Column lookup for a single row.
#[derive(Debug, Clone, Copy)]
pub struct RowContext<'a> {
    pub columns: &'a HashMap<String, usize>,
    pub row: &'a [Value],
}

impl<'a> RowContext<'a> {
    /// `columns` must be keyed by lowercase column name.
    pub fn new(columns: &'a HashMap<String, usize>, row: &'a [Value]) -> Self {
        Self { columns, row }
    }

    fn get(&self, column: &str) -> Option<&'a Value> {
        let idx = *self.columns.get(column)?;
        self.row.get(idx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "=" | "==" => Some(CompareOp::Eq),
            "!=" | "<>" => Some(CompareOp::NotEq),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::LtEq),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::GtEq),
            _ => None,
        }
    }

    fn holds<T: PartialOrd>(self, left: T, right: T) -> bool {
        match self {
            CompareOp::Eq => left == right,
            CompareOp::NotEq => left != right,
            CompareOp::Lt => left < right,
            CompareOp::LtEq => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::GtEq => left >= right,
        }
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Number(f64),
    Text(String),
    Bool(bool),
    Column(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    And(Vec<Predicate>),
    NullOr {
        column: String,
        rest: Box<Predicate>,
    },
    IsNull {
        column: String,
        negated: bool,
    },
    In {
        column: String,
        values: Vec<String>,
    },
    Between {
        column: String,
        min: f64,
        max: f64,
    },
    Compare {
        column: String,
        op: CompareOp,
        rhs: Operand,
    },
}

impl Predicate {
    pub fn parse(expression: &str) -> Result<Self, ExecutionError> {
        let expr = normalize_expression(expression);
        if expr.is_empty() {
            return Err(ExecutionError::UnsupportedExpression(expression.to_string()));
        }
        parse_expression(&expr)
            .ok_or_else(|| ExecutionError::UnsupportedExpression(expression.to_string()))
    }

    /// Lowercase names of every column the predicate reads.
    pub fn columns(&self) -> Vec<&str> {
        let mut columns = Vec::new();
        self.collect_columns(&mut columns);
        columns
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::And(parts) => parts.iter().for_each(|part| part.collect_columns(out)),
            Predicate::NullOr { column, rest } => {
                out.push(column);
                rest.collect_columns(out);
            }
            Predicate::IsNull { column, .. }
            | Predicate::In { column, .. }
            | Predicate::Between { column, .. } => out.push(column),
            Predicate::Compare { column, rhs, .. } => {
                out.push(column);
                if let Operand::Column(other) = rhs {
                    out.push(other);
                }
            }
        }
    }

    pub fn evaluate(&self, ctx: &RowContext<'_>) -> PredicateOutcome {
        match self {
            Predicate::And(parts) => {
                for part in parts {
                    match part.evaluate(ctx) {
                        PredicateOutcome::Passed => continue,
                        other => return other,
                    }
                }
                PredicateOutcome::Passed
            }
            Predicate::NullOr { column, rest } => {
                if is_null(column, ctx) {
                    PredicateOutcome::Passed
                } else {
                    rest.evaluate(ctx)
                }
            }
            Predicate::IsNull { column, negated } => match ctx.get(column) {
                Some(value) => PredicateOutcome::from_bool(value.is_null() != *negated),
                None => PredicateOutcome::Unsupported,
            },
            Predicate::In { column, values } => evaluate_in(column, values, ctx),
            Predicate::Between { column, min, max } => {
                match ctx.get(column).and_then(Value::as_f64) {
                    Some(num) => PredicateOutcome::from_bool(num >= *min && num <= *max),
                    None => PredicateOutcome::Unsupported,
                }
            }
            Predicate::Compare { column, op, rhs } => evaluate_comparison(column, *op, rhs, ctx),
        }
    }

    pub fn matches(&self, ctx: &RowContext<'_>) -> bool {
        self.evaluate(ctx) == PredicateOutcome::Passed
    }
}

fn parse_expression(expr: &str) -> Option<Predicate> {
    let expr = normalize_expression(expr);

    if let Some(parts) = split_and(&expr) {
        let parts = parts
            .iter()
            .map(|part| parse_expression(part))
            .collect::<Option<Vec<_>>>()?;
        return Some(Predicate::And(parts));
    }

    if let Some((column, rest)) = parse_is_null_or(&expr) {
        return Some(Predicate::NullOr {
            column,
            rest: Box::new(parse_expression(&rest)?),
        });
    }

    if let Some((column, negated)) = parse_is_null(&expr) {
        return Some(Predicate::IsNull { column, negated });
    }

    if let Some((column, values)) = parse_any_array(&expr) {
        return Some(Predicate::In { column, values });
    }

    if let Some((column, values)) = parse_in_list(&expr) {
        return Some(Predicate::In { column, values });
    }

    if let Some((column, min, max)) = parse_between(&expr) {
        return Some(Predicate::Between {
            column,
            min: min.parse().ok()?,
            max: max.parse().ok()?,
        });
    }

    if let Some((column, op, rhs)) = parse_comparison(&expr) {
        return Some(Predicate::Compare {
            column,
            op: CompareOp::parse(&op)?,
            rhs: parse_operand(&rhs),
        });
    }

    None
}

fn normalize_expression(expression: &str) -> String {
    let mut expr = expression.trim().to_string();
    while expr.starts_with('(') && expr.ends_with(')') && balanced(&expr[1..expr.len() - 1]) {
        expr = expr[1..expr.len() - 1].trim().to_string();
    }
    expr
}

fn balanced(expr: &str) -> bool {
    let mut depth = 0i32;
    for ch in expr.chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Split on top-level `AND` outside single quotes, keeping the `AND` of a
/// `BETWEEN` attached.
fn split_and(expr: &str) -> Option<Vec<String>> {
    let re = Regex::new(r"(?i)\s+and\s+").ok()?;
    let between_tail = Regex::new(r"(?i)\bbetween\s+\S+$").ok()?;
    let mut parts: Vec<String> = Vec::new();
    let mut last = 0;
    let unquoted = re
        .find_iter(expr)
        .filter(|found| expr[..found.start()].matches('\'').count() % 2 == 0);
    for found in unquoted {
        let piece = expr[last..found.start()].trim();
        match parts.last_mut() {
            Some(previous) if between_tail.is_match(previous) => {
                previous.push_str(" AND ");
                previous.push_str(piece);
            }
            _ => parts.push(piece.to_string()),
        }
        last = found.end();
    }
    let tail = expr[last..].trim();
    match parts.last_mut() {
        Some(previous) if between_tail.is_match(previous) => {
            previous.push_str(" AND ");
            previous.push_str(tail);
        }
        _ => parts.push(tail.to_string()),
    }
    parts.retain(|part| !part.is_empty());
    if parts.len() > 1 { Some(parts) } else { None }
}

fn parse_is_null_or(expr: &str) -> Option<(String, String)> {
    let re = Regex::new(r"(?i)^\s*(\w+)\s+is\s+null\s+or\s+(.+)$").ok()?;
    let caps = re.captures(expr)?;
    Some((caps[1].to_lowercase(), caps[2].trim().to_string()))
}

fn parse_is_null(expr: &str) -> Option<(String, bool)> {
    let re = Regex::new(r"(?i)^\s*(\w+)\s+is\s+(not\s+)?null\s*$").ok()?;
    let caps = re.captures(expr)?;
    Some((caps[1].to_lowercase(), caps.get(2).is_some()))
}

fn parse_in_list(expr: &str) -> Option<(String, Vec<String>)> {
    let re = Regex::new(r"(?i)^\s*(\w+)\s+in\s*\(([^\)]+)\)\s*$").ok()?;
    let caps = re.captures(expr)?;
    let values = split_list(&caps[2]);
    Some((caps[1].to_lowercase(), values))
}

fn parse_any_array(expr: &str) -> Option<(String, Vec<String>)> {
    let re = Regex::new(r"(?i)^\s*(\w+)\s*=\s*any\s*\(array\[([^\]]+)\]\)\s*$").ok()?;
    let caps = re.captures(expr)?;
    let values = split_list(&caps[2]);
    Some((caps[1].to_lowercase(), values))
}

fn parse_between(expr: &str) -> Option<(String, String, String)> {
    let re = Regex::new(r"(?i)^\s*(\w+)\s+between\s+(\S+)\s+and\s+(\S+)\s*$").ok()?;
    let caps = re.captures(expr)?;
    Some((
        caps[1].to_lowercase(),
        normalize_literal(&caps[2]),
        normalize_literal(&caps[3]),
    ))
}

fn parse_comparison(expr: &str) -> Option<(String, String, String)> {
    let re = Regex::new(r"^\s*(\w+)\s*(==|!=|<>|>=|<=|=|>|<)\s*('[^']*'|\S+)\s*$").ok()?;
    let caps = re.captures(expr)?;
    Some((
        caps[1].to_lowercase(),
        caps[2].to_string(),
        caps[3].trim().to_string(),
    ))
}

fn parse_operand(rhs: &str) -> Operand {
    if rhs.len() >= 2 && rhs.starts_with('\'') && rhs.ends_with('\'') {
        return Operand::Text(rhs[1..rhs.len() - 1].to_string());
    }
    if let Ok(value) = rhs.parse::<f64>() {
        return Operand::Number(value);
    }
    if rhs.eq_ignore_ascii_case("true") {
        return Operand::Bool(true);
    }
    if rhs.eq_ignore_ascii_case("false") {
        return Operand::Bool(false);
    }
    Operand::Column(rhs.to_lowercase())
}

/// Split a literal list on commas outside single quotes.
fn split_list(list: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for ch in list.chars() {
        match ch {
            '\'' => {
                quoted = !quoted;
                current.push(ch);
            }
            ',' if !quoted => values.push(normalize_literal(&std::mem::take(&mut current))),
            _ => current.push(ch),
        }
    }
    values.push(normalize_literal(&current));
    values
}

fn normalize_literal(value: &str) -> String {
    let trimmed = value.trim();
    let without_cast = match trimmed.split_once("::") {
        Some((left, _)) => left.trim(),
        None => trimmed,
    };
    if without_cast.len() >= 2 && without_cast.starts_with('\'') && without_cast.ends_with('\'') {
        without_cast[1..without_cast.len() - 1].to_string()
    } else {
        without_cast.to_string()
    }
}

fn evaluate_in(column: &str, values: &[String], ctx: &RowContext<'_>) -> PredicateOutcome {
    let value = match ctx.get(column) {
        Some(value) if !value.is_null() => value,
        _ => return PredicateOutcome::Unsupported,
    };

    let found = match value {
        Value::Text(text) => values.iter().any(|candidate| candidate == text),
        Value::Bool(flag) => values
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(&flag.to_string())),
        _ => match value.as_f64() {
            Some(num) => values
                .iter()
                .filter_map(|candidate| candidate.parse::<f64>().ok())
                .any(|candidate| candidate == num),
            None => return PredicateOutcome::Unsupported,
        },
    };
    PredicateOutcome::from_bool(found)
}

fn evaluate_comparison(
    column: &str,
    op: CompareOp,
    rhs: &Operand,
    ctx: &RowContext<'_>,
) -> PredicateOutcome {
    let left = match ctx.get(column) {
        Some(value) if !value.is_null() => value,
        _ => return PredicateOutcome::Unsupported,
    };
    let right = match rhs {
        Operand::Column(other) => match ctx.get(other) {
            Some(value) if !value.is_null() => value.clone(),
            _ => return PredicateOutcome::Unsupported,
        },
        Operand::Number(value) => Value::Float(*value),
        Operand::Text(value) => Value::Text(value.clone()),
        Operand::Bool(value) => Value::Bool(*value),
    };

    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return PredicateOutcome::from_bool(op.holds(l, r));
    }
    if let (Some(l), Some(r)) = (left.as_str(), right.as_str()) {
        return PredicateOutcome::from_bool(op.holds(l, r));
    }
    if let (Some(l), Some(r)) = (left.as_bool(), right.as_bool()) {
        return PredicateOutcome::from_bool(op.holds(l, r));
    }
    PredicateOutcome::Unsupported
}

fn is_null(column: &str, ctx: &RowContext<'_>) -> bool {
    ctx.get(column).map(Value::is_null).unwrap_or(false)
}
