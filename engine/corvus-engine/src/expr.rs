//! Row-wise filter expressions.
//!
//! Expressions are written against variables and bound to column indices
//! when the filter operator is constructed; regexes are compiled once at
//! bind time. Evaluation follows SPARQL error semantics: an UNDEF input, a
//! type mismatch or a missing vocabulary entry makes the expression
//! evaluate to an error, and an error excludes the row.

use std::fmt;
use std::sync::Arc;

use corvus_core::{Datatype, Id, IdTable, LocalVocab};

use crate::error::QueryError;
use crate::variable::{ColumnIndex, Variable, VariableColumnMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

/// Expression over variables, produced by the parser.
#[derive(Debug, Clone)]
pub enum Expression {
    Variable(Variable),
    IntLiteral(i64),
    DoubleLiteral(f64),
    BoolLiteral(bool),
    Arith(ArithOp, Box<Expression>, Box<Expression>),
    Compare(CmpOp, Box<Expression>, Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
    /// `REGEX(target, pattern)` with a pattern fixed at query time.
    Regex { target: Box<Expression>, pattern: String },
    /// `LANGMATCHES(LANG(target), tag)` in the compact form the rewriter
    /// emits.
    LangMatches { target: Box<Expression>, tag: String },
}

impl Expression {
    pub fn var(name: &str) -> Self {
        Expression::Variable(Variable::new(name))
    }

    /// Resolve variables to columns and compile regexes.
    pub fn bind(&self, variables: &VariableColumnMap) -> Result<BoundExpression, QueryError> {
        match self {
            Expression::Variable(var) => variables
                .get(var)
                .map(|&c| BoundExpression::Column(c))
                .ok_or_else(|| QueryError::Plan(format!("unbound variable {var} in filter"))),
            Expression::IntLiteral(v) => Ok(BoundExpression::Int(*v)),
            Expression::DoubleLiteral(v) => Ok(BoundExpression::Double(*v)),
            Expression::BoolLiteral(v) => Ok(BoundExpression::Bool(*v)),
            Expression::Arith(op, a, b) => Ok(BoundExpression::Arith(
                *op,
                Box::new(a.bind(variables)?),
                Box::new(b.bind(variables)?),
            )),
            Expression::Compare(op, a, b) => Ok(BoundExpression::Compare(
                *op,
                Box::new(a.bind(variables)?),
                Box::new(b.bind(variables)?),
            )),
            Expression::And(a, b) => Ok(BoundExpression::And(
                Box::new(a.bind(variables)?),
                Box::new(b.bind(variables)?),
            )),
            Expression::Or(a, b) => Ok(BoundExpression::Or(
                Box::new(a.bind(variables)?),
                Box::new(b.bind(variables)?),
            )),
            Expression::Not(a) => Ok(BoundExpression::Not(Box::new(a.bind(variables)?))),
            Expression::Regex { target, pattern } => {
                let regex = regex::Regex::new(pattern).map_err(|e| {
                    QueryError::Plan(format!("invalid regex {pattern:?} in filter: {e}"))
                })?;
                Ok(BoundExpression::Regex {
                    target: Box::new(target.bind(variables)?),
                    regex,
                })
            }
            Expression::LangMatches { target, tag } => Ok(BoundExpression::LangMatches {
                target: Box::new(target.bind(variables)?),
                tag: tag.to_ascii_lowercase(),
            }),
        }
    }
}

/// Expression with columns resolved, ready for row-wise evaluation.
#[derive(Debug)]
pub enum BoundExpression {
    Column(ColumnIndex),
    Int(i64),
    Double(f64),
    Bool(bool),
    Arith(ArithOp, Box<BoundExpression>, Box<BoundExpression>),
    Compare(CmpOp, Box<BoundExpression>, Box<BoundExpression>),
    And(Box<BoundExpression>, Box<BoundExpression>),
    Or(Box<BoundExpression>, Box<BoundExpression>),
    Not(Box<BoundExpression>),
    Regex {
        target: Box<BoundExpression>,
        regex: regex::Regex,
    },
    LangMatches {
        target: Box<BoundExpression>,
        tag: String,
    },
}

/// Intermediate value of one evaluation step.
#[derive(Debug, Clone)]
enum Value {
    Bool(bool),
    Num(f64),
    Str(Arc<str>),
    /// A vocabulary-like id without an accessible string form; supports
    /// equality and ordering, nothing else.
    Opaque(Id),
}

impl BoundExpression {
    /// Whether the row passes: `Some(true)` keeps it, everything else
    /// (false or error) drops it.
    pub fn keeps_row(&self, table: &IdTable, row: usize, vocab: &LocalVocab) -> bool {
        matches!(self.evaluate(table, row, vocab).and_then(ebv), Some(true))
    }

    fn evaluate(&self, table: &IdTable, row: usize, vocab: &LocalVocab) -> Option<Value> {
        match self {
            BoundExpression::Column(c) => id_to_value(table.at(row, *c), vocab),
            BoundExpression::Int(v) => Some(Value::Num(*v as f64)),
            BoundExpression::Double(v) => Some(Value::Num(*v)),
            BoundExpression::Bool(v) => Some(Value::Bool(*v)),
            BoundExpression::Arith(op, a, b) => {
                let a = as_num(a.evaluate(table, row, vocab)?)?;
                let b = as_num(b.evaluate(table, row, vocab)?)?;
                let value = match op {
                    ArithOp::Add => a + b,
                    ArithOp::Subtract => a - b,
                    ArithOp::Multiply => a * b,
                    ArithOp::Divide => {
                        if b == 0.0 {
                            return None;
                        }
                        a / b
                    }
                };
                Some(Value::Num(value))
            }
            BoundExpression::Compare(op, a, b) => {
                let ordering = compare_values(
                    a.evaluate(table, row, vocab)?,
                    b.evaluate(table, row, vocab)?,
                )?;
                let result = match op {
                    CmpOp::Equal => ordering == std::cmp::Ordering::Equal,
                    CmpOp::NotEqual => ordering != std::cmp::Ordering::Equal,
                    CmpOp::Less => ordering == std::cmp::Ordering::Less,
                    CmpOp::LessEqual => ordering != std::cmp::Ordering::Greater,
                    CmpOp::Greater => ordering == std::cmp::Ordering::Greater,
                    CmpOp::GreaterEqual => ordering != std::cmp::Ordering::Less,
                };
                Some(Value::Bool(result))
            }
            BoundExpression::And(a, b) => {
                // SPARQL logical AND: errors poison unless the other side
                // already decides.
                match (
                    a.evaluate(table, row, vocab).and_then(ebv),
                    b.evaluate(table, row, vocab).and_then(ebv),
                ) {
                    (Some(false), _) | (_, Some(false)) => Some(Value::Bool(false)),
                    (Some(true), Some(true)) => Some(Value::Bool(true)),
                    _ => None,
                }
            }
            BoundExpression::Or(a, b) => {
                match (
                    a.evaluate(table, row, vocab).and_then(ebv),
                    b.evaluate(table, row, vocab).and_then(ebv),
                ) {
                    (Some(true), _) | (_, Some(true)) => Some(Value::Bool(true)),
                    (Some(false), Some(false)) => Some(Value::Bool(false)),
                    _ => None,
                }
            }
            BoundExpression::Not(a) => {
                let value = a.evaluate(table, row, vocab).and_then(ebv)?;
                Some(Value::Bool(!value))
            }
            BoundExpression::Regex { target, regex } => {
                match target.evaluate(table, row, vocab)? {
                    Value::Str(s) => Some(Value::Bool(regex.is_match(literal_form(&s)))),
                    _ => None,
                }
            }
            BoundExpression::LangMatches { target, tag } => {
                match target.evaluate(table, row, vocab)? {
                    Value::Str(s) => Some(Value::Bool(language_tag(&s).is_some_and(
                        |lang| lang.eq_ignore_ascii_case(tag) || tag == "*",
                    ))),
                    _ => None,
                }
            }
        }
    }

    /// Canonical rendering embedded in filter cache keys.
    pub fn cache_key(&self) -> String {
        self.to_string()
    }
}

fn id_to_value(id: Id, vocab: &LocalVocab) -> Option<Value> {
    match id.datatype() {
        // UNDEF is an evaluation error, which excludes the row.
        Datatype::Undefined => None,
        Datatype::Bool => id.as_bool().map(Value::Bool),
        Datatype::Int => id.as_int().map(|v| Value::Num(v as f64)),
        Datatype::Double => id.as_double().map(Value::Num),
        Datatype::LocalVocabIndex => vocab.get(id).map(Value::Str),
        _ => Some(Value::Opaque(id)),
    }
}

fn as_num(value: Value) -> Option<f64> {
    match value {
        Value::Num(v) => Some(v),
        Value::Bool(b) => Some(b as u8 as f64),
        _ => None,
    }
}

fn compare_values(a: Value, b: Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Num(a), Value::Num(b)) => a.partial_cmp(&b),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(&b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(&b)),
        (Value::Opaque(a), Value::Opaque(b)) => Some(a.cmp(&b)),
        _ => None,
    }
}

/// Effective boolean value.
fn ebv(value: Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(b),
        Value::Num(n) => Some(n != 0.0 && !n.is_nan()),
        Value::Str(s) => Some(!s.is_empty()),
        Value::Opaque(_) => None,
    }
}

/// Strip a trailing `@lang` tag, if any.
fn literal_form(s: &str) -> &str {
    match s.rfind('@') {
        Some(at) if at > 0 && s[at + 1..].chars().all(|c| c.is_ascii_alphanumeric() || c == '-') => {
            &s[..at]
        }
        _ => s,
    }
}

fn language_tag(s: &str) -> Option<&str> {
    let at = s.rfind('@')?;
    let tag = &s[at + 1..];
    if at > 0 && !tag.is_empty() && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        Some(tag)
    } else {
        None
    }
}

impl fmt::Display for BoundExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundExpression::Column(c) => write!(f, "c{c}"),
            BoundExpression::Int(v) => write!(f, "{v}"),
            BoundExpression::Double(v) => write!(f, "{v:?}"),
            BoundExpression::Bool(v) => write!(f, "{v}"),
            BoundExpression::Arith(op, a, b) => {
                let symbol = match op {
                    ArithOp::Add => "+",
                    ArithOp::Subtract => "-",
                    ArithOp::Multiply => "*",
                    ArithOp::Divide => "/",
                };
                write!(f, "({a} {symbol} {b})")
            }
            BoundExpression::Compare(op, a, b) => {
                let symbol = match op {
                    CmpOp::Equal => "=",
                    CmpOp::NotEqual => "!=",
                    CmpOp::Less => "<",
                    CmpOp::LessEqual => "<=",
                    CmpOp::Greater => ">",
                    CmpOp::GreaterEqual => ">=",
                };
                write!(f, "({a} {symbol} {b})")
            }
            BoundExpression::And(a, b) => write!(f, "({a} && {b})"),
            BoundExpression::Or(a, b) => write!(f, "({a} || {b})"),
            BoundExpression::Not(a) => write!(f, "(!{a})"),
            BoundExpression::Regex { target, regex } => {
                write!(f, "REGEX({target}, {:?})", regex.as_str())
            }
            BoundExpression::LangMatches { target, tag } => {
                write!(f, "LANGMATCHES({target}, {tag:?})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvus_core::TrackedAllocator;

    fn single_row(ids: &[Id]) -> IdTable {
        IdTable::from_rows(&[ids], TrackedAllocator::unlimited()).unwrap()
    }

    fn bind_single(expr: Expression) -> BoundExpression {
        let mut vars = VariableColumnMap::new();
        vars.insert(Variable::new("x"), 0);
        vars.insert(Variable::new("y"), 1);
        expr.bind(&vars).unwrap()
    }

    #[test]
    fn arithmetic_comparison() {
        // ?x + 1 < ?y
        let expr = bind_single(Expression::Compare(
            CmpOp::Less,
            Box::new(Expression::Arith(
                ArithOp::Add,
                Box::new(Expression::var("x")),
                Box::new(Expression::IntLiteral(1)),
            )),
            Box::new(Expression::var("y")),
        ));
        let vocab = LocalVocab::new();
        let passes = single_row(&[Id::from_int(1), Id::from_int(3)]);
        let fails = single_row(&[Id::from_int(2), Id::from_int(3)]);
        assert!(expr.keeps_row(&passes, 0, &vocab));
        assert!(!expr.keeps_row(&fails, 0, &vocab));
    }

    #[test]
    fn undef_input_excludes_the_row() {
        let expr = bind_single(Expression::Compare(
            CmpOp::Equal,
            Box::new(Expression::var("x")),
            Box::new(Expression::IntLiteral(1)),
        ));
        let vocab = LocalVocab::new();
        let table = single_row(&[Id::UNDEF, Id::from_int(1)]);
        assert!(!expr.keeps_row(&table, 0, &vocab));
    }

    #[test]
    fn regex_matches_local_vocab_strings() {
        let vocab = LocalVocab::new();
        let id = vocab.add_word("Hello World");
        let expr = bind_single(Expression::Regex {
            target: Box::new(Expression::var("x")),
            pattern: "^Hello".into(),
        });
        let table = single_row(&[id, Id::from_int(0)]);
        assert!(expr.keeps_row(&table, 0, &vocab));
    }

    #[test]
    fn lang_matches_tagged_literals() {
        let vocab = LocalVocab::new();
        let tagged = vocab.add_word("Hallo@de");
        let plain = vocab.add_word("Hello");
        let expr = bind_single(Expression::LangMatches {
            target: Box::new(Expression::var("x")),
            tag: "de".into(),
        });
        let table = single_row(&[tagged, Id::from_int(0)]);
        assert!(expr.keeps_row(&table, 0, &vocab));
        let table = single_row(&[plain, Id::from_int(0)]);
        assert!(!expr.keeps_row(&table, 0, &vocab));
    }

    #[test]
    fn unbound_variable_is_a_plan_error() {
        let vars = VariableColumnMap::new();
        let result = Expression::var("missing").bind(&vars);
        assert!(matches!(result, Err(QueryError::Plan(_))));
    }

    #[test]
    fn cache_key_is_canonical() {
        let expr = bind_single(Expression::Compare(
            CmpOp::LessEqual,
            Box::new(Expression::var("x")),
            Box::new(Expression::DoubleLiteral(2.5)),
        ));
        assert_eq!(expr.cache_key(), "(c0 <= 2.5)");
    }
}
