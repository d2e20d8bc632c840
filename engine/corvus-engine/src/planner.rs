//! Lowering of the parsed algebra to a physical plan.
//!
//! The parser and algebraic rewriter live outside this crate; what arrives
//! here is an abstract [`QueryPattern`]. The planner binds it to operator
//! subclasses, chooses permutations for triple scans, inserts sorts so
//! join inputs arrive ordered on their join columns, and picks the cheaper
//! child order for multi-column joins.

use corvus_core::Id;

use crate::context::SharedExecutionContext;
use crate::error::QueryError;
use crate::expr::Expression;
use crate::index::Permutation;
use crate::operation::Operation;
use crate::ops::{
    Distinct, Filter, Join, Minus, MultiColumnJoin, NeutralElement, OptionalJoin, Scan, Sort,
    TextLimit, Union, Values,
};
use crate::tree::{QueryExecutionTree, SharedTree};
use crate::variable::Variable;

/// One position of a triple pattern.
#[derive(Debug, Clone)]
pub enum TermPattern {
    Variable(Variable),
    Fixed(Id),
}

/// The abstract query handed over by the parser.
#[derive(Debug, Clone)]
pub enum QueryPattern {
    Triple {
        subject: TermPattern,
        predicate: TermPattern,
        object: TermPattern,
    },
    Join(Box<QueryPattern>, Box<QueryPattern>),
    Optional(Box<QueryPattern>, Box<QueryPattern>),
    Minus(Box<QueryPattern>, Box<QueryPattern>),
    Union(Box<QueryPattern>, Box<QueryPattern>),
    Filter(Box<QueryPattern>, Expression),
    Distinct(Box<QueryPattern>),
    OrderBy(Box<QueryPattern>, Vec<Variable>),
    TextLimit {
        child: Box<QueryPattern>,
        limit: usize,
        text_record: Variable,
        entities: Vec<Variable>,
        scores: Vec<Variable>,
    },
    Values {
        variables: Vec<Variable>,
        rows: Vec<Vec<Id>>,
    },
    /// The empty group pattern.
    Empty,
}

pub struct QueryPlanner {
    ctx: SharedExecutionContext,
}

impl QueryPlanner {
    pub fn new(ctx: SharedExecutionContext) -> Self {
        Self { ctx }
    }

    pub fn plan(&self, pattern: &QueryPattern) -> Result<SharedTree, QueryError> {
        match pattern {
            QueryPattern::Triple {
                subject,
                predicate,
                object,
            } => self.plan_triple(subject, predicate, object),
            QueryPattern::Join(a, b) => self.plan_join(a, b),
            QueryPattern::Optional(a, b) => {
                let left = self.plan(a)?;
                let right = self.plan(b)?;
                let op = OptionalJoin::new(self.ctx.clone(), left, right)?;
                Ok(QueryExecutionTree::new(Box::new(op)))
            }
            QueryPattern::Minus(a, b) => {
                let left = self.plan(a)?;
                let right = self.plan(b)?;
                let op = Minus::new(self.ctx.clone(), left, right)?;
                Ok(QueryExecutionTree::new(Box::new(op)))
            }
            QueryPattern::Union(a, b) => {
                let left = self.plan(a)?;
                let right = self.plan(b)?;
                let op = Union::new(self.ctx.clone(), left, right)?;
                Ok(QueryExecutionTree::new(Box::new(op)))
            }
            QueryPattern::Filter(child, expression) => {
                let child = self.plan(child)?;
                let op = Filter::new(self.ctx.clone(), child, expression.clone())?;
                Ok(QueryExecutionTree::new(Box::new(op)))
            }
            QueryPattern::Distinct(child) => {
                let child = self.plan(child)?;
                // Dedup needs equal rows adjacent, so sort on all columns.
                let all_columns: Vec<usize> = (0..child.result_width()).collect();
                let sorted = QueryExecutionTree::ensure_sorted_on(child, &all_columns);
                let op = Distinct::new(self.ctx.clone(), sorted);
                Ok(QueryExecutionTree::new(Box::new(op)))
            }
            QueryPattern::OrderBy(child, variables) => {
                let child = self.plan(child)?;
                let columns = self.resolve_columns(&child, variables)?;
                let op = Sort::new(self.ctx.clone(), child, columns);
                Ok(QueryExecutionTree::new(Box::new(op)))
            }
            QueryPattern::TextLimit {
                child,
                limit,
                text_record,
                entities,
                scores,
            } => {
                let child = self.plan(child)?;
                let text_record_column = self.resolve_columns(&child, &[text_record.clone()])?[0];
                let entity_columns = self.resolve_columns(&child, entities)?;
                let score_columns = self.resolve_columns(&child, scores)?;
                let op = TextLimit::new(
                    self.ctx.clone(),
                    child,
                    *limit,
                    text_record_column,
                    entity_columns,
                    score_columns,
                );
                Ok(QueryExecutionTree::new(Box::new(op)))
            }
            QueryPattern::Values { variables, rows } => {
                let op = Values::new(self.ctx.clone(), variables.clone(), rows.clone());
                Ok(QueryExecutionTree::new(Box::new(op)))
            }
            QueryPattern::Empty => Ok(QueryExecutionTree::new(Box::new(NeutralElement::new(
                self.ctx.clone(),
            )))),
        }
    }

    fn plan_triple(
        &self,
        subject: &TermPattern,
        predicate: &TermPattern,
        object: &TermPattern,
    ) -> Result<SharedTree, QueryError> {
        use TermPattern::{Fixed, Variable as Var};
        // Pick the permutation whose sort order puts the fixed positions
        // first; the free positions then come out sorted.
        let (permutation, prefix, free): (Permutation, Vec<Id>, Vec<&Variable>) =
            match (subject, predicate, object) {
                (Var(s), Var(p), Var(o)) => (Permutation::Spo, vec![], vec![s, p, o]),
                (Fixed(s), Var(p), Var(o)) => (Permutation::Spo, vec![*s], vec![p, o]),
                (Var(s), Fixed(p), Var(o)) => (Permutation::Pso, vec![*p], vec![s, o]),
                (Var(s), Var(p), Fixed(o)) => (Permutation::Osp, vec![*o], vec![s, p]),
                (Fixed(s), Fixed(p), Var(o)) => (Permutation::Spo, vec![*s, *p], vec![o]),
                (Fixed(s), Var(p), Fixed(o)) => (Permutation::Sop, vec![*s, *o], vec![p]),
                (Var(s), Fixed(p), Fixed(o)) => (Permutation::Pos, vec![*p, *o], vec![s]),
                (Fixed(s), Fixed(p), Fixed(o)) => (Permutation::Spo, vec![*s, *p, *o], vec![]),
            };
        let mut seen: Vec<&Variable> = Vec::new();
        for var in free.iter().copied() {
            if seen.contains(&var) {
                return Err(QueryError::Plan(format!(
                    "repeated variable {var} in a triple pattern is not supported"
                )));
            }
            seen.push(var);
        }
        let op = Scan::new(
            self.ctx.clone(),
            permutation,
            prefix,
            free.into_iter().cloned().collect(),
        );
        Ok(QueryExecutionTree::new(Box::new(op)))
    }

    fn plan_join(&self, a: &QueryPattern, b: &QueryPattern) -> Result<SharedTree, QueryError> {
        let left = self.plan(a)?;
        let right = self.plan(b)?;
        let shared = {
            let left_vars = left.variable_columns();
            right
                .variable_columns()
                .keys()
                .filter(|v| left_vars.contains_key(*v))
                .count()
        };
        match shared {
            0 => Err(QueryError::Plan(
                "join without a shared variable (cartesian products are not supported)".into(),
            )),
            1 => {
                let op = Join::new(self.ctx.clone(), left, right)?;
                Ok(QueryExecutionTree::new(Box::new(op)))
            }
            _ => {
                // Not commutative at the operator level; compare both
                // child orders by estimated cost.
                let forward =
                    MultiColumnJoin::new(self.ctx.clone(), left.clone(), right.clone())?;
                let backward = MultiColumnJoin::new(self.ctx.clone(), right, left)?;
                let op = if forward.cost_estimate() <= backward.cost_estimate() {
                    forward
                } else {
                    backward
                };
                Ok(QueryExecutionTree::new(Box::new(op)))
            }
        }
    }

    fn resolve_columns(
        &self,
        tree: &SharedTree,
        variables: &[Variable],
    ) -> Result<Vec<usize>, QueryError> {
        let map = tree.variable_columns();
        variables
            .iter()
            .map(|var| {
                map.get(var).copied().ok_or_else(|| {
                    QueryError::Plan(format!("variable {var} is unbound in this scope"))
                })
            })
            .collect()
    }
}
