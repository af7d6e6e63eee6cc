//! Nested-loop join: inner side materialized once, outer side streamed.
//!
//! Handles INNER, LEFT (null-padded when no inner row matches) and CROSS.
//! When the optimizer swapped the sides for cardinality, output rows are
//! recomposed so columns still appear in the original left ++ right order.

use crate::access::value::Value;
use crate::error::{DbError, DbResult};
use crate::executor::{ColumnInfo, Executor};
use crate::expression::eval::{evaluate, truthy};
use crate::sql::ast::{Expression, JoinType};

pub struct NestedLoopJoinExecutor {
    outer: Box<dyn Executor>,
    inner: Box<dyn Executor>,
    join_type: JoinType,
    condition: Option<Expression>,
    swapped: bool,
    schema: Vec<ColumnInfo>,
    inner_rows: Vec<Vec<Value>>,
    current_outer: Option<Vec<Value>>,
    inner_pos: usize,
    outer_matched: bool,
}

impl NestedLoopJoinExecutor {
    pub fn new(
        outer: Box<dyn Executor>,
        inner: Box<dyn Executor>,
        join_type: JoinType,
        condition: Option<Expression>,
        swapped: bool,
    ) -> Self {
        Self {
            outer,
            inner,
            join_type,
            condition,
            swapped,
            schema: Vec::new(),
            inner_rows: Vec::new(),
            current_outer: None,
            inner_pos: 0,
            outer_matched: false,
        }
    }

    /// Joined row in original left ++ right column order.
    fn compose(&self, outer_row: &[Value], inner_row: &[Value]) -> Vec<Value> {
        let (left, right) = if self.swapped {
            (inner_row, outer_row)
        } else {
            (outer_row, inner_row)
        };
        left.iter().chain(right.iter()).cloned().collect()
    }

    /// Evaluation schema in outer ++ inner order, matching the composed row
    /// re-ordered for the predicate.
    fn eval_row(&self, outer_row: &[Value], inner_row: &[Value]) -> Vec<Value> {
        self.compose(outer_row, inner_row)
    }
}

impl Executor for NestedLoopJoinExecutor {
    fn init(&mut self) -> DbResult<()> {
        if self.join_type == JoinType::Left && self.swapped {
            return Err(DbError::QueryPlan(
                "LEFT JOIN sides cannot be swapped".into(),
            ));
        }
        self.outer.init()?;
        self.inner.init()?;
        while let Some(row) = self.inner.next()? {
            self.inner_rows.push(row);
        }
        let (left_schema, right_schema) = if self.swapped {
            (self.inner.output_schema(), self.outer.output_schema())
        } else {
            (self.outer.output_schema(), self.inner.output_schema())
        };
        self.schema = left_schema.iter().chain(right_schema).cloned().collect();
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Vec<Value>>> {
        loop {
            if self.current_outer.is_none() {
                match self.outer.next()? {
                    Some(row) => {
                        self.current_outer = Some(row);
                        self.inner_pos = 0;
                        self.outer_matched = false;
                    }
                    None => return Ok(None),
                }
            }

            let outer_row = self.current_outer.clone().expect("set above");
            while self.inner_pos < self.inner_rows.len() {
                let inner_row = self.inner_rows[self.inner_pos].clone();
                self.inner_pos += 1;

                let accept = match &self.condition {
                    Some(cond) => {
                        let row = self.eval_row(&outer_row, &inner_row);
                        truthy(&evaluate(cond, &row, &self.schema)?)?
                    }
                    None => true,
                };
                if accept {
                    self.outer_matched = true;
                    return Ok(Some(self.compose(&outer_row, &inner_row)));
                }
            }

            // Outer row exhausted; LEFT JOIN pads unmatched rows with NULLs.
            let unmatched_left = self.join_type == JoinType::Left && !self.outer_matched;
            self.current_outer = None;
            if unmatched_left {
                let nulls = vec![Value::Null; self.inner.output_schema().len()];
                return Ok(Some(self.compose(&outer_row, &nulls)));
            }
        }
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        &self.schema
    }
}
